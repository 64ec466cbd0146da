//! Foreground/background relay for host application lifecycle signals.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Raw lifecycle value as reported by the host OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppLifecycleState {
    Active,
    Background,
    /// Transient overlay state (system prompts, app switcher). Never forwarded.
    Inactive,
}

impl AppLifecycleState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Background => "background",
            Self::Inactive => "inactive",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" | "foreground" => Some(Self::Active),
            "background" => Some(Self::Background),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }

    #[must_use]
    pub fn visibility(self) -> Option<AppVisibility> {
        match self {
            Self::Active => Some(AppVisibility::Active),
            Self::Background => Some(AppVisibility::Background),
            Self::Inactive => None,
        }
    }
}

/// The two lifecycle states observable downstream of [`AppStateMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppVisibility {
    Active,
    Background,
}

impl AppVisibility {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Background => "background",
        }
    }

    #[must_use]
    pub fn is_foreground(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Filters raw lifecycle signals into a de-duplicated [`AppVisibility`] stream.
///
/// Subscribers receive a `watch` receiver, so a slow consumer only ever observes the latest
/// state; intermediate transitions it missed are coalesced.
#[derive(Debug, Clone)]
pub struct AppStateMonitor {
    tx: Arc<watch::Sender<AppVisibility>>,
}

impl AppStateMonitor {
    #[must_use]
    pub fn new(initial: AppVisibility) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    #[must_use]
    pub fn current(&self) -> AppVisibility {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AppVisibility> {
        self.tx.subscribe()
    }

    /// Applies one raw signal. Returns the emitted value, or `None` when the signal was
    /// `inactive` or repeated the last emitted state.
    pub fn observe(&self, raw: AppLifecycleState) -> Option<AppVisibility> {
        let next = raw.visibility()?;
        let emitted = self.tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if emitted {
            debug!("App lifecycle transitioned to {}", next.as_str());
            Some(next)
        } else {
            None
        }
    }

    /// Relays every signal from `source` until the returned subscription is released or the
    /// source closes.
    #[must_use]
    pub fn attach(&self, mut source: mpsc::Receiver<AppLifecycleState>) -> MonitorSubscription {
        let monitor = self.clone();
        let task = tokio::spawn(async move {
            while let Some(raw) = source.recv().await {
                monitor.observe(raw);
            }
            debug!("App lifecycle source closed");
        });
        MonitorSubscription { task: Some(task) }
    }
}

/// Scoped handle for an attached lifecycle source. Dropping it unsubscribes.
#[derive(Debug)]
pub struct MonitorSubscription {
    task: Option<JoinHandle<()>>,
}

impl MonitorSubscription {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn release(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for MonitorSubscription {
    fn drop(&mut self) {
        self.abort();
    }
}
