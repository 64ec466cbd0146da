use serde::{Deserialize, Serialize};

pub const ENV_ENABLE_IMPLICIT_INVITATIONS: &str = "WALLET_ENABLE_IMPLICIT_INVITATIONS";
pub const ENV_ENABLE_REUSE_CONNECTIONS: &str = "WALLET_ENABLE_REUSE_CONNECTIONS";
pub const CONFIG_SOURCE_DEFAULT: &str = "default";

pub const DEFAULT_ENABLE_IMPLICIT_INVITATIONS: bool = true;
pub const DEFAULT_ENABLE_REUSE_CONNECTIONS: bool = true;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigInputError {
    #[error("{key} must not be empty")]
    EmptyFlag { key: String },
    #[error("{key} must be one of 1/0/true/false/yes/no/on/off, got {value}")]
    InvalidFlag { key: String, value: String },
}

/// Toggles handed to the connection establisher for every deep-link attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_implicit_invitations")]
    pub enable_implicit_invitations: bool,
    #[serde(default = "default_reuse_connections")]
    pub enable_reuse_connections: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enable_implicit_invitations: DEFAULT_ENABLE_IMPLICIT_INVITATIONS,
            enable_reuse_connections: DEFAULT_ENABLE_REUSE_CONNECTIONS,
        }
    }
}

fn default_implicit_invitations() -> bool {
    DEFAULT_ENABLE_IMPLICIT_INVITATIONS
}

fn default_reuse_connections() -> bool {
    DEFAULT_ENABLE_REUSE_CONNECTIONS
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOrchestratorConfig {
    pub config: OrchestratorConfig,
    pub implicit_invitations_source: String,
    pub reuse_connections_source: String,
}

/// Resolves the orchestrator toggles from the environment, falling back to defaults.
///
/// Each source label is either the env var name that supplied the value or `"default"`.
pub fn resolve_orchestrator_config() -> Result<ResolvedOrchestratorConfig, ConfigInputError> {
    let (enable_implicit_invitations, implicit_invitations_source) = resolve_flag(
        ENV_ENABLE_IMPLICIT_INVITATIONS,
        DEFAULT_ENABLE_IMPLICIT_INVITATIONS,
    )?;
    let (enable_reuse_connections, reuse_connections_source) =
        resolve_flag(ENV_ENABLE_REUSE_CONNECTIONS, DEFAULT_ENABLE_REUSE_CONNECTIONS)?;

    Ok(ResolvedOrchestratorConfig {
        config: OrchestratorConfig {
            enable_implicit_invitations,
            enable_reuse_connections,
        },
        implicit_invitations_source,
        reuse_connections_source,
    })
}

fn resolve_flag(key: &str, default: bool) -> Result<(bool, String), ConfigInputError> {
    match std::env::var(key) {
        Ok(raw) => parse_bool_flag(key, &raw).map(|value| (value, key.to_string())),
        Err(_) => Ok((default, CONFIG_SOURCE_DEFAULT.to_string())),
    }
}

pub fn parse_bool_flag(key: &str, raw: &str) -> Result<bool, ConfigInputError> {
    let normalized = raw.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "" => Err(ConfigInputError::EmptyFlag {
            key: key.to_string(),
        }),
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigInputError::InvalidFlag {
            key: key.to_string(),
            value: raw.trim().to_string(),
        }),
    }
}
