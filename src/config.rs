use std::{fs, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    error::{SyncError, SyncResult},
    util::{restrict_file_permissions, unique_time_suffix, write_file_atomic},
};

const KEYRING_SERVICE: &str = "teamline-notify";
const KEYRING_USER: &str = "session-token";

/// Local agent configuration. The session credential itself lives in the OS
/// keychain; the `token` field is a fallback for environments without one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub base_url: String,
    pub token: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
        }
    }
}

pub(crate) fn config_dir() -> SyncResult<PathBuf> {
    let base = dirs::config_dir()
        .ok_or_else(|| SyncError::Config("no user config directory available".to_string()))?;
    let dir = base.join("teamline-notify");
    fs::create_dir_all(&dir)
        .map_err(|error| SyncError::Config(format!("failed to create config directory: {error}")))?;
    Ok(dir)
}

pub(crate) fn config_file() -> SyncResult<PathBuf> {
    Ok(config_dir()?.join("config.json"))
}

pub(crate) fn mirror_cache_file() -> SyncResult<PathBuf> {
    Ok(config_dir()?.join("notifications.json"))
}

pub fn read_config() -> SyncResult<AgentConfig> {
    let path = config_file()?;
    if !path.exists() {
        return Ok(AgentConfig::default());
    }

    let content = fs::read_to_string(&path)
        .map_err(|error| SyncError::Config(format!("failed to read config: {error}")))?;
    serde_json::from_str::<AgentConfig>(&content)
        .map_err(|error| SyncError::Config(format!("failed to parse config: {error}")))
}

pub fn write_config(config: &AgentConfig) -> SyncResult<()> {
    let path = config_file()?;
    let content = serde_json::to_string_pretty(config)
        .map_err(|error| SyncError::Config(format!("failed to serialize config: {error}")))?;
    write_file_atomic(&path, content.as_bytes())?;
    restrict_file_permissions(&path);
    Ok(())
}

/// Resolves the session credential: keychain first, config-file fallback.
pub fn load_token(config: &AgentConfig) -> SyncResult<Option<String>> {
    match keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER) {
        Ok(entry) => match entry.get_password() {
            Ok(token) if !token.trim().is_empty() => return Ok(Some(token.trim().to_string())),
            Ok(_) | Err(keyring::Error::NoEntry) => {}
            Err(error) => {
                tracing::debug!(%error, "keychain lookup failed, falling back to config file");
            }
        },
        Err(error) => {
            tracing::debug!(%error, "keychain unavailable, falling back to config file");
        }
    }

    Ok(config
        .token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string))
}

pub fn store_token(token: &str) -> SyncResult<()> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return Err(SyncError::Config("token is required".to_string()));
    }

    match keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER) {
        Ok(entry) => entry
            .set_password(trimmed)
            .map_err(|error| SyncError::Config(format!("failed to store token: {error}"))),
        Err(error) => Err(SyncError::Config(format!(
            "keychain unavailable: {error}"
        ))),
    }
}

pub(crate) fn normalize_base_url(input: &str) -> SyncResult<String> {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(SyncError::Config("server URL is required".to_string()));
    }

    let url = reqwest::Url::parse(trimmed)
        .map_err(|error| SyncError::Config(format!("invalid server URL: {error}")))?;

    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(SyncError::Config(
            "server URL must start with http:// or https://".to_string(),
        ));
    }

    Ok(trimmed.to_string())
}

pub(crate) fn build_stream_ws_url(base_url: &str) -> SyncResult<String> {
    let mut ws_url = reqwest::Url::parse(base_url)
        .map_err(|error| SyncError::Config(format!("invalid server URL: {error}")))?;

    match ws_url.scheme() {
        "http" => {
            ws_url
                .set_scheme("ws")
                .map_err(|_| SyncError::Config("unable to convert URL scheme to ws".to_string()))?;
        }
        "https" => {
            ws_url.set_scheme("wss").map_err(|_| {
                SyncError::Config("unable to convert URL scheme to wss".to_string())
            })?;
        }
        _ => {
            return Err(SyncError::Config(
                "server URL must start with http:// or https://".to_string(),
            ))
        }
    }

    let mut path = ws_url.path().trim_end_matches('/').to_string();
    path.push_str("/api/stream");
    ws_url.set_path(&path);
    Ok(ws_url.to_string())
}

/// Moves a file that failed to parse aside so the next start begins clean
/// while the evidence is kept.
pub(crate) fn quarantine_corrupt_file(path: &PathBuf) {
    let backup_path = path.with_extension(format!("corrupt-{}.json", unique_time_suffix()));
    if let Err(error) = fs::rename(path, &backup_path) {
        tracing::debug!(%error, "failed to move corrupt file aside");
    } else {
        tracing::debug!(?backup_path, "moved corrupt file aside");
    }
}
