use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::error::{SyncError, SyncResult};

/// Monotonic counter for generating unique temp/backup file suffixes.
static FILE_SUFFIX_COUNTER: AtomicU64 = AtomicU64::new(0);

pub(crate) fn truncate_message(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }

    let truncated: String = input.chars().take(max_chars).collect();
    format!("{truncated}...")
}

pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub(crate) fn unique_time_suffix() -> u64 {
    FILE_SUFFIX_COUNTER.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn restrict_file_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        if path.exists() {
            if let Err(error) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
                tracing::debug!(?path, %error, "failed to restrict file permissions");
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

/// Writes `content` to `path` via a uniquely named sibling temp file and an
/// atomic rename, so readers never observe a half-written file.
pub(crate) fn write_file_atomic(path: &PathBuf, content: &[u8]) -> SyncResult<()> {
    let tmp_path = path.with_extension(format!("tmp-{}", unique_time_suffix()));
    fs::write(&tmp_path, content)
        .map_err(|error| SyncError::Config(format!("failed to write {tmp_path:?}: {error}")))?;
    restrict_file_permissions(&tmp_path);
    fs::rename(&tmp_path, path).map_err(|error| {
        SyncError::Config(format!("failed to atomically replace {path:?}: {error}"))
    })
}

pub(crate) fn redact_ws_url(url: &str) -> String {
    let mut parsed = match reqwest::Url::parse(url) {
        Ok(url) => url,
        Err(_) => return "<invalid-url>".to_string(),
    };
    if parsed.query().is_some() {
        parsed.set_query(Some("token=***"));
    }
    parsed.to_string()
}
