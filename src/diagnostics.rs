use serde::Serialize;

use crate::{connection::ConnectionManager, mirror::NotificationMirror, util::unix_now_secs};

/// Point-in-time health view of the sync core, for logging and operator
/// tooling.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeDiagnostics {
    pub connection_state: String,
    pub should_run: bool,
    pub last_connected_at: Option<u64>,
    pub last_event_at: Option<u64>,
    pub stale_for_seconds: Option<u64>,
    pub last_error: Option<String>,
    pub reconnect_attempts: u32,
    pub mirrored: usize,
    pub unread: u64,
    pub generation: u64,
}

pub fn snapshot(
    connection: &ConnectionManager,
    mirror: &NotificationMirror,
) -> RuntimeDiagnostics {
    let runtime = connection.runtime_view();
    let mirror_snapshot = mirror.snapshot();

    let now = unix_now_secs();
    let stale_for_seconds = runtime.last_event_at.map(|last| now.saturating_sub(last));

    RuntimeDiagnostics {
        connection_state: runtime.state.as_str().to_string(),
        should_run: runtime.should_run,
        last_connected_at: runtime.last_connected_at,
        last_event_at: runtime.last_event_at,
        stale_for_seconds,
        last_error: runtime.last_error,
        reconnect_attempts: runtime.reconnect_attempts,
        mirrored: mirror_snapshot.notifications.len(),
        unread: mirror_snapshot.unread,
        generation: mirror_snapshot.generation,
    }
}
