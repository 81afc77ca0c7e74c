use std::{
    fs,
    path::PathBuf,
    sync::Mutex,
    thread,
};

use tokio::sync::watch;

use crate::{
    config::quarantine_corrupt_file,
    consts::MIRROR_CACHE_LIMIT,
    error::{SyncError, SyncResult},
    model::Notification,
    util::write_file_atomic,
};

/// Immutable view of the mirror handed to subscribers. `generation` bumps on
/// every change so consumers can cheaply detect staleness.
#[derive(Debug, Clone, Default)]
pub struct MirrorSnapshot {
    /// Most-recent-first.
    pub notifications: Vec<Notification>,
    pub unread: u64,
    pub generation: u64,
}

struct MirrorState {
    notifications: Vec<Notification>,
    unread: u64,
    generation: u64,
}

/// Client-local ordered copy of the user's notifications plus the derived
/// unread counter.
///
/// `bulk_load` is the only authoritative way to change `unread`; the counter
/// is recomputed from the full set on every load. `insert_pushed` applies
/// the transient head-insert for live events. Consumers never mutate entries
/// directly; mutations round-trip through [`crate::reconcile::Reconciler`].
///
/// All view adapters observe the same `watch` channel, so a reconciled
/// mutation is visible everywhere without manual cross-triggering.
pub struct NotificationMirror {
    state: Mutex<MirrorState>,
    changed: watch::Sender<MirrorSnapshot>,
    cache_path: Option<PathBuf>,
}

impl NotificationMirror {
    pub fn new() -> Self {
        Self::with_cache_path(None)
    }

    /// A mirror that persists each snapshot to `path` so the next session
    /// warm-starts before its first reload.
    pub fn with_cache_path(path: Option<PathBuf>) -> Self {
        let (changed, _) = watch::channel(MirrorSnapshot::default());
        Self {
            state: Mutex::new(MirrorState {
                notifications: Vec::new(),
                unread: 0,
                generation: 0,
            }),
            changed,
            cache_path: path,
        }
    }

    /// The single subscription surface: every mirror change is published
    /// here.
    pub fn subscribe(&self) -> watch::Receiver<MirrorSnapshot> {
        self.changed.subscribe()
    }

    pub fn snapshot(&self) -> MirrorSnapshot {
        let state = self.lock();
        MirrorSnapshot {
            notifications: state.notifications.clone(),
            unread: state.unread,
            generation: state.generation,
        }
    }

    pub fn unread(&self) -> u64 {
        self.lock().unread
    }

    /// Replaces the mirror wholesale with a server snapshot and recomputes
    /// `unread` from the full set.
    pub fn bulk_load(&self, notifications: Vec<Notification>) {
        let mut state = self.lock();
        state.notifications = notifications;
        if state.notifications.len() > MIRROR_CACHE_LIMIT {
            state.notifications.truncate(MIRROR_CACHE_LIMIT);
        }
        state.unread = count_unread(&state.notifications);
        state.generation += 1;
        self.publish(&state);
    }

    /// Prepends a freshly pushed event. An id already mirrored is moved to
    /// the head instead of inserted twice, so a push racing a reload cannot
    /// double-count.
    pub fn insert_pushed(&self, notification: Notification) {
        let mut state = self.lock();
        if let Some(pos) = state
            .notifications
            .iter()
            .position(|n| n.id == notification.id)
        {
            state.notifications.remove(pos);
            state.notifications.insert(0, notification);
            state.unread = count_unread(&state.notifications);
        } else {
            state.notifications.insert(0, notification);
            state.unread += 1;
            if state.notifications.len() > MIRROR_CACHE_LIMIT {
                state.notifications.truncate(MIRROR_CACHE_LIMIT);
                state.unread = count_unread(&state.notifications);
            }
        }
        state.generation += 1;
        self.publish(&state);
    }

    /// Drops all session state (logout).
    pub fn clear(&self) {
        let mut state = self.lock();
        state.notifications.clear();
        state.unread = 0;
        state.generation += 1;
        self.publish(&state);
    }

    fn publish(&self, state: &MirrorState) {
        let snapshot = MirrorSnapshot {
            notifications: state.notifications.clone(),
            unread: state.unread,
            generation: state.generation,
        };

        if let Some(path) = self.cache_path.clone() {
            let entries = snapshot.notifications.clone();
            thread::spawn(move || {
                if let Err(error) = persist_cache(&path, &entries) {
                    tracing::debug!(%error, "failed to persist mirror cache");
                }
            });
        }

        self.changed.send_replace(snapshot);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MirrorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for NotificationMirror {
    fn default() -> Self {
        Self::new()
    }
}

fn count_unread(notifications: &[Notification]) -> u64 {
    notifications.iter().filter(|n| !n.read).count() as u64
}

pub(crate) fn persist_cache(path: &PathBuf, notifications: &[Notification]) -> SyncResult<()> {
    let content = serde_json::to_string(notifications).map_err(|error| {
        SyncError::Config(format!("failed to serialize mirror cache: {error}"))
    })?;
    write_file_atomic(path, content.as_bytes())
}

/// Reads the persisted mirror cache. A file that fails to parse is moved
/// aside and an empty mirror is returned; the server snapshot that follows
/// is authoritative anyway.
pub(crate) fn load_cache(path: &PathBuf) -> SyncResult<Vec<Notification>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)
        .map_err(|error| SyncError::Config(format!("failed to read mirror cache: {error}")))?;
    match serde_json::from_str::<Vec<Notification>>(&content) {
        Ok(notifications) => Ok(notifications),
        Err(error) => {
            tracing::debug!(%error, "mirror cache parse failed, starting fresh");
            quarantine_corrupt_file(path);
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn notification(id: &str, read: bool) -> Notification {
        Notification {
            id: id.to_string(),
            title: format!("title {id}"),
            body: "body".to_string(),
            read,
            created_at: Utc::now() - Duration::minutes(1),
            sender_id: None,
            task_id: None,
            project_id: None,
            play_sound: false,
            send_push: false,
        }
    }

    #[test]
    fn bulk_load_recomputes_unread_from_full_set() {
        let mirror = NotificationMirror::new();
        mirror.bulk_load(vec![
            notification("a", false),
            notification("b", true),
            notification("c", false),
        ]);

        let snapshot = mirror.snapshot();
        assert_eq!(snapshot.unread, 2);
        assert_eq!(
            snapshot.unread,
            snapshot.notifications.iter().filter(|n| !n.read).count() as u64
        );
    }

    #[test]
    fn pushed_event_becomes_head_and_increments_unread() {
        let mirror = NotificationMirror::new();
        mirror.bulk_load(vec![notification("a", true)]);

        mirror.insert_pushed(notification("fresh", false));

        let snapshot = mirror.snapshot();
        assert_eq!(snapshot.notifications[0].id, "fresh");
        assert_eq!(snapshot.unread, 1);
    }

    #[test]
    fn pushed_duplicate_moves_to_head_without_double_count() {
        let mirror = NotificationMirror::new();
        mirror.bulk_load(vec![notification("a", false), notification("b", false)]);
        assert_eq!(mirror.unread(), 2);

        // Same id arrives over the stream after the reload already had it.
        mirror.insert_pushed(notification("b", false));

        let snapshot = mirror.snapshot();
        assert_eq!(snapshot.notifications.len(), 2);
        assert_eq!(snapshot.notifications[0].id, "b");
        assert_eq!(snapshot.unread, 2);
    }

    #[test]
    fn bulk_load_replaces_pushed_head() {
        let mirror = NotificationMirror::new();
        mirror.insert_pushed(notification("pushed", false));
        assert_eq!(mirror.snapshot().notifications[0].id, "pushed");

        mirror.bulk_load(vec![notification("server", true)]);

        let snapshot = mirror.snapshot();
        assert_eq!(snapshot.notifications.len(), 1);
        assert_eq!(snapshot.notifications[0].id, "server");
        assert_eq!(snapshot.unread, 0);
    }

    #[test]
    fn subscribers_observe_changes() {
        let mirror = NotificationMirror::new();
        let rx = mirror.subscribe();
        let before = rx.borrow().generation;

        mirror.insert_pushed(notification("a", false));

        assert!(rx.borrow().generation > before);
        assert_eq!(rx.borrow().unread, 1);
    }

    #[test]
    fn clear_empties_state() {
        let mirror = NotificationMirror::new();
        mirror.bulk_load(vec![notification("a", false)]);
        mirror.clear();
        let snapshot = mirror.snapshot();
        assert!(snapshot.notifications.is_empty());
        assert_eq!(snapshot.unread, 0);
    }

    #[test]
    fn cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notifications.json");

        let entries = vec![notification("a", false), notification("b", true)];
        persist_cache(&path, &entries).unwrap();

        let loaded = load_cache(&path).unwrap();
        assert_eq!(loaded, entries);
    }

    #[test]
    fn corrupt_cache_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notifications.json");
        fs::write(&path, "{not json").unwrap();

        let loaded = load_cache(&path).unwrap();
        assert!(loaded.is_empty());
        // Original file was moved aside.
        assert!(!path.exists());
    }
}
