//! End-to-end mirror/reconciliation scenarios over a fake backend: no
//! network, no audio device.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use teamline_notify::{
    alerts::{AlertDispatcher, PushBackend, SoundBackend},
    api::{NotificationApi, NotificationPage},
    connection::ConnectionManager,
    mirror::NotificationMirror,
    reconcile::Reconciler,
    settings::{Frequency, Settings, SettingsStore},
    views::{FullList, RecentWindow},
    Notification, SyncResult,
};

fn notification(id: &str, read: bool, play_sound: bool, send_push: bool) -> Notification {
    Notification {
        id: id.to_string(),
        title: format!("title {id}"),
        body: "body".to_string(),
        read,
        created_at: Utc::now(),
        sender_id: None,
        task_id: Some("t1".to_string()),
        project_id: None,
        play_sound,
        send_push,
    }
}

/// In-memory stand-in for the Teamline backend: the notification set is
/// shared state that mutations update, so every reload observes the result
/// the way it would against the real server.
struct FakeBackend {
    state: Mutex<Vec<Notification>>,
}

impl FakeBackend {
    fn with(notifications: Vec<Notification>) -> Self {
        Self {
            state: Mutex::new(notifications),
        }
    }

    fn push_server_side(&self, notification: Notification) {
        self.state.lock().unwrap().insert(0, notification);
    }
}

#[async_trait]
impl NotificationApi for FakeBackend {
    async fn list(
        &self,
        limit: usize,
        _page: usize,
        read: Option<bool>,
    ) -> SyncResult<NotificationPage> {
        let state = self.state.lock().unwrap();
        let filtered: Vec<_> = state
            .iter()
            .filter(|n| read.map_or(true, |want| n.read == want))
            .take(limit)
            .cloned()
            .collect();
        let total = filtered.len() as u64;
        Ok(NotificationPage {
            notifications: filtered,
            total,
        })
    }

    async fn unread_count(&self) -> SyncResult<u64> {
        Ok(self.state.lock().unwrap().iter().filter(|n| !n.read).count() as u64)
    }

    async fn mark_read(&self, id: &str) -> SyncResult<()> {
        for n in self.state.lock().unwrap().iter_mut() {
            if n.id == id {
                n.read = true;
            }
        }
        Ok(())
    }

    async fn mark_all_read(&self) -> SyncResult<()> {
        for n in self.state.lock().unwrap().iter_mut() {
            n.read = true;
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> SyncResult<()> {
        self.state.lock().unwrap().retain(|n| n.id != id);
        Ok(())
    }

    async fn fetch_settings(&self) -> SyncResult<Settings> {
        Ok(Settings::default())
    }

    async fn update_settings(&self, _settings: &Settings) -> SyncResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSound {
    played: Mutex<u32>,
}

/// Newtype so the crate's `SoundBackend` trait can be implemented against a
/// shared `Arc<RecordingSound>` handle from this separate test crate without
/// tripping the orphan rule.
struct SoundRef(Arc<RecordingSound>);

impl SoundBackend for SoundRef {
    fn play_two_tone(&self) -> Result<(), String> {
        *self.0.played.lock().unwrap() += 1;
        Ok(())
    }

    fn play_fallback_sample(&self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingPush {
    sent: Mutex<Vec<String>>,
}

/// Newtype wrapper around a shared `Arc<RecordingPush>`, mirroring `SoundRef`.
struct PushRef(Arc<RecordingPush>);

impl PushBackend for PushRef {
    fn probe(&self) -> bool {
        true
    }

    fn send(&self, notification: &Notification) -> Result<(), String> {
        self.0.sent.lock().unwrap().push(notification.id.clone());
        Ok(())
    }
}

/// Sound-only settings, a pushed event flagged `playSound`.
/// The mirror head is the event, unread rises by one, the tone fires, and
/// no OS push goes out.
#[tokio::test]
async fn pushed_event_updates_mirror_and_fires_sound_only() {
    let settings = Arc::new(SettingsStore::with_settings(Settings {
        sound_alerts: true,
        push_notifications: false,
        frequency: Frequency::All,
    }));
    let mirror = Arc::new(NotificationMirror::new());
    mirror.bulk_load(vec![notification("old", true, false, false)]);
    let unread_before = mirror.unread();

    let sound = Arc::new(RecordingSound::default());
    let push = Arc::new(RecordingPush::default());
    let alerts = Arc::new(AlertDispatcher::new(
        settings.clone(),
        Box::new(SoundRef(sound.clone())),
        Box::new(PushRef(push.clone())),
    ));
    alerts.request_permission().ok();

    // The same inbound wiring the agent registers on the connection.
    let event = notification("n1", false, true, false);
    if settings.admits(&event) {
        mirror.insert_pushed(event.clone());
        alerts.dispatch(&event);
    }

    let snapshot = mirror.snapshot();
    assert_eq!(snapshot.notifications[0].id, "n1");
    assert_eq!(snapshot.unread, unread_before + 1);
    assert_eq!(*sound.played.lock().unwrap(), 1);
    assert!(push.sent.lock().unwrap().is_empty());
}

/// With frequency `never` the event is dropped before the mirror and the
/// dispatcher.
#[tokio::test]
async fn never_frequency_drops_event_entirely() {
    let settings = Arc::new(SettingsStore::with_settings(Settings {
        frequency: Frequency::Never,
        ..Settings::default()
    }));
    let mirror = Arc::new(NotificationMirror::new());
    let sound = Arc::new(RecordingSound::default());
    let push = Arc::new(RecordingPush::default());
    let alerts = Arc::new(AlertDispatcher::new(
        settings.clone(),
        Box::new(SoundRef(sound.clone())),
        Box::new(PushRef(push.clone())),
    ));

    let event = notification("n1", false, true, true);
    if settings.admits(&event) {
        mirror.insert_pushed(event.clone());
        alerts.dispatch(&event);
    }

    assert!(mirror.snapshot().notifications.is_empty());
    assert_eq!(mirror.unread(), 0);
    assert_eq!(*sound.played.lock().unwrap(), 0);
    assert!(push.sent.lock().unwrap().is_empty());
}

/// A mutation performed through the full list is visible to the recent
/// window through the shared subscription surface, with the unread count
/// recomputed by the server rather than decremented locally.
#[tokio::test]
async fn full_list_mutation_is_visible_to_recent_window() {
    let api = Arc::new(FakeBackend::with(vec![
        notification("n1", false, false, false),
        notification("n2", false, false, false),
        notification("n3", true, false, false),
    ]));
    let mirror = Arc::new(NotificationMirror::new());
    let reconciler = Arc::new(Reconciler::new(api.clone(), mirror.clone()));
    let recent = RecentWindow::new(mirror.clone());
    let full_list = FullList::new(api.clone(), reconciler.clone());

    reconciler.reload().await.unwrap();
    assert_eq!(recent.unread_badge(), 2);

    let mut updates = recent.subscribe();
    updates.mark_unchanged();

    full_list.mark_read("n1").await.unwrap();

    assert!(updates.has_changed().unwrap());
    assert_eq!(recent.unread_badge(), 1);
    assert_eq!(full_list.unread_total().await.unwrap(), 1);
}

/// Two rapid "mark all read" clicks: the second round trip simply confirms
/// the already-zero unread state.
#[tokio::test]
async fn mark_all_read_is_idempotent_end_to_end() {
    let api = Arc::new(FakeBackend::with(vec![
        notification("n1", false, false, false),
        notification("n2", false, false, false),
    ]));
    let mirror = Arc::new(NotificationMirror::new());
    let reconciler = Arc::new(Reconciler::new(api.clone(), mirror.clone()));
    let full_list = FullList::new(api.clone(), reconciler.clone());

    reconciler.reload().await.unwrap();

    full_list.mark_all_read().await.unwrap();
    assert_eq!(mirror.unread(), 0);

    full_list.mark_all_read().await.unwrap();
    assert_eq!(mirror.unread(), 0);
}

/// When the websocket is unreachable the manager falls back to the polling
/// transport, which delivers newly appearing server-side notifications
/// through the same inbound path.
#[tokio::test(flavor = "multi_thread")]
async fn polling_fallback_delivers_new_notifications() {
    let api = Arc::new(FakeBackend::with(vec![notification(
        "baseline", true, false, false,
    )]));
    let settings = Arc::new(SettingsStore::with_settings(Settings::default()));

    // Nothing listens here, so the websocket handshake fails immediately.
    let manager = Arc::new(ConnectionManager::new(
        "http://127.0.0.1:9",
        "token",
        api.clone(),
        settings,
    ));

    let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    manager.set_event_handler(Arc::new(move |n| {
        sink.lock().unwrap().push(n.id);
    }));

    manager.connect().unwrap();

    // Give the fallback time to take its baseline, then publish an event.
    tokio::time::sleep(Duration::from_millis(500)).await;
    api.push_server_side(notification("fresh", false, false, false));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        if received.lock().unwrap().contains(&"fresh".to_string()) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "polling transport never delivered the event"
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    // The baseline entry was history, not a live event.
    assert!(!received.lock().unwrap().contains(&"baseline".to_string()));
    manager.shutdown();
}
