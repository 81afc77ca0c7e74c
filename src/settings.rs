use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::{api::NotificationApi, error::SyncResult, model::Notification};

/// How often the user wants to be interrupted by incoming events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    #[default]
    All,
    /// Only events the server flagged for alerting are admitted.
    Important,
    /// Inbound events are dropped before the mirror and the dispatcher.
    Never,
}

/// Per-user alert policy, owned by the server and fetched once per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub sound_alerts: bool,
    pub push_notifications: bool,
    pub frequency: Frequency,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sound_alerts: true,
            push_notifications: true,
            frequency: Frequency::All,
        }
    }
}

/// Session-wide settings holder. Loaded after authentication, consulted by
/// the admission gate and the alert dispatcher, cleared on logout. Not
/// re-fetched reactively; `refresh` is the explicit path.
pub struct SettingsStore {
    inner: Mutex<Option<Settings>>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Fetches the policy once. Later calls return the session copy without
    /// touching the server.
    pub async fn load(&self, api: &dyn NotificationApi) -> SyncResult<Settings> {
        if let Some(settings) = self.current_loaded() {
            return Ok(settings);
        }
        self.refresh(api).await
    }

    /// Explicit re-fetch, replacing the session copy.
    pub async fn refresh(&self, api: &dyn NotificationApi) -> SyncResult<Settings> {
        let settings = api.fetch_settings().await?;
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = Some(settings.clone());
        Ok(settings)
    }

    pub async fn update(&self, api: &dyn NotificationApi, settings: Settings) -> SyncResult<()> {
        api.update_settings(&settings).await?;
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = Some(settings);
        Ok(())
    }

    /// The session policy, or defaults when nothing was loaded yet.
    pub fn current(&self) -> Settings {
        self.current_loaded().unwrap_or_default()
    }

    pub fn clear(&self) {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Admission gate for inbound push events. A dropped event never reaches
    /// the mirror or the alert dispatcher.
    pub fn admits(&self, event: &Notification) -> bool {
        match self.current().frequency {
            Frequency::All => true,
            Frequency::Important => event.play_sound || event.send_push,
            Frequency::Never => false,
        }
    }

    /// A store pre-seeded with a known policy, for embedders that already
    /// hold the user's settings.
    pub fn with_settings(settings: Settings) -> Self {
        Self {
            inner: Mutex::new(Some(settings)),
        }
    }

    fn current_loaded(&self) -> Option<Settings> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(play_sound: bool, send_push: bool) -> Notification {
        Notification {
            id: "n1".to_string(),
            title: "t".to_string(),
            body: "b".to_string(),
            read: false,
            created_at: Utc::now(),
            sender_id: None,
            task_id: None,
            project_id: None,
            play_sound,
            send_push,
        }
    }

    #[test]
    fn never_drops_everything() {
        let store = SettingsStore::with_settings(Settings {
            frequency: Frequency::Never,
            ..Settings::default()
        });
        assert!(!store.admits(&event(true, true)));
        assert!(!store.admits(&event(false, false)));
    }

    #[test]
    fn important_admits_flagged_events_only() {
        let store = SettingsStore::with_settings(Settings {
            frequency: Frequency::Important,
            ..Settings::default()
        });
        assert!(store.admits(&event(true, false)));
        assert!(store.admits(&event(false, true)));
        assert!(!store.admits(&event(false, false)));
    }

    #[test]
    fn all_admits_everything() {
        let store = SettingsStore::with_settings(Settings::default());
        assert!(store.admits(&event(false, false)));
    }

    #[test]
    fn unloaded_store_falls_back_to_defaults() {
        let store = SettingsStore::new();
        let settings = store.current();
        assert!(settings.sound_alerts);
        assert_eq!(settings.frequency, Frequency::All);
    }

    #[test]
    fn settings_wire_shape_is_camel_case() {
        let parsed: Settings = serde_json::from_str(
            r#"{"soundAlerts":false,"pushNotifications":true,"frequency":"important"}"#,
        )
        .unwrap();
        assert!(!parsed.sound_alerts);
        assert!(parsed.push_notifications);
        assert_eq!(parsed.frequency, Frequency::Important);
    }
}
