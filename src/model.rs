use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::util::truncate_message;

/// A notification as held by the mirror and shown to consumers. Only ever
/// constructed from a validated wire payload or the local cache file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub body: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    /// Server-set delivery intent: play a sound for this event.
    #[serde(default)]
    pub play_sound: bool,
    /// Server-set delivery intent: raise an OS-level push for this event.
    #[serde(default)]
    pub send_push: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NotificationWire {
    #[serde(default)]
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) body: String,
    #[serde(default)]
    pub(crate) read: bool,
    pub(crate) created_at: DateTime<Utc>,
    #[serde(default)]
    pub(crate) sender_id: Option<String>,
    #[serde(default)]
    pub(crate) task_id: Option<String>,
    #[serde(default)]
    pub(crate) project_id: Option<String>,
    #[serde(default)]
    pub(crate) play_sound: Option<bool>,
    #[serde(default)]
    pub(crate) send_push: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NotificationListWire {
    #[serde(default)]
    pub(crate) notifications: Vec<NotificationWire>,
    #[serde(default)]
    pub(crate) total: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UnreadCountWire {
    #[serde(default)]
    pub(crate) unread: u64,
}

/// One frame on the event stream. Frames with an unknown `type` are ignored;
/// frames whose payload fails validation are dropped at this boundary.
#[derive(Debug, Deserialize)]
pub(crate) struct StreamEventWire {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    pub(crate) payload: serde_json::Value,
}

impl NotificationWire {
    /// Ingestion-boundary validation: a payload without an id is rejected
    /// rather than admitted as-is.
    pub(crate) fn into_notification(self) -> Result<Notification, String> {
        if self.id.trim().is_empty() {
            return Err("payload has no id".to_string());
        }
        Ok(Notification {
            id: self.id,
            title: self.title,
            body: self.body,
            read: self.read,
            created_at: self.created_at,
            sender_id: self.sender_id,
            task_id: self.task_id,
            project_id: self.project_id,
            play_sound: self.play_sound.unwrap_or(false),
            send_push: self.send_push.unwrap_or(false),
        })
    }
}

/// Parses one stream frame into a notification. Returns `None` for frames of
/// another event type and for malformed payloads, which are logged and
/// dropped here instead of reaching the mirror.
pub(crate) fn parse_stream_event(text: &str) -> Option<Notification> {
    let frame = match serde_json::from_str::<StreamEventWire>(text) {
        Ok(frame) => frame,
        Err(error) => {
            tracing::warn!(%error, payload = %truncate_message(text, 140), "stream frame decode failed");
            return None;
        }
    };

    if frame.kind != "notification" {
        tracing::debug!(kind = %frame.kind, "ignoring stream frame of unknown type");
        return None;
    }

    let wire = match serde_json::from_value::<NotificationWire>(frame.payload) {
        Ok(wire) => wire,
        Err(error) => {
            tracing::warn!(%error, "notification payload decode failed");
            return None;
        }
    };

    match wire.into_notification() {
        Ok(notification) => Some(notification),
        Err(reason) => {
            tracing::warn!(%reason, "rejected malformed notification payload");
            None
        }
    }
}
