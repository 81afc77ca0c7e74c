//! Client-resident notification synchronization core for the Teamline
//! project tracker.
//!
//! Maintains a persistent connection to the server's event stream, mirrors
//! the user's notification set locally with a derived unread counter,
//! reconciles every mutation against authoritative REST state by reloading,
//! and drives sound/OS-push alerts under the user's policy. Live delivery
//! is an enhancement: every transport, audio, and permission failure
//! degrades softly while on-demand fetches keep working.

pub mod agent;
pub mod alerts;
pub mod api;
pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod error;
pub mod mirror;
pub mod model;
pub mod reconcile;
pub mod settings;
pub mod views;

mod consts;
mod util;

pub use agent::SyncAgent;
pub use alerts::{AlertDispatcher, PushPermission};
pub use connection::{ConnectionManager, ConnectionState};
pub use error::{SyncError, SyncResult};
pub use mirror::{MirrorSnapshot, NotificationMirror};
pub use model::Notification;
pub use reconcile::Reconciler;
pub use settings::{Frequency, Settings, SettingsStore};
pub use views::{FullList, RecentWindow};
