use std::sync::Arc;

use crate::{
    alerts::AlertDispatcher,
    api::{NotificationApi, RestApi},
    config::{mirror_cache_file, normalize_base_url},
    connection::{ConnectionManager, EventHandler},
    diagnostics::{self, RuntimeDiagnostics},
    error::SyncResult,
    mirror::{load_cache, NotificationMirror},
    model::Notification,
    reconcile::Reconciler,
    settings::SettingsStore,
    views::{FullList, RecentWindow},
};

/// One authenticated session of the sync core, wired together: REST client,
/// settings store, mirror, reconciler, alert dispatcher, and the stream
/// connection. Created at login, torn down at logout.
pub struct SyncAgent {
    api: Arc<dyn NotificationApi>,
    pub settings: Arc<SettingsStore>,
    pub mirror: Arc<NotificationMirror>,
    pub reconciler: Arc<Reconciler>,
    pub connection: Arc<ConnectionManager>,
    pub alerts: Arc<AlertDispatcher>,
}

impl SyncAgent {
    /// Builds the session from a credential the (external) auth flow
    /// produced. Live delivery, settings, sound and push are all soft: a
    /// failure here degrades the session instead of aborting it. Only a
    /// broken configuration is fatal.
    pub async fn login(base_url: &str, token: &str) -> SyncResult<Self> {
        let base_url = normalize_base_url(base_url)?;
        let api: Arc<dyn NotificationApi> = Arc::new(RestApi::new(&base_url, token)?);

        let settings = Arc::new(SettingsStore::new());
        if let Err(error) = settings.load(api.as_ref()).await {
            tracing::warn!(%error, "failed to load alert settings, using defaults until refreshed");
        }

        let cache_path = mirror_cache_file().ok();
        let mirror = Arc::new(NotificationMirror::with_cache_path(cache_path.clone()));
        if let Some(path) = &cache_path {
            match load_cache(path) {
                Ok(cached) if !cached.is_empty() => {
                    tracing::debug!(entries = cached.len(), "warm-starting mirror from cache");
                    mirror.bulk_load(cached);
                }
                Ok(_) => {}
                Err(error) => tracing::debug!(%error, "mirror cache unavailable"),
            }
        }

        let reconciler = Arc::new(Reconciler::new(api.clone(), mirror.clone()));
        if let Err(error) = reconciler.reload().await {
            tracing::warn!(%error, "initial reload failed, mirror keeps warm-start state");
        }

        let alerts = Arc::new(AlertDispatcher::with_default_backends(settings.clone()));
        if let Err(error) = alerts.request_permission() {
            tracing::info!(%error, "OS push disabled for this session");
        }

        let connection = Arc::new(ConnectionManager::new(
            &base_url,
            token,
            api.clone(),
            settings.clone(),
        ));
        connection.set_event_handler(Self::event_handler(mirror.clone(), alerts.clone()));
        connection.connect()?;

        Ok(Self {
            api,
            settings,
            mirror,
            reconciler,
            connection,
            alerts,
        })
    }

    /// Inbound path for admitted push events: mirror first, then alerts on
    /// a dedicated thread so audio playback never stalls the stream task.
    fn event_handler(mirror: Arc<NotificationMirror>, alerts: Arc<AlertDispatcher>) -> EventHandler {
        Arc::new(move |notification: Notification| {
            mirror.insert_pushed(notification.clone());
            let alerts = alerts.clone();
            std::thread::spawn(move || alerts.dispatch(&notification));
        })
    }

    pub fn recent_window(&self) -> RecentWindow {
        RecentWindow::new(self.mirror.clone())
    }

    pub fn full_list(&self) -> FullList {
        FullList::new(self.api.clone(), self.reconciler.clone())
    }

    pub fn diagnostics(&self) -> RuntimeDiagnostics {
        diagnostics::snapshot(&self.connection, &self.mirror)
    }

    /// Ends the session: stream down, settings and mirror cleared.
    pub fn logout(&self) {
        self.connection.shutdown();
        self.settings.clear();
        self.mirror.clear();
    }
}
