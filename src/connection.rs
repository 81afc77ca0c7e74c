use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
};

use crate::{
    api::{NotificationApi, AUTH_HEADER},
    config::build_stream_ws_url,
    consts::{
        MAX_RECONNECT_ATTEMPTS, POLL_INTERVAL_SECS, RECENT_WINDOW_LIMIT, RECONNECT_DELAY_MS,
        STREAM_CONNECT_TIMEOUT_SECS,
    },
    error::{SyncError, SyncResult},
    model::{parse_stream_event, Notification},
    settings::SettingsStore,
    util::{redact_ws_url, unix_now_secs},
};

/// Inbound handler for admitted "notification" events. Registration
/// replaces any previous handler; handlers never accumulate.
pub type EventHandler = Arc<dyn Fn(Notification) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The reconnect budget is exhausted; only an explicit `reconnect`
    /// leaves this state.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Failed => "Failed",
        }
    }
}

struct Runtime {
    stop_tx: Option<watch::Sender<bool>>,
    /// Incremented every time a new stream task is spawned. The task
    /// captures its epoch at spawn time and only writes cleanup state if it
    /// still matches, so a late-exiting old task cannot clobber a freshly
    /// started replacement.
    stream_epoch: u64,
    state: ConnectionState,
    should_run: bool,
    last_connected_at: Option<u64>,
    last_event_at: Option<u64>,
    last_error: Option<String>,
    reconnect_attempts: u32,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            stop_tx: None,
            stream_epoch: 0,
            state: ConnectionState::Disconnected,
            should_run: false,
            last_connected_at: None,
            last_event_at: None,
            last_error: None,
            reconnect_attempts: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RuntimeView {
    pub(crate) state: ConnectionState,
    pub(crate) should_run: bool,
    pub(crate) last_connected_at: Option<u64>,
    pub(crate) last_event_at: Option<u64>,
    pub(crate) last_error: Option<String>,
    pub(crate) reconnect_attempts: u32,
}

enum StreamFailure {
    /// The preferred transport could not even be established.
    Handshake(String),
    /// An established transport dropped.
    Dropped(String),
}

impl StreamFailure {
    fn reason(&self) -> &str {
        match self {
            StreamFailure::Handshake(reason) | StreamFailure::Dropped(reason) => reason,
        }
    }
}

/// Owns the single persistent transport to the server. Created at login,
/// shut down at logout; at most one stream task runs at a time.
///
/// Prefers the websocket stream and falls back to a polling transport when
/// the websocket handshake fails. On a drop it retries with a fixed
/// 1000 ms delay at most 5 consecutive times, then parks in `Failed` —
/// live delivery is an enhancement, never a correctness dependency, so
/// failures are logged and never surfaced.
pub struct ConnectionManager {
    base_url: String,
    token: String,
    api: Arc<dyn NotificationApi>,
    settings: Arc<SettingsStore>,
    runtime: Mutex<Runtime>,
    handler: Mutex<Option<EventHandler>>,
}

impl ConnectionManager {
    pub fn new(
        base_url: &str,
        token: &str,
        api: Arc<dyn NotificationApi>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
            api,
            settings,
            runtime: Mutex::new(Runtime::default()),
            handler: Mutex::new(None),
        }
    }

    /// Registers the inbound handler for "notification" events, replacing
    /// any previous registration. Accumulating handlers would dispatch
    /// duplicate alerts per event.
    pub fn set_event_handler(&self, handler: EventHandler) {
        *self.handler.lock().unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    pub fn state(&self) -> ConnectionState {
        self.lock_runtime().state
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.lock_runtime().reconnect_attempts
    }

    pub(crate) fn runtime_view(&self) -> RuntimeView {
        let runtime = self.lock_runtime();
        RuntimeView {
            state: runtime.state,
            should_run: runtime.should_run,
            last_connected_at: runtime.last_connected_at,
            last_event_at: runtime.last_event_at,
            last_error: runtime.last_error.clone(),
            reconnect_attempts: runtime.reconnect_attempts,
        }
    }

    /// Starts the stream task. A no-op while a task is already running.
    pub fn connect(self: &Arc<Self>) -> SyncResult<()> {
        // Fail fast on a config problem instead of inside the task.
        build_stream_ws_url(&self.base_url)?;
        if self.token.is_empty() {
            return Err(SyncError::Config("session token is required".to_string()));
        }

        let (stop_rx, task_epoch) = {
            let mut runtime = self.lock_runtime();
            if runtime.stop_tx.is_some() {
                return Ok(());
            }

            let (tx, rx) = watch::channel(false);
            runtime.stop_tx = Some(tx);
            runtime.stream_epoch = runtime.stream_epoch.wrapping_add(1);
            runtime.should_run = true;
            runtime.state = ConnectionState::Connecting;
            runtime.last_error = None;
            runtime.reconnect_attempts = 0;
            (rx, runtime.stream_epoch)
        };

        let manager = self.clone();
        tracing::debug!("spawning stream task");
        tokio::spawn(async move {
            manager.run_loop(stop_rx, task_epoch).await;
        });

        Ok(())
    }

    /// Stops the stream task and releases the transport.
    pub fn shutdown(&self) {
        let mut runtime = self.lock_runtime();
        if let Some(stop_tx) = runtime.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        runtime.should_run = false;
        runtime.state = ConnectionState::Disconnected;
    }

    /// Explicit operator-driven restart; the only way out of `Failed`.
    pub fn reconnect(self: &Arc<Self>) -> SyncResult<()> {
        self.shutdown();
        self.connect()
    }

    async fn run_loop(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>, task_epoch: u64) {
        tracing::debug!("stream task started");

        loop {
            if *stop_rx.borrow() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            let outcome = match self.websocket_once(&mut stop_rx).await {
                Err(StreamFailure::Handshake(reason)) if !*stop_rx.borrow() => {
                    tracing::warn!(%reason, "websocket unavailable, falling back to polling transport");
                    self.poll_once(&mut stop_rx).await
                }
                other => other,
            };

            match outcome {
                Ok(()) => break,
                Err(failure) => {
                    if *stop_rx.borrow() {
                        break;
                    }

                    let attempts = {
                        let mut runtime = self.lock_runtime();
                        runtime.last_error = Some(failure.reason().to_string());
                        runtime.reconnect_attempts
                    };

                    if attempts >= MAX_RECONNECT_ATTEMPTS {
                        tracing::warn!(
                            attempts,
                            reason = %failure.reason(),
                            "reconnect budget exhausted, stream stays down until an explicit reconnect"
                        );
                        self.set_state(ConnectionState::Failed);
                        break;
                    }

                    tracing::warn!(
                        attempt = attempts + 1,
                        reason = %failure.reason(),
                        "transport dropped, retrying after fixed delay"
                    );
                    self.lock_runtime().reconnect_attempts = attempts + 1;
                    self.set_state(ConnectionState::Disconnected);
                    tokio::time::sleep(Duration::from_millis(RECONNECT_DELAY_MS)).await;
                }
            }
        }

        let mut runtime = self.lock_runtime();
        if runtime.stream_epoch == task_epoch {
            runtime.stop_tx = None;
            runtime.should_run = false;
            if runtime.state != ConnectionState::Failed {
                runtime.state = ConnectionState::Disconnected;
            }
        }
    }

    async fn websocket_once(
        &self,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), StreamFailure> {
        let ws_url = build_stream_ws_url(&self.base_url)
            .map_err(|error| StreamFailure::Handshake(error.to_string()))?;
        tracing::debug!(url = %redact_ws_url(&ws_url), "connecting event stream");

        let mut request = ws_url.as_str().into_client_request().map_err(|error| {
            StreamFailure::Handshake(format!("failed to build websocket request: {error}"))
        })?;
        let token_header = HeaderValue::from_str(&self.token).map_err(|error| {
            StreamFailure::Handshake(format!("invalid token for websocket header: {error}"))
        })?;
        request.headers_mut().insert(AUTH_HEADER, token_header);

        let (mut ws_stream, _) = tokio::time::timeout(
            Duration::from_secs(STREAM_CONNECT_TIMEOUT_SECS),
            connect_async(request),
        )
        .await
        .map_err(|_| {
            StreamFailure::Handshake(format!(
                "stream connection timed out after {STREAM_CONNECT_TIMEOUT_SECS} seconds"
            ))
        })?
        .map_err(|error| StreamFailure::Handshake(format!("stream connection failed: {error}")))?;

        // Join message scopes subsequent events to this session's user.
        let join = serde_json::json!({ "type": "join", "token": self.token }).to_string();
        ws_stream.send(Message::text(join)).await.map_err(|error| {
            StreamFailure::Dropped(format!("failed to send join message: {error}"))
        })?;

        tracing::debug!("event stream connected");
        self.mark_connected();

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        let _ = ws_stream.close(None).await;
                        return Ok(());
                    }
                }
                incoming = ws_stream.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            self.mark_activity();
                            if let Some(event) = parse_stream_event(text.as_ref()) {
                                self.deliver(event);
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            self.mark_activity();
                            ws_stream.send(Message::Pong(payload)).await.map_err(|error| {
                                StreamFailure::Dropped(format!("failed to send pong: {error}"))
                            })?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            return Err(StreamFailure::Dropped("stream closed by server".to_string()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(error)) => {
                            return Err(StreamFailure::Dropped(format!("stream read error: {error}")));
                        }
                        None => {
                            return Err(StreamFailure::Dropped("stream ended unexpectedly".to_string()));
                        }
                    }
                }
            }
        }
    }

    /// Polling-style fallback transport: periodically fetches the recent
    /// window and feeds unseen entries through the same inbound path the
    /// websocket uses.
    async fn poll_once(&self, stop_rx: &mut watch::Receiver<bool>) -> Result<(), StreamFailure> {
        // Baseline fetch; everything present now is history, not a live event.
        let baseline = self
            .api
            .list(RECENT_WINDOW_LIMIT, 1, None)
            .await
            .map_err(|error| {
                StreamFailure::Dropped(format!("polling baseline fetch failed: {error}"))
            })?;
        let mut seen: HashSet<String> = baseline
            .notifications
            .iter()
            .map(|n| n.id.clone())
            .collect();

        tracing::debug!("polling transport established");
        self.mark_connected();

        let mut poll_interval =
            tokio::time::interval(Duration::from_secs(POLL_INTERVAL_SECS));
        poll_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        poll_interval.tick().await;

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        return Ok(());
                    }
                }
                _ = poll_interval.tick() => {
                    let page = self
                        .api
                        .list(RECENT_WINDOW_LIMIT, 1, None)
                        .await
                        .map_err(|error| {
                            StreamFailure::Dropped(format!("poll fetch failed: {error}"))
                        })?;
                    self.mark_activity();

                    // Oldest-first so delivery order matches emission order.
                    for notification in page.notifications.into_iter().rev() {
                        if seen.insert(notification.id.clone()) {
                            self.deliver(notification);
                        }
                    }
                }
            }
        }
    }

    /// Inbound path shared by both transports: admission gate first, then
    /// the registered handler.
    fn deliver(&self, notification: Notification) {
        if !self.settings.admits(&notification) {
            tracing::debug!(id = %notification.id, "event dropped by admission gate");
            return;
        }

        let handler = self
            .handler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match handler {
            Some(handler) => handler(notification),
            None => tracing::debug!("no event handler registered, dropping event"),
        }
    }

    fn mark_connected(&self) {
        let now = unix_now_secs();
        let mut runtime = self.lock_runtime();
        runtime.state = ConnectionState::Connected;
        runtime.last_connected_at = Some(now);
        runtime.last_event_at = Some(now);
        runtime.last_error = None;
        runtime.reconnect_attempts = 0;
    }

    fn mark_activity(&self) {
        self.lock_runtime().last_event_at = Some(unix_now_secs());
    }

    fn set_state(&self, state: ConnectionState) {
        self.lock_runtime().state = state;
    }

    fn lock_runtime(&self) -> std::sync::MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::NotificationPage,
        error::SyncResult,
        settings::{Frequency, Settings},
    };
    use async_trait::async_trait;
    use chrono::Utc;

    struct StubApi;

    #[async_trait]
    impl NotificationApi for StubApi {
        async fn list(
            &self,
            _limit: usize,
            _page: usize,
            _read: Option<bool>,
        ) -> SyncResult<NotificationPage> {
            Ok(NotificationPage {
                notifications: Vec::new(),
                total: 0,
            })
        }

        async fn unread_count(&self) -> SyncResult<u64> {
            Ok(0)
        }

        async fn mark_read(&self, _id: &str) -> SyncResult<()> {
            Ok(())
        }

        async fn mark_all_read(&self) -> SyncResult<()> {
            Ok(())
        }

        async fn delete(&self, _id: &str) -> SyncResult<()> {
            Ok(())
        }

        async fn fetch_settings(&self) -> SyncResult<Settings> {
            Ok(Settings::default())
        }

        async fn update_settings(&self, _settings: &Settings) -> SyncResult<()> {
            Ok(())
        }
    }

    fn manager_with(settings: Settings) -> ConnectionManager {
        ConnectionManager::new(
            "https://teamline.example",
            "token",
            Arc::new(StubApi),
            Arc::new(SettingsStore::with_settings(settings)),
        )
    }

    fn event(id: &str) -> Notification {
        Notification {
            id: id.to_string(),
            title: "t".to_string(),
            body: "b".to_string(),
            read: false,
            created_at: Utc::now(),
            sender_id: None,
            task_id: None,
            project_id: None,
            play_sound: false,
            send_push: false,
        }
    }

    #[test]
    fn handler_registration_replaces_previous() {
        let manager = manager_with(Settings::default());

        let first_calls = Arc::new(Mutex::new(0u32));
        let second_calls = Arc::new(Mutex::new(0u32));

        let counter = first_calls.clone();
        manager.set_event_handler(Arc::new(move |_| {
            *counter.lock().unwrap() += 1;
        }));
        let counter = second_calls.clone();
        manager.set_event_handler(Arc::new(move |_| {
            *counter.lock().unwrap() += 1;
        }));

        manager.deliver(event("n1"));

        // Only the latest registration fires; no duplicate dispatch.
        assert_eq!(*first_calls.lock().unwrap(), 0);
        assert_eq!(*second_calls.lock().unwrap(), 1);
    }

    #[test]
    fn admission_gate_drops_event_before_handler() {
        let manager = manager_with(Settings {
            frequency: Frequency::Never,
            ..Settings::default()
        });

        let calls = Arc::new(Mutex::new(0u32));
        let counter = calls.clone();
        manager.set_event_handler(Arc::new(move |_| {
            *counter.lock().unwrap() += 1;
        }));

        manager.deliver(event("n1"));

        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn connect_twice_keeps_single_stream_task() {
        let manager = Arc::new(manager_with(Settings::default()));
        manager.connect().unwrap();
        let epoch_after_first = manager.lock_runtime().stream_epoch;
        manager.connect().unwrap();
        assert_eq!(manager.lock_runtime().stream_epoch, epoch_after_first);
        manager.shutdown();
    }

    #[tokio::test]
    async fn reconnect_stops_after_budget_is_exhausted() {
        // Nothing listens on this port; both the websocket and the polling
        // fallback fail fast, so the manager walks through its fixed-delay
        // retry budget and parks in Failed.
        let api = crate::api::RestApi::new("http://127.0.0.1:9", "token").unwrap();
        let manager = Arc::new(ConnectionManager::new(
            "http://127.0.0.1:9",
            "token",
            Arc::new(api),
            Arc::new(SettingsStore::with_settings(Settings::default())),
        ));
        manager.connect().unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        loop {
            if manager.state() == ConnectionState::Failed {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "manager never reached Failed state"
            );
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        assert_eq!(manager.reconnect_attempts(), MAX_RECONNECT_ATTEMPTS);

        // No sixth attempt happens on its own.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert_eq!(manager.reconnect_attempts(), MAX_RECONNECT_ATTEMPTS);
    }
}
