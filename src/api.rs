use std::time::Duration;

use async_trait::async_trait;

use crate::{
    consts::{MAX_API_PAGE_LIMIT, REQUEST_TIMEOUT_SECS},
    error::{SyncError, SyncResult},
    model::{Notification, NotificationListWire, UnreadCountWire},
    settings::Settings,
    util::truncate_message,
};

pub(crate) const AUTH_HEADER: &str = "X-Teamline-Token";

/// One page of the server-side notification list.
#[derive(Debug, Clone)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub total: u64,
}

/// The REST surface the sync core consumes. The backend owns paths and
/// status codes; the core only distinguishes success from `RequestError`.
/// Behind a trait so the reconciliation protocol and its tests share one
/// code path.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// `read = None` fetches unfiltered; pages are 1-based.
    async fn list(
        &self,
        limit: usize,
        page: usize,
        read: Option<bool>,
    ) -> SyncResult<NotificationPage>;

    async fn unread_count(&self) -> SyncResult<u64>;

    async fn mark_read(&self, id: &str) -> SyncResult<()>;

    async fn mark_all_read(&self) -> SyncResult<()>;

    async fn delete(&self, id: &str) -> SyncResult<()>;

    async fn fetch_settings(&self) -> SyncResult<Settings>;

    async fn update_settings(&self, settings: &Settings) -> SyncResult<()>;
}

/// reqwest-backed implementation against the Teamline backend.
pub struct RestApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl RestApi {
    pub fn new(base_url: &str, token: &str) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|error| {
                SyncError::request(None, format!("failed to build HTTP client: {error}"))
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> SyncResult<reqwest::Response> {
        let response = request
            .header(AUTH_HEADER, &self.token)
            .send()
            .await
            .map_err(|error| SyncError::request(None, format!("request failed: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unable to read response body>".to_string());
            return Err(SyncError::request(
                Some(status.as_u16()),
                format!("HTTP {}: {}", status.as_u16(), truncate_message(&body, 200)),
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl NotificationApi for RestApi {
    async fn list(
        &self,
        limit: usize,
        page: usize,
        read: Option<bool>,
    ) -> SyncResult<NotificationPage> {
        let limit = limit.min(MAX_API_PAGE_LIMIT);
        let mut endpoint = format!(
            "{}/api/notifications?limit={limit}&page={}",
            self.base_url,
            page.max(1)
        );
        if let Some(read) = read {
            endpoint.push_str(&format!("&read={read}"));
        }

        let response = self.send(self.client.get(endpoint)).await?;
        let wire = response
            .json::<NotificationListWire>()
            .await
            .map_err(|error| {
                SyncError::request(None, format!("failed to decode notification list: {error}"))
            })?;

        let mut notifications = Vec::with_capacity(wire.notifications.len());
        for item in wire.notifications {
            match item.into_notification() {
                Ok(notification) => notifications.push(notification),
                Err(reason) => {
                    tracing::warn!(%reason, "dropping malformed notification from list response");
                }
            }
        }

        Ok(NotificationPage {
            notifications,
            total: wire.total,
        })
    }

    async fn unread_count(&self) -> SyncResult<u64> {
        let endpoint = format!("{}/api/notifications/unread-count", self.base_url);
        let response = self.send(self.client.get(endpoint)).await?;
        let wire = response.json::<UnreadCountWire>().await.map_err(|error| {
            SyncError::request(None, format!("failed to decode unread count: {error}"))
        })?;
        Ok(wire.unread)
    }

    async fn mark_read(&self, id: &str) -> SyncResult<()> {
        let endpoint = format!("{}/api/notifications/{id}/read", self.base_url);
        self.send(self.client.post(endpoint)).await?;
        Ok(())
    }

    async fn mark_all_read(&self) -> SyncResult<()> {
        let endpoint = format!("{}/api/notifications/read-all", self.base_url);
        self.send(self.client.post(endpoint)).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> SyncResult<()> {
        let endpoint = format!("{}/api/notifications/{id}", self.base_url);
        self.send(self.client.delete(endpoint)).await?;
        Ok(())
    }

    async fn fetch_settings(&self) -> SyncResult<Settings> {
        let endpoint = format!("{}/api/settings/notifications", self.base_url);
        let response = self.send(self.client.get(endpoint)).await?;
        response.json::<Settings>().await.map_err(|error| {
            SyncError::request(None, format!("failed to decode settings: {error}"))
        })
    }

    async fn update_settings(&self, settings: &Settings) -> SyncResult<()> {
        let endpoint = format!("{}/api/settings/notifications", self.base_url);
        self.send(self.client.put(endpoint).json(settings)).await?;
        Ok(())
    }
}
