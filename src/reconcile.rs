use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::{
    api::NotificationApi,
    consts::MIRROR_CACHE_LIMIT,
    error::SyncResult,
    mirror::NotificationMirror,
};

/// The write path. Every mutation issues the authoritative request and then
/// fully reloads the mirror from the server; the mirror is never patched in
/// place. A failed request leaves the mirror at its last reconciled state.
///
/// Reloads carry a generation token: a response that lands after a newer
/// reload began is discarded instead of clobbering fresher state.
pub struct Reconciler {
    api: Arc<dyn NotificationApi>,
    mirror: Arc<NotificationMirror>,
    reload_epoch: AtomicU64,
}

impl Reconciler {
    pub fn new(api: Arc<dyn NotificationApi>, mirror: Arc<NotificationMirror>) -> Self {
        Self {
            api,
            mirror,
            reload_epoch: AtomicU64::new(0),
        }
    }

    pub fn mirror(&self) -> &Arc<NotificationMirror> {
        &self.mirror
    }

    /// Replaces the mirror with the server's current snapshot. Stale
    /// responses (a newer reload started meanwhile) are dropped.
    pub async fn reload(&self) -> SyncResult<()> {
        let epoch = self.reload_epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let page = self.api.list(MIRROR_CACHE_LIMIT, 1, None).await?;

        if self.reload_epoch.load(Ordering::SeqCst) != epoch {
            tracing::debug!(epoch, "discarding stale reload response");
            return Ok(());
        }

        self.mirror.bulk_load(page.notifications);
        Ok(())
    }

    pub async fn mark_read(&self, id: &str) -> SyncResult<()> {
        self.api.mark_read(id).await?;
        self.reload().await
    }

    /// Idempotent: a second call simply confirms the already-zero unread
    /// state on the server.
    pub async fn mark_all_read(&self) -> SyncResult<()> {
        self.api.mark_all_read().await?;
        self.reload().await
    }

    pub async fn delete(&self, id: &str) -> SyncResult<()> {
        self.api.delete(id).await?;
        self.reload().await
    }
}
