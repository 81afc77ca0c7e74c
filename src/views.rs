use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use tokio::sync::watch;

use crate::{
    api::NotificationApi,
    consts::{DEFAULT_PAGE_LIMIT, RECENT_WINDOW_LIMIT},
    error::SyncResult,
    mirror::{MirrorSnapshot, NotificationMirror},
    model::Notification,
    reconcile::Reconciler,
};

/// Fixed-window "recent" view backing the header indicator. Purely derived
/// from the mirror's subscription surface, so it observes every reconciled
/// mutation without fetching on its own.
pub struct RecentWindow {
    mirror: Arc<NotificationMirror>,
}

impl RecentWindow {
    pub fn new(mirror: Arc<NotificationMirror>) -> Self {
        Self { mirror }
    }

    /// The most recent entries, capped to the window size, unfiltered.
    pub fn current(&self) -> Vec<Notification> {
        let snapshot = self.mirror.snapshot();
        snapshot
            .notifications
            .into_iter()
            .take(RECENT_WINDOW_LIMIT)
            .collect()
    }

    pub fn unread_badge(&self) -> u64 {
        self.mirror.unread()
    }

    pub fn subscribe(&self) -> watch::Receiver<MirrorSnapshot> {
        self.mirror.subscribe()
    }
}

/// One loaded page of the browsing screen.
#[derive(Debug, Clone, Default)]
pub struct FullListPage {
    pub notifications: Vec<Notification>,
    pub total: u64,
    pub page: usize,
    pub read_filter: Option<bool>,
}

/// Paginated, read/unread-filterable view backing the dedicated browsing
/// screen. Pages are fetched from the server; mutations go through the
/// reconciliation protocol, which makes them visible to every mirror
/// subscriber (the recent window included) without manual cross-triggering.
///
/// Page responses carry a generation token: a fetch that resolves after a
/// newer fetch began is discarded instead of writing into retired state.
pub struct FullList {
    api: Arc<dyn NotificationApi>,
    reconciler: Arc<Reconciler>,
    fetch_epoch: AtomicU64,
    current: Mutex<FullListPage>,
}

impl FullList {
    pub fn new(api: Arc<dyn NotificationApi>, reconciler: Arc<Reconciler>) -> Self {
        Self {
            api,
            reconciler,
            fetch_epoch: AtomicU64::new(0),
            current: Mutex::new(FullListPage::default()),
        }
    }

    pub async fn load_page(&self, page: usize, read_filter: Option<bool>) -> SyncResult<()> {
        let epoch = self.fetch_epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let result = self.api.list(DEFAULT_PAGE_LIMIT, page, read_filter).await?;

        if self.fetch_epoch.load(Ordering::SeqCst) != epoch {
            tracing::debug!(epoch, page, "discarding stale page response");
            return Ok(());
        }

        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = FullListPage {
            notifications: result.notifications,
            total: result.total,
            page,
            read_filter,
        };
        Ok(())
    }

    pub fn current(&self) -> FullListPage {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub async fn mark_read(&self, id: &str) -> SyncResult<()> {
        self.reconciler.mark_read(id).await?;
        self.refresh_current_page().await
    }

    pub async fn mark_all_read(&self) -> SyncResult<()> {
        self.reconciler.mark_all_read().await?;
        self.refresh_current_page().await
    }

    pub async fn delete(&self, id: &str) -> SyncResult<()> {
        self.reconciler.delete(id).await?;
        self.refresh_current_page().await
    }

    /// Server-side unread total, independent of the mirror window.
    pub async fn unread_total(&self) -> SyncResult<u64> {
        self.api.unread_count().await
    }

    pub fn subscribe(&self) -> watch::Receiver<MirrorSnapshot> {
        self.reconciler.mirror().subscribe()
    }

    async fn refresh_current_page(&self) -> SyncResult<()> {
        let (page, read_filter) = {
            let current = self.current.lock().unwrap_or_else(|e| e.into_inner());
            (current.page.max(1), current.read_filter)
        };
        self.load_page(page, read_filter).await
    }
}
