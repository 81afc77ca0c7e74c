pub(crate) const MIRROR_CACHE_LIMIT: usize = 100;
pub(crate) const MAX_API_PAGE_LIMIT: usize = 200;
pub(crate) const RECENT_WINDOW_LIMIT: usize = 50;
pub(crate) const DEFAULT_PAGE_LIMIT: usize = 25;

pub(crate) const STREAM_CONNECT_TIMEOUT_SECS: u64 = 10;
pub(crate) const RECONNECT_DELAY_MS: u64 = 1000;
pub(crate) const MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub(crate) const POLL_INTERVAL_SECS: u64 = 5;

pub(crate) const REQUEST_TIMEOUT_SECS: u64 = 15;

pub(crate) const ALERT_BODY_MAX_CHARS: usize = 220;
pub(crate) const TONE_LOW_HZ: f32 = 800.0;
pub(crate) const TONE_HIGH_HZ: f32 = 1000.0;
pub(crate) const TONE_DURATION_MS: u64 = 150;
pub(crate) const TONE_SPACING_MS: u64 = 200;
