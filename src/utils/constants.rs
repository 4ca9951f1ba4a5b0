use std::time::Duration;

/// Maximum number of entries held by the feed.
pub const FEED_LIMIT: usize = 100;

/// Minimum time between two unforced directory refreshes.
pub const REGISTRY_REFRESH_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Pause between two poll cycles of one bucket.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Remote queries never ask for a certified response.
pub const WITNESS: bool = false;
