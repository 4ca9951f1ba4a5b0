use crate::model::FeedEntry;
use tokio::sync::RwLock;
use tracing::debug;

/// Bounded, newest-first feed shared by every poller.
///
/// `merge` is the only mutation and runs under the write lock, so concurrent
/// pollers never interleave their prepend-and-trim steps. Readers take a
/// snapshot and never see a partially trimmed list. Entries are not
/// deduplicated here; each poller's watermark keeps its own batches fresh.
#[derive(Debug)]
pub struct FeedAggregator {
    limit: usize,
    state: RwLock<FeedState>,
}

#[derive(Debug, Default)]
struct FeedState {
    entries: Vec<FeedEntry>,
    merged_total: u64,
    merge_calls: u64,
    dropped_total: u64,
}

impl FeedAggregator {
    pub fn new(limit: usize) -> Self {
        Self { limit, state: RwLock::new(FeedState::default()) }
    }

    /// Prepend a newest-first batch and trim the tail to the limit.
    /// Returns how many of the batch are still in the feed afterwards.
    pub async fn merge(&self, new_entries: Vec<FeedEntry>) -> usize {
        if new_entries.is_empty() {
            return 0;
        }
        let incoming = new_entries.len();

        let mut state = self.state.write().await;
        let before = state.entries.len();
        let mut merged = new_entries;
        merged.extend(std::mem::take(&mut state.entries));
        merged.truncate(self.limit);
        state.entries = merged;

        let dropped = (before + incoming - state.entries.len()) as u64;
        state.merged_total += incoming as u64;
        state.merge_calls += 1;
        state.dropped_total += dropped;
        debug!("Merged {} entries into feed ({} held, {} dropped)", incoming, state.entries.len(), dropped);

        incoming.min(self.limit)
    }

    pub async fn snapshot(&self) -> Vec<FeedEntry> {
        self.state.read().await.entries.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub async fn get_stats(&self) -> FeedStats {
        let state = self.state.read().await;
        FeedStats {
            entries: state.entries.len(),
            limit: self.limit,
            merged_total: state.merged_total,
            merge_calls: state.merge_calls,
            dropped_total: state.dropped_total,
        }
    }
}

/// Statistics about the feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedStats {
    pub entries: usize,
    pub limit: usize,
    pub merged_total: u64,
    pub merge_calls: u64,
    pub dropped_total: u64,
}
