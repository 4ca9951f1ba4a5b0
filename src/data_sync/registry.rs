use crate::data_sync::resolver::{BucketResolver, ReconcileReport};
use crate::error::SyncError;
use crate::model::{Collection, CollectionId, CollectionWrapper, sort_by_name};
use crate::remote::DirectoryClient;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Last fetch is within the refresh interval.
    Skipped { since_last: Duration },
    Refreshed { collections: usize, reconcile: ReconcileReport },
}

#[derive(Debug)]
struct RegistryState {
    collections: Vec<CollectionWrapper>,
    /// Wall-clock time of the last fetch, persisted across restarts.
    last_fetch: SystemTime,
    /// Monotonic time of the last fetch; drives the throttle.
    fetched_at: Option<Instant>,
}

/// Throttled local copy of the collection directory.
pub struct RegistryCache {
    directory: Arc<dyn DirectoryClient>,
    resolver: Arc<BucketResolver>,
    interval: Duration,
    state: RwLock<RegistryState>,
}

impl RegistryCache {
    pub fn new(directory: Arc<dyn DirectoryClient>, resolver: Arc<BucketResolver>, interval: Duration) -> Self {
        Self {
            directory,
            resolver,
            interval,
            state: RwLock::new(RegistryState { collections: Vec::new(), last_fetch: UNIX_EPOCH, fetched_at: None }),
        }
    }

    /// Refresh from the directory unless the last fetch is recent enough.
    /// A successful fetch always triggers bucket reconciliation.
    pub async fn refresh(&self, force: bool) -> Result<RefreshOutcome, SyncError> {
        let fetched_at = self.state.read().await.fetched_at;
        if let Some(since_last) = fetched_at.map(|at| at.elapsed()) {
            info!("Last directory update {}s ago", since_last.as_secs());
            if !force && since_last < self.interval {
                debug!("Skipping directory sync, last fetch is within the refresh interval");
                return Ok(RefreshOutcome::Skipped { since_last });
            }
        }

        let fetched = self.directory.list_collections().await.map_err(SyncError::Directory)?;
        let mut collections: Vec<CollectionWrapper> = fetched.into_iter().map(Arc::new).collect();
        sort_by_name(&mut collections);
        let count = collections.len();

        {
            let mut state = self.state.write().await;
            state.collections = collections.clone();
            state.last_fetch = SystemTime::now();
            state.fetched_at = Some(Instant::now());
        }
        info!("Directory refreshed with {} collections", count);

        let reconcile = self.resolver.reconcile(&collections).await;
        Ok(RefreshOutcome::Refreshed { collections: count, reconcile })
    }

    /// Seed the cache from persisted state without contacting the directory.
    /// A `last_fetch` within the interval keeps throttling the next refresh.
    pub async fn restore(&self, last_fetch: SystemTime, collections: Vec<Collection>) {
        let mut collections: Vec<CollectionWrapper> = collections.into_iter().map(Arc::new).collect();
        sort_by_name(&mut collections);

        let age = SystemTime::now().duration_since(last_fetch).unwrap_or_default();
        let fetched_at = if age < self.interval { Instant::now().checked_sub(age) } else { None };

        let mut state = self.state.write().await;
        state.collections = collections;
        state.last_fetch = last_fetch;
        state.fetched_at = fetched_at;
    }

    pub async fn collections(&self) -> Vec<CollectionWrapper> {
        self.state.read().await.collections.clone()
    }

    pub async fn find(&self, id: &CollectionId) -> Option<CollectionWrapper> {
        self.state.read().await.collections.iter().find(|c| &c.id == id).cloned()
    }

    pub async fn last_fetch(&self) -> SystemTime {
        self.state.read().await.last_fetch
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_sync::aggregator::FeedAggregator;
    use crate::data_sync::filters::FilterSet;
    use crate::data_sync::poller::PollerManager;
    use crate::remote::mock::{MockBucketLookup, MockDirectory, MockTransactionSource};

    struct Fixture {
        directory: Arc<MockDirectory>,
        lookup: Arc<MockBucketLookup>,
        pollers: Arc<PollerManager>,
        registry: RegistryCache,
    }

    fn fixture(collections: Vec<Collection>) -> Fixture {
        let directory = Arc::new(MockDirectory::new(collections));
        let lookup = Arc::new(MockBucketLookup::new());
        let pollers = Arc::new(PollerManager::new(
            Arc::new(MockTransactionSource::new()),
            Arc::new(FeedAggregator::new(100)),
            Arc::new(FilterSet::new()),
            Duration::from_secs(5),
        ));
        let resolver = Arc::new(BucketResolver::new(lookup.clone(), pollers.clone()));
        let registry = RegistryCache::new(directory.clone(), resolver, Duration::from_secs(600));
        Fixture { directory, lookup, pollers, registry }
    }

    fn names(collections: &[CollectionWrapper]) -> Vec<&str> {
        collections.iter().map(|c| c.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_refresh_sorts_by_name() {
        let fx = fixture(vec![Collection::new("z", "Zebras"), Collection::new("a", "Apes")]);

        let outcome = fx.registry.refresh(false).await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Refreshed { collections: 2, .. }));
        assert_eq!(names(&fx.registry.collections().await), vec!["Apes", "Zebras"]);
        assert!(fx.registry.find(&"z".into()).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_refresh_within_interval_is_noop() {
        let fx = fixture(vec![Collection::new("a", "Apes")]);

        fx.registry.refresh(false).await.unwrap();
        let last_fetch = fx.registry.last_fetch().await;
        fx.directory.set_collections(vec![Collection::new("b", "Bees")]).await;

        tokio::time::advance(Duration::from_secs(60)).await;
        let outcome = fx.registry.refresh(false).await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Skipped { .. }));
        assert_eq!(fx.registry.last_fetch().await, last_fetch);
        assert_eq!(names(&fx.registry.collections().await), vec!["Apes"]);
        assert_eq!(fx.directory.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_after_interval_or_forced() {
        let fx = fixture(vec![Collection::new("a", "Apes")]);
        fx.registry.refresh(false).await.unwrap();

        tokio::time::advance(Duration::from_secs(601)).await;
        let outcome = fx.registry.refresh(false).await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Refreshed { .. }));

        tokio::time::advance(Duration::from_secs(1)).await;
        fx.registry.refresh(true).await.unwrap();
        assert_eq!(fx.directory.calls(), 3);
    }

    #[tokio::test]
    async fn test_failed_refresh_does_not_advance_last_fetch() {
        let fx = fixture(vec![Collection::new("a", "Apes")]);
        fx.directory.set_failing(true);

        let result = fx.registry.refresh(true).await;
        assert!(matches!(result, Err(SyncError::Directory(_))));
        assert_eq!(fx.registry.last_fetch().await, UNIX_EPOCH);
        assert!(fx.registry.collections().await.is_empty());

        fx.directory.set_failing(false);
        assert!(fx.registry.refresh(false).await.is_ok());
        assert_eq!(fx.directory.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_refresh_reconciles() {
        let fx = fixture(vec![Collection::new("a", "Apes")]);

        fx.registry.refresh(true).await.unwrap();
        fx.registry.refresh(true).await.unwrap();
        assert_eq!(fx.lookup.calls_for(&"a".into()), 2);

        fx.lookup.provision("a", "bucket-a");
        match fx.registry.refresh(true).await.unwrap() {
            RefreshOutcome::Refreshed { reconcile, .. } => assert_eq!(reconcile.resolved.len(), 1),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(fx.pollers.running_count(), 1);
        fx.pollers.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_throttles_next_refresh() {
        let fx = fixture(vec![Collection::new("a", "Apes")]);
        fx.registry.restore(SystemTime::now(), vec![Collection::new("m", "Moles"), Collection::new("b", "Bees")]).await;

        assert_eq!(names(&fx.registry.collections().await), vec!["Bees", "Moles"]);
        tokio::time::advance(Duration::from_secs(5)).await;
        let outcome = fx.registry.refresh(false).await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Skipped { .. }));
        assert_eq!(fx.directory.calls(), 0);
    }

    #[tokio::test]
    async fn test_stale_restore_refreshes_immediately() {
        let fx = fixture(vec![Collection::new("a", "Apes")]);
        let stale = SystemTime::now() - Duration::from_secs(3_600);
        fx.registry.restore(stale, vec![Collection::new("b", "Bees")]).await;

        let outcome = fx.registry.refresh(false).await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Refreshed { collections: 1, .. }));
        assert_eq!(names(&fx.registry.collections().await), vec!["Apes"]);
    }
}
