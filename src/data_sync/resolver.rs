use crate::data_sync::poller::PollerManager;
use crate::error::SyncError;
use crate::model::{BucketAddress, CollectionId, CollectionWrapper};
use crate::remote::BucketLookup;
use crate::utils::constants::WITNESS;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Lookups issued in this pass
    pub requested: usize,
    /// Collections mapped for the first time
    pub resolved: Vec<CollectionId>,
    /// Collections whose bucket is not provisioned yet
    pub unresolved: usize,
    pub failed: usize,
}

/// Memoized collection → bucket mapping.
///
/// Mappings are append-only: once a collection has a bucket it is never
/// looked up again for the lifetime of the resolver.
pub struct BucketResolver {
    lookup: Arc<dyn BucketLookup>,
    pollers: Arc<PollerManager>,
    mappings: DashMap<CollectionId, BucketAddress>,
    in_flight: DashSet<CollectionId>,
}

impl BucketResolver {
    pub fn new(lookup: Arc<dyn BucketLookup>, pollers: Arc<PollerManager>) -> Self {
        Self { lookup, pollers, mappings: DashMap::new(), in_flight: DashSet::new() }
    }

    /// Look up buckets for every collection not yet mapped, concurrently, and
    /// start a poller for each newly mapped one.
    pub async fn reconcile(&self, collections: &[CollectionWrapper]) -> ReconcileReport {
        // Claim each unmapped id so an overlapping pass does not query it twice.
        let pending: Vec<CollectionWrapper> = collections.iter().filter(|c| self.claim(&c.id)).cloned().collect();

        let mut report = ReconcileReport { requested: pending.len(), ..Default::default() };
        if pending.is_empty() {
            debug!("All {} collections already have a bucket", collections.len());
            return report;
        }
        info!("Looking up buckets for {} collections", pending.len());

        let lookups = pending.iter().map(|collection| async move {
            let result = self.lookup.root_bucket(&collection.id, WITNESS).await;
            (collection, result)
        });
        let results = join_all(lookups).await;

        for (collection, result) in results {
            match result {
                Ok(Some(bucket)) => {
                    if let Entry::Vacant(vacant) = self.mappings.entry(collection.id.clone()) {
                        vacant.insert(bucket.clone());
                        report.resolved.push(collection.id.clone());
                        self.pollers.start(Arc::clone(collection), bucket);
                    }
                }
                Ok(None) => {
                    debug!("No bucket provisioned yet for {}", collection.id);
                    report.unresolved += 1;
                }
                Err(reason) => {
                    let err = SyncError::BucketLookup { collection: collection.id.clone(), reason };
                    warn!("{}", err);
                    report.failed += 1;
                }
            }
            // Released only once the mapping is visible, so a concurrent pass
            // sees the id as either in flight or mapped.
            self.in_flight.remove(&collection.id);
        }

        info!(
            "Bucket reconciliation: {} resolved, {} unresolved, {} failed ({} mapped total)",
            report.resolved.len(),
            report.unresolved,
            report.failed,
            self.mappings.len()
        );
        report
    }

    fn claim(&self, collection: &CollectionId) -> bool {
        if self.mappings.contains_key(collection) || !self.in_flight.insert(collection.clone()) {
            return false;
        }
        // A pass that just finished may have mapped the id before releasing it.
        if self.mappings.contains_key(collection) {
            self.in_flight.remove(collection);
            return false;
        }
        true
    }

    pub fn bucket_for(&self, collection: &CollectionId) -> Option<BucketAddress> {
        self.mappings.get(collection).map(|b| b.clone())
    }

    pub fn is_mapped(&self, collection: &CollectionId) -> bool {
        self.mappings.contains_key(collection)
    }

    pub fn mapped_count(&self) -> usize {
        self.mappings.len()
    }

    pub fn mappings(&self) -> Vec<(CollectionId, BucketAddress)> {
        self.mappings.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_sync::aggregator::FeedAggregator;
    use crate::data_sync::filters::FilterSet;
    use crate::data_sync::poller::PollerState;
    use crate::model::Collection;
    use crate::remote::mock::{MockBucketLookup, MockTransactionSource};
    use std::time::Duration;

    fn setup(lookup: Arc<MockBucketLookup>) -> (BucketResolver, Arc<PollerManager>) {
        let pollers = Arc::new(PollerManager::new(
            Arc::new(MockTransactionSource::new()),
            Arc::new(FeedAggregator::new(100)),
            Arc::new(FilterSet::new()),
            Duration::from_secs(5),
        ));
        (BucketResolver::new(lookup, pollers.clone()), pollers)
    }

    fn collections(ids: &[&str]) -> Vec<CollectionWrapper> {
        ids.iter().map(|id| Arc::new(Collection::new(*id, id.to_uppercase()))).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_resolvable_collection_gets_poller() {
        let lookup = Arc::new(MockBucketLookup::new());
        lookup.provision("a", "bucket-a");
        let (resolver, pollers) = setup(lookup.clone());

        let report = resolver.reconcile(&collections(&["a", "b"])).await;

        assert_eq!(report.requested, 2);
        assert_eq!(report.resolved, vec![CollectionId::new("a")]);
        assert_eq!(report.unresolved, 1);
        assert_eq!(resolver.bucket_for(&"a".into()), Some("bucket-a".into()));
        assert!(!resolver.is_mapped(&"b".into()));
        assert_eq!(pollers.running(), vec![CollectionId::new("a")]);
        assert_eq!(pollers.state(&"b".into()), PollerState::Idle);
        pollers.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_mapped_collections_are_never_looked_up_again() {
        let lookup = Arc::new(MockBucketLookup::new());
        lookup.provision("a", "bucket-a");
        let (resolver, pollers) = setup(lookup.clone());
        let known = collections(&["a", "b"]);

        resolver.reconcile(&known).await;
        resolver.reconcile(&known).await;
        let report = resolver.reconcile(&known).await;

        assert_eq!(lookup.calls_for(&"a".into()), 1);
        assert_eq!(lookup.calls_for(&"b".into()), 3);
        assert_eq!(report.requested, 1);
        assert!(report.resolved.is_empty());
        pollers.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_provisioning_is_picked_up() {
        let lookup = Arc::new(MockBucketLookup::new());
        let (resolver, pollers) = setup(lookup.clone());
        let known = collections(&["b"]);

        assert!(resolver.reconcile(&known).await.resolved.is_empty());
        lookup.provision("b", "bucket-b");
        assert_eq!(resolver.reconcile(&known).await.resolved, vec![CollectionId::new("b")]);
        assert_eq!(pollers.state(&"b".into()), PollerState::Running);
        pollers.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_lookup_is_retried_next_pass() {
        let lookup = Arc::new(MockBucketLookup::new());
        lookup.provision("a", "bucket-a");
        lookup.set_failing("a", true);
        let (resolver, pollers) = setup(lookup.clone());
        let known = collections(&["a"]);

        let report = resolver.reconcile(&known).await;
        assert_eq!(report.failed, 1);
        assert!(!resolver.is_mapped(&"a".into()));

        lookup.set_failing("a", false);
        let report = resolver.reconcile(&known).await;
        assert_eq!(report.resolved.len(), 1);
        assert_eq!(lookup.calls_for(&"a".into()), 2);
        pollers.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_passes_share_lookups() {
        let lookup = Arc::new(MockBucketLookup::new().with_latency(Duration::from_millis(200)));
        lookup.provision("a", "bucket-a");
        lookup.provision("b", "bucket-b");
        let (resolver, pollers) = setup(lookup.clone());
        let known = collections(&["a", "b"]);

        let (first, second) = tokio::join!(resolver.reconcile(&known), resolver.reconcile(&known));

        assert_eq!(first.requested + second.requested, 2);
        assert_eq!(lookup.total_calls(), 2);
        assert_eq!(resolver.mapped_count(), 2);
        assert_eq!(pollers.running_count(), 2);
        pollers.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_passes_look_up_each_id_once() {
        let lookup = Arc::new(MockBucketLookup::new());
        let ids: Vec<String> = (0..64).map(|i| format!("col-{i}")).collect();
        for id in &ids {
            lookup.provision(id.as_str(), format!("bucket-{id}").as_str());
        }
        let (resolver, pollers) = setup(lookup.clone());
        let resolver = Arc::new(resolver);
        let known: Vec<CollectionWrapper> =
            ids.iter().map(|id| Arc::new(Collection::new(id.as_str(), id.as_str()))).collect();

        let mut handles = vec![];
        for _ in 0..8 {
            let resolver = Arc::clone(&resolver);
            let known = known.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..20 {
                    resolver.reconcile(&known).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for id in &ids {
            assert_eq!(lookup.calls_for(&id.as_str().into()), 1, "{id} looked up more than once");
        }
        assert_eq!(resolver.mapped_count(), 64);
        pollers.shutdown().await;
    }
}
