use crate::data_sync::aggregator::FeedAggregator;
use crate::data_sync::filters::FilterSet;
use crate::error::SyncError;
use crate::model::{BucketAddress, CollectionId, CollectionWrapper, FeedEntry, Timestamp};
use crate::remote::TransactionSource;
use crate::utils::constants::WITNESS;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle of the poller for one bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum PollerState {
    Idle,
    Running,
    Stopped,
}

/// What a poller publishes to whoever started it. The poller is the only
/// writer; the manager only reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollerStatus {
    pub state: PollerState,
    pub watermark: Option<Timestamp>,
    pub cycles: u64,
    pub failures: u64,
}

impl PollerStatus {
    fn running() -> Self {
        Self { state: PollerState::Running, watermark: None, cycles: 0, failures: 0 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum StopReason {
    /// The filter set no longer includes the collection.
    Filtered,
    Shutdown,
}

/// Result of a single poll cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    pub fetched: usize,
    pub discarded_untimed: usize,
    pub accepted: usize,
    pub fetch_failed: bool,
}

/// Incremental reader of one bucket. Owns the collection's watermark.
pub struct Poller {
    collection: CollectionWrapper,
    bucket: BucketAddress,
    source: Arc<dyn TransactionSource>,
    feed: Arc<FeedAggregator>,
    filters: Arc<FilterSet>,
    interval: Duration,
    status: PollerStatus,
    status_tx: watch::Sender<PollerStatus>,
}

impl Poller {
    pub fn new(
        collection: CollectionWrapper,
        bucket: BucketAddress,
        source: Arc<dyn TransactionSource>,
        feed: Arc<FeedAggregator>,
        filters: Arc<FilterSet>,
        interval: Duration,
    ) -> (Self, watch::Receiver<PollerStatus>) {
        let status = PollerStatus::running();
        let (status_tx, status_rx) = watch::channel(status);
        let poller = Self { collection, bucket, source, feed, filters, interval, status, status_tx };
        (poller, status_rx)
    }

    pub fn watermark(&self) -> Option<Timestamp> {
        self.status.watermark
    }

    /// Fetch one page, merge what is newer than the watermark and advance the
    /// watermark to the newest timestamp of the page.
    pub async fn poll_once(&mut self) -> CycleOutcome {
        self.status.cycles += 1;

        let page = match self.source.transactions(&self.bucket, WITNESS).await {
            Ok(page) => page,
            Err(reason) => {
                let err = SyncError::TransactionFetch { bucket: self.bucket.clone(), reason };
                warn!("{} ({}): {}", self.collection.name, self.collection.id, err);
                self.status.failures += 1;
                self.publish();
                return CycleOutcome { fetch_failed: true, ..Default::default() };
            }
        };

        let fetched = page.events.len();
        let transactions = page.into_transactions();
        let discarded_untimed = fetched - transactions.len();
        if discarded_untimed > 0 {
            debug!("{}: discarded {} events without timestamp", self.collection.id, discarded_untimed);
        }

        let watermark = self.status.watermark;
        let page_max = transactions.iter().map(|t| t.time).max();
        let mut fresh: Vec<FeedEntry> = transactions
            .into_iter()
            .filter(|t| watermark.is_none_or(|w| t.time > w))
            .map(|t| FeedEntry::new(t, Arc::clone(&self.collection)))
            .collect();
        fresh.sort_by(|a, b| b.time().cmp(&a.time()));

        let accepted = fresh.len();
        if accepted > 0 {
            info!("Captured {} new transactions for {}", accepted, self.collection.name);
            self.feed.merge(fresh).await;
        }

        self.status.watermark = match (watermark, page_max) {
            (Some(current), Some(newest)) => Some(current.max(newest)),
            (current, newest) => newest.or(current),
        };
        self.publish();

        CycleOutcome { fetched, discarded_untimed, accepted, fetch_failed: false }
    }

    /// Poll until the collection is filtered out or shutdown is signalled.
    /// Shutdown is only observed between cycles, never during a fetch.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> StopReason {
        debug!("Polling bucket {} for {}", self.bucket, self.collection.id);

        let reason = loop {
            if *shutdown.borrow() {
                break StopReason::Shutdown;
            }

            self.poll_once().await;

            if !self.filters.snapshot().await.includes(&self.collection.id) {
                self.status.watermark = None;
                break StopReason::Filtered;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => break StopReason::Shutdown,
            }
        };

        self.status.state = PollerState::Stopped;
        self.publish();
        info!("Stopped polling {} ({})", self.collection.name, reason);
        reason
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status);
    }
}

struct PollerHandle {
    status: watch::Receiver<PollerStatus>,
    task: Option<JoinHandle<StopReason>>,
}

impl PollerHandle {
    fn is_running(&self) -> bool {
        self.status.borrow().state == PollerState::Running
    }
}

/// Starts and tracks one poller per collection.
pub struct PollerManager {
    source: Arc<dyn TransactionSource>,
    feed: Arc<FeedAggregator>,
    filters: Arc<FilterSet>,
    interval: Duration,
    pollers: DashMap<CollectionId, PollerHandle>,
    shutdown_tx: watch::Sender<bool>,
}

impl PollerManager {
    pub fn new(
        source: Arc<dyn TransactionSource>,
        feed: Arc<FeedAggregator>,
        filters: Arc<FilterSet>,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self { source, feed, filters, interval, pollers: DashMap::new(), shutdown_tx }
    }

    /// Start polling `bucket` for `collection` unless a poller for the
    /// collection is already running. Returns whether a poller was spawned.
    ///
    /// The running check and the registration of the new poller happen under
    /// the same map entry lock, so concurrent calls spawn at most one poller.
    pub fn start(&self, collection: CollectionWrapper, bucket: BucketAddress) -> bool {
        if *self.shutdown_tx.borrow() {
            warn!("Not starting poller for {}, manager is shut down", collection.id);
            return false;
        }

        match self.pollers.entry(collection.id.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_running() {
                    debug!("Already polling {}", collection.id);
                    return false;
                }
                info!("Restarting poller for {}", collection.name);
                occupied.insert(self.spawn(collection, bucket));
            }
            Entry::Vacant(vacant) => {
                info!("Starting poller for {} on bucket {}", collection.name, bucket);
                vacant.insert(self.spawn(collection, bucket));
            }
        }
        true
    }

    fn spawn(&self, collection: CollectionWrapper, bucket: BucketAddress) -> PollerHandle {
        let (poller, status) = Poller::new(
            collection,
            bucket,
            Arc::clone(&self.source),
            Arc::clone(&self.feed),
            Arc::clone(&self.filters),
            self.interval,
        );
        let task = tokio::spawn(poller.run(self.shutdown_tx.subscribe()));
        PollerHandle { status, task: Some(task) }
    }

    pub fn state(&self, collection: &CollectionId) -> PollerState {
        self.pollers.get(collection).map(|h| h.status.borrow().state).unwrap_or(PollerState::Idle)
    }

    pub fn status(&self, collection: &CollectionId) -> Option<PollerStatus> {
        self.pollers.get(collection).map(|h| *h.status.borrow())
    }

    /// Collections with a running poller.
    pub fn running(&self) -> Vec<CollectionId> {
        self.pollers.iter().filter(|h| h.is_running()).map(|h| h.key().clone()).collect()
    }

    pub fn running_count(&self) -> usize {
        self.pollers.iter().filter(|h| h.is_running()).count()
    }

    /// Signal every poller to stop after its current cycle and wait for them.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let tasks: Vec<_> = self.pollers.iter_mut().filter_map(|mut h| h.task.take()).collect();
        info!("Waiting for {} pollers to stop", tasks.len());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Poller task error during shutdown: {}", e);
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}
