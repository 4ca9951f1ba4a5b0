use crate::data_sync::{
    aggregator::{FeedAggregator, FeedStats},
    config::SyncConfig,
    filters::FilterSet,
    poller::{PollerManager, PollerState, PollerStatus},
    registry::{RefreshOutcome, RegistryCache},
    resolver::BucketResolver,
};
use crate::error::SyncError;
use crate::model::{BucketAddress, CollectionId, CollectionWrapper, FeedEntry};
use crate::remote::{BucketLookup, DirectoryClient, TransactionSource};
use crate::utils::state_store::{JsonFileStore, PersistedState, StateStore, unix_millis};
use eyre::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, error, info, warn};

/// Collection activity feed service
///
/// Owns the registry cache, the bucket resolver, the poller manager, the feed
/// and the filter set, and wires them to the remote clients. Filters and the
/// directory snapshot are saved to the state store whenever they change.
pub struct FeedService {
    config: SyncConfig,
    registry: Arc<RegistryCache>,
    resolver: Arc<BucketResolver>,
    pollers: Arc<PollerManager>,
    feed: Arc<FeedAggregator>,
    filters: Arc<FilterSet>,
    store: Option<Arc<dyn StateStore>>,

    // Periodic directory refresh
    refresh_task: Option<JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl FeedService {
    /// Create a new feed service
    pub fn new(
        config: SyncConfig,
        directory: Arc<dyn DirectoryClient>,
        lookup: Arc<dyn BucketLookup>,
        source: Arc<dyn TransactionSource>,
    ) -> Result<Self> {
        config.validate().map_err(|e| SyncError::Config(e.to_string()))?;
        info!(
            "Initializing FeedService (refresh every {:?}, poll every {:?}, feed limit {})",
            config.registry_refresh_interval(),
            config.poll_interval(),
            config.feed_limit
        );

        let feed = Arc::new(FeedAggregator::new(config.feed_limit));
        let filters = Arc::new(FilterSet::new());
        let pollers = Arc::new(PollerManager::new(
            source,
            Arc::clone(&feed),
            Arc::clone(&filters),
            config.poll_interval(),
        ));
        let resolver = Arc::new(BucketResolver::new(lookup, Arc::clone(&pollers)));
        let registry = Arc::new(RegistryCache::new(
            directory,
            Arc::clone(&resolver),
            config.registry_refresh_interval(),
        ));

        Ok(Self {
            config,
            registry,
            resolver,
            pollers,
            feed,
            filters,
            store: None,
            refresh_task: None,
            shutdown_tx: None,
        })
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Hydrate from the store, refresh the directory and keep refreshing it
    /// on the configured interval.
    pub async fn start(&mut self) -> Result<()> {
        if self.refresh_task.is_some() {
            return Err(eyre::eyre!("FeedService already started"));
        }
        if self.pollers.is_shut_down() {
            return Err(eyre::eyre!("FeedService was stopped and cannot be restarted"));
        }
        info!("Starting FeedService");

        self.hydrate().await;
        match self.refresh(false).await {
            Ok(RefreshOutcome::Refreshed { .. }) => {}
            Ok(RefreshOutcome::Skipped { .. }) => {
                // Mappings are not persisted; resolve the restored collections now.
                let collections = self.registry.collections().await;
                self.resolver.reconcile(&collections).await;
            }
            Err(e) if e.is_transient() => warn!("Initial directory refresh failed: {}", e),
            Err(e) => error!("Initial directory refresh failed: {}", e),
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);
        self.refresh_task = Some(self.start_refresh_task(shutdown_rx));

        info!("FeedService started successfully");
        Ok(())
    }

    /// Stop the refresh task and every poller, then save state.
    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping FeedService");

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            shutdown_tx.send_replace(true);
        }
        if let Some(refresh_task) = self.refresh_task.take() {
            if let Err(e) = refresh_task.await {
                warn!("Refresh task error during shutdown: {}", e);
            }
        }

        self.pollers.shutdown().await;
        self.persist().await;

        info!("FeedService stopped");
        Ok(())
    }

    /// Load the persisted snapshot, if any. Returns whether one was found.
    pub async fn hydrate(&self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match store.load().await {
            Ok(Some(state)) => {
                info!(
                    "Restored {} collections and {} filters from state store",
                    state.collections.len(),
                    state.filters.len()
                );
                self.registry.restore(state.last_fetch(), state.collections).await;
                self.filters.replace(state.filters).await;
                true
            }
            Ok(None) => {
                debug!("No saved state found");
                false
            }
            Err(e) => {
                warn!("Ignoring unreadable saved state: {}", e);
                false
            }
        }
    }

    /// Refresh the directory (throttled unless forced) and resolve buckets.
    pub async fn refresh(&self, force: bool) -> Result<RefreshOutcome, SyncError> {
        let outcome = self.registry.refresh(force).await?;
        if matches!(outcome, RefreshOutcome::Refreshed { .. }) {
            self.persist().await;
        }
        Ok(outcome)
    }

    fn start_refresh_task(&self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let filters = Arc::clone(&self.filters);
        let store = self.store.clone();
        let period = self.config.registry_refresh_interval();

        tokio::spawn(async move {
            info!("Directory refresh task started");
            let mut ticker = interval_at(Instant::now() + period, period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match registry.refresh(false).await {
                            Ok(RefreshOutcome::Refreshed { .. }) => {
                                if let Some(store) = &store {
                                    if let Err(e) = save_state(store.as_ref(), &registry, &filters).await {
                                        error!("Failed to save state: {}", e);
                                    }
                                }
                            }
                            Ok(RefreshOutcome::Skipped { .. }) => {}
                            Err(e) if e.is_transient() => warn!("Directory refresh failed, retrying next tick: {}", e),
                            Err(e) => error!("Directory refresh failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }

            info!("Directory refresh task ended");
        })
    }

    async fn persist(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = save_state(store.as_ref(), &self.registry, &self.filters).await {
                error!("Failed to save state: {}", e);
            }
        }
    }

    // Filter control

    pub async fn filters_add(&self, ids: Vec<CollectionId>) {
        self.filters.add(ids).await;
        self.persist().await;
    }

    pub async fn filters_remove(&self, ids: Vec<CollectionId>) {
        self.filters.remove(ids).await;
        self.persist().await;
    }

    pub async fn filters_toggle(&self, id: CollectionId) -> bool {
        let included = self.filters.toggle(id).await;
        self.persist().await;
        included
    }

    pub async fn filters_reset(&self) {
        self.filters.reset().await;
        self.persist().await;
    }

    /// Resume polling a collection whose poller stopped. Returns whether a
    /// poller was started.
    pub async fn restart_poller(&self, id: &CollectionId) -> bool {
        let Some(bucket) = self.resolver.bucket_for(id) else {
            warn!("Can't poll transactions on {}, bucket unknown", id);
            return false;
        };
        let Some(collection) = self.registry.find(id).await else {
            warn!("Can't poll transactions on {}, collection unknown", id);
            return false;
        };
        self.pollers.start(collection, bucket)
    }

    // Read surface

    pub async fn feed(&self) -> Vec<FeedEntry> {
        self.feed.snapshot().await
    }

    pub async fn collections(&self) -> Vec<CollectionWrapper> {
        self.registry.collections().await
    }

    pub async fn filters(&self) -> Vec<CollectionId> {
        self.filters.snapshot().await.ids()
    }

    pub fn poller_state(&self, id: &CollectionId) -> PollerState {
        self.pollers.state(id)
    }

    pub fn poller_status(&self, id: &CollectionId) -> Option<PollerStatus> {
        self.pollers.status(id)
    }

    pub fn bucket_for(&self, id: &CollectionId) -> Option<BucketAddress> {
        self.resolver.bucket_for(id)
    }

    pub async fn get_stats(&self) -> ServiceStats {
        ServiceStats {
            collections: self.registry.collections().await.len(),
            mapped_buckets: self.resolver.mapped_count(),
            running_pollers: self.pollers.running_count(),
            feed: self.feed.get_stats().await,
        }
    }

    /// Check if the service is running
    pub fn is_running(&self) -> bool {
        self.refresh_task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Get service configuration
    pub fn get_config(&self) -> &SyncConfig {
        &self.config
    }
}

impl Drop for FeedService {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("FeedService dropped while running, tasks may be orphaned");
        }
    }
}

async fn save_state(store: &dyn StateStore, registry: &RegistryCache, filters: &FilterSet) -> Result<(), SyncError> {
    let state = PersistedState {
        last_fetch_ms: unix_millis(registry.last_fetch().await),
        collections: registry.collections().await.iter().map(|c| c.as_ref().clone()).collect(),
        filters: filters.snapshot().await.ids(),
    };
    store.save(&state).await
}

/// Service-wide statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStats {
    pub collections: usize,
    pub mapped_buckets: usize,
    pub running_pollers: usize,
    pub feed: FeedStats,
}

/// Builder for FeedService to make creation more ergonomic
#[derive(Default)]
pub struct FeedServiceBuilder {
    config: Option<SyncConfig>,
    directory: Option<Arc<dyn DirectoryClient>>,
    lookup: Option<Arc<dyn BucketLookup>>,
    source: Option<Arc<dyn TransactionSource>>,
    store: Option<Arc<dyn StateStore>>,
}

impl FeedServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn DirectoryClient>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_bucket_lookup(mut self, lookup: Arc<dyn BucketLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn with_transaction_source(mut self, source: Arc<dyn TransactionSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Without an explicit store, a configured `state_path` gets a JSON file store.
    pub fn build(self) -> Result<FeedService> {
        let config = self.config.unwrap_or_else(|| SyncConfig::from_env().unwrap_or_default());
        let directory = self.directory.ok_or_else(|| eyre::eyre!("FeedService needs a directory client"))?;
        let lookup = self.lookup.ok_or_else(|| eyre::eyre!("FeedService needs a bucket lookup client"))?;
        let source = self.source.ok_or_else(|| eyre::eyre!("FeedService needs a transaction source"))?;

        let store = self.store.or_else(|| {
            config.state_path.clone().map(|path| Arc::new(JsonFileStore::new(path)) as Arc<dyn StateStore>)
        });

        let service = FeedService::new(config, directory, lookup, source)?;
        Ok(match store {
            Some(store) => service.with_store(store),
            None => service,
        })
    }
}
