// Layered Architecture
pub mod data_sync; // Sync Layer: directory refresh, bucket resolution, polling, feed
pub mod model; // Domain types: collections, transactions, feed entries
pub mod remote; // Remote clients: directory, bucket router, buckets

// Common utilities and types
pub mod error;
pub mod utils;

// Re-export key components from each layer
pub use data_sync::{
    FeedAggregator, FeedService, FeedServiceBuilder, FeedStats, FilterSet, PollerManager, PollerState, PollerStatus,
    RefreshOutcome, ServiceStats, SyncConfig,
};
pub use error::SyncError;
pub use model::{
    BucketAddress, Collection, CollectionId, CollectionWrapper, FeedEntry, OperationKind, Timestamp, Transaction,
    TransactionPage,
};
pub use remote::{BucketLookup, DirectoryClient, MockBucketLookup, MockDirectory, MockTransactionSource, TransactionSource};
pub use utils::{JsonFileStore, PersistedState, StateStore};
