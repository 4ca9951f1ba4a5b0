//! Data Synchronization Layer
//!
//! Keeps a bounded, newest-first feed of collection transactions in sync with
//! the remote buckets:
//!
//! - Registry cache: throttled copy of the collection directory
//! - Bucket resolver: memoized collection → bucket mapping
//! - Poller manager: one incremental poll loop per resolved bucket
//! - Feed aggregator: the shared feed every poller merges into
//! - Filter set: which collections keep being polled
//!
//! Data flows registry → resolver → pollers → feed. The filter set is read
//! by every poller once per cycle.

pub mod aggregator;
pub mod config;
pub mod filters;
pub mod poller;
pub mod registry;
pub mod resolver;
pub mod service;


pub use aggregator::{FeedAggregator, FeedStats};
pub use config::SyncConfig;
pub use filters::{FilterSet, FilterSnapshot};
pub use poller::{CycleOutcome, Poller, PollerManager, PollerState, PollerStatus, StopReason};
pub use registry::{RefreshOutcome, RegistryCache};
pub use resolver::{BucketResolver, ReconcileReport};
pub use service::{FeedService, FeedServiceBuilder, ServiceStats};
