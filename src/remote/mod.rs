//! Remote collaborators of the sync engine.
//!
//! The directory, the bucket router and the buckets themselves are reached
//! through these traits so the engine never depends on a transport. Every
//! call is read-only; `witness` is forwarded as given and the engine always
//! passes `false`.
pub mod mock;

use crate::model::{BucketAddress, Collection, CollectionId, TransactionPage};
use async_trait::async_trait;
use eyre::Result;

/// Directory of every registered collection.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn list_collections(&self) -> Result<Vec<Collection>>;
}

/// Router mapping a collection to the bucket that records its history.
#[async_trait]
pub trait BucketLookup: Send + Sync {
    /// `Ok(None)` means no bucket has been provisioned for the collection yet.
    async fn root_bucket(&self, collection: &CollectionId, witness: bool) -> Result<Option<BucketAddress>>;
}

/// Transaction history held by a bucket.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    async fn transactions(&self, bucket: &BucketAddress, witness: bool) -> Result<TransactionPage>;
}

pub use mock::{MockBucketLookup, MockDirectory, MockTransactionSource};
