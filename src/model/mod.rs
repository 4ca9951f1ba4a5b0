pub mod collection;
pub mod feed_entry;
pub mod transaction;

pub use collection::{BucketAddress, Collection, CollectionId, CollectionWrapper, sort_by_name};
pub use feed_entry::{FeedEntry, abbreviate_wallet};
pub use transaction::{DetailValue, OperationKind, Price, RawEvent, Timestamp, Transaction, TransactionPage};
