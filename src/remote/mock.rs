use super::{BucketLookup, DirectoryClient, TransactionSource};
use crate::model::{BucketAddress, Collection, CollectionId, DetailValue, RawEvent, Timestamp, TransactionPage};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use eyre::{Result, eyre};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// In-memory directory with a switchable failure mode.
#[derive(Debug, Default)]
pub struct MockDirectory {
    collections: Mutex<Vec<Collection>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockDirectory {
    pub fn new(collections: Vec<Collection>) -> Self {
        Self { collections: Mutex::new(collections), ..Default::default() }
    }

    pub async fn set_collections(&self, collections: Vec<Collection>) {
        *self.collections.lock().await = collections;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectoryClient for MockDirectory {
    async fn list_collections(&self) -> Result<Vec<Collection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(eyre!("directory unavailable"));
        }
        Ok(self.collections.lock().await.clone())
    }
}

/// Bucket router backed by a map. Collections missing from the map have no
/// bucket provisioned.
#[derive(Debug, Default)]
pub struct MockBucketLookup {
    buckets: DashMap<CollectionId, BucketAddress>,
    failing: DashSet<CollectionId>,
    calls: DashMap<CollectionId, usize>,
    latency: Option<Duration>,
}

impl MockBucketLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn provision(&self, collection: impl Into<CollectionId>, bucket: impl Into<BucketAddress>) {
        self.buckets.insert(collection.into(), bucket.into());
    }

    pub fn set_failing(&self, collection: impl Into<CollectionId>, failing: bool) {
        let collection = collection.into();
        if failing {
            self.failing.insert(collection);
        } else {
            self.failing.remove(&collection);
        }
    }

    pub fn calls_for(&self, collection: &CollectionId) -> usize {
        self.calls.get(collection).map(|c| *c).unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|c| *c.value()).sum()
    }
}

#[async_trait]
impl BucketLookup for MockBucketLookup {
    async fn root_bucket(&self, collection: &CollectionId, _witness: bool) -> Result<Option<BucketAddress>> {
        *self.calls.entry(collection.clone()).or_insert(0) += 1;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.contains(collection) {
            return Err(eyre!("lookup rejected for {}", collection));
        }
        Ok(self.buckets.get(collection).map(|b| b.clone()))
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Page(TransactionPage),
    Failure(String),
}

/// Bucket history scripted per bucket. Responses are consumed in order and
/// the last one repeats once the script runs out.
#[derive(Debug, Default)]
pub struct MockTransactionSource {
    scripts: DashMap<BucketAddress, VecDeque<Scripted>>,
    calls: DashMap<BucketAddress, usize>,
}

impl MockTransactionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_page(&self, bucket: impl Into<BucketAddress>, page: TransactionPage) {
        self.scripts.entry(bucket.into()).or_default().push_back(Scripted::Page(page));
    }

    pub fn push_failure(&self, bucket: impl Into<BucketAddress>, reason: &str) {
        self.scripts.entry(bucket.into()).or_default().push_back(Scripted::Failure(reason.to_string()));
    }

    pub fn calls_for(&self, bucket: &BucketAddress) -> usize {
        self.calls.get(bucket).map(|c| *c).unwrap_or(0)
    }
}

#[async_trait]
impl TransactionSource for MockTransactionSource {
    async fn transactions(&self, bucket: &BucketAddress, _witness: bool) -> Result<TransactionPage> {
        *self.calls.entry(bucket.clone()).or_insert(0) += 1;

        let next = {
            let mut script = self.scripts.entry(bucket.clone()).or_default();
            if script.len() > 1 { script.pop_front() } else { script.front().cloned() }
        };

        match next {
            Some(Scripted::Page(page)) => Ok(page),
            Some(Scripted::Failure(reason)) => Err(eyre!(reason)),
            None => Ok(TransactionPage::default()),
        }
    }
}

/// Raw `transfer` event at the given time, `None` for an untimed event.
pub fn transfer_event(time: Option<Timestamp>, token: u64) -> RawEvent {
    RawEvent {
        operation: "transfer".to_string(),
        time,
        caller: "caller-principal".to_string(),
        details: vec![
            ("to".to_string(), DetailValue::Principal("receiver-principal".to_string())),
            ("token".to_string(), DetailValue::U64(token)),
        ],
    }
}

/// Page of timed transfer events in the given (newest-first) order.
pub fn page_at(times: &[Timestamp]) -> TransactionPage {
    TransactionPage::new(times.iter().map(|t| transfer_event(Some(*t), *t)).collect())
}
