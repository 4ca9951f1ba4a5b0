use crate::model::CollectionId;
use std::collections::BTreeSet;
use tokio::sync::RwLock;
use tracing::info;

/// Collections of interest. Empty means every collection is of interest.
#[derive(Debug, Default)]
pub struct FilterSet {
    ids: RwLock<BTreeSet<CollectionId>>,
}

/// Point-in-time copy of the filter set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSnapshot {
    ids: BTreeSet<CollectionId>,
}

impl FilterSnapshot {
    /// True when the filter is empty or names this collection.
    pub fn includes(&self, id: &CollectionId) -> bool {
        self.ids.is_empty() || self.ids.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &CollectionId) -> bool {
        self.ids.contains(id)
    }

    pub fn ids(&self) -> Vec<CollectionId> {
        self.ids.iter().cloned().collect()
    }
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, ids: impl IntoIterator<Item = CollectionId>) {
        let ids: Vec<_> = ids.into_iter().collect();
        info!("Add filters {:?}", ids);
        self.ids.write().await.extend(ids);
    }

    pub async fn remove(&self, ids: impl IntoIterator<Item = CollectionId>) {
        let ids: Vec<_> = ids.into_iter().collect();
        info!("Remove filters {:?}", ids);
        let mut set = self.ids.write().await;
        for id in &ids {
            set.remove(id);
        }
    }

    /// Flip membership of a single collection. Returns whether it is now a member.
    pub async fn toggle(&self, id: CollectionId) -> bool {
        let mut set = self.ids.write().await;
        if set.remove(&id) {
            false
        } else {
            set.insert(id);
            true
        }
    }

    /// Back to "show all".
    pub async fn reset(&self) {
        self.ids.write().await.clear();
    }

    pub async fn replace(&self, ids: impl IntoIterator<Item = CollectionId>) {
        *self.ids.write().await = ids.into_iter().collect();
    }

    pub async fn snapshot(&self) -> FilterSnapshot {
        FilterSnapshot { ids: self.ids.read().await.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> CollectionId {
        CollectionId::new(s)
    }

    #[tokio::test]
    async fn test_empty_includes_everything() {
        let filters = FilterSet::new();
        let snapshot = filters.snapshot().await;
        assert!(snapshot.is_empty());
        assert!(snapshot.includes(&id("anything")));
    }

    #[tokio::test]
    async fn test_add_remove() {
        let filters = FilterSet::new();
        filters.add([id("a"), id("b"), id("a")]).await;
        assert_eq!(filters.snapshot().await.ids(), vec![id("a"), id("b")]);

        filters.remove([id("a")]).await;
        let snapshot = filters.snapshot().await;
        assert!(!snapshot.includes(&id("a")));
        assert!(snapshot.includes(&id("b")));
    }

    #[tokio::test]
    async fn test_toggle_is_involution() {
        let filters = FilterSet::new();
        filters.add([id("b")]).await;
        let before = filters.snapshot().await;

        for target in [id("a"), id("b")] {
            filters.toggle(target.clone()).await;
            assert_ne!(filters.snapshot().await, before);
            filters.toggle(target).await;
            assert_eq!(filters.snapshot().await, before);
        }
    }

    #[tokio::test]
    async fn test_reset() {
        let filters = FilterSet::new();
        filters.add([id("a")]).await;
        filters.reset().await;
        assert!(filters.snapshot().await.includes(&id("z")));
    }

    #[tokio::test]
    async fn test_snapshot_is_detached() {
        let filters = FilterSet::new();
        let snapshot = filters.snapshot().await;
        filters.add([id("a")]).await;
        assert!(snapshot.is_empty());
    }
}
