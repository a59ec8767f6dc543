//! In-memory object storage and vector index.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::faults::{fault_controls, Faults};
use crate::providers::{ObjectStorage, ProviderError, VectorIndex, VectorRecord};

/// A stored object.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Mock implementation of [`ObjectStorage`]. URLs use the `mock://` scheme.
#[derive(Debug, Default)]
pub struct MockStorage {
    objects: RwLock<HashMap<String, StoredObject>>,
    faults: Faults,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

fault_controls!(MockStorage);

#[async_trait]
impl ObjectStorage for MockStorage {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ProviderError> {
        self.faults.on_call().await?;
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(format!("mock://objects/{}", key))
    }
}

/// Mock implementation of [`VectorIndex`], keyed like the real one.
#[derive(Debug, Default)]
pub struct MockVectorIndex {
    records: RwLock<BTreeMap<(String, u32), VectorRecord>>,
    faults: Faults,
}

impl MockVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records stored for a content id, in chunk order.
    pub async fn records_for(&self, content_id: &str) -> Vec<VectorRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.content_id == content_id)
            .cloned()
            .collect()
    }
}

fault_controls!(MockVectorIndex);

#[async_trait]
impl VectorIndex for MockVectorIndex {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<usize, ProviderError> {
        self.faults.on_call().await?;
        let written = records.len();
        let mut stored = self.records.write().await;
        for record in records {
            stored.insert((record.content_id.clone(), record.chunk_index), record);
        }
        Ok(written)
    }

    async fn count_for(&self, content_id: &str) -> Result<usize, ProviderError> {
        Ok(self
            .records
            .read()
            .await
            .keys()
            .filter(|(id, _)| id == content_id)
            .count())
    }
}
