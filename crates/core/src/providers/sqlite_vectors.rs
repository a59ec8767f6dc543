//! SQLite-backed vector index.

use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::traits::{VectorIndex, VectorRecord};
use super::ProviderError;

/// Stores embeddings as JSON arrays, one row per `(content_id, chunk_index)`.
pub struct SqliteVectorIndex {
    conn: Mutex<Connection>,
}

impl SqliteVectorIndex {
    pub fn new(path: &Path) -> Result<Self, ProviderError> {
        let conn = Connection::open(path).map_err(|e| ProviderError::Storage(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| ProviderError::Storage(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, ProviderError> {
        let conn =
            Connection::open_in_memory().map_err(|e| ProviderError::Storage(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), ProviderError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS vector_records (
                content_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                orgname TEXT NOT NULL,
                text TEXT NOT NULL,
                embedding TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (content_id, chunk_index)
            );

            CREATE INDEX IF NOT EXISTS idx_vector_records_org ON vector_records(orgname);
            "#,
        )
        .map_err(|e| ProviderError::Storage(e.to_string()))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ProviderError> {
        self.conn
            .lock()
            .map_err(|e| ProviderError::Storage(format!("connection lock poisoned: {}", e)))
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<usize, ProviderError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| ProviderError::Storage(e.to_string()))?;
        let now = chrono::Utc::now().to_rfc3339();

        for record in &records {
            let embedding = serde_json::to_string(&record.embedding)
                .map_err(|e| ProviderError::Storage(e.to_string()))?;
            tx.execute(
                "INSERT INTO vector_records (content_id, chunk_index, orgname, text, embedding, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(content_id, chunk_index) DO UPDATE SET
                    orgname = excluded.orgname,
                    text = excluded.text,
                    embedding = excluded.embedding,
                    updated_at = excluded.updated_at",
                params![
                    record.content_id,
                    record.chunk_index,
                    record.orgname,
                    record.text,
                    embedding,
                    now
                ],
            )
            .map_err(|e| ProviderError::Storage(e.to_string()))?;
        }

        tx.commit()
            .map_err(|e| ProviderError::Storage(e.to_string()))?;
        Ok(records.len())
    }

    async fn count_for(&self, content_id: &str) -> Result<usize, ProviderError> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM vector_records WHERE content_id = ?",
                params![content_id],
                |row| row.get(0),
            )
            .map_err(|e| ProviderError::Storage(e.to_string()))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(content_id: &str, chunk_index: u32, text: &str) -> VectorRecord {
        VectorRecord {
            orgname: "acme".to_string(),
            content_id: content_id.to_string(),
            chunk_index,
            text: text.to_string(),
            embedding: vec![0.1, 0.2],
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_per_chunk() {
        let index = SqliteVectorIndex::in_memory().unwrap();

        index
            .upsert(vec![record("c1", 0, "a"), record("c1", 1, "b")])
            .await
            .unwrap();
        // Redelivery writes the same chunks again
        index
            .upsert(vec![record("c1", 0, "a"), record("c1", 1, "b")])
            .await
            .unwrap();

        assert_eq!(index.count_for("c1").await.unwrap(), 2);
        assert_eq!(index.count_for("c2").await.unwrap(), 0);
    }
}
