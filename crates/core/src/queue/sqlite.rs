//! SQLite-backed dispatch queue.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{DispatchQueue, EnqueueOutcome, EnqueueRequest, Lease, QueueError, RemoveOutcome};

/// SQLite-backed dispatch queue.
pub struct SqliteDispatchQueue {
    conn: Mutex<Connection>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

impl SqliteDispatchQueue {
    pub fn new(path: &Path) -> Result<Self, QueueError> {
        let conn = Connection::open(path).map_err(|e| QueueError::Database(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| QueueError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory queue (useful for testing).
    pub fn in_memory() -> Result<Self, QueueError> {
        let conn =
            Connection::open_in_memory().map_err(|e| QueueError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), QueueError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS dispatch_jobs (
                job_key TEXT PRIMARY KEY,
                queue TEXT NOT NULL,
                payload TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                available_at INTEGER NOT NULL,
                lease_owner TEXT,
                lease_expires_at INTEGER,
                attempts INTEGER NOT NULL DEFAULT 0,
                enqueued_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_dispatch_jobs_queue
                ON dispatch_jobs(queue, priority DESC, available_at);
            "#,
        )
        .map_err(|e| QueueError::Database(e.to_string()))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, QueueError> {
        self.conn
            .lock()
            .map_err(|e| QueueError::Database(format!("connection lock poisoned: {}", e)))
    }
}

impl DispatchQueue for SqliteDispatchQueue {
    fn enqueue(&self, request: EnqueueRequest) -> Result<EnqueueOutcome, QueueError> {
        let conn = self.conn()?;
        let now = now_ms();
        let available_at = now + request.delay.map(duration_ms).unwrap_or(0);

        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO dispatch_jobs (job_key, queue, payload, priority, available_at, enqueued_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    request.job_key,
                    request.queue,
                    request.payload,
                    request.priority,
                    available_at,
                    now
                ],
            )
            .map_err(|e| QueueError::Database(e.to_string()))?;

        Ok(if inserted == 0 {
            EnqueueOutcome::Duplicate
        } else {
            EnqueueOutcome::Enqueued
        })
    }

    fn lease(&self, queue: &str, ttl: Duration) -> Result<Option<Lease>, QueueError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| QueueError::Database(e.to_string()))?;
        let now = now_ms();

        let candidate: Option<(String, String, i64)> = tx
            .query_row(
                "SELECT job_key, payload, attempts FROM dispatch_jobs
                 WHERE queue = ?1 AND available_at <= ?2
                   AND (lease_owner IS NULL OR lease_expires_at <= ?2)
                 ORDER BY priority DESC, available_at ASC, rowid ASC
                 LIMIT 1",
                params![queue, now],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|e| QueueError::Database(e.to_string()))?;

        let Some((job_key, payload, attempts)) = candidate else {
            return Ok(None);
        };

        let owner = uuid::Uuid::new_v4().to_string();
        let expires_at = now + duration_ms(ttl);
        tx.execute(
            "UPDATE dispatch_jobs SET lease_owner = ?1, lease_expires_at = ?2, attempts = attempts + 1
             WHERE job_key = ?3",
            params![owner, expires_at, job_key],
        )
        .map_err(|e| QueueError::Database(e.to_string()))?;

        tx.commit()
            .map_err(|e| QueueError::Database(e.to_string()))?;

        Ok(Some(Lease {
            job_key,
            queue: queue.to_string(),
            payload,
            owner,
            attempts: (attempts + 1) as u32,
            expires_at: Utc
                .timestamp_millis_opt(expires_at)
                .single()
                .unwrap_or_else(Utc::now),
        }))
    }

    fn extend(&self, lease: &Lease, ttl: Duration) -> Result<Lease, QueueError> {
        let conn = self.conn()?;
        let expires_at = now_ms() + duration_ms(ttl);

        let updated = conn
            .execute(
                "UPDATE dispatch_jobs SET lease_expires_at = ?1 WHERE job_key = ?2 AND lease_owner = ?3",
                params![expires_at, lease.job_key, lease.owner],
            )
            .map_err(|e| QueueError::Database(e.to_string()))?;
        if updated == 0 {
            return Err(QueueError::LeaseLost(lease.job_key.clone()));
        }

        let mut extended = lease.clone();
        extended.expires_at = Utc
            .timestamp_millis_opt(expires_at)
            .single()
            .unwrap_or_else(Utc::now);
        Ok(extended)
    }

    fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        let conn = self.conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM dispatch_jobs WHERE job_key = ?1 AND lease_owner = ?2",
                params![lease.job_key, lease.owner],
            )
            .map_err(|e| QueueError::Database(e.to_string()))?;
        if deleted == 0 {
            return Err(QueueError::LeaseLost(lease.job_key.clone()));
        }
        Ok(())
    }

    fn release(&self, lease: &Lease, delay: Duration) -> Result<(), QueueError> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE dispatch_jobs SET lease_owner = NULL, lease_expires_at = NULL, available_at = ?1
                 WHERE job_key = ?2 AND lease_owner = ?3",
                params![now_ms() + duration_ms(delay), lease.job_key, lease.owner],
            )
            .map_err(|e| QueueError::Database(e.to_string()))?;
        if updated == 0 {
            return Err(QueueError::LeaseLost(lease.job_key.clone()));
        }
        Ok(())
    }

    fn forward(&self, lease: &Lease, next_queue: &str, payload: &str) -> Result<(), QueueError> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE dispatch_jobs SET queue = ?1, payload = ?2, lease_owner = NULL,
                 lease_expires_at = NULL, available_at = ?3, attempts = 0
                 WHERE job_key = ?4 AND lease_owner = ?5",
                params![next_queue, payload, now_ms(), lease.job_key, lease.owner],
            )
            .map_err(|e| QueueError::Database(e.to_string()))?;
        if updated == 0 {
            return Err(QueueError::LeaseLost(lease.job_key.clone()));
        }
        Ok(())
    }

    fn remove(&self, job_key: &str) -> Result<RemoveOutcome, QueueError> {
        let conn = self.conn()?;
        let now = now_ms();

        let lease_state: Option<(Option<String>, Option<i64>)> = conn
            .query_row(
                "SELECT lease_owner, lease_expires_at FROM dispatch_jobs WHERE job_key = ?",
                params![job_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| QueueError::Database(e.to_string()))?;

        match lease_state {
            None => Ok(RemoveOutcome::NotFound),
            Some((Some(_), Some(expires_at))) if expires_at > now => Ok(RemoveOutcome::Leased),
            Some(_) => {
                conn.execute(
                    "DELETE FROM dispatch_jobs WHERE job_key = ?",
                    params![job_key],
                )
                .map_err(|e| QueueError::Database(e.to_string()))?;
                Ok(RemoveOutcome::Removed)
            }
        }
    }

    fn depth(&self, queue: &str) -> Result<i64, QueueError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT COUNT(*) FROM dispatch_jobs WHERE queue = ?",
            params![queue],
            |row| row.get(0),
        )
        .map_err(|e| QueueError::Database(e.to_string()))
    }
}
