//! SQLite-backed credit ledger.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{CreditCharge, CreditError, CreditLedger, Organization, Plan};

/// SQLite-backed credit ledger.
pub struct SqliteCreditLedger {
    conn: Mutex<Connection>,
}

impl SqliteCreditLedger {
    /// Open (or create) the ledger tables in the database at `path`.
    pub fn new(path: &Path) -> Result<Self, CreditError> {
        let conn = Connection::open(path).map_err(|e| CreditError::Database(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| CreditError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory ledger (useful for testing).
    pub fn in_memory() -> Result<Self, CreditError> {
        let conn =
            Connection::open_in_memory().map_err(|e| CreditError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), CreditError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS organizations (
                orgname TEXT PRIMARY KEY,
                plan TEXT NOT NULL,
                credits INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS credit_charges (
                work_item_id TEXT NOT NULL,
                charge_key TEXT NOT NULL,
                orgname TEXT NOT NULL,
                amount INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (work_item_id, charge_key)
            );

            CREATE INDEX IF NOT EXISTS idx_credit_charges_org ON credit_charges(orgname);
            "#,
        )
        .map_err(|e| CreditError::Database(e.to_string()))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, CreditError> {
        self.conn
            .lock()
            .map_err(|e| CreditError::Database(format!("connection lock poisoned: {}", e)))
    }

    fn row_to_organization(row: &rusqlite::Row) -> rusqlite::Result<Organization> {
        let plan: String = row.get(1)?;
        Ok(Organization {
            orgname: row.get(0)?,
            plan: Plan::parse(&plan).unwrap_or(Plan::Standard),
            credits: row.get(2)?,
        })
    }
}

impl CreditLedger for SqliteCreditLedger {
    fn organization(&self, orgname: &str) -> Result<Option<Organization>, CreditError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT orgname, plan, credits FROM organizations WHERE orgname = ?",
            params![orgname],
            Self::row_to_organization,
        )
        .optional()
        .map_err(|e| CreditError::Database(e.to_string()))
    }

    fn upsert_organization(
        &self,
        orgname: &str,
        plan: Plan,
        credits: i64,
    ) -> Result<Organization, CreditError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO organizations (orgname, plan, credits) VALUES (?1, ?2, ?3)
             ON CONFLICT(orgname) DO UPDATE SET plan = excluded.plan, credits = excluded.credits",
            params![orgname, plan.as_str(), credits],
        )
        .map_err(|e| CreditError::Database(e.to_string()))?;

        Ok(Organization {
            orgname: orgname.to_string(),
            plan,
            credits,
        })
    }

    fn ensure_organization(
        &self,
        orgname: &str,
        plan: Plan,
        credits: i64,
    ) -> Result<bool, CreditError> {
        let conn = self.conn()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO organizations (orgname, plan, credits) VALUES (?1, ?2, ?3)",
                params![orgname, plan.as_str(), credits],
            )
            .map_err(|e| CreditError::Database(e.to_string()))?;
        Ok(inserted > 0)
    }

    fn adjust(&self, orgname: &str, delta: i64) -> Result<i64, CreditError> {
        let conn = self.conn()?;
        conn.query_row(
            "UPDATE organizations SET credits = credits + ?1 WHERE orgname = ?2 RETURNING credits",
            params![delta, orgname],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| CreditError::Database(e.to_string()))?
        .ok_or_else(|| CreditError::OrganizationNotFound(orgname.to_string()))
    }

    fn debit_once(
        &self,
        orgname: &str,
        work_item_id: &str,
        charge_key: &str,
        amount: i64,
    ) -> Result<Option<i64>, CreditError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| CreditError::Database(e.to_string()))?;

        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO credit_charges (work_item_id, charge_key, orgname, amount, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    work_item_id,
                    charge_key,
                    orgname,
                    amount,
                    Utc::now().to_rfc3339()
                ],
            )
            .map_err(|e| CreditError::Database(e.to_string()))?;

        if inserted == 0 {
            // Already settled; dropping the transaction rolls back nothing.
            return Ok(None);
        }

        let balance: Option<i64> = tx
            .query_row(
                "UPDATE organizations SET credits = credits - ?1 WHERE orgname = ?2 RETURNING credits",
                params![amount, orgname],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| CreditError::Database(e.to_string()))?;

        let Some(balance) = balance else {
            return Err(CreditError::OrganizationNotFound(orgname.to_string()));
        };

        tx.commit()
            .map_err(|e| CreditError::Database(e.to_string()))?;
        Ok(Some(balance))
    }

    fn charges_for(&self, work_item_id: &str) -> Result<Vec<CreditCharge>, CreditError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT orgname, work_item_id, charge_key, amount, created_at FROM credit_charges
                 WHERE work_item_id = ? ORDER BY created_at ASC, charge_key ASC",
            )
            .map_err(|e| CreditError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![work_item_id], |row| {
                let created_at: String = row.get(4)?;
                Ok(CreditCharge {
                    orgname: row.get(0)?,
                    work_item_id: row.get(1)?,
                    charge_key: row.get(2)?,
                    amount: row.get(3)?,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })
            .map_err(|e| CreditError::Database(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| CreditError::Database(e.to_string()))
    }
}
