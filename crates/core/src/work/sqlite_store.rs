//! SQLite-backed work item store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::stage::StageKind;

use super::{
    CreateWorkItemRequest, RunKind, StageRun, WorkItem, WorkItemError, WorkItemFilter,
    WorkItemStatus, WorkItemStore, MAX_IN_FLIGHT_PROGRESS,
};

const WORK_ITEM_COLUMNS: &str = "id, orgname, kind, tool_id, pipeline_id, stages, stage_index, \
     stage_name, status, progress, error, inputs, outputs, credits_cost, credits_used, \
     cancel_requested, created_at, updated_at, started_at, completed_at";

const STAGE_RUN_COLUMNS: &str = "work_item_id, stage_index, stage_name, status, inputs, outputs, \
     credits_used, attempts, error, started_at, completed_at";

/// SQLite-backed work item store.
pub struct SqliteWorkItemStore {
    conn: Mutex<Connection>,
}

impl SqliteWorkItemStore {
    /// Open (or create) the work item tables in the database at `path`.
    pub fn new(path: &Path) -> Result<Self, WorkItemError> {
        let conn = Connection::open(path).map_err(|e| WorkItemError::Database(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| WorkItemError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, WorkItemError> {
        let conn =
            Connection::open_in_memory().map_err(|e| WorkItemError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), WorkItemError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS work_items (
                id TEXT PRIMARY KEY,
                orgname TEXT NOT NULL,
                kind TEXT NOT NULL,
                tool_id TEXT,
                pipeline_id TEXT,
                stages TEXT NOT NULL,
                stage_index INTEGER NOT NULL DEFAULT 0,
                stage_name TEXT NOT NULL,
                status TEXT NOT NULL,
                progress REAL NOT NULL DEFAULT 0,
                error TEXT,
                inputs TEXT NOT NULL,
                outputs TEXT NOT NULL DEFAULT '[]',
                credits_cost INTEGER NOT NULL DEFAULT 0,
                credits_used INTEGER NOT NULL DEFAULT 0,
                cancel_requested INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_work_items_org ON work_items(orgname, created_at);
            CREATE INDEX IF NOT EXISTS idx_work_items_status ON work_items(status);

            CREATE TABLE IF NOT EXISTS stage_runs (
                work_item_id TEXT NOT NULL,
                stage_index INTEGER NOT NULL,
                stage_name TEXT NOT NULL,
                status TEXT NOT NULL,
                inputs TEXT NOT NULL,
                outputs TEXT NOT NULL DEFAULT '[]',
                credits_used INTEGER NOT NULL DEFAULT 0,
                attempts INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                started_at TEXT,
                completed_at TEXT,
                PRIMARY KEY (work_item_id, stage_index)
            );
            "#,
        )
        .map_err(|e| WorkItemError::Database(e.to_string()))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, WorkItemError> {
        self.conn
            .lock()
            .map_err(|e| WorkItemError::Database(format!("connection lock poisoned: {}", e)))
    }

    fn build_where_clause(filter: &WorkItemFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref orgname) = filter.orgname {
            conditions.push("orgname = ?");
            params.push(Box::new(orgname.clone()));
        }

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_work_item(row: &rusqlite::Row) -> rusqlite::Result<WorkItem> {
        let kind: String = row.get(2)?;
        let stages_json: String = row.get(5)?;
        let stage_index: i64 = row.get(6)?;
        let stage_name: String = row.get(7)?;
        let status: String = row.get(8)?;
        let inputs_json: String = row.get(11)?;
        let outputs_json: String = row.get(12)?;
        let cancel_requested: i64 = row.get(15)?;
        let created_at: String = row.get(16)?;
        let updated_at: String = row.get(17)?;

        Ok(WorkItem {
            id: row.get(0)?,
            orgname: row.get(1)?,
            kind: RunKind::parse(&kind).ok_or_else(|| conversion_error(2, &kind))?,
            tool_id: row.get(3)?,
            pipeline_id: row.get(4)?,
            stages: serde_json::from_str(&stages_json)
                .map_err(|e| conversion_error(5, &e.to_string()))?,
            stage_index: stage_index as usize,
            stage_name: stage_name
                .parse::<StageKind>()
                .map_err(|e| conversion_error(7, &e))?,
            status: WorkItemStatus::parse(&status).ok_or_else(|| conversion_error(8, &status))?,
            progress: row.get(9)?,
            error: row.get(10)?,
            inputs: serde_json::from_str(&inputs_json).unwrap_or_default(),
            outputs: serde_json::from_str(&outputs_json).unwrap_or_default(),
            credits_cost: row.get(13)?,
            credits_used: row.get(14)?,
            cancel_requested: cancel_requested != 0,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
            started_at: row.get::<_, Option<String>>(18)?.map(|s| parse_timestamp(&s)),
            completed_at: row.get::<_, Option<String>>(19)?.map(|s| parse_timestamp(&s)),
        })
    }

    fn row_to_stage_run(row: &rusqlite::Row) -> rusqlite::Result<StageRun> {
        let stage_index: i64 = row.get(1)?;
        let stage_name: String = row.get(2)?;
        let status: String = row.get(3)?;
        let inputs_json: String = row.get(4)?;
        let outputs_json: String = row.get(5)?;
        let attempts: i64 = row.get(7)?;

        Ok(StageRun {
            work_item_id: row.get(0)?,
            stage_index: stage_index as usize,
            stage_name: stage_name
                .parse::<StageKind>()
                .map_err(|e| conversion_error(2, &e))?,
            status: WorkItemStatus::parse(&status).ok_or_else(|| conversion_error(3, &status))?,
            inputs: serde_json::from_str(&inputs_json).unwrap_or_default(),
            outputs: serde_json::from_str(&outputs_json).unwrap_or_default(),
            credits_used: row.get(6)?,
            attempts: attempts as u32,
            error: row.get(8)?,
            started_at: row.get::<_, Option<String>>(9)?.map(|s| parse_timestamp(&s)),
            completed_at: row.get::<_, Option<String>>(10)?.map(|s| parse_timestamp(&s)),
        })
    }

    fn load(conn: &Connection, id: &str) -> Result<Option<WorkItem>, WorkItemError> {
        conn.query_row(
            &format!("SELECT {} FROM work_items WHERE id = ?", WORK_ITEM_COLUMNS),
            params![id],
            Self::row_to_work_item,
        )
        .optional()
        .map_err(|e| WorkItemError::Database(e.to_string()))
    }

    fn load_existing(conn: &Connection, id: &str) -> Result<WorkItem, WorkItemError> {
        Self::load(conn, id)?.ok_or_else(|| WorkItemError::NotFound(id.to_string()))
    }

    fn load_stage_run(
        conn: &Connection,
        id: &str,
        stage_index: usize,
    ) -> Result<Option<StageRun>, WorkItemError> {
        conn.query_row(
            &format!(
                "SELECT {} FROM stage_runs WHERE work_item_id = ? AND stage_index = ?",
                STAGE_RUN_COLUMNS
            ),
            params![id, stage_index as i64],
            Self::row_to_stage_run,
        )
        .optional()
        .map_err(|e| WorkItemError::Database(e.to_string()))
    }

    /// Explain why a guarded status update touched no rows.
    fn transition_error(conn: &Connection, id: &str, to: WorkItemStatus) -> WorkItemError {
        match Self::load(conn, id) {
            Ok(Some(item)) => WorkItemError::InvalidTransition {
                id: id.to_string(),
                from: item.status,
                to,
            },
            Ok(None) => WorkItemError::NotFound(id.to_string()),
            Err(e) => e,
        }
    }

    fn insert_stage_run(
        conn: &Connection,
        id: &str,
        stage_index: usize,
        stage: StageKind,
        inputs: &[String],
    ) -> Result<(), WorkItemError> {
        let inputs_json =
            serde_json::to_string(inputs).map_err(|e| WorkItemError::Database(e.to_string()))?;
        conn.execute(
            "INSERT OR IGNORE INTO stage_runs (work_item_id, stage_index, stage_name, status, inputs)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                stage_index as i64,
                stage.as_str(),
                WorkItemStatus::Queued.as_str(),
                inputs_json
            ],
        )
        .map_err(|e| WorkItemError::Database(e.to_string()))?;
        Ok(())
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn conversion_error(column: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        format!("unexpected value: {}", value).into(),
    )
}

impl WorkItemStore for SqliteWorkItemStore {
    fn create(&self, request: CreateWorkItemRequest) -> Result<WorkItem, WorkItemError> {
        let first_stage = *request
            .stages
            .first()
            .ok_or_else(|| WorkItemError::Database("work item needs at least one stage".into()))?;

        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| WorkItemError::Database(e.to_string()))?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let stages_json = serde_json::to_string(&request.stages)
            .map_err(|e| WorkItemError::Database(e.to_string()))?;
        let inputs_json = serde_json::to_string(&request.inputs)
            .map_err(|e| WorkItemError::Database(e.to_string()))?;

        tx.execute(
            "INSERT INTO work_items (id, orgname, kind, tool_id, pipeline_id, stages, stage_index, stage_name, status, progress, inputs, outputs, credits_cost, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, 0, ?9, '[]', ?10, ?11, ?11)",
            params![
                id,
                request.orgname,
                request.kind.as_str(),
                request.tool_id,
                request.pipeline_id,
                stages_json,
                first_stage.as_str(),
                WorkItemStatus::Queued.as_str(),
                inputs_json,
                request.credits_cost,
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| WorkItemError::Database(e.to_string()))?;

        Self::insert_stage_run(&tx, &id, 0, first_stage, &request.inputs)?;

        tx.commit()
            .map_err(|e| WorkItemError::Database(e.to_string()))?;

        Ok(WorkItem {
            id,
            orgname: request.orgname,
            kind: request.kind,
            tool_id: request.tool_id,
            pipeline_id: request.pipeline_id,
            stages: request.stages,
            stage_index: 0,
            stage_name: first_stage,
            status: WorkItemStatus::Queued,
            progress: 0.0,
            error: None,
            inputs: request.inputs,
            outputs: Vec::new(),
            credits_cost: request.credits_cost,
            credits_used: 0,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        })
    }

    fn get(&self, id: &str) -> Result<Option<WorkItem>, WorkItemError> {
        let conn = self.conn()?;
        Self::load(&conn, id)
    }

    fn find_for_org(&self, orgname: &str, id: &str) -> Result<Option<WorkItem>, WorkItemError> {
        Ok(self.get(id)?.filter(|item| item.orgname == orgname))
    }

    fn list(&self, filter: &WorkItemFilter) -> Result<Vec<WorkItem>, WorkItemError> {
        let conn = self.conn()?;
        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {} FROM work_items {} ORDER BY created_at DESC, id ASC LIMIT ? OFFSET ?",
            WORK_ITEM_COLUMNS, where_clause
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| WorkItemError::Database(e.to_string()))?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_work_item)
            .map_err(|e| WorkItemError::Database(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| WorkItemError::Database(e.to_string()))
    }

    fn count(&self, filter: &WorkItemFilter) -> Result<i64, WorkItemError> {
        let conn = self.conn()?;
        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM work_items {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| WorkItemError::Database(e.to_string()))
    }

    fn mark_processing(&self, id: &str) -> Result<WorkItem, WorkItemError> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        let updated = conn
            .execute(
                "UPDATE work_items SET status = 'PROCESSING', started_at = COALESCE(started_at, ?1), updated_at = ?1
                 WHERE id = ?2 AND status IN ('QUEUED', 'PROCESSING')",
                params![now, id],
            )
            .map_err(|e| WorkItemError::Database(e.to_string()))?;

        if updated == 0 {
            return Err(Self::transition_error(
                &conn,
                id,
                WorkItemStatus::Processing,
            ));
        }
        Self::load_existing(&conn, id)
    }

    fn advance_progress(&self, id: &str, progress: f64) -> Result<f64, WorkItemError> {
        let conn = self.conn()?;
        let target = progress.clamp(0.0, MAX_IN_FLIGHT_PROGRESS);

        conn.execute(
            "UPDATE work_items SET progress = MAX(progress, ?1), updated_at = ?2
             WHERE id = ?3 AND status = 'PROCESSING' AND progress < ?1",
            params![target, Utc::now().to_rfc3339(), id],
        )
        .map_err(|e| WorkItemError::Database(e.to_string()))?;

        conn.query_row(
            "SELECT progress FROM work_items WHERE id = ?",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| WorkItemError::Database(e.to_string()))?
        .ok_or_else(|| WorkItemError::NotFound(id.to_string()))
    }

    fn advance_stage(
        &self,
        id: &str,
        stage_index: usize,
        inputs: &[String],
    ) -> Result<WorkItem, WorkItemError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| WorkItemError::Database(e.to_string()))?;

        let item = Self::load_existing(&tx, id)?;
        if item.status != WorkItemStatus::Processing {
            return Err(WorkItemError::InvalidTransition {
                id: id.to_string(),
                from: item.status,
                to: WorkItemStatus::Processing,
            });
        }
        let stage = *item.stages.get(stage_index).ok_or_else(|| {
            WorkItemError::Database(format!(
                "work item {} has no stage at index {}",
                id, stage_index
            ))
        })?;
        let floor = item.overall_progress(stage_index, 0.0);

        tx.execute(
            "UPDATE work_items SET stage_index = ?1, stage_name = ?2, progress = MAX(progress, ?3), updated_at = ?4
             WHERE id = ?5",
            params![
                stage_index as i64,
                stage.as_str(),
                floor,
                Utc::now().to_rfc3339(),
                id
            ],
        )
        .map_err(|e| WorkItemError::Database(e.to_string()))?;

        Self::insert_stage_run(&tx, id, stage_index, stage, inputs)?;
        let updated = Self::load_existing(&tx, id)?;

        tx.commit()
            .map_err(|e| WorkItemError::Database(e.to_string()))?;
        Ok(updated)
    }

    fn attach_outputs(&self, id: &str, outputs: &[String]) -> Result<WorkItem, WorkItemError> {
        let conn = self.conn()?;
        let mut item = Self::load_existing(&conn, id)?;

        for output in outputs {
            if !item.outputs.contains(output) {
                item.outputs.push(output.clone());
            }
        }

        let outputs_json = serde_json::to_string(&item.outputs)
            .map_err(|e| WorkItemError::Database(e.to_string()))?;
        conn.execute(
            "UPDATE work_items SET outputs = ?1, updated_at = ?2 WHERE id = ?3",
            params![outputs_json, Utc::now().to_rfc3339(), id],
        )
        .map_err(|e| WorkItemError::Database(e.to_string()))?;

        Ok(item)
    }

    fn add_credits_used(
        &self,
        id: &str,
        stage_index: usize,
        credits: i64,
    ) -> Result<(), WorkItemError> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE work_items SET credits_used = credits_used + ?1 WHERE id = ?2",
                params![credits, id],
            )
            .map_err(|e| WorkItemError::Database(e.to_string()))?;
        if updated == 0 {
            return Err(WorkItemError::NotFound(id.to_string()));
        }

        conn.execute(
            "UPDATE stage_runs SET credits_used = credits_used + ?1 WHERE work_item_id = ?2 AND stage_index = ?3",
            params![credits, id, stage_index as i64],
        )
        .map_err(|e| WorkItemError::Database(e.to_string()))?;
        Ok(())
    }

    fn complete(&self, id: &str) -> Result<WorkItem, WorkItemError> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        let updated = conn
            .execute(
                "UPDATE work_items SET status = 'COMPLETE', progress = 1.0, completed_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND status = 'PROCESSING'",
                params![now, id],
            )
            .map_err(|e| WorkItemError::Database(e.to_string()))?;

        if updated == 0 {
            return Err(Self::transition_error(&conn, id, WorkItemStatus::Complete));
        }
        Self::load_existing(&conn, id)
    }

    fn fail(&self, id: &str, error: &str) -> Result<WorkItem, WorkItemError> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        let message = if error.trim().is_empty() {
            "unknown error"
        } else {
            error
        };

        let updated = conn
            .execute(
                "UPDATE work_items SET status = 'ERROR', error = ?1, completed_at = ?2, updated_at = ?2
                 WHERE id = ?3 AND status IN ('QUEUED', 'PROCESSING')",
                params![message, now, id],
            )
            .map_err(|e| WorkItemError::Database(e.to_string()))?;

        if updated == 0 {
            return Err(Self::transition_error(&conn, id, WorkItemStatus::Error));
        }
        Self::load_existing(&conn, id)
    }

    fn request_cancel(&self, id: &str) -> Result<WorkItem, WorkItemError> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE work_items SET cancel_requested = 1, updated_at = ?1
                 WHERE id = ?2 AND status IN ('QUEUED', 'PROCESSING')",
                params![Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| WorkItemError::Database(e.to_string()))?;

        if updated == 0 {
            return Err(Self::transition_error(&conn, id, WorkItemStatus::Error));
        }
        Self::load_existing(&conn, id)
    }

    fn begin_stage_run(&self, id: &str, stage_index: usize) -> Result<StageRun, WorkItemError> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE stage_runs SET status = 'PROCESSING', attempts = attempts + 1, error = NULL,
                 started_at = COALESCE(started_at, ?1)
                 WHERE work_item_id = ?2 AND stage_index = ?3",
                params![Utc::now().to_rfc3339(), id, stage_index as i64],
            )
            .map_err(|e| WorkItemError::Database(e.to_string()))?;

        if updated == 0 {
            return Err(WorkItemError::NotFound(format!("{}#{}", id, stage_index)));
        }
        Self::load_stage_run(&conn, id, stage_index)?
            .ok_or_else(|| WorkItemError::NotFound(format!("{}#{}", id, stage_index)))
    }

    fn complete_stage_run(
        &self,
        id: &str,
        stage_index: usize,
        outputs: &[String],
    ) -> Result<StageRun, WorkItemError> {
        let conn = self.conn()?;
        let outputs_json =
            serde_json::to_string(outputs).map_err(|e| WorkItemError::Database(e.to_string()))?;

        conn.execute(
            "UPDATE stage_runs SET status = 'COMPLETE', outputs = ?1, completed_at = ?2
             WHERE work_item_id = ?3 AND stage_index = ?4",
            params![
                outputs_json,
                Utc::now().to_rfc3339(),
                id,
                stage_index as i64
            ],
        )
        .map_err(|e| WorkItemError::Database(e.to_string()))?;

        Self::load_stage_run(&conn, id, stage_index)?
            .ok_or_else(|| WorkItemError::NotFound(format!("{}#{}", id, stage_index)))
    }

    fn fail_stage_run(
        &self,
        id: &str,
        stage_index: usize,
        error: &str,
    ) -> Result<(), WorkItemError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE stage_runs SET status = 'ERROR', error = ?1, completed_at = ?2
             WHERE work_item_id = ?3 AND stage_index = ?4",
            params![error, Utc::now().to_rfc3339(), id, stage_index as i64],
        )
        .map_err(|e| WorkItemError::Database(e.to_string()))?;
        Ok(())
    }

    fn stage_run(&self, id: &str, stage_index: usize) -> Result<Option<StageRun>, WorkItemError> {
        let conn = self.conn()?;
        Self::load_stage_run(&conn, id, stage_index)
    }

    fn stage_runs(&self, id: &str) -> Result<Vec<StageRun>, WorkItemError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM stage_runs WHERE work_item_id = ? ORDER BY stage_index ASC",
                STAGE_RUN_COLUMNS
            ))
            .map_err(|e| WorkItemError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![id], Self::row_to_stage_run)
            .map_err(|e| WorkItemError::Database(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| WorkItemError::Database(e.to_string()))
    }
}
