//! SQLite-backed content store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{Content, ContentError, ContentStore, CreateContentRequest};

const CONTENT_COLUMNS: &str =
    "id, orgname, title, mime_type, text, url, preview_image, work_item_id, output_key, created_at";

/// SQLite-backed content store.
pub struct SqliteContentStore {
    conn: Mutex<Connection>,
}

impl SqliteContentStore {
    pub fn new(path: &Path) -> Result<Self, ContentError> {
        let conn = Connection::open(path).map_err(|e| ContentError::Database(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| ContentError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, ContentError> {
        let conn =
            Connection::open_in_memory().map_err(|e| ContentError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), ContentError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS contents (
                id TEXT PRIMARY KEY,
                orgname TEXT NOT NULL,
                title TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                text TEXT,
                url TEXT,
                preview_image TEXT,
                work_item_id TEXT,
                output_key TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_contents_org ON contents(orgname);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_contents_output
                ON contents(work_item_id, output_key);
            "#,
        )
        .map_err(|e| ContentError::Database(e.to_string()))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ContentError> {
        self.conn
            .lock()
            .map_err(|e| ContentError::Database(format!("connection lock poisoned: {}", e)))
    }

    fn row_to_content(row: &rusqlite::Row) -> rusqlite::Result<Content> {
        let created_at: String = row.get(9)?;
        Ok(Content {
            id: row.get(0)?,
            orgname: row.get(1)?,
            title: row.get(2)?,
            mime_type: row.get(3)?,
            text: row.get(4)?,
            url: row.get(5)?,
            preview_image: row.get(6)?,
            work_item_id: row.get(7)?,
            output_key: row.get(8)?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    fn insert(
        conn: &Connection,
        request: &CreateContentRequest,
        output: Option<(&str, &str)>,
    ) -> Result<usize, ContentError> {
        request.validate()?;
        let (work_item_id, output_key) = output.unzip();
        conn.execute(
            "INSERT OR IGNORE INTO contents (id, orgname, title, mime_type, text, url, work_item_id, output_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                uuid::Uuid::new_v4().to_string(),
                request.orgname,
                request.title,
                request.mime_type,
                request.text,
                request.url,
                work_item_id,
                output_key,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| ContentError::Database(e.to_string()))
    }
}

impl ContentStore for SqliteContentStore {
    fn create(&self, request: CreateContentRequest) -> Result<Content, ContentError> {
        request.validate()?;
        let conn = self.conn()?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO contents (id, orgname, title, mime_type, text, url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                request.orgname,
                request.title,
                request.mime_type,
                request.text,
                request.url,
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| ContentError::Database(e.to_string()))?;

        Ok(Content {
            id,
            orgname: request.orgname,
            title: request.title,
            mime_type: request.mime_type,
            text: request.text,
            url: request.url,
            preview_image: None,
            work_item_id: None,
            output_key: None,
            created_at: now,
        })
    }

    fn get(&self, orgname: &str, id: &str) -> Result<Option<Content>, ContentError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM contents WHERE id = ? AND orgname = ?",
                CONTENT_COLUMNS
            ),
            params![id, orgname],
            Self::row_to_content,
        )
        .optional()
        .map_err(|e| ContentError::Database(e.to_string()))
    }

    fn create_output(
        &self,
        work_item_id: &str,
        output_key: &str,
        request: CreateContentRequest,
    ) -> Result<Content, ContentError> {
        let conn = self.conn()?;
        Self::insert(&conn, &request, Some((work_item_id, output_key)))?;

        conn.query_row(
            &format!(
                "SELECT {} FROM contents WHERE work_item_id = ? AND output_key = ?",
                CONTENT_COLUMNS
            ),
            params![work_item_id, output_key],
            Self::row_to_content,
        )
        .map_err(|e| ContentError::Database(e.to_string()))
    }

    fn set_preview(&self, id: &str, preview_url: &str) -> Result<(), ContentError> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE contents SET preview_image = ?1 WHERE id = ?2",
                params![preview_url, id],
            )
            .map_err(|e| ContentError::Database(e.to_string()))?;
        if updated == 0 {
            return Err(ContentError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn outputs_of(&self, work_item_id: &str) -> Result<Vec<Content>, ContentError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM contents WHERE work_item_id = ? ORDER BY created_at ASC",
                CONTENT_COLUMNS
            ))
            .map_err(|e| ContentError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![work_item_id], Self::row_to_content)
            .map_err(|e| ContentError::Database(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| ContentError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_get_text_content() {
        let store = SqliteContentStore::in_memory().unwrap();
        let content = store
            .create(CreateContentRequest::text("acme", "Notes", "hello world"))
            .unwrap();

        let fetched = store.get("acme", &content.id).unwrap().unwrap();
        assert_eq!(fetched.text.as_deref(), Some("hello world"));
        assert_eq!(fetched.mime_type, "text/plain");
        assert_eq!(fetched.text_len(), 11);
        assert!(fetched.work_item_id.is_none());
    }

    #[test]
    fn test_get_is_tenant_scoped() {
        let store = SqliteContentStore::in_memory().unwrap();
        let content = store
            .create(CreateContentRequest::url(
                "acme",
                "Report",
                "https://example.com/r.pdf",
                "application/pdf",
            ))
            .unwrap();

        assert!(store.get("acme", &content.id).unwrap().is_some());
        assert!(store.get("intruder", &content.id).unwrap().is_none());
    }

    #[test]
    fn test_create_output_is_idempotent_per_key() {
        let store = SqliteContentStore::in_memory().unwrap();

        let first = store
            .create_output(
                "run-1",
                "summary:c1",
                CreateContentRequest::text("acme", "Summary", "short"),
            )
            .unwrap();
        let again = store
            .create_output(
                "run-1",
                "summary:c1",
                CreateContentRequest::text("acme", "Summary", "different text"),
            )
            .unwrap();
        let other = store
            .create_output(
                "run-1",
                "summary:c2",
                CreateContentRequest::text("acme", "Summary", "other"),
            )
            .unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(again.text.as_deref(), Some("short"));
        assert_ne!(first.id, other.id);
        assert_eq!(store.outputs_of("run-1").unwrap().len(), 2);
    }

    #[test]
    fn test_content_requires_text_or_url() {
        let store = SqliteContentStore::in_memory().unwrap();
        let mut request = CreateContentRequest::text("acme", "Empty", "");
        request.text = None;
        assert!(matches!(
            store.create(request),
            Err(ContentError::Invalid(_))
        ));
    }

    #[test]
    fn test_set_preview() {
        let store = SqliteContentStore::in_memory().unwrap();
        let content = store
            .create(CreateContentRequest::text("acme", "Doc", "body"))
            .unwrap();
        store
            .set_preview(&content.id, "https://cdn.example.com/p.png")
            .unwrap();

        let fetched = store.get("acme", &content.id).unwrap().unwrap();
        assert_eq!(
            fetched.preview_image.as_deref(),
            Some("https://cdn.example.com/p.png")
        );
        assert!(matches!(
            store.set_preview("missing", "x"),
            Err(ContentError::NotFound(_))
        ));
    }
}
