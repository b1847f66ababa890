//! SQLite persistence for uploads, groups, progress and processing locks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{
    parse_datetime, Group, GroupStore, NewGroup, ProcessingLock, ProgressSink, Result,
    StoreError, Upload, UploadStatus, UploadStore,
};

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed store.
///
/// Opens one connection per operation, so a single store can be shared
/// between worker threads.
pub struct SqliteStore {
    db_path: PathBuf,
    /// Identifies locks taken through this store.
    holder: String,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
            holder: uuid::Uuid::new_v4().to_string(),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS uploads (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                source_path TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                total_pages INTEGER,
                error_message TEXT,
                progress INTEGER NOT NULL DEFAULT 0,
                progress_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS upload_groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                upload_id TEXT NOT NULL REFERENCES uploads(id) ON DELETE CASCADE,
                owner_id TEXT NOT NULL,
                code TEXT NOT NULL,
                label TEXT NOT NULL,
                pdf_path TEXT NOT NULL,
                pages TEXT NOT NULL,
                pages_count INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_upload_groups_upload ON upload_groups(upload_id);

            CREATE TABLE IF NOT EXISTS processing_locks (
                key TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );
        "#,
        )?;
        Ok(())
    }

    fn update_status(
        &self,
        upload_id: &str,
        sql: &str,
        extra: &dyn rusqlite::ToSql,
    ) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn.execute(sql, params![upload_id, Utc::now().to_rfc3339(), extra])?;
        if changed == 0 {
            return Err(StoreError::UploadNotFound(upload_id.to_string()));
        }
        Ok(())
    }

    /// All uploads, newest first.
    pub fn list_uploads(&self) -> Result<Vec<Upload>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM uploads ORDER BY created_at DESC")?;
        let uploads = stmt
            .query_map([], row_to_upload)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(uploads)
    }
}

fn row_to_upload(row: &Row) -> rusqlite::Result<Upload> {
    Ok(Upload {
        id: row.get("id")?,
        owner_id: row.get("owner_id")?,
        source_path: PathBuf::from(row.get::<_, String>("source_path")?),
        status: UploadStatus::from_str(&row.get::<_, String>("status")?)
            .unwrap_or(UploadStatus::Queued),
        total_pages: row.get("total_pages")?,
        error_message: row.get("error_message")?,
        progress: row.get::<_, i64>("progress")?.clamp(0, 100) as u8,
        progress_message: row.get("progress_message")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(&row.get::<_, String>("updated_at")?),
    })
}

fn row_to_group(row: &Row) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get("id")?,
        code: row.get("code")?,
        label: row.get("label")?,
        pdf_path: PathBuf::from(row.get::<_, String>("pdf_path")?),
        pages: serde_json::from_str(&row.get::<_, String>("pages")?).unwrap_or_default(),
        pages_count: row.get("pages_count")?,
        owner_id: row.get("owner_id")?,
        upload_id: row.get("upload_id")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
    })
}

impl UploadStore for SqliteStore {
    fn create_upload(&self, upload: &Upload) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO uploads (id, owner_id, source_path, status, total_pages, error_message,
                                 progress, progress_message, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO NOTHING
            "#,
            params![
                upload.id,
                upload.owner_id,
                upload.source_path.to_string_lossy(),
                upload.status.as_str(),
                upload.total_pages,
                upload.error_message,
                upload.progress,
                upload.progress_message,
                upload.created_at.to_rfc3339(),
                upload.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_upload(&self, upload_id: &str) -> Result<Option<Upload>> {
        let conn = self.connect()?;
        let upload = conn
            .query_row(
                "SELECT * FROM uploads WHERE id = ?",
                params![upload_id],
                row_to_upload,
            )
            .optional()?;
        Ok(upload)
    }

    fn set_source(&self, upload_id: &str, owner_id: &str, source_path: &Path) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE uploads SET owner_id = ?2, source_path = ?3, updated_at = ?4 WHERE id = ?1",
            params![
                upload_id,
                owner_id,
                source_path.to_string_lossy(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::UploadNotFound(upload_id.to_string()));
        }
        Ok(())
    }

    fn mark_processing(&self, upload_id: &str) -> Result<()> {
        self.update_status(
            upload_id,
            r#"
            UPDATE uploads
            SET status = 'processing', error_message = NULL, progress = 0,
                progress_message = ?3, updated_at = ?2
            WHERE id = ?1
            "#,
            &"Processing",
        )
    }

    fn mark_completed(&self, upload_id: &str, total_pages: u32) -> Result<()> {
        self.update_status(
            upload_id,
            r#"
            UPDATE uploads
            SET status = 'completed', total_pages = ?3, error_message = NULL,
                progress = 100, updated_at = ?2
            WHERE id = ?1
            "#,
            &total_pages,
        )
    }

    fn mark_failed(&self, upload_id: &str, message: &str) -> Result<()> {
        self.update_status(
            upload_id,
            r#"
            UPDATE uploads
            SET status = 'failed', error_message = ?3, updated_at = ?2
            WHERE id = ?1
            "#,
            &message,
        )
    }
}

impl GroupStore for SqliteStore {
    fn create_group(&self, group: &NewGroup) -> Result<Group> {
        let conn = self.connect()?;
        let created_at = Utc::now();
        let pages = serde_json::to_string(&group.pages).unwrap_or_else(|_| "[]".to_string());
        conn.execute(
            r#"
            INSERT INTO upload_groups (upload_id, owner_id, code, label, pdf_path, pages,
                                       pages_count, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                group.upload_id,
                group.owner_id,
                group.code,
                group.label,
                group.pdf_path.to_string_lossy(),
                pages,
                group.pages_count(),
                created_at.to_rfc3339(),
            ],
        )?;

        Ok(Group {
            id: conn.last_insert_rowid(),
            code: group.code.clone(),
            label: group.label.clone(),
            pdf_path: group.pdf_path.clone(),
            pages: group.pages.clone(),
            pages_count: group.pages_count(),
            owner_id: group.owner_id.clone(),
            upload_id: group.upload_id.clone(),
            created_at,
        })
    }

    fn delete_all_for_upload(&self, upload_id: &str) -> Result<Vec<Group>> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let groups = {
            let mut stmt =
                tx.prepare("SELECT * FROM upload_groups WHERE upload_id = ? ORDER BY id")?;
            let rows = stmt
                .query_map(params![upload_id], row_to_group)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };
        tx.execute(
            "DELETE FROM upload_groups WHERE upload_id = ?",
            params![upload_id],
        )?;
        tx.commit()?;
        Ok(groups)
    }

    fn list_for_upload(&self, upload_id: &str) -> Result<Vec<Group>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM upload_groups WHERE upload_id = ? ORDER BY id")?;
        let groups = stmt
            .query_map(params![upload_id], row_to_group)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(groups)
    }
}

impl ProgressSink for SqliteStore {
    fn write_progress(&self, upload_id: &str, percent: u8, message: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE uploads SET progress = ?2, progress_message = ?3, updated_at = ?4 WHERE id = ?1",
            params![upload_id, percent, message, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

impl ProcessingLock for SqliteStore {
    /// Single upsert that only replaces a row whose lease has run out.
    fn acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let conn = self.connect()?;
        let now = Utc::now().timestamp_millis();
        let expires_at = now + ttl.as_millis() as i64;
        let changed = conn.execute(
            r#"
            INSERT INTO processing_locks (key, holder, expires_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at
            WHERE processing_locks.expires_at <= ?4
            "#,
            params![key, self.holder, expires_at, now],
        )?;
        Ok(changed == 1)
    }

    fn release(&self, key: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "DELETE FROM processing_locks WHERE key = ?1 AND holder = ?2",
            params![key, self.holder],
        )?;
        Ok(())
    }
}
