//! SQLite-backed library store implementation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::store::{LibraryStore, RecordProof, StoreError, WantedFilter};
use super::types::{
    DiscoveredFile, NewSnatch, NewWantedItem, ReconcileState, SearchToken, SnatchOutcome,
    SnatchRecord, SnatchStatus, WantedItem, WantedStatus,
};
use crate::provider::MediaKind;

const WANTED_COLUMNS: &str = "id, kind, title, author, series, series_position, isbn, issue_date, formats, status, file_path, snatch_attempts, created_at, updated_at";

const SNATCH_COLUMNS: &str = "id, wanted_id, result_title, provider, locator, media_kind, size_bytes, client, client_download_id, status, failure_reason, dispatch_attempts, created_at, updated_at";

const DISCOVERED_COLUMNS: &str = "id, path, snatch_id, state, wanted_id, score, destination, retry_count, last_error, created_at, updated_at";

/// SQLite-backed library store.
pub struct SqliteLibraryStore {
    conn: Mutex<Connection>,
}

impl SqliteLibraryStore {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(db)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(db)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS wanted_items (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                author TEXT,
                series TEXT,
                series_position TEXT,
                isbn TEXT,
                issue_date TEXT,
                formats TEXT NOT NULL,
                status TEXT NOT NULL,
                file_path TEXT,
                snatch_attempts INTEGER NOT NULL DEFAULT 0,
                search_issued INTEGER NOT NULL DEFAULT 0,
                search_completed INTEGER NOT NULL DEFAULT 0,
                last_searched_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_wanted_status ON wanted_items(status);

            CREATE TABLE IF NOT EXISTS snatch_records (
                id TEXT PRIMARY KEY,
                wanted_id TEXT NOT NULL,
                result_title TEXT NOT NULL,
                provider TEXT NOT NULL,
                locator TEXT NOT NULL,
                media_kind TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                client TEXT NOT NULL,
                client_download_id TEXT,
                status TEXT NOT NULL,
                failure_reason TEXT,
                dispatch_attempts INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_snatch_wanted ON snatch_records(wanted_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_snatch_one_open
                ON snatch_records(wanted_id) WHERE status = 'snatched';

            CREATE TABLE IF NOT EXISTS discovered_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL UNIQUE,
                snatch_id TEXT,
                state TEXT NOT NULL,
                wanted_id TEXT,
                score INTEGER,
                destination TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_discovered_state ON discovered_files(state);
            "#,
        )
        .map_err(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection mutex poisoned".to_string()))
    }

    fn build_where_clause(filter: &WantedFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(kind) = filter.kind {
            conditions.push("kind = ?");
            params.push(Box::new(kind.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_wanted(row: &rusqlite::Row) -> rusqlite::Result<WantedItem> {
        let formats_json: String = row.get(8)?;
        let file_path: Option<String> = row.get(10)?;

        Ok(WantedItem {
            id: row.get(0)?,
            kind: parse_column(row, 1)?,
            title: row.get(2)?,
            author: row.get(3)?,
            series: row.get(4)?,
            series_position: row.get(5)?,
            isbn: row.get(6)?,
            issue_date: row.get(7)?,
            formats: serde_json::from_str(&formats_json).unwrap_or_default(),
            status: parse_column(row, 9)?,
            file_path: file_path.map(PathBuf::from),
            snatch_attempts: row.get(11)?,
            created_at: parse_timestamp(&row.get::<_, String>(12)?),
            updated_at: parse_timestamp(&row.get::<_, String>(13)?),
        })
    }

    fn row_to_snatch(row: &rusqlite::Row) -> rusqlite::Result<SnatchRecord> {
        let size: i64 = row.get(6)?;

        Ok(SnatchRecord {
            id: row.get(0)?,
            wanted_id: row.get(1)?,
            result_title: row.get(2)?,
            provider: row.get(3)?,
            locator: row.get(4)?,
            media_kind: parse_column(row, 5)?,
            size_bytes: size.max(0) as u64,
            client: row.get(7)?,
            client_download_id: row.get(8)?,
            status: parse_column(row, 9)?,
            failure_reason: row.get(10)?,
            dispatch_attempts: row.get(11)?,
            created_at: parse_timestamp(&row.get::<_, String>(12)?),
            updated_at: parse_timestamp(&row.get::<_, String>(13)?),
        })
    }

    fn row_to_discovered(row: &rusqlite::Row) -> rusqlite::Result<DiscoveredFile> {
        let path: String = row.get(1)?;
        let score: Option<i64> = row.get(5)?;
        let destination: Option<String> = row.get(6)?;

        Ok(DiscoveredFile {
            id: row.get(0)?,
            path: PathBuf::from(path),
            snatch_id: row.get(2)?,
            state: parse_column(row, 3)?,
            wanted_id: row.get(4)?,
            score: score.map(|s| s.clamp(0, 100) as u8),
            destination: destination.map(PathBuf::from),
            retry_count: row.get(7)?,
            last_error: row.get(8)?,
            created_at: parse_timestamp(&row.get::<_, String>(9)?),
            updated_at: parse_timestamp(&row.get::<_, String>(10)?),
        })
    }

    fn query_wanted(conn: &Connection, id: &str) -> Result<Option<WantedItem>, StoreError> {
        conn.query_row(
            &format!("SELECT {} FROM wanted_items WHERE id = ?", WANTED_COLUMNS),
            params![id],
            Self::row_to_wanted,
        )
        .optional()
        .map_err(db)
    }

    fn query_snatch(conn: &Connection, id: &str) -> Result<Option<SnatchRecord>, StoreError> {
        conn.query_row(
            &format!("SELECT {} FROM snatch_records WHERE id = ?", SNATCH_COLUMNS),
            params![id],
            Self::row_to_snatch,
        )
        .optional()
        .map_err(db)
    }

    fn query_discovered(conn: &Connection, id: i64) -> Result<Option<DiscoveredFile>, StoreError> {
        conn.query_row(
            &format!(
                "SELECT {} FROM discovered_files WHERE id = ?",
                DISCOVERED_COLUMNS
            ),
            params![id],
            Self::row_to_discovered,
        )
        .optional()
        .map_err(db)
    }

    fn collect_snatches(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<SnatchRecord>, StoreError> {
        let mut stmt = conn.prepare(sql).map_err(db)?;
        let rows = stmt.query_map(params, Self::row_to_snatch).map_err(db)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db)
    }

    fn collect_discovered(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<DiscoveredFile>, StoreError> {
        let mut stmt = conn.prepare(sql).map_err(db)?;
        let rows = stmt.query_map(params, Self::row_to_discovered).map_err(db)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db)
    }
}

impl LibraryStore for SqliteLibraryStore {
    fn add_wanted(&self, item: NewWantedItem) -> Result<WantedItem, StoreError> {
        let conn = self.lock()?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let formats_json =
            serde_json::to_string(&item.formats).map_err(|e| StoreError::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO wanted_items (id, kind, title, author, series, series_position, isbn, issue_date, formats, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                id,
                item.kind.as_str(),
                item.title,
                item.author,
                item.series,
                item.series_position,
                item.isbn,
                item.issue_date,
                formats_json,
                WantedStatus::Wanted.as_str(),
                format_timestamp(now),
                format_timestamp(now),
            ],
        )
        .map_err(db)?;

        Ok(WantedItem {
            id,
            kind: item.kind,
            title: item.title,
            author: item.author,
            series: item.series,
            series_position: item.series_position,
            isbn: item.isbn,
            issue_date: item.issue_date,
            formats: item.formats,
            status: WantedStatus::Wanted,
            file_path: None,
            snatch_attempts: 0,
            created_at: now,
            updated_at: now,
        })
    }

    fn get_wanted(&self, id: &str) -> Result<Option<WantedItem>, StoreError> {
        let conn = self.lock()?;
        Self::query_wanted(&conn, id)
    }

    fn list_wanted(&self, filter: &WantedFilter) -> Result<Vec<WantedItem>, StoreError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM wanted_items {} ORDER BY created_at ASC, rowid ASC LIMIT ? OFFSET ?",
            WANTED_COLUMNS, where_clause
        );

        let mut all_params = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> =
            all_params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql).map_err(db)?;
        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_wanted)
            .map_err(db)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db)
    }

    fn count_wanted(&self, filter: &WantedFilter) -> Result<i64, StoreError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM wanted_items {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(db)
    }

    fn issue_search_token(&self, wanted_id: &str) -> Result<SearchToken, StoreError> {
        let conn = self.lock()?;

        let issued: Option<i64> = conn
            .query_row(
                "UPDATE wanted_items SET search_issued = search_issued + 1 WHERE id = ? RETURNING search_issued",
                params![wanted_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db)?;

        issued
            .map(|t| SearchToken(t.max(0) as u64))
            .ok_or_else(|| StoreError::NotFound(wanted_id.to_string()))
    }

    fn complete_search(&self, wanted_id: &str, token: SearchToken) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let now = format_timestamp(Utc::now());

        let changed = conn
            .execute(
                "UPDATE wanted_items SET search_completed = ?1, last_searched_at = ?2 WHERE id = ?3 AND search_completed < ?1",
                params![token.0 as i64, now, wanted_id],
            )
            .map_err(db)?;

        Ok(changed > 0)
    }

    fn try_snatch(
        &self,
        wanted_id: &str,
        token: SearchToken,
        snatch: NewSnatch,
    ) -> Result<SnatchOutcome, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db)?;
        let now = Utc::now();

        let changed = tx
            .execute(
                "UPDATE wanted_items SET status = 'snatched', snatch_attempts = snatch_attempts + 1, search_completed = ?1, last_searched_at = ?2, updated_at = ?2 WHERE id = ?3 AND status = 'wanted' AND search_completed < ?1",
                params![token.0 as i64, format_timestamp(now), wanted_id],
            )
            .map_err(db)?;

        if changed == 0 {
            let current: Option<String> = tx
                .query_row(
                    "SELECT status FROM wanted_items WHERE id = ?",
                    params![wanted_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db)?;

            return match current {
                None => Err(StoreError::NotFound(wanted_id.to_string())),
                Some(status) if status != WantedStatus::Wanted.as_str() => {
                    Ok(SnatchOutcome::AlreadySnatched)
                }
                Some(_) => Ok(SnatchOutcome::Superseded),
            };
        }

        let record = SnatchRecord {
            id: uuid::Uuid::new_v4().to_string(),
            wanted_id: wanted_id.to_string(),
            result_title: snatch.result_title,
            provider: snatch.provider,
            locator: snatch.locator,
            media_kind: snatch.media_kind,
            size_bytes: snatch.size_bytes,
            client: snatch.client,
            client_download_id: None,
            status: SnatchStatus::Snatched,
            failure_reason: None,
            dispatch_attempts: 0,
            created_at: now,
            updated_at: now,
        };

        tx.execute(
            "INSERT INTO snatch_records (id, wanted_id, result_title, provider, locator, media_kind, size_bytes, client, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.id,
                record.wanted_id,
                record.result_title,
                record.provider,
                record.locator,
                record.media_kind.as_str(),
                record.size_bytes as i64,
                record.client,
                record.status.as_str(),
                format_timestamp(now),
                format_timestamp(now),
            ],
        )
        .map_err(|e| StoreError::Conflict(format!("open snatch exists for {}: {}", wanted_id, e)))?;

        tx.commit().map_err(db)?;

        Ok(SnatchOutcome::Snatched(record))
    }

    fn get_snatch(&self, id: &str) -> Result<Option<SnatchRecord>, StoreError> {
        let conn = self.lock()?;
        Self::query_snatch(&conn, id)
    }

    fn snatches_for(&self, wanted_id: &str) -> Result<Vec<SnatchRecord>, StoreError> {
        let conn = self.lock()?;
        Self::collect_snatches(
            &conn,
            &format!(
                "SELECT {} FROM snatch_records WHERE wanted_id = ? ORDER BY created_at DESC, rowid DESC",
                SNATCH_COLUMNS
            ),
            &[&wanted_id],
        )
    }

    fn open_snatches(&self) -> Result<Vec<SnatchRecord>, StoreError> {
        let conn = self.lock()?;
        Self::collect_snatches(
            &conn,
            &format!(
                "SELECT {} FROM snatch_records WHERE status = 'snatched' ORDER BY created_at ASC, rowid ASC",
                SNATCH_COLUMNS
            ),
            &[],
        )
    }

    fn failed_locators(&self, wanted_id: &str) -> Result<HashSet<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT locator FROM snatch_records WHERE wanted_id = ? AND status = 'failed'")
            .map_err(db)?;
        let rows = stmt
            .query_map(params![wanted_id], |row| row.get::<_, String>(0))
            .map_err(db)?;
        rows.collect::<rusqlite::Result<HashSet<_>>>().map_err(db)
    }

    fn set_client_id(&self, snatch_id: &str, client_id: &str) -> Result<SnatchRecord, StoreError> {
        let conn = self.lock()?;

        let changed = conn
            .execute(
                "UPDATE snatch_records SET client_download_id = ?, failure_reason = NULL, updated_at = ? WHERE id = ? AND status = 'snatched'",
                params![client_id, format_timestamp(Utc::now()), snatch_id],
            )
            .map_err(db)?;

        if changed == 0 {
            return match Self::query_snatch(&conn, snatch_id)? {
                None => Err(StoreError::NotFound(snatch_id.to_string())),
                Some(record) => Err(StoreError::Conflict(format!(
                    "snatch {} is {}",
                    snatch_id,
                    record.status.as_str()
                ))),
            };
        }

        Self::query_snatch(&conn, snatch_id)?
            .ok_or_else(|| StoreError::NotFound(snatch_id.to_string()))
    }

    fn record_dispatch_failure(&self, snatch_id: &str, reason: &str) -> Result<u32, StoreError> {
        let conn = self.lock()?;

        let attempts: Option<u32> = conn
            .query_row(
                "UPDATE snatch_records SET dispatch_attempts = dispatch_attempts + 1, failure_reason = ?, updated_at = ? WHERE id = ? RETURNING dispatch_attempts",
                params![reason, format_timestamp(Utc::now()), snatch_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db)?;

        attempts.ok_or_else(|| StoreError::NotFound(snatch_id.to_string()))
    }

    fn fail_snatch(
        &self,
        snatch_id: &str,
        reason: &str,
        max_attempts: u32,
    ) -> Result<WantedStatus, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db)?;
        let now = format_timestamp(Utc::now());

        let wanted_id: Option<String> = tx
            .query_row(
                "UPDATE snatch_records SET status = 'failed', failure_reason = ?, updated_at = ? WHERE id = ? AND status = 'snatched' RETURNING wanted_id",
                params![reason, now, snatch_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db)?;

        let Some(wanted_id) = wanted_id else {
            return match Self::query_snatch(&tx, snatch_id)? {
                None => Err(StoreError::NotFound(snatch_id.to_string())),
                Some(record) => Err(StoreError::Conflict(format!(
                    "snatch {} is already {}",
                    snatch_id,
                    record.status.as_str()
                ))),
            };
        };

        tx.execute(
            "UPDATE wanted_items SET status = CASE WHEN snatch_attempts >= ? THEN 'failed' ELSE 'wanted' END, updated_at = ? WHERE id = ? AND status = 'snatched'",
            params![max_attempts, now, wanted_id],
        )
        .map_err(db)?;

        let status: String = tx
            .query_row(
                "SELECT status FROM wanted_items WHERE id = ?",
                params![wanted_id],
                |row| row.get(0),
            )
            .map_err(db)?;

        tx.commit().map_err(db)?;

        WantedStatus::from_str(&status).map_err(StoreError::Database)
    }

    fn enqueue_discovered(
        &self,
        path: PathBuf,
        snatch_id: Option<&str>,
    ) -> Result<Option<DiscoveredFile>, StoreError> {
        let conn = self.lock()?;
        let now = format_timestamp(Utc::now());

        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO discovered_files (path, snatch_id, state, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
                params![
                    path.to_string_lossy(),
                    snatch_id,
                    ReconcileState::Discovered.as_str(),
                    now,
                    now,
                ],
            )
            .map_err(db)?;

        if inserted == 0 {
            return Ok(None);
        }

        Self::query_discovered(&conn, conn.last_insert_rowid())
    }

    fn get_discovered(&self, id: i64) -> Result<Option<DiscoveredFile>, StoreError> {
        let conn = self.lock()?;
        Self::query_discovered(&conn, id)
    }

    fn pending_discovered(&self, limit: i64) -> Result<Vec<DiscoveredFile>, StoreError> {
        let conn = self.lock()?;
        Self::collect_discovered(
            &conn,
            &format!(
                "SELECT {} FROM discovered_files WHERE state IN ('discovered', 'identified', 'organized') ORDER BY created_at ASC, id ASC LIMIT ?",
                DISCOVERED_COLUMNS
            ),
            &[&limit],
        )
    }

    fn list_discovered(
        &self,
        state: ReconcileState,
        limit: i64,
    ) -> Result<Vec<DiscoveredFile>, StoreError> {
        let conn = self.lock()?;
        Self::collect_discovered(
            &conn,
            &format!(
                "SELECT {} FROM discovered_files WHERE state = ? ORDER BY updated_at DESC, id DESC LIMIT ?",
                DISCOVERED_COLUMNS
            ),
            &[&state.as_str(), &limit],
        )
    }

    fn save_discovered(&self, file: &DiscoveredFile) -> Result<(), StoreError> {
        if file.state == ReconcileState::Recorded {
            return Err(StoreError::InvariantViolation(format!(
                "discovered file {} can only be recorded together with its wanted item",
                file.id
            )));
        }

        let conn = self.lock()?;

        let changed = conn
            .execute(
                "UPDATE discovered_files SET state = ?, wanted_id = ?, score = ?, destination = ?, retry_count = ?, last_error = ?, updated_at = ? WHERE id = ? AND state != 'recorded'",
                params![
                    file.state.as_str(),
                    file.wanted_id,
                    file.score.map(i64::from),
                    file.destination.as_ref().map(|p| p.to_string_lossy().into_owned()),
                    file.retry_count,
                    file.last_error,
                    format_timestamp(Utc::now()),
                    file.id,
                ],
            )
            .map_err(db)?;

        if changed == 0 {
            return match Self::query_discovered(&conn, file.id)? {
                None => Err(StoreError::NotFound(file.id.to_string())),
                Some(_) => Err(StoreError::Conflict(format!(
                    "discovered file {} is already recorded",
                    file.id
                ))),
            };
        }

        Ok(())
    }

    fn record_processed(&self, proof: &RecordProof) -> Result<WantedItem, StoreError> {
        if proof.score < proof.confirm_threshold {
            return Err(StoreError::InvariantViolation(format!(
                "score {} for {} is below the confirm threshold {}",
                proof.score, proof.wanted_id, proof.confirm_threshold
            )));
        }
        if !proof.file_path.is_file() {
            return Err(StoreError::InvariantViolation(format!(
                "library file {} does not exist",
                proof.file_path.display()
            )));
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db)?;

        let file = Self::query_discovered(&tx, proof.discovered_id)?
            .ok_or_else(|| StoreError::NotFound(proof.discovered_id.to_string()))?;

        let identified_as_this = file.state == ReconcileState::Organized
            && file.wanted_id.as_deref() == Some(proof.wanted_id.as_str())
            && file.destination.as_deref() == Some(proof.file_path.as_path())
            && file.score == Some(proof.score);
        if !identified_as_this {
            return Err(StoreError::InvariantViolation(format!(
                "discovered file {} ({}) is not an organized match for {}",
                file.id, file.state, proof.wanted_id
            )));
        }

        let now = format_timestamp(Utc::now());

        let changed = tx
            .execute(
                "UPDATE wanted_items SET status = 'processed', file_path = ?, updated_at = ? WHERE id = ? AND status IN ('wanted', 'snatched')",
                params![proof.file_path.to_string_lossy(), now, proof.wanted_id],
            )
            .map_err(db)?;
        if changed == 0 {
            return Err(StoreError::Conflict(format!(
                "wanted item {} is no longer wanted or snatched",
                proof.wanted_id
            )));
        }

        tx.execute(
            "UPDATE snatch_records SET status = 'processed', updated_at = ? WHERE wanted_id = ? AND status = 'snatched'",
            params![now, proof.wanted_id],
        )
        .map_err(db)?;

        tx.execute(
            "UPDATE discovered_files SET state = 'recorded', updated_at = ? WHERE id = ?",
            params![now, proof.discovered_id],
        )
        .map_err(db)?;

        let item = Self::query_wanted(&tx, &proof.wanted_id)?
            .ok_or_else(|| StoreError::NotFound(proof.wanted_id.clone()))?;

        tx.commit().map_err(db)?;

        Ok(item)
    }
}

fn db(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_column<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::ItemKind;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_store() -> SqliteLibraryStore {
        SqliteLibraryStore::in_memory().expect("Failed to create in-memory store")
    }

    fn gunslinger(store: &SqliteLibraryStore) -> WantedItem {
        store
            .add_wanted(NewWantedItem::book("The Gunslinger", "Stephen King"))
            .unwrap()
    }

    fn new_snatch(locator: &str) -> NewSnatch {
        NewSnatch {
            result_title: "Stephen King - The Gunslinger.epub".to_string(),
            provider: "indexer".to_string(),
            locator: locator.to_string(),
            media_kind: MediaKind::Torrent,
            size_bytes: 2_000_000,
            client: "qbittorrent".to_string(),
        }
    }

    fn snatch(store: &SqliteLibraryStore, item: &WantedItem, locator: &str) -> SnatchRecord {
        let token = store.issue_search_token(&item.id).unwrap();
        match store.try_snatch(&item.id, token, new_snatch(locator)).unwrap() {
            SnatchOutcome::Snatched(record) => record,
            other => panic!("expected snatch, got {:?}", other),
        }
    }

    #[test]
    fn test_add_and_get_wanted() {
        let store = create_test_store();
        let item = store
            .add_wanted(
                NewWantedItem::book("The Gunslinger", "Stephen King")
                    .with_series("The Dark Tower", Some("1"))
                    .with_formats(&["epub"]),
            )
            .unwrap();

        let fetched = store.get_wanted(&item.id).unwrap().unwrap();
        assert_eq!(fetched.title, "The Gunslinger");
        assert_eq!(fetched.kind, ItemKind::Book);
        assert_eq!(fetched.series.as_deref(), Some("The Dark Tower"));
        assert_eq!(fetched.formats, vec!["epub"]);
        assert_eq!(fetched.status, WantedStatus::Wanted);
        assert!(store.get_wanted("missing").unwrap().is_none());
    }

    #[test]
    fn test_list_and_count_with_filter() {
        let store = create_test_store();
        let first = gunslinger(&store);
        store
            .add_wanted(NewWantedItem::magazine("Wired", "2024-05"))
            .unwrap();
        snatch(&store, &first, "magnet:?xt=urn:btih:aaa");

        let wanted = store
            .list_wanted(&WantedFilter::new().with_status(WantedStatus::Wanted))
            .unwrap();
        assert_eq!(wanted.len(), 1);
        assert_eq!(wanted[0].title, "Wired");

        let books = WantedFilter::new().with_kind(ItemKind::Book);
        assert_eq!(store.count_wanted(&books).unwrap(), 1);
        assert_eq!(store.count_wanted(&WantedFilter::new()).unwrap(), 2);

        let page = store
            .list_wanted(&WantedFilter::new().with_limit(1).with_offset(1))
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].title, "Wired");
    }

    #[test]
    fn test_search_tokens_are_monotonic() {
        let store = create_test_store();
        let item = gunslinger(&store);

        let t1 = store.issue_search_token(&item.id).unwrap();
        let t2 = store.issue_search_token(&item.id).unwrap();
        assert!(t2 > t1);

        assert!(store.complete_search(&item.id, t2).unwrap());
        // The older cycle finished later: its write is skipped.
        assert!(!store.complete_search(&item.id, t1).unwrap());

        assert!(matches!(
            store.issue_search_token("missing"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_try_snatch_transitions_item() {
        let store = create_test_store();
        let item = gunslinger(&store);
        let record = snatch(&store, &item, "magnet:?xt=urn:btih:aaa");

        assert_eq!(record.status, SnatchStatus::Snatched);
        assert!(!record.is_dispatched());

        let item = store.get_wanted(&item.id).unwrap().unwrap();
        assert_eq!(item.status, WantedStatus::Snatched);
        assert_eq!(item.snatch_attempts, 1);
        assert_eq!(store.open_snatches().unwrap().len(), 1);
    }

    #[test]
    fn test_second_snatch_is_rejected() {
        let store = create_test_store();
        let item = gunslinger(&store);
        let t1 = store.issue_search_token(&item.id).unwrap();
        let t2 = store.issue_search_token(&item.id).unwrap();

        let first = store.try_snatch(&item.id, t2, new_snatch("a")).unwrap();
        assert!(matches!(first, SnatchOutcome::Snatched(_)));

        let second = store.try_snatch(&item.id, t1, new_snatch("b")).unwrap();
        assert!(matches!(second, SnatchOutcome::AlreadySnatched));
        assert_eq!(store.snatches_for(&item.id).unwrap().len(), 1);
    }

    #[test]
    fn test_superseded_cycle_cannot_snatch() {
        let store = create_test_store();
        let item = gunslinger(&store);
        let old = store.issue_search_token(&item.id).unwrap();
        let newer = store.issue_search_token(&item.id).unwrap();

        // The forced cycle completed without finding anything.
        assert!(store.complete_search(&item.id, newer).unwrap());

        let outcome = store.try_snatch(&item.id, old, new_snatch("a")).unwrap();
        assert!(matches!(outcome, SnatchOutcome::Superseded));
        assert_eq!(
            store.get_wanted(&item.id).unwrap().unwrap().status,
            WantedStatus::Wanted
        );
    }

    #[test]
    fn test_concurrent_snatches_create_one_record() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(SqliteLibraryStore::new(&temp.path().join("lib.db")).unwrap());
        let item = gunslinger(&store);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let id = item.id.clone();
                std::thread::spawn(move || {
                    let token = store.issue_search_token(&id).unwrap();
                    store
                        .try_snatch(&id, token, new_snatch(&format!("locator-{}", i)))
                        .unwrap()
                })
            })
            .collect();

        let snatched = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| matches!(o, SnatchOutcome::Snatched(_)))
            .count();

        assert_eq!(snatched, 1);
        assert_eq!(store.snatches_for(&item.id).unwrap().len(), 1);
    }

    #[test]
    fn test_set_client_id_and_dispatch_failures() {
        let store = create_test_store();
        let item = gunslinger(&store);
        let record = snatch(&store, &item, "a");

        assert_eq!(store.record_dispatch_failure(&record.id, "unreachable").unwrap(), 1);
        assert_eq!(store.record_dispatch_failure(&record.id, "unreachable").unwrap(), 2);

        let updated = store.set_client_id(&record.id, "abc123").unwrap();
        assert_eq!(updated.client_download_id.as_deref(), Some("abc123"));
        assert!(updated.failure_reason.is_none());
        assert_eq!(updated.dispatch_attempts, 2);
    }

    #[test]
    fn test_fail_snatch_reverts_then_fails_item() {
        let store = create_test_store();
        let item = gunslinger(&store);

        let first = snatch(&store, &item, "a");
        let status = store.fail_snatch(&first.id, "rejected", 2).unwrap();
        assert_eq!(status, WantedStatus::Wanted);
        assert!(store.failed_locators(&item.id).unwrap().contains("a"));

        let second = snatch(&store, &item, "b");
        let status = store.fail_snatch(&second.id, "rejected", 2).unwrap();
        assert_eq!(status, WantedStatus::Failed);

        // Failing twice is a conflict.
        assert!(matches!(
            store.fail_snatch(&second.id, "again", 2),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn test_enqueue_discovered_is_idempotent() {
        let store = create_test_store();
        let first = store
            .enqueue_discovered(PathBuf::from("/downloads/a.epub"), None)
            .unwrap();
        assert!(first.is_some());
        let again = store
            .enqueue_discovered(PathBuf::from("/downloads/a.epub"), None)
            .unwrap();
        assert!(again.is_none());

        let pending = store.pending_discovered(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].state, ReconcileState::Discovered);
    }

    #[test]
    fn test_save_discovered_cannot_record() {
        let store = create_test_store();
        let mut file = store
            .enqueue_discovered(PathBuf::from("/downloads/a.epub"), None)
            .unwrap()
            .unwrap();

        file.state = ReconcileState::Identified;
        file.wanted_id = Some("w".to_string());
        file.score = Some(95);
        store.save_discovered(&file).unwrap();
        let fetched = store.get_discovered(file.id).unwrap().unwrap();
        assert_eq!(fetched.state, ReconcileState::Identified);
        assert_eq!(fetched.score, Some(95));

        file.state = ReconcileState::Recorded;
        assert!(matches!(
            store.save_discovered(&file),
            Err(StoreError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_record_processed_requires_organized_match() {
        let temp = TempDir::new().unwrap();
        let library_file = temp.path().join("The Gunslinger - Stephen King.epub");
        std::fs::write(&library_file, b"epub").unwrap();

        let store = create_test_store();
        let item = gunslinger(&store);
        let record = snatch(&store, &item, "a");
        let mut file = store
            .enqueue_discovered(PathBuf::from("/downloads/a.epub"), Some(&record.id))
            .unwrap()
            .unwrap();

        let proof = RecordProof {
            discovered_id: file.id,
            wanted_id: item.id.clone(),
            file_path: library_file.clone(),
            score: 95,
            confirm_threshold: 90,
        };

        // Still Discovered: no identified file backs the write.
        assert!(matches!(
            store.record_processed(&proof),
            Err(StoreError::InvariantViolation(_))
        ));

        file.state = ReconcileState::Organized;
        file.wanted_id = Some(item.id.clone());
        file.score = Some(95);
        file.destination = Some(library_file.clone());
        store.save_discovered(&file).unwrap();

        let low = RecordProof {
            score: 80,
            ..proof.clone()
        };
        assert!(matches!(
            store.record_processed(&low),
            Err(StoreError::InvariantViolation(_))
        ));

        let processed = store.record_processed(&proof).unwrap();
        assert_eq!(processed.status, WantedStatus::Processed);
        assert_eq!(processed.file_path.as_deref(), Some(library_file.as_path()));

        let record = store.get_snatch(&record.id).unwrap().unwrap();
        assert_eq!(record.status, SnatchStatus::Processed);
        let file = store.get_discovered(file.id).unwrap().unwrap();
        assert_eq!(file.state, ReconcileState::Recorded);
        assert!(store.pending_discovered(10).unwrap().is_empty());
    }

    #[test]
    fn test_file_based_store() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("library.db");

        let id = {
            let store = SqliteLibraryStore::new(&path).unwrap();
            gunslinger(&store).id
        };

        let store = SqliteLibraryStore::new(&path).unwrap();
        assert!(store.get_wanted(&id).unwrap().is_some());
    }
}
