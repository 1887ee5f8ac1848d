//! Database repository layer
//!
//! Provides query and mutation operations for captures and profiles.

use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// The outbox as seen by the sync orchestrator.
///
/// Query-by-status and mutate-by-id. Implemented by [`Database`]; tests swap in
/// wrappers to inject persistence failures.
pub trait QueueStore: Send + Sync {
    /// Records in any of `statuses`, in queue insertion order
    fn captures_with_status(&self, statuses: &[SyncStatus]) -> Result<Vec<CaptureRecord>>;

    /// Look up a single record
    fn get_capture(&self, id: &Uuid) -> Result<Option<CaptureRecord>>;

    /// Persist every mutable field of an existing record
    fn save_capture(&self, record: &CaptureRecord) -> Result<()>;
}

/// Per-status record counts for status displays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: i64,
    pub in_progress: i64,
    pub success: i64,
    pub failed: i64,
    /// Unsent records held back by the auth latch
    pub hard_errors: i64,
}

impl StatusCounts {
    /// Records not yet delivered
    pub fn unsent(&self) -> i64 {
        self.pending + self.in_progress + self.failed
    }
}

/// Database handle (single connection)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    // ============================================
    // Capture operations
    // ============================================

    /// Insert a new capture record
    pub fn insert_capture(&self, record: &CaptureRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO captures (id, content, kind, status, created_at, sent_at,
                                  last_attempt_at, next_attempt_at, attempt_count,
                                  stamp_at, hard_error, last_error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                record.id.to_string(),
                record.content,
                record.kind.as_str(),
                record.status.as_str(),
                format_timestamp(record.created_at),
                record.sent_at.map(format_timestamp),
                record.last_attempt_at.map(format_timestamp),
                record.next_attempt_at.map(format_timestamp),
                record.attempt_count,
                record.stamp_at.map(format_timestamp),
                record.hard_error,
                record.last_error,
            ],
        )?;
        Ok(())
    }

    /// Most recent captures first (history view)
    pub fn list_captures(&self, limit: usize) -> Result<Vec<CaptureRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM captures ORDER BY created_at DESC, rowid DESC LIMIT ?")?;
        let rows = stmt.query_map([limit as i64], Self::row_to_capture)?;
        collect_decodable(rows)
    }

    /// Run raw SQL against the connection, for tests that need rows the
    /// typed API refuses to write.
    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute(sql, [])?)
    }

    /// Delete a capture on explicit user request.
    ///
    /// Returns false when no such record exists.
    pub fn delete_capture(&self, id: &Uuid) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute("DELETE FROM captures WHERE id = ?", [id.to_string()])?;
        Ok(changed > 0)
    }

    /// Count records per status
    pub fn status_counts(&self) -> Result<StatusCounts> {
        let conn = self.conn.lock().unwrap();
        let mut counts = StatusCounts::default();

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM captures GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            match status.parse::<SyncStatus>() {
                Ok(SyncStatus::Pending) => counts.pending = count,
                Ok(SyncStatus::InProgress) => counts.in_progress = count,
                Ok(SyncStatus::Success) => counts.success = count,
                Ok(SyncStatus::Failed) => counts.failed = count,
                Err(e) => tracing::warn!(error = %e, "Skipping unknown status in counts"),
            }
        }

        counts.hard_errors = conn.query_row(
            "SELECT COUNT(*) FROM captures WHERE hard_error = 1 AND status != 'success'",
            [],
            |r| r.get(0),
        )?;

        Ok(counts)
    }

    /// Release the auth latch on every unsent record.
    ///
    /// Called when the credential or destination changes. Returns the number
    /// of records released.
    pub fn clear_hard_errors(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE captures SET hard_error = 0, next_attempt_at = NULL \
             WHERE hard_error = 1 AND status != 'success'",
            [],
        )?;
        Ok(changed)
    }

    fn row_to_capture(row: &Row) -> rusqlite::Result<CaptureRecord> {
        let id_str: String = row.get("id")?;
        let kind_str: String = row.get("kind")?;
        let status_str: String = row.get("status")?;
        let created_at_str: String = row.get("created_at")?;

        let id = Uuid::parse_str(&id_str).map_err(|e| corrupt(&id_str, format!("id: {}", e)))?;

        Ok(CaptureRecord {
            id,
            content: row.get("content")?,
            kind: kind_str
                .parse()
                .map_err(|e| corrupt(&id_str, format!("kind: {}", e)))?,
            status: status_str
                .parse()
                .map_err(|e| corrupt(&id_str, format!("status: {}", e)))?,
            created_at: parse_required_timestamp(&id_str, "created_at", &created_at_str)?,
            sent_at: parse_timestamp(&id_str, "sent_at", row.get("sent_at")?)?,
            last_attempt_at: parse_timestamp(
                &id_str,
                "last_attempt_at",
                row.get("last_attempt_at")?,
            )?,
            next_attempt_at: parse_timestamp(
                &id_str,
                "next_attempt_at",
                row.get("next_attempt_at")?,
            )?,
            attempt_count: row.get("attempt_count")?,
            stamp_at: parse_timestamp(&id_str, "stamp_at", row.get("stamp_at")?)?,
            hard_error: row.get("hard_error")?,
            last_error: row.get("last_error")?,
        })
    }

    // ============================================
    // Profile operations
    // ============================================

    /// Get the profile for a device identity
    pub fn get_profile(&self, id: &str) -> Result<Option<Profile>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM profiles WHERE id = ?", [id], |row| {
            Self::row_to_profile(row)
        })
        .optional()
        .map_err(Error::from)
    }

    /// Insert or update a profile
    pub fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO profiles (id, graph_name, api_token, default_tag, add_timestamp,
                                  use_daily_notes, custom_location, custom_block,
                                  share_format_links)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                graph_name = excluded.graph_name,
                api_token = excluded.api_token,
                default_tag = excluded.default_tag,
                add_timestamp = excluded.add_timestamp,
                use_daily_notes = excluded.use_daily_notes,
                custom_location = excluded.custom_location,
                custom_block = excluded.custom_block,
                share_format_links = excluded.share_format_links
            "#,
            params![
                profile.id,
                profile.graph_name,
                profile.api_token,
                profile.default_tag,
                profile.add_timestamp,
                profile.use_daily_notes,
                profile.custom_location,
                profile.custom_block,
                profile.share_format_links,
            ],
        )?;
        Ok(())
    }

    fn row_to_profile(row: &Row) -> rusqlite::Result<Profile> {
        Ok(Profile {
            id: row.get("id")?,
            graph_name: row.get("graph_name")?,
            api_token: row.get("api_token")?,
            default_tag: row.get("default_tag")?,
            add_timestamp: row.get("add_timestamp")?,
            use_daily_notes: row.get("use_daily_notes")?,
            custom_location: row.get("custom_location")?,
            custom_block: row.get("custom_block")?,
            share_format_links: row.get("share_format_links")?,
        })
    }
}

impl QueueStore for Database {
    fn captures_with_status(&self, statuses: &[SyncStatus]) -> Result<Vec<CaptureRecord>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT * FROM captures WHERE status IN ({}) ORDER BY created_at, rowid",
            placeholders
        );

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(statuses.iter().map(|s| s.as_str())),
            Self::row_to_capture,
        )?;
        collect_decodable(rows)
    }

    fn get_capture(&self, id: &Uuid) -> Result<Option<CaptureRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM captures WHERE id = ?",
            [id.to_string()],
            Self::row_to_capture,
        )
        .optional()
        .map_err(decode_error)
    }

    fn save_capture(&self, record: &CaptureRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"
            UPDATE captures SET
                status = ?2,
                sent_at = ?3,
                last_attempt_at = ?4,
                next_attempt_at = ?5,
                attempt_count = ?6,
                stamp_at = ?7,
                hard_error = ?8,
                last_error = ?9
            WHERE id = ?1
            "#,
            params![
                record.id.to_string(),
                record.status.as_str(),
                record.sent_at.map(format_timestamp),
                record.last_attempt_at.map(format_timestamp),
                record.next_attempt_at.map(format_timestamp),
                record.attempt_count,
                record.stamp_at.map(format_timestamp),
                record.hard_error,
                record.last_error,
            ],
        )?;

        if changed == 0 {
            return Err(Error::NotFound(record.id.to_string()));
        }
        Ok(())
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_required_timestamp(
    id: &str,
    column: &str,
    value: &str,
) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| corrupt(id, format!("{}: {}", column, e)))
}

fn parse_timestamp(
    id: &str,
    column: &str,
    value: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value
        .map(|s| parse_required_timestamp(id, column, &s))
        .transpose()
}

/// A capture row whose text columns do not decode.
#[derive(Debug)]
struct CorruptRow {
    id: String,
    message: String,
}

impl fmt::Display for CorruptRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record {}: {}", self.id, self.message)
    }
}

impl std::error::Error for CorruptRow {}

fn corrupt(id: &str, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        Type::Text,
        Box::new(CorruptRow {
            id: id.to_string(),
            message,
        }),
    )
}

fn decode_error(e: rusqlite::Error) -> Error {
    match e {
        rusqlite::Error::FromSqlConversionFailure(column, ty, inner) => {
            match inner.downcast::<CorruptRow>() {
                Ok(row) => Error::Corrupt {
                    id: row.id,
                    message: row.message,
                },
                Err(inner) => Error::Database(rusqlite::Error::FromSqlConversionFailure(
                    column, ty, inner,
                )),
            }
        }
        other => Error::Database(other),
    }
}

/// Collect decoded rows, skipping corrupt ones. Any other database error
/// fails the whole query.
fn collect_decodable(
    rows: impl Iterator<Item = rusqlite::Result<CaptureRecord>>,
) -> Result<Vec<CaptureRecord>> {
    let mut records = Vec::new();
    for row in rows {
        match row.map_err(decode_error) {
            Ok(record) => records.push(record),
            Err(Error::Corrupt { id, message }) => {
                warn!(record_id = %id, error = %message, "Skipping undecodable capture");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn test_insert_and_get_capture() {
        let db = test_db();
        let record = CaptureRecord::todo("Call the bank");
        db.insert_capture(&record).unwrap();

        let loaded = db.get_capture(&record.id).unwrap().unwrap();
        assert_eq!(loaded.content, "Call the bank");
        assert_eq!(loaded.kind, CaptureKind::Todo);
        assert_eq!(loaded.status, SyncStatus::Pending);
        assert_eq!(loaded.attempt_count, 0);
        assert!(!loaded.hard_error);
        assert!(loaded.next_attempt_at.is_none());
    }

    #[test]
    fn test_get_missing_capture() {
        let db = test_db();
        assert!(db.get_capture(&Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_captures_with_status_keeps_insertion_order() {
        let db = test_db();
        let base = Utc::now();

        let mut first = CaptureRecord::note("first");
        first.created_at = base - Duration::seconds(30);
        let mut second = CaptureRecord::note("second");
        second.created_at = base - Duration::seconds(20);
        second.status = SyncStatus::InProgress;
        let mut third = CaptureRecord::note("third");
        third.created_at = base - Duration::seconds(10);
        third.status = SyncStatus::Success;

        // Inserted out of order on purpose
        db.insert_capture(&third).unwrap();
        db.insert_capture(&second).unwrap();
        db.insert_capture(&first).unwrap();

        let open = db
            .captures_with_status(&[SyncStatus::Pending, SyncStatus::InProgress])
            .unwrap();
        let contents: Vec<_> = open.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);

        let pending_only = db.captures_with_status(&[SyncStatus::Pending]).unwrap();
        assert_eq!(pending_only.len(), 1);
        assert!(db.captures_with_status(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_save_capture_persists_retry_state() {
        let db = test_db();
        let mut record = CaptureRecord::note("retry me");
        db.insert_capture(&record).unwrap();

        let now = Utc::now();
        record.status = SyncStatus::Pending;
        record.attempt_count = 3;
        record.last_attempt_at = Some(now);
        record.next_attempt_at = Some(now + Duration::seconds(8));
        record.stamp_at = Some(now - Duration::minutes(5));
        record.last_error = Some("HTTP 503".to_string());
        db.save_capture(&record).unwrap();

        let loaded = db.get_capture(&record.id).unwrap().unwrap();
        assert_eq!(loaded.attempt_count, 3);
        assert_eq!(
            loaded.next_attempt_at.map(|t| t.timestamp()),
            Some((now + Duration::seconds(8)).timestamp())
        );
        assert_eq!(loaded.last_error.as_deref(), Some("HTTP 503"));
        assert!(loaded.stamp_at.is_some());
    }

    #[test]
    fn test_save_missing_capture_is_not_found() {
        let db = test_db();
        let record = CaptureRecord::note("never inserted");
        assert!(matches!(
            db.save_capture(&record),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_unknown_status_is_reported_as_corrupt() {
        let db = test_db();
        let record = CaptureRecord::note("tampered");
        db.insert_capture(&record).unwrap();
        db.execute_raw(&format!(
            "UPDATE captures SET status = 'archived' WHERE id = '{}'",
            record.id
        ))
        .unwrap();

        match db.get_capture(&record.id) {
            Err(Error::Corrupt { id, message }) => {
                assert_eq!(id, record.id.to_string());
                assert!(message.contains("status"), "unexpected message: {message}");
            }
            other => panic!("expected corrupt record, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupt_rows_are_skipped_by_queries() {
        let db = test_db();
        let good = CaptureRecord::note("good");
        let bad = CaptureRecord::note("bad");
        db.insert_capture(&good).unwrap();
        db.insert_capture(&bad).unwrap();
        db.execute_raw(&format!(
            "UPDATE captures SET created_at = 'yesterday' WHERE id = '{}'",
            bad.id
        ))
        .unwrap();

        let open = db.captures_with_status(&[SyncStatus::Pending]).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, good.id);

        let listed = db.list_captures(10).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(matches!(
            db.get_capture(&bad.id),
            Err(Error::Corrupt { .. })
        ));
    }

    #[test]
    fn test_list_and_delete_captures() {
        let db = test_db();
        let mut old = CaptureRecord::note("old");
        old.created_at = Utc::now() - Duration::hours(1);
        let new = CaptureRecord::note("new");
        db.insert_capture(&old).unwrap();
        db.insert_capture(&new).unwrap();

        let history = db.list_captures(10).unwrap();
        assert_eq!(history[0].content, "new");
        assert_eq!(history[1].content, "old");
        assert_eq!(db.list_captures(1).unwrap().len(), 1);

        assert!(db.delete_capture(&old.id).unwrap());
        assert!(!db.delete_capture(&old.id).unwrap());
        assert_eq!(db.list_captures(10).unwrap().len(), 1);
    }

    #[test]
    fn test_status_counts_and_clear_hard_errors() {
        let db = test_db();

        let mut latched = CaptureRecord::note("latched");
        latched.hard_error = true;
        latched.last_error = Some("HTTP 401".to_string());
        let mut sent = CaptureRecord::note("sent");
        sent.status = SyncStatus::Success;
        let pending = CaptureRecord::note("pending");

        db.insert_capture(&latched).unwrap();
        db.insert_capture(&sent).unwrap();
        db.insert_capture(&pending).unwrap();

        let counts = db.status_counts().unwrap();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.success, 1);
        assert_eq!(counts.hard_errors, 1);
        assert_eq!(counts.unsent(), 2);

        assert_eq!(db.clear_hard_errors().unwrap(), 1);
        assert!(!db.get_capture(&latched.id).unwrap().unwrap().hard_error);
        assert_eq!(db.status_counts().unwrap().hard_errors, 0);
    }

    #[test]
    fn test_profile_upsert() {
        let db = test_db();
        assert!(db.get_profile("device-1").unwrap().is_none());

        let mut profile = Profile::new("device-1");
        db.upsert_profile(&profile).unwrap();
        let loaded = db.get_profile("device-1").unwrap().unwrap();
        assert!(loaded.use_daily_notes);
        assert!(!loaded.add_timestamp);

        profile.graph_name = Some("work".to_string());
        profile.custom_block = Some("Inbox".to_string());
        profile.use_daily_notes = false;
        db.upsert_profile(&profile).unwrap();

        let loaded = db.get_profile("device-1").unwrap().unwrap();
        assert_eq!(loaded, profile);
    }
}
