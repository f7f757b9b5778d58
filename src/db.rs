use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{Entry, EntryType, Payload};

pub const DEFAULT_DB_FILE: &str = "daylog.db";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_type TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    notes TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    metadata TEXT NOT NULL DEFAULT '{}',
    source TEXT NOT NULL DEFAULT 'manual',
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_entries_timestamp ON entries(timestamp);
CREATE INDEX IF NOT EXISTS idx_entries_type ON entries(entry_type);
";

/// Filters for [`Store::get_entries`]. Tag filtering is applied after the
/// fetch: an entry matches when any requested tag is present.
#[derive(Debug, Default, Clone)]
pub struct EntryQuery {
    pub entry_type: Option<EntryType>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub tags: Option<Vec<String>>,
    pub limit: Option<usize>,
}

impl EntryQuery {
    pub fn of_type(entry_type: EntryType) -> Self {
        EntryQuery {
            entry_type: Some(entry_type),
            ..Default::default()
        }
    }

    pub fn since(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn until(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// SQLite-backed entry store. Constructed once at startup and passed
/// explicitly to every operation; there is no ambient global handle.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %db_path.display(), "opened entry store");
        Ok(Store { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Store { conn })
    }

    pub fn add_entry(&self, entry: &Entry) -> Result<i64> {
        let tags = serde_json::to_string(&entry.tags)?;
        let metadata = serde_json::to_string(&entry.payload.to_value())?;
        self.conn.execute(
            "INSERT INTO entries (entry_type, timestamp, notes, tags, metadata, source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.entry_type.as_str(),
                entry.timestamp.to_rfc3339(),
                entry.notes,
                tags,
                metadata,
                entry.source,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_entries(&self, query: &EntryQuery) -> Result<Vec<Entry>> {
        let mut sql = String::from(
            "SELECT id, entry_type, timestamp, notes, tags, metadata, source
             FROM entries WHERE 1=1",
        );
        let mut args: Vec<String> = Vec::new();

        if let Some(entry_type) = query.entry_type {
            sql.push_str(" AND entry_type = ?");
            args.push(entry_type.as_str().to_string());
        }
        if let Some(start) = query.start {
            sql.push_str(" AND timestamp >= ?");
            args.push(start.to_rfc3339());
        }
        if let Some(end) = query.end {
            sql.push_str(" AND timestamp <= ?");
            args.push(end.to_rfc3339());
        }
        sql.push_str(" ORDER BY timestamp DESC");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(args.iter()))?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            let Some(entry) = decode_row(row) else {
                continue;
            };
            if let Some(wanted) = &query.tags {
                if !wanted.iter().any(|t| entry.tags.contains(t)) {
                    continue;
                }
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    pub fn get_entry(&self, id: i64) -> Result<Option<Entry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entry_type, timestamp, notes, tags, metadata, source
             FROM entries WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(decode_row(row)),
            None => Ok(None),
        }
    }

    /// Replaces an entry's metadata wholesale. Callers read, mutate a copy
    /// and write the whole payload back; there is no partial patch.
    pub fn update_entry_metadata(&self, id: i64, payload: &Payload) -> Result<()> {
        let metadata = serde_json::to_string(&payload.to_value())?;
        let changed = self
            .conn
            .execute("UPDATE entries SET metadata = ?1 WHERE id = ?2", params![metadata, id])?;
        if changed == 0 {
            return Err(Error::NotFound(id));
        }
        Ok(())
    }
}

fn decode_row(row: &rusqlite::Row<'_>) -> Option<Entry> {
    let id: i64 = row.get(0).ok()?;
    let type_raw: String = row.get(1).ok()?;
    let ts_raw: String = row.get(2).ok()?;
    let notes: String = row.get(3).ok()?;
    let tags_raw: String = row.get(4).ok()?;
    let metadata_raw: String = row.get(5).ok()?;
    let source: String = row.get(6).ok()?;

    let Some(entry_type) = EntryType::parse(&type_raw) else {
        warn!(id, entry_type = %type_raw, "skipping row with unknown entry type");
        return None;
    };
    let Ok(timestamp) = DateTime::parse_from_rfc3339(&ts_raw) else {
        warn!(id, "skipping row with unreadable timestamp");
        return None;
    };
    let tags: Vec<String> = serde_json::from_str(&tags_raw).unwrap_or_default();

    Some(Entry {
        id: Some(id),
        entry_type,
        timestamp: timestamp.with_timezone(&Utc),
        notes,
        tags,
        source,
        payload: Payload::decode(entry_type, &metadata_raw),
    })
}

pub fn default_db_path() -> PathBuf {
    PathBuf::from("./data").join(DEFAULT_DB_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RiskEntry, RiskType};
    use chrono::Duration;

    fn note(store: &Store, notes: &str, tags: &[&str]) -> i64 {
        let mut entry = Entry::new(EntryType::Note, notes);
        entry.tags = tags.iter().map(|t| t.to_string()).collect();
        store.add_entry(&entry).unwrap()
    }

    #[test]
    fn add_and_query_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let id = note(&store, "first note", &["a", "b"]);
        assert!(id > 0);

        let entries = store.get_entries(&EntryQuery::default()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].notes, "first note");
        assert_eq!(entries[0].tags, vec!["a", "b"]);
        assert_eq!(entries[0].source, "manual");
    }

    #[test]
    fn type_filter_and_ordering() {
        let store = Store::open_in_memory().unwrap();
        let mut older = Entry::new(EntryType::Trade, "older trade");
        older.timestamp = Utc::now() - Duration::hours(2);
        store.add_entry(&older).unwrap();
        note(&store, "newer note", &[]);
        let mut newest = Entry::new(EntryType::Trade, "newest trade");
        newest.timestamp = Utc::now() + Duration::hours(1);
        store.add_entry(&newest).unwrap();

        let trades = store
            .get_entries(&EntryQuery::of_type(EntryType::Trade))
            .unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].notes, "newest trade");
        assert_eq!(trades[1].notes, "older trade");
    }

    #[test]
    fn tag_filter_matches_any() {
        let store = Store::open_in_memory().unwrap();
        note(&store, "tagged", &["degen", "restaking"]);
        note(&store, "untagged", &[]);

        let query = EntryQuery {
            tags: Some(vec!["restaking".to_string(), "missing".to_string()]),
            ..Default::default()
        };
        let entries = store.get_entries(&query).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].notes, "tagged");
    }

    #[test]
    fn date_window_filter() {
        let store = Store::open_in_memory().unwrap();
        let mut old = Entry::new(EntryType::Note, "too old");
        old.timestamp = Utc::now() - Duration::days(10);
        store.add_entry(&old).unwrap();
        note(&store, "recent", &[]);

        let query = EntryQuery::default().since(Utc::now() - Duration::days(1));
        let entries = store.get_entries(&query).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].notes, "recent");
    }

    #[test]
    fn metadata_replace_is_wholesale() {
        let store = Store::open_in_memory().unwrap();
        let mut entry = Entry::new(EntryType::Risk, "nft buy");
        entry.payload = Payload::Risk(Box::new(RiskEntry::new(RiskType::Nft, 6.3)));
        let id = store.add_entry(&entry).unwrap();

        let mut risk = store
            .get_entry(id)
            .unwrap()
            .unwrap()
            .payload
            .risk()
            .cloned()
            .unwrap();
        risk.current_expected_value = Some(15.0);
        store
            .update_entry_metadata(id, &Payload::Risk(Box::new(risk)))
            .unwrap();

        let reloaded = store.get_entry(id).unwrap().unwrap();
        let reloaded_risk = reloaded.payload.risk().unwrap();
        assert_eq!(reloaded_risk.current_expected_value, Some(15.0));
        assert_eq!(reloaded_risk.entry_cost, 6.3);
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(DEFAULT_DB_FILE);
        let store = Store::open(&path).unwrap();
        note(&store, "persisted", &[]);
        assert!(path.exists());

        let reopened = Store::open(&path).unwrap();
        let entries = reopened.get_entries(&EntryQuery::default()).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn update_missing_entry_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .update_entry_metadata(42, &Payload::default())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(42)));
    }
}
