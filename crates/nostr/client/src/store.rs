//! SQLite-backed local event store with connection pooling.
//!
//! One writer connection serializes batch upserts; a small reader pool serves
//! `find`. Every batch is one transaction, so a failure part-way through
//! leaves nothing from that batch visible.

use crate::cache::{LocalEventStore, StoreResult};
use nostr::{Event, Filter};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, ToSql, params};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,
    /// Maximum number of reader connections
    pub max_reader_connections: u32,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_reader_connections: 4,
        }
    }
}

pub struct SqliteEventStore {
    writer: Pool<SqliteConnectionManager>,
    reader: Pool<SqliteConnectionManager>,
}

impl SqliteEventStore {
    /// Open (creating if needed) the database at `config.path`.
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        let writer = Pool::builder()
            .max_size(1)
            .build(manager(&config.path))?;
        let reader = Pool::builder()
            .max_size(config.max_reader_connections.max(1))
            .build(manager(&config.path))?;

        let conn = writer.get()?;
        Self::init_schema(&conn)?;
        info!("Event store opened at {:?}", config.path);

        Ok(Self { writer, reader })
    }

    fn init_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY CHECK (length(id) = 64),
                pubkey TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                kind INTEGER NOT NULL,
                raw_event TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at);
            CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind);
            CREATE INDEX IF NOT EXISTS idx_events_pubkey ON events(pubkey);

            CREATE TABLE IF NOT EXISTS event_tags (
                event_id TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
                tag_name TEXT NOT NULL,
                tag_value TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_event_tags_event_id ON event_tags(event_id);
            CREATE INDEX IF NOT EXISTS idx_event_tags_name_value ON event_tags(tag_name, tag_value);",
        )?;
        debug!("Event store schema initialized");
        Ok(())
    }

    fn reader(&self) -> StoreResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.reader.get()?)
    }

    fn writer(&self) -> StoreResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.writer.get()?)
    }

    pub fn count(&self) -> StoreResult<u64> {
        let conn = self.reader()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

fn manager(path: &Path) -> SqliteConnectionManager {
    SqliteConnectionManager::file(path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )
    })
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl LocalEventStore for SqliteEventStore {
    /// SQL narrows by kind and time range; `Filter::matches` applies prefix
    /// and tag constraints before the limit.
    fn find(&self, filter: &Filter) -> StoreResult<Vec<Event>> {
        let conn = self.reader()?;

        let mut sql = String::from("SELECT raw_event FROM events WHERE 1=1");
        let mut args: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(kinds) = &filter.kinds {
            if kinds.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; kinds.len()].join(", ");
            sql.push_str(&format!(" AND kind IN ({})", placeholders));
            args.extend(kinds.iter().map(|k| Box::new(*k) as Box<dyn ToSql>));
        }
        if let Some(since) = filter.since {
            sql.push_str(" AND created_at >= ?");
            args.push(Box::new(to_sql_int(since)));
        }
        if let Some(until) = filter.until {
            sql.push_str(" AND created_at <= ?");
            args.push(Box::new(to_sql_int(until)));
        }
        sql.push_str(" ORDER BY created_at DESC, id ASC");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            row.get::<_, String>(0)
        })?;

        let limit = filter.limit_usize().unwrap_or(usize::MAX);
        let mut events = Vec::new();
        for row in rows {
            let event: Event = serde_json::from_str(&row?)?;
            if filter.matches(&event) {
                events.push(event);
                if events.len() >= limit {
                    break;
                }
            }
        }
        Ok(events)
    }

    fn upsert_batch(&self, events: &[Event]) -> StoreResult<usize> {
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut insert_event = tx.prepare(
                "INSERT OR IGNORE INTO events (id, pubkey, created_at, kind, raw_event)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            let mut insert_tag = tx.prepare(
                "INSERT INTO event_tags (event_id, tag_name, tag_value) VALUES (?1, ?2, ?3)",
            )?;

            for event in events {
                let raw_event = serde_json::to_string(event)?;
                let changed = insert_event.execute(params![
                    &event.id,
                    &event.pubkey,
                    to_sql_int(event.created_at),
                    event.kind,
                    raw_event,
                ])?;
                if changed == 0 {
                    continue;
                }
                inserted += 1;
                for tag in event.tags.iter().filter(|t| !t.is_empty()) {
                    insert_tag.execute(params![&event.id, &tag[0], tag.get(1)])?;
                }
            }
        }
        tx.commit()?;

        debug!("Stored {} of {} events", inserted, events.len());
        Ok(inserted)
    }
}
