//! Storage layer for tally.
//!
//! Persists heartbeats and the identity directory using `rusqlite`, and
//! serves heartbeats to the aggregation engine through
//! [`EventStore`](tally_core::EventStore).
//!
//! # Thread Safety
//!
//! `rusqlite::Connection` is `Send` but not `Sync`. [`Database`] keeps its
//! connection behind a `Mutex` so one instance can back a
//! [`SummaryService`](tally_core::SummaryService) shared by many threads.
//! Statements are serialized; no connection pool.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 with millisecond precision
//! (e.g., `2025-01-15T09:00:00.000Z`). The fixed width keeps lexicographic
//! ordering equal to chronological ordering for years 0000 through 9999.
//! Heartbeats outside that range are not stored.
//!
//! ## Identities and Aliases
//!
//! `identities` holds canonical identities; `aliases` maps each alias to
//! exactly one identity. An alias may not share its name with an identity.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tally_core::{
    Alias, AliasResolver, EventStore, Heartbeat, IdentityId, StoreError, ValidationError, Window,
};
use thiserror::Error;

/// Lower bound for range queries reaching before year 0.
const EARLIEST: &str = "0000-01-01T00:00:00.000Z";
/// Upper bound for range queries reaching past year 9999.
const LATEST: &str = "9999-12-31T23:59:59.999Z";

/// Counts from [`Database::insert_heartbeats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Newly stored heartbeats.
    pub inserted: usize,
    /// Heartbeats whose ID was already stored.
    pub duplicates: usize,
    /// Heartbeats outside years 0000 through 9999.
    pub out_of_range: usize,
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to parse a stored heartbeat timestamp.
    #[error("invalid timestamp for heartbeat {heartbeat_id}: {timestamp}")]
    TimestampParse {
        heartbeat_id: String,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored or requested identity or alias is invalid.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The identity has not been registered.
    #[error("unknown identity: {0}")]
    UnknownIdentity(String),
    /// A range read ran past its deadline.
    #[error("read exceeded its deadline after {elapsed_ms}ms")]
    DeadlineExceeded { elapsed_ms: u64 },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
}

/// A registered identity with its aliases and heartbeat count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub id: IdentityId,
    pub aliases: Vec<Alias>,
    pub heartbeats: i64,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DbError> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.lock();
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS identities (
                id TEXT PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS aliases (
                alias TEXT PRIMARY KEY,
                identity_id TEXT NOT NULL,
                FOREIGN KEY (identity_id) REFERENCES identities(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_aliases_identity ON aliases(identity_id);

            -- Heartbeats: raw activity pings, never edited after insert
            -- timestamp: RFC 3339 with milliseconds (e.g., '2025-01-15T09:00:00.000Z')
            CREATE TABLE IF NOT EXISTS heartbeats (
                id TEXT PRIMARY KEY,
                identity_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                project TEXT,
                language TEXT,
                editor TEXT,
                machine TEXT,
                category TEXT,
                FOREIGN KEY (identity_id) REFERENCES identities(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_heartbeats_identity_time ON heartbeats(identity_id, timestamp);
            ",
        )?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers an identity. Returns `false` if it already existed.
    pub fn add_identity(&self, identity: &IdentityId) -> Result<bool, DbError> {
        let conn = self.lock();
        if alias_owner(&conn, identity.as_str())?.is_some() {
            return Err(ValidationError::AliasShadowsIdentity {
                alias: identity.to_string(),
            }
            .into());
        }
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO identities (id) VALUES (?)",
            [identity.as_str()],
        )?;
        Ok(inserted > 0)
    }

    /// Adds `alias` for `identity`. Returns `false` if it was already set.
    ///
    /// Fails if the identity is unknown, the alias names an identity, or
    /// the alias already belongs to someone else.
    pub fn add_alias(&self, identity: &IdentityId, alias: &Alias) -> Result<bool, DbError> {
        let conn = self.lock();
        if !identity_exists(&conn, identity.as_str())? {
            return Err(DbError::UnknownIdentity(identity.to_string()));
        }
        if identity_exists(&conn, alias.as_str())? {
            return Err(ValidationError::AliasShadowsIdentity {
                alias: alias.to_string(),
            }
            .into());
        }
        match alias_owner(&conn, alias.as_str())? {
            Some(owner) if owner == identity.as_str() => Ok(false),
            Some(owner) => Err(ValidationError::AliasConflict {
                alias: alias.to_string(),
                first: owner,
                second: identity.to_string(),
            }
            .into()),
            None => {
                conn.execute(
                    "INSERT INTO aliases (alias, identity_id) VALUES (?, ?)",
                    params![alias.as_str(), identity.as_str()],
                )?;
                Ok(true)
            }
        }
    }

    /// Lists identities ordered by ID, with their aliases and heartbeat counts.
    pub fn list_identities(&self) -> Result<Vec<IdentityRecord>, DbError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "
            SELECT i.id, COUNT(h.id)
            FROM identities i
            LEFT JOIN heartbeats h ON h.identity_id = i.id
            GROUP BY i.id
            ORDER BY i.id ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        let mut identities = Vec::new();
        for row in rows {
            let (id, heartbeats) = row?;
            identities.push(IdentityRecord {
                id: IdentityId::new(id)?,
                aliases: Vec::new(),
                heartbeats,
            });
        }

        let mut stmt = conn.prepare("SELECT identity_id, alias FROM aliases ORDER BY alias ASC")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        for row in rows {
            let (owner, alias) = row?;
            if let Some(record) = identities.iter_mut().find(|r| r.id.as_str() == owner) {
                record.aliases.push(Alias::new(alias)?);
            }
        }
        Ok(identities)
    }

    /// Builds an alias resolver from the identity directory.
    pub fn alias_resolver(&self) -> Result<AliasResolver, DbError> {
        let relations = self
            .list_identities()?
            .into_iter()
            .map(|record| (record.id, record.aliases));
        Ok(AliasResolver::new(relations)?)
    }

    /// Inserts a batch of heartbeats, ignoring duplicates by ID.
    ///
    /// Owning identities are registered as needed. Heartbeats with
    /// timestamps outside years 0000 through 9999 are skipped and counted
    /// separately from duplicates.
    pub fn insert_heartbeats(&self, heartbeats: &[Heartbeat]) -> Result<InsertOutcome, DbError> {
        let mut outcome = InsertOutcome::default();
        if heartbeats.is_empty() {
            return Ok(outcome);
        }
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut register = tx.prepare("INSERT OR IGNORE INTO identities (id) VALUES (?)")?;
            let mut stmt = tx.prepare(
                "
                INSERT OR IGNORE INTO heartbeats
                (id, identity_id, timestamp, project, language, editor, machine, category)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )?;
            for heartbeat in heartbeats {
                if !storable(heartbeat.timestamp) {
                    tracing::warn!(
                        heartbeat_id = %heartbeat.id,
                        timestamp = %heartbeat.timestamp,
                        "skipping heartbeat outside the storable time range"
                    );
                    outcome.out_of_range += 1;
                    continue;
                }
                if alias_owner(&tx, heartbeat.identity.as_str())?.is_some() {
                    return Err(ValidationError::AliasShadowsIdentity {
                        alias: heartbeat.identity.to_string(),
                    }
                    .into());
                }
                register.execute([heartbeat.identity.as_str()])?;
                let added = stmt.execute(params![
                    heartbeat.id,
                    heartbeat.identity.as_str(),
                    format_timestamp(heartbeat.timestamp),
                    heartbeat.project,
                    heartbeat.language,
                    heartbeat.editor,
                    heartbeat.machine,
                    heartbeat.category,
                ])?;
                if added == 0 {
                    outcome.duplicates += 1;
                } else {
                    outcome.inserted += added;
                }
            }
        }
        tx.commit()?;
        Ok(outcome)
    }

    /// Lists heartbeats of `identity` within `range`, ordered by timestamp.
    ///
    /// Heartbeats sharing a timestamp come back in the order they were stored.
    ///
    /// The range is inclusive of `from` and exclusive of `to`. Rows with
    /// unparsable timestamps are skipped. Fails with
    /// [`DbError::DeadlineExceeded`] once `deadline` passes.
    pub fn read_heartbeats(
        &self,
        identity: &IdentityId,
        range: &Window,
        deadline: Instant,
    ) -> Result<Vec<Heartbeat>, DbError> {
        let started = Instant::now();
        let exceeded = || DbError::DeadlineExceeded {
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        if started >= deadline {
            return Err(exceeded());
        }

        let conn = self.lock();
        let mut stmt = conn.prepare(
            "
            SELECT id, timestamp, project, language, editor, machine, category
            FROM heartbeats
            WHERE identity_id = ? AND timestamp >= ? AND timestamp < ?
            ORDER BY timestamp ASC, rowid ASC
            ",
        )?;
        let mut rows = stmt.query(params![
            identity.as_str(),
            format_bound(range.from),
            format_bound(range.to),
        ])?;

        let mut heartbeats = Vec::new();
        while let Some(row) = rows.next()? {
            if Instant::now() >= deadline {
                return Err(exceeded());
            }
            let id: String = row.get(0)?;
            let raw: String = row.get(1)?;
            let timestamp = match parse_timestamp(&raw, &id) {
                Ok(timestamp) => timestamp,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping heartbeat");
                    continue;
                }
            };
            heartbeats.push(Heartbeat {
                id,
                identity: identity.clone(),
                timestamp,
                project: row.get(2)?,
                language: row.get(3)?,
                editor: row.get(4)?,
                machine: row.get(5)?,
                category: row.get(6)?,
            });
        }
        Ok(heartbeats)
    }
}

impl EventStore for Database {
    fn read_events(
        &self,
        identity: &IdentityId,
        range: &Window,
        deadline: Instant,
    ) -> Result<Vec<Heartbeat>, StoreError> {
        self.read_heartbeats(identity, range, deadline)
            .map_err(|err| match err {
                DbError::DeadlineExceeded { elapsed_ms } => StoreError::Timeout { elapsed_ms },
                other => StoreError::Unavailable(other.to_string()),
            })
    }
}

fn identity_exists(conn: &Connection, id: &str) -> Result<bool, DbError> {
    let found = conn
        .query_row("SELECT 1 FROM identities WHERE id = ?", [id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

fn alias_owner(conn: &Connection, alias: &str) -> Result<Option<String>, DbError> {
    Ok(conn
        .query_row(
            "SELECT identity_id FROM aliases WHERE alias = ?",
            [alias],
            |row| row.get(0),
        )
        .optional()?)
}

fn storable(timestamp: DateTime<Utc>) -> bool {
    (0..=9999).contains(&timestamp.year())
}

fn parse_timestamp(timestamp: &str, heartbeat_id: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            heartbeat_id: heartbeat_id.to_string(),
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn format_bound(timestamp: DateTime<Utc>) -> String {
    match timestamp.year() {
        year if year < 0 => EARLIEST.to_string(),
        year if year > 9999 => LATEST.to_string(),
        _ => format_timestamp(timestamp),
    }
}
