// weather_collector - Periodic collector of OpenWeather observations
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::observation::{EntityKey, Observation, Reading};
use chrono::{DateTime, Local, SecondsFormat, Utc};
use rusqlite::{params, Connection, OpenFlags};
use std::error;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Encoding(serde_json::Error),
    Corrupt(String),
    Unavailable(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "sqlite: {}", e),
            Self::Encoding(e) => write!(f, "encoding: {}", e),
            Self::Corrupt(reason) => write!(f, "corrupt record: {}", reason),
            Self::Unavailable(reason) => write!(f, "store unavailable: {}", reason),
        }
    }
}

impl error::Error for StoreError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Sqlite(e) => Some(e),
            Self::Encoding(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Encoding(e)
    }
}

/// Append-only destination for observations, addressed by city key.
///
/// Implementations only ever insert: an append never replaces, merges with,
/// or deduplicates against earlier observations for the same key.
pub trait ObservationStore: Send + Sync {
    fn append(&self, key: &EntityKey, obs: &Observation) -> Result<(), StoreError>;
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StoreError> {
    conn.lock().map_err(|e| StoreError::Unavailable(e.to_string()))
}

// Fixed-width UTC, so that lexical ordering of the column is chronological
// even across local UTC offset changes. Documents keep the local time.
fn timestamp_column(ts: &DateTime<Local>) -> String {
    ts.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Micros, true)
}

// Fails if the file does not exist; never creates a database or schema.
fn open_read_only(path: &str) -> Result<Connection, StoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    Ok(Connection::open_with_flags(path, flags)?)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Local>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Local))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{}': {}", raw, e)))
}

/// Document store with one logical collection per city.
///
/// Each document is the JSON form of an `Observation`. The collection name is
/// the city's `EntityKey`.
#[derive(Debug)]
pub struct DocumentStore {
    conn: Mutex<Connection>,
}

impl DocumentStore {
    pub const DEFAULT_PATH: &'static str = "weather_documents.db";

    /// Open (or create) the database at `path` and ensure the schema exists.
    /// `":memory:"` gives a private in-memory database.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                timestamp  TEXT NOT NULL,
                body       TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS documents_by_collection
                ON documents (collection, timestamp, id);",
        )?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an existing database at `path` for reading only. Appends fail.
    pub fn open_read_only(path: &str) -> Result<Self, StoreError> {
        Ok(Self {
            conn: Mutex::new(open_read_only(path)?),
        })
    }

    /// Names of every collection holding at least one document, sorted.
    pub fn collections(&self) -> Result<Vec<String>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare("SELECT DISTINCT collection FROM documents ORDER BY collection ASC")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(names)
    }

    /// Every document in the collection, oldest first.
    pub fn history(&self, key: &EntityKey) -> Result<Vec<Observation>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT body FROM documents WHERE collection = ?1 ORDER BY timestamp ASC, id ASC",
        )?;
        let bodies = stmt
            .query_map(params![key.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        bodies
            .iter()
            .map(|b| serde_json::from_str(b).map_err(StoreError::from))
            .collect()
    }

    /// The `limit` most recent documents in the collection, newest first.
    pub fn latest(&self, key: &EntityKey, limit: usize) -> Result<Vec<Observation>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT body FROM documents WHERE collection = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )?;
        let bodies = stmt
            .query_map(params![key.as_str(), limit as i64], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        bodies
            .iter()
            .map(|b| serde_json::from_str(b).map_err(StoreError::from))
            .collect()
    }
}

impl ObservationStore for DocumentStore {
    fn append(&self, key: &EntityKey, obs: &Observation) -> Result<(), StoreError> {
        let body = serde_json::to_string(obs)?;
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO documents (collection, timestamp, body) VALUES (?1, ?2, ?3)",
            params![key.as_str(), timestamp_column(&obs.captured_at), body],
        )?;

        Ok(())
    }
}

/// Relational store: a single `weather` table with one row per observation.
///
/// The `city` column holds the city's `EntityKey`. A CHECK constraint rejects
/// rows that carry both a reading and an error, or neither.
#[derive(Debug)]
pub struct RelationalStore {
    conn: Mutex<Connection>,
}

impl RelationalStore {
    pub const DEFAULT_RECENT: usize = 5;

    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS weather (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                city        TEXT NOT NULL,
                timestamp   TEXT NOT NULL,
                temperature REAL,
                description TEXT,
                error       TEXT,
                CHECK (
                    (temperature IS NOT NULL AND description IS NOT NULL AND error IS NULL)
                    OR (temperature IS NULL AND description IS NULL AND error IS NOT NULL)
                )
            );
            CREATE INDEX IF NOT EXISTS weather_by_timestamp ON weather (timestamp);",
        )?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an existing database at `path` for reading only. Appends fail.
    pub fn open_read_only(path: &str) -> Result<Self, StoreError> {
        Ok(Self {
            conn: Mutex::new(open_read_only(path)?),
        })
    }

    /// The `limit` most recent rows across all cities, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<Observation>, StoreError> {
        self.select(
            "SELECT city, timestamp, temperature, description, error FROM weather
             ORDER BY timestamp DESC, id DESC LIMIT ?1",
            Some(limit),
        )
    }

    /// Every row, oldest first.
    pub fn all(&self) -> Result<Vec<Observation>, StoreError> {
        self.select(
            "SELECT city, timestamp, temperature, description, error FROM weather
             ORDER BY timestamp ASC, id ASC",
            None,
        )
    }

    fn select(&self, sql: &str, limit: Option<usize>) -> Result<Vec<Observation>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(sql)?;
        let rows = match limit {
            Some(n) => stmt
                .query_map(params![n as i64], weather_row)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map([], weather_row)?.collect::<Result<Vec<_>, _>>()?,
        };

        rows.into_iter()
            .map(|(city, timestamp, temperature, description, error)| {
                let reading = match (temperature, description, error) {
                    (Some(temperature), Some(description), None) => Reading::Conditions {
                        temperature,
                        description,
                    },
                    (None, None, Some(error)) => Reading::Failed { error },
                    _ => return Err(StoreError::Corrupt(format!("row for {} at {}", city, timestamp))),
                };

                Ok(Observation {
                    captured_at: parse_timestamp(&timestamp)?,
                    city,
                    reading,
                })
            })
            .collect()
    }
}

type WeatherRow = (String, String, Option<f64>, Option<String>, Option<String>);

fn weather_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WeatherRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

impl ObservationStore for RelationalStore {
    fn append(&self, key: &EntityKey, obs: &Observation) -> Result<(), StoreError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO weather (city, timestamp, temperature, description, error)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key.as_str(),
                timestamp_column(&obs.captured_at),
                obs.temperature(),
                obs.description(),
                obs.error(),
            ],
        )?;

        Ok(())
    }
}

/// Every configured backend: the document store and, when enabled, the
/// relational store. An append is attempted on each backend even when an
/// earlier one fails; the first failure is returned.
#[derive(Debug)]
pub struct StoreSet {
    documents: Arc<DocumentStore>,
    relational: Option<Arc<RelationalStore>>,
}

impl StoreSet {
    pub fn new(documents: Arc<DocumentStore>, relational: Option<Arc<RelationalStore>>) -> Self {
        Self { documents, relational }
    }
}

impl ObservationStore for StoreSet {
    fn append(&self, key: &EntityKey, obs: &Observation) -> Result<(), StoreError> {
        let documents = self.documents.append(key, obs);
        let relational = match &self.relational {
            Some(r) => r.append(key, obs),
            None => Ok(()),
        };

        documents.and(relational)
    }
}
