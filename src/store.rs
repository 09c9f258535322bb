//! SQLite-backed quote store and client table.
//!
//! The quote table is written only by the sync job; the client table only by
//! the rotation engine. Both are keyed by stable identity and survive
//! restarts. Client rotation orders are not stored, only their seeds.
//!
//! The connection sits behind `Arc<Mutex<_>>`. Every method takes the lock for
//! the duration of one statement or transaction and never across an `.await`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::error::Error;
use crate::quote::Quote;
use crate::rotation::ClientRecord;

const SCHEMA_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS quotes (
        id          TEXT PRIMARY KEY,
        content     TEXT NOT NULL,
        title       TEXT NOT NULL,
        author      TEXT NOT NULL,
        image_url   TEXT NULL,
        background  BLOB NULL,
        display     INTEGER NOT NULL DEFAULT 1,
        updated_at  TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_quotes_display ON quotes (display, id);

    CREATE TABLE IF NOT EXISTS clients (
        client_id        TEXT PRIMARY KEY,
        width            INTEGER NOT NULL,
        height           INTEGER NOT NULL,
        rotation_seed    INTEGER NOT NULL,
        shuffle_version  INTEGER NOT NULL,
        position         INTEGER NOT NULL DEFAULT 0,
        fingerprint      INTEGER NULL,
        current_quote_id TEXT NULL,
        created_at       TEXT NOT NULL
    );
"#;

/// Row counts reported by the status endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// All quotes, displayed or not
    pub quote_count: usize,
    /// Quotes with `display = true`
    pub eligible_count: usize,
    /// Registered clients
    pub client_count: usize,
}

/// Outcome of applying a full catalog from the content source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogChange {
    /// Quotes inserted or updated
    pub upserted: usize,
    /// Quotes removed because the source no longer lists them
    pub deleted: usize,
}

/// Durable quote and client storage.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (or create) a database file and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "Opened quote database");
        Self::with_connection(conn, Some(path.to_path_buf()))
    }

    /// In-memory database, used by tests and dry runs.
    pub fn in_memory() -> Result<Self, Error> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self, Error> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| Error::Storage(format!("schema init failed: {}", e)))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Database file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // ---- Quotes ----

    /// Insert or replace a quote by id.
    pub fn upsert_quote(&self, quote: &Quote) -> Result<(), Error> {
        let conn = self.conn.lock()?;
        upsert_quote(&conn, quote)
    }

    /// Delete a quote. Deleting an unknown id is a no-op.
    pub fn delete_quote(&self, id: &str) -> Result<bool, Error> {
        let conn = self.conn.lock()?;
        let deleted = conn.execute("DELETE FROM quotes WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    /// Fetch one quote including its background bytes.
    pub fn get_quote(&self, id: &str) -> Result<Option<Quote>, Error> {
        let conn = self.conn.lock()?;
        let quote = conn
            .query_row(
                "SELECT id, content, title, author, image_url, background, display
                 FROM quotes WHERE id = ?1",
                params![id],
                row_to_quote,
            )
            .optional()?;
        Ok(quote)
    }

    /// Ids of quotes with `display = true`, ascending.
    ///
    /// This is the canonical order every client permutation is derived from.
    pub fn eligible_ids(&self) -> Result<Vec<String>, Error> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM quotes WHERE display = 1 ORDER BY id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Ids of every stored quote, ascending.
    pub fn all_quote_ids(&self) -> Result<Vec<String>, Error> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM quotes ORDER BY id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Image URL and whether background bytes are stored, per quote id.
    ///
    /// Lets the sync job skip re-downloading unchanged images.
    pub fn image_index(&self) -> Result<Vec<(String, Option<String>, bool)>, Error> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, image_url, background IS NOT NULL FROM quotes ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Background bytes of a stored quote, if any.
    pub fn background(&self, id: &str) -> Result<Option<Vec<u8>>, Error> {
        let conn = self.conn.lock()?;
        let bytes = conn
            .query_row(
                "SELECT background FROM quotes WHERE id = ?1",
                params![id],
                |row| row.get::<_, Option<Vec<u8>>>(0),
            )
            .optional()?;
        Ok(bytes.flatten())
    }

    /// Replace the catalog with `quotes` in a single transaction.
    ///
    /// Every incoming quote is upserted; every stored quote missing from
    /// `quotes` is deleted. Either all of it applies or none of it does.
    pub fn apply_catalog(&self, quotes: &[Quote]) -> Result<CatalogChange, Error> {
        let mut conn = self.conn.lock()?;
        let tx = conn.transaction()?;

        for quote in quotes {
            upsert_quote(&tx, quote)?;
        }

        let stored: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM quotes")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };

        let mut deleted = 0;
        for id in stored {
            if !quotes.iter().any(|q| q.id == id) {
                deleted += tx.execute("DELETE FROM quotes WHERE id = ?1", params![id])?;
            }
        }

        tx.commit()?;
        Ok(CatalogChange {
            upserted: quotes.len(),
            deleted,
        })
    }

    /// Row counts.
    pub fn stats(&self) -> Result<StoreStats, Error> {
        let conn = self.conn.lock()?;
        let count = |sql: &str| -> Result<usize, Error> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };
        Ok(StoreStats {
            quote_count: count("SELECT COUNT(*) FROM quotes")?,
            eligible_count: count("SELECT COUNT(*) FROM quotes WHERE display = 1")?,
            client_count: count("SELECT COUNT(*) FROM clients")?,
        })
    }

    // ---- Clients ----

    /// Insert a client unless one with the same id exists.
    ///
    /// Returns `true` if the row was created.
    pub fn insert_client(&self, record: &ClientRecord) -> Result<bool, Error> {
        let conn = self.conn.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO clients
                (client_id, width, height, rotation_seed, shuffle_version,
                 position, fingerprint, current_quote_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.client_id,
                record.width,
                record.height,
                record.rotation_seed as i64,
                record.shuffle_version,
                record.position as i64,
                record.fingerprint.map(|f| f as i64),
                record.current_quote_id,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Overwrite a client's mutable fields.
    pub fn save_client(&self, record: &ClientRecord) -> Result<(), Error> {
        let conn = self.conn.lock()?;
        let updated = conn.execute(
            "UPDATE clients
             SET width = ?2, height = ?3, shuffle_version = ?4, position = ?5,
                 fingerprint = ?6, current_quote_id = ?7
             WHERE client_id = ?1",
            params![
                record.client_id,
                record.width,
                record.height,
                record.shuffle_version,
                record.position as i64,
                record.fingerprint.map(|f| f as i64),
                record.current_quote_id,
            ],
        )?;
        if updated == 0 {
            return Err(Error::ClientNotFound(record.client_id.clone()));
        }
        Ok(())
    }

    /// Load one client.
    pub fn load_client(&self, client_id: &str) -> Result<Option<ClientRecord>, Error> {
        let conn = self.conn.lock()?;
        let record = conn
            .query_row(
                "SELECT client_id, width, height, rotation_seed, shuffle_version,
                        position, fingerprint, current_quote_id
                 FROM clients WHERE client_id = ?1",
                params![client_id],
                row_to_client,
            )
            .optional()?;
        Ok(record)
    }

    /// All clients, ordered by id.
    pub fn list_clients(&self) -> Result<Vec<ClientRecord>, Error> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(
            "SELECT client_id, width, height, rotation_seed, shuffle_version,
                    position, fingerprint, current_quote_id
             FROM clients ORDER BY client_id ASC",
        )?;
        let records = stmt
            .query_map([], row_to_client)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

fn upsert_quote(conn: &Connection, quote: &Quote) -> Result<(), Error> {
    conn.execute(
        "INSERT INTO quotes (id, content, title, author, image_url, background, display, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
            content = excluded.content,
            title = excluded.title,
            author = excluded.author,
            image_url = excluded.image_url,
            background = excluded.background,
            display = excluded.display,
            updated_at = excluded.updated_at",
        params![
            quote.id,
            quote.text,
            quote.title,
            quote.author,
            quote.image_url,
            quote.background,
            quote.display,
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn row_to_quote(row: &Row<'_>) -> rusqlite::Result<Quote> {
    Ok(Quote {
        id: row.get(0)?,
        text: row.get(1)?,
        title: row.get(2)?,
        author: row.get(3)?,
        image_url: row.get(4)?,
        background: row.get(5)?,
        display: row.get(6)?,
    })
}

fn row_to_client(row: &Row<'_>) -> rusqlite::Result<ClientRecord> {
    Ok(ClientRecord {
        client_id: row.get(0)?,
        width: row.get(1)?,
        height: row.get(2)?,
        rotation_seed: row.get::<_, i64>(3)? as u64,
        shuffle_version: row.get(4)?,
        position: row.get::<_, i64>(5)?.max(0) as usize,
        fingerprint: row.get::<_, Option<i64>>(6)?.map(|f| f as u64),
        current_quote_id: row.get(7)?,
    })
}
