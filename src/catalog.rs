//! Durable catalog: per-file record plus the volume table (spec.md §3, §4.1).
//!
//! Backed by `rusqlite`. Every mutation goes through `&mut self` methods on
//! `Catalog`; callers share one `Catalog` behind a `Mutex` (see
//! `driver::Run`), which gives the "exclusive lock on every mutation"
//! discipline spec.md §4.1 asks for without a dedicated writer thread.

use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub path: String,
    pub mtime: i64,
    pub volume: i64,
}

/// Cheap to `Clone` (an `Arc` around the connection); every method locks
/// the connection only for its own call, so sharing one `Catalog` between
/// the driver's walk and the ack reader thread never holds the lock across
/// a blocking pipe write (see `driver::Run::execute`).
#[derive(Clone)]
pub struct Catalog {
    conn: Arc<Mutex<Connection>>,
}

impl Catalog {
    /// Open or create the catalog at `path`. Creates all three relations
    /// and seeds `schema.version = 1` if the schema table is absent or
    /// empty (spec.md §4.1 `open`).
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| Error::CatalogOpen {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        catalog.init_schema()?;
        Ok(catalog)
    }

    /// In-memory catalog, used by tests that don't want a temp file.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::CatalogOpen {
            path: Path::new(":memory:").to_path_buf(),
            source,
        })?;
        let catalog = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        catalog.init_schema()?;
        Ok(catalog)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("catalog connection mutex poisoned");
        conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS files (
                    name TEXT UNIQUE NOT NULL,
                    mtime INTEGER NOT NULL,
                    volume INTEGER NOT NULL
                );
                CREATE UNIQUE INDEX IF NOT EXISTS prime ON files (name);
                CREATE INDEX IF NOT EXISTS vols ON files (volume);
                CREATE TABLE IF NOT EXISTS volumes (
                    num INTEGER PRIMARY KEY,
                    tarfile TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS schema (version INTEGER NOT NULL);",
            )
            .map_err(Error::CatalogRow)?;

        let count: i64 = conn
            .query_row("SELECT count(*) FROM schema", [], |row| row.get(0))
            .map_err(Error::CatalogRow)?;
        if count == 0 {
            conn.execute("INSERT INTO schema (version) VALUES (1)", [])
                .map_err(Error::CatalogRow)?;
        }
        Ok(())
    }

    /// `current_volume = 1 + max(volume in catalog)`, or `1` if empty
    /// (spec.md I5).
    pub fn current_volume(&self) -> Result<i64> {
        let conn = self.conn.lock().expect("catalog connection mutex poisoned");
        let max: Option<i64> = conn
            .query_row("SELECT max(volume) FROM files", [], |row| row.get(0))
            .map_err(Error::CatalogRow)?;
        Ok(max.map(|m| m + 1).unwrap_or(1))
    }

    pub fn record_volume(&self, num: i64, tarfile: &str) -> Result<()> {
        let conn = self.conn.lock().expect("catalog connection mutex poisoned");
        conn.execute(
            "INSERT INTO volumes (num, tarfile) VALUES (?1, ?2)",
            params![num, tarfile],
        )
        .map_err(Error::CatalogRow)?;
        Ok(())
    }

    /// Replace any existing row for `path` (spec.md I1: at most one row per
    /// path).
    pub fn upsert_file(&self, path: &str, mtime: i64, volume: i64) -> Result<()> {
        let conn = self.conn.lock().expect("catalog connection mutex poisoned");
        conn.execute(
            "INSERT INTO files (name, mtime, volume) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET mtime = excluded.mtime, volume = excluded.volume",
            params![path, mtime, volume],
        )
        .map_err(Error::CatalogRow)?;
        Ok(())
    }

    /// Idempotent delete.
    pub fn delete_file(&self, path: &str) -> Result<()> {
        let conn = self.conn.lock().expect("catalog connection mutex poisoned");
        conn.execute("DELETE FROM files WHERE name = ?1", params![path])
            .map_err(Error::CatalogRow)?;
        Ok(())
    }

    /// The stored `mtime` for `path`, if any row exists.
    pub fn mtime_of(&self, path: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock().expect("catalog connection mutex poisoned");
        conn.query_row(
            "SELECT mtime FROM files WHERE name = ?1",
            params![path],
            |row| row.get(0),
        )
        .optional()
        .map_err(Error::CatalogRow)
    }

    /// Rows with `volume < num`, ascending by volume — the cyclic pass's
    /// candidate set (spec.md §4.1 `iter_older_than`). Materialized eagerly;
    /// see SPEC_FULL.md §4.1 for why a lazy cursor isn't used here.
    pub fn iter_older_than(&self, num: i64) -> Result<Vec<CatalogEntry>> {
        let conn = self.conn.lock().expect("catalog connection mutex poisoned");
        let mut stmt = conn
            .prepare("SELECT name, mtime, volume FROM files WHERE volume < ?1 ORDER BY volume ASC")
            .map_err(Error::CatalogRow)?;
        let rows = stmt
            .query_map(params![num], |row| {
                Ok(CatalogEntry {
                    path: row.get(0)?,
                    mtime: row.get(1)?,
                    volume: row.get(2)?,
                })
            })
            .map_err(Error::CatalogRow)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(Error::CatalogRow)?);
        }
        Ok(out)
    }

    pub fn file_count(&self) -> Result<i64> {
        let conn = self.conn.lock().expect("catalog connection mutex poisoned");
        conn.query_row("SELECT count(*) FROM files", [], |row| row.get(0))
            .map_err(Error::CatalogRow)
    }

    /// For each volume with zero referencing files, emit a message and
    /// delete the volumes row (spec.md I2). The on-disk archive is left
    /// alone — retirement is advisory.
    pub fn retire_empty_volumes(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().expect("catalog connection mutex poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT v.num, v.tarfile FROM volumes v
                 LEFT JOIN files f ON f.volume = v.num
                 GROUP BY v.num HAVING count(f.name) = 0",
            )
            .map_err(Error::CatalogRow)?;
        let empties: Vec<(i64, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(Error::CatalogRow)?
            .collect::<rusqlite::Result<_>>()
            .map_err(Error::CatalogRow)?;
        drop(stmt);

        let mut messages = Vec::with_capacity(empties.len());
        for (num, tarfile) in empties {
            conn.execute("DELETE FROM volumes WHERE num = ?1", params![num])
                .map_err(Error::CatalogRow)?;
            messages.push(format!("tarfile {tarfile} from backup {num} can be deleted"));
        }
        Ok(messages)
    }
}
