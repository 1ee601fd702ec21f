//! SQLite implementation of the ObjectStore trait.
//!
//! Uses rusqlite with bundled SQLite, wrapped in async via
//! `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use notp_core::{Object, Oid};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{InsertResult, ObjectStore};

/// SQLite-based store.
///
/// Thread-safe via internal Mutex. All operations run on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path, running migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|e| {
        StoreError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
            Some(format!("mutex poisoned: {}", e)),
        ))
    })
}

fn oid_from_column(bytes: Vec<u8>) -> Result<Oid> {
    Oid::try_from(bytes.as_slice())
        .map_err(|_| StoreError::InvalidData(format!("oid column has {} bytes", bytes.len())))
}

fn read_ref(conn: &Connection, name: &str) -> Result<Option<Oid>> {
    let bytes: Option<Vec<u8>> = conn
        .query_row(
            "SELECT oid FROM refs WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    bytes.map(oid_from_column).transpose()
}

/// Current time in milliseconds.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl ObjectStore for SqliteStore {
    async fn insert_object(&self, object: &Object) -> Result<InsertResult> {
        let object = object.clone();
        let object_type = object.object_type()?;

        self.with_conn(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO objects (oid, object_type, size, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    object.oid().as_bytes().as_slice(),
                    object_type.as_str(),
                    object.size() as i64,
                    object.content().as_ref(),
                    now_millis(),
                ],
            )?;
            Ok(if changed == 1 {
                InsertResult::Inserted
            } else {
                InsertResult::AlreadyExists
            })
        })
        .await
    }

    async fn get_object(&self, oid: &Oid) -> Result<Option<Object>> {
        let oid = *oid;
        self.with_conn(move |conn| {
            let content: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT content FROM objects WHERE oid = ?1",
                    params![oid.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            match content {
                None => Ok(None),
                Some(content) => Ok(Some(Object::from_parts(oid, content)?)),
            }
        })
        .await
    }

    async fn has_object(&self, oid: &Oid) -> Result<bool> {
        let oid = *oid;
        self.with_conn(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM objects WHERE oid = ?1",
                    params![oid.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn list_objects(&self) -> Result<Vec<Oid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT oid FROM objects ORDER BY oid")?;
            let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
            let mut oids = Vec::new();
            for row in rows {
                oids.push(oid_from_column(row?)?);
            }
            Ok(oids)
        })
        .await
    }

    async fn get_ref(&self, name: &str) -> Result<Option<Oid>> {
        let name = name.to_string();
        self.with_conn(move |conn| read_ref(conn, &name)).await
    }

    async fn compare_and_set_ref(&self, name: &str, expected: Oid, new: Oid) -> Result<bool> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let current = read_ref(&tx, &name)?.unwrap_or(Oid::ZERO);
            if current != expected {
                return Ok(false);
            }

            if new.is_zero() {
                tx.execute("DELETE FROM refs WHERE name = ?1", params![name])?;
            } else {
                tx.execute(
                    "INSERT INTO refs (name, oid, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(name) DO UPDATE SET oid = excluded.oid, updated_at = excluded.updated_at",
                    params![name, new.as_bytes().as_slice(), now_millis()],
                )?;
            }
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn list_refs(&self) -> Result<Vec<(String, Oid)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT name, oid FROM refs ORDER BY name")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;
            let mut refs = Vec::new();
            for row in rows {
                let (name, oid) = row?;
                refs.push((name, oid_from_column(oid)?));
            }
            Ok(refs)
        })
        .await
    }
}
