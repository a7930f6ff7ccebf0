//! Durable cache store on SQLite.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::{CacheStore, RequestKey, StoredResponse};
use crate::StoreError;

/// Schema version recorded in `PRAGMA user_version`.
const SCHEMA_VERSION: i32 = 2;

/// Cache store backed by a single SQLite database file.
///
/// Statements are short and run on the calling task while the connection
/// mutex is held; no guard lives across an await point.
pub struct SqliteCacheStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCacheStore").finish_non_exhaustive()
    }
}

impl SqliteCacheStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Backend(format!("create {}: {}", parent.display(), e)))?;
        }
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "Opened cache database");
        Self::with_connection(conn)
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version == 0 {
            create_schema(&conn)?;
        } else if version < SCHEMA_VERSION {
            migrate_schema(&conn, version)?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("cache database lock poisoned".to_string()))
    }
}

fn create_schema(conn: &Connection) -> Result<(), StoreError> {
    debug!(version = SCHEMA_VERSION, "Creating cache schema");
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS partitions (
            name TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entries (
            partition TEXT NOT NULL REFERENCES partitions(name) ON DELETE CASCADE,
            method TEXT NOT NULL,
            url TEXT NOT NULL,
            response_url TEXT NOT NULL,
            status INTEGER NOT NULL,
            headers TEXT NOT NULL,
            body BLOB NOT NULL,
            stored_at INTEGER NOT NULL,
            PRIMARY KEY (partition, method, url)
        );

        PRAGMA user_version = 2;
        "#,
    )?;
    Ok(())
}

fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), StoreError> {
    info!(from = from_version, to = SCHEMA_VERSION, "Migrating cache schema");
    if from_version < 2 {
        // Version 1 stored header values as text; those rows are refetched.
        conn.execute_batch("DELETE FROM entries; PRAGMA user_version = 2;")?;
    }
    Ok(())
}

fn ensure_partition(conn: &Connection, partition: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO partitions (name, created_at) VALUES (?1, ?2)",
        params![partition, Utc::now().timestamp()],
    )?;
    Ok(())
}

fn upsert(
    conn: &Connection,
    partition: &str,
    key: &RequestKey,
    response: &StoredResponse,
) -> Result<(), StoreError> {
    let headers = serde_json::to_string(&response.headers)?;
    conn.execute(
        r#"
        INSERT OR REPLACE INTO entries
            (partition, method, url, response_url, status, headers, body, stored_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
        params![
            partition,
            key.method(),
            key.url(),
            response.url,
            response.status,
            headers,
            response.body,
            response.stored_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn open(&self, partition: &str) -> Result<(), StoreError> {
        ensure_partition(&*self.conn()?, partition)
    }

    async fn has(&self, partition: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM partitions WHERE name = ?1",
                params![partition],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn match_request(
        &self,
        partition: &str,
        key: &RequestKey,
    ) -> Result<Option<StoredResponse>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                r#"
                SELECT response_url, status, headers, body, stored_at
                FROM entries WHERE partition = ?1 AND method = ?2 AND url = ?3
                "#,
                params![partition, key.method(), key.url()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u16>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((url, status, headers, body, stored_at)) = row else {
            return Ok(None);
        };

        let stored_at = DateTime::<Utc>::from_timestamp_millis(stored_at)
            .ok_or_else(|| StoreError::Corrupt(format!("stored_at {}", stored_at)))?;

        Ok(Some(StoredResponse {
            url,
            status,
            headers: serde_json::from_str(&headers)?,
            body,
            stored_at,
        }))
    }

    async fn put(
        &self,
        partition: &str,
        key: RequestKey,
        response: StoredResponse,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        ensure_partition(&tx, partition)?;
        upsert(&tx, partition, &key, &response)?;
        tx.commit()?;
        Ok(())
    }

    async fn put_all(
        &self,
        partition: &str,
        entries: Vec<(RequestKey, StoredResponse)>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        ensure_partition(&tx, partition)?;
        for (key, response) in &entries {
            upsert(&tx, partition, key, response)?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &RequestKey) -> Result<bool, StoreError> {
        let removed = self.conn()?.execute(
            "DELETE FROM entries WHERE partition = ?1 AND method = ?2 AND url = ?3",
            params![partition, key.method(), key.url()],
        )?;
        Ok(removed > 0)
    }

    async fn keys(&self, partition: &str) -> Result<Vec<RequestKey>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT method, url FROM entries WHERE partition = ?1 ORDER BY method, url",
        )?;
        let rows = stmt.query_map(params![partition], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut keys = Vec::new();
        for row in rows {
            let (method, url) = row?;
            keys.push(RequestKey { method, url });
        }
        keys.sort();
        Ok(keys)
    }

    async fn partition_names(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name FROM partitions ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    async fn delete_partition(&self, name: &str) -> Result<bool, StoreError> {
        let removed = self
            .conn()?
            .execute("DELETE FROM partitions WHERE name = ?1", params![name])?;
        Ok(removed > 0)
    }
}
