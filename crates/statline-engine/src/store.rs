// SQLite-backed store: a small connection pool driven from async code.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::StoreError;
use crate::value::{Row, Value};

/// Read access the engine needs from its backing store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run a parameterized query. Placeholders are positional `?`.
    async fn fetch_all(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, StoreError>;

    /// Column names of `table`, in declaration order. Empty if the table does
    /// not exist.
    async fn table_columns(&self, table: &str) -> Result<Vec<String>, StoreError>;
}

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

/// Fixed-size pool of SQLite connections. Every round-trip takes a permit,
/// leases one idle connection, and runs on the blocking thread pool.
pub struct SqliteStore {
    path: String,
    slots: Vec<Arc<Mutex<Connection>>>,
    idle: Mutex<Vec<usize>>,
    permits: Semaphore,
}

impl SqliteStore {
    /// Open `pool_size` connections to `path`. `":memory:"` always gets a
    /// single connection, since each in-memory connection is its own database.
    pub fn open(path: &str, pool_size: usize) -> Result<Self, StoreError> {
        let size = if path == ":memory:" {
            1
        } else {
            pool_size.max(1)
        };

        let mut slots = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open(path)?;
            conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
            if path != ":memory:" {
                conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            }
            slots.push(Arc::new(Mutex::new(conn)));
        }

        debug!("opened {} sqlite connection(s) to {}", size, path);
        Ok(Self {
            path: path.to_string(),
            idle: Mutex::new((0..size).collect()),
            permits: Semaphore::new(size),
            slots,
        })
    }

    /// Single in-memory connection.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:", 1)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn pool_size(&self) -> usize {
        self.slots.len()
    }

    /// Create every table the engine reads, if missing.
    pub async fn create_schema(&self) -> Result<(), StoreError> {
        self.execute_batch(crate::schema::SCHEMA).await
    }

    /// Run one or more statements without parameters.
    pub async fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        let sql = sql.to_string();
        self.with_connection(move |conn| conn.execute_batch(&sql))
            .await
    }

    /// Run a single parameterized statement, returning the affected row count.
    pub async fn execute(&self, sql: &str, args: Vec<Value>) -> Result<usize, StoreError> {
        let sql = sql.to_string();
        self.with_connection(move |conn| {
            conn.execute(&sql, rusqlite::params_from_iter(args.iter()))
        })
        .await
    }

    /// Lease a connection for the duration of `f`, which runs on the blocking
    /// pool. The lease is returned even if the calling future is dropped.
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| StoreError::PoolClosed)?;
        let lease = self.lease()?;
        let slot = Arc::clone(&self.slots[lease.index]);

        let result = tokio::task::spawn_blocking(move || {
            let conn = slot.lock().unwrap_or_else(PoisonError::into_inner);
            f(&conn)
        })
        .await;

        drop(lease);
        Ok(result??)
    }

    /// Stop handing out connections. In-flight round-trips finish normally.
    pub fn close(&self) {
        self.permits.close();
    }

    fn lease(&self) -> Result<Lease<'_>, StoreError> {
        let index = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or(StoreError::PoolClosed)?;
        Ok(Lease { store: self, index })
    }
}

struct Lease<'a> {
    store: &'a SqliteStore,
    index: usize,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        self.store
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.index);
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn fetch_all(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, StoreError> {
        let started = Instant::now();
        let owned_sql = sql.to_string();
        let args = args.to_vec();

        let rows = self
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(&owned_sql)?;
                let names: Vec<String> =
                    stmt.column_names().iter().map(|n| n.to_string()).collect();
                let mapped = stmt.query_map(rusqlite::params_from_iter(args.iter()), |r| {
                    let mut row = Row::new();
                    for (i, name) in names.iter().enumerate() {
                        row.insert(name.clone(), Value::from(r.get_ref(i)?));
                    }
                    Ok(row)
                })?;
                mapped.collect::<rusqlite::Result<Vec<Row>>>()
            })
            .await?;

        debug!(
            "fetched {} row(s) in {}ms",
            rows.len(),
            started.elapsed().as_millis()
        );
        Ok(rows)
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let table = table.to_string();
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
            let names = stmt.query_map([&table], |r| r.get::<_, String>(0))?;
            names.collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteStore {
        let store = SqliteStore::in_memory().expect("in-memory store should open");
        store.create_schema().await.expect("schema should apply");
        store
    }

    #[tokio::test]
    async fn memory_store_is_single_connection() {
        let store = SqliteStore::open(":memory:", 8).unwrap();
        assert_eq!(store.pool_size(), 1);
    }

    #[tokio::test]
    async fn fetch_all_preserves_column_order_and_types() {
        let store = test_store().await;
        store
            .execute(
                "INSERT INTO hitters (player_id, name, team_name, date, hits, avg) VALUES (?, ?, ?, ?, ?, ?)",
                vec![
                    Value::Integer(1),
                    "Judge".into(),
                    "NYY".into(),
                    "2023-10-01".into(),
                    Value::Integer(98),
                    Value::Real(0.267),
                ],
            )
            .await
            .unwrap();

        let rows = store
            .fetch_all(
                "SELECT name, hits, avg, league FROM hitters WHERE date LIKE ?",
                &["2023%".into()],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["name", "hits", "avg", "league"]);
        assert_eq!(row.get("name"), Some(&Value::from("Judge")));
        assert_eq!(row.get("hits"), Some(&Value::Integer(98)));
        assert_eq!(row.get("avg"), Some(&Value::Real(0.267)));
        assert_eq!(row.get("league"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn table_columns_reads_schema() {
        let store = test_store().await;
        let cols = store.table_columns("all_plays").await.unwrap();
        assert!(cols.contains(&"batter_name".to_string()));
        assert!(cols.contains(&"pitch_name".to_string()));
        assert!(store.table_columns("no_such_table").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sql_errors_surface_as_store_errors() {
        let store = test_store().await;
        let err = store.fetch_all("SELECT nope FROM hitters", &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
        // The connection went back to the pool.
        assert!(store.fetch_all("SELECT 1 AS one", &[]).await.is_ok());
    }

    #[tokio::test]
    async fn closed_pool_rejects_round_trips() {
        let store = test_store().await;
        store.close();
        let err = store.fetch_all("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::PoolClosed));
    }
}
