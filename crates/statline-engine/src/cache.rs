// Time-bounded cache for read-mostly metadata: the metric catalog, table
// schemas and the batted-ball probability table.
//
// Reads take a shared lock and never wait on the store. Refreshes are
// serialized behind one async mutex, and a caller that waited on it re-checks
// the entry before going to the store, so concurrent misses cost a single
// round-trip.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::catalog::{Catalog, MetricDefinition};
use crate::error::{QueryError, StoreError};
use crate::metrics::ProbabilityTable;
use crate::schema::METRICS_TABLE;
use crate::store::Store;

/// Default time-to-live for cached metadata.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

const CATALOG_KEY: &str = "metrics";
const PROBABILITIES_KEY: &str = "probabilities";

#[derive(Debug, Clone)]
enum Payload {
    Catalog(Arc<Catalog>),
    Columns(Arc<Vec<String>>),
    Probabilities(Arc<ProbabilityTable>),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Payload,
    stored_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < ttl
    }
}

pub struct MetadataCache {
    store: Arc<dyn Store>,
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
    refresh: Mutex<()>,
}

impl MetadataCache {
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            entries: RwLock::new(HashMap::new()),
            refresh: Mutex::new(()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current catalog snapshot, reloading it in full once stale.
    pub async fn catalog(&self) -> Result<Arc<Catalog>, QueryError> {
        let store = Arc::clone(&self.store);
        let payload = self
            .get_or_refresh(CATALOG_KEY, || async move {
                let sql = format!("SELECT * FROM {METRICS_TABLE}");
                let rows = store.fetch_all(&sql, &[]).await?;
                let catalog = Catalog::from_rows(&rows);
                info!("loaded {} metric definitions", catalog.len());
                Ok(Payload::Catalog(Arc::new(catalog)))
            })
            .await?;
        match payload {
            Payload::Catalog(catalog) => Ok(catalog),
            _ => Err(mismatch(CATALOG_KEY)),
        }
    }

    pub async fn metric(&self, name: &str) -> Result<Option<MetricDefinition>, QueryError> {
        Ok(self.catalog().await?.get(name).cloned())
    }

    pub async fn grouping_names(&self) -> Result<Vec<String>, QueryError> {
        Ok(self.catalog().await?.grouping_names().iter().cloned().collect())
    }

    /// Column names of `table`, cached under `columns:<table>`.
    pub async fn table_columns(&self, table: &str) -> Result<Arc<Vec<String>>, QueryError> {
        let key = format!("columns:{table}");
        let store = Arc::clone(&self.store);
        let owned = table.to_string();
        let payload = self
            .get_or_refresh(&key, || async move {
                let columns = store.table_columns(&owned).await?;
                debug!("cached {} column(s) for {}", columns.len(), owned);
                Ok(Payload::Columns(Arc::new(columns)))
            })
            .await?;
        match payload {
            Payload::Columns(columns) => Ok(columns),
            _ => Err(mismatch(&key)),
        }
    }

    /// Expected-outcome probabilities by (exit velocity, launch angle) bin.
    pub async fn probabilities(&self) -> Result<Arc<ProbabilityTable>, QueryError> {
        let store = Arc::clone(&self.store);
        let payload = self
            .get_or_refresh(PROBABILITIES_KEY, || async move {
                let table = ProbabilityTable::load(store.as_ref()).await?;
                info!("loaded {} batted-ball probability bins", table.len());
                Ok(Payload::Probabilities(Arc::new(table)))
            })
            .await?;
        match payload {
            Payload::Probabilities(table) => Ok(table),
            _ => Err(mismatch(PROBABILITIES_KEY)),
        }
    }

    /// Drop every entry; the next read reloads from the store.
    pub fn invalidate(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn lookup(&self, key: &str) -> Option<Payload> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|e| e.is_fresh(self.ttl, Instant::now()))
            .map(|e| e.payload.clone())
    }

    async fn get_or_refresh<F, Fut>(&self, key: &str, load: F) -> Result<Payload, QueryError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Payload, StoreError>>,
    {
        if let Some(payload) = self.lookup(key) {
            return Ok(payload);
        }

        let _guard = self.refresh.lock().await;
        if let Some(payload) = self.lookup(key) {
            return Ok(payload);
        }

        debug!("cache miss for {}", key);
        let payload = load()
            .await
            .map_err(|source| QueryError::Catalog { source })?;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_string(),
                CacheEntry {
                    payload: payload.clone(),
                    stored_at: Instant::now(),
                },
            );
        Ok(payload)
    }
}

fn mismatch(key: &str) -> QueryError {
    QueryError::Catalog {
        source: StoreError::Worker(format!("cache entry {key} holds the wrong payload")),
    }
}
