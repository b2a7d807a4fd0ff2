// Public entry points: resolve a request into a Query, then execute it.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::cache::MetadataCache;
use crate::cancel::CancelToken;
use crate::catalog::{Catalog, PlayerType};
use crate::config::{Config, EngineConfig, JoinStrategy};
use crate::error::QueryError;
use crate::merge::{self, SourceRows};
use crate::metrics::{CalculatorRegistry, MetricManager};
use crate::query::{BuiltQuery, FilterSet, JoinKind, OrderKey, SqlJoin};
use crate::resolve::{self, Query, SourceColumns};
use crate::schema::PLAYS_TABLE;
use crate::store::Store;
use crate::supplementary;
use crate::value::{Row, Value};

/// Final rows, projected to the requested columns in request order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub struct Engine {
    store: Arc<dyn Store>,
    cache: MetadataCache,
    calculators: CalculatorRegistry,
    config: EngineConfig,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, config: &Config) -> Self {
        let ttl = Duration::from_secs(config.cache.ttl_secs);
        Self {
            cache: MetadataCache::new(Arc::clone(&store), ttl),
            store,
            calculators: CalculatorRegistry::standard(),
            config: config.engine.clone(),
        }
    }

    /// Replace the calculator set.
    pub fn with_calculators(mut self, calculators: CalculatorRegistry) -> Self {
        self.calculators = calculators;
        self
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub fn calculators(&self) -> &CalculatorRegistry {
        &self.calculators
    }

    pub async fn catalog(&self) -> Result<Arc<Catalog>, QueryError> {
        self.cache.catalog().await
    }

    /// Resolve `metrics` for `player_type` under `filters`. Nothing executes
    /// except metadata lookups.
    pub async fn resolve<S>(
        &self,
        metrics: &[S],
        player_type: PlayerType,
        filters: &FilterSet,
    ) -> Result<Query, QueryError>
    where
        S: AsRef<str> + Sync,
    {
        let catalog = self.cache.catalog().await?;
        let columns = SourceColumns {
            totals: self.known_columns(player_type.totals_table()).await?,
            plays: self.known_columns(PLAYS_TABLE).await?,
        };

        let mut filters = filters.clone();
        if let Some(game_type) = &self.config.default_game_type {
            if !filters.contains("game_type") {
                debug!("applying default game_type {}", game_type);
                filters.insert("game_type", game_type.as_str());
            }
        }

        resolve::resolve(&catalog, &self.calculators, player_type, metrics, &filters, columns)
    }

    /// Column list of `table`, or `None` if the store reports none.
    async fn known_columns(&self, table: &str) -> Result<Option<Arc<Vec<String>>>, QueryError> {
        let columns = self.cache.table_columns(table).await?;
        Ok((!columns.is_empty()).then_some(columns))
    }

    /// Run both source queries, merge them, apply calculators, order and
    /// project.
    pub async fn execute(&self, query: &mut Query, cancel: &CancelToken) -> Result<ResultSet, QueryError> {
        let started = Instant::now();
        let (totals, plays) = query.finalize();

        let mut rows = match (self.config.join_strategy, totals, plays) {
            (JoinStrategy::SqlInner | JoinStrategy::SqlLeft, Some(totals), Some(plays)) => {
                let kind = if self.config.join_strategy == JoinStrategy::SqlLeft {
                    JoinKind::Left
                } else {
                    JoinKind::Inner
                };
                self.fetch_joined(&totals, &plays, query.groups(), kind, cancel)
                    .await?
            }
            (_, totals, plays) => {
                let (totals, plays) = tokio::join!(
                    self.fetch_source(totals, cancel),
                    self.fetch_source(plays, cancel)
                );
                merge::merge(totals?, plays?, query.groups())?
            }
        };

        let calculators = self
            .calculators
            .for_outputs(query.computed().iter().map(String::as_str));
        if !calculators.is_empty() {
            let manager = MetricManager::new(calculators, self.config.max_concurrent_rows);
            let partitions = supplementary::fetch_partitions(self.store.as_ref(), query, cancel).await?;
            let probabilities = if manager.needs_probabilities() {
                Some(self.cache.probabilities().await?)
            } else {
                None
            };
            rows = manager
                .apply(rows, query.groups(), Arc::new(partitions), probabilities, cancel)
                .await?;
        }

        sort_rows(&mut rows, query.order());
        let columns = query.outputs().to_vec();
        let rows: Vec<Row> = rows.iter().map(|r| r.project(&columns)).collect();
        info!(
            "query returned {} row(s) in {}ms",
            rows.len(),
            started.elapsed().as_millis()
        );
        Ok(ResultSet { columns, rows })
    }

    async fn fetch(&self, built: &BuiltQuery, cancel: &CancelToken) -> Result<Vec<Row>, QueryError> {
        debug!("executing: {} ({} arg(s))", built.sql, built.args.len());
        cancel
            .run(async {
                self.store
                    .fetch_all(&built.sql, &built.args)
                    .await
                    .map_err(|e| QueryError::execution(built.sql.as_str(), e))
            })
            .await
    }

    async fn fetch_source(
        &self,
        built: Option<BuiltQuery>,
        cancel: &CancelToken,
    ) -> Result<Option<SourceRows>, QueryError> {
        let Some(query) = built else {
            return Ok(None);
        };
        let rows = self.fetch(&query, cancel).await?;
        Ok(Some(SourceRows { query, rows }))
    }

    /// Both sources in one statement. An empty join, or for a LEFT join an
    /// empty plays side, is `NoDataFound`.
    async fn fetch_joined(
        &self,
        totals: &BuiltQuery,
        plays: &BuiltQuery,
        groups: &[String],
        kind: JoinKind,
        cancel: &CancelToken,
    ) -> Result<Vec<Row>, QueryError> {
        let no_data = || QueryError::NoDataFound {
            totals_sql: totals.sql.clone(),
            plays_sql: plays.sql.clone(),
        };
        // A LEFT join pads a plays side with no rows out to nulls.
        if matches!(kind, JoinKind::Left) {
            let exists = BuiltQuery {
                sql: format!("SELECT 1 AS present FROM ({}) AS t2 LIMIT 1", plays.sql),
                args: plays.args.clone(),
                columns: vec!["present".to_string()],
            };
            if self.fetch(&exists, cancel).await?.is_empty() {
                info!("no data: plays side returned no rows");
                return Err(no_data());
            }
        }
        let joined = SqlJoin::new(totals, plays, kind).on_same(groups).build();
        let rows = self.fetch(&joined, cancel).await?;
        if rows.is_empty() {
            return Err(no_data());
        }
        debug!("sql join returned {} row(s)", rows.len());
        Ok(rows)
    }
}

/// Stable sort by each key in turn. Missing columns sort as null, and nulls
/// go last ascending.
pub fn sort_rows(rows: &mut [Row], order: &[OrderKey]) {
    if order.is_empty() {
        return;
    }
    let null = Value::Null;
    rows.sort_by(|a, b| {
        for key in order {
            let left = a.get(&key.column).unwrap_or(&null);
            let right = b.get(&key.column).unwrap_or(&null);
            let ord = left.sort_cmp(right);
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, hits: Option<i64>) -> Row {
        [
            ("name", Value::from(name)),
            ("hits", hits.map(Value::Integer).unwrap_or_default()),
        ]
        .into_iter()
        .collect()
    }

    fn names(rows: &[Row]) -> Vec<String> {
        rows.iter()
            .map(|r| r.get("name").map(|v| v.to_string()).unwrap_or_default())
            .collect()
    }

    #[test]
    fn sorts_by_keys_in_turn() {
        let mut rows = vec![
            row("C", Some(10)),
            row("A", Some(30)),
            row("B", Some(10)),
            row("D", None),
        ];
        sort_rows(
            &mut rows,
            &[OrderKey::parse("-hits"), OrderKey::parse("name")],
        );
        assert_eq!(names(&rows), ["D", "A", "B", "C"]);

        sort_rows(&mut rows, &[OrderKey::parse("hits")]);
        assert_eq!(names(&rows), ["B", "C", "A", "D"]);
    }

    #[test]
    fn no_order_keeps_rows() {
        let mut rows = vec![row("B", None), row("A", None)];
        sort_rows(&mut rows, &[]);
        assert_eq!(names(&rows), ["B", "A"]);
    }
}
