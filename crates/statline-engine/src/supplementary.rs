// Supplementary raw-row fetch: unaggregated per-event rows scoped by the
// main plays query's filters, partitioned by group key for the calculators.

use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::{BuildError, QueryError};
use crate::metrics::{partition, Partitions};
use crate::query::{BuiltQuery, SourceBuilder};
use crate::resolve::Query;
use crate::store::Store;

/// The raw query for `query`'s supplementary metrics: their expressions plus
/// the group columns, with the main plays query's where clause and arguments.
/// No GROUP BY. `None` when nothing needs raw rows.
pub fn raw_query(query: &Query) -> Result<Option<BuiltQuery>, BuildError> {
    if query.supplementary().is_empty() {
        return Ok(None);
    }
    let mut raw = SourceBuilder::plays(query.player_type(), query.plays_columns().cloned());
    for def in query.supplementary() {
        raw.add_raw_select(def);
    }
    if raw.is_empty() {
        return Ok(None);
    }
    for group in query.groups() {
        raw.select_group_column(group);
    }
    raw.copy_filters_from(query.plays());
    raw.finalize()
}

/// Fetch the raw rows once and partition them by `query`'s groups.
pub async fn fetch_partitions(
    store: &dyn Store,
    query: &Query,
    cancel: &CancelToken,
) -> Result<Partitions, QueryError> {
    let built = match raw_query(query) {
        Ok(Some(built)) => built,
        Ok(None) => return Ok(Partitions::new()),
        Err(e) => {
            debug!("supplementary query inert: {}", e);
            return Ok(Partitions::new());
        }
    };
    debug!("supplementary sql: {} ({} arg(s))", built.sql, built.args.len());
    let rows = cancel
        .run(async {
            store
                .fetch_all(&built.sql, &built.args)
                .await
                .map_err(|e| QueryError::execution(built.sql.as_str(), e))
        })
        .await?;
    let count = rows.len();
    let parts = partition(rows, query.groups());
    info!("supplementary fetch: {} raw row(s) in {} group(s)", count, parts.len());
    Ok(parts)
}
