// Library root: the metric-driven query engine. Re-exports the types the
// CLI and integration tests use.

pub mod cache;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod merge;
pub mod metrics;
pub mod query;
pub mod resolve;
pub mod schema;
pub mod store;
pub mod supplementary;
pub mod value;

pub use cancel::CancelToken;
pub use catalog::{Catalog, MetricDefinition, PlayerType};
pub use config::{Config, JoinStrategy};
pub use engine::{Engine, ResultSet};
pub use error::{BuildError, QueryError, StoreError};
pub use query::{FilterSet, FilterValue, OrderKey};
pub use resolve::{Explain, Query, Space};
pub use store::{SqliteStore, Store};
pub use value::{Row, Value};
