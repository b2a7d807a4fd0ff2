// Query construction: the generic builder, source-bound builders, filters,
// and the SQL-level join.

pub mod filters;
pub mod join;
pub mod source;
pub mod sql;

pub use filters::{FilterKey, FilterSet, FilterValue};
pub use join::{JoinKind, SqlJoin};
pub use source::{FilterOutcome, SourceBuilder, SourceKind};
pub use sql::{BuiltQuery, OrderKey, QueryBuilder};
