// Single-table SQL accumulator with positional arguments.

use serde::Serialize;
use tracing::debug;

use crate::catalog::SelectExpr;
use crate::error::BuildError;
use crate::value::Value;

/// Finalized query text, its positional arguments, and the names of the
/// columns it returns (select aliases, in select order).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuiltQuery {
    pub sql: String,
    pub args: Vec<Value>,
    pub columns: Vec<String>,
}

/// One `ORDER BY` term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    pub column: String,
    pub descending: bool,
}

impl OrderKey {
    /// Parse `col`, `col ASC` or `col DESC`. A leading `-` also means
    /// descending.
    pub fn parse(term: &str) -> Self {
        let term = term.trim();
        if let Some(column) = term.strip_prefix('-') {
            return OrderKey {
                column: column.trim().to_string(),
                descending: true,
            };
        }
        let mut parts = term.split_whitespace();
        let column = parts.next().unwrap_or_default().to_string();
        let descending = parts
            .next()
            .is_some_and(|dir| dir.eq_ignore_ascii_case("desc"));
        OrderKey { column, descending }
    }

    pub fn to_sql(&self, column: &str) -> String {
        if self.descending {
            format!("{column} DESC")
        } else {
            column.to_string()
        }
    }
}

/// Mutable accumulator for one `SELECT`. Clauses render in a fixed order:
/// SELECT, FROM, WHERE, GROUP BY, ORDER BY. Values only ever travel as
/// arguments; the text holds identifiers and `?` placeholders.
///
/// `build` finalizes the builder. After that every mutator is a no-op and
/// `build` returns the same text and arguments.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    select: Vec<String>,
    table: Option<String>,
    wheres: Vec<String>,
    args: Vec<Value>,
    group_by: Vec<String>,
    order_by: Vec<String>,
    forced_empty: bool,
    built: Option<BuiltQuery>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(table: &str) -> Self {
        let mut qb = Self::new();
        qb.set_table(table);
        qb
    }

    fn frozen(&self, op: &str) -> bool {
        if self.built.is_some() {
            debug!("ignoring {} on a finalized query", op);
            return true;
        }
        false
    }

    /// Add a select expression; duplicates are ignored.
    pub fn add_select(&mut self, expr: &str) -> &mut Self {
        if self.frozen("select") {
            return self;
        }
        let expr = expr.trim();
        if !expr.is_empty() && !self.select.iter().any(|s| s == expr) {
            self.select.push(expr.to_string());
        }
        self
    }

    pub fn set_table(&mut self, table: &str) -> &mut Self {
        if !self.frozen("set_table") {
            self.table = Some(table.to_string());
        }
        self
    }

    /// Append a where fragment. `args` must line up with its `?` placeholders.
    pub fn add_where<I>(&mut self, fragment: &str, args: I) -> &mut Self
    where
        I: IntoIterator<Item = Value>,
    {
        if self.frozen("where") {
            return self;
        }
        self.wheres.push(fragment.to_string());
        self.args.extend(args);
        self
    }

    pub fn add_group_by(&mut self, column: &str) -> &mut Self {
        if !self.frozen("group_by") && !self.group_by.iter().any(|c| c == column) {
            self.group_by.push(column.to_string());
        }
        self
    }

    pub fn add_order_by(&mut self, term: &str) -> &mut Self {
        if !self.frozen("order_by") && !self.order_by.iter().any(|c| c == term) {
            self.order_by.push(term.to_string());
        }
        self
    }

    /// Mark the query as inert: it will report empty whatever gets selected.
    pub fn mark_empty(&mut self) {
        self.forced_empty = true;
    }

    /// True when the query must not be executed. Never builds anything.
    pub fn is_empty(&self) -> bool {
        self.forced_empty || self.select.is_empty() || self.table.is_none()
    }

    pub fn is_finalized(&self) -> bool {
        self.built.is_some()
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn selects(&self) -> &[String] {
        &self.select
    }

    pub fn where_fragments(&self) -> &[String] {
        &self.wheres
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn group_columns(&self) -> &[String] {
        &self.group_by
    }

    /// Copy another builder's where fragments and arguments, keeping their
    /// alignment.
    pub fn copy_filters_from(&mut self, other: &QueryBuilder) -> &mut Self {
        if self.frozen("copy_filters_from") {
            return self;
        }
        self.wheres.extend(other.wheres.iter().cloned());
        self.args.extend(other.args.iter().cloned());
        self
    }

    /// Render the query text. Fails if there is no table or nothing selected.
    pub fn build(&mut self) -> Result<BuiltQuery, BuildError> {
        if let Some(built) = &self.built {
            return Ok(built.clone());
        }
        let table = self
            .table
            .as_deref()
            .ok_or(BuildError::MissingClause { clause: "FROM" })?;
        if self.select.is_empty() {
            return Err(BuildError::MissingClause { clause: "SELECT" });
        }

        let mut sql = format!("SELECT {} FROM {}", self.select.join(", "), table);
        if !self.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.wheres.join(" AND "));
        }
        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }

        let built = BuiltQuery {
            sql,
            args: self.args.clone(),
            columns: self
                .select
                .iter()
                .map(|s| SelectExpr::parse(s).alias)
                .collect(),
        };
        self.built = Some(built.clone());
        Ok(built)
    }
}

/// `col = ?` for one value, `col IN (?, ?, ...)` for several.
pub fn equality_fragment(column: &str, count: usize) -> String {
    if count == 1 {
        format!("{column} = ?")
    } else {
        let marks = vec!["?"; count].join(", ");
        format!("{column} IN ({marks})")
    }
}
