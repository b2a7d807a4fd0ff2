// Join two finalized single-source queries inside one statement.

use super::sql::BuiltQuery;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

/// Each side stays a grouped sub-select, so aggregation happens before the
/// join predicate sees a row.
#[derive(Debug, Clone)]
pub struct SqlJoin<'a> {
    left: &'a BuiltQuery,
    right: &'a BuiltQuery,
    /// (left column, right column) pairs.
    on: Vec<(String, String)>,
    kind: JoinKind,
}

impl<'a> SqlJoin<'a> {
    pub fn new(left: &'a BuiltQuery, right: &'a BuiltQuery, kind: JoinKind) -> Self {
        Self {
            left,
            right,
            on: Vec::new(),
            kind,
        }
    }

    /// Join on columns that carry the same name on both sides.
    pub fn on_same(mut self, columns: &[String]) -> Self {
        self.on
            .extend(columns.iter().map(|c| (c.clone(), c.clone())));
        self
    }

    pub fn on(mut self, left: &str, right: &str) -> Self {
        self.on.push((left.to_string(), right.to_string()));
        self
    }

    pub fn build(&self) -> BuiltQuery {
        let mut columns: Vec<String> = self.left.columns.clone();
        let mut select = vec!["t1.*".to_string()];
        for col in &self.right.columns {
            let is_key = self.on.iter().any(|(_, r)| r == col);
            if is_key || columns.contains(col) {
                continue;
            }
            select.push(format!("t2.{col}"));
            columns.push(col.clone());
        }

        let mut sql = format!(
            "SELECT {} FROM ({}) AS t1 {} ({}) AS t2",
            select.join(", "),
            self.left.sql,
            self.kind.keyword(),
            self.right.sql
        );
        if self.on.is_empty() {
            sql.push_str(" ON 1 = 1");
        } else {
            // IS matches NULL group values the way the in-memory merge does.
            let preds: Vec<String> = self
                .on
                .iter()
                .map(|(l, r)| format!("t1.{l} IS t2.{r}"))
                .collect();
            sql.push_str(" ON ");
            sql.push_str(&preds.join(" AND "));
        }

        let args: Vec<Value> = self
            .left
            .args
            .iter()
            .chain(self.right.args.iter())
            .cloned()
            .collect();

        BuiltQuery { sql, args, columns }
    }
}
