// Metric catalog: definitions loaded from the `metrics` table.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::value::{Row, Value};

// ---------------------------------------------------------------------------
// Player types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerType {
    Batter,
    Pitcher,
    Fielder,
}

impl PlayerType {
    /// Season totals table for this player type.
    pub fn totals_table(self) -> &'static str {
        match self {
            PlayerType::Batter => "hitters",
            PlayerType::Pitcher => "pitchers",
            PlayerType::Fielder => "fielders",
        }
    }

    /// Per-event column holding this player's name.
    pub fn plays_name_column(self) -> &'static str {
        match self {
            PlayerType::Batter => "batter_name",
            PlayerType::Pitcher => "pitcher_name",
            PlayerType::Fielder => "fielder_name",
        }
    }

    pub fn plays_id_column(self) -> &'static str {
        match self {
            PlayerType::Batter => "batter_id",
            PlayerType::Pitcher => "pitcher_id",
            PlayerType::Fielder => "fielder_id",
        }
    }

    /// Per-event column holding this player's team.
    pub fn plays_team_column(self) -> &'static str {
        match self {
            PlayerType::Batter => "team_batting",
            PlayerType::Pitcher | PlayerType::Fielder => "team_fielding",
        }
    }
}

impl fmt::Display for PlayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlayerType::Batter => "batter",
            PlayerType::Pitcher => "pitcher",
            PlayerType::Fielder => "fielder",
        };
        f.write_str(s)
    }
}

impl FromStr for PlayerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "batter" | "hitter" => Ok(PlayerType::Batter),
            "pitcher" => Ok(PlayerType::Pitcher),
            "fielder" => Ok(PlayerType::Fielder),
            other => Err(format!("unknown player type `{other}`")),
        }
    }
}

// ---------------------------------------------------------------------------
// Metric definitions
// ---------------------------------------------------------------------------

/// Delimiter between sub-expressions of a multi-column metric.
pub const EXPRESSION_DELIMITER: char = '|';

/// One select expression and the column name it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectExpr {
    pub expr: String,
    pub alias: String,
}

impl SelectExpr {
    /// Split a trailing `AS alias` off `expr`. Without one, the expression
    /// text is its own column name.
    pub fn parse(expr: &str) -> Self {
        let expr = expr.trim();
        let lower = expr.to_ascii_lowercase();
        if let Some(idx) = lower.rfind(" as ") {
            let alias = expr[idx + 4..].trim();
            if is_identifier(alias) {
                return SelectExpr {
                    expr: expr.to_string(),
                    alias: alias.to_string(),
                };
            }
        }
        SelectExpr {
            expr: expr.to_string(),
            alias: expr.to_string(),
        }
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !s.starts_with(|c: char| c.is_ascii_digit())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDefinition {
    pub name: String,
    pub expression: Option<String>,
    pub totals_batter: bool,
    pub totals_pitcher: bool,
    pub totals_fielder: bool,
    pub plays: bool,
    pub grouping: bool,
    /// Computed after the query by a registered calculator.
    pub computed: bool,
    pub hidden: bool,
    pub description: Option<String>,
    pub dependencies: Vec<String>,
}

impl MetricDefinition {
    /// Parse one `metrics` row. Rows without a name are rejected.
    pub fn from_row(row: &Row) -> Option<Self> {
        let name = text(row, "metric_name")?;
        Some(Self {
            name,
            expression: text(row, "sql_value"),
            totals_batter: flag(row, "is_totals_batter"),
            totals_pitcher: flag(row, "is_totals_pitcher"),
            totals_fielder: flag(row, "is_totals_fielder"),
            plays: flag(row, "is_all_plays"),
            grouping: flag(row, "is_grouping"),
            computed: flag(row, "is_python"),
            hidden: flag(row, "hidden"),
            description: text(row, "metric_description"),
            dependencies: text(row, "dependencies")
                .map(|deps| {
                    deps.split(',')
                        .map(str::trim)
                        .filter(|d| !d.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    pub fn is_totals_for(&self, player_type: PlayerType) -> bool {
        match player_type {
            PlayerType::Batter => self.totals_batter,
            PlayerType::Pitcher => self.totals_pitcher,
            PlayerType::Fielder => self.totals_fielder,
        }
    }

    /// The metric's select expressions, split on `|`.
    pub fn expressions(&self) -> Vec<SelectExpr> {
        self.expression
            .as_deref()
            .map(|e| {
                e.split(EXPRESSION_DELIMITER)
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(SelectExpr::parse)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Column names this metric contributes to a result row.
    pub fn output_columns(&self) -> Vec<String> {
        if self.computed || self.grouping {
            return vec![self.name.clone()];
        }
        let columns: Vec<String> = self.expressions().into_iter().map(|s| s.alias).collect();
        if columns.is_empty() {
            vec![self.name.clone()]
        } else {
            columns
        }
    }
}

fn text(row: &Row, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::Text(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn flag(row: &Row, column: &str) -> bool {
    row.get_f64(column).is_some_and(|v| v != 0.0)
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Immutable snapshot of the metric catalog. Refreshed as a whole.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    metrics: HashMap<String, MetricDefinition>,
    grouping: BTreeSet<String>,
}

impl Catalog {
    pub fn from_rows(rows: &[Row]) -> Self {
        let mut catalog = Catalog::default();
        for row in rows {
            match MetricDefinition::from_row(row) {
                Some(def) => catalog.insert(def),
                None => warn!("skipping metrics row without a name"),
            }
        }
        catalog
    }

    pub fn insert(&mut self, def: MetricDefinition) {
        if def.grouping {
            self.grouping.insert(def.name.clone());
        } else {
            self.grouping.remove(&def.name);
        }
        self.metrics.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<&MetricDefinition> {
        self.metrics.get(name)
    }

    pub fn grouping_names(&self) -> &BTreeSet<String> {
        &self.grouping
    }

    /// Non-hidden definitions, sorted by name.
    pub fn listing(&self) -> Vec<&MetricDefinition> {
        let mut visible: Vec<_> = self.metrics.values().filter(|m| !m.hidden).collect();
        visible.sort_by(|a, b| a.name.cmp(&b.name));
        visible
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
