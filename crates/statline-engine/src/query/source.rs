// Totals and plays builders: a QueryBuilder bound to one physical table with
// that table's column vocabulary.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, warn};

use super::filters::{FilterKey, FilterValue};
use super::sql::{equality_fragment, BuiltQuery, OrderKey, QueryBuilder};
use crate::catalog::{MetricDefinition, PlayerType};
use crate::error::{BuildError, QueryError};
use crate::schema::PLAYS_TABLE;
use crate::value::Value;

/// Select that gives a computed-only plays query one aggregate row per group.
pub const PLAYS_ANCHOR: &str = "COUNT(*) AS events";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// One row per player-season.
    Totals,
    /// One row per pitch or batted ball.
    Plays,
}

/// What `add_filter` did with a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    Applied,
    /// Empty value: grouped by the key instead.
    Grouped,
    /// The table has no such column.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct SourceBuilder {
    kind: SourceKind,
    player_type: PlayerType,
    query: QueryBuilder,
    /// Known columns of the table. `None` accepts everything.
    columns: Option<Arc<Vec<String>>>,
    /// Output column names of accepted metrics, in request order.
    outputs: Vec<String>,
    /// Generic names of group columns, before translation.
    groups: Vec<String>,
}

impl SourceBuilder {
    pub fn totals(player_type: PlayerType, columns: Option<Arc<Vec<String>>>) -> Self {
        Self::new(SourceKind::Totals, player_type, columns)
    }

    pub fn plays(player_type: PlayerType, columns: Option<Arc<Vec<String>>>) -> Self {
        Self::new(SourceKind::Plays, player_type, columns)
    }

    fn new(kind: SourceKind, player_type: PlayerType, columns: Option<Arc<Vec<String>>>) -> Self {
        let table = match kind {
            SourceKind::Totals => player_type.totals_table(),
            SourceKind::Plays => PLAYS_TABLE,
        };
        Self {
            kind,
            player_type,
            query: QueryBuilder::with_table(table),
            columns,
            outputs: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn table(&self) -> &str {
        self.query.table().unwrap_or_default()
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn query(&self) -> &QueryBuilder {
        &self.query
    }

    pub fn is_empty(&self) -> bool {
        self.query.is_empty()
    }

    pub fn mark_empty(&mut self) {
        if !self.query.is_empty() || !self.outputs.is_empty() {
            debug!("{} query forced empty", self.table());
        }
        self.query.mark_empty();
    }

    /// This source's column for a generic name.
    pub fn translate<'a>(&self, column: &'a str) -> &'a str {
        match (self.kind, column) {
            (SourceKind::Plays, "name") => self.player_type.plays_name_column(),
            (SourceKind::Plays, "player_id") => self.player_type.plays_id_column(),
            (SourceKind::Plays, "team_name") => self.player_type.plays_team_column(),
            _ => column,
        }
    }

    fn has_column(&self, column: &str) -> bool {
        self.columns
            .as_ref()
            .map_or(true, |cols| cols.iter().any(|c| c == column))
    }

    /// Whether `metric` may be selected here for this player type.
    pub fn accepts(&self, metric: &MetricDefinition) -> bool {
        if metric.grouping {
            return false;
        }
        match self.kind {
            SourceKind::Totals => metric.is_totals_for(self.player_type),
            // Computed metrics ride on the plays query so their groups exist.
            SourceKind::Plays => metric.plays || metric.computed,
        }
    }

    /// Select every expression of `metric`, recording output aliases. Returns
    /// false if the metric does not apply to this source.
    pub fn add_select(&mut self, metric: &MetricDefinition) -> bool {
        if !self.accepts(metric) {
            return false;
        }
        let exprs = metric.expressions();
        if exprs.is_empty() {
            if metric.computed && self.kind == SourceKind::Plays {
                self.query.add_select(PLAYS_ANCHOR);
                return true;
            }
            warn!("metric {} has no expression; not selected", metric.name);
            return false;
        }
        for expr in exprs {
            self.query.add_select(&expr.expr);
            if !self.outputs.contains(&expr.alias) {
                self.outputs.push(expr.alias);
            }
        }
        true
    }

    /// Select `metric` row by row, without aggregation context. Used for the
    /// raw supplementary fetch.
    pub fn add_raw_select(&mut self, metric: &MetricDefinition) {
        for expr in metric.expressions() {
            self.query.add_select(&expr.expr);
            if !self.outputs.contains(&expr.alias) {
                self.outputs.push(expr.alias);
            }
        }
    }

    /// Scope this source by another source's where clause and arguments.
    pub fn copy_filters_from(&mut self, other: &SourceBuilder) {
        self.query.copy_filters_from(&other.query);
    }

    /// Group by a generic column. A column this table lacks makes the whole
    /// source inert, since grouping by it here has no meaning.
    pub fn group_by(&mut self, column: &str) {
        if self.groups.iter().any(|g| g == column) {
            return;
        }
        let translated = self.translate(column);
        if !self.has_column(translated) {
            debug!("{} has no column {}; source disabled", self.table(), translated);
            self.mark_empty();
        } else {
            self.query.add_group_by(translated);
        }
        self.groups.push(column.to_string());
    }

    /// Select a generic column under its generic name.
    pub fn select_group_column(&mut self, column: &str) {
        let translated = self.translate(column);
        if !self.has_column(translated) {
            return;
        }
        if translated == column {
            self.query.add_select(column);
        } else {
            self.query.add_select(&format!("{translated} AS {column}"));
        }
    }

    pub fn order_by(&mut self, key: &OrderKey) {
        let column = self.translate(&key.column);
        let groups_on_it = self.groups.iter().any(|g| g == &key.column);
        if groups_on_it || self.outputs.iter().any(|o| o == &key.column) {
            let term = key.to_sql(if groups_on_it { column } else { &key.column });
            self.query.add_order_by(&term);
        }
    }

    /// Apply one semantic filter. Range keys go through `add_date_range` and
    /// `add_year`.
    pub fn add_filter(&mut self, key: &str, value: &FilterValue) -> Result<FilterOutcome, QueryError> {
        let parsed = FilterKey::parse(key);
        if value.is_empty() {
            if parsed.is_range() {
                return Ok(FilterOutcome::Skipped);
            }
            self.group_by(parsed.group_column());
            return Ok(FilterOutcome::Grouped);
        }
        match parsed {
            FilterKey::Year => {
                self.add_year(value)?;
                Ok(FilterOutcome::Applied)
            }
            FilterKey::StartDate => {
                self.add_date_range(value.first(), None)?;
                Ok(FilterOutcome::Applied)
            }
            FilterKey::EndDate => {
                self.add_date_range(None, value.first())?;
                Ok(FilterOutcome::Applied)
            }
            other => {
                let column = self.translate(other.group_column()).to_string();
                Ok(self.add_equality(column, value))
            }
        }
    }

    fn add_equality(&mut self, column: String, value: &FilterValue) -> FilterOutcome {
        if !self.has_column(&column) {
            debug!("{} has no column {}; filter skipped", self.table(), column);
            return FilterOutcome::Skipped;
        }
        let values = value.values();
        let fragment = equality_fragment(&column, values.len());
        self.query
            .add_where(&fragment, values.into_iter().map(Value::from));
        FilterOutcome::Applied
    }

    /// `date LIKE '<year>%'`, OR-ed across several years.
    pub fn add_year(&mut self, value: &FilterValue) -> Result<(), QueryError> {
        let years = value.values();
        for year in &years {
            if year.len() != 4 || !year.chars().all(|c| c.is_ascii_digit()) {
                return Err(QueryError::InvalidFilter {
                    key: "year".into(),
                    message: format!("expected a four digit year, got `{year}`"),
                });
            }
        }
        let fragment = if years.len() == 1 {
            "date LIKE ?".to_string()
        } else {
            format!("({})", vec!["date LIKE ?"; years.len()].join(" OR "))
        };
        self.query
            .add_where(&fragment, years.iter().map(|y| Value::from(format!("{y}%"))));
        Ok(())
    }

    /// Inclusive date range. Either end may be open.
    pub fn add_date_range(&mut self, start: Option<&str>, end: Option<&str>) -> Result<(), QueryError> {
        let start = start.map(|s| parse_date("start_date", s)).transpose()?;
        let end = end.map(|s| parse_date("end_date", s)).transpose()?;
        match (start, end) {
            (Some(s), Some(e)) => {
                if s > e {
                    return Err(QueryError::InvalidFilter {
                        key: "start_date".into(),
                        message: format!("{s} is after end_date {e}"),
                    });
                }
                self.query.add_where(
                    "date BETWEEN ? AND ?",
                    [Value::from(s.to_string()), Value::from(e.to_string())],
                );
            }
            (Some(s), None) => {
                self.query.add_where("date >= ?", [Value::from(s.to_string())]);
            }
            (None, Some(e)) => {
                self.query.add_where("date <= ?", [Value::from(e.to_string())]);
            }
            (None, None) => {}
        }
        Ok(())
    }

    /// Select group columns (when there is anything to aggregate) and render.
    /// Returns `None` for an inert source.
    pub fn finalize(&mut self) -> Result<Option<BuiltQuery>, BuildError> {
        if self.query.is_empty() {
            return Ok(None);
        }
        if !self.query.is_finalized() {
            for group in self.groups.clone() {
                self.select_group_column(&group);
            }
        }
        self.query.build().map(Some)
    }

    /// Rendered query if already finalized and live.
    pub fn built(&self) -> Option<BuiltQuery> {
        if self.query.is_empty() || !self.query.is_finalized() {
            return None;
        }
        let mut copy = self.query.clone();
        copy.build().ok()
    }
}

fn parse_date(key: &str, raw: &str) -> Result<NaiveDate, QueryError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|e| QueryError::InvalidFilter {
        key: key.to_string(),
        message: format!("`{raw}` is not YYYY-MM-DD: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(name: &str, sql: Option<&str>) -> MetricDefinition {
        MetricDefinition {
            name: name.into(),
            expression: sql.map(String::from),
            totals_batter: true,
            totals_pitcher: false,
            totals_fielder: false,
            plays: false,
            grouping: false,
            computed: false,
            hidden: false,
            description: None,
            dependencies: vec![],
        }
    }

    fn plays_metric(name: &str, sql: &str) -> MetricDefinition {
        MetricDefinition {
            totals_batter: false,
            plays: true,
            ..metric(name, Some(sql))
        }
    }

    fn cols(names: &[&str]) -> Option<Arc<Vec<String>>> {
        Some(Arc::new(names.iter().map(|s| s.to_string()).collect()))
    }

    #[test]
    fn totals_rejects_other_player_types() {
        let mut pitchers = SourceBuilder::totals(PlayerType::Pitcher, None);
        assert!(!pitchers.add_select(&metric("rbi", Some("SUM(rbi) AS rbi"))));
        assert!(pitchers.is_empty());

        let mut hitters = SourceBuilder::totals(PlayerType::Batter, None);
        assert!(hitters.add_select(&metric("rbi", Some("SUM(rbi) AS rbi"))));
        assert_eq!(hitters.outputs(), ["rbi"]);
    }

    #[test]
    fn multi_expression_metrics_record_each_alias() {
        let mut plays = SourceBuilder::plays(PlayerType::Pitcher, None);
        plays.add_select(&plays_metric(
            "velo_range",
            "MIN(start_speed) AS min_velo|MAX(start_speed) AS max_velo",
        ));
        assert_eq!(plays.outputs(), ["min_velo", "max_velo"]);
        let built = plays.finalize().unwrap().unwrap();
        assert_eq!(
            built.sql,
            "SELECT MIN(start_speed) AS min_velo, MAX(start_speed) AS max_velo FROM all_plays"
        );
    }

    #[test]
    fn plays_translates_name_and_team() {
        let mut plays = SourceBuilder::plays(PlayerType::Batter, None);
        plays.add_select(&plays_metric("pitches", "COUNT(*) AS pitches"));
        plays.group_by("team_name");
        plays.add_filter("name", &FilterValue::from("Ohtani")).unwrap();
        let built = plays.finalize().unwrap().unwrap();
        assert_eq!(
            built.sql,
            "SELECT COUNT(*) AS pitches, team_batting AS team_name FROM all_plays \
             WHERE batter_name = ? GROUP BY team_batting"
        );
        assert_eq!(built.columns, vec!["pitches", "team_name"]);
    }

    #[test]
    fn computed_metric_anchors_plays_query() {
        let mut plays = SourceBuilder::plays(PlayerType::Batter, None);
        let contact = MetricDefinition {
            computed: true,
            totals_batter: false,
            ..metric("contact_percent", None)
        };
        assert!(plays.add_select(&contact));
        assert!(!plays.is_empty());
        assert!(plays.outputs().is_empty());
        assert_eq!(
            plays.finalize().unwrap().unwrap().sql,
            "SELECT COUNT(*) AS events FROM all_plays"
        );
    }

    #[test]
    fn empty_value_groups_instead_of_filtering() {
        let mut totals = SourceBuilder::totals(PlayerType::Batter, None);
        let outcome = totals.add_filter("team_name", &FilterValue::from("")).unwrap();
        assert_eq!(outcome, FilterOutcome::Grouped);
        assert_eq!(totals.groups(), ["team_name"]);
        assert!(totals.query().where_fragments().is_empty());
    }

    #[test]
    fn generic_filter_on_missing_column_is_skipped() {
        let mut totals = SourceBuilder::totals(PlayerType::Batter, cols(&["name", "hits"]));
        let outcome = totals
            .add_filter("pitch_name", &FilterValue::from("Slider"))
            .unwrap();
        assert_eq!(outcome, FilterOutcome::Skipped);
        assert!(totals.query().args().is_empty());
    }

    #[test]
    fn group_on_missing_column_disables_source() {
        let mut totals = SourceBuilder::totals(PlayerType::Batter, cols(&["name", "hits"]));
        totals.add_select(&metric("hits", Some("SUM(hits) AS hits")));
        totals.group_by("pitch_name");
        assert!(totals.is_empty());
        assert_eq!(totals.finalize().unwrap(), None);
    }

    #[test]
    fn list_filters_use_in() {
        let mut totals = SourceBuilder::totals(PlayerType::Batter, None);
        totals.add_select(&metric("hits", Some("SUM(hits) AS hits")));
        totals
            .add_filter("team_name", &FilterValue::from(vec!["NYY", "BOS"]))
            .unwrap();
        let built = totals.finalize().unwrap().unwrap();
        assert!(built.sql.ends_with("WHERE team_name IN (?, ?)"));
        assert_eq!(built.args, vec![Value::from("NYY"), Value::from("BOS")]);
    }

    #[test]
    fn year_filter_binds_prefix() {
        let mut totals = SourceBuilder::totals(PlayerType::Batter, None);
        totals.add_filter("year", &FilterValue::from(vec!["2022", "2023"])).unwrap();
        assert_eq!(
            totals.query().where_fragments(),
            ["(date LIKE ? OR date LIKE ?)"]
        );
        assert_eq!(
            totals.query().args(),
            [Value::from("2022%"), Value::from("2023%")]
        );
        assert!(totals.add_filter("year", &FilterValue::from("23")).is_err());
    }

    #[test]
    fn date_range_validates_and_binds() {
        let mut plays = SourceBuilder::plays(PlayerType::Batter, None);
        plays
            .add_date_range(Some("2023-04-01"), Some("2023-04-30"))
            .unwrap();
        assert_eq!(plays.query().where_fragments(), ["date BETWEEN ? AND ?"]);
        assert!(plays.add_date_range(Some("2023-13-01"), None).is_err());
        assert!(plays
            .add_date_range(Some("2023-05-01"), Some("2023-04-01"))
            .is_err());
    }

    #[test]
    fn order_by_only_applies_to_known_columns() {
        let mut plays = SourceBuilder::plays(PlayerType::Batter, None);
        plays.add_select(&plays_metric("avg_ev", "AVG(launch_speed) AS avg_ev"));
        plays.group_by("name");
        plays.order_by(&OrderKey::parse("name"));
        plays.order_by(&OrderKey::parse("-avg_ev"));
        plays.order_by(&OrderKey::parse("hits"));
        let built = plays.finalize().unwrap().unwrap();
        assert!(built.sql.ends_with("ORDER BY batter_name, avg_ev DESC"));
    }
}
