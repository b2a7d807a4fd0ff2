// Request resolution: classify each requested metric into one computation
// space and populate the totals and plays builders.
//
// Dependencies are expanded breadth-first over an explicit work queue with a
// visited set. Raw per-event dependencies never enter the live builders; they
// are collected for the supplementary fetch instead.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::catalog::{Catalog, MetricDefinition, PlayerType};
use crate::error::QueryError;
use crate::metrics::CalculatorRegistry;
use crate::query::{BuiltQuery, FilterKey, FilterSet, FilterValue, OrderKey, SourceBuilder};
use crate::supplementary;

/// Group columns that only exist per event. Grouping by one of them leaves
/// the totals side nothing meaningful to aggregate.
pub const PLAYS_ONLY_GROUPS: &[&str] = &["pitch_name", "inning"];

/// Where a metric is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Space {
    Totals,
    Plays,
    Grouping,
    /// Raw input for a calculator only; never an output column.
    Supplementary,
    Computed,
    /// Its source was disabled, or an input was. Not an output column.
    Unresolved,
}

/// Known column lists of the two physical tables. `None` accepts anything.
#[derive(Debug, Clone, Default)]
pub struct SourceColumns {
    pub totals: Option<Arc<Vec<String>>>,
    pub plays: Option<Arc<Vec<String>>>,
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// A resolved request, ready to execute.
#[derive(Debug, Clone)]
pub struct Query {
    player_type: PlayerType,
    totals: SourceBuilder,
    plays: SourceBuilder,
    plays_columns: Option<Arc<Vec<String>>>,
    supplementary: Vec<MetricDefinition>,
    computed: Vec<String>,
    groups: Vec<String>,
    outputs: Vec<String>,
    spaces: Vec<(String, Space)>,
    order: Vec<OrderKey>,
}

/// What a query will do, without running it.
#[derive(Debug, Clone, Serialize)]
pub struct Explain {
    pub player_type: PlayerType,
    pub spaces: Vec<(String, Space)>,
    pub groups: Vec<String>,
    pub outputs: Vec<String>,
    pub totals: Option<BuiltQuery>,
    pub plays: Option<BuiltQuery>,
    pub supplementary: Option<BuiltQuery>,
}

impl Query {
    pub fn new(player_type: PlayerType, columns: SourceColumns) -> Self {
        Self {
            player_type,
            totals: SourceBuilder::totals(player_type, columns.totals),
            plays: SourceBuilder::plays(player_type, columns.plays.clone()),
            plays_columns: columns.plays,
            supplementary: Vec::new(),
            computed: Vec::new(),
            groups: Vec::new(),
            outputs: Vec::new(),
            spaces: Vec::new(),
            order: Vec::new(),
        }
    }

    pub fn player_type(&self) -> PlayerType {
        self.player_type
    }

    pub fn totals(&self) -> &SourceBuilder {
        &self.totals
    }

    pub fn plays(&self) -> &SourceBuilder {
        &self.plays
    }

    pub fn plays_columns(&self) -> Option<&Arc<Vec<String>>> {
        self.plays_columns.as_ref()
    }

    /// Raw dependency metrics for the supplementary fetch.
    pub fn supplementary(&self) -> &[MetricDefinition] {
        &self.supplementary
    }

    /// Computed metrics with a registered calculator.
    pub fn computed(&self) -> &[String] {
        &self.computed
    }

    /// Merge and partition key, in the order groups were added.
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Requested output columns, in request order.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn spaces(&self) -> &[(String, Space)] {
        &self.spaces
    }

    pub fn space(&self, metric: &str) -> Option<Space> {
        self.spaces
            .iter()
            .find(|(name, _)| name == metric)
            .map(|&(_, space)| space)
    }

    pub fn order(&self) -> &[OrderKey] {
        &self.order
    }

    /// A metric keeps the first space it is assigned.
    fn assign(&mut self, metric: &str, space: Space) {
        if self.space(metric).is_none() {
            debug!("{} -> {:?}", metric, space);
            self.spaces.push((metric.to_string(), space));
        }
    }

    /// Group both sources by a generic column. `name` brings `player_id`
    /// along, since names are not unique.
    pub fn add_group(&mut self, column: &str) {
        let columns: &[&str] = if column == "name" {
            &["name", "player_id"]
        } else {
            std::slice::from_ref(&column)
        };
        for &col in columns {
            if self.groups.iter().any(|g| g == col) {
                continue;
            }
            self.groups.push(col.to_string());
            if PLAYS_ONLY_GROUPS.contains(&col) {
                self.totals.mark_empty();
            } else {
                self.totals.group_by(col);
            }
            self.plays.group_by(col);
        }
    }

    /// Apply one filter to both sources. An empty value on a non-range key
    /// groups by that key instead.
    pub fn add_filter(&mut self, key: &str, value: &FilterValue) -> Result<(), QueryError> {
        let parsed = FilterKey::parse(key);
        if value.is_empty() {
            if !parsed.is_range() {
                self.add_group(parsed.group_column());
            }
            return Ok(());
        }
        let totals = self.totals.add_filter(key, value)?;
        let plays = self.plays.add_filter(key, value)?;
        debug!("filter {}: totals {:?}, plays {:?}", parsed, totals, plays);
        Ok(())
    }

    /// Apply a whole filter set. A start and end date given together become
    /// one inclusive range.
    pub fn add_filters(&mut self, filters: &FilterSet) -> Result<(), QueryError> {
        let start = filters.get("start_date").and_then(FilterValue::first);
        let end = filters.get("end_date").and_then(FilterValue::first);
        let paired = start.is_some() && end.is_some();
        if paired {
            self.totals.add_date_range(start, end)?;
            self.plays.add_date_range(start, end)?;
        }
        for (key, value) in filters.iter() {
            let is_bound = matches!(FilterKey::parse(key), FilterKey::StartDate | FilterKey::EndDate);
            if paired && is_bound {
                continue;
            }
            self.add_filter(key, value)?;
        }
        Ok(())
    }

    /// Order both sources and the final rows.
    pub fn order_by(&mut self, key: OrderKey) {
        if key.column.is_empty() || self.order.iter().any(|k| k.column == key.column) {
            return;
        }
        self.totals.order_by(&key);
        self.plays.order_by(&key);
        self.order.push(key);
    }

    /// Render both source queries. An inert or unbuildable source is `None`.
    pub fn finalize(&mut self) -> (Option<BuiltQuery>, Option<BuiltQuery>) {
        (finalize_source(&mut self.totals), finalize_source(&mut self.plays))
    }

    pub fn explain(&mut self) -> Explain {
        let (totals, plays) = self.finalize();
        let supplementary = supplementary::raw_query(self).ok().flatten();
        Explain {
            player_type: self.player_type,
            spaces: self.spaces.clone(),
            groups: self.groups.clone(),
            outputs: self.outputs.clone(),
            totals,
            plays,
            supplementary,
        }
    }

    /// Place one metric. Returns whether its dependencies should be expanded.
    fn place(&mut self, def: &MetricDefinition, catalog: &Catalog, calculators: &CalculatorRegistry) -> bool {
        if def.grouping {
            self.add_group(&def.name);
            self.assign(&def.name, Space::Grouping);
            return true;
        }
        if def.computed {
            if !calculators.contains(&def.name) {
                warn!("no calculator registered for {}; skipped", def.name);
                return false;
            }
            // Per-event inputs need one plays row per group to attach to.
            let reads_plays = def
                .dependencies
                .iter()
                .filter_map(|d| catalog.get(d))
                .any(|d| is_raw_plays(d, self.player_type));
            if reads_plays {
                self.plays.add_select(def);
            }
            if !self.computed.contains(&def.name) {
                self.computed.push(def.name.clone());
            }
            self.assign(&def.name, Space::Computed);
            return true;
        }
        if self.totals.add_select(def) {
            self.assign(&def.name, Space::Totals);
            return true;
        }
        if self.plays.add_select(def) {
            self.assign(&def.name, Space::Plays);
            return true;
        }
        warn!("{} does not apply to {} queries; skipped", def.name, self.player_type);
        false
    }

    /// Metrics assigned to a source that ended up disabled (say, totals
    /// after grouping by `pitch_name`) cannot produce a value. Mark them and
    /// every computed metric reading them as unresolved and drop their output
    /// columns, rather than return them as nulls.
    fn drop_unresolvable(&mut self, catalog: &Catalog) {
        let totals_off = self.totals.is_empty();
        let plays_off = self.plays.is_empty();
        let mut dropped: HashSet<String> = self
            .spaces
            .iter()
            .filter(|(_, space)| {
                (*space == Space::Totals && totals_off) || (*space == Space::Plays && plays_off)
            })
            .map(|(name, _)| name.clone())
            .collect();
        if dropped.is_empty() {
            return;
        }

        loop {
            let before = dropped.len();
            for name in &self.computed {
                let reads_dropped = catalog
                    .get(name)
                    .is_some_and(|def| def.dependencies.iter().any(|d| dropped.contains(d)));
                if reads_dropped && !dropped.contains(name) {
                    dropped.insert(name.clone());
                }
            }
            if dropped.len() == before {
                break;
            }
        }

        for (name, space) in &mut self.spaces {
            if dropped.contains(name.as_str()) {
                warn!("{} cannot be computed for this grouping; dropped", name);
                *space = Space::Unresolved;
            }
        }
        self.computed.retain(|name| !dropped.contains(name));
        let dropped_columns: HashSet<String> = dropped
            .iter()
            .filter_map(|name| catalog.get(name))
            .flat_map(|def| def.output_columns())
            .collect();
        self.outputs.retain(|column| !dropped_columns.contains(column));
    }

    fn add_supplementary(&mut self, def: &MetricDefinition, requested: bool) {
        if !self.supplementary.iter().any(|d| d.name == def.name) {
            debug!("{} routed to the supplementary fetch", def.name);
            self.supplementary.push(def.clone());
        }
        if !requested {
            self.assign(&def.name, Space::Supplementary);
        }
    }
}

fn finalize_source(source: &mut SourceBuilder) -> Option<BuiltQuery> {
    match source.finalize() {
        Ok(built) => built,
        Err(e) => {
            debug!("{} query inert: {}", source.table(), e);
            source.mark_empty();
            None
        }
    }
}

/// Applies to the per-event table but not to this player type's totals.
fn is_raw_plays(def: &MetricDefinition, player_type: PlayerType) -> bool {
    def.plays && !def.grouping && !def.is_totals_for(player_type)
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve `metrics` against `catalog`. Unknown names are logged and skipped;
/// a dependency cycle among the requested metrics is an error.
pub fn resolve<S: AsRef<str>>(
    catalog: &Catalog,
    calculators: &CalculatorRegistry,
    player_type: PlayerType,
    metrics: &[S],
    filters: &FilterSet,
    columns: SourceColumns,
) -> Result<Query, QueryError> {
    let mut query = Query::new(player_type, columns);

    let mut requested: Vec<&MetricDefinition> = Vec::new();
    for name in metrics {
        let name = name.as_ref().trim();
        match catalog.get(name) {
            Some(def) if !requested.iter().any(|d| d.name == def.name) => requested.push(def),
            Some(_) => {}
            None => warn!("unknown metric {}; skipped", name),
        }
    }
    check_cycles(catalog, &requested)?;

    for def in &requested {
        for column in def.output_columns() {
            if !query.outputs.contains(&column) {
                query.outputs.push(column);
            }
        }
    }

    let requested_names: HashSet<&str> = requested.iter().map(|d| d.name.as_str()).collect();
    let mut visited = requested_names.clone();
    let mut queue: VecDeque<&MetricDefinition> = requested.iter().copied().collect();

    while let Some(def) = queue.pop_front() {
        if !query.place(def, catalog, calculators) {
            continue;
        }
        for dep in &def.dependencies {
            let Some(dep_def) = catalog.get(dep) else {
                warn!("{} depends on unknown metric {}; skipped", def.name, dep);
                continue;
            };
            if is_raw_plays(dep_def, player_type) {
                query.add_supplementary(dep_def, requested_names.contains(dep.as_str()));
            } else if visited.insert(dep_def.name.as_str()) {
                debug!("{} pulls in {}", def.name, dep_def.name);
                queue.push_back(dep_def);
            }
        }
    }

    query.add_filters(filters)?;
    query.drop_unresolvable(catalog);
    debug!(
        "resolved {} metric(s): {} group(s), {} supplementary, {} computed",
        requested.len(),
        query.groups.len(),
        query.supplementary.len(),
        query.computed.len()
    );
    Ok(query)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

fn check_cycles(catalog: &Catalog, roots: &[&MetricDefinition]) -> Result<(), QueryError> {
    let mut marks = HashMap::new();
    let mut path = Vec::new();
    for root in roots {
        visit(catalog, root, &mut marks, &mut path)?;
    }
    Ok(())
}

fn visit<'c>(
    catalog: &'c Catalog,
    def: &'c MetricDefinition,
    marks: &mut HashMap<&'c str, Mark>,
    path: &mut Vec<&'c str>,
) -> Result<(), QueryError> {
    match marks.get(def.name.as_str()) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = path.iter().position(|n| *n == def.name).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
            cycle.push(def.name.clone());
            return Err(QueryError::DependencyCycle { path: cycle });
        }
        None => {}
    }
    marks.insert(def.name.as_str(), Mark::Visiting);
    path.push(def.name.as_str());
    for dep in &def.dependencies {
        if let Some(dep_def) = catalog.get(dep) {
            visit(catalog, dep_def, marks, path)?;
        }
    }
    path.pop();
    marks.insert(def.name.as_str(), Mark::Done);
    Ok(())
}
