// Post-query calculators and the manager that fans them out across rows.

pub mod batted_ball;
pub mod discipline;
pub mod expected;
pub mod row;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::QueryError;
use crate::value::{GroupKey, Row, Value};

pub use expected::ProbabilityTable;

// ---------------------------------------------------------------------------
// Calculator trait
// ---------------------------------------------------------------------------

/// Everything a calculator may read for one output row.
#[derive(Debug, Clone, Copy)]
pub struct CalcInput<'a> {
    /// Raw per-event rows for this row's group. Possibly empty.
    pub raw: &'a [Row],
    /// The aggregate row itself; only passed to calculators that ask for it.
    pub row: Option<&'a Row>,
    pub probabilities: Option<&'a ProbabilityTable>,
}

/// One family of derived statistics.
pub trait MetricCalculator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Metric names this calculator fills in.
    fn outputs(&self) -> &'static [&'static str];

    /// Raw columns (metric names) read from the supplementary rows.
    fn dependencies(&self) -> &'static [&'static str];

    fn needs_row(&self) -> bool {
        false
    }

    fn needs_probabilities(&self) -> bool {
        false
    }

    /// Compute every output. Must not fail on empty input: empty
    /// denominators yield 0.
    fn calculate(&self, input: CalcInput<'_>) -> Row;
}

/// `num / den * 100` rounded to two places, or 0 when `den` is 0.
pub fn percent(num: usize, den: usize) -> f64 {
    if den == 0 {
        return 0.0;
    }
    round2(num as f64 / den as f64 * 100.0)
}

/// Mean rounded to two places, or 0 for an empty sample.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    round2(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn round2(x: f64) -> f64 {
    if x.is_finite() {
        (x * 100.0).round() / 100.0
    } else {
        0.0
    }
}

pub(crate) fn text<'a>(row: &'a Row, column: &str) -> Option<&'a str> {
    row.get(column).and_then(Value::as_str)
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Calculators indexed by the metric names they produce.
#[derive(Clone, Default)]
pub struct CalculatorRegistry {
    calculators: Vec<Arc<dyn MetricCalculator>>,
    by_output: HashMap<&'static str, usize>,
}

impl CalculatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every calculator shipped with the engine.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(discipline::PlateDiscipline));
        registry.register(Arc::new(batted_ball::TrajectoryProfile));
        registry.register(Arc::new(batted_ball::PulledFlyBalls));
        registry.register(Arc::new(batted_ball::Barrels));
        registry.register(Arc::new(batted_ball::ExitVelocityPercentile));
        registry.register(Arc::new(expected::ExpectedWoba));
        registry.register(Arc::new(row::OnBasePlusSlugging));
        registry
    }

    /// Later registrations win for overlapping outputs.
    pub fn register(&mut self, calculator: Arc<dyn MetricCalculator>) {
        let index = self.calculators.len();
        for &output in calculator.outputs() {
            if self.by_output.insert(output, index).is_some() {
                warn!("calculator {} replaces an earlier owner of {}", calculator.name(), output);
            }
        }
        self.calculators.push(calculator);
    }

    pub fn get(&self, output: &str) -> Option<&Arc<dyn MetricCalculator>> {
        self.by_output.get(output).map(|&i| &self.calculators[i])
    }

    pub fn contains(&self, output: &str) -> bool {
        self.by_output.contains_key(output)
    }

    /// Distinct calculators covering `outputs`, in first-use order.
    pub fn for_outputs<'a, I>(&self, outputs: I) -> Vec<Arc<dyn MetricCalculator>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen = Vec::new();
        let mut selected = Vec::new();
        for output in outputs {
            if let Some(&i) = self.by_output.get(output) {
                if !seen.contains(&i) {
                    seen.push(i);
                    selected.push(Arc::clone(&self.calculators[i]));
                }
            }
        }
        selected
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Raw rows partitioned by group key.
pub type Partitions = HashMap<GroupKey, Vec<Row>>;

/// Runs calculators for every result row with bounded parallelism.
pub struct MetricManager {
    calculators: Vec<Arc<dyn MetricCalculator>>,
    max_concurrent: usize,
}

impl MetricManager {
    pub fn new(calculators: Vec<Arc<dyn MetricCalculator>>, max_concurrent: usize) -> Self {
        Self {
            calculators,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calculators.is_empty()
    }

    pub fn needs_probabilities(&self) -> bool {
        self.calculators.iter().any(|c| c.needs_probabilities())
    }

    /// Extend each row with calculator outputs. Row order is preserved.
    ///
    /// Cancellation stops dispatch of further rows; rows already handed to a
    /// worker run to completion before `Cancelled` is returned.
    pub async fn apply(
        &self,
        rows: Vec<Row>,
        groups: &[String],
        partitions: Arc<Partitions>,
        probabilities: Option<Arc<ProbabilityTable>>,
        cancel: &CancelToken,
    ) -> Result<Vec<Row>, QueryError> {
        if self.calculators.is_empty() || rows.is_empty() {
            return Ok(rows);
        }
        debug!(
            "running {} calculator(s) over {} row(s), {} at a time",
            self.calculators.len(),
            rows.len(),
            self.max_concurrent
        );

        let slots = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks: JoinSet<(usize, Row)> = JoinSet::new();
        let mut results: Vec<Option<Row>> = vec![None; rows.len()];
        let mut cancelled = false;

        for (index, row) in rows.into_iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = Arc::clone(&slots).acquire_owned() => permit.map_err(|e| {
                    QueryError::Calculator { message: format!("failed to acquire a calculator slot: {e}") }
                })?,
            };

            let key = GroupKey::from_row(&row, groups);
            let partitions = Arc::clone(&partitions);
            let probabilities = probabilities.clone();
            let calculators = self.calculators.clone();
            tasks.spawn_blocking(move || {
                let _permit = permit;
                let raw = partitions.get(&key).map(Vec::as_slice).unwrap_or(&[]);
                (index, compute_row(row, raw, &calculators, probabilities.as_deref()))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (index, row) = joined.map_err(|e| QueryError::Calculator {
                message: e.to_string(),
            })?;
            results[index] = Some(row);
        }

        if cancelled {
            return Err(QueryError::Cancelled);
        }
        Ok(results.into_iter().flatten().collect())
    }
}

fn compute_row(
    mut row: Row,
    raw: &[Row],
    calculators: &[Arc<dyn MetricCalculator>],
    probabilities: Option<&ProbabilityTable>,
) -> Row {
    let mut computed = Row::new();
    for calc in calculators {
        let input = CalcInput {
            raw,
            row: calc.needs_row().then_some(&row),
            probabilities,
        };
        for (name, value) in calc.calculate(input).iter() {
            computed.insert(name, value.clone());
        }
    }
    for (name, value) in computed.iter() {
        row.insert(name, value.clone());
    }
    row
}

/// Partition raw rows by their values in `groups`, in one pass.
pub fn partition(rows: Vec<Row>, groups: &[String]) -> Partitions {
    let mut parts: Partitions = HashMap::new();
    for row in rows {
        parts
            .entry(GroupKey::from_row(&row, groups))
            .or_default()
            .push(row);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts raw rows; checks it was handed the aggregate row.
    struct RawCount;

    impl MetricCalculator for RawCount {
        fn name(&self) -> &'static str {
            "raw_count"
        }
        fn outputs(&self) -> &'static [&'static str] {
            &["raw_rows", "saw_row"]
        }
        fn dependencies(&self) -> &'static [&'static str] {
            &[]
        }
        fn needs_row(&self) -> bool {
            true
        }
        fn calculate(&self, input: CalcInput<'_>) -> Row {
            [
                ("raw_rows", Value::Integer(input.raw.len() as i64)),
                ("saw_row", Value::Integer(input.row.is_some() as i64)),
            ]
            .into_iter()
            .collect()
        }
    }

    fn team_row(team: &str) -> Row {
        [("team_name", Value::from(team))].into_iter().collect()
    }

    #[test]
    fn percent_and_mean_guard_empty_denominators() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(1, 3), 33.33);
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean(&[100.0, 101.0, 101.0]), 100.67);
        assert_eq!(round2(f64::NAN), 0.0);
    }

    #[test]
    fn registry_resolves_shared_calculators_once() {
        let registry = CalculatorRegistry::standard();
        let calcs = registry.for_outputs(["contact_percent", "zone_contact", "ops"]);
        let names: Vec<_> = calcs.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["plate_discipline", "ops"]);
        assert!(registry.contains("xwoba"));
        assert!(registry.get("hits").is_none());
    }

    #[test]
    fn partition_groups_rows_by_key() {
        let groups = vec!["team_name".to_string()];
        let parts = partition(
            vec![team_row("NYY"), team_row("BOS"), team_row("NYY")],
            &groups,
        );
        assert_eq!(parts.len(), 2);
        let nyy = GroupKey::from_row(&team_row("NYY"), &groups);
        assert_eq!(parts[&nyy].len(), 2);
    }

    #[tokio::test]
    async fn manager_preserves_order_and_defaults_missing_groups() {
        let groups = vec!["team_name".to_string()];
        let parts = partition(vec![team_row("NYY"), team_row("NYY")], &groups);
        let manager = MetricManager::new(vec![Arc::new(RawCount)], 2);

        let rows = vec![team_row("BOS"), team_row("NYY"), team_row("SEA")];
        let out = manager
            .apply(rows, &groups, Arc::new(parts), None, &CancelToken::new())
            .await
            .unwrap();

        let teams: Vec<_> = out.iter().map(|r| r.get("team_name").cloned()).collect();
        assert_eq!(
            teams,
            vec![Some("BOS".into()), Some("NYY".into()), Some("SEA".into())]
        );
        assert_eq!(out[0].get("raw_rows"), Some(&Value::Integer(0)));
        assert_eq!(out[1].get("raw_rows"), Some(&Value::Integer(2)));
        assert_eq!(out[1].get("saw_row"), Some(&Value::Integer(1)));
    }

    #[tokio::test]
    async fn cancelled_manager_dispatches_nothing() {
        let manager = MetricManager::new(vec![Arc::new(RawCount)], 1);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = manager
            .apply(vec![team_row("NYY")], &[], Arc::new(Partitions::new()), None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Cancelled));
    }
}
