// Calculators that only read the aggregate row.

use super::{CalcInput, MetricCalculator};
use crate::value::{Row, Value};

/// On-base plus slugging.
pub struct OnBasePlusSlugging;

impl MetricCalculator for OnBasePlusSlugging {
    fn name(&self) -> &'static str {
        "ops"
    }

    fn outputs(&self) -> &'static [&'static str] {
        &["ops"]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    fn needs_row(&self) -> bool {
        true
    }

    fn calculate(&self, input: CalcInput<'_>) -> Row {
        let stat = |col: &str| input.row.and_then(|r| r.get_f64(col)).unwrap_or(0.0);
        let ops = stat("obp") + stat("slg");
        let ops = if ops.is_finite() {
            (ops * 1000.0).round() / 1000.0
        } else {
            0.0
        };
        [("ops", Value::Real(ops))].into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_rate_columns() {
        let row: Row = [("obp", Value::Real(0.3514)), ("slg", Value::Real(0.5))]
            .into_iter()
            .collect();
        let out = OnBasePlusSlugging.calculate(CalcInput {
            raw: &[],
            row: Some(&row),
            probabilities: None,
        });
        assert_eq!(out.get("ops"), Some(&Value::Real(0.851)));
    }

    #[test]
    fn missing_columns_read_as_zero() {
        let row: Row = [("obp", Value::Null)].into_iter().collect();
        let out = OnBasePlusSlugging.calculate(CalcInput {
            raw: &[],
            row: Some(&row),
            probabilities: None,
        });
        assert_eq!(out.get("ops"), Some(&Value::Real(0.0)));
    }
}
