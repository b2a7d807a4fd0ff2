// Expected wOBA from binned exit velocity and launch angle.

use std::collections::HashMap;

use super::CalcInput;
use super::MetricCalculator;
use crate::error::StoreError;
use crate::schema::PROBABILITIES_TABLE;
use crate::store::Store;
use crate::value::{Row, Value};

const WEIGHT_SINGLE: f64 = 0.882;
const WEIGHT_DOUBLE: f64 = 1.254;
const WEIGHT_TRIPLE: f64 = 1.59;
const WEIGHT_HOME_RUN: f64 = 2.05;
const WEIGHT_UNINTENTIONAL_WALK: f64 = 0.689;
const WEIGHT_HIT_BY_PITCH: f64 = 0.72;

const EV_BIN_WIDTH: f64 = 2.0;
const LA_BIN_WIDTH: f64 = 3.0;

/// Hit probabilities for one (ev_bin, la_bin) cell.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HitProbabilities {
    pub single: f64,
    pub double: f64,
    pub triple: f64,
    pub home_run: f64,
}

impl HitProbabilities {
    /// Linear-weighted value of one batted ball in this cell.
    pub fn weighted(&self) -> f64 {
        self.single * WEIGHT_SINGLE
            + self.double * WEIGHT_DOUBLE
            + self.triple * WEIGHT_TRIPLE
            + self.home_run * WEIGHT_HOME_RUN
    }
}

/// Lower edges of the bins a batted ball falls in.
pub fn bin(exit_velocity: f64, launch_angle: f64) -> (i64, i64) {
    (
        ((exit_velocity / EV_BIN_WIDTH).floor() * EV_BIN_WIDTH) as i64,
        ((launch_angle / LA_BIN_WIDTH).floor() * LA_BIN_WIDTH) as i64,
    )
}

#[derive(Debug, Clone, Default)]
pub struct ProbabilityTable {
    cells: HashMap<(i64, i64), HitProbabilities>,
}

impl ProbabilityTable {
    /// Rows with a missing bin are dropped; missing probabilities read as 0.
    pub fn from_rows(rows: &[Row]) -> Self {
        let mut cells = HashMap::with_capacity(rows.len());
        for row in rows {
            let (Some(ev), Some(la)) = (row.get_f64("ev_bin"), row.get_f64("la_bin")) else {
                continue;
            };
            let p = |col: &str| row.get_f64(col).unwrap_or(0.0);
            cells.insert(
                (ev as i64, la as i64),
                HitProbabilities {
                    single: p("prob_single"),
                    double: p("prob_double"),
                    triple: p("prob_triple"),
                    home_run: p("prob_home_run"),
                },
            );
        }
        Self { cells }
    }

    pub async fn load(store: &dyn Store) -> Result<Self, StoreError> {
        let sql = format!(
            "SELECT ev_bin, la_bin, prob_single, prob_double, prob_triple, prob_home_run \
             FROM {PROBABILITIES_TABLE}"
        );
        let rows = store.fetch_all(&sql, &[]).await?;
        Ok(Self::from_rows(&rows))
    }

    pub fn insert(&mut self, ev_bin: i64, la_bin: i64, probabilities: HitProbabilities) {
        self.cells.insert((ev_bin, la_bin), probabilities);
    }

    pub fn get(&self, ev_bin: i64, la_bin: i64) -> Option<&HitProbabilities> {
        self.cells.get(&(ev_bin, la_bin))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// xwOBA and xwOBAcon. Batted balls come from the raw rows; walks, hit by
/// pitches and sacrifice flies come from the aggregate row.
pub struct ExpectedWoba;

impl ExpectedWoba {
    /// Sum of weighted hit probabilities, and the number of binned balls.
    fn contact_value(raw: &[Row], table: &ProbabilityTable) -> (f64, usize) {
        let mut frequencies: HashMap<(i64, i64), usize> = HashMap::new();
        for row in raw {
            if let (Some(ev), Some(la)) = (row.get_f64("hit_speeds"), row.get_f64("launch_angles")) {
                *frequencies.entry(bin(ev, la)).or_default() += 1;
            }
        }
        let batted_balls: usize = frequencies.values().sum();
        // Cells absent from the table contribute nothing.
        let value: f64 = frequencies
            .iter()
            .filter_map(|(cell, &n)| table.get(cell.0, cell.1).map(|p| p.weighted() * n as f64))
            .sum();
        (value, batted_balls)
    }
}

impl MetricCalculator for ExpectedWoba {
    fn name(&self) -> &'static str {
        "expected_woba"
    }

    fn outputs(&self) -> &'static [&'static str] {
        &["xwoba", "xwobacon"]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["hit_speeds", "launch_angles"]
    }

    fn needs_row(&self) -> bool {
        true
    }

    fn needs_probabilities(&self) -> bool {
        true
    }

    fn calculate(&self, input: CalcInput<'_>) -> Row {
        let empty = ProbabilityTable::default();
        let table = input.probabilities.unwrap_or(&empty);
        let (contact, batted_balls) = Self::contact_value(input.raw, table);

        let stat = |col: &str| input.row.and_then(|r| r.get_f64(col)).unwrap_or(0.0);
        let unintentional_walks = (stat("base_on_balls") - stat("intentional_walks")).max(0.0);
        let hit_by_pitch = stat("hit_by_pitch");
        let denominator = stat("at_bats") + unintentional_walks + stat("sac_flies") + hit_by_pitch;

        let numerator = contact
            + WEIGHT_UNINTENTIONAL_WALK * unintentional_walks
            + WEIGHT_HIT_BY_PITCH * hit_by_pitch;
        let xwoba = if denominator > 0.0 { numerator / denominator } else { 0.0 };
        let xwobacon = if batted_balls > 0 {
            contact / batted_balls as f64
        } else {
            0.0
        };

        [
            ("xwoba", Value::Real(round3(xwoba))),
            ("xwobacon", Value::Real(round3(xwobacon))),
        ]
        .into_iter()
        .collect()
    }
}

/// Rate stats read to three places.
fn round3(x: f64) -> f64 {
    if x.is_finite() {
        (x * 1000.0).round() / 1000.0
    } else {
        0.0
    }
}
