// Plate discipline: swing, contact, zone and chase rates from pitch results.

use super::{percent, text, CalcInput, MetricCalculator};
use crate::value::{Row, Value};

pub const ALL_SWINGS: &[&str] = &[
    "Foul",
    "Foul Bunt",
    "Foul Tip Bunt",
    "Foul Pitchout",
    "Missed Bunt",
    "Foul Tip",
    "Swinging Strike",
    "Swinging Strike (Blocked)",
    "Swinging Pitchout",
    "In play; out(s)",
    "In play; no out",
    "In play; run(s)",
];

pub const CONTACT_RESULTS: &[&str] = &[
    "In play; out(s)",
    "In play; no out",
    "In play; run(s)",
    "Foul",
];

pub const BALL_RESULTS: &[&str] = &["Ball", "Ball In Dirt", "Intent Ball", "Hit By Pitch", "Pitchout"];

pub const SWINGING_STRIKE_RESULTS: &[&str] = &[
    "Swinging Strike",
    "Swinging Strike (Blocked)",
    "Swinging Pitchout",
    "Foul Tip",
];

pub fn is_swing(result: &str) -> bool {
    ALL_SWINGS.contains(&result)
}

pub fn is_contact(result: &str) -> bool {
    CONTACT_RESULTS.contains(&result)
}

/// Zones 1 through 8. A missing zone reads as 0, which is neither.
fn in_zone(zone: i64) -> bool {
    0 < zone && zone < 9
}

fn out_of_zone(zone: i64) -> bool {
    zone > 9
}

/// Tallies over one group's pitches.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DisciplineCounts {
    pub pitches: usize,
    pub swings: usize,
    pub contact: usize,
    pub whiffs: usize,
    pub balls: usize,
    pub in_zone: usize,
    pub out_of_zone: usize,
    pub in_zone_swings: usize,
    pub in_zone_contact: usize,
    pub chases: usize,
}

impl DisciplineCounts {
    pub fn tally(raw: &[Row]) -> Self {
        let mut c = DisciplineCounts::default();
        for row in raw {
            let Some(result) = text(row, "pitch_results") else {
                continue;
            };
            let zone = row.get_f64("zones").map(|z| z as i64).unwrap_or(0);
            c.pitches += 1;
            if in_zone(zone) {
                c.in_zone += 1;
            } else if out_of_zone(zone) {
                c.out_of_zone += 1;
            }
            if is_swing(result) {
                c.swings += 1;
                if in_zone(zone) {
                    c.in_zone_swings += 1;
                } else if out_of_zone(zone) {
                    c.chases += 1;
                }
            }
            if is_contact(result) {
                c.contact += 1;
                if in_zone(zone) {
                    c.in_zone_contact += 1;
                }
            }
            if SWINGING_STRIKE_RESULTS.contains(&result) {
                c.whiffs += 1;
            }
            if BALL_RESULTS.contains(&result) {
                c.balls += 1;
            }
        }
        c
    }
}

pub struct PlateDiscipline;

impl MetricCalculator for PlateDiscipline {
    fn name(&self) -> &'static str {
        "plate_discipline"
    }

    fn outputs(&self) -> &'static [&'static str] {
        &[
            "contact_percent",
            "zone_contact",
            "chase_percent",
            "swing_percent",
            "zone_swing",
            "whiff_percent",
            "ball_percent",
            "strike_percent",
        ]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["zones", "pitch_results"]
    }

    fn calculate(&self, input: CalcInput<'_>) -> Row {
        let c = DisciplineCounts::tally(input.raw);
        [
            ("contact_percent", percent(c.contact, c.swings)),
            ("zone_contact", percent(c.in_zone_contact, c.in_zone_swings)),
            ("chase_percent", percent(c.chases, c.out_of_zone)),
            ("swing_percent", percent(c.swings, c.pitches)),
            ("zone_swing", percent(c.in_zone_swings, c.in_zone)),
            ("whiff_percent", percent(c.whiffs, c.swings)),
            ("ball_percent", percent(c.balls, c.pitches)),
            ("strike_percent", percent(c.pitches - c.balls, c.pitches)),
        ]
        .into_iter()
        .map(|(k, v)| (k, Value::Real(v)))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pitch(result: &str, zone: Option<i64>) -> Row {
        [
            ("pitch_results", Value::from(result)),
            ("zones", zone.map(Value::Integer).unwrap_or_default()),
        ]
        .into_iter()
        .collect()
    }

    fn run(raw: &[Row]) -> Row {
        PlateDiscipline.calculate(CalcInput {
            raw,
            row: None,
            probabilities: None,
        })
    }

    #[test]
    fn zero_swings_yield_zero_not_nan() {
        let out = run(&[pitch("Ball", Some(12)), pitch("Called Strike", Some(5))]);
        assert_eq!(out.get("contact_percent"), Some(&Value::Real(0.0)));
        assert_eq!(out.get("whiff_percent"), Some(&Value::Real(0.0)));
        assert_eq!(out.get("ball_percent"), Some(&Value::Real(50.0)));
    }

    #[test]
    fn empty_input_is_all_zero() {
        let out = run(&[]);
        for name in PlateDiscipline.outputs() {
            assert_eq!(out.get(name), Some(&Value::Real(0.0)), "{name}");
        }
    }

    #[test]
    fn rates_follow_zone_and_result_sets() {
        let raw = vec![
            pitch("In play; out(s)", Some(5)),  // in-zone swing, contact
            pitch("Swinging Strike", Some(4)),  // in-zone swing, whiff
            pitch("Foul", Some(13)),            // chase, contact
            pitch("Ball", Some(14)),            // out of zone take
            pitch("Called Strike", Some(2)),    // in-zone take
            pitch("Swinging Strike", None),     // swing, no zone
        ];
        let c = DisciplineCounts::tally(&raw);
        assert_eq!(c.pitches, 6);
        assert_eq!(c.swings, 4);
        assert_eq!(c.contact, 2);
        assert_eq!(c.in_zone, 3);
        assert_eq!(c.out_of_zone, 2);
        assert_eq!(c.in_zone_swings, 2);
        assert_eq!(c.in_zone_contact, 1);
        assert_eq!(c.chases, 1);
        assert_eq!(c.whiffs, 2);

        let out = run(&raw);
        assert_eq!(out.get("contact_percent"), Some(&Value::Real(50.0)));
        assert_eq!(out.get("zone_contact"), Some(&Value::Real(50.0)));
        assert_eq!(out.get("chase_percent"), Some(&Value::Real(50.0)));
        assert_eq!(out.get("swing_percent"), Some(&Value::Real(66.67)));
        assert_eq!(out.get("zone_swing"), Some(&Value::Real(66.67)));
        assert_eq!(out.get("whiff_percent"), Some(&Value::Real(50.0)));
        assert_eq!(out.get("strike_percent"), Some(&Value::Real(83.33)));
    }

    #[test]
    fn zone_nine_is_neither_in_nor_out() {
        let c = DisciplineCounts::tally(&[pitch("Swinging Strike", Some(9))]);
        assert_eq!((c.in_zone, c.out_of_zone, c.in_zone_swings, c.chases), (0, 0, 0, 0));
    }

    #[test]
    fn text_zone_codes_are_read() {
        let row: Row = [
            ("pitch_results", Value::from("Foul")),
            ("zones", Value::from("11")),
        ]
        .into_iter()
        .collect();
        assert_eq!(DisciplineCounts::tally(&[row]).chases, 1);
    }
}
