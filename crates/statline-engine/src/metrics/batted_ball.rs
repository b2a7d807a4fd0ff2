// Batted-ball calculators: trajectory mix, pulled fly balls, barrels and
// exit-velocity percentiles.

use std::f64::consts::FRAC_PI_2;

use super::{mean, percent, round2, text, CalcInput, MetricCalculator};
use crate::value::{Row, Value};

fn reals<'a>(pairs: impl IntoIterator<Item = (&'a str, f64)>) -> Row {
    pairs
        .into_iter()
        .map(|(k, v)| (k, Value::Real(v)))
        .collect()
}

// ---------------------------------------------------------------------------
// Trajectory mix
// ---------------------------------------------------------------------------

const TRAJECTORIES: [(&str, &str, &str); 4] = [
    ("fly_ball", "fly_ball_percent", "avg_ev_fly_ball"),
    ("ground_ball", "ground_ball_percent", "avg_ev_ground_ball"),
    ("line_drive", "line_drive_percent", "avg_ev_line_drive"),
    ("popup", "popup_percent", "avg_ev_popup"),
];

/// Share of each trajectory among batted balls, and the mean exit velocity
/// of each.
pub struct TrajectoryProfile;

impl MetricCalculator for TrajectoryProfile {
    fn name(&self) -> &'static str {
        "trajectory_profile"
    }

    fn outputs(&self) -> &'static [&'static str] {
        &[
            "fly_ball_percent",
            "ground_ball_percent",
            "line_drive_percent",
            "popup_percent",
            "avg_ev_fly_ball",
            "avg_ev_ground_ball",
            "avg_ev_line_drive",
            "avg_ev_popup",
        ]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["trajectories", "hit_speeds"]
    }

    fn calculate(&self, input: CalcInput<'_>) -> Row {
        let batted: Vec<&Row> = input
            .raw
            .iter()
            .filter(|r| text(r, "trajectories").is_some())
            .collect();

        let mut out = Vec::with_capacity(8);
        for (trajectory, share, _) in TRAJECTORIES {
            let count = batted
                .iter()
                .filter(|r| text(r, "trajectories") == Some(trajectory))
                .count();
            out.push((share, percent(count, batted.len())));
        }
        for (trajectory, _, avg_ev) in TRAJECTORIES {
            let speeds: Vec<f64> = batted
                .iter()
                .filter(|r| text(r, "trajectories") == Some(trajectory))
                .filter_map(|r| r.get_f64("hit_speeds"))
                .collect();
            out.push((avg_ev, mean(&speeds)));
        }
        reals(out)
    }
}

// ---------------------------------------------------------------------------
// Pulled fly balls
// ---------------------------------------------------------------------------

/// Home plate in hit-coordinate space.
const HOME_X: f64 = 130.0;
const HOME_Y: f64 = 213.0;

/// Spray angle in degrees: 0 is straight away center, negative toward left
/// field, positive toward right.
pub fn spray_angle(x: f64, y: f64) -> f64 {
    (FRAC_PI_2 - (HOME_Y - y).atan2(x - HOME_X)).to_degrees()
}

/// Parse stored `"x:y"` coordinates.
pub fn parse_coordinates(raw: &str) -> Option<(f64, f64)> {
    let (x, y) = raw.split_once(':')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

/// A right-handed hitter pulls to left field, a left-handed one to right.
pub fn is_pulled(bat_side: &str, angle: f64) -> bool {
    match bat_side {
        "R" => (-45.0..=-5.0).contains(&angle),
        "L" => (5.0..=45.0).contains(&angle),
        _ => false,
    }
}

pub struct PulledFlyBalls;

impl MetricCalculator for PulledFlyBalls {
    fn name(&self) -> &'static str {
        "pulled_fly_balls"
    }

    fn outputs(&self) -> &'static [&'static str] {
        &["pulled_fb_percent", "avg_ev_on_pulled_fb"]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["trajectories", "hit_speeds", "hit_coordinates", "bat_sides"]
    }

    fn calculate(&self, input: CalcInput<'_>) -> Row {
        let fly_balls: Vec<&Row> = input
            .raw
            .iter()
            .filter(|r| text(r, "trajectories") == Some("fly_ball"))
            .collect();

        let pulled: Vec<&Row> = fly_balls
            .iter()
            .copied()
            .filter(|r| {
                let side = text(r, "bat_sides").unwrap_or_default();
                text(r, "hit_coordinates")
                    .and_then(parse_coordinates)
                    .is_some_and(|(x, y)| is_pulled(side, spray_angle(x, y)))
            })
            .collect();

        // Balls without a recorded speed still count toward the divisor.
        let speed_sum: f64 = pulled.iter().filter_map(|r| r.get_f64("hit_speeds")).sum();
        let avg_ev = if pulled.is_empty() {
            0.0
        } else {
            round2(speed_sum / pulled.len() as f64)
        };

        reals([
            ("pulled_fb_percent", percent(pulled.len(), fly_balls.len())),
            ("avg_ev_on_pulled_fb", avg_ev),
        ])
    }
}

// ---------------------------------------------------------------------------
// Barrels
// ---------------------------------------------------------------------------

/// Whether a batted ball lands in any of the three barrel bands.
pub fn is_barreled(launch_angle: f64, exit_velocity: f64) -> bool {
    let (la, ev) = (launch_angle, exit_velocity);
    let perfect = ev * 1.5 - la >= 129.0 && ev + la * 2.0 >= 156.0 && ev >= 106.0 && (4.0..=48.0).contains(&la);
    let barrel = ev * 1.5 - la >= 117.0 && ev + la >= 124.0 && ev >= 98.0 && (4.0..=50.0).contains(&la);
    let near = ev * 1.5 - la >= 111.0 && ev + la >= 119.0 && ev >= 95.0 && (0.0..=52.0).contains(&la);
    perfect || barrel || near
}

pub struct Barrels;

impl MetricCalculator for Barrels {
    fn name(&self) -> &'static str {
        "barrels"
    }

    fn outputs(&self) -> &'static [&'static str] {
        &["barrel_per_bbe"]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["hit_speeds", "launch_angles"]
    }

    fn calculate(&self, input: CalcInput<'_>) -> Row {
        let measured: Vec<(f64, f64)> = input
            .raw
            .iter()
            .filter_map(|r| Some((r.get_f64("launch_angles")?, r.get_f64("hit_speeds")?)))
            .collect();
        let barrels = measured.iter().filter(|&&(la, ev)| is_barreled(la, ev)).count();
        reals([("barrel_per_bbe", percent(barrels, measured.len()))])
    }
}

// ---------------------------------------------------------------------------
// Exit-velocity percentile
// ---------------------------------------------------------------------------

/// Linear-interpolated percentile of `values`, `q` in [0, 1]. 0 when empty.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

pub struct ExitVelocityPercentile;

impl MetricCalculator for ExitVelocityPercentile {
    fn name(&self) -> &'static str {
        "exit_velocity_percentile"
    }

    fn outputs(&self) -> &'static [&'static str] {
        &["percentile_90"]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["hit_speeds"]
    }

    fn calculate(&self, input: CalcInput<'_>) -> Row {
        let speeds: Vec<f64> = input
            .raw
            .iter()
            .filter_map(|r| r.get_f64("hit_speeds"))
            .collect();
        reals([("percentile_90", round2(percentile(&speeds, 0.9)))])
    }
}
