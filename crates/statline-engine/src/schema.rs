// Table layout the engine reads, plus the stock metric catalog.
//
// The ingestion pipeline owns the data in `hitters`, `pitchers`, `fielders`
// and `all_plays`; the engine only reads them. `metrics` drives query
// construction and `batted_ball_probabilities` feeds expected-outcome
// calculators.

pub const METRICS_TABLE: &str = "metrics";
pub const PLAYS_TABLE: &str = "all_plays";
pub const PROBABILITIES_TABLE: &str = "batted_ball_probabilities";

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS metrics (
    metric_name        TEXT PRIMARY KEY,
    sql_value          TEXT,
    is_totals_batter   INTEGER NOT NULL DEFAULT 0,
    is_totals_pitcher  INTEGER NOT NULL DEFAULT 0,
    is_totals_fielder  INTEGER NOT NULL DEFAULT 0,
    is_all_plays       INTEGER NOT NULL DEFAULT 0,
    is_grouping        INTEGER NOT NULL DEFAULT 0,
    is_python          INTEGER NOT NULL DEFAULT 0,
    hidden             INTEGER NOT NULL DEFAULT 0,
    metric_description TEXT,
    dependencies       TEXT
);

CREATE TABLE IF NOT EXISTS hitters (
    player_id          INTEGER NOT NULL,
    name               TEXT NOT NULL,
    team_name          TEXT,
    league             TEXT,
    game_type          TEXT,
    date               TEXT,
    games              INTEGER DEFAULT 0,
    plate_appearances  INTEGER DEFAULT 0,
    at_bats            INTEGER DEFAULT 0,
    runs               INTEGER DEFAULT 0,
    hits               INTEGER DEFAULT 0,
    doubles            INTEGER DEFAULT 0,
    triples            INTEGER DEFAULT 0,
    home_runs          INTEGER DEFAULT 0,
    rbi                INTEGER DEFAULT 0,
    base_on_balls      INTEGER DEFAULT 0,
    intentional_walks  INTEGER DEFAULT 0,
    hit_by_pitch       INTEGER DEFAULT 0,
    sac_flies          INTEGER DEFAULT 0,
    strikeouts         INTEGER DEFAULT 0,
    stolen_bases       INTEGER DEFAULT 0,
    avg                REAL
);

CREATE TABLE IF NOT EXISTS pitchers (
    player_id          INTEGER NOT NULL,
    name               TEXT NOT NULL,
    team_name          TEXT,
    league             TEXT,
    game_type          TEXT,
    date               TEXT,
    games              INTEGER DEFAULT 0,
    games_started      INTEGER DEFAULT 0,
    wins               INTEGER DEFAULT 0,
    losses             INTEGER DEFAULT 0,
    saves              INTEGER DEFAULT 0,
    holds              INTEGER DEFAULT 0,
    innings_pitched    REAL DEFAULT 0,
    at_bats            INTEGER DEFAULT 0,
    hits               INTEGER DEFAULT 0,
    doubles            INTEGER DEFAULT 0,
    triples            INTEGER DEFAULT 0,
    home_runs          INTEGER DEFAULT 0,
    earned_runs        INTEGER DEFAULT 0,
    base_on_balls      INTEGER DEFAULT 0,
    intentional_walks  INTEGER DEFAULT 0,
    hit_by_pitch       INTEGER DEFAULT 0,
    sac_flies          INTEGER DEFAULT 0,
    strikeouts         INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS fielders (
    player_id          INTEGER NOT NULL,
    name               TEXT NOT NULL,
    team_name          TEXT,
    league             TEXT,
    game_type          TEXT,
    date               TEXT,
    position           TEXT,
    games              INTEGER DEFAULT 0,
    innings            REAL DEFAULT 0,
    putouts            INTEGER DEFAULT 0,
    assists            INTEGER DEFAULT 0,
    errors             INTEGER DEFAULT 0,
    double_plays       INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS all_plays (
    game_id            INTEGER,
    date               TEXT,
    game_type          TEXT,
    league             TEXT,
    inning             INTEGER,
    batter_id          INTEGER,
    batter_name        TEXT,
    pitcher_id         INTEGER,
    pitcher_name       TEXT,
    fielder_id         INTEGER,
    fielder_name       TEXT,
    team_batting       TEXT,
    team_fielding      TEXT,
    bat_side           TEXT,
    pitch_hand         TEXT,
    pitch_name         TEXT,
    pitch_result       TEXT,
    start_speed        REAL,
    zone               INTEGER,
    launch_speed       REAL,
    launch_angle       REAL,
    trajectory         TEXT,
    hit_coordinates    TEXT,
    event              TEXT
);

CREATE INDEX IF NOT EXISTS idx_all_plays_batter ON all_plays(batter_id);
CREATE INDEX IF NOT EXISTS idx_all_plays_pitcher ON all_plays(pitcher_id);
CREATE INDEX IF NOT EXISTS idx_all_plays_date ON all_plays(date);
CREATE INDEX IF NOT EXISTS idx_all_plays_pitch_name ON all_plays(pitch_name);

CREATE TABLE IF NOT EXISTS batted_ball_probabilities (
    ev_bin         INTEGER NOT NULL,
    la_bin         INTEGER NOT NULL,
    prob_single    REAL NOT NULL DEFAULT 0,
    prob_double    REAL NOT NULL DEFAULT 0,
    prob_triple    REAL NOT NULL DEFAULT 0,
    prob_home_run  REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (ev_bin, la_bin)
);
";

/// Stock catalog. Multi-expression values are `|`-delimited because the
/// expressions themselves contain commas.
///
/// Column order: name, sql_value, batter, pitcher, fielder, plays, grouping,
/// python, hidden, description, dependencies.
pub const SEED_METRICS: &str = "
INSERT OR IGNORE INTO metrics VALUES
    ('name',              'name',               1, 1, 1, 1, 1, 0, 0, 'Player name', NULL),
    ('player_id',         'player_id',          1, 1, 1, 1, 1, 0, 1, 'Player id', NULL),
    ('team_name',         'team_name',          1, 1, 1, 1, 1, 0, 0, 'Team', NULL),
    ('league',            'league',             1, 1, 1, 1, 1, 0, 0, 'League', NULL),
    ('game_type',         'game_type',          1, 1, 1, 1, 1, 0, 0, 'Game type (R, P, S)', NULL),
    ('pitch_name',        'pitch_name',         0, 0, 0, 1, 1, 0, 0, 'Pitch type', NULL),
    ('inning',            'inning',             0, 0, 0, 1, 1, 0, 0, 'Inning', NULL),

    ('games',             'SUM(games) AS games',                         1, 1, 1, 0, 0, 0, 0, 'Games', NULL),
    ('plate_appearances', 'SUM(plate_appearances) AS plate_appearances', 1, 0, 0, 0, 0, 0, 0, 'Plate appearances', NULL),
    ('at_bats',           'SUM(at_bats) AS at_bats',                     1, 1, 0, 0, 0, 0, 0, 'At bats', NULL),
    ('hits',              'SUM(hits) AS hits',                           1, 1, 0, 0, 0, 0, 0, 'Hits', NULL),
    ('doubles',           'SUM(doubles) AS doubles',                     1, 1, 0, 0, 0, 0, 0, 'Doubles', NULL),
    ('triples',           'SUM(triples) AS triples',                     1, 1, 0, 0, 0, 0, 0, 'Triples', NULL),
    ('home_runs',         'SUM(home_runs) AS home_runs',                 1, 1, 0, 0, 0, 0, 0, 'Home runs', NULL),
    ('runs',              'SUM(runs) AS runs',                           1, 0, 0, 0, 0, 0, 0, 'Runs', NULL),
    ('rbi',               'SUM(rbi) AS rbi',                             1, 0, 0, 0, 0, 0, 0, 'Runs batted in', NULL),
    ('base_on_balls',     'SUM(base_on_balls) AS base_on_balls',         1, 1, 0, 0, 0, 0, 0, 'Walks', NULL),
    ('intentional_walks', 'SUM(intentional_walks) AS intentional_walks', 1, 1, 0, 0, 0, 0, 1, 'Intentional walks', NULL),
    ('hit_by_pitch',      'SUM(hit_by_pitch) AS hit_by_pitch',           1, 1, 0, 0, 0, 0, 0, 'Hit by pitch', NULL),
    ('sac_flies',         'SUM(sac_flies) AS sac_flies',                 1, 1, 0, 0, 0, 0, 1, 'Sacrifice flies', NULL),
    ('strikeouts',        'SUM(strikeouts) AS strikeouts',               1, 1, 0, 0, 0, 0, 0, 'Strikeouts', NULL),
    ('stolen_bases',      'SUM(stolen_bases) AS stolen_bases',           1, 0, 0, 0, 0, 0, 0, 'Stolen bases', NULL),
    ('avg',  'ROUND(CAST(SUM(hits) AS REAL) / NULLIF(SUM(at_bats), 0), 3) AS avg', 1, 1, 0, 0, 0, 0, 0, 'Batting average', NULL),
    ('obp',  'ROUND(CAST(SUM(hits) + SUM(base_on_balls) + SUM(hit_by_pitch) AS REAL) / NULLIF(SUM(at_bats) + SUM(base_on_balls) + SUM(hit_by_pitch) + SUM(sac_flies), 0), 3) AS obp', 1, 1, 0, 0, 0, 0, 0, 'On-base percentage', NULL),
    ('slg',  'ROUND(CAST(SUM(hits) + SUM(doubles) + 2 * SUM(triples) + 3 * SUM(home_runs) AS REAL) / NULLIF(SUM(at_bats), 0), 3) AS slg', 1, 1, 0, 0, 0, 0, 0, 'Slugging percentage', NULL),
    ('ops',  NULL, 0, 0, 0, 0, 0, 1, 0, 'On-base plus slugging', 'obp,slg'),

    ('wins',            'SUM(wins) AS wins',                       0, 1, 0, 0, 0, 0, 0, 'Wins', NULL),
    ('saves',           'SUM(saves) AS saves',                     0, 1, 0, 0, 0, 0, 0, 'Saves', NULL),
    ('innings_pitched', 'SUM(innings_pitched) AS innings_pitched', 0, 1, 0, 0, 0, 0, 0, 'Innings pitched', NULL),
    ('era',  'ROUND(9.0 * SUM(earned_runs) / NULLIF(SUM(innings_pitched), 0), 2) AS era', 0, 1, 0, 0, 0, 0, 0, 'Earned run average', NULL),
    ('whip', 'ROUND(CAST(SUM(base_on_balls) + SUM(hits) AS REAL) / NULLIF(SUM(innings_pitched), 0), 2) AS whip', 0, 1, 0, 0, 0, 0, 0, 'Walks plus hits per inning', NULL),

    ('putouts',  'SUM(putouts) AS putouts', 0, 0, 1, 0, 0, 0, 0, 'Putouts', NULL),
    ('assists',  'SUM(assists) AS assists', 0, 0, 1, 0, 0, 0, 0, 'Assists', NULL),
    ('errors',   'SUM(errors) AS errors',   0, 0, 1, 0, 0, 0, 0, 'Errors', NULL),
    ('fielding_percentage', 'ROUND(CAST(SUM(putouts) + SUM(assists) AS REAL) / NULLIF(SUM(putouts) + SUM(assists) + SUM(errors), 0), 3) AS fielding_percentage', 0, 0, 1, 0, 0, 0, 0, 'Fielding percentage', NULL),

    ('pitches',  'COUNT(*) AS pitches',                         0, 0, 0, 1, 0, 0, 0, 'Pitches seen or thrown', NULL),
    ('avg_ev',   'ROUND(AVG(launch_speed), 1) AS avg_ev',       0, 0, 0, 1, 0, 0, 0, 'Average exit velocity', NULL),
    ('max_ev',   'MAX(launch_speed) AS max_ev',                 0, 0, 0, 1, 0, 0, 0, 'Max exit velocity', NULL),
    ('avg_la',   'ROUND(AVG(launch_angle), 1) AS avg_la',       0, 0, 0, 1, 0, 0, 0, 'Average launch angle', NULL),
    ('batted_balls', 'COUNT(launch_speed) AS batted_balls',     0, 0, 0, 1, 0, 0, 0, 'Batted ball events', NULL),
    ('velo_range', 'MIN(start_speed) AS min_velo|MAX(start_speed) AS max_velo', 0, 0, 0, 1, 0, 0, 1, 'Pitch velocity range', NULL),

    ('hit_speeds',      'launch_speed AS hit_speeds',     0, 0, 0, 1, 0, 0, 1, 'Raw exit velocities', NULL),
    ('launch_angles',   'launch_angle AS launch_angles',  0, 0, 0, 1, 0, 0, 1, 'Raw launch angles', NULL),
    ('zones',           'zone AS zones',                  0, 0, 0, 1, 0, 0, 1, 'Raw zone codes', NULL),
    ('pitch_results',   'pitch_result AS pitch_results',  0, 0, 0, 1, 0, 0, 1, 'Raw pitch results', NULL),
    ('trajectories',    'trajectory AS trajectories',     0, 0, 0, 1, 0, 0, 1, 'Raw batted ball trajectories', NULL),
    ('hit_coordinates', 'hit_coordinates',                0, 0, 0, 1, 0, 0, 1, 'Raw hit coordinates (x:y)', NULL),
    ('bat_sides',       'bat_side AS bat_sides',          0, 0, 0, 1, 0, 0, 1, 'Raw batter sides', NULL),

    ('contact_percent', NULL, 0, 0, 0, 0, 0, 1, 0, 'Contact on swings', 'zones,pitch_results'),
    ('zone_contact',    NULL, 0, 0, 0, 0, 0, 1, 0, 'Contact on in-zone swings', 'zones,pitch_results'),
    ('chase_percent',   NULL, 0, 0, 0, 0, 0, 1, 0, 'Swings at pitches out of the zone', 'zones,pitch_results'),
    ('swing_percent',   NULL, 0, 0, 0, 0, 0, 1, 0, 'Swings per pitch', 'zones,pitch_results'),
    ('zone_swing',      NULL, 0, 0, 0, 0, 0, 1, 0, 'Swings at in-zone pitches', 'zones,pitch_results'),
    ('whiff_percent',   NULL, 0, 0, 0, 0, 0, 1, 0, 'Swinging strikes per swing', 'zones,pitch_results'),
    ('ball_percent',    NULL, 0, 0, 0, 0, 0, 1, 0, 'Balls per pitch', 'zones,pitch_results'),
    ('strike_percent',  NULL, 0, 0, 0, 0, 0, 1, 0, 'Strikes per pitch', 'zones,pitch_results'),

    ('fly_ball_percent',    NULL, 0, 0, 0, 0, 0, 1, 0, 'Fly ball rate', 'trajectories,hit_speeds'),
    ('ground_ball_percent', NULL, 0, 0, 0, 0, 0, 1, 0, 'Ground ball rate', 'trajectories,hit_speeds'),
    ('line_drive_percent',  NULL, 0, 0, 0, 0, 0, 1, 0, 'Line drive rate', 'trajectories,hit_speeds'),
    ('popup_percent',       NULL, 0, 0, 0, 0, 0, 1, 0, 'Popup rate', 'trajectories,hit_speeds'),
    ('avg_ev_fly_ball',     NULL, 0, 0, 0, 0, 0, 1, 0, 'Average exit velocity on fly balls', 'trajectories,hit_speeds'),
    ('avg_ev_ground_ball',  NULL, 0, 0, 0, 0, 0, 1, 0, 'Average exit velocity on ground balls', 'trajectories,hit_speeds'),
    ('avg_ev_line_drive',   NULL, 0, 0, 0, 0, 0, 1, 0, 'Average exit velocity on line drives', 'trajectories,hit_speeds'),
    ('avg_ev_popup',        NULL, 0, 0, 0, 0, 0, 1, 0, 'Average exit velocity on popups', 'trajectories,hit_speeds'),

    ('pulled_fb_percent',   NULL, 0, 0, 0, 0, 0, 1, 0, 'Pulled fly ball rate', 'trajectories,hit_speeds,hit_coordinates,bat_sides'),
    ('avg_ev_on_pulled_fb', NULL, 0, 0, 0, 0, 0, 1, 0, 'Average exit velocity on pulled fly balls', 'trajectories,hit_speeds,hit_coordinates,bat_sides'),
    ('barrel_per_bbe',      NULL, 0, 0, 0, 0, 0, 1, 0, 'Barrels per batted ball event', 'hit_speeds,launch_angles'),
    ('percentile_90',       NULL, 0, 0, 0, 0, 0, 1, 0, '90th percentile exit velocity', 'hit_speeds'),
    ('xwoba',    NULL, 0, 0, 0, 0, 0, 1, 0, 'Expected weighted on-base average', 'hit_speeds,launch_angles,at_bats,base_on_balls,intentional_walks,hit_by_pitch,sac_flies'),
    ('xwobacon', NULL, 0, 0, 0, 0, 0, 1, 0, 'Expected wOBA on contact', 'hit_speeds,launch_angles,at_bats,base_on_balls,intentional_walks,hit_by_pitch,sac_flies');
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SqliteStore, Store};

    #[tokio::test]
    async fn schema_and_seed_apply_twice() {
        let store = SqliteStore::in_memory().unwrap();
        for _ in 0..2 {
            store.create_schema().await.unwrap();
            store.execute_batch(SEED_METRICS).await.unwrap();
        }
        let rows = store
            .fetch_all("SELECT COUNT(*) AS n FROM metrics", &[])
            .await
            .unwrap();
        let n = rows[0].get_f64("n").unwrap();
        assert!(n > 50.0, "expected the stock catalog, got {n} rows");
    }

    #[tokio::test]
    async fn every_dependency_is_cataloged() {
        let store = SqliteStore::in_memory().unwrap();
        store.create_schema().await.unwrap();
        store.execute_batch(SEED_METRICS).await.unwrap();

        let rows = store
            .fetch_all("SELECT metric_name, dependencies FROM metrics", &[])
            .await
            .unwrap();
        let names: Vec<String> = rows
            .iter()
            .filter_map(|r| r.get("metric_name").and_then(|v| v.as_str()).map(String::from))
            .collect();
        for row in &rows {
            let Some(deps) = row.get("dependencies").and_then(|v| v.as_str()) else {
                continue;
            };
            for dep in deps.split(',') {
                assert!(names.iter().any(|n| n == dep), "unknown dependency {dep}");
            }
        }
    }
}
