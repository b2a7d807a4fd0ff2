// Combine the two pre-aggregated source results on the group key.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::QueryError;
use crate::query::BuiltQuery;
use crate::value::{GroupKey, Row};

/// One executed source: its query and the rows it returned.
#[derive(Debug, Clone)]
pub struct SourceRows {
    pub query: BuiltQuery,
    pub rows: Vec<Row>,
}

/// Apply the emptiness rules, then join.
///
/// Neither side live is `EmptyQuery`. A single live side is returned as is,
/// even when it has no rows. With both sides live, either side returning
/// nothing (or no group matching across sides) is `NoDataFound`.
pub fn merge(
    totals: Option<SourceRows>,
    plays: Option<SourceRows>,
    groups: &[String],
) -> Result<Vec<Row>, QueryError> {
    match (totals, plays) {
        (None, None) => Err(QueryError::EmptyQuery),
        (Some(only), None) | (None, Some(only)) => {
            debug!("single source: {} row(s)", only.rows.len());
            Ok(only.rows)
        }
        (Some(totals), Some(plays)) => {
            let no_data = || QueryError::NoDataFound {
                totals_sql: totals.query.sql.clone(),
                plays_sql: plays.query.sql.clone(),
            };
            if totals.rows.is_empty() || plays.rows.is_empty() {
                info!(
                    "no data: totals returned {} row(s), plays {}",
                    totals.rows.len(),
                    plays.rows.len()
                );
                return Err(no_data());
            }
            let merged = hash_join(&totals.rows, &plays.rows, groups);
            if merged.is_empty() {
                info!("no group matched across sources");
                return Err(no_data());
            }
            debug!(
                "merged {} totals row(s) with {} plays row(s) into {}",
                totals.rows.len(),
                plays.rows.len(),
                merged.len()
            );
            Ok(merged)
        }
    }
}

/// Inner join on `groups`, in `left` order. On a column both sides carry,
/// the left value wins. With no groups each side is one aggregate row and
/// the two are combined.
pub fn hash_join(left: &[Row], right: &[Row], groups: &[String]) -> Vec<Row> {
    let mut index: HashMap<GroupKey, Vec<&Row>> = HashMap::with_capacity(right.len());
    for row in right {
        index.entry(GroupKey::from_row(row, groups)).or_default().push(row);
    }

    let mut out = Vec::with_capacity(left.len());
    for row in left {
        let Some(matches) = index.get(&GroupKey::from_row(row, groups)) else {
            continue;
        };
        for other in matches {
            let mut combined = row.clone();
            for (column, value) in other.iter() {
                if !combined.contains(column) {
                    combined.insert(column, value.clone());
                }
            }
            out.push(combined);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn source(sql: &str, rows: Vec<Row>) -> Option<SourceRows> {
        Some(SourceRows {
            query: BuiltQuery {
                sql: sql.into(),
                args: vec![],
                columns: vec![],
            },
            rows,
        })
    }

    fn row(fields: &[(&str, Value)]) -> Row {
        fields.iter().cloned().collect()
    }

    fn groups() -> Vec<String> {
        vec!["name".into(), "player_id".into()]
    }

    #[test]
    fn nothing_live_is_empty_query() {
        assert!(matches!(merge(None, None, &[]), Err(QueryError::EmptyQuery)));
    }

    #[test]
    fn single_side_passes_through() {
        let rows = vec![row(&[("hits", Value::Integer(3))])];
        let out = merge(source("t", rows.clone()), None, &[]).unwrap();
        assert_eq!(out, rows);
        let out = merge(None, source("p", vec![]), &[]).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn empty_side_is_no_data() {
        let plays = (0..3)
            .map(|i| row(&[("name", Value::from("A")), ("player_id", Value::Integer(i))]))
            .collect();
        let err = merge(source("totals sql", vec![]), source("plays sql", plays), &groups()).unwrap_err();
        match err {
            QueryError::NoDataFound { totals_sql, plays_sql } => {
                assert_eq!(totals_sql, "totals sql");
                assert_eq!(plays_sql, "plays sql");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn joins_on_group_key_in_totals_order() {
        let totals = vec![
            row(&[("name", "B".into()), ("player_id", Value::Integer(2)), ("hits", Value::Integer(20))]),
            row(&[("name", "A".into()), ("player_id", Value::Integer(1)), ("hits", Value::Integer(10))]),
            row(&[("name", "C".into()), ("player_id", Value::Integer(3)), ("hits", Value::Integer(30))]),
        ];
        let plays = vec![
            row(&[("name", "A".into()), ("player_id", Value::Real(1.0)), ("avg_ev", Value::Real(90.0))]),
            row(&[("name", "B".into()), ("player_id", Value::Integer(2)), ("avg_ev", Value::Real(95.0))]),
        ];
        let out = merge(source("t", totals), source("p", plays), &groups()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get("name"), Some(&Value::from("B")));
        assert_eq!(out[0].get("avg_ev"), Some(&Value::Real(95.0)));
        // Integral reals key the same as integers; the left value is kept.
        assert_eq!(out[1].get("player_id"), Some(&Value::Integer(1)));
        assert_eq!(
            out[1].columns().collect::<Vec<_>>(),
            ["name", "player_id", "hits", "avg_ev"]
        );
    }

    #[test]
    fn ungrouped_aggregates_combine() {
        let out = merge(
            source("t", vec![row(&[("at_bats", Value::Integer(500))])]),
            source("p", vec![row(&[("events", Value::Integer(2100))])]),
            &[],
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("events"), Some(&Value::Integer(2100)));
    }

    #[test]
    fn null_group_values_match_each_other() {
        let out = hash_join(
            &[row(&[("league", Value::Null), ("hits", Value::Integer(1))])],
            &[row(&[("league", Value::Null), ("pitches", Value::Integer(9))])],
            &["league".to_string()],
        );
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn disjoint_groups_are_no_data() {
        let err = merge(
            source("t", vec![row(&[("team_name", "NYY".into())])]),
            source("p", vec![row(&[("team_name", "BOS".into())])]),
            &["team_name".to_string()],
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::NoDataFound { .. }));
    }
}
