// Caller-supplied filters and the semantic keys sources understand.

use std::fmt;

use serde::Deserialize;

/// One filter value. Lists become `IN (...)`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    One(String),
    Many(Vec<String>),
}

impl FilterValue {
    /// An empty string or empty list means "group by this key" rather than
    /// "filter on it".
    pub fn is_empty(&self) -> bool {
        match self {
            FilterValue::One(v) => v.trim().is_empty(),
            FilterValue::Many(vs) => vs.iter().all(|v| v.trim().is_empty()),
        }
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            FilterValue::One(v) => vec![v.as_str()],
            FilterValue::Many(vs) => vs
                .iter()
                .map(String::as_str)
                .filter(|v| !v.trim().is_empty())
                .collect(),
        }
    }

    /// First value, for keys that take a single scalar.
    pub fn first(&self) -> Option<&str> {
        self.values().into_iter().next()
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        FilterValue::One(v.to_string())
    }
}

impl From<Vec<&str>> for FilterValue {
    fn from(vs: Vec<&str>) -> Self {
        FilterValue::Many(vs.into_iter().map(String::from).collect())
    }
}

/// Semantic filter keys. Anything unrecognised is a plain column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKey<'a> {
    Name,
    Team,
    StartDate,
    EndDate,
    Year,
    GameType,
    League,
    Column(&'a str),
}

impl<'a> FilterKey<'a> {
    pub fn parse(key: &'a str) -> Self {
        match key {
            "name" => FilterKey::Name,
            "team_name" | "team" => FilterKey::Team,
            "start_date" => FilterKey::StartDate,
            "end_date" => FilterKey::EndDate,
            "year" | "season" => FilterKey::Year,
            "game_type" => FilterKey::GameType,
            "league" => FilterKey::League,
            other => FilterKey::Column(other),
        }
    }

    /// Range keys are applied as a pair and never turn into a group-by.
    pub fn is_range(self) -> bool {
        matches!(
            self,
            FilterKey::StartDate | FilterKey::EndDate | FilterKey::Year
        )
    }

    /// Generic column name the key groups by.
    pub fn group_column(self) -> &'a str {
        match self {
            FilterKey::Name => "name",
            FilterKey::Team => "team_name",
            FilterKey::StartDate | FilterKey::EndDate | FilterKey::Year => "date",
            FilterKey::GameType => "game_type",
            FilterKey::League => "league",
            FilterKey::Column(c) => c,
        }
    }
}

impl fmt::Display for FilterKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FilterKey::StartDate => "start_date",
            FilterKey::EndDate => "end_date",
            FilterKey::Year => "year",
            other => other.group_column(),
        })
    }
}

/// Ordered filter mapping. Re-inserting a key replaces its value in place so
/// argument order stays stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "std::collections::BTreeMap<String, FilterValue>")]
pub struct FilterSet {
    entries: Vec<(String, FilterValue)>,
}

impl From<std::collections::BTreeMap<String, FilterValue>> for FilterSet {
    fn from(map: std::collections::BTreeMap<String, FilterValue>) -> Self {
        FilterSet {
            entries: map.into_iter().collect(),
        }
    }
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<FilterValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<FilterValue>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&FilterValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse `key=value` (or `key=a,b,c`). `key=` groups by `key`.
    pub fn parse_pair(pair: &str) -> Option<(String, FilterValue)> {
        let (key, value) = pair.split_once('=')?;
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        let value = if value.contains(',') {
            FilterValue::Many(value.split(',').map(|v| v.trim().to_string()).collect())
        } else {
            FilterValue::One(value.trim().to_string())
        };
        Some((key.to_string(), value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_values_mean_group_by() {
        assert!(FilterValue::from("").is_empty());
        assert!(FilterValue::Many(vec![]).is_empty());
        assert!(FilterValue::from(vec!["", " "]).is_empty());
        assert!(!FilterValue::from("NYY").is_empty());
    }

    #[test]
    fn semantic_keys_parse() {
        assert_eq!(FilterKey::parse("team"), FilterKey::Team);
        assert_eq!(FilterKey::parse("season"), FilterKey::Year);
        assert_eq!(FilterKey::parse("pitch_name"), FilterKey::Column("pitch_name"));
        assert!(FilterKey::parse("end_date").is_range());
        assert!(!FilterKey::parse("league").is_range());
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut set = FilterSet::new().with("year", "2023").with("team_name", "NYY");
        set.insert("year", "2024");
        let keys: Vec<_> = set.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["year", "team_name"]);
        assert_eq!(set.get("year"), Some(&FilterValue::from("2024")));
    }

    #[test]
    fn parse_pair_handles_lists_and_blanks() {
        assert_eq!(
            FilterSet::parse_pair("team_name=NYY,BOS"),
            Some(("team_name".into(), FilterValue::from(vec!["NYY", "BOS"])))
        );
        assert_eq!(
            FilterSet::parse_pair("pitch_name="),
            Some(("pitch_name".into(), FilterValue::from("")))
        );
        assert_eq!(FilterSet::parse_pair("no_equals"), None);
    }

    #[test]
    fn deserializes_from_json_object() {
        let set: FilterSet =
            serde_json::from_str(r#"{"year": "2023", "team_name": ["NYY", "BOS"]}"#).unwrap();
        assert_eq!(set.get("year"), Some(&FilterValue::from("2023")));
        assert_eq!(set.get("team_name"), Some(&FilterValue::from(vec!["NYY", "BOS"])));
    }
}
