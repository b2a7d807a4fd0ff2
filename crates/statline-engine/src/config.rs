// Configuration loading and parsing (statline.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// statline.toml structs
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "statline.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".into(),
            pool_size: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_concurrent_rows")]
    pub max_concurrent_rows: usize,
    #[serde(default)]
    pub join_strategy: JoinStrategy,
    /// Applied as a `game_type` filter when a request carries none.
    #[serde(default)]
    pub default_game_type: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_rows: default_max_concurrent_rows(),
            join_strategy: JoinStrategy::default(),
            default_game_type: None,
        }
    }
}

/// How the two source result sets are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JoinStrategy {
    /// Run both source queries and hash-join the rows in process.
    #[default]
    Memory,
    /// One statement joining both grouped sub-selects with INNER JOIN.
    SqlInner,
    /// As `SqlInner`, but LEFT JOIN keeps totals rows without plays.
    SqlLeft,
}

fn default_pool_size() -> usize {
    4
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_max_concurrent_rows() -> usize {
    10
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/statline.toml` relative to `base_dir`.
///
/// Does not seed from defaults; `load_config()` does that first.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    let config: Config = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    validate(&config)?;

    Ok(config)
}

/// Copy `defaults/statline.toml` into `config/` unless a copy is already
/// there. Returns the path written, if any. An existing copy is never touched.
pub fn seed_config(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let config_dir = base_dir.join("config");
    let target = config_dir.join(CONFIG_FILE);
    if target.exists() {
        return Ok(None);
    }

    let source = base_dir.join("defaults").join(CONFIG_FILE);
    if !source.is_file() {
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "no config/{CONFIG_FILE} and no defaults/{CONFIG_FILE} in {}",
                base_dir.display()
            ),
        });
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create {}: {e}", config_dir.display()),
    })?;
    std::fs::copy(&source, &target).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to copy {} to {}: {e}", source.display(), target.display()),
    })?;
    Ok(Some(target))
}

/// Seed the config file from `base_dir/defaults` if needed, then load.
pub fn load_config(base_dir: &Path) -> Result<Config, ConfigError> {
    seed_config(base_dir)?;
    load_config_from(base_dir)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.database.path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "database.path".into(),
            message: "must not be empty".into(),
        });
    }

    let positive: &[(&str, u64)] = &[
        ("database.pool_size", config.database.pool_size as u64),
        ("cache.ttl_secs", config.cache.ttl_secs),
        (
            "engine.max_concurrent_rows",
            config.engine.max_concurrent_rows as u64,
        ),
    ];
    for (name, val) in positive {
        if *val == 0 {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: "must be greater than 0".into(),
            });
        }
    }

    if let Some(game_type) = &config.engine.default_game_type {
        if game_type.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                field: "engine.default_game_type".into(),
                message: "must be omitted rather than empty".into(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn crate_root() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    }

    /// Fresh temp dir with `config/statline.toml` holding `body`.
    fn config_dir_with(name: &str, body: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config").join(CONFIG_FILE), body).unwrap();
        tmp
    }

    #[test]
    fn load_shipped_defaults() {
        let tmp = std::env::temp_dir().join("statline_config_defaults");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::copy(
            crate_root().join("defaults").join(CONFIG_FILE),
            tmp.join("config").join(CONFIG_FILE),
        )
        .unwrap();

        let config = load_config_from(&tmp).expect("defaults should load");
        assert_eq!(config.database.path, "statline.db");
        assert_eq!(config.database.pool_size, 4);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.engine.max_concurrent_rows, 10);
        assert_eq!(config.engine.join_strategy, JoinStrategy::Memory);
        assert!(config.engine.default_game_type.is_none());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn optional_sections_fall_back_to_defaults() {
        let tmp = config_dir_with(
            "statline_config_minimal",
            "[database]\npath = \"x.db\"\n",
        );
        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.database.pool_size, 4);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.engine.join_strategy, JoinStrategy::Memory);
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn parses_join_strategy_and_game_type() {
        let tmp = config_dir_with(
            "statline_config_engine",
            "[database]\npath = \"x.db\"\n\n[engine]\njoin_strategy = \"sql_left\"\ndefault_game_type = \"R\"\n",
        );
        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.engine.join_strategy, JoinStrategy::SqlLeft);
        assert_eq!(config.engine.default_game_type.as_deref(), Some("R"));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_ttl() {
        let tmp = config_dir_with(
            "statline_config_zero_ttl",
            "[database]\npath = \"x.db\"\n\n[cache]\nttl_secs = 0\n",
        );
        match load_config_from(&tmp).unwrap_err() {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "cache.ttl_secs"),
            other => panic!("expected ValidationError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_fan_out() {
        let tmp = config_dir_with(
            "statline_config_zero_rows",
            "[database]\npath = \"x.db\"\n\n[engine]\nmax_concurrent_rows = 0\n",
        );
        match load_config_from(&tmp).unwrap_err() {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "engine.max_concurrent_rows")
            }
            other => panic!("expected ValidationError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn unknown_join_strategy_is_a_parse_error() {
        let tmp = config_dir_with(
            "statline_config_bad_join",
            "[database]\npath = \"x.db\"\n\n[engine]\njoin_strategy = \"nested_loop\"\n",
        );
        match load_config_from(&tmp).unwrap_err() {
            ConfigError::ParseError { path, .. } => assert!(path.ends_with(CONFIG_FILE)),
            other => panic!("expected ParseError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_file_is_reported() {
        let tmp = std::env::temp_dir().join("statline_config_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        match load_config_from(&tmp).unwrap_err() {
            ConfigError::FileNotFound { path } => assert!(path.ends_with(CONFIG_FILE)),
            other => panic!("expected FileNotFound, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn seed_config_copies_once() {
        let tmp = std::env::temp_dir().join("statline_config_seed");
        let _ = fs::remove_dir_all(&tmp);
        let defaults_dir = tmp.join("defaults");
        fs::create_dir_all(&defaults_dir).unwrap();
        fs::copy(
            crate_root().join("defaults").join(CONFIG_FILE),
            defaults_dir.join(CONFIG_FILE),
        )
        .unwrap();

        let seeded = seed_config(&tmp).unwrap();
        assert_eq!(seeded, Some(tmp.join("config").join(CONFIG_FILE)));
        assert!(load_config(&tmp).is_ok());

        // Second pass leaves the existing copy alone.
        fs::write(tmp.join("config").join(CONFIG_FILE), "# edited\n").unwrap();
        assert_eq!(seed_config(&tmp).unwrap(), None);
        let content = fs::read_to_string(tmp.join("config").join(CONFIG_FILE)).unwrap();
        assert_eq!(content, "# edited\n");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn seed_config_without_defaults_keeps_existing_copy() {
        let tmp = config_dir_with("statline_config_no_defaults", "[database]\npath = \"x.db\"\n");
        assert_eq!(seed_config(&tmp).unwrap(), None);
        assert_eq!(load_config(&tmp).unwrap().database.path, "x.db");
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn seed_config_errors_when_both_missing() {
        let tmp = std::env::temp_dir().join("statline_config_both_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        match seed_config(&tmp).unwrap_err() {
            ConfigError::DefaultsCopyError { message } => {
                assert!(message.contains("no defaults/statline.toml"))
            }
            other => panic!("expected DefaultsCopyError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }
}
