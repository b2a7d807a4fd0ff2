// statline command-line entry point.
//
// Startup sequence:
// 1. Parse arguments
// 2. Initialize tracing (stderr, so stdout stays machine-readable)
// 3. Seed config/ from defaults/ and load it
// 4. Open the database
// 5. Run the subcommand, printing JSON to stdout

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use statline_engine::config::{self, Config};
use statline_engine::schema::SEED_METRICS;
use statline_engine::{CancelToken, Engine, FilterSet, OrderKey, PlayerType, SqliteStore, Store};

#[derive(Debug, Parser)]
#[command(name = "statline", version, about = "Metric-driven baseball stat queries")]
struct Cli {
    /// Directory holding config/ and defaults/.
    #[arg(long, env = "STATLINE_HOME", default_value = ".", global = true)]
    base_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve and run a metric query.
    Query {
        /// Metric names, in output order.
        #[arg(required = true)]
        metrics: Vec<String>,

        #[arg(short = 't', long, value_enum, default_value_t = PlayerArg::Batter)]
        player_type: PlayerArg,

        /// `key=value`, `key=a,b` or `key=` (group by key). Repeatable.
        #[arg(short, long = "filter", value_name = "KEY=VALUE")]
        filters: Vec<String>,

        /// Column to order by; prefix with `-` for descending. Repeatable.
        #[arg(short, long = "order", value_name = "COLUMN", allow_hyphen_values = true)]
        order: Vec<String>,

        /// Print the resolved plan instead of running it.
        #[arg(long)]
        explain: bool,
    },

    /// List the visible metrics in the catalog.
    Catalog,

    /// Create config files, tables and the stock metric catalog.
    Init,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PlayerArg {
    Batter,
    Pitcher,
    Fielder,
}

impl From<PlayerArg> for PlayerType {
    fn from(arg: PlayerArg) -> Self {
        match arg {
            PlayerArg::Batter => PlayerType::Batter,
            PlayerArg::Pitcher => PlayerType::Pitcher,
            PlayerArg::Fielder => PlayerType::Fielder,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    let config = config::load_config(&cli.base_dir).context("failed to load configuration")?;
    let db_path = database_path(&cli.base_dir, &config);
    let store = SqliteStore::open(&db_path, config.database.pool_size)
        .with_context(|| format!("failed to open database at {db_path}"))?;
    info!("database opened at {} ({} connection(s))", db_path, store.pool_size());

    match cli.command {
        Command::Init => init(&store).await,
        Command::Catalog => {
            let engine = Engine::new(Arc::new(store), &config);
            catalog(&engine).await
        }
        Command::Query {
            metrics,
            player_type,
            filters,
            order,
            explain,
        } => {
            let engine = Engine::new(Arc::new(store), &config);
            let filters = parse_filters(&filters)?;
            query(&engine, &metrics, player_type.into(), &filters, &order, explain).await
        }
    }
}

async fn init(store: &SqliteStore) -> anyhow::Result<()> {
    store.create_schema().await.context("failed to create schema")?;
    store
        .execute_batch(SEED_METRICS)
        .await
        .context("failed to seed metric catalog")?;
    let tables = store
        .table_columns("metrics")
        .await
        .context("failed to read metrics table")?;
    info!("schema ready; metrics table has {} column(s)", tables.len());
    println!("initialized {}", store.path());
    Ok(())
}

async fn catalog(engine: &Engine) -> anyhow::Result<()> {
    let catalog = engine.catalog().await.context("failed to load metric catalog")?;
    let listing: Vec<serde_json::Value> = catalog
        .listing()
        .into_iter()
        .map(|m| {
            serde_json::json!({
                "name": m.name,
                "description": m.description,
                "computed": m.computed,
                "grouping": m.grouping,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&listing)?);
    Ok(())
}

async fn query(
    engine: &Engine,
    metrics: &[String],
    player_type: PlayerType,
    filters: &FilterSet,
    order: &[String],
    explain: bool,
) -> anyhow::Result<()> {
    let mut query = engine
        .resolve(metrics, player_type, filters)
        .await
        .context("failed to resolve query")?;
    for key in order {
        query.order_by(OrderKey::parse(key));
    }

    if explain {
        println!("{}", serde_json::to_string_pretty(&query.explain())?);
        return Ok(());
    }

    // Ctrl+C abandons in-flight store round-trips.
    let cancel = CancelToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted; cancelling query");
                cancel.cancel();
            }
        })
    };

    let result = engine.execute(&mut query, &cancel).await;
    watcher.abort();
    let result = result.context("query failed")?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn parse_filters(pairs: &[String]) -> anyhow::Result<FilterSet> {
    let mut filters = FilterSet::new();
    for pair in pairs {
        let Some((key, value)) = FilterSet::parse_pair(pair) else {
            bail!("invalid filter `{pair}`; expected KEY=VALUE");
        };
        filters.insert(&key, value);
    }
    Ok(filters)
}

/// A relative database path is taken relative to the base directory.
fn database_path(base_dir: &Path, config: &Config) -> String {
    let path = Path::new(&config.database.path);
    if path.is_absolute() || config.database.path == ":memory:" {
        config.database.path.clone()
    } else {
        base_dir.join(path).to_string_lossy().into_owned()
    }
}

/// Log to stderr. `RUST_LOG` overrides the default filter.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("statline_engine=info,statline=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
