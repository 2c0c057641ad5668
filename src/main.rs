use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tracing_subscriber::EnvFilter;

use sportfolios_engine::{jobs, server, storage, types::AppConfig};

#[derive(Parser, Debug)]
#[command(name = "sportfolios-engine")]
#[command(about = "Fantasy-sports prediction market pricing and trading core", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP surface and the scheduled-undo worker
    Serve {},
    /// Run the periodic scheduler (snapshotter, valuations, trading bot)
    Jobs {},
    /// Seed the key-value store from the data directory
    InitStore {},
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "sportfolios_engine=debug,info");
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    tracing::debug!(target: "engine", config = %cli.config, "loading config");
    let cfg = AppConfig::from_file(&cli.config)?;
    tracing::info!(
        target: "engine",
        config = %cli.config,
        redis = %cfg.redis.url,
        data_dir = %cfg.data.dir.display(),
        "config loaded"
    );

    match cli.command.unwrap_or(Commands::Serve {}) {
        Commands::Serve {} => server::serve(cfg).await?,
        Commands::Jobs {} => jobs::scheduler::run(cfg).await?,
        Commands::InitStore {} => {
            let store = storage::RedisStore::connect(&cfg.redis).await?;
            let markets = storage::seed::seed_store(&store, &cfg.data.dir).await?;
            tracing::info!(target: "engine", markets, "store initialised");
        }
    }

    Ok(())
}
