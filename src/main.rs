use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use embedding_search::config::ServiceConfig;
use embedding_search::{api, store};

#[derive(Parser)]
#[command(name = "embedding-search", version, about = "Embedding store and similarity search service")]
struct Cli {
    /// Log output format
    #[arg(long, global = true, env = "EMBEDDING_SEARCH_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the HTTP API (ingest, lookup, search, documents)
    Serve(ServiceConfig),
    /// Apply pending Postgres schema migrations and exit
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    tracing::info!(version = embedding_search::VERSION, "embedding search starting");

    match cli.cmd {
        Cmd::Serve(config) => api::run(config).await?,
        Cmd::Migrate { database_url } => {
            let pool = store::create_pool(&database_url, 1)?;
            store::run_migrations(&pool)
                .await
                .context("failed to apply migrations")?;
            tracing::info!("migrations complete");
        }
    }
    Ok(())
}
