use clap::Parser;
use cue_core::CueConfig;
use cue_server::subsystems::status::TracingSink;
use cue_server::subsystems::AppContext;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "cue.toml")]
    config: String,

    #[arg(long)]
    health: bool,

    /// Apply pending database migrations and exit.
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience — production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match CueConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Connect to DB
    let pool = match cue_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match cue_core::db::health_check(&pool).await {
            Ok(v) => println!("PostgreSQL connected: {}", v),
            Err(e) => {
                println!("PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("Cue DB health check passed");
        return Ok(());
    }

    if args.migrate {
        sqlx::migrate!("./migrations").run(&pool).await?;
        println!("Migrations applied");
        return Ok(());
    }

    let provider = match cue_core::HttpProvider::new(config.provider.clone()) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            eprintln!("Failed to create provider client: {}", e);
            std::process::exit(1);
        }
    };

    let store = Arc::new(cue_core::PgStore::new(pool));
    let ctx = AppContext::new(config, store, provider, Arc::new(TracingSink));

    // Shutdown fan-out
    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // Spawn HTTP control surface if enabled
    if ctx.config.http.enabled {
        let http_ctx = ctx.clone();
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = cue_server::http::start_http_server(http_ctx, http_shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    cue_server::orchestrator::run(ctx, tx.subscribe()).await?;

    Ok(())
}
