//! Gatehouse API - main entry point.

use clap::Parser;

use gatehouse_api::config::AppConfig;
use gatehouse_api::server::create_app;
use gatehouse_api::{logging, scheduler};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "gatehouse-api")]
#[command(about = "LLM gateway and workflow orchestrator")]
#[command(version)]
struct Args {
    /// Host to bind to.
    #[arg(long, env = "GATEHOUSE_HOST")]
    host: Option<String>,

    /// Port to listen on.
    #[arg(short, long, env = "GATEHOUSE_PORT")]
    port: Option<u16>,

    /// Log level.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,

    /// Config file path.
    #[arg(short, long, env = "GATEHOUSE_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level);

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let (app, state) = create_app(config).await?;

    // The scheduler blocks on cluster leadership internally.
    tokio::spawn(scheduler::run(state));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
