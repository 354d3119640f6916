use anyhow::Context;
use backend_lib::{
    config::{LogFormat, Settings},
    ws_router, AppState,
};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Real-time hub for referee decision lights
#[derive(Debug, Parser)]
#[command(name = "reflights-server", version, about)]
struct Args {
    /// TOML config file (defaults to ./reflights.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the config
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Log level, overriding the config
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(bind) = args.bind {
        settings.bind_addr = bind;
    }
    if let Some(level) = args.log_level {
        settings.log_level = level;
    }
    settings.validate().context("validating configuration")?;

    init_tracing(&settings);

    let state = Arc::new(AppState::new(settings.clone())?);
    spawn_sweeper(Arc::clone(&state));

    let app = ws_router::create_router(state);

    let listener = TcpListener::bind(settings.bind_addr)
        .await
        .with_context(|| format!("binding {}", settings.bind_addr))?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match settings.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Periodically drop meets nobody has used for the retention window.
fn spawn_sweeper(state: Arc<AppState>) {
    let retention = state.settings.session_retention();
    let mut interval = tokio::time::interval(state.settings.sweep_interval());
    tokio::spawn(async move {
        loop {
            interval.tick().await;
            state.meets.sweep_idle(retention).await;
        }
    });
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}
