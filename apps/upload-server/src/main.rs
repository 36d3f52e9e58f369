///! Picture frame upload server
///! Accepts image batches over HTTP and raises the upload marker for `frame-cli watch`

use anyhow::Context;
use clap::Parser;
use settings::{default_config_path, FrameConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use upload_server::{serve, AppState};

#[derive(Parser)]
#[command(name = "upload-server")]
#[command(about = "Picture frame upload server")]
#[command(version)]
struct Args {
    /// Config file (defaults to the upload preset when missing)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the bind address from the config
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("upload_server=info,tower_http=info")),
        )
        .init();

    let path = args.config.unwrap_or_else(default_config_path);
    let config = if path.exists() {
        FrameConfig::load(&path).with_context(|| format!("loading {}", path.display()))?
    } else {
        info!("No config at {}, using upload defaults", path.display());
        FrameConfig::upload()
    };
    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());

    info!("Starting picture frame upload server...");
    serve(AppState::from_config(&config), &bind, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
    .with_context(|| format!("serving on {}", bind))?;

    info!("Upload server stopped");
    Ok(())
}
