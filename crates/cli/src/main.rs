use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use media_io::{probe_video, Encoder, FfmpegEncoder, ImageFilter};
use pipeline::{ChangeSource, CloudSource, Orchestrator, RebuildPlan, UploadSource};
use playback::{DefaultImage, PlaybackController};
use settings::{default_config_path, FrameConfig, Variant};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sync::{DriveFolder, LocalFolder, UploadMailbox};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "frame-cli")]
#[command(about = "Picture frame controller - turns a folder of images into a looping slideshow")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (JSON). Defaults to the platform data dir, then to the
    /// preset of the chosen command.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror the cloud folder and keep the slideshow in sync with it
    Cloud {
        /// Use a local or mounted directory as the remote instead of Drive
        #[arg(long)]
        local_source: Option<PathBuf>,
    },

    /// Run the upload server and the upload watcher together
    Upload,

    /// Run the upload watcher only (pair with `upload-server`)
    Watch,

    /// Normalize a folder of images and encode it once
    Build {
        /// Folder with the source images
        #[arg(short, long)]
        input: PathBuf,

        /// Output video (defaults to the configured video file)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render and display the default image
    ShowDefault,

    /// Print configuration, folder contents and the current video
    Status,

    /// Write a complete config file for a variant
    InitConfig {
        /// Where to write the config
        path: PathBuf,

        #[arg(long, value_enum, default_value = "cloud")]
        variant: VariantArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum VariantArg {
    Cloud,
    Upload,
}

impl From<VariantArg> for Variant {
    fn from(v: VariantArg) -> Self {
        match v {
            VariantArg::Cloud => Variant::Cloud,
            VariantArg::Upload => Variant::Upload,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Cloud { local_source } => {
            let config = load_config(config_path, Variant::Cloud)?;
            cloud_command(config, local_source).await
        }
        Commands::Upload => {
            let config = load_config(config_path, Variant::Upload)?;
            upload_command(config).await
        }
        Commands::Watch => {
            let config = load_config(config_path, Variant::Upload)?;
            run_loop(UploadSource::from_config(&config), &config).await
        }
        Commands::Build { input, output } => {
            let config = load_config(config_path, Variant::Cloud)?;
            build_command(config, input, output).await
        }
        Commands::ShowDefault => {
            let config = load_config(config_path, Variant::Cloud)?;
            show_default_command(config)
        }
        Commands::Status => {
            let config = load_config(config_path, Variant::Cloud)?;
            status_command(config, config_path)
        }
        Commands::InitConfig { path, variant } => init_config_command(path, variant.into()),
    }
}

fn load_config(explicit: Option<&Path>, variant: Variant) -> Result<FrameConfig> {
    if let Some(path) = explicit {
        return FrameConfig::load(path).with_context(|| format!("loading {}", path.display()));
    }
    let path = default_config_path();
    if path.exists() {
        info!("Using config {}", path.display());
        FrameConfig::load(&path).with_context(|| format!("loading {}", path.display()))
    } else {
        info!("No config file found, using {} defaults", variant);
        Ok(FrameConfig::for_variant(variant))
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn run_loop<S: ChangeSource>(source: S, config: &FrameConfig) -> Result<()> {
    let encoder: Arc<dyn Encoder> = Arc::new(FfmpegEncoder::new());
    let controller = PlaybackController::from_config(config);
    let mut orchestrator = Orchestrator::new(source, config, encoder, controller);
    orchestrator.run(shutdown_signal()).await;
    Ok(())
}

async fn cloud_command(config: FrameConfig, local_source: Option<PathBuf>) -> Result<()> {
    if let Some(dir) = local_source {
        info!("Mirroring local folder {}", dir.display());
        let remote = LocalFolder::new(dir, config.image_filter());
        return run_loop(CloudSource::from_config(remote, &config), &config).await;
    }

    if config.drive.folder_id.is_empty() {
        bail!("drive.folder_id is not set; add it to the config or pass --local-source");
    }
    let remote = DriveFolder::from_credentials(
        config.drive.folder_id.clone(),
        &config.drive.credentials_file,
    )
    .await
    .with_context(|| {
        format!(
            "reading credentials {}",
            config.drive.credentials_file.display()
        )
    })?;
    info!("Mirroring Drive folder {}", remote.folder_id());
    run_loop(CloudSource::from_config(remote, &config), &config).await
}

async fn upload_command(config: FrameConfig) -> Result<()> {
    let state = upload_server::AppState::from_config(&config);
    let bind = config.server.bind.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = upload_server::serve(state, &bind, shutdown_signal()).await {
            error!("Upload server on {} failed: {}", bind, e);
        }
    });

    run_loop(UploadSource::from_config(&config), &config).await?;
    server.await.context("upload server task")?;
    Ok(())
}

async fn build_command(config: FrameConfig, input: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let mut plan = RebuildPlan::from_config(&config);
    if let Some(output) = output {
        plan.video_file = output;
    }
    info!(
        "Building {} from {} at {}",
        plan.video_file.display(),
        input.display(),
        plan.size
    );

    let video = tokio::task::spawn_blocking(move || plan.rebuild(&input, &FfmpegEncoder::new()))
        .await?
        .context("building slideshow")?;

    let summary = serde_json::json!({
        "video": video.path,
        "frames": video.frames,
        "frame_duration_secs": video.frame_duration_secs,
        "fps": video.fps,
        "codec": video.codec,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn show_default_command(config: FrameConfig) -> Result<()> {
    let controller = PlaybackController::from_config(&config);
    let image = DefaultImage::from_config(&config);
    let handle = controller
        .show_default(&image, None)
        .context("showing default image")?;
    info!(
        "Viewer started on {} (pid {})",
        handle.target().display(),
        handle.pid()
    );
    Ok(())
}

fn count_images(dir: &Path, filter: &ImageFilter) -> Option<usize> {
    let entries = std::fs::read_dir(dir).ok()?;
    Some(
        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter(|e| filter.matches(&e.path()))
            .count(),
    )
}

fn status_command(config: FrameConfig, explicit: Option<&Path>) -> Result<()> {
    let filter = config.image_filter();
    let paths = &config.paths;

    let video = if paths.video_file.exists() {
        match probe_video(&paths.video_file) {
            Ok(info) => serde_json::to_value(info)?,
            Err(e) => serde_json::json!({ "path": paths.video_file, "error": e.to_string() }),
        }
    } else {
        serde_json::Value::Null
    };

    let status = serde_json::json!({
        "config": explicit.map(Path::to_path_buf).unwrap_or_else(default_config_path),
        "poll_interval_secs": config.poll_interval_secs,
        "resolution": config.video.resolution.to_string(),
        "frame_duration_secs": config.video.frame_duration_secs,
        "images": { "path": paths.images_dir, "count": count_images(&paths.images_dir, &filter) },
        "frames": { "path": paths.resized_dir, "count": count_images(&paths.resized_dir, &filter) },
        "uploads": {
            "path": paths.upload_dir,
            "count": count_images(&paths.upload_dir, &filter),
            "pending": UploadMailbox::new(&paths.upload_marker).is_pending(),
        },
        "drive_folder": config.drive.folder_id,
        "video": video,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn init_config_command(path: PathBuf, variant: Variant) -> Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    FrameConfig::for_variant(variant)
        .save(&path)
        .with_context(|| format!("writing {}", path.display()))?;
    info!("Wrote {} config to {}", variant, path.display());
    Ok(())
}
