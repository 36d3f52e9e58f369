//! HTTP upload surface for the frame.
//!
//! `GET /` serves the upload form, `POST /upload` stores a batch of images in
//! the upload folder and raises the upload marker for the watcher loop.

pub mod api;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use media_io::ImageFilter;
use settings::FrameConfig;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use sync::UploadMailbox;
use tower_http::trace::TraceLayer;
use tracing::info;

const INDEX_TEMPLATE: &str = include_str!("../static/index.html");

/// Shared state of the upload handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub upload_dir: PathBuf,
    pub mailbox: UploadMailbox,
    pub filter: ImageFilter,
    pub max_files: usize,
    pub max_body_bytes: usize,
    index_html: String,
}

impl AppState {
    pub fn from_config(config: &FrameConfig) -> Self {
        let max_files = config.server.max_upload_files;
        Self {
            upload_dir: config.paths.upload_dir.clone(),
            mailbox: UploadMailbox::new(&config.paths.upload_marker),
            filter: config.image_filter(),
            max_files,
            max_body_bytes: config.server.max_upload_bytes,
            index_html: INDEX_TEMPLATE.replace("{{MAX_FILES}}", &max_files.to_string()),
        }
    }

    pub fn index_html(&self) -> &str {
        &self.index_html
    }
}

pub fn router(state: AppState) -> Router {
    let limit = state.max_body_bytes;
    Router::new()
        .route("/", get(api::index))
        .route("/upload", post(api::upload))
        .layer(DefaultBodyLimit::max(limit))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Serve the upload surface on `bind` until `shutdown` resolves.
pub async fn serve<F>(state: AppState, bind: &str, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    std::fs::create_dir_all(&state.upload_dir)?;
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Upload server listening on http://{}", listener.local_addr()?);
    info!("  GET  /        - Upload form");
    info!("  POST /upload  - Upload images (field `file`)");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
