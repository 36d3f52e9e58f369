use crate::AppState;
use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use sync::is_plain_file_name;
use tracing::{debug, error, info};

pub const UPLOAD_OK: &str = "Files uploaded successfully!";

/// Distinguishes the partial files of concurrent requests.
static PART_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
pub enum ApiError {
    TooManyFiles(usize),
    Multipart(MultipartError),
    Storage(std::io::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::TooManyFiles(max) => (
                StatusCode::BAD_REQUEST,
                format!("You can upload up to {} images only.", max),
            ),
            ApiError::Multipart(e) => (e.status(), e.body_text()),
            ApiError::Storage(e) => {
                error!("Failed to store upload: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Storage error: {}", e),
                )
            }
        };

        (status, message).into_response()
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::Multipart(e)
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        ApiError::Storage(e)
    }
}

struct UploadedFile {
    name: String,
    data: Bytes,
}

/// Last path component of a client-supplied file name, if it is a usable
/// file name at all.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    is_plain_file_name(name).then(|| name.to_string())
}

/// GET / - Upload form
pub async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(state.index_html().to_string())
}

/// POST /upload - Store a batch of images and raise the upload marker
pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await?;
        files.push(UploadedFile { name, data });
    }

    if files.is_empty() {
        return Ok(Redirect::to("/").into_response());
    }
    if files.len() > state.max_files {
        info!(
            "Rejected upload of {} files (limit {})",
            files.len(),
            state.max_files
        );
        return Err(ApiError::TooManyFiles(state.max_files));
    }

    tokio::fs::create_dir_all(&state.upload_dir).await?;
    let mut saved = 0usize;
    for file in files {
        let Some(name) = sanitize_file_name(&file.name) else {
            debug!("Skipping upload with unusable name {:?}", file.name);
            continue;
        };
        if !state.filter.matches_name(&name) {
            debug!("Skipping disallowed upload {}", name);
            continue;
        }
        let dest = state.upload_dir.join(&name);
        let partial = state.upload_dir.join(format!(
            ".{}.{}-{}.part",
            name,
            std::process::id(),
            PART_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&partial, &file.data).await?;
        tokio::fs::rename(&partial, &dest).await?;
        debug!("Saved {} ({} bytes)", dest.display(), file.data.len());
        saved += 1;
    }

    if saved > 0 {
        state.mailbox.signal()?;
        info!("Stored {} uploaded images", saved);
    }
    Ok(UPLOAD_OK.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router;
    use axum::body::Body;
    use axum::http::{header, Request};
    use settings::FrameConfig;
    use tempfile::tempdir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "frame-test-boundary";

    fn multipart_body(files: &[(&str, &str, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (field, name, data) in files {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    field, name
                )
                .as_bytes(),
            );
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            body.extend_from_slice(data.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn upload_request(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn state(root: &std::path::Path) -> AppState {
        AppState::from_config(&FrameConfig::upload().rooted(root))
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn stored(state: &AppState) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&state.upload_dir)
            .map(|dir| {
                dir.map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    #[tokio::test]
    async fn index_serves_form_with_limit() {
        let root = tempdir().unwrap();
        let app = router(state(root.path()));
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("action=\"/upload\""));
        assert!(html.contains("const MAX_FILES = 20;"));
    }

    #[tokio::test]
    async fn too_many_files_are_rejected_and_nothing_is_stored() {
        let root = tempdir().unwrap();
        let state = state(root.path());
        let names: Vec<String> = (0..21).map(|i| format!("img{:02}.png", i)).collect();
        let files: Vec<(&str, &str, &str)> = names
            .iter()
            .map(|n| ("file", n.as_str(), "png"))
            .collect();

        let response = router(state.clone())
            .oneshot(upload_request(multipart_body(&files)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_text(response).await,
            "You can upload up to 20 images only."
        );
        assert!(stored(&state).is_empty());
        assert!(!state.mailbox.is_pending());
    }

    #[tokio::test]
    async fn only_allowed_extensions_are_stored() {
        let root = tempdir().unwrap();
        let state = state(root.path());
        let files: Vec<(&str, &str, &str)> = vec![
            ("file", "a.png", "a"),
            ("file", "b.JPG", "b"),
            ("file", "c.jpeg", "c"),
            ("file", "d.gif", "d"),
            ("file", "e.png", "e"),
            ("file", "notes.txt", "n"),
            ("file", "script.sh", "s"),
        ];

        let response = router(state.clone())
            .oneshot(upload_request(multipart_body(&files)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, UPLOAD_OK);
        assert_eq!(
            stored(&state),
            vec!["a.png", "b.JPG", "c.jpeg", "d.gif", "e.png"]
        );
        assert!(state.mailbox.take().unwrap());
    }

    #[tokio::test]
    async fn batch_without_usable_files_does_not_signal() {
        let root = tempdir().unwrap();
        let state = state(root.path());
        let files: Vec<(&str, &str, &str)> = vec![("file", "notes.txt", "n"), ("file", "", "")];

        let response = router(state.clone())
            .oneshot(upload_request(multipart_body(&files)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(stored(&state).is_empty());
        assert!(!state.mailbox.is_pending());
    }

    #[tokio::test]
    async fn request_without_file_field_redirects_home() {
        let root = tempdir().unwrap();
        let files: Vec<(&str, &str, &str)> = vec![("other", "a.png", "a")];
        let response = router(state(root.path()))
            .oneshot(upload_request(multipart_body(&files)))
            .await
            .unwrap();
        assert!(response.status().is_redirection());
        assert_eq!(response.headers()[header::LOCATION], "/");
    }

    #[tokio::test]
    async fn path_components_are_stripped_from_names() {
        let root = tempdir().unwrap();
        let state = state(root.path());
        let files: Vec<(&str, &str, &str)> = vec![("file", "../../evil.png", "x")];

        router(state.clone())
            .oneshot(upload_request(multipart_body(&files)))
            .await
            .unwrap();
        assert_eq!(stored(&state), vec!["evil.png"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_uploads_of_the_same_name_all_succeed() {
        let root = tempdir().unwrap();
        let state = state(root.path());
        let app = router(state.clone());

        for round in 0..20 {
            let requests: Vec<_> = (0..4)
                .map(|i| {
                    let app = app.clone();
                    let data = format!("{}-{}", round, i);
                    tokio::spawn(async move {
                        let files: Vec<(&str, &str, &str)> =
                            vec![("file", "same.png", data.as_str())];
                        let response = app
                            .oneshot(upload_request(multipart_body(&files)))
                            .await
                            .unwrap();
                        (response.status(), body_text(response).await)
                    })
                })
                .collect();
            for request in requests {
                let (status, body) = request.await.unwrap();
                assert_eq!(status, StatusCode::OK);
                assert_eq!(body, UPLOAD_OK);
            }
        }

        assert_eq!(stored(&state), vec!["same.png"]);
        assert!(state.mailbox.take().unwrap());
    }

    #[test]
    fn sanitizes_client_file_names() {
        assert_eq!(sanitize_file_name("photo.jpg").as_deref(), Some("photo.jpg"));
        assert_eq!(
            sanitize_file_name("C:\\Users\\me\\photo.jpg").as_deref(),
            Some("photo.jpg")
        );
        assert_eq!(sanitize_file_name("a/b/../c.png").as_deref(), Some("c.png"));
        assert_eq!(sanitize_file_name(""), None);
        assert_eq!(sanitize_file_name("dir/.."), None);
    }
}
