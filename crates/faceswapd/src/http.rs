use crate::config::ServerConfig;
use axum::extract::multipart::{Field, Multipart, MultipartError};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use faceswap_core::types::extension_with_dot;
use faceswap_core::{AvailabilityProbe, Orchestrator, SwapErrorKind, ToolConfig};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

const SOURCE_FIELD: &str = "sourceImage";
const TARGET_FIELD: &str = "targetImage";

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub probe: Arc<AvailabilityProbe>,
    pub server: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(tool: Arc<ToolConfig>, server: Arc<ServerConfig>) -> Self {
        Self {
            orchestrator: Arc::new(Orchestrator::new(tool.clone())),
            probe: Arc::new(AvailabilityProbe::new(tool)),
            server,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let results_dir = state.orchestrator.config().results_dir.clone();
    // Room for multipart framing on top of the file payloads.
    let body_limit = state.server.upload_limit_bytes * state.server.max_upload_files + 64 * 1024;

    let mut router = Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/api/swap-face", post(swap_face))
        .route("/api/swap-face-target", post(swap_face_target))
        .nest_service("/results", ServeDir::new(results_dir));

    if let Some(public_dir) = &state.server.public_dir {
        router = router.fallback_service(ServeDir::new(public_dir));
    }

    router
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "FaceSwap Server is running!" }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let report = state.probe.diagnose().await;
    let message = if report.available {
        "FaceFusion is ready"
    } else {
        "FaceFusion is not available"
    };
    Json(json!({
        "success": true,
        "faceFusionAvailable": report.available,
        "message": message,
        "report": report,
    }))
}

async fn swap_face(State(state): State<AppState>, multipart: Multipart) -> Response {
    let uploads = match save_uploads(&state.server, multipart, &[SOURCE_FIELD, TARGET_FIELD]).await
    {
        Ok(uploads) => uploads,
        Err(response) => return response,
    };

    let (Some(source), Some(target)) = (uploads.get(SOURCE_FIELD), uploads.get(TARGET_FIELD))
    else {
        return bad_request("please provide both a source image and a target image");
    };

    tracing::info!(source = %source.display(), target = %target.display(), "processing face swap");
    run_swap(&state, source, target).await
}

async fn swap_face_target(State(state): State<AppState>, multipart: Multipart) -> Response {
    let uploads = match save_uploads(&state.server, multipart, &[TARGET_FIELD]).await {
        Ok(uploads) => uploads,
        Err(response) => return response,
    };

    let Some(target) = uploads.get(TARGET_FIELD) else {
        return bad_request("please provide a target image");
    };

    let source = match &state.server.fixed_source {
        Some(path) if faceswap_core::fs::path_exists(path).await => path.clone(),
        _ => {
            tracing::error!(configured = ?state.server.fixed_source, "fixed source face image missing");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": "system error",
                    "message": "source face image is missing; contact the administrator",
                })),
            )
                .into_response();
        }
    };

    tracing::info!(target = %target.display(), "processing face swap with fixed source");
    run_swap(&state, &source, target).await
}

async fn run_swap(state: &AppState, source: &Path, target: &Path) -> Response {
    match state.orchestrator.swap_faces(source, target).await {
        Ok(result) => {
            let file_name = result.file_name().unwrap_or_default();
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "message": "face swap succeeded",
                    "resultUrl": state.server.result_url(file_name),
                })),
            )
                .into_response()
        }
        Err(err) => {
            let kind = err.kind();
            (
                status_for(kind),
                Json(json!({
                    "success": false,
                    "error": "face swap failed",
                    "kind": kind,
                    "retryable": kind.is_retryable(),
                    "message": err.to_string(),
                })),
            )
                .into_response()
        }
    }
}

/// HTTP status for a classified swap failure.
pub fn status_for(kind: SwapErrorKind) -> StatusCode {
    match kind {
        SwapErrorKind::ToolNotInstalled | SwapErrorKind::DependenciesMissing => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        SwapErrorKind::SourceMissing | SwapErrorKind::TargetMissing => StatusCode::BAD_REQUEST,
        SwapErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        SwapErrorKind::ExecutionFailed
        | SwapErrorKind::OutputNotFound
        | SwapErrorKind::UnknownFailure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "error": message })),
    )
        .into_response()
}

/// Store the accepted multipart file fields in the uploads directory.
///
/// Unknown fields are ignored. Returns the stored path per field name.
async fn save_uploads(
    server: &ServerConfig,
    mut multipart: Multipart,
    accepted: &[&str],
) -> Result<HashMap<String, PathBuf>, Response> {
    let mut stored = HashMap::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return Err(multipart_rejection(err)),
        };

        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if !accepted.contains(&name.as_str()) || stored.contains_key(&name) {
            continue;
        }
        if stored.len() >= server.max_upload_files {
            return Err(bad_request("too many files"));
        }

        let path = store_field(server, &name, field).await?;
        stored.insert(name, path);
    }

    Ok(stored)
}

async fn store_field(
    server: &ServerConfig,
    name: &str,
    field: Field<'_>,
) -> Result<PathBuf, Response> {
    let ext = field
        .file_name()
        .map(|original| extension_with_dot(Path::new(original)))
        .unwrap_or_default();
    let bytes = field.bytes().await.map_err(multipart_rejection)?;
    if bytes.len() > server.upload_limit_bytes {
        return Err(bad_request("file too large"));
    }

    let file_name = format!(
        "{name}-{}-{}{ext}",
        chrono::Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple()
    );
    let path = server.uploads_dir.join(file_name);

    let written = async {
        tokio::fs::create_dir_all(&server.uploads_dir).await?;
        tokio::fs::write(&path, &bytes).await
    }
    .await;
    if let Err(err) = written {
        tracing::error!(path = %path.display(), error = %err, "failed to store upload");
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": "failed to store upload" })),
        )
            .into_response());
    }

    Ok(path)
}

fn multipart_rejection(err: MultipartError) -> Response {
    (
        err.status(),
        Json(json!({ "success": false, "error": err.body_text() })),
    )
        .into_response()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "faceswap-test-boundary";

    struct Harness {
        dir: TempDir,
        tool: ToolConfig,
        server: ServerConfig,
    }

    impl Harness {
        /// A `sh` tool that copies the target ($5) to the requested output ($7).
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let installation = dir.path().join("facefusion");
            std::fs::create_dir_all(&installation).unwrap();
            let script = installation.join("facefusion.sh");
            std::fs::write(
                &script,
                "#!/bin/sh\nif [ \"$1\" = run ]; then echo usage; exit 0; fi\ncp \"$5\" \"$7\"\n",
            )
            .unwrap();

            let tool = ToolConfig {
                installation_dir: installation,
                script_path: Some(script),
                interpreter: "sh".to_string(),
                command_timeout_ms: 5_000,
                results_dir: dir.path().join("results"),
                grace_period_ms: 100,
                ..ToolConfig::default()
            };
            let server = ServerConfig {
                uploads_dir: dir.path().join("uploads"),
                ..ServerConfig::default()
            };
            Self { dir, tool, server }
        }

        fn router(&self) -> Router {
            build_router(AppState::new(
                Arc::new(self.tool.clone()),
                Arc::new(self.server.clone()),
            ))
        }
    }

    fn multipart_body(files: &[(&str, &str, &[u8])]) -> Body {
        let mut body = Vec::new();
        for (field, file_name, data) in files {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Body::from(body)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_multipart(uri: &str, files: &[(&str, &str, &[u8])]) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(multipart_body(files))
            .unwrap()
    }

    #[tokio::test]
    async fn test_root() {
        let harness = Harness::new();
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();

        let (status, body) = send(harness.router(), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "FaceSwap Server is running!");
    }

    #[tokio::test]
    async fn test_health_reports_available_tool() {
        let harness = Harness::new();
        let request = Request::builder()
            .uri("/api/health")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(harness.router(), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["faceFusionAvailable"], true);
        assert_eq!(body["report"]["probe"]["status"], "responded");
    }

    #[tokio::test]
    async fn test_health_never_fails_without_tool() {
        let mut harness = Harness::new();
        harness.tool.installation_dir = harness.dir.path().join("missing");
        let request = Request::builder()
            .uri("/api/health")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(harness.router(), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["faceFusionAvailable"], false);
    }

    #[tokio::test]
    async fn test_swap_face_success() {
        let harness = Harness::new();
        let request = post_multipart(
            "/api/swap-face",
            &[
                (SOURCE_FIELD, "me.png", b"source"),
                (TARGET_FIELD, "Poster.JPG", b"target bytes"),
            ],
        );

        let (status, body) = send(harness.router(), request).await;

        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["success"], true);
        let url = body["resultUrl"].as_str().unwrap();
        assert!(url.starts_with("http://localhost:9001/results/result-"));
        assert!(url.ends_with(".JPG"));

        let file_name = url.rsplit('/').next().unwrap();
        let stored = std::fs::read(harness.tool.results_dir.join(file_name)).unwrap();
        assert_eq!(stored, b"target bytes");
    }

    #[tokio::test]
    async fn test_swap_face_requires_both_files() {
        let harness = Harness::new();
        let request = post_multipart("/api/swap-face", &[(SOURCE_FIELD, "me.png", b"source")]);

        let (status, body) = send(harness.router(), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_swap_face_tool_not_installed() {
        let mut harness = Harness::new();
        harness.tool.installation_dir = harness.dir.path().join("missing");
        let request = post_multipart(
            "/api/swap-face",
            &[
                (SOURCE_FIELD, "me.png", b"source"),
                (TARGET_FIELD, "you.png", b"target"),
            ],
        );

        let (status, body) = send(harness.router(), request).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["kind"], "tool_not_installed");
        assert_eq!(body["retryable"], false);
    }

    #[tokio::test]
    async fn test_swap_face_target_without_fixed_source() {
        let harness = Harness::new();
        let request = post_multipart("/api/swap-face-target", &[(TARGET_FIELD, "you.png", b"t")]);

        let (status, body) = send(harness.router(), request).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_swap_face_target_with_fixed_source() {
        let mut harness = Harness::new();
        let face = harness.dir.path().join("face.png");
        std::fs::write(&face, b"fixed face").unwrap();
        harness.server.fixed_source = Some(face);
        let request = post_multipart(
            "/api/swap-face-target",
            &[(TARGET_FIELD, "crowd.webp", b"crowd")],
        );

        let (status, body) = send(harness.router(), request).await;

        assert_eq!(status, StatusCode::OK, "{body}");
        assert!(body["resultUrl"].as_str().unwrap().ends_with(".webp"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(SwapErrorKind::SourceMissing), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(SwapErrorKind::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status_for(SwapErrorKind::DependenciesMissing),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(SwapErrorKind::OutputNotFound),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
