use crate::agent::{ AgentError, ConsultantAgent };
use crate::cli::Args;
use crate::models::chat::{ ChatRequest, ChatResponse, ErrorResponse, StatusResponse, UploadResponse };
use crate::storage::{ StorageError, UploadStore };

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use axum::{
    routing::{ get, post },
    Router,
    extract::{ DefaultBodyLimit, Multipart, State },
    response::{ IntoResponse, Response },
    http::{ HeaderValue, StatusCode },
    Json,
};
use log::{ error, info };
use tower_http::cors::{ AllowHeaders, AllowMethods, CorsLayer };

const ROOT_MESSAGE: &str = "AI Doctor Companion API is running";

#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<ConsultantAgent>,
    pub uploads: UploadStore,
}

pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, detail: detail.into() }
    }

    fn internal(detail: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, detail: detail.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { detail: self.detail })).into_response()
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::EmptyMessage => Self::bad_request(err.to_string()),
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidFilename(_) => Self::bad_request(err.to_string()),
            other => Self::internal(other.to_string()),
        }
    }
}

pub fn build_router(
    state: AppState,
    allowed_origin: &str,
    max_upload_bytes: usize
) -> Result<Router, Box<dyn Error + Send + Sync>> {
    let origin = allowed_origin
        .parse::<HeaderValue>()
        .map_err(|e| format!("Invalid allowed origin '{}': {}", allowed_origin, e))?;

    // Credentialed CORS forbids the wildcard forms; mirroring the request is
    // the permit-everything equivalent for a pinned origin.
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request());

    Ok(
        Router::new()
            .route("/", get(root_handler))
            .route("/chat", post(chat_handler))
            .route("/upload", post(upload_handler).layer(DefaultBodyLimit::max(max_upload_bytes)))
            .layer(cors)
            .with_state(state)
    )
}

pub async fn start_http_server(
    args: &Args,
    agent: Arc<ConsultantAgent>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = args.server_addr.parse::<SocketAddr>()?;

    let app_state = AppState {
        agent,
        uploads: UploadStore::new(&args.upload_dir),
    };
    let app = build_router(app_state, &args.allowed_origin, args.upload_max_bytes)?;

    info!("Starting HTTP API server on: http://{}", addr);

    if args.enable_tls && args.tls_cert_path.is_some() && args.tls_key_path.is_some() {
        let cert_path = args.tls_cert_path.as_ref().unwrap();
        let key_path = args.tls_key_path.as_ref().unwrap();

        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
            cert_path,
            key_path
        ).await?;

        info!("HTTPS server started with TLS enabled");
        axum_server::bind_rustls(addr, tls_config)
            .serve(app.into_make_service())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app.into_make_service()).await?;
    }

    Ok(())
}

async fn root_handler() -> Json<StatusResponse> {
    Json(StatusResponse { message: ROOT_MESSAGE.to_string() })
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>
) -> Result<Json<ChatResponse>, ApiError> {
    let reply = state.agent
        .run_turn(&request.history, &request.message).await
        .map_err(|e| {
            error!("Chat turn failed: {}", e);
            ApiError::from(e)
        })?;

    Ok(Json(ChatResponse { response: reply }))
}

async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart
) -> Result<Json<UploadResponse>, ApiError> {
    while
        let Some(field) = multipart
            .next_field().await
            .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {}", e)))?
    {
        let Some(filename) = field.file_name().map(str::to_owned) else {
            continue;
        };

        let bytes = field
            .bytes().await
            .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?;

        state.uploads
            .save(&filename, &bytes).await
            .map_err(|e| {
                error!("Upload of '{}' failed: {}", filename, e);
                ApiError::from(e)
            })?;

        return Ok(
            Json(UploadResponse {
                message: "File uploaded successfully".to_string(),
                filename,
            })
        );
    }

    Err(ApiError::bad_request("Multipart request contained no file field"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::prompt::PromptConfig;
    use crate::llm::chat::{ ChatClient, CompletionResponse, LlmError, PromptMessage };
    use async_trait::async_trait;
    use axum::body::{ to_bytes, Body };
    use axum::http::{ header, Request };
    use std::path::Path;
    use std::time::Duration;
    use tower::ServiceExt;

    struct CannedClient {
        reply: Option<String>,
    }

    #[async_trait]
    impl ChatClient for CannedClient {
        async fn complete(
            &self,
            _messages: &[PromptMessage]
        ) -> Result<CompletionResponse, LlmError> {
            match &self.reply {
                Some(text) => Ok(CompletionResponse { response: text.clone() }),
                None => Err(LlmError::EmptyCompletion),
            }
        }

        fn model(&self) -> &str {
            "test-model"
        }
    }

    fn test_router(reply: Option<String>, upload_dir: &Path) -> Router {
        let agent = Arc::new(
            ConsultantAgent::with_client(
                Arc::new(CannedClient { reply }),
                Arc::new(PromptConfig::default()),
                Duration::from_secs(5)
            )
        );
        let state = AppState {
            agent,
            uploads: UploadStore::new(upload_dir),
        };
        build_router(state, "http://localhost:3000", 1024 * 1024).unwrap()
    }

    fn chat_request(payload: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&payload).unwrap()))
            .unwrap()
    }

    fn upload_request(filename: &str, content: &[u8]) -> Request<Body> {
        let boundary = "test-upload-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            ).as_bytes()
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn root_returns_the_identical_payload_every_time() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(Some("hi".into()), dir.path());

        let mut bodies = Vec::new();
        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap()).await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            bodies.push(to_bytes(response.into_body(), usize::MAX).await.unwrap());
        }
        assert_eq!(bodies[0], bodies[1]);

        let payload: serde_json::Value = serde_json::from_slice(&bodies[0]).unwrap();
        assert_eq!(payload["message"], "AI Doctor Companion API is running");
    }

    #[tokio::test]
    async fn chat_wraps_the_model_reply() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(Some("You should rest.".into()), dir.path());

        let response = app
            .oneshot(
                chat_request(
                    serde_json::json!({
                        "message": "I have a headache",
                        "history": [
                            {"role": "user", "content": "A"},
                            {"role": "assistant", "content": "B"}
                        ]
                    })
                )
            ).await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response).await;
        assert_eq!(payload["response"], "You should rest.");
    }

    #[tokio::test]
    async fn chat_model_failure_maps_to_500_with_detail() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(None, dir.path());

        let response = app
            .oneshot(chat_request(serde_json::json!({"message": "hello"}))).await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let payload = body_json(response).await;
        assert!(!payload["detail"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn chat_empty_message_is_a_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(Some("unused".into()), dir.path());

        let response = app
            .oneshot(chat_request(serde_json::json!({"message": ""}))).await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let payload = body_json(response).await;
        assert!(!payload["detail"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_stores_the_file_and_echoes_the_filename() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(Some("hi".into()), dir.path());

        let response = app.oneshot(upload_request("report.pdf", b"X")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response).await;
        assert_eq!(payload["message"], "File uploaded successfully");
        assert_eq!(payload["filename"], "report.pdf");
        assert_eq!(std::fs::read(dir.path().join("report.pdf")).unwrap(), b"X");
    }

    #[tokio::test]
    async fn upload_rejects_traversal_filenames() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let app = test_router(Some("hi".into()), &uploads);

        let response = app.oneshot(upload_request("../escape.txt", b"X")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn upload_without_a_file_field_is_a_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(Some("hi".into()), dir.path());

        let boundary = "test-upload-boundary";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\njust text\r\n--{boundary}--\r\n"
        );
        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn concurrent_uploads_with_distinct_names_both_land() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(Some("hi".into()), dir.path());

        let (first, second) = tokio::join!(
            app.clone().oneshot(upload_request("left.bin", b"left-bytes")),
            app.clone().oneshot(upload_request("right.bin", b"right-bytes"))
        );

        assert_eq!(first.unwrap().status(), StatusCode::OK);
        assert_eq!(second.unwrap().status(), StatusCode::OK);
        assert_eq!(std::fs::read(dir.path().join("left.bin")).unwrap(), b"left-bytes");
        assert_eq!(std::fs::read(dir.path().join("right.bin")).unwrap(), b"right-bytes");
    }
}
