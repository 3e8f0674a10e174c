use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Multipart, Query, RawQuery, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use llm_streaming_sdk::chat_api::MessageRequest;
use llm_streaming_sdk::client::LlmStreamingClient;
use llm_streaming_sdk::config::{ClientConfig, FileManagerConfig};
use llm_streaming_sdk::file_manager::{FileContent, FileManagerClient, FileManagerError, FileUpload};
use llm_streaming_sdk::stream::proto::{ActionKey, Language};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;

const RATE_LIMIT_MESSAGE: &str = "Error code: 429 - {'error': {'message': 'Rate limit reached for gpt-4o-mini', 'type': 'requests', 'param': None, 'code': 'rate_limit_exceeded'}}";

#[derive(Clone, Debug, PartialEq)]
struct UploadedPart {
    name: String,
    file_name: Option<String>,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

#[derive(Clone, Default)]
struct Observed {
    json_bodies: Arc<Mutex<Vec<Value>>>,
    forms: Arc<Mutex<Vec<(String, Vec<UploadedPart>)>>>,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chat_api_wraps_success_and_failures_in_envelope() {
    let observed = Observed::default();
    let app = Router::new()
        .route("/api/v1/chat/status", get(|| async { Json(json!({"status": "ok"})) }))
        .route(
            "/api/v1/chat/available_models",
            get(|| async { Json(json!({"models": {"openai": ["gpt-4o-mini", "gpt-4o"]}})) }),
        )
        .route(
            "/api/v1/chat/available_llms",
            get(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": {"message": "registry offline"}})),
                )
            }),
        )
        .route(
            "/api/v1/chat/available_prompts",
            get(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error_message": RATE_LIMIT_MESSAGE, "status": "error"})),
                )
            }),
        )
        .route("/api/v1/chat/request", post(request_handler))
        .with_state(observed.clone());
    let (addr, shutdown_tx, server_task) = spawn_server(app).await;

    let client = LlmStreamingClient::new(
        ClientConfig::new(format!("http://{addr}")).with_timeout(Duration::from_secs(2)),
    )
    .expect("build client");

    let status = client.get_status().await;
    assert!(status.success);
    assert_eq!(status.response.map(|s| s.status).as_deref(), Some("ok"));
    assert_eq!(status.error, None);

    let models = client.get_models().await.into_result().expect("models");
    assert_eq!(
        models.models.get("openai"),
        Some(&vec!["gpt-4o-mini".to_string(), "gpt-4o".to_string()])
    );

    let llms = client.get_llms().await;
    assert!(!llms.success);
    assert_eq!(llms.response, None);
    assert_eq!(llms.error.as_deref(), Some("Code: 500, Error: registry offline"));

    let prompts = client.get_prompts().await;
    assert_eq!(
        prompts.error.as_deref(),
        Some("Code: 429, Error: Rate limit reached for gpt-4o-mini")
    );

    let request = MessageRequest::new("Resume esto")
        .with_action_key(ActionKey::Summarize)
        .with_language(Language::French)
        .with_context_info("capítulo 1");
    let response = client.handle_request(&request).await;
    let output = response.into_result().expect("request output");
    assert_eq!(output.response.as_deref(), Some("resumen"));
    assert_eq!(output.status, "success");

    let bodies = observed.json_bodies.lock().await.clone();
    assert_eq!(
        bodies,
        vec![json!({
            "llm_name": "openai",
            "model_name": "gpt-4o-mini",
            "text": "Resume esto",
            "language": "french",
            "actionKey": "summarize",
            "context_info": "capítulo 1",
        })]
    );

    let _ = shutdown_tx.send(());
    server_task.await.expect("mock http server task should join");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn audio_transcription_posts_wav_multipart() {
    let observed = Observed::default();
    let app = Router::new()
        .route("/api/v1/chat/audio", post(audio_handler))
        .route(
            "/api/v1/chat/status",
            get(|| async { (StatusCode::BAD_GATEWAY, "upstream timed out") }),
        )
        .with_state(observed.clone());
    let (addr, shutdown_tx, server_task) = spawn_server(app).await;

    let dir = std::env::temp_dir().join(format!("llm-sdk-audio-{}", std::process::id()));
    tokio::fs::create_dir_all(&dir).await.expect("create temp dir");
    let path = dir.join("clip.wav");
    tokio::fs::write(&path, b"RIFF....WAVE").await.expect("write audio");

    let client = LlmStreamingClient::new(ClientConfig::new(format!("http://{addr}")))
        .expect("build client");

    let transcription = client
        .transcribe_audio("whisper", &path)
        .await
        .expect("audio file is readable");
    assert_eq!(
        transcription.into_result().map(|t| t.text),
        Ok("hola mundo".to_string())
    );

    let forms = observed.forms.lock().await.clone();
    assert_eq!(forms.len(), 1);
    let (method, parts) = &forms[0];
    assert_eq!(method, "POST");
    assert!(parts.contains(&UploadedPart {
        name: "audio_service".to_string(),
        file_name: None,
        content_type: None,
        bytes: b"whisper".to_vec(),
    }));
    let audio = parts
        .iter()
        .find(|part| part.name == "audio")
        .expect("audio part present");
    assert_eq!(audio.file_name.as_deref(), Some("clip.wav"));
    assert_eq!(audio.content_type.as_deref(), Some("audio/wav"));
    assert_eq!(audio.bytes, b"RIFF....WAVE");

    let missing = client
        .transcribe_audio("whisper", dir.join("missing.wav"))
        .await;
    assert!(missing.is_err(), "local read failures propagate");

    let status = client.get_status().await;
    assert_eq!(
        status.error.as_deref(),
        Some("Code: 502, Error: upstream timed out")
    );

    let _ = tokio::fs::remove_dir_all(&dir).await;
    let _ = shutdown_tx.send(());
    server_task.await.expect("mock http server task should join");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn file_manager_round_trips_against_mock_service() {
    let observed = Observed::default();
    let app = Router::new()
        .route(
            "/api/v1/file",
            post(file_form_handler)
                .put(file_form_handler)
                .get(file_get_handler)
                .delete(file_delete_handler),
        )
        .route("/api/v1/structure", get(structure_handler))
        .with_state(observed.clone());
    let (addr, shutdown_tx, server_task) = spawn_server(app).await;

    let client = FileManagerClient::new(
        &FileManagerConfig::new(format!("http://{addr}")).with_timeout(Duration::from_secs(2)),
    )
    .expect("build file manager client");

    let uploaded = client
        .upload_file(
            "bucket-1",
            "docs/reports",
            FileUpload::new("q1.txt", b"ventas".to_vec()).with_content_type("text/plain"),
        )
        .await
        .expect("upload");
    assert_eq!(uploaded, json!({"message": "stored", "method": "POST"}));

    let updated = client
        .update_file("bucket-1", "docs/reports", FileUpload::new("q1.txt", b"ventas v2".to_vec()))
        .await
        .expect("update");
    assert_eq!(updated["method"], "PUT");

    let forms = observed.forms.lock().await.clone();
    assert_eq!(forms.len(), 2);
    let (_, parts) = &forms[0];
    let field = |name: &str| {
        parts
            .iter()
            .find(|part| part.name == name)
            .cloned()
            .unwrap_or_else(|| panic!("missing form field {name}"))
    };
    assert_eq!(field("bucket_id").bytes, b"bucket-1");
    assert_eq!(field("directory").bytes, b"docs/reports");
    let file = field("file");
    assert_eq!(file.file_name.as_deref(), Some("q1.txt"));
    assert_eq!(file.content_type.as_deref(), Some("text/plain"));
    assert_eq!(file.bytes, b"ventas");

    let download = client
        .get_file("bucket-1", "docs/reports/q1.txt")
        .await
        .expect("download bytes");
    assert!(download.is_file());
    assert_eq!(download.content, FileContent::Bytes(b"ventas v2".to_vec()));
    assert_eq!(download.filename.as_deref(), Some("q1.txt"));
    assert_eq!(download.content_length, Some(9));

    let described = client
        .get_file("bucket-1", "docs/meta.json")
        .await
        .expect("download json");
    assert_eq!(described.content, FileContent::Json(json!({"kind": "metadata"})));

    let structure = client
        .list_files("bucket-1", &["pdf", "", "txt"])
        .await
        .expect("structure");
    assert_eq!(
        structure,
        json!({"query": "bucket_id=bucket-1&extensions=pdf&extensions=txt"})
    );

    let deleted = client
        .delete_file("bucket-1", "docs/reports/q1.txt")
        .await
        .expect("delete");
    assert_eq!(deleted, json!({"deleted": "docs/reports/q1.txt"}));

    let err = client
        .delete_file("bucket-1", "missing.txt")
        .await
        .expect_err("missing file");
    match err {
        FileManagerError::HttpStatus { status, message } => {
            assert_eq!(status.as_u16(), 404);
            assert_eq!(message, "Code: 404, Error: file not found");
        }
        other => panic!("unexpected error variant: {other:?}"),
    }

    let _ = shutdown_tx.send(());
    server_task.await.expect("mock http server task should join");
}

async fn request_handler(State(state): State<Observed>, Json(payload): Json<Value>) -> impl IntoResponse {
    state.json_bodies.lock().await.push(payload);
    Json(json!({"response": "resumen", "status": "success", "error_message": null}))
}

async fn audio_handler(State(state): State<Observed>, multipart: Multipart) -> impl IntoResponse {
    match collect_parts(multipart).await {
        Ok(parts) => {
            state.forms.lock().await.push(("POST".to_string(), parts));
            (StatusCode::OK, Json(json!({"text": "hola mundo"})))
        }
        Err(err) => (StatusCode::BAD_REQUEST, Json(json!({"error": err}))),
    }
}

async fn file_form_handler(
    State(state): State<Observed>,
    method: axum::http::Method,
    multipart: Multipart,
) -> impl IntoResponse {
    match collect_parts(multipart).await {
        Ok(parts) => {
            state.forms.lock().await.push((method.to_string(), parts));
            (
                StatusCode::OK,
                Json(json!({"message": "stored", "method": method.as_str()})),
            )
        }
        Err(err) => (StatusCode::BAD_REQUEST, Json(json!({"error": err}))),
    }
}

async fn file_get_handler(Query(params): Query<BTreeMap<String, String>>) -> axum::response::Response {
    let path = params.get("file_path").cloned().unwrap_or_default();
    if params.get("bucket_id").map(String::as_str) != Some("bucket-1") {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "bucket not found"}))).into_response();
    }
    if path.ends_with(".json") {
        return Json(json!({"kind": "metadata"})).into_response();
    }

    let name = path.rsplit('/').next().unwrap_or_default().to_string();
    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{name}\"")),
        ],
        b"ventas v2".to_vec(),
    )
        .into_response()
}

async fn file_delete_handler(Query(params): Query<BTreeMap<String, String>>) -> impl IntoResponse {
    let path = params.get("file_path").cloned().unwrap_or_default();
    if path == "missing.txt" {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "file not found"})));
    }
    (StatusCode::OK, Json(json!({ "deleted": path })))
}

async fn structure_handler(RawQuery(query): RawQuery) -> impl IntoResponse {
    Json(json!({ "query": query }))
}

async fn collect_parts(mut multipart: Multipart) -> Result<Vec<UploadedPart>, String> {
    let mut parts = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| format!("bad multipart: {err}"))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|err| format!("bad multipart field: {err}"))?;
        parts.push(UploadedPart {
            name,
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        });
    }
    Ok(parts)
}

async fn spawn_server(
    app: Router,
) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server listener");
    let addr = listener
        .local_addr()
        .expect("read mock server listener address");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("mock server should run");
    });
    (addr, shutdown_tx, task)
}

#[tokio::test]
async fn responses_arrive_within_deadline() {
    let app = Router::new().route("/api/v1/chat/status", get(|| async { Json(json!({"status": "ok"})) }));
    let (addr, shutdown_tx, server_task) = spawn_server(app).await;
    let client = LlmStreamingClient::new(ClientConfig::new(format!("http://{addr}"))).expect("client");

    let status = timeout(Duration::from_secs(2), client.get_status())
        .await
        .expect("status within deadline");
    assert!(status.success);

    let _ = shutdown_tx.send(());
    server_task.await.expect("mock http server task should join");
}

#[tokio::test]
async fn rest_server_errors_are_reported_once_without_retry() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        "/api/v1/chat/status",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({"error": {"message": "warming up"}})),
                )
            }
        }),
    );
    let (addr, shutdown_tx, server_task) = spawn_server(app).await;
    let client = LlmStreamingClient::new(
        ClientConfig::new(format!("http://{addr}")).with_reconnect_attempts(3),
    )
    .expect("client");

    let status = timeout(Duration::from_secs(2), client.get_status())
        .await
        .expect("status within deadline");
    assert!(!status.success);
    assert_eq!(status.error.as_deref(), Some("Code: 503, Error: warming up"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let _ = shutdown_tx.send(());
    server_task.await.expect("mock http server task should join");
}
