//! End-to-end tests of the HTTP surface through `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use loom_core::WorldlineId;
use loom_events::{EngineState, EventStore, EventType};
use loom_runtime::{
    Executor, ExecutorError, ProducedArtifact, Provider, ProviderError, ProviderEvent,
    ProviderFactory, ProviderRequest, ProviderStream, RuntimeConfig, ToolInvocation, ToolOutput,
};
use loom_server::{Collaborators, LoomServer, ServerConfig};
use loom_stream::{Frame, FrameDecoder, FrameKind};
use serde_json::{Value, json};
use tower::ServiceExt;

// ── Collaborators ──

/// Echoes the user message. A message starting with `sql:` first runs the
/// rest as a query.
struct EchoProvider;

fn last_user_message(request: &ProviderRequest) -> String {
    request
        .timeline
        .iter()
        .rev()
        .find(|e| e.event_type == EventType::UserMessage)
        .and_then(|e| e.payload.get("content").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    fn model(&self) -> &str {
        "echo-1"
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<ProviderStream, ProviderError> {
        let message = last_user_message(request);
        let ran = request.timeline.iter().any(|e| {
            e.event_type == EventType::ToolResultSql && e.turn_id() == Some(request.turn_id.as_str())
        });
        let events = match message.strip_prefix("sql:") {
            Some(sql) if !ran => vec![
                Ok(ProviderEvent::ToolCallStart {
                    index: 0,
                    call_id: Some("call_1".into()),
                    name: "run_sql".into(),
                }),
                Ok(ProviderEvent::ToolCallDelta {
                    index: 0,
                    call_id: None,
                    arguments_delta: json!({ "sql": sql.trim() }).to_string(),
                }),
                Ok(ProviderEvent::Done),
            ],
            _ => vec![
                Ok(ProviderEvent::TextDelta { delta: "echo: ".into() }),
                Ok(ProviderEvent::TextDelta { delta: message }),
                Ok(ProviderEvent::Done),
            ],
        };
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

struct EchoFactory;

#[async_trait]
impl ProviderFactory for EchoFactory {
    async fn create(&self, provider: &str, model: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        if model != "echo-1" {
            return Err(ProviderError::UnknownModel {
                provider: provider.into(),
                model: model.into(),
            });
        }
        Ok(Arc::new(EchoProvider))
    }
}

struct TableExecutor;

#[async_trait]
impl Executor for TableExecutor {
    async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ExecutorError> {
        let sql = invocation
            .arguments
            .get("sql")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(ToolOutput {
            output: json!({ "rows": [[1]] }),
            preview: "1 row".into(),
            artifacts: vec![ProducedArtifact {
                name: "result".into(),
                artifact_type: "table".into(),
                content: Some(sql.into_bytes()),
                content_hash: None,
            }],
            ..ToolOutput::default()
        })
    }

    async fn restore_state(
        &self,
        _worldline_id: &WorldlineId,
        _state: &EngineState,
    ) -> Result<(), ExecutorError> {
        Ok(())
    }
}

// ── Helpers ──

fn server() -> LoomServer {
    LoomServer::new(
        ServerConfig {
            poll_interval: Duration::from_millis(20),
            ..ServerConfig::default()
        },
        RuntimeConfig::default(),
        Arc::new(EventStore::in_memory().unwrap()),
        Collaborators {
            providers: Arc::new(EchoFactory),
            executor: Arc::new(TableExecutor),
            artifacts: None,
        },
    )
}

fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(request(method, uri, body)).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn chat(app: &Router, worldline_id: &str, body: Value) -> Vec<Frame> {
    let uri = format!("/worldlines/{worldline_id}/chat");
    let resp = app.clone().oneshot(request("POST", &uri, Some(body))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();

    let mut decoder = FrameDecoder::new();
    let mut raw: Vec<_> = decoder.push(&bytes).into_iter().map(Result::unwrap).collect();
    raw.extend(decoder.finish().map(Result::unwrap));
    raw.iter()
        .map(|f| Frame::parse(f.event.as_deref(), &f.data).unwrap())
        .collect()
}

fn message(text: &str) -> Value {
    json!({ "message": text, "provider": "echo", "model": "echo-1" })
}

/// Thread plus a `main` worldline; returns the worldline id.
async fn worldline(app: &Router) -> (String, String) {
    let (status, thread) = send(app, "POST", "/threads", Some(json!({"title": "sales"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let thread_id = thread["id"].as_str().unwrap().to_string();
    let (status, wl) = send(
        app,
        "POST",
        &format!("/threads/{thread_id}/worldlines"),
        Some(json!({"name": "main"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    (thread_id, wl["id"].as_str().unwrap().to_string())
}

async fn wait_for_job(app: &Router, job_id: &str) -> Value {
    for _ in 0..500 {
        let (_, job) = send(app, "GET", &format!("/chat/jobs/{job_id}"), None).await;
        if matches!(job["status"].as_str(), Some("completed" | "failed" | "cancelled")) {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never finished");
}

// ── Tests ──

#[tokio::test]
async fn health_reports_ok() {
    let app = server().router();
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["busy_worldlines"], 0);
}

#[tokio::test]
async fn metrics_served_only_with_a_recorder() {
    let (status, body) = send(&server().router(), "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::with_local_recorder(&recorder, || {
        metrics::counter!(loom_server::metrics::JOBS_QUEUED_TOTAL).increment(3);
    });
    let app = server().with_metrics(handle).router();

    let resp = app.oneshot(request("GET", "/metrics", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(
        resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
    let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("jobs_queued_total 3"));
}

#[tokio::test]
async fn chat_streams_ordered_frames_ending_in_done() {
    let app = server().router();
    let (_, wl) = worldline(&app).await;

    let frames = chat(&app, &wl, message("hello")).await;
    match &frames[0] {
        Frame::Event(f) => assert_eq!(f.event.event_type, EventType::UserMessage),
        other => panic!("expected user message first, got {other:?}"),
    }
    assert_eq!(frames.last().unwrap().kind(), FrameKind::Done);
    assert!(frames.iter().any(|f| f.kind() == FrameKind::Delta));
    assert!(frames.windows(2).all(|w| w[0].seq() < w[1].seq()));

    let assistant = frames.iter().find_map(|f| match f {
        Frame::Event(e) if e.event.event_type == EventType::AssistantMessage => {
            e.event.payload["content"].as_str().map(String::from)
        }
        _ => None,
    });
    assert_eq!(assistant.as_deref(), Some("echo: hello"));
}

#[tokio::test]
async fn chat_with_tool_call_persists_result() {
    let app = server().router();
    let (_, wl) = worldline(&app).await;

    let frames = chat(&app, &wl, message("sql: select 1")).await;
    assert_eq!(frames.last().unwrap().kind(), FrameKind::Done);

    let (_, page) = send(&app, "GET", &format!("/worldlines/{wl}/events?limit=1000"), None).await;
    let types: Vec<&str> = page["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["type"].as_str().unwrap())
        .collect();
    assert!(types.contains(&"tool_call_sql"));
    assert!(types.contains(&"tool_result_sql"));
    assert_eq!(types.last(), Some(&"state_transition"));
}

#[tokio::test]
async fn chat_with_unknown_model_ends_in_error_frame() {
    let app = server().router();
    let (_, wl) = worldline(&app).await;
    let body = json!({ "message": "hi", "provider": "echo", "model": "nope" });

    let frames = chat(&app, &wl, body).await;
    assert_eq!(frames.last().unwrap().kind(), FrameKind::Error);
}

#[tokio::test]
async fn chat_validation_and_busy_worldline() {
    let srv = server();
    let app = srv.router();
    let (_, wl) = worldline(&app).await;

    let (status, body) = send(&app, "POST", &format!("/worldlines/{wl}/chat"), Some(message("  "))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");

    let (status, body) = send(&app, "POST", "/worldlines/wl_missing/chat", Some(message("hi"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let _guard = srv
        .state()
        .runner
        .locks()
        .try_acquire(&WorldlineId::from(wl.as_str()))
        .unwrap();
    let mut busy = message("hi");
    busy["wait"] = json!(false);
    let (status, body) = send(&app, "POST", &format!("/worldlines/{wl}/chat"), Some(busy)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "worldline_busy");
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let app = server().router();
    let req = Request::builder()
        .method("POST")
        .uri("/threads")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn events_page_through_the_timeline() {
    let app = server().router();
    let (_, wl) = worldline(&app).await;
    let _ = chat(&app, &wl, message("hello")).await;

    let (status, first) = send(&app, "GET", &format!("/worldlines/{wl}/events?limit=2"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["events"].as_array().unwrap().len(), 2);
    assert_eq!(first["next_cursor"], 2);
    assert_eq!(first["events"][0]["type"], "user_message");

    let mut cursor = first["next_cursor"].as_u64();
    let mut seen = 2;
    while let Some(c) = cursor {
        let (_, page) = send(&app, "GET", &format!("/worldlines/{wl}/events?cursor={c}&limit=2"), None).await;
        seen += page["events"].as_array().unwrap().len();
        cursor = page["next_cursor"].as_u64();
    }
    let (_, all) = send(&app, "GET", &format!("/worldlines/{wl}/events?limit=1000"), None).await;
    assert_eq!(seen, all["events"].as_array().unwrap().len());
    assert!(all["next_cursor"].is_null());

    let (status, _) = send(&app, "GET", &format!("/worldlines/{wl}/events?limit=0"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, "GET", "/worldlines/wl_missing/events", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn engine_mutations_are_recorded_and_restored_on_branches() {
    let srv = server();
    let app = srv.router();
    let (_, wl) = worldline(&app).await;
    let uri = format!("/worldlines/{wl}/events");

    let (status, imported) = send(&app, "POST", &uri, Some(json!({
        "type": "data_imported",
        "payload": {"table": "orders", "source": "orders.csv"},
    })))
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(imported["type"], "data_imported");
    assert!(imported["parent_event_id"].is_null());

    let (status, attached) = send(&app, "POST", &uri, Some(json!({
        "type": "source_attached",
        "payload": {"alias": "wh", "uri": "postgres://warehouse"},
        "expected_head_event_id": imported["id"],
    })))
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(attached["parent_event_id"], imported["id"]);

    // Rejected appends leave the chain untouched.
    let (status, body) = send(&app, "POST", &uri, Some(json!({
        "type": "source_detached",
        "payload": {"alias": "wh"},
        "expected_head_event_id": imported["id"],
    })))
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "stale_head");
    let (status, body) = send(&app, "POST", &uri, Some(json!({
        "type": "assistant_message",
        "payload": {"turn_id": "turn_1", "content": "forged"},
    })))
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
    let (status, body) = send(&app, "POST", &uri, Some(json!({
        "type": "source_attached",
        "payload": {"alias": "x"},
    })))
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "invalid_payload");

    let (status, body) = send(&app, "POST", "/worldlines/wl_missing/events", Some(json!({
        "type": "source_detached",
        "payload": {"alias": "wh"},
    })))
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let guard = srv.state().runner.locks().try_acquire(&WorldlineId::from(wl.as_str())).unwrap();
    let (status, body) = send(&app, "POST", &uri, Some(json!({
        "type": "source_detached",
        "payload": {"alias": "wh"},
    })))
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "worldline_busy");
    drop(guard);
    let (_, page) = send(&app, "GET", &uri, None).await;
    let ids: Vec<&Value> = page["events"].as_array().unwrap().iter().map(|e| &e["id"]).collect();
    assert_eq!(ids, vec![&imported["id"], &attached["id"]]);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/worldlines/{wl}/branch"),
        Some(json!({ "from_event_id": attached["id"], "name": "with-sources" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let branch = WorldlineId::from(body["new_worldline_id"].as_str().unwrap());
    let restored = srv.state().runner.manager().pending_restore(&branch).unwrap().unwrap();
    assert!(restored.state.tables.contains_key("orders"));
    assert_eq!(restored.state.attached.get("wh").map(String::as_str), Some("postgres://warehouse"));
}

#[tokio::test]
async fn branch_sees_only_events_up_to_the_fork() {
    let app = server().router();
    let (_, wl) = worldline(&app).await;
    let _ = chat(&app, &wl, message("first")).await;
    let _ = chat(&app, &wl, message("second")).await;

    let (_, all) = send(&app, "GET", &format!("/worldlines/{wl}/events?limit=1000"), None).await;
    let events = all["events"].as_array().unwrap();
    let fork = events[0]["id"].as_str().unwrap();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/worldlines/{wl}/branch"),
        Some(json!({ "from_event_id": fork, "name": "what-if" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let branch = body["new_worldline_id"].as_str().unwrap();
    assert_eq!(body["worldline"]["forked_from_event_id"], fork);

    let (_, page) = send(&app, "GET", &format!("/worldlines/{branch}/events"), None).await;
    let ids: Vec<&str> = page["events"].as_array().unwrap().iter().map(|e| e["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec![fork]);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/worldlines/{wl}/branch"),
        Some(json!({ "from_event_id": "evt_missing", "name": "nowhere" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "fork_boundary_not_found");

    let (status, _) = send(
        &app,
        "POST",
        "/worldlines/wl_missing/branch",
        Some(json!({ "from_event_id": fork, "name": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn background_job_lifecycle() {
    let srv = server();
    let app = srv.router();
    let (thread_id, wl) = worldline(&app).await;

    let (status, job) = send(&app, "POST", "/chat/jobs", Some(json!({
        "worldline_id": wl,
        "message": "summarize",
        "provider": "echo",
        "model": "echo-1",
    })))
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(job["status"], "queued");
    assert_eq!(job["queue_position"], 1);
    let job_id = job["id"].as_str().unwrap().to_string();

    srv.state().scheduler.start().unwrap();
    let done = wait_for_job(&app, &job_id).await;
    assert_eq!(done["status"], "completed");
    assert_eq!(done["result_summary"], "echo: summarize");

    let (_, first) = send(&app, "POST", &format!("/chat/jobs/{job_id}/ack"), Some(json!({"seen": true}))).await;
    let (_, again) = send(&app, "POST", &format!("/chat/jobs/{job_id}/ack"), Some(json!({}))).await;
    assert!(first["seen_at"].is_string());
    assert_eq!(first["seen_at"], again["seen_at"]);

    let (status, listed) = send(&app, "GET", &format!("/chat/jobs?thread_id={thread_id}&status=completed"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["jobs"].as_array().unwrap().len(), 1);

    let (_, summaries) = send(&app, "GET", &format!("/threads/{thread_id}/worldline-summaries"), None).await;
    let main = &summaries["worldlines"][0];
    assert_eq!(main["message_count"], 2);
    assert_eq!(main["jobs"]["completed"], 1);
    assert_eq!(main["jobs"]["latest_status"], "completed");

    srv.state().scheduler.shutdown().await;
}

#[tokio::test]
async fn queued_job_can_be_cancelled() {
    let app = server().router();
    let (_, wl) = worldline(&app).await;
    let (_, job) = send(&app, "POST", "/chat/jobs", Some(json!({
        "worldline_id": wl,
        "message": "later",
        "provider": "echo",
        "model": "echo-1",
        "max_iterations": 3,
    })))
    .await;
    let job_id = job["id"].as_str().unwrap();
    assert_eq!(job["max_iterations"], 3);

    let (status, cancelled) = send(&app, "POST", &format!("/chat/jobs/{job_id}/cancel"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");
    assert!(cancelled["queue_position"].is_null());
}

#[tokio::test]
async fn job_request_validation() {
    let app = server().router();
    let (_, wl) = worldline(&app).await;

    let (status, _) = send(&app, "POST", "/chat/jobs", Some(json!({
        "worldline_id": wl, "message": "", "provider": "echo", "model": "echo-1",
    })))
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, "POST", "/chat/jobs", Some(json!({
        "worldline_id": "wl_missing", "message": "hi", "provider": "echo", "model": "echo-1",
    })))
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, _) = send(&app, "GET", "/chat/jobs?status=paused", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, "GET", "/chat/jobs/job_missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn summaries_for_unknown_thread() {
    let app = server().router();
    let (status, body) = send(&app, "GET", "/threads/thr_missing/worldline-summaries", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn serve_and_shut_down() {
    let srv = server();
    let shutdown = srv.shutdown().clone();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let handle = tokio::spawn(srv.serve_on(listener));

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
