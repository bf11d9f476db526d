//! Sessions in assistant mode against a local stand-in for the completion
//! service that answers with canned server-sent events.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use chat_session::error::{AUTH_FAILURE_TEXT, QUOTA_FAILURE_TEXT, SERVICE_FAILURE_TEXT};
use chat_session::{
    CompletionClient, ConnectionState, Direction, SessionConfig, SessionController, SessionMode,
};
use serde_json::{Value, json};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

struct Stub {
    status: StatusCode,
    body: String,
    requests: Mutex<Vec<(Option<String>, Value)>>,
}

async fn completions(
    State(stub): State<Arc<Stub>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    stub.requests.lock().unwrap().push((auth, body));
    (
        stub.status,
        [(header::CONTENT_TYPE, "text/event-stream")],
        stub.body.clone(),
    )
        .into_response()
}

/// Serve `body` with `status` for every completion request.
async fn start_stub(status: StatusCode, body: String) -> (String, Arc<Stub>) {
    let stub = Arc::new(Stub {
        status,
        body,
        requests: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/chat/completions", post(completions))
        .with_state(stub.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{}", addr), stub)
}

fn sse(chunks: &[&str]) -> String {
    let mut body = String::new();
    body.push_str("data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n");
    for chunk in chunks {
        let event = json!({"choices": [{"index": 0, "delta": {"content": chunk}}]});
        body.push_str(&format!("data: {}\n\n", event));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

async fn start_session(base_url: &str, api_key: Option<&str>) -> SessionController {
    let client = CompletionClient::new(
        base_url,
        api_key.map(str::to_string),
        Duration::from_secs(5),
    )
    .expect("client");
    let config = SessionConfig {
        welcome_message: "welcome".into(),
        initial_mode: SessionMode::Assistant,
        ..SessionConfig::default()
    };
    SessionController::start(config, Arc::new(client)).await
}

async fn send_and_wait(session: &mut SessionController, text: &str) {
    session.send_message(text);
    timeout_idle(session).await;
}

async fn timeout_idle(session: &SessionController) {
    tokio::time::timeout(TEST_TIMEOUT, session.wait_idle())
        .await
        .expect("completion never finished");
}

fn contents(session: &SessionController) -> Vec<(Direction, String)> {
    session
        .messages()
        .into_iter()
        .map(|m| (m.direction, m.content))
        .collect()
}

#[tokio::test]
async fn streamed_chunks_fill_one_reply() {
    let (url, stub) = start_stub(StatusCode::OK, sse(&["Bonjour", ", ", "le monde"])).await;
    let mut session = start_session(&url, Some("sk-test")).await;

    send_and_wait(&mut session, "say hello in French").await;

    assert!(!session.is_loading());
    assert_eq!(
        contents(&session),
        vec![
            (Direction::Received, "welcome".to_string()),
            (Direction::Sent, "say hello in French".to_string()),
            (Direction::Received, "Bonjour, le monde".to_string()),
        ]
    );

    let requests = stub.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let (auth, body) = &requests[0];
    assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
    assert_eq!(body["model"], "deepseek-chat");
    assert_eq!(body["max_tokens"], 2048);
    assert_eq!(body["stream"], true);
    let temperature = body["temperature"].as_f64().unwrap();
    assert!((temperature - 0.7).abs() < 1e-6);
    assert_eq!(
        body["messages"],
        json!([
            {"role": "assistant", "content": "welcome"},
            {"role": "user", "content": "say hello in French"},
        ])
    );
}

#[tokio::test]
async fn second_turn_carries_the_first_reply() {
    let (url, stub) = start_stub(StatusCode::OK, sse(&["four"])).await;
    let mut session = start_session(&url, Some("sk-test")).await;

    send_and_wait(&mut session, "2+2?").await;
    send_and_wait(&mut session, "and 3+3?").await;

    let requests = stub.requests.lock().unwrap();
    assert_eq!(
        requests[1].1["messages"],
        json!([
            {"role": "assistant", "content": "welcome"},
            {"role": "user", "content": "2+2?"},
            {"role": "assistant", "content": "four"},
            {"role": "user", "content": "and 3+3?"},
        ])
    );
}

#[tokio::test]
async fn unauthorized_yields_single_auth_message() {
    let (url, _stub) = start_stub(StatusCode::UNAUTHORIZED, "{\"error\":\"bad key\"}".into()).await;
    let mut session = start_session(&url, Some("sk-wrong")).await;

    send_and_wait(&mut session, "hi").await;

    assert!(!session.is_loading());
    assert_eq!(
        contents(&session),
        vec![
            (Direction::Received, "welcome".to_string()),
            (Direction::Sent, "hi".to_string()),
            (Direction::Received, AUTH_FAILURE_TEXT.to_string()),
        ]
    );
}

#[tokio::test]
async fn rate_limit_and_billing_yield_quota_message() {
    for status in [StatusCode::TOO_MANY_REQUESTS, StatusCode::PAYMENT_REQUIRED] {
        let (url, _stub) = start_stub(status, String::new()).await;
        let mut session = start_session(&url, Some("sk-test")).await;

        send_and_wait(&mut session, "hi").await;

        let messages = contents(&session);
        assert_eq!(messages.len(), 3, "status {status}");
        assert_eq!(
            messages[2],
            (Direction::Received, QUOTA_FAILURE_TEXT.to_string())
        );
    }
}

#[tokio::test]
async fn server_error_yields_generic_message() {
    let (url, _stub) = start_stub(StatusCode::INTERNAL_SERVER_ERROR, "boom".into()).await;
    let mut session = start_session(&url, Some("sk-test")).await;

    send_and_wait(&mut session, "hi").await;

    let messages = contents(&session);
    assert_eq!(messages.len(), 3);
    assert_eq!(
        messages[2],
        (Direction::Received, SERVICE_FAILURE_TEXT.to_string())
    );
}

#[tokio::test]
async fn failure_mid_stream_keeps_partial_reply() {
    let body = format!(
        "data: {}\n\ndata: {{\"error\":{{\"message\":\"overloaded\"}}}}\n\n",
        json!({"choices": [{"delta": {"content": "half an ans"}}]})
    );
    let (url, _stub) = start_stub(StatusCode::OK, body).await;
    let mut session = start_session(&url, Some("sk-test")).await;

    send_and_wait(&mut session, "question").await;

    assert_eq!(
        contents(&session),
        vec![
            (Direction::Received, "welcome".to_string()),
            (Direction::Sent, "question".to_string()),
            (Direction::Received, "half an ans".to_string()),
            (Direction::Received, SERVICE_FAILURE_TEXT.to_string()),
        ]
    );
}

#[tokio::test]
async fn missing_api_key_never_reaches_the_service() {
    let (url, stub) = start_stub(StatusCode::OK, sse(&["unused"])).await;
    let mut session = start_session(&url, None).await;

    send_and_wait(&mut session, "hi").await;

    assert!(stub.requests.lock().unwrap().is_empty());
    let messages = contents(&session);
    assert_eq!(messages.len(), 3);
    assert_eq!(
        messages[2],
        (Direction::Received, AUTH_FAILURE_TEXT.to_string())
    );
}

#[tokio::test]
async fn unreachable_service_yields_generic_message() {
    // Bind then drop to get a port nobody listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut session = start_session(&format!("http://{}", addr), Some("sk-test")).await;
    send_and_wait(&mut session, "hi").await;

    let messages = contents(&session);
    assert_eq!(messages.len(), 3);
    assert_eq!(
        messages[2],
        (Direction::Received, SERVICE_FAILURE_TEXT.to_string())
    );
}

#[tokio::test]
async fn selected_model_is_sent() {
    let (url, stub) = start_stub(StatusCode::OK, sse(&["ok"])).await;
    let mut session = start_session(&url, Some("sk-test")).await;

    session.set_model("deepseek-reasoner");
    send_and_wait(&mut session, "hi").await;

    assert_eq!(
        stub.requests.lock().unwrap()[0].1["model"],
        "deepseek-reasoner"
    );
}

#[tokio::test]
async fn assistant_mode_holds_no_relay_connection() {
    let (url, _stub) = start_stub(StatusCode::OK, sse(&["ok"])).await;
    let mut session = start_session(&url, Some("sk-test")).await;

    send_and_wait(&mut session, "hi").await;
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    assert!(session.connect().await.is_err());
}
