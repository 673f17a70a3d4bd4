use async_trait::async_trait;
use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

use wallet_session_lib::{
    AppConfig, ConfigStore, Consent, ContextOptions, ModalChooser, Outcome, ProviderDescriptor,
    SessionContext, SessionError, SessionPaths, SessionStatus,
};

const PROJECT_ID: &str = "0123456789abcdef0123456789abcdef";
const ACCOUNT: &str = "0x00000000000000000000000000000000000000a1";

/// Serve `app` on an ephemeral local port and return its base URL.
async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
    let addr = listener.local_addr().expect("stub address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve stub");
    });
    format!("http://{}", addr)
}

fn bridge_reply(reject: bool, request: &Value) -> Value {
    let id = request.get("id").cloned().unwrap_or(json!(1));
    match request.get("method").and_then(Value::as_str) {
        Some("eth_requestAccounts") if reject => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": 4001, "message": "User rejected the request." }
        }),
        Some("eth_requestAccounts") => json!({ "jsonrpc": "2.0", "id": id, "result": [ACCOUNT] }),
        Some("eth_chainId") => json!({ "jsonrpc": "2.0", "id": id, "result": "0xaa36a7" }),
        _ => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": "Method not found" }
        }),
    }
}

/// EIP-1193 bridge stub answering the account handshake.
async fn spawn_bridge(reject: bool) -> String {
    let app = Router::new().route(
        "/",
        post(move |Json(request): Json<Value>| async move { Json(bridge_reply(reject, &request)) }),
    );
    serve(app).await
}

type CapturedQueries = Arc<parking_lot::Mutex<Vec<HashMap<String, String>>>>;

/// Application backend stub recording every eligibility query it receives.
async fn spawn_backend(captured: CapturedQueries) -> String {
    let app = Router::new().route(
        "/eligibility",
        get(move |Query(query): Query<HashMap<String, String>>| async move {
            captured.lock().push(query);
            Json(json!({ "eligible": true, "reason": "early supporter" }))
        }),
    );
    serve(app).await
}

fn write_config(root: &Path, configure: impl FnOnce(&mut AppConfig)) {
    let paths = SessionPaths::new(root).expect("paths");
    paths.ensure_directories().expect("create root");
    let mut config = AppConfig::new("development");
    config.pairing.project_id = Some(PROJECT_ID.to_string());
    configure(&mut config);
    ConfigStore::from_paths(&paths).save(&config).expect("save config");
}

struct PickProvider(&'static str);

#[async_trait]
impl ModalChooser for PickProvider {
    async fn choose(&self, options: &[ProviderDescriptor]) -> Option<String> {
        options
            .iter()
            .find(|d| d.id == self.0)
            .map(|d| d.id.clone())
    }
}

#[tokio::test]
async fn injected_connect_persists_provider_for_reconnect() {
    let temp = TempDir::new().expect("temp dir");
    let bridge = spawn_bridge(false).await;
    write_config(temp.path(), |config| {
        config.injected.bridge_endpoint = Some(bridge.clone());
    });

    let context = SessionContext::initialize(temp.path().to_path_buf(), ContextOptions::default())
        .expect("initialize");
    let session = context.connect("injected").await.expect("connect");
    assert_eq!(session.status, SessionStatus::Connected);
    assert_eq!(session.chain_id, Some(11_155_111));

    let account = context.session().accounts().current().expect("account state");
    assert_eq!(account.account, ACCOUNT);
    assert_eq!(
        context.load_config().expect("config").last_provider.as_deref(),
        Some("injected")
    );

    context.disconnect().await.expect("disconnect");
    assert!(context.session().accounts().current().is_none());

    // A fresh process picks the provider up again.
    let restarted = SessionContext::initialize(temp.path().to_path_buf(), ContextOptions::default())
        .expect("re-initialize");
    assert_eq!(restarted.session().last_provider().as_deref(), Some("injected"));
    let session = restarted.reconnect().await.expect("reconnect");
    assert_eq!(session.status, SessionStatus::Connected);
}

#[tokio::test]
async fn bridge_rejection_is_cancelled() {
    let temp = TempDir::new().expect("temp dir");
    let bridge = spawn_bridge(true).await;
    write_config(temp.path(), |config| {
        config.injected.bridge_endpoint = Some(bridge.clone());
    });

    let context = SessionContext::initialize(temp.path().to_path_buf(), ContextOptions::default())
        .expect("initialize");
    let err = context.connect("injected").await.expect_err("rejected");
    assert_eq!(err, SessionError::Cancelled);
    assert_eq!(context.session().current_session().status, SessionStatus::Failed);
    assert!(context.load_config().expect("config").last_provider.is_none());
}

#[tokio::test]
async fn missing_injected_wallet_is_provider_error() {
    let temp = TempDir::new().expect("temp dir");
    write_config(temp.path(), |_| {});

    let context = SessionContext::initialize(temp.path().to_path_buf(), ContextOptions::default())
        .expect("initialize");
    let err = context.connect("injected").await.expect_err("no wallet");
    assert!(matches!(err, SessionError::ProviderError(_)));
    let latest = context.session().results().latest().expect("result");
    assert!(!latest.is_success());
}

#[tokio::test]
async fn pairing_approved_by_relay() {
    let temp = TempDir::new().expect("temp dir");
    write_config(temp.path(), |_| {});

    let context = SessionContext::initialize(temp.path().to_path_buf(), ContextOptions::default())
        .expect("initialize");
    let responder = context.pairing_responder().expect("pairing configured");

    let pending = {
        let context = context.clone();
        tokio::spawn(async move { context.connect("remote-session").await })
    };

    let topic = loop {
        if let Some(topic) = responder.pending_topics().pop() {
            break topic;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    };
    assert!(context.session().is_busy());
    responder.approve(&topic, ACCOUNT, 1).expect("approve");

    let session = pending.await.expect("join").expect("connect");
    assert_eq!(session.status, SessionStatus::Connected);
    assert_eq!(session.chain_id, Some(1));

    context.disconnect().await.expect("disconnect");
    assert!(responder.pending_topics().is_empty());
}

#[tokio::test]
async fn pairing_timeout_releases_resources() {
    let temp = TempDir::new().expect("temp dir");
    write_config(temp.path(), |config| {
        config.session.connect_timeout_ms = 50;
    });

    let context = SessionContext::initialize(temp.path().to_path_buf(), ContextOptions::default())
        .expect("initialize");
    let responder = context.pairing_responder().expect("pairing configured");

    let err = context.connect("remote-session").await.expect_err("timeout");
    assert_eq!(err, SessionError::Timeout { after_ms: 50 });
    assert!(context.session().accounts().current().is_none());
    assert!(responder.pending_topics().is_empty());
}

#[tokio::test]
async fn modal_delegates_to_chosen_provider() {
    let temp = TempDir::new().expect("temp dir");
    let bridge = spawn_bridge(false).await;
    write_config(temp.path(), |config| {
        config.injected.bridge_endpoint = Some(bridge.clone());
    });

    let options = ContextOptions {
        chooser: Some(Arc::new(PickProvider("injected"))),
        pairing_display: None,
    };
    let context = SessionContext::initialize(temp.path().to_path_buf(), options).expect("initialize");
    let session = context.connect("modal").await.expect("connect");
    assert_eq!(session.provider.map(|p| p.id).as_deref(), Some("modal"));
    assert_eq!(
        context.session().accounts().current().map(|a| a.account).as_deref(),
        Some(ACCOUNT)
    );
}

#[tokio::test]
async fn eligibility_lookup_sends_only_connected_account() {
    let temp = TempDir::new().expect("temp dir");
    let bridge = spawn_bridge(false).await;
    let captured = CapturedQueries::default();
    let backend = spawn_backend(Arc::clone(&captured)).await;
    write_config(temp.path(), |config| {
        config.injected.bridge_endpoint = Some(bridge.clone());
        config.backend.endpoint = Some(backend.clone());
    });

    let context = SessionContext::initialize(temp.path().to_path_buf(), ContextOptions::default())
        .expect("initialize");
    let client = context.boundary().expect("boundary configured").clone();
    let consent = Consent::new("Check eligibility for the community drop").expect("consent");

    let err = client
        .eligibility(context.session(), &consent)
        .await
        .expect_err("not connected yet");
    assert!(matches!(err, SessionError::ValidationError(_)));
    assert!(captured.lock().is_empty());

    context.connect("injected").await.expect("connect");
    let response = client
        .eligibility(context.session(), &consent)
        .await
        .expect("eligibility");
    assert!(response.eligible);

    let latest = context.session().results().latest().expect("result");
    assert_eq!(latest.outcome, Outcome::Success);
    assert_eq!(latest.payload.expect("payload")["eligible"], json!(true));

    let queries = captured.lock().clone();
    assert_eq!(queries.len(), 1);
    let expected: HashMap<String, String> = [
        ("account".to_string(), ACCOUNT.to_string()),
        ("chain_id".to_string(), "11155111".to_string()),
    ]
    .into_iter()
    .collect();
    assert_eq!(queries[0], expected);
}

#[tokio::test]
async fn unreachable_backend_is_network_error() {
    let temp = TempDir::new().expect("temp dir");
    let bridge = spawn_bridge(false).await;
    let backend = serve(Router::new().route(
        "/eligibility",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, Json(json!({}))) }),
    ))
    .await;
    write_config(temp.path(), |config| {
        config.injected.bridge_endpoint = Some(bridge.clone());
        config.backend.endpoint = Some(backend.clone());
    });

    let context = SessionContext::initialize(temp.path().to_path_buf(), ContextOptions::default())
        .expect("initialize");
    context.connect("injected").await.expect("connect");

    let consent = Consent::new("Check eligibility").expect("consent");
    let err = context
        .boundary()
        .expect("boundary configured")
        .eligibility(context.session(), &consent)
        .await
        .expect_err("503");
    assert!(matches!(err, SessionError::NetworkError(_)));
    // The session is unaffected by boundary failures.
    assert_eq!(context.session().current_session().status, SessionStatus::Connected);
}
