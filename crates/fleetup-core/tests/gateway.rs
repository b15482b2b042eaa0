//! ---
//! fu_section: "01-core-functionality"
//! fu_subsection: "tests"
//! fu_type: "test"
//! fu_scope: "code"
//! fu_description: "Device gateway and metadata sources against a local HTTP server."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use fleetup_core::gateway::{HEADER_APPS, HEADER_TAGS, HEADER_TARGET};
use fleetup_core::metadata::{canonical_signed_bytes, key_id};
use fleetup_core::runtime::{AppStatus, AppsStatus};
use fleetup_core::status::AppsStatesReport;
use fleetup_core::{
    AppRef, Collector, DeviceFilter, DeviceGateway, GatewayError, IdentityHandle, MetadataError,
    PlainTargetSource, SignedTargetSource, Target, TargetSource,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use url::Url;

#[derive(Debug, Clone)]
struct Seen {
    path: &'static str,
    headers: HeaderMap,
    body: Value,
}

#[derive(Clone)]
struct ServerState {
    document: Arc<Mutex<Value>>,
    seen: Arc<Mutex<Vec<Seen>>>,
    reject_events: Arc<AtomicBool>,
}

impl ServerState {
    fn new(document: Value) -> Self {
        Self {
            document: Arc::new(Mutex::new(document)),
            seen: Arc::new(Mutex::new(Vec::new())),
            reject_events: Arc::new(AtomicBool::new(false)),
        }
    }

    fn seen(&self, path: &str) -> Vec<Seen> {
        self.seen
            .lock()
            .iter()
            .filter(|seen| seen.path == path)
            .cloned()
            .collect()
    }

    fn record(&self, path: &'static str, headers: HeaderMap, body: Value) {
        self.seen.lock().push(Seen {
            path,
            headers,
            body,
        });
    }
}

async fn targets(State(state): State<ServerState>, headers: HeaderMap) -> Json<Value> {
    state.record("targets", headers, Value::Null);
    let document = state.document.lock().clone();
    Json(document)
}

async fn events(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    if state.reject_events.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    state.record("events", headers, body);
    StatusCode::NO_CONTENT
}

async fn apps_states(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    state.record("apps-states", headers, body);
    StatusCode::OK
}

fn routes(state: ServerState) -> Router {
    Router::new()
        .route("/repo/targets.json", get(targets))
        .route("/events", post(events))
        .route("/apps-states", post(apps_states))
        .with_state(state)
}

async fn spawn_server(state: ServerState) -> SocketAddr {
    serve(routes(state)).await
}

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn gateway(addr: SocketAddr, identity: IdentityHandle) -> Arc<DeviceGateway> {
    let base = Url::parse(&format!("http://{addr}/")).unwrap();
    Arc::new(DeviceGateway::new(base, Duration::from_secs(5), "fleetup-test", identity).unwrap())
}

fn signed_targets() -> Value {
    json!({
        "version": 7,
        "targets": {
            "intel-corei7-64-lmp-100": {
                "hashes": {"sha256": "aa"},
                "length": 10,
                "custom": {
                    "version": "100",
                    "hardwareIds": ["intel-corei7-64"],
                    "tags": ["main"],
                    "docker_compose_apps": {"app1": {"uri": "hub.fleetup.test/app1@sha256:01"}}
                }
            },
            "intel-corei7-64-lmp-101": {
                "hashes": {"sha256": "bb"},
                "length": 10,
                "custom": {
                    "version": 101,
                    "hardwareIds": ["intel-corei7-64"],
                    "tags": ["devel"],
                    "docker_compose_apps": {}
                }
            },
            "raspberrypi4-lmp-100": {
                "hashes": {"sha256": "cc"},
                "length": 10,
                "custom": {
                    "version": "100",
                    "hardwareIds": ["raspberrypi4"],
                    "tags": ["main"]
                }
            }
        }
    })
}

fn filter() -> DeviceFilter {
    DeviceFilter {
        hardware_id: "intel-corei7-64".to_string(),
        tags: vec!["main".to_string()],
    }
}

fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

fn signed_document(signing: &SigningKey) -> Value {
    let signed = signed_targets();
    let sig = signing.sign(&canonical_signed_bytes(&signed).unwrap());
    json!({
        "signed": signed,
        "signatures": [{
            "keyid": key_id(&signing.verifying_key()),
            "sig": general_purpose::STANDARD.encode(sig.to_bytes()),
        }]
    })
}

fn header<'a>(seen: &'a Seen, name: &str) -> &'a str {
    seen.headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

#[tokio::test]
async fn targets_request_advertises_identity_and_tags() {
    let state = ServerState::new(json!({"signed": signed_targets(), "signatures": []}));
    let addr = spawn_server(state.clone()).await;
    let identity = IdentityHandle::new();
    identity.set_current(&Target::new(
        "intel-corei7-64-lmp-99",
        99,
        vec![
            AppRef::new("app1", "hub.fleetup.test/app1@sha256:00"),
            AppRef::new("app2", "hub.fleetup.test/app2@sha256:00"),
        ],
    ));
    let dir = tempfile::tempdir().unwrap();
    let source = PlainTargetSource::new(
        gateway(addr, identity),
        dir.path().join("targets.json"),
        filter(),
    );

    let set = source.load_targets(true).await.unwrap();
    assert_eq!(set.metadata_version, 7);
    assert_eq!(set.len(), 1);
    let target = set.latest().unwrap();
    assert_eq!(target.id, "intel-corei7-64-lmp-100");
    assert_eq!(target.version, 100);
    assert_eq!(target.sha256, "aa");
    assert_eq!(target.apps[0].uri, "hub.fleetup.test/app1@sha256:01");

    let requests = state.seen("targets");
    assert_eq!(requests.len(), 1);
    assert_eq!(header(&requests[0], HEADER_TARGET), "intel-corei7-64-lmp-99");
    assert_eq!(header(&requests[0], HEADER_APPS), "app1,app2");
    assert_eq!(header(&requests[0], HEADER_TAGS), "main");
}

#[tokio::test]
async fn cached_targets_serve_offline_loads() {
    let state = ServerState::new(json!({"signed": signed_targets(), "signatures": []}));
    let addr = spawn_server(state.clone()).await;
    let dir = tempfile::tempdir().unwrap();
    let source = PlainTargetSource::new(
        gateway(addr, IdentityHandle::new()),
        dir.path().join("cache/targets.json"),
        filter(),
    );

    // No cache yet: falls through to the server.
    assert_eq!(source.load_targets(false).await.unwrap().len(), 1);
    assert_eq!(source.load_targets(false).await.unwrap().len(), 1);
    assert_eq!(state.seen("targets").len(), 1);
    assert!(dir.path().join("cache/targets.json").exists());
}

#[tokio::test]
async fn signed_source_verifies_the_document() {
    let signing = signing_key();
    let state = ServerState::new(signed_document(&signing));
    let addr = spawn_server(state.clone()).await;
    let dir = tempfile::tempdir().unwrap();
    let plain = PlainTargetSource::new(
        gateway(addr, IdentityHandle::new()),
        dir.path().join("targets.json"),
        filter(),
    );
    let key = general_purpose::STANDARD.encode(signing.verifying_key().as_bytes());
    let source = SignedTargetSource::new(plain, &key).unwrap();
    assert_eq!(source.load_targets(true).await.unwrap().len(), 1);

    let mut tampered = signed_document(&signing);
    tampered["signed"]["version"] = json!(8);
    *state.document.lock() = tampered;
    assert!(matches!(
        source.load_targets(true).await,
        Err(MetadataError::Signature(_))
    ));
}

#[tokio::test]
async fn collector_posts_events_and_app_states() {
    let state = ServerState::new(Value::Null);
    let addr = spawn_server(state.clone()).await;
    let gateway = gateway(addr, IdentityHandle::new());

    gateway
        .post_events(&[json!({"id": "e1"}), json!({"id": "e2"})])
        .await
        .unwrap();
    let status = AppsStatus {
        apps: vec![AppStatus {
            name: "app1".into(),
            uri: "hub.fleetup.test/app1@sha256:01".into(),
            fetched: true,
            installed: true,
            running: true,
            services: Vec::new(),
        }],
    };
    gateway
        .post_apps_states(&AppsStatesReport::new("aa", &status))
        .await
        .unwrap();

    let events = state.seen("events");
    assert_eq!(events[0].body.as_array().unwrap().len(), 2);
    let report = &state.seen("apps-states")[0].body;
    assert_eq!(report["ostree"], "aa");
    assert_eq!(report["apps"]["app1"]["state"], "running");
    assert_eq!(report["apps"]["app1"]["uri"], "hub.fleetup.test/app1@sha256:01");
    assert!(report["deviceTime"].is_string());
}

#[tokio::test]
async fn rejected_post_is_an_error() {
    let state = ServerState::new(Value::Null);
    state.reject_events.store(true, Ordering::SeqCst);
    let addr = spawn_server(state.clone()).await;
    let gateway = gateway(addr, IdentityHandle::new());

    let err = gateway.post_events(&[json!({})]).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::UnexpectedStatus { status: 503, .. }
    ));
}

#[tokio::test]
async fn base_url_path_prefix_is_kept() {
    let state = ServerState::new(json!({"signed": signed_targets(), "signatures": []}));
    let addr = serve(Router::new().nest("/device-gateway", routes(state.clone()))).await;
    let base = Url::parse(&format!("http://{addr}/device-gateway")).unwrap();
    let gateway = Arc::new(
        DeviceGateway::new(base, Duration::from_secs(5), "fleetup-test", IdentityHandle::new())
            .unwrap(),
    );

    let dir = tempfile::tempdir().unwrap();
    let source = PlainTargetSource::new(
        gateway.clone(),
        dir.path().join("targets.json"),
        filter(),
    );
    assert_eq!(source.load_targets(true).await.unwrap().len(), 1);
    gateway.post_events(&[json!({"id": "e1"})]).await.unwrap();

    assert_eq!(state.seen("targets").len(), 1);
    assert_eq!(state.seen("events").len(), 1);
}
