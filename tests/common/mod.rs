//! Shared test infrastructure for integration tests
//!
//! Provides TestGateway (spawns the real binary), Harness (in-process
//! router with a manually driven clock), and a mock OAuth provider.

#![allow(dead_code)]

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

use dashgate::api::{build_router, AppState};
use dashgate::clock::ManualClock;
use dashgate::config::{AdminConfig, OAuthConfig};
use dashgate::metrics::Metrics;
use dashgate::oauth::OAuthBroker;
use dashgate::registry::{RegistryOptions, SessionRegistry};
use dashgate::store::MemoryStore;

/// Port counter to avoid conflicts between tests that spawn the binary.
static PORT_COUNTER: AtomicU16 = AtomicU16::new(18300);

/// Credentials every harness configures for admin login.
pub const ADMIN_USER: &str = "root";
pub const ADMIN_PASS: &str = "hunter2";

/// OAuth client identity the mock provider accepts.
pub const TEST_CLIENT_ID: &str = "test-client";
pub const TEST_CLIENT_SECRET: &str = "test-secret";
pub const TEST_REDIRECT_URI: &str = "http://127.0.0.1:8300/api/oauth/callback";

// === Spawned-binary harness ===

/// Test server wrapper that spawns a real dashgate binary
pub struct TestGateway {
    process: Child,
    port: u16,
    config_path: PathBuf,
    _data_dir: TempDir,
}

impl TestGateway {
    /// Start a gateway with a file store and admin credentials.
    pub async fn file() -> Self {
        let data_dir = TempDir::new().expect("Failed to create temp dir");
        let body = store_and_admin_block(&data_dir);
        Self::spawn_with_config(&body, data_dir).await
    }

    /// Start a gateway whose OAuth endpoints point at a mock provider.
    pub async fn file_with_oauth(provider: &MockProvider, allowed_domain: &str) -> Self {
        let data_dir = TempDir::new().expect("Failed to create temp dir");
        let body = format!(
            "{}\n{}",
            store_and_admin_block(&data_dir),
            provider.oauth_toml(allowed_domain)
        );
        Self::spawn_with_config(&body, data_dir).await
    }

    /// Allocate a port, write a TOML config, spawn the binary, and wait
    /// for readiness. All factory methods delegate here.
    async fn spawn_with_config(config_body: &str, data_dir: TempDir) -> Self {
        let port = PORT_COUNTER.fetch_add(1, Ordering::SeqCst);
        let full_config = format!("listen_addr = \"127.0.0.1:{}\"\n{}", port, config_body);

        let config_path = data_dir.path().join("test.toml");
        std::fs::write(&config_path, &full_config).expect("Failed to write test config");

        let process = spawn_binary(&config_path);
        let mut server = Self {
            process,
            port,
            config_path,
            _data_dir: data_dir,
        };
        server.wait_ready().await;
        server
    }

    /// Kill the process and start a fresh one on the same port with the
    /// same config file (and therefore the same session file).
    pub async fn restart(mut self) -> Self {
        let _ = self.process.kill();
        let _ = self.process.wait();
        self.process = spawn_binary(&self.config_path);
        self.wait_ready().await;
        self
    }

    async fn wait_ready(&mut self) {
        let addr = format!("127.0.0.1:{}", self.port);
        for _ in 0..150 {
            if std::net::TcpStream::connect(&addr).is_ok() {
                sleep(Duration::from_millis(100)).await;
                return;
            }

            if let Ok(Some(status)) = self.process.try_wait() {
                panic!("Server exited before becoming ready: {}", status);
            }

            sleep(Duration::from_millis(100)).await;
        }

        let _ = self.process.kill();
        panic!("Timed out waiting for server on {}", addr);
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        let _ = self.process.kill();
    }
}

fn spawn_binary(config_path: &PathBuf) -> Child {
    Command::new(env!("CARGO_BIN_EXE_dashgate"))
        .env("DGT_CONFIG", config_path)
        .env("RUST_LOG", "dashgate=warn")
        .spawn()
        .expect("Failed to start server")
}

fn store_and_admin_block(data_dir: &TempDir) -> String {
    format!(
        concat!(
            "[store]\n",
            "type = \"file\"\n",
            "path = \"{}\"\n",
            "\n",
            "[admin]\n",
            "username = \"{}\"\n",
            "password = \"{}\"\n",
        ),
        data_dir.path().join("sessions.json").display(),
        ADMIN_USER,
        ADMIN_PASS,
    )
}

// === In-process harness ===

/// Gateway served in-process on an ephemeral port, with a manual clock so
/// tests can cross expiry boundaries without sleeping.
pub struct Harness {
    pub base_url: String,
    pub clock: ManualClock,
    pub registry: SessionRegistry,
    pub metrics: Metrics,
}

impl Harness {
    pub async fn new(broker: Option<OAuthBroker>) -> Self {
        let clock = ManualClock::new(Utc::now());
        let metrics = Metrics::new();
        let registry = SessionRegistry::spawn(
            Box::new(MemoryStore::new()),
            Arc::new(clock.clone()),
            RegistryOptions::new(metrics.clone()),
        );
        let state = Arc::new(AppState {
            registry: registry.clone(),
            broker,
            admin: AdminConfig {
                username: Some(ADMIN_USER.to_string()),
                password: Some(ADMIN_PASS.to_string()),
            },
            post_login_url: "http://dash.local/".to_string(),
            metrics: metrics.clone(),
        });
        let base_url = serve(build_router(state)).await;
        Self {
            base_url,
            clock,
            registry,
            metrics,
        }
    }
}

/// Serve a router on an ephemeral port and return its base URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind ephemeral port");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

// === Mock OAuth provider ===

#[derive(Clone)]
struct Account {
    email: String,
    name: Option<String>,
}

#[derive(Default)]
struct ProviderState {
    /// Codes handed out and not yet redeemed. Redeeming removes the entry,
    /// so a replayed code gets invalid_grant like it would upstream.
    codes: Mutex<HashMap<String, Account>>,
    tokens: Mutex<HashMap<String, Account>>,
    fail_token_endpoint: AtomicBool,
    counter: AtomicU64,
}

/// Local stand-in for the identity provider: single-use codes, bearer-token
/// userinfo, and a switch to make the token endpoint fail.
pub struct MockProvider {
    pub base_url: String,
    state: Arc<ProviderState>,
}

impl MockProvider {
    pub async fn spawn() -> Self {
        let state = Arc::new(ProviderState::default());
        let app = Router::new()
            .route("/auth", get(|| async { "sign-in page" }))
            .route("/token", post(token_endpoint))
            .route("/userinfo", get(userinfo_endpoint))
            .with_state(state.clone());
        let base_url = serve(app).await;
        Self { base_url, state }
    }

    /// Register an authorization code for the given account, as if the user
    /// had just consented at the provider.
    pub fn issue_code(&self, email: &str, name: Option<&str>) -> String {
        let code = format!("code-{}", self.state.counter.fetch_add(1, Ordering::SeqCst));
        self.state.codes.lock().insert(
            code.clone(),
            Account {
                email: email.to_string(),
                name: name.map(str::to_string),
            },
        );
        code
    }

    /// Make the token endpoint answer 500 until switched back.
    pub fn fail_token_endpoint(&self, fail: bool) {
        self.state.fail_token_endpoint.store(fail, Ordering::SeqCst);
    }

    pub fn oauth_config(&self, allowed_domain: &str) -> OAuthConfig {
        OAuthConfig {
            client_id: Some(TEST_CLIENT_ID.to_string()),
            client_secret: Some(TEST_CLIENT_SECRET.to_string()),
            redirect_uri: Some(TEST_REDIRECT_URI.to_string()),
            allowed_domain: Some(allowed_domain.to_string()),
            auth_endpoint: format!("{}/auth", self.base_url),
            token_endpoint: format!("{}/token", self.base_url),
            userinfo_endpoint: format!("{}/userinfo", self.base_url),
            request_timeout_secs: 2,
            ..OAuthConfig::default()
        }
    }

    pub fn broker(&self, allowed_domain: &str) -> OAuthBroker {
        OAuthBroker::new(&self.oauth_config(allowed_domain)).expect("broker config")
    }

    /// TOML `[oauth]` block pointing a spawned gateway at this provider.
    pub fn oauth_toml(&self, allowed_domain: &str) -> String {
        format!(
            concat!(
                "[oauth]\n",
                "client_id = \"{id}\"\n",
                "client_secret = \"{secret}\"\n",
                "redirect_uri = \"{redirect}\"\n",
                "allowed_domain = \"{domain}\"\n",
                "auth_endpoint = \"{base}/auth\"\n",
                "token_endpoint = \"{base}/token\"\n",
                "userinfo_endpoint = \"{base}/userinfo\"\n",
                "request_timeout_secs = 2\n",
            ),
            id = TEST_CLIENT_ID,
            secret = TEST_CLIENT_SECRET,
            redirect = TEST_REDIRECT_URI,
            domain = allowed_domain,
            base = self.base_url,
        )
    }
}

#[derive(Debug, Deserialize)]
struct TokenForm {
    grant_type: String,
    code: String,
    client_id: String,
    client_secret: String,
    #[allow(dead_code)]
    redirect_uri: String,
}

async fn token_endpoint(
    State(state): State<Arc<ProviderState>>,
    Form(form): Form<TokenForm>,
) -> (StatusCode, Json<Value>) {
    if state.fail_token_endpoint.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "server_error"})),
        );
    }
    if form.grant_type != "authorization_code"
        || form.client_id != TEST_CLIENT_ID
        || form.client_secret != TEST_CLIENT_SECRET
    {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid_client"})),
        );
    }
    match state.codes.lock().remove(&form.code) {
        Some(account) => {
            let token = format!("at-{}", state.counter.fetch_add(1, Ordering::SeqCst));
            state.tokens.lock().insert(token.clone(), account);
            (
                StatusCode::OK,
                Json(json!({"access_token": token, "token_type": "Bearer"})),
            )
        }
        None => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_grant"})),
        ),
    }
}

async fn userinfo_endpoint(
    State(state): State<Arc<ProviderState>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    match state.tokens.lock().get(bearer).cloned() {
        Some(account) => (
            StatusCode::OK,
            Json(json!({"email": account.email, "name": account.name})),
        ),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid_token"})),
        ),
    }
}

// === Shared HTTP helpers (reqwest) ===

/// A client that surfaces redirects instead of following them, so tests can
/// inspect the callback's Location header.
pub fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("Failed to build client")
}

/// POST the admin credentials and return the parsed response body.
pub async fn admin_login(client: &reqwest::Client, base_url: &str) -> (StatusCode, Value) {
    login_as(client, base_url, ADMIN_USER, ADMIN_PASS).await
}

pub async fn login_as(
    client: &reqwest::Client,
    base_url: &str,
    username: &str,
    password: &str,
) -> (StatusCode, Value) {
    let resp = client
        .post(format!("{}/api/admin/login", base_url))
        .json(&json!({"username": username, "password": password}))
        .send()
        .await
        .expect("login request failed");
    let status = resp.status();
    let body = resp.json().await.expect("login response not JSON");
    (status, body)
}

/// GET /api/session with the given query string and return the body.
pub async fn get_session(client: &reqwest::Client, base_url: &str, query: &str) -> Value {
    let resp = client
        .get(format!("{}/api/session?{}", base_url, query))
        .send()
        .await
        .expect("session request failed");
    assert!(
        resp.status().is_success(),
        "session check failed: {}",
        resp.status()
    );
    resp.json().await.expect("session response not JSON")
}

/// POST /api/logout with the given query string and return the body.
pub async fn post_logout(client: &reqwest::Client, base_url: &str, query: &str) -> Value {
    let resp = client
        .post(format!("{}/api/logout?{}", base_url, query))
        .send()
        .await
        .expect("logout request failed");
    assert!(
        resp.status().is_success(),
        "logout failed: {}",
        resp.status()
    );
    resp.json().await.expect("logout response not JSON")
}

/// Extract a query parameter from a URL (used on redirect Locations).
pub fn query_param(url: &str, key: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then(|| {
            urlencoding::decode(v)
                .map(|c| c.into_owned())
                .unwrap_or_else(|_| v.to_string())
        })
    })
}

/// The Location header of a redirect response.
pub fn location_of(resp: &reqwest::Response) -> String {
    resp.headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .expect("response has no Location header")
        .to_string()
}
