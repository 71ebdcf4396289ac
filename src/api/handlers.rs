//! Session gateway HTTP handlers.
//!
//! The dashboard carries its session references as URL query parameters:
//! `sid` for the Admin slot and `user_sid` for the User slot. Both may be
//! present at once; the two slots never share identifiers. Only aliases
//! travel in URLs, tokens stay inside the process.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::AdminConfig;
use crate::error::AuthError;
use crate::metrics::{metrics_handler, Metrics};
use crate::oauth::OAuthBroker;
use crate::records::{AliasId, Principal, Role};
use crate::registry::SessionRegistry;

/// Application state shared across handlers
pub struct AppState {
    pub registry: SessionRegistry,
    /// None while the OAuth client is unconfigured; the user sign-in
    /// routes then answer without touching the network.
    pub broker: Option<OAuthBroker>,
    pub admin: AdminConfig,
    /// Where the browser lands after the OAuth callback.
    pub post_login_url: String,
    pub metrics: Metrics,
}

/// Assemble the full router. Shared between `main` and the integration
/// tests, which serve it on an ephemeral port.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/api/session", get(check_session))
        .route("/api/admin/login", post(admin_login))
        .route("/api/logout", post(logout))
        .route("/api/oauth/url", get(oauth_authorize_url))
        .route("/api/oauth/callback", get(oauth_callback))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Admin login handler
/// POST /api/admin/login
///
/// Verifies the shared credential and issues an Admin session. The
/// response carries the alias for the `sid` URL parameter, never the
/// token.
pub async fn admin_login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> Response {
    if !state.admin.verify(&body.username, &body.password) {
        state
            .metrics
            .login_failures_total
            .with_label_values(&["admin"])
            .inc();
        warn!("admin login rejected");
        return (
            StatusCode::UNAUTHORIZED,
            Json(LoginResponse {
                ok: false,
                sid: None,
                expires_at: None,
            }),
        )
            .into_response();
    }

    match state
        .registry
        .create_session(Role::Admin, body.username.clone(), None)
        .await
    {
        Ok(issued) => {
            info!(username = %body.username, "admin signed in");
            Json(LoginResponse {
                ok: true,
                sid: Some(issued.alias.id().to_string()),
                expires_at: Some(issued.expires_at),
            })
            .into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Query parameters naming the caller's session slots
#[derive(Debug, Deserialize, Default)]
pub struct SessionQuery {
    pub sid: Option<String>,
    pub user_sid: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub admin: Option<Principal>,
    pub user: Option<Principal>,
}

/// Session check handler
/// GET /api/session?sid=X&user_sid=Y
///
/// Validates whichever slots the caller holds. An expired entry is
/// deleted the moment it is looked at, so the next check is a plain miss.
pub async fn check_session(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
) -> Json<SessionResponse> {
    let admin = match parse_slot(query.sid.as_deref(), Role::Admin) {
        Some(alias) => state.registry.validate(alias).await,
        None => None,
    };
    let user = match parse_slot(query.user_sid.as_deref(), Role::User) {
        Some(alias) => state.registry.validate(alias).await,
        None => None,
    };
    Json(SessionResponse { admin, user })
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub ok: bool,
    pub cleared: usize,
}

/// Logout handler
/// POST /api/logout?sid=X&user_sid=Y
///
/// Tears down the referenced sessions, token and alias together.
/// Dropping the parameters from the visible URL afterwards is the
/// caller's side of the contract.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<LogoutResponse>, AuthError> {
    let slots = [
        parse_slot(query.sid.as_deref(), Role::Admin),
        parse_slot(query.user_sid.as_deref(), Role::User),
    ];

    let mut cleared = 0usize;
    for alias in slots.into_iter().flatten() {
        if let Some(token) = state.registry.resolve_token(alias).await {
            if state.registry.clear(token).await? {
                cleared += 1;
            }
        }
    }

    debug!(cleared, "logout processed");
    Ok(Json(LogoutResponse { ok: true, cleared }))
}

#[derive(Debug, Serialize)]
pub struct AuthorizeUrlResponse {
    pub url: String,
}

/// Authorization URL handler
/// GET /api/oauth/url
///
/// Where to send the browser for user sign-in. Answers 503 while the
/// OAuth client is unconfigured.
pub async fn oauth_authorize_url(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AuthorizeUrlResponse>, AuthError> {
    let broker = state
        .broker
        .as_ref()
        .ok_or(AuthError::Configuration("oauth client settings"))?;
    Ok(Json(AuthorizeUrlResponse {
        url: broker.authorization_url(),
    }))
}

/// Query parameters the provider sends back on the callback
#[derive(Debug, Deserialize, Default)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub error: Option<String>,
}

/// OAuth callback handler
/// GET /api/oauth/callback?code=X
///
/// Finishes the three-legged flow and bounces the browser back to the
/// dashboard with a fresh `user_sid`. The `code` and any other provider
/// parameters do not survive the redirect. Failures redirect with an
/// `auth_error` parameter and create nothing.
pub async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> Redirect {
    let Some(broker) = state.broker.as_ref() else {
        warn!("callback received while oauth is unconfigured");
        return redirect_with_error(&state.post_login_url, "failed");
    };

    if let Some(provider_error) = query.error.as_deref() {
        debug!(error = provider_error, "provider returned an error on callback");
        state
            .metrics
            .oauth_exchanges_total
            .with_label_values(&["network_error"])
            .inc();
        return redirect_with_error(&state.post_login_url, "failed");
    }

    let Some(code) = query.code.as_deref().filter(|c| !c.is_empty()) else {
        return redirect_with_error(&state.post_login_url, "failed");
    };

    match broker.login(code).await {
        Ok(profile) => {
            let created = state
                .registry
                .create_session(Role::User, profile.email.clone(), profile.name.clone())
                .await;
            match created {
                Ok(issued) => {
                    state
                        .metrics
                        .oauth_exchanges_total
                        .with_label_values(&["ok"])
                        .inc();
                    info!(email = %profile.email, "user signed in");
                    Redirect::to(&with_query_param(
                        &state.post_login_url,
                        "user_sid",
                        issued.alias.id(),
                    ))
                }
                Err(e) => {
                    warn!(error = %e, "session creation failed after code exchange");
                    redirect_with_error(&state.post_login_url, "failed")
                }
            }
        }
        Err(AuthError::Denied { email }) => {
            state
                .metrics
                .oauth_exchanges_total
                .with_label_values(&["denied"])
                .inc();
            state
                .metrics
                .login_failures_total
                .with_label_values(&["user"])
                .inc();
            warn!(email = %email, "sign-in denied by domain allowlist");
            redirect_with_error(&state.post_login_url, "denied")
        }
        Err(e) => {
            state
                .metrics
                .oauth_exchanges_total
                .with_label_values(&["network_error"])
                .inc();
            warn!(error = %e, "oauth code exchange failed");
            redirect_with_error(&state.post_login_url, "failed")
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub admin_login_enabled: bool,
    pub oauth_login_enabled: bool,
}

/// Health check handler
/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        admin_login_enabled: state.admin.enabled(),
        oauth_login_enabled: state.broker.is_some(),
    })
}

/// A query value that is not a well-formed alias identifies nothing; it
/// is treated exactly like an absent parameter.
fn parse_slot(value: Option<&str>, role: Role) -> Option<AliasId> {
    AliasId::parse(role, value?)
}

fn with_query_param(base: &str, key: &str, value: &str) -> String {
    let sep = if base.contains('?') { '&' } else { '?' };
    format!("{base}{sep}{key}={}", urlencoding::encode(value))
}

fn redirect_with_error(base: &str, reason: &str) -> Redirect {
    Redirect::to(&with_query_param(base, "auth_error", reason))
}
