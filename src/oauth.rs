//! OAuth2 authorization-code broker and the email-domain allowlist.
//!
//! The broker talks to the identity provider and nothing else: it holds no
//! session state and never touches the store. A successful `login` hands the
//! verified profile back to the caller, who decides whether to mint a
//! session.

use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::config::OAuthConfig;
use crate::error::AuthError;

/// Bearer token from the provider's token endpoint. Held only long enough
/// for the userinfo fetch.
#[derive(Clone)]
pub struct AccessToken(String);

impl AccessToken {
    fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(..)")
    }
}

/// The profile fields the gateway cares about. A provider that omits the
/// email yields an empty string here, which the allowlist always denies.
#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Three-legged OAuth2 client bound to one provider and one allowed email
/// domain.
pub struct OAuthBroker {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    /// Precomputed lowercase `@domain` suffix for the allowlist check.
    domain_suffix: String,
    auth_endpoint: String,
    token_endpoint: String,
    userinfo_endpoint: String,
    scopes: Vec<String>,
}

impl OAuthBroker {
    /// Build a broker from configuration. Every field of the client triple
    /// (id, secret, redirect URI) plus the allowed domain must be present;
    /// without them no authorization URL may be offered.
    pub fn new(config: &OAuthConfig) -> Result<Self, AuthError> {
        let client_id = require(&config.client_id, "client_id")?;
        let client_secret = require(&config.client_secret, "client_secret")?;
        let redirect_uri = require(&config.redirect_uri, "redirect_uri")?;
        let allowed_domain = require(&config.allowed_domain, "allowed_domain")?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        // Providers match the registered callback as an exact string, so the
        // URI used in both legs must not carry a trailing slash.
        let redirect_uri = redirect_uri.trim_end_matches('/').to_string();
        let domain = allowed_domain.trim_start_matches('@').to_lowercase();

        Ok(Self {
            http,
            client_id,
            client_secret,
            redirect_uri,
            domain_suffix: format!("@{domain}"),
            auth_endpoint: config.auth_endpoint.clone(),
            token_endpoint: config.token_endpoint.clone(),
            userinfo_endpoint: config.userinfo_endpoint.clone(),
            scopes: config.scopes.clone(),
        })
    }

    /// The URL the browser is sent to. Deterministic: built from the client
    /// id, the normalized redirect URI, and the configured scopes, nothing
    /// else.
    pub fn authorization_url(&self) -> String {
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}",
            self.auth_endpoint,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&self.scopes.join(" ")),
        )
    }

    /// Swap the authorization code for an access token. One POST, no
    /// retries, no caching: a replayed code is re-presented to the provider,
    /// which refuses it (codes are single-use upstream).
    pub async fn exchange_code(&self, code: &str) -> Result<AccessToken, AuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&params)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AuthError::Network(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }
        let token: TokenResponse = response.json().await?;
        Ok(AccessToken(token.access_token))
    }

    /// Fetch the profile the access token belongs to.
    pub async fn fetch_profile(&self, token: &AccessToken) -> Result<UserProfile, AuthError> {
        let response = self
            .http
            .get(&self.userinfo_endpoint)
            .bearer_auth(token.as_str())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AuthError::Network(format!(
                "userinfo endpoint returned {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    /// Case-insensitive suffix match on the full `@domain`. Empty emails
    /// never pass, and neither do lookalike domains (`evil-allowed.com`) or
    /// subdomains.
    pub fn authorize(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        !email.is_empty() && email.ends_with(&self.domain_suffix)
    }

    /// The composed flow: exchange the code, fetch the profile, apply the
    /// allowlist. Storage is the caller's job.
    pub async fn login(&self, code: &str) -> Result<UserProfile, AuthError> {
        let token = self.exchange_code(code).await?;
        let profile = self.fetch_profile(&token).await?;
        if !self.authorize(&profile.email) {
            debug!(email = %profile.email, "sign-in denied by domain allowlist");
            return Err(AuthError::Denied {
                email: profile.email,
            });
        }
        Ok(profile)
    }
}

fn require(value: &Option<String>, field: &'static str) -> Result<String, AuthError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(AuthError::Configuration(field))
}
