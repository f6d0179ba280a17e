//! OAuth 2.0 engine: authorization-code flow (+ optional PKCE), token
//! exchange, refresh lifecycle, and multi-account credential handling.
//!
//! One attempt may be in flight per provider at a time; starting a
//! second one is a caller error the presentation layer must prevent.
//! The engine logs it and does not queue.

pub mod consent;

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::Env;
use crate::credentials::{normalize_login, CredentialStore};
use crate::secrets::StorageError;
use crate::settings::SettingsStore;
use crate::types::Provider;

pub use consent::{AuthPresenter, ConsentBridge, ConsentError};

/// Tokens are refreshed once within this window of their expiry, so a
/// token never expires mid-request.
const REFRESH_BUFFER_SECS: i64 = 300;

// ============================================================================
// Types
// ============================================================================

/// An access token plus optional refresh token and expiry for one
/// provider or one (provider, account) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBundle {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// How a provider's token endpoint expects the code exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStyle {
    /// JSON body carrying the client id/secret (GitHub, Teams, Google).
    JsonBody,
    /// HTTP Basic client credentials with a JSON body (Notion).
    BasicJson,
}

/// Immutable per-provider OAuth parameters, supplied at startup from
/// the environment configuration. Never persisted.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub authorize_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: String,
    pub callback_scheme: String,
    pub use_pkce: bool,
    pub exchange_style: ExchangeStyle,
    /// Providers issuing durable tokens skip the refresh lifecycle.
    pub tokens_expire: bool,
    /// Authenticated endpoint resolving a stable account id, for the
    /// multi-account provider.
    pub profile_url: Option<String>,
    pub extra_authorize_params: Vec<(&'static str, &'static str)>,
}

impl ProviderConfig {
    pub fn redirect_uri(&self) -> String {
        format!("{}://oauth/callback", self.callback_scheme)
    }

    pub fn github(env: &Env) -> Self {
        Self {
            provider: Provider::Github,
            authorize_url: "https://github.com/login/oauth/authorize".to_string(),
            token_url: "https://github.com/login/oauth/access_token".to_string(),
            client_id: env.get_or("GITHUB_CLIENT_ID", ""),
            client_secret: env.get_or("GITHUB_CLIENT_SECRET", ""),
            scopes: "notifications,read:user".to_string(),
            callback_scheme: "workbar".to_string(),
            use_pkce: false,
            exchange_style: ExchangeStyle::JsonBody,
            tokens_expire: false,
            profile_url: Some("https://api.github.com/user".to_string()),
            extra_authorize_params: Vec::new(),
        }
    }

    pub fn microsoft(env: &Env) -> Self {
        Self {
            provider: Provider::Teams,
            authorize_url: "https://login.microsoftonline.com/common/oauth2/v2.0/authorize"
                .to_string(),
            token_url: "https://login.microsoftonline.com/common/oauth2/v2.0/token".to_string(),
            client_id: env.get_or("MICROSOFT_CLIENT_ID", ""),
            client_secret: env.get_or("MICROSOFT_CLIENT_SECRET", ""),
            scopes: "Chat.Read ChannelMessage.Read.All offline_access".to_string(),
            callback_scheme: "workbar".to_string(),
            use_pkce: true,
            exchange_style: ExchangeStyle::JsonBody,
            tokens_expire: true,
            profile_url: None,
            extra_authorize_params: Vec::new(),
        }
    }

    pub fn notion(env: &Env) -> Self {
        Self {
            provider: Provider::Notion,
            authorize_url: "https://api.notion.com/v1/oauth/authorize".to_string(),
            token_url: "https://api.notion.com/v1/oauth/token".to_string(),
            client_id: env.get_or("NOTION_CLIENT_ID", ""),
            client_secret: env.get_or("NOTION_CLIENT_SECRET", ""),
            scopes: String::new(),
            callback_scheme: "workbar".to_string(),
            use_pkce: false,
            exchange_style: ExchangeStyle::BasicJson,
            tokens_expire: false,
            profile_url: None,
            extra_authorize_params: vec![("owner", "user")],
        }
    }

    pub fn google(env: &Env) -> Self {
        Self {
            provider: Provider::GoogleCalendar,
            authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            client_id: env.get_or("GOOGLE_CLIENT_ID", ""),
            client_secret: env.get_or("GOOGLE_CLIENT_SECRET", ""),
            scopes: "https://www.googleapis.com/auth/calendar.readonly".to_string(),
            callback_scheme: "workbar".to_string(),
            use_pkce: true,
            exchange_style: ExchangeStyle::JsonBody,
            tokens_expire: true,
            profile_url: None,
            // Google only issues a refresh token with offline access + forced consent
            extra_authorize_params: vec![("access_type", "offline"), ("prompt", "consent")],
        }
    }

    pub fn for_provider(provider: Provider, env: &Env) -> Option<Self> {
        match provider {
            Provider::Github => Some(Self::github(env)),
            Provider::Teams => Some(Self::microsoft(env)),
            Provider::Notion => Some(Self::notion(env)),
            Provider::GoogleCalendar => Some(Self::google(env)),
            Provider::SystemCalendar => None,
        }
    }
}

/// Resolved identity of a newly authorized account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountProfile {
    pub login: String,
    pub display_name: String,
}

/// Per-provider authorization attempt state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthPhase {
    #[default]
    Idle,
    AwaitingUserConsent,
    ExchangingCode,
    Authorized,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    /// User backed out of the consent flow. Not an error banner.
    #[error("Authorization cancelled")]
    UserCancelled,
    #[error("No authorization code in callback")]
    NoAuthorizationCode,
    #[error("OAuth state mismatch")]
    StateMismatch,
    #[error("Token exchange failed: {0}")]
    ExchangeFailed(String),
    #[error("This service does not use OAuth")]
    UnsupportedProvider,
    #[error("Not authenticated - please connect in Settings")]
    NotAuthenticated,
    #[error("No refresh token available")]
    NoRefreshToken,
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl OAuthError {
    /// Cancellations are filtered out before any error display.
    pub fn is_user_cancelled(&self) -> bool {
        matches!(self, OAuthError::UserCancelled)
    }
}

/// Permissive token-endpoint response covering every provider shape.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    login: String,
    #[serde(default)]
    name: Option<String>,
}

// ============================================================================
// Refresh decision
// ============================================================================

/// Whether a stored bundle needs a refresh grant before use.
///
/// A bundle with neither refresh token nor expiry is durable (the
/// provider issues tokens that never expire). A known expiry more than
/// the buffer away is fresh; anything else goes through refresh.
pub fn needs_refresh(bundle: &TokenBundle, now: DateTime<Utc>) -> bool {
    match bundle.expires_at {
        Some(expires_at) => expires_at <= now + Duration::seconds(REFRESH_BUFFER_SECS),
        None => bundle.refresh_token.is_some(),
    }
}

// ============================================================================
// PKCE
// ============================================================================

/// 32 random bytes, base64url without padding.
fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// base64url(SHA-256(verifier)), the S256 challenge.
fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

// ============================================================================
// Engine
// ============================================================================

/// Which credential slot a bundle was resolved from, so a refreshed
/// bundle is written back to the same slot.
enum CredentialSlot {
    Single,
    Account(String),
}

pub struct OAuthEngine {
    credentials: Arc<CredentialStore>,
    settings: Arc<SettingsStore>,
    presenter: Arc<dyn AuthPresenter>,
    http: reqwest::Client,
    phases: Mutex<HashMap<Provider, AuthPhase>>,
}

impl OAuthEngine {
    pub fn new(
        credentials: Arc<CredentialStore>,
        settings: Arc<SettingsStore>,
        presenter: Arc<dyn AuthPresenter>,
    ) -> Self {
        Self {
            credentials,
            settings,
            presenter,
            http: crate::http::client(),
            phases: Mutex::new(HashMap::new()),
        }
    }

    pub fn attempt_phase(&self, provider: Provider) -> AuthPhase {
        self.phases
            .lock()
            .get(&provider)
            .copied()
            .unwrap_or_default()
    }

    fn set_phase(&self, provider: Provider, phase: AuthPhase) {
        self.phases.lock().insert(provider, phase);
    }

    // ------------------------------------------------------------------
    // Authorization
    // ------------------------------------------------------------------

    /// Run the full authorization-code flow and persist the resulting
    /// bundle in the provider's single credential slot. The
    /// multi-account provider goes through
    /// [`authorize_multi_account`](Self::authorize_multi_account) instead.
    pub async fn authorize(&self, config: &ProviderConfig) -> Result<TokenBundle, OAuthError> {
        let provider = config.provider;
        if provider == Provider::SystemCalendar {
            return Err(OAuthError::UnsupportedProvider);
        }

        self.begin_attempt(provider);
        let result = self.run_flow(config).await;
        self.finish_attempt(provider, result.is_ok());
        let bundle = result?;

        if !provider.is_multi_account() {
            self.credentials.put_bundle(provider, &bundle)?;
        }
        Ok(bundle)
    }

    /// Same flow, then one authenticated profile-lookup call to resolve
    /// a stable account id; the bundle is persisted per-account and the
    /// login becomes the active account.
    pub async fn authorize_multi_account(
        &self,
        config: &ProviderConfig,
    ) -> Result<AccountProfile, OAuthError> {
        let provider = config.provider;
        let profile_url = config
            .profile_url
            .clone()
            .ok_or(OAuthError::UnsupportedProvider)?;

        self.begin_attempt(provider);
        let result: Result<(TokenBundle, ProfileResponse), OAuthError> = async {
            let bundle = self.run_flow(config).await?;
            let profile = self.fetch_profile(&profile_url, &bundle.access_token).await?;
            Ok((bundle, profile))
        }
        .await;
        self.finish_attempt(provider, result.is_ok());
        let (bundle, profile) = result?;

        let login = normalize_login(&profile.login);
        self.credentials
            .put_account_bundle(provider, &login, &bundle)?;
        self.credentials.add_account(provider, &login)?;
        self.settings.set_active_account(Some(&login));

        Ok(AccountProfile {
            display_name: profile.name.unwrap_or_else(|| profile.login.clone()),
            login,
        })
    }

    fn begin_attempt(&self, provider: Provider) {
        let phase = self.attempt_phase(provider);
        if matches!(
            phase,
            AuthPhase::AwaitingUserConsent | AuthPhase::ExchangingCode
        ) {
            log::warn!(
                "authorization attempt for {provider} started while one is in flight; \
                 the UI layer must prevent this"
            );
        }
        self.set_phase(provider, AuthPhase::AwaitingUserConsent);
    }

    fn finish_attempt(&self, provider: Provider, success: bool) {
        self.set_phase(
            provider,
            if success {
                AuthPhase::Authorized
            } else {
                AuthPhase::Failed
            },
        );
    }

    async fn run_flow(&self, config: &ProviderConfig) -> Result<TokenBundle, OAuthError> {
        let state = uuid::Uuid::new_v4().to_string();
        let verifier = config.use_pkce.then(generate_code_verifier);

        let authorize_url = build_authorize_url(config, &state, verifier.as_deref())?;

        let redirect = self
            .presenter
            .present(authorize_url, &config.callback_scheme)
            .await
            .map_err(|e| match e {
                ConsentError::Cancelled => OAuthError::UserCancelled,
                ConsentError::NoCallback => OAuthError::NoAuthorizationCode,
            })?;

        // The echoed state must exactly equal the nonce sent; anything
        // else smells of CSRF and kills the attempt.
        let returned_state = query_param(&redirect, "state");
        if returned_state.as_deref() != Some(state.as_str()) {
            return Err(OAuthError::StateMismatch);
        }

        let code = query_param(&redirect, "code")
            .filter(|c| !c.is_empty())
            .ok_or(OAuthError::NoAuthorizationCode)?;

        self.set_phase(config.provider, AuthPhase::ExchangingCode);
        self.exchange_code(config, &code, verifier.as_deref()).await
    }

    async fn exchange_code(
        &self,
        config: &ProviderConfig,
        code: &str,
        verifier: Option<&str>,
    ) -> Result<TokenBundle, OAuthError> {
        let request = match config.exchange_style {
            ExchangeStyle::JsonBody => {
                let mut body = serde_json::json!({
                    "client_id": config.client_id,
                    "code": code,
                    "redirect_uri": config.redirect_uri(),
                    "grant_type": "authorization_code",
                });
                if !config.client_secret.is_empty() {
                    body["client_secret"] = serde_json::Value::from(config.client_secret.clone());
                }
                if let Some(verifier) = verifier {
                    body["code_verifier"] = serde_json::Value::from(verifier);
                }
                self.http
                    .post(&config.token_url)
                    .header("Accept", "application/json")
                    .json(&body)
            }
            ExchangeStyle::BasicJson => self
                .http
                .post(&config.token_url)
                .basic_auth(&config.client_id, Some(&config.client_secret))
                .header("Accept", "application/json")
                .json(&serde_json::json!({
                    "grant_type": "authorization_code",
                    "code": code,
                    "redirect_uri": config.redirect_uri(),
                })),
        };

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(OAuthError::ExchangeFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                crate::http::snippet(&body)
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|_| OAuthError::ExchangeFailed(crate::http::snippet(&body)))?;
        bundle_from_response(parsed, Utc::now())
    }

    async fn fetch_profile(
        &self,
        profile_url: &str,
        access_token: &str,
    ) -> Result<ProfileResponse, OAuthError> {
        let response = self
            .http
            .get(profile_url)
            .bearer_auth(access_token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(OAuthError::ExchangeFailed(format!(
                "Profile lookup failed: HTTP {}: {}",
                status.as_u16(),
                crate::http::snippet(&body)
            )));
        }
        serde_json::from_str(&body)
            .map_err(|_| OAuthError::ExchangeFailed("Profile response undecodable".to_string()))
    }

    // ------------------------------------------------------------------
    // Token lifecycle
    // ------------------------------------------------------------------

    /// Return a valid access token for the provider, silently refreshing
    /// an expiring one first.
    pub async fn get_valid_access_token(
        &self,
        config: &ProviderConfig,
    ) -> Result<String, OAuthError> {
        let provider = config.provider;
        let (slot, bundle) = self.lookup_bundle(provider)?;
        let bundle = bundle.ok_or(OAuthError::NotAuthenticated)?;

        if !config.tokens_expire || !needs_refresh(&bundle, Utc::now()) {
            return Ok(bundle.access_token);
        }

        let refresh_token = bundle
            .refresh_token
            .clone()
            .ok_or(OAuthError::NoRefreshToken)?;
        let refreshed = self.refresh_grant(config, &refresh_token).await?;

        match &slot {
            CredentialSlot::Single => self.credentials.put_bundle(provider, &refreshed)?,
            CredentialSlot::Account(login) => {
                self.credentials
                    .put_account_bundle(provider, login, &refreshed)?
            }
        }
        Ok(refreshed.access_token)
    }

    fn lookup_bundle(
        &self,
        provider: Provider,
    ) -> Result<(CredentialSlot, Option<TokenBundle>), StorageError> {
        if provider.is_multi_account() {
            if let Some(active) = self.settings.active_account() {
                if let Some(bundle) = self.credentials.get_account_bundle(provider, &active)? {
                    return Ok((CredentialSlot::Account(active), Some(bundle)));
                }
            }
            if let Some(first) = self.credentials.list_accounts(provider)?.into_iter().next() {
                if let Some(bundle) = self.credentials.get_account_bundle(provider, &first)? {
                    return Ok((CredentialSlot::Account(first), Some(bundle)));
                }
            }
            // Pre-migration fallback
            return Ok((CredentialSlot::Single, self.credentials.get_bundle(provider)?));
        }
        Ok((CredentialSlot::Single, self.credentials.get_bundle(provider)?))
    }

    async fn refresh_grant(
        &self,
        config: &ProviderConfig,
        refresh_token: &str,
    ) -> Result<TokenBundle, OAuthError> {
        let response = self
            .http
            .post(&config.token_url)
            .form(&[
                ("client_id", config.client_id.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(OAuthError::RefreshFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                crate::http::snippet(&body)
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|_| OAuthError::RefreshFailed(crate::http::snippet(&body)))?;
        let mut bundle = bundle_from_response(parsed, Utc::now())
            .map_err(|e| OAuthError::RefreshFailed(e.to_string()))?;
        // Carry over the old refresh token if the provider did not issue a new one
        if bundle.refresh_token.is_none() {
            bundle.refresh_token = Some(refresh_token.to_string());
        }
        Ok(bundle)
    }

    // ------------------------------------------------------------------
    // Disconnect
    // ------------------------------------------------------------------

    /// Delete the provider's single-slot credentials. Idempotent.
    pub fn disconnect(&self, provider: Provider) -> Result<(), OAuthError> {
        self.credentials.delete_bundle(provider)?;
        Ok(())
    }

    /// Delete one account's credentials and drop it from the registry.
    /// The active-account pointer moves to the first remaining login
    /// (or clears). Idempotent.
    pub fn disconnect_account(&self, provider: Provider, login: &str) -> Result<(), OAuthError> {
        let login = normalize_login(login);
        self.credentials.delete_account_bundle(provider, &login)?;
        self.credentials.remove_account(provider, &login)?;

        if self.settings.active_account().as_deref() == Some(login.as_str()) {
            let remaining = self.credentials.list_accounts(provider)?;
            self.settings.set_active_account(remaining.first().map(String::as_str));
        }
        Ok(())
    }

    /// Delete every stored credential for the provider. Idempotent.
    /// A later reconnect starts from a fresh commit baseline.
    pub fn disconnect_all(&self, provider: Provider) -> Result<(), OAuthError> {
        for login in self.credentials.list_accounts(provider)? {
            self.credentials.delete_account_bundle(provider, &login)?;
        }
        self.credentials.clear_accounts(provider)?;
        self.credentials.delete_bundle(provider)?;
        if provider.is_multi_account() {
            self.settings.set_active_account(None);
        }
        if provider == Provider::Github {
            self.settings.set_commit_baseline(std::collections::BTreeMap::new());
        }
        Ok(())
    }
}

fn build_authorize_url(
    config: &ProviderConfig,
    state: &str,
    verifier: Option<&str>,
) -> Result<Url, OAuthError> {
    let mut url = Url::parse(&config.authorize_url)
        .map_err(|_| OAuthError::ExchangeFailed("Invalid authorize URL".to_string()))?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("client_id", &config.client_id)
            .append_pair("redirect_uri", &config.redirect_uri())
            .append_pair("state", state)
            .append_pair("response_type", "code");
        if !config.scopes.is_empty() {
            query.append_pair("scope", &config.scopes);
        }
        if let Some(verifier) = verifier {
            query
                .append_pair("code_challenge", &code_challenge(verifier))
                .append_pair("code_challenge_method", "S256");
        }
        for (name, value) in &config.extra_authorize_params {
            query.append_pair(name, value);
        }
    }
    Ok(url)
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn bundle_from_response(
    response: TokenResponse,
    now: DateTime<Utc>,
) -> Result<TokenBundle, OAuthError> {
    if let Some(error) = response.error {
        let detail = match response.error_description {
            Some(description) => format!("{error}: {description}"),
            None => error,
        };
        return Err(OAuthError::ExchangeFailed(detail));
    }
    let access_token = response
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| OAuthError::ExchangeFailed("No access_token in response".to_string()))?;

    Ok(TokenBundle {
        access_token,
        refresh_token: response.refresh_token,
        expires_at: response
            .expires_in
            .map(|secs| now + Duration::seconds(secs as i64)),
    })
}

// ============================================================================
// Tests
// ============================================================================
