use super::models::{AccessToken, TokenSet};
use crate::components::store::{CalendarStore, User};
use crate::config::Config;
use crate::error::{auth_error, Error, SyncResult};
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// Scopes requested at consent time
pub const SCOPES: [&str; 2] = ["https://www.googleapis.com/auth/calendar.readonly", "openid"];

/// Cached tokens are refreshed this many seconds before they expire
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Google's default access token lifetime
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// OAuth endpoint locations
#[derive(Debug, Clone)]
pub struct OAuthEndpoints {
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
}

impl Default for OAuthEndpoints {
    fn default() -> Self {
        Self {
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            userinfo_url: GOOGLE_USERINFO_URL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
}

/// Exchanges OAuth codes and refresh tokens, and keeps per-user access tokens
#[derive(Clone)]
pub struct TokenManager {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    endpoints: OAuthEndpoints,
    client: Client,
    store: Arc<dyn CalendarStore>,
    access_tokens: Arc<RwLock<HashMap<String, AccessToken>>>,
}

impl TokenManager {
    pub fn new(config: &Config, store: Arc<dyn CalendarStore>) -> Self {
        Self {
            client_id: config.google_client_id.clone(),
            client_secret: config.google_client_secret.clone(),
            redirect_uri: config.google_redirect_uri.clone(),
            endpoints: OAuthEndpoints::default(),
            client: Client::new(),
            store,
            access_tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Use different OAuth endpoints (used by tests)
    pub fn with_endpoints(mut self, endpoints: OAuthEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Google consent URL carrying `state` back to the callback
    pub fn auth_url(&self, state: &str) -> SyncResult<String> {
        let mut url = Url::parse(&self.endpoints.auth_url)
            .map_err(|e| auth_error(&format!("Failed to parse auth URL: {}", e)))?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("scope", &SCOPES.join(" "))
            .append_pair("state", state);

        Ok(url.to_string())
    }

    /// Exchange an authorization code for tokens
    pub async fn exchange_code(&self, code: &str) -> SyncResult<TokenSet> {
        let response = self
            .post_token_form(&[
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .await?;

        Ok(TokenSet {
            access: Self::access_token_from(&response),
            refresh_token: response.refresh_token,
        })
    }

    /// Look up the Google account id behind an access token
    pub async fn fetch_google_id(&self, access_token: &AccessToken) -> SyncResult<String> {
        let response = self
            .client
            .get(&self.endpoints.userinfo_url)
            .bearer_auth(&access_token.token)
            .send()
            .await
            .map_err(|e| auth_error(&format!("Failed to fetch profile: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error response".to_string());
            return Err(auth_error(&format!(
                "Failed to fetch profile: HTTP {} - {}",
                status, error_body
            )));
        }

        let info: UserInfo = response
            .json()
            .await
            .map_err(|e| auth_error(&format!("Failed to parse profile response: {}", e)))?;

        Ok(info.sub)
    }

    /// Find or create the user owning `tokens`, returning the internal user id.
    ///
    /// Existing users keep their stored refresh token.
    pub async fn set_user(&self, tokens: &TokenSet) -> SyncResult<String> {
        let google_id = self.fetch_google_id(&tokens.access).await?;

        let user_id = match self.store.find_user_by_google_id(&google_id).await? {
            Some(existing) => {
                debug!("Known Google account, user {}", existing.id);
                existing.id
            }
            None => self.create_user(&google_id, tokens).await?,
        };

        self.access_tokens
            .write()
            .await
            .insert(user_id.clone(), tokens.access.clone());

        Ok(user_id)
    }

    async fn create_user(&self, google_id: &str, tokens: &TokenSet) -> SyncResult<String> {
        let refresh_token = tokens
            .refresh_token
            .as_deref()
            .ok_or_else(|| auth_error("Google did not return a refresh token for a new user"))?;

        let user = User::new(google_id, refresh_token);
        match self.store.insert_user(&user).await {
            Ok(()) => {
                info!("Registered user {}", user.id);
                Ok(user.id)
            }
            // A concurrent login may have registered the same account first
            Err(Error::Storage(msg)) => match self.store.find_user_by_google_id(google_id).await? {
                Some(existing) => Ok(existing.id),
                None => Err(Error::Storage(msg)),
            },
            Err(e) => Err(e),
        }
    }

    /// Get a usable access token for a stored user, refreshing when needed
    pub async fn authorize(&self, user_id: &str) -> SyncResult<AccessToken> {
        let now = Utc::now();
        if let Some(token) = self.access_tokens.read().await.get(user_id) {
            if token.is_valid_at(now, EXPIRY_MARGIN_SECS) {
                return Ok(token.clone());
            }
        }

        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| auth_error(&format!("Unknown user {}", user_id)))?;

        debug!("Refreshing access token for user {}", user_id);
        let response = self
            .post_token_form(&[
                ("refresh_token", user.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .await?;
        let token = Self::access_token_from(&response);

        self.access_tokens
            .write()
            .await
            .insert(user_id.to_string(), token.clone());

        Ok(token)
    }

    /// Drop any cached access token for a user
    pub async fn forget(&self, user_id: &str) {
        self.access_tokens.write().await.remove(user_id);
    }

    async fn post_token_form(&self, params: &[(&str, &str)]) -> SyncResult<TokenResponse> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        form.extend_from_slice(params);

        let response = self
            .client
            .post(&self.endpoints.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| auth_error(&format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error response".to_string());
            return Err(auth_error(&format!(
                "Token request failed: HTTP {} - {}",
                status, error_body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| auth_error(&format!("Failed to parse token response: {}", e)))
    }

    fn access_token_from(response: &TokenResponse) -> AccessToken {
        let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        AccessToken::new(
            response.access_token.clone(),
            Utc::now() + Duration::seconds(expires_in),
        )
    }
}
