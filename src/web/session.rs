use crate::error::{auth_error, SyncResult};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Name of the cookie carrying the session token
pub const SESSION_COOKIE: &str = "session";

/// Session lifetime in hours
pub const SESSION_LIFETIME_HOURS: i64 = 24;

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (internal user ID)
    pub sub: String,
    /// Expiration time (as UTC timestamp)
    pub exp: usize,
    /// Issued at (as UTC timestamp)
    pub iat: usize,
}

/// Signs and verifies session tokens
#[derive(Clone)]
pub struct SessionService {
    secret: String,
}

impl SessionService {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Generate a session token for a user
    pub fn issue(&self, user_id: &str) -> SyncResult<String> {
        let now = Utc::now();
        let exp = now + Duration::hours(SESSION_LIFETIME_HOURS);

        let claims = Claims {
            sub: user_id.to_string(),
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| auth_error(&format!("Failed to generate session token: {}", e)))
    }

    /// Validate a session token
    pub fn validate(&self, token: &str) -> SyncResult<Claims> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|token_data| token_data.claims)
        .map_err(|e| auth_error(&format!("Invalid session token: {}", e)))
    }

    /// User id of a valid session in the jar, if any
    pub fn user_id(&self, jar: &CookieJar) -> Option<String> {
        let cookie = jar.get(SESSION_COOKIE)?;
        match self.validate(cookie.value()) {
            Ok(claims) => Some(claims.sub),
            Err(e) => {
                debug!("Ignoring session cookie: {}", e);
                None
            }
        }
    }

    /// Add a fresh session cookie for `user_id`
    pub fn start(&self, jar: CookieJar, user_id: &str) -> SyncResult<CookieJar> {
        let token = self.issue(user_id)?;
        let cookie = Cookie::build((SESSION_COOKIE, token))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::hours(SESSION_LIFETIME_HOURS))
            .build();

        Ok(jar.add(cookie))
    }

    /// Remove the session cookie
    pub fn end(&self, jar: CookieJar) -> CookieJar {
        jar.remove(Cookie::build(SESSION_COOKIE).path("/"))
    }
}
