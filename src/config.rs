use crate::error::{config_error, env_error, SyncResult};
use chrono::Duration;
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Default staleness timeout for cached queries, in minutes
pub const DEFAULT_CACHE_TIMEOUT_MINUTES: i64 = 15;

/// Default port the HTTP server listens on
pub const DEFAULT_PORT: u16 = 3007;

/// Location of the optional settings file
pub const SETTINGS_PATH: &str = "config/settings.toml";

/// Main configuration structure for the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Google OAuth client ID
    pub google_client_id: String,
    /// Google OAuth client secret
    pub google_client_secret: String,
    /// Redirect URI registered for the OAuth client
    pub google_redirect_uri: String,
    /// Google Calendar ID to read events from
    pub google_calendar_id: String,
    /// Redis connection URL
    pub redis_url: String,
    /// Secret used to sign session cookies
    pub session_secret: String,
    /// Port for the HTTP server
    pub port: u16,
    /// Minutes after which a cached query is refreshed
    pub cache_timeout_minutes: i64,
}

/// Contents of `config/settings.toml`
#[derive(Debug, Default, Deserialize)]
struct Settings {
    /// Staleness timeout in minutes
    timeout: Option<i64>,
}

impl Config {
    /// Load configuration from environment and settings file
    pub fn load() -> SyncResult<Self> {
        // Load .env file if it exists
        dotenv().ok();

        let google_client_id =
            env::var("GOOGLE_CLIENT_ID").map_err(|_| env_error("GOOGLE_CLIENT_ID"))?;
        let google_client_secret =
            env::var("GOOGLE_CLIENT_SECRET").map_err(|_| env_error("GOOGLE_CLIENT_SECRET"))?;
        let session_secret =
            env::var("SESSION_SECRET").map_err(|_| env_error("SESSION_SECRET"))?;

        let port = match env::var("PORT") {
            Ok(value) => value
                .parse::<u16>()
                .map_err(|_| config_error("Invalid PORT format"))?,
            Err(_) => DEFAULT_PORT,
        };

        let google_redirect_uri = env::var("GOOGLE_REDIRECT_URI")
            .unwrap_or_else(|_| format!("http://localhost:{}/oauth2_callback", port));
        let google_calendar_id =
            env::var("GOOGLE_CALENDAR_ID").unwrap_or_else(|_| String::from("primary"));
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| String::from("redis://127.0.0.1:6379"));

        // The settings file provides the timeout, the environment overrides it
        let mut cache_timeout_minutes = Self::load_settings(Path::new(SETTINGS_PATH))?
            .timeout
            .unwrap_or(DEFAULT_CACHE_TIMEOUT_MINUTES);
        if let Ok(value) = env::var("CACHE_TIMEOUT_MINUTES") {
            cache_timeout_minutes = value
                .parse::<i64>()
                .map_err(|_| config_error("Invalid CACHE_TIMEOUT_MINUTES format"))?;
        }

        let config = Config {
            google_client_id,
            google_client_secret,
            google_redirect_uri,
            google_calendar_id,
            redis_url,
            session_secret,
            port,
            cache_timeout_minutes,
        };
        config.validate()?;

        Ok(config)
    }

    /// Read the settings file, treating a missing file as empty
    fn load_settings(path: &Path) -> SyncResult<Settings> {
        if !path.exists() {
            return Ok(Settings::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str::<Settings>(&content)?)
    }

    /// Check values that parse fine but make no sense
    pub fn validate(&self) -> SyncResult<()> {
        if self.cache_timeout_minutes < 0 {
            return Err(config_error("Cache timeout must not be negative"));
        }
        if Duration::try_minutes(self.cache_timeout_minutes).is_none() {
            return Err(config_error("Cache timeout is too large"));
        }
        if self.session_secret.len() < 16 {
            return Err(config_error("SESSION_SECRET must be at least 16 characters"));
        }
        Ok(())
    }
}
