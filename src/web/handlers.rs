use super::AppState;
use crate::components::store::Event;
use crate::error::{auth_error, validation_error, Error, SyncResult};
use crate::utils::time::parse_date_range;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Date parameters of an events request, as sent by the client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

impl DateQuery {
    /// Query string for `/calendar-events` with the present parameters
    pub fn to_query_string(&self) -> String {
        let pairs: Vec<String> = [
            ("startDate", self.start_date.as_deref()),
            ("endDate", self.end_date.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| format!("{}={}", name, urlencoding::encode(v))))
        .collect();

        pairs.join("&")
    }
}

/// Payload carried through the OAuth round trip
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OAuthState {
    pub query: DateQuery,
}

impl OAuthState {
    pub fn encode(&self) -> SyncResult<String> {
        Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?))
    }

    pub fn decode(raw: &str) -> SyncResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw.trim_end_matches('='))
            .map_err(|e| validation_error(&format!("Malformed OAuth state: {}", e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| validation_error(&format!("Malformed OAuth state: {}", e)))
    }
}

#[derive(Debug, Serialize)]
pub struct EventsResult {
    pub events: Vec<Event>,
}

/// Body of a successful `/calendar-events` response
#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub status: u16,
    pub query: DateQuery,
    pub result: EventsResult,
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Handler for the index page
pub async fn index_handler() -> &'static str {
    "calsync: GET /calendar-events?startDate=<ISO 8601>&endDate=<ISO 8601>"
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Cached calendar events for the signed-in user
pub async fn calendar_events_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<DateQuery>,
) -> Result<Response, Error> {
    let (start_date, end_date) =
        parse_date_range(query.start_date.as_deref(), query.end_date.as_deref())?;

    let Some(user_id) = state.sessions.user_id(&jar) else {
        return consent_redirect(&state, &query);
    };

    let credential = match state.tokens.authorize(&user_id).await {
        Ok(credential) => credential,
        Err(Error::Auth(msg)) => {
            warn!("Session for user {} could not be authorized: {}", user_id, msg);
            return consent_redirect(&state, &query);
        }
        Err(e) => return Err(e),
    };

    let events = state
        .manager
        .get_events(&credential, &user_id, start_date, end_date)
        .await?;

    Ok(Json(EventsResponse {
        status: StatusCode::OK.as_u16(),
        query,
        result: EventsResult { events },
    })
    .into_response())
}

fn consent_redirect(state: &AppState, query: &DateQuery) -> Result<Response, Error> {
    let oauth_state = OAuthState {
        query: query.clone(),
    }
    .encode()?;
    let url = state.tokens.auth_url(&oauth_state)?;
    Ok(Redirect::to(&url).into_response())
}

/// OAuth redirect target: sign the user in and resume the original request
pub async fn oauth2_callback_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<(CookieJar, Redirect), Error> {
    if let Some(error) = params.error {
        return Err(auth_error(&format!("Consent was not granted: {}", error)));
    }
    let code = params
        .code
        .ok_or_else(|| validation_error("Missing authorization code"))?;
    let oauth_state = match params.state.as_deref() {
        Some(raw) if !raw.is_empty() => OAuthState::decode(raw)?,
        _ => OAuthState::default(),
    };

    let tokens = state.tokens.exchange_code(&code).await?;
    let user_id = state.tokens.set_user(&tokens).await?;
    info!("User {} signed in", user_id);

    let jar = state.sessions.start(jar, &user_id)?;
    let query_string = oauth_state.query.to_query_string();
    let target = if query_string.is_empty() {
        "/calendar-events".to_string()
    } else {
        format!("/calendar-events?{}", query_string)
    };

    Ok((jar, Redirect::to(&target)))
}

/// Clear the session
pub async fn logout_handler(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    if let Some(user_id) = state.sessions.user_id(&jar) {
        state.tokens.forget(&user_id).await;
        info!("User {} logged out", user_id);
    }

    (state.sessions.end(jar), "Logged Out!")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        let state = OAuthState {
            query: DateQuery {
                start_date: Some("2024-01-01T00:00:00+02:00".to_string()),
                end_date: None,
            },
        };
        let encoded = state.encode().unwrap();
        assert!(!encoded.contains('+'));
        assert_eq!(OAuthState::decode(&encoded).unwrap(), state);
    }

    #[test]
    fn test_state_json_shape() {
        let state = OAuthState {
            query: DateQuery {
                start_date: Some("2024-01-01".to_string()),
                end_date: Some("2024-02-01".to_string()),
            },
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["query"]["startDate"], "2024-01-01");
        assert_eq!(json["query"]["endDate"], "2024-02-01");
    }

    #[test]
    fn test_bad_state_is_validation_error() {
        assert!(matches!(
            OAuthState::decode("!!!not-base64"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_query_string_encodes_values() {
        let query = DateQuery {
            start_date: Some("2024-01-01T00:00:00+02:00".to_string()),
            end_date: None,
        };
        assert_eq!(
            query.to_query_string(),
            "startDate=2024-01-01T00%3A00%3A00%2B02%3A00"
        );
        assert_eq!(DateQuery::default().to_query_string(), "");
    }
}
