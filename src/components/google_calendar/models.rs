use crate::utils::time::parse_event_time;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;

/// A calendar event as returned by the provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEvent {
    pub id: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// The untouched provider item
    pub payload: Value,
}

impl ProviderEvent {
    /// Build from a raw Google `items[]` entry; `None` when it has no id
    pub fn from_item(item: Value) -> Option<Self> {
        let id = item.get("id").and_then(|id| id.as_str())?.to_string();
        let start = parse_event_time(item.get("start"));
        let end = parse_event_time(item.get("end"));

        Some(Self {
            id,
            start,
            end,
            payload: item,
        })
    }
}

/// Time window for a listing; a missing side is unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub time_min: Option<DateTime<Utc>>,
    pub time_max: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn new(time_min: Option<DateTime<Utc>>, time_max: Option<DateTime<Utc>>) -> Self {
        Self { time_min, time_max }
    }
}

/// A short-lived bearer credential for provider calls
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Whether the token is still usable at `now` with `margin_secs` to spare
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin_secs: i64) -> bool {
        self.expires_at - chrono::Duration::seconds(margin_secs) > now
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Tokens returned by the authorization-code exchange
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access: AccessToken,
    pub refresh_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_item_keeps_payload() {
        let item = json!({
            "id": "evt1",
            "summary": "Standup",
            "start": { "dateTime": "2024-03-01T09:00:00Z" },
            "end": { "dateTime": "2024-03-01T09:15:00Z" },
            "extendedProperties": { "private": { "team": "core" } }
        });

        let event = ProviderEvent::from_item(item.clone()).unwrap();
        assert_eq!(event.id, "evt1");
        assert!(event.start.is_some());
        assert!(event.end.unwrap() > event.start.unwrap());
        assert_eq!(event.payload, item);
    }

    #[test]
    fn test_from_item_without_id() {
        assert!(ProviderEvent::from_item(json!({ "summary": "orphan" })).is_none());
    }

    #[test]
    fn test_access_token_margin() {
        let now = Utc::now();
        let token = AccessToken::new("t", now + chrono::Duration::seconds(90));
        assert!(token.is_valid_at(now, 60));
        assert!(!token.is_valid_at(now, 120));
        assert!(!format!("{:?}", token).contains("\"t\""));
    }
}
