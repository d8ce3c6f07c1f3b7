//! Persistent document model and the storage trait the cache engine runs on.
//!
//! Three collections are kept: users, queries and events. Queries reference
//! events by provider event id, users reference their queries by query id.

mod memory;

pub use memory::InMemoryStore;

use crate::error::SyncResult;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A person authenticated through Google
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub google_id: String,
    pub refresh_token: String,
    /// Ids of the queries this user has issued, oldest first
    #[serde(default)]
    pub queries: Vec<String>,
}

impl User {
    /// Create a user with a fresh internal id
    pub fn new(google_id: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            google_id: google_id.into(),
            refresh_token: refresh_token.into(),
            queries: Vec::new(),
        }
    }
}

/// Exact cache key of a query: the user and both (optional) bounds
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryKey {
    pub user_id: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl QueryKey {
    /// Build a key, truncating bounds to millisecond precision
    pub fn new(
        user_id: impl Into<String>,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            start_date: start_date.map(|d| d.trunc_subsecs(3)),
            end_date: end_date.map(|d| d.trunc_subsecs(3)),
        }
    }

    /// Stable string form used for index keys and lock names.
    ///
    /// A missing bound encodes as `*`, so a half-open range never collides
    /// with a closed one.
    pub fn cache_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.user_id,
            encode_bound(self.start_date.as_ref()),
            encode_bound(self.end_date.as_ref())
        )
    }
}

fn encode_bound(bound: Option<&DateTime<Utc>>) -> String {
    bound
        .map(|d| d.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| "*".to_string())
}

/// A cached answer to "which events does this user have in this range"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub id: String,
    #[serde(rename = "user")]
    pub user_id: String,
    /// Provider event ids, in provider order
    pub events: Vec<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub updated: DateTime<Utc>,
}

impl Query {
    /// Create a query row for a key with a fresh id
    pub fn new(key: &QueryKey, events: Vec<String>, updated: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: key.user_id.clone(),
            events,
            start_date: key.start_date,
            end_date: key.end_date,
            updated,
        }
    }

    /// The cache key this row answers
    pub fn key(&self) -> QueryKey {
        QueryKey::new(self.user_id.clone(), self.start_date, self.end_date)
    }
}

/// A deduplicated calendar event, keyed by its provider id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub google_event_id: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub last_queried: DateTime<Utc>,
    /// Raw provider payload, kept verbatim
    pub data: Value,
}

/// Document store used by the cache engine
#[async_trait]
pub trait CalendarStore: Send + Sync + 'static {
    /// Get a user by internal id
    async fn get_user(&self, user_id: &str) -> SyncResult<Option<User>>;

    /// Get a user by Google account id
    async fn find_user_by_google_id(&self, google_id: &str) -> SyncResult<Option<User>>;

    /// Insert a new user
    async fn insert_user(&self, user: &User) -> SyncResult<()>;

    /// Insert a new query row, index it, and append it to its owner's
    /// query list, all or nothing
    async fn create_query(&self, query: &Query) -> SyncResult<()>;

    /// Find the query row for an exact key
    async fn find_query(&self, key: &QueryKey) -> SyncResult<Option<Query>>;

    /// Insert or replace a query row by id, indexing it under its key
    async fn save_query(&self, query: &Query) -> SyncResult<()>;

    /// Insert or overwrite events by provider id, all or nothing
    async fn upsert_events(&self, events: &[Event]) -> SyncResult<()>;

    /// Load events by provider id in the given order, skipping unknown ids
    async fn get_events(&self, google_event_ids: &[String]) -> SyncResult<Vec<Event>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_partial_bounds_are_distinct_keys() {
        let d = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let e = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

        let open_end = QueryKey::new("u1", Some(d), None);
        let closed = QueryKey::new("u1", Some(d), Some(e));
        let open_start = QueryKey::new("u1", None, Some(d));

        assert_ne!(open_end.cache_key(), closed.cache_key());
        assert_ne!(open_end.cache_key(), open_start.cache_key());
        assert_eq!(open_end.cache_key(), "u1|2024-01-01T00:00:00.000Z|*");
    }

    #[test]
    fn test_key_truncates_to_millis() {
        let precise = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let millis = Utc.timestamp_opt(1_700_000_000, 123_000_000).unwrap();
        assert_eq!(
            QueryKey::new("u1", Some(precise), None),
            QueryKey::new("u1", Some(millis), None)
        );
    }

    #[test]
    fn test_query_round_trips_its_key() {
        let key = QueryKey::new("u1", None, Some(Utc::now()));
        let query = Query::new(&key, vec!["a".to_string()], Utc::now());
        assert_eq!(query.key(), key);

        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(json["user"], "u1");
        assert!(json.get("startDate").is_some());
    }
}
