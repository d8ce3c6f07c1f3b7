use super::{CalendarStore, Event, Query, QueryKey, User};
use crate::error::{storage_error, SyncResult};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<String, User>,
    users_by_google_id: HashMap<String, String>,
    queries: HashMap<String, Query>,
    query_index: HashMap<String, String>,
    events: HashMap<String, Event>,
}

/// In-memory implementation of the store (for tests and as a fallback)
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored query rows
    pub async fn query_count(&self) -> usize {
        self.state.read().await.queries.len()
    }

    /// Number of stored events
    pub async fn event_count(&self) -> usize {
        self.state.read().await.events.len()
    }
}

#[async_trait]
impl CalendarStore for InMemoryStore {
    async fn get_user(&self, user_id: &str) -> SyncResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.get(user_id).cloned())
    }

    async fn find_user_by_google_id(&self, google_id: &str) -> SyncResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state
            .users_by_google_id
            .get(google_id)
            .and_then(|id| state.users.get(id))
            .cloned())
    }

    async fn insert_user(&self, user: &User) -> SyncResult<()> {
        let mut state = self.state.write().await;
        if state.users_by_google_id.contains_key(&user.google_id) {
            return Err(storage_error(&format!(
                "User with Google id {} already exists",
                user.google_id
            )));
        }
        state
            .users_by_google_id
            .insert(user.google_id.clone(), user.id.clone());
        state.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn create_query(&self, query: &Query) -> SyncResult<()> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&query.user_id)
            .ok_or_else(|| storage_error(&format!("Unknown user {}", query.user_id)))?;
        user.queries.push(query.id.clone());
        state
            .query_index
            .insert(query.key().cache_key(), query.id.clone());
        state.queries.insert(query.id.clone(), query.clone());
        Ok(())
    }

    async fn find_query(&self, key: &QueryKey) -> SyncResult<Option<Query>> {
        let state = self.state.read().await;
        Ok(state
            .query_index
            .get(&key.cache_key())
            .and_then(|id| state.queries.get(id))
            .cloned())
    }

    async fn save_query(&self, query: &Query) -> SyncResult<()> {
        let mut state = self.state.write().await;
        state
            .query_index
            .insert(query.key().cache_key(), query.id.clone());
        state.queries.insert(query.id.clone(), query.clone());
        Ok(())
    }

    async fn upsert_events(&self, events: &[Event]) -> SyncResult<()> {
        let mut state = self.state.write().await;
        for event in events {
            state
                .events
                .insert(event.google_event_id.clone(), event.clone());
        }
        Ok(())
    }

    async fn get_events(&self, google_event_ids: &[String]) -> SyncResult<Vec<Event>> {
        let state = self.state.read().await;
        Ok(google_event_ids
            .iter()
            .filter_map(|id| state.events.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn event(id: &str, summary: &str) -> Event {
        Event {
            google_event_id: id.to_string(),
            start_date: None,
            end_date: None,
            last_queried: Utc::now(),
            data: json!({ "id": id, "summary": summary }),
        }
    }

    #[tokio::test]
    async fn test_duplicate_google_id_is_rejected() {
        let store = InMemoryStore::new();
        store.insert_user(&User::new("g1", "r1")).await.unwrap();
        assert!(store.insert_user(&User::new("g1", "r2")).await.is_err());

        let found = store.find_user_by_google_id("g1").await.unwrap().unwrap();
        assert_eq!(found.refresh_token, "r1");
    }

    #[tokio::test]
    async fn test_save_query_replaces_by_id() {
        let store = InMemoryStore::new();
        let key = QueryKey::new("u1", None, None);
        let mut query = Query::new(&key, vec!["a".to_string()], Utc::now());
        store.save_query(&query).await.unwrap();

        query.events.push("b".to_string());
        store.save_query(&query).await.unwrap();

        assert_eq!(store.query_count().await, 1);
        let found = store.find_query(&key).await.unwrap().unwrap();
        assert_eq!(found.events.len(), 2);
        assert!(store
            .find_query(&QueryKey::new("u2", None, None))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_create_query_links_owner_or_writes_nothing() {
        let store = InMemoryStore::new();
        let user = User::new("g1", "r1");
        store.insert_user(&user).await.unwrap();

        let key = QueryKey::new(&user.id, None, None);
        let query = Query::new(&key, Vec::new(), Utc::now());
        store.create_query(&query).await.unwrap();

        let owner = store.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(owner.queries, vec![query.id.clone()]);
        assert_eq!(store.find_query(&key).await.unwrap(), Some(query));

        let orphan_key = QueryKey::new("nobody", None, None);
        let orphan = Query::new(&orphan_key, Vec::new(), Utc::now());
        assert!(store.create_query(&orphan).await.is_err());
        assert!(store.find_query(&orphan_key).await.unwrap().is_none());
        assert_eq!(store.query_count().await, 1);
    }

    #[tokio::test]
    async fn test_get_events_keeps_order_and_skips_missing() {
        let store = InMemoryStore::new();
        store
            .upsert_events(&[event("a", "A"), event("b", "B")])
            .await
            .unwrap();
        store.upsert_events(&[event("a", "A2")]).await.unwrap();

        let ids = vec!["b".to_string(), "missing".to_string(), "a".to_string()];
        let events = store.get_events(&ids).await.unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].google_event_id, "b");
        assert_eq!(events[1].data["summary"], "A2");
        assert_eq!(store.event_count().await, 2);
    }
}
