use super::freshness::is_stale;
use super::locks::RefreshLocks;
use super::reconciler::EventReconciler;
use crate::components::google_calendar::{AccessToken, CalendarClient, TimeWindow};
use crate::components::store::{CalendarStore, Event, Query, QueryKey};
use crate::error::{fetch_error, lookup_error, storage_error, Error, SyncResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Decides between serving cached events and refreshing them upstream
#[derive(Clone)]
pub struct QueryCacheManager {
    store: Arc<dyn CalendarStore>,
    client: Arc<dyn CalendarClient>,
    reconciler: EventReconciler,
    locks: RefreshLocks,
    timeout_minutes: i64,
}

impl QueryCacheManager {
    pub fn new(
        store: Arc<dyn CalendarStore>,
        client: Arc<dyn CalendarClient>,
        timeout_minutes: i64,
    ) -> Self {
        Self {
            reconciler: EventReconciler::new(Arc::clone(&store)),
            store,
            client,
            locks: RefreshLocks::new(),
            timeout_minutes,
        }
    }

    /// Replace the reconciler (e.g. to change the batch size)
    pub fn with_reconciler(mut self, reconciler: EventReconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn timeout_minutes(&self) -> i64 {
        self.timeout_minutes
    }

    /// Events for a user and range, served from cache while fresh
    pub async fn get_events(
        &self,
        credential: &AccessToken,
        user_id: &str,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<Event>> {
        let key = QueryKey::new(user_id, start_date, end_date);
        let cache_key = key.cache_key();
        let _guard = self.locks.acquire(&cache_key).await;

        let existing = self
            .store
            .find_query(&key)
            .await
            .map_err(|e| lookup_error(&format!("query lookup for {}: {}", cache_key, e)))?;
        let now = Utc::now();

        match existing {
            None => {
                info!("Cache miss for user {} ({})", user_id, cache_key);
                let events = self.refresh(credential, &key, now).await?;

                let query = Query::new(&key, event_ids(&events), now);
                self.store
                    .create_query(&query)
                    .await
                    .map_err(|e| persist_error(&query, e))?;
                debug!("Created query {} with {} events", query.id, events.len());

                Ok(events)
            }
            Some(query) if !is_stale(query.updated, now, self.timeout_minutes) => {
                info!(
                    "Fresh cache hit for user {} ({}), query {}",
                    user_id, cache_key, query.id
                );
                self.store
                    .get_events(&query.events)
                    .await
                    .map_err(|e| lookup_error(&format!("events of query {}: {}", query.id, e)))
            }
            Some(mut query) => {
                info!(
                    "Stale cache hit for user {} ({}), query {} last updated {}",
                    user_id, cache_key, query.id, query.updated
                );
                let events = self.refresh(credential, &key, now).await?;

                query.events = event_ids(&events);
                query.start_date = key.start_date;
                query.end_date = key.end_date;
                query.updated = now;
                self.store
                    .save_query(&query)
                    .await
                    .map_err(|e| persist_error(&query, e))?;

                self.store
                    .get_events(&query.events)
                    .await
                    .map_err(|e| lookup_error(&format!("events of query {}: {}", query.id, e)))
            }
        }
    }

    /// Fetch the range upstream and merge it into the event collection
    async fn refresh(
        &self,
        credential: &AccessToken,
        key: &QueryKey,
        now: DateTime<Utc>,
    ) -> SyncResult<Vec<Event>> {
        let window = TimeWindow::new(key.start_date, key.end_date);

        let provider_events = self
            .client
            .list_events(credential, &window)
            .await
            .map_err(|e| {
                warn!("Upstream fetch failed for user {}: {}", key.user_id, e);
                match e {
                    Error::Fetch(_) => e,
                    other => fetch_error(&other.to_string()),
                }
            })?;
        debug!(
            "Fetched {} events for user {}",
            provider_events.len(),
            key.user_id
        );

        self.reconciler.reconcile(&provider_events, now).await
    }
}

fn event_ids(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .map(|event| event.google_event_id.clone())
        .collect()
}

fn persist_error(query: &Query, cause: Error) -> Error {
    storage_error(&format!("failed to persist query {}: {}", query.id, cause))
}
