#![allow(dead_code)]

use async_trait::async_trait;
use calsync::components::google_calendar::{AccessToken, CalendarClient, ProviderEvent, TimeWindow};
use calsync::components::store::{CalendarStore, Event, InMemoryStore, Query, QueryKey, User};
use calsync::error::{fetch_error, storage_error, SyncResult};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Build a raw Google event item
pub fn item(id: &str, summary: &str, start: &str) -> Value {
    json!({
        "id": id,
        "summary": summary,
        "start": { "dateTime": start },
        "end": { "dateTime": start }
    })
}

pub fn provider_event(id: &str, summary: &str) -> ProviderEvent {
    ProviderEvent::from_item(item(id, summary, "2024-05-01T10:00:00Z")).unwrap()
}

pub fn access_token() -> AccessToken {
    AccessToken::new("test-access", Utc::now() + Duration::hours(1))
}

/// Calendar client returning a configurable event list
#[derive(Default)]
pub struct MockCalendarClient {
    events: Mutex<Vec<ProviderEvent>>,
    windows: Mutex<Vec<TimeWindow>>,
    calls: AtomicUsize,
    fail: AtomicBool,
    delay_ms: AtomicUsize,
}

impl MockCalendarClient {
    pub fn new(events: Vec<ProviderEvent>) -> Self {
        Self {
            events: Mutex::new(events),
            ..Default::default()
        }
    }

    pub fn set_events(&self, events: Vec<ProviderEvent>) {
        *self.events.lock().unwrap() = events;
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay_ms(&self, delay_ms: usize) {
        self.delay_ms.store(delay_ms, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn windows(&self) -> Vec<TimeWindow> {
        self.windows.lock().unwrap().clone()
    }
}

#[async_trait]
impl CalendarClient for MockCalendarClient {
    async fn list_events(
        &self,
        _credential: &AccessToken,
        window: &TimeWindow,
    ) -> SyncResult<Vec<ProviderEvent>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.windows.lock().unwrap().push(*window);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay as u64)).await;
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(fetch_error("HTTP 503 - backend unavailable"));
        }
        Ok(self.events.lock().unwrap().clone())
    }
}

/// In-memory store whose writes or reads can be switched off
#[derive(Default)]
pub struct FailingStore {
    pub inner: InMemoryStore,
    fail_upserts: AtomicBool,
    fail_lookups: AtomicBool,
    /// Upsert calls allowed to succeed before every later one fails
    upsert_budget: Mutex<Option<usize>>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_upserts_after(&self, successful_batches: usize) {
        *self.upsert_budget.lock().unwrap() = Some(successful_batches);
    }

    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CalendarStore for FailingStore {
    async fn get_user(&self, user_id: &str) -> SyncResult<Option<User>> {
        self.inner.get_user(user_id).await
    }

    async fn find_user_by_google_id(&self, google_id: &str) -> SyncResult<Option<User>> {
        self.inner.find_user_by_google_id(google_id).await
    }

    async fn insert_user(&self, user: &User) -> SyncResult<()> {
        self.inner.insert_user(user).await
    }

    async fn create_query(&self, query: &Query) -> SyncResult<()> {
        self.inner.create_query(query).await
    }

    async fn find_query(&self, key: &QueryKey) -> SyncResult<Option<Query>> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(storage_error("connection reset"));
        }
        self.inner.find_query(key).await
    }

    async fn save_query(&self, query: &Query) -> SyncResult<()> {
        self.inner.save_query(query).await
    }

    async fn upsert_events(&self, events: &[Event]) -> SyncResult<()> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(storage_error("write rejected"));
        }
        {
            let mut budget = self.upsert_budget.lock().unwrap();
            match budget.as_mut() {
                Some(0) => return Err(storage_error("write rejected")),
                Some(remaining) => *remaining -= 1,
                None => {}
            }
        }
        self.inner.upsert_events(events).await
    }

    async fn get_events(&self, google_event_ids: &[String]) -> SyncResult<Vec<Event>> {
        self.inner.get_events(google_event_ids).await
    }
}

/// A store with one registered user
pub async fn store_with_user() -> (Arc<FailingStore>, User) {
    let store = Arc::new(FailingStore::new());
    let user = User::new("google-user", "refresh-token");
    store.insert_user(&user).await.unwrap();
    (store, user)
}
