use crate::components::google_calendar::ProviderEvent;
use crate::components::store::{CalendarStore, Event};
use crate::error::{reconcile_error, SyncResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Maximum number of events written in one atomic batch
pub const UPSERT_BATCH_SIZE: usize = 250;

/// Merges provider events into the event collection keyed by provider id
#[derive(Clone)]
pub struct EventReconciler {
    store: Arc<dyn CalendarStore>,
    batch_size: usize,
}

impl EventReconciler {
    pub fn new(store: Arc<dyn CalendarStore>) -> Self {
        Self {
            store,
            batch_size: UPSERT_BATCH_SIZE,
        }
    }

    /// Use a different batch size; zero is treated as one
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Upsert `provider_events` and return the stored records in submission
    /// order.
    pub async fn reconcile(
        &self,
        provider_events: &[ProviderEvent],
        now: DateTime<Utc>,
    ) -> SyncResult<Vec<Event>> {
        if provider_events.is_empty() {
            return Ok(Vec::new());
        }

        let events = collapse_duplicates(provider_events, now);
        let mut committed = 0;

        for (batch_number, batch) in events.chunks(self.batch_size).enumerate() {
            if let Err(e) = self.store.upsert_events(batch).await {
                let committed_ids: Vec<&str> = events[..committed]
                    .iter()
                    .map(|event| event.google_event_id.as_str())
                    .collect();
                error!(
                    "Upsert batch {} failed after {} committed events: {}",
                    batch_number + 1,
                    committed,
                    e
                );
                return Err(reconcile_error(&format!(
                    "upsert batch {} failed after {} of {} events were committed {:?}: {}",
                    batch_number + 1,
                    committed,
                    events.len(),
                    committed_ids,
                    e
                )));
            }
            committed += batch.len();
        }
        debug!("Upserted {} events", committed);

        let ids: Vec<String> = events
            .iter()
            .map(|event| event.google_event_id.clone())
            .collect();

        self.store
            .get_events(&ids)
            .await
            .map_err(|e| reconcile_error(&format!("failed to re-read upserted events: {}", e)))
    }
}

/// One event per provider id; the last occurrence wins but keeps the first
/// occurrence's position.
fn collapse_duplicates(provider_events: &[ProviderEvent], now: DateTime<Utc>) -> Vec<Event> {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut events: Vec<Event> = Vec::with_capacity(provider_events.len());

    for provider_event in provider_events {
        let event = Event {
            google_event_id: provider_event.id.clone(),
            start_date: provider_event.start,
            end_date: provider_event.end,
            last_queried: now,
            data: provider_event.payload.clone(),
        };

        match positions.get(provider_event.id.as_str()) {
            Some(&index) => events[index] = event,
            None => {
                positions.insert(provider_event.id.as_str(), events.len());
                events.push(event);
            }
        }
    }

    events
}
