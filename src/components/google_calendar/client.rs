use super::models::{AccessToken, ProviderEvent, TimeWindow};
use crate::error::{fetch_error, SyncResult};
use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

pub const GOOGLE_CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Page size requested from the events endpoint
const PAGE_SIZE: &str = "250";

/// Upper bound on followed pages for a single listing
const MAX_PAGES: usize = 200;

/// Source of provider events for a user credential
#[async_trait]
pub trait CalendarClient: Send + Sync + 'static {
    /// List single-occurrence events ordered by start time
    async fn list_events(
        &self,
        credential: &AccessToken,
        window: &TimeWindow,
    ) -> SyncResult<Vec<ProviderEvent>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsPage {
    #[serde(default)]
    items: Vec<Value>,
    next_page_token: Option<String>,
}

/// Google Calendar v3 events client
#[derive(Debug, Clone)]
pub struct GoogleCalendarClient {
    client: Client,
    api_base: String,
    calendar_id: String,
}

impl GoogleCalendarClient {
    pub fn new(calendar_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: GOOGLE_CALENDAR_API_BASE.to_string(),
            calendar_id: calendar_id.into(),
        }
    }

    /// Point the client at another API root (used by tests)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Build the events URL with query parameters for one page
    fn events_url(&self, window: &TimeWindow, page_token: Option<&str>) -> SyncResult<Url> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| fetch_error(&format!("Failed to parse URL: {}", e)))?;

        url.path_segments_mut()
            .map_err(|_| fetch_error("Calendar API base cannot carry a path"))?
            .pop_if_empty()
            .extend(["calendars", self.calendar_id.as_str(), "events"]);

        let mut query_params = vec![
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
            ("maxResults", PAGE_SIZE.to_string()),
        ];
        if let Some(time_min) = window.time_min {
            query_params.push((
                "timeMin",
                time_min.to_rfc3339_opts(SecondsFormat::Millis, true),
            ));
        }
        if let Some(time_max) = window.time_max {
            query_params.push((
                "timeMax",
                time_max.to_rfc3339_opts(SecondsFormat::Millis, true),
            ));
        }
        if let Some(token) = page_token {
            query_params.push(("pageToken", token.to_string()));
        }

        for (key, value) in query_params {
            url.query_pairs_mut().append_pair(key, &value);
        }

        Ok(url)
    }

    async fn fetch_page(
        &self,
        credential: &AccessToken,
        window: &TimeWindow,
        page_token: Option<&str>,
    ) -> SyncResult<EventsPage> {
        let url = self.events_url(window, page_token)?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&credential.token)
            .send()
            .await
            .map_err(|e| fetch_error(&format!("Failed to fetch events: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error response".to_string());
            return Err(fetch_error(&format!(
                "Failed to fetch events: HTTP {} - {}",
                status, error_body
            )));
        }

        response
            .json::<EventsPage>()
            .await
            .map_err(|e| fetch_error(&format!("Failed to parse events response: {}", e)))
    }
}

#[async_trait]
impl CalendarClient for GoogleCalendarClient {
    async fn list_events(
        &self,
        credential: &AccessToken,
        window: &TimeWindow,
    ) -> SyncResult<Vec<ProviderEvent>> {
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        for page_number in 1..=MAX_PAGES {
            let page = self
                .fetch_page(credential, window, page_token.as_deref())
                .await?;
            debug!("Fetched page {} with {} items", page_number, page.items.len());

            for item in page.items {
                match ProviderEvent::from_item(item) {
                    Some(event) => events.push(event),
                    None => warn!("Skipping calendar item without an id"),
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(events),
            }
        }

        Err(fetch_error(&format!(
            "Event listing did not finish within {} pages",
            MAX_PAGES
        )))
    }
}
