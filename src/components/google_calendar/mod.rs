pub mod client;
pub mod models;
pub mod token;

pub use client::{CalendarClient, GoogleCalendarClient};
pub use models::{AccessToken, ProviderEvent, TimeWindow, TokenSet};
pub use token::{OAuthEndpoints, TokenManager};
