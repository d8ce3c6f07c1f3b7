// Export components
pub mod google_calendar;
pub mod query_cache;
pub mod redis_service;
pub mod store;

pub use query_cache::QueryCacheManager;
pub use redis_service::RedisActorHandle;
pub use store::{CalendarStore, InMemoryStore};
