use crate::components::google_calendar::{GoogleCalendarClient, TokenManager};
use crate::components::query_cache::QueryCacheManager;
use crate::components::redis_service::{RedisActor, RedisActorHandle};
use crate::components::store::{CalendarStore, InMemoryStore};
use crate::config::Config;
use crate::error::Error;
use crate::shutdown;
use crate::web::{build_router, session::SessionService, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{oneshot, RwLock};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initialize logging with environment-based configuration
pub fn init_logging() -> miette::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Other(format!("Failed to set up logging: {}", e)))?;

    Ok(())
}

/// Load and initialize the application config
pub async fn load_config() -> miette::Result<Arc<RwLock<Config>>> {
    match Config::load() {
        Ok(config) => Ok(Arc::new(RwLock::new(config))),
        Err(e) => {
            error!("Failed to load configuration: {:?}", e);
            Err(e.into())
        }
    }
}

/// Start the Redis actor, falling back to the in-memory store
fn init_store(config: &Config) -> (Arc<dyn CalendarStore>, Option<RedisActorHandle>) {
    match RedisActor::new(&config.redis_url) {
        Ok((mut redis_actor, redis_handle)) => {
            // Spawn Redis actor task
            tokio::spawn(async move {
                redis_actor.run().await;
            });
            info!("Using Redis store at {}", config.redis_url);
            let store: Arc<dyn CalendarStore> = Arc::new(redis_handle.clone());
            (store, Some(redis_handle))
        }
        Err(e) => {
            error!("Failed to create Redis client: {}", e);
            info!("Using in-memory store as fallback");
            let store: Arc<dyn CalendarStore> = Arc::new(InMemoryStore::new());
            (store, None)
        }
    }
}

/// Build the application state from configuration
pub async fn build_state(
    config: Arc<RwLock<Config>>,
    store: Arc<dyn CalendarStore>,
) -> AppState {
    let config_read = config.read().await;

    let client = GoogleCalendarClient::new(config_read.google_calendar_id.clone());
    let manager = QueryCacheManager::new(
        Arc::clone(&store),
        Arc::new(client),
        config_read.cache_timeout_minutes,
    );
    info!(
        "Cached queries go stale after {} minutes",
        config_read.cache_timeout_minutes
    );

    AppState {
        manager,
        tokens: TokenManager::new(&config_read, store),
        sessions: Arc::new(SessionService::new(config_read.session_secret.clone())),
    }
}

/// Initialize and start the HTTP server
pub async fn start_server(config: Arc<RwLock<Config>>) -> miette::Result<()> {
    let (store, redis_handle) = init_store(&*config.read().await);
    let state = build_state(Arc::clone(&config), store).await;
    let app = build_router(state);

    let port = config.read().await.port;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(Error::from)?;
    info!("Listening on {}", addr);

    // Create shutdown channel
    let (shutdown_send, shutdown_recv) = oneshot::channel();

    // Spawn signal handler task
    tokio::spawn(async move {
        shutdown::handle_signals(shutdown_send, redis_handle).await;
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_recv.await;
            info!("Received shutdown signal, stopping server...");
        })
        .await
        .map_err(Error::from)?;

    info!("Server stopped");
    Ok(())
}
