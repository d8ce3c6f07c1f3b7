use crate::components::store::{CalendarStore, Event, Query, QueryKey, User};
use crate::error::{storage_error, Error, SyncResult};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client as RedisClient, RedisError};
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

// Redis key layout
pub mod keys {
    pub const PREFIX: &str = "calsync";

    pub fn user(user_id: &str) -> String {
        format!("{}:user:{}", PREFIX, user_id)
    }

    pub fn user_by_google_id(google_id: &str) -> String {
        format!("{}:user_google:{}", PREFIX, google_id)
    }

    pub fn user_queries(user_id: &str) -> String {
        format!("{}:user_queries:{}", PREFIX, user_id)
    }

    pub fn query(query_id: &str) -> String {
        format!("{}:query:{}", PREFIX, query_id)
    }

    pub fn query_index(cache_key: &str) -> String {
        format!("{}:query_key:{}", PREFIX, cache_key)
    }

    pub fn event(google_event_id: &str) -> String {
        format!("{}:event:{}", PREFIX, google_event_id)
    }
}

type Reply<T> = oneshot::Sender<SyncResult<T>>;

/// Commands that can be sent to the Redis actor
pub enum RedisCommand {
    GetUser(String, Reply<Option<User>>),
    FindUserByGoogleId(String, Reply<Option<User>>),
    InsertUser(User, Reply<()>),
    CreateQuery(Query, Reply<()>),
    FindQuery(QueryKey, Reply<Option<Query>>),
    SaveQuery(Query, Reply<()>),
    UpsertEvents(Vec<Event>, Reply<()>),
    GetEvents(Vec<String>, Reply<Vec<Event>>),
    Shutdown,
}

/// The Redis actor that owns the connection and processes store commands
pub struct RedisActor {
    client: RedisClient,
    connection: Option<MultiplexedConnection>,
    command_rx: mpsc::Receiver<RedisCommand>,
}

/// Handle for communicating with the Redis actor
#[derive(Clone)]
pub struct RedisActorHandle {
    command_tx: mpsc::Sender<RedisCommand>,
}

impl RedisActorHandle {
    /// Create a handle whose actor is gone; every call fails
    pub fn empty() -> Self {
        let (command_tx, _) = mpsc::channel(32);
        Self { command_tx }
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> RedisCommand) -> SyncResult<T> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(command(response_tx))
            .await
            .map_err(|e| storage_error(&format!("Actor mailbox error: {}", e)))?;

        response_rx
            .await
            .map_err(|_| storage_error("Response channel closed"))?
    }

    /// Shutdown the actor
    pub async fn shutdown(&self) -> SyncResult<()> {
        let _ = self.command_tx.send(RedisCommand::Shutdown).await;
        Ok(())
    }
}

#[async_trait]
impl CalendarStore for RedisActorHandle {
    async fn get_user(&self, user_id: &str) -> SyncResult<Option<User>> {
        let user_id = user_id.to_string();
        self.request(|tx| RedisCommand::GetUser(user_id, tx)).await
    }

    async fn find_user_by_google_id(&self, google_id: &str) -> SyncResult<Option<User>> {
        let google_id = google_id.to_string();
        self.request(|tx| RedisCommand::FindUserByGoogleId(google_id, tx))
            .await
    }

    async fn insert_user(&self, user: &User) -> SyncResult<()> {
        let user = user.clone();
        self.request(|tx| RedisCommand::InsertUser(user, tx)).await
    }

    async fn create_query(&self, query: &Query) -> SyncResult<()> {
        let query = query.clone();
        self.request(|tx| RedisCommand::CreateQuery(query, tx)).await
    }

    async fn find_query(&self, key: &QueryKey) -> SyncResult<Option<Query>> {
        let key = key.clone();
        self.request(|tx| RedisCommand::FindQuery(key, tx)).await
    }

    async fn save_query(&self, query: &Query) -> SyncResult<()> {
        let query = query.clone();
        self.request(|tx| RedisCommand::SaveQuery(query, tx)).await
    }

    async fn upsert_events(&self, events: &[Event]) -> SyncResult<()> {
        let events = events.to_vec();
        self.request(|tx| RedisCommand::UpsertEvents(events, tx)).await
    }

    async fn get_events(&self, google_event_ids: &[String]) -> SyncResult<Vec<Event>> {
        let ids = google_event_ids.to_vec();
        self.request(|tx| RedisCommand::GetEvents(ids, tx)).await
    }
}

impl RedisActor {
    /// Create a new actor and return its handle
    pub fn new(redis_url: &str) -> SyncResult<(Self, RedisActorHandle)> {
        let (command_tx, command_rx) = mpsc::channel(32);

        let client = RedisClient::open(redis_url)
            .map_err(|e| storage_error(&format!("Failed to create Redis client: {}", e)))?;

        let actor = Self {
            client,
            connection: None,
            command_rx,
        };

        let handle = RedisActorHandle { command_tx };

        Ok((actor, handle))
    }

    /// Start the actor's processing loop
    pub async fn run(&mut self) {
        info!("Redis actor started");

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                RedisCommand::GetUser(user_id, response_tx) => {
                    let result = self.get_user(&user_id).await;
                    self.reply(response_tx, result);
                }
                RedisCommand::FindUserByGoogleId(google_id, response_tx) => {
                    let result = self.find_user_by_google_id(&google_id).await;
                    self.reply(response_tx, result);
                }
                RedisCommand::InsertUser(user, response_tx) => {
                    let result = self.insert_user(&user).await;
                    self.reply(response_tx, result);
                }
                RedisCommand::CreateQuery(query, response_tx) => {
                    let result = self.create_query(&query).await;
                    self.reply(response_tx, result);
                }
                RedisCommand::FindQuery(key, response_tx) => {
                    let result = self.find_query(&key).await;
                    self.reply(response_tx, result);
                }
                RedisCommand::SaveQuery(query, response_tx) => {
                    let result = self.save_query(&query).await;
                    self.reply(response_tx, result);
                }
                RedisCommand::UpsertEvents(events, response_tx) => {
                    let result = self.upsert_events(&events).await;
                    self.reply(response_tx, result);
                }
                RedisCommand::GetEvents(ids, response_tx) => {
                    let result = self.get_events(&ids).await;
                    self.reply(response_tx, result);
                }
                RedisCommand::Shutdown => {
                    info!("Redis actor shutting down");
                    break;
                }
            }
        }

        info!("Redis actor shut down");
    }

    /// Send a result back to the caller
    fn reply<T>(&self, response_tx: Reply<T>, result: SyncResult<T>) {
        if let Err(e) = &result {
            warn!("Redis command failed: {}", e);
        }
        let _ = response_tx.send(result);
    }

    /// Map a Redis failure; the cached connection is dropped so the next
    /// command reconnects
    fn redis_error(&mut self, context: &str, e: RedisError) -> Error {
        self.connection = None;
        storage_error(&format!("{}: {}", context, e))
    }

    /// Get a redis connection, reusing the multiplexed one when possible
    async fn connection(&mut self) -> SyncResult<MultiplexedConnection> {
        if let Some(conn) = &self.connection {
            return Ok(conn.clone());
        }

        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| storage_error(&format!("Failed to connect to Redis: {}", e)))?;
        self.connection = Some(conn.clone());
        Ok(conn)
    }

    async fn get_json<T: DeserializeOwned>(&mut self, key: &str) -> SyncResult<Option<T>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| self.redis_error(&format!("Failed to read {}", key), e))?;

        raw.map(|json| {
            serde_json::from_str(&json)
                .map_err(|e| storage_error(&format!("Failed to deserialize {}: {}", key, e)))
        })
        .transpose()
    }

    async fn get_user(&mut self, user_id: &str) -> SyncResult<Option<User>> {
        let Some(mut user) = self.get_json::<User>(&keys::user(user_id)).await? else {
            return Ok(None);
        };

        let mut conn = self.connection().await?;
        user.queries = conn
            .lrange(keys::user_queries(user_id), 0, -1)
            .await
            .map_err(|e| self.redis_error("Failed to read user queries", e))?;

        Ok(Some(user))
    }

    async fn find_user_by_google_id(&mut self, google_id: &str) -> SyncResult<Option<User>> {
        let mut conn = self.connection().await?;
        let user_id: Option<String> = conn
            .get(keys::user_by_google_id(google_id))
            .await
            .map_err(|e| self.redis_error("Failed to read user index", e))?;

        match user_id {
            Some(user_id) => self.get_user(&user_id).await,
            None => Ok(None),
        }
    }

    async fn insert_user(&mut self, user: &User) -> SyncResult<()> {
        // The query list lives under its own key
        let document = User {
            queries: Vec::new(),
            ..user.clone()
        };
        let user_json = serde_json::to_string(&document)
            .map_err(|e| storage_error(&format!("Failed to serialize user: {}", e)))?;
        let index_key = keys::user_by_google_id(&user.google_id);

        let mut conn = self.connection().await?;

        // Document first, index last: the index must never name a missing user
        () = conn
            .set(keys::user(&user.id), user_json)
            .await
            .map_err(|e| self.redis_error("Failed to save user", e))?;

        let claimed: bool = conn
            .set_nx(&index_key, &user.id)
            .await
            .map_err(|e| self.redis_error("Failed to write user index", e))?;
        if claimed {
            debug!("Stored user {}", user.id);
            return Ok(());
        }

        let owner: Option<String> = conn
            .get(&index_key)
            .await
            .map_err(|e| self.redis_error("Failed to read user index", e))?;
        let owner_exists: bool = match &owner {
            Some(owner_id) => conn
                .exists(keys::user(owner_id))
                .await
                .map_err(|e| self.redis_error("Failed to read user", e))?,
            None => false,
        };

        if owner_exists {
            () = conn
                .del(keys::user(&user.id))
                .await
                .map_err(|e| self.redis_error("Failed to remove duplicate user", e))?;
            return Err(storage_error(&format!(
                "User with Google id {} already exists",
                user.google_id
            )));
        }

        warn!(
            "Google id {} was indexed to missing user {:?}, re-pointing it to {}",
            user.google_id, owner, user.id
        );
        () = conn
            .set(&index_key, &user.id)
            .await
            .map_err(|e| self.redis_error("Failed to write user index", e))?;

        debug!("Stored user {}", user.id);
        Ok(())
    }

    async fn create_query(&mut self, query: &Query) -> SyncResult<()> {
        let query_json = serde_json::to_string(query)
            .map_err(|e| storage_error(&format!("Failed to serialize query: {}", e)))?;

        let mut conn = self.connection().await?;
        let owner_exists: bool = conn
            .exists(keys::user(&query.user_id))
            .await
            .map_err(|e| self.redis_error("Failed to read user", e))?;
        if !owner_exists {
            return Err(storage_error(&format!("Unknown user {}", query.user_id)));
        }

        redis::pipe()
            .atomic()
            .set(keys::query(&query.id), query_json)
            .ignore()
            .set(keys::query_index(&query.key().cache_key()), &query.id)
            .ignore()
            .rpush(keys::user_queries(&query.user_id), &query.id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| self.redis_error("Failed to create query", e))?;

        debug!("Created query {} for user {}", query.id, query.user_id);
        Ok(())
    }

    async fn find_query(&mut self, key: &QueryKey) -> SyncResult<Option<Query>> {
        let mut conn = self.connection().await?;
        let query_id: Option<String> = conn
            .get(keys::query_index(&key.cache_key()))
            .await
            .map_err(|e| self.redis_error("Failed to read query index", e))?;

        match query_id {
            Some(query_id) => self.get_json::<Query>(&keys::query(&query_id)).await,
            None => Ok(None),
        }
    }

    async fn save_query(&mut self, query: &Query) -> SyncResult<()> {
        let query_json = serde_json::to_string(query)
            .map_err(|e| storage_error(&format!("Failed to serialize query: {}", e)))?;

        let mut conn = self.connection().await?;
        redis::pipe()
            .atomic()
            .set(keys::query(&query.id), query_json)
            .ignore()
            .set(keys::query_index(&query.key().cache_key()), &query.id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| self.redis_error("Failed to save query", e))?;

        debug!("Stored query {} with {} events", query.id, query.events.len());
        Ok(())
    }

    async fn upsert_events(&mut self, events: &[Event]) -> SyncResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for event in events {
            let event_json = serde_json::to_string(event)
                .map_err(|e| storage_error(&format!("Failed to serialize event: {}", e)))?;
            pipe.set(keys::event(&event.google_event_id), event_json)
                .ignore();
        }

        let mut conn = self.connection().await?;
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| self.redis_error("Failed to upsert events", e))?;

        debug!("Upserted {} events", events.len());
        Ok(())
    }

    async fn get_events(&mut self, google_event_ids: &[String]) -> SyncResult<Vec<Event>> {
        if google_event_ids.is_empty() {
            return Ok(Vec::new());
        }

        let event_keys: Vec<String> = google_event_ids.iter().map(|id| keys::event(id)).collect();
        let mut conn = self.connection().await?;
        let raw: Vec<Option<String>> = conn
            .mget(&event_keys)
            .await
            .map_err(|e| self.redis_error("Failed to read events", e))?;

        raw.into_iter()
            .flatten()
            .map(|json| {
                serde_json::from_str::<Event>(&json)
                    .map_err(|e| storage_error(&format!("Failed to deserialize event: {}", e)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(keys::event("abc"), "calsync:event:abc");
        assert_eq!(keys::query_index("u|*|*"), "calsync:query_key:u|*|*");
        assert_eq!(keys::user_by_google_id("g1"), "calsync:user_google:g1");
    }

    #[tokio::test]
    async fn test_empty_handle_fails_instead_of_hanging() {
        let handle = RedisActorHandle::empty();
        let result = handle.get_user("nobody").await;
        assert!(matches!(result, Err(crate::error::Error::Storage(_))));
        assert!(handle.shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn test_actor_stops_on_shutdown() {
        let (mut actor, handle) = RedisActor::new("redis://127.0.0.1:6379").unwrap();
        let task = tokio::spawn(async move { actor.run().await });
        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    /// An actor with a live connection, or `None` when no local Redis answers
    async fn live_actor() -> Option<RedisActor> {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let (mut actor, _handle) = RedisActor::new(&url).ok()?;
        let connected =
            tokio::time::timeout(std::time::Duration::from_secs(2), actor.connection()).await;
        match connected {
            Ok(Ok(_)) => Some(actor),
            _ => None,
        }
    }

    async fn cleanup(actor: &mut RedisActor, written: &[String]) {
        let mut conn = actor.connection().await.unwrap();
        let _: () = conn.del(written).await.unwrap();
    }

    #[tokio::test]
    async fn test_dangling_google_index_is_repaired() {
        let Some(mut actor) = live_actor().await else {
            return;
        };
        let google_id = format!("g-{}", uuid::Uuid::new_v4());
        let index_key = keys::user_by_google_id(&google_id);

        // Index left behind by a user write that never landed
        let mut conn = actor.connection().await.unwrap();
        let _: () = conn.set(&index_key, "missing-user").await.unwrap();

        let user = User::new(&google_id, "refresh");
        actor.insert_user(&user).await.unwrap();

        let found = actor.find_user_by_google_id(&google_id).await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(user.id.clone()));

        cleanup(&mut actor, &[index_key, keys::user(&user.id)]).await;
    }

    #[tokio::test]
    async fn test_duplicate_user_leaves_no_orphan() {
        let Some(mut actor) = live_actor().await else {
            return;
        };
        let google_id = format!("g-{}", uuid::Uuid::new_v4());
        let first = User::new(&google_id, "refresh");
        let second = User::new(&google_id, "other");

        actor.insert_user(&first).await.unwrap();
        let result = actor.insert_user(&second).await;
        assert!(matches!(result, Err(Error::Storage(_))));
        assert!(actor.get_user(&second.id).await.unwrap().is_none());

        cleanup(
            &mut actor,
            &[keys::user_by_google_id(&google_id), keys::user(&first.id)],
        )
        .await;
    }

    #[tokio::test]
    async fn test_logical_failure_keeps_connection() {
        let Some(mut actor) = live_actor().await else {
            return;
        };
        let event_key = keys::event(&format!("broken-{}", uuid::Uuid::new_v4()));
        let mut conn = actor.connection().await.unwrap();
        let _: () = conn.set(&event_key, "not json").await.unwrap();

        let id = event_key.trim_start_matches("calsync:event:").to_string();
        let result = actor.get_events(&[id]).await;
        let (tx, _rx) = oneshot::channel();
        actor.reply(tx, result);
        assert!(actor.connection.is_some());

        let _ = actor.redis_error("read", RedisError::from((redis::ErrorKind::IoError, "reset")));
        assert!(actor.connection.is_none());

        cleanup(&mut actor, &[event_key]).await;
    }

    #[tokio::test]
    async fn test_create_query_links_owner() {
        let Some(mut actor) = live_actor().await else {
            return;
        };
        let user = User::new(format!("g-{}", uuid::Uuid::new_v4()), "refresh");
        actor.insert_user(&user).await.unwrap();

        let key = QueryKey::new(&user.id, None, None);
        let query = Query::new(&key, vec!["a".to_string()], chrono::Utc::now());
        actor.create_query(&query).await.unwrap();

        let owner = actor.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(owner.queries, vec![query.id.clone()]);
        assert_eq!(actor.find_query(&key).await.unwrap(), Some(query.clone()));

        let stranger_key = QueryKey::new("nobody", None, None);
        let stranger = Query::new(&stranger_key, Vec::new(), chrono::Utc::now());
        assert!(actor.create_query(&stranger).await.is_err());

        cleanup(
            &mut actor,
            &[
                keys::user_by_google_id(&user.google_id),
                keys::user(&user.id),
                keys::user_queries(&user.id),
                keys::query(&query.id),
                keys::query_index(&key.cache_key()),
            ],
        )
        .await;
    }
}
