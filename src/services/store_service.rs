// src/services/store_service.rs
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing;

use crate::errors::PoolmateError as AppError;
use crate::models::{active_ride::ActiveRide, driver::Driver, ride_request::RideRequest, rider::Rider};

const KEY_PREFIX: &str = "poolmate";
const MAX_SWAP_ATTEMPTS: usize = 5;

// Check the guard field, then the version, then write. Atomic on the server.
const SWAP_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return -1
end
local doc = cjson.decode(current)
if ARGV[2] ~= '' and tostring(doc[ARGV[2]]) ~= ARGV[3] then
    return 0
end
if tonumber(doc['version'] or 0) ~= tonumber(ARGV[1]) then
    return 0
end
redis.call('SET', KEYS[1], ARGV[4])
return 1
"#;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Operation error: {0}")]
    Operation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Operation(err.to_string())
        }
    }
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Connection(msg) => AppError::DependencyUnavailable(msg),
            StoreError::Operation(msg) => AppError::RedisQuery(msg),
            StoreError::Serialization(msg) => AppError::JsonSerialization(msg),
        }
    }
}

/// Precondition a write must still satisfy when it lands.
#[derive(Debug, Clone, PartialEq)]
pub struct Guard {
    pub version: u64,
    pub field: Option<(&'static str, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Swap {
    Applied,
    Rejected,
    Missing,
}

pub struct StoreKeys;

impl StoreKeys {
    pub fn document(collection: &str, id: &str) -> String {
        format!("{KEY_PREFIX}:{collection}:{id}")
    }

    pub fn drivers() -> String {
        format!("{KEY_PREFIX}:idx:drivers")
    }

    pub fn available_drivers() -> String {
        format!("{KEY_PREFIX}:idx:drivers:available")
    }

    pub fn rider_requests(rider_id: &str) -> String {
        format!("{KEY_PREFIX}:idx:rider:{rider_id}:requests")
    }

    pub fn driver_requests(driver_id: &str) -> String {
        format!("{KEY_PREFIX}:idx:driver:{driver_id}:requests")
    }

    pub fn active_rides() -> String {
        format!("{KEY_PREFIX}:idx:rides:active")
    }
}

// ------------------------------
// Backend traits
// ------------------------------

#[async_trait]
pub trait DocumentOperations: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    /// Writes only if the key is absent. Returns `false` when it already existed.
    async fn insert(&self, key: &str, json: &str) -> Result<bool, StoreError>;
    async fn swap(&self, key: &str, guard: &Guard, json: &str) -> Result<Swap, StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SetOperations: Send + Sync {
    async fn sadd(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;
    async fn srem(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

pub enum Store {
    Redis(RedisStore),
    Memory(MemoryStore),
}

impl Store {
    pub fn memory() -> Self {
        Store::Memory(MemoryStore::new())
    }

    pub async fn redis(redis_url: &str) -> Result<Self, StoreError> {
        Ok(Store::Redis(RedisStore::new(redis_url).await?))
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Store::Redis(_) => "redis",
            Store::Memory(_) => "memory",
        }
    }
}

// -------- Redis --------

pub struct RedisStore {
    connection: ConnectionManager,
    swap_script: redis::Script,
}

impl RedisStore {
    pub async fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).map_err(|e| StoreError::Connection(e.to_string()))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        tracing::info!("Connected to redis document store");
        Ok(Self {
            connection,
            swap_script: redis::Script::new(SWAP_SCRIPT),
        })
    }
}

#[async_trait]
impl DocumentOperations for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        let data: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(data)
    }

    async fn insert(&self, key: &str, json: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let created: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(json)
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        Ok(created.is_some())
    }

    async fn swap(&self, key: &str, guard: &Guard, json: &str) -> Result<Swap, StoreError> {
        let mut conn = self.connection.clone();
        let (field, expected) = match &guard.field {
            Some((field, expected)) => (*field, expected.as_str()),
            None => ("", ""),
        };

        let outcome: i64 = self
            .swap_script
            .key(key)
            .arg(guard.version)
            .arg(field)
            .arg(expected)
            .arg(json)
            .invoke_async(&mut conn)
            .await?;

        Ok(match outcome {
            1 => Swap::Applied,
            0 => Swap::Rejected,
            _ => Swap::Missing,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl SetOperations for RedisStore {
    async fn sadd(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SADD").arg(key).arg(value).query_async(&mut conn).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS").arg(key).query_async(&mut conn).await?;
        Ok(members)
    }

    async fn srem(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SREM").arg(key).arg(value).query_async(&mut conn).await?;
        Ok(())
    }
}

// -------- Memory (development and tests) --------

#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, String>>,
    sets: RwLock<HashMap<String, HashSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard_holds(current: &str, guard: &Guard) -> Result<bool, StoreError> {
        let doc: serde_json::Value =
            serde_json::from_str(current).map_err(|e| StoreError::Serialization(e.to_string()))?;

        if let Some((field, expected)) = &guard.field {
            if doc.get(*field).and_then(|v| v.as_str()) != Some(expected.as_str()) {
                return Ok(false);
            }
        }
        let version = doc.get("version").and_then(|v| v.as_u64()).unwrap_or(0);
        Ok(version == guard.version)
    }
}

#[async_trait]
impl DocumentOperations for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.documents.read().await.get(key).cloned())
    }

    async fn insert(&self, key: &str, json: &str) -> Result<bool, StoreError> {
        let mut documents = self.documents.write().await;
        if documents.contains_key(key) {
            return Ok(false);
        }
        documents.insert(key.to_string(), json.to_string());
        Ok(true)
    }

    async fn swap(&self, key: &str, guard: &Guard, json: &str) -> Result<Swap, StoreError> {
        let mut documents = self.documents.write().await;
        let Some(current) = documents.get(key) else {
            return Ok(Swap::Missing);
        };
        if !Self::guard_holds(current, guard)? {
            return Ok(Swap::Rejected);
        }
        documents.insert(key.to_string(), json.to_string());
        Ok(Swap::Applied)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.documents.write().await.remove(key);
        Ok(())
    }
}

#[async_trait]
impl SetOperations for MemoryStore {
    async fn sadd(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.sets
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(value.to_string());
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .sets
            .read()
            .await
            .get(key)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn srem(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if let Some(members) = self.sets.write().await.get_mut(key) {
            members.remove(value);
        }
        Ok(())
    }
}

// -------- Store delegation --------

#[async_trait]
impl DocumentOperations for Store {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self {
            Store::Redis(store) => store.get(key).await,
            Store::Memory(store) => store.get(key).await,
        }
    }

    async fn insert(&self, key: &str, json: &str) -> Result<bool, StoreError> {
        match self {
            Store::Redis(store) => store.insert(key, json).await,
            Store::Memory(store) => store.insert(key, json).await,
        }
    }

    async fn swap(&self, key: &str, guard: &Guard, json: &str) -> Result<Swap, StoreError> {
        match self {
            Store::Redis(store) => store.swap(key, guard, json).await,
            Store::Memory(store) => store.swap(key, guard, json).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self {
            Store::Redis(store) => store.delete(key).await,
            Store::Memory(store) => store.delete(key).await,
        }
    }
}

#[async_trait]
impl SetOperations for Store {
    async fn sadd(&self, key: &str, value: &str) -> Result<(), StoreError> {
        match self {
            Store::Redis(store) => store.sadd(key, value).await,
            Store::Memory(store) => store.sadd(key, value).await,
        }
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self {
            Store::Redis(store) => store.smembers(key).await,
            Store::Memory(store) => store.smembers(key).await,
        }
    }

    async fn srem(&self, key: &str, value: &str) -> Result<(), StoreError> {
        match self {
            Store::Redis(store) => store.srem(key, value).await,
            Store::Memory(store) => store.srem(key, value).await,
        }
    }
}

// ------------------------------
// Typed documents
// ------------------------------

pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: &'static str;

    fn key(&self) -> &str;
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);

    /// Extra field the stored copy must still hold for a write to land.
    fn guard_field(&self) -> Option<(&'static str, String)> {
        None
    }

    fn missing(id: &str) -> AppError {
        AppError::not_found(format!("{} {}", Self::COLLECTION, id))
    }

    fn guard(&self) -> Guard {
        Guard {
            version: self.version(),
            field: self.guard_field(),
        }
    }
}

impl Document for RideRequest {
    const COLLECTION: &'static str = "ride_request";

    fn key(&self) -> &str {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn guard_field(&self) -> Option<(&'static str, String)> {
        Some(("status", self.status.as_str().to_string()))
    }

    fn missing(id: &str) -> AppError {
        AppError::RideNotFound(id.to_string())
    }
}

impl Document for ActiveRide {
    const COLLECTION: &'static str = "active_ride";

    // One tracking record per ride request, addressed by the request id.
    fn key(&self) -> &str {
        &self.ride_request_id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn missing(id: &str) -> AppError {
        AppError::ActiveRideNotFound(id.to_string())
    }
}

impl Document for Driver {
    const COLLECTION: &'static str = "driver";

    fn key(&self) -> &str {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn missing(id: &str) -> AppError {
        AppError::DriverNotFound(id.to_string())
    }
}

impl Document for Rider {
    const COLLECTION: &'static str = "rider";

    fn key(&self) -> &str {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn missing(id: &str) -> AppError {
        AppError::RiderNotFound(id.to_string())
    }
}

/// What a mutation closure decided after inspecting the fresh copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Apply,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct Updated<T> {
    pub doc: T,
    pub applied: bool,
}

pub struct Repository<T> {
    store: Arc<Store>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _marker: PhantomData,
        }
    }
}

impl<T: Document> Repository<T> {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    fn key(id: &str) -> String {
        StoreKeys::document(T::COLLECTION, id)
    }

    pub async fn get(&self, id: &str) -> Result<Option<T>, AppError> {
        match DocumentOperations::get(self.store.as_ref(), &Self::key(id)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn require(&self, id: &str) -> Result<T, AppError> {
        self.get(id).await?.ok_or_else(|| T::missing(id))
    }

    /// Loads every id that still resolves; dangling index entries are skipped.
    pub async fn get_many(&self, ids: &[String]) -> Result<Vec<T>, AppError> {
        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get(id).await? {
                Some(doc) => docs.push(doc),
                None => tracing::debug!("Skipping dangling {} reference {}", T::COLLECTION, id),
            }
        }
        Ok(docs)
    }

    pub async fn create(&self, doc: &mut T) -> Result<(), AppError> {
        doc.set_version(1);
        let json = serde_json::to_string(doc)?;
        if !self.store.insert(&Self::key(doc.key()), &json).await? {
            return Err(AppError::conflict(format!(
                "{} {} already exists",
                T::COLLECTION,
                doc.key()
            )));
        }
        Ok(())
    }

    /// Read, mutate, then write back only if nobody else wrote in between.
    /// `mutate` runs against the fresh copy on every attempt, so business
    /// preconditions are always checked against current state.
    pub async fn update<F>(&self, id: &str, mut mutate: F) -> Result<Updated<T>, AppError>
    where
        F: FnMut(&mut T) -> Result<Change, AppError> + Send,
    {
        let key = Self::key(id);

        for attempt in 1..=MAX_SWAP_ATTEMPTS {
            let mut doc = self.require(id).await?;
            let guard = doc.guard();

            if mutate(&mut doc)? == Change::Unchanged {
                return Ok(Updated { doc, applied: false });
            }

            doc.set_version(guard.version + 1);
            let json = serde_json::to_string(&doc)?;

            match self.store.swap(&key, &guard, &json).await? {
                Swap::Applied => return Ok(Updated { doc, applied: true }),
                Swap::Missing => return Err(T::missing(id)),
                Swap::Rejected => {
                    tracing::debug!("Lost write race on {} {} (attempt {})", T::COLLECTION, id, attempt);
                }
            }
        }

        Err(AppError::conflict(format!(
            "{} {} is being modified concurrently, retry later",
            T::COLLECTION,
            id
        )))
    }

    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        DocumentOperations::delete(self.store.as_ref(), &Self::key(id)).await?;
        Ok(())
    }
}

/// Secondary index maintenance on the same backing store.
#[derive(Clone)]
pub struct Indexes {
    store: Arc<Store>,
}

impl Indexes {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub async fn add(&self, index: &str, id: &str) -> Result<(), AppError> {
        Ok(self.store.sadd(index, id).await?)
    }

    pub async fn members(&self, index: &str) -> Result<Vec<String>, AppError> {
        Ok(self.store.smembers(index).await?)
    }

    pub async fn remove(&self, index: &str, id: &str) -> Result<(), AppError> {
        Ok(self.store.srem(index, id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Counter {
        id: String,
        state: String,
        count: u32,
        version: u64,
    }

    impl Document for Counter {
        const COLLECTION: &'static str = "counter";

        fn key(&self) -> &str {
            &self.id
        }

        fn version(&self) -> u64 {
            self.version
        }

        fn set_version(&mut self, version: u64) {
            self.version = version;
        }

        fn guard_field(&self) -> Option<(&'static str, String)> {
            Some(("state", self.state.clone()))
        }
    }

    fn counter(id: &str) -> Counter {
        Counter {
            id: id.to_string(),
            state: "open".to_string(),
            count: 0,
            version: 0,
        }
    }

    #[tokio::test]
    async fn test_swap_checks_version_and_field() {
        let store = MemoryStore::new();
        store
            .insert("k", r#"{"state":"open","version":3}"#)
            .await
            .unwrap();

        let stale = Guard { version: 2, field: None };
        assert_eq!(store.swap("k", &stale, "{}").await.unwrap(), Swap::Rejected);

        let wrong_state = Guard {
            version: 3,
            field: Some(("state", "closed".to_string())),
        };
        assert_eq!(store.swap("k", &wrong_state, "{}").await.unwrap(), Swap::Rejected);

        let good = Guard {
            version: 3,
            field: Some(("state", "open".to_string())),
        };
        assert_eq!(
            store.swap("k", &good, r#"{"state":"closed","version":4}"#).await.unwrap(),
            Swap::Applied
        );
        assert_eq!(store.swap("missing", &good, "{}").await.unwrap(), Swap::Missing);
    }

    #[tokio::test]
    async fn test_insert_does_not_overwrite() {
        let store = MemoryStore::new();
        assert!(store.insert("k", "1").await.unwrap());
        assert!(!store.insert("k", "2").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_repository_update_bumps_version() {
        let repo: Repository<Counter> = Repository::new(Arc::new(Store::memory()));
        let mut doc = counter("c1");
        repo.create(&mut doc).await.unwrap();
        assert_eq!(doc.version, 1);

        let updated = repo
            .update("c1", |c| {
                c.count += 1;
                Ok(Change::Apply)
            })
            .await
            .unwrap();
        assert!(updated.applied);
        assert_eq!(updated.doc.version, 2);

        let untouched = repo.update("c1", |_| Ok(Change::Unchanged)).await.unwrap();
        assert!(!untouched.applied);
        assert_eq!(repo.require("c1").await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_repository_surfaces_mutation_errors_and_missing() {
        let repo: Repository<Counter> = Repository::new(Arc::new(Store::memory()));
        let mut doc = counter("c1");
        repo.create(&mut doc).await.unwrap();

        let err = repo
            .update("c1", |_| Err(AppError::invalid_state("closed")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        let err = repo.update("nope", |_| Ok(Change::Apply)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        assert!(matches!(repo.create(&mut doc).await, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let repo: Repository<Counter> = Repository::new(Arc::new(Store::memory()));
        let mut doc = counter("c1");
        repo.create(&mut doc).await.unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move {
                    repo.update("c1", |c| {
                        c.count += 1;
                        Ok(Change::Apply)
                    })
                    .await
                })
            })
            .collect();

        let mut applied = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                applied += 1;
            }
        }
        let stored = repo.require("c1").await.unwrap();
        assert_eq!(stored.count, applied);
        assert_eq!(stored.version, 1 + applied as u64);
    }

    #[tokio::test]
    async fn test_set_operations() {
        let store = Store::memory();
        store.sadd("idx", "a").await.unwrap();
        store.sadd("idx", "b").await.unwrap();
        store.sadd("idx", "a").await.unwrap();
        let mut members = store.smembers("idx").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a", "b"]);

        store.srem("idx", "a").await.unwrap();
        assert_eq!(store.smembers("idx").await.unwrap(), vec!["b"]);
        assert!(store.smembers("empty").await.unwrap().is_empty());
    }
}
