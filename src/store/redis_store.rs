//! Externally-hosted record store backed by Redis.
//!
//! Records are JSON strings under `"{prefix}:{idx}"`. The server is reached
//! through a [`StoreClient`], which owns connection, timeout and retry policy.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{
    to_record, ConfigRecord, REDIS_DEFAULT_CONNECT_ATTEMPTS, REDIS_DEFAULT_TIMEOUT_MS,
};
use crate::error::{Result, SimilarityError};
use crate::persistence;
use crate::store::{Record, Store, StoreSnapshot};

pub const REDIS_STORE: &str = "RedisStore";

/// Minimal key-value client boundary for a remote store.
pub trait StoreClient: Send + fmt::Debug {
    /// Open the connection if it is not open yet.
    fn connect(&mut self) -> Result<()>;

    fn get(&mut self, key: &str) -> Result<Option<String>>;

    fn set(&mut self, key: &str, value: &str) -> Result<()>;

    /// Delete a key. Returns whether it existed.
    fn delete(&mut self, key: &str) -> Result<bool>;

    /// All keys matching a glob pattern such as `"prefix:*"`.
    fn keys(&mut self, pattern: &str) -> Result<Vec<String>>;

    fn close(&mut self);
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_prefix() -> String {
    "simdex".to_string()
}

fn default_timeout_ms() -> u64 {
    REDIS_DEFAULT_TIMEOUT_MS
}

fn default_connect_attempts() -> u32 {
    REDIS_DEFAULT_CONNECT_ATTEMPTS
}

/// Construction parameters of a [`RedisStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisStoreConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub db: i64,
    /// Namespace of this store's keys.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db: 0,
            prefix: default_prefix(),
            timeout_ms: default_timeout_ms(),
            connect_attempts: default_connect_attempts(),
        }
    }
}

impl RedisStoreConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

/// Synchronous Redis client with a connect timeout and bounded connect retries.
pub struct RedisClient {
    url: String,
    timeout: Duration,
    connect_attempts: u32,
    conn: Option<redis::Connection>,
}

impl fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisClient")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .field("connected", &self.conn.is_some())
            .finish()
    }
}

impl RedisClient {
    pub fn new(url: impl Into<String>, timeout: Duration, connect_attempts: u32) -> Self {
        Self {
            url: url.into(),
            timeout,
            connect_attempts: connect_attempts.max(1),
            conn: None,
        }
    }

    pub fn from_config(config: &RedisStoreConfig) -> Self {
        Self::new(
            config.url(),
            Duration::from_millis(config.timeout_ms),
            config.connect_attempts,
        )
    }

    fn conn(&mut self) -> Result<&mut redis::Connection> {
        self.connect()?;
        self.conn
            .as_mut()
            .ok_or_else(|| SimilarityError::Client(format!("not connected to {}", self.url)))
    }
}

impl StoreClient for RedisClient {
    fn connect(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let client = redis::Client::open(self.url.as_str())?;
        let mut last_error = None;
        for attempt in 1..=self.connect_attempts {
            match client.get_connection_with_timeout(self.timeout) {
                Ok(conn) => {
                    conn.set_read_timeout(Some(self.timeout))?;
                    conn.set_write_timeout(Some(self.timeout))?;
                    tracing::debug!("Connected to {} (attempt {})", self.url, attempt);
                    self.conn = Some(conn);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        "Connection to {} failed (attempt {}/{}): {}",
                        self.url,
                        attempt,
                        self.connect_attempts,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(SimilarityError::Client(format!(
            "could not connect to {} after {} attempts: {}",
            self.url,
            self.connect_attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn get(&mut self, key: &str) -> Result<Option<String>> {
        Ok(redis::cmd("GET").arg(key).query(self.conn()?)?)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        redis::cmd("SET").arg(key).arg(value).query::<()>(self.conn()?)?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<bool> {
        let removed: i64 = redis::cmd("DEL").arg(key).query(self.conn()?)?;
        Ok(removed > 0)
    }

    fn keys(&mut self, pattern: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(1000)
                .query(&mut *conn)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }

    fn close(&mut self) {
        if self.conn.take().is_some() {
            tracing::debug!("Closed connection to {}", self.url);
        }
    }
}

/// Record store living in an external key-value server.
#[derive(Debug)]
pub struct RedisStore<C: StoreClient = RedisClient> {
    config: RedisStoreConfig,
    client: C,
}

impl RedisStore<RedisClient> {
    /// Create a store for the given server. The connection opens on first use.
    pub fn new(config: RedisStoreConfig) -> Self {
        let client = RedisClient::from_config(&config);
        Self { config, client }
    }
}

impl<C: StoreClient> RedisStore<C> {
    /// Create a store over a custom client.
    pub fn with_client(config: RedisStoreConfig, client: C) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    /// Close the client connection; the next operation reconnects.
    pub fn close(&mut self) {
        self.client.close();
    }

    fn key(&self, idx: u64) -> String {
        format!("{}:{}", self.config.prefix, idx)
    }

    fn pattern(&self) -> String {
        format!("{}:*", self.config.prefix)
    }

    /// Ids of every record under this store's prefix.
    fn stored_idxs(&mut self) -> Result<Vec<u64>> {
        let pattern = self.pattern();
        let prefix = format!("{}:", self.config.prefix);
        let mut idxs: Vec<u64> = self
            .client
            .keys(&pattern)?
            .into_iter()
            .filter_map(|key| match key.strip_prefix(&prefix).map(str::parse) {
                Some(Ok(idx)) => Some(idx),
                _ => {
                    tracing::warn!("Skipping foreign key {:?} under prefix", key);
                    None
                }
            })
            .collect();
        // SCAN may report a key more than once.
        idxs.sort_unstable();
        idxs.dedup();
        Ok(idxs)
    }
}

fn encode(record: &Record) -> Result<String> {
    serde_json::to_string(record).map_err(|e| SimilarityError::Serialization(e.to_string()))
}

fn decode(value: &str) -> Result<Record> {
    serde_json::from_str(value).map_err(|e| SimilarityError::Serialization(e.to_string()))
}

impl<C: StoreClient> Store for RedisStore<C> {
    fn canonical_name(&self) -> &'static str {
        REDIS_STORE
    }

    fn get(&mut self, idx: u64) -> Result<Option<Record>> {
        let key = self.key(idx);
        self.client.get(&key)?.as_deref().map(decode).transpose()
    }

    fn set(&mut self, idx: u64, record: Record) -> Result<()> {
        let key = self.key(idx);
        self.client.set(&key, &encode(&record)?)
    }

    fn delete(&mut self, idx: u64) -> Result<bool> {
        let key = self.key(idx);
        self.client.delete(&key)
    }

    fn size(&mut self) -> Result<usize> {
        Ok(self.stored_idxs()?.len())
    }

    fn reset(&mut self) -> Result<()> {
        for idx in self.stored_idxs()? {
            self.delete(idx)?;
        }
        Ok(())
    }

    fn save(&mut self, path: &Path) -> Result<()> {
        let mut snapshot = StoreSnapshot::default();
        for idx in self.stored_idxs()? {
            if let Some(record) = self.get(idx)? {
                snapshot.records.insert(idx, record);
            }
        }
        persistence::save_store(path, &snapshot)?;
        tracing::info!(
            "Saved {} records from {} to {}",
            snapshot.records.len(),
            self.pattern(),
            path.display()
        );
        Ok(())
    }

    /// The snapshot is read before the prefix is cleared. A failure while
    /// writing records back can leave the remote store partially restored.
    fn load(&mut self, path: &Path) -> Result<()> {
        let snapshot: StoreSnapshot = persistence::load_store(path)?;
        self.reset()?;
        let count = snapshot.records.len();
        for (idx, record) in snapshot.records {
            self.set(idx, record)?;
        }
        tracing::info!("Loaded {} records into {}", count, self.pattern());
        Ok(())
    }

    fn get_config(&self) -> ConfigRecord {
        to_record(&self.config, REDIS_STORE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// In-process stand-in for a Redis server.
    #[derive(Debug, Default)]
    struct FakeClient {
        data: HashMap<String, String>,
        connects: usize,
        connected: bool,
        /// Report every key twice from `keys`, as SCAN is allowed to.
        repeat_keys: bool,
    }

    impl StoreClient for FakeClient {
        fn connect(&mut self) -> Result<()> {
            if !self.connected {
                self.connected = true;
                self.connects += 1;
            }
            Ok(())
        }

        fn get(&mut self, key: &str) -> Result<Option<String>> {
            self.connect()?;
            Ok(self.data.get(key).cloned())
        }

        fn set(&mut self, key: &str, value: &str) -> Result<()> {
            self.connect()?;
            self.data.insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn delete(&mut self, key: &str) -> Result<bool> {
            self.connect()?;
            Ok(self.data.remove(key).is_some())
        }

        fn keys(&mut self, pattern: &str) -> Result<Vec<String>> {
            self.connect()?;
            let prefix = pattern.trim_end_matches('*');
            let repeats = if self.repeat_keys { 2 } else { 1 };
            Ok(self
                .data
                .keys()
                .filter(|k| k.starts_with(prefix))
                .flat_map(|k| std::iter::repeat(k.clone()).take(repeats))
                .collect())
        }

        fn close(&mut self) {
            self.connected = false;
        }
    }

    fn store() -> RedisStore<FakeClient> {
        RedisStore::with_client(RedisStoreConfig::default(), FakeClient::default())
    }

    #[test]
    fn test_set_get_delete() {
        let mut store = store();
        store.set(4, json!({"label": 1})).unwrap();

        assert_eq!(store.client.data["simdex:4"], r#"{"label":1}"#);
        assert_eq!(store.get(4).unwrap(), Some(json!({"label": 1})));
        assert_eq!(store.get(5).unwrap(), None);
        assert!(store.delete(4).unwrap());
        assert_eq!(store.size().unwrap(), 0);
    }

    #[test]
    fn test_prefix_isolates_stores() {
        let mut store = store();
        store.client.set("other:1", "1").unwrap();
        store.client.set("simdex:junk", "1").unwrap();
        store.set(1, json!(1)).unwrap();

        assert_eq!(store.size().unwrap(), 1);
        store.reset().unwrap();
        assert!(store.client.data.contains_key("other:1"));
        assert!(!store.client.data.contains_key("simdex:1"));
    }

    #[test]
    fn test_repeated_scan_keys_counted_once() {
        let mut store = store();
        store.client.repeat_keys = true;
        store.set(1, json!("a")).unwrap();
        store.set(2, json!("b")).unwrap();

        assert_eq!(store.size().unwrap(), 2);
        store.reset().unwrap();
        assert_eq!(store.size().unwrap(), 0);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let mut store = store();
        store.set(1, json!("a")).unwrap();
        store.set(2, json!("b")).unwrap();
        store.save(dir.path()).unwrap();

        store.set(3, json!("c")).unwrap();
        store.delete(1).unwrap();
        store.load(dir.path()).unwrap();

        assert_eq!(store.size().unwrap(), 2);
        assert_eq!(store.get(1).unwrap(), Some(json!("a")));
        assert_eq!(store.get(3).unwrap(), None);
    }

    #[test]
    fn test_close_then_reconnect() {
        let mut store = store();
        store.set(1, json!(1)).unwrap();
        store.close();
        assert_eq!(store.get(1).unwrap(), Some(json!(1)));
        assert_eq!(store.client.connects, 2);
    }

    #[test]
    fn test_config_defaults_and_url() {
        let config = RedisStoreConfig::default();
        assert_eq!(config.url(), "redis://localhost:6379/0");

        let record = store().get_config();
        assert_eq!(record["canonical_name"], "RedisStore");
        assert_eq!(record["prefix"], "simdex");
        assert_eq!(record["port"], 6379);
    }

    #[test]
    fn test_unreachable_server_reports_client_error() {
        let config = RedisStoreConfig {
            port: 1,
            timeout_ms: 50,
            connect_attempts: 1,
            ..RedisStoreConfig::default()
        };
        let mut store = RedisStore::new(config);
        assert!(matches!(store.get(1), Err(SimilarityError::Client(_))));
    }
}
