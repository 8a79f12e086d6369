//! Redis session provider
//!
//! Storage format:
//! - Key: `prefix + session_id` (default prefix: "session:")
//! - Value: JSON serialized [`SessionData`]
//! - TTL: the manager's max lifetime, refreshed on every read and release
//!
//! Provider config string: `host:port,poolSize,password,dbIndex,idleTimeoutSeconds`.
//! Only the address is required.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::{SessionProvider, SessionStore};
use crate::error::SessionError;
use crate::session::SessionData;

const DEFAULT_POOL_SIZE: usize = 100;
const DEFAULT_KEY_PREFIX: &str = "session:";

/// KEYS[1] = session, ARGV = [empty document, ttl]; returns the stored document
const OPEN_SCRIPT: &str = r#"
local doc = redis.call('GET', KEYS[1])
if doc then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
    return doc
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
return ARGV[1]
"#;

/// KEYS = [old, new], ARGV = [empty document, ttl]; returns the document now at new
const REKEY_SCRIPT: &str = r#"
local doc = redis.call('GET', KEYS[1])
if doc then
    redis.call('RENAME', KEYS[1], KEYS[2])
    redis.call('EXPIRE', KEYS[2], ARGV[2])
    return doc
end
redis.call('SET', KEYS[2], ARGV[1], 'EX', ARGV[2])
return ARGV[1]
"#;

/// Parsed Redis provider configuration
#[derive(Clone, Debug, PartialEq)]
pub struct RedisSettings {
    /// `host:port`
    pub addr: String,
    /// Max commands in flight at once
    pub pool_size: usize,
    pub password: Option<String>,
    pub db: i64,
    /// Bound on each command round-trip
    pub idle_timeout: Option<Duration>,
}

impl RedisSettings {
    /// Parse `host:port,poolSize,password,dbIndex,idleTimeoutSeconds`
    ///
    /// Empty fields take their defaults; non-numeric numbers are rejected.
    pub fn parse(config: &str) -> Result<Self, SessionError> {
        let mut fields = config.split(',').map(str::trim);

        let addr = fields.next().unwrap_or_default().to_string();
        if addr.is_empty() {
            return Err(SessionError::InvalidConfig(
                "redis provider needs an address".to_string(),
            ));
        }

        let pool_size = match fields.next().filter(|s| !s.is_empty()) {
            Some(raw) => match raw.parse::<usize>() {
                Ok(0) | Err(_) => {
                    return Err(SessionError::InvalidConfig(format!(
                        "invalid redis pool size: {}",
                        raw
                    )))
                }
                Ok(n) => n,
            },
            None => DEFAULT_POOL_SIZE,
        };

        let password = fields
            .next()
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let db = match fields.next().filter(|s| !s.is_empty()) {
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|db| *db >= 0)
                .ok_or_else(|| {
                    SessionError::InvalidConfig(format!("invalid redis db index: {}", raw))
                })?,
            None => 0,
        };

        let idle_timeout = match fields.next().filter(|s| !s.is_empty()) {
            Some(raw) => match raw.parse::<u64>() {
                Ok(0) => None,
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => {
                    return Err(SessionError::InvalidConfig(format!(
                        "invalid redis idle timeout: {}",
                        raw
                    )))
                }
            },
            None => None,
        };

        Ok(Self {
            addr,
            pool_size,
            password,
            db,
            idle_timeout,
        })
    }

    /// Connection URL for [`redis::Client::open`]
    pub fn connection_url(&self) -> String {
        let auth = match &self.password {
            Some(password) => format!(":{}@", urlencoding::encode(password)),
            None => String::new(),
        };
        format!("redis://{}{}/{}", auth, self.addr, self.db)
    }
}

/// Connection shared by the provider and every store it hands out
struct RedisBackend {
    conn: ConnectionManager,
    permits: Semaphore,
    prefix: String,
    ttl: u64,
    idle_timeout: Option<Duration>,
    open_script: redis::Script,
    rekey_script: redis::Script,
}

impl RedisBackend {
    fn make_key(&self, sid: &str) -> String {
        format!("{}{}", self.prefix, sid)
    }

    /// Run one command on the shared connection, holding a pool permit
    async fn run<T, F, Fut>(&self, command: F) -> Result<T, SessionError>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SessionError::StoreError("redis provider is closed".to_string()))?;

        let fut = command(self.conn.clone());
        match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| SessionError::Timeout("redis command"))?
                .map_err(SessionError::from),
            None => fut.await.map_err(SessionError::from),
        }
    }

    /// Load a session and refresh its TTL, creating it empty when unknown
    async fn open(&self, sid: &str) -> Result<SessionData, SessionError> {
        let key = self.make_key(sid);
        let empty = serde_json::to_string(&SessionData::new())?;
        let ttl = self.ttl;
        let script = &self.open_script;
        let json: String = self
            .run(|mut conn| async move {
                script.key(&key).arg(&empty).arg(ttl).invoke_async(&mut conn).await
            })
            .await?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Move `old_sid` to `sid` in one step, or create `sid` empty when
    /// `old_sid` is gone
    async fn rekey(&self, old_sid: &str, sid: &str) -> Result<SessionData, SessionError> {
        let old_key = self.make_key(old_sid);
        let key = self.make_key(sid);
        let empty = serde_json::to_string(&SessionData::new())?;
        let ttl = self.ttl;
        let script = &self.rekey_script;
        let json: String = self
            .run(|mut conn| async move {
                script
                    .key(&old_key)
                    .key(&key)
                    .arg(&empty)
                    .arg(ttl)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(serde_json::from_str(&json)?)
    }

    async fn save(&self, sid: &str, data: &SessionData) -> Result<(), SessionError> {
        let key = self.make_key(sid);
        let json = serde_json::to_string(data)?;
        let ttl = self.ttl;
        self.run(|mut conn| async move { conn.set_ex::<_, _, ()>(&key, &json, ttl).await })
            .await
    }

    /// `SET .. XX` only writes when the key still exists
    async fn save_if_present(&self, sid: &str, data: &SessionData) -> Result<bool, SessionError> {
        let key = self.make_key(sid);
        let json = serde_json::to_string(data)?;
        let ttl = self.ttl;
        let reply: Option<String> = self
            .run(|mut conn| async move {
                redis::cmd("SET")
                    .arg(&key)
                    .arg(&json)
                    .arg("EX")
                    .arg(ttl)
                    .arg("XX")
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(reply.is_some())
    }
}

/// Redis session provider
///
/// # Example
///
/// ```rust,ignore
/// use salvo_session_manager::{Manager, SessionConfig};
///
/// let config = SessionConfig::default().with_provider_config("127.0.0.1:6379,100,,0,30");
/// let manager = Manager::new("redis", config).await?;
/// ```
pub struct RedisProvider {
    backend: Option<Arc<RedisBackend>>,
    prefix: String,
}

impl RedisProvider {
    /// Create an uninitialised provider with the default key prefix
    pub fn new() -> Self {
        Self {
            backend: None,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    /// Build with custom key prefix
    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    fn backend(&self) -> Result<&Arc<RedisBackend>, SessionError> {
        self.backend
            .as_ref()
            .ok_or_else(|| SessionError::StoreError("redis provider not initialised".to_string()))
    }

    fn store(backend: &Arc<RedisBackend>, sid: &str, data: SessionData) -> Box<dyn SessionStore> {
        Box::new(RedisStore {
            sid: sid.to_string(),
            data: parking_lot::RwLock::new(data),
            backend: Arc::clone(backend),
        })
    }
}

impl Default for RedisProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionProvider for RedisProvider {
    async fn init(&mut self, max_lifetime: Duration, config: &str) -> Result<(), SessionError> {
        let settings = RedisSettings::parse(config)?;
        let client = redis::Client::open(settings.connection_url())
            .map_err(|e| SessionError::InvalidConfig(format!("Failed to create Redis client: {}", e)))?;
        let conn = ConnectionManager::new(client).await?;

        tracing::info!(
            addr = %settings.addr,
            db = settings.db,
            pool_size = settings.pool_size,
            "Redis session provider connected"
        );

        self.backend = Some(Arc::new(RedisBackend {
            conn,
            permits: Semaphore::new(settings.pool_size),
            prefix: self.prefix.clone(),
            ttl: max_lifetime.as_secs().max(1),
            idle_timeout: settings.idle_timeout,
            open_script: redis::Script::new(OPEN_SCRIPT),
            rekey_script: redis::Script::new(REKEY_SCRIPT),
        }));
        Ok(())
    }

    async fn read(&self, sid: &str) -> Result<Box<dyn SessionStore>, SessionError> {
        let backend = self.backend()?;
        let data = backend.open(sid).await?;
        Ok(Self::store(backend, sid, data))
    }

    async fn exist(&self, sid: &str) -> Result<bool, SessionError> {
        let backend = self.backend()?;
        let key = backend.make_key(sid);
        backend
            .run(|mut conn| async move { conn.exists(&key).await })
            .await
    }

    async fn regenerate(
        &self,
        old_sid: &str,
        sid: &str,
    ) -> Result<Box<dyn SessionStore>, SessionError> {
        let backend = self.backend()?;
        let data = backend.rekey(old_sid, sid).await?;
        Ok(Self::store(backend, sid, data))
    }

    async fn destroy(&self, sid: &str) -> Result<(), SessionError> {
        let backend = self.backend()?;
        let key = backend.make_key(sid);
        backend
            .run(|mut conn| async move { conn.del::<_, ()>(&key).await })
            .await
    }

    async fn all(&self) -> Result<usize, SessionError> {
        let backend = self.backend()?;
        let pattern = format!("{}*", backend.prefix);
        let keys: Vec<String> = backend
            .run(|mut conn| async move { redis::cmd("KEYS").arg(&pattern).query_async(&mut conn).await })
            .await?;
        Ok(keys.len())
    }

    async fn gc(&self) -> Result<(), SessionError> {
        // Redis expires keys itself
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        if let Some(backend) = &self.backend {
            backend.permits.close();
        }
        Ok(())
    }
}

/// Handle to one session held by a [`RedisProvider`]
///
/// Values are buffered locally and written as one JSON document on release.
pub struct RedisStore {
    sid: String,
    data: parking_lot::RwLock<SessionData>,
    backend: Arc<RedisBackend>,
}

impl RedisStore {
    fn snapshot(&self) -> SessionData {
        let mut data = self.data.write();
        data.touch();
        data.clone()
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    fn session_id(&self) -> &str {
        &self.sid
    }

    async fn get(&self, key: &str) -> Option<Value> {
        self.data.read().get(key)
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), SessionError> {
        self.data.write().set(key, value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), SessionError> {
        self.data.write().remove(key);
        Ok(())
    }

    async fn flush(&self) -> Result<(), SessionError> {
        self.data.write().clear();
        Ok(())
    }

    async fn persist(&self) -> Result<(), SessionError> {
        let data = self.snapshot();
        self.backend.save(&self.sid, &data).await
    }

    async fn persist_if_present(&self) -> Result<bool, SessionError> {
        let data = self.snapshot();
        self.backend.save_if_present(&self.sid, &data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let settings = RedisSettings::parse("127.0.0.1:6379,10,s3cr@t,2,30").unwrap();
        assert_eq!(
            settings,
            RedisSettings {
                addr: "127.0.0.1:6379".to_string(),
                pool_size: 10,
                password: Some("s3cr@t".to_string()),
                db: 2,
                idle_timeout: Some(Duration::from_secs(30)),
            }
        );
        assert_eq!(
            settings.connection_url(),
            "redis://:s3cr%40t@127.0.0.1:6379/2"
        );
    }

    #[test]
    fn test_parse_defaults() {
        let settings = RedisSettings::parse("redis.local:6380,,,,").unwrap();
        assert_eq!(settings.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(settings.password, None);
        assert_eq!(settings.db, 0);
        assert_eq!(settings.idle_timeout, None);
        assert_eq!(settings.connection_url(), "redis://redis.local:6380/0");

        let settings = RedisSettings::parse("localhost:6379").unwrap();
        assert_eq!(settings.pool_size, DEFAULT_POOL_SIZE);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for config in ["", ",10", "h:1,abc", "h:1,0", "h:1,10,,x", "h:1,10,,-1", "h:1,10,,0,soon"] {
            let err = RedisSettings::parse(config).unwrap_err();
            assert!(
                matches!(err, SessionError::InvalidConfig(_)),
                "accepted {:?}",
                config
            );
        }
    }

    // Tests below require a running Redis instance
    // Run with: cargo test --features redis-store -- --ignored

    fn redis_addr() -> String {
        std::env::var("REDIS_ADDR").unwrap_or_else(|_| "127.0.0.1:6379".to_string())
    }

    async fn provider() -> RedisProvider {
        let mut provider = RedisProvider::new().with_key_prefix("session-test:");
        provider
            .init(Duration::from_secs(3600), &format!("{},100,,0,30", redis_addr()))
            .await
            .unwrap();
        provider
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_provider_basic() {
        let provider = provider().await;

        provider.destroy("basic-id").await.unwrap();
        let store = provider.read("basic-id").await.unwrap();
        // reading registers the id
        assert!(provider.exist("basic-id").await.unwrap());
        assert_eq!(provider.read("basic-id").await.unwrap().get("user").await, None);

        store.set("user", Value::from("alice")).await.unwrap();
        store.persist().await.unwrap();
        assert!(provider.exist("basic-id").await.unwrap());

        let again = provider.read("basic-id").await.unwrap();
        assert_eq!(again.get("user").await, Some(Value::from("alice")));

        provider.destroy("basic-id").await.unwrap();
        assert!(!provider.exist("basic-id").await.unwrap());
        provider.destroy("basic-id").await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_release_if_present_after_destroy() {
        let provider = provider().await;

        let store = provider.read("race-id").await.unwrap();
        provider.destroy("race-id").await.unwrap();

        assert!(!store.persist_if_present().await.unwrap());
        assert!(!provider.exist("race-id").await.unwrap());
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_manager_session() {
        use crate::transport::testing::{MockRequest, MockResponse};
        use crate::{Manager, SessionConfig};

        let config = SessionConfig::new("sid")
            .with_gc_lifetime(3600)
            .with_max_lifetime(3600)
            .with_cookie_lifetime(3600)
            .with_provider_config(format!("{},100,,0,30", redis_addr()));
        let manager = Manager::new("redis", config).await.unwrap();
        manager.start_gc();

        let mut res = MockResponse::default();
        let session = manager
            .session_start(&MockRequest::default(), &mut res)
            .await
            .unwrap();

        session.set("username", "astaxie").await.unwrap();
        assert_eq!(session.get::<String>("username").await.as_deref(), Some("astaxie"));

        session.delete("username").await.unwrap();
        assert_eq!(session.get::<String>("username").await, None);

        session.set("username", "astaxie").await.unwrap();
        session.set("password", "1qaz2wsx").await.unwrap();
        session.flush().await.unwrap();
        assert_eq!(session.get::<String>("username").await, None);
        assert_eq!(session.get::<String>("password").await, None);

        session.release(&mut res).await.unwrap();
        assert!(manager.provider().exist(session.id()).await.unwrap());

        // a release racing with a destroy must not bring the session back
        manager.provider().destroy(session.id()).await.unwrap();
        session.release_if_present(&mut MockResponse::default()).await.unwrap();
        assert!(!manager.provider().exist(session.id()).await.unwrap());

        manager.destroy().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_regenerate() {
        let provider = provider().await;

        let store = provider.read("regen-old").await.unwrap();
        store.set("user", Value::from("alice")).await.unwrap();
        store.persist().await.unwrap();

        let moved = provider.regenerate("regen-old", "regen-new").await.unwrap();
        assert_eq!(moved.get("user").await, Some(Value::from("alice")));
        assert!(!provider.exist("regen-old").await.unwrap());
        assert!(provider.exist("regen-new").await.unwrap());

        provider.destroy("regen-new").await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_regenerate_missing_old_key() {
        let provider = provider().await;
        provider.destroy("gone-old").await.unwrap();
        provider.destroy("gone-new").await.unwrap();

        let renewed = provider.regenerate("gone-old", "gone-new").await.unwrap();
        assert_eq!(renewed.get("user").await, None);
        assert!(!provider.exist("gone-old").await.unwrap());
        assert!(provider.exist("gone-new").await.unwrap());

        provider.destroy("gone-new").await.unwrap();
    }
}
