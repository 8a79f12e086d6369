//! In-memory session provider
//!
//! This is primarily for development, testing and single-instance servers.
//! Sessions are lost on restart and are not shared across processes.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{SessionProvider, SessionStore};
use crate::error::SessionError;
use crate::session::SessionData;

type SessionMap = Arc<RwLock<HashMap<String, SessionData>>>;

/// In-memory session provider
///
/// `read` registers unknown IDs immediately, so a started session counts in
/// [`all`](SessionProvider::all) before its first release. Concurrent
/// releases of the same session are last-writer-wins.
pub struct MemoryProvider {
    sessions: SessionMap,
    max_lifetime: Duration,
}

impl MemoryProvider {
    /// Create a new memory provider
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_lifetime: Duration::from_secs(3600),
        }
    }

    fn store(&self, sid: &str, data: SessionData) -> Box<dyn SessionStore> {
        Box::new(MemoryStore {
            sid: sid.to_string(),
            data: RwLock::new(data),
            sessions: Arc::clone(&self.sessions),
            max_lifetime: self.max_lifetime,
        })
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionProvider for MemoryProvider {
    async fn init(&mut self, max_lifetime: Duration, _config: &str) -> Result<(), SessionError> {
        self.max_lifetime = max_lifetime;
        Ok(())
    }

    async fn read(&self, sid: &str) -> Result<Box<dyn SessionStore>, SessionError> {
        let mut sessions = self.sessions.write();

        let data = match sessions.get_mut(sid) {
            Some(stored) if !stored.is_expired(self.max_lifetime) => {
                stored.touch();
                stored.clone()
            }
            _ => {
                let fresh = SessionData::new();
                sessions.insert(sid.to_string(), fresh.clone());
                fresh
            }
        };
        drop(sessions);

        Ok(self.store(sid, data))
    }

    async fn exist(&self, sid: &str) -> Result<bool, SessionError> {
        Ok(self
            .sessions
            .read()
            .get(sid)
            .map(|stored| !stored.is_expired(self.max_lifetime))
            .unwrap_or(false))
    }

    async fn regenerate(
        &self,
        old_sid: &str,
        sid: &str,
    ) -> Result<Box<dyn SessionStore>, SessionError> {
        let mut sessions = self.sessions.write();

        let mut data = match sessions.remove(old_sid) {
            Some(stored) if !stored.is_expired(self.max_lifetime) => stored,
            _ => SessionData::new(),
        };
        data.touch();
        sessions.insert(sid.to_string(), data.clone());
        drop(sessions);

        Ok(self.store(sid, data))
    }

    async fn destroy(&self, sid: &str) -> Result<(), SessionError> {
        self.sessions.write().remove(sid);
        Ok(())
    }

    async fn all(&self) -> Result<usize, SessionError> {
        Ok(self.sessions.read().len())
    }

    async fn gc(&self) -> Result<(), SessionError> {
        // Collect under the read lock, then take the write lock per entry so
        // request traffic on live sessions is never held up for a whole sweep.
        let expired: Vec<String> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, stored)| stored.is_expired(self.max_lifetime))
            .map(|(sid, _)| sid.clone())
            .collect();

        let mut removed = 0;
        for sid in &expired {
            let mut sessions = self.sessions.write();
            // touched since we looked
            if sessions
                .get(sid)
                .map(|stored| stored.is_expired(self.max_lifetime))
                .unwrap_or(false)
            {
                sessions.remove(sid);
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "Expired memory sessions removed");
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.sessions.write().clear();
        Ok(())
    }
}

/// Handle to one session held by a [`MemoryProvider`]
///
/// Values live in a private copy until released.
pub struct MemoryStore {
    sid: String,
    data: RwLock<SessionData>,
    sessions: SessionMap,
    max_lifetime: Duration,
}

#[async_trait]
impl SessionStore for MemoryStore {
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
        let mut data = self.data.write();
        data.touch();
        self.sessions.write().insert(self.sid.clone(), data.clone());
        Ok(())
    }

    async fn persist_if_present(&self) -> Result<bool, SessionError> {
        let mut data = self.data.write();
        let mut sessions = self.sessions.write();

        match sessions.get_mut(&self.sid) {
            Some(stored) if !stored.is_expired(self.max_lifetime) => {
                data.touch();
                *stored = data.clone();
                Ok(true)
            }
            Some(_) => {
                sessions.remove(&self.sid);
                Ok(false)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn provider(max_lifetime: Duration) -> MemoryProvider {
        let mut provider = MemoryProvider::new();
        provider.init(max_lifetime, "").await.unwrap();
        provider
    }

    #[tokio::test]
    async fn test_memory_provider_basic() {
        let provider = provider(Duration::from_secs(3600)).await;

        let store = provider.read("test-id").await.unwrap();
        assert_eq!(store.session_id(), "test-id");
        assert!(provider.exist("test-id").await.unwrap());

        store.set("user", Value::from("alice")).await.unwrap();
        assert_eq!(store.get("user").await, Some(Value::from("alice")));

        // other handles see the value only after persist
        let other = provider.read("test-id").await.unwrap();
        assert_eq!(other.get("user").await, None);
        store.persist().await.unwrap();
        let other = provider.read("test-id").await.unwrap();
        assert_eq!(other.get("user").await, Some(Value::from("alice")));

        provider.destroy("test-id").await.unwrap();
        assert!(!provider.exist("test-id").await.unwrap());
        // destroying twice is fine
        provider.destroy("test-id").await.unwrap();
    }

    #[tokio::test]
    async fn test_persist_if_present_after_destroy() {
        let provider = provider(Duration::from_secs(3600)).await;

        let store = provider.read("sid").await.unwrap();
        store.set("k", Value::from(1)).await.unwrap();
        provider.destroy("sid").await.unwrap();

        assert!(!store.persist_if_present().await.unwrap());
        assert!(!provider.exist("sid").await.unwrap());

        // a plain persist is an unconditional write
        store.persist().await.unwrap();
        assert!(provider.exist("sid").await.unwrap());
    }

    #[tokio::test]
    async fn test_regenerate_moves_values() {
        let provider = provider(Duration::from_secs(3600)).await;

        let store = provider.read("old").await.unwrap();
        store.set("user", Value::from("alice")).await.unwrap();
        store.persist().await.unwrap();

        let moved = provider.regenerate("old", "new").await.unwrap();
        assert_eq!(moved.session_id(), "new");
        assert_eq!(moved.get("user").await, Some(Value::from("alice")));
        assert!(!provider.exist("old").await.unwrap());
        assert!(provider.exist("new").await.unwrap());

        let created = provider.regenerate("missing", "fresh").await.unwrap();
        assert_eq!(created.get("user").await, None);
        assert!(provider.exist("fresh").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_sessions_are_swept() {
        let provider = provider(Duration::from_secs(1)).await;

        provider.read("stale").await.unwrap();
        provider.read("live").await.unwrap();
        provider
            .sessions
            .write()
            .get_mut("stale")
            .unwrap()
            .last_access -= chrono::Duration::seconds(5);

        assert!(!provider.exist("stale").await.unwrap());
        assert_eq!(provider.all().await.unwrap(), 2);

        provider.gc().await.unwrap();
        assert_eq!(provider.all().await.unwrap(), 1);
        assert!(provider.exist("live").await.unwrap());

        // reading an expired id starts over with an empty session
        let store = provider.read("stale").await.unwrap();
        assert_eq!(store.get("anything").await, None);
    }
}
