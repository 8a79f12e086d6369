//! Session data and the per-request session handle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::deadline::with_deadline;
use crate::error::SessionError;
use crate::provider::SessionStore;
use crate::transport::{CredentialOptions, CredentialSink};

/// The durable part of a session, as providers keep it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    /// Session values
    #[serde(default)]
    pub values: HashMap<String, Value>,

    /// Last time the session was read or written
    pub last_access: DateTime<Utc>,
}

impl Default for SessionData {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionData {
    /// Create empty session data, accessed now
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
            last_access: Utc::now(),
        }
    }

    /// Get a value
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    /// Set a value
    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    /// Remove a value
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Clear all values, keeping the access time
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Mark the session as accessed now
    pub fn touch(&mut self) {
        self.last_access = Utc::now();
    }

    /// Whether the session has been idle longer than `max_lifetime`
    pub fn is_expired(&self, max_lifetime: Duration) -> bool {
        // a last access in the future (clock skew) is never expired
        (Utc::now() - self.last_access)
            .to_std()
            .map(|idle| idle > max_lifetime)
            .unwrap_or(false)
    }
}

/// Caller-facing handle to one session for the duration of a request
///
/// Clones share the same underlying store and request marks.
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn SessionStore>,
    credential: Arc<CredentialOptions>,
    deadline: Option<Duration>,
    is_new: bool,
    destroy: Arc<AtomicBool>,
    regenerate: Arc<AtomicBool>,
}

impl Session {
    pub(crate) fn new(
        store: Box<dyn SessionStore>,
        credential: Arc<CredentialOptions>,
        deadline: Option<Duration>,
        is_new: bool,
    ) -> Self {
        Self {
            store: Arc::from(store),
            credential,
            deadline,
            is_new,
            destroy: Arc::new(AtomicBool::new(false)),
            regenerate: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get the session ID
    pub fn id(&self) -> &str {
        self.store.session_id()
    }

    /// Whether the ID was issued for this request
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Get a typed value from the session
    pub async fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.store
            .get(key)
            .await
            .and_then(|v| serde_json::from_value(v).ok())
    }

    /// Check if a key exists in the session
    pub async fn contains(&self, key: &str) -> bool {
        self.store.get(key).await.is_some()
    }

    /// Set a value in the session
    pub async fn set<T: Serialize + Send>(&self, key: &str, value: T) -> Result<(), SessionError> {
        let value = serde_json::to_value(value)?;
        with_deadline(self.deadline, "set", self.store.set(key, value)).await
    }

    /// Remove a value from the session
    pub async fn delete(&self, key: &str) -> Result<(), SessionError> {
        with_deadline(self.deadline, "delete", self.store.delete(key)).await
    }

    /// Clear all session values
    pub async fn flush(&self) -> Result<(), SessionError> {
        with_deadline(self.deadline, "flush", self.store.flush()).await
    }

    /// Persist the session and write its ID to the response
    pub async fn release<W>(&self, sink: &mut W) -> Result<(), SessionError>
    where
        W: CredentialSink + Send + ?Sized,
    {
        with_deadline(self.deadline, "release", self.store.persist()).await?;
        if self.credential.writes_credential() {
            sink.write_credential(self.id(), &self.credential);
        }
        Ok(())
    }

    /// Persist the session only if it still exists in the provider
    ///
    /// When a concurrent destroy already removed the session this does
    /// nothing, so a stale handle never brings the session back.
    pub async fn release_if_present<W>(&self, sink: &mut W) -> Result<(), SessionError>
    where
        W: CredentialSink + Send + ?Sized,
    {
        if !self.persist_if_present().await? {
            tracing::debug!(sid = %self.id(), "session gone before release, skipping");
            return Ok(());
        }
        if self.credential.writes_credential() {
            sink.write_credential(self.id(), &self.credential);
        }
        Ok(())
    }

    pub(crate) async fn persist_if_present(&self) -> Result<bool, SessionError> {
        with_deadline(
            self.deadline,
            "release_if_present",
            self.store.persist_if_present(),
        )
        .await
    }

    /// Mark the session for destruction once the request completes
    pub fn destroy(&self) {
        self.destroy.store(true, Ordering::SeqCst);
    }

    /// Mark the session for a new ID once the request completes
    pub fn regenerate(&self) {
        self.regenerate.store(true, Ordering::SeqCst);
    }

    /// Check if the session should be destroyed
    pub fn should_destroy(&self) -> bool {
        self.destroy.load(Ordering::SeqCst)
    }

    /// Check if the session should be regenerated
    pub fn should_regenerate(&self) -> bool {
        self.regenerate.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("is_new", &self.is_new)
            .field("destroy", &self.should_destroy())
            .field("regenerate", &self.should_regenerate())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_data_expiry() {
        let mut data = SessionData::new();
        assert!(!data.is_expired(Duration::from_secs(1)));

        data.last_access = Utc::now() - chrono::Duration::seconds(5);
        assert!(data.is_expired(Duration::from_secs(1)));
        assert!(!data.is_expired(Duration::from_secs(10)));

        data.touch();
        assert!(!data.is_expired(Duration::from_secs(1)));

        data.last_access = Utc::now() + chrono::Duration::seconds(60);
        assert!(!data.is_expired(Duration::ZERO));
    }

    #[test]
    fn test_session_data_json_shape() {
        let mut data = SessionData::new();
        data.set("user", Value::from("alice"));

        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["values"]["user"], "alice");
        assert!(json["lastAccess"].is_string());

        let back: SessionData = serde_json::from_value(json).unwrap();
        assert_eq!(back.get("user"), Some(Value::from("alice")));
    }
}
