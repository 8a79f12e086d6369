//! Provider and store traits

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::SessionError;

/// Trait for session storage backends
///
/// A provider owns every session it tracks and must be safe to call from many
/// request tasks and the GC loop at once. Any locking it needs is its own.
#[async_trait]
pub trait SessionProvider: Send + Sync + 'static {
    /// One-time setup before the provider is shared
    ///
    /// `config` is the opaque provider configuration string.
    async fn init(&mut self, max_lifetime: Duration, config: &str) -> Result<(), SessionError>;

    /// Open the session `sid`
    ///
    /// An unknown ID is not an error: a fresh, empty session is returned and
    /// should be registered so [`exist`](SessionProvider::exist) sees it.
    async fn read(&self, sid: &str) -> Result<Box<dyn SessionStore>, SessionError>;

    /// Whether a live session exists under `sid`
    async fn exist(&self, sid: &str) -> Result<bool, SessionError>;

    /// Move the session at `old_sid` to `sid`, keeping its values
    ///
    /// Creates an empty session at `sid` when `old_sid` is unknown.
    async fn regenerate(
        &self,
        old_sid: &str,
        sid: &str,
    ) -> Result<Box<dyn SessionStore>, SessionError>;

    /// Remove a session. Removing an unknown ID succeeds.
    async fn destroy(&self, sid: &str) -> Result<(), SessionError>;

    /// Number of sessions currently tracked
    async fn all(&self) -> Result<usize, SessionError>;

    /// Expire sessions idle longer than the max lifetime
    async fn gc(&self) -> Result<(), SessionError>;

    /// Release pooled resources (optional)
    async fn close(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Handle to one live session
///
/// Writes are visible through the same handle immediately and reach the
/// provider on [`persist`](SessionStore::persist).
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// The session ID this handle belongs to
    fn session_id(&self) -> &str;

    /// Get a value; a missing key yields None
    async fn get(&self, key: &str) -> Option<Value>;

    /// Set a value
    async fn set(&self, key: &str, value: Value) -> Result<(), SessionError>;

    /// Remove a value. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), SessionError>;

    /// Remove every value, keeping the session itself
    async fn flush(&self) -> Result<(), SessionError>;

    /// Write pending changes to the provider and refresh the last access time
    async fn persist(&self) -> Result<(), SessionError>;

    /// Like [`persist`](SessionStore::persist), but only while the session
    /// still exists in the provider. Returns whether anything was written.
    async fn persist_if_present(&self) -> Result<bool, SessionError>;
}
