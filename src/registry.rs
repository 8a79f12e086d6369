//! Named session provider registry
//!
//! Providers are looked up by the name passed to [`crate::Manager::new`].
//! The process-wide registry starts with the built-in providers (`"memory"`,
//! and `"redis"` with the `redis-store` feature); applications add their own
//! with [`register`] during startup.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SessionError;
use crate::provider::{MemoryProvider, SessionProvider};

/// Builds an uninitialised provider
pub type ProviderFactory = Arc<dyn Fn() -> Box<dyn SessionProvider> + Send + Sync>;

static GLOBAL: Lazy<RwLock<ProviderRegistry>> =
    Lazy::new(|| RwLock::new(ProviderRegistry::with_builtin()));

/// A name to provider factory mapping
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in providers
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.factories.insert(
            "memory".to_string(),
            Arc::new(|| Box::new(MemoryProvider::new()) as Box<dyn SessionProvider>),
        );
        #[cfg(feature = "redis-store")]
        registry.factories.insert(
            "redis".to_string(),
            Arc::new(|| Box::new(crate::provider::RedisProvider::new()) as Box<dyn SessionProvider>),
        );
        registry
    }

    /// Register a provider factory under `name`
    pub fn register<F>(&mut self, name: &str, factory: F) -> Result<(), SessionError>
    where
        F: Fn() -> Box<dyn SessionProvider> + Send + Sync + 'static,
    {
        if self.factories.contains_key(name) {
            return Err(SessionError::DuplicateProvider(name.to_string()));
        }
        self.factories.insert(name.to_string(), Arc::new(factory));
        Ok(())
    }

    /// Check if a provider is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered provider names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build a fresh, uninitialised provider
    pub fn instantiate(&self, name: &str) -> Result<Box<dyn SessionProvider>, SessionError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| SessionError::ProviderNotRegistered(name.to_string()))
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

/// Register a provider in the process-wide registry
pub fn register<F>(name: &str, factory: F) -> Result<(), SessionError>
where
    F: Fn() -> Box<dyn SessionProvider> + Send + Sync + 'static,
{
    GLOBAL.write().register(name, factory)
}

/// Build a provider from the process-wide registry
pub fn instantiate(name: &str) -> Result<Box<dyn SessionProvider>, SessionError> {
    GLOBAL.read().instantiate(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_providers() {
        let registry = ProviderRegistry::with_builtin();
        assert!(registry.contains("memory"));
        #[cfg(feature = "redis-store")]
        assert!(registry.contains("redis"));
        assert!(registry.instantiate("memory").is_ok());
    }

    #[test]
    fn test_unknown_provider() {
        let registry = ProviderRegistry::new();
        let err = registry.instantiate("memory").err().unwrap();
        assert!(matches!(err, SessionError::ProviderNotRegistered(name) if name == "memory"));
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = ProviderRegistry::new();
        registry
            .register("custom", || Box::new(MemoryProvider::new()))
            .unwrap();
        let err = registry
            .register("custom", || Box::new(MemoryProvider::new()))
            .unwrap_err();
        assert!(matches!(err, SessionError::DuplicateProvider(_)));
        assert_eq!(registry.names(), vec!["custom".to_string()]);
    }

    #[test]
    fn test_global_register() {
        register("registry-test-memory", || Box::new(MemoryProvider::new())).unwrap();
        assert!(instantiate("registry-test-memory").is_ok());
        assert!(register("memory", || Box::new(MemoryProvider::new())).is_err());
    }
}
