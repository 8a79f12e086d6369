//! Session provider implementations

mod memory;
mod traits;

pub use memory::{MemoryProvider, MemoryStore};
pub use traits::{SessionProvider, SessionStore};

#[cfg(feature = "redis-store")]
mod redis_provider;

#[cfg(feature = "redis-store")]
pub use redis_provider::{RedisProvider, RedisSettings, RedisStore};
