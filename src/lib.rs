//! # salvo-session-manager
//!
//! Server-side session management for the Salvo web framework.
//!
//! A [`Manager`] issues opaque, unguessable session IDs, carries them in a
//! cookie (optionally a header or the URL query) and opens a key/value
//! [`Session`] for each request through a pluggable [`SessionProvider`].
//! A background loop expires sessions that stay idle past their max lifetime.
//!
//! ## Features
//!
//! - **Pluggable providers**: in-memory and Redis built in, custom providers
//!   registered by name
//! - **Safe release**: a session destroyed by one request is never brought
//!   back by another request still holding it
//! - **Session fixation defence**: malformed IDs are silently replaced and IDs
//!   can be regenerated after privilege changes
//! - **Self-rearming GC loop** that survives failed sweeps
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use salvo::prelude::*;
//! use salvo_session_manager::{Manager, SessionConfig, SessionDepotExt, SessionHandler};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SessionConfig::new("sid")
//!         .with_gc_lifetime(60)
//!         .with_max_lifetime(3600);
//!     let manager = Arc::new(Manager::new("memory", config).await.unwrap());
//!     manager.start_gc();
//!
//!     let router = Router::new()
//!         .hoop(SessionHandler::new(manager))
//!         .get(index);
//!
//!     let acceptor = TcpListener::new("127.0.0.1:5800").bind().await;
//!     Server::new(acceptor).serve(router).await;
//! }
//!
//! #[handler]
//! async fn index(depot: &mut Depot) -> String {
//!     let session = depot.session().unwrap();
//!     let views: i32 = session.get("views").await.unwrap_or(0);
//!     session.set("views", views + 1).await.unwrap();
//!     format!("views: {}", views + 1)
//! }
//! ```

pub mod config;
mod deadline;
pub mod error;
pub mod handler;
pub mod id;
pub mod manager;
pub mod provider;
pub mod registry;
pub mod session;
pub mod transport;

pub use config::{SameSite, SessionConfig};
pub use error::SessionError;
pub use handler::SessionHandler;
pub use id::SessionIdGenerator;
pub use manager::Manager;
pub use provider::{MemoryProvider, SessionProvider, SessionStore};
pub use registry::{register, ProviderFactory, ProviderRegistry};
pub use session::{Session, SessionData};
pub use transport::{CredentialOptions, CredentialSink, CredentialSource};

#[cfg(feature = "redis-store")]
pub use provider::{RedisProvider, RedisSettings};

/// Extension trait for Depot to easily access session
pub mod depot_ext;
pub use depot_ext::SessionDepotExt;
