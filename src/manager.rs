//! Session lifecycle manager
//!
//! The [`Manager`] sits between the transport and one [`SessionProvider`]:
//! it validates incoming IDs, issues new ones, opens sessions through the
//! provider and runs the GC loop that expires idle sessions.
//!
//! Build one per server process and share it behind an `Arc`.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

use crate::config::SessionConfig;
use crate::deadline::with_deadline;
use crate::error::SessionError;
use crate::id::SessionIdGenerator;
use crate::provider::{SessionProvider, SessionStore};
use crate::registry::{self, ProviderRegistry};
use crate::session::Session;
use crate::transport::{CredentialOptions, CredentialSink, CredentialSource};

/// Fresh IDs are checked against the provider; give up after this many clashes
const MAX_ID_ATTEMPTS: usize = 3;

/// Session lifecycle manager
pub struct Manager {
    provider: Arc<dyn SessionProvider>,
    provider_name: String,
    config: SessionConfig,
    credential: Arc<CredentialOptions>,
    ids: SessionIdGenerator,
    gc_shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl Manager {
    /// Create a manager backed by a provider from the process-wide registry
    pub async fn new(provider_name: &str, config: SessionConfig) -> Result<Self, SessionError> {
        let provider = registry::instantiate(provider_name)?;
        Self::with_provider_box(provider_name, provider, config).await
    }

    /// Create a manager backed by a provider from `registry`
    pub async fn with_registry(
        registry: &ProviderRegistry,
        provider_name: &str,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let provider = registry.instantiate(provider_name)?;
        Self::with_provider_box(provider_name, provider, config).await
    }

    async fn with_provider_box(
        provider_name: &str,
        mut provider: Box<dyn SessionProvider>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let config = config.validated()?;
        provider
            .init(config.max_lifetime_duration(), &config.provider_config)
            .await?;

        tracing::info!(
            provider = provider_name,
            max_lifetime = config.max_lifetime,
            gc_lifetime = config.gc_lifetime,
            "Session manager ready"
        );

        Ok(Self {
            provider: Arc::from(provider),
            provider_name: provider_name.to_string(),
            credential: Arc::new(config.credential_options()),
            ids: SessionIdGenerator::new(config.session_id_length, config.session_id_prefix.clone()),
            config,
            gc_shutdown: Mutex::new(None),
        })
    }

    /// The frozen configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The provider, for administrative access
    pub fn provider(&self) -> &Arc<dyn SessionProvider> {
        &self.provider
    }

    /// Name the provider was registered under
    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    /// Read and validate the client's session ID
    ///
    /// A malformed ID is treated exactly like a missing one.
    pub fn read_credential<R>(&self, source: &R) -> Option<String>
    where
        R: CredentialSource + ?Sized,
    {
        let candidate = source.read_credential(&self.credential)?;
        if self.ids.is_well_formed(&candidate) {
            Some(candidate)
        } else {
            tracing::debug!("Ignoring malformed session id");
            None
        }
    }

    /// Open the client's session, or start a new one
    pub async fn session_start<R, W>(&self, source: &R, sink: &mut W) -> Result<Session, SessionError>
    where
        R: CredentialSource + Sync + ?Sized,
        W: CredentialSink + Send + ?Sized,
    {
        let candidate = self.read_credential(source);
        self.session_start_with(candidate, sink).await
    }

    /// Open the session for an already validated candidate ID
    ///
    /// A new ID is only written to `sink` when one had to be issued.
    pub async fn session_start_with<W>(
        &self,
        candidate: Option<String>,
        sink: &mut W,
    ) -> Result<Session, SessionError>
    where
        W: CredentialSink + Send + ?Sized,
    {
        if let Some(sid) = candidate {
            let store = self
                .call("session_start", self.provider.read(&sid))
                .await?;
            return Ok(self.wrap(store, false));
        }

        let sid = self.fresh_id("session_start").await?;
        let store = self.open_fresh("session_start", &sid).await?;
        tracing::debug!(sid = %sid, "New session started");

        if self.credential.writes_credential() {
            sink.write_credential(&sid, &self.credential);
        }
        Ok(self.wrap(store, true))
    }

    /// Destroy the client's session and clear its credential
    pub async fn session_destroy<R, W>(&self, source: &R, sink: &mut W) -> Result<(), SessionError>
    where
        R: CredentialSource + Sync + ?Sized,
        W: CredentialSink + Send + ?Sized,
    {
        match self.read_credential(source) {
            Some(sid) => self.session_destroy_id(&sid, sink).await,
            None => Ok(()),
        }
    }

    /// Destroy the session `sid` and clear the client's credential
    pub async fn session_destroy_id<W>(&self, sid: &str, sink: &mut W) -> Result<(), SessionError>
    where
        W: CredentialSink + Send + ?Sized,
    {
        self.call("session_destroy", self.provider.destroy(sid))
            .await?;
        tracing::debug!(sid = %sid, "Session destroyed");

        if self.credential.writes_credential() {
            sink.clear_credential(&self.credential);
        }
        Ok(())
    }

    /// Move the client's session to a new ID, keeping its values
    pub async fn session_regenerate_id<R, W>(
        &self,
        source: &R,
        sink: &mut W,
    ) -> Result<Session, SessionError>
    where
        R: CredentialSource + Sync + ?Sized,
        W: CredentialSink + Send + ?Sized,
    {
        let old = self.read_credential(source);
        self.regenerate_from(old.as_deref(), sink).await
    }

    /// Move a live session to a new ID
    ///
    /// Pending writes on `session` are persisted first, unless the session was
    /// destroyed in the meantime. `session` must not be used afterwards.
    pub async fn regenerate_session<W>(
        &self,
        session: &Session,
        sink: &mut W,
    ) -> Result<Session, SessionError>
    where
        W: CredentialSink + Send + ?Sized,
    {
        session
            .persist_if_present()
            .await
            .map_err(|e| e.during("session_regenerate_id"))?;
        self.regenerate_from(Some(session.id()), sink).await
    }

    async fn regenerate_from<W>(&self, old: Option<&str>, sink: &mut W) -> Result<Session, SessionError>
    where
        W: CredentialSink + Send + ?Sized,
    {
        let sid = self.fresh_id("session_regenerate_id").await?;
        let store = match old {
            Some(old) => {
                self.call("session_regenerate_id", self.provider.regenerate(old, &sid))
                    .await?
            }
            None => self.open_fresh("session_regenerate_id", &sid).await?,
        };
        tracing::debug!(sid = %sid, "Session id regenerated");

        if self.credential.writes_credential() {
            sink.write_credential(&sid, &self.credential);
        }
        Ok(self.wrap(store, true))
    }

    /// Open a session by ID, bypassing the transport
    pub async fn get_session_store(&self, sid: &str) -> Result<Session, SessionError> {
        let store = self
            .call("get_session_store", self.provider.read(sid))
            .await?;
        Ok(self.wrap(store, false))
    }

    /// Number of sessions the provider tracks
    pub async fn session_count(&self) -> Result<usize, SessionError> {
        self.call("session_count", self.provider.all()).await
    }

    /// Run a single GC sweep
    pub async fn gc(&self) -> Result<(), SessionError> {
        self.call("gc", self.provider.gc()).await
    }

    /// Start the background GC loop on the current tokio runtime
    ///
    /// Sweeps immediately, then every `gc_lifetime` seconds until
    /// [`destroy`](Manager::destroy) or drop. A failed sweep is logged and the
    /// loop carries on. Calling this while the loop runs does nothing.
    pub fn start_gc(&self) {
        let mut slot = self.gc_shutdown.lock();
        if slot.is_some() {
            tracing::debug!("Session GC loop already running");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        *slot = Some(shutdown_tx);

        let provider = Arc::clone(&self.provider);
        let period = self.config.gc_interval();
        let deadline = self.config.operation_timeout();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = with_deadline(deadline, "gc", provider.gc()).await {
                            tracing::warn!("Session GC sweep failed: {}", e);
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::debug!("Session GC loop stopped");
                        break;
                    }
                }
            }
        });
    }

    /// Whether the GC loop has been started and not stopped
    pub fn gc_running(&self) -> bool {
        self.gc_shutdown.lock().is_some()
    }

    /// Stop the GC loop and close the provider
    pub async fn destroy(&self) -> Result<(), SessionError> {
        self.stop_gc();
        self.call("destroy", self.provider.close()).await?;
        tracing::info!(provider = %self.provider_name, "Session manager destroyed");
        Ok(())
    }

    fn stop_gc(&self) {
        if let Some(shutdown) = self.gc_shutdown.lock().take() {
            // the loop may already be gone
            let _ = shutdown.send(());
        }
    }

    async fn fresh_id(&self, operation: &'static str) -> Result<String, SessionError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let sid = self.ids.generate().map_err(|e| e.during(operation))?;
            if !self.call(operation, self.provider.exist(&sid)).await? {
                return Ok(sid);
            }
            tracing::warn!("Generated session id already in use, retrying");
        }
        Err(SessionError::StoreError("could not allocate a unique session id".to_string())
            .during(operation))
    }

    /// Open a newly issued ID and store it right away
    ///
    /// Later releases only update sessions that exist, so a provider that
    /// defers writes until the first persist must see this one.
    async fn open_fresh(
        &self,
        operation: &'static str,
        sid: &str,
    ) -> Result<Box<dyn SessionStore>, SessionError> {
        let store = self.call(operation, self.provider.read(sid)).await?;
        self.call(operation, store.persist()).await?;
        Ok(store)
    }

    async fn call<T, F>(&self, operation: &'static str, fut: F) -> Result<T, SessionError>
    where
        F: std::future::Future<Output = Result<T, SessionError>>,
    {
        with_deadline(self.config.operation_timeout(), operation, fut)
            .await
            .map_err(|e| e.during(operation))
    }

    fn wrap(&self, store: Box<dyn SessionStore>, is_new: bool) -> Session {
        Session::new(
            store,
            Arc::clone(&self.credential),
            self.config.operation_timeout(),
            is_new,
        )
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.stop_gc();
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("provider", &self.provider_name)
            .field("config", &self.config)
            .field("gc_running", &self.gc_running())
            .finish()
    }
}
