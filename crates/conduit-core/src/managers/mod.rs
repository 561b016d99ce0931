//! Process-wide managers.
//!
//! Each manager is a capability trait with one or more concrete variants.
//! [`Managers`] holds the variants chosen at startup and is shared by every
//! request context through an `Arc`; a context never owns a manager.
//!
//! | Capability | Trait | Bundled variants |
//! |---|---|---|
//! | Database | [`Database`] | none |
//! | Cache | [`Cache`] | [`MemoryCache`], [`FileCache`] |
//! | Sessions | [`SessionStore`] | [`CacheSessionStore`] |
//! | Security | [`Security`] | [`StaticSecurity`] |
//! | i18n | [`Translator`] | [`StaticTranslator`] |
//! | Files | [`FileManager`] | |
//! | Metrics | [`Metrics`] | [`NoopMetrics`] |

mod cache;
mod database;
mod file_cache;
mod files;
mod i18n;
mod metrics;
mod security;
mod session;

use std::fmt;
use std::sync::Arc;

pub use cache::{Cache, MemoryCache};
pub use database::{Database, Row};
pub use file_cache::FileCache;
pub use files::FileManager;
pub use i18n::{preferred_locale, StaticTranslator, Translator};
pub use metrics::{Labels, Metrics, NoopMetrics};
pub use security::{Principal, Security, StaticSecurity, API_KEY_HEADER};
pub use session::{CacheSessionStore, Session, SessionStore};

use crate::error::{Error, Result};

/// The manager set shared by all requests.
///
/// Every capability except metrics is optional. Accessors that start with
/// `require_` turn an unconfigured capability into an [`Error::Resource`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use conduit_core::managers::{Managers, MemoryCache, StaticTranslator};
///
/// let managers = Managers::builder()
///     .cache(MemoryCache::new())
///     .translator(StaticTranslator::new("en"))
///     .build();
///
/// assert!(managers.cache().is_some());
/// assert!(managers.require_database().is_err());
/// ```
#[derive(Clone)]
pub struct Managers {
    database: Option<Arc<dyn Database>>,
    cache: Option<Arc<dyn Cache>>,
    sessions: Option<Arc<dyn SessionStore>>,
    security: Option<Arc<dyn Security>>,
    translator: Option<Arc<dyn Translator>>,
    files: Option<Arc<FileManager>>,
    metrics: Arc<dyn Metrics>,
}

impl Default for Managers {
    fn default() -> Self {
        Self {
            database: None,
            cache: None,
            sessions: None,
            security: None,
            translator: None,
            files: None,
            metrics: Arc::new(NoopMetrics),
        }
    }
}

impl fmt::Debug for Managers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Managers")
            .field("database", &self.database.is_some())
            .field("cache", &self.cache.is_some())
            .field("sessions", &self.sessions.is_some())
            .field("security", &self.security.is_some())
            .field("translator", &self.translator.is_some())
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}

impl Managers {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> ManagersBuilder {
        ManagersBuilder::default()
    }

    /// The database, if configured.
    pub fn database(&self) -> Option<&Arc<dyn Database>> {
        self.database.as_ref()
    }

    /// The cache, if configured.
    pub fn cache(&self) -> Option<&Arc<dyn Cache>> {
        self.cache.as_ref()
    }

    /// The session store, if configured.
    pub fn sessions(&self) -> Option<&Arc<dyn SessionStore>> {
        self.sessions.as_ref()
    }

    /// The security manager, if configured.
    pub fn security(&self) -> Option<&Arc<dyn Security>> {
        self.security.as_ref()
    }

    /// The translator, if configured.
    pub fn translator(&self) -> Option<&Arc<dyn Translator>> {
        self.translator.as_ref()
    }

    /// The file manager, if configured.
    pub fn files(&self) -> Option<&Arc<FileManager>> {
        self.files.as_ref()
    }

    /// The metrics sink. Always present.
    pub fn metrics(&self) -> &Arc<dyn Metrics> {
        &self.metrics
    }

    /// The database, or an error if none is configured.
    pub fn require_database(&self) -> Result<&dyn Database> {
        self.database.as_deref().ok_or_else(|| missing("database"))
    }

    /// The cache, or an error if none is configured.
    pub fn require_cache(&self) -> Result<&dyn Cache> {
        self.cache.as_deref().ok_or_else(|| missing("cache"))
    }

    /// The session store, or an error if none is configured.
    pub fn require_sessions(&self) -> Result<&dyn SessionStore> {
        self.sessions.as_deref().ok_or_else(|| missing("sessions"))
    }

    /// The security manager, or an error if none is configured.
    pub fn require_security(&self) -> Result<&dyn Security> {
        self.security.as_deref().ok_or_else(|| missing("security"))
    }

    /// The file manager, or an error if none is configured.
    pub fn require_files(&self) -> Result<&FileManager> {
        self.files.as_deref().ok_or_else(|| missing("files"))
    }
}

fn missing(manager: &'static str) -> Error {
    Error::resource(manager, "not configured")
}

/// Builder for [`Managers`].
#[derive(Default)]
pub struct ManagersBuilder {
    inner: Managers,
}

impl ManagersBuilder {
    /// Sets the database.
    #[must_use]
    pub fn database(mut self, database: impl Database + 'static) -> Self {
        self.inner.database = Some(Arc::new(database));
        self
    }

    /// Sets the cache.
    #[must_use]
    pub fn cache(self, cache: impl Cache + 'static) -> Self {
        self.shared_cache(Arc::new(cache))
    }

    /// Sets a cache that is also used elsewhere, e.g. by a session store.
    #[must_use]
    pub fn shared_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.inner.cache = Some(cache);
        self
    }

    /// Sets the session store.
    #[must_use]
    pub fn sessions(mut self, sessions: impl SessionStore + 'static) -> Self {
        self.inner.sessions = Some(Arc::new(sessions));
        self
    }

    /// Sets the security manager.
    #[must_use]
    pub fn security(mut self, security: impl Security + 'static) -> Self {
        self.inner.security = Some(Arc::new(security));
        self
    }

    /// Sets the translator.
    #[must_use]
    pub fn translator(mut self, translator: impl Translator + 'static) -> Self {
        self.inner.translator = Some(Arc::new(translator));
        self
    }

    /// Sets the file manager.
    #[must_use]
    pub fn files(mut self, files: FileManager) -> Self {
        self.inner.files = Some(Arc::new(files));
        self
    }

    /// Sets the metrics sink.
    #[must_use]
    pub fn metrics(mut self, metrics: impl Metrics + 'static) -> Self {
        self.inner.metrics = Arc::new(metrics);
        self
    }

    /// Finishes the manager set.
    #[must_use]
    pub fn build(self) -> Managers {
        self.inner
    }
}

impl fmt::Debug for ManagersBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}
