//! Building an application from [`ConduitConfig`].
//!
//! ```text
//! validate → telemetry (logging, recorder) → managers → Framework + stages → /metrics
//! ```
//!
//! [`bootstrap`] is the whole sequence. [`assemble`] stops short of the
//! process-wide telemetry installation, so it can run many times in one
//! process, e.g. in tests.

use std::sync::Arc;

use conduit_config::{CacheBackend, ConduitConfig, ConfigError};
use conduit_core::managers::{Cache, CacheSessionStore, FileCache, Managers, ManagersBuilder, MemoryCache};
use conduit_middleware::stages::{AccessLog, RequestIdHeader, Sessions};
use conduit_server::Framework;
use conduit_telemetry::{init_telemetry, FacadeMetrics, Telemetry, TelemetryError};
use thiserror::Error;

/// Errors raised while turning configuration into an application.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Logging or the metrics recorder could not be installed.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// A manager could not be built, e.g. the cache directory is unusable.
    #[error("failed to build {manager} manager: {source}")]
    Manager {
        /// Which manager.
        manager: &'static str,
        /// Underlying error.
        #[source]
        source: conduit_core::Error,
    },
}

/// Validates `config`, installs telemetry and assembles the application.
///
/// The returned [`Telemetry`] has already mounted its scrape endpoint on the
/// framework when metrics are served in-app.
///
/// # Errors
///
/// Fails on invalid configuration, when a global subscriber or recorder is
/// already installed, or when a manager cannot be built.
pub async fn bootstrap(config: &ConduitConfig) -> Result<(Framework, Telemetry), BootstrapError> {
    config.validate()?;
    let telemetry = init_telemetry(&config.telemetry)?;
    let mut app = assemble(config).await?;
    telemetry.mount(&mut app);
    Ok((app, telemetry))
}

/// Assembles the application without touching process-wide state.
pub async fn assemble(config: &ConduitConfig) -> Result<Framework, BootstrapError> {
    assemble_with(config, |managers| managers).await
}

/// Like [`assemble`], letting the caller add managers the configuration
/// does not describe, such as security or a database.
///
/// ```rust,ignore
/// let app = assemble_with(&config, |m| m.security(StaticSecurity::new())).await?;
/// ```
pub async fn assemble_with<F>(config: &ConduitConfig, extend: F) -> Result<Framework, BootstrapError>
where
    F: FnOnce(ManagersBuilder) -> ManagersBuilder,
{
    config.validate()?;
    let managers = extend(managers(config).await?).build();

    let mut app = Framework::new(config.server.to_server_config());
    app.with_managers(managers)
        .use_global(RequestIdHeader::new())
        .use_global(AccessLog::new());

    if config.session.enabled {
        app.use_global(
            Sessions::new()
                .cookie_name(config.session.cookie_name.clone())
                .secure(config.session.secure),
        );
    }

    tracing::debug!(
        cache = ?config.cache.backend,
        sessions = config.session.enabled,
        global = ?app.global_middleware(),
        "application assembled"
    );
    Ok(app)
}

/// The manager set described by `config`.
///
/// The session store shares the cache instance, so session entries count
/// against the cache's entry limit.
pub async fn managers(config: &ConduitConfig) -> Result<ManagersBuilder, BootstrapError> {
    let mut builder = Managers::builder();

    if config.telemetry.metrics.enabled {
        builder = builder.metrics(FacadeMetrics::new());
    }

    if let Some(cache) = cache(config).await? {
        if config.session.enabled {
            builder = builder.sessions(
                CacheSessionStore::new(Arc::clone(&cache)).with_ttl(config.session.ttl()),
            );
        }
        builder = builder.shared_cache(cache);
    }

    Ok(builder)
}

async fn cache(config: &ConduitConfig) -> Result<Option<Arc<dyn Cache>>, BootstrapError> {
    let section = &config.cache;
    let cache: Arc<dyn Cache> = match section.backend {
        CacheBackend::Disabled => return Ok(None),
        CacheBackend::Memory => {
            let mut cache = MemoryCache::new().with_max_entries(section.max_entries);
            if let Some(ttl) = section.default_ttl() {
                cache = cache.with_default_ttl(ttl);
            }
            Arc::new(cache)
        }
        CacheBackend::File => {
            let dir = section.dir.clone().ok_or_else(|| {
                ConfigError::invalid_value("cache.dir", "required when backend is `file`")
            })?;
            let mut cache = FileCache::open(dir)
                .await
                .map_err(|source| BootstrapError::Manager {
                    manager: "cache",
                    source,
                })?;
            if let Some(ttl) = section.default_ttl() {
                cache = cache.with_default_ttl(ttl);
            }
            Arc::new(cache)
        }
    };
    Ok(Some(cache))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_managers() {
        let managers = managers(&ConduitConfig::default()).await.unwrap().build();
        assert!(managers.cache().is_some());
        assert!(managers.sessions().is_none());
    }

    #[tokio::test]
    async fn test_disabled_cache() {
        let mut config = ConduitConfig::default();
        config.cache.backend = CacheBackend::Disabled;
        let managers = managers(&config).await.unwrap().build();
        assert!(managers.cache().is_none());
    }

    #[tokio::test]
    async fn test_sessions_share_the_cache() {
        let mut config = ConduitConfig::default();
        config.session.enabled = true;
        let managers = managers(&config).await.unwrap().build();
        assert!(managers.cache().is_some());
        assert!(managers.sessions().is_some());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_building() {
        let mut config = ConduitConfig::default();
        config.session.enabled = true;
        config.cache.backend = CacheBackend::Disabled;
        assert!(matches!(
            assemble(&config).await,
            Err(BootstrapError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[tokio::test]
    async fn test_global_stack() {
        let app = assemble(&ConduitConfig::default()).await.unwrap();
        assert_eq!(app.global_middleware(), vec!["request_id", "access_log"]);

        let mut config = ConduitConfig::default();
        config.session.enabled = true;
        let app = assemble(&config).await.unwrap();
        assert_eq!(
            app.global_middleware(),
            vec!["request_id", "access_log", "sessions"]
        );
    }
}
