//! Startup and shutdown hooks.
//!
//! Hooks are appended during registration and run sequentially in
//! registration order. Each phase runs at most once per [`Lifecycle`]:
//!
//! - **Startup**: the first failing hook aborts the phase; later hooks do not run
//! - **Shutdown**: every hook runs; failures are collected into one error
//!
//! # Example
//!
//! ```rust
//! use conduit_server::Lifecycle;
//!
//! # tokio_test::block_on(async {
//! let mut lifecycle = Lifecycle::new();
//! lifecycle.on_startup(|| async { Ok(()) });
//! lifecycle.on_shutdown_named("flush", || async { Ok(()) });
//!
//! lifecycle.run_startup().await.unwrap();
//! lifecycle.run_shutdown().await.unwrap();
//! # });
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use conduit_core::BoxFuture;
use thiserror::Error;

/// Lifecycle hook failures.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// A startup hook failed; the remaining hooks were skipped.
    #[error("startup hook `{hook}` failed: {source}")]
    StartupFailed {
        /// The failing hook.
        hook: String,
        /// What it returned.
        #[source]
        source: Box<LifecycleError>,
    },

    /// One or more shutdown hooks failed.
    #[error("{} shutdown hook(s) failed: {}", .failures.len(), summarize(.failures))]
    ShutdownFailed {
        /// `(hook, error)` pairs in execution order.
        failures: Vec<(String, LifecycleError)>,
    },

    /// Error raised by a hook body.
    #[error("{message}")]
    Hook {
        /// Description.
        message: String,
        /// Underlying cause.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

fn summarize(failures: &[(String, LifecycleError)]) -> String {
    failures
        .iter()
        .map(|(hook, error)| format!("{hook}: {error}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl LifecycleError {
    /// A hook error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self::Hook {
            message: message.into(),
            source: None,
        }
    }

    /// A hook error wrapping `source`.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Hook {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for lifecycle hooks.
pub type LifecycleResult<T = ()> = Result<T, LifecycleError>;

type Hook = Arc<dyn Fn() -> BoxFuture<'static, LifecycleResult> + Send + Sync>;

/// Ordered startup and shutdown hooks.
#[derive(Default)]
pub struct Lifecycle {
    startup: Vec<(String, Hook)>,
    shutdown: Vec<(String, Hook)>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("startup_hooks", &self.startup.len())
            .field("shutdown_hooks", &self.shutdown.len())
            .field("started", &self.started.load(Ordering::SeqCst))
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish()
    }
}

fn boxed<F, Fut>(hook: F) -> Hook
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LifecycleResult> + Send + 'static,
{
    Arc::new(move || Box::pin(hook()))
}

impl Lifecycle {
    /// Creates an empty lifecycle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a startup hook named `startup_<n>`.
    pub fn on_startup<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LifecycleResult> + Send + 'static,
    {
        let name = format!("startup_{}", self.startup.len());
        self.on_startup_named(name, hook)
    }

    /// Appends a named startup hook.
    pub fn on_startup_named<F, Fut>(&mut self, name: impl Into<String>, hook: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LifecycleResult> + Send + 'static,
    {
        self.startup.push((name.into(), boxed(hook)));
        self
    }

    /// Appends a shutdown hook named `shutdown_<n>`.
    pub fn on_shutdown<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LifecycleResult> + Send + 'static,
    {
        let name = format!("shutdown_{}", self.shutdown.len());
        self.on_shutdown_named(name, hook)
    }

    /// Appends a named shutdown hook.
    pub fn on_shutdown_named<F, Fut>(&mut self, name: impl Into<String>, hook: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LifecycleResult> + Send + 'static,
    {
        self.shutdown.push((name.into(), boxed(hook)));
        self
    }

    /// Startup hook names in execution order.
    pub fn startup_hooks(&self) -> impl Iterator<Item = &str> {
        self.startup.iter().map(|(name, _)| name.as_str())
    }

    /// Shutdown hook names in execution order.
    pub fn shutdown_hooks(&self) -> impl Iterator<Item = &str> {
        self.shutdown.iter().map(|(name, _)| name.as_str())
    }

    /// Runs the startup hooks. Later calls do nothing.
    pub async fn run_startup(&self) -> LifecycleResult {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("startup hooks already ran");
            return Ok(());
        }

        for (name, hook) in &self.startup {
            tracing::debug!(hook = %name, "running startup hook");
            if let Err(error) = hook().await {
                tracing::error!(hook = %name, error = %error, "startup hook failed");
                return Err(LifecycleError::StartupFailed {
                    hook: name.clone(),
                    source: Box::new(error),
                });
            }
        }
        Ok(())
    }

    /// Runs every shutdown hook. Later calls do nothing.
    pub async fn run_shutdown(&self) -> LifecycleResult {
        if self.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!("shutdown hooks already ran");
            return Ok(());
        }

        let mut failures = Vec::new();
        for (name, hook) in &self.shutdown {
            tracing::debug!(hook = %name, "running shutdown hook");
            if let Err(error) = hook().await {
                tracing::error!(hook = %name, error = %error, "shutdown hook failed");
                failures.push((name.clone(), error));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(LifecycleError::ShutdownFailed { failures })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn journal() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn test_empty_lifecycle() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.run_startup().await.is_ok());
        assert!(lifecycle.run_shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn test_hooks_run_in_registration_order_once() {
        let log = journal();
        let mut lifecycle = Lifecycle::new();
        for name in ["db", "cache", "warmup"] {
            let log = Arc::clone(&log);
            lifecycle.on_startup_named(name, move || {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(format!("start:{name}"));
                    Ok(())
                }
            });
        }
        for name in ["cache", "db"] {
            let log = Arc::clone(&log);
            lifecycle.on_shutdown_named(name, move || {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(format!("stop:{name}"));
                    Ok(())
                }
            });
        }

        lifecycle.run_startup().await.unwrap();
        lifecycle.run_startup().await.unwrap();
        lifecycle.run_shutdown().await.unwrap();
        lifecycle.run_shutdown().await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["start:db", "start:cache", "start:warmup", "stop:cache", "stop:db"]
        );
    }

    #[tokio::test]
    async fn test_failing_startup_hook_aborts() {
        let log = journal();
        let mut lifecycle = Lifecycle::new();
        let first = Arc::clone(&log);
        lifecycle.on_startup(move || {
            let log = Arc::clone(&first);
            async move {
                log.lock().push("first".to_string());
                Ok(())
            }
        });
        lifecycle.on_startup_named("migrate", || async {
            Err(LifecycleError::new("schema mismatch"))
        });
        let third = Arc::clone(&log);
        lifecycle.on_startup(move || {
            let log = Arc::clone(&third);
            async move {
                log.lock().push("third".to_string());
                Ok(())
            }
        });

        let err = lifecycle.run_startup().await.unwrap_err();
        assert!(matches!(&err, LifecycleError::StartupFailed { hook, .. } if hook == "migrate"));
        assert!(err.to_string().contains("schema mismatch"));
        assert_eq!(*log.lock(), vec!["first"]);
    }

    #[tokio::test]
    async fn test_shutdown_failures_are_aggregated() {
        let log = journal();
        let mut lifecycle = Lifecycle::new();
        lifecycle.on_shutdown_named("a", || async { Err(LifecycleError::new("a broke")) });
        let b = Arc::clone(&log);
        lifecycle.on_shutdown_named("b", move || {
            let log = Arc::clone(&b);
            async move {
                log.lock().push("b".to_string());
                Ok(())
            }
        });
        lifecycle.on_shutdown_named("c", || async {
            Err(LifecycleError::with_source(
                "c broke",
                std::io::Error::new(std::io::ErrorKind::Other, "disk"),
            ))
        });

        let err = lifecycle.run_shutdown().await.unwrap_err();
        let LifecycleError::ShutdownFailed { failures } = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].0, "a");
        assert_eq!(failures[1].0, "c");
        assert_eq!(*log.lock(), vec!["b"]);
        assert!(err.to_string().starts_with("2 shutdown hook(s) failed"));
    }

    #[test]
    fn test_default_hook_names() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.on_startup(|| async { Ok(()) });
        lifecycle.on_startup(|| async { Ok(()) });
        lifecycle.on_shutdown(|| async { Ok(()) });
        assert_eq!(
            lifecycle.startup_hooks().collect::<Vec<_>>(),
            vec!["startup_0", "startup_1"]
        );
        assert_eq!(lifecycle.shutdown_hooks().collect::<Vec<_>>(), vec!["shutdown_0"]);
    }
}
