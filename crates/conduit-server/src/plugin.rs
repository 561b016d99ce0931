//! Plugins.
//!
//! A plugin declares the manager [`Permission`](conduit_core::plugin::Permission)s
//! it needs and installs itself through a [`PluginHost`]. The host hands it a
//! [`ScopedManagers`] view holding only what was declared, plus the same
//! registration surface the framework has.
//!
//! ```rust
//! use conduit_core::plugin::{Permission, PermissionSet};
//! use conduit_middleware::handler_fn;
//! use conduit_server::{Framework, Plugin, PluginHost};
//! use http::StatusCode;
//!
//! struct Status;
//!
//! impl Plugin for Status {
//!     fn name(&self) -> &str {
//!         "status"
//!     }
//!
//!     fn permissions(&self) -> PermissionSet {
//!         PermissionSet::none().with(Permission::Metrics)
//!     }
//!
//!     fn install(&self, host: &mut PluginHost<'_>) -> conduit_core::Result<()> {
//!         host.managers().metrics()?;
//!         host.get("/status", handler_fn(|ctx| Box::pin(async move {
//!             ctx.text(StatusCode::OK, "up");
//!             Ok(())
//!         })));
//!         Ok(())
//!     }
//! }
//!
//! let mut app = Framework::default();
//! app.plugin(Status).unwrap();
//! assert_eq!(app.plugins().collect::<Vec<_>>(), vec!["status"]);
//! ```

use std::future::Future;
use std::sync::Arc;

use conduit_core::plugin::{PermissionSet, ScopedManagers};
use conduit_middleware::{BoxedMiddleware, Handler, Middleware};
use conduit_router::MethodFilter;
use thiserror::Error;

use crate::framework::{Framework, Group, RouteOptions, Scope};
use crate::lifecycle::LifecycleResult;

/// Plugin installation failures.
#[derive(Error, Debug)]
pub enum PluginError {
    /// A plugin with this name is already installed.
    #[error("plugin `{0}` is already installed")]
    Duplicate(String),

    /// The plugin's `install` returned an error.
    #[error("plugin `{plugin}` failed to install: {source}")]
    Install {
        /// Plugin name.
        plugin: String,
        /// What `install` returned.
        #[source]
        source: conduit_core::Error,
    },
}

/// An extension installed into a [`Framework`].
pub trait Plugin: Send + Sync + 'static {
    /// Unique name.
    fn name(&self) -> &str;

    /// Managers the plugin may reach. Defaults to none.
    fn permissions(&self) -> PermissionSet {
        PermissionSet::none()
    }

    /// Registers the plugin's routes, middleware and hooks.
    fn install(&self, host: &mut PluginHost<'_>) -> conduit_core::Result<()>;
}

#[derive(Debug, Clone)]
pub(crate) struct InstalledPlugin {
    pub(crate) name: String,
    pub(crate) permissions: PermissionSet,
}

/// What a plugin sees while installing.
pub struct PluginHost<'f> {
    framework: &'f mut Framework,
    plugin: String,
    managers: ScopedManagers,
}

impl<'f> PluginHost<'f> {
    pub(crate) fn new(framework: &'f mut Framework, plugin: &str, permissions: &PermissionSet) -> Self {
        let managers = ScopedManagers::new(framework.managers(), permissions);
        Self {
            framework,
            plugin: plugin.to_string(),
            managers,
        }
    }

    /// The plugin being installed.
    #[must_use]
    pub fn plugin_name(&self) -> &str {
        &self.plugin
    }

    /// The managers this plugin was granted.
    #[must_use]
    pub fn managers(&self) -> &ScopedManagers {
        &self.managers
    }

    route_methods!();

    fn add(
        &mut self,
        method: MethodFilter,
        pattern: &str,
        handler: Arc<dyn Handler>,
        options: RouteOptions,
    ) -> &mut Self {
        self.framework
            .register(&Scope::default(), method, pattern, handler, options);
        self
    }

    /// Opens a route group on the framework.
    pub fn group(&mut self, prefix: &str, middleware: Vec<BoxedMiddleware>) -> Group<'_> {
        self.framework.group(prefix, middleware)
    }

    /// Appends global middleware.
    pub fn use_global(&mut self, middleware: impl Middleware) -> &mut Self {
        self.framework.use_global(middleware);
        self
    }

    /// Appends a startup hook named `<plugin>:<name>`.
    pub fn on_startup<F, Fut>(&mut self, name: &str, hook: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LifecycleResult> + Send + 'static,
    {
        let name = format!("{}:{name}", self.plugin);
        self.framework.on_startup_named(name, hook);
        self
    }

    /// Appends a shutdown hook named `<plugin>:<name>`.
    pub fn on_shutdown<F, Fut>(&mut self, name: &str, hook: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LifecycleResult> + Send + 'static,
    {
        let name = format!("{}:{name}", self.plugin);
        self.framework.on_shutdown_named(name, hook);
        self
    }
}

impl std::fmt::Debug for PluginHost<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHost")
            .field("plugin", &self.plugin)
            .field("managers", &self.managers)
            .finish_non_exhaustive()
    }
}
