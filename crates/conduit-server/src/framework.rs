//! The composition root.
//!
//! A [`Framework`] owns everything a request needs: the route table, global
//! middleware, the error handler, the managers and the lifecycle hooks. Each
//! request goes through [`Framework::handle`]:
//!
//! ```text
//! build Context → route lookup ──404/405──→ error handler
//!                      │
//!                      └─→ Chain(global + group + route) inside the recovery boundary
//!                                        │
//!                       take response ←──┘ → release Context
//! ```
//!
//! Registration happens through `&mut self` before serving. Routes, groups and
//! host scopes all end up in the same [`RouteTable`]; a group's prefix and
//! middleware are folded into each route when it is registered.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::ALLOW;
use http::HeaderValue;

use conduit_core::managers::{Managers, Metrics};
use conduit_core::plugin::PermissionSet;
use conduit_core::{CancellationToken, Context, ContextFactory, Error, Response};
use conduit_middleware::{
    allow_header, resolve_error, run_recovered, BoxedMiddleware, Chain, DefaultErrorHandler,
    ErrorHandler, Handler, Middleware,
};
use conduit_router::{join_paths, Lookup, MethodFilter, Route, RouteError, RouteMatch, RouteTable};

use crate::config::ServerConfig;
use crate::lifecycle::{Lifecycle, LifecycleResult};
use crate::plugin::{InstalledPlugin, Plugin, PluginError, PluginHost};

/// Gauge of requests currently inside [`Framework::handle`].
pub const IN_FLIGHT_REQUESTS: &str = "conduit_in_flight_requests";

/// What a route resolves to.
pub(crate) struct Endpoint {
    handler: Arc<dyn Handler>,
    middleware: Vec<BoxedMiddleware>,
}

/// Per-route registration options.
///
/// # Example
///
/// ```rust
/// use conduit_middleware::stages::Timeout;
/// use conduit_server::RouteOptions;
/// use std::time::Duration;
///
/// let options = RouteOptions::new()
///     .name("order")
///     .layer(Timeout::new(Duration::from_secs(2)));
/// ```
#[derive(Clone, Default)]
pub struct RouteOptions {
    name: Option<String>,
    middleware: Vec<BoxedMiddleware>,
}

impl RouteOptions {
    /// No name, no middleware.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the route for [`Framework::url_for`].
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Appends route-level middleware, innermost last.
    #[must_use]
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }
}

impl From<Vec<BoxedMiddleware>> for RouteOptions {
    fn from(middleware: Vec<BoxedMiddleware>) -> Self {
        Self {
            name: None,
            middleware,
        }
    }
}

impl fmt::Debug for RouteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteOptions")
            .field("name", &self.name)
            .field(
                "middleware",
                &self.middleware.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Prefix, host and middleware inherited by routes registered in a group.
#[derive(Clone, Default)]
pub(crate) struct Scope {
    prefix: String,
    host: Option<String>,
    middleware: Vec<BoxedMiddleware>,
}

impl Scope {
    fn nest(&self, prefix: &str, middleware: Vec<BoxedMiddleware>) -> Self {
        let mut nested = self.clone();
        nested.prefix = join_paths(&self.prefix, prefix);
        nested.middleware.extend(middleware);
        nested
    }
}

/// The application: routes, middleware, managers and lifecycle.
///
/// # Example
///
/// ```rust
/// use bytes::Bytes;
/// use conduit_middleware::handler_fn;
/// use conduit_server::Framework;
/// use http::StatusCode;
///
/// # tokio_test::block_on(async {
/// let mut app = Framework::default();
/// app.get("/items/:id", handler_fn(|ctx| Box::pin(async move {
///     let id = ctx.param("id").unwrap_or_default().to_string();
///     ctx.json(StatusCode::OK, &serde_json::json!({ "id": id }))
/// })));
///
/// let response = app
///     .handle(http::Request::get("/items/42").body(Bytes::new()).unwrap(), None)
///     .await;
/// assert_eq!(response.status(), StatusCode::OK);
/// # });
/// ```
pub struct Framework {
    config: ServerConfig,
    routes: RouteTable<Endpoint>,
    global: Vec<BoxedMiddleware>,
    error_handler: Arc<dyn ErrorHandler>,
    factory: ContextFactory,
    shutdown: CancellationToken,
    force: CancellationToken,
    lifecycle: Lifecycle,
    plugins: Vec<InstalledPlugin>,
    in_flight: AtomicUsize,
}

impl Default for Framework {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl fmt::Debug for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Framework")
            .field("config", &self.config)
            .field("routes", &self.routes.len())
            .field(
                "global",
                &self.global.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("lifecycle", &self.lifecycle)
            .field("plugins", &self.plugins)
            .finish_non_exhaustive()
    }
}

impl Framework {
    /// Creates an application with no routes and default managers.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let force = CancellationToken::new();
        let shutdown = force.child();
        let factory = ContextFactory::new(Arc::new(Managers::default()))
            .with_request_timeout(config.request_timeout())
            .with_shutdown(shutdown.clone())
            .with_force(force.clone());
        Self {
            config,
            routes: RouteTable::new(),
            global: Vec::new(),
            error_handler: Arc::new(DefaultErrorHandler),
            factory,
            shutdown,
            force,
            lifecycle: Lifecycle::new(),
            plugins: Vec::new(),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// The server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The shared managers.
    #[must_use]
    pub fn managers(&self) -> &Arc<Managers> {
        self.factory.managers()
    }

    /// The context factory requests are built with.
    #[must_use]
    pub fn context_factory(&self) -> &ContextFactory {
        &self.factory
    }

    /// Number of registered routes.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Requests currently being handled.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Replaces the managers.
    ///
    /// Plugins see the managers present when they were installed, so call
    /// this before [`Framework::plugin`].
    pub fn with_managers(&mut self, managers: impl Into<Arc<Managers>>) -> &mut Self {
        self.factory = ContextFactory::new(managers.into())
            .with_request_timeout(self.config.request_timeout())
            .with_shutdown(self.shutdown.clone())
            .with_force(self.force.clone());
        self
    }

    /// Sets the per-request deadline. `None` disables it.
    pub fn request_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.config.set_request_timeout(timeout);
        self.factory = self.factory.clone().with_request_timeout(timeout);
        self
    }

    /// Replaces the error handler every failed request is resolved by.
    pub fn error_handler(&mut self, handler: impl ErrorHandler) -> &mut Self {
        self.error_handler = Arc::new(handler);
        self
    }

    /// Appends middleware that wraps every route, outermost first.
    pub fn use_global(&mut self, middleware: impl Middleware) -> &mut Self {
        self.global.push(Arc::new(middleware));
        self
    }

    /// Global middleware names, outermost first.
    #[must_use]
    pub fn global_middleware(&self) -> Vec<&'static str> {
        self.global.iter().map(|m| m.name()).collect()
    }

    route_methods!();

    fn add(
        &mut self,
        method: MethodFilter,
        pattern: &str,
        handler: Arc<dyn Handler>,
        options: RouteOptions,
    ) -> &mut Self {
        self.register(&Scope::default(), method, pattern, handler, options);
        self
    }

    pub(crate) fn register(
        &mut self,
        scope: &Scope,
        method: MethodFilter,
        pattern: &str,
        handler: Arc<dyn Handler>,
        options: RouteOptions,
    ) {
        let path = join_paths(&scope.prefix, pattern);
        let mut middleware = scope.middleware.clone();
        middleware.extend(options.middleware);

        let label = method.to_string();
        let mut route = match Route::new(method, &path, Endpoint { handler, middleware }) {
            Ok(route) => route,
            Err(error) => panic!("invalid route `{path}`: {error}"),
        };
        if let Some(host) = &scope.host {
            route = route.with_host(host);
        }
        if let Some(name) = options.name {
            route = route.with_name(name);
        }

        if let Err(error) = self.routes.insert(route) {
            panic!("cannot register `{label} {path}`: {error}");
        }
        tracing::debug!(method = %label, pattern = %path, host = ?scope.host, "route registered");
    }

    /// Opens a group: routes registered through it get `prefix` prepended and
    /// `middleware` applied after the global middleware.
    pub fn group(&mut self, prefix: &str, middleware: Vec<BoxedMiddleware>) -> Group<'_> {
        let scope = Scope::default().nest(prefix, middleware);
        Group {
            framework: self,
            scope,
        }
    }

    /// Opens a group whose routes only match requests for `host`.
    ///
    /// Once a host has a route, its requests never fall back to the
    /// host-less routes.
    pub fn host(&mut self, host: &str) -> Group<'_> {
        let scope = Scope {
            host: Some(host.to_string()),
            ..Scope::default()
        };
        Group {
            framework: self,
            scope,
        }
    }

    /// Renders the path of the route registered under `name`.
    pub fn url_for(&self, name: &str, params: &[(&str, &str)]) -> Result<String, RouteError> {
        self.routes.url_for(name, params)
    }

    // ---- lifecycle ----

    /// Appends a startup hook.
    pub fn on_startup<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = LifecycleResult> + Send + 'static,
    {
        self.lifecycle.on_startup(hook);
        self
    }

    /// Appends a named startup hook.
    pub fn on_startup_named<F, Fut>(&mut self, name: impl Into<String>, hook: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = LifecycleResult> + Send + 'static,
    {
        self.lifecycle.on_startup_named(name, hook);
        self
    }

    /// Appends a shutdown hook.
    pub fn on_shutdown<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = LifecycleResult> + Send + 'static,
    {
        self.lifecycle.on_shutdown(hook);
        self
    }

    /// Appends a named shutdown hook.
    pub fn on_shutdown_named<F, Fut>(&mut self, name: impl Into<String>, hook: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = LifecycleResult> + Send + 'static,
    {
        self.lifecycle.on_shutdown_named(name, hook);
        self
    }

    /// The registered hooks.
    #[must_use]
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Runs the startup hooks. The listener calls this before accepting.
    pub async fn startup(&self) -> LifecycleResult {
        self.lifecycle.run_startup().await
    }

    /// Runs the shutdown hooks. The listener calls this after draining.
    pub async fn shutdown(&self) -> LifecycleResult {
        self.lifecycle.run_shutdown().await
    }

    /// Cancels every request context with [`CancelReason::Shutdown`].
    ///
    /// Handlers waiting in [`Context::until_cancelled`] return
    /// [`Error::Cancelled`]; chains that do not observe the token keep
    /// running until [`abort_in_flight`](Self::abort_in_flight).
    ///
    /// [`CancelReason::Shutdown`]: conduit_core::CancelReason::Shutdown
    pub fn begin_shutdown(&self) {
        if self.shutdown.cancel(conduit_core::CancelReason::Shutdown) {
            tracing::info!(in_flight = self.in_flight(), "cancelling request contexts");
        }
    }

    /// Aborts every in-flight request with [`Error::Cancelled`].
    pub fn abort_in_flight(&self) {
        if self.force.cancel(conduit_core::CancelReason::Forced) {
            tracing::warn!(in_flight = self.in_flight(), "aborting in-flight requests");
        }
    }

    // ---- plugins ----

    /// Installs `plugin` with the managers its permissions allow.
    pub fn plugin(&mut self, plugin: impl Plugin) -> Result<&mut Self, PluginError> {
        let name = plugin.name().to_string();
        if self.plugins.iter().any(|p| p.name == name) {
            return Err(PluginError::Duplicate(name));
        }

        let permissions = plugin.permissions();
        let mut host = PluginHost::new(self, &name, &permissions);
        plugin
            .install(&mut host)
            .map_err(|source| PluginError::Install {
                plugin: name.clone(),
                source,
            })?;

        tracing::info!(plugin = %name, permissions = ?permissions, "plugin installed");
        self.plugins.push(InstalledPlugin { name, permissions });
        Ok(self)
    }

    /// Installed plugin names, in installation order.
    pub fn plugins(&self) -> impl Iterator<Item = &str> {
        self.plugins.iter().map(|p| p.name.as_str())
    }

    /// The permissions an installed plugin declared.
    #[must_use]
    pub fn plugin_permissions(&self, name: &str) -> Option<&PermissionSet> {
        self.plugins
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.permissions)
    }

    // ---- request handling ----

    /// Runs one request through routing, the chain and the error handler.
    ///
    /// Always produces exactly one response. The context is released before
    /// this returns, whatever the outcome.
    pub async fn handle(
        &self,
        request: http::Request<Bytes>,
        remote_addr: Option<SocketAddr>,
    ) -> Response {
        let _in_flight = InFlight::enter(&self.in_flight, self.managers().metrics().as_ref());
        let mut ctx = self.factory.build(request, remote_addr);

        match self.routes.lookup(ctx.method(), ctx.host(), ctx.path()) {
            Lookup::Found(RouteMatch { route, params, .. }) => {
                ctx.set_route(route.pattern().as_str(), params);
                let endpoint = route.endpoint();
                let chain = Chain::new(
                    &self.global,
                    &endpoint.middleware,
                    Arc::clone(&endpoint.handler),
                );
                run_recovered(&chain, &mut ctx, self.error_handler.as_ref()).await;
            }
            Lookup::MethodNotAllowed { allowed } => {
                let allow = allow_header(&allowed);
                let error = Error::MethodNotAllowed {
                    method: ctx.method().clone(),
                    allowed,
                };
                resolve_error(&mut ctx, error, self.error_handler.as_ref()).await;
                if !ctx.response().headers().contains_key(ALLOW) {
                    if let Ok(value) = HeaderValue::from_str(&allow) {
                        ctx.response_mut().headers_mut().insert(ALLOW, value);
                    }
                }
            }
            Lookup::NotFound => {
                let error = Error::NotFound {
                    path: ctx.path().to_string(),
                };
                resolve_error(&mut ctx, error, self.error_handler.as_ref()).await;
            }
        }

        finish(ctx)
    }

    /// Answers a request that never reached routing, e.g. an oversized body.
    pub(crate) async fn reject(
        &self,
        parts: http::request::Parts,
        error: Error,
        remote_addr: Option<SocketAddr>,
    ) -> Response {
        let mut ctx = self
            .factory
            .build(http::Request::from_parts(parts, Bytes::new()), remote_addr);
        resolve_error(&mut ctx, error, self.error_handler.as_ref()).await;
        finish(ctx)
    }
}

fn finish(mut ctx: Context) -> Response {
    let response = ctx.take_response();
    ctx.release();
    response
}

/// Counts a request for the in-flight gauge while alive.
struct InFlight<'a> {
    count: &'a AtomicUsize,
    metrics: &'a dyn Metrics,
}

impl<'a> InFlight<'a> {
    fn enter(count: &'a AtomicUsize, metrics: &'a dyn Metrics) -> Self {
        let now = count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics.gauge(IN_FLIGHT_REQUESTS, now as f64, &[]);
        Self { count, metrics }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let now = self.count.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        self.metrics.gauge(IN_FLIGHT_REQUESTS, now as f64, &[]);
    }
}

/// Routes registered under a shared prefix, host and middleware.
///
/// # Example
///
/// ```rust
/// use conduit_middleware::handler_fn;
/// use conduit_middleware::stages::Authenticate;
/// use conduit_server::Framework;
/// use std::sync::Arc;
///
/// let mut app = Framework::default();
/// let mut api = app.group("/api", vec![Arc::new(Authenticate::required())]);
/// api.get("/orders", handler_fn(|_ctx| Box::pin(async { Ok(()) })));
/// api.group("/admin", vec![]).delete("/orders/:id", handler_fn(|_ctx| Box::pin(async { Ok(()) })));
///
/// assert_eq!(app.route_count(), 2);
/// ```
pub struct Group<'f> {
    framework: &'f mut Framework,
    scope: Scope,
}

impl Group<'_> {
    route_methods!();

    fn add(
        &mut self,
        method: MethodFilter,
        pattern: &str,
        handler: Arc<dyn Handler>,
        options: RouteOptions,
    ) -> &mut Self {
        self.framework
            .register(&self.scope, method, pattern, handler, options);
        self
    }

    /// Adds middleware for routes registered after this call.
    pub fn layer(&mut self, middleware: impl Middleware) -> &mut Self {
        self.scope.middleware.push(Arc::new(middleware));
        self
    }

    /// Opens a nested group inheriting this group's prefix, host and middleware.
    pub fn group(&mut self, prefix: &str, middleware: Vec<BoxedMiddleware>) -> Group<'_> {
        let scope = self.scope.nest(prefix, middleware);
        Group {
            framework: self.framework,
            scope,
        }
    }

    /// The path prefix of this group.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.scope.prefix
    }
}

impl fmt::Debug for Group<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("prefix", &self.scope.prefix)
            .field("host", &self.scope.host)
            .field("middleware", &self.scope.middleware.len())
            .finish_non_exhaustive()
    }
}
