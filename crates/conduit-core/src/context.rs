//! Per-request context.
//!
//! A [`Context`] is built by the [`ContextFactory`] when a request arrives and
//! is exclusively borrowed by the middleware chain until the response is
//! produced. It carries the parsed request, the buffered response, the
//! request's cancellation token and deadline, a request-scoped cache, and
//! shared handles to the process-wide [`Managers`].
//!
//! Request-scoped resources are torn down by [`Context::release`], which runs
//! at most once. If a context is dropped without being released (the client
//! went away, or the server aborted the request) the `Drop` impl performs the
//! same teardown.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use conduit_router::Params;
use http::header::{HeaderName, HOST};
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, Version};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs::File;

use crate::cancel::{CancelReason, CancellationToken};
use crate::error::{Error, Result};
use crate::logger::RequestLogger;
use crate::managers::{preferred_locale, Managers, Metrics, Principal};
use crate::request_id::RequestId;
use crate::response::{Response, ResponseState};
use crate::scoped::{ScopedCache, ScopedCacheStore};

const DEFAULT_LOCALE: &str = "en";

/// Handle to a file opened through [`Context::open_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(usize);

type ReleaseHook = Box<dyn FnOnce(RequestId) + Send>;

/// Per-request state flowing through the middleware chain.
pub struct Context {
    request_id: RequestId,
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,

    route: Option<String>,
    params: Params,

    started_at: Instant,
    deadline: Option<tokio::time::Instant>,
    cancel: CancellationToken,
    abort: CancellationToken,

    response: ResponseState,

    managers: Arc<Managers>,
    scoped: ScopedCache,
    scoped_store: ScopedCacheStore,
    locale: String,
    principal: Option<Principal>,
    files: Vec<Option<File>>,
    release_hooks: Vec<ReleaseHook>,
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    released: bool,
}

impl Context {
    // ---- request ----

    /// This request's identifier.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request target.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Request path, without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// HTTP version.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A request header as text, if present and valid.
    #[must_use]
    pub fn header(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The `Host` header, or the URI authority for absolute-form targets.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.header(HOST)
            .or_else(|| self.uri.authority().map(http::uri::Authority::as_str))
    }

    /// Peer address, when served over a socket.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Raw request body.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Deserializes the body as JSON.
    pub fn json_body<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::bad_request(format!("invalid JSON body: {e}")))
    }

    /// Deserializes the body as `application/x-www-form-urlencoded`.
    pub fn form<T: DeserializeOwned>(&self) -> Result<T> {
        serde_urlencoded::from_bytes(&self.body)
            .map_err(|e| Error::bad_request(format!("invalid form body: {e}")))
    }

    /// Deserializes the query string.
    pub fn query<T: DeserializeOwned>(&self) -> Result<T> {
        serde_urlencoded::from_str(self.uri.query().unwrap_or(""))
            .map_err(|e| Error::bad_request(format!("invalid query string: {e}")))
    }

    /// One decoded query parameter; the first occurrence wins.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.uri.query()?;
        serde_urlencoded::from_str::<Vec<(String, String)>>(query)
            .ok()?
            .into_iter()
            .find_map(|(k, v)| (k == name).then_some(v))
    }

    // ---- routing ----

    /// Path parameters captured by the router.
    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// One path parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Pattern of the matched route.
    #[must_use]
    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    /// Records the matched route. Called by the framework after lookup.
    pub fn set_route(&mut self, pattern: impl Into<String>, params: Params) {
        self.route = Some(pattern.into());
        self.params = params;
    }

    // ---- response ----

    /// The buffered response.
    #[must_use]
    pub fn response(&self) -> &ResponseState {
        &self.response
    }

    /// The buffered response, mutably.
    pub fn response_mut(&mut self) -> &mut ResponseState {
        &mut self.response
    }

    /// Sets the response status.
    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.response.set_status(status);
        self
    }

    /// Sets a response header, replacing earlier values.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> &mut Self {
        self.response.headers_mut().insert(name, value);
        self
    }

    /// Writes a plain-text response.
    pub fn text(&mut self, status: StatusCode, body: impl Into<String>) {
        self.response.write(
            status,
            "text/plain; charset=utf-8",
            Bytes::from(body.into()),
        );
    }

    /// Writes an HTML response.
    pub fn html(&mut self, status: StatusCode, body: impl Into<String>) {
        self.response
            .write(status, "text/html; charset=utf-8", Bytes::from(body.into()));
    }

    /// Writes a JSON response.
    pub fn json<T: Serialize + ?Sized>(&mut self, status: StatusCode, value: &T) -> Result<()> {
        let body = serde_json::to_vec(value)
            .map_err(|e| Error::internal_with_source("serialize response", e))?;
        self.response
            .write(status, "application/json", Bytes::from(body));
        Ok(())
    }

    /// Writes raw bytes with the given content type.
    pub fn bytes(&mut self, status: StatusCode, content_type: &'static str, body: Bytes) {
        self.response.write(status, content_type, body);
    }

    /// True once a body has been written.
    #[must_use]
    pub fn is_written(&self) -> bool {
        self.response.is_written()
    }

    /// Moves the buffered response out, leaving an empty one behind.
    pub fn take_response(&mut self) -> Response {
        std::mem::take(&mut self.response).into_response()
    }

    // ---- managers and services ----

    /// The shared managers.
    #[must_use]
    pub fn managers(&self) -> &Managers {
        &self.managers
    }

    /// The metrics sink.
    #[must_use]
    pub fn metrics(&self) -> &dyn Metrics {
        self.managers.metrics().as_ref()
    }

    /// A logger that tags every event with this request's ID.
    #[must_use]
    pub fn log(&self) -> RequestLogger {
        RequestLogger::new(self.request_id)
    }

    /// This request's cache partition.
    #[must_use]
    pub fn scoped(&self) -> &ScopedCache {
        &self.scoped
    }

    /// The caller, once authenticated.
    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Records the authenticated caller.
    pub fn set_principal(&mut self, principal: Principal) {
        self.principal = Some(principal);
    }

    /// Negotiated locale.
    #[must_use]
    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Overrides the negotiated locale.
    pub fn set_locale(&mut self, locale: impl Into<String>) {
        self.locale = locale.into();
    }

    /// Translates `key` into the request locale, or returns the key itself.
    #[must_use]
    pub fn t(&self, key: &str) -> String {
        self.managers
            .translator()
            .and_then(|t| t.translate(&self.locale, key))
            .unwrap_or_else(|| key.to_string())
    }

    // ---- files ----

    /// Opens a file through the file manager; it is closed at release.
    pub async fn open_file(&mut self, relative: impl AsRef<Path>) -> Result<FileHandle> {
        let file = self.managers.require_files()?.open(relative).await?;
        Ok(self.store_file(file))
    }

    /// Creates a file through the file manager; it is closed at release.
    pub async fn create_file(&mut self, relative: impl AsRef<Path>) -> Result<FileHandle> {
        let file = self.managers.require_files()?.create(relative).await?;
        Ok(self.store_file(file))
    }

    fn store_file(&mut self, file: File) -> FileHandle {
        if let Some(slot) = self.files.iter().position(Option::is_none) {
            self.files[slot] = Some(file);
            return FileHandle(slot);
        }
        self.files.push(Some(file));
        FileHandle(self.files.len() - 1)
    }

    /// A file opened by this request.
    pub fn file_mut(&mut self, handle: FileHandle) -> Option<&mut File> {
        self.files.get_mut(handle.0).and_then(Option::as_mut)
    }

    /// Closes a file early. Returns false if it was already closed.
    pub fn close_file(&mut self, handle: FileHandle) -> bool {
        self.files
            .get_mut(handle.0)
            .and_then(Option::take)
            .is_some()
    }

    /// Number of files currently open.
    #[must_use]
    pub fn open_files(&self) -> usize {
        self.files.iter().filter(|f| f.is_some()).count()
    }

    // ---- cancellation ----

    /// This request's cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The server's force token.
    ///
    /// [`cancellation`](Self::cancellation) also fires when a graceful
    /// shutdown starts, which cooperative code should honour. This one fires
    /// only when the drain window has run out and remaining work is aborted.
    #[must_use]
    pub fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }

    /// True once the request has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// When the request stops being worked on.
    #[must_use]
    pub fn deadline(&self) -> Option<tokio::time::Instant> {
        self.deadline
    }

    /// Tightens the deadline. A later deadline than the current one is ignored.
    pub fn shorten_deadline(&mut self, timeout: Duration) {
        let candidate = tokio::time::Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(current) if current <= candidate => current,
            _ => candidate,
        });
    }

    /// Replaces the deadline, typically to restore one saved before
    /// [`shorten_deadline`](Self::shorten_deadline).
    pub fn set_deadline(&mut self, deadline: Option<tokio::time::Instant>) {
        self.deadline = deadline;
    }

    /// When the context was created.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Time since the context was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Runs `fut` unless the request is cancelled or its deadline passes first.
    ///
    /// Use this around manager calls that may block for a long time:
    ///
    /// ```ignore
    /// let rows = ctx
    ///     .until_cancelled(db.query("SELECT * FROM orders", &[]))
    ///     .await??;
    /// ```
    pub fn until_cancelled<F: Future>(&self, fut: F) -> impl Future<Output = Result<F::Output>> {
        let token = self.cancel.clone();
        let deadline = self.deadline;
        let started_at = self.started_at;

        async move {
            tokio::select! {
                biased;
                () = token.cancelled() => Err(cancelled_error(token.reason(), started_at)),
                () = sleep_until(deadline) => {
                    token.cancel(CancelReason::Timeout);
                    Err(Error::Timeout { elapsed: started_at.elapsed() })
                }
                output = fut => Ok(output),
            }
        }
    }

    // ---- extensions ----

    /// Stores a typed value for later middleware or the handler.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.extensions
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok().map(|b| *b))
    }

    /// A stored typed value.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|b| b.downcast_ref::<T>())
    }

    /// A stored typed value, mutably.
    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.extensions
            .get_mut(&TypeId::of::<T>())
            .and_then(|b| b.downcast_mut::<T>())
    }

    /// Removes a stored typed value.
    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|b| b.downcast::<T>().ok().map(|b| *b))
    }

    // ---- teardown ----

    /// Registers a callback to run when the context is released.
    ///
    /// Callbacks run in reverse registration order, exactly once.
    pub fn on_release(&mut self, hook: impl FnOnce(RequestId) + Send + 'static) {
        if self.released {
            hook(self.request_id);
            return;
        }
        self.release_hooks.push(Box::new(hook));
    }

    /// True once [`release`](Self::release) has run.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Releases every request-scoped resource.
    ///
    /// Discards the scoped cache partition, closes open files, runs release
    /// callbacks and fires the cancellation token. Returns `false` when the
    /// context had already been released.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;

        while let Some(hook) = self.release_hooks.pop() {
            hook(self.request_id);
        }
        self.files.clear();
        self.scoped_store.discard(self.request_id);
        self.extensions.clear();
        self.cancel.cancel(CancelReason::Released);

        tracing::trace!(request_id = %self.request_id, "context released");
        true
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.cancel.cancel(CancelReason::ConnectionClosed);
        tracing::debug!(
            request_id = %self.request_id,
            reason = ?self.cancel.reason(),
            "request abandoned before completion"
        );
        self.release();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("route", &self.route)
            .field("params", &self.params)
            .field("response", &self.response)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

fn cancelled_error(reason: Option<CancelReason>, started_at: Instant) -> Error {
    match reason {
        Some(CancelReason::Timeout) => Error::Timeout {
            elapsed: started_at.elapsed(),
        },
        _ => Error::Cancelled,
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Builds a [`Context`] for each inbound request.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use bytes::Bytes;
/// use conduit_core::{ContextFactory, managers::Managers};
///
/// # tokio_test::block_on(async {
/// let factory = ContextFactory::new(Arc::new(Managers::default()))
///     .with_request_timeout(Some(Duration::from_secs(5)));
///
/// let request = http::Request::get("/items/42?expand=true")
///     .header("host", "shop.example.com")
///     .body(Bytes::new())
///     .unwrap();
/// let mut ctx = factory.build(request, None);
///
/// assert_eq!(ctx.path(), "/items/42");
/// assert_eq!(ctx.query_param("expand").as_deref(), Some("true"));
/// assert!(ctx.deadline().is_some());
/// assert!(ctx.release());
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct ContextFactory {
    managers: Arc<Managers>,
    scoped: ScopedCacheStore,
    shutdown: CancellationToken,
    force: CancellationToken,
    request_timeout: Option<Duration>,
}

impl ContextFactory {
    /// Creates a factory sharing `managers` with every context.
    #[must_use]
    pub fn new(managers: Arc<Managers>) -> Self {
        let force = CancellationToken::new();
        Self {
            managers,
            scoped: ScopedCacheStore::new(),
            shutdown: force.child(),
            force,
            request_timeout: None,
        }
    }

    /// Sets the per-request deadline.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Parents every context token on `shutdown`.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Hands every context `force` as its [`abort_token`](Context::abort_token).
    ///
    /// `force` should be an ancestor of the shutdown token, so forcing also
    /// cancels contexts that have not seen a graceful shutdown yet.
    #[must_use]
    pub fn with_force(mut self, force: CancellationToken) -> Self {
        self.force = force;
        self
    }

    /// The shared managers.
    #[must_use]
    pub fn managers(&self) -> &Arc<Managers> {
        &self.managers
    }

    /// The scoped cache registry.
    #[must_use]
    pub fn scoped_store(&self) -> &ScopedCacheStore {
        &self.scoped
    }

    /// The token every context token descends from.
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// The token that aborts in-flight work.
    #[must_use]
    pub fn force_token(&self) -> &CancellationToken {
        &self.force
    }

    /// Builds the context for one request.
    #[must_use]
    pub fn build(&self, request: http::Request<Bytes>, remote_addr: Option<SocketAddr>) -> Context {
        let (parts, body) = request.into_parts();
        let request_id = RequestId::new();

        let locale = parts
            .headers
            .get(http::header::ACCEPT_LANGUAGE)
            .and_then(|v| v.to_str().ok())
            .and_then(preferred_locale)
            .or_else(|| {
                self.managers
                    .translator()
                    .map(|t| t.default_locale().to_string())
            })
            .unwrap_or_else(|| DEFAULT_LOCALE.to_string());

        Context {
            request_id,
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
            remote_addr,
            route: None,
            params: Params::new(),
            started_at: Instant::now(),
            deadline: self
                .request_timeout
                .map(|t| tokio::time::Instant::now() + t),
            cancel: self.shutdown.child(),
            abort: self.force.clone(),
            response: ResponseState::default(),
            managers: Arc::clone(&self.managers),
            scoped: self.scoped.get_or_create(request_id),
            scoped_store: self.scoped.clone(),
            locale,
            principal: None,
            files: Vec::new(),
            release_hooks: Vec::new(),
            extensions: HashMap::new(),
            released: false,
        }
    }
}
