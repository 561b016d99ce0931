//! In-memory client over [`Framework::handle`].

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use conduit_server::{Framework, LifecycleError};
use http::Method;
use serde::Serialize;

use crate::error::TestError;
use crate::request::{TestRequest, TestRequestBuilder};
use crate::response::TestResponse;

/// Sends requests straight into a [`Framework`] without binding a socket.
///
/// Requests pass through routing, global and route middleware, the error
/// handler and the recovery boundary exactly as they would over TCP. The
/// listener-only behavior (body limit, connection cap) is not involved.
///
/// ```
/// use conduit_middleware::handler_fn;
/// use conduit_server::Framework;
/// use conduit_test::TestClient;
/// use http::StatusCode;
///
/// # tokio_test::block_on(async {
/// let mut app = Framework::default();
/// app.get("/ping", handler_fn(|ctx| Box::pin(async move {
///     ctx.text(StatusCode::OK, "pong");
///     Ok(())
/// })));
///
/// let client = TestClient::new(app);
/// let response = client.get("/ping").send().await;
/// response.assert_status(StatusCode::OK).assert_text("pong");
/// # });
/// ```
#[must_use]
#[derive(Clone)]
pub struct TestClient {
    app: Arc<Framework>,
    default_headers: Vec<(String, String)>,
    remote_addr: Option<SocketAddr>,
}

impl TestClient {
    /// Wraps an application. Startup hooks are not run.
    pub fn new(app: impl Into<Arc<Framework>>) -> Self {
        Self {
            app: app.into(),
            default_headers: Vec::new(),
            remote_addr: None,
        }
    }

    /// Wraps an application after running its startup hooks.
    pub async fn started(app: impl Into<Arc<Framework>>) -> Result<Self, LifecycleError> {
        let client = Self::new(app);
        client.app.startup().await?;
        Ok(client)
    }

    /// Adds a header sent with every request.
    pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    /// Reports this peer address to the application.
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// The application under test.
    #[must_use]
    pub fn app(&self) -> &Framework {
        &self.app
    }

    /// Runs the application's shutdown hooks.
    pub async fn shutdown(&self) -> Result<(), LifecycleError> {
        self.app.shutdown().await
    }

    /// Creates a GET request.
    pub fn get(&self, uri: impl AsRef<str>) -> TestClientRequest<'_> {
        self.request(Method::GET, uri)
    }

    /// Creates a POST request.
    pub fn post(&self, uri: impl AsRef<str>) -> TestClientRequest<'_> {
        self.request(Method::POST, uri)
    }

    /// Creates a PUT request.
    pub fn put(&self, uri: impl AsRef<str>) -> TestClientRequest<'_> {
        self.request(Method::PUT, uri)
    }

    /// Creates a PATCH request.
    pub fn patch(&self, uri: impl AsRef<str>) -> TestClientRequest<'_> {
        self.request(Method::PATCH, uri)
    }

    /// Creates a DELETE request.
    pub fn delete(&self, uri: impl AsRef<str>) -> TestClientRequest<'_> {
        self.request(Method::DELETE, uri)
    }

    /// Creates a request with any method.
    pub fn request(&self, method: Method, uri: impl AsRef<str>) -> TestClientRequest<'_> {
        TestClientRequest::new(self, TestRequestBuilder::new(method, uri))
    }

    /// Sends an already built request.
    pub async fn execute(&self, request: TestRequest) -> Result<TestResponse, TestError> {
        let request = request.into_http_request()?;
        let response = self.app.handle(request, self.remote_addr).await;
        TestResponse::from_response(response).await
    }
}

/// A request builder bound to a [`TestClient`].
#[must_use]
pub struct TestClientRequest<'a> {
    client: &'a TestClient,
    builder: TestRequestBuilder,
}

impl<'a> TestClientRequest<'a> {
    fn new(client: &'a TestClient, builder: TestRequestBuilder) -> Self {
        let builder = client
            .default_headers
            .iter()
            .fold(builder, |builder, (name, value)| builder.header(name, value));
        Self { client, builder }
    }

    /// Appends a header.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.builder = self.builder.header(name, value);
        self
    }

    /// Sets the `Host` header.
    pub fn host(mut self, host: impl AsRef<str>) -> Self {
        self.builder = self.builder.host(host);
        self
    }

    /// Sets the Authorization header with a Bearer token.
    pub fn bearer_token(mut self, token: impl AsRef<str>) -> Self {
        self.builder = self.builder.bearer_token(token);
        self
    }

    /// Adds a `Cookie` header.
    pub fn cookie(mut self, name: &str, value: &str) -> Self {
        self.builder = self.builder.cookie(name, value);
        self
    }

    /// Sets the raw body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.builder = self.builder.body(body);
        self
    }

    /// Sets a JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.builder = self.builder.json(value);
        self
    }

    /// Sets a form body.
    pub fn form<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.builder = self.builder.form(value);
        self
    }

    /// Sends the request.
    ///
    /// # Panics
    ///
    /// Panics if the request could not be built; use
    /// [`try_send`](Self::try_send) to inspect the error instead.
    pub async fn send(self) -> TestResponse {
        match self.try_send().await {
            Ok(response) => response,
            Err(e) => panic!("test request failed: {e}"),
        }
    }

    /// Sends the request, returning build and read errors.
    pub async fn try_send(self) -> Result<TestResponse, TestError> {
        let request = self.builder.build()?;
        self.client.execute(request).await
    }
}
