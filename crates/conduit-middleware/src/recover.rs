//! The recovery boundary and error handlers.
//!
//! Every chain invocation runs inside [`recover`], which turns the four ways a
//! chain can end into one [`Outcome`]:
//!
//! | Chain ended by | Outcome |
//! |---|---|
//! | returning `Ok(())` | [`Outcome::Completed`] |
//! | returning an error | [`Outcome::Failed`] |
//! | panicking | [`Outcome::Panicked`] with [`Error::Fault`] |
//! | deadline or cancellation | [`Outcome::TimedOut`] with [`Error::Timeout`] or [`Error::Cancelled`] |
//!
//! A graceful shutdown does not interrupt the chain by itself. Code that
//! awaits [`Context::until_cancelled`] returns early, everything else is left
//! to drain until the server's force token fires.
//!
//! [`run_recovered`] then hands any error to the registered [`ErrorHandler`]
//! exactly once. Responses are buffered in the context, so the handler can
//! always replace whatever the chain had written.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures_util::FutureExt;

use conduit_core::{
    BoxFuture, CancelReason, CancellationToken, Context, Error, ErrorKind, Result,
};

use crate::chain::Chain;

/// How a chain invocation ended.
#[derive(Debug)]
pub enum Outcome {
    /// The chain returned `Ok(())`.
    Completed,
    /// The chain returned an error.
    Failed(Error),
    /// The chain panicked.
    Panicked(Error),
    /// The deadline passed or the request was cancelled first.
    TimedOut(Error),
}

impl Outcome {
    /// True when the chain completed normally.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// The error carried by a non-completed outcome.
    #[must_use]
    pub fn into_error(self) -> Option<Error> {
        match self {
            Self::Completed => None,
            Self::Failed(e) | Self::Panicked(e) | Self::TimedOut(e) => Some(e),
        }
    }
}

/// Upper bound on how long an error handler may run.
pub const ERROR_HANDLER_LIMIT: Duration = Duration::from_secs(5);

/// The limits one chain invocation runs under.
#[derive(Debug, Clone)]
pub struct Guard {
    token: CancellationToken,
    abort: CancellationToken,
    deadline: Option<tokio::time::Instant>,
    started_at: Instant,
}

impl Guard {
    /// Uses the context's cancellation tokens and deadline.
    #[must_use]
    pub fn of(ctx: &Context) -> Self {
        Self {
            token: ctx.cancellation().clone(),
            abort: ctx.abort_token().clone(),
            deadline: ctx.deadline(),
            started_at: ctx.started_at(),
        }
    }

    /// No deadline and tokens nothing else can fire.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            token: CancellationToken::new(),
            abort: CancellationToken::new(),
            deadline: None,
            started_at: Instant::now(),
        }
    }

    /// Error handler limits: the context's force token, and a deadline of
    /// at most [`ERROR_HANDLER_LIMIT`] from now.
    ///
    /// The request token is not used; it may already have fired for the
    /// very error being handled.
    #[must_use]
    pub fn error_handler(ctx: &Context) -> Self {
        Self {
            token: CancellationToken::new(),
            abort: ctx.abort_token().clone(),
            deadline: Some(tokio::time::Instant::now() + ERROR_HANDLER_LIMIT),
            started_at: Instant::now(),
        }
    }
}

/// Runs `fut`, intercepting panics, the deadline and cancellation.
///
/// When the deadline wins, the guard's token is cancelled with
/// [`CancelReason::Timeout`] and `fut` is dropped.
pub async fn recover<F>(guard: Guard, fut: F) -> Outcome
where
    F: Future<Output = Result<()>>,
{
    let Guard {
        token,
        abort,
        deadline,
        started_at,
    } = guard;
    let guarded = AssertUnwindSafe(fut).catch_unwind();

    tokio::select! {
        biased;
        result = guarded => match result {
            Ok(Ok(())) => Outcome::Completed,
            Ok(Err(error)) => Outcome::Failed(error),
            Err(payload) => Outcome::Panicked(Error::Fault {
                message: panic_message(payload.as_ref()),
            }),
        },
        () = interrupted(&token, &abort) => Outcome::TimedOut(match token.reason() {
            Some(CancelReason::Timeout) => Error::Timeout { elapsed: started_at.elapsed() },
            _ => Error::Cancelled,
        }),
        () = sleep_until(deadline) => {
            token.cancel(CancelReason::Timeout);
            Outcome::TimedOut(Error::Timeout { elapsed: started_at.elapsed() })
        }
    }
}

/// Completes on any cancellation except a graceful shutdown, which only ends
/// the chain once `abort` fires as well.
async fn interrupted(token: &CancellationToken, abort: &CancellationToken) {
    tokio::select! {
        () = token.cancelled() => {
            if token.reason() == Some(CancelReason::Shutdown) {
                abort.cancelled().await;
            }
        }
        () = abort.cancelled() => {}
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic with non-string payload".to_string())
}

/// Converts an error into the final response.
///
/// Returning `Ok(())` means the response in the context is final. Returning
/// an error hands that error to [`DefaultErrorHandler`].
pub trait ErrorHandler: Send + Sync + 'static {
    /// Handles `error` for the request in `ctx`.
    fn handle<'a>(&'a self, ctx: &'a mut Context, error: Error) -> BoxFuture<'a, Result<()>>;
}

impl<F> ErrorHandler for F
where
    F: for<'a> Fn(&'a mut Context, Error) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    fn handle<'a>(&'a self, ctx: &'a mut Context, error: Error) -> BoxFuture<'a, Result<()>> {
        self(ctx, error)
    }
}

/// Turns a closure into an [`ErrorHandler`].
pub fn error_handler_fn<F>(f: F) -> F
where
    F: for<'a> Fn(&'a mut Context, Error) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    f
}

/// Logs the error and writes the JSON error envelope.
///
/// Any partially written response is discarded first. Server-side errors are
/// logged with their full source chain but reach the client only as the
/// status reason phrase.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorHandler;

impl DefaultErrorHandler {
    /// Logs and writes the envelope synchronously.
    pub fn respond(ctx: &mut Context, error: &Error) {
        log_error(ctx, error);

        let status = error.status();
        let request_id = ctx.request_id().to_string();
        let envelope = error.to_envelope(Some(&request_id));
        ctx.response_mut().reset();

        if let Error::MethodNotAllowed { allowed, .. } = error {
            if let Ok(value) = allow_header(allowed).parse() {
                ctx.set_header(http::header::ALLOW, value);
            }
        }

        if ctx.json(status, &envelope).is_err() {
            ctx.text(status, envelope.error.message);
        }
    }
}

impl ErrorHandler for DefaultErrorHandler {
    fn handle<'a>(&'a self, ctx: &'a mut Context, error: Error) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            Self::respond(ctx, &error);
            Ok(())
        })
    }
}

/// Renders the `Allow` header value.
#[must_use]
pub fn allow_header(allowed: &[http::Method]) -> String {
    allowed
        .iter()
        .map(http::Method::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn log_error(ctx: &Context, error: &Error) {
    let request_id = ctx.request_id();
    let status = error.status().as_u16();
    match error.kind() {
        _ if error.status().is_server_error() => tracing::error!(
            request_id = %request_id,
            method = %ctx.method(),
            path = ctx.path(),
            status = status,
            kind = ?error.kind(),
            error = ?error,
            "request failed"
        ),
        ErrorKind::Routing => tracing::debug!(
            request_id = %request_id,
            path = ctx.path(),
            status = status,
            "no route"
        ),
        _ => tracing::warn!(
            request_id = %request_id,
            method = %ctx.method(),
            path = ctx.path(),
            status = status,
            error = %error,
            "request rejected"
        ),
    }
}

/// Runs `chain` inside the recovery boundary and resolves any error.
///
/// The custom `handler` sees each error once. If it fails, or panics, the
/// [`DefaultErrorHandler`] writes the response instead. Either way the
/// context ends with exactly one response.
pub async fn run_recovered(chain: &Chain, ctx: &mut Context, handler: &dyn ErrorHandler) {
    let guard = Guard::of(ctx);
    let outcome = recover(guard, chain.run(ctx)).await;

    if let Outcome::Panicked(Error::Fault { message }) = &outcome {
        tracing::error!(
            request_id = %ctx.request_id(),
            panic = %message,
            "handler panicked"
        );
    }

    if let Some(error) = outcome.into_error() {
        resolve_error(ctx, error, handler).await;
    }
}

/// Hands `error` to `handler`, falling back to the default envelope.
///
/// The handler runs under [`Guard::error_handler`]; one that hangs is cut
/// off and the default envelope for the timeout is written instead.
pub async fn resolve_error(ctx: &mut Context, error: Error, handler: &dyn ErrorHandler) {
    let guard = Guard::error_handler(ctx);
    let outcome = recover(guard, handler.handle(ctx, error)).await;
    if let Some(escaped) = outcome.into_error() {
        DefaultErrorHandler::respond(ctx, &escaped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{handler_fn, BoxedMiddleware, FnMiddleware};
    use bytes::Bytes;
    use conduit_core::managers::Managers;
    use conduit_core::{ContextFactory, ErrorEnvelope};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use http::StatusCode;
    use std::time::Duration;

    fn factory() -> ContextFactory {
        ContextFactory::new(Arc::new(Managers::default()))
    }

    fn context() -> Context {
        factory().build(http::Request::get("/").body(Bytes::new()).unwrap(), None)
    }

    fn envelope(ctx: &Context) -> ErrorEnvelope {
        serde_json::from_slice(ctx.response().body()).unwrap()
    }

    #[tokio::test]
    async fn test_completed() {
        let outcome = recover(Guard::unbounded(), async { Ok(()) }).await;
        assert!(outcome.is_completed());
    }

    #[tokio::test]
    async fn test_panic_becomes_fault() {
        let outcome = recover(Guard::unbounded(), async {
            if true {
                panic!("index out of range");
            }
            Ok(())
        })
        .await;
        match outcome {
            Outcome::Panicked(Error::Fault { message }) => assert_eq!(message, "index out of range"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_token() {
        let ctx = factory()
            .with_request_timeout(Some(Duration::from_millis(50)))
            .build(http::Request::get("/").body(Bytes::new()).unwrap(), None);

        let outcome = recover(Guard::of(&ctx), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        assert!(matches!(outcome, Outcome::TimedOut(Error::Timeout { .. })));
        assert_eq!(ctx.cancellation().reason(), Some(CancelReason::Timeout));
    }

    #[tokio::test]
    async fn test_shutdown_cancellation() {
        let ctx = context();
        let token = ctx.cancellation().clone();
        let guard = Guard::of(&ctx);

        let outcome = recover(guard, async move {
            token.cancel(CancelReason::Forced);
            std::future::pending::<()>().await;
            Ok(())
        })
        .await;
        assert!(matches!(outcome, Outcome::TimedOut(Error::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_shutdown_lets_chain_finish() {
        let factory = factory();
        let ctx = factory.build(http::Request::get("/").body(Bytes::new()).unwrap(), None);
        let shutdown = factory.shutdown_token().clone();

        let outcome = recover(Guard::of(&ctx), async move {
            shutdown.cancel(CancelReason::Shutdown);
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;

        assert!(outcome.is_completed());
        assert_eq!(ctx.cancellation().reason(), Some(CancelReason::Shutdown));
    }

    #[tokio::test]
    async fn test_force_interrupts_after_graceful_shutdown() {
        let factory = factory();
        let ctx = factory.build(http::Request::get("/").body(Bytes::new()).unwrap(), None);
        let shutdown = factory.shutdown_token().clone();
        let force = factory.force_token().clone();

        let outcome = recover(Guard::of(&ctx), async move {
            shutdown.cancel(CancelReason::Shutdown);
            tokio::task::yield_now().await;
            force.cancel(CancelReason::Forced);
            std::future::pending::<()>().await;
            Ok(())
        })
        .await;

        match outcome {
            Outcome::TimedOut(error) => {
                assert!(matches!(error, Error::Cancelled));
                assert_eq!(error.status(), StatusCode::SERVICE_UNAVAILABLE);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_error_handler_is_cut_off() {
        let handler = error_handler_fn(|ctx, _error| {
            Box::pin(async move {
                ctx.text(StatusCode::IM_A_TEAPOT, "never finished");
                std::future::pending::<()>().await;
                Ok(())
            })
        });
        let mut ctx = context();

        let started = tokio::time::Instant::now();
        resolve_error(&mut ctx, Error::bad_request("bad"), &handler).await;

        assert!(started.elapsed() >= ERROR_HANDLER_LIMIT);
        assert!(started.elapsed() < ERROR_HANDLER_LIMIT + Duration::from_secs(1));
        assert_eq!(ctx.response().status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(envelope(&ctx).error.code, "TIMEOUT");
    }

    #[tokio::test]
    async fn test_default_handler_hides_internals() {
        let mut ctx = context();
        ctx.text(StatusCode::OK, "half-written");

        let error = Error::internal("connection refused at /var/run/db.sock");
        resolve_error(&mut ctx, error, &DefaultErrorHandler).await;

        assert_eq!(ctx.response().status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = envelope(&ctx);
        assert_eq!(body.error.message, "Internal Server Error");
        assert_eq!(body.error.request_id, Some(ctx.request_id().to_string()));
        assert!(!String::from_utf8_lossy(ctx.response().body()).contains("db.sock"));
    }

    #[tokio::test]
    async fn test_default_handler_method_not_allowed_sets_allow() {
        let mut ctx = context();
        let error = Error::MethodNotAllowed {
            method: http::Method::DELETE,
            allowed: vec![http::Method::GET, http::Method::POST],
        };
        resolve_error(&mut ctx, error, &DefaultErrorHandler).await;
        assert_eq!(ctx.response().status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(ctx.response().headers()[http::header::ALLOW], "GET, POST");
    }

    #[tokio::test]
    async fn test_failing_custom_handler_falls_back() {
        let handler = error_handler_fn(|_ctx, _error| {
            Box::pin(async { Err::<(), _>(Error::internal("handler broke")) })
        });
        let mut ctx = context();
        resolve_error(&mut ctx, Error::bad_request("bad"), &handler).await;
        assert_eq!(ctx.response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_panicking_custom_handler_falls_back() {
        let handler = error_handler_fn(|_ctx, _error| {
            Box::pin(async {
                if true {
                    panic!("error handler bug");
                }
                Ok(())
            })
        });
        let mut ctx = context();
        resolve_error(&mut ctx, Error::Unauthorized, &handler).await;
        assert_eq!(ctx.response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_run_recovered_sees_error_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler = error_handler_fn(move |ctx, error| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                ctx.text(error.status(), "custom");
                Ok(())
            })
        });

        let failing: BoxedMiddleware = Arc::new(FnMiddleware::new("fail", |_ctx, _next| {
            Box::pin(async { Err::<(), _>(Error::forbidden("orders.delete")) })
        }));
        let chain = Chain::new(
            &[failing],
            &[],
            Arc::new(handler_fn(|_ctx| Box::pin(async { Ok(()) }))),
        );

        let mut ctx = context();
        run_recovered(&chain, &mut ctx, &handler).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.response().status(), StatusCode::FORBIDDEN);
        assert_eq!(ctx.response().body().as_ref(), b"custom");
    }

    #[test]
    fn test_allow_header() {
        assert_eq!(allow_header(&[http::Method::GET]), "GET");
        assert_eq!(allow_header(&[]), "");
    }
}
