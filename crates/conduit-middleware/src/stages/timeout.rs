//! Per-scope request deadline.

use std::time::Duration;

use conduit_core::{BoxFuture, CancelReason, Context, Error, Result};

use crate::middleware::{Middleware, Next};

/// Fails the request with [`Error::Timeout`] if the inner chain runs longer
/// than `duration`.
///
/// The deadline is also written to the context for the duration of the inner
/// chain, so [`Context::until_cancelled`] observes it. A deadline that is
/// already tighter than `duration` is kept, and the outer deadline is put
/// back once the inner chain returns. On expiry the inner chain is dropped
/// and the context's token is cancelled with [`CancelReason::Timeout`].
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    duration: Duration,
}

impl Timeout {
    /// Creates the middleware.
    #[must_use]
    pub const fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// The configured limit.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }
}

impl Middleware for Timeout {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let outer = ctx.deadline();
            ctx.shorten_deadline(self.duration);
            let Some(deadline) = ctx.deadline() else {
                return next.run(ctx).await;
            };

            let result = tokio::time::timeout_at(deadline, next.run(ctx)).await;
            ctx.set_deadline(outer);

            match result {
                Ok(result) => result,
                Err(_) => {
                    ctx.cancellation().cancel(CancelReason::Timeout);
                    tracing::warn!(
                        request_id = %ctx.request_id(),
                        limit = ?self.duration,
                        "request timed out"
                    );
                    Err(Error::Timeout {
                        elapsed: ctx.elapsed(),
                    })
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::middleware::handler_fn;
    use bytes::Bytes;
    use conduit_core::managers::Managers;
    use conduit_core::ContextFactory;
    use http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn context() -> Context {
        ContextFactory::new(Arc::new(Managers::default()))
            .build(http::Request::get("/").body(Bytes::new()).unwrap(), None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_times_out_and_releases_once() {
        let slow = handler_fn(|ctx| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                ctx.text(StatusCode::OK, "late");
                Ok(())
            })
        });
        let chain = Chain::new(
            &[Arc::new(Timeout::new(Duration::from_millis(100)))],
            &[],
            Arc::new(slow),
        );

        let released = Arc::new(AtomicUsize::new(0));
        let mut ctx = context();
        let counter = Arc::clone(&released);
        ctx.on_release(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let err = chain.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(ctx.is_cancelled());
        assert!(!ctx.is_written());

        ctx.release();
        drop(ctx);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_handler_passes() {
        let fast = handler_fn(|ctx| {
            Box::pin(async move {
                ctx.text(StatusCode::OK, "fast");
                Ok(())
            })
        });
        let chain = Chain::new(&[Arc::new(Timeout::new(Duration::from_secs(1)))], &[], Arc::new(fast));
        let mut ctx = context();
        chain.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.response().body().as_ref(), b"fast");
        assert!(ctx.deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outer_deadline_restored_for_post_logic() {
        let seen_inside = Arc::new(std::sync::Mutex::new(None));
        let seen = Arc::clone(&seen_inside);
        let handler = handler_fn(move |ctx| {
            let seen = Arc::clone(&seen);
            Box::pin(async move {
                *seen.lock().unwrap() = ctx.deadline();
                ctx.text(StatusCode::OK, "ok");
                Ok(())
            })
        });
        let chain = Chain::new(
            &[Arc::new(Timeout::new(Duration::from_millis(50)))],
            &[],
            Arc::new(handler),
        );

        let mut ctx = ContextFactory::new(Arc::new(Managers::default()))
            .with_request_timeout(Some(Duration::from_secs(30)))
            .build(http::Request::get("/").body(Bytes::new()).unwrap(), None);
        let outer = ctx.deadline();

        chain.run(&mut ctx).await.unwrap();

        let inner = seen_inside.lock().unwrap().unwrap();
        assert!(inner < outer.unwrap());
        assert_eq!(ctx.deadline(), outer);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let later = ctx.until_cancelled(async { "post-logic" }).await;
        assert_eq!(later.unwrap(), "post-logic");
    }
}
