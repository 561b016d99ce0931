//! End-to-end chain tests.
//!
//! These drive complete chains through the recovery boundary with real
//! contexts and managers:
//!
//! 1. Request ID header and access log around a handler
//! 2. Authentication and authorization short-circuits
//! 3. Panics and timeouts resolved into exactly one response
//! 4. Teardown of request-scoped resources on every exit path

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use conduit_core::managers::{Managers, Principal, StaticSecurity};
use conduit_core::{CancelReason, Context, ContextFactory, Error, ErrorEnvelope};
use conduit_middleware::stages::{AccessLog, Authenticate, Authorize, RequestIdHeader, Timeout};
use conduit_middleware::{
    error_handler_fn, handler_fn, run_recovered, BoxedMiddleware, Chain, DefaultErrorHandler,
    FnMiddleware, Handler,
};
use http::StatusCode;

fn factory() -> ContextFactory {
    let security = StaticSecurity::new()
        .with_credential("ops-key", Principal::api_key("ops", ["operator"]))
        .with_grant("operator", "jobs.run");
    ContextFactory::new(Arc::new(Managers::builder().security(security).build()))
}

fn request(path: &str, api_key: Option<&str>) -> http::Request<Bytes> {
    let mut builder = http::Request::post(path);
    if let Some(key) = api_key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Bytes::new()).unwrap()
}

fn counting_handler(calls: &Arc<AtomicUsize>) -> Arc<dyn Handler> {
    let calls = Arc::clone(calls);
    Arc::new(handler_fn(move |ctx| {
        calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            ctx.json(StatusCode::ACCEPTED, &serde_json::json!({ "queued": true }))
        })
    }))
}

fn track_release(ctx: &mut Context) -> Arc<AtomicUsize> {
    let released = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&released);
    ctx.on_release(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    released
}

fn envelope(ctx: &Context) -> ErrorEnvelope {
    serde_json::from_slice(ctx.response().body()).unwrap()
}

#[tokio::test]
async fn test_full_stack_success() {
    let calls = Arc::new(AtomicUsize::new(0));
    let global: Vec<BoxedMiddleware> = vec![Arc::new(RequestIdHeader::new()), Arc::new(AccessLog::new())];
    let route: Vec<BoxedMiddleware> = vec![
        Arc::new(Authenticate::required()),
        Arc::new(Authorize::action("jobs.run")),
    ];
    let chain = Chain::new(&global, &route, counting_handler(&calls));
    assert_eq!(
        chain.names(),
        vec!["request_id", "access_log", "authenticate", "authorize"]
    );

    let mut ctx = factory().build(request("/jobs", Some("ops-key")), None);
    run_recovered(&chain, &mut ctx, &DefaultErrorHandler).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.response().status(), StatusCode::ACCEPTED);
    assert_eq!(ctx.response().body().as_ref(), br#"{"queued":true}"#);
    assert_eq!(
        ctx.response().headers()["x-request-id"].to_str().unwrap(),
        ctx.request_id().to_string()
    );
}

#[tokio::test]
async fn test_unauthenticated_request_never_reaches_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let chain = Chain::new(
        &[Arc::new(Authenticate::required())],
        &[Arc::new(Authorize::action("jobs.run"))],
        counting_handler(&calls),
    );

    let mut ctx = factory().build(request("/jobs", Some("wrong")), None);
    run_recovered(&chain, &mut ctx, &DefaultErrorHandler).await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(ctx.response().status(), StatusCode::UNAUTHORIZED);
    assert_eq!(envelope(&ctx).error.code, "UNAUTHORIZED");
}

#[tokio::test]
async fn test_erroring_middleware_gives_500_and_skips_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let broken: BoxedMiddleware = Arc::new(FnMiddleware::new("broken", |_ctx, _next| {
        Box::pin(async { Err::<(), _>(Error::internal("upstream unavailable")) })
    }));
    let chain = Chain::new(&[broken], &[], counting_handler(&calls));

    let handler = error_handler_fn(|ctx, error| {
        Box::pin(async move {
            ctx.text(StatusCode::INTERNAL_SERVER_ERROR, error.public_message());
            Ok(())
        })
    });

    let mut ctx = factory().build(request("/jobs", None), None);
    run_recovered(&chain, &mut ctx, &handler).await;

    assert_eq!(ctx.response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_panicking_handler_yields_one_500() {
    let panicking = Arc::new(handler_fn(|ctx| {
        Box::pin(async move {
            ctx.text(StatusCode::OK, "partial");
            let values: Vec<u32> = Vec::new();
            let first = values[0];
            ctx.text(StatusCode::OK, first.to_string());
            Ok(())
        })
    }));
    let chain = Chain::handler_only(panicking);

    let mut ctx = factory().build(request("/jobs", None), None);
    let released = track_release(&mut ctx);
    run_recovered(&chain, &mut ctx, &DefaultErrorHandler).await;

    assert_eq!(ctx.response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = envelope(&ctx);
    assert_eq!(body.error.code, "INTERNAL_ERROR");
    assert!(!body.error.message.contains("index out of bounds"));

    assert!(ctx.release());
    assert!(!ctx.release());
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_mid_chain_tears_down_once() {
    let factory = factory().with_request_timeout(Some(Duration::from_secs(30)));
    let post_ran = Arc::new(AtomicUsize::new(0));
    let post = Arc::clone(&post_ran);
    let outer: BoxedMiddleware = Arc::new(FnMiddleware::new("outer", move |ctx, next| {
        let post = Arc::clone(&post);
        Box::pin(async move {
            let result = next.run(ctx).await;
            post.fetch_add(1, Ordering::SeqCst);
            result
        })
    }));
    let stuck = Arc::new(handler_fn(|ctx| {
        Box::pin(async move {
            ctx.scoped().set("progress", "started");
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(())
        })
    }));
    let chain = Chain::new(&[outer, Arc::new(Timeout::new(Duration::from_millis(250)))], &[], stuck);

    let mut ctx = factory.build(request("/jobs", None), None);
    let released = track_release(&mut ctx);
    run_recovered(&chain, &mut ctx, &DefaultErrorHandler).await;

    assert_eq!(ctx.response().status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(post_ran.load(Ordering::SeqCst), 1, "post-logic runs on error");
    assert_eq!(ctx.cancellation().reason(), Some(CancelReason::Timeout));
    assert_eq!(factory.scoped_store().active(), 1);

    ctx.release();
    drop(ctx);
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(factory.scoped_store().active(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_request_deadline_enforced_by_boundary() {
    let factory = factory().with_request_timeout(Some(Duration::from_millis(100)));
    let stuck = Arc::new(handler_fn(|_ctx| {
        Box::pin(async {
            std::future::pending::<()>().await;
            Ok(())
        })
    }));
    let chain = Chain::handler_only(stuck);

    let mut ctx = factory.build(request("/jobs", None), None);
    run_recovered(&chain, &mut ctx, &DefaultErrorHandler).await;

    assert_eq!(ctx.response().status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(envelope(&ctx).error.code, "TIMEOUT");
}

#[tokio::test]
async fn test_concurrent_chains_do_not_share_state() {
    let chain = Arc::new(Chain::handler_only(Arc::new(handler_fn(|ctx| {
        Box::pin(async move {
            let id = ctx.request_id().to_string();
            ctx.scoped().set("owner", id.clone());
            tokio::task::yield_now().await;
            let owner = ctx.scoped().get("owner").unwrap();
            assert_eq!(owner, serde_json::Value::String(id));
            ctx.text(StatusCode::OK, "ok");
            Ok(())
        })
    }))));
    let factory = factory();

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let chain = Arc::clone(&chain);
            let factory = factory.clone();
            tokio::spawn(async move {
                let mut ctx = factory.build(request("/jobs", None), None);
                run_recovered(&chain, &mut ctx, &DefaultErrorHandler).await;
                let status = ctx.response().status();
                ctx.release();
                status
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap(), StatusCode::OK);
    }
    assert_eq!(factory.scoped_store().active(), 0);
}
