//! Requests driven through `Framework::handle` without a socket.
//!
//! Covers routing outcomes (match, 404, 405, host scopes, tie-breaks),
//! global and group middleware, error handling, lifecycle ordering and
//! plugin permission views.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use conduit_core::managers::{Managers, MemoryCache, StaticTranslator};
use conduit_core::plugin::{Permission, PermissionSet};
use conduit_core::{Error, ErrorEnvelope};
use conduit_middleware::{error_handler_fn, handler_fn, FnMiddleware, Handler};
use conduit_server::{Framework, LifecycleError, Plugin, PluginError, PluginHost, ServerConfig};
use http::{HeaderValue, Method, StatusCode};
use http_body_util::BodyExt;
use parking_lot::Mutex;

async fn send(app: &Framework, method: Method, uri: &str, host: Option<&str>) -> (StatusCode, http::HeaderMap, Bytes) {
    let mut builder = http::Request::builder().method(method).uri(uri);
    if let Some(host) = host {
        builder = builder.header("host", host);
    }
    let response = app.handle(builder.body(Bytes::new()).unwrap(), None).await;
    let (parts, body) = response.into_parts();
    let body = body.collect().await.unwrap().to_bytes();
    (parts.status, parts.headers, body)
}

fn text(body: &'static str) -> impl Handler {
    handler_fn(move |ctx| {
        Box::pin(async move {
            ctx.text(StatusCode::OK, body);
            Ok(())
        })
    })
}

#[tokio::test]
async fn test_item_lookup_returns_json_id() {
    let mut app = Framework::default();
    app.get(
        "/items/:id",
        handler_fn(|ctx| {
            Box::pin(async move {
                let id = ctx.param("id").unwrap_or_default().to_string();
                ctx.json(StatusCode::OK, &serde_json::json!({ "id": id }))
            })
        }),
    );

    let (status, headers, body) = send(&app, Method::GET, "/items/42", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), br#"{"id":"42"}"#);
    assert_eq!(headers["content-type"], "application/json");
}

#[tokio::test]
async fn test_global_middleware_sets_trace_header() {
    let mut app = Framework::default();
    app.use_global(FnMiddleware::new("trace", |ctx, next| {
        Box::pin(async move {
            ctx.response_mut()
                .headers_mut()
                .insert("x-trace", HeaderValue::from_static("1"));
            next.run(ctx).await
        })
    }));
    app.get("/", text("ok"));

    let (status, headers, body) = send(&app, Method::GET, "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-trace"], "1");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn test_erroring_middleware_skips_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let mut app = Framework::default();
    app.use_global(FnMiddleware::new("broken", |_ctx, _next| {
        Box::pin(async { Err::<(), _>(Error::internal("dependency down")) })
    }));
    app.error_handler(error_handler_fn(|ctx, _error| {
        Box::pin(async move {
            ctx.text(StatusCode::INTERNAL_SERVER_ERROR, "failed");
            Ok(())
        })
    }));
    app.get(
        "/work",
        handler_fn(move |ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                ctx.text(StatusCode::OK, "done");
                Ok(())
            })
        }),
    );

    let (status, _, body) = send(&app, Method::GET, "/work", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body.as_ref(), b"failed");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_first_registered_route_wins() {
    let mut app = Framework::default();
    app.get("/users/:id", text("by_id"));
    app.get("/users/static", text("static"));

    for _ in 0..5 {
        let (_, _, body) = send(&app, Method::GET, "/users/static", None).await;
        assert_eq!(body.as_ref(), b"by_id");
    }
}

#[tokio::test]
async fn test_host_scoped_routes() {
    let mut app = Framework::default();
    app.get("/", text("default"));
    app.host("admin.example.com").get("/", text("admin"));

    let (_, _, body) = send(&app, Method::GET, "/", Some("admin.example.com:8443")).await;
    assert_eq!(body.as_ref(), b"admin");

    let (_, _, body) = send(&app, Method::GET, "/", Some("www.example.com")).await;
    assert_eq!(body.as_ref(), b"default");

    let (_, _, body) = send(&app, Method::GET, "/", None).await;
    assert_eq!(body.as_ref(), b"default");
}

#[tokio::test]
async fn test_not_found_and_method_not_allowed() {
    let mut app = Framework::default();
    app.get("/orders", text("list"));
    app.post("/orders", text("create"));

    let (status, _, body) = send(&app, Method::GET, "/nothing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let envelope: ErrorEnvelope = serde_json::from_slice(&body).unwrap();
    assert_eq!(envelope.error.code, "NOT_FOUND");

    let (status, headers, _) = send(&app, Method::DELETE, "/orders", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(headers["allow"], "GET, POST");
}

#[tokio::test]
async fn test_custom_error_handler_still_gets_allow_header() {
    let mut app = Framework::default();
    app.put("/config", text("saved"));
    app.error_handler(error_handler_fn(|ctx, error| {
        Box::pin(async move {
            ctx.text(error.status(), "nope");
            Ok(())
        })
    }));

    let (status, headers, body) = send(&app, Method::GET, "/config", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(headers["allow"], "PUT");
    assert_eq!(body.as_ref(), b"nope");
}

#[tokio::test]
async fn test_failing_error_handler_falls_back_to_default() {
    let mut app = Framework::default();
    app.error_handler(error_handler_fn(|_ctx, _error| {
        Box::pin(async { Err::<(), _>(Error::internal("handler broke")) })
    }));

    let (status, _, body) = send(&app, Method::GET, "/missing", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let envelope: ErrorEnvelope = serde_json::from_slice(&body).unwrap();
    assert_eq!(envelope.error.code, "INTERNAL_ERROR");
}

#[tokio::test]
async fn test_panicking_handler_is_contained() {
    let mut app = Framework::default();
    app.get(
        "/boom",
        handler_fn(|_ctx| {
            Box::pin(async {
                let empty: Option<u8> = None;
                let _ = empty.expect("value present");
                Ok(())
            })
        }),
    );
    app.get("/fine", text("fine"));

    let (status, _, body) = send(&app, Method::GET, "/boom", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!String::from_utf8_lossy(&body).contains("value present"));

    let (status, _, _) = send(&app, Method::GET, "/fine", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.context_factory().scoped_store().active(), 0);
}

#[tokio::test]
async fn test_lifecycle_runs_hooks_in_order() {
    let log = Arc::new(Mutex::new(Vec::<&'static str>::new()));
    let mut app = Framework::new(ServerConfig::default());
    for name in ["config", "pool"] {
        let log = Arc::clone(&log);
        app.on_startup_named(name, move || {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(name);
                Ok(())
            }
        });
    }
    let stop = Arc::clone(&log);
    app.on_shutdown(move || {
        let log = Arc::clone(&stop);
        async move {
            log.lock().push("drain");
            Ok(())
        }
    });

    app.startup().await.unwrap();
    app.startup().await.unwrap();
    app.shutdown().await.unwrap();
    assert_eq!(*log.lock(), vec!["config", "pool", "drain"]);
}

#[tokio::test]
async fn test_failing_startup_hook_is_reported() {
    let mut app = Framework::default();
    app.on_startup_named("connect", || async {
        Err(LifecycleError::new("database unreachable"))
    });

    let err = app.startup().await.unwrap_err();
    assert!(matches!(err, LifecycleError::StartupFailed { ref hook, .. } if hook == "connect"));
}

struct Translations;

impl Plugin for Translations {
    fn name(&self) -> &str {
        "translations"
    }

    fn permissions(&self) -> PermissionSet {
        PermissionSet::none().with(Permission::Translator)
    }

    fn install(&self, host: &mut PluginHost<'_>) -> conduit_core::Result<()> {
        host.managers().translator()?;
        assert!(matches!(
            host.managers().cache(),
            Err(Error::PermissionDenied(Permission::Cache))
        ));
        host.get("/hello", text("hallo"));
        Ok(())
    }
}

struct Greedy;

impl Plugin for Greedy {
    fn name(&self) -> &str {
        "greedy"
    }

    fn install(&self, host: &mut PluginHost<'_>) -> conduit_core::Result<()> {
        host.managers().cache()?;
        Ok(())
    }
}

#[tokio::test]
async fn test_plugins_see_only_declared_managers() {
    let mut app = Framework::default();
    app.with_managers(
        Managers::builder()
            .cache(MemoryCache::new())
            .translator(StaticTranslator::new("de"))
            .build(),
    );

    app.plugin(Translations).unwrap();
    assert!(matches!(app.plugin(Translations), Err(PluginError::Duplicate(_))));
    assert!(matches!(
        app.plugin(Greedy),
        Err(PluginError::Install { ref plugin, source: Error::PermissionDenied(Permission::Cache) }) if plugin == "greedy"
    ));

    assert_eq!(app.plugins().collect::<Vec<_>>(), vec!["translations"]);
    assert!(app
        .plugin_permissions("translations")
        .unwrap()
        .contains(Permission::Translator));

    let (status, _, body) = send(&app, Method::GET, "/hello", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"hallo");
}
