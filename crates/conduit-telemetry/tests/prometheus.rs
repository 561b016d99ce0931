//! Request metrics flowing from the access log into the Prometheus recorder.

use bytes::Bytes;
use conduit_core::managers::Managers;
use conduit_middleware::handler_fn;
use conduit_middleware::stages::AccessLog;
use conduit_server::Framework;
use conduit_telemetry::{build_recorder, FacadeMetrics, MetricsConfig, MetricsRegistry};
use http::{Method, StatusCode};
use http_body_util::BodyExt;

fn request(path: &str) -> http::Request<Bytes> {
    http::Request::builder()
        .method(Method::GET)
        .uri(path)
        .body(Bytes::new())
        .unwrap()
}

fn app(registry: &MetricsRegistry) -> Framework {
    let mut app = Framework::default();
    app.with_managers(Managers::builder().metrics(FacadeMetrics::new()).build());
    app.use_global(AccessLog::new());
    app.get(
        "/items/:id",
        handler_fn(|ctx| {
            Box::pin(async move {
                ctx.text(StatusCode::OK, "item");
                Ok(())
            })
        }),
    );
    app.get("/metrics", registry.handler());
    app
}

#[test]
fn test_access_log_feeds_prometheus() {
    let recorder = build_recorder(&MetricsConfig::default()).unwrap();
    let registry = MetricsRegistry::new(recorder.handle());
    let app = app(&registry);

    metrics::with_local_recorder(&recorder, || {
        tokio_test::block_on(async {
            for path in ["/items/1", "/items/2", "/nothing"] {
                app.handle(request(path), None).await;
            }
        });
    });

    let rendered = registry.render();
    assert!(
        rendered.contains(r#"conduit_requests_total{method="GET",route="/items/:id",status="200"} 2"#),
        "{rendered}"
    );
    assert!(rendered.contains(r#"conduit_request_duration_seconds_bucket{method="GET",route="/items/:id",status="200",le="+Inf"} 2"#));
}

#[test]
fn test_metrics_endpoint_serves_exposition() {
    let recorder = build_recorder(&MetricsConfig::default()).unwrap();
    let registry = MetricsRegistry::new(recorder.handle());
    let app = app(&registry);

    let (status, content_type, body) = metrics::with_local_recorder(&recorder, || {
        tokio_test::block_on(async {
            app.handle(request("/items/7"), None).await;
            let response = app.handle(request("/metrics"), None).await;
            let (parts, body) = response.into_parts();
            let body = body.collect().await.unwrap().to_bytes();
            (parts.status, parts.headers["content-type"].clone(), body)
        })
    });

    assert_eq!(status, StatusCode::OK);
    assert!(content_type.to_str().unwrap().starts_with("text/plain; version=0.0.4"));
    let body = String::from_utf8(body.to_vec()).unwrap();
    assert!(body.contains("conduit_requests_total"));
}
