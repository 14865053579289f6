/// HTTP server setup and routing
use crate::{
    context::AppContext,
    error::{DirError, DirResult},
    metrics,
};
use axum::{
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Build the main application router
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .merge(crate::api::routes())
        .with_state(ctx)
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .fallback(not_found)
}

/// Health check handler
async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Prometheus text exposition
async fn metrics_handler() -> DirResult<Response> {
    let body = metrics::render_metrics()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

/// 404 handler
async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "NotFound",
            "message": "Endpoint not found"
        })),
    )
}

/// Start the HTTP server, stopping gracefully once `shutdown` is cancelled
pub async fn serve(ctx: AppContext, shutdown: CancellationToken) -> DirResult<()> {
    let addr = format!("{}:{}", ctx.config.service.hostname, ctx.config.service.port);

    info!("Agent directory listening on {}", addr);
    info!("   Service URL: {}", ctx.service_url());

    let app = build_router(ctx);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| DirError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| DirError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ServerConfig,
        db,
        naming::{DnsKeySource, StaticTxtResolver, Verifier, WellKnownConfig, WellKnownKeySource},
    };
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn test_router() -> (Router, Arc<StaticTxtResolver>) {
        let pool = db::create_memory_pool().await.unwrap();
        let dns = Arc::new(StaticTxtResolver::new());
        let verifier = Verifier::new(
            DnsKeySource::new(dns.clone()),
            WellKnownKeySource::new(WellKnownConfig::default()).unwrap(),
            Duration::from_secs(2),
        );
        let ctx = AppContext::with_verifier(ServerConfig::default(), pool, verifier);
        (build_router(ctx), dns)
    }

    async fn call(
        router: &Router,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _) = test_router().await;
        let (status, body) = call(&router, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (router, _) = test_router().await;
        let (status, body) = call(&router, Method::GET, "/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "NotFound");
    }

    #[tokio::test]
    async fn test_verify_over_http() {
        let (router, dns) = test_router().await;
        dns.set_records(
            "_oasf.cisco.com",
            vec!["v=oasf1; k=ed25519; p=SGVsbG8=".to_string()],
        )
        .await;

        let (status, body) = call(
            &router,
            Method::POST,
            "/api/v1/records",
            Some(json!({"name": "dns://cisco.com/marketing-agent", "version": "1.0.0"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let cid = body["cid"].as_str().unwrap().to_string();

        let (status, _) = call(
            &router,
            Method::POST,
            &format!("/api/v1/records/{}/public-keys", cid),
            Some(json!({"publicKey": "SGVsbG8="})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &router,
            Method::POST,
            "/api/v1/verification/verify",
            Some(json!({"cid": cid})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["verified"], true);
        assert_eq!(body["verification"]["domain"], "cisco.com");
        assert_eq!(body["verification"]["method"], "dns");

        let (status, body) = call(
            &router,
            Method::GET,
            &format!("/api/v1/verification/check?cid={}", cid),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["verified"], true);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let (router, _) = test_router().await;

        let (status, _) = call(
            &router,
            Method::POST,
            "/api/v1/verification/verify",
            Some(json!({"cid": "bafyreimissing"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &router,
            Method::POST,
            "/api/v1/records/bafyreimissing/public-keys",
            Some(json!({"publicKey": "SGVsbG8="})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &router,
            Method::POST,
            "/api/v1/records",
            Some(json!(["not", "an", "object"])),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &router,
            Method::GET,
            "/api/v1/verification/agents?domain=cisco.com",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(body["error"], "NotImplemented");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (router, _) = test_router().await;
        crate::metrics::record_verification("dns", true);

        let response = router
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("name_verifications_total"));
    }
}
