//! Axum 服务层: 路由、认证中间件、统计端点
//!
//! The `/v1` surface requires a client key (`x-api-key` wins over
//! `Authorization: Bearer`); the service, health, stats and log endpoints
//! are open.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::AppResult;
use crate::modules::cache::TtlLruCache;
use crate::modules::logger;
use crate::modules::stats::StatsRegistry;
use crate::proxy::common::errors::openai_error;
use crate::proxy::handlers;
use crate::proxy::mappers::openai::Tool;
use crate::proxy::upstream::payload::GrazieMessage;
use crate::proxy::{AccountPool, ModelRegistry, ProxyConfig};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub registry: Arc<ModelRegistry>,
    pub pool: Arc<AccountPool>,
    pub stats: Arc<StatsRegistry>,
    pub message_cache: Arc<TtlLruCache<Vec<GrazieMessage>>>,
    pub tools_cache: Arc<TtlLruCache<Vec<Tool>>>,
    pub http: reqwest::Client,
}

pub fn build_router(state: AppState) -> Router {
    let authed = Router::new()
        .route("/v1/models", get(handlers::openai::list_models))
        .route("/v1/chat/completions", post(handlers::openai::chat_completions))
        .route("/v1/messages", post(handlers::anthropic::messages))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            authenticate_client,
        ));

    Router::new()
        .merge(authed)
        .route("/", get(service_info))
        .route("/health", get(health))
        .route("/api/stats", get(api_stats))
        .route("/log", get(recent_log))
        .with_state(state)
}

pub async fn run(state: AppState, shutdown: CancellationToken) -> AppResult<()> {
    let port = state.config.port;
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Listening on 0.0.0.0:{}", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// `x-api-key` takes precedence; a present-but-wrong key is 403, a missing
/// credential 401, and an unconfigured service 503.
async fn authenticate_client(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if state.config.client_keys.is_empty() {
        return openai_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Service unavailable: no client API keys configured",
        );
    }

    let headers = request.headers();
    let api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());
    if let Some(key) = api_key {
        if state.config.client_keys.contains(key) {
            return next.run(request).await;
        }
        return openai_error(StatusCode::FORBIDDEN, "Invalid client API key (x-api-key)");
    }

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());
    if let Some(raw) = auth_header {
        let token = raw.strip_prefix("Bearer ").unwrap_or(raw);
        if state.config.client_keys.contains(token) {
            return next.run(request).await;
        }
        return openai_error(
            StatusCode::FORBIDDEN,
            "Invalid client API key (Bearer token)",
        );
    }

    openai_error(
        StatusCode::UNAUTHORIZED,
        "API key required in Authorization header (Bearer) or x-api-key header",
    )
}

async fn service_info(State(state): State<AppState>) -> Response {
    Json(json!({
        "service": "grazie-relay",
        "models": state.registry.listed().len(),
        "accounts": state.pool.len(),
        "endpoints": ["/v1/models", "/v1/chat/completions", "/v1/messages", "/api/stats", "/health", "/log"],
    }))
    .into_response()
}

async fn health() -> Response {
    Json(json!({"status": "ok"})).into_response()
}

async fn api_stats(State(state): State<AppState>) -> Response {
    let snapshot = state.stats.snapshot();
    let avg_response_time = if snapshot.total_requests > 0 {
        snapshot.total_response_time / snapshot.total_requests
    } else {
        0
    };
    Json(json!({
        "total_requests": snapshot.total_requests,
        "successful_requests": snapshot.successful_requests,
        "failed_requests": snapshot.failed_requests,
        "average_response_time": avg_response_time,
        "current_qps": state.stats.current_qps(),
        "last_request_time": snapshot.last_request_time,
        "periods": {
            "1h": state.stats.period(1),
            "24h": state.stats.period(24),
        },
        "accounts": state.pool.account_infos(),
    }))
    .into_response()
}

async fn recent_log() -> Response {
    Json(json!({ "lines": logger::recent_logs(200) })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::GrazieAuthClient;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    fn test_state(keys: &[&str]) -> AppState {
        let config = ProxyConfig {
            port: 0,
            client_keys: keys.iter().map(|k| k.to_string()).collect(),
            upstream_base: "http://127.0.0.1:1".to_string(),
            models_path: "models.json".into(),
            stats_path: "stats.json".into(),
            redis_url: None,
            force_tool_prompt: false,
        };
        let http = reqwest::Client::new();
        let auth = GrazieAuthClient::new(http.clone(), config.upstream_base.clone());
        AppState {
            config: Arc::new(config),
            registry: Arc::new(ModelRegistry::from_json(
                r#"{"models": {"gpt-4o": "openai-gpt-4o"}}"#,
            )),
            pool: Arc::new(AccountPool::new(vec![], auth)),
            stats: Arc::new(StatsRegistry::default()),
            message_cache: Arc::new(TtlLruCache::new(16)),
            tools_cache: Arc::new(TtlLruCache::new(16)),
            http,
        }
    }

    async fn get_status(app: Router, uri: &str, headers: &[(&str, &str)]) -> StatusCode {
        let mut builder = HttpRequest::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let response = app
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        response.status()
    }

    #[tokio::test]
    async fn test_health_is_open() {
        let app = build_router(test_state(&["sk-key"]));
        assert_eq!(get_status(app, "/health", &[]).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_models_requires_key() {
        let state = test_state(&["sk-key"]);
        let app = build_router(state.clone());
        assert_eq!(
            get_status(app.clone(), "/v1/models", &[]).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(app.clone(), "/v1/models", &[("x-api-key", "wrong")]).await,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            get_status(app.clone(), "/v1/models", &[("x-api-key", "sk-key")]).await,
            StatusCode::OK
        );
        assert_eq!(
            get_status(app, "/v1/models", &[("authorization", "Bearer sk-key")]).await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_x_api_key_takes_precedence_over_bearer() {
        let app = build_router(test_state(&["sk-key"]));
        // Bad x-api-key rejects even when the bearer token is valid.
        let status = get_status(
            app,
            "/v1/models",
            &[("x-api-key", "wrong"), ("authorization", "Bearer sk-key")],
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_no_configured_keys_is_503() {
        let app = build_router(test_state(&[]));
        assert_eq!(
            get_status(app, "/v1/models", &[("x-api-key", "anything")]).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_stats_endpoint_shape() {
        let state = test_state(&["sk-key"]);
        state.stats.record(true, 120, "gpt-4o", "Token ...x");
        let app = build_router(state);
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/api/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1_000_000)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["total_requests"], 1);
        assert_eq!(parsed["successful_requests"], 1);
        assert!(parsed["periods"]["1h"]["requests"].is_number());
        assert!(parsed["accounts"].is_array());
    }
}
