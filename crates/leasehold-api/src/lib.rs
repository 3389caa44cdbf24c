pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use leasehold_core::wire::paths;

pub use handlers::{ApiError, ApiState};

/// Full application router, everything nested under `/api`.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route(
            paths::GET_RUNS_WITH_PENDING_MESSAGES,
            post(handlers::handle_pending_runs),
        )
        .route(paths::REQUEST_TOKEN, post(handlers::handle_request_token))
        .route(paths::PULL_INPUTS, post(handlers::handle_pull_inputs))
        .route(paths::PUSH_OUTPUTS, post(handlers::handle_push_outputs))
        .route(paths::PULL_MESSAGE, post(handlers::handle_pull_message))
        .route(paths::PUSH_MESSAGE, post(handlers::handle_push_message))
        .route("/admin/runs", post(handlers::handle_register_run))
        .route(
            "/admin/runs/{run_id}",
            axum::routing::delete(handlers::handle_discard_run),
        )
        .route(
            "/admin/runs/{run_id}/context",
            post(handlers::handle_submit_context),
        )
        .route(
            "/admin/runs/{run_id}/messages",
            post(handlers::handle_enqueue_message).get(handlers::handle_drain_messages),
        )
        .route("/admin/runs/{run_id}/outputs", get(handlers::handle_outputs))
        .route("/status", get(handlers::handle_status))
        .route("/daemon/shutdown", post(handlers::handle_shutdown))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

pub async fn serve(state: ApiState, bind_addr: &str, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", bind_addr, port)).await?;
    serve_listener(state, listener).await
}

/// Serve on an already-bound listener.
pub async fn serve_listener(state: ApiState, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "API listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use leasehold_core::config::LeaseholdConfig;
    use leasehold_services::ExchangeService;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app(ttl_secs: u64) -> Router {
        let mut config = LeaseholdConfig::default();
        config.lease.ttl_secs = ttl_secs;
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        router(ApiState {
            service: ExchangeService::new(&config),
            shutdown_tx,
        })
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(v) => builder
                .header("content-type", "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn register(app: &Router, run_id: u64) {
        let (status, _) = call(
            app,
            Method::POST,
            "/api/admin/runs",
            Some(json!({
                "run_id": run_id,
                "fab_id": "acme/app",
                "fab_version": "1.0.0",
                "fab_content": "cafe",
                "context": { "run_id": run_id, "state": { "round": 1 } }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn lease_conflict_is_409_with_body() {
        let app = app(60);
        register(&app, 4).await;

        let (status, body) =
            call(&app, Method::POST, "/api/v0/appio/request-token", Some(json!({ "run_id": 4 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token"].as_str().unwrap().len(), 64);

        let (status, body) =
            call(&app, Method::POST, "/api/v0/appio/request-token", Some(json!({ "run_id": 4 }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "lease_conflict");
        assert_eq!(body["run_id"], 4);
    }

    #[tokio::test]
    async fn pull_inputs_carries_hex_fab() {
        let app = app(60);
        register(&app, 1).await;
        let (_, body) =
            call(&app, Method::POST, "/api/v0/appio/request-token", Some(json!({ "run_id": 1 }))).await;
        let token = body["token"].clone();

        let (status, inputs) =
            call(&app, Method::POST, "/api/v0/appio/pull-inputs", Some(json!({ "token": token }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(inputs["fab"]["content"], "cafe");
        assert_eq!(inputs["run"]["run_id"], 1);
        assert_eq!(inputs["context"]["state"]["round"], 1);
    }

    #[tokio::test]
    async fn bad_token_is_401() {
        let app = app(60);
        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v0/appio/pull-message",
            Some(json!({ "token": "deadbeef" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "invalid_token");
    }

    #[tokio::test]
    async fn expired_push_outputs_reports_deadline_exceeded() {
        let app = app(0);
        register(&app, 2).await;
        let (_, body) =
            call(&app, Method::POST, "/api/v0/appio/request-token", Some(json!({ "run_id": 2 }))).await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v0/appio/push-outputs",
            Some(json!({ "token": body["token"], "context": { "run_id": 2 } })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"]["code"], "DEADLINE_EXCEEDED");
    }

    #[tokio::test]
    async fn unknown_run_admin_routes_are_404() {
        let app = app(60);
        let (status, body) = call(&app, Method::GET, "/api/admin/runs/77/outputs", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "unknown_run");

        let (status, _) = call(&app, Method::DELETE, "/api/admin/runs/77", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_reports_runs() {
        let app = app(60);
        register(&app, 9).await;
        let (status, body) = call(&app, Method::GET, "/api/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["runs"], 1);
        assert_eq!(body["pending_runs"], json!([9]));
        assert_eq!(body["message_auth"], "active_lease");
    }
}
