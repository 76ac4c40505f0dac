//! Admin HTTP surface for operating the WhatsApp session.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, warn};

use crate::dispatch::{BulkResult, Recipient};
use crate::error::NotifyError;
use crate::notifier::{InitOutcome, LogoutOutcome, Notifier, SendResult, StatusReport};
use crate::templates::{Template, TemplateValue, Variables};

#[derive(Clone)]
pub struct AppState {
    pub notifier: Arc<Notifier>,
    pub admin_token: Arc<str>,
}

/// JSON error body: `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<NotifyError> for ApiError {
    fn from(err: NotifyError) -> Self {
        let status = match err {
            NotifyError::UnknownTemplate(_) | NotifyError::InvalidPhone(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct TestMessageRequest {
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct TemplateRequest {
    pub phone: String,
    pub template: String,
    #[serde(default)]
    pub variables: Variables,
}

#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub recipients: Vec<Recipient>,
    pub template: String,
    #[serde(default)]
    pub variables: Variables,
}

/// Every route except `/bulk` is bounded by `request_timeout`. A bulk run
/// takes as long as its recipient list needs and is not cut short.
pub fn build_app(state: AppState, request_timeout: Duration) -> Router {
    let timeout = TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout);

    let whatsapp = Router::new()
        .route("/initialize", post(initialize))
        .route("/status", get(status))
        .route("/test", post(send_test))
        .route("/template", post(send_template))
        .route("/logout", post(logout))
        .layer(timeout.clone())
        .route("/bulk", post(send_bulk))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin))
        .with_state(state);

    Router::new()
        .route("/livez", get(livez))
        .layer(timeout)
        .nest("/whatsapp", whatsapp)
}

async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| !state.admin_token.is_empty() && token == &*state.admin_token);

    if !authorized {
        warn!("Rejected unauthenticated request to {}", request.uri().path());
        return Err(ApiError {
            status: StatusCode::UNAUTHORIZED,
            message: "Unauthorized".to_string(),
        });
    }
    Ok(next.run(request).await)
}

async fn livez() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn initialize(State(state): State<AppState>) -> Json<InitOutcome> {
    Json(state.notifier.initialize().await)
}

async fn status(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.notifier.status().await)
}

async fn send_test(
    State(state): State<AppState>,
    Json(body): Json<TestMessageRequest>,
) -> Result<Json<SendResult>, ApiError> {
    if body.phone.trim().is_empty() || body.message.trim().is_empty() {
        return Err(ApiError::bad_request("phone and message are required"));
    }
    Ok(Json(
        state.notifier.send_message(&body.phone, &body.message).await,
    ))
}

async fn send_template(
    State(state): State<AppState>,
    Json(body): Json<TemplateRequest>,
) -> Result<Json<SendResult>, ApiError> {
    let vars = match body.template.parse::<Template>() {
        Ok(template) => with_default_date(template, body.variables),
        Err(_) => body.variables,
    };
    let result = state
        .notifier
        .send_template(&body.phone, &body.template, &vars)
        .await?;
    Ok(Json(result))
}

async fn send_bulk(
    State(state): State<AppState>,
    Json(body): Json<BulkRequest>,
) -> Result<Json<BulkResult>, ApiError> {
    if body.recipients.is_empty() {
        return Err(ApiError::bad_request("at least one recipient is required"));
    }
    let template: Template = body.template.parse()?;
    let vars = with_default_date(template, body.variables);
    let recipients = body.recipients;

    // The batch runs on its own task so a dropped connection does not stop
    // it halfway through the recipient list.
    let notifier = Arc::clone(&state.notifier);
    let batch = tokio::spawn(async move {
        notifier
            .send_bulk_template(&recipients, template, &vars)
            .await
    });

    let result = batch.await.map_err(|e| {
        error!("Bulk dispatch task failed: {}", e);
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("bulk dispatch failed: {e}"),
        }
    })?;
    Ok(Json(result))
}

async fn logout(State(state): State<AppState>) -> Json<LogoutOutcome> {
    Json(state.notifier.logout().await)
}

/// Reminders default `{fecha}` to today's local date when the caller
/// leaves it out.
fn with_default_date(template: Template, mut vars: Variables) -> Variables {
    if template.placeholders().contains(&"fecha") && !vars.contains_key("fecha") {
        let today = chrono::Local::now().format("%d/%m/%Y").to_string();
        vars.insert("fecha".to_string(), TemplateValue::from(today));
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gateway::testing::FakeGateway;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(fake: Arc<FakeGateway>) -> Router {
        app_with_timeout(fake, Duration::from_secs(30))
    }

    fn app_with_timeout(fake: Arc<FakeGateway>, request_timeout: Duration) -> Router {
        let config = Config::from_toml("").unwrap();
        let state = AppState {
            notifier: Arc::new(Notifier::new(fake, &config)),
            admin_token: Arc::from("secret"),
        };
        build_app(state, request_timeout)
    }

    fn three_recipients() -> serde_json::Value {
        serde_json::json!({
            "recipients": [
                {"phone": "584141234561"},
                {"phone": "584141234562"},
                {"phone": "584141234563"}
            ],
            "template": "attendance",
            "variables": {"clase": "Robótica I"}
        })
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, "Bearer secret")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_livez_is_public() {
        let response = app(Arc::new(FakeGateway::connected()))
            .oneshot(Request::builder().uri("/livez").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let response = app(Arc::new(FakeGateway::connected()))
            .oneshot(
                Request::builder()
                    .uri("/whatsapp/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_status_with_token() {
        let response = app(Arc::new(FakeGateway::connected()))
            .oneshot(
                Request::builder()
                    .uri("/whatsapp/status")
                    .header(header::AUTHORIZATION, "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["connected"], true);
        assert_eq!(json["status"], "open");
    }

    #[tokio::test]
    async fn test_unknown_template_is_bad_request() {
        let response = app(Arc::new(FakeGateway::connected()))
            .oneshot(post_json(
                "/whatsapp/template",
                serde_json::json!({"phone": "584141234567", "template": "nope"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_test_message_requires_fields() {
        let response = app(Arc::new(FakeGateway::connected()))
            .oneshot(post_json(
                "/whatsapp/test",
                serde_json::json!({"phone": "584141234567"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_template_fills_today_for_reminders() {
        let fake = Arc::new(FakeGateway::connected());
        let response = app(fake.clone())
            .oneshot(post_json(
                "/whatsapp/template",
                serde_json::json!({
                    "phone": "584141234567",
                    "template": "class_reminder",
                    "variables": {"nombre": "Ana", "clase": "Robótica I"}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["success"], true);

        let today = chrono::Local::now().format("%d/%m/%Y").to_string();
        let sent = fake.sent.lock().unwrap();
        assert!(sent[0].1.contains(&today));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_reports_partitions() {
        let fake = Arc::new(FakeGateway::connected());
        let response = app(fake.clone())
            .oneshot(post_json(
                "/whatsapp/bulk",
                serde_json::json!({
                    "recipients": [
                        {"phone": "584141234567", "name": "Ana Pérez"},
                        {"phone": "???"}
                    ],
                    "template": "attendance",
                    "variables": {"clase": "Robótica I", "hora": "4pm"}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], serde_json::json!(["584141234567"]));
        assert_eq!(json["failed"][0]["phone"], "???");

        let sent = fake.sent.lock().unwrap();
        assert!(sent[0].1.contains("Hola *Ana*"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_outlives_request_timeout() {
        let fake = Arc::new(FakeGateway::connected());
        // 3 recipients at the default 1.5 s pace need 3 s
        let response = app_with_timeout(fake.clone(), Duration::from_secs(2))
            .oneshot(post_json("/whatsapp/bulk", three_recipients()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"].as_array().unwrap().len(), 3);
        assert_eq!(fake.sent_jids().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_finishes_after_client_disconnects() {
        let fake = Arc::new(FakeGateway::connected());
        let request = tokio::spawn(
            app(fake.clone()).oneshot(post_json("/whatsapp/bulk", three_recipients())),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        request.abort();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(fake.sent_jids().len(), 3);
    }

    #[tokio::test]
    async fn test_bulk_requires_token() {
        let response = app(Arc::new(FakeGateway::connected()))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/whatsapp/bulk")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(three_recipients().to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_bulk_rejects_empty_recipients() {
        let response = app(Arc::new(FakeGateway::connected()))
            .oneshot(post_json(
                "/whatsapp/bulk",
                serde_json::json!({"recipients": [], "template": "attendance"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
