//! `/mcp` sub-router: remote tool invocation over plain JSON.

use crate::context::AppContext;
use crate::models::ApiError;
use crate::security::AuthContext;
use crate::service::ServiceErrorKind;
use crate::tools::{self, Envelope};
use axum::{
    Extension, Json, Router,
    extract::{FromRef, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use std::sync::Arc;

pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    Arc<AppContext>: FromRef<S>,
{
    Router::new()
        .route("/webhook/mcp", post(invoke_tool))
        .route("/webhook/tools", get(list_tools))
        .route("/webhook/query", post(query))
}

fn bad_request(detail: &str) -> Response {
    let payload = ApiError {
        error: "invalid_request".into(),
        detail: Some(detail.to_string()),
    };
    (StatusCode::BAD_REQUEST, Json(payload)).into_response()
}

fn envelope_status(envelope: &Envelope) -> StatusCode {
    match (envelope.success, envelope.kind()) {
        (true, _) => StatusCode::OK,
        (false, Some(ServiceErrorKind::InvalidInput)) => StatusCode::BAD_REQUEST,
        (false, _) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `POST /mcp/webhook/mcp` with `{tool, arguments}`.
async fn invoke_tool(
    State(ctx): State<Arc<AppContext>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<Value>,
) -> Response {
    crate::metrics::inc_requests("/mcp/webhook/mcp");
    let tool = body.get("tool").and_then(Value::as_str);
    let arguments = body.get("arguments").cloned();
    let (Some(tool), Some(arguments)) = (tool, arguments) else {
        return bad_request("Missing required fields: tool, arguments");
    };

    let envelope = tools::dispatch(&ctx, &auth.user_id, tool, arguments).await;
    (envelope_status(&envelope), Json(envelope)).into_response()
}

async fn list_tools(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    Json(json!({ "tools": ctx.tools.specs() }))
}

/// `POST /mcp/webhook/query` with `{query, context?}`, answered by the assistant.
async fn query(
    State(ctx): State<Arc<AppContext>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<Value>,
) -> Response {
    crate::metrics::inc_requests("/mcp/webhook/query");
    let Some(text) = body
        .get("query")
        .and_then(Value::as_str)
        .filter(|q| !q.trim().is_empty())
    else {
        return bad_request("Query field is required");
    };
    let context = body.get("context").cloned().unwrap_or(Value::Null);

    let arguments = if context.is_null() {
        json!({ "query": text })
    } else {
        json!({ "query": text, "context": context })
    };
    let envelope = tools::dispatch(&ctx, &auth.user_id, "ai_assistant", arguments).await;
    let status = envelope_status(&envelope);
    let body = if envelope.success {
        json!({ "success": true, "result": envelope.data })
    } else {
        json!({ "success": false, "error": envelope.error, "message": envelope.message })
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmConfig;
    use crate::test_support::{MockMarketplace, test_context, test_context_with_llm};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn app(ctx: AppContext, user_id: &str) -> Router {
        router::<Arc<AppContext>>()
            .layer(Extension(AuthContext {
                user_id: user_id.to_string(),
                email: "seller@example.com".into(),
                api_key_id: "key-01".into(),
            }))
            .with_state(Arc::new(ctx))
    }

    async fn call(app: Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn missing_fields_are_rejected() {
        let (ctx, user) = test_context(Arc::new(MockMarketplace::new())).await;
        let (status, body) =
            call(app(ctx, &user.id), "POST", "/webhook/mcp", json!({"tool": "get_listing"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Missing required fields: tool, arguments");
    }

    #[tokio::test]
    async fn unknown_tool_is_a_400_envelope() {
        let (ctx, user) = test_context(Arc::new(MockMarketplace::new())).await;
        let (status, body) = call(
            app(ctx, &user.id),
            "POST",
            "/webhook/mcp",
            json!({"tool": "nope", "arguments": {}}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["message"], "Unknown tool: nope");
    }

    #[tokio::test]
    async fn tool_invocation_returns_the_envelope() {
        let mock = MockMarketplace::new();
        mock.seed("110000000042", "Vintage Camera", 49.99, 1);
        let (ctx, user) = test_context(Arc::new(mock)).await;
        let (status, body) = call(
            app(ctx, &user.id),
            "POST",
            "/webhook/mcp",
            json!({"tool": "get_listing", "arguments": {"listing_id": "110000000042"}}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["listing"]["title"], "Vintage Camera");
    }

    #[tokio::test]
    async fn marketplace_failure_is_a_500_envelope() {
        let (ctx, user) = test_context(Arc::new(MockMarketplace::new().reject_end())).await;
        let (status, body) = call(
            app(ctx, &user.id),
            "POST",
            "/webhook/mcp",
            json!({"tool": "delete_listing", "arguments": {"listing_id": "1"}}),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Failed to delete listing");
    }

    #[tokio::test]
    async fn tool_listing() {
        let (ctx, user) = test_context(Arc::new(MockMarketplace::new())).await;
        let (status, body) = call(app(ctx, &user.id), "GET", "/webhook/tools", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 11);
        assert!(tools.iter().all(|t| t["schema"]["type"] == "object"));
    }

    #[tokio::test]
    async fn query_requires_text() {
        let (ctx, user) = test_context(Arc::new(MockMarketplace::new())).await;
        let (status, body) =
            call(app(ctx, &user.id), "POST", "/webhook/query", json!({"query": ""})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Query field is required");
    }

    #[tokio::test]
    async fn query_is_answered_by_the_assistant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/inference"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "Add more photos."}]
            })))
            .mount(&server)
            .await;
        let (ctx, user) = test_context_with_llm(
            Arc::new(MockMarketplace::new()),
            LlmConfig::for_gateway(&server.uri()),
        )
        .await;
        let (status, body) = call(
            app(ctx, &user.id),
            "POST",
            "/webhook/query",
            json!({"query": "How do I sell faster?", "context": {"listing_id": "1"}}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["result"]["response"], "Add more photos.");
        assert_eq!(body["result"]["query"], "How do I sell faster?");
    }

    #[tokio::test]
    async fn unconfigured_assistant_is_a_500() {
        let (ctx, user) = test_context(Arc::new(MockMarketplace::new())).await;
        let (status, body) =
            call(app(ctx, &user.id), "POST", "/webhook/query", json!({"query": "hi"})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], json!(false));
    }
}
