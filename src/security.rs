use crate::db::{Store, StoreError};
use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, sync::Arc};
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AuthState {
    keys: Arc<HashMap<String, KeyRecord>>,
    store: Store,
}

/// The caller behind a verified key, inserted as a request extension.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub user_id: String,
    pub email: String,
    pub api_key_id: String,
}

#[derive(Clone, Debug, PartialEq)]
struct KeyRecord {
    email: String,
    api_key_id: String,
}

impl AuthState {
    /// `raw` is the `API_KEYS` value: comma-separated `email:key` pairs.
    pub fn new(raw: &str, store: Store) -> Self {
        Self {
            keys: Arc::new(parse_keys(raw)),
            store,
        }
    }

    async fn authenticate(&self, presented: &str) -> Result<Option<AuthContext>, StoreError> {
        let Some(record) = self.keys.get(presented) else {
            return Ok(None);
        };
        let user = self.store.find_or_create_user(&record.email).await?;
        Ok(Some(AuthContext {
            user_id: user.id,
            email: user.email,
            api_key_id: record.api_key_id.clone(),
        }))
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "missing_api_key",
            "Provide X-Api-Key or Bearer token",
        ));
    };

    match state.authenticate(&presented).await {
        Ok(Some(context)) => {
            request.extensions_mut().insert(context);
            Ok(next.run(request).await)
        }
        Ok(None) => Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "invalid_api_key",
            "Key not recognized",
        )),
        Err(err) => {
            error!(target = "listing.api", error = %err, "user lookup failed during auth");
            Ok(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "auth_unavailable",
                "Could not resolve the calling user",
            ))
        }
    }
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string()).filter(|key| !key.is_empty());
    }
    headers
        .get("X-Api-Key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (status, Json(payload)).into_response()
}

fn parse_keys(raw: &str) -> HashMap<String, KeyRecord> {
    let mut entries = HashMap::new();
    for (idx, token) in raw.split(',').enumerate() {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        // Keys may contain ':'; emails may not.
        let mut parts = trimmed.splitn(2, ':');
        let email = parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty() && s.contains('@'));
        let key = parts.next().map(str::trim).filter(|s| !s.is_empty());
        match (email, key) {
            (Some(email), Some(secret)) => {
                entries.insert(
                    secret.to_string(),
                    KeyRecord {
                        email: email.to_string(),
                        api_key_id: format!("key-{:02}", idx + 1),
                    },
                );
            }
            _ => warn!(target = "listing.api", "ignored malformed API_KEYS entry: {trimmed}"),
        }
    }

    if entries.is_empty() {
        warn!(target = "listing.api", "API_KEYS produced no keys; every authenticated route will reject");
    } else {
        info!(target = "listing.api", key_count = entries.len(), "loaded API keys");
    }
    entries
}
