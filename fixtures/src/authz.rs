//! A tiny authorization server: consents to everything on `/authorize` and
//! answers `/token` according to how each code was issued.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

/// How `/token` answers for a given code
#[derive(Debug, Clone, PartialEq)]
pub enum TokenBehavior {
    /// A full token response with refresh token, scope and subject
    Normal,
    /// Exactly this JSON body with a 200
    Body(Value),
    /// A 200 whose JSON lacks `access_token`
    MissingAccessToken,
    /// A 200 with an HTML body
    NotJson,
    /// A normal answer after sleeping
    Slow(Duration),
    /// A 500 with `server_error`
    ServerError,
}

/// What the fixture saw on one `/token` call
#[derive(Debug, Clone)]
pub struct TokenRequestRecord {
    pub content_type: Option<String>,
    pub authorization: Option<String>,
    pub params: HashMap<String, String>,
}

struct IssuedCode {
    behavior: TokenBehavior,
    used: bool,
}

#[derive(Default)]
struct Inner {
    codes: HashMap<String, IssuedCode>,
    token_requests: Vec<TokenRequestRecord>,
}

#[derive(Clone)]
pub struct AuthzState {
    client_id: String,
    client_secret: String,
    inner: Arc<Mutex<Inner>>,
}

impl AuthzState {
    pub fn with_client(client_id: &str, client_secret: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            inner: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking handler only poisons fixture bookkeeping
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make `code` redeemable once, answered with `behavior`
    pub fn issue_code(&self, code: &str, behavior: TokenBehavior) {
        self.lock().codes.insert(
            code.to_string(),
            IssuedCode {
                behavior,
                used: false,
            },
        );
    }

    pub fn token_requests(&self) -> Vec<TokenRequestRecord> {
        self.lock().token_requests.clone()
    }
}

pub fn router(state: AuthzState) -> Router {
    Router::new()
        .route("/authorize", get(authorize))
        .route("/token", post(token))
        .with_state(state)
}

/// Serve the fixture on an ephemeral loopback port
pub async fn spawn(state: AuthzState) -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router(state)).await {
            warn!("Authorization fixture stopped: {err}");
        }
    });

    Ok(addr)
}

#[derive(Debug, Deserialize)]
struct AuthorizeParams {
    response_type: String,
    client_id: String,
    redirect_uri: String,
    state: Option<String>,
}

#[derive(Serialize)]
struct RedirectParams<'a> {
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'a str>,
}

async fn authorize(
    State(state): State<AuthzState>,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    if params.response_type != "code" {
        return oauth_error(StatusCode::BAD_REQUEST, "unsupported_response_type", None);
    }
    if params.client_id != state.client_id {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_client", None);
    }

    let code = Uuid::new_v4().simple().to_string();
    state.issue_code(&code, TokenBehavior::Normal);

    let query = match serde_urlencoded::to_string(RedirectParams {
        code: &code,
        state: params.state.as_deref(),
    }) {
        Ok(query) => query,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    let separator = if params.redirect_uri.contains('?') { '&' } else { '?' };

    info!("Authz: consenting and redirecting to {}", params.redirect_uri);
    Redirect::to(&format!("{}{}{}", params.redirect_uri, separator, query)).into_response()
}

async fn token(State(state): State<AuthzState>, headers: HeaderMap, body: Bytes) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let is_json = content_type
        .as_deref()
        .is_some_and(|value| value.starts_with("application/json"));
    let params = if is_json {
        parse_json_params(&body)
    } else {
        serde_urlencoded::from_bytes::<HashMap<String, String>>(&body).ok()
    };
    let Some(params) = params else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", None);
    };

    state.lock().token_requests.push(TokenRequestRecord {
        content_type,
        authorization: authorization.clone(),
        params: params.clone(),
    });

    let (client_id, client_secret) = match authorization.as_deref().and_then(basic_credentials) {
        Some(credentials) => credentials,
        None => (
            params.get("client_id").cloned().unwrap_or_default(),
            params.get("client_secret").cloned().unwrap_or_default(),
        ),
    };
    if client_id != state.client_id || client_secret != state.client_secret {
        return oauth_error(StatusCode::UNAUTHORIZED, "invalid_client", None);
    }

    if params.get("grant_type").map(String::as_str) != Some("authorization_code") {
        return oauth_error(StatusCode::BAD_REQUEST, "unsupported_grant_type", None);
    }

    let code = params.get("code").cloned().unwrap_or_default();
    let behavior = {
        let mut inner = state.lock();
        match inner.codes.get_mut(&code) {
            None => None,
            Some(issued) if issued.used => Some(Err(())),
            Some(issued) => {
                issued.used = true;
                Some(Ok(issued.behavior.clone()))
            }
        }
    };

    match behavior {
        None => oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_grant",
            Some("authorization code is invalid or expired"),
        ),
        Some(Err(())) => oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_grant",
            Some("authorization code already used"),
        ),
        Some(Ok(behavior)) => token_answer(&code, behavior).await,
    }
}

async fn token_answer(code: &str, behavior: TokenBehavior) -> Response {
    match behavior {
        TokenBehavior::Normal => Json(normal_token(code)).into_response(),
        TokenBehavior::Body(body) => Json(body).into_response(),
        TokenBehavior::MissingAccessToken => Json(json!({
            "token_type": "Bearer",
            "expires_in": 3600,
        }))
        .into_response(),
        TokenBehavior::NotJson => (
            [(header::CONTENT_TYPE, "text/html")],
            "<html><body>Service Unavailable</body></html>",
        )
            .into_response(),
        TokenBehavior::Slow(delay) => {
            tokio::time::sleep(delay).await;
            Json(normal_token(code)).into_response()
        }
        TokenBehavior::ServerError => {
            oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", None)
        }
    }
}

fn normal_token(code: &str) -> Value {
    json!({
        "access_token": format!("access-{code}"),
        "refresh_token": format!("refresh-{code}"),
        "token_type": "Bearer",
        "expires_in": 3600,
        "scope": "openid",
        "sub": format!("user-{code}"),
    })
}

fn parse_json_params(body: &[u8]) -> Option<HashMap<String, String>> {
    let object: HashMap<String, Value> = serde_json::from_slice(body).ok()?;

    Some(
        object
            .into_iter()
            .filter_map(|(key, value)| value.as_str().map(|value| (key, value.to_string())))
            .collect(),
    )
}

fn basic_credentials(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded).ok()?).ok()?;
    let (id, secret) = decoded.split_once(':')?;

    Some((id.to_string(), secret.to_string()))
}

fn oauth_error(status: StatusCode, error: &str, description: Option<&str>) -> Response {
    let body = match description {
        Some(description) => json!({ "error": error, "error_description": description }),
        None => json!({ "error": error }),
    };

    (status, Json(body)).into_response()
}
