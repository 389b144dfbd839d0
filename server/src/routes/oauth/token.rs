use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use color_eyre::eyre::WrapErr;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    auth::establish_session,
    cookies::CookieJar,
    errors::{ErrorKind, FlowError, ServerResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ExchangeRequest {
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct ExchangeResponse {
    pub result: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

/// Trade a code for a session. The answer names the failure kind but never
/// carries token material; the session itself travels in `Set-Cookie`.
pub async fn exchange_token(
    State(state): State<AppState>,
    cookies: CookieJar,
    request: Result<Json<ExchangeRequest>, JsonRejection>,
) -> ServerResult<Response, StatusCode> {
    // Anything that does not carry a usable code is answered the same way
    let request = match request {
        Ok(Json(request)) => request,
        Err(rejection) => {
            debug!(status = %rejection.status(), "Unreadable token request body");
            return Ok(rejected(FlowError::MissingAuthorizationCode));
        }
    };

    if request.code.is_empty() {
        return Ok(rejected(FlowError::MissingAuthorizationCode));
    }

    let grant = match state.exchanger.exchange(&request.code).await {
        Ok(grant) => grant,
        Err(err) => return Ok(rejected(err)),
    };

    let session = establish_session(&state, &cookies, grant)
        .await
        .wrap_err("Failed to create session")?;
    info!(session_id = %session.session_id, "Token exchange complete");

    Ok(Json(ExchangeResponse {
        result: true,
        error: None,
    })
    .into_response())
}

fn rejected(err: FlowError) -> Response {
    err.log();

    (
        err.status(),
        Json(ExchangeResponse {
            result: false,
            error: Some(err.kind()),
        }),
    )
        .into_response()
}
