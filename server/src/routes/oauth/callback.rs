use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use chrono::Utc;
use color_eyre::eyre::WrapErr;
use tracing::{info, Instrument as _};
use uuid::Uuid;

use crate::{
    auth::establish_session,
    cookies::CookieJar,
    errors::ServerResult,
    oauth::{validate_callback, CallbackParams, StateLookup},
    state::AppState,
};

use super::utils::failure_page;

/// Where the authorization server sends the browser back to.
///
/// The flow cookie is cleared and the stored request consumed before anything
/// else is looked at, so each flow gets exactly one callback whatever its
/// outcome.
pub async fn callback(
    State(state): State<AppState>,
    cookies: CookieJar,
    Query(params): Query<CallbackParams>,
) -> ServerResult<Response, StatusCode> {
    let flow_id = cookies.take_flow_id();
    let span = tracing::info_span!("oauth_callback", flow_id = ?flow_id);

    complete_callback(&state, &cookies, params, flow_id)
        .instrument(span)
        .await
}

async fn complete_callback(
    state: &AppState,
    cookies: &CookieJar,
    params: CallbackParams,
    flow_id: Option<Uuid>,
) -> ServerResult<Response, StatusCode> {
    let lookup = consume_flow(state, flow_id, params.state.as_deref())
        .await
        .wrap_err("Failed to consume authorization request")?;

    let code = match validate_callback(params, lookup, state.settings.state_ttl, Utc::now()) {
        Ok(code) => code,
        Err(err) => return Ok(failure_page(&err)),
    };

    let grant = match state.exchanger.exchange(&code).await {
        Ok(grant) => grant,
        Err(err) => return Ok(failure_page(&err)),
    };

    let session = establish_session(state, cookies, grant)
        .await
        .wrap_err("Failed to create session")?;

    info!(session_id = %session.session_id, "Authorization complete");
    Ok(Redirect::to(&state.settings.post_login_path).into_response())
}

/// Consume this browser's authorization request. A callback without a flow
/// cookie can still be a replay: its `state` then matches a consumed request.
async fn consume_flow(
    state: &AppState,
    flow_id: Option<Uuid>,
    returned_state: Option<&str>,
) -> color_eyre::Result<StateLookup> {
    if let Some(flow_id) = flow_id {
        return state.states.take(flow_id).await;
    }

    match returned_state {
        Some(returned) if !returned.is_empty() => {
            if state.states.is_consumed_state(returned).await? {
                Ok(StateLookup::Consumed)
            } else {
                Ok(StateLookup::Missing)
            }
        }
        _ => Ok(StateLookup::Missing),
    }
}
