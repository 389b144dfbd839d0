use axum::{
    extract::State,
    http::StatusCode,
    response::Redirect,
};
use color_eyre::eyre::WrapErr;
use tracing::info;
use uuid::Uuid;

use crate::{
    cookies::CookieJar,
    errors::{ServerResult, WithStatus},
    oauth::{self, AuthorizationRequestState},
    state::AppState,
};

/// Start an authorization: remember a fresh request, bind it to this browser
/// and send the browser to the authorization server
pub async fn login(
    State(state): State<AppState>,
    cookies: CookieJar,
) -> ServerResult<Redirect, StatusCode> {
    let flow_id = Uuid::new_v4();
    let request = AuthorizationRequestState::new(state.oauth.redirect_uri.clone());

    let url = oauth::authorization_url(&state.oauth, &request)
        .wrap_err("Failed to build authorization URL")
        .with_status(StatusCode::INTERNAL_SERVER_ERROR)?;

    state
        .states
        .put(flow_id, request)
        .await
        .wrap_err("Failed to store authorization request")?;

    cookies.set_flow_id(flow_id);

    info!(%flow_id, "Redirecting to authorization server");
    Ok(Redirect::to(url.as_str()))
}
