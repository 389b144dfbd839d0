use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Json,
};
use chrono::{DateTime, Utc};
use color_eyre::eyre::WrapErr;
use serde::Serialize;
use tower_cookies::CookieManagerLayer;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, Span};

use crate::{
    auth::OptionalSession,
    components::{
        button::Button,
        layout::{Card, Page},
    },
    cookies::CookieJar,
    errors::ServerResult,
    state::AppState,
};

pub mod oauth;

/// Routes served to browsers
pub fn routes(app_state: AppState) -> axum::Router {
    let router = axum::Router::new()
        .route("/", get(root_page))
        .route("/session", get(session_status))
        .route("/logout", post(logout))
        .route("/oauth/login", get(oauth::login))
        .route("/oauth/callback", get(oauth::callback));

    with_observability(router).with_state(app_state)
}

/// Routes for trusted callers only. Bind these to loopback.
pub fn internal_routes(app_state: AppState) -> axum::Router {
    let router = axum::Router::new().route("/token", post(oauth::exchange_token));

    with_observability(router).with_state(app_state)
}

/// Cookies, request ids and a trace span per request. The span records the
/// path but not the query, which carries authorization codes.
fn with_observability(router: axum::Router<AppState>) -> axum::Router<AppState> {
    router
        .layer(CookieManagerLayer::new())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

fn make_request_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|id| id.to_str().ok())
        .unwrap_or_default();

    tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
    )
}

async fn root_page(OptionalSession(session): OptionalSession) -> Page {
    use maud::html;

    let content = match session {
        Some(session) => html! {
            h1 class="text-3xl font-bold mb-2 text-gray-800" { "You are signed in" }
            p class="text-gray-600 mb-6" {
                "Your session is good until " (session.token.expires_at.format("%Y-%m-%d %H:%M UTC").to_string()) "."
            }
            form method="post" action="/logout" {
                (Button::secondary("Sign out").full_width(true))
            }
        },
        None => html! {
            h1 class="text-3xl font-bold mb-2 text-gray-800" { "Welcome" }
            p class="text-gray-600 mb-6" { "Sign in to continue." }
            (Button::primary("Sign in").href("/oauth/login").full_width(true))
        },
    };

    Page::new("Home", Card::new(content))
}

#[derive(Debug, Serialize)]
struct SessionStatus {
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

async fn session_status(OptionalSession(session): OptionalSession) -> Json<SessionStatus> {
    Json(SessionStatus {
        authenticated: session.is_some(),
        expires_at: session.map(|s| s.token.expires_at),
    })
}

/// Logout route - clears the session cookie and redirects to home
async fn logout(
    State(state): State<AppState>,
    cookies: CookieJar,
) -> ServerResult<impl IntoResponse, StatusCode> {
    crate::auth::end_session(&state, &cookies)
        .await
        .wrap_err("Failed to end user session")?;

    info!("User logged out successfully");
    Ok(Redirect::to("/"))
}
