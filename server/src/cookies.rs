use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse as _, Response},
};
use tower_cookies::cookie::SameSite;
use tracing::error;
use uuid::Uuid;

pub use tower_cookies::Cookie;

use crate::state::AppState;

/// Cookie binding a browser to its in-flight authorization request
pub const FLOW_COOKIE_NAME: &str = "oauth_flow";

/// Private (encrypted and authenticated) cookies keyed by the app's cookie key
pub struct CookieJar {
    cookies: tower_cookies::Cookies,
    state: AppState,
}

#[async_trait::async_trait]
impl FromRequestParts<AppState> for CookieJar {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let cookies = match tower_cookies::Cookies::from_request_parts(parts, state).await {
            Ok(cookies) => cookies,
            Err(_) => {
                error!("Failed to extract cookies from request");
                return Err(StatusCode::INTERNAL_SERVER_ERROR.into_response());
            }
        };

        Ok(CookieJar {
            cookies,
            state: state.clone(),
        })
    }
}

impl CookieJar {
    /// Add a new private cookie
    pub fn add(&self, cookie: Cookie<'static>) {
        let private = self.cookies.private(&self.state.cookie_key);
        private.add(cookie);
    }

    /// Get a private cookie by name
    pub fn get(&self, name: &str) -> Option<Cookie<'static>> {
        let private = self.cookies.private(&self.state.cookie_key);
        private.get(name)
    }

    /// Removes the `cookie` from the jar.
    pub fn remove(&self, cookie: Cookie<'static>) {
        let private = self.cookies.private(&self.state.cookie_key);
        private.remove(cookie);
    }

    /// Bind this browser to `flow_id` for as long as the request state lives
    pub fn set_flow_id(&self, flow_id: Uuid) {
        let mut cookie = Cookie::new(FLOW_COOKIE_NAME, flow_id.to_string());
        cookie.set_path("/");
        cookie.set_http_only(true);
        cookie.set_secure(true);
        // Lax so the cookie survives the top-level redirect back from the
        // authorization server
        cookie.set_same_site(SameSite::Lax);
        cookie.set_max_age(time::Duration::seconds(
            self.state.settings.state_ttl.num_seconds(),
        ));
        self.add(cookie);
    }

    /// Read the flow id and clear the cookie. A flow cookie is good for one
    /// callback only.
    pub fn take_flow_id(&self) -> Option<Uuid> {
        let flow_id = self
            .get(FLOW_COOKIE_NAME)
            .and_then(|cookie| cookie.value().parse::<Uuid>().ok());

        let mut cookie = Cookie::new(FLOW_COOKIE_NAME, "");
        cookie.set_path("/");
        self.remove(cookie);

        flow_id
    }
}
