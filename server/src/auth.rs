use std::collections::HashMap;
use std::sync::Mutex;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use color_eyre::eyre::eyre;
use time::{Duration, OffsetDateTime};
use tower_cookies::{cookie::SameSite, Cookie};
use tracing::{error, info};
use uuid::Uuid;

use crate::cookies::CookieJar;
use crate::oauth::{TokenGrant, TokenResponse};
use crate::state::AppState;
use crate::traits::IsExpired;

/// Cookie name for storing the session ID
pub const SESSION_COOKIE_NAME: &str = "oauth_session";

/// A signed-in browser. The token never leaves the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: Option<String>,
    pub token: TokenResponse,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(grant: TokenGrant) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id: grant.subject,
            token: grant.token,
            created_at: Utc::now(),
        }
    }
}

#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &Session) -> color_eyre::Result<()>;

    async fn get(&self, session_id: Uuid) -> color_eyre::Result<Option<Session>>;

    async fn delete(&self, session_id: Uuid) -> color_eyre::Result<()>;
}

/// Process-local session store
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl MemorySessionStore {
    fn lock(&self) -> color_eyre::Result<std::sync::MutexGuard<'_, HashMap<Uuid, Session>>> {
        self.sessions
            .lock()
            .map_err(|_| eyre!("Session store lock poisoned"))
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: &Session) -> color_eyre::Result<()> {
        let mut sessions = self.lock()?;
        let now = Utc::now();

        // Abandoned sessions are never read again, so drop them here
        sessions.retain(|_, existing| !existing.is_expired_at(now));
        sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> color_eyre::Result<Option<Session>> {
        Ok(self.lock()?.get(&session_id).cloned())
    }

    async fn delete(&self, session_id: Uuid) -> color_eyre::Result<()> {
        self.lock()?.remove(&session_id);
        Ok(())
    }
}

/// Extract the session from the request if there is a live one
#[derive(Debug, Clone)]
pub struct OptionalSession(pub Option<Session>);

#[async_trait::async_trait]
impl FromRequestParts<AppState> for OptionalSession {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let cookies = CookieJar::from_request_parts(parts, state).await?;

        let Some(session_id) = get_session_id_from_cookie(&cookies) else {
            return Ok(OptionalSession(None));
        };

        match validate_session(state, session_id).await {
            Ok(session) => Ok(OptionalSession(session)),
            Err(err) => {
                error!("Error validating session {}: {:?}", session_id, err);
                Err(StatusCode::INTERNAL_SERVER_ERROR.into_response())
            }
        }
    }
}

/// Get the session ID from the cookie
pub fn get_session_id_from_cookie(cookies: &CookieJar) -> Option<Uuid> {
    cookies
        .get(SESSION_COOKIE_NAME)
        .and_then(|cookie| cookie.value().parse::<Uuid>().ok())
}

/// Load a session, dropping it if it has expired
pub async fn validate_session(
    state: &AppState,
    session_id: Uuid,
) -> color_eyre::Result<Option<Session>> {
    let Some(session) = state.sessions.get(session_id).await? else {
        return Ok(None);
    };

    if session.is_expired() {
        info!("Session {} is expired", session_id);
        state.sessions.delete(session_id).await?;
        return Ok(None);
    }

    Ok(Some(session))
}

/// Session cookie that dies no later than the token it stands for
fn create_session_cookie(session: &Session, now: DateTime<Utc>) -> Cookie<'static> {
    let expires_at = session.token.expires_at;
    let remaining = (expires_at - now).num_seconds().max(0);

    let mut cookie = Cookie::new(SESSION_COOKIE_NAME, session.session_id.to_string());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_secure(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(Duration::seconds(remaining));
    if let Ok(expires) = OffsetDateTime::from_unix_timestamp(expires_at.timestamp()) {
        cookie.set_expires(expires);
    }
    cookie
}

/// Persist the tokens of a completed exchange and hand the browser a session
/// cookie. Nothing is stored until the grant has been fully validated, which
/// `TokenGrant` guarantees by construction.
pub async fn establish_session(
    state: &AppState,
    cookies: &CookieJar,
    grant: TokenGrant,
) -> color_eyre::Result<Session> {
    let session = Session::new(grant);

    state.sessions.insert(&session).await?;
    cookies.add(create_session_cookie(&session, Utc::now()));

    info!(
        session_id = %session.session_id,
        user_id = ?session.user_id,
        "Created new session"
    );
    Ok(session)
}

/// Clear the session cookie and drop the session from the store
pub async fn end_session(state: &AppState, cookies: &CookieJar) -> color_eyre::Result<()> {
    if let Some(session_id) = get_session_id_from_cookie(cookies) {
        state.sessions.delete(session_id).await?;
        info!("Session {} invalidated", session_id);
    }

    let mut cookie = Cookie::new(SESSION_COOKIE_NAME, "");
    cookie.set_path("/");
    cookies.remove(cookie);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_in: i64) -> Session {
        Session {
            session_id: Uuid::new_v4(),
            user_id: Some("user-42".to_string()),
            token: TokenResponse {
                access_token: "tok1".to_string(),
                refresh_token: None,
                expires_at: Utc::now() + chrono::Duration::seconds(expires_in),
                token_type: "Bearer".to_string(),
                scope: "openid".to_string(),
            },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_session_cookie_is_locked_down() {
        let session = session(3600);
        let cookie = create_session_cookie(&session, Utc::now());

        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.value(), session.session_id.to_string());
        assert!(!cookie.value().contains("tok1"));
    }

    #[test]
    fn test_session_cookie_does_not_outlive_token() {
        let session = session(3600);
        let now = Utc::now();
        let cookie = create_session_cookie(&session, now);

        let max_age = cookie.max_age().expect("max age is set");
        assert!(max_age <= Duration::seconds(3600));
        assert!(max_age > Duration::seconds(3500));
        assert_eq!(
            cookie.expires_datetime().map(|at| at.unix_timestamp()),
            Some(session.token.expires_at.timestamp())
        );
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() -> color_eyre::Result<()> {
        let store = MemorySessionStore::default();
        let session = session(3600);

        store.insert(&session).await?;
        assert_eq!(store.get(session.session_id).await?, Some(session.clone()));

        store.delete(session.session_id).await?;
        assert_eq!(store.get(session.session_id).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_sessions_are_pruned_on_insert() -> color_eyre::Result<()> {
        let store = MemorySessionStore::default();
        let abandoned = session(-60);
        let fresh = session(3600);

        store.insert(&abandoned).await?;
        store.insert(&fresh).await?;

        assert_eq!(store.get(abandoned.session_id).await?, None);
        assert_eq!(store.get(fresh.session_id).await?, Some(fresh));
        Ok(())
    }

    #[test]
    fn test_expired_session() {
        assert!(session(-1).is_expired());
        assert!(!session(60).is_expired());
    }
}
