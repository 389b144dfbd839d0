use chrono::{DateTime, Duration, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use crate::auth::{Session, SessionStore};
use crate::oauth::{AuthorizationRequestState, StateLookup, StateStore, TokenResponse};

#[tracing::instrument(skip_all, err)]
pub async fn setup_db_pool(database_url: &str) -> color_eyre::Result<PgPool> {
    const MIGRATION_LOCK_ID: i64 = 0x0A_07_C0_DE;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(&pool)
        .await?;

    sqlx::migrate!("../migrations").run(&pool).await?;

    let unlocked: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
        .bind(MIGRATION_LOCK_ID)
        .fetch_one(&pool)
        .await?;

    if unlocked {
        tracing::info!("Migration lock unlocked");
    } else {
        tracing::info!("Failed to unlock migration lock");
    }

    Ok(pool)
}

#[derive(sqlx::FromRow)]
struct StateRow {
    state: String,
    nonce: String,
    redirect_uri: String,
    created_at: DateTime<Utc>,
}

/// Authorization requests in `oauth_request_states`. Consumed rows are kept
/// as tombstones until they age out.
#[derive(Clone)]
pub struct PgStateStore {
    pool: PgPool,
    retention: Duration,
}

impl PgStateStore {
    pub fn new(pool: PgPool, retention: Duration) -> Self {
        Self { pool, retention }
    }
}

#[async_trait::async_trait]
impl StateStore for PgStateStore {
    async fn put(&self, flow_id: Uuid, state: AuthorizationRequestState) -> color_eyre::Result<()> {
        sqlx::query("DELETE FROM oauth_request_states WHERE created_at < $1")
            .bind(Utc::now() - self.retention)
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO oauth_request_states (flow_id, state, nonce, redirect_uri, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(flow_id)
        .bind(&state.state)
        .bind(&state.nonce)
        .bind(&state.redirect_uri)
        .bind(state.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn take(&self, flow_id: Uuid) -> color_eyre::Result<StateLookup> {
        // The conditional update is the single atomic step: only one
        // statement can flip consumed_at from NULL
        let row: Option<StateRow> = sqlx::query_as(
            r#"
            UPDATE oauth_request_states
            SET consumed_at = NOW()
            WHERE flow_id = $1 AND consumed_at IS NULL
            RETURNING state, nonce, redirect_uri, created_at
            "#,
        )
        .bind(flow_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(StateLookup::Live(AuthorizationRequestState {
                state: row.state,
                nonce: row.nonce,
                created_at: row.created_at,
                redirect_uri: row.redirect_uri,
            }));
        }

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM oauth_request_states WHERE flow_id = $1)",
        )
        .bind(flow_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(if exists {
            StateLookup::Consumed
        } else {
            StateLookup::Missing
        })
    }

    async fn is_consumed_state(&self, state: &str) -> color_eyre::Result<bool> {
        let consumed: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM oauth_request_states WHERE state = $1 AND consumed_at IS NOT NULL)",
        )
        .bind(state)
        .fetch_one(&self.pool)
        .await?;

        Ok(consumed)
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    session_id: Uuid,
    user_id: Option<String>,
    access_token: String,
    refresh_token: Option<String>,
    token_type: String,
    scope: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            session_id: row.session_id,
            user_id: row.user_id,
            token: TokenResponse {
                access_token: row.access_token,
                refresh_token: row.refresh_token,
                expires_at: row.expires_at,
                token_type: row.token_type,
                scope: row.scope,
            },
            created_at: row.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, session: &Session) -> color_eyre::Result<()> {
        sqlx::query("DELETE FROM sessions WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO sessions (
                session_id, user_id, access_token, refresh_token, token_type, scope, expires_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(session.session_id)
        .bind(session.user_id.as_deref())
        .bind(&session.token.access_token)
        .bind(session.token.refresh_token.as_deref())
        .bind(&session.token.token_type)
        .bind(&session.token.scope)
        .bind(session.token.expires_at)
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> color_eyre::Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT session_id, user_id, access_token, refresh_token, token_type, scope, expires_at, created_at
            FROM sessions
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Session::from))
    }

    async fn delete(&self, session_id: Uuid) -> color_eyre::Result<()> {
        sqlx::query("DELETE FROM sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
