use std::sync::Arc;

use color_eyre::eyre::{eyre, WrapErr};
use tower_cookies::Key;
use tracing::{info, warn};

use crate::auth::{MemorySessionStore, SessionStore};
use crate::config::{FlowSettings, OAuthClientConfig};
use crate::db::{self, PgSessionStore, PgStateStore};
use crate::oauth::{MemoryStateStore, StateStore, TokenExchanger};

#[derive(Clone)]
pub struct AppState {
    pub cookie_key: Key,
    pub oauth: Arc<OAuthClientConfig>,
    pub exchanger: TokenExchanger,
    pub states: Arc<dyn StateStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub settings: FlowSettings,
}

impl AppState {
    pub async fn from_env() -> color_eyre::Result<Self> {
        let oauth = OAuthClientConfig::from_env()?;
        let settings = FlowSettings::from_env()?;
        let cookie_key = cookie_key_from_env_or_generate()?;

        info!(
            token_endpoint = %oauth.token_endpoint,
            client_id = %oauth.client_id,
            redirect_uri = %oauth.redirect_uri,
            "Loaded OAuth client configuration"
        );

        let (states, sessions): (Arc<dyn StateStore>, Arc<dyn SessionStore>) =
            match std::env::var("DATABASE_URL") {
                Ok(database_url) => {
                    let pool = db::setup_db_pool(&database_url).await?;
                    info!("Using Postgres state and session stores");
                    (
                        Arc::new(PgStateStore::new(pool.clone(), settings.state_ttl * 2)),
                        Arc::new(PgSessionStore::new(pool)),
                    )
                }
                Err(_) => {
                    warn!("DATABASE_URL not set, using in-memory state and session stores");
                    (
                        Arc::new(MemoryStateStore::new(settings.state_ttl * 2)),
                        Arc::new(MemorySessionStore::default()),
                    )
                }
            };

        Self::new(oauth, settings, cookie_key, states, sessions)
    }

    pub fn new(
        oauth: OAuthClientConfig,
        settings: FlowSettings,
        cookie_key: Key,
        states: Arc<dyn StateStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> color_eyre::Result<Self> {
        oauth.validate()?;

        let oauth = Arc::new(oauth);
        let exchanger = TokenExchanger::new(oauth.clone())?;

        Ok(Self {
            cookie_key,
            oauth,
            exchanger,
            states,
            sessions,
            settings,
        })
    }

    /// State with process-local stores and a throwaway cookie key
    pub fn in_memory(oauth: OAuthClientConfig, settings: FlowSettings) -> color_eyre::Result<Self> {
        let retention = settings.state_ttl * 2;

        Self::new(
            oauth,
            settings,
            Key::generate(),
            Arc::new(MemoryStateStore::new(retention)),
            Arc::new(MemorySessionStore::default()),
        )
    }
}

/// Read `COOKIE_KEY` (standard base64, at least 64 bytes) or make one up.
/// A generated key logs everyone out on restart.
fn cookie_key_from_env_or_generate() -> color_eyre::Result<Key> {
    use base64::{engine::general_purpose::STANDARD, Engine};

    match std::env::var("COOKIE_KEY") {
        Ok(encoded) => {
            let bytes = STANDARD
                .decode(encoded.trim())
                .wrap_err("COOKIE_KEY is not valid base64")?;
            Key::try_from(bytes.as_slice())
                .map_err(|e| eyre!("COOKIE_KEY is unusable: {}", e))
        }
        Err(_) => {
            warn!("COOKIE_KEY not set, generating a random cookie key");
            Ok(Key::generate())
        }
    }
}
