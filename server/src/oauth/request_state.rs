use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use color_eyre::eyre::eyre;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::utils::{constant_time_eq, random_token};

/// What we remember about an authorization request between sending the
/// browser away and it coming back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequestState {
    /// Anti-CSRF value round-tripped through the authorization server
    pub state: String,
    pub nonce: String,
    pub created_at: DateTime<Utc>,
    pub redirect_uri: String,
}

impl AuthorizationRequestState {
    pub fn new(redirect_uri: impl Into<String>) -> Self {
        Self {
            state: random_token(),
            nonce: random_token(),
            created_at: Utc::now(),
            redirect_uri: redirect_uri.into(),
        }
    }

    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.created_at + ttl <= now
    }
}

/// Result of consuming a stored authorization request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateLookup {
    /// Was live and is now consumed by this call
    Live(AuthorizationRequestState),
    /// Someone consumed it before us
    Consumed,
    Missing,
}

/// Storage for in-flight authorization requests, keyed by the flow id held in
/// the browser's flow cookie
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    async fn put(&self, flow_id: Uuid, state: AuthorizationRequestState) -> color_eyre::Result<()>;

    /// Look up and invalidate in one atomic step. At most one caller ever
    /// sees `Live` for a given flow id.
    async fn take(&self, flow_id: Uuid) -> color_eyre::Result<StateLookup>;

    /// Whether `state` belongs to a request that was already consumed. A
    /// replayed callback arrives without its flow cookie, so this is the only
    /// way to tell it apart from a state we never issued.
    async fn is_consumed_state(&self, state: &str) -> color_eyre::Result<bool>;
}

#[derive(Debug)]
enum Entry {
    Live(AuthorizationRequestState),
    Consumed { at: DateTime<Utc>, state: String },
}

/// Process-local state store
#[derive(Debug)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<Uuid, Entry>>,
    retention: Duration,
}

impl MemoryStateStore {
    /// `retention` bounds how long live and consumed entries are kept
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retention,
        }
    }

    fn prune(entries: &mut HashMap<Uuid, Entry>, cutoff: DateTime<Utc>) {
        entries.retain(|_, entry| match entry {
            Entry::Live(state) => state.created_at > cutoff,
            Entry::Consumed { at, .. } => *at > cutoff,
        });
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new(Duration::minutes(20))
    }
}

#[async_trait::async_trait]
impl StateStore for MemoryStateStore {
    async fn put(&self, flow_id: Uuid, state: AuthorizationRequestState) -> color_eyre::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| eyre!("State store lock poisoned"))?;

        Self::prune(&mut entries, Utc::now() - self.retention);
        entries.insert(flow_id, Entry::Live(state));

        Ok(())
    }

    async fn take(&self, flow_id: Uuid) -> color_eyre::Result<StateLookup> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| eyre!("State store lock poisoned"))?;

        let lookup = match entries.remove(&flow_id) {
            Some(Entry::Live(state)) => {
                entries.insert(
                    flow_id,
                    Entry::Consumed {
                        at: Utc::now(),
                        state: state.state.clone(),
                    },
                );
                StateLookup::Live(state)
            }
            // Keep the original consumption time
            Some(consumed @ Entry::Consumed { .. }) => {
                entries.insert(flow_id, consumed);
                StateLookup::Consumed
            }
            None => StateLookup::Missing,
        };

        Ok(lookup)
    }

    async fn is_consumed_state(&self, state: &str) -> color_eyre::Result<bool> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| eyre!("State store lock poisoned"))?;

        Ok(entries.values().any(|entry| match entry {
            Entry::Consumed { state: consumed, .. } => {
                constant_time_eq(consumed.as_bytes(), state.as_bytes())
            }
            Entry::Live(_) => false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_new_state_is_random_and_fresh() {
        let a = AuthorizationRequestState::new("https://app.example.com/oauth/callback");
        let b = AuthorizationRequestState::new("https://app.example.com/oauth/callback");

        assert_ne!(a.state, b.state);
        assert_ne!(a.state, a.nonce);
        assert!(!a.is_expired(Duration::minutes(10), Utc::now()));
    }

    #[test]
    fn test_state_expires_after_ttl() {
        let mut state = AuthorizationRequestState::new("https://app.example.com/oauth/callback");
        let now = Utc::now();

        state.created_at = now - Duration::minutes(2);
        assert!(!state.is_expired(Duration::minutes(10), now));

        state.created_at = now - Duration::minutes(11);
        assert!(state.is_expired(Duration::minutes(10), now));
    }

    #[tokio::test]
    async fn test_take_is_single_use() -> color_eyre::Result<()> {
        let store = MemoryStateStore::default();
        let flow_id = Uuid::new_v4();
        let state = AuthorizationRequestState::new("https://app.example.com/oauth/callback");

        store.put(flow_id, state.clone()).await?;

        assert_eq!(store.take(flow_id).await?, StateLookup::Live(state));
        assert_eq!(store.take(flow_id).await?, StateLookup::Consumed);
        assert_eq!(store.take(flow_id).await?, StateLookup::Consumed);
        assert_eq!(store.take(Uuid::new_v4()).await?, StateLookup::Missing);

        Ok(())
    }

    #[tokio::test]
    async fn test_consumed_state_is_remembered() -> color_eyre::Result<()> {
        let store = MemoryStateStore::default();
        let flow_id = Uuid::new_v4();
        let state = AuthorizationRequestState::new("https://app.example.com/oauth/callback");

        store.put(flow_id, state.clone()).await?;
        assert!(!store.is_consumed_state(&state.state).await?);

        store.take(flow_id).await?;
        assert!(store.is_consumed_state(&state.state).await?);
        assert!(!store.is_consumed_state("never-issued").await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_takes_see_one_live_state() -> color_eyre::Result<()> {
        let store = Arc::new(MemoryStateStore::default());
        let flow_id = Uuid::new_v4();
        store
            .put(
                flow_id,
                AuthorizationRequestState::new("https://app.example.com/oauth/callback"),
            )
            .await?;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.take(flow_id).await })
            })
            .collect();

        let mut live = 0;
        for handle in handles {
            if let StateLookup::Live(_) = handle.await?? {
                live += 1;
            }
        }

        assert_eq!(live, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_old_entries_are_pruned() -> color_eyre::Result<()> {
        let store = MemoryStateStore::new(Duration::minutes(20));
        let stale_id = Uuid::new_v4();
        let mut stale = AuthorizationRequestState::new("https://app.example.com/oauth/callback");
        stale.created_at = Utc::now() - Duration::hours(1);

        store.put(stale_id, stale).await?;
        store
            .put(
                Uuid::new_v4(),
                AuthorizationRequestState::new("https://app.example.com/oauth/callback"),
            )
            .await?;

        assert_eq!(store.take(stale_id).await?, StateLookup::Missing);
        Ok(())
    }
}
