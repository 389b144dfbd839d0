use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use super::request_state::StateLookup;
use super::utils::constant_time_eq;
use crate::errors::FlowError;

/// Query parameters the authorization server redirects back with
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Decide whether a callback may proceed to the token exchange.
///
/// `stored` is the already-consumed lookup for this browser's flow, so the
/// stored state is invalidated whatever this returns. Checks run in order:
/// an authorization server error wins, then a missing code, then the state.
/// On success the authorization code is returned.
pub fn validate_callback(
    params: CallbackParams,
    stored: StateLookup,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<String, FlowError> {
    if let Some(error) = params.error {
        return Err(FlowError::AuthorizationDenied {
            error,
            description: params.error_description,
        });
    }

    let code = params
        .code
        .filter(|code| !code.is_empty())
        .ok_or(FlowError::MissingAuthorizationCode)?;

    let stored = match stored {
        StateLookup::Live(stored) => stored,
        // A replay of a flow that already came back
        StateLookup::Consumed => return Err(FlowError::StateMismatch),
        StateLookup::Missing => return Err(FlowError::StateExpiredOrMissing),
    };

    if stored.is_expired(ttl, now) {
        return Err(FlowError::StateExpiredOrMissing);
    }

    let returned = params.state.unwrap_or_default();
    if !constant_time_eq(returned.as_bytes(), stored.state.as_bytes()) {
        return Err(FlowError::StateMismatch);
    }

    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::oauth::request_state::AuthorizationRequestState;

    fn stored(state: &str, age: Duration) -> StateLookup {
        StateLookup::Live(AuthorizationRequestState {
            state: state.to_string(),
            nonce: "nonce".to_string(),
            created_at: Utc::now() - age,
            redirect_uri: "https://app.example.com/oauth/callback".to_string(),
        })
    }

    fn params(code: Option<&str>, state: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(str::to_string),
            state: state.map(str::to_string),
            ..Default::default()
        }
    }

    fn kind(result: Result<String, FlowError>) -> ErrorKind {
        result.expect_err("callback should have been rejected").kind()
    }

    #[test]
    fn test_matching_state_proceeds_with_code() -> color_eyre::Result<()> {
        let code = validate_callback(
            params(Some("abc123"), Some("xyz")),
            stored("xyz", Duration::minutes(2)),
            Duration::minutes(10),
            Utc::now(),
        )?;

        assert_eq!(code, "abc123");
        Ok(())
    }

    #[test]
    fn test_error_parameter_is_a_denial() {
        let result = validate_callback(
            CallbackParams {
                code: Some("abc123".to_string()),
                state: Some("xyz".to_string()),
                error: Some("access_denied".to_string()),
                error_description: Some("The user said no".to_string()),
            },
            stored("xyz", Duration::minutes(2)),
            Duration::minutes(10),
            Utc::now(),
        );

        match result {
            Err(FlowError::AuthorizationDenied { error, description }) => {
                assert_eq!(error, "access_denied");
                assert_eq!(description.as_deref(), Some("The user said no"));
            }
            other => panic!("expected a denial, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_or_empty_code() {
        for code in [None, Some("")] {
            let result = validate_callback(
                params(code, Some("xyz")),
                stored("xyz", Duration::minutes(2)),
                Duration::minutes(10),
                Utc::now(),
            );
            assert_eq!(kind(result), ErrorKind::MissingAuthorizationCode);
        }
    }

    #[test]
    fn test_missing_stored_state() {
        let result = validate_callback(
            params(Some("abc123"), Some("xyz")),
            StateLookup::Missing,
            Duration::minutes(10),
            Utc::now(),
        );

        assert_eq!(kind(result), ErrorKind::StateExpiredOrMissing);
    }

    #[test]
    fn test_expired_stored_state() {
        let result = validate_callback(
            params(Some("abc123"), Some("xyz")),
            stored("xyz", Duration::minutes(11)),
            Duration::minutes(10),
            Utc::now(),
        );

        assert_eq!(kind(result), ErrorKind::StateExpiredOrMissing);
    }

    #[test]
    fn test_state_mismatch_and_absent_state() {
        for returned in [Some("xyZ"), Some("xyz "), None] {
            let result = validate_callback(
                params(Some("abc123"), returned),
                stored("xyz", Duration::minutes(2)),
                Duration::minutes(10),
                Utc::now(),
            );
            assert_eq!(kind(result), ErrorKind::StateMismatch);
        }
    }

    #[test]
    fn test_replayed_flow_is_a_mismatch() {
        let result = validate_callback(
            params(Some("abc123"), Some("xyz")),
            StateLookup::Consumed,
            Duration::minutes(10),
            Utc::now(),
        );

        assert_eq!(kind(result), ErrorKind::StateMismatch);
    }
}
