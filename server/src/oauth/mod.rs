//! The authorization code flow: storing outgoing requests, validating the
//! redirect back, and trading the code for tokens

pub mod callback;
pub mod exchange;
pub mod request_state;
pub mod utils;

pub use callback::{validate_callback, CallbackParams};
pub use exchange::{TokenExchanger, TokenGrant, TokenResponse};
pub use request_state::{AuthorizationRequestState, MemoryStateStore, StateLookup, StateStore};

use serde::Serialize;

use crate::config::OAuthClientConfig;

#[derive(Serialize)]
struct AuthorizeParams<'a> {
    response_type: &'static str,
    client_id: &'a str,
    redirect_uri: &'a str,
    scope: &'a str,
    state: &'a str,
    nonce: &'a str,
}

/// Where to send the browser to start `request`
pub fn authorization_url(
    config: &OAuthClientConfig,
    request: &AuthorizationRequestState,
) -> color_eyre::Result<reqwest::Url> {
    let query = serde_urlencoded::to_string(AuthorizeParams {
        response_type: "code",
        client_id: &config.client_id,
        redirect_uri: &request.redirect_uri,
        scope: &config.scope,
        state: &request.state,
        nonce: &request.nonce,
    })?;

    let mut url = config.authorize_endpoint.clone();
    let query = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{query}"),
        _ => query,
    };
    url.set_query(Some(&query));

    Ok(url)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::config::{ClientAuthMethod, ClientSecret, TokenRequestFormat};

    fn config(authorize_endpoint: &str) -> OAuthClientConfig {
        OAuthClientConfig {
            token_endpoint: "https://auth.example.com/token".parse().unwrap(),
            authorize_endpoint: authorize_endpoint.parse().unwrap(),
            client_id: "client-1".to_string(),
            client_secret: ClientSecret::new("secret-1"),
            redirect_uri: "https://app.example.com/oauth/callback".to_string(),
            timeout: Duration::from_secs(10),
            scope: "openid profile".to_string(),
            token_request_format: TokenRequestFormat::Form,
            client_auth: ClientAuthMethod::ClientSecretPost,
            allow_insecure_endpoints: false,
        }
    }

    #[test]
    fn test_authorization_url_carries_state_and_nonce() -> color_eyre::Result<()> {
        let config = config("https://auth.example.com/authorize");
        let request = AuthorizationRequestState::new(&config.redirect_uri);

        let url = authorization_url(&config, &request)?;
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "client-1");
        assert_eq!(params["redirect_uri"], "https://app.example.com/oauth/callback");
        assert_eq!(params["scope"], "openid profile");
        assert_eq!(params["state"], request.state);
        assert_eq!(params["nonce"], request.nonce);
        assert!(!url.as_str().contains("secret-1"));
        Ok(())
    }

    #[test]
    fn test_authorization_url_keeps_existing_query() -> color_eyre::Result<()> {
        let config = config("https://auth.example.com/authorize?tenant=acme");
        let request = AuthorizationRequestState::new(&config.redirect_uri);

        let url = authorization_url(&config, &request)?;
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(params["tenant"], "acme");
        assert_eq!(params["state"], request.state);
        Ok(())
    }
}
