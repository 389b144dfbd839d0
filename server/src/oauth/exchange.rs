use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use color_eyre::eyre::WrapErr;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::utils::fingerprint;
use crate::config::{ClientAuthMethod, OAuthClientConfig, TokenRequestFormat};
use crate::errors::FlowError;

/// Tokens issued for one completed authorization
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Receipt time plus `expires_in`
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    pub scope: String,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"***")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish()
    }
}

/// A validated token response together with who it was issued for
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub token: TokenResponse,
    /// The `sub` member, when the authorization server sends one
    pub subject: Option<String>,
}

/// The token endpoint's answer as it comes off the wire. Nothing here is
/// trusted until `TokenGrant::from_body` has checked it.
#[derive(Deserialize)]
struct RawTokenResponse {
    access_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
    sub: Option<String>,
}

#[derive(Deserialize)]
struct OAuthErrorBody {
    error: String,
    error_description: Option<String>,
}

impl TokenGrant {
    /// Validate a 2xx token endpoint body received at `received_at`.
    ///
    /// Any absolute expiry the server includes is ignored.
    pub fn from_body(
        body: &[u8],
        received_at: DateTime<Utc>,
        requested_scope: &str,
    ) -> Result<Self, FlowError> {
        let raw: RawTokenResponse = serde_json::from_slice(body)
            .map_err(|_| FlowError::MalformedResponse("body is not a JSON token object"))?;

        let access_token = raw
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or(FlowError::MalformedResponse("missing access_token"))?;
        let token_type = raw
            .token_type
            .filter(|token_type| !token_type.is_empty())
            .ok_or(FlowError::MalformedResponse("missing token_type"))?;
        let expires_in = raw
            .expires_in
            .ok_or(FlowError::MalformedResponse("missing expires_in"))?;

        if expires_in <= 0 {
            return Err(FlowError::MalformedResponse("expires_in is not positive"));
        }

        let expires_at = Duration::try_seconds(expires_in)
            .and_then(|lifetime| received_at.checked_add_signed(lifetime))
            .ok_or(FlowError::MalformedResponse("expires_in is out of range"))?;

        Ok(Self {
            token: TokenResponse {
                access_token,
                refresh_token: raw.refresh_token.filter(|token| !token.is_empty()),
                expires_at,
                token_type,
                // An omitted scope means the one we asked for
                scope: raw.scope.unwrap_or_else(|| requested_scope.to_string()),
            },
            subject: raw.sub,
        })
    }
}

/// Map a non-2xx token endpoint answer onto the flow taxonomy
pub fn classify_error_response(status: u16, body: &[u8]) -> FlowError {
    match serde_json::from_slice::<OAuthErrorBody>(body) {
        Ok(err) if err.error == "invalid_grant" => {
            let description = err.error_description.unwrap_or_default();
            if reports_consumed_code(&description) {
                FlowError::CodeAlreadyConsumed
            } else {
                FlowError::InvalidGrant(description)
            }
        }
        Ok(err) => FlowError::UpstreamError {
            status,
            error: err.error,
        },
        Err(_) => FlowError::UpstreamError {
            status,
            error: "unparseable error body".to_string(),
        },
    }
}

fn reports_consumed_code(description: &str) -> bool {
    let description = description.to_ascii_lowercase();
    ["already used", "already been used", "consumed", "redeemed", "reused"]
        .iter()
        .any(|marker| description.contains(marker))
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'static str,
    code: &'a str,
    redirect_uri: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<&'a str>,
}

/// Trades authorization codes for tokens at the configured token endpoint.
///
/// Each code is sent exactly once. A failed exchange is never retried since
/// the authorization server must refuse a second use of the same code.
#[derive(Clone)]
pub struct TokenExchanger {
    client: reqwest::Client,
    config: Arc<OAuthClientConfig>,
}

impl TokenExchanger {
    pub fn new(config: Arc<OAuthClientConfig>) -> color_eyre::Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .use_rustls_tls()
            .https_only(!config.allow_insecure_endpoints)
            .build()
            .wrap_err("Failed to build token endpoint client")?;

        Ok(Self { client, config })
    }

    #[tracing::instrument(skip_all, fields(code = %fingerprint(code)))]
    pub async fn exchange(&self, code: &str) -> Result<TokenGrant, FlowError> {
        if code.is_empty() {
            return Err(FlowError::MissingAuthorizationCode);
        }

        let config = &self.config;
        let mut request = TokenRequest {
            grant_type: "authorization_code",
            code,
            redirect_uri: &config.redirect_uri,
            client_id: None,
            client_secret: None,
        };

        let mut builder = self
            .client
            .post(config.token_endpoint.clone())
            .header(ACCEPT, "application/json");

        match config.client_auth {
            ClientAuthMethod::ClientSecretPost => {
                request.client_id = Some(&config.client_id);
                request.client_secret = Some(config.client_secret.expose());
            }
            ClientAuthMethod::ClientSecretBasic => {
                builder = builder.basic_auth(&config.client_id, Some(config.client_secret.expose()));
            }
        }

        builder = match config.token_request_format {
            TokenRequestFormat::Form => builder.form(&request),
            TokenRequestFormat::Json => builder.json(&request),
        };

        info!("Exchanging authorization code");
        let response = builder.send().await.map_err(FlowError::NetworkFailure)?;
        let received_at = Utc::now();
        let status = response.status();
        let body = response.bytes().await.map_err(FlowError::NetworkFailure)?;

        if !status.is_success() {
            return Err(classify_error_response(status.as_u16(), &body));
        }

        let grant = TokenGrant::from_body(&body, received_at, &config.scope)?;
        info!(
            token_type = %grant.token.token_type,
            expires_at = %grant.token.expires_at,
            "Authorization code exchanged"
        );

        Ok(grant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn received_at() -> DateTime<Utc> {
        "2026-10-18T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_expiry_is_receipt_time_plus_expires_in() -> color_eyre::Result<()> {
        let grant = TokenGrant::from_body(
            br#"{"access_token":"tok1","expires_in":3600,"token_type":"Bearer"}"#,
            received_at(),
            "openid",
        )?;

        assert_eq!(grant.token.expires_at, received_at() + Duration::seconds(3600));
        assert_eq!(grant.token.access_token, "tok1");
        assert_eq!(grant.token.token_type, "Bearer");
        assert_eq!(grant.token.refresh_token, None);
        assert_eq!(grant.subject, None);
        Ok(())
    }

    #[test]
    fn test_absolute_expiry_from_server_is_ignored() -> color_eyre::Result<()> {
        let grant = TokenGrant::from_body(
            br#"{"access_token":"tok1","expires_in":60,"token_type":"Bearer","expiry":4102444800,"expires_at":4102444800}"#,
            received_at(),
            "openid",
        )?;

        assert_eq!(grant.token.expires_at, received_at() + Duration::seconds(60));
        Ok(())
    }

    #[test]
    fn test_optional_fields_are_kept() -> color_eyre::Result<()> {
        let grant = TokenGrant::from_body(
            br#"{"access_token":"tok1","refresh_token":"ref1","expires_in":3600,"token_type":"Bearer","scope":"openid profile","sub":"user-42"}"#,
            received_at(),
            "openid",
        )?;

        assert_eq!(grant.token.refresh_token.as_deref(), Some("ref1"));
        assert_eq!(grant.token.scope, "openid profile");
        assert_eq!(grant.subject.as_deref(), Some("user-42"));
        Ok(())
    }

    #[test]
    fn test_absent_scope_means_requested_scope() -> color_eyre::Result<()> {
        let grant = TokenGrant::from_body(
            br#"{"access_token":"tok1","expires_in":3600,"token_type":"Bearer"}"#,
            received_at(),
            "openid email",
        )?;

        assert_eq!(grant.token.scope, "openid email");
        Ok(())
    }

    #[test]
    fn test_malformed_bodies_are_rejected() {
        let bodies: [&[u8]; 8] = [
            br#"{"expires_in":3600,"token_type":"Bearer"}"#,
            br#"{"access_token":"","expires_in":3600,"token_type":"Bearer"}"#,
            br#"{"access_token":"tok1","expires_in":3600}"#,
            br#"{"access_token":"tok1","token_type":"Bearer"}"#,
            br#"{"access_token":"tok1","expires_in":0,"token_type":"Bearer"}"#,
            br#"{"access_token":"tok1","expires_in":"3600","token_type":"Bearer"}"#,
            br#"["tok1"]"#,
            b"<html>bad gateway</html>",
        ];

        for body in bodies {
            let err = TokenGrant::from_body(body, received_at(), "openid")
                .expect_err("body should be rejected");
            assert_eq!(
                err.kind(),
                ErrorKind::MalformedResponse,
                "{}",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn test_debug_output_hides_tokens() -> color_eyre::Result<()> {
        let grant = TokenGrant::from_body(
            br#"{"access_token":"tok1","refresh_token":"ref1","expires_in":3600,"token_type":"Bearer"}"#,
            received_at(),
            "openid",
        )?;

        let printed = format!("{:?}", grant);
        assert!(!printed.contains("tok1"));
        assert!(!printed.contains("ref1"));
        Ok(())
    }

    #[test]
    fn test_classify_invalid_grant() {
        let err = classify_error_response(
            400,
            br#"{"error":"invalid_grant","error_description":"Invalid or expired authorization code"}"#,
        );
        assert_eq!(err.kind(), ErrorKind::InvalidGrant);
    }

    #[test]
    fn test_classify_consumed_code() {
        for description in [
            "authorization code already used",
            "Code has already been used",
            "code was redeemed",
        ] {
            let body = serde_json::json!({
                "error": "invalid_grant",
                "error_description": description,
            })
            .to_string();

            assert_eq!(
                classify_error_response(400, body.as_bytes()).kind(),
                ErrorKind::CodeAlreadyConsumed,
                "{description}"
            );
        }
    }

    #[test]
    fn test_classify_other_upstream_errors() {
        assert_eq!(
            classify_error_response(401, br#"{"error":"invalid_client"}"#).kind(),
            ErrorKind::UpstreamError
        );
        assert_eq!(
            classify_error_response(503, b"Service Unavailable").kind(),
            ErrorKind::UpstreamError
        );
    }
}
