use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use color_eyre::eyre::{eyre, WrapErr};
use reqwest::Url;

/// Default bound on the token endpoint round trip
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Default lifetime of an authorization request, in seconds
pub const DEFAULT_STATE_TTL_SECS: i64 = 600;

/// How the token request body is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRequestFormat {
    Form,
    Json,
}

impl FromStr for TokenRequestFormat {
    type Err = color_eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "form" => Ok(Self::Form),
            "json" => Ok(Self::Json),
            other => Err(eyre!("Unknown token request format: {}", other)),
        }
    }
}

/// Where the client credentials travel on the token request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuthMethod {
    /// `client_id` and `client_secret` as body parameters
    ClientSecretPost,
    /// HTTP Basic authorization header
    ClientSecretBasic,
}

impl FromStr for ClientAuthMethod {
    type Err = color_eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client_secret_post" => Ok(Self::ClientSecretPost),
            "client_secret_basic" => Ok(Self::ClientSecretBasic),
            other => Err(eyre!("Unknown client auth method: {}", other)),
        }
    }
}

/// The client secret. Never printed.
#[derive(Clone)]
pub struct ClientSecret(String);

impl ClientSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClientSecret(***)")
    }
}

/// Static configuration of this OAuth client
#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub token_endpoint: Url,
    pub authorize_endpoint: Url,
    pub client_id: String,
    pub client_secret: ClientSecret,
    pub redirect_uri: String,
    pub timeout: Duration,
    pub scope: String,
    pub token_request_format: TokenRequestFormat,
    pub client_auth: ClientAuthMethod,
    /// Permit plain `http` endpoints. Local development and tests only.
    pub allow_insecure_endpoints: bool,
}

impl OAuthClientConfig {
    pub fn from_env() -> color_eyre::Result<Self> {
        let token_endpoint = required("OAUTH_TOKEN_ENDPOINT")?
            .parse::<Url>()
            .wrap_err("OAUTH_TOKEN_ENDPOINT is not a valid URL")?;
        let authorize_endpoint = required("OAUTH_AUTHORIZE_ENDPOINT")?
            .parse::<Url>()
            .wrap_err("OAUTH_AUTHORIZE_ENDPOINT is not a valid URL")?;

        let config = Self {
            token_endpoint,
            authorize_endpoint,
            client_id: required("OAUTH_CLIENT_ID")?,
            client_secret: ClientSecret::new(required("OAUTH_CLIENT_SECRET")?),
            redirect_uri: required("OAUTH_REDIRECT_URI")?,
            timeout: Duration::from_millis(parse_or("OAUTH_TIMEOUT_MS", DEFAULT_TIMEOUT_MS)?),
            scope: std::env::var("OAUTH_SCOPE").unwrap_or_else(|_| "openid".to_string()),
            token_request_format: parse_or("OAUTH_TOKEN_REQUEST_FORMAT", TokenRequestFormat::Form)?,
            client_auth: parse_or("OAUTH_CLIENT_AUTH", ClientAuthMethod::ClientSecretPost)?,
            allow_insecure_endpoints: parse_or("OAUTH_ALLOW_INSECURE_ENDPOINTS", false)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Reject configurations that would send credentials in the clear or
    /// could never complete an exchange
    pub fn validate(&self) -> color_eyre::Result<()> {
        if self.token_endpoint.scheme() != "https" && !self.allow_insecure_endpoints {
            return Err(eyre!(
                "Token endpoint must use https (got {}). Set OAUTH_ALLOW_INSECURE_ENDPOINTS=true for local development.",
                self.token_endpoint.scheme()
            ));
        }

        if self.client_id.is_empty() {
            return Err(eyre!("OAuth client id must not be empty"));
        }

        if self.redirect_uri.is_empty() {
            return Err(eyre!("OAuth redirect URI must not be empty"));
        }

        if self.timeout.is_zero() {
            return Err(eyre!("Token request timeout must be greater than zero"));
        }

        Ok(())
    }
}

/// Per-flow settings that are not part of the client registration
#[derive(Debug, Clone)]
pub struct FlowSettings {
    /// How long a stored authorization request stays valid
    pub state_ttl: chrono::Duration,
    /// Where the browser goes after a successful login
    pub post_login_path: String,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            state_ttl: chrono::Duration::seconds(DEFAULT_STATE_TTL_SECS),
            post_login_path: "/".to_string(),
        }
    }
}

impl FlowSettings {
    pub fn from_env() -> color_eyre::Result<Self> {
        let ttl_secs: i64 = parse_or("STATE_TTL_SECS", DEFAULT_STATE_TTL_SECS)?;
        if ttl_secs <= 0 {
            return Err(eyre!("STATE_TTL_SECS must be positive"));
        }

        let post_login_path = std::env::var("POST_LOGIN_PATH").unwrap_or_else(|_| "/".to_string());
        // Only local paths, so the callback can't be turned into an open redirect
        if !post_login_path.starts_with('/') || post_login_path.starts_with("//") {
            return Err(eyre!("POST_LOGIN_PATH must be a local path"));
        }

        Ok(Self {
            state_ttl: chrono::Duration::seconds(ttl_secs),
            post_login_path,
        })
    }
}

/// Socket addresses of the two listeners
#[derive(Debug, Clone, Copy)]
pub struct ListenConfig {
    pub public: SocketAddr,
    /// The token exchange route. Loopback only.
    pub internal: SocketAddr,
}

impl ListenConfig {
    pub fn from_env() -> color_eyre::Result<Self> {
        let port: u16 = parse_or("PORT", 3000)?;
        let internal_port: u16 = parse_or("INTERNAL_PORT", 3001)?;

        Ok(Self {
            public: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            internal: SocketAddr::from((Ipv4Addr::LOCALHOST, internal_port)),
        })
    }
}

fn required(name: &str) -> color_eyre::Result<String> {
    std::env::var(name).map_err(|_| eyre!("{} environment variable not set", name))
}

fn parse_or<T>(name: &str, default: T) -> color_eyre::Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| eyre!("Failed to parse {}: {}", name, e)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token_endpoint: &str) -> OAuthClientConfig {
        OAuthClientConfig {
            token_endpoint: token_endpoint.parse().unwrap(),
            authorize_endpoint: "https://auth.example.com/authorize".parse().unwrap(),
            client_id: "client".to_string(),
            client_secret: ClientSecret::new("hunter2"),
            redirect_uri: "https://app.example.com/oauth/callback".to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            scope: "openid".to_string(),
            token_request_format: TokenRequestFormat::Form,
            client_auth: ClientAuthMethod::ClientSecretPost,
            allow_insecure_endpoints: false,
        }
    }

    #[test]
    fn test_plain_http_token_endpoint_is_rejected() {
        assert!(config("http://auth.example.com/token").validate().is_err());
        assert!(config("https://auth.example.com/token").validate().is_ok());
    }

    #[test]
    fn test_plain_http_allowed_when_opted_in() {
        let mut config = config("http://127.0.0.1:9000/token");
        config.allow_insecure_endpoints = true;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_client_secret_is_not_printed() {
        let printed = format!("{:?}", config("https://auth.example.com/token"));

        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("ClientSecret(***)"));
    }

    #[test]
    fn test_parse_request_format_and_auth_method() -> color_eyre::Result<()> {
        assert_eq!("JSON".parse::<TokenRequestFormat>()?, TokenRequestFormat::Json);
        assert_eq!("form".parse::<TokenRequestFormat>()?, TokenRequestFormat::Form);
        assert_eq!(
            "client_secret_basic".parse::<ClientAuthMethod>()?,
            ClientAuthMethod::ClientSecretBasic
        );
        assert!("xml".parse::<TokenRequestFormat>().is_err());

        Ok(())
    }
}
