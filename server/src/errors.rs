use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use serde::Serialize;

#[derive(Debug)]
pub struct ServerError<R: IntoResponse>(pub(crate) color_eyre::Report, pub(crate) R);

pub type ServerResult<S, F = Response> = Result<S, ServerError<F>>;

impl<R: IntoResponse> IntoResponse for ServerError<R> {
    fn into_response(self) -> axum::response::Response {
        tracing::error!(error = ?self.0, "Request Error");

        let is_dev_mode = std::env::var("DEVELOPMENT_MODE")
            .map(|v| v == "1")
            .unwrap_or(false);

        if is_dev_mode {
            let temp_response = self.1.into_response();
            if temp_response.status() == StatusCode::INTERNAL_SERVER_ERROR {
                let error_text = maud::html! { pre { (format!("{:?}", self.0)) } };
                return (StatusCode::INTERNAL_SERVER_ERROR, Html(error_text.into_string()))
                    .into_response();
            }
            return temp_response;
        }

        self.1.into_response()
    }
}

impl<E> From<E> for ServerError<StatusCode>
where
    E: Into<color_eyre::Report>,
{
    fn from(err: E) -> Self {
        ServerError(err.into(), StatusCode::INTERNAL_SERVER_ERROR)
    }
}

pub(crate) trait WithStatus<T> {
    fn with_status(self, status: StatusCode) -> Result<T, ServerError<StatusCode>>;
}

impl<T> WithStatus<T> for Result<T, color_eyre::Report> {
    fn with_status(self, status: StatusCode) -> Result<T, ServerError<StatusCode>> {
        match self {
            Ok(val) => Ok(val),
            Err(err) => Err(ServerError(err, status)),
        }
    }
}

/// Names of the ways an authorization attempt can fail.
///
/// Serialized verbatim into the internal token route's JSON answer. The
/// browser never sees these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    AuthorizationDenied,
    MissingAuthorizationCode,
    StateExpiredOrMissing,
    StateMismatch,
    NetworkFailure,
    InvalidGrant,
    CodeAlreadyConsumed,
    MalformedResponse,
    UpstreamError,
}

/// What the user is told
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFacing {
    AccessDenied,
    RetryLogin,
}

/// A terminal failure of one authorization attempt. None of these are retried.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("authorization server returned error `{error}`: {}", .description.as_deref().unwrap_or("no description"))]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },
    #[error("callback carried no authorization code")]
    MissingAuthorizationCode,
    #[error("authorization request state is missing or expired")]
    StateExpiredOrMissing,
    #[error("returned state does not match a live authorization request")]
    StateMismatch,
    #[error("could not complete the token request")]
    NetworkFailure(#[source] reqwest::Error),
    #[error("authorization code rejected: {0}")]
    InvalidGrant(String),
    #[error("authorization code was already consumed")]
    CodeAlreadyConsumed,
    #[error("token endpoint returned a malformed response: {0}")]
    MalformedResponse(&'static str),
    #[error("token endpoint answered {status} with `{error}`")]
    UpstreamError { status: u16, error: String },
}

impl FlowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::AuthorizationDenied { .. } => ErrorKind::AuthorizationDenied,
            FlowError::MissingAuthorizationCode => ErrorKind::MissingAuthorizationCode,
            FlowError::StateExpiredOrMissing => ErrorKind::StateExpiredOrMissing,
            FlowError::StateMismatch => ErrorKind::StateMismatch,
            FlowError::NetworkFailure(_) => ErrorKind::NetworkFailure,
            FlowError::InvalidGrant(_) => ErrorKind::InvalidGrant,
            FlowError::CodeAlreadyConsumed => ErrorKind::CodeAlreadyConsumed,
            FlowError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            FlowError::UpstreamError { .. } => ErrorKind::UpstreamError,
        }
    }

    /// 400 for problems with what the client sent, 502 when the
    /// authorization server let us down
    pub fn status(&self) -> StatusCode {
        if self.is_upstream() {
            StatusCode::BAD_GATEWAY
        } else {
            StatusCode::BAD_REQUEST
        }
    }

    pub fn user_facing(&self) -> UserFacing {
        match self {
            FlowError::AuthorizationDenied { .. } => UserFacing::AccessDenied,
            _ => UserFacing::RetryLogin,
        }
    }

    fn is_upstream(&self) -> bool {
        matches!(
            self,
            FlowError::NetworkFailure(_)
                | FlowError::MalformedResponse(_)
                | FlowError::UpstreamError { .. }
        )
    }

    /// Log the failure inside the current request span
    pub fn log(&self) {
        if self.is_upstream() {
            tracing::error!(kind = ?self.kind(), error = %self, "Authorization flow failed");
        } else {
            tracing::warn!(kind = ?self.kind(), error = %self, "Authorization flow failed");
        }
    }
}
