//! Authorization outcome errors and their mapping to HTTP and gRPC responses.

use authorizer_sdk::AuthorizerError;
use http::StatusCode;

use crate::field_mask::FieldMaskError;
use crate::resource::ResourceError;

/// Why a call was not let through.
#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    /// The backend returned an explicit `false` for the requested decision,
    /// or the relation check failed.
    #[error("authorization failed")]
    Denied,

    /// The backend answered a single-decision query with `count` decisions.
    #[error("invalid decision: expected exactly one decision, got {count}")]
    InvalidDecision { count: usize },

    #[error("authorizer call failed: {0}")]
    Backend(#[from] AuthorizerError),

    #[error("resource context: {0}")]
    Resource(#[from] ResourceError),

    /// Locally detected misconfiguration, e.g. an empty object type.
    #[error("{0}")]
    Config(String),
}

impl AuthzError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Denied => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Plain-text response with the mapped status and the error message as body.
    #[must_use]
    pub fn into_http_response<B: From<String>>(self) -> http::Response<B> {
        let mut response = http::Response::new(B::from(self.to_string()));
        *response.status_mut() = self.status_code();
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}

impl axum::response::IntoResponse for AuthzError {
    fn into_response(self) -> axum::response::Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

impl From<AuthzError> for tonic::Status {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::Denied => Self::permission_denied("authorization failed"),
            AuthzError::InvalidDecision { .. } => Self::internal("invalid decision"),
            other => Self::internal(other.to_string()),
        }
    }
}

/// Invalid middleware configuration detected by a builder.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("policy decision must not be empty")]
    MissingDecision,

    #[error("policy name must not be empty")]
    MissingName,

    #[error("invalid field mask: {0}")]
    FieldMask(#[from] FieldMaskError),

    #[error("invalid route template `{template}`: {reason}")]
    Route { template: String, reason: String },
}
