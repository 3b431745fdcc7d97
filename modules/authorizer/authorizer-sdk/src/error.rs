//! Error types for the authorizer clients.

use thiserror::Error;

/// Errors that can occur when calling an authorizer backend.
///
/// These represent infrastructure/transport failures only.
/// Access denial is expressed via `Decision.is == false` or
/// `CheckResponse.check == false`, not as an error variant.
#[derive(Debug, Error)]
pub enum AuthorizerError {
    /// The backend could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// The gRPC backend answered with a non-OK status.
    #[error("rpc failed with status {code}: {message}")]
    Status { code: String, message: String },

    /// The REST backend answered with a non-200 status.
    #[error("http request failed with status {status}: {body}")]
    Http { status: u16, body: String },

    /// The request could not be encoded or the response decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The client is misconfigured.
    #[error("invalid client configuration: {0}")]
    Config(String),
}
