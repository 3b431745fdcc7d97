//! Public API traits for the authorizer backends.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AuthorizerError;
use crate::models::{CheckRequest, CheckResponse, IsRequest, IsResponse};

/// Policy decision point.
///
/// Implemented by the gRPC and REST clients in `authorizer_client` and by
/// test doubles:
///
/// ```ignore
/// let response = authorizer.is(request).await?;
/// let allowed = response.decisions.first().is_some_and(|d| d.is);
/// ```
#[async_trait]
pub trait AuthorizerClient: Send + Sync {
    /// Evaluate the requested decisions of one policy module.
    ///
    /// # Errors
    ///
    /// - `Transport` if the backend could not be reached
    /// - `Status` / `Http` if the backend rejected the call
    /// - `Decode` if the response could not be read
    async fn is(&self, request: IsRequest) -> Result<IsResponse, AuthorizerError>;
}

/// Relation-based access control backend (directory reader).
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Check whether `subject` holds `relation` (or permission) on `object`.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`AuthorizerClient::is`].
    async fn check(&self, request: CheckRequest) -> Result<CheckResponse, AuthorizerError>;
}

#[async_trait]
impl<T: AuthorizerClient + ?Sized> AuthorizerClient for Arc<T> {
    async fn is(&self, request: IsRequest) -> Result<IsResponse, AuthorizerError> {
        (**self).is(request).await
    }
}

#[async_trait]
impl<T: DirectoryClient + ?Sized> DirectoryClient for Arc<T> {
    async fn check(&self, request: CheckRequest) -> Result<CheckResponse, AuthorizerError> {
        (**self).check(request).await
    }
}
