//! gRPC implementations of the SDK client traits.

use async_trait::async_trait;

use authorizer_sdk::{
    AuthorizerClient, AuthorizerError, CheckRequest, CheckResponse, DirectoryClient, IsRequest,
    IsResponse,
};

use crate::config::{ClientConfig, ConfigError};
use crate::connection::Connection;
use crate::proto::{self, AuthorizerClient as AuthorizerRpc, ReaderClient};

fn status_error(status: &tonic::Status) -> AuthorizerError {
    tracing::warn!(code = ?status.code(), message = status.message(), "rpc failed");
    AuthorizerError::Status {
        code: status.code().to_string(),
        message: status.message().to_owned(),
    }
}

/// Authorizer client over `aserto.authorizer.v2.Authorizer`.
#[derive(Debug, Clone)]
pub struct GrpcAuthorizer {
    conn: Connection,
}

impl GrpcAuthorizer {
    #[must_use]
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// # Errors
    ///
    /// See [`Connection::connect`].
    pub fn connect(config: &ClientConfig) -> Result<Self, ConfigError> {
        Connection::connect(config).map(Self::new)
    }
}

#[async_trait]
impl AuthorizerClient for GrpcAuthorizer {
    async fn is(&self, request: IsRequest) -> Result<IsResponse, AuthorizerError> {
        tracing::debug!(
            path = %request.policy_context.path,
            "calling authorizer"
        );
        let mut client = AuthorizerRpc::new(self.conn.channel().clone());
        let response = client
            .is(self.conn.request(proto::IsRequest::from(request)))
            .await
            .map_err(|status| status_error(&status))?;
        Ok(response.into_inner().into())
    }
}

/// Relation checks over `aserto.directory.reader.v3.Reader`.
#[derive(Debug, Clone)]
pub struct GrpcDirectory {
    conn: Connection,
}

impl GrpcDirectory {
    #[must_use]
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// # Errors
    ///
    /// See [`Connection::connect`].
    pub fn connect(config: &ClientConfig) -> Result<Self, ConfigError> {
        Connection::connect(config).map(Self::new)
    }
}

#[async_trait]
impl DirectoryClient for GrpcDirectory {
    async fn check(&self, request: CheckRequest) -> Result<CheckResponse, AuthorizerError> {
        tracing::debug!(
            object_type = %request.object_type,
            relation = %request.relation,
            "calling directory check"
        );
        let mut client = ReaderClient::new(self.conn.channel().clone());
        let response = client
            .check(self.conn.request(proto::CheckRequest::from(request)))
            .await
            .map_err(|status| status_error(&status))?;
        Ok(response.into_inner().into())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use authorizer_sdk::{IdentityContext, Policy};

    #[tokio::test]
    async fn unreachable_backend_is_an_error() {
        let config = ClientConfig {
            no_tls: true,
            timeout_in_seconds: 1,
            ..ClientConfig::new("127.0.0.1:1")
        };
        let authorizer = GrpcAuthorizer::connect(&config).unwrap();
        let request = IsRequest::new(
            IdentityContext::none(),
            &Policy::new("p", "allowed"),
            "GET.foo",
            serde_json::Map::new(),
        );

        assert!(authorizer.is(request).await.is_err());
    }

    #[test]
    fn rpc_status_keeps_code_and_message() {
        let status = tonic::Status::permission_denied("no such policy");
        match status_error(&status) {
            AuthorizerError::Status { code, message } => {
                assert_eq!(code, tonic::Code::PermissionDenied.to_string());
                assert_eq!(message, "no such policy");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn invalid_address_is_rejected() {
        let config = ClientConfig::new("not a host");
        assert!(matches!(
            GrpcDirectory::connect(&config),
            Err(ConfigError::InvalidAddress { .. })
        ));
    }
}
