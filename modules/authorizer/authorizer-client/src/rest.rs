//! REST implementation of [`AuthorizerClient`] against the authorizer gateway.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use url::Url;

use authorizer_sdk::{AuthorizerClient, AuthorizerError, IsRequest, IsResponse};

use crate::config::{ClientConfig, ConfigError};
use crate::tls;

const IS_ENDPOINT: &str = "api/v2/authz/is";

/// Authorizer client for the REST gateway: `POST {base}/api/v2/authz/is`.
#[derive(Debug, Clone)]
pub struct HttpAuthorizer {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    endpoint: Uri,
    headers: HeaderMap,
    timeout: Option<Duration>,
}

impl HttpAuthorizer {
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for invalid settings, an unparsable base URL
    /// or unreadable TLS material.
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut headers = config.request_headers()?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder(TokioExecutor::new()).build(tls::https_connector(config)?);

        Ok(Self {
            client,
            endpoint: endpoint(config)?,
            headers,
            timeout: config.timeout(),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }
}

/// Base URL of the gateway: `url` if set, otherwise derived from `address`.
fn base_url(config: &ClientConfig) -> String {
    if let Some(url) = config.url.as_deref().filter(|u| !u.is_empty()) {
        return url.to_owned();
    }
    let scheme = if config.no_tls { "http" } else { "https" };
    format!("{scheme}://{}", config.address)
}

fn endpoint(config: &ClientConfig) -> Result<Uri, ConfigError> {
    let base = base_url(config);
    let invalid = |reason: String| ConfigError::InvalidAddress {
        address: base.clone(),
        reason,
    };

    let mut url = Url::parse(&base).map_err(|e| invalid(e.to_string()))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    let url = url.join(IS_ENDPOINT).map_err(|e| invalid(e.to_string()))?;
    Uri::try_from(url.as_str()).map_err(|e| invalid(e.to_string()))
}

#[async_trait]
impl AuthorizerClient for HttpAuthorizer {
    async fn is(&self, request: IsRequest) -> Result<IsResponse, AuthorizerError> {
        let body = serde_json::to_vec(&request).map_err(|e| AuthorizerError::Decode(e.to_string()))?;

        let mut req = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.clone())
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| AuthorizerError::Transport(e.to_string()))?;
        req.headers_mut().extend(self.headers.clone());

        tracing::debug!(
            endpoint = %self.endpoint,
            path = %request.policy_context.path,
            "calling authorizer"
        );

        let call = self.client.request(req);
        let response = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, call)
                .await
                .map_err(|_| AuthorizerError::Transport("request timed out".to_owned()))?,
            None => call.await,
        }
        .map_err(|e| AuthorizerError::Transport(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| AuthorizerError::Transport(e.to_string()))?
            .to_bytes();

        if status != StatusCode::OK {
            let body = String::from_utf8_lossy(&bytes).into_owned();
            tracing::warn!(status = status.as_u16(), "authorizer request failed");
            return Err(AuthorizerError::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| AuthorizerError::Decode(e.to_string()))
    }
}
