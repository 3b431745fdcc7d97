//! gRPC connections and the per-config connection cache.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use http::HeaderMap;
use tonic::metadata::MetadataMap;
use tonic::transport::{Channel, Endpoint};

use crate::config::{ClientConfig, ConfigError, DEFAULT_CONNECT_TIMEOUT};
use crate::tls;

/// A channel plus the metadata and deadline attached to every call on it.
#[derive(Debug, Clone)]
pub struct Connection {
    channel: Channel,
    headers: HeaderMap,
    timeout: Option<Duration>,
}

impl Connection {
    #[must_use]
    pub fn new(channel: Channel, headers: HeaderMap, timeout: Option<Duration>) -> Self {
        Self {
            channel,
            headers,
            timeout,
        }
    }

    /// Connect lazily to `config.address`; the first call dials.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the configuration is invalid or its TLS
    /// material cannot be loaded.
    pub fn connect(config: &ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let scheme = if config.no_tls { "http" } else { "https" };
        let uri = format!("{scheme}://{}", config.address);
        let endpoint = Endpoint::from_shared(uri).map_err(|e| ConfigError::InvalidAddress {
            address: config.address.clone(),
            reason: e.to_string(),
        })?;
        let endpoint = endpoint.connect_timeout(DEFAULT_CONNECT_TIMEOUT);

        let channel = endpoint.connect_with_connector_lazy(tls::https_connector(config)?);
        Ok(Self::new(
            channel,
            config.request_headers()?,
            config.timeout(),
        ))
    }

    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Build a request carrying this connection's metadata and deadline.
    pub(crate) fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        *request.metadata_mut() = MetadataMap::from_headers(self.headers.clone());
        if let Some(timeout) = self.timeout {
            request.set_timeout(timeout);
        }
        request
    }
}

/// Creates connections for configurations missing from the cache.
pub trait Connector: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when `config` cannot be turned into a connection.
    fn connect(&self, config: &ClientConfig) -> Result<Connection, ConfigError>;
}

/// The default connector: TLS per config, lazy dial.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsConnector;

impl Connector for TlsConnector {
    fn connect(&self, config: &ClientConfig) -> Result<Connection, ConfigError> {
        Connection::connect(config)
    }
}

/// Connection cache keyed by [`ClientConfig::fingerprint`].
///
/// Concurrent misses on one key may both connect; the first stored
/// connection wins and the other is dropped.
pub struct Connections {
    conns: DashMap<u64, Connection>,
    connector: Arc<dyn Connector>,
}

impl Default for Connections {
    fn default() -> Self {
        Self::new()
    }
}

impl Connections {
    #[must_use]
    pub fn new() -> Self {
        Self::with_connector(Arc::new(TlsConnector))
    }

    #[must_use]
    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self {
            conns: DashMap::new(),
            connector,
        }
    }

    /// Cached connection for `config`, connecting on first use.
    ///
    /// # Errors
    ///
    /// Propagates the connector's error; nothing is cached on failure.
    pub fn get(&self, config: &ClientConfig) -> Result<Connection, ConfigError> {
        let key = config.fingerprint();
        if let Some(conn) = self.conns.get(&key) {
            return Ok(conn.clone());
        }

        tracing::debug!(address = %config.address, "opening connection");
        let conn = self.connector.connect(config)?;
        Ok(self.conns.entry(key).or_insert(conn).clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}
