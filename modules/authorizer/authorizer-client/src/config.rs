//! Client configuration for the authorizer and directory services.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use http::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use xxhash_rust::xxh3::Xxh3;

use authorizer_sdk::AuthorizerError;

/// Default gRPC address of the hosted authorizer.
pub const DEFAULT_AUTHORIZER_ADDRESS: &str = "authorizer.prod.aserto.com:8443";

/// Default gRPC address of the hosted directory.
pub const DEFAULT_DIRECTORY_ADDRESS: &str = "directory.prod.aserto.com:8443";

/// Dial timeout applied when establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub const HEADER_TENANT_ID: &str = "aserto-tenant-id";
pub const HEADER_ACCOUNT_ID: &str = "aserto-account-id";
pub const HEADER_SESSION_ID: &str = "aserto-session-id";

/// Errors raised while loading or applying client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("both api_key and token are set")]
    ConflictingCredentials,

    #[error("insecure and no_tls are mutually exclusive")]
    ConflictingTls,

    #[error("client_cert_path and client_key_path must be set together")]
    IncompleteClientCert,

    #[error("directory configuration has no client sections")]
    EmptyDirectory,

    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("invalid header '{name}'")]
    InvalidHeader { name: String },

    #[error("failed to read '{}': {reason}", path.display())]
    Read { path: PathBuf, reason: String },

    #[error("tls setup failed: {0}")]
    Tls(String),

    #[error("failed to load configuration: {0}")]
    Load(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

impl From<ConfigError> for AuthorizerError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Connection settings for one backend service.
///
/// `address` is a `host:port` pair used for gRPC; `url` is the base URL of
/// the REST gateway and falls back to `https://{address}` when unset.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
#[allow(clippy::struct_excessive_bools)]
pub struct ClientConfig {
    pub address: String,
    pub url: Option<String>,
    /// OAuth2 token sent as `Bearer <token>` unless it already carries a scheme.
    pub token: Option<SecretString>,
    /// API key sent as `basic <key>`.
    pub api_key: Option<SecretString>,
    pub tenant_id: Option<String>,
    pub account_id: Option<String>,
    pub session_id: Option<String>,
    /// PEM bundle trusted instead of the platform roots.
    pub ca_cert_path: Option<PathBuf>,
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
    /// Per-call deadline; `0` disables it.
    pub timeout_in_seconds: u64,
    /// Skip server certificate verification.
    pub insecure: bool,
    /// Connect over plaintext.
    pub no_tls: bool,
    /// Extra headers sent with every call.
    pub headers: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_AUTHORIZER_ADDRESS.to_owned(),
            url: None,
            token: None,
            api_key: None,
            tenant_id: None,
            account_id: None,
            session_id: None,
            ca_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
            timeout_in_seconds: 0,
            insecure: false,
            no_tls: false,
            headers: BTreeMap::new(),
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Load from an optional YAML file, then apply `{env_prefix}*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if a source cannot be parsed, or any
    /// error of [`ClientConfig::validate`].
    pub fn load(path: Option<&Path>, env_prefix: &str) -> Result<Self, ConfigError> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: Self = figment.merge(Env::prefixed(env_prefix)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an error if credentials, TLS modes or client certificate
    /// settings contradict each other.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if is_set(self.token.as_ref()) && is_set(self.api_key.as_ref()) {
            return Err(ConfigError::ConflictingCredentials);
        }
        if self.insecure && self.no_tls {
            return Err(ConfigError::ConflictingTls);
        }
        if self.client_cert_path.is_some() != self.client_key_path.is_some() {
            return Err(ConfigError::IncompleteClientCert);
        }
        Ok(())
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_in_seconds > 0).then(|| Duration::from_secs(self.timeout_in_seconds))
    }

    /// Value of the `authorization` header, if credentials are configured.
    #[must_use]
    pub fn authorization(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.expose_secret().is_empty()) {
            return Some(format!("basic {}", key.expose_secret()));
        }
        let token = self
            .token
            .as_ref()
            .map(ExposeSecret::expose_secret)
            .filter(|t| !t.is_empty())?;
        if token.contains(' ') {
            Some(token.to_owned())
        } else {
            Some(format!("Bearer {token}"))
        }
    }

    /// Headers (or gRPC metadata) attached to every call.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidHeader`] for names or values that are
    /// not valid HTTP header text.
    pub fn request_headers(&self) -> Result<HeaderMap, ConfigError> {
        let mut headers = HeaderMap::new();

        for (name, value) in &self.headers {
            insert(&mut headers, name, value)?;
        }
        for (name, value) in [
            (HEADER_TENANT_ID, &self.tenant_id),
            (HEADER_ACCOUNT_ID, &self.account_id),
            (HEADER_SESSION_ID, &self.session_id),
        ] {
            if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                insert(&mut headers, name, value)?;
            }
        }
        if let Some(auth) = self.authorization() {
            let mut value = HeaderValue::from_str(&auth).map_err(|_| ConfigError::InvalidHeader {
                name: AUTHORIZATION.to_string(),
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        Ok(headers)
    }

    /// Stable hash of every field, secrets included, used as a connection cache key.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Xxh3::new();
        let mut field = |bytes: &[u8]| {
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };

        field(self.address.as_bytes());
        field(self.url.as_deref().unwrap_or_default().as_bytes());
        field(secret_bytes(self.token.as_ref()));
        field(secret_bytes(self.api_key.as_ref()));
        field(self.tenant_id.as_deref().unwrap_or_default().as_bytes());
        field(self.account_id.as_deref().unwrap_or_default().as_bytes());
        field(self.session_id.as_deref().unwrap_or_default().as_bytes());
        for path in [
            &self.ca_cert_path,
            &self.client_cert_path,
            &self.client_key_path,
        ] {
            field(path.as_deref().map(Path::as_os_str).unwrap_or_default().as_encoded_bytes());
        }
        field(&self.timeout_in_seconds.to_le_bytes());
        field(&[u8::from(self.insecure), u8::from(self.no_tls)]);
        for (name, value) in &self.headers {
            field(name.as_bytes());
            field(value.as_bytes());
        }

        hasher.digest()
    }
}

fn is_set(secret: Option<&SecretString>) -> bool {
    secret.is_some_and(|s| !s.expose_secret().is_empty())
}

fn secret_bytes(secret: Option<&SecretString>) -> &[u8] {
    secret.map(|s| s.expose_secret().as_bytes()).unwrap_or_default()
}

fn insert(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidHeader {
        name: name.to_owned(),
    };
    let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
    let value = HeaderValue::from_str(value).map_err(|_| invalid())?;
    headers.insert(name, value);
    Ok(())
}

/// Directory services a [`DirectoryConfig`] can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryService {
    Reader,
    Writer,
    Importer,
    Exporter,
    Model,
}

/// Directory connection settings.
///
/// `base` applies to every service without its own section. A service
/// with neither is not connected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DirectoryConfig {
    pub base: Option<ClientConfig>,
    pub reader: Option<ClientConfig>,
    pub writer: Option<ClientConfig>,
    pub importer: Option<ClientConfig>,
    pub exporter: Option<ClientConfig>,
    pub model: Option<ClientConfig>,
}

impl DirectoryConfig {
    /// # Errors
    ///
    /// Same as [`ClientConfig::load`].
    pub fn load(path: Option<&Path>, env_prefix: &str) -> Result<Self, ConfigError> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: Self = figment.merge(Env::prefixed(env_prefix).split("__")).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyDirectory`] when no section is present,
    /// or the first section's own validation error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sections = [
            &self.base,
            &self.reader,
            &self.writer,
            &self.importer,
            &self.exporter,
            &self.model,
        ];
        if sections.iter().all(|s| s.is_none()) {
            return Err(ConfigError::EmptyDirectory);
        }
        sections
            .into_iter()
            .flatten()
            .try_for_each(ClientConfig::validate)
    }

    /// Effective settings for `service`, falling back to `base`.
    #[must_use]
    pub fn section(&self, service: DirectoryService) -> Option<&ClientConfig> {
        let own = match service {
            DirectoryService::Reader => &self.reader,
            DirectoryService::Writer => &self.writer,
            DirectoryService::Importer => &self.importer,
            DirectoryService::Exporter => &self.exporter,
            DirectoryService::Model => &self.model,
        };
        own.as_ref().or(self.base.as_ref())
    }
}
