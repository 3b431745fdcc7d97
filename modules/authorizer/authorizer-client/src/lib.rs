#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Authorizer clients
//!
//! Concrete transports for the traits in `authorizer_sdk`:
//!
//! - [`GrpcAuthorizer`] / [`GrpcDirectory`] - tonic clients for the decision and relation-check RPCs
//! - [`HttpAuthorizer`] - REST/JSON client for the authorizer gateway
//! - [`ClientConfig`] / [`DirectoryConfig`] - connection settings (YAML + env via figment)
//! - [`Connections`] - connection cache keyed by configuration hash
//!
//! ## Usage
//!
//! ```ignore
//! use authorizer_client::{ClientConfig, GrpcAuthorizer};
//!
//! let config = ClientConfig::load(Some(Path::new("authorizer.yaml")), "AUTHORIZER_")?;
//! let authorizer = Arc::new(GrpcAuthorizer::connect(&config)?);
//! ```

pub mod config;
pub mod connection;
pub mod directory;
pub mod grpc;
pub mod proto;
pub mod rest;
pub mod tls;

pub use config::{ClientConfig, ConfigError, DirectoryConfig, DirectoryService};
pub use connection::{Connection, Connections, Connector, TlsConnector};
pub use directory::Directory;
pub use grpc::{GrpcAuthorizer, GrpcDirectory};
pub use rest::HttpAuthorizer;
