#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Authorizer SDK
//!
//! This crate provides the public contract of the policy authorizer:
//!
//! - [`AuthorizerClient`] - single-decision policy evaluation (`Is`)
//! - [`DirectoryClient`] - relation check against the directory (`Check`)
//! - [`IsRequest`], [`IsResponse`], [`CheckRequest`], [`CheckResponse`] - wire models
//! - [`Policy`] - the policy reference a middleware evaluates
//! - [`AuthorizerError`] - transport and backend failures
//!
//! Concrete gRPC and REST clients live in `authorizer_client`; request
//! interception lives in `authz_middleware`.
//!
//! ## Usage
//!
//! ```ignore
//! use authorizer_sdk::{AuthorizerClient, IdentityContext, IsRequest, Policy};
//!
//! let policy = Policy::new("todo", "allowed").with_path("todoApp.GET.todos");
//! let request = IsRequest::new(
//!     IdentityContext::subject("alice@example.com"),
//!     &policy,
//!     policy.path.clone(),
//!     serde_json::Map::new(),
//! );
//! let response = client.is(request).await?;
//! ```

pub mod api;
pub mod error;
pub mod models;

pub use api::{AuthorizerClient, DirectoryClient};
pub use error::AuthorizerError;
pub use models::{
    CheckRequest, CheckResponse, Decision, IdentityContext, IdentityKind, IsRequest, IsResponse,
    Policy, PolicyContext, PolicyInstance, ResourceContext,
};
