#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Authorization middleware
//!
//! Turns every inbound HTTP request or gRPC call into one decision query
//! against the authorizer and rejects the call unless it is allowed:
//!
//! - [`IdentityBuilder`] - who is calling (header, metadata, context value, hostname)
//! - [`PolicyPathSource`] - which policy rule to evaluate (URL or method templating)
//! - [`ResourceBuilder`] - resource attributes (path params, field masks, context values)
//! - [`Middleware`] - the decision pipeline; [`CheckMiddleware`] - relation checks
//! - [`http::AuthzLayer`], [`axum_ext::authorize`], [`grpc::AuthzLayer`],
//!   [`grpc::unary`], [`grpc::stream`] - server adapters
//!
//! ## Usage
//!
//! ```ignore
//! use authz_middleware::{IdentityBuilder, Middleware};
//!
//! let authz = Middleware::builder(authorizer, Policy::new("todo", "allowed").with_root("todoApp"))
//!     .with_identity(IdentityBuilder::new().jwt().from_header(["authorization"]))
//!     .with_policy_from_url("todoApp")
//!     .build()?;
//!
//! let app = Router::new()
//!     .route("/todos/{id}", get(todo))
//!     .layer(axum::middleware::from_fn_with_state(
//!         Arc::new(authz) as Arc<dyn Authorize>,
//!         authz_middleware::axum_ext::authorize,
//!     ));
//! ```

pub mod axum_ext;
pub mod call;
pub mod decision;
pub mod error;
pub mod field_mask;
pub mod grpc;
pub mod http;
pub mod identity;
pub mod middleware;
pub mod policy_path;
pub mod rebac;
pub mod resource;
pub mod routes;

pub use call::{Call, CallKind, ContextValues, RouteInfo, RouteMatch};
pub use error::{AuthzError, BuildError};
pub use field_mask::{FieldMask, FieldMaskError};
pub use identity::IdentityBuilder;
pub use middleware::{Authorize, Middleware, MiddlewareBuilder};
pub use policy_path::PolicyPathSource;
pub use rebac::{CheckDefaults, CheckMiddleware, DirectoryChecker, PolicyChecker, RelationChecker};
pub use resource::{ResourceBuilder, ResourceError, ResourceMapper};
pub use routes::RouteTable;
