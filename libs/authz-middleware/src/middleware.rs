//! Policy-evaluating middleware: identity, policy path and resource are
//! derived from each call and sent to the authorizer in one query.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use authorizer_sdk::{AuthorizerClient, IdentityContext, Policy, ResourceContext};

use crate::call::{Call, CallKind};
use crate::decision;
use crate::error::{AuthzError, BuildError};
use crate::field_mask::FieldMask;
use crate::identity::IdentityBuilder;
use crate::policy_path::{PolicyPathSource, to_policy_path};
use crate::resource::{self, ResourceBuilder, ResourceError, ResourceMapper};

/// An authorization check run before a call reaches its handler.
///
/// Implemented by [`Middleware`] and [`CheckMiddleware`](crate::rebac::CheckMiddleware);
/// consumed by every adapter in this crate.
#[async_trait]
pub trait Authorize: Send + Sync {
    /// `Ok(())` lets the call through.
    ///
    /// # Errors
    ///
    /// [`AuthzError::Denied`] on an explicit denial, any other variant when
    /// the decision could not be made.
    async fn authorize(&self, call: &Call<'_>) -> Result<(), AuthzError>;
}

#[async_trait]
impl<T: Authorize + ?Sized> Authorize for Arc<T> {
    async fn authorize(&self, call: &Call<'_>) -> Result<(), AuthzError> {
        (**self).authorize(call).await
    }
}

/// Evaluates one decision of one policy for every call.
///
/// ```ignore
/// let authz = Middleware::builder(client, Policy::new("todo", "allowed"))
///     .with_policy_from_url("todo")
///     .build()?;
/// let router = router.layer(authz_middleware::http::AuthzLayer::new(Arc::new(authz)));
/// ```
pub struct Middleware {
    client: Arc<dyn AuthorizerClient>,
    policy: Policy,
    identity: IdentityBuilder,
    policy_path: Option<PolicyPathSource>,
    resource: ResourceBuilder,
    allowed_methods: HashSet<String>,
    ignored_paths: HashSet<String>,
}

impl std::fmt::Debug for Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Middleware")
            .field("policy", &self.policy)
            .field("identity", &self.identity)
            .field("policy_path", &self.policy_path)
            .field("resource", &self.resource)
            .field("allowed_methods", &self.allowed_methods)
            .field("ignored_paths", &self.ignored_paths)
            .finish_non_exhaustive()
    }
}

impl Middleware {
    #[must_use]
    pub fn builder(client: Arc<dyn AuthorizerClient>, policy: Policy) -> MiddlewareBuilder {
        MiddlewareBuilder {
            client,
            policy,
            identity: IdentityBuilder::new().from_header(["authorization"]),
            policy_path: None,
            resource: ResourceBuilder::default(),
            allowed_methods: HashSet::new(),
            ignored_paths: HashSet::new(),
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Whether `call` bypasses authorization. Only gRPC methods can be
    /// allow-listed.
    #[must_use]
    pub fn is_allowed_method(&self, call: &Call<'_>) -> bool {
        if call.kind() != CallKind::Grpc {
            return false;
        }
        let method = call.method();
        self.allowed_methods.contains(method)
            || (!self.ignored_paths.is_empty()
                && self
                    .ignored_paths
                    .contains(&to_policy_path(method).to_lowercase()))
    }

    #[must_use]
    pub fn identity(&self, call: &Call<'_>) -> IdentityContext {
        self.identity.resolve(call)
    }

    #[must_use]
    pub fn policy_path(&self, call: &Call<'_>) -> String {
        match &self.policy_path {
            Some(source) => source.resolve(call),
            None => PolicyPathSource::resolve_default(&self.policy.path, &self.policy.root, call),
        }
    }

    /// # Errors
    ///
    /// Returns the first failing resource mapper's error.
    pub fn resource(&self, call: &Call<'_>) -> Result<ResourceContext, ResourceError> {
        self.resource.build(call)
    }

    /// Decision invoker: query the configured decision for already resolved
    /// inputs.
    ///
    /// # Errors
    ///
    /// See [`decision::evaluate`].
    pub async fn is(
        &self,
        identity: IdentityContext,
        policy_path: String,
        resource: ResourceContext,
    ) -> Result<bool, AuthzError> {
        decision::evaluate(
            self.client.as_ref(),
            &self.policy,
            identity,
            policy_path,
            resource,
        )
        .await
    }
}

#[async_trait]
impl Authorize for Middleware {
    #[tracing::instrument(skip_all, fields(method = %call.method(), path = %call.path()))]
    async fn authorize(&self, call: &Call<'_>) -> Result<(), AuthzError> {
        if self.is_allowed_method(call) {
            tracing::debug!("method is allow-listed");
            return Ok(());
        }

        let identity = self.identity(call);
        let policy_path = self.policy_path(call);
        let resource = self.resource(call)?;

        if self.is(identity, policy_path, resource).await? {
            Ok(())
        } else {
            Err(AuthzError::Denied)
        }
    }
}

/// Builder for [`Middleware`].
///
/// Setters are infallible; problems are collected and reported by
/// [`build`](Self::build).
pub struct MiddlewareBuilder {
    client: Arc<dyn AuthorizerClient>,
    policy: Policy,
    identity: IdentityBuilder,
    policy_path: Option<PolicyPathSource>,
    resource: ResourceBuilder,
    allowed_methods: HashSet<String>,
    ignored_paths: HashSet<String>,
    errors: Vec<BuildError>,
}

impl std::fmt::Debug for MiddlewareBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareBuilder")
            .field("policy", &self.policy)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

impl MiddlewareBuilder {
    /// Replace the identity rules. The default reads the `Authorization`
    /// header with the kind inferred from its value.
    #[must_use]
    pub fn with_identity(mut self, identity: IdentityBuilder) -> Self {
        self.identity = identity;
        self
    }

    /// `[prefix.]METHOD.segment...` for HTTP calls.
    #[must_use]
    pub fn with_policy_from_url(mut self, prefix: impl Into<String>) -> Self {
        self.policy_path = Some(PolicyPathSource::Url {
            prefix: prefix.into(),
        });
        self
    }

    /// `[root.]package.Service.Method` for gRPC calls.
    #[must_use]
    pub fn with_policy_from_method(mut self, root: impl Into<String>) -> Self {
        self.policy_path = Some(PolicyPathSource::Method { root: root.into() });
        self
    }

    #[must_use]
    pub fn with_policy_path_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&Call<'_>) -> String + Send + Sync + 'static,
    {
        self.policy_path = Some(PolicyPathSource::Mapper(Arc::new(mapper)));
        self
    }

    /// Add the masked fields of the unary request message.
    ///
    /// Paths name fields as the message serializes through serde, so they
    /// follow the Rust field names rather than the proto JSON names. For
    /// `tonic-prost-build` messages, derive `serde::Serialize` with a
    /// `type_attribute` in the service's `build.rs`; see [`crate::grpc::unary`].
    #[must_use]
    pub fn with_resource_from_fields<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match FieldMask::parse(paths) {
            Ok(mask) => self.resource.push(resource::fields(mask)),
            Err(err) => self.errors.push(err.into()),
        }
        self
    }

    /// Per-method field masks, `defaults` for unlisted methods.
    #[must_use]
    pub fn with_resource_from_message_by_method<I, M, P, S>(
        mut self,
        by_method: I,
        defaults: P,
    ) -> Self
    where
        I: IntoIterator<Item = (M, P)>,
        M: Into<String>,
        P: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parsed: Result<Vec<(String, FieldMask)>, _> = by_method
            .into_iter()
            .map(|(method, paths)| FieldMask::parse(paths).map(|mask| (method.into(), mask)))
            .collect();
        match (parsed, FieldMask::parse(defaults)) {
            (Ok(by_method), Ok(defaults)) => {
                self.resource
                    .push(resource::fields_by_method(by_method, defaults));
            }
            (Err(err), _) | (_, Err(err)) => self.errors.push(err.into()),
        }
        self
    }

    /// Copy context value `key` into resource field `field`.
    #[must_use]
    pub fn with_resource_from_context_value(
        mut self,
        key: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        self.resource.push(resource::context_value(key, field));
        self
    }

    #[must_use]
    pub fn with_resource_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&Call<'_>, &mut ResourceContext) -> Result<(), ResourceError>
            + Send
            + Sync
            + 'static,
    {
        let mapper: ResourceMapper = Arc::new(mapper);
        self.resource.push(mapper);
        self
    }

    /// Send an empty resource context, dropping every mapper registered so far
    /// including the default path-parameter one.
    #[must_use]
    pub fn with_no_resource_context(mut self) -> Self {
        self.resource = ResourceBuilder::empty();
        self
    }

    /// gRPC methods (`/package.Service/Method`) that skip authorization.
    #[must_use]
    pub fn with_allowed_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_methods
            .extend(methods.into_iter().map(Into::into));
        self
    }

    /// Legacy allow-list. Entries in `/package.Service/Method` form behave as
    /// [`with_allowed_methods`](Self::with_allowed_methods); dotted entries are
    /// matched case-insensitively against `package.Service.Method`.
    #[deprecated(note = "use `with_allowed_methods`")]
    #[must_use]
    pub fn with_ignored_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for method in methods {
            let method: String = method.into();
            if method.starts_with('/') {
                self.allowed_methods.insert(method);
            } else {
                self.ignored_paths
                    .insert(method.trim_matches('.').to_lowercase());
            }
        }
        self
    }

    /// # Errors
    ///
    /// - [`BuildError::MissingName`] / [`BuildError::MissingDecision`] for an
    ///   incomplete policy
    /// - the first error recorded by a setter
    pub fn build(self) -> Result<Middleware, BuildError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        if self.policy.name.trim().is_empty() {
            return Err(BuildError::MissingName);
        }
        if self.policy.decision.trim().is_empty() {
            return Err(BuildError::MissingDecision);
        }

        Ok(Middleware {
            client: self.client,
            policy: self.policy,
            identity: self.identity,
            policy_path: self.policy_path,
            resource: self.resource,
            allowed_methods: self.allowed_methods,
            ignored_paths: self.ignored_paths,
        })
    }
}
