//! Relation-check middleware.
//!
//! Instead of evaluating a policy module, [`CheckMiddleware`] asks whether a
//! subject holds a relation (or permission) on an object. Object, subject
//! and relation are derived from the call with the same machinery as
//! [`Middleware`](crate::middleware::Middleware).

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use authorizer_sdk::{
    AuthorizerClient, CheckRequest, DirectoryClient, IdentityContext, Policy, ResourceContext,
};
use serde_json::Value;

use crate::call::{Call, CallKind};
use crate::decision;
use crate::error::AuthzError;
use crate::identity::IdentityBuilder;
use crate::middleware::Authorize;
use crate::policy_path::{route_path, to_policy_path, url_policy_path};

pub const DEFAULT_SUBJECT_TYPE: &str = "user";

/// Longest relation name the directory accepts.
pub const MAX_RELATION_LEN: usize = 64;

/// Defaults applied when the builder leaves a value unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckDefaults {
    pub subject_type: String,
    /// Derived relations are cut to this many characters.
    pub max_relation_len: usize,
}

impl Default for CheckDefaults {
    fn default() -> Self {
        Self {
            subject_type: DEFAULT_SUBJECT_TYPE.to_owned(),
            max_relation_len: MAX_RELATION_LEN,
        }
    }
}

/// Backend of a [`CheckMiddleware`].
#[async_trait]
pub trait RelationChecker: Send + Sync {
    /// Whether the relation in `request` holds.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthzError`] when the backend cannot answer.
    async fn check(&self, request: CheckRequest) -> Result<bool, AuthzError>;
}

/// Checks relations with the directory reader.
pub struct DirectoryChecker {
    client: Arc<dyn DirectoryClient>,
}

impl DirectoryChecker {
    #[must_use]
    pub fn new(client: Arc<dyn DirectoryClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RelationChecker for DirectoryChecker {
    async fn check(&self, request: CheckRequest) -> Result<bool, AuthzError> {
        Ok(self.client.check(request).await?.check)
    }
}

/// Checks relations by evaluating a check policy on the authorizer.
///
/// The policy receives the subject as identity and
/// `{relation, object_type, object_id, subject_type}` as resource context.
/// Its path is `policy.path`, else `<root>.check`, else `check`.
pub struct PolicyChecker {
    client: Arc<dyn AuthorizerClient>,
    policy: Policy,
}

impl PolicyChecker {
    #[must_use]
    pub fn new(client: Arc<dyn AuthorizerClient>, policy: Policy) -> Self {
        Self { client, policy }
    }

    fn path(&self) -> String {
        if !self.policy.path.is_empty() {
            return self.policy.path.clone();
        }
        let root = self.policy.root.trim_matches('.');
        if root.is_empty() {
            "check".to_owned()
        } else {
            format!("{root}.check")
        }
    }
}

#[async_trait]
impl RelationChecker for PolicyChecker {
    async fn check(&self, request: CheckRequest) -> Result<bool, AuthzError> {
        let mut resource = ResourceContext::new();
        resource.insert("relation".to_owned(), Value::String(request.relation));
        resource.insert("object_type".to_owned(), Value::String(request.object_type));
        resource.insert("object_id".to_owned(), Value::String(request.object_id));
        resource.insert(
            "subject_type".to_owned(),
            Value::String(request.subject_type),
        );

        decision::evaluate(
            self.client.as_ref(),
            &self.policy,
            IdentityContext::subject(request.subject_id),
            self.path(),
            resource,
        )
        .await
    }
}

/// Per-call string extraction.
pub type IdMapper = Arc<dyn Fn(&Call<'_>) -> String + Send + Sync>;

/// Per-call `(type, id)` extraction.
pub type TypedIdMapper = Arc<dyn Fn(&Call<'_>) -> (String, String) + Send + Sync>;

/// A call matching any filter skips the check.
pub type Filter = Arc<dyn Fn(&Call<'_>) -> bool + Send + Sync>;

/// Relation-check middleware.
pub struct CheckMiddleware {
    checker: Arc<dyn RelationChecker>,
    object_type: String,
    object_id: String,
    object_id_mapper: Option<IdMapper>,
    object_mapper: Option<TypedIdMapper>,
    subject_type: String,
    subject_id: String,
    subject_id_mapper: Option<IdMapper>,
    subject_mapper: Option<TypedIdMapper>,
    identity: IdentityBuilder,
    relation: Option<String>,
    relation_mapper: Option<IdMapper>,
    filters: Vec<Filter>,
    defaults: CheckDefaults,
}

impl std::fmt::Debug for CheckMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckMiddleware")
            .field("object_type", &self.object_type)
            .field("object_id", &self.object_id)
            .field("subject_type", &self.subject_type)
            .field("subject_id", &self.subject_id)
            .field("identity", &self.identity)
            .field("relation", &self.relation)
            .field("filters", &self.filters.len())
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl CheckMiddleware {
    #[must_use]
    pub fn builder(checker: Arc<dyn RelationChecker>) -> CheckMiddlewareBuilder {
        CheckMiddlewareBuilder {
            inner: Self {
                checker,
                object_type: String::new(),
                object_id: String::new(),
                object_id_mapper: None,
                object_mapper: None,
                subject_type: String::new(),
                subject_id: String::new(),
                subject_id_mapper: None,
                subject_mapper: None,
                identity: IdentityBuilder::new().subject().from_header(["authorization"]),
                relation: None,
                relation_mapper: None,
                filters: Vec::new(),
                defaults: CheckDefaults::default(),
            },
        }
    }

    /// Whether a filter exempts `call` from the check.
    #[must_use]
    pub fn is_filtered(&self, call: &Call<'_>) -> bool {
        self.filters.iter().any(|filter| filter(call))
    }

    /// The relation tuple for `call`.
    ///
    /// # Errors
    ///
    /// [`AuthzError::Config`] when the object ID, object type, subject ID or
    /// relation resolves empty.
    pub fn check_request(&self, call: &Call<'_>) -> Result<CheckRequest, AuthzError> {
        let (object_type, object_id) = self.object(call);
        if object_id.is_empty() {
            return Err(AuthzError::Config("object ID is empty".to_owned()));
        }
        if object_type.is_empty() {
            return Err(AuthzError::Config("object type is empty".to_owned()));
        }

        let (subject_type, subject_id) = self.subject(call);
        if subject_id.is_empty() {
            return Err(AuthzError::Config("subject ID is empty".to_owned()));
        }

        let relation = self.relation(call);
        if relation.is_empty() {
            return Err(AuthzError::Config("relation is empty".to_owned()));
        }

        Ok(CheckRequest {
            object_type,
            object_id,
            relation,
            subject_type,
            subject_id,
            trace: false,
        })
    }

    fn object(&self, call: &Call<'_>) -> (String, String) {
        if let Some(mapper) = &self.object_mapper {
            return mapper(call);
        }
        let id = match &self.object_id_mapper {
            Some(mapper) => mapper(call),
            None => self.object_id.clone(),
        };
        (self.object_type.clone(), id)
    }

    fn subject(&self, call: &Call<'_>) -> (String, String) {
        let (subject_type, subject_id) = match (&self.subject_mapper, &self.subject_id_mapper) {
            (Some(mapper), _) => mapper(call),
            (None, Some(mapper)) => (self.subject_type.clone(), mapper(call)),
            (None, None) if !self.subject_id.is_empty() => {
                (self.subject_type.clone(), self.subject_id.clone())
            }
            (None, None) => (
                self.subject_type.clone(),
                self.identity.resolve(call).identity,
            ),
        };
        if subject_type.is_empty() {
            (self.defaults.subject_type.clone(), subject_id)
        } else {
            (subject_type, subject_id)
        }
    }

    fn relation(&self, call: &Call<'_>) -> String {
        if let Some(mapper) = &self.relation_mapper {
            return mapper(call);
        }
        if let Some(relation) = &self.relation {
            return relation.clone();
        }

        let derived = match call.kind() {
            CallKind::Grpc => to_policy_path(call.method()),
            CallKind::Http => url_policy_path("", call.method(), route_path(call)),
        };
        derived
            .to_lowercase()
            .chars()
            .take(self.defaults.max_relation_len)
            .collect()
    }
}

#[async_trait]
impl Authorize for CheckMiddleware {
    #[tracing::instrument(skip_all, fields(method = %call.method(), path = %call.path()))]
    async fn authorize(&self, call: &Call<'_>) -> Result<(), AuthzError> {
        if self.is_filtered(call) {
            tracing::debug!("relation check skipped by filter");
            return Ok(());
        }

        let request = self.check_request(call)?;
        tracing::debug!(
            object_type = %request.object_type,
            object_id = %request.object_id,
            relation = %request.relation,
            subject_type = %request.subject_type,
            "checking relation"
        );

        match self.checker.check(request).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::info!("relation check denied");
                Err(AuthzError::Denied)
            }
            Err(err) => {
                tracing::warn!(error = %err, "relation check failed");
                Err(AuthzError::Denied)
            }
        }
    }
}

/// Builder for [`CheckMiddleware`].
pub struct CheckMiddlewareBuilder {
    inner: CheckMiddleware,
}

impl std::fmt::Debug for CheckMiddlewareBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckMiddlewareBuilder")
            .field("inner", &self.inner)
            .finish()
    }
}

impl CheckMiddlewareBuilder {
    #[must_use]
    pub fn with_object_type(mut self, object_type: impl Into<String>) -> Self {
        self.inner.object_type = object_type.into();
        self
    }

    #[must_use]
    pub fn with_object_id(mut self, object_id: impl Into<String>) -> Self {
        self.inner.object_id = object_id.into();
        self
    }

    #[must_use]
    pub fn with_object_id_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&Call<'_>) -> String + Send + Sync + 'static,
    {
        self.inner.object_id_mapper = Some(Arc::new(mapper));
        self
    }

    /// Object ID from a string context value.
    #[must_use]
    pub fn with_object_id_from_context_value(self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.with_object_id_mapper(move |call| context_string(call, &key))
    }

    /// Object ID from a matched path parameter.
    #[must_use]
    pub fn with_object_id_from_path_param(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.with_object_id_mapper(move |call| call.path_param(&name).unwrap_or_default().to_owned())
    }

    /// `(object_type, object_id)` in one go; overrides every other object setting.
    #[must_use]
    pub fn with_object_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&Call<'_>) -> (String, String) + Send + Sync + 'static,
    {
        self.inner.object_mapper = Some(Arc::new(mapper));
        self
    }

    #[must_use]
    pub fn with_subject_type(mut self, subject_type: impl Into<String>) -> Self {
        self.inner.subject_type = subject_type.into();
        self
    }

    #[must_use]
    pub fn with_subject_id(mut self, subject_id: impl Into<String>) -> Self {
        self.inner.subject_id = subject_id.into();
        self
    }

    #[must_use]
    pub fn with_subject_id_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&Call<'_>) -> String + Send + Sync + 'static,
    {
        self.inner.subject_id_mapper = Some(Arc::new(mapper));
        self
    }

    #[must_use]
    pub fn with_subject_id_from_context_value(self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.with_subject_id_mapper(move |call| context_string(call, &key))
    }

    /// `(subject_type, subject_id)` in one go; an empty type still defaults.
    #[must_use]
    pub fn with_subject_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&Call<'_>) -> (String, String) + Send + Sync + 'static,
    {
        self.inner.subject_mapper = Some(Arc::new(mapper));
        self
    }

    /// Identity rules used for the subject ID when nothing else sets it.
    /// The default is the `Authorization` header, JWT `sub` claim if present.
    #[must_use]
    pub fn with_identity(mut self, identity: IdentityBuilder) -> Self {
        self.inner.identity = identity;
        self
    }

    #[must_use]
    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.inner.relation = Some(relation.into());
        self
    }

    #[must_use]
    pub fn with_relation_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&Call<'_>) -> String + Send + Sync + 'static,
    {
        self.inner.relation_mapper = Some(Arc::new(mapper));
        self
    }

    /// Skip the check for these gRPC methods.
    #[must_use]
    pub fn with_method_filter<I, S>(self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let methods: HashSet<String> = methods.into_iter().map(Into::into).collect();
        self.with_filter(move |call| {
            call.kind() == CallKind::Grpc && methods.contains(call.method())
        })
    }

    /// Skip the check when context value `key` is one of `values`.
    #[must_use]
    pub fn with_context_value_filter<I, S>(self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let key = key.into();
        let values: HashSet<String> = values.into_iter().map(Into::into).collect();
        self.with_filter(move |call| {
            call.context_value(&key)
                .and_then(Value::as_str)
                .is_some_and(|value| values.contains(value))
        })
    }

    #[must_use]
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Call<'_>) -> bool + Send + Sync + 'static,
    {
        self.inner.filters.push(Arc::new(filter));
        self
    }

    #[must_use]
    pub fn with_defaults(mut self, defaults: CheckDefaults) -> Self {
        self.inner.defaults = defaults;
        self
    }

    #[must_use]
    pub fn build(self) -> CheckMiddleware {
        self.inner
    }
}

fn context_string(call: &Call<'_>, key: &str) -> String {
    call.context_value(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use authorizer_sdk::{AuthorizerError, CheckResponse, IsRequest, IsResponse};
    use serde_json::json;

    use crate::call::{ContextValues, RouteMatch};

    #[derive(Default)]
    struct Directory {
        answer: bool,
        seen: Mutex<Vec<CheckRequest>>,
    }

    #[async_trait]
    impl DirectoryClient for Directory {
        async fn check(&self, request: CheckRequest) -> Result<CheckResponse, AuthorizerError> {
            self.seen.lock().unwrap().push(request);
            Ok(CheckResponse {
                check: self.answer,
                trace: Vec::new(),
            })
        }
    }

    fn directory(answer: bool) -> Arc<Directory> {
        Arc::new(Directory {
            answer,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn checker(dir: &Arc<Directory>) -> Arc<dyn RelationChecker> {
        Arc::new(DirectoryChecker::new(dir.clone()))
    }

    fn item_request() -> (http::Request<()>, RouteMatch) {
        let req = http::Request::builder()
            .method("GET")
            .uri("/items/42")
            .header("authorization", "bob")
            .body(())
            .unwrap();
        let route = RouteMatch::new("/items/{id}", vec![("id".to_owned(), "42".to_owned())]);
        (req, route)
    }

    #[tokio::test]
    async fn tuple_from_path_param_and_header() {
        let dir = directory(true);
        let authz = CheckMiddleware::builder(checker(&dir))
            .with_object_type("item")
            .with_object_id_from_path_param("id")
            .with_relation("read")
            .build();

        let (req, route) = item_request();
        authz
            .authorize(&Call::from_request(&req).with_route(&route))
            .await
            .unwrap();

        assert_eq!(
            dir.seen.lock().unwrap()[0],
            CheckRequest {
                object_type: "item".to_owned(),
                object_id: "42".to_owned(),
                relation: "read".to_owned(),
                subject_type: "user".to_owned(),
                subject_id: "bob".to_owned(),
                trace: false,
            }
        );
    }

    #[tokio::test]
    async fn empty_object_fails_without_backend_call() {
        let dir = directory(true);
        let (req, route) = item_request();
        let call = Call::from_request(&req).with_route(&route);

        let no_type = CheckMiddleware::builder(checker(&dir))
            .with_object_id("42")
            .with_relation("read")
            .build();
        match no_type.authorize(&call).await {
            Err(AuthzError::Config(msg)) => assert_eq!(msg, "object type is empty"),
            other => panic!("expected config error, got {other:?}"),
        }

        let no_id = CheckMiddleware::builder(checker(&dir))
            .with_object_type("item")
            .with_relation("read")
            .build();
        match no_id.authorize(&call).await {
            Err(AuthzError::Config(msg)) => assert_eq!(msg, "object ID is empty"),
            other => panic!("expected config error, got {other:?}"),
        }

        assert!(dir.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn mapper_precedence() {
        let dir = directory(true);
        let mut req = http::Request::builder()
            .uri("/items/42")
            .header("authorization", "bob")
            .body(())
            .unwrap();
        req.extensions_mut()
            .insert(ContextValues::new().with("owner", "carol").with("item", "7"));
        let call = Call::from_request(&req);

        let authz = CheckMiddleware::builder(checker(&dir))
            .with_object_type("item")
            .with_object_id("1")
            .with_object_id_from_context_value("item")
            .with_subject_id("dave")
            .with_subject_id_from_context_value("owner")
            .with_relation("read")
            .build();
        let request = authz.check_request(&call).unwrap();
        assert_eq!(request.object_id, "7");
        assert_eq!(request.subject_id, "carol");

        let combined = CheckMiddleware::builder(checker(&dir))
            .with_object_type("item")
            .with_object_id_from_context_value("item")
            .with_object_mapper(|_| ("folder".to_owned(), "f1".to_owned()))
            .with_subject_mapper(|_| (String::new(), "erin".to_owned()))
            .with_relation("read")
            .build();
        let request = combined.check_request(&call).unwrap();
        assert_eq!((request.object_type.as_str(), request.object_id.as_str()), ("folder", "f1"));
        assert_eq!((request.subject_type.as_str(), request.subject_id.as_str()), ("user", "erin"));

        let static_subject = CheckMiddleware::builder(checker(&dir))
            .with_object_type("item")
            .with_object_id("1")
            .with_subject_type("group")
            .with_subject_id("admins")
            .with_relation("read")
            .build();
        let request = static_subject.check_request(&call).unwrap();
        assert_eq!((request.subject_type.as_str(), request.subject_id.as_str()), ("group", "admins"));
    }

    #[test]
    fn relation_is_derived_from_grpc_method() {
        let dir = directory(true);
        let metadata = {
            let mut metadata = tonic::metadata::MetadataMap::new();
            metadata.insert("authorization", "bob".parse().unwrap());
            metadata
        };
        let extensions = http::Extensions::new();
        let call = Call::grpc("/Example.ExampleService/GetItem", &metadata, &extensions);

        let authz = CheckMiddleware::builder(checker(&dir))
            .with_object_type("item")
            .with_object_id("1")
            .build();
        assert_eq!(
            authz.check_request(&call).unwrap().relation,
            "example.exampleservice.getitem"
        );

        let short = CheckMiddleware::builder(checker(&dir))
            .with_object_type("item")
            .with_object_id("1")
            .with_defaults(CheckDefaults {
                max_relation_len: 7,
                ..CheckDefaults::default()
            })
            .build();
        assert_eq!(short.check_request(&call).unwrap().relation, "example");
    }

    #[test]
    fn derived_relation_is_capped() {
        let dir = directory(true);
        let long = format!("/pkg.Service/{}", "M".repeat(100));
        let metadata = tonic::metadata::MetadataMap::new();
        let extensions = http::Extensions::new();
        let call = Call::grpc(&long, &metadata, &extensions);

        let authz = CheckMiddleware::builder(checker(&dir))
            .with_object_type("item")
            .with_object_id("1")
            .with_subject_id("bob")
            .build();
        assert_eq!(
            authz.check_request(&call).unwrap().relation.chars().count(),
            MAX_RELATION_LEN
        );
    }

    #[test]
    fn relation_is_derived_from_http_route() {
        let dir = directory(true);
        let (req, route) = item_request();
        let call = Call::from_request(&req).with_route(&route);
        let authz = CheckMiddleware::builder(checker(&dir))
            .with_object_type("item")
            .with_object_id("1")
            .build();
        assert_eq!(authz.check_request(&call).unwrap().relation, "get.items.__id");
    }

    #[tokio::test]
    async fn filters_bypass_the_check() {
        let dir = directory(false);
        let authz = CheckMiddleware::builder(checker(&dir))
            .with_method_filter(["/grpc.health.v1.Health/Check"])
            .with_context_value_filter("role", ["admin"])
            .build();

        let metadata = tonic::metadata::MetadataMap::new();
        let extensions = http::Extensions::new();
        authz
            .authorize(&Call::grpc("/grpc.health.v1.Health/Check", &metadata, &extensions))
            .await
            .unwrap();

        let mut req = http::Request::builder().uri("/").body(()).unwrap();
        req.extensions_mut()
            .insert(ContextValues::new().with("role", "admin"));
        authz.authorize(&Call::from_request(&req)).await.unwrap();

        assert!(dir.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn false_and_errors_are_both_denials() {
        struct Broken;

        #[async_trait]
        impl RelationChecker for Broken {
            async fn check(&self, _request: CheckRequest) -> Result<bool, AuthzError> {
                Err(AuthzError::Backend(AuthorizerError::Transport(
                    "unavailable".to_owned(),
                )))
            }
        }

        let (req, route) = item_request();
        let call = Call::from_request(&req).with_route(&route);

        let denied = CheckMiddleware::builder(checker(&directory(false)))
            .with_object_type("item")
            .with_object_id_from_path_param("id")
            .with_relation("read")
            .build();
        assert!(matches!(denied.authorize(&call).await, Err(AuthzError::Denied)));

        let broken = CheckMiddleware::builder(Arc::new(Broken))
            .with_object_type("item")
            .with_object_id_from_path_param("id")
            .with_relation("read")
            .build();
        assert!(matches!(broken.authorize(&call).await, Err(AuthzError::Denied)));
    }

    #[tokio::test]
    async fn policy_checker_evaluates_check_policy() {
        #[derive(Default)]
        struct Authorizer {
            seen: Mutex<Vec<IsRequest>>,
        }

        #[async_trait]
        impl AuthorizerClient for Authorizer {
            async fn is(&self, request: IsRequest) -> Result<IsResponse, AuthorizerError> {
                self.seen.lock().unwrap().push(request);
                Ok(IsResponse::single("allowed", true))
            }
        }

        let authorizer = Arc::new(Authorizer::default());
        let checker = PolicyChecker::new(
            authorizer.clone(),
            Policy::new("rebac", "allowed").with_root("rebac"),
        );
        let allowed = checker
            .check(CheckRequest {
                object_type: "item".to_owned(),
                object_id: "42".to_owned(),
                relation: "read".to_owned(),
                subject_type: "user".to_owned(),
                subject_id: "bob".to_owned(),
                trace: false,
            })
            .await
            .unwrap();
        assert!(allowed);

        let seen = authorizer.seen.lock().unwrap();
        assert_eq!(seen[0].policy_context.path, "rebac.check");
        assert_eq!(seen[0].identity_context, IdentityContext::subject("bob"));
        assert_eq!(
            Value::Object(seen[0].resource_context.clone()),
            json!({
                "relation": "read",
                "object_type": "item",
                "object_id": "42",
                "subject_type": "user",
            })
        );
    }
}
