//! Caller identity resolution.
//!
//! An [`IdentityBuilder`] describes where the identity of a call comes from
//! and how the authorizer should interpret it. Precedence is fixed and does
//! not depend on the order of builder calls:
//!
//! 1. a custom [`mapper`](IdentityBuilder::mapper),
//! 2. a declared source (header, metadata, context value, hostname),
//! 3. a static [`id`](IdentityBuilder::id).
//!
//! Resolution never fails: anything that cannot be resolved becomes the
//! anonymous identity.

use std::sync::Arc;

use authorizer_sdk::{IdentityContext, IdentityKind};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde_json::Value;

use crate::call::Call;

/// Custom identity extraction.
pub type IdentityMapper = Arc<dyn Fn(&Call<'_>) -> IdentityContext + Send + Sync>;

const AUTHORIZATION: &str = "authorization";

#[derive(Debug, Clone, PartialEq, Eq)]
enum IdentitySource {
    /// Header names tried in order.
    Header(Vec<String>),
    Metadata(String),
    ContextValue(String),
    /// Dot-separated host segment; negative counts from the end.
    Hostname(isize),
}

/// Identity resolution rules.
#[derive(Clone, Default)]
pub struct IdentityBuilder {
    kind: Option<IdentityKind>,
    id: Option<String>,
    source: Option<IdentitySource>,
    mapper: Option<IdentityMapper>,
}

impl std::fmt::Debug for IdentityBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityBuilder")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("source", &self.source)
            .field("mapper", &self.mapper.is_some())
            .finish()
    }
}

impl IdentityBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolved values are JWTs.
    #[must_use]
    pub fn jwt(mut self) -> Self {
        self.kind = Some(IdentityKind::Jwt);
        self
    }

    /// Resolved values are subject names.
    #[must_use]
    pub fn subject(mut self) -> Self {
        self.kind = Some(IdentityKind::Sub);
        self
    }

    /// Resolved values are passed to the policy without directory lookup.
    #[must_use]
    pub fn manual(mut self) -> Self {
        self.kind = Some(IdentityKind::Manual);
        self
    }

    /// Anonymous. Clears any static value, source and mapper.
    #[must_use]
    pub fn none(mut self) -> Self {
        self.kind = Some(IdentityKind::None);
        self.id = None;
        self.source = None;
        self.mapper = None;
        self
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// First non-empty header among `names`.
    #[must_use]
    pub fn from_header<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = names.into_iter().map(Into::into).collect();
        self.source = Some(IdentitySource::Header(names));
        self
    }

    /// gRPC metadata field, first value.
    #[must_use]
    pub fn from_metadata(mut self, key: impl Into<String>) -> Self {
        self.source = Some(IdentitySource::Metadata(key.into()));
        self
    }

    /// String context value set by an upstream layer.
    #[must_use]
    pub fn from_context_value(mut self, key: impl Into<String>) -> Self {
        self.source = Some(IdentitySource::ContextValue(key.into()));
        self
    }

    /// Segment `index` of the dot-separated request host. `-1` is the last
    /// segment; out of range resolves to anonymous.
    #[must_use]
    pub fn from_hostname(mut self, index: isize) -> Self {
        self.source = Some(IdentitySource::Hostname(index));
        self
    }

    #[must_use]
    pub fn mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&Call<'_>) -> IdentityContext + Send + Sync + 'static,
    {
        self.mapper = Some(Arc::new(mapper));
        self
    }

    /// Resolve the identity of `call`.
    #[must_use]
    pub fn resolve(&self, call: &Call<'_>) -> IdentityContext {
        if let Some(mapper) = &self.mapper {
            let ctx = mapper(call);
            return IdentityContext::new(ctx.kind, ctx.identity);
        }
        if self.kind == Some(IdentityKind::None) {
            return IdentityContext::none();
        }

        let (value, from_authorization) = match &self.source {
            Some(source) => resolve_source(source, call),
            None => (self.id.clone().unwrap_or_default(), false),
        };
        let value = if from_authorization {
            strip_bearer(&value).to_owned()
        } else {
            value.trim().to_owned()
        };
        if value.is_empty() {
            return IdentityContext::none();
        }

        match self.kind {
            Some(IdentityKind::Sub) if from_authorization => {
                let subject = unverified_subject(&value).unwrap_or(value);
                IdentityContext::subject(subject)
            }
            Some(kind) => IdentityContext::new(kind, value),
            None if looks_like_jwt(&value) => IdentityContext::jwt(value),
            None => IdentityContext::subject(value),
        }
    }
}

/// The raw value of `source` and whether it came from the `Authorization` header.
fn resolve_source(source: &IdentitySource, call: &Call<'_>) -> (String, bool) {
    match source {
        IdentitySource::Header(names) => names
            .iter()
            .find_map(|name| {
                call.header(name)
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| (v.to_owned(), name.eq_ignore_ascii_case(AUTHORIZATION)))
            })
            .unwrap_or_default(),
        IdentitySource::Metadata(key) => (
            call.header(key).unwrap_or_default().to_owned(),
            key.eq_ignore_ascii_case(AUTHORIZATION),
        ),
        IdentitySource::ContextValue(key) => (
            call.context_value(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            false,
        ),
        IdentitySource::Hostname(index) => (
            call.host()
                .and_then(|host| host_segment(host, *index))
                .unwrap_or_default()
                .to_owned(),
            false,
        ),
    }
}

fn host_segment(host: &str, index: isize) -> Option<&str> {
    let segments: Vec<&str> = host.split('.').collect();
    let len = isize::try_from(segments.len()).ok()?;
    let index = if index < 0 { len + index } else { index };
    usize::try_from(index)
        .ok()
        .and_then(|i| segments.get(i).copied())
}

fn strip_bearer(value: &str) -> &str {
    let value = value.trim();
    if value.eq_ignore_ascii_case("bearer") {
        return "";
    }
    match value.split_once(|c: char| c.is_ascii_whitespace()) {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => token.trim(),
        _ => value,
    }
}

fn looks_like_jwt(value: &str) -> bool {
    jsonwebtoken::decode_header(value).is_ok()
}

/// `sub` claim of a JWT, read without verifying its signature.
fn unverified_subject(token: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct Claims {
        sub: Option<String>,
    }

    jsonwebtoken::decode_header(token).ok()?;
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    claims.sub.filter(|sub| !sub.is_empty())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::call::ContextValues;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    fn token(sub: &str) -> String {
        encode(
            &Header::default(),
            &json!({"sub": sub, "exp": 1}),
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap()
    }

    fn request(headers: &[(&str, &str)]) -> http::Request<()> {
        let mut builder = http::Request::builder()
            .uri("/")
            .header("host", "acme.tenants.example.com");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn none_last_wins_over_everything() {
        let req = request(&[("authorization", "alice")]);
        let call = Call::from_request(&req);
        let identity = IdentityBuilder::new()
            .subject()
            .id("bob")
            .from_header(["authorization"])
            .mapper(|_| IdentityContext::subject("carol"))
            .none();
        assert_eq!(identity.resolve(&call), IdentityContext::none());
    }

    #[test]
    fn kind_redeclared_after_none() {
        let req = request(&[("x-user", "alice")]);
        let call = Call::from_request(&req);
        let identity = IdentityBuilder::new()
            .none()
            .manual()
            .from_header(["x-user"]);
        assert_eq!(identity.resolve(&call), IdentityContext::manual("alice"));
    }

    #[test]
    fn first_present_header_wins() {
        let req = request(&[("x-second", "bob"), ("x-third", "carol"), ("x-first", "")]);
        let call = Call::from_request(&req);
        let identity = IdentityBuilder::new()
            .subject()
            .from_header(["x-first", "x-second", "x-third"]);
        assert_eq!(identity.resolve(&call), IdentityContext::subject("bob"));
    }

    #[test]
    fn absent_headers_resolve_to_none() {
        let req = request(&[]);
        let call = Call::from_request(&req);
        let identity = IdentityBuilder::new().subject().from_header(["x-a", "x-b"]);
        assert_eq!(identity.resolve(&call), IdentityContext::none());
    }

    #[test]
    fn mapper_beats_source_and_source_beats_id() {
        let req = request(&[("x-user", "alice")]);
        let call = Call::from_request(&req);

        let sourced = IdentityBuilder::new().subject().id("bob").from_header(["x-user"]);
        assert_eq!(sourced.resolve(&call), IdentityContext::subject("alice"));

        let mapped = sourced.mapper(|_| IdentityContext::manual("carol"));
        assert_eq!(mapped.resolve(&call), IdentityContext::manual("carol"));

        let static_only = IdentityBuilder::new().manual().id("bob");
        assert_eq!(static_only.resolve(&call), IdentityContext::manual("bob"));
    }

    #[test]
    fn bearer_jwt_with_subject_kind_uses_sub_claim() {
        let auth = format!("Bearer {}", token("alice@example.com"));
        let req = request(&[("authorization", &auth)]);
        let call = Call::from_request(&req);
        let identity = IdentityBuilder::new().subject().from_header(["Authorization"]);
        assert_eq!(
            identity.resolve(&call),
            IdentityContext::subject("alice@example.com")
        );
    }

    #[test]
    fn bearer_non_jwt_falls_back_to_raw_value() {
        let req = request(&[("authorization", "Bearer alice")]);
        let call = Call::from_request(&req);
        let identity = IdentityBuilder::new().subject().from_header(["authorization"]);
        assert_eq!(identity.resolve(&call), IdentityContext::subject("alice"));
    }

    #[test]
    fn bare_bearer_scheme_is_anonymous() {
        let req = request(&[("authorization", "Bearer")]);
        let call = Call::from_request(&req);
        let identity = IdentityBuilder::new().subject().from_header(["authorization"]);
        assert_eq!(identity.resolve(&call), IdentityContext::none());
    }

    #[test]
    fn bearer_token_after_tab() {
        let req = request(&[("authorization", "Bearer\talice")]);
        let call = Call::from_request(&req);
        let identity = IdentityBuilder::new().subject().from_header(["authorization"]);
        assert_eq!(identity.resolve(&call), IdentityContext::subject("alice"));
    }

    #[test]
    fn undeclared_kind_is_inferred() {
        let jwt = token("alice");
        let auth = format!("bearer {jwt}");
        let req = request(&[("authorization", &auth)]);
        let call = Call::from_request(&req);
        let identity = IdentityBuilder::new().from_header(["authorization"]);
        assert_eq!(identity.resolve(&call), IdentityContext::jwt(jwt));

        let req = request(&[("authorization", "alice")]);
        let call = Call::from_request(&req);
        assert_eq!(identity.resolve(&call), IdentityContext::subject("alice"));
    }

    #[test]
    fn jwt_kind_keeps_token() {
        let jwt = token("alice");
        let auth = format!("Bearer {jwt}");
        let req = request(&[("authorization", &auth)]);
        let call = Call::from_request(&req);
        let identity = IdentityBuilder::new().jwt().from_header(["authorization"]);
        assert_eq!(identity.resolve(&call), IdentityContext::jwt(jwt));
    }

    #[test]
    fn context_value_must_be_a_string() {
        let mut req = request(&[]);
        req.extensions_mut()
            .insert(ContextValues::new().with("user", "alice").with("tier", 3));
        let call = Call::from_request(&req);

        let user = IdentityBuilder::new().subject().from_context_value("user");
        assert_eq!(user.resolve(&call), IdentityContext::subject("alice"));

        let tier = IdentityBuilder::new().subject().from_context_value("tier");
        assert_eq!(tier.resolve(&call), IdentityContext::none());
    }

    #[test]
    fn hostname_segments() {
        let req = request(&[]);
        let call = Call::from_request(&req);
        let at = |index| {
            IdentityBuilder::new()
                .manual()
                .from_hostname(index)
                .resolve(&call)
        };
        assert_eq!(at(0), IdentityContext::manual("acme"));
        assert_eq!(at(-2), IdentityContext::manual("example"));
        assert_eq!(at(-1), IdentityContext::manual("com"));
        assert_eq!(at(4), IdentityContext::none());
        assert_eq!(at(-5), IdentityContext::none());
    }

    #[test]
    fn metadata_source_on_grpc_calls() {
        let mut metadata = tonic::metadata::MetadataMap::new();
        metadata.insert("x-user", "alice".parse().unwrap());
        metadata.append("x-user", "bob".parse().unwrap());
        let extensions = http::Extensions::new();
        let call = Call::grpc("/svc.Api/Get", &metadata, &extensions);

        let identity = IdentityBuilder::new().subject().from_metadata("x-user");
        assert_eq!(identity.resolve(&call), IdentityContext::subject("alice"));
    }

    #[test]
    fn mapper_result_keeps_identity_invariant() {
        let req = request(&[]);
        let call = Call::from_request(&req);
        let identity = IdentityBuilder::new().mapper(|_| IdentityContext {
            identity: String::new(),
            kind: IdentityKind::Sub,
        });
        assert_eq!(identity.resolve(&call), IdentityContext::none());

        let identity = IdentityBuilder::new().mapper(|_| IdentityContext {
            identity: "alice".to_owned(),
            kind: IdentityKind::None,
        });
        assert_eq!(identity.resolve(&call), IdentityContext::none());
    }

    #[test]
    fn resolution_is_repeatable() {
        let req = request(&[("authorization", "alice")]);
        let call = Call::from_request(&req);
        let identity = IdentityBuilder::new().from_header(["authorization"]);
        assert_eq!(identity.resolve(&call), identity.resolve(&call));
    }
}
