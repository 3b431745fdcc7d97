//! Framework-neutral view of one inbound call.
//!
//! Every resolver in this crate reads requests only through [`Call`], so the
//! HTTP, axum and tonic adapters differ only in how they build one.

use std::collections::HashMap;

use http::{Extensions, HeaderMap, Method, Uri, request::Parts};
use serde_json::Value;
use tonic::metadata::MetadataMap;

/// Transport the call arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Http,
    Grpc,
}

/// The router match of an HTTP call: route template and path parameters.
pub trait RouteInfo: Send + Sync {
    /// Route template, e.g. `/products/{id}`.
    fn template(&self) -> Option<&str>;

    /// Matched parameters in template order.
    fn params(&self) -> &[(String, String)];
}

/// Owned [`RouteInfo`] produced by [`RouteTable`](crate::routes::RouteTable)
/// and the axum adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteMatch {
    pub template: String,
    pub params: Vec<(String, String)>,
}

impl RouteMatch {
    #[must_use]
    pub fn new(template: impl Into<String>, params: Vec<(String, String)>) -> Self {
        Self {
            template: template.into(),
            params,
        }
    }
}

impl RouteInfo for RouteMatch {
    fn template(&self) -> Option<&str> {
        Some(&self.template)
    }

    fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

/// Request-scoped values set by upstream layers (authentication, tenancy).
///
/// Stored in the request extensions; identity, resource and filter rules can
/// read from it by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextValues(HashMap<String, Value>);

impl ContextValues {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String value under `key`; `None` when absent or not a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }
}

/// Header or metadata lookup, first value wins.
#[derive(Debug, Clone, Copy)]
pub enum Headers<'a> {
    Http(&'a HeaderMap),
    Grpc(&'a MetadataMap),
}

impl<'a> Headers<'a> {
    /// Value of `name` if present and valid visible ASCII.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&'a str> {
        let name = name.to_ascii_lowercase();
        match self {
            Self::Http(headers) => headers.get(name.as_str()).and_then(|v| v.to_str().ok()),
            Self::Grpc(metadata) => metadata.get(name.as_str()).and_then(|v| v.to_str().ok()),
        }
    }
}

/// One inbound call as seen by the authorization pipeline.
#[derive(Clone, Copy)]
pub struct Call<'a> {
    kind: CallKind,
    method: &'a str,
    path: &'a str,
    host: Option<&'a str>,
    headers: Headers<'a>,
    context: Option<&'a ContextValues>,
    route: Option<&'a dyn RouteInfo>,
    message: Option<&'a Value>,
}

impl std::fmt::Debug for Call<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("kind", &self.kind)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("host", &self.host)
            .field("template", &self.route.and_then(RouteInfo::template))
            .finish_non_exhaustive()
    }
}

impl<'a> Call<'a> {
    /// An HTTP call. Context values are read from `extensions`.
    #[must_use]
    pub fn http(
        method: &'a Method,
        uri: &'a Uri,
        headers: &'a HeaderMap,
        extensions: &'a Extensions,
    ) -> Self {
        Self {
            kind: CallKind::Http,
            method: method.as_str(),
            path: uri.path(),
            host: host_of(uri, headers),
            headers: Headers::Http(headers),
            context: extensions.get::<ContextValues>(),
            route: None,
            message: None,
        }
    }

    #[must_use]
    pub fn from_parts(parts: &'a Parts) -> Self {
        Self::http(&parts.method, &parts.uri, &parts.headers, &parts.extensions)
    }

    #[must_use]
    pub fn from_request<B>(request: &'a http::Request<B>) -> Self {
        Self::http(
            request.method(),
            request.uri(),
            request.headers(),
            request.extensions(),
        )
    }

    /// A gRPC call still in its HTTP/2 framing, before tonic decodes it.
    /// The method is the request path, `/package.Service/Method`.
    #[must_use]
    pub fn grpc_request<B>(request: &'a http::Request<B>) -> Self {
        Self {
            kind: CallKind::Grpc,
            method: request.uri().path(),
            ..Self::from_request(request)
        }
    }

    #[must_use]
    pub fn grpc_parts(parts: &'a Parts) -> Self {
        Self {
            kind: CallKind::Grpc,
            method: parts.uri.path(),
            ..Self::from_parts(parts)
        }
    }

    /// A decoded tonic call.
    #[must_use]
    pub fn grpc(method: &'a str, metadata: &'a MetadataMap, extensions: &'a Extensions) -> Self {
        Self {
            kind: CallKind::Grpc,
            method,
            path: method,
            host: metadata.get("host").and_then(|v| v.to_str().ok()).map(strip_port),
            headers: Headers::Grpc(metadata),
            context: extensions.get::<ContextValues>(),
            route: None,
            message: None,
        }
    }

    #[must_use]
    pub fn with_route(mut self, route: &'a dyn RouteInfo) -> Self {
        self.route = Some(route);
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: &'a Value) -> Self {
        self.message = Some(message);
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: &'a ContextValues) -> Self {
        self.context = Some(context);
        self
    }

    #[must_use]
    pub fn kind(&self) -> CallKind {
        self.kind
    }

    /// HTTP method, or the full gRPC method `/package.Service/Method`.
    #[must_use]
    pub fn method(&self) -> &'a str {
        self.method
    }

    #[must_use]
    pub fn path(&self) -> &'a str {
        self.path
    }

    /// Request host without port.
    #[must_use]
    pub fn host(&self) -> Option<&'a str> {
        self.host
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers.get(name)
    }

    #[must_use]
    pub fn context_value(&self, key: &str) -> Option<&'a Value> {
        self.context.and_then(|context| context.get(key))
    }

    #[must_use]
    pub fn route(&self) -> Option<&'a dyn RouteInfo> {
        self.route
    }

    /// Matched path parameters, empty without a route.
    #[must_use]
    pub fn path_params(&self) -> &'a [(String, String)] {
        self.route.map(RouteInfo::params).unwrap_or_default()
    }

    /// Path parameter `name`, if the route matched one.
    #[must_use]
    pub fn path_param(&self, name: &str) -> Option<&'a str> {
        self.path_params()
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Decoded request message of a unary gRPC call.
    #[must_use]
    pub fn message(&self) -> Option<&'a Value> {
        self.message
    }
}

fn host_of<'a>(uri: &'a Uri, headers: &'a HeaderMap) -> Option<&'a str> {
    uri.host().or_else(|| {
        headers
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(strip_port)
    })
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}
