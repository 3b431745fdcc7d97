//! Policy path resolution.

use std::sync::Arc;

use crate::call::{Call, CallKind, RouteInfo};

/// Custom policy path extraction.
pub type PolicyPathMapper = Arc<dyn Fn(&Call<'_>) -> String + Send + Sync>;

/// Where the policy path of a call comes from.
#[derive(Clone)]
pub enum PolicyPathSource {
    /// The same path for every call.
    Static(String),
    /// `[prefix.]METHOD.segment...` from the route template, or the raw
    /// path when no route matched.
    Url { prefix: String },
    /// `[root.]package.Service.Method` from the gRPC method.
    Method { root: String },
    Mapper(PolicyPathMapper),
}

impl std::fmt::Debug for PolicyPathSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(path) => f.debug_tuple("Static").field(path).finish(),
            Self::Url { prefix } => f.debug_struct("Url").field("prefix", prefix).finish(),
            Self::Method { root } => f.debug_struct("Method").field("root", root).finish(),
            Self::Mapper(_) => f.write_str("Mapper"),
        }
    }
}

impl PolicyPathSource {
    #[must_use]
    pub fn resolve(&self, call: &Call<'_>) -> String {
        match self {
            Self::Static(path) => path.clone(),
            Self::Url { prefix } => url_policy_path(prefix, call.method(), route_path(call)),
            Self::Method { root } => method_policy_path(root, call.method()),
            Self::Mapper(mapper) => mapper(call),
        }
    }

    /// Default source for a policy: its static path when set, otherwise
    /// templating by transport with `root` as prefix.
    #[must_use]
    pub fn resolve_default(policy_path: &str, root: &str, call: &Call<'_>) -> String {
        if !policy_path.is_empty() {
            return policy_path.to_owned();
        }
        match call.kind() {
            CallKind::Http => url_policy_path(root, call.method(), route_path(call)),
            CallKind::Grpc => method_policy_path(root, call.method()),
        }
    }
}

/// Route template when the router matched one, else the raw path.
pub(crate) fn route_path<'a>(call: &Call<'a>) -> &'a str {
    call.route()
        .and_then(RouteInfo::template)
        .unwrap_or_else(|| call.path())
}

/// `[prefix.]METHOD.segment.segment...` with path parameters rendered as
/// `__name`.
///
/// Parameters are recognized in `{name}`, `{*name}`, `:name` and `*name`
/// form; a raw URL path has none, so its segments stay literal.
#[must_use]
pub fn url_policy_path(prefix: &str, method: &str, template: &str) -> String {
    let mut parts = Vec::new();
    let prefix = prefix.trim_matches('.');
    if !prefix.is_empty() {
        parts.push(prefix.to_owned());
    }
    parts.push(method.to_ascii_uppercase());
    parts.extend(
        template
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(render_segment),
    );
    parts.join(".")
}

fn render_segment(segment: &str) -> String {
    if let Some(inner) = segment
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
    {
        return format!("__{}", inner.trim_start_matches('*'));
    }
    if let Some(name) = segment
        .strip_prefix(':')
        .or_else(|| segment.strip_prefix('*'))
    {
        return format!("__{name}");
    }
    segment.to_owned()
}

/// `/package.Service/Method` as `package.Service.Method`.
#[must_use]
pub fn to_policy_path(method: &str) -> String {
    method.trim_matches('/').replace('/', ".")
}

/// [`to_policy_path`] prefixed with `root.` when `root` is non-empty.
#[must_use]
pub fn method_policy_path(root: &str, method: &str) -> String {
    let path = to_policy_path(method);
    let root = root.trim_matches('.');
    if root.is_empty() {
        path
    } else {
        format!("{root}.{path}")
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::call::RouteMatch;

    #[test]
    fn url_template_with_prefix() {
        assert_eq!(
            url_policy_path("myapp", "POST", "/products/{id}"),
            "myapp.POST.products.__id"
        );
        assert_eq!(
            url_policy_path(".myapp.", "post", "/products/:id/"),
            "myapp.POST.products.__id"
        );
    }

    #[test]
    fn url_template_without_prefix() {
        assert_eq!(
            url_policy_path("", "GET", "/api/products/{id}/reviews/{*rest}"),
            "GET.api.products.__id.reviews.__rest"
        );
        assert_eq!(url_policy_path("", "GET", "/files/*path"), "GET.files.__path");
        assert_eq!(url_policy_path("", "GET", "/"), "GET");
    }

    #[test]
    fn raw_paths_stay_literal() {
        assert_eq!(
            url_policy_path("", "DELETE", "/products/42"),
            "DELETE.products.42"
        );
    }

    #[test]
    fn grpc_method_paths() {
        assert_eq!(
            method_policy_path("", "/example.ExampleService/Method1"),
            "example.ExampleService.Method1"
        );
        assert_eq!(
            method_policy_path("policies", "/example.ExampleService/Method1"),
            "policies.example.ExampleService.Method1"
        );
    }

    #[test]
    fn default_source_depends_on_transport() {
        let req = http::Request::builder()
            .method("GET")
            .uri("/products/42")
            .body(())
            .unwrap();
        let route = RouteMatch::new("/products/{id}", vec![("id".to_owned(), "42".to_owned())]);
        let call = Call::from_request(&req).with_route(&route);
        assert_eq!(
            PolicyPathSource::resolve_default("", "app", &call),
            "app.GET.products.__id"
        );
        assert_eq!(
            PolicyPathSource::resolve_default("fixed.path", "app", &call),
            "fixed.path"
        );

        let grpc = http::Request::builder()
            .method("POST")
            .uri("/example.ExampleService/Method1")
            .body(())
            .unwrap();
        assert_eq!(
            PolicyPathSource::resolve_default("", "", &Call::grpc_request(&grpc)),
            "example.ExampleService.Method1"
        );
    }

    #[test]
    fn mapper_source() {
        let req = http::Request::builder().uri("/x").body(()).unwrap();
        let source = PolicyPathSource::Mapper(Arc::new(|call: &Call<'_>| {
            format!("custom{}", call.path().replace('/', "."))
        }));
        assert_eq!(source.resolve(&Call::from_request(&req)), "custom.x");
    }
}
