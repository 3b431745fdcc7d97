//! Tower layer authorizing plain HTTP services.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::{Request, Response};
use tower::{Layer, Service};

use crate::call::Call;
use crate::middleware::Authorize;
use crate::routes::RouteTable;

/// Authorizes every request before the inner service sees it.
///
/// Denied requests get `403`, failed authorizations `500`, both with the
/// error message as plain-text body. With a [`RouteTable`] the policy path
/// and path parameters come from the matched template; without one the raw
/// path is used.
///
/// ```ignore
/// let app = service.layer(AuthzLayer::new(Arc::new(authz)).with_routes(routes));
/// ```
#[derive(Clone)]
pub struct AuthzLayer {
    authorizer: Arc<dyn Authorize>,
    routes: Option<Arc<RouteTable>>,
}

impl std::fmt::Debug for AuthzLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthzLayer")
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

impl AuthzLayer {
    #[must_use]
    pub fn new(authorizer: Arc<dyn Authorize>) -> Self {
        Self {
            authorizer,
            routes: None,
        }
    }

    #[must_use]
    pub fn with_routes(mut self, routes: RouteTable) -> Self {
        self.routes = Some(Arc::new(routes));
        self
    }
}

impl<S> Layer<S> for AuthzLayer {
    type Service = AuthzService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthzService {
            inner,
            authorizer: self.authorizer.clone(),
            routes: self.routes.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthzService<S> {
    inner: S,
    authorizer: Arc<dyn Authorize>,
    routes: Option<Arc<RouteTable>>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for AuthzService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
    ResBody: From<String>,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let authorizer = self.authorizer.clone();
        let routes = self.routes.clone();
        let not_ready_inner = self.inner.clone();
        let mut ready_inner = std::mem::replace(&mut self.inner, not_ready_inner);

        Box::pin(async move {
            let (parts, body) = request.into_parts();
            let route = routes.and_then(|routes| routes.recognize(parts.uri.path()));

            let call = Call::from_parts(&parts);
            let call = if let Some(route) = &route {
                call.with_route(route)
            } else {
                call
            };

            if let Err(err) = authorizer.authorize(&call).await {
                return Ok(err.into_http_response());
            }

            ready_inner.call(Request::from_parts(parts, body)).await
        })
    }
}
