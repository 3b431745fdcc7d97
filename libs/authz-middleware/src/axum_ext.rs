//! Axum middleware function.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, MatchedPath, RawPathParams, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::call::{Call, RouteMatch};
use crate::middleware::Authorize;

/// Authorize a request routed by axum.
///
/// Route template and path parameters come from [`MatchedPath`] and
/// [`RawPathParams`], so install it per router:
///
/// ```ignore
/// let authz: Arc<dyn Authorize> = Arc::new(middleware);
/// let app = Router::new()
///     .route("/products/{id}", get(product))
///     .layer(axum::middleware::from_fn_with_state(authz, authz_middleware::axum_ext::authorize));
/// ```
pub async fn authorize(
    State(authorizer): State<Arc<dyn Authorize>>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();

    let template = parts
        .extensions
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_owned());
    let params = match RawPathParams::from_request_parts(&mut parts, &()).await {
        Ok(params) => params
            .iter()
            .map(|(name, value)| (name.to_owned(), value.to_owned()))
            .collect(),
        Err(_) => Vec::new(),
    };
    let route = template.map(|template| RouteMatch::new(template, params));

    let call = Call::from_parts(&parts);
    let call = if let Some(route) = &route {
        call.with_route(route)
    } else {
        call
    };

    match authorizer.authorize(&call).await {
        Ok(()) => next.run(Request::from_parts(parts, body)).await,
        Err(err) => err.into_response(),
    }
}
