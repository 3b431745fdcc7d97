//! Tonic adapters.
//!
//! Two ways to enforce on a gRPC server:
//!
//! - [`AuthzLayer`] authorizes every call in the HTTP/2 framing, before
//!   tonic dispatches it. The decoded message is not available, so field-mask
//!   resource extractors see nothing.
//! - [`unary`] and [`stream`] authorize inside a handler on the decoded
//!   request. They need [`MethodLayer`] on the server to learn the method.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::{Extensions, Request, Response};
use serde::Serialize;
use serde_json::Value;
use tonic::Status;
use tonic::metadata::MetadataMap;
use tower::{Layer, Service};

use crate::call::Call;
use crate::error::AuthzError;
use crate::middleware::Authorize;
use crate::resource::ResourceError;

/// Full gRPC method of the current call, `/package.Service/Method`.
///
/// Inserted into the request extensions by [`MethodLayer`]; tonic carries it
/// over to the handler's [`tonic::Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodPath(pub String);

/// Stamps [`MethodPath`] on every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodLayer;

impl<S> Layer<S> for MethodLayer {
    type Service = MethodService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MethodService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct MethodService<S> {
    inner: S,
}

impl<S, ReqBody> Service<Request<ReqBody>> for MethodService<S>
where
    S: Service<Request<ReqBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        let method = MethodPath(request.uri().path().to_owned());
        request.extensions_mut().insert(method);
        self.inner.call(request)
    }
}

/// Authorizes unary and streaming calls before tonic dispatches them.
///
/// Rejections are written as gRPC trailers-only responses carrying the
/// mapped [`Status`].
///
/// ```ignore
/// Server::builder()
///     .layer(grpc::AuthzLayer::new(Arc::new(authz)))
///     .add_service(ExampleServiceServer::new(svc))
/// ```
#[derive(Clone)]
pub struct AuthzLayer {
    authorizer: Arc<dyn Authorize>,
}

impl std::fmt::Debug for AuthzLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthzLayer").finish_non_exhaustive()
    }
}

impl AuthzLayer {
    #[must_use]
    pub fn new(authorizer: Arc<dyn Authorize>) -> Self {
        Self { authorizer }
    }
}

impl<S> Layer<S> for AuthzLayer {
    type Service = AuthzService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthzService {
            inner,
            authorizer: self.authorizer.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthzService<S> {
    inner: S,
    authorizer: Arc<dyn Authorize>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for AuthzService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
    ResBody: Default,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let authorizer = self.authorizer.clone();
        let not_ready_inner = self.inner.clone();
        let mut ready_inner = std::mem::replace(&mut self.inner, not_ready_inner);

        Box::pin(async move {
            let (parts, body) = request.into_parts();
            if let Err(err) = authorizer.authorize(&Call::grpc_parts(&parts)).await {
                return Ok(Status::from(err).into_http());
            }
            ready_inner.call(Request::from_parts(parts, body)).await
        })
    }
}

/// Authorize a decoded unary request, message included.
///
/// The message is serialized to JSON for the field-mask extractors, so `M`
/// must implement `serde::Serialize`. Messages generated by `tonic-prost-build`
/// do not; add it in the service's `build.rs` with
/// `.type_attribute(".", "#[derive(serde::Serialize)]")`. Masks then match the
/// Rust field names as serde emits them (`snake_case`, or whatever
/// `#[serde(rename)]` says), not the proto JSON names.
///
/// ```ignore
/// async fn method1(&self, request: Request<Msg>) -> Result<Response<Reply>, Status> {
///     grpc::unary(&self.authz, &request).await?;
///     ...
/// }
/// ```
///
/// # Errors
///
/// Returns the [`Status`] mapped from the authorization failure, or
/// `internal` when [`MethodLayer`] is missing or the message does not
/// serialize.
pub fn unary<'a, M: Serialize>(
    authorizer: &'a dyn Authorize,
    request: &'a tonic::Request<M>,
) -> impl Future<Output = Result<(), Status>> + Send + 'a {
    let message = serde_json::to_value(request.get_ref())
        .map_err(|e| AuthzError::from(ResourceError::Serialize(e.to_string())));
    authorize_decoded(
        authorizer,
        request.metadata(),
        request.extensions(),
        Some(message),
    )
}

/// Authorize a streaming call once, before any message is exchanged.
///
/// # Errors
///
/// Same as [`unary`], minus serialization.
pub fn stream<'a, T>(
    authorizer: &'a dyn Authorize,
    request: &'a tonic::Request<T>,
) -> impl Future<Output = Result<(), Status>> + Send + 'a {
    authorize_decoded(authorizer, request.metadata(), request.extensions(), None)
}

async fn authorize_decoded(
    authorizer: &dyn Authorize,
    metadata: &MetadataMap,
    extensions: &Extensions,
    message: Option<Result<Value, AuthzError>>,
) -> Result<(), Status> {
    let Some(MethodPath(method)) = extensions.get::<MethodPath>() else {
        tracing::error!("gRPC method unknown; install grpc::MethodLayer");
        return Err(AuthzError::Config("gRPC method unknown".to_owned()).into());
    };
    let message = message.transpose()?;

    let call = Call::grpc(method, metadata, extensions);
    let call = if let Some(message) = &message {
        call.with_message(message)
    } else {
        call
    };

    authorizer.authorize(&call).await.map_err(Status::from)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tower::{ServiceExt, service_fn};

    #[derive(Default)]
    struct Recorder {
        allow: bool,
        seen: Mutex<Vec<(String, Option<Value>)>>,
    }

    #[async_trait]
    impl Authorize for Recorder {
        async fn authorize(&self, call: &Call<'_>) -> Result<(), AuthzError> {
            self.seen
                .lock()
                .unwrap()
                .push((call.method().to_owned(), call.message().cloned()));
            if self.allow {
                Ok(())
            } else {
                Err(AuthzError::Denied)
            }
        }
    }

    #[derive(Serialize)]
    struct Product {
        id: String,
        price: u32,
    }

    fn grpc_request(method: &str) -> Request<()> {
        Request::builder()
            .method("POST")
            .uri(method)
            .header("content-type", "application/grpc")
            .body(())
            .unwrap()
    }

    #[tokio::test]
    async fn layer_rejects_with_permission_denied() {
        let recorder = Arc::new(Recorder::default());
        let svc = AuthzLayer::new(recorder.clone()).layer(service_fn(|_req: Request<()>| async {
            Ok::<_, std::convert::Infallible>(Response::new("handled".to_owned()))
        }));

        let response = svc
            .oneshot(grpc_request("/example.ExampleService/Method1"))
            .await
            .unwrap();

        assert_eq!(response.headers()["grpc-status"], "7");
        assert!(response.body().is_empty());
        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen[0].0, "/example.ExampleService/Method1");
        assert!(seen[0].1.is_none());
    }

    #[tokio::test]
    async fn layer_passes_allowed_calls_through() {
        let recorder = Arc::new(Recorder {
            allow: true,
            ..Recorder::default()
        });
        let svc = AuthzLayer::new(recorder).layer(service_fn(|_req: Request<()>| async {
            Ok::<_, std::convert::Infallible>(Response::new("ok".to_owned()))
        }));

        let response = svc
            .oneshot(grpc_request("/example.ExampleService/Method1"))
            .await
            .unwrap();

        assert!(response.headers().get("grpc-status").is_none());
        assert_eq!(response.body(), "ok");
    }

    #[tokio::test]
    async fn method_layer_stamps_the_path() {
        let svc = MethodLayer.layer(service_fn(|req: Request<()>| async move {
            Ok::<_, std::convert::Infallible>(req.extensions().get::<MethodPath>().cloned())
        }));

        let stamped = svc
            .oneshot(grpc_request("/example.ExampleService/Method1"))
            .await
            .unwrap();

        assert_eq!(
            stamped,
            Some(MethodPath("/example.ExampleService/Method1".to_owned()))
        );
    }

    #[tokio::test]
    async fn unary_passes_the_serialized_message() {
        let recorder = Recorder {
            allow: true,
            ..Recorder::default()
        };
        let mut request = tonic::Request::new(Product {
            id: "p-1".to_owned(),
            price: 12,
        });
        request
            .extensions_mut()
            .insert(MethodPath("/shop.Products/Get".to_owned()));

        unary(&recorder, &request).await.unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen[0].0, "/shop.Products/Get");
        assert_eq!(seen[0].1, Some(json!({"id": "p-1", "price": 12})));
    }

    #[tokio::test]
    async fn unary_denial_is_permission_denied() {
        let recorder = Recorder::default();
        let mut request = tonic::Request::new(Product {
            id: "p-1".to_owned(),
            price: 12,
        });
        request
            .extensions_mut()
            .insert(MethodPath("/shop.Products/Get".to_owned()));

        let status = unary(&recorder, &request).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);
        assert_eq!(status.message(), "authorization failed");
    }

    #[tokio::test]
    async fn stream_authorizes_without_message() {
        let recorder = Recorder {
            allow: true,
            ..Recorder::default()
        };
        let mut request = tonic::Request::new(());
        request
            .extensions_mut()
            .insert(MethodPath("/shop.Products/Watch".to_owned()));

        stream(&recorder, &request).await.unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen[0], ("/shop.Products/Watch".to_owned(), None));
    }

    #[tokio::test]
    async fn missing_method_layer_is_internal() {
        let recorder = Recorder {
            allow: true,
            ..Recorder::default()
        };
        let request = tonic::Request::new(());

        let status = stream(&recorder, &request).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);
        assert!(recorder.seen.lock().unwrap().is_empty());
    }
}
