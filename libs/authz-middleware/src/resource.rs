//! Resource context construction.
//!
//! A [`ResourceBuilder`] runs its [`ResourceMapper`]s in registration order
//! against one map; a later mapper overwrites keys set by an earlier one.

use std::collections::HashMap;
use std::sync::Arc;

use authorizer_sdk::ResourceContext;
use serde_json::Value;

use crate::call::Call;
use crate::field_mask::{FieldMask, FieldMaskError};

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error(transparent)]
    FieldMask(#[from] FieldMaskError),

    /// The message could not be turned into a JSON value.
    #[error("message serialization failed: {0}")]
    Serialize(String),

    /// Raised by a custom mapper.
    #[error("{0}")]
    Mapper(String),
}

/// One extraction rule.
pub type ResourceMapper =
    Arc<dyn Fn(&Call<'_>, &mut ResourceContext) -> Result<(), ResourceError> + Send + Sync>;

/// Copy every matched path parameter under its own name.
#[must_use]
pub fn path_params() -> ResourceMapper {
    Arc::new(|call: &Call<'_>, resource: &mut ResourceContext| -> Result<(), ResourceError> {
        for (name, value) in call.path_params() {
            resource.insert(name.clone(), Value::String(value.clone()));
        }
        Ok(())
    })
}

/// Copy the masked fields of the call's message. No-op for calls without a
/// decoded message, such as streams.
#[must_use]
pub fn fields(mask: FieldMask) -> ResourceMapper {
    Arc::new(move |call: &Call<'_>, resource: &mut ResourceContext| -> Result<(), ResourceError> {
        if let Some(message) = call.message() {
            resource.extend(mask.select(message)?);
        }
        Ok(())
    })
}

/// Like [`fields`], with a mask per gRPC method. Methods missing from
/// `by_method` use `defaults`.
#[must_use]
pub fn fields_by_method<I>(by_method: I, defaults: FieldMask) -> ResourceMapper
where
    I: IntoIterator<Item = (String, FieldMask)>,
{
    let by_method: HashMap<String, FieldMask> = by_method.into_iter().collect();
    Arc::new(move |call: &Call<'_>, resource: &mut ResourceContext| -> Result<(), ResourceError> {
        let Some(message) = call.message() else {
            return Ok(());
        };
        let mask = by_method.get(call.method()).unwrap_or(&defaults);
        resource.extend(mask.select(message)?);
        Ok(())
    })
}

/// Copy context value `key` into `field` when present.
#[must_use]
pub fn context_value(key: impl Into<String>, field: impl Into<String>) -> ResourceMapper {
    let key = key.into();
    let field = field.into();
    Arc::new(move |call: &Call<'_>, resource: &mut ResourceContext| -> Result<(), ResourceError> {
        if let Some(value) = call.context_value(&key) {
            resource.insert(field.clone(), value.clone());
        }
        Ok(())
    })
}

/// Ordered chain of resource mappers.
#[derive(Clone)]
pub struct ResourceBuilder {
    mappers: Vec<ResourceMapper>,
}

impl std::fmt::Debug for ResourceBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceBuilder")
            .field("mappers", &self.mappers.len())
            .finish()
    }
}

impl Default for ResourceBuilder {
    /// Path parameters only.
    fn default() -> Self {
        Self {
            mappers: vec![path_params()],
        }
    }
}

impl ResourceBuilder {
    /// A chain producing an empty resource context.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            mappers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, mapper: ResourceMapper) -> Self {
        self.mappers.push(mapper);
        self
    }

    pub fn push(&mut self, mapper: ResourceMapper) {
        self.mappers.push(mapper);
    }

    /// # Errors
    ///
    /// Returns the first mapper error; later mappers do not run.
    pub fn build(&self, call: &Call<'_>) -> Result<ResourceContext, ResourceError> {
        let mut resource = ResourceContext::new();
        for mapper in &self.mappers {
            mapper(call, &mut resource)?;
        }
        Ok(resource)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::call::{ContextValues, RouteMatch};
    use serde_json::json;

    fn request() -> http::Request<()> {
        let mut req = http::Request::builder()
            .method("GET")
            .uri("/products/42")
            .body(())
            .unwrap();
        req.extensions_mut()
            .insert(ContextValues::new().with("tenant", "acme"));
        req
    }

    fn route() -> RouteMatch {
        RouteMatch::new("/products/{id}", vec![("id".to_owned(), "42".to_owned())])
    }

    #[test]
    fn default_chain_copies_path_params() {
        let req = request();
        let route = route();
        let call = Call::from_request(&req).with_route(&route);
        let resource = ResourceBuilder::default().build(&call).unwrap();
        assert_eq!(Value::Object(resource), json!({"id": "42"}));
    }

    #[test]
    fn later_mappers_overwrite_earlier_keys() {
        let req = request();
        let route = route();
        let call = Call::from_request(&req).with_route(&route);
        let resource = ResourceBuilder::default()
            .with(context_value("tenant", "id"))
            .with(context_value("missing", "other"))
            .build(&call)
            .unwrap();
        assert_eq!(Value::Object(resource), json!({"id": "acme"}));
    }

    #[test]
    fn field_mappers_skip_calls_without_message() {
        let req = request();
        let call = Call::from_request(&req);
        let resource = ResourceBuilder::empty()
            .with(fields(FieldMask::parse(["product.type"]).unwrap()))
            .build(&call)
            .unwrap();
        assert!(resource.is_empty());
    }

    #[test]
    fn per_method_masks_override_defaults() {
        let message = json!({"id": "1", "name": "widget", "secret": "s"});
        let metadata = tonic::metadata::MetadataMap::new();
        let extensions = http::Extensions::new();

        let mut by_method = HashMap::new();
        by_method.insert(
            "/shop.Products/Rename".to_owned(),
            FieldMask::parse(["id", "name"]).unwrap(),
        );
        let builder = ResourceBuilder::empty().with(fields_by_method(
            by_method,
            FieldMask::parse(["id"]).unwrap(),
        ));

        let rename = Call::grpc("/shop.Products/Rename", &metadata, &extensions).with_message(&message);
        assert_eq!(
            Value::Object(builder.build(&rename).unwrap()),
            json!({"id": "1", "name": "widget"})
        );

        let get = Call::grpc("/shop.Products/Get", &metadata, &extensions).with_message(&message);
        assert_eq!(
            Value::Object(builder.build(&get).unwrap()),
            json!({"id": "1"})
        );
    }

    #[test]
    fn mask_errors_surface() {
        let message = json!({"id": "1"});
        let metadata = tonic::metadata::MetadataMap::new();
        let extensions = http::Extensions::new();
        let call = Call::grpc("/shop.Products/Get", &metadata, &extensions).with_message(&message);

        let builder = ResourceBuilder::empty().with(fields(FieldMask::parse(["nope"]).unwrap()));
        assert!(matches!(
            builder.build(&call),
            Err(ResourceError::FieldMask(FieldMaskError::UnknownField { .. }))
        ));
    }

    #[test]
    fn custom_mapper_errors_stop_the_chain() {
        let req = request();
        let call = Call::from_request(&req);
        let builder = ResourceBuilder::empty()
            .with(Arc::new(|_: &Call<'_>, _: &mut ResourceContext| {
                Err(ResourceError::Mapper("boom".to_owned()))
            }))
            .with(context_value("tenant", "tenant"));
        assert!(matches!(builder.build(&call), Err(ResourceError::Mapper(_))));
    }
}
