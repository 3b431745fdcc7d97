//! Generated protobuf and gRPC code for the authorizer `Is` and directory
//! reader `Check` calls, and conversions to and from the SDK models.

use std::collections::BTreeMap;

use prost_types::value::Kind;
use prost_types::{ListValue, Struct, Value};
use serde_json::Number;

use authorizer_sdk::models;

#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
pub mod aserto {
    pub mod authorizer {
        pub mod v2 {
            tonic::include_proto!("aserto.authorizer.v2");

            pub mod api {
                tonic::include_proto!("aserto.authorizer.v2.api");
            }
        }
    }

    pub mod directory {
        pub mod reader {
            pub mod v3 {
                tonic::include_proto!("aserto.directory.reader.v3");
            }
        }
    }
}

pub use aserto::authorizer::v2::api::{IdentityContext, IdentityType, PolicyContext, PolicyInstance};
pub use aserto::authorizer::v2::authorizer_client::AuthorizerClient;
pub use aserto::authorizer::v2::{Decision, IsRequest, IsResponse};
pub use aserto::directory::reader::v3::reader_client::ReaderClient;
pub use aserto::directory::reader::v3::{CheckRequest, CheckResponse};

impl From<models::IdentityKind> for IdentityType {
    fn from(kind: models::IdentityKind) -> Self {
        match kind {
            models::IdentityKind::None => Self::None,
            models::IdentityKind::Sub => Self::Sub,
            models::IdentityKind::Jwt => Self::Jwt,
            models::IdentityKind::Manual => Self::Manual,
        }
    }
}

impl From<models::IsRequest> for IsRequest {
    fn from(request: models::IsRequest) -> Self {
        let identity = request.identity_context;
        Self {
            policy_context: Some(PolicyContext {
                path: request.policy_context.path,
                decisions: request.policy_context.decisions,
            }),
            identity_context: Some(IdentityContext {
                identity: identity.identity,
                r#type: IdentityType::from(identity.kind).into(),
            }),
            resource_context: Some(to_struct(request.resource_context)),
            policy_instance: request.policy_instance.map(|instance| PolicyInstance {
                name: instance.name,
                instance_label: instance.instance_label,
            }),
        }
    }
}

impl From<IsResponse> for models::IsResponse {
    fn from(response: IsResponse) -> Self {
        Self {
            decisions: response
                .decisions
                .into_iter()
                .map(|d| models::Decision {
                    decision: d.decision,
                    is: d.is,
                })
                .collect(),
        }
    }
}

impl From<models::CheckRequest> for CheckRequest {
    fn from(request: models::CheckRequest) -> Self {
        Self {
            object_type: request.object_type,
            object_id: request.object_id,
            relation: request.relation,
            subject_type: request.subject_type,
            subject_id: request.subject_id,
            trace: request.trace,
        }
    }
}

impl From<CheckResponse> for models::CheckResponse {
    fn from(response: CheckResponse) -> Self {
        Self {
            check: response.check,
            trace: response.trace,
        }
    }
}

/// Convert a JSON object into `google.protobuf.Struct`.
#[must_use]
pub fn to_struct(map: serde_json::Map<String, serde_json::Value>) -> Struct {
    Struct {
        fields: map
            .into_iter()
            .map(|(key, value)| (key, to_value(value)))
            .collect::<BTreeMap<_, _>>(),
    }
}

/// Convert a JSON value into `google.protobuf.Value`. Numbers become doubles.
#[must_use]
pub fn to_value(value: serde_json::Value) -> Value {
    let kind = match value {
        serde_json::Value::Null => Kind::NullValue(0),
        serde_json::Value::Bool(b) => Kind::BoolValue(b),
        serde_json::Value::Number(n) => n.as_f64().map_or(Kind::NullValue(0), Kind::NumberValue),
        serde_json::Value::String(s) => Kind::StringValue(s),
        serde_json::Value::Array(items) => Kind::ListValue(ListValue {
            values: items.into_iter().map(to_value).collect(),
        }),
        serde_json::Value::Object(map) => Kind::StructValue(to_struct(map)),
    };
    Value { kind: Some(kind) }
}

/// Inverse of [`to_value`]; non-finite doubles become `null`.
#[must_use]
pub fn from_value(value: Value) -> serde_json::Value {
    match value.kind {
        None | Some(Kind::NullValue(_)) => serde_json::Value::Null,
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
        Some(Kind::NumberValue(n)) => {
            Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
        }
        Some(Kind::StringValue(s)) => serde_json::Value::String(s),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.into_iter().map(from_value).collect())
        }
        Some(Kind::StructValue(s)) => serde_json::Value::Object(
            s.fields
                .into_iter()
                .map(|(key, value)| (key, from_value(value)))
                .collect(),
        ),
    }
}
