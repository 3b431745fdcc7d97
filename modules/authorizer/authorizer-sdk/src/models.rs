//! Wire models for the authorizer and directory backends.
//!
//! JSON field names follow the REST gateway of the authorizer
//! (lowerCamelCase for decision queries, `snake_case` for relation checks).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Structured attributes describing the object of a request.
pub type ResourceContext = Map<String, Value>;

/// How the authorizer should interpret an identity value.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    /// Anonymous caller. The identity value is always empty.
    #[default]
    #[serde(rename = "IDENTITY_TYPE_NONE")]
    None,
    /// A subject name looked up in the directory.
    #[serde(rename = "IDENTITY_TYPE_SUB")]
    Sub,
    /// A JWT the authorizer validates and resolves itself.
    #[serde(rename = "IDENTITY_TYPE_JWT")]
    Jwt,
    /// An opaque value passed to the policy as-is, without directory lookup.
    #[serde(rename = "IDENTITY_TYPE_MANUAL")]
    Manual,
}

impl IdentityKind {
    /// Protobuf enum number of this kind.
    #[must_use]
    pub const fn as_proto(self) -> i32 {
        match self {
            Self::None => 1,
            Self::Sub => 2,
            Self::Jwt => 3,
            Self::Manual => 4,
        }
    }
}

/// The resolved caller identity.
///
/// A `None` kind always carries an empty value, and an empty value always
/// has the `None` kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityContext {
    #[serde(default)]
    pub identity: String,
    #[serde(rename = "type", default)]
    pub kind: IdentityKind,
}

impl IdentityContext {
    /// Build an identity, collapsing empty values (or the `None` kind) to anonymous.
    #[must_use]
    pub fn new(kind: IdentityKind, identity: impl Into<String>) -> Self {
        let identity = identity.into();
        if kind == IdentityKind::None || identity.is_empty() {
            return Self::none();
        }
        Self { identity, kind }
    }

    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn subject(identity: impl Into<String>) -> Self {
        Self::new(IdentityKind::Sub, identity)
    }

    #[must_use]
    pub fn jwt(token: impl Into<String>) -> Self {
        Self::new(IdentityKind::Jwt, token)
    }

    #[must_use]
    pub fn manual(value: impl Into<String>) -> Self {
        Self::new(IdentityKind::Manual, value)
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.kind == IdentityKind::None
    }
}

/// Which policy module to evaluate and which of its rules to return.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyContext {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub decisions: Vec<String>,
}

/// Identifies a policy instance loaded on the authorizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyInstance {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub instance_label: String,
}

/// Single-decision evaluation query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IsRequest {
    pub identity_context: IdentityContext,
    pub policy_context: PolicyContext,
    #[serde(default)]
    pub resource_context: ResourceContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_instance: Option<PolicyInstance>,
}

impl IsRequest {
    /// Assemble a query for the configured decision of `policy` at `path`.
    #[must_use]
    pub fn new(
        identity: IdentityContext,
        policy: &Policy,
        path: impl Into<String>,
        resource: ResourceContext,
    ) -> Self {
        Self {
            identity_context: identity,
            policy_context: PolicyContext {
                path: path.into(),
                decisions: vec![policy.decision.clone()],
            },
            resource_context: resource,
            policy_instance: Some(policy.instance()),
        }
    }
}

/// One evaluated rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Decision {
    pub decision: String,
    #[serde(default)]
    pub is: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IsResponse {
    #[serde(default)]
    pub decisions: Vec<Decision>,
}

impl IsResponse {
    /// Response carrying one decision, as the authorizer answers a single-decision query.
    #[must_use]
    pub fn single(decision: impl Into<String>, is: bool) -> Self {
        Self {
            decisions: vec![Decision {
                decision: decision.into(),
                is,
            }],
        }
    }
}

/// Relation check tuple.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckRequest {
    pub object_type: String,
    pub object_id: String,
    pub relation: String,
    pub subject_type: String,
    pub subject_id: String,
    #[serde(default)]
    pub trace: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckResponse {
    #[serde(default)]
    pub check: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<String>,
}

/// Policy reference evaluated by a middleware.
///
/// `path` may be left empty and resolved per request; `root` prefixes
/// method-derived paths and names the root of relation-check policies.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Policy {
    pub name: String,
    pub path: String,
    pub decision: String,
    pub root: String,
    /// Defaults to `name` when unset.
    pub instance_label: Option<String>,
}

impl Policy {
    #[must_use]
    pub fn new(name: impl Into<String>, decision: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            decision: decision.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    #[must_use]
    pub fn with_instance_label(mut self, label: impl Into<String>) -> Self {
        self.instance_label = Some(label.into());
        self
    }

    /// Instance this policy is loaded as on the authorizer.
    #[must_use]
    pub fn instance(&self) -> PolicyInstance {
        PolicyInstance {
            name: self.name.clone(),
            instance_label: self
                .instance_label
                .clone()
                .unwrap_or_else(|| self.name.clone()),
        }
    }
}
