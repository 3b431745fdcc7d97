//! Field-mask selection over JSON-shaped messages.
//!
//! A mask is a set of dotted paths (`product.type`) or `*`. Selecting a mask
//! from a message builds a nested object holding only the masked fields.

use serde_json::{Map, Value};

pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldMaskError {
    #[error("field path `{path}` has an empty segment")]
    EmptySegment { path: String },

    #[error("field path `{path}`: no field `{field}`")]
    UnknownField { path: String, field: String },

    #[error("message is not an object")]
    NotAnObject,
}

/// Normalized field mask.
///
/// Paths are sorted and deduplicated, and a path covered by a shorter one
/// (`a.b` under `a`) is dropped. `*` selects every top-level scalar field,
/// stringified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMask {
    paths: Vec<Vec<String>>,
    wildcard: bool,
}

impl FieldMask {
    /// # Errors
    ///
    /// Returns [`FieldMaskError::EmptySegment`] for paths such as `a..b` or `.a`.
    pub fn parse<I, S>(paths: I) -> Result<Self, FieldMaskError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut wildcard = false;
        let mut parsed = Vec::new();
        for path in paths {
            let path = path.as_ref().trim();
            if path == WILDCARD {
                wildcard = true;
                continue;
            }
            let segments: Vec<String> = path.split('.').map(str::to_owned).collect();
            if segments.iter().any(String::is_empty) {
                return Err(FieldMaskError::EmptySegment {
                    path: path.to_owned(),
                });
            }
            parsed.push(segments);
        }

        parsed.sort();
        parsed.dedup();
        let mut paths: Vec<Vec<String>> = Vec::with_capacity(parsed.len());
        for path in parsed {
            if paths.last().is_some_and(|kept| path.starts_with(kept)) {
                continue;
            }
            paths.push(path);
        }

        Ok(Self { paths, wildcard })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && !self.wildcard
    }

    /// Normalized paths in dotted form.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.paths.iter().map(|p| p.join(".")).collect();
        if self.wildcard {
            paths.insert(0, WILDCARD.to_owned());
        }
        paths
    }

    /// Copy the masked fields of `message` into a new object.
    ///
    /// A null intermediate field yields a null leaf at the full path; object
    /// and array leaves are copied whole.
    ///
    /// # Errors
    ///
    /// - [`FieldMaskError::NotAnObject`] if `message` is not an object
    /// - [`FieldMaskError::UnknownField`] if a segment names no field
    pub fn select(&self, message: &Value) -> Result<Map<String, Value>, FieldMaskError> {
        let Value::Object(fields) = message else {
            return Err(FieldMaskError::NotAnObject);
        };

        let mut out = Map::new();
        if self.wildcard {
            for (name, value) in fields {
                if let Some(scalar) = stringify_scalar(value) {
                    out.insert(name.clone(), Value::String(scalar));
                }
            }
        }
        for path in &self.paths {
            merge(&mut out, select_path(fields, path, path)?);
        }
        Ok(out)
    }
}

fn stringify_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn select_path(
    fields: &Map<String, Value>,
    path: &[String],
    full: &[String],
) -> Result<Map<String, Value>, FieldMaskError> {
    let Some((head, rest)) = path.split_first() else {
        return Ok(Map::new());
    };
    let value = fields.get(head).ok_or_else(|| unknown(full, head))?;

    let selected = match (value, rest.first()) {
        (_, None) => value.clone(),
        (Value::Object(child), Some(_)) => Value::Object(select_path(child, rest, full)?),
        (Value::Null, Some(_)) => null_leaf(rest),
        (_, Some(next)) => return Err(unknown(full, next)),
    };

    let mut out = Map::new();
    out.insert(head.clone(), selected);
    Ok(out)
}

/// `{"a": {"b": null}}` for `["a", "b"]`.
fn null_leaf(path: &[String]) -> Value {
    path.iter().rev().fold(Value::Null, |leaf, segment| {
        let mut object = Map::new();
        object.insert(segment.clone(), leaf);
        Value::Object(object)
    })
}

fn merge(out: &mut Map<String, Value>, add: Map<String, Value>) {
    for (key, value) in add {
        match value {
            Value::Object(incoming) if out.get(&key).is_some_and(Value::is_object) => {
                if let Some(Value::Object(existing)) = out.get_mut(&key) {
                    merge(existing, incoming);
                }
            }
            value => {
                out.insert(key, value);
            }
        }
    }
}

fn unknown(full: &[String], field: &str) -> FieldMaskError {
    FieldMaskError::UnknownField {
        path: full.join("."),
        field: field.to_owned(),
    }
}
