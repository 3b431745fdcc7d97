//! Route templates for HTTP stacks without a router that exposes them.

use crate::call::RouteMatch;
use crate::error::BuildError;

/// Known route templates, matched against request paths.
///
/// Templates may use `{id}` / `{*rest}` or `:id` / `*rest` parameters.
#[derive(Clone, Default)]
pub struct RouteTable {
    router: matchit::Router<String>,
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable").finish_non_exhaustive()
    }
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Returns [`BuildError::Route`] if the template is malformed or
    /// conflicts with one already added.
    pub fn insert(&mut self, template: &str) -> Result<(), BuildError> {
        self.router
            .insert(to_matchit(template), template.to_owned())
            .map_err(|e| BuildError::Route {
                template: template.to_owned(),
                reason: e.to_string(),
            })
    }

    /// # Errors
    ///
    /// See [`insert`](Self::insert).
    pub fn from_templates<I, S>(templates: I) -> Result<Self, BuildError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = Self::new();
        for template in templates {
            table.insert(template.as_ref())?;
        }
        Ok(table)
    }

    /// Template and parameters of the route matching `path`.
    #[must_use]
    pub fn recognize(&self, path: &str) -> Option<RouteMatch> {
        let matched = self.router.at(path).ok()?;
        let params = matched
            .params
            .iter()
            .map(|(name, value)| (name.to_owned(), value.to_owned()))
            .collect();
        Some(RouteMatch::new(matched.value.clone(), params))
    }
}

/// `:param` and `*param` segments as `{param}` and `{*param}`.
fn to_matchit(template: &str) -> String {
    let mut result = String::with_capacity(template.len() + 4);
    let mut chars = template.chars().peekable();
    let mut segment_start = true;

    while let Some(ch) = chars.next() {
        if segment_start && (ch == ':' || ch == '*') {
            result.push('{');
            if ch == '*' {
                result.push('*');
            }
            while matches!(chars.peek(), Some(c) if c.is_alphanumeric() || *c == '_') {
                if let Some(c) = chars.next() {
                    result.push(c);
                }
            }
            result.push('}');
            segment_start = false;
        } else {
            segment_start = ch == '/';
            result.push(ch);
        }
    }

    result
}
