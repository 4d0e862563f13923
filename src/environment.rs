//! Environment overlay staged for the next engine start.
//!
//! An [`EnvironmentOverlay`] is a flat string map with merge-on-write
//! semantics: later writes win per key, keys never disappear unless the
//! whole overlay is replaced. Config string fields reference entries with
//! `{env.NAME}` placeholders, resolved by [`EnvironmentOverlay::expand`].
//! The overlay is data only; it never touches the process environment.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ProxyHostError, ValidationError};

const PLACEHOLDER_OPEN: &str = "{env.";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentOverlay {
    vars: BTreeMap<String, String>,
}

impl EnvironmentOverlay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a flat JSON object of string to string.
    pub fn parse(text: &str) -> Result<Self, ProxyHostError> {
        let vars: BTreeMap<String, String> = serde_json::from_str(text).map_err(|e| {
            ProxyHostError::invalid("(environment)", format!("not a flat string map: {e}"))
        })?;
        let overlay = Self { vars };
        overlay.validate()?;
        Ok(overlay)
    }

    pub fn validate(&self) -> Result<(), ProxyHostError> {
        let errors: Vec<ValidationError> = self
            .vars
            .iter()
            .filter_map(|(key, value)| {
                let field = format!("env.{key}");
                if key.is_empty() {
                    Some(ValidationError::new("(environment)", "keys cannot be empty"))
                } else if key.contains('=') || key.contains('\0') {
                    Some(ValidationError::new(field, "keys cannot contain '=' or NUL"))
                } else if value.contains('\0') {
                    Some(ValidationError::new(field, "values cannot contain NUL"))
                } else {
                    None
                }
            })
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProxyHostError::ConfigValidation { errors })
        }
    }

    /// Merge `other` into this overlay; `other` wins per key.
    pub fn merge(&mut self, other: Self) {
        self.vars.extend(other.vars);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Substitute every `{env.NAME}` in `text`.
    ///
    /// Returns the name of the first unresolved or malformed reference on
    /// failure.
    pub fn expand(&self, text: &str) -> Result<String, String> {
        if !text.contains(PLACEHOLDER_OPEN) {
            return Ok(text.to_string());
        }
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find(PLACEHOLDER_OPEN) {
            out.push_str(&rest[..start]);
            let after = &rest[start + PLACEHOLDER_OPEN.len()..];
            let Some(end) = after.find('}') else {
                return Err(format!("unterminated placeholder in '{text}'"));
            };
            let name = &after[..end];
            match self.get(name) {
                Some(value) => out.push_str(value),
                None => {
                    return Err(format!(
                        "references '{{env.{name}}}' which is not set in the environment overlay"
                    ))
                }
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

impl FromIterator<(String, String)> for EnvironmentOverlay {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}
