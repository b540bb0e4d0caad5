//! Typed field validators for spec maps, plus an aggregator that collects every
//! violation instead of stopping at the first one.

use crate::error::ForgeError;

/// Accumulates validation failures across an entire spec tree.
#[derive(Debug, Default, Clone)]
pub struct ValidationErrors {
    messages: Vec<String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        self.messages.extend(other.messages);
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.messages
    }

    /// Converts into a `Result`, succeeding iff no errors were recorded.
    pub fn into_result(self) -> Result<(), ForgeError> {
        if self.messages.is_empty() {
            Ok(())
        } else {
            Err(ForgeError::Validation(self.messages))
        }
    }
}

/// Requires a string field to be non-empty, recording a violation otherwise.
pub fn require_non_empty(errors: &mut ValidationErrors, context: &str, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(format!("{context}: `{field}` must not be empty"));
    }
}

/// Known engine URI schemes.1's invariant.
pub const ENGINE_URI_SCHEMES: &[&str] = &["go", "alias", "shell"];

/// Validates that `uri` has the form `scheme://tail` with a recognized scheme and
/// a non-empty tail. Returns the split `(scheme, tail)` on success.
pub fn parse_engine_uri(uri: &str) -> Result<(&str, &str), String> {
    let (scheme, tail) = uri
        .split_once("://")
        .ok_or_else(|| format!("engine uri `{uri}` is not of the form scheme://tail"))?;

    if !ENGINE_URI_SCHEMES.contains(&scheme) {
        return Err(format!(
            "engine uri `{uri}` has unknown scheme `{scheme}` (expected one of {ENGINE_URI_SCHEMES:?})"
        ));
    }

    if tail.is_empty() {
        return Err(format!("engine uri `{uri}` has an empty tail"));
    }

    Ok((scheme, tail))
}

/// Validates an engine URI field, recording a violation if malformed.
pub fn require_valid_uri(errors: &mut ValidationErrors, context: &str, field: &str, uri: &str) {
    if uri.trim().is_empty() {
        errors.push(format!("{context}: `{field}` must not be empty"));
        return;
    }
    if let Err(message) = parse_engine_uri(uri) {
        errors.push(format!("{context}: `{field}` {message}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_engine_uri_accepts_known_schemes() {
        assert_eq!(parse_engine_uri("go://go-build").unwrap(), ("go", "go-build"));
        assert_eq!(parse_engine_uri("alias://img").unwrap(), ("alias", "img"));
        assert_eq!(
            parse_engine_uri("shell://echo hi").unwrap(),
            ("shell", "echo hi")
        );
    }

    #[test]
    fn parse_engine_uri_rejects_unknown_scheme() {
        assert!(parse_engine_uri("docker://build").is_err());
    }

    #[test]
    fn parse_engine_uri_rejects_missing_tail() {
        assert!(parse_engine_uri("go://").is_err());
    }

    #[test]
    fn parse_engine_uri_rejects_missing_scheme_separator() {
        assert!(parse_engine_uri("go-build").is_err());
    }

    #[test]
    fn aggregator_collects_every_violation() {
        let mut errors = ValidationErrors::new();
        require_non_empty(&mut errors, "build[0]", "name", "");
        require_non_empty(&mut errors, "build[0]", "src", "");
        require_valid_uri(&mut errors, "build[0]", "engine", "nope");
        assert_eq!(errors.into_vec().len(), 3);
    }
}
