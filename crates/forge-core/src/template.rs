//! Template Expander: a recursive walk over a spec tree that expands
//! `{{.Env.VAR}}` and `{{allocateOpenPort addr id}}` placeholders.
//!
//! This is a hand-rolled expander rather than a general templating engine: the
//! grammar recognized here is exactly the two forms named above, each evaluated
//! with strict-missing-key semantics.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value as JsonValue;

use crate::error::{ForgeError, Result};
use crate::port_allocator::PortAllocator;

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*(.*?)\s*\}\}").expect("static regex"))
}

/// Bound names available to a single expansion pass: the `Env` map and the
/// `allocateOpenPort` function (backed by a live port allocator session).
pub struct TemplateContext<'a> {
    pub env: &'a BTreeMap<String, String>,
    pub allocator: Option<&'a mut PortAllocator>,
}

impl<'a> TemplateContext<'a> {
    pub fn env_only(env: &'a BTreeMap<String, String>) -> Self {
        Self { env, allocator: None }
    }

    fn available_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.env.keys().map(|k| format!(".Env.{k}")).collect();
        names.push("allocateOpenPort".to_string());
        names.sort();
        names
    }

    fn eval(&mut self, expr: &str, template_text: &str) -> Result<String> {
        if let Some(var) = expr.strip_prefix(".Env.") {
            return self
                .env
                .get(var)
                .cloned()
                .ok_or_else(|| self.missing_key_error(var, template_text));
        }

        if let Some(rest) = expr.strip_prefix("allocateOpenPort") {
            let args: Vec<&str> = rest
                .trim()
                .split_whitespace()
                .map(|a| a.trim_matches('"'))
                .collect();
            if args.len() != 2 {
                return Err(ForgeError::Template(format!(
                    "allocateOpenPort requires exactly 2 arguments (addr, id), got `{expr}` in `{template_text}`"
                )));
            }
            let allocator = self.allocator.as_deref_mut().ok_or_else(|| {
                ForgeError::Template(format!(
                    "allocateOpenPort called in `{template_text}` but no port allocator is bound"
                ))
            })?;
            let port = allocator.allocate(args[0], args[1])?;
            return Ok(port.to_string());
        }

        Err(self.missing_key_error(expr, template_text))
    }

    fn missing_key_error(&self, var: &str, template_text: &str) -> ForgeError {
        let available = self.available_names();
        ForgeError::Template(format!(
            "undefined variable `{var}` in template `{template_text}`; available: [{}]",
            available.join(", ")
        ))
    }
}

/// Expands every `{{...}}` placeholder in `text`, returning the literal string
/// unchanged if it contains none.
pub fn expand_string(text: &str, ctx: &mut TemplateContext) -> Result<String> {
    if !text.contains("{{") {
        return Ok(text.to_string());
    }

    let re = placeholder_regex();
    let mut result = String::with_capacity(text.len());
    let mut last_end = 0;
    for caps in re.captures_iter(text) {
        let m = caps.get(0).unwrap();
        result.push_str(&text[last_end..m.start()]);
        let expr = caps.get(1).unwrap().as_str();
        result.push_str(&ctx.eval(expr, text)?);
        last_end = m.end();
    }
    result.push_str(&text[last_end..]);
    Ok(result)
}

/// Recursively expands every string leaf in a JSON tree of `{string, map, sequence,
/// scalar}` values,.3.
pub fn expand_tree(value: &JsonValue, ctx: &mut TemplateContext) -> Result<JsonValue> {
    match value {
        JsonValue::String(s) => Ok(JsonValue::String(expand_string(s, ctx)?)),
        JsonValue::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(expand_tree(item, ctx)?);
            }
            Ok(JsonValue::Array(out))
        }
        JsonValue::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), expand_tree(v, ctx)?);
            }
            Ok(JsonValue::Object(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn tree_without_placeholders_is_identity() {
        let env = env(&[]);
        let mut ctx = TemplateContext::env_only(&env);
        let value = serde_json::json!({"a": ["x", "y"], "b": 1});
        let expanded = expand_tree(&value, &mut ctx).unwrap();
        assert_eq!(expanded, value);
    }

    #[test]
    fn expands_env_variable() {
        let env = env(&[("KUBECONFIG", "/a/kubeconfig")]);
        let mut ctx = TemplateContext::env_only(&env);
        let expanded = expand_string("path={{.Env.KUBECONFIG}}", &mut ctx).unwrap();
        assert_eq!(expanded, "path=/a/kubeconfig");
    }

    #[test]
    fn missing_key_lists_sorted_available_names_and_template_text() {
        let env = env(&[("B", "2"), ("A", "1")]);
        let mut ctx = TemplateContext::env_only(&env);
        let err = expand_string("{{.Env.MISSING}}", &mut ctx).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("MISSING"));
        assert!(msg.contains("{{.Env.MISSING}}"));
        assert!(msg.contains(".Env.A"));
        let a_pos = msg.find(".Env.A").unwrap();
        let b_pos = msg.find(".Env.B").unwrap();
        assert!(a_pos < b_pos);
    }

    #[test]
    fn allocate_open_port_without_bound_allocator_errors() {
        let env = env(&[]);
        let mut ctx = TemplateContext::env_only(&env);
        let err = expand_string("{{allocateOpenPort 127.0.0.1 api}}", &mut ctx).unwrap_err();
        assert!(err.to_string().contains("no port allocator"));
    }

    #[test]
    fn allocate_open_port_with_allocator_returns_numeric_port() {
        let dir = tempfile::tempdir().unwrap();
        let mut allocator = PortAllocator::open(dir.path().join("ports.yaml")).unwrap();
        let env = env(&[]);
        let mut ctx = TemplateContext {
            env: &env,
            allocator: Some(&mut allocator),
        };
        let expanded = expand_string("{{allocateOpenPort 127.0.0.1 api}}", &mut ctx).unwrap();
        assert!(expanded.parse::<u16>().is_ok());
    }
}
