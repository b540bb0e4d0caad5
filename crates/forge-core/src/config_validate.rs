//! Config Validator: fans `config-validate` out to every referenced engine
//! and aggregates the results.

use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::engine::resolver::{self, ResolvedEngine};
use crate::engine::transport;
use crate::error::Result;
use crate::spec::ProjectSpec;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SpecType {
    Build,
    Test,
    Testenv,
}

/// One engine reference discovered while walking the project spec.
#[derive(Clone, Debug)]
struct EngineReference {
    uri: String,
    spec_type: SpecType,
    spec_name: String,
    spec: JsonValue,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct ValidationIssue {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub engine: String,
    #[serde(default, rename = "specType")]
    pub spec_type: String,
    #[serde(default, rename = "specName")]
    pub spec_name: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct ConfigValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

#[derive(Debug, Deserialize, Default)]
struct EngineValidationResponse {
    #[serde(default)]
    valid: bool,
    #[serde(default)]
    errors: Vec<EngineIssue>,
    #[serde(default)]
    warnings: Vec<EngineIssue>,
}

#[derive(Debug, Deserialize, Default)]
struct EngineIssue {
    #[serde(default)]
    field: String,
    #[serde(default)]
    engine: String,
    message: String,
}

fn collect_references(project: &ProjectSpec) -> Vec<EngineReference> {
    let mut seen = std::collections::BTreeSet::new();
    let mut refs = Vec::new();

    for build in &project.build {
        if seen.insert(build.engine.clone()) {
            refs.push(EngineReference {
                uri: build.engine.clone(),
                spec_type: SpecType::Build,
                spec_name: build.name.clone(),
                spec: build.spec.clone(),
            });
        }
    }
    for test in &project.test {
        if seen.insert(test.runner.clone()) {
            refs.push(EngineReference {
                uri: test.runner.clone(),
                spec_type: SpecType::Test,
                spec_name: test.name.clone(),
                spec: test.spec.clone(),
            });
        }
        if let Some(testenv) = &test.testenv {
            if !testenv.is_empty() && testenv != "noop" && seen.insert(testenv.clone()) {
                refs.push(EngineReference {
                    uri: testenv.clone(),
                    spec_type: SpecType::Testenv,
                    spec_name: test.name.clone(),
                    spec: test.spec.clone(),
                });
            }
        }
    }
    refs
}

/// Runs `config validate`: resolves and calls `config-validate` on every uniquely
/// referenced engine, aggregating errors/warnings. Unresolvable engines, failed
/// spawns, and unparseable responses become `infraError`-style entries with
/// `field=""` rather than aborting the whole fan-out.
pub fn validate_config(project: &ProjectSpec, config_path: &Path, forge_version: &str) -> Result<ConfigValidationResult> {
    let references = collect_references(project);
    let forge_spec = serde_json::to_value(project)?;

    let mut result = ConfigValidationResult { valid: true, errors: Vec::new(), warnings: Vec::new() };

    for reference in references {
        let (normalized_uri, warning) = resolver::normalize_uri(&reference.uri);
        if let Some(message) = warning {
            tracing::warn!(%message, "deprecated engine uri rewritten");
        }

        let resolved = match resolver::resolve(&normalized_uri, project, forge_version) {
            Ok(ResolvedEngine::Single(cmd)) => cmd,
            Ok(ResolvedEngine::Pipeline(_)) => {
                push_infra_error(&mut result, &reference, "multi-stage builders are not directly config-validated");
                continue;
            }
            Err(e) => {
                push_infra_error(&mut result, &reference, &e.to_string());
                continue;
            }
        };

        let arguments = serde_json::json!({
            "spec": reference.spec,
            "forgeSpec": forge_spec,
            "configPath": config_path.to_string_lossy(),
            "specType": spec_type_str(reference.spec_type),
            "specName": reference.spec_name,
        });

        let outcome = match transport::call_tool(&resolved, config_path.parent().unwrap_or(Path::new(".")), "config-validate", arguments) {
            Ok(o) => o,
            Err(e) => {
                push_infra_error(&mut result, &reference, &e.to_string());
                continue;
            }
        };

        if outcome.is_error {
            push_infra_error(&mut result, &reference, &outcome.text_blocks.join("\n"));
            continue;
        }

        let payload = match outcome.payload() {
            Ok(p) => p,
            Err(e) => {
                push_infra_error(&mut result, &reference, &e.to_string());
                continue;
            }
        };

        let parsed: EngineValidationResponse = match serde_json::from_value(payload) {
            Ok(p) => p,
            Err(e) => {
                push_infra_error(&mut result, &reference, &format!("unparseable config-validate response: {e}"));
                continue;
            }
        };

        if !parsed.valid {
            result.valid = false;
        }
        for issue in parsed.errors {
            result.errors.push(fill_reference(issue, &reference));
        }
        for issue in parsed.warnings {
            result.warnings.push(fill_reference(issue, &reference));
        }
    }

    Ok(result)
}

fn spec_type_str(spec_type: SpecType) -> &'static str {
    match spec_type {
        SpecType::Build => "build",
        SpecType::Test => "test",
        SpecType::Testenv => "testenv",
    }
}

fn fill_reference(issue: EngineIssue, reference: &EngineReference) -> ValidationIssue {
    ValidationIssue {
        field: issue.field,
        engine: if issue.engine.is_empty() { reference.uri.clone() } else { issue.engine },
        spec_type: spec_type_str(reference.spec_type).to_string(),
        spec_name: reference.spec_name.clone(),
        message: issue.message,
    }
}

fn push_infra_error(result: &mut ConfigValidationResult, reference: &EngineReference, message: &str) {
    result.valid = false;
    result.errors.push(ValidationIssue {
        field: String::new(),
        engine: reference.uri.clone(),
        spec_type: spec_type_str(reference.spec_type).to_string(),
        spec_name: reference.spec_name.clone(),
        message: message.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{BuildSpec, TestSpec};
    use std::collections::BTreeMap;

    fn sample_project() -> ProjectSpec {
        ProjectSpec {
            name: "demo".into(),
            artifact_store_path: None,
            engines: BTreeMap::new(),
            build: vec![BuildSpec {
                name: "app".into(),
                src: "./cmd/app".into(),
                dest: None,
                engine: "go://go-build".into(),
                spec: serde_json::Value::Null,
            }],
            test: vec![TestSpec {
                name: "unit".into(),
                testenv: None,
                runner: "go://go-test".into(),
                spec: serde_json::Value::Null,
                env_propagation: None,
            }],
        }
    }

    #[test]
    fn collects_deduplicated_references() {
        let project = sample_project();
        let refs = collect_references(&project);
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn unresolvable_engine_becomes_infra_error() {
        let mut project = sample_project();
        project.build[0].engine = "unknown://x".into();
        let result = validate_config(&project, Path::new("forge.yaml"), "v1").unwrap();
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.field.is_empty()));
    }
}
