//! The Project Spec: the declarative input document that drives a Forge run.
//! Immutable for the duration of a single command invocation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{ForgeError, Result};
use crate::validation::{ValidationErrors, require_non_empty, require_valid_uri};

/// One stage of a multi-engine `Builder` pipeline.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Default)]
pub struct BuilderStage {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, rename = "envFile")]
    pub env_file: Option<String>,
    #[serde(default, rename = "workDir")]
    pub work_dir: Option<String>,
}

/// An engine reference: either a bare resolvable URI, or an ordered `Builder` pipeline.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum EngineConfig {
    Uri(String),
    Builder {
        #[serde(rename = "builder")]
        stages: Vec<BuilderStage>,
    },
}

impl EngineConfig {
    /// Returns the single stage of a one-element `Builder`, if this is one.
    pub fn as_single_builder_stage(&self) -> Option<&BuilderStage> {
        match self {
            EngineConfig::Builder { stages } if stages.len() == 1 => stages.first(),
            _ => None,
        }
    }

    pub fn stages(&self) -> Option<&[BuilderStage]> {
        match self {
            EngineConfig::Builder { stages } => Some(stages),
            EngineConfig::Uri(_) => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct BuildSpec {
    pub name: String,
    pub src: String,
    #[serde(default)]
    pub dest: Option<String>,
    pub engine: String,
    #[serde(default)]
    pub spec: JsonValue,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Default)]
pub struct EnvPropagation {
    #[serde(default)]
    pub whitelist: Option<Vec<String>>,
    #[serde(default)]
    pub blacklist: Option<Vec<String>>,
}

impl EnvPropagation {
    /// Applies the whitelist/blacklist filter (mutually exclusive) to a set of env vars.
    pub fn filter(&self, env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        if let Some(whitelist) = &self.whitelist {
            return env
                .iter()
                .filter(|(k, _)| whitelist.iter().any(|w| w == *k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
        }
        if let Some(blacklist) = &self.blacklist {
            return env
                .iter()
                .filter(|(k, _)| !blacklist.iter().any(|b| b == *k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
        }
        env.clone()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct TestSpec {
    pub name: String,
    #[serde(default)]
    pub testenv: Option<String>,
    pub runner: String,
    #[serde(default)]
    pub spec: JsonValue,
    #[serde(default, rename = "envPropagation")]
    pub env_propagation: Option<EnvPropagation>,
}

impl TestSpec {
    /// Returns `true` if this stage declares no managed test environment.
    pub fn has_no_testenv(&self) -> bool {
        matches!(self.testenv.as_deref(), None | Some("") | Some("noop"))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct ProjectSpec {
    pub name: String,
    #[serde(default, rename = "artifactStorePath")]
    pub artifact_store_path: Option<String>,
    #[serde(default)]
    pub engines: BTreeMap<String, EngineConfig>,
    #[serde(default)]
    pub build: Vec<BuildSpec>,
    #[serde(default)]
    pub test: Vec<TestSpec>,
}

pub const DEFAULT_ARTIFACT_STORE_PATH: &str = ".forge/artifact-store.yaml";

impl ProjectSpec {
    /// Loads and validates a project spec from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| ForgeError::InvalidSpec(format!("reading {}: {e}", path.display())))?;
        let spec: ProjectSpec = serde_yaml::from_str(&raw)
            .map_err(|e| ForgeError::InvalidSpec(format!("parsing {}: {e}", path.display())))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Resolves the artifact store path, falling back to the documented default.
    pub fn artifact_store_path(&self) -> PathBuf {
        match &self.artifact_store_path {
            Some(p) => PathBuf::from(p),
            None => PathBuf::from(DEFAULT_ARTIFACT_STORE_PATH),
        }
    }

    /// Validates every field invariant, aggregating every violation rather than
    /// stopping at the first.
    pub fn validate(&self) -> Result<()> {
        let mut errors = ValidationErrors::new();

        require_non_empty(&mut errors, "project", "name", &self.name);

        for (alias, engine) in &self.engines {
            if let EngineConfig::Uri(uri) = engine {
                require_valid_uri(&mut errors, &format!("engines.{alias}"), "uri", uri);
            }
            if let EngineConfig::Builder { stages } = engine {
                for (i, stage) in stages.iter().enumerate() {
                    require_non_empty(
                        &mut errors,
                        &format!("engines.{alias}.builder[{i}]"),
                        "command",
                        &stage.command,
                    );
                }
            }
        }

        for (i, build) in self.build.iter().enumerate() {
            let ctx = format!("build[{i}] ({})", build.name);
            require_non_empty(&mut errors, &ctx, "name", &build.name);
            require_non_empty(&mut errors, &ctx, "src", &build.src);
            require_non_empty(&mut errors, &ctx, "engine", &build.engine);
            if is_bare_uri(&build.engine) {
                require_valid_uri(&mut errors, &ctx, "engine", &build.engine);
            }
        }

        for (i, test) in self.test.iter().enumerate() {
            let ctx = format!("test[{i}] ({})", test.name);
            require_non_empty(&mut errors, &ctx, "name", &test.name);
            require_non_empty(&mut errors, &ctx, "runner", &test.runner);
            if is_bare_uri(&test.runner) {
                require_valid_uri(&mut errors, &ctx, "runner", &test.runner);
            }
            if let Some(testenv) = &test.testenv {
                if !testenv.is_empty() && testenv != "noop" && is_bare_uri(testenv) {
                    require_valid_uri(&mut errors, &ctx, "testenv", testenv);
                }
            }
        }

        errors.into_result()
    }

    /// Looks up a `BuildSpec` by name.
    pub fn find_build(&self, name: &str) -> Option<&BuildSpec> {
        self.build.iter().find(|b| b.name == name)
    }

    /// Looks up a `TestSpec` by stage name.
    pub fn find_test(&self, stage: &str) -> Option<&TestSpec> {
        self.test.iter().find(|t| t.name == stage)
    }
}

/// `alias://x` references must be valid URIs; `shell://...` too. Only `alias://name` resolving
/// to a declared engine skips re-validation of its own inner command, which is validated above.
fn is_bare_uri(value: &str) -> bool {
    value.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ProjectSpec {
        serde_yaml::from_str(
            r#"
name: demo
engines:
  img:
    builder:
      - command: go-build
      - command: container-build
test-shell:
  foo: bar
build:
  - name: app
    src: ./cmd/app
    engine: go://go-build
test:
  - name: unit
    runner: go://go-test
"#,
        )
        .unwrap()
    }

    #[test]
    fn valid_spec_passes() {
        sample().validate().unwrap();
    }

    #[test]
    fn missing_build_fields_are_aggregated() {
        let mut spec = sample();
        spec.build.push(BuildSpec {
            name: String::new(),
            src: String::new(),
            dest: None,
            engine: String::new(),
            spec: JsonValue::Null,
        });
        let err = spec.validate().unwrap_err();
        match err {
            ForgeError::Validation(messages) => assert_eq!(messages.len(), 3),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let mut spec = sample();
        spec.build[0].engine = "docker://x".into();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn default_store_path_is_documented_default() {
        let spec = sample();
        assert_eq!(
            spec.artifact_store_path(),
            PathBuf::from(".forge/artifact-store.yaml")
        );
    }
}
