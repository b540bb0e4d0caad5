//! Persisted data model for the Artifact Store and Port Allocator.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{ForgeError, Result};

pub const STORE_SCHEMA_VERSION: &str = "1.0";

/// A tagged file-or-external-package dependency fingerprint.
///
/// Represented as a tagged union rather than a struct with optional fields so that the
/// mutual-exclusion invariant is enforced by the type itself wherever serde allows.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ArtifactDependency {
    File {
        #[serde(rename = "filePath")]
        file_path: String,
        timestamp: String,
    },
    ExternalPackage {
        #[serde(rename = "externalPackage")]
        external_package: String,
    },
}

impl ArtifactDependency {
    pub fn file_path(&self) -> Option<&str> {
        match self {
            ArtifactDependency::File { file_path, .. } => Some(file_path),
            ArtifactDependency::ExternalPackage { .. } => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct Artifact {
    pub name: String,
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub location: String,
    pub timestamp: String,
    pub version: String,
    #[serde(default)]
    pub dependencies: Vec<ArtifactDependency>,
    #[serde(default, rename = "dependencyDetectorEngine")]
    pub dependency_detector_engine: String,
    #[serde(default, rename = "dependencyDetectorSpec")]
    pub dependency_detector_spec: JsonValue,
}

impl Artifact {
    pub fn group_key(&self) -> (String, String) {
        (self.artifact_type.clone(), self.name.clone())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TestEnvironmentStatus {
    Created,
    Running,
    Passed,
    Failed,
    PartiallyDeleted,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct TestEnvironment {
    pub id: String,
    pub name: String,
    pub status: TestEnvironmentStatus,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "tmpDir")]
    pub tmp_dir: String,
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    #[serde(default, rename = "managedResources")]
    pub managed_resources: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl TestEnvironment {
    pub fn new(id: String, stage: impl Into<String>, tmp_dir: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: stage.into(),
            status: TestEnvironmentStatus::Created,
            created_at: now,
            updated_at: now,
            tmp_dir,
            files: BTreeMap::new(),
            managed_resources: Vec::new(),
            metadata: BTreeMap::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TestReportStatus {
    Passed,
    Failed,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct TestStats {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub passed: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub skipped: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct Coverage {
    #[serde(default)]
    pub percentage: f64,
    #[serde(default, rename = "filePath")]
    pub file_path: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct TestReport {
    pub id: String,
    pub stage: String,
    pub status: TestReportStatus,
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    pub duration: f64,
    #[serde(rename = "testStats", default)]
    pub test_stats: TestStats,
    #[serde(default)]
    pub coverage: Coverage,
    #[serde(default, rename = "artifactFiles")]
    pub artifact_files: Vec<String>,
    #[serde(default, rename = "outputPath")]
    pub output_path: Option<String>,
    #[serde(default, rename = "errorMessage")]
    pub error_message: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// The Artifact Store's on-disk document.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct StoreDocument {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(rename = "lastUpdated")]
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default, rename = "testEnvironments")]
    pub test_environments: BTreeMap<String, TestEnvironment>,
    #[serde(default, rename = "testReports")]
    pub test_reports: BTreeMap<String, TestReport>,
}

fn default_version() -> String {
    STORE_SCHEMA_VERSION.to_string()
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            version: default_version(),
            last_updated: Utc::now(),
            artifacts: Vec::new(),
            test_environments: BTreeMap::new(),
            test_reports: BTreeMap::new(),
        }
    }
}

impl StoreDocument {
    /// Validates every `ArtifactDependency` decodes to a well-formed tagged variant and that
    /// `version` is a schema tag this build understands.
    pub fn validate(&self) -> Result<()> {
        if self.version != STORE_SCHEMA_VERSION {
            return Err(ForgeError::Store(format!(
                "unsupported store schema version `{}` (expected `{STORE_SCHEMA_VERSION}`)",
                self.version
            )));
        }
        Ok(())
    }
}

/// A persisted `(addr,id) → port` allocation entry.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct PortAllocation {
    pub address: String,
    pub identifier: String,
    pub port: u16,
    #[serde(rename = "allocatedAt")]
    pub allocated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct PortAllocatorDocument {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub allocations: BTreeMap<String, PortAllocation>,
}

impl Default for PortAllocatorDocument {
    fn default() -> Self {
        Self {
            version: default_version(),
            allocations: BTreeMap::new(),
        }
    }
}

pub fn allocation_key(addr: &str, identifier: &str) -> String {
    format!("{addr}/{identifier}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_dependency_round_trips() {
        let dep = ArtifactDependency::File {
            file_path: "/src/main.go".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
        };
        let json = serde_json::to_string(&dep).unwrap();
        assert!(json.contains("\"type\":\"file\""));
        let back: ArtifactDependency = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dep);
    }

    #[test]
    fn external_package_dependency_round_trips() {
        let dep = ArtifactDependency::ExternalPackage {
            external_package: "golang.org/x/mod@v0.14.0".into(),
        };
        let json = serde_json::to_string(&dep).unwrap();
        let back: ArtifactDependency = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dep);
    }

    #[test]
    fn store_document_rejects_unknown_schema_version() {
        let mut doc = StoreDocument::default();
        doc.version = "2.0".into();
        assert!(doc.validate().is_err());
    }

    #[test]
    fn allocation_key_joins_addr_and_id() {
        assert_eq!(allocation_key("127.0.0.1", "api"), "127.0.0.1/api");
    }
}
