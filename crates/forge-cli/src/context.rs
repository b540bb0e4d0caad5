use std::path::{Path, PathBuf};

use forge_core::ProjectSpec;

use crate::error::CliError;
use crate::util::Verbosity;

/// Bundles the loaded project spec with the paths every command needs.
pub struct CliSession {
    pub project: ProjectSpec,
    pub config_path: PathBuf,
    pub root_dir: PathBuf,
    pub store_path: PathBuf,
    pub forge_version: String,
    pub verbosity: Verbosity,
}

impl CliSession {
    pub fn bootstrap(
        config_path: PathBuf,
        project_override: Option<String>,
        verbosity: Verbosity,
    ) -> Result<Self, CliError> {
        let mut project = ProjectSpec::load(&config_path)?;
        if let Some(name) = project_override {
            project.name = name;
        }

        let root_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."));

        let store_path = resolve_relative(&root_dir, &project.artifact_store_path());

        Ok(Self {
            project,
            config_path,
            root_dir,
            store_path,
            forge_version: forge_core::FORGE_VERSION.to_string(),
            verbosity,
        })
    }
}

fn resolve_relative(root_dir: &Path, candidate: &Path) -> PathBuf {
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root_dir.join(candidate)
    }
}
