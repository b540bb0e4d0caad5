//! Forge runtime library: the Artifact Store, Engine Transport, Dependency Gate, and
//! the Build/Testenv/Test Orchestrators. `forge-cli` and `forge-mcp` are thin
//! front-ends over this crate; neither owns any orchestration logic of its own.

pub mod config_validate;
pub mod dependency_gate;
pub mod docs;
pub mod engine;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod port_allocator;
pub mod spec;
pub mod store;
pub mod template;
pub mod validation;

pub use error::{ForgeError, Result};
pub use model::{
    Artifact, ArtifactDependency, PortAllocation, StoreDocument, TestEnvironment,
    TestEnvironmentStatus, TestReport, TestReportStatus,
};
pub use spec::{BuildSpec, EngineConfig, ProjectSpec, TestSpec};

/// The Forge release tag substituted into resolved `go://name@<forgeVersion>` engine
/// commands. Pinned to the crate version so `go run` resolves the module
/// version matching this build.
pub const FORGE_VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));
