//! The Artifact Store: an on-disk document with advisory-locked atomic merge-write
//! semantics.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;

use crate::error::{ForgeError, Result};
use crate::model::{Artifact, StoreDocument, TestEnvironment, TestReport};

/// Default number of most-recent artifacts kept per `(type,name)` group.
pub const DEFAULT_KEEP_PER_GROUP: usize = 3;

/// Holds an exclusive advisory lock on `<path>.lock` for the duration of a single
/// read-merge-write cycle. Dropping releases it.
struct StoreLock {
    _file: File,
}

impl StoreLock {
    fn acquire(store_path: &Path) -> Result<Self> {
        if let Some(parent) = store_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let lock_path = lock_path_for(store_path);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        file.lock_exclusive()
            .map_err(|e| ForgeError::Store(format!("failed to lock {}: {e}", lock_path.display())))?;
        Ok(Self { _file: file })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self._file);
    }
}

fn lock_path_for(store_path: &Path) -> PathBuf {
    let mut os_string = store_path.as_os_str().to_owned();
    os_string.push(".lock");
    PathBuf::from(os_string)
}

/// Reads the store document from `path`. Missing files are `NotFound`; malformed
/// documents are `Invalid` (both surfaced as `ForgeError` variants.1).
pub fn read_store(path: impl AsRef<Path>) -> Result<StoreDocument> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ForgeError::NotFound(format!("artifact store not found at {}", path.display()))
        } else {
            ForgeError::Io(e)
        }
    })?;
    let doc: StoreDocument = serde_yaml::from_str(&raw)
        .map_err(|e| ForgeError::Store(format!("invalid store document {}: {e}", path.display())))?;
    doc.validate()?;
    Ok(doc)
}

/// Like `read_store`, but a missing file yields an empty default document instead of
/// an error.
pub fn read_or_create_store(path: impl AsRef<Path>) -> Result<StoreDocument> {
    match read_store(path) {
        Ok(doc) => Ok(doc),
        Err(ForgeError::NotFound(_)) => Ok(StoreDocument::default()),
        Err(other) => Err(other),
    }
}

fn write_document_locked(path: &Path, doc: &StoreDocument) -> Result<()> {
    let serialized = serde_yaml::to_string(doc)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(serialized.as_bytes())?;
    }
    #[cfg(not(unix))]
    {
        fs::write(path, serialized.as_bytes())?;
    }

    Ok(())
}

/// Writes `incoming` to `path` under the full merge-write protocol described in: /// preserve on-disk `testEnvironments`/`testReports` entries absent from `incoming`,
/// incoming wins on collision, `artifacts` is never merged (the caller owns the full
/// list), then prune and persist atomically under an exclusive lock.
pub fn write_store(path: impl AsRef<Path>, incoming: StoreDocument) -> Result<StoreDocument> {
    let path = path.as_ref();
    let lock = StoreLock::acquire(path)?;

    let on_disk = read_or_create_store(path)?;
    let mut merged = incoming;
    merge_maps_preserving_disk_only(&mut merged.test_environments, on_disk.test_environments);
    merge_maps_preserving_disk_only(&mut merged.test_reports, on_disk.test_reports);
    merged.last_updated = Utc::now();

    prune_build_artifacts(&mut merged, DEFAULT_KEEP_PER_GROUP);

    write_document_locked(path, &merged)?;
    drop(lock);
    Ok(merged)
}

fn merge_maps_preserving_disk_only<V>(incoming: &mut BTreeMap<String, V>, on_disk: BTreeMap<String, V>) {
    for (key, value) in on_disk {
        incoming.entry(key).or_insert(value);
    }
}

/// Groups artifacts by `(type,name)`, sorts each group by RFC3339 timestamp descending
/// (parse failures sort last), and keeps only the first `keep` entries per group.
pub fn prune_build_artifacts(store: &mut StoreDocument, keep: usize) {
    let mut groups: BTreeMap<(String, String), Vec<Artifact>> = BTreeMap::new();
    for artifact in store.artifacts.drain(..) {
        groups.entry(artifact.group_key()).or_default().push(artifact);
    }

    let mut kept = Vec::new();
    for (_, mut group) in groups {
        group.sort_by(|a, b| {
            let a_ts = chrono::DateTime::parse_from_rfc3339(&a.timestamp);
            let b_ts = chrono::DateTime::parse_from_rfc3339(&b.timestamp);
            match (a_ts, b_ts) {
                (Ok(a), Ok(b)) => b.cmp(&a),
                (Ok(_), Err(_)) => std::cmp::Ordering::Less,
                (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
                (Err(_), Err(_)) => std::cmp::Ordering::Equal,
            }
        });
        group.truncate(keep);
        kept.extend(group);
    }
    store.artifacts = kept;
}

/// `AddOrUpdateArtifact`: replaces the existing entry keyed on `(name,type,version)` or
/// appends a new one.
pub fn add_or_update_artifact(store: &mut StoreDocument, artifact: Artifact) {
    if let Some(existing) = store.artifacts.iter_mut().find(|a| {
        a.name == artifact.name && a.artifact_type == artifact.artifact_type && a.version == artifact.version
    }) {
        *existing = artifact;
    } else {
        store.artifacts.push(artifact);
    }
}

pub fn add_or_update_test_environment(store: &mut StoreDocument, env: TestEnvironment) {
    store.test_environments.insert(env.id.clone(), env);
}

pub fn add_or_update_test_report(store: &mut StoreDocument, report: TestReport) {
    store.test_reports.insert(report.id.clone(), report);
}

/// Deletes a test environment under the store lock, re-reading and re-pruning first.
/// Callers must have already deleted `managedResources` on disk.
pub fn atomic_delete_test_environment(path: impl AsRef<Path>, id: &str) -> Result<()> {
    let path = path.as_ref();
    let lock = StoreLock::acquire(path)?;
    let mut doc = read_or_create_store(path)?;
    if doc.test_environments.remove(id).is_none() {
        drop(lock);
        return Err(ForgeError::NotFound(format!("test environment {id} not found")));
    }
    doc.last_updated = Utc::now();
    prune_build_artifacts(&mut doc, DEFAULT_KEEP_PER_GROUP);
    write_document_locked(path, &doc)?;
    drop(lock);
    Ok(())
}

pub fn atomic_delete_test_report(path: impl AsRef<Path>, id: &str) -> Result<()> {
    let path = path.as_ref();
    let lock = StoreLock::acquire(path)?;
    let mut doc = read_or_create_store(path)?;
    if doc.test_reports.remove(id).is_none() {
        drop(lock);
        return Err(ForgeError::NotFound(format!("test report {id} not found")));
    }
    doc.last_updated = Utc::now();
    prune_build_artifacts(&mut doc, DEFAULT_KEEP_PER_GROUP);
    write_document_locked(path, &doc)?;
    drop(lock);
    Ok(())
}

pub fn get_latest_artifact<'a>(store: &'a StoreDocument, name: &str) -> Option<&'a Artifact> {
    store
        .artifacts
        .iter()
        .filter(|a| a.name == name)
        .max_by(|a, b| {
            let a_ts = chrono::DateTime::parse_from_rfc3339(&a.timestamp);
            let b_ts = chrono::DateTime::parse_from_rfc3339(&b.timestamp);
            match (a_ts, b_ts) {
                (Ok(a), Ok(b)) => a.cmp(&b),
                (Ok(_), Err(_)) => std::cmp::Ordering::Greater,
                (Err(_), Ok(_)) => std::cmp::Ordering::Less,
                (Err(_), Err(_)) => std::cmp::Ordering::Equal,
            }
        })
}

pub fn get_artifact_by_name_and_version<'a>(
    store: &'a StoreDocument,
    name: &str,
    version: &str,
) -> Option<&'a Artifact> {
    store
        .artifacts
        .iter()
        .find(|a| a.name == name && a.version == version)
}

pub fn get_artifacts_by_type<'a>(store: &'a StoreDocument, artifact_type: &str) -> Vec<&'a Artifact> {
    store
        .artifacts
        .iter()
        .filter(|a| a.artifact_type == artifact_type)
        .collect()
}

pub fn get_test_environment<'a>(store: &'a StoreDocument, id: &str) -> Option<&'a TestEnvironment> {
    store.test_environments.get(id)
}

pub fn list_test_environments<'a>(store: &'a StoreDocument, stage: Option<&str>) -> Vec<&'a TestEnvironment> {
    store
        .test_environments
        .values()
        .filter(|e| stage.map(|s| e.name == s).unwrap_or(true))
        .collect()
}

pub fn get_test_report<'a>(store: &'a StoreDocument, id: &str) -> Option<&'a TestReport> {
    store.test_reports.get(id)
}

pub fn list_test_reports<'a>(store: &'a StoreDocument, stage: Option<&str>) -> Vec<&'a TestReport> {
    store
        .test_reports
        .values()
        .filter(|r| stage.map(|s| r.stage == s).unwrap_or(true))
        .collect()
}
