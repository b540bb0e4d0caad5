//! Persisted, file-locked `(addr,id) → port` allocator.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::net::{IpAddr, TcpListener};
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use regex::Regex;
use std::sync::OnceLock;

use crate::error::{ForgeError, Result};
use crate::model::{allocation_key, PortAllocatorDocument, PortAllocation};

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"))
}

/// An open allocator session. Holds an exclusive lock on the persisted document for
/// the lifetime of `(Open, ..., Close)`. Methods called before `Open` (i.e. on a value
/// that was never constructed via `open`) cannot exist in this API by construction;
/// `Close` is idempotent and safe to call more than once.
pub struct PortAllocator {
    path: PathBuf,
    lock_file: Option<File>,
    document: PortAllocatorDocument,
    dirty: bool,
}

impl PortAllocator {
    /// Opens (creating if absent) the allocator document at `path`, acquiring an
    /// exclusive lock that is held until `close`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let lock_path = lock_path_for(&path);
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        lock_file
            .lock_exclusive()
            .map_err(|e| ForgeError::PortAllocator(format!("failed to lock {}: {e}", lock_path.display())))?;

        let document = match fs::read_to_string(&path) {
            Ok(raw) => serde_yaml::from_str(&raw)
                .map_err(|e| ForgeError::PortAllocator(format!("invalid allocator document: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PortAllocatorDocument::default(),
            Err(e) => return Err(ForgeError::Io(e)),
        };

        Ok(Self {
            path,
            lock_file: Some(lock_file),
            document,
            dirty: false,
        })
    }

    fn require_open(&self) -> Result<()> {
        if self.lock_file.is_none() {
            return Err(ForgeError::PortAllocator("allocator is not open".into()));
        }
        Ok(())
    }

    /// Allocates (or returns the existing) port for `(addr, id)`, probing the stale
    /// entry by re-binding it before trusting it.
    pub fn allocate(&mut self, addr: &str, id: &str) -> Result<u16> {
        self.require_open()?;
        validate_addr_and_id(addr, id)?;

        let key = allocation_key(addr, id);
        if let Some(existing) = self.document.allocations.get(&key) {
            if probe_bind(addr, existing.port).is_err() {
                self.document.allocations.remove(&key);
                self.dirty = true;
            } else {
                return Ok(existing.port);
            }
        }

        let port = bind_ephemeral(addr)?;
        self.record(key, addr, id, port);
        Ok(port)
    }

    /// Allocates within `[min, max]`, scanning from a deterministic identifier-derived
    /// offset and skipping already-allocated ports.
    pub fn allocate_in_range(&mut self, addr: &str, id: &str, min: u16, max: u16) -> Result<u16> {
        self.require_open()?;
        validate_addr_and_id(addr, id)?;
        if min == 0 || max == 0 || min > max {
            return Err(ForgeError::PortAllocator(format!(
                "invalid port range [{min},{max}]"
            )));
        }

        let key = allocation_key(addr, id);
        if let Some(existing) = self.document.allocations.get(&key) {
            if existing.port < min || existing.port > max {
                self.document.allocations.remove(&key);
                self.dirty = true;
            } else if probe_bind(addr, existing.port).is_err() {
                self.document.allocations.remove(&key);
                self.dirty = true;
            } else {
                return Ok(existing.port);
            }
        }

        let range_size = (max - min) as u32 + 1;
        let offset = deterministic_offset(id, range_size);

        for step in 0..range_size {
            let candidate = min as u32 + (offset + step) % range_size;
            let candidate = candidate as u16;
            if self
                .document
                .allocations
                .values()
                .any(|a| a.port == candidate && a.address == addr)
            {
                continue;
            }
            if probe_bind(addr, candidate).is_ok() {
                self.record(key, addr, id, candidate);
                return Ok(candidate);
            }
        }

        Err(ForgeError::PortAllocator(format!(
            "no free port available in [{min},{max}] for {addr}/{id}"
        )))
    }

    /// Explicitly frees a previously-allocated port.
    pub fn release(&mut self, addr: &str, id: &str) -> Result<()> {
        self.require_open()?;
        let key = allocation_key(addr, id);
        if self.document.allocations.remove(&key).is_some() {
            self.dirty = true;
        }
        Ok(())
    }

    fn record(&mut self, key: String, addr: &str, id: &str, port: u16) {
        self.document.allocations.insert(
            key,
            PortAllocation {
                address: addr.to_string(),
                identifier: id.to_string(),
                port,
                allocated_at: Utc::now(),
            },
        );
        self.dirty = true;
    }

    /// Writes the document if dirty and releases the lock. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        let Some(lock_file) = self.lock_file.take() else {
            return Ok(());
        };

        if self.dirty {
            let serialized = serde_yaml::to_string(&self.document)?;
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)?;
            file.write_all(serialized.as_bytes())?;
            self.dirty = false;
        }

        let _ = FileExt::unlock(&lock_file);
        Ok(())
    }
}

impl Drop for PortAllocator {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut os_string = path.as_os_str().to_owned();
    os_string.push(".lock");
    PathBuf::from(os_string)
}

fn validate_addr_and_id(addr: &str, id: &str) -> Result<()> {
    addr.parse::<IpAddr>()
        .map_err(|_| ForgeError::PortAllocator(format!("address `{addr}` does not parse as an IP")))?;
    if !identifier_regex().is_match(id) {
        return Err(ForgeError::PortAllocator(format!(
            "identifier `{id}` must match ^[A-Za-z0-9_-]+$"
        )));
    }
    Ok(())
}

fn probe_bind(addr: &str, port: u16) -> std::io::Result<()> {
    TcpListener::bind((addr, port)).map(|_| ())
}

fn bind_ephemeral(addr: &str) -> Result<u16> {
    let listener = TcpListener::bind((addr, 0))
        .map_err(|e| ForgeError::PortAllocator(format!("failed to bind ephemeral port on {addr}: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| ForgeError::PortAllocator(format!("failed to read bound port: {e}")))?
        .port();
    drop(listener);
    Ok(port)
}

/// `x ← x*31 + b (mod rangeSize)`, folded over the identifier's bytes.
fn deterministic_offset(id: &str, range_size: u32) -> u32 {
    let mut x: u32 = 0;
    for b in id.bytes() {
        x = (x.wrapping_mul(31).wrapping_add(b as u32)) % range_size;
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_is_idempotent_within_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ports.yaml");
        let mut allocator = PortAllocator::open(&path).unwrap();
        let p1 = allocator.allocate("127.0.0.1", "api").unwrap();
        let p2 = allocator.allocate("127.0.0.1", "api").unwrap();
        assert_eq!(p1, p2);
    }

    #[test]
    fn allocate_is_idempotent_across_close_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ports.yaml");

        let mut allocator = PortAllocator::open(&path).unwrap();
        let p1 = allocator.allocate("127.0.0.1", "api").unwrap();
        allocator.close().unwrap();

        let mut reopened = PortAllocator::open(&path).unwrap();
        let p2 = reopened.allocate("127.0.0.1", "api").unwrap();
        assert_eq!(p1, p2);
    }

    #[test]
    fn rejects_invalid_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ports.yaml");
        let mut allocator = PortAllocator::open(&path).unwrap();
        assert!(allocator.allocate("127.0.0.1", "bad id!").is_err());
    }

    #[test]
    fn rejects_invalid_address() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ports.yaml");
        let mut allocator = PortAllocator::open(&path).unwrap();
        assert!(allocator.allocate("not-an-ip", "api").is_err());
    }

    #[test]
    fn allocate_in_range_stays_within_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ports.yaml");
        let mut allocator = PortAllocator::open(&path).unwrap();
        let port = allocator.allocate_in_range("127.0.0.1", "svc", 40000, 40100).unwrap();
        assert!((40000..=40100).contains(&port));
    }

    #[test]
    fn allocate_in_range_rejects_inverted_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ports.yaml");
        let mut allocator = PortAllocator::open(&path).unwrap();
        assert!(allocator.allocate_in_range("127.0.0.1", "svc", 100, 50).is_err());
    }

    #[test]
    fn release_then_allocate_returns_a_fresh_port() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ports.yaml");
        let mut allocator = PortAllocator::open(&path).unwrap();
        allocator.allocate("127.0.0.1", "api").unwrap();
        allocator.release("127.0.0.1", "api").unwrap();
        assert!(!allocator.document.allocations.contains_key("127.0.0.1/api"));
    }

    #[test]
    fn deterministic_offset_is_stable() {
        assert_eq!(deterministic_offset("svc", 100), deterministic_offset("svc", 100));
    }
}
