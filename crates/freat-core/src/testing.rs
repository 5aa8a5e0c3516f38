//! In-memory instrumentation backend for tests.
//!
//! `MockProcess` holds a set of byte regions behind locks so a test can
//! mutate target memory between scans, the way a live process would. The
//! handles returned by [`MockProcess::open`] share the region storage, and
//! attach/detach bookkeeping is observable through
//! [`MockProcess::attach_count`].

use crate::backend::{Instrumentation, ProcessHandle};
use freat_common::{Error, MemoryMap, MemoryRegion, ProcessEntry, Protection, Result};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

struct MockRegion {
    base: usize,
    size: usize,
    data: RwLock<Vec<u8>>,
    readable: bool,
    protection: Protection,
    path: Option<String>,
}

impl MockRegion {
    fn describe(&self) -> MemoryRegion {
        MemoryRegion {
            base: self.base,
            size: self.size,
            protection: self.protection,
            path: self.path.clone(),
        }
    }
}

/// A fake target process with mutable memory
pub struct MockProcess {
    pid: u32,
    name: String,
    regions: Vec<Arc<MockRegion>>,
    attached: Arc<AtomicUsize>,
}

impl MockProcess {
    pub fn new(pid: u32, name: &str) -> Self {
        Self {
            pid,
            name: name.to_string(),
            regions: Vec::new(),
            attached: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Add a readable, writable anonymous region with the given contents
    pub fn with_region(mut self, base: usize, data: Vec<u8>) -> Self {
        let size = data.len();
        self.regions.push(Arc::new(MockRegion {
            base,
            size,
            data: RwLock::new(data),
            readable: true,
            protection: Protection::new(true, true, false),
            path: None,
        }));
        self
    }

    /// Add a writable region whose reads always fail, simulating memory
    /// that disappears between enumeration and access
    pub fn with_unreadable_region(mut self, base: usize, size: usize) -> Self {
        self.regions.push(Arc::new(MockRegion {
            base,
            size,
            data: RwLock::new(vec![0; size]),
            readable: false,
            protection: Protection::new(true, true, false),
            path: None,
        }));
        self
    }

    /// Add an executable file-backed mapping, visible to `memory_maps`
    /// but not scanned
    pub fn with_module(mut self, base: usize, size: usize, path: &str) -> Self {
        self.regions.push(Arc::new(MockRegion {
            base,
            size,
            data: RwLock::new(vec![0; size]),
            readable: true,
            protection: Protection::new(true, false, true),
            path: Some(path.to_string()),
        }));
        self
    }

    /// Overwrite target memory directly, bypassing any handle
    pub fn poke(&self, address: usize, bytes: &[u8]) {
        for region in &self.regions {
            if address >= region.base && address + bytes.len() <= region.base + region.size {
                let offset = address - region.base;
                region.data.write()[offset..offset + bytes.len()].copy_from_slice(bytes);
                return;
            }
        }
        panic!("poke outside any mock region: 0x{address:x}");
    }

    /// Read target memory directly, bypassing any handle
    pub fn peek(&self, address: usize, len: usize) -> Vec<u8> {
        for region in &self.regions {
            if address >= region.base && address + len <= region.base + region.size {
                let offset = address - region.base;
                return region.data.read()[offset..offset + len].to_vec();
            }
        }
        panic!("peek outside any mock region: 0x{address:x}");
    }

    /// Number of handles currently open on this process
    pub fn attach_count(&self) -> usize {
        self.attached.load(Ordering::SeqCst)
    }

    /// Open a handle the way `Instrumentation::attach` would
    pub fn open(&self) -> Box<dyn ProcessHandle> {
        self.attached.fetch_add(1, Ordering::SeqCst);
        Box::new(MockHandle {
            pid: self.pid,
            regions: self.regions.clone(),
            attached: self.attached.clone(),
            detached: AtomicBool::new(false),
        })
    }
}

struct MockHandle {
    pid: u32,
    regions: Vec<Arc<MockRegion>>,
    attached: Arc<AtomicUsize>,
    detached: AtomicBool,
}

impl MockHandle {
    fn region_containing(&self, address: usize) -> Option<&Arc<MockRegion>> {
        self.regions
            .iter()
            .find(|r| address >= r.base && address < r.base + r.size)
    }
}

impl ProcessHandle for MockHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn regions(&self) -> Result<Vec<MemoryRegion>> {
        Ok(self
            .regions
            .iter()
            .filter(|r| r.protection.write)
            .map(|r| r.describe())
            .collect())
    }

    fn memory_maps(&self) -> Result<Vec<MemoryMap>> {
        Ok(self
            .regions
            .iter()
            .filter_map(|r| MemoryMap::from_region(&r.describe()))
            .collect())
    }

    fn read(&self, address: usize, len: usize) -> Result<Vec<u8>> {
        let region = self
            .region_containing(address)
            .ok_or_else(|| Error::backend(format!("unmapped address 0x{address:x}")))?;
        if !region.readable {
            return Err(Error::backend(format!("read failed at 0x{address:x}")));
        }
        let offset = address - region.base;
        let available = region.size - offset;
        let take = len.min(available);
        Ok(region.data.read()[offset..offset + take].to_vec())
    }

    fn write(&self, address: usize, bytes: &[u8]) -> Result<()> {
        let region = self
            .region_containing(address)
            .ok_or_else(|| Error::backend(format!("unmapped address 0x{address:x}")))?;
        let offset = address - region.base;
        if offset + bytes.len() > region.size {
            return Err(Error::backend(format!(
                "write of {} bytes at 0x{address:x} crosses region end",
                bytes.len()
            )));
        }
        region.data.write()[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn detach(&self) -> Result<()> {
        if !self.detached.swap(true, Ordering::SeqCst) {
            self.attached.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// An `Instrumentation` over a fixed set of mock processes
pub struct MockBackend {
    processes: Vec<Arc<MockProcess>>,
}

impl MockBackend {
    pub fn new(processes: Vec<Arc<MockProcess>>) -> Self {
        Self { processes }
    }

    pub fn single(process: MockProcess) -> (Self, Arc<MockProcess>) {
        let process = Arc::new(process);
        (Self::new(vec![process.clone()]), process)
    }
}

impl Instrumentation for MockBackend {
    fn processes(&self) -> Result<Vec<ProcessEntry>> {
        Ok(self
            .processes
            .iter()
            .map(|p| ProcessEntry {
                pid: p.pid,
                name: p.name.clone(),
            })
            .collect())
    }

    fn attach(&self, pid: u32) -> Result<Box<dyn ProcessHandle>> {
        self.processes
            .iter()
            .find(|p| p.pid == pid)
            .map(|p| p.open())
            .ok_or_else(|| Error::ProcessNotFound(pid.to_string()))
    }
}
