//! Freat Procfs Backend
//!
//! Linux instrumentation through `/proc`: process enumeration from the
//! `/proc/<pid>` directories, region enumeration from `/proc/<pid>/maps`
//! and memory access through positioned reads and writes on
//! `/proc/<pid>/mem`. Positioned I/O keeps the handle free of interior
//! seek state, so one handle can serve scans and direct reads concurrently.

mod maps;

use freat_common::{Error, MemoryMap, MemoryRegion, ProcessEntry, Result};
use freat_core::{Instrumentation, ProcessHandle};
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use tracing::{debug, info, warn};

pub struct ProcfsBackend;

impl ProcfsBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ProcfsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Instrumentation for ProcfsBackend {
    fn processes(&self) -> Result<Vec<ProcessEntry>> {
        let dir = fs::read_dir("/proc")
            .map_err(|e| Error::backend(format!("reading /proc: {e}")))?;

        let mut entries = Vec::new();
        for entry in dir.flatten() {
            let name = entry.file_name();
            let Some(pid) = name.to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            // The process may exit between the directory walk and this read
            let Ok(comm) = fs::read_to_string(format!("/proc/{pid}/comm")) else {
                continue;
            };
            entries.push(ProcessEntry {
                pid,
                name: comm.trim_end().to_string(),
            });
        }
        entries.sort_by_key(|p| p.pid);
        Ok(entries)
    }

    fn attach(&self, pid: u32) -> Result<Box<dyn ProcessHandle>> {
        if !Path::new(&format!("/proc/{pid}")).exists() {
            return Err(Error::ProcessNotFound(pid.to_string()));
        }

        let mem_path = format!("/proc/{pid}/mem");
        let (mem, writable) = match OpenOptions::new().read(true).write(true).open(&mem_path) {
            Ok(file) => (file, true),
            Err(open_err) => {
                warn!(
                    target: "freat_procfs",
                    pid = pid,
                    error = %open_err,
                    "Read-write open failed, falling back to read-only"
                );
                let file = OpenOptions::new()
                    .read(true)
                    .open(&mem_path)
                    .map_err(|e| Error::backend(format!("opening {mem_path}: {e}")))?;
                (file, false)
            }
        };

        info!(target: "freat_procfs", pid = pid, writable = writable, "Attached via procfs");
        Ok(Box::new(ProcfsHandle { pid, mem, writable }))
    }
}

struct ProcfsHandle {
    pid: u32,
    mem: File,
    writable: bool,
}

impl ProcfsHandle {
    fn read_maps(&self) -> Result<Vec<MemoryRegion>> {
        let path = format!("/proc/{}/maps", self.pid);
        let maps = fs::read_to_string(&path)
            .map_err(|e| Error::backend(format!("reading {path}: {e}")))?;
        Ok(maps.lines().filter_map(maps::parse_maps_line).collect())
    }
}

impl ProcessHandle for ProcfsHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn regions(&self) -> Result<Vec<MemoryRegion>> {
        let regions: Vec<MemoryRegion> = self
            .read_maps()?
            .into_iter()
            .filter(maps::is_scannable)
            .collect();
        debug!(
            target: "freat_procfs",
            pid = self.pid,
            regions = regions.len(),
            "Enumerated scannable regions"
        );
        Ok(regions)
    }

    fn memory_maps(&self) -> Result<Vec<MemoryMap>> {
        Ok(self
            .read_maps()?
            .into_iter()
            .filter(|r| {
                r.protection.execute
                    && r.path.as_deref().is_some_and(|p| p.starts_with('/'))
            })
            .filter_map(|r| MemoryMap::from_region(&r))
            .collect())
    }

    fn read(&self, address: usize, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let n = self
            .mem
            .read_at(&mut buf, address as u64)
            .map_err(|e| Error::backend(format!("reading {len} bytes at 0x{address:x}: {e}")))?;
        if n == 0 {
            return Err(Error::backend(format!("nothing mapped at 0x{address:x}")));
        }
        buf.truncate(n);
        Ok(buf)
    }

    fn write(&self, address: usize, data: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(Error::backend(format!(
                "process {} memory is open read-only",
                self.pid
            )));
        }
        self.mem
            .write_all_at(data, address as u64)
            .map_err(|e| {
                Error::backend(format!(
                    "writing {} bytes at 0x{address:x}: {e}",
                    data.len()
                ))
            })
    }

    // /proc/<pid>/mem holds no attach state; the fd closes on drop
    fn detach(&self) -> Result<()> {
        debug!(target: "freat_procfs", pid = self.pid, "Detached");
        Ok(())
    }
}
