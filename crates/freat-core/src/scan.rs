//! Iterative value scanning
//!
//! A scan episode starts with a first scan that sweeps every scannable
//! region of the target for a value pattern, producing the candidate set.
//! Each next scan then re-reads only the current candidates and keeps the
//! ones matching the new value, so the set monotonically shrinks and the
//! cost of repeated scans is bounded by the candidate count rather than the
//! address space. Retrieval pages through the candidates in ascending
//! address order, re-reading live values.
//!
//! Narrowing is all-or-nothing: the surviving set is committed only after a
//! full pass, so an interrupted scan never leaves a half-narrowed episode.

use crate::backend::ProcessHandle;
use freat_common::{Error, MemoryRegion, Result, ScanHit, ScanResultsPage, ValueWidth};
use rayon::prelude::*;
use serde_json::json;
use std::time::Instant;
use tracing::{debug, info, trace};

/// Chunk size for region reads during a first scan
const MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// A scan target value as supplied on the wire
#[derive(Debug, Clone, PartialEq)]
pub enum ScanValue {
    Number(i64),
    Text(String),
}

/// What the episode is matching: fixed-width numerics or a literal byte
/// sequence. Fixed by the first scan; next scans inherit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EpisodeKind {
    Numeric { width: ValueWidth, signed: bool },
    Text,
}

/// One candidate address with its last-known bytes
#[derive(Debug, Clone)]
struct Candidate {
    address: usize,
    value: Vec<u8>,
}

/// The candidate set for one scan episode
pub struct ScanState {
    kind: EpisodeKind,
    candidates: Vec<Candidate>,
}

impl ScanState {
    /// First scan for a fixed-width numeric value.
    ///
    /// Sweeps all scannable regions byte-for-byte for the little-endian
    /// encoding of `value` and replaces any prior episode.
    pub fn first_numeric(
        handle: &dyn ProcessHandle,
        value: i64,
        width: ValueWidth,
        signed: bool,
    ) -> Result<Self> {
        let pattern = width.encode(value);
        let candidates = sweep(handle, &pattern)?;
        Ok(Self {
            kind: EpisodeKind::Numeric { width, signed },
            candidates,
        })
    }

    /// First scan for a literal byte sequence (string values).
    pub fn first_text(handle: &dyn ProcessHandle, needle: &str) -> Result<Self> {
        if needle.is_empty() {
            return Err(Error::InvalidField("value"));
        }
        let candidates = sweep(handle, needle.as_bytes())?;
        Ok(Self {
            kind: EpisodeKind::Text,
            candidates,
        })
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Narrow the candidate set against a new value.
    ///
    /// Re-reads every current candidate and keeps it only if it now equals
    /// the new value; addresses that became unreadable drop out. Candidates
    /// are only removed, never added, and the surviving set replaces the old
    /// one in a single commit at the end of the pass.
    pub fn narrow(&mut self, handle: &dyn ProcessHandle, value: &ScanValue) -> Result<usize> {
        let needle = self.needle_for(value)?;
        let start = Instant::now();
        let before = self.candidates.len();

        let mut kept = Vec::with_capacity(before);
        for candidate in &self.candidates {
            match handle.read(candidate.address, needle.len()) {
                Ok(current) if current == needle => kept.push(Candidate {
                    address: candidate.address,
                    value: current,
                }),
                Ok(_) => {}
                Err(e) => {
                    trace!(
                        target: "freat_core::scan",
                        address = format!("0x{:x}", candidate.address),
                        error = %e,
                        "Candidate no longer readable, dropping"
                    );
                }
            }
        }

        self.candidates = kept;
        info!(
            target: "freat_core::scan",
            before = before,
            after = self.candidates.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Next scan complete"
        );
        Ok(self.candidates.len())
    }

    /// One page of results, 1-based, in ascending address order.
    ///
    /// Values are re-read live; an address that became unreadable reports 0.
    /// The page number is clamped into range like the original tooling
    /// expects. Retrieval never mutates the candidate set.
    pub fn page(
        &self,
        handle: &dyn ProcessHandle,
        page: usize,
        page_size: usize,
    ) -> Result<ScanResultsPage> {
        if page_size == 0 {
            return Err(Error::InvalidField("page_size"));
        }

        let total = self.candidates.len();
        let total_pages = total.div_ceil(page_size);
        let page = page.clamp(1, total_pages.max(1));

        let start = (page - 1) * page_size;
        let end = (start + page_size).min(total);
        let slice = if start >= total {
            &[][..]
        } else {
            &self.candidates[start..end]
        };

        let results = slice
            .iter()
            .map(|candidate| ScanHit {
                address: format!("0x{:x}", candidate.address),
                value: self.read_display(handle, candidate),
            })
            .collect();

        Ok(ScanResultsPage {
            results,
            total,
            page,
            page_size,
            total_pages,
        })
    }

    /// Encode the narrowing value, checking it against the episode kind
    fn needle_for(&self, value: &ScanValue) -> Result<Vec<u8>> {
        match (self.kind, value) {
            (EpisodeKind::Numeric { width, .. }, ScanValue::Number(v)) => Ok(width.encode(*v)),
            (EpisodeKind::Text, ScanValue::Text(s)) if !s.is_empty() => {
                Ok(s.as_bytes().to_vec())
            }
            _ => Err(Error::InvalidField("value")),
        }
    }

    fn read_display(&self, handle: &dyn ProcessHandle, candidate: &Candidate) -> serde_json::Value {
        let len = match self.kind {
            EpisodeKind::Numeric { width, .. } => width.size(),
            EpisodeKind::Text => candidate.value.len(),
        };
        match handle.read(candidate.address, len) {
            Ok(bytes) if bytes.len() == len => match self.kind {
                EpisodeKind::Numeric { width, signed } => width.decode(&bytes, signed),
                EpisodeKind::Text => json!(String::from_utf8_lossy(&bytes).into_owned()),
            },
            _ => json!(0),
        }
    }
}

/// Sweep all scannable regions for a byte pattern, in parallel per region.
fn sweep(handle: &dyn ProcessHandle, pattern: &[u8]) -> Result<Vec<Candidate>> {
    let start = Instant::now();
    let regions = handle.regions()?;
    debug!(
        target: "freat_core::scan",
        regions = regions.len(),
        pattern_len = pattern.len(),
        "Starting first scan"
    );

    let mut candidates: Vec<Candidate> = regions
        .par_iter()
        .flat_map(|region| scan_region(handle, region, pattern, MAX_CHUNK_SIZE))
        .collect();
    candidates.sort_by_key(|c| c.address);

    info!(
        target: "freat_core::scan",
        matches = candidates.len(),
        regions = regions.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "First scan complete"
    );
    Ok(candidates)
}

/// Scan one region in chunks, overlapping by `pattern.len() - 1` bytes so a
/// match straddling a chunk boundary is not missed. Unreadable chunks are
/// skipped.
fn scan_region(
    handle: &dyn ProcessHandle,
    region: &MemoryRegion,
    pattern: &[u8],
    chunk_size: usize,
) -> Vec<Candidate> {
    let plen = pattern.len();
    let mut out = Vec::new();
    if plen == 0 || plen > region.size {
        return out;
    }

    let mut offset = 0usize;
    while offset < region.size {
        let want = (region.size - offset).min(chunk_size);
        let data = match handle.read(region.base + offset, want) {
            Ok(data) if data.len() >= plen => data,
            Ok(_) | Err(_) => {
                offset += want;
                continue;
            }
        };

        let mut i = 0;
        while i + plen <= data.len() {
            if data[i..i + plen] == *pattern {
                out.push(Candidate {
                    address: region.base + offset + i,
                    value: data[i..i + plen].to_vec(),
                });
            }
            i += 1;
        }

        // data.len() >= plen here, so this always makes progress
        offset += data.len() - (plen - 1).min(data.len() - 1);
    }
    out
}
