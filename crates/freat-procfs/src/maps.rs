//! `/proc/<pid>/maps` parsing

use freat_common::{MemoryRegion, Protection};

/// Parse one maps line, e.g.
/// `55d0a1e37000-55d0a1e58000 rw-p 00000000 00:00 0 [heap]`.
/// Returns `None` for lines that do not parse.
pub(crate) fn parse_maps_line(line: &str) -> Option<MemoryRegion> {
    let mut fields = line.split_whitespace();
    let range = fields.next()?;
    let perms = fields.next()?;
    let _offset = fields.next()?;
    let _device = fields.next()?;
    let _inode = fields.next()?;
    let rest: Vec<&str> = fields.collect();
    let path = if rest.is_empty() {
        None
    } else {
        Some(rest.join(" "))
    };

    let (start, end) = range.split_once('-')?;
    let base = usize::from_str_radix(start, 16).ok()?;
    let end = usize::from_str_radix(end, 16).ok()?;
    if end <= base {
        return None;
    }

    Some(MemoryRegion {
        base,
        size: end - base,
        protection: Protection::from_perms(perms),
        path,
    })
}

/// Whether a region is worth sweeping during a scan. Device mappings and
/// the kernel-provided special ranges are excluded; heap, stack and
/// anonymous data are in.
pub(crate) fn is_scannable(region: &MemoryRegion) -> bool {
    if !region.protection.read || !region.protection.write {
        return false;
    }
    match region.path.as_deref() {
        Some(path) => !path.starts_with("/dev/") && path != "[vvar]" && path != "[vsyscall]",
        None => true,
    }
}
