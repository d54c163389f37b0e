//! Simulated VM backend
//!
//! Models one process address space in memory so benchmarks and tests can
//! run anywhere. The model follows the POSIX rules the benchmark relies on:
//! fixed mappings replace what was there, unmapping splits partially covered
//! mappings and ignores holes, protecting requires the whole range to be
//! mapped, and destroying an object leaves its mappings alive.

use std::collections::BTreeMap;

use log::trace;
use vmops_api::memory::{align_up, layout, page_size, MemoryRegion};
use vmops_api::sync::Mutex;
use vmops_api::{Error, MemoryObject, Permission, Result, Size, VirtAddr, VmBackend};

/// Lowest address handed out for mappings placed by the backend
pub const MMAP_BASE: usize = 0x1000_0000;

const ENOMEM: i32 = 12;
const ENOSPC: i32 = 28;
const EINVAL: i32 = 22;

/// Memory object of the simulated backend
#[derive(Debug)]
pub struct SimObject {
    id: u64,
    name: String,
    size: Size,
    huge: bool,
}

impl SimObject {
    fn page_size(&self) -> Size {
        if self.huge { page_size::MB2 } else { page_size::KB4 }
    }
}

impl MemoryObject for SimObject {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> Size {
        self.size
    }

    fn is_huge(&self) -> bool {
        self.huge
    }
}

/// One contiguous mapping in the simulated address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimMapping {
    /// Start address
    pub addr: VirtAddr,
    /// Length in bytes
    pub len: Size,
    /// Object the mapping was created from
    pub object: u64,
    /// Offset into the object
    pub offset: Size,
    /// Current permission
    pub permission: Permission,
    /// Backed by huge pages
    pub huge: bool,
}

impl SimMapping {
    fn end(&self) -> usize {
        self.addr.as_usize() + self.len
    }
}

/// Counters of the calls a backend has served
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Successful object creations
    pub creates: usize,
    /// Object destructions
    pub destroys: usize,
    /// Successful map and map-fixed calls
    pub maps: usize,
    /// Successful unmap calls
    pub unmaps: usize,
    /// Successful protect calls
    pub protects: usize,
}

impl SimStats {
    /// Objects created and not yet destroyed
    pub fn live_objects(&self) -> usize {
        self.creates - self.destroys
    }
}

#[derive(Debug, Default)]
struct SimState {
    mappings: BTreeMap<usize, SimMapping>,
    next_hint: usize,
    next_object: u64,
    create_calls: usize,
    map_calls: usize,
    unmap_calls: usize,
    stats: SimStats,
}

impl SimState {
    /// Next-fit search for a free, aligned range of `len` bytes
    fn find_free(&self, len: Size, align: Size) -> Option<usize> {
        let mut cand = align_up(self.next_hint.max(MMAP_BASE), align);
        let mut wrapped = false;
        loop {
            if let Some((_, prev)) = self.mappings.range(..cand).next_back() {
                if prev.end() > cand {
                    cand = align_up(prev.end(), align);
                    continue;
                }
            }
            let end = cand.checked_add(len)?;
            if end > layout::USER_ADDR_LIMIT {
                if wrapped {
                    return None;
                }
                wrapped = true;
                cand = align_up(MMAP_BASE, align);
                continue;
            }
            match self.mappings.range(cand..end).next() {
                Some((_, next)) => cand = align_up(next.end(), align),
                None => return Some(cand),
            }
        }
    }

    /// Splits the mapping containing `addr` so that a mapping starts at `addr`
    fn split_at(&mut self, addr: usize) {
        let Some((&start, &mapping)) = self.mappings.range(..addr).next_back() else {
            return;
        };
        if mapping.end() <= addr {
            return;
        }
        let head = addr - start;
        self.mappings.insert(start, SimMapping { len: head, ..mapping });
        self.mappings.insert(
            addr,
            SimMapping {
                addr: VirtAddr::new(addr),
                len: mapping.len - head,
                offset: mapping.offset + head,
                ..mapping
            },
        );
    }

    fn overlapping(&self, start: usize, end: usize) -> Vec<usize> {
        self.mappings
            .range(..end)
            .rev()
            .take_while(|(_, m)| m.end() > start)
            .map(|(&s, _)| s)
            .collect()
    }

    fn remove_range(&mut self, start: usize, end: usize) -> Result<()> {
        let keys = self.overlapping(start, end);
        let huge_misaligned = keys.iter().any(|k| self.mappings[k].huge)
            && (start % page_size::MB2 != 0 || end % page_size::MB2 != 0);
        if huge_misaligned {
            return Err(Error::InvalidArguments(format!(
                "range {:#x}..{:#x} splits a huge page mapping",
                start, end
            )));
        }
        self.split_at(start);
        self.split_at(end);
        for key in self.overlapping(start, end) {
            self.mappings.remove(&key);
        }
        Ok(())
    }

    fn is_covered(&self, start: usize, end: usize) -> bool {
        let mut cursor = start;
        let mut keys = self.overlapping(start, end);
        keys.reverse();
        for key in keys {
            let m = &self.mappings[&key];
            if m.addr.as_usize() > cursor {
                return false;
            }
            cursor = m.end();
        }
        cursor >= end
    }
}

/// In-process simulated VM backend
#[derive(Debug, Default)]
pub struct SimBackend {
    state: Mutex<SimState>,
    fail_create_on: Option<usize>,
    fail_map_after: Option<usize>,
    fail_unmap_on: Option<usize>,
}

impl SimBackend {
    /// Creates an empty address space
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `index`-th call to `create` (0-based) fail
    pub fn with_create_failure(mut self, index: usize) -> Self {
        self.fail_create_on = Some(index);
        self
    }

    /// Makes every map or map-fixed call after the first `n` fail
    pub fn with_map_failure_after(mut self, n: usize) -> Self {
        self.fail_map_after = Some(n);
        self
    }

    /// Makes the `index`-th call to `unmap` (0-based) fail and keep its range
    pub fn with_unmap_failure(mut self, index: usize) -> Self {
        self.fail_unmap_on = Some(index);
        self
    }

    /// Snapshot of the call counters
    pub fn stats(&self) -> SimStats {
        self.state.lock().stats
    }

    /// Number of live mappings
    pub fn mapping_count(&self) -> usize {
        self.state.lock().mappings.len()
    }

    /// Total number of mapped bytes
    pub fn mapped_bytes(&self) -> Size {
        self.state.lock().mappings.values().map(|m| m.len).sum()
    }

    /// Live mappings overlapping `region`, in address order
    pub fn mappings_in(&self, region: MemoryRegion) -> Vec<SimMapping> {
        let state = self.state.lock();
        let mut keys = state.overlapping(region.start, region.end);
        keys.reverse();
        keys.iter().map(|k| state.mappings[k]).collect()
    }

    fn check_map(&self, state: &mut SimState, object: &SimObject, offset: Size, len: Size) -> Result<()> {
        state.map_calls += 1;
        if let Some(limit) = self.fail_map_after {
            if state.map_calls > limit {
                return Err(Error::MapFailed { addr: 0, errno: ENOMEM });
            }
        }
        let page = object.page_size();
        let in_bounds = offset.checked_add(len).is_some_and(|end| end <= object.size);
        if len == 0 || !in_bounds || offset % page != 0 || len % page != 0 {
            return Err(Error::InvalidArguments(format!(
                "range {:#x}+{:#x} invalid for object '{}' of {:#x} bytes",
                offset, len, object.name, object.size
            )));
        }
        Ok(())
    }

    fn insert(state: &mut SimState, addr: usize, object: &SimObject, offset: Size, len: Size) {
        state.mappings.insert(
            addr,
            SimMapping {
                addr: VirtAddr::new(addr),
                len,
                object: object.id,
                offset,
                permission: Permission::RW,
                huge: object.huge,
            },
        );
        state.stats.maps += 1;
    }
}

fn check_user_range(addr: VirtAddr, len: Size) -> Result<usize> {
    let end = addr.as_usize().checked_add(len);
    match end {
        Some(end) if len > 0 && addr.is_aligned(page_size::KB4) && end <= layout::USER_ADDR_LIMIT => Ok(end),
        _ => Err(Error::InvalidArguments(format!("invalid range {}+{:#x}", addr, len))),
    }
}

impl VmBackend for SimBackend {
    type Object = SimObject;

    fn create(&self, name: &str, size: Size, huge: bool) -> Result<SimObject> {
        let mut state = self.state.lock();
        let index = state.create_calls;
        state.create_calls += 1;
        if self.fail_create_on == Some(index) {
            return Err(Error::CreationFailed { name: name.to_string(), errno: ENOSPC });
        }
        let page = if huge { page_size::MB2 } else { page_size::KB4 };
        if size == 0 || size % page != 0 {
            return Err(Error::InvalidArguments(format!(
                "object size {:#x} is not a multiple of the page size {:#x}",
                size, page
            )));
        }
        let id = state.next_object;
        state.next_object += 1;
        state.stats.creates += 1;
        trace!("sim: created object {} '{}' size={:#x} huge={}", id, name, size, huge);
        Ok(SimObject { id, name: name.to_string(), size, huge })
    }

    fn destroy(&self, object: SimObject) -> Result<()> {
        self.state.lock().stats.destroys += 1;
        trace!("sim: destroyed object {} '{}'", object.id, object.name);
        Ok(())
    }

    fn map(&self, object: &SimObject, offset: Size, len: Size) -> Result<VirtAddr> {
        let mut state = self.state.lock();
        self.check_map(&mut state, object, offset, len)?;
        let addr = state.find_free(len, object.page_size()).ok_or(Error::OutOfMemory)?;
        Self::insert(&mut state, addr, object, offset, len);
        state.next_hint = addr + len;
        Ok(VirtAddr::new(addr))
    }

    fn map_fixed(&self, addr: VirtAddr, object: &SimObject, offset: Size, len: Size) -> Result<()> {
        let mut state = self.state.lock();
        self.check_map(&mut state, object, offset, len)?;
        let end = check_user_range(addr, len)?;
        if !addr.is_aligned(object.page_size()) {
            return Err(Error::MapFailed { addr: addr.as_usize(), errno: EINVAL });
        }
        state.remove_range(addr.as_usize(), end)?;
        Self::insert(&mut state, addr.as_usize(), object, offset, len);
        Ok(())
    }

    fn unmap(&self, addr: VirtAddr, len: Size) -> Result<()> {
        let end = check_user_range(addr, len)?;
        let mut state = self.state.lock();
        let index = state.unmap_calls;
        state.unmap_calls += 1;
        if self.fail_unmap_on == Some(index) {
            return Err(Error::UnmapFailed { addr: addr.as_usize(), errno: EINVAL });
        }
        state
            .remove_range(addr.as_usize(), end)
            .map_err(|_| Error::UnmapFailed { addr: addr.as_usize(), errno: EINVAL })?;
        state.stats.unmaps += 1;
        Ok(())
    }

    fn protect(&self, addr: VirtAddr, len: Size, permission: Permission) -> Result<()> {
        let end = check_user_range(addr, len)?;
        let start = addr.as_usize();
        let mut state = self.state.lock();
        if !state.is_covered(start, end) {
            return Err(Error::ProtectFailed { addr: start, errno: ENOMEM });
        }
        state.split_at(start);
        state.split_at(end);
        for key in state.overlapping(start, end) {
            if let Some(m) = state.mappings.get_mut(&key) {
                m.permission = permission;
            }
        }
        state.stats.protects += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: Size = page_size::KB4;

    #[test]
    fn test_map_picks_distinct_addresses() {
        let sim = SimBackend::new();
        let obj = sim.create("obj", 4 * PAGE, false).unwrap();
        let a = sim.map(&obj, 0, 4 * PAGE).unwrap();
        let b = sim.map(&obj, 0, 4 * PAGE).unwrap();
        assert!(!MemoryRegion::new(a, 4 * PAGE).overlaps(&MemoryRegion::new(b, 4 * PAGE)));
        assert_eq!(sim.mapping_count(), 2);
    }

    #[test]
    fn test_unmap_splits_mapping() {
        let sim = SimBackend::new();
        let obj = sim.create("obj", 4 * PAGE, false).unwrap();
        let a = sim.map(&obj, 0, 4 * PAGE).unwrap();
        sim.unmap(a + PAGE, PAGE).unwrap();
        let left = sim.mappings_in(MemoryRegion::new(a, 4 * PAGE));
        assert_eq!(left.len(), 2);
        assert_eq!(left[1].addr, a + 2 * PAGE);
        assert_eq!(left[1].offset, 2 * PAGE);
        assert_eq!(sim.mapped_bytes(), 3 * PAGE);
    }

    #[test]
    fn test_unmap_hole_succeeds() {
        let sim = SimBackend::new();
        sim.unmap(VirtAddr::new(MMAP_BASE), PAGE).unwrap();
        assert_eq!(sim.stats().unmaps, 1);
    }

    #[test]
    fn test_map_fixed_replaces() {
        let sim = SimBackend::new();
        let obj = sim.create("obj", 2 * PAGE, false).unwrap();
        let base = VirtAddr::new(layout::GB512);
        sim.map_fixed(base, &obj, 0, 2 * PAGE).unwrap();
        sim.map_fixed(base + PAGE, &obj, 0, PAGE).unwrap();
        let maps = sim.mappings_in(MemoryRegion::new(base, 2 * PAGE));
        assert_eq!(maps.len(), 2);
        assert_eq!(maps[1].offset, 0);
    }

    #[test]
    fn test_protect_requires_mapping() {
        let sim = SimBackend::new();
        let obj = sim.create("obj", 2 * PAGE, false).unwrap();
        let a = sim.map(&obj, 0, PAGE).unwrap();
        let err = sim.protect(a, 2 * PAGE, Permission::RO).unwrap_err();
        assert!(matches!(err, Error::ProtectFailed { errno: ENOMEM, .. }));
        sim.protect(a, PAGE, Permission::RO).unwrap();
        assert_eq!(sim.mappings_in(MemoryRegion::new(a, PAGE))[0].permission, Permission::RO);
    }

    #[test]
    fn test_huge_object_alignment() {
        let sim = SimBackend::new();
        assert!(sim.create("huge", PAGE, true).is_err());
        let obj = sim.create("huge", page_size::MB2, true).unwrap();
        let a = sim.map(&obj, 0, page_size::MB2).unwrap();
        assert!(a.is_aligned(page_size::MB2));
        assert!(sim.unmap(a, PAGE).is_err());
        sim.unmap(a, page_size::MB2).unwrap();
    }

    #[test]
    fn test_fault_injection() {
        let sim = SimBackend::new().with_create_failure(1).with_map_failure_after(1);
        let obj = sim.create("a", PAGE, false).unwrap();
        assert!(matches!(sim.create("b", PAGE, false), Err(Error::CreationFailed { .. })));
        sim.map(&obj, 0, PAGE).unwrap();
        assert!(matches!(sim.map(&obj, 0, PAGE), Err(Error::MapFailed { .. })));
        sim.destroy(obj).unwrap();
        assert_eq!(sim.stats().live_objects(), 0);
    }

    #[test]
    fn test_unmap_fault_keeps_mapping() {
        let sim = SimBackend::new().with_unmap_failure(0);
        let obj = sim.create("a", PAGE, false).unwrap();
        let a = sim.map(&obj, 0, PAGE).unwrap();
        assert!(matches!(sim.unmap(a, PAGE), Err(Error::UnmapFailed { .. })));
        assert_eq!(sim.mapping_count(), 1);
        sim.unmap(a, PAGE).unwrap();
        assert_eq!(sim.mapping_count(), 0);
    }
}
