//! VM backend interface

use core::fmt::Debug;

use crate::error::Result;
use crate::memory::types::{Permission, Size, VirtAddr};

/// A named, sized, shareable backing store that regions are mapped from
pub trait MemoryObject: Send + Sync + Debug {
    /// Name the object was created with
    fn name(&self) -> &str;

    /// Size of the object in bytes
    fn size(&self) -> Size;

    /// Returns true if the object is backed by huge pages
    fn is_huge(&self) -> bool;
}

/// Virtual memory primitives a benchmark run drives
///
/// Implementations must be safe to call concurrently from every worker
/// thread; any locking the backend needs is its own business. Mappings are
/// always created read-write and shared, and take their page size from the
/// object they map.
pub trait VmBackend: Send + Sync {
    /// Handle type of the backing memory objects
    type Object: MemoryObject;

    /// Creates a memory object of `size` bytes
    fn create(&self, name: &str, size: Size, huge: bool) -> Result<Self::Object>;

    /// Destroys a memory object; existing mappings stay valid
    fn destroy(&self, object: Self::Object) -> Result<()>;

    /// Maps `len` bytes of `object` starting at `offset` at an address of the backend's choosing
    fn map(&self, object: &Self::Object, offset: Size, len: Size) -> Result<VirtAddr>;

    /// Maps `len` bytes of `object` starting at `offset` exactly at `addr`,
    /// replacing whatever was mapped there
    fn map_fixed(&self, addr: VirtAddr, object: &Self::Object, offset: Size, len: Size) -> Result<()>;

    /// Removes the mappings in `[addr, addr + len)`
    fn unmap(&self, addr: VirtAddr, len: Size) -> Result<()>;

    /// Changes the permission of `[addr, addr + len)`
    fn protect(&self, addr: VirtAddr, len: Size, permission: Permission) -> Result<()>;
}
