//! Memory types for the VMOPS benchmark

use core::fmt;
use core::ops::Add;

use static_assertions::const_assert;

/// Size type
pub type Size = usize;

/// Page size constants
pub mod page_size {
    use super::Size;
    /// 4KB base page size
    pub const KB4: Size = 4096;
    /// 2MB huge page size
    pub const MB2: Size = 2097152;
    /// 1GB huge page size
    pub const GB1: Size = 1073741824;
}

/// Address-space layout constants
pub mod layout {
    use super::Size;
    /// 512GB, the span one PML4 entry covers on x86_64
    pub const GB512: Size = 512 << 30;
    /// Ceiling of the canonical user address space (47 bits)
    pub const USER_ADDR_LIMIT: Size = 128 << 40;
}

const_assert!(page_size::MB2 % page_size::KB4 == 0);
const_assert!(layout::GB512 % page_size::GB1 == 0);
const_assert!(layout::USER_ADDR_LIMIT % layout::GB512 == 0);

/// Virtual address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VirtAddr(pub usize);

impl VirtAddr {
    /// Creates a new virtual address
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Returns the raw address
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns true if the address is aligned to `align` (a power of two)
    pub const fn is_aligned(self, align: Size) -> bool {
        self.0 & (align - 1) == 0
    }
}

impl Add<Size> for VirtAddr {
    type Output = VirtAddr;

    fn add(self, rhs: Size) -> VirtAddr {
        VirtAddr(self.0 + rhs)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

bitflags::bitflags! {
    /// Access permission of a mapped region
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permission: u8 {
        /// Region is readable
        const READ = 0b0000_0001;
        /// Region is writable
        const WRITE = 0b0000_0010;
    }
}

impl Permission {
    /// Read-only access
    pub const RO: Permission = Permission::READ;
    /// Read-write access, the permission every mapping starts with
    pub const RW: Permission = Permission::READ.union(Permission::WRITE);
}

/// Half-open virtual memory region `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    /// Start address
    pub start: usize,
    /// End address
    pub end: usize,
}

impl MemoryRegion {
    /// Creates a region of `size` bytes at `start`
    pub fn new(start: VirtAddr, size: Size) -> Self {
        Self {
            start: start.0,
            end: start.0 + size,
        }
    }

    /// Size of the region in bytes
    pub fn size(&self) -> Size {
        self.end - self.start
    }

    /// Returns true if address is in region
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Returns true if region overlaps with another region
    pub fn overlaps(&self, other: &MemoryRegion) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Rounds `size` up to a multiple of `align` (a power of two)
pub const fn align_up(size: Size, align: Size) -> Size {
    (size + align - 1) & !(align - 1)
}
