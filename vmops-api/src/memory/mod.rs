//! Memory management abstractions

pub mod interface;
pub mod types;

pub use interface::{MemoryObject, VmBackend};
pub use types::{align_up, layout, page_size, MemoryRegion, Permission, Size, VirtAddr};
