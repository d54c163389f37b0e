//! VMOPS API - Core types and collaborator interfaces
//!
//! This crate provides the types and abstractions shared by every part of
//! the VMOPS virtual memory operations benchmark. The engine in
//! `vmops-bench` only talks to the outside world through the traits defined
//! here, so backends, clocks and topology sources can be swapped freely.
//!
//! # Architecture
//!
//! - **Error**: the common error type and `Result` alias
//! - **Memory**: addresses, permissions, page sizes and the `VmBackend` trait
//! - **Topology**: core identifiers, NUMA policies and `TopologyProvider`
//! - **Time**: the `TimeSource` trait
//! - **Sync**: shared synchronization primitives
//!
//! # Usage
//!
//! ```rust
//! use vmops_api::memory::{page_size, MemoryRegion, VirtAddr};
//!
//! let a = MemoryRegion::new(VirtAddr::new(0x1000), page_size::KB4);
//! let b = MemoryRegion::new(VirtAddr::new(0x2000), page_size::KB4);
//! assert!(!a.overlaps(&b));
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod memory;
pub mod sync;
pub mod time;
pub mod topology;

pub use error::{Error, ErrorContext, Result};
pub use memory::{MemoryObject, Permission, Size, VirtAddr, VmBackend};
pub use time::{Ticks, TimeSource};
pub use topology::{CoreId, CorePolicy, NumaPolicy, TopologyProvider};
