//! Synchronization primitives shared across the workspace
//!
//! Spin locks only; nothing here parks a thread in the OS.

pub use spin::Mutex;
pub use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
