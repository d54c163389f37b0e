//! VMOPS Platform
//!
//! Concrete implementations of the collaborator interfaces in `vmops-api`:
//! the Linux `memfd` VM backend, a portable simulated backend, sysfs based
//! NUMA topology discovery, clocks and CPU pinning.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use vmops_api as api;

pub mod affinity;
pub mod clock;
#[cfg(target_os = "linux")]
pub mod linux;
pub mod sim;
pub mod topology;

pub use affinity::pin_current_thread;
pub use clock::{ManualClock, MonotonicClock};
#[cfg(target_os = "linux")]
pub use linux::{MemfdBackend, MemfdObject};
pub use sim::{SimBackend, SimMapping, SimObject, SimStats};
pub use topology::{parse_cpulist, SysfsTopology};
