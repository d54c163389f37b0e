//! Core topology interface

use core::fmt;

use serde::Serialize;

use crate::error::Result;

/// Logical CPU identifier as the OS numbers it
pub type CoreId = usize;

/// Order in which NUMA nodes are filled with workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NumaPolicy {
    /// Use every core of node 0, then node 1, ...
    #[default]
    Fill,
    /// Take one core from each node in turn
    Interleave,
}

/// Order in which cores of one node are filled (hyperthread placement)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorePolicy {
    /// Sibling hyperthreads are used before the next physical core
    #[default]
    Fill,
    /// Physical cores are used before their siblings
    Interleave,
}

impl NumaPolicy {
    /// Name used in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            NumaPolicy::Fill => "fill",
            NumaPolicy::Interleave => "interleave",
        }
    }
}

impl fmt::Display for NumaPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of the ordered list of cores workers are pinned to
pub trait TopologyProvider {
    /// Returns every usable core, ordered by the given policies
    fn cores(&self, numa: NumaPolicy, core: CorePolicy) -> Result<Vec<CoreId>>;
}
