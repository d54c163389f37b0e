//! NUMA topology discovery from sysfs

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use vmops_api::{CoreId, CorePolicy, Error, ErrorContext, NumaPolicy, Result, TopologyProvider};

/// Default sysfs directory listing the NUMA nodes
pub const SYSFS_NODE_DIR: &str = "/sys/devices/system/node";

/// Parses a kernel CPU list such as `0-3,8,10-11`
pub fn parse_cpulist(list: &str) -> Result<Vec<CoreId>> {
    let mut cores = Vec::new();
    for part in list.trim().split(',').filter(|p| !p.is_empty()) {
        let bad = || Error::Topology(format!("malformed cpu list entry '{}'", part));
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: CoreId = lo.trim().parse().map_err(|_| bad())?;
                let hi: CoreId = hi.trim().parse().map_err(|_| bad())?;
                if lo > hi {
                    return Err(bad());
                }
                cores.extend(lo..=hi);
            }
            None => cores.push(part.trim().parse().map_err(|_| bad())?),
        }
    }
    Ok(cores)
}

/// Orders the per-node core lists according to `policy`
pub fn order_cores(nodes: &[Vec<CoreId>], policy: NumaPolicy) -> Vec<CoreId> {
    match policy {
        NumaPolicy::Fill => nodes.iter().flatten().copied().collect(),
        NumaPolicy::Interleave => {
            let longest = nodes.iter().map(Vec::len).max().unwrap_or(0);
            (0..longest)
                .flat_map(|i| nodes.iter().filter_map(move |node| node.get(i).copied()))
                .collect()
        }
    }
}

/// Topology provider reading `node*/cpulist` files
#[derive(Debug, Clone)]
pub struct SysfsTopology {
    root: PathBuf,
}

impl Default for SysfsTopology {
    fn default() -> Self {
        Self::new(SYSFS_NODE_DIR)
    }
}

impl SysfsTopology {
    /// Reads the node directories below `root`
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    /// Per-node core lists, ordered by node number
    pub fn nodes(&self) -> Result<Vec<Vec<CoreId>>> {
        let mut nodes = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(Error::from).context("reading NUMA nodes")? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.strip_prefix("node")).and_then(|n| n.parse::<usize>().ok())
            else {
                continue;
            };
            let list = fs::read_to_string(entry.path().join("cpulist"))
                .map_err(Error::from)
                .context(&format!("node{}", id))?;
            let cores = parse_cpulist(&list)?;
            if !cores.is_empty() {
                nodes.push((id, cores));
            }
        }
        nodes.sort_by_key(|(id, _)| *id);
        Ok(nodes.into_iter().map(|(_, cores)| cores).collect())
    }
}

/// Cores `0..n` for machines without NUMA information
pub fn sequential_cores() -> Vec<CoreId> {
    let n = std::thread::available_parallelism().map_or(1, |n| n.get());
    warn!("selecting cores using sequential fallback. nproc = {}", n);
    (0..n).collect()
}

impl TopologyProvider for SysfsTopology {
    fn cores(&self, numa: NumaPolicy, _core: CorePolicy) -> Result<Vec<CoreId>> {
        let nodes = match self.nodes() {
            Ok(nodes) if !nodes.is_empty() => nodes,
            Ok(_) => {
                warn!("NUMA not available!");
                return Ok(sequential_cores());
            }
            Err(err) => {
                warn!("NUMA not available: {}", err);
                return Ok(sequential_cores());
            }
        };
        let nproc: usize = nodes.iter().map(Vec::len).sum();
        info!("selecting cores from NUMA topology. nodes={}, nproc={}", nodes.len(), nproc);
        info!("using NUMA {} policy. Ignoring hyperthread policy.", numa);
        Ok(order_cores(&nodes, numa))
    }
}
