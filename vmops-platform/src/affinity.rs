//! CPU affinity for worker threads

use vmops_api::{CoreId, Error, Result};

/// Pins the calling thread to `core`
#[cfg(target_os = "linux")]
pub fn pin_current_thread(core: CoreId) -> Result<()> {
    use std::mem;

    if core >= libc::CPU_SETSIZE as usize {
        return Err(Error::InvalidArguments(format!("core {} exceeds the cpu set size", core)));
    }
    // SAFETY: cpu_set_t is plain data; zeroed is the empty set.
    let result = unsafe {
        let mut set: libc::cpu_set_t = mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if result != 0 {
        let err = std::io::Error::last_os_error();
        return Err(Error::Io(format!("sched_setaffinity to core {}: {}", core, err)));
    }
    Ok(())
}

/// Pinning is unsupported off Linux; threads run wherever the OS puts them
#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(core: CoreId) -> Result<()> {
    Err(Error::Io(format!("cannot pin to core {} on this platform", core)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_os = "linux")]
    fn test_pin_out_of_range_core() {
        assert!(pin_current_thread(1 << 20).is_err());
    }
}
