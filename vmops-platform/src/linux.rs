//! Linux VM backend
//!
//! Memory objects are anonymous `memfd` files; regions are shared,
//! pre-faulted (`MAP_POPULATE`) mappings of them.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use log::{debug, error};
use vmops_api::error::invalid_arguments;
use vmops_api::{Error, MemoryObject, Permission, Result, Size, VirtAddr, VmBackend};

/// Encoding of the 2MB huge page size in the `mmap`/`memfd_create` flags
const HUGE_2MB: libc::c_int = 21 << 26;

fn last_errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Error for a failed resize of a freshly created object
fn truncate_error(name: &str, errno: i32) -> Error {
    match errno {
        libc::ENOMEM | libc::ENOSPC => Error::OutOfMemory,
        _ => Error::CreationFailed { name: name.to_string(), errno },
    }
}

/// A `memfd` backed memory object
#[derive(Debug)]
pub struct MemfdObject {
    name: String,
    fd: OwnedFd,
    size: Size,
    huge: bool,
}

impl MemoryObject for MemfdObject {
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

impl MemfdObject {
    fn check_range(&self, offset: Size, len: Size) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if len > 0 && end <= self.size => Ok(()),
            _ => Err(Error::InvalidArguments(format!(
                "range {:#x}+{:#x} outside object '{}' of {:#x} bytes",
                offset, len, self.name, self.size
            ))),
        }
    }

    fn map_flags(&self, fixed: bool) -> libc::c_int {
        let mut flags = libc::MAP_SHARED | libc::MAP_POPULATE;
        if fixed {
            flags |= libc::MAP_FIXED;
        }
        if self.huge {
            flags |= libc::MAP_HUGETLB | HUGE_2MB;
        }
        flags
    }
}

/// VM backend issuing the real system calls
#[derive(Debug, Default, Clone, Copy)]
pub struct MemfdBackend;

impl MemfdBackend {
    /// Creates a new backend
    pub fn new() -> Self {
        Self
    }

    fn mmap(&self, hint: Option<VirtAddr>, object: &MemfdObject, offset: Size, len: Size) -> Result<VirtAddr> {
        object.check_range(offset, len)?;
        let addr = hint.map_or(core::ptr::null_mut(), |a| a.as_usize() as *mut libc::c_void);
        // SAFETY: the fd is owned by `object` and stays open for the call; with
        // MAP_FIXED the caller owns the target range.
        let mapped = unsafe {
            libc::mmap(
                addr,
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                object.map_flags(hint.is_some()),
                object.fd.as_raw_fd(),
                offset as libc::off_t,
            )
        };
        if mapped == libc::MAP_FAILED {
            let errno = last_errno();
            if hint.is_some() {
                error!("mmap fixed at {:#x} failed: {}", addr as usize, io::Error::from_raw_os_error(errno));
            }
            return Err(match errno {
                libc::ENOMEM => Error::OutOfMemory,
                _ => Error::MapFailed { addr: addr as usize, errno },
            });
        }
        if hint.is_some() && mapped != addr {
            return Err(Error::MapFailed { addr: addr as usize, errno: 0 });
        }
        Ok(VirtAddr::new(mapped as usize))
    }
}

impl VmBackend for MemfdBackend {
    type Object = MemfdObject;

    fn create(&self, name: &str, size: Size, huge: bool) -> Result<MemfdObject> {
        if size == 0 {
            return Err(invalid_arguments("memory object size must be non-zero"));
        }
        let cname = CString::new(name).map_err(|_| invalid_arguments("object name contains a NUL byte"))?;
        let mut flags = 0;
        if huge {
            flags |= libc::MFD_HUGETLB | HUGE_2MB as libc::c_uint;
        }
        // SAFETY: `cname` is a valid NUL-terminated string.
        let raw = unsafe { libc::memfd_create(cname.as_ptr(), flags) };
        if raw == -1 {
            return Err(Error::CreationFailed { name: name.to_string(), errno: last_errno() });
        }
        // SAFETY: `raw` is a freshly created descriptor nobody else owns.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        // SAFETY: plain syscall on an owned descriptor.
        if unsafe { libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) } != 0 {
            return Err(truncate_error(name, last_errno()));
        }
        debug!("created memfd '{}' size={} huge={}", name, size, huge);
        Ok(MemfdObject { name: name.to_string(), fd, size, huge })
    }

    fn destroy(&self, object: MemfdObject) -> Result<()> {
        debug!("destroying memfd '{}'", object.name);
        drop(object);
        Ok(())
    }

    fn map(&self, object: &MemfdObject, offset: Size, len: Size) -> Result<VirtAddr> {
        self.mmap(None, object, offset, len)
    }

    fn map_fixed(&self, addr: VirtAddr, object: &MemfdObject, offset: Size, len: Size) -> Result<()> {
        if addr.as_usize() == 0 {
            return Err(invalid_arguments("fixed mapping at the null address"));
        }
        self.mmap(Some(addr), object, offset, len).map(|_| ())
    }

    fn unmap(&self, addr: VirtAddr, len: Size) -> Result<()> {
        // SAFETY: the benchmark only unmaps ranges it mapped and never touches them afterwards.
        if unsafe { libc::munmap(addr.as_usize() as *mut libc::c_void, len) } != 0 {
            return Err(Error::UnmapFailed { addr: addr.as_usize(), errno: last_errno() });
        }
        Ok(())
    }

    fn protect(&self, addr: VirtAddr, len: Size, permission: Permission) -> Result<()> {
        let mut prot = libc::PROT_NONE;
        if permission.contains(Permission::READ) {
            prot |= libc::PROT_READ;
        }
        if permission.contains(Permission::WRITE) {
            prot |= libc::PROT_WRITE;
        }
        // SAFETY: changing permissions of a benchmark-owned mapping has no effect on Rust memory.
        if unsafe { libc::mprotect(addr.as_usize() as *mut libc::c_void, len, prot) } != 0 {
            return Err(Error::ProtectFailed { addr: addr.as_usize(), errno: last_errno() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmops_api::memory::page_size;

    #[test]
    fn test_memfd_map_protect_unmap() {
        let backend = MemfdBackend::new();
        let obj = backend.create("vmops_test_linux", page_size::KB4 * 4, false).unwrap();
        let addr = backend.map(&obj, 0, page_size::KB4 * 4).unwrap();
        assert!(addr.is_aligned(page_size::KB4));
        backend.protect(addr, page_size::KB4, Permission::RO).unwrap();
        backend.protect(addr, page_size::KB4, Permission::RW).unwrap();
        backend.map_fixed(addr + page_size::KB4, &obj, 0, page_size::KB4).unwrap();
        backend.unmap(addr, page_size::KB4 * 4).unwrap();
        backend.destroy(obj).unwrap();
    }

    #[test]
    fn test_map_outside_object() {
        let backend = MemfdBackend::new();
        let obj = backend.create("vmops_test_range", page_size::KB4, false).unwrap();
        let err = backend.map(&obj, page_size::KB4, page_size::KB4).unwrap_err();
        assert!(matches!(err, Error::InvalidArguments(_)));
        backend.destroy(obj).unwrap();
    }

    #[test]
    fn test_truncate_failure_is_a_creation_failure() {
        assert_eq!(truncate_error("obj", libc::ENOSPC), Error::OutOfMemory);
        assert_eq!(
            truncate_error("obj", libc::EFBIG),
            Error::CreationFailed { name: "obj".to_string(), errno: libc::EFBIG }
        );
    }

    #[test]
    fn test_oversized_object_fails_creation() {
        // Larger than any file offset, so ftruncate itself rejects the size
        let err = MemfdBackend::new().create("vmops_test_oversized", usize::MAX & !0xfff, false).unwrap_err();
        assert!(matches!(err, Error::CreationFailed { errno, .. } if errno == libc::EINVAL || errno == libc::EFBIG));
    }

    #[test]
    fn test_zero_sized_object() {
        let err = MemfdBackend::new().create("vmops_test_empty", 0, false).unwrap_err();
        assert!(matches!(err, Error::InvalidArguments(_)));
    }
}
