// Copyright (C) 2020 Miklos Maroti
// Licensed under the MIT license (see LICENSE)

use std::io::{Error, ErrorKind};
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::{ptr, slice};

/// Caches the granularity value reported by the operating system.
static GRANULARITY: AtomicUsize = AtomicUsize::new(0);

/// A block of zeroed, readable and writable memory mapped directly from the
/// operating system. The mapping length is rounded up to the granularity and
/// the memory is returned to the system when the region is dropped.
///
/// The region is addressed through a raw pointer, so one thread may write
/// into one part of it while other threads hold slices into another part.
/// Keeping those parts disjoint is the responsibility of the caller.
pub(crate) struct Region {
    ptr: *mut u8,
    len: usize,
}

fn os_error(message: &'static str) -> Error {
    let kind = Error::last_os_error().kind();
    Error::new(kind, message)
}

#[cfg(unix)]
unsafe fn vm_granularity() -> Result<usize, Error> {
    let granularity = libc::sysconf(libc::_SC_PAGESIZE);
    if granularity <= 0 {
        Err(os_error("sysconf failed"))
    } else {
        Ok(granularity as usize)
    }
}

#[cfg(unix)]
unsafe fn vm_map(len: usize) -> Result<*mut u8, Error> {
    let ptr = libc::mmap(
        ptr::null_mut(),
        len,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
    );
    if ptr == libc::MAP_FAILED {
        Err(os_error("mmap failed"))
    } else {
        Ok(ptr as *mut u8)
    }
}

#[cfg(unix)]
unsafe fn vm_unmap(ptr: *mut u8, len: usize) -> bool {
    libc::munmap(ptr as *mut libc::c_void, len) == 0
}

#[cfg(windows)]
unsafe fn vm_granularity() -> Result<usize, Error> {
    use std::mem;
    use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};

    let mut info: SYSTEM_INFO = mem::zeroed();
    GetSystemInfo(&mut info);
    let granularity = info.dwAllocationGranularity as usize;
    if granularity == 0 {
        Err(Error::new(ErrorKind::Other, "invalid granularity"))
    } else {
        Ok(granularity)
    }
}

#[cfg(windows)]
unsafe fn vm_map(len: usize) -> Result<*mut u8, Error> {
    use winapi::shared::basetsd::SIZE_T;
    use winapi::um::memoryapi::VirtualAlloc;
    use winapi::um::winnt::{MEM_COMMIT, MEM_RESERVE, PAGE_READWRITE};

    let ptr = VirtualAlloc(
        ptr::null_mut(),
        len as SIZE_T,
        MEM_COMMIT | MEM_RESERVE,
        PAGE_READWRITE,
    );
    if ptr.is_null() {
        Err(os_error("VirtualAlloc failed"))
    } else {
        Ok(ptr as *mut u8)
    }
}

#[cfg(windows)]
unsafe fn vm_unmap(ptr: *mut u8, _len: usize) -> bool {
    use winapi::ctypes::c_void;
    use winapi::um::memoryapi::VirtualFree;
    use winapi::um::winnt::MEM_RELEASE;

    VirtualFree(ptr as *mut c_void, 0, MEM_RELEASE) != 0
}

impl Drop for Region {
    fn drop(&mut self) {
        let ret = unsafe { vm_unmap(self.ptr, self.len) };
        debug_assert!(ret);
    }
}

impl Region {
    /// Returns the virtual memory mapping granularity of the underlying
    /// operating system. On Unix this is the page size, which is typically
    /// 4096 bytes. On Windows this is the allocation granularity, which is
    /// typically 65536 bytes.
    pub fn granularity() -> Result<usize, Error> {
        let a = GRANULARITY.load(Ordering::Relaxed);
        if a != 0 {
            Ok(a)
        } else {
            let b = unsafe { vm_granularity() };
            if let Ok(a) = b {
                GRANULARITY.store(a, Ordering::Relaxed);
            }
            b
        }
    }

    /// Maps a new zeroed region of at least `len` bytes. The length is
    /// rounded up to an integer multiple of the granularity and must be
    /// greater than zero.
    pub fn new(len: usize) -> Result<Region, Error> {
        let granularity = Region::granularity()?;
        if len == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "invalid length"));
        }

        let len = len
            .checked_add(granularity - 1)
            .map(|a| (a / granularity) * granularity)
            .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "length overflow"))?;

        let ptr = unsafe { vm_map(len)? };
        Ok(Region { ptr, len })
    }

    /// Returns the mapped length of the region.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns a shared view of the given byte range.
    ///
    /// # Safety
    /// The range must lie within the region and nobody may write into it
    /// while the returned slice is alive.
    #[inline]
    pub unsafe fn slice(&self, range: Range<usize>) -> &[u8] {
        debug_assert!(range.start <= range.end && range.end <= self.len);
        slice::from_raw_parts(self.ptr.add(range.start), range.end - range.start)
    }

    /// Copies `data` into the region starting at `offset`.
    ///
    /// # Safety
    /// The target range must lie within the region and must not overlap
    /// any slice obtained from `slice` that is still alive, nor be written
    /// concurrently by another thread.
    #[inline]
    pub unsafe fn write(&self, offset: usize, data: &[u8]) {
        debug_assert!(offset + data.len() <= self.len);
        ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(offset), data.len());
    }
}

unsafe impl Send for Region {}
unsafe impl Sync for Region {}
