//! Anonymous shared mappings that survive `fork`.
//!
//! A `SharedSlots` region is mapped `MAP_SHARED | MAP_ANONYMOUS`, so a child
//! created with `fork` after the mapping exists sees the same physical pages
//! as its parent. Atomics stored there are therefore coherent across the
//! parent and every child.

use std::io;
use std::mem;
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::atomic::AtomicU64;

pub struct SharedSlots {
    ptr: NonNull<AtomicU64>,
    len: usize,
}

// The region only ever hands out `&AtomicU64`.
unsafe impl Send for SharedSlots {}
unsafe impl Sync for SharedSlots {}

impl SharedSlots {
    /// Maps `len` zeroed slots. A zero-length request still maps one slot.
    pub fn new(len: usize) -> io::Result<Self> {
        let len = len.max(1);
        let bytes = len * mem::size_of::<AtomicU64>();

        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                bytes,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // Anonymous mappings are zero-filled and page aligned, which is a
        // valid array of `AtomicU64::new(0)`.
        let ptr = NonNull::new(addr.cast::<AtomicU64>())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;
        Ok(Self { ptr, len })
    }

    pub fn slots(&self) -> &[AtomicU64] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.len
    }
}

impl Drop for SharedSlots {
    fn drop(&mut self) {
        let bytes = self.len * mem::size_of::<AtomicU64>();
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), bytes);
        }
    }
}
