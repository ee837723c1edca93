use std::ptr::NonNull;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("VM page acquisition failed: {0}")]
    AcquireFailed(#[source] std::io::Error),
    #[error("VM page release failed: {0}")]
    ReleaseFailed(#[source] std::io::Error),
    #[error(
        "Object too large for page: {min_slots} slots of size {size} plus the block header exceed page size {page_size}"
    )]
    ObjectTooLarge {
        size: usize,
        min_slots: usize,
        page_size: usize,
    },
    #[error("Unsupported alignment {align}: slots are only aligned to {max} bytes")]
    UnsupportedAlignment { align: usize, max: usize },
}

/// Abstract interface for page-granular virtual memory.
pub(crate) trait VmOps {
    /// Map `size` bytes of fresh read/write memory.
    ///
    /// The returned range starts on a page boundary and is zero-filled.
    /// `size` must be a non-zero multiple of [`VmOps::page_size`].
    unsafe fn acquire(size: usize) -> Result<NonNull<u8>, VmError>;

    /// Unmap a range previously returned by [`VmOps::acquire`] with the same
    /// `size`. Pointers into the range are invalid afterwards.
    unsafe fn release(ptr: NonNull<u8>, size: usize) -> Result<(), VmError>;

    /// OS page size. Always a power of two.
    fn page_size() -> usize;
}

pub(crate) struct PlatformVmOps;

// Test hook: fail the next N acquisitions made on the current thread.
#[cfg(test)]
thread_local! {
    static FAIL_ACQUIRES: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

/// Make the next `n` calls to `acquire` on this thread fail with
/// `AcquireFailed`. `0` disarms.
#[cfg(all(test, not(loom)))]
pub(crate) fn fail_next_acquires(n: usize) {
    FAIL_ACQUIRES.with(|pending| pending.set(n));
}

#[cfg(test)]
fn injected_failure() -> Option<VmError> {
    FAIL_ACQUIRES.with(|pending| {
        let n = pending.get();
        (n > 0).then(|| {
            pending.set(n - 1);
            VmError::AcquireFailed(std::io::Error::from(std::io::ErrorKind::OutOfMemory))
        })
    })
}

#[cfg(all(unix, not(any(loom, miri))))]
mod unix {
    use super::{NonNull, PlatformVmOps, VmError, VmOps};
    use std::io;

    impl VmOps for PlatformVmOps {
        unsafe fn acquire(size: usize) -> Result<NonNull<u8>, VmError> {
            #[cfg(test)]
            if let Some(err) = super::injected_failure() {
                return Err(err);
            }
            debug_assert!(
                size.is_multiple_of(Self::page_size()),
                "acquire: size ({size}) must be a multiple of the page size ({})",
                Self::page_size()
            );

            // Safety: FFI call to mmap. Anonymous private mappings are always
            // page-aligned and zero-filled.
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    size,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANON,
                    -1,
                    0,
                )
            };

            if ptr == libc::MAP_FAILED {
                return Err(VmError::AcquireFailed(io::Error::last_os_error()));
            }

            match NonNull::new(ptr.cast::<u8>()) {
                Some(p) => Ok(p),
                None => Err(VmError::AcquireFailed(io::Error::other("mmap returned null"))),
            }
        }

        unsafe fn release(ptr: NonNull<u8>, size: usize) -> Result<(), VmError> {
            // Safety: FFI call to munmap.
            if unsafe { libc::munmap(ptr.as_ptr().cast::<libc::c_void>(), size) } != 0 {
                return Err(VmError::ReleaseFailed(io::Error::last_os_error()));
            }
            Ok(())
        }

        fn page_size() -> usize {
            use crate::sync::OnceLock;
            static CACHED: OnceLock<usize> = OnceLock::new();
            *CACHED.get_or_init(|| {
                // Safety: FFI call to sysconf.
                let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
                assert!(
                    raw > 0,
                    "sysconf(_SC_PAGESIZE) failed: {}",
                    io::Error::last_os_error()
                );
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                {
                    raw as usize
                }
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Loom / Miri mock: heap-backed VmOps (no real mmap)
//
// loom runs inside one OS process with its own scheduler and Miri cannot
// execute mmap, so every "page" is a page-aligned, zeroed heap allocation.
// Page alignment is preserved, which is all the slab pool relies on.
// ---------------------------------------------------------------------------
#[cfg(any(loom, miri))]
const MOCK_PAGE_SIZE: usize = 4096;

#[cfg(any(loom, miri))]
impl VmOps for PlatformVmOps {
    unsafe fn acquire(size: usize) -> Result<NonNull<u8>, VmError> {
        #[cfg(test)]
        if let Some(err) = injected_failure() {
            return Err(err);
        }
        if size == 0 {
            return Err(VmError::AcquireFailed(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "zero-size acquisition",
            )));
        }
        let layout = std::alloc::Layout::from_size_align(size, MOCK_PAGE_SIZE)
            .map_err(|e| VmError::AcquireFailed(std::io::Error::other(e)))?;
        // Safety: layout has non-zero size.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).ok_or_else(|| {
            VmError::AcquireFailed(std::io::Error::new(
                std::io::ErrorKind::OutOfMemory,
                "alloc returned null",
            ))
        })
    }

    unsafe fn release(ptr: NonNull<u8>, size: usize) -> Result<(), VmError> {
        let layout = std::alloc::Layout::from_size_align(size, MOCK_PAGE_SIZE)
            .map_err(|e| VmError::ReleaseFailed(std::io::Error::other(e)))?;
        // Safety: ptr was allocated with the same layout via `acquire`.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
        Ok(())
    }

    fn page_size() -> usize {
        MOCK_PAGE_SIZE
    }
}
