use super::block::SLOT_ALIGN;
use super::pool::{SlabPool, SlabPoolConfig};
use super::vm::VmError;
use std::marker::PhantomData;
use std::ptr::NonNull;

/// Per-type front end over a [`SlabPool`] sized for `T`.
///
/// Shaped like the allocator hooks node-based containers expect:
/// `allocate(n)` / `deallocate(ptr, n)`, where `n` is always 1.
pub struct FixSizedAllocator<T> {
    pool: SlabPool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FixSizedAllocator<T> {
    /// # Errors
    ///
    /// Returns `VmError::UnsupportedAlignment` if `T` needs more than pointer
    /// alignment, or `VmError::ObjectTooLarge` if too few `T` fit in a page.
    pub fn new() -> Result<Self, VmError> {
        Self::with_config(&SlabPoolConfig::default())
    }

    /// # Errors
    ///
    /// See [`FixSizedAllocator::new`].
    pub fn with_config(config: &SlabPoolConfig) -> Result<Self, VmError> {
        let align = std::mem::align_of::<T>();
        if align > SLOT_ALIGN {
            return Err(VmError::UnsupportedAlignment {
                align,
                max: SLOT_ALIGN,
            });
        }
        Ok(Self {
            pool: SlabPool::with_config(std::mem::size_of::<T>(), config)?,
            _marker: PhantomData,
        })
    }

    /// Allocate uninitialized storage for one `T`.
    ///
    /// # Panics
    ///
    /// Panics if `n != 1` (debug builds only).
    ///
    /// # Errors
    ///
    /// Returns `VmError::AcquireFailed` if the OS refuses a new page.
    pub fn allocate(&mut self, n: usize) -> Result<NonNull<T>, VmError> {
        debug_assert_eq!(n, 1, "FixSizedAllocator serves exactly one element per request");
        Ok(self.pool.allocate()?.cast())
    }

    /// Release storage for one `T`. Does not drop the value.
    ///
    /// # Safety
    /// - `ptr` must have been returned by `allocate`/`alloc_val` on this allocator.
    /// - `ptr` must not have been freed already.
    ///
    /// # Panics
    ///
    /// Panics if `n != 1` (debug builds only).
    pub unsafe fn deallocate(&mut self, ptr: NonNull<T>, n: usize) {
        debug_assert_eq!(n, 1, "FixSizedAllocator serves exactly one element per request");
        // Safety: upheld by caller.
        unsafe { self.pool.deallocate(ptr.cast()) };
    }

    /// Allocate storage and move `value` into it.
    ///
    /// # Errors
    ///
    /// Returns `VmError::AcquireFailed` if the OS refuses a new page; `value`
    /// is dropped in that case.
    pub fn alloc_val(&mut self, value: T) -> Result<NonNull<T>, VmError> {
        let ptr = self.allocate(1)?;
        // Safety: ptr is a fresh, suitably aligned slot of at least size_of::<T>() bytes.
        unsafe { ptr.write(value) };
        Ok(ptr)
    }

    /// Move the value out of `ptr` and release its storage.
    ///
    /// # Safety
    /// - `ptr` must have been returned by `alloc_val` (or `allocate` and then
    ///   initialized) on this allocator.
    /// - `ptr` must not have been freed already.
    pub unsafe fn take_val(&mut self, ptr: NonNull<T>) -> T {
        // Safety: upheld by caller; the slot holds an initialized T.
        let value = unsafe { ptr.read() };
        // Safety: upheld by caller.
        unsafe { self.deallocate(ptr, 1) };
        value
    }

    #[must_use]
    pub fn pool(&self) -> &SlabPool {
        &self.pool
    }
}
