use super::block::{Block, BlockArena, BlockGeometry, BlockId, PageHeader};
use super::block_list::{BlockList, ListKind};
use super::stats;
use super::vm::{PlatformVmOps, VmError, VmOps};
use std::ptr::NonNull;

/// Default sanity floor: a page must hold at least this many slots.
pub const DEFAULT_MIN_SLOTS_PER_PAGE: usize = 4;

/// Configuration for [`SlabPool`]. All fields have sensible defaults.
#[derive(Clone, Debug)]
pub struct SlabPoolConfig {
    /// Construction fails unless this many slots fit in one page next to the
    /// block header. Values below 1 are treated as 1. Default: 4.
    pub min_slots_per_page: usize,

    /// Zero every slot as it is handed out. Debug builds only; ignored in
    /// release builds. Default: true.
    pub debug_fill: bool,
}

impl Default for SlabPoolConfig {
    fn default() -> Self {
        Self {
            min_slots_per_page: DEFAULT_MIN_SLOTS_PER_PAGE,
            debug_fill: true,
        }
    }
}

/// Snapshot of one pool's geometry and occupancy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    pub element_size: usize,
    pub geometry: BlockGeometry,
    pub partially_filled_blocks: usize,
    pub filled_blocks: usize,
    pub live_elements: usize,
    pub mapped_bytes: usize,
}

/// Fixed-size slab allocator: every allocation is one slot of the same size.
///
/// Each block is one OS page. Blocks with free capacity sit on
/// `partially_filled`, blocks with none on `filled`; a block that empties is
/// unmapped on the spot. `allocate` only ever looks at the head of
/// `partially_filled`, and `deallocate` finds the owning block by masking the
/// pointer down to its page, so both are O(1).
///
/// Not `Sync`: all operations take `&mut self`.
pub struct SlabPool {
    element_size: usize,
    geometry: BlockGeometry,
    #[cfg_attr(not(debug_assertions), allow(dead_code))]
    debug_fill: bool,
    blocks: BlockArena,
    partially_filled: BlockList,
    filled: BlockList,
    live: usize,
}

// Safety: SlabPool exclusively owns its pages; nothing is shared with other
// pools or threads, so moving it between threads is sound.
unsafe impl Send for SlabPool {}

impl SlabPool {
    /// Create a pool for `element_size`-byte elements with default settings.
    ///
    /// # Errors
    ///
    /// Returns `VmError::ObjectTooLarge` if fewer than
    /// [`DEFAULT_MIN_SLOTS_PER_PAGE`] elements fit in one page.
    pub fn new(element_size: usize) -> Result<Self, VmError> {
        Self::with_config(element_size, &SlabPoolConfig::default())
    }

    /// Create a pool with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns `VmError::ObjectTooLarge` if fewer than
    /// `config.min_slots_per_page` elements fit in one page.
    pub fn with_config(element_size: usize, config: &SlabPoolConfig) -> Result<Self, VmError> {
        let geometry = BlockGeometry::new(
            element_size,
            PlatformVmOps::page_size(),
            config.min_slots_per_page,
        )?;

        log::debug!(
            "slab pool: element_size={element_size} slot_size={} capacity={} header_offset={} page_size={}",
            geometry.slot_size,
            geometry.capacity,
            geometry.header_offset,
            geometry.page_size,
        );

        Ok(Self {
            element_size,
            geometry,
            debug_fill: config.debug_fill,
            blocks: BlockArena::new(),
            partially_filled: BlockList::new(ListKind::PartiallyFilled),
            filled: BlockList::new(ListKind::Filled),
            live: 0,
        })
    }

    /// Allocate storage for one element.
    ///
    /// Zeroing behavior:
    /// - **Debug** (with `debug_fill`): the slot is zeroed.
    /// - **Release**: undefined content.
    ///
    /// # Errors
    ///
    /// Returns `VmError::AcquireFailed` if a new page is needed and the OS
    /// refuses it. The pool is unchanged in that case.
    pub fn allocate(&mut self) -> Result<NonNull<u8>, VmError> {
        let id = match self.partially_filled.head() {
            Some(id) => id,
            None => {
                let id = self.create_block()?;
                self.partially_filled.push_back(&mut self.blocks, id);
                id
            }
        };

        let block = self.blocks.get_mut(id);
        let slot = block.allocate_slot(&self.geometry);
        if block.is_full(&self.geometry) {
            self.partially_filled.remove(&mut self.blocks, id);
            self.filled.push_back(&mut self.blocks, id);
            log::trace!("slab pool: block {id:?} filled");
        }

        #[cfg(debug_assertions)]
        if self.debug_fill {
            // Safety: slot is a live slot of slot_size bytes.
            unsafe {
                std::ptr::write_bytes(slot.as_ptr(), 0, self.geometry.slot_size);
            }
        }

        self.live += 1;
        stats::SLOTS_LIVE.add(1);

        Ok(slot)
    }

    /// Return storage obtained from [`SlabPool::allocate`].
    ///
    /// # Safety
    /// - `ptr` must have been returned by `allocate` on this exact pool.
    /// - `ptr` must not have been freed already.
    /// - `ptr` must not be used after this call.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>) {
        // Safety: upheld by caller; ptr lies in one of our live pages.
        let (page, id) = unsafe { PageHeader::owner_of(ptr, self.geometry.page_size) };

        let block = self.blocks.get_mut(id);
        debug_assert!(
            block.page() == page,
            "Pointer {ptr:p} does not belong to this SlabPool",
        );
        let was_full = block.is_full(&self.geometry);
        // Safety: upheld by caller.
        unsafe { block.deallocate_slot(&self.geometry, ptr) };
        let now_empty = block.is_empty();

        self.live -= 1;
        stats::SLOTS_LIVE.sub(1);

        if was_full {
            self.filled.remove(&mut self.blocks, id);
            if now_empty {
                // capacity == 1: the block goes from full to empty in one step.
                self.destroy_block(id);
            } else {
                self.partially_filled.push_back(&mut self.blocks, id);
                log::trace!("slab pool: block {id:?} has room again");
            }
        } else if now_empty {
            self.partially_filled.remove(&mut self.blocks, id);
            self.destroy_block(id);
        }
    }

    /// Map a fresh page and register a detached, empty block for it.
    fn create_block(&mut self) -> Result<BlockId, VmError> {
        let page_size = self.geometry.page_size;
        // Safety: FFI call to map a page.
        let page = unsafe { PlatformVmOps::acquire(page_size)? };
        debug_assert!(
            (page.as_ptr() as usize).is_multiple_of(page_size),
            "page {page:p} is not aligned to {page_size}"
        );

        // Safety: page is freshly mapped, page-aligned and exclusively ours
        // until destroy_block releases it.
        let id = self.blocks.insert(unsafe { Block::new(page, &self.geometry) });
        // Safety: page is live and writable.
        unsafe { PageHeader::write(page, id) };

        stats::TOTAL_MAPPED.add(page_size);
        stats::BLOCKS_LIVE.add(1);
        log::trace!("slab pool: mapped block {id:?} at {page:p}");

        Ok(id)
    }

    /// Forget a detached block and unmap its page.
    fn destroy_block(&mut self, id: BlockId) {
        let block = self.blocks.remove(id);
        debug_assert_eq!(block.list, ListKind::Detached);
        self.release_page(id, block.page());
    }

    fn release_page(&self, id: BlockId, page: NonNull<u8>) {
        let page_size = self.geometry.page_size;
        // Safety: page was acquired with page_size bytes and its block is gone.
        match unsafe { PlatformVmOps::release(page, page_size) } {
            Ok(()) => log::trace!("slab pool: unmapped block {id:?} at {page:p}"),
            Err(e) => log::error!("slab pool: failed to unmap block {id:?} at {page:p}: {e}"),
        }
        stats::TOTAL_MAPPED.sub(page_size);
        stats::BLOCKS_LIVE.sub(1);
    }

    #[must_use]
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    #[must_use]
    pub fn geometry(&self) -> BlockGeometry {
        self.geometry
    }

    /// Slots per block.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.geometry.capacity
    }

    #[must_use]
    pub fn live_elements(&self) -> usize {
        self.live
    }

    /// Blocks (pages) currently mapped.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn mapped_bytes(&self) -> usize {
        self.blocks.len() * self.geometry.page_size
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            element_size: self.element_size,
            geometry: self.geometry,
            partially_filled_blocks: self.partially_filled.len(),
            filled_blocks: self.filled.len(),
            live_elements: self.live,
            mapped_bytes: self.mapped_bytes(),
        }
    }

    /// Check every structural invariant. Test helper.
    ///
    /// # Panics
    ///
    /// Panics describing the first violated invariant.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let capacity = self.geometry.capacity;
        let mut seen = 0;
        let mut live = 0;

        for (list, kind) in [
            (&self.partially_filled, ListKind::PartiallyFilled),
            (&self.filled, ListKind::Filled),
        ] {
            let mut len = 0;
            let mut prev = None;
            for id in list.iter(&self.blocks) {
                let block = self.blocks.get(id);
                assert_eq!(block.list, kind, "block {id:?} linked on {kind:?} but tagged {:?}", block.list);
                assert_eq!(block.prev, prev, "block {id:?} has a broken back link");
                assert!(block.allocated() > 0, "empty block {id:?} still tracked on {kind:?}");
                match kind {
                    ListKind::Filled => assert_eq!(block.allocated(), capacity),
                    _ => assert!(block.allocated() < capacity, "full block {id:?} on {kind:?}"),
                }
                let never_touched = capacity - block.first_unused();
                assert_eq!(block.allocated() + block.free_len() + never_touched, capacity);
                // Safety: Test helper; block pages are live.
                let (page, owner) = unsafe { PageHeader::owner_of(block.page(), self.geometry.page_size) };
                assert_eq!((page, owner), (block.page(), id));

                live += block.allocated();
                len += 1;
                prev = Some(id);
            }
            assert_eq!(len, list.len(), "{kind:?} length out of sync");
            seen += len;
        }

        assert_eq!(seen, self.blocks.len(), "block tracked by the arena but on no list");
        assert!(
            self.blocks.iter().all(|(_, block)| block.list != ListKind::Detached),
            "detached block left in the arena"
        );
        assert_eq!(live, self.live);
    }
}

impl Drop for SlabPool {
    fn drop(&mut self) {
        if self.live > 0 {
            log::warn!(
                "slab pool dropped with {} live elements of size {}; their storage is released",
                self.live,
                self.element_size
            );
            stats::SLOTS_LIVE.sub(self.live);
        }

        while let Some(id) = self
            .partially_filled
            .pop_front(&mut self.blocks)
            .or_else(|| self.filled.pop_front(&mut self.blocks))
        {
            let block = self.blocks.remove(id);
            self.release_page(id, block.page());
        }
    }
}
