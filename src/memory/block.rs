//! One OS page of slots plus the metadata that tracks them.
//!
//! Page layout (slots are packed against the end of the page):
//! ```text
//!   page start                                                  page end
//!   |PageHeader|pad|  slot 0  |  slot 1  |  ...  | slot capacity-1 |
//!   0          8   header_offset
//! ```
//!
//! The page only carries a small [`PageHeader`]; the real bookkeeping lives in
//! a [`Block`] stored in the pool's [`BlockArena`]. Masking any slot address
//! down to its page boundary yields the header and therefore the `BlockId`.
//!
//! A slot is in exactly one state:
//! - never touched: `index >= first_unused`,
//! - live: handed out and not yet freed,
//! - free: its first word holds the next link of the block's free list.

use super::block_list::ListKind;
use super::vm::VmError;
#[cfg(debug_assertions)]
use fixedbitset::FixedBitSet;
use std::ptr::NonNull;

/// Link stored in the first word of every freed slot.
type FreeLink = Option<NonNull<u8>>;

/// Alignment and minimum size of every slot: one free-list link.
pub const SLOT_ALIGN: usize = std::mem::align_of::<FreeLink>();

/// Size of the per-page header. Slots never start before this offset.
pub const HEADER_SIZE: usize = std::mem::size_of::<PageHeader>();

/// Written into every page header on block creation.
const PAGE_CANARY: u32 = 0x51AB_C0DE;

/// 32-bit canary written right after the free link of every freed slot that
/// has room for it. Checked when the slot is popped to detect writes after
/// free. Only active when debug assertions are enabled.
#[cfg(debug_assertions)]
const FREE_CANARY: u32 = 0xAB_AD_BA_BE;

/// Index of a block in its pool's [`BlockArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct BlockId(u32);

impl BlockId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Metadata stored in the first bytes of every slab page.
#[repr(C)]
pub(crate) struct PageHeader {
    block: u32,
    canary: u32,
}

impl PageHeader {
    /// Stamp `page` with the id of the block that owns it.
    ///
    /// # Safety
    /// `page` must be a live, writable, page-aligned slab page.
    pub(crate) unsafe fn write(page: NonNull<u8>, id: BlockId) {
        // Safety: upheld by caller; pages are page-aligned so the header is aligned.
        unsafe {
            page.cast::<PageHeader>().write(PageHeader {
                block: id.0,
                canary: PAGE_CANARY,
            });
        }
    }

    /// Recover the page start and owning block of a slot address.
    ///
    /// # Safety
    /// `ptr` must point into a live slab page of size `page_size`.
    pub(crate) unsafe fn owner_of(ptr: NonNull<u8>, page_size: usize) -> (NonNull<u8>, BlockId) {
        let offset = ptr.as_ptr() as usize & (page_size - 1);
        // Safety: the page start is at or below ptr within the same mapping.
        let page = unsafe { NonNull::new_unchecked(ptr.as_ptr().sub(offset)) };
        // Safety: upheld by caller; the header sits at the page start.
        let header = unsafe { page.cast::<PageHeader>().read() };
        debug_assert!(
            header.canary == PAGE_CANARY,
            "Pointer {ptr:p} is not inside a slab page: page canary was 0x{:08x}, expected 0x{PAGE_CANARY:08x}",
            header.canary,
        );
        (page, BlockId(header.block))
    }
}

/// Slot layout shared by every block of one pool. Fixed at pool construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockGeometry {
    /// OS page size; one block per page.
    pub page_size: usize,
    /// Element size rounded up to hold a free link at pointer alignment.
    pub slot_size: usize,
    /// Slots per block.
    pub capacity: usize,
    /// Byte offset of slot 0 within the page.
    pub header_offset: usize,
}

impl BlockGeometry {
    /// Lay out `element_size`-byte slots in a `page_size`-byte page.
    ///
    /// # Errors
    ///
    /// Returns `VmError::ObjectTooLarge` if fewer than `min_slots` slots fit
    /// next to the header.
    pub fn new(element_size: usize, page_size: usize, min_slots: usize) -> Result<Self, VmError> {
        debug_assert!(
            page_size.is_power_of_two(),
            "page size {page_size} is not a power of two"
        );
        let min_slots = min_slots.max(1);
        let too_large = || VmError::ObjectTooLarge {
            size: element_size,
            min_slots,
            page_size,
        };

        let slot_size = element_size
            .max(SLOT_ALIGN)
            .checked_next_multiple_of(SLOT_ALIGN)
            .ok_or_else(too_large)?;
        let needed = slot_size
            .checked_mul(min_slots)
            .and_then(|bytes| bytes.checked_add(HEADER_SIZE))
            .ok_or_else(too_large)?;
        if needed > page_size {
            return Err(too_large());
        }

        let capacity = (page_size - HEADER_SIZE) / slot_size;
        let header_offset = page_size - slot_size * capacity;

        Ok(Self {
            page_size,
            slot_size,
            capacity,
            header_offset,
        })
    }

    #[inline]
    fn slot_ptr(&self, page: NonNull<u8>, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.capacity);
        // Safety: header_offset + index * slot_size < page_size.
        unsafe { page.add(self.header_offset + index * self.slot_size) }
    }

    /// Slot index of `slot` within `page`.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not the start of a slot of `page`.
    #[cfg(debug_assertions)]
    fn slot_index(&self, page: NonNull<u8>, slot: NonNull<u8>) -> usize {
        let offset = (slot.as_ptr() as usize).wrapping_sub(page.as_ptr() as usize);
        assert!(
            offset >= self.header_offset && offset < self.page_size,
            "Pointer {slot:p} points into the header of slab page {page:p}",
        );
        let rel = offset - self.header_offset;
        assert!(
            rel.is_multiple_of(self.slot_size),
            "Pointer {slot:p} is not aligned to slot size {}",
            self.slot_size
        );
        rel / self.slot_size
    }
}

/// Bookkeeping for one slab page.
pub(crate) struct Block {
    page: NonNull<u8>,
    first_unused: usize,
    allocated: usize,
    free_head: FreeLink,
    pub(crate) prev: Option<BlockId>,
    pub(crate) next: Option<BlockId>,
    pub(crate) list: ListKind,
    /// Tracks which slots are live. Debug builds only.
    #[cfg(debug_assertions)]
    live_map: FixedBitSet,
}

impl Block {
    /// Create an empty block over `page`.
    ///
    /// # Safety
    /// `page` must be a page-aligned mapping of `geometry.page_size` bytes
    /// that stays mapped and exclusively owned for the block's lifetime.
    pub(crate) unsafe fn new(page: NonNull<u8>, geometry: &BlockGeometry) -> Self {
        #[cfg(not(debug_assertions))]
        let _ = geometry;

        Self {
            page,
            first_unused: 0,
            allocated: 0,
            free_head: None,
            prev: None,
            next: None,
            list: ListKind::Detached,
            #[cfg(debug_assertions)]
            live_map: FixedBitSet::with_capacity(geometry.capacity),
        }
    }

    #[inline]
    pub(crate) fn page(&self) -> NonNull<u8> {
        self.page
    }

    #[cfg(test)]
    pub(crate) fn allocated(&self) -> usize {
        self.allocated
    }

    #[inline]
    pub(crate) fn is_full(&self, geometry: &BlockGeometry) -> bool {
        self.allocated == geometry.capacity
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.allocated == 0
    }

    /// Number of slots on the free list. Walks the list; tests only.
    #[cfg(test)]
    pub(crate) fn free_len(&self) -> usize {
        let mut len = 0;
        let mut cursor = self.free_head;
        while let Some(slot) = cursor {
            len += 1;
            // Safety: every free-list entry holds a valid link in its first word.
            cursor = unsafe { slot.cast::<FreeLink>().read() };
        }
        len
    }

    #[cfg(test)]
    pub(crate) fn first_unused(&self) -> usize {
        self.first_unused
    }

    /// Hand out one slot: the most recently freed slot first, then the next
    /// never-touched one.
    ///
    /// # Panics
    ///
    /// Panics if the block is full. The pool never asks a full block.
    pub(crate) fn allocate_slot(&mut self, geometry: &BlockGeometry) -> NonNull<u8> {
        let slot = if let Some(head) = self.free_head {
            #[cfg(debug_assertions)]
            if geometry.slot_size >= SLOT_ALIGN + 4 {
                // Safety: head is a freed slot of this block with room for the canary.
                let canary = unsafe { head.add(SLOT_ALIGN).cast::<u32>().read() };
                assert!(
                    canary == FREE_CANARY,
                    "slab corruption: free-slot canary at {head:p}+{SLOT_ALIGN} was 0x{canary:08x}, expected 0x{FREE_CANARY:08x}",
                );
            }

            // Safety: head is on the free list, so its first word is a link.
            self.free_head = unsafe { head.cast::<FreeLink>().read() };
            head
        } else if self.first_unused < geometry.capacity {
            let slot = geometry.slot_ptr(self.page, self.first_unused);
            self.first_unused += 1;
            slot
        } else {
            panic!(
                "slab block at {:p} asked to allocate while full ({} slots)",
                self.page, geometry.capacity
            );
        };

        self.allocated += 1;

        #[cfg(debug_assertions)]
        {
            let index = geometry.slot_index(self.page, slot);
            debug_assert!(!self.live_map.contains(index), "slot {index} handed out twice");
            self.live_map.insert(index);
        }

        slot
    }

    /// Push `slot` onto this block's free list.
    ///
    /// # Safety
    /// - `slot` must have been returned by `allocate_slot` on this block.
    /// - `slot` must not have been freed already.
    pub(crate) unsafe fn deallocate_slot(&mut self, geometry: &BlockGeometry, slot: NonNull<u8>) {
        #[cfg(debug_assertions)]
        {
            let index = geometry.slot_index(self.page, slot);
            assert!(
                index < self.first_unused,
                "Pointer {slot:p} was never handed out by slab block {:p}",
                self.page
            );
            assert!(
                self.live_map.contains(index),
                "Double free detected in slab block {:p}: slot {index}",
                self.page
            );
            self.live_map.set(index, false);
        }
        debug_assert!(self.allocated > 0);

        // Safety: slot is a live slot of this block, at least one link wide
        // and link-aligned.
        unsafe {
            slot.cast::<FreeLink>().write(self.free_head);
        }
        #[cfg(debug_assertions)]
        if geometry.slot_size >= SLOT_ALIGN + 4 {
            // Safety: slot has room for the canary after the link.
            unsafe {
                slot.add(SLOT_ALIGN).cast::<u32>().write(FREE_CANARY);
            }
        }
        #[cfg(not(debug_assertions))]
        let _ = geometry;

        self.free_head = Some(slot);
        self.allocated -= 1;
    }
}

/// Owns the metadata of every live block of one pool.
///
/// Vacated ids are recycled, so the arena never grows beyond the peak number
/// of simultaneously live blocks.
pub(crate) struct BlockArena {
    slots: Vec<Option<Block>>,
    vacant: Vec<BlockId>,
    live: usize,
}

impl BlockArena {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            vacant: Vec::new(),
            live: 0,
        }
    }

    /// Number of live blocks.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn insert(&mut self, block: Block) -> BlockId {
        self.live += 1;
        if let Some(id) = self.vacant.pop() {
            debug_assert!(self.slots[id.index()].is_none());
            self.slots[id.index()] = Some(block);
            return id;
        }
        let id = BlockId(
            u32::try_from(self.slots.len()).expect("slab block arena exceeded u32::MAX blocks"),
        );
        self.slots.push(Some(block));
        id
    }

    /// # Panics
    ///
    /// Panics if `id` is not live.
    pub(crate) fn remove(&mut self, id: BlockId) -> Block {
        let Some(block) = self.slots.get_mut(id.index()).and_then(Option::take) else {
            panic!("slab block {id:?} is not live");
        };
        self.vacant.push(id);
        self.live -= 1;
        block
    }

    /// # Panics
    ///
    /// Panics if `id` is not live.
    #[cfg(test)]
    pub(crate) fn get(&self, id: BlockId) -> &Block {
        match self.slots.get(id.index()) {
            Some(Some(block)) => block,
            _ => panic!("slab block {id:?} is not live"),
        }
    }

    /// # Panics
    ///
    /// Panics if `id` is not live.
    #[inline]
    pub(crate) fn get_mut(&mut self, id: BlockId) -> &mut Block {
        match self.slots.get_mut(id.index()) {
            Some(Some(block)) => block,
            _ => panic!("slab block {id:?} is not live"),
        }
    }

    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let id = BlockId(u32::try_from(index).ok()?);
            slot.as_ref().map(|block| (id, block))
        })
    }
}
