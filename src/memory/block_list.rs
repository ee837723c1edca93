use super::block::{BlockArena, BlockId};

/// Which list a block currently sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ListKind {
    /// Not on any list. Only while a block is being created, moved or destroyed.
    Detached,
    PartiallyFilled,
    Filled,
}

/// Intrusive doubly-linked list of blocks, threaded through the `prev`/`next`
/// fields of the blocks in a [`BlockArena`].
///
/// The list does not own its blocks; it only records membership. Append,
/// head access and removal of any member are O(1).
pub(crate) struct BlockList {
    kind: ListKind,
    head: Option<BlockId>,
    tail: Option<BlockId>,
    len: usize,
}

impl BlockList {
    pub(crate) const fn new(kind: ListKind) -> Self {
        Self {
            kind,
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub(crate) fn head(&self) -> Option<BlockId> {
        self.head
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Append a detached block.
    pub(crate) fn push_back(&mut self, blocks: &mut BlockArena, id: BlockId) {
        let block = blocks.get_mut(id);
        debug_assert_eq!(
            block.list,
            ListKind::Detached,
            "block {id:?} pushed onto {:?} while still linked",
            self.kind
        );
        block.prev = self.tail;
        block.next = None;
        block.list = self.kind;

        match self.tail {
            Some(tail) => blocks.get_mut(tail).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
    }

    /// Unlink a member block, leaving it detached.
    pub(crate) fn remove(&mut self, blocks: &mut BlockArena, id: BlockId) {
        let block = blocks.get_mut(id);
        debug_assert_eq!(
            block.list, self.kind,
            "block {id:?} removed from {:?} but it is on {:?}",
            self.kind, block.list
        );
        let prev = block.prev.take();
        let next = block.next.take();
        block.list = ListKind::Detached;

        match prev {
            Some(prev) => blocks.get_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => blocks.get_mut(next).prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;
    }

    pub(crate) fn pop_front(&mut self, blocks: &mut BlockArena) -> Option<BlockId> {
        let head = self.head?;
        self.remove(blocks, head);
        Some(head)
    }

    /// Members in list order.
    #[cfg(test)]
    pub(crate) fn iter<'a>(&self, blocks: &'a BlockArena) -> impl Iterator<Item = BlockId> + 'a {
        std::iter::successors(self.head, move |&id| blocks.get(id).next)
    }
}

impl Drop for BlockList {
    fn drop(&mut self) {
        // Every block must have been unlinked (and its page released) first.
        if !std::thread::panicking() {
            debug_assert!(
                self.head.is_none() && self.tail.is_none() && self.len == 0,
                "{:?} block list dropped with {} blocks still linked",
                self.kind,
                self.len
            );
        }
    }
}
