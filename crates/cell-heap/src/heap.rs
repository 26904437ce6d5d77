//! Policy layer: first-fit allocation, coalescing release, and reshape.
//!
//! The primitives in [`cell`](crate::cell) each maintain one ring across a
//! single mutation; this module composes them so that both rings are
//! consistent again by the time a public operation returns. The rules are
//! the classic ones for a cell heap:
//!
//! - **Allocation** walks the free ring from its head (most recently freed
//!   first) and takes the first block large enough. The block is split only
//!   when the remainder is at least two cells; a single-cell sliver could
//!   only ever hold empty requests.
//! - **Release** merges with a free physical successor, then with a free
//!   physical predecessor, and only failing both inserts the block at the
//!   head of the free ring.
//! - **Reshape** shrinks in place, steering the spare cells toward a free
//!   neighbor, and grows by relocating into the first free block that fits.

use core::ops::Range;

use dataview::{DataView, PodMethods as _};

use crate::{
    cell::{self, CELL_BYTES, Cell, HEADER_BYTES, MAX_CELLS, MIN_CELLS},
    check::{self, CheckError},
    dump::Dump,
    iter::Blocks,
};

/// Opaque handle to an allocated block: the index of its head cell.
///
/// A `BlockRef` stays valid until the block is released or relocated by a
/// reshape. Using it afterwards is a contract violation; the heap detects
/// most stale handles and panics rather than corrupting the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef(pub(crate) u16);

/// A cell heap laid over a caller-supplied byte buffer.
///
/// The buffer is divided into 8-byte cells; all bookkeeping lives inside
/// it, as 16-bit cell indices rather than pointers, so the arena as a whole
/// is position-independent. Two cells are overhead: cell 0 heads both
/// internal rings and the last cell terminates the physical ring, leaving
/// `(cells - 2) * 8 - 4` bytes as the largest satisfiable request.
///
/// # Examples
///
/// ```
/// use cell_heap::Heap;
///
/// #[repr(C, align(8))]
/// struct Storage([u8; 256]);
///
/// let mut storage = Storage([0; 256]);
/// let mut heap = Heap::new(&mut storage.0);
///
/// let block = heap.allocate(24).unwrap();
/// heap.data_mut(block)[..5].copy_from_slice(b"hello");
/// assert_eq!(&heap.data(block)[..5], b"hello");
/// heap.release(block);
/// ```
///
/// # Thread Safety
///
/// All operations take `&mut self`; sharing a heap between threads requires
/// external synchronization by construction.
#[derive(Debug)]
pub struct Heap<'a> {
    cells: &'a mut [Cell],
}

impl<'a> Heap<'a> {
    /// Formats `storage` as a fresh heap of `storage.len() / 8` cells.
    ///
    /// # Panics
    ///
    /// Panics if the buffer holds fewer than 4 or more than 2^15 cells, or
    /// is not 2-byte aligned.
    pub fn new(storage: &'a mut [u8]) -> Self {
        let mut heap = Self::attach(storage);
        heap.init();
        heap
    }

    /// Lays a heap over `storage` without formatting it, for revisiting an
    /// arena stamped earlier. Handles from the earlier session keep working;
    /// attaching a buffer that never went through [`Heap::new`] or
    /// [`Heap::init`] leaves the heap unusable until `init` is called.
    ///
    /// # Panics
    ///
    /// Same conditions as [`Heap::new`].
    pub fn attach(storage: &'a mut [u8]) -> Self {
        let count = storage.len() / CELL_BYTES;
        assert!(
            count >= MIN_CELLS,
            "arena of {count} cells is too small to format"
        );
        assert!(
            count <= MAX_CELLS,
            "arena of {count} cells overflows 15-bit cell indices"
        );
        let cells = DataView::from_mut(storage).slice_mut::<Cell>(0, count);
        Self { cells }
    }

    pub(crate) fn from_cells(cells: &'a mut [Cell]) -> Self {
        Self { cells }
    }

    /// Restamps the arena: every block is discarded and the full usable
    /// region becomes one free block.
    pub fn init(&mut self) {
        cell::init(self.cells);
    }

    /// Obtains a block whose payload holds at least `size` bytes.
    ///
    /// Returns `None` for a zero-size request or when no free block is
    /// large enough; a failed allocation leaves the arena untouched.
    pub fn allocate(&mut self, size: usize) -> Option<BlockRef> {
        allocate(self.cells, size)
    }

    /// Returns `block` to the free pool, merging it with free physical
    /// neighbors.
    ///
    /// # Panics
    ///
    /// Panics if `block` is stale (already released or relocated).
    pub fn release(&mut self, block: BlockRef) {
        release(self.cells, block);
    }

    /// Resizes `block` to hold at least `new_size` bytes.
    ///
    /// Shrinks happen in place where possible; a shrink next to a free
    /// predecessor and any grow relocate the payload, invalidating `block`
    /// in favor of the returned handle. `new_size == 0` releases the block.
    ///
    /// Returns `None` after a release or when a grow finds no block large
    /// enough; a failed grow leaves the original block and the whole arena
    /// untouched.
    ///
    /// # Panics
    ///
    /// Panics if `block` is stale.
    #[must_use = "the block may have moved; only the returned handle is valid"]
    pub fn reshape(&mut self, block: BlockRef, new_size: usize) -> Option<BlockRef> {
        reshape(self.cells, block, new_size)
    }

    /// Payload bytes of `block`: its full capacity, which is at least the
    /// size requested at allocation.
    ///
    /// # Panics
    ///
    /// Panics if `block` is stale.
    #[must_use]
    pub fn data(&self, block: BlockRef) -> &[u8] {
        block_bytes(self.cells, block)
    }

    /// Mutable payload bytes of `block`.
    ///
    /// # Panics
    ///
    /// Panics if `block` is stale.
    #[must_use]
    pub fn data_mut(&mut self, block: BlockRef) -> &mut [u8] {
        block_bytes_mut(self.cells, block)
    }

    /// Iterates over the used blocks in physical order.
    #[must_use]
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks::new(self.cells)
    }

    /// Validates both rings; see [`CheckError`] for the violations caught.
    pub fn check(&self) -> Result<(), CheckError> {
        check::check_cells(self.cells)
    }

    /// Renders the cell graph for debugging; the returned adapter
    /// implements [`Display`](core::fmt::Display).
    #[must_use]
    pub fn dump(&self) -> Dump<'_> {
        Dump::new(self.cells)
    }

    /// Total number of cells, including the two overhead cells.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Largest request that can ever succeed: the whole usable region as a
    /// single block, less the link words.
    #[must_use]
    pub fn max_request(&self) -> usize {
        (self.cells.len() - 2) * CELL_BYTES - HEADER_BYTES
    }

    /// Bytes currently held by free blocks, counted in whole cells.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        counted_bytes(self.cells, true)
    }

    /// Bytes currently held by used blocks, counted in whole cells.
    /// `free_bytes + used_bytes` always equals `(cell_count - 2) * 8`.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        counted_bytes(self.cells, false)
    }

    /// The raw arena content, metadata included.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.cells.as_bytes()
    }
}

/// Cells needed for a payload of `size` bytes: the 4 header bytes ride
/// along, rounded up to whole cells, never less than one cell.
pub(crate) fn cell_budget(size: usize) -> usize {
    (size + HEADER_BYTES).div_ceil(CELL_BYTES)
}

fn find_first_fit(cells: &[Cell], want: usize) -> Option<u16> {
    let mut b = cells[0].next_free;
    while b != 0 {
        if cell::size_in_cells(cells, b) >= want {
            return Some(b);
        }
        b = cells[usize::from(b)].next_free;
    }
    None
}

pub(crate) fn allocate(cells: &mut [Cell], size: usize) -> Option<BlockRef> {
    if size == 0 {
        return None;
    }

    let want = cell_budget(size);
    let b = find_first_fit(cells, want)?;

    if cell::size_in_cells(cells, b) > want + 1 {
        // The host block shrinks in place and keeps its ring links; the
        // carved-off tail becomes the allocation.
        Some(BlockRef(cell::split_tail(cells, b, want as u16)))
    } else {
        // Taking the whole block; a leftover sliver of one cell would be
        // useless anyway.
        cell::unfree(cells, b);
        Some(BlockRef(b))
    }
}

pub(crate) fn release(cells: &mut [Cell], block: BlockRef) {
    assert_used_head(cells, block.0);
    release_cell(cells, block.0);
}

fn release_cell(cells: &mut [Cell], b: u16) {
    let next = cells[usize::from(b)].next;
    let prev = cell::prev_index(cells, b);

    // Successor first: the predecessor merge below may swallow `b` itself,
    // links included.
    if cell::is_free(cells, next) {
        cell::unfree(cells, next);
        cell::join(cells, b, next);
    }

    if cell::is_free(cells, prev) {
        // The predecessor is already threaded on the free ring and simply
        // grows over `b`.
        cell::join(cells, prev, b);
    } else {
        cell::push_free(cells, b);
    }
}

pub(crate) fn reshape(cells: &mut [Cell], block: BlockRef, new_size: usize) -> Option<BlockRef> {
    if new_size == 0 {
        release(cells, block);
        return None;
    }

    let b = block.0;
    assert_used_head(cells, b);

    let want = cell_budget(new_size);
    let cur = cell::size_in_cells(cells, b);
    let next = cells[usize::from(b)].next;
    let prev = cell::prev_index(cells, b);

    if want < cur - 1 {
        if cell::is_free(cells, next) {
            // Hand the spare cells to the free successor: split them off,
            // merge, and re-release so coalescing stays mandatory.
            cell::unfree(cells, next);
            let tail = cell::split_head(cells, b, want as u16);
            cell::join(cells, tail, next);
            release_cell(cells, tail);
            Some(block)
        } else if cell::is_free(cells, prev) {
            // Slide the kept payload to the top of the block and let the
            // free predecessor grow over the vacated head. The handle moves.
            let dest = next - want as u16;
            let src = payload_range(cells, b);
            let dst_start = usize::from(dest) * CELL_BYTES + HEADER_BYTES;
            let bytes = cells.as_bytes_mut();
            bytes.copy_within(src.start..src.start + new_size, dst_start);

            let tail = cell::split_tail(cells, b, want as u16);
            cell::join(cells, prev, b);
            Some(BlockRef(tail))
        } else {
            let tail = cell::split_head(cells, b, want as u16);
            release_cell(cells, tail);
            Some(block)
        }
    } else if want > cur {
        // Relocate into the first free block that fits, taken whole.
        let target = find_first_fit(cells, want)?;
        cell::unfree(cells, target);

        let src = payload_range(cells, b);
        let dst_start = usize::from(target) * CELL_BYTES + HEADER_BYTES;
        let bytes = cells.as_bytes_mut();
        bytes.copy_within(src, dst_start);

        release_cell(cells, b);
        Some(BlockRef(target))
    } else {
        // Within one cell of the right size already; not worth moving.
        Some(block)
    }
}

/// Byte range of the payload of the used block headed by `b`.
fn payload_range(cells: &[Cell], b: u16) -> Range<usize> {
    let start = usize::from(b) * CELL_BYTES + HEADER_BYTES;
    let end = usize::from(cells[usize::from(b)].next) * CELL_BYTES;
    start..end
}

pub(crate) fn block_bytes(cells: &[Cell], block: BlockRef) -> &[u8] {
    assert_used_head(cells, block.0);
    &cells.as_bytes()[payload_range(cells, block.0)]
}

pub(crate) fn block_bytes_mut(cells: &mut [Cell], block: BlockRef) -> &mut [u8] {
    assert_used_head(cells, block.0);
    let range = payload_range(cells, block.0);
    &mut cells.as_bytes_mut()[range]
}

/// A handle must name a used, non-sentinel cell whose neighbors agree that
/// it heads a block.
fn assert_used_head(cells: &[Cell], b: u16) {
    assert!(
        b != 0 && usize::from(b) < cells.len() - 1,
        "stale block handle: cell {b} is out of range"
    );
    assert!(
        !cell::is_free(cells, b),
        "stale block handle: cell {b} is free"
    );
    assert_eq!(
        cells[usize::from(cell::prev_index(cells, b))].next,
        b,
        "stale block handle: cell {b} does not head a block"
    );
}

pub(crate) fn counted_bytes(cells: &[Cell], count_free: bool) -> usize {
    let mut total = 0;
    let mut b = cells[0].next;
    while !cell::is_terminal(cells, b) {
        if cell::is_free(cells, b) == count_free {
            total += cell::size_in_cells(cells, b) * CELL_BYTES;
        }
        b = cells[usize::from(b)].next;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(8))]
    struct Storage<const N: usize>([u8; N]);

    fn with_heap<F>(bytes: usize, test_fn: F)
    where
        F: FnOnce(&mut Heap<'_>),
    {
        let mut storage = Storage([0_u8; 8192]);
        let mut heap = Heap::new(&mut storage.0[..bytes]);
        test_fn(&mut heap);
        heap.check().expect("heap left inconsistent");
    }

    #[test]
    fn basic_allocation() {
        with_heap(1024, |heap| {
            let block = heap.allocate(64).unwrap();
            assert!(heap.data(block).len() >= 64);
            heap.release(block);
        });
    }

    #[test]
    fn zero_size_allocation_fails_without_effect() {
        with_heap(1024, |heap| {
            let free = heap.free_bytes();
            assert_eq!(heap.allocate(0), None);
            assert_eq!(heap.free_bytes(), free);
        });
    }

    #[test]
    fn multiple_allocations_are_distinct() {
        with_heap(1024, |heap| {
            let a = heap.allocate(64).unwrap();
            let b = heap.allocate(64).unwrap();
            let c = heap.allocate(64).unwrap();
            assert_ne!(a, b);
            assert_ne!(b, c);
            assert_ne!(a, c);

            heap.release(a);
            heap.release(b);
            heap.release(c);
        });
    }

    #[test]
    fn allocations_grow_downward() {
        // First-fit carves the tail of the free block, so later allocations
        // sit at lower addresses.
        with_heap(1024, |heap| {
            let a = heap.allocate(64).unwrap();
            let b = heap.allocate(64).unwrap();
            assert!(b.0 < a.0);
        });
    }

    #[test]
    fn budget_rounds_up_to_whole_cells() {
        assert_eq!(cell_budget(1), 1);
        assert_eq!(cell_budget(4), 1);
        assert_eq!(cell_budget(5), 2);
        assert_eq!(cell_budget(12), 2);
        assert_eq!(cell_budget(13), 3);
    }

    #[test]
    fn small_remainder_is_not_split_off() {
        with_heap(1024, |heap| {
            // 126 cells usable; leave exactly one spare cell beyond the
            // request and the whole block must be handed over.
            let a = heap.allocate(96).unwrap(); // 13 cells
            let cells = heap.cell_count();
            let remaining = cells - 2 - 13;
            let b = heap.allocate((remaining - 1) * 8 - 4).unwrap();
            assert_eq!(heap.free_bytes(), 0, "the spare cell rides along");
            assert!(heap.data(b).len() > (remaining - 1) * 8 - 4);

            heap.release(a);
            heap.release(b);
        });
    }

    #[test]
    fn exhaustion_returns_none() {
        with_heap(256, |heap| {
            let max = heap.max_request();
            assert!(heap.allocate(max + 1).is_none());
            let block = heap.allocate(max).unwrap();
            assert!(heap.allocate(1).is_none());
            heap.release(block);
        });
    }

    #[test]
    fn release_coalesces_with_both_neighbors() {
        with_heap(1024, |heap| {
            let a = heap.allocate(64).unwrap();
            let b = heap.allocate(64).unwrap();
            let c = heap.allocate(64).unwrap();

            heap.release(a);
            heap.release(c);
            heap.release(b);

            // Everything merged back: the arena satisfies a maximal request.
            let max = heap.max_request();
            let big = heap.allocate(max).unwrap();
            heap.release(big);
        });
    }

    #[test]
    fn release_reuses_block_lifo() {
        with_heap(1024, |heap| {
            let a = heap.allocate(40).unwrap();
            let b = heap.allocate(40).unwrap();
            let c = heap.allocate(40).unwrap();

            heap.release(b);
            let again = heap.allocate(40).unwrap();
            assert_eq!(again, b, "most recently freed block is found first");

            heap.release(a);
            heap.release(again);
            heap.release(c);
        });
    }

    #[test]
    fn reshape_keeps_block_within_slack() {
        with_heap(1024, |heap| {
            let block = heap.allocate(100).unwrap(); // 13 cells
            // One cell less or the same budget: the block must not move.
            assert_eq!(heap.reshape(block, 92), Some(block)); // 12 cells
            assert_eq!(heap.reshape(block, 100), Some(block));
            heap.release(block);
        });
    }

    #[test]
    fn reshape_shrink_with_free_successor_stays_put() {
        with_heap(1024, |heap| {
            let a = heap.allocate(100).unwrap();
            let b = heap.allocate(100).unwrap();
            heap.release(a); // a sits above b, so b's successor is free

            let free = heap.free_bytes();
            let shrunk = heap.reshape(b, 50).unwrap();
            assert_eq!(shrunk, b, "payload stays in place");
            assert!(heap.free_bytes() > free);
            heap.check().unwrap();

            heap.release(shrunk);
        });
    }

    #[test]
    fn reshape_shrink_with_free_predecessor_relocates() {
        with_heap(1024, |heap| {
            let a = heap.allocate(100).unwrap();
            let b = heap.allocate(100).unwrap();
            heap.release(b); // b sits below a, so a's predecessor is free

            let free = heap.free_bytes();
            let shrunk = heap.reshape(a, 50).unwrap();
            assert_ne!(shrunk, a, "payload slides toward the block's end");
            assert!(heap.free_bytes() > free);
            heap.check().unwrap();

            heap.release(shrunk);
        });
    }

    #[test]
    fn reshape_shrink_without_free_neighbors_splits() {
        with_heap(1024, |heap| {
            let a = heap.allocate(100).unwrap();
            let b = heap.allocate(100).unwrap();
            let free = heap.free_bytes();

            // Both neighbors of `a` are used (terminal above, `b` below).
            let shrunk = heap.reshape(a, 50).unwrap();
            assert_eq!(shrunk, a);
            assert!(heap.free_bytes() > free);

            heap.release(shrunk);
            heap.release(b);
        });
    }

    #[test]
    fn reshape_grow_relocates_and_preserves_data() {
        with_heap(1024, |heap| {
            let block = heap.allocate(100).unwrap();
            for (i, byte) in heap.data_mut(block)[..100].iter_mut().enumerate() {
                *byte = i as u8;
            }

            let free = heap.free_bytes();
            let grown = heap.reshape(block, 200).unwrap();
            assert_ne!(grown, block);
            assert!(heap.free_bytes() < free);
            assert!(heap.data(grown).len() >= 200);
            for (i, byte) in heap.data(grown)[..100].iter().enumerate() {
                assert_eq!(*byte, i as u8);
            }

            heap.release(grown);
        });
    }

    #[test]
    fn reshape_grow_failure_is_atomic() {
        with_heap(256, |heap| {
            let block = heap.allocate(64).unwrap();
            heap.data_mut(block).fill(0xa5);

            let before = heap.as_bytes().to_vec();
            assert_eq!(heap.reshape(block, heap.max_request()), None);
            assert_eq!(heap.as_bytes(), &before[..], "failed grow mutated the arena");

            heap.release(block);
        });
    }

    #[test]
    fn reshape_to_zero_releases() {
        with_heap(1024, |heap| {
            let free = heap.free_bytes();
            let block = heap.allocate(64).unwrap();
            assert_eq!(heap.reshape(block, 0), None);
            assert_eq!(heap.free_bytes(), free);
        });
    }

    #[test]
    fn byte_accounting_is_conserved() {
        with_heap(1024, |heap| {
            let total = (heap.cell_count() - 2) * 8;
            assert_eq!(heap.free_bytes() + heap.used_bytes(), total);

            let a = heap.allocate(100).unwrap();
            let b = heap.allocate(17).unwrap();
            assert_eq!(heap.free_bytes() + heap.used_bytes(), total);

            heap.release(a);
            assert_eq!(heap.free_bytes() + heap.used_bytes(), total);
            heap.release(b);
            assert_eq!(heap.free_bytes(), total);
        });
    }

    #[test]
    fn attach_revisits_a_formatted_arena() {
        let mut storage = Storage([0_u8; 512]);
        let block = {
            let mut heap = Heap::new(&mut storage.0);
            let block = heap.allocate(32).unwrap();
            heap.data_mut(block)[..4].copy_from_slice(b"keep");
            block
        };

        let heap = Heap::attach(&mut storage.0);
        heap.check().unwrap();
        assert_eq!(&heap.data(block)[..4], b"keep");
    }

    #[test]
    #[should_panic(expected = "stale block handle")]
    fn released_handle_is_rejected() {
        let mut storage = Storage([0_u8; 512]);
        let mut heap = Heap::new(&mut storage.0);
        let block = heap.allocate(32).unwrap();
        heap.release(block);
        let _ = heap.data(block);
    }

    #[test]
    #[should_panic(expected = "too small")]
    fn undersized_arena_is_rejected() {
        let mut storage = Storage([0_u8; 24]);
        let _ = Heap::new(&mut storage.0);
    }
}
