//! Fixed-storage heap with a compile-time cell count.

use crate::{
    cell::{self, CELL_BYTES, Cell, HEADER_BYTES, MAX_CELLS, MIN_CELLS},
    check::{self, CheckError},
    dump::Dump,
    heap::{self, BlockRef, Heap},
    iter::Blocks,
};

/// A heap that owns its arena inline: `CELLS` cells of 8 bytes each.
///
/// Same operation surface as [`Heap`], without a caller-managed buffer;
/// being a plain value it embeds directly in a larger structure or behind
/// a lock. `CELLS` must be between 4 and 2^15, checked at compile time.
///
/// # Examples
///
/// ```
/// use cell_heap::SizedHeap;
///
/// let mut heap = SizedHeap::<1024>::new();
/// let block = heap.allocate(64).unwrap();
/// heap.data_mut(block)[..4].copy_from_slice(b"abcd");
/// heap.release(block);
/// ```
#[derive(Debug)]
pub struct SizedHeap<const CELLS: usize> {
    cells: [Cell; CELLS],
}

impl<const CELLS: usize> SizedHeap<CELLS> {
    /// Creates a freshly formatted heap.
    #[must_use]
    pub fn new() -> Self {
        const {
            assert!(
                CELLS >= MIN_CELLS && CELLS <= MAX_CELLS,
                "cell count out of range"
            );
        }
        let mut cells = [Cell::default(); CELLS];
        cell::init(&mut cells);
        Self { cells }
    }

    /// Borrows the arena as a [`Heap`] for code written against the
    /// buffer-backed form.
    pub fn as_heap(&mut self) -> Heap<'_> {
        Heap::from_cells(&mut self.cells)
    }

    /// See [`Heap::init`].
    pub fn init(&mut self) {
        cell::init(&mut self.cells);
    }

    /// See [`Heap::allocate`].
    pub fn allocate(&mut self, size: usize) -> Option<BlockRef> {
        heap::allocate(&mut self.cells, size)
    }

    /// See [`Heap::release`].
    pub fn release(&mut self, block: BlockRef) {
        heap::release(&mut self.cells, block);
    }

    /// See [`Heap::reshape`].
    #[must_use = "the block may have moved; only the returned handle is valid"]
    pub fn reshape(&mut self, block: BlockRef, new_size: usize) -> Option<BlockRef> {
        heap::reshape(&mut self.cells, block, new_size)
    }

    /// See [`Heap::data`].
    #[must_use]
    pub fn data(&self, block: BlockRef) -> &[u8] {
        heap::block_bytes(&self.cells, block)
    }

    /// See [`Heap::data_mut`].
    #[must_use]
    pub fn data_mut(&mut self, block: BlockRef) -> &mut [u8] {
        heap::block_bytes_mut(&mut self.cells, block)
    }

    /// See [`Heap::blocks`].
    #[must_use]
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks::new(&self.cells)
    }

    /// See [`Heap::check`].
    pub fn check(&self) -> Result<(), CheckError> {
        check::check_cells(&self.cells)
    }

    /// See [`Heap::dump`].
    #[must_use]
    pub fn dump(&self) -> Dump<'_> {
        Dump::new(&self.cells)
    }

    /// Total number of cells, including the two overhead cells.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        CELLS
    }

    /// See [`Heap::max_request`].
    #[must_use]
    pub fn max_request(&self) -> usize {
        (CELLS - 2) * CELL_BYTES - HEADER_BYTES
    }

    /// See [`Heap::free_bytes`].
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        heap::counted_bytes(&self.cells, true)
    }

    /// See [`Heap::used_bytes`].
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        heap::counted_bytes(&self.cells, false)
    }

    /// See [`Heap::as_bytes`].
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        use dataview::PodMethods as _;
        self.cells.as_slice().as_bytes()
    }
}

impl<const CELLS: usize> Default for SizedHeap<CELLS> {
    fn default() -> Self {
        Self::new()
    }
}
