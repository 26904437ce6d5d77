//! Fixed-arena dynamic memory allocator with cell-index metadata.
//!
//! This crate manages a caller-supplied byte buffer as a general-purpose
//! heap, aimed at microcontrollers and other environments without a host
//! allocator. The classic three operations are provided — obtain a block,
//! release it, and resize it in place or by relocation — and every byte of
//! bookkeeping lives inside the buffer itself.
//!
//! # Memory Layout
//!
//! The arena is an array of 8-byte cells. Cell 0 and the last cell are
//! sentinels; everything in between is sliced into blocks. Cross-cell
//! references are 16-bit cell indices, never pointers, with the block's
//! free flag packed into bit 15 of its back-link:
//!
//! ```text
//! Used block (head cell + trailing cells):
//! ┌────────┬────────┬───────────────────────────────┐
//! │ prev:15│ next   │ payload…            (8n − 4 B)│
//! │ free:1 │        │                               │
//! └────────┴────────┴───────────────────────────────┘
//! Free block (head cell):
//! ┌────────┬────────┬───────────┬───────────┐
//! │ prev:15│ next   │ prev_free │ next_free │
//! │ free:1 │        │           │           │
//! └────────┴────────┴───────────┴───────────┘
//! ```
//!
//! Two doubly-linked rings overlay the same cells: the physical ring links
//! every block in address order and gives O(1) neighbor coalescing; the
//! free ring threads only free blocks, LIFO, so a just-released block is
//! the first candidate of the next first-fit search.
//!
//! # Usage
//!
//! ```
//! use cell_heap::SizedHeap;
//!
//! let mut heap = SizedHeap::<1024>::new();
//!
//! let block = heap.allocate(100).unwrap();
//! heap.data_mut(block)[..5].copy_from_slice(b"hello");
//!
//! let block = heap.reshape(block, 200).unwrap();
//! assert_eq!(&heap.data(block)[..5], b"hello");
//!
//! heap.release(block);
//! assert_eq!(heap.free_bytes(), (1024 - 2) * 8);
//! ```
//!
//! [`Heap`] provides the same operations over a buffer you bring yourself;
//! [`SizedHeap`] owns its storage inline and fits in a `static`.
//!
//! # Limits and Guarantees
//!
//! - Indices are 15 bits, so an arena holds at most 2^15 cells (256 KiB).
//! - The largest satisfiable request is `(cells - 2) * 8 - 4` bytes.
//! - Payloads start 4 bytes into their head cell, so an 8-aligned buffer
//!   yields 4-byte-aligned payloads; no stronger alignment is offered.
//! - Out-of-memory is reported as `None` with the arena untouched. Invalid
//!   handles and undersized arenas are programming errors and panic.
//!
//! # Thread Safety
//!
//! A heap is exclusively owned and non-reentrant; all operations take
//! `&mut self`. Wrap it in a lock to share it across threads.

#![cfg_attr(not(test), no_std)]

mod cell;
pub mod check;
pub mod dump;
pub mod heap;
pub mod iter;
pub mod sized;

pub use self::{
    check::CheckError,
    dump::Dump,
    heap::{BlockRef, Heap},
    iter::Blocks,
    sized::SizedHeap,
};
