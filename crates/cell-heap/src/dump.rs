//! Human-readable rendering of the cell graph.

use core::fmt;

use crate::cell::{self, CELL_BYTES, Cell};

/// Renders every cell of a heap, one line per block in physical order.
///
/// Free blocks are starred and show their free-ring links next to the
/// physical ones; used blocks show only the physical links and their
/// length. Created by [`Heap::dump`](crate::Heap::dump).
///
/// ```text
///  0000: [0000, 0001] [0003, 0003] free list
///  0001: [0000, 0003] 12 bytes
/// *0003: [0001, 0015] [0000, 0000] 96 bytes
///  0015: [0003, 0000] end
/// ```
#[derive(Debug)]
pub struct Dump<'a> {
    cells: &'a [Cell],
}

impl<'a> Dump<'a> {
    pub(crate) fn new(cells: &'a [Cell]) -> Self {
        Self { cells }
    }
}

impl fmt::Display for Dump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells = self.cells;
        let head = cells[0];
        writeln!(
            f,
            " 0000: [{:04}, {:04}] [{:04}, {:04}] free list",
            head.prev, head.next, head.prev_free, head.next_free
        )?;

        let mut b = head.next;
        while !cell::is_terminal(cells, b) {
            let cell = cells[usize::from(b)];
            let bytes = cell::size_in_cells(cells, b) * CELL_BYTES;
            if cell::is_free(cells, b) {
                writeln!(
                    f,
                    "*{b:04}: [{:04}, {:04}] [{:04}, {:04}] {bytes} bytes",
                    cell::prev_index(cells, b),
                    cell.next,
                    cell.prev_free,
                    cell.next_free
                )?;
            } else {
                writeln!(
                    f,
                    " {b:04}: [{:04}, {:04}] {bytes} bytes",
                    cell::prev_index(cells, b),
                    cell.next
                )?;
            }
            b = cell.next;
        }

        let last = cells[usize::from(b)];
        writeln!(
            f,
            " {b:04}: [{:04}, {:04}] end",
            cell::prev_index(cells, b),
            last.next
        )
    }
}
