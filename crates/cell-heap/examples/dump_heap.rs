//! Formats a small arena, performs a few operations, and prints the cell
//! graph after each step.

use cell_heap::SizedHeap;

fn main() {
    let mut heap = SizedHeap::<1024>::new();
    println!("after init");
    print!("{}", heap.dump());

    let b0 = heap.allocate(27).expect("arena has room");
    let b1 = heap.allocate(200).expect("arena has room");
    let b2 = heap.allocate(38).expect("arena has room");
    println!("after three allocations");
    print!("{}", heap.dump());

    println!("releasing the middle block");
    heap.release(b1);
    print!("{}", heap.dump());

    heap.release(b0);
    heap.release(b2);
    println!("after releasing the rest");
    print!("{}", heap.dump());
}
