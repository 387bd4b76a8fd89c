use std::mem::size_of;

use farjump::stack::{EightMbStack, OneMbStack, Stack, GUARD_ZONE};

#[test]
fn allocate_eight_mb() {
    let stack = EightMbStack::new().unwrap();
    let usable = stack.bottom() as usize - stack.limit() as usize;
    assert_eq!(usable, 8 * 1024 * 1024);
    assert_eq!(stack.limit() as usize - stack.top() as usize, GUARD_ZONE);
}

#[test]
fn allocate_one_mb() {
    let stack = OneMbStack::new().unwrap();
    let usable = stack.bottom() as usize - stack.limit() as usize;
    assert_eq!(usable, 1024 * 1024);
}

#[test]
fn read_write_usable_range() {
    let stack = EightMbStack::new().unwrap();
    unsafe {
        let first = stack.bottom().sub(1);
        first.write(0x1234_5678);
        assert_eq!(first.read(), 0x1234_5678);

        // the very first word above the guard zone is still usable
        let last = stack.limit();
        last.write(0x8765_4321);
        assert_eq!(last.read(), 0x8765_4321);
    }
}

#[test]
fn regions_are_disjoint() {
    let a = EightMbStack::new().unwrap();
    let b = EightMbStack::new().unwrap();
    assert!(a.bottom() <= b.top() || b.bottom() <= a.top());
}

#[test]
#[ignore = "faults the process by design"]
fn guard_zone_faults() {
    let stack = OneMbStack::new().unwrap();
    unsafe {
        let inside_guard = stack.limit().sub(1);
        inside_guard.write(1);
    }
}

#[test]
fn bottom_is_aligned() {
    let stack = EightMbStack::new().unwrap();
    assert_eq!(stack.bottom() as usize % (2 * size_of::<usize>()), 0);
}
