use std::io::Error;
use std::mem::size_of;

use super::{map_stack, unmap_stack, Stack, GUARD_ZONE};

/// A 1 Mb stack region with guard pages at the overflow end.
///
/// The small sibling of [`EightMbStack`](super::EightMbStack), for workloads
/// that keep many suspended continuations around at once.
pub struct OneMbStack(*mut usize);

unsafe impl Send for OneMbStack {}

const ONE_MB: usize = 1024 * 1024;

impl Stack for OneMbStack {
    fn new() -> Result<Self, Error> {
        map_stack(ONE_MB + GUARD_ZONE).map(Self)
    }

    fn bottom(&self) -> *mut usize {
        unsafe { self.0.add((ONE_MB + GUARD_ZONE) / size_of::<usize>()) }
    }

    fn top(&self) -> *mut usize {
        self.0
    }

    fn limit(&self) -> *mut usize {
        unsafe { self.0.add(GUARD_ZONE / size_of::<usize>()) }
    }
}

impl Drop for OneMbStack {
    fn drop(&mut self) {
        unmap_stack(self.0, ONE_MB + GUARD_ZONE);
    }
}
