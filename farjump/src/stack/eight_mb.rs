use std::io::Error;
use std::mem::size_of;

use super::{map_stack, unmap_stack, Stack, GUARD_ZONE};

/// An 8 Mb stack region with guard pages at the overflow end.
///
/// 8 Mb matches the default native thread stack on most unix systems, so a
/// continuation can run anything a regular thread could. The mapping is
/// created with `MAP_NORESERVE`; physical pages are only committed as frames
/// actually touch them.
pub struct EightMbStack(*mut usize);

unsafe impl Send for EightMbStack {}

const EIGHT_MB: usize = 8 * 1024 * 1024;

impl Stack for EightMbStack {
    fn new() -> Result<Self, Error> {
        map_stack(EIGHT_MB + GUARD_ZONE).map(Self)
    }

    fn bottom(&self) -> *mut usize {
        unsafe { self.0.add((EIGHT_MB + GUARD_ZONE) / size_of::<usize>()) }
    }

    fn top(&self) -> *mut usize {
        self.0
    }

    fn limit(&self) -> *mut usize {
        unsafe { self.0.add(GUARD_ZONE / size_of::<usize>()) }
    }
}

impl Drop for EightMbStack {
    fn drop(&mut self) {
        unmap_stack(self.0, EIGHT_MB + GUARD_ZONE);
    }
}
