//! Overflow-guard bookkeeping for the currently active stack segment.
//!
//! Guard bounds are a property of the physical memory region that is
//! executing right now, not of the continuation that logically owns it. Every
//! stack switch therefore swaps the active configuration: the target stack's
//! bounds go in before control transfers, and the source's bounds come back
//! out after the far return lands. The engine keeps each continuation's
//! last-known configuration in the continuation itself and threads it through
//! [`install`] around every transfer.

use std::cell::Cell;
use std::sync::atomic::{fence, Ordering};

/// Bounds-check configuration for one stack segment.
///
/// A null limit means checks are disabled, which is the only sound choice for
/// the host thread stack whose bounds the engine never learns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardState {
    limit: *const u8,
    bottom: *const u8,
}

impl GuardState {
    /// Configuration for the native thread stack.
    pub fn host() -> GuardState {
        GuardState {
            limit: std::ptr::null(),
            bottom: std::ptr::null(),
        }
    }

    pub(crate) fn for_region(limit: *const u8, bottom: *const u8) -> GuardState {
        debug_assert!(limit < bottom);
        GuardState { limit, bottom }
    }

    /// True when `[low, low + len)` lies inside the guarded segment, i.e. a
    /// write of `len` bytes at `low` cannot run into the guard zone. Always
    /// true for the host configuration.
    pub fn admits(&self, low: *const u8, len: usize) -> bool {
        if self.limit.is_null() {
            return true;
        }
        let low = low as usize;
        low >= self.limit as usize
            && low.checked_add(len).is_some_and(|high| high <= self.bottom as usize)
    }
}

thread_local! {
    static ACTIVE: Cell<GuardState> = const { Cell::new(GuardState {
        limit: std::ptr::null(),
        bottom: std::ptr::null(),
    }) };
}

/// Makes `state` the active configuration of this thread and returns the one
/// it replaced. The fence orders the swap before any later code that might
/// trip a bounds check on the new segment.
pub fn install(state: GuardState) -> GuardState {
    let previous = ACTIVE.with(|active| active.replace(state));
    fence(Ordering::Release);
    previous
}

/// The configuration currently in force on this thread.
pub fn active() -> GuardState {
    ACTIVE.with(|active| active.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_admits_everything() {
        let host = GuardState::host();
        assert!(host.admits(0x1000 as *const u8, usize::MAX / 2));
    }

    #[test]
    fn region_bounds_are_enforced() {
        let base = 0x10_0000 as *const u8;
        let state = GuardState::for_region(base, unsafe { base.add(4096) });

        assert!(state.admits(base, 4096));
        assert!(state.admits(unsafe { base.add(1024) }, 1024));
        assert!(!state.admits(unsafe { base.sub(1) }, 16));
        assert!(!state.admits(base, 4097));
        assert!(!state.admits(unsafe { base.add(4096) }, 1));
    }

    #[test]
    fn install_swaps_and_returns_previous() {
        let before = active();
        let base = 0x20_0000 as *const u8;
        let state = GuardState::for_region(base, unsafe { base.add(8192) });

        let previous = install(state);
        assert_eq!(previous, before);
        assert_eq!(active(), state);

        let swapped_out = install(previous);
        assert_eq!(swapped_out, state);
    }
}
