//! Heap storage for the live frames of a suspended continuation.

use std::ops::Range;
use std::ptr;

use crate::Error;

// Failure injection for tests: captures longer than the cap report
// allocation failure before the region is touched.
#[cfg(test)]
thread_local! {
    pub(crate) static CAPTURE_CAP: std::cell::Cell<Option<usize>> =
        const { std::cell::Cell::new(None) };
}

/// A byte-for-byte copy of the range `[origin, origin + len)` of a
/// continuation's stack, taken at a suspension point.
///
/// The snapshot is private to the continuation that produced it. Restoring
/// writes the bytes back to the exact addresses they came from and consumes
/// the snapshot; the length is recomputed at every capture because the live
/// range differs from one suspension to the next.
pub struct StackSnapshot {
    buf: Box<[u8]>,
    origin: *mut u8,
}

// A snapshot travels between worker threads together with its suspended
// continuation. The origin pointer is only dereferenced by whoever holds
// execution rights for that continuation.
unsafe impl Send for StackSnapshot {}

impl StackSnapshot {
    /// Copies `[low, high)` off the stack. Both bounds must lie inside
    /// `region`, the continuation's allocated stack; anything else means the
    /// engine lost track of its own pointers and is unrecoverable.
    ///
    /// In debug builds the captured range is poisoned afterwards, so a resume
    /// that forgets to restore reads garbage instead of stale frames.
    pub(crate) fn capture(
        low: *mut u8,
        high: *mut u8,
        region: Range<*const u8>,
    ) -> Result<StackSnapshot, Error> {
        assert!(
            region.start <= low as *const u8 && low <= high && (high as *const u8) <= region.end,
            "captured range {:?}..{:?} escapes the continuation stack {:?}",
            low,
            high,
            region,
        );

        let len = high as usize - low as usize;

        #[cfg(test)]
        if CAPTURE_CAP.with(|cap| cap.get().is_some_and(|cap| len > cap)) {
            return Err(Error::SnapshotAllocation { len });
        }

        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| Error::SnapshotAllocation { len })?;

        unsafe {
            ptr::copy_nonoverlapping(low, buf.as_mut_ptr(), len);
            buf.set_len(len);
            #[cfg(debug_assertions)]
            ptr::write_bytes(low, 0xaa, len);
        }

        Ok(StackSnapshot {
            buf: buf.into_boxed_slice(),
            origin: low,
        })
    }

    /// Writes the snapshot back to the addresses it was captured from.
    pub(crate) fn restore(self) {
        unsafe {
            ptr::copy_nonoverlapping(self.buf.as_ptr(), self.origin, self.buf.len());
        }
    }

    /// The lowest address of the captured range.
    pub fn origin(&self) -> *const u8 {
        self.origin
    }

    /// Captured length in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
