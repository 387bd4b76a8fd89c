mod eight_mb;
mod one_mb;

pub use eight_mb::EightMbStack;
pub use one_mb::OneMbStack;

use std::io::Error;
use std::ptr;

/// A dedicated stack region for one continuation.
///
/// The region never moves for the lifetime of the value: suspended frames are
/// restored to the exact addresses they were captured from, so the backing
/// memory must stay put.
pub trait Stack: Sized {
    /// Allocates a new stack region.
    fn new() -> Result<Self, Error>;

    /// The highest address of the region. The first frame pushed on this
    /// stack lives directly below it.
    fn bottom(&self) -> *mut usize;

    /// The lowest address of the mapping, including the guard zone.
    fn top(&self) -> *mut usize;

    /// The lowest usable address. Everything between [top](Stack::top) and
    /// here is guard pages; touching them faults.
    fn limit(&self) -> *mut usize;
}

/// Size of the faulting zone at the overflow end of every stack.
pub const GUARD_ZONE: usize = 4 * 4096;

// mmap with MAP_NORESERVE so a large mapping costs only virtual memory, then
// turn the low end into guard pages.
fn map_stack(total_size: usize) -> Result<*mut usize, Error> {
    unsafe {
        let ptr = libc::mmap(
            ptr::null_mut(),
            total_size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANON | libc::MAP_NORESERVE,
            -1,
            0,
        );
        if ptr == libc::MAP_FAILED {
            return Err(Error::last_os_error());
        }
        if libc::mprotect(ptr, GUARD_ZONE, libc::PROT_NONE) != 0 {
            let error = Error::last_os_error();
            libc::munmap(ptr, total_size);
            return Err(error);
        }
        Ok(ptr as *mut usize)
    }
}

fn unmap_stack(ptr: *mut usize, total_size: usize) {
    let result = unsafe { libc::munmap(ptr as *mut libc::c_void, total_size) };
    debug_assert_eq!(result, 0);
}
