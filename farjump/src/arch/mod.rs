// Every architecture exposes the same three functions:
//
// * `init(stack, entry)` writes a pair of trampolines and the entry function
//   pointer onto a fresh stack and returns the prepared stack pointer. The
//   trampolines bound the new stack: their unwind info marks the outgoing
//   return address as undefined, so unwinding stops at the stack boundary
//   rather than chasing a saved caller context that may no longer be live.
//   Their frame-pointer chain still leads off the stack through a link slot
//   filled in by `swap_and_link_stacks`, which keeps debuggers working.
//
// * `swap_and_link_stacks(arg, new_sp, bottom)` performs the first transfer
//   onto a stack prepared by `init`. Besides doing everything `swap` does, it
//   stores the caller's stack pointer into the trampoline frame written by
//   `init`, linking the two frame-pointer chains. `bottom` must be the same
//   pointer `init` started from.
//
// * `swap(arg, new_sp)` is the transfer primitive proper. It pushes the
//   address of its own continuation point and the frame pointer onto the
//   current stack, switches the stack pointer to `new_sp`, pops the target's
//   frame pointer and continuation address, and jumps. `arg` travels in the
//   first argument register and comes out as the first element of the
//   returned pair on the other side; the second element is the stack pointer
//   the leaving side saved, which is what a later `swap` back must target.
//
// The asm blocks mark every register as clobbered. That forces the compiler
// to treat the surrounding frame as opaque: everything live is spilled before
// the switch and reloaded after the far return lands, and the frame itself
// can never be elided, which is exactly the guarantee a non-local return into
// that frame requires.

#[cfg(all(target_family = "unix", target_arch = "x86_64"))]
mod unix_x64;
#[cfg(all(target_family = "unix", target_arch = "x86_64"))]
pub use self::unix_x64::*;

#[cfg(all(target_family = "unix", target_arch = "aarch64"))]
mod unix_aarch64;
#[cfg(all(target_family = "unix", target_arch = "aarch64"))]
pub use self::unix_aarch64::*;

#[cfg(not(all(target_family = "unix", any(target_arch = "x86_64", target_arch = "aarch64"))))]
compile_error!("farjump only supports x86_64 and aarch64 on unix");
