//! Farjump is the control-transfer layer of the freezeframe continuation
//! engine. It knows how to do exactly two things:
//!
//! 1. Allocate dedicated, address-stable [stack regions](stack) with guard
//!    pages at their overflow end.
//! 2. Transfer execution between such a region and the caller's native stack,
//!    in both directions, through the [`init`]/[`swap_and_link_stacks`]/
//!    [`swap`] primitives.
//!
//! A transfer saves the caller's resumption context (return address and frame
//! pointer) on the stack it is leaving and hands back the peer's saved stack
//! pointer, so a later transfer to that pointer behaves like a far return:
//! control re-enters the middle of the earlier call as if it had returned
//! normally. Unwind info deliberately ends at the boundary between the two
//! stacks; the frame-pointer chain is linked across it for debuggers.
//! Everything above this layer (suspension state, stack snapshots,
//! preemption) lives in the `freezeframe` crate.
//!
//! All three primitives are wildly unsafe on their own. The contract is that
//! a stack pointer handed out by one of them is transferred to exactly once,
//! by a caller that holds exclusive execution rights over that stack.

mod arch;
pub mod stack;

pub use arch::{init, swap, swap_and_link_stacks};
