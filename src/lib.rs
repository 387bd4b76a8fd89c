//! Freezeframe provides stackful continuations: units of execution that own a
//! dedicated stack, suspend themselves mid-call-chain, park their live frames
//! in a heap snapshot, and resume later exactly where they left off. A
//! running continuation can also be forced to suspend from another thread
//! through a [`PreemptHandle`].
//!
//! It consists of two layers:
//! 1. The [farjump] crate, which switches between stacks and performs the far
//!    return back into a suspended frame.
//! 2. The engine in this crate: the continuation state machine, [stack
//!    snapshots](StackSnapshot), the [preemption rendezvous](PreemptHandle)
//!    and the [overflow-guard bookkeeping](guard).
//!
//! ## Example
//! ```
//! use freezeframe::{Continuation, ResumeOutcome};
//! use std::sync::atomic::{AtomicI32, Ordering};
//! use std::sync::Arc;
//!
//! let counter = Arc::new(AtomicI32::new(0));
//! let seen = counter.clone();
//! let mut cont = Continuation::new(move |suspender| {
//!     seen.store(1, Ordering::SeqCst);
//!     let status = suspender.suspend();
//!     assert_eq!(status, 0);
//!     seen.store(2, Ordering::SeqCst);
//! });
//!
//! assert!(!cont.is_started());
//! assert_eq!(cont.resume().unwrap(), ResumeOutcome::Success);
//! assert_eq!(counter.load(Ordering::SeqCst), 1);
//! assert_eq!(cont.resume().unwrap(), ResumeOutcome::Success);
//! assert!(cont.is_done());
//! assert_eq!(cont.resume().unwrap(), ResumeOutcome::AlreadyDone);
//! ```

pub mod guard;
mod preempt;
mod snapshot;

pub use preempt::{PreemptHandle, PreemptOutcome};
pub use snapshot::StackSnapshot;

use std::any::Any;
use std::cell::Cell;
use std::io;
use std::mem::ManuallyDrop;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use farjump::stack::{EightMbStack, Stack};

use crate::guard::GuardState;
use crate::preempt::{Shared, State};

/// Resource failures the engine reports to the resumer. Contract violations
/// (resuming through a corrupted state, pointers escaping the stack region)
/// are panics instead: they mean a scheduling bug, and limping on would
/// execute on garbage frames.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The dedicated stack region for a first resume could not be mapped.
    #[error("failed to allocate continuation stack")]
    StackAllocation(#[source] io::Error),
    /// The heap buffer for a suspension's snapshot could not be allocated.
    /// The frames are still intact on the continuation's own stack; the next
    /// resume picks them up from there.
    #[error("failed to allocate {len} byte stack snapshot")]
    SnapshotAllocation { len: usize },
}

/// What a [`Continuation::resume`] call observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// The continuation ran and either suspended again or finished.
    Success,
    /// The routine already returned; nothing was executed.
    AlreadyDone,
    /// The continuation is being executed right now. Refused without touching
    /// any state.
    AlreadyRunning,
}

// Codes travelling into the continuation through the transfer argument.
// Anything that is not a sentinel arrives at the suspension point as a status
// code.
const CODE_RESUME: usize = 0;
const CODE_UNWIND: usize = usize::MAX;

// What a suspension point hands back to the resumer: a pointer to this enum,
// living on the continuation's stack, crosses the transfer.
enum Passback {
    // Cooperative suspension through Suspender::suspend.
    Yielded,
    // Forced suspension at a Suspender::safepoint.
    Preempted,
    // The routine returned normally.
    Finished,
    // The routine panicked; the unwind continues on the resumer's side.
    Panicked(Box<dyn Any + Send + 'static>),
}

// Unwind payload injected when a suspended continuation is dropped.
struct UnwoundByDrop;

struct EntryPayload {
    target: Box<dyn FnOnce(&Suspender) + Send + 'static>,
    shared: Arc<Shared>,
}

// First function on every continuation stack, invoked through the trampolines
// farjump::init wrote there. Reads its payload off the resumer's frame, which
// stays alive for as long as the continuation runs, then executes the target.
// The final switch_out never comes back: once the resumer sees Finished or
// Panicked it refuses further transfers.
unsafe extern "C" fn continuation_entry(payload: usize, resumer_sp: *mut usize) {
    let EntryPayload { target, shared } = ptr::read(payload as *const EntryPayload);
    let suspender = Suspender {
        resumer_sp: Cell::new(resumer_sp),
        shared,
    };

    // Unwinding across a stack switch is undefined; catch here and carry the
    // payload over by hand.
    match catch_unwind(AssertUnwindSafe(|| (target)(&suspender))) {
        Ok(()) => suspender.switch_out(Passback::Finished),
        Err(panic) => suspender.switch_out(Passback::Panicked(panic)),
    };
}

/// A suspendable unit of execution bound to one routine.
///
/// No stack is reserved at creation; the first [`resume`](Self::resume) maps
/// the dedicated region, and the region stays at the same addresses until the
/// continuation finishes or is dropped. While suspended, the live frames are
/// held in an owned [`StackSnapshot`] and written back before every resume.
pub struct Continuation {
    target: Option<Box<dyn FnOnce(&Suspender) + Send + 'static>>,
    stack: Option<EightMbStack>,
    /// Saved context to transfer to, present exactly while suspended.
    resume_sp: Option<NonNull<usize>>,
    /// Boundary of the continuation's first frame, fixed at first start.
    bottom_sp: *mut u8,
    snapshot: Option<StackSnapshot>,
    /// Last-known overflow-check configuration, swapped in around transfers.
    guard_state: GuardState,
    shared: Arc<Shared>,
}

// The continuation migrates between worker threads while suspended. The
// routine and everything it captures are Send, and exactly one thread at a
// time can run it, which `resume(&mut self)` plus the Running tag enforce.
unsafe impl Send for Continuation {}

impl Continuation {
    /// Creates a not-yet-started continuation around `target`. The routine
    /// must be `Send`: a suspended continuation can migrate to another thread
    /// and run the rest of the routine there.
    pub fn new<F>(target: F) -> Continuation
    where
        F: FnOnce(&Suspender) + Send + 'static,
    {
        Continuation {
            target: Some(Box::new(target)),
            stack: None,
            resume_sp: None,
            bottom_sp: ptr::null_mut(),
            snapshot: None,
            guard_state: GuardState::host(),
            shared: Arc::new(Shared::new()),
        }
    }

    /// Runs the continuation until it suspends or finishes.
    ///
    /// The suspended routine observes status code `0` from this call. All
    /// effects of the slice that ran, including its snapshot, are visible
    /// before this returns.
    pub fn resume(&mut self) -> Result<ResumeOutcome, Error> {
        match self.shared.state() {
            State::Done => return Ok(ResumeOutcome::AlreadyDone),
            State::Running => return Ok(ResumeOutcome::AlreadyRunning),
            State::NotStarted => return self.start(),
            State::Suspended => {}
        }

        let sp = self
            .resume_sp
            .expect("suspended continuation lost its context");
        if let Some(snapshot) = self.snapshot.take() {
            assert!(
                self.guard_state.admits(snapshot.origin(), snapshot.len()),
                "snapshot no longer fits its stack region"
            );
            snapshot.restore();
        }

        self.shared.set_state(State::Running);
        let caller_guard = guard::install(self.guard_state);
        let (data, cont_sp) = unsafe { farjump::swap(CODE_RESUME, sp.as_ptr()) };
        self.guard_state = guard::install(caller_guard);

        self.absorb_passback(data, cont_sp)
    }

    // First resume: map the region, lay out the entry trampolines, transfer.
    fn start(&mut self) -> Result<ResumeOutcome, Error> {
        let stack = EightMbStack::new().map_err(Error::StackAllocation)?;
        let sp = unsafe { farjump::init(&stack, continuation_entry) };

        self.bottom_sp = stack.bottom() as *mut u8;
        self.guard_state = GuardState::for_region(stack.limit() as *const u8, self.bottom_sp);

        let payload = ManuallyDrop::new(EntryPayload {
            target: self
                .target
                .take()
                .expect("not-started continuation has no target"),
            shared: self.shared.clone(),
        });

        self.shared.set_state(State::Running);
        let caller_guard = guard::install(self.guard_state);
        let (data, cont_sp) = unsafe {
            farjump::swap_and_link_stacks(
                &payload as *const ManuallyDrop<EntryPayload> as usize,
                sp,
                stack.bottom(),
            )
        };
        self.guard_state = guard::install(caller_guard);

        self.stack = Some(stack);
        self.absorb_passback(data, cont_sp)
    }

    // The far return landed back here: record what the continuation did.
    fn absorb_passback(
        &mut self,
        data: usize,
        cont_sp: *mut usize,
    ) -> Result<ResumeOutcome, Error> {
        let passback = unsafe { ptr::read(data as *const Passback) };
        match passback {
            Passback::Yielded | Passback::Preempted => {
                self.resume_sp =
                    Some(NonNull::new(cont_sp).expect("suspension returned a null context"));

                let stack = self
                    .stack
                    .as_ref()
                    .expect("suspended without a stack region");
                let region = stack.limit() as *const u8..stack.bottom() as *const u8;
                let captured = StackSnapshot::capture(cont_sp as *mut u8, self.bottom_sp, region);

                // Suspended either way; a waiting preemptor got what it asked
                // for.
                self.shared.set_state(State::Suspended);
                self.shared.complete_preempt(PreemptOutcome::YieldSuccess);

                match captured {
                    Ok(snapshot) => {
                        self.snapshot = Some(snapshot);
                        Ok(ResumeOutcome::Success)
                    }
                    // Frames stay live on the dedicated region; the next
                    // resume skips restoration.
                    Err(error) => Err(error),
                }
            }
            Passback::Finished => {
                self.finish();
                Ok(ResumeOutcome::Success)
            }
            Passback::Panicked(panic) => {
                self.finish();
                resume_unwind(panic)
            }
        }
    }

    // Terminal: clear every pointer and release the region. Irreversible.
    fn finish(&mut self) {
        self.resume_sp = None;
        self.bottom_sp = ptr::null_mut();
        self.snapshot = None;
        self.guard_state = GuardState::host();
        self.shared.set_state(State::Done);
        self.shared.complete_preempt(PreemptOutcome::NotRunning);
        self.stack = None;
    }

    /// True once the continuation has been resumed at least once, including
    /// after it finishes.
    pub fn is_started(&self) -> bool {
        self.shared.state() != State::NotStarted
    }

    /// True once the routine has returned. A done continuation refuses every
    /// further transition.
    pub fn is_done(&self) -> bool {
        self.shared.state() == State::Done
    }

    /// A handle other threads can use to force this continuation to suspend
    /// at its next safe point.
    pub fn preempt_handle(&self) -> PreemptHandle {
        PreemptHandle::new(self.shared.clone())
    }
}

impl Drop for Continuation {
    fn drop(&mut self) {
        // A suspended continuation still has live frames; transfer in one
        // last time with the unwind code so their destructors run.
        if self.shared.state() == State::Suspended {
            if let Some(snapshot) = self.snapshot.take() {
                snapshot.restore();
            }
            let sp = self
                .resume_sp
                .expect("suspended continuation lost its context");

            let caller_guard = guard::install(self.guard_state);
            unsafe {
                let (data, _sp) = farjump::swap(CODE_UNWIND, sp.as_ptr());
                // The unwind surfaced as a Passback; drop its payload here
                // instead of rethrowing.
                let _ = ptr::read(data as *const Passback);
            }
            self.guard_state = guard::install(caller_guard);
        }

        self.shared.set_state(State::Done);
        self.shared.complete_preempt(PreemptOutcome::NotRunning);
    }
}

/// Capability to suspend, handed to the routine. Only code running inside the
/// continuation can hold one, which is what makes [`suspend`](Self::suspend)
/// "callable only from within".
pub struct Suspender {
    /// Context of whoever resumed us, updated at every switch back in.
    resumer_sp: Cell<*mut usize>,
    shared: Arc<Shared>,
}

impl Suspender {
    /// Suspends the continuation; the resumer's `resume` call returns
    /// [`ResumeOutcome::Success`]. Once something resumes the continuation
    /// again, `suspend` returns the status code it passed (`0` for a normal
    /// resume).
    pub fn suspend(&self) -> i32 {
        self.switch_out(Passback::Yielded)
    }

    /// A cooperative safe point. Cheap when nothing is pending. If a
    /// [`force_yield`](PreemptHandle::force_yield) is waiting, suspends here
    /// exactly like [`suspend`](Self::suspend) and returns `true` once the
    /// continuation is resumed again.
    pub fn safepoint(&self) -> bool {
        if !self.shared.preempt_pending() {
            return false;
        }
        self.switch_out(Passback::Preempted);
        true
    }

    // Capture point of every suspension: far-return to the resumer, and on
    // the way back in deliver the code the resumer passed. The frame of this
    // function is the lowest one the snapshot preserves.
    fn switch_out(&self, out: Passback) -> i32 {
        let out = ManuallyDrop::new(out);
        let (data, resumer_sp) = unsafe {
            farjump::swap(
                &out as *const ManuallyDrop<Passback> as usize,
                self.resumer_sp.get(),
            )
        };

        // Record where to far-return next before anything can unwind.
        self.resumer_sp.set(resumer_sp);

        if data == CODE_UNWIND {
            resume_unwind(Box::new(UnwoundByDrop));
        }
        data as i32
    }
}
