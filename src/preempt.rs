//! Cross-thread forced suspension.
//!
//! A foreign thread never touches a continuation's pointers. It installs a
//! rendezvous in the continuation's shared cell and blocks; the owning thread
//! notices the request at its next safe point, suspends through the same
//! capture-and-far-return path as a cooperative yield, and completes the
//! rendezvous once the snapshot exists. The rendezvous slot doubles as the
//! registry of in-flight attempts: it is created when a request is installed
//! and emptied when the request is serviced, so "is a preemption outstanding"
//! is always answerable from the slot alone.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::channel::{bounded, Sender};

/// Result of a [`force_yield`](PreemptHandle::force_yield) attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreemptOutcome {
    /// The continuation suspended and its owner's `resume` call has
    /// returned.
    YieldSuccess,
    /// The continuation was not running: not yet started, already suspended,
    /// finished, or dropped. Nothing was captured.
    NotRunning,
    /// Another preemption attempt is already outstanding. Back off and retry.
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum State {
    NotStarted = 0,
    Running = 1,
    Suspended = 2,
    Done = 3,
}

/// State shared between a continuation, its suspender and any number of
/// preemption handles.
pub(crate) struct Shared {
    state: AtomicU8,
    /// Fast-path mirror of "the rendezvous slot is occupied", checked at
    /// every safe point without taking the lock.
    pending: AtomicBool,
    rendezvous: Mutex<Option<Sender<PreemptOutcome>>>,
}

impl Shared {
    pub(crate) fn new() -> Shared {
        Shared {
            state: AtomicU8::new(State::NotStarted as u8),
            pending: AtomicBool::new(false),
            rendezvous: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> State {
        match self.state.load(Ordering::Acquire) {
            0 => State::NotStarted,
            1 => State::Running,
            2 => State::Suspended,
            3 => State::Done,
            tag => unreachable!("corrupt continuation state tag {tag}"),
        }
    }

    /// Publishes a state transition. Release ordering closes the transfer
    /// point: a foreign thread that observes the new state also observes
    /// every write the owning thread made before it.
    pub(crate) fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn preempt_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Completes an outstanding rendezvous, if any. Called by the owning
    /// thread after every transition out of `Running`, with the outcome that
    /// transition implies.
    ///
    /// Always takes the slot lock, even when nothing seems pending: the lock
    /// is what orders this against a foreign thread installing a request, so
    /// a preemptor either finds the new state or gets completed here. The
    /// lock-free `pending` flag is only a hint for safe points.
    pub(crate) fn complete_preempt(&self, outcome: PreemptOutcome) {
        let mut slot = self.rendezvous.lock().unwrap();
        if let Some(sender) = slot.take() {
            self.pending.store(false, Ordering::Release);
            // A preemptor that gave up on the channel is its own problem.
            let _ = sender.send(outcome);
        }
    }
}

/// Cloneable, sendable handle through which other threads force a running
/// continuation to suspend.
#[derive(Clone)]
pub struct PreemptHandle {
    shared: Arc<Shared>,
}

impl PreemptHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> PreemptHandle {
        PreemptHandle { shared }
    }

    /// Forces the continuation to suspend at its next safe point and blocks
    /// until it has.
    ///
    /// Succeeds only against a running continuation. There is no timeout: if
    /// the target never reaches a safe point the call never returns, which is
    /// the caller's scheduling bug to escalate, not this crate's to paper
    /// over.
    pub fn force_yield(&self) -> PreemptOutcome {
        let receiver = {
            let mut slot = self.shared.rendezvous.lock().unwrap();
            // The state read is ordered by the slot lock against the owning
            // thread's complete_preempt, so a stale Running is impossible
            // here once the owner has serviced a transition.
            if self.shared.state() != State::Running {
                return PreemptOutcome::NotRunning;
            }
            if slot.is_some() {
                return PreemptOutcome::Retry;
            }
            let (sender, receiver) = bounded(1);
            *slot = Some(sender);
            self.shared.pending.store(true, Ordering::Release);
            receiver
        };

        // The owning thread captures the snapshot before it sends, so the
        // capture is sequenced before this recv returns.
        match receiver.recv() {
            Ok(outcome) => outcome,
            // Sender dropped without completing: the continuation is gone.
            Err(_) => PreemptOutcome::NotRunning,
        }
    }

    /// True once the continuation has been resumed at least once.
    pub fn is_started(&self) -> bool {
        self.shared.state() != State::NotStarted
    }

    /// True once the continuation's routine has returned.
    pub fn is_done(&self) -> bool {
        self.shared.state() == State::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_without_pending_is_a_no_op() {
        let shared = Shared::new();
        shared.complete_preempt(PreemptOutcome::YieldSuccess);
        assert!(!shared.preempt_pending());
    }

    #[test]
    fn force_yield_refuses_non_running_states() {
        for state in [State::NotStarted, State::Suspended, State::Done] {
            let shared = Arc::new(Shared::new());
            shared.set_state(state);
            let handle = PreemptHandle::new(shared.clone());
            assert_eq!(handle.force_yield(), PreemptOutcome::NotRunning);
            assert!(!shared.preempt_pending());
        }
    }

    #[test]
    fn second_attempt_sees_retry() {
        let shared = Arc::new(Shared::new());
        shared.set_state(State::Running);

        // install a request by hand so no owner thread is needed
        let (sender, _receiver) = bounded(1);
        *shared.rendezvous.lock().unwrap() = Some(sender);
        shared.pending.store(true, Ordering::Release);

        let handle = PreemptHandle::new(shared);
        assert_eq!(handle.force_yield(), PreemptOutcome::Retry);
    }

    #[test]
    fn completion_unblocks_the_preemptor() {
        let shared = Arc::new(Shared::new());
        shared.set_state(State::Running);
        let handle = PreemptHandle::new(shared.clone());

        let preemptor = std::thread::spawn(move || handle.force_yield());
        while !shared.preempt_pending() {
            std::thread::yield_now();
        }
        shared.set_state(State::Suspended);
        shared.complete_preempt(PreemptOutcome::YieldSuccess);

        assert_eq!(preemptor.join().unwrap(), PreemptOutcome::YieldSuccess);
        assert!(!shared.preempt_pending());
    }
}
