use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use freezeframe::{Continuation, PreemptOutcome, ResumeOutcome};

#[test]
fn preempting_an_unstarted_continuation_reports_not_running() {
    let cont = Continuation::new(|_suspender| {});
    let handle = cont.preempt_handle();
    assert!(!handle.is_started());
    assert_eq!(handle.force_yield(), PreemptOutcome::NotRunning);
}

#[test]
fn preempting_a_suspended_continuation_reports_not_running() {
    let mut cont = Continuation::new(|suspender| {
        suspender.suspend();
    });
    let handle = cont.preempt_handle();

    assert_eq!(cont.resume().unwrap(), ResumeOutcome::Success);
    assert_eq!(handle.force_yield(), PreemptOutcome::NotRunning);

    assert_eq!(cont.resume().unwrap(), ResumeOutcome::Success);
    assert!(cont.is_done());
}

#[test]
fn preempting_a_done_continuation_reports_not_running() {
    let mut cont = Continuation::new(|_suspender| {});
    let handle = cont.preempt_handle();

    assert_eq!(cont.resume().unwrap(), ResumeOutcome::Success);
    assert!(handle.is_done());
    assert_eq!(handle.force_yield(), PreemptOutcome::NotRunning);
}

#[test]
fn force_yield_lands_at_the_next_safe_point() {
    let stop = Arc::new(AtomicBool::new(false));
    let preempted = Arc::new(AtomicBool::new(false));

    let stop_seen = stop.clone();
    let preempted_seen = preempted.clone();
    let mut cont = Continuation::new(move |suspender| {
        while !stop_seen.load(Ordering::SeqCst) {
            if suspender.safepoint() {
                preempted_seen.store(true, Ordering::SeqCst);
            }
            std::hint::spin_loop();
        }
    });
    let handle = cont.preempt_handle();

    let owner = thread::spawn(move || {
        while !cont.is_done() {
            cont.resume().unwrap();
        }
    });

    // The continuation alternates between running and suspended while the
    // owner keeps resuming it; keep asking until a request lands mid-run.
    let outcome = loop {
        match handle.force_yield() {
            PreemptOutcome::NotRunning => thread::yield_now(),
            other => break other,
        }
    };
    assert_eq!(outcome, PreemptOutcome::YieldSuccess);

    stop.store(true, Ordering::SeqCst);
    owner.join().unwrap();
    assert!(preempted.load(Ordering::SeqCst));
    assert!(handle.is_done());
}

#[test]
fn second_preemptor_backs_off_with_retry() {
    let entered = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));

    let entered_mark = entered.clone();
    let release_seen = release.clone();
    let mut cont = Continuation::new(move |suspender| {
        entered_mark.store(true, Ordering::SeqCst);
        // No safe point until released, so an installed request stays
        // outstanding.
        while !release_seen.load(Ordering::SeqCst) {
            std::hint::spin_loop();
        }
        suspender.safepoint();
    });
    let first = cont.preempt_handle();
    let second = cont.preempt_handle();

    let owner = thread::spawn(move || {
        assert_eq!(cont.resume().unwrap(), ResumeOutcome::Success);
        assert_eq!(cont.resume().unwrap(), ResumeOutcome::Success);
        assert!(cont.is_done());
    });

    while !entered.load(Ordering::SeqCst) {
        thread::yield_now();
    }
    let blocked = thread::spawn(move || first.force_yield());
    // Give the first preemptor ample time to install its request.
    thread::sleep(Duration::from_millis(200));

    assert_eq!(second.force_yield(), PreemptOutcome::Retry);

    release.store(true, Ordering::SeqCst);
    assert_eq!(blocked.join().unwrap(), PreemptOutcome::YieldSuccess);
    owner.join().unwrap();
}

#[test]
fn cooperative_yield_satisfies_a_pending_preemption() {
    let entered = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));

    let entered_mark = entered.clone();
    let release_seen = release.clone();
    let mut cont = Continuation::new(move |suspender| {
        entered_mark.store(true, Ordering::SeqCst);
        while !release_seen.load(Ordering::SeqCst) {
            std::hint::spin_loop();
        }
        // Suspends on its own; the waiting preemptor still got a suspended
        // continuation out of it.
        suspender.suspend();
    });
    let handle = cont.preempt_handle();

    let owner = thread::spawn(move || {
        assert_eq!(cont.resume().unwrap(), ResumeOutcome::Success);
        assert_eq!(cont.resume().unwrap(), ResumeOutcome::Success);
        assert!(cont.is_done());
    });

    while !entered.load(Ordering::SeqCst) {
        thread::yield_now();
    }
    let blocked = thread::spawn(move || handle.force_yield());
    thread::sleep(Duration::from_millis(200));

    release.store(true, Ordering::SeqCst);
    assert_eq!(blocked.join().unwrap(), PreemptOutcome::YieldSuccess);
    owner.join().unwrap();
}

#[test]
fn finishing_releases_a_pending_preemptor() {
    let entered = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));

    let entered_mark = entered.clone();
    let release_seen = release.clone();
    let mut cont = Continuation::new(move |_suspender| {
        entered_mark.store(true, Ordering::SeqCst);
        // Returns without ever reaching a safe point.
        while !release_seen.load(Ordering::SeqCst) {
            std::hint::spin_loop();
        }
    });
    let handle = cont.preempt_handle();

    let owner = thread::spawn(move || {
        assert_eq!(cont.resume().unwrap(), ResumeOutcome::Success);
        assert!(cont.is_done());
    });

    while !entered.load(Ordering::SeqCst) {
        thread::yield_now();
    }
    let blocked = thread::spawn(move || handle.force_yield());
    thread::sleep(Duration::from_millis(200));

    release.store(true, Ordering::SeqCst);
    assert_eq!(blocked.join().unwrap(), PreemptOutcome::NotRunning);
    owner.join().unwrap();
}

#[test]
fn safepoint_is_free_when_nothing_is_pending() {
    let mut cont = Continuation::new(|suspender| {
        for _ in 0..1000 {
            assert!(!suspender.safepoint());
        }
    });

    assert_eq!(cont.resume().unwrap(), ResumeOutcome::Success);
    assert!(cont.is_done());
}
