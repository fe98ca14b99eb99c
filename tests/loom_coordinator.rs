//! Model-checks the refresh barrier. Run with
//! `RUSTFLAGS="--cfg loom" cargo test --release --test loom_coordinator`.
#![cfg(loom)]
#![allow(clippy::unwrap_used, missing_docs)]

use loom::sync::Arc;
use loom::sync::atomic::{AtomicUsize, Ordering};
use loom::thread;

use dbfs::sync::{CoordinatorError, RefreshCoordinator, RefreshState};

#[test]
fn refresh_never_overlaps_an_operation() {
    loom::model(|| {
        let c = Arc::new(RefreshCoordinator::new());
        // Number of parties currently inside their critical section.
        let inside = Arc::new(AtomicUsize::new(0));

        let op = {
            let c = Arc::clone(&c);
            let inside = Arc::clone(&inside);
            thread::spawn(move || {
                let _op = c.enter_operation().unwrap();
                inside.fetch_add(1, Ordering::SeqCst);
                inside.fetch_sub(1, Ordering::SeqCst);
            })
        };

        let gate = c.begin_refresh().unwrap();
        assert_eq!(inside.load(Ordering::SeqCst), 0);
        assert_eq!(c.in_flight(), 0);
        gate.complete();

        op.join().unwrap();
        assert_eq!(c.in_flight(), 0);
        assert_eq!(c.state(), RefreshState::Idle);
    });
}

#[test]
fn concurrent_try_begin_admits_one() {
    loom::model(|| {
        let c = Arc::new(RefreshCoordinator::new());
        let won = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let c = Arc::clone(&c);
                let won = Arc::clone(&won);
                thread::spawn(move || {
                    if let Some(gate) = c.try_begin_refresh().unwrap() {
                        assert_eq!(won.fetch_add(1, Ordering::SeqCst), 0);
                        won.fetch_sub(1, Ordering::SeqCst);
                        gate.complete();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(c.state(), RefreshState::Idle);
    });
}

#[test]
fn shutdown_releases_waiting_operation() {
    loom::model(|| {
        let c = Arc::new(RefreshCoordinator::new());
        let gate = c.begin_refresh().unwrap();

        let op = {
            let c = Arc::clone(&c);
            thread::spawn(move || c.enter_operation().map(|_| ()))
        };

        c.shutdown();
        assert_eq!(op.join().unwrap(), Err(CoordinatorError::ShuttingDown));
        drop(gate);
    });
}
