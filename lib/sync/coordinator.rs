//! The refresh quiescence barrier.
//!
//! Every filesystem operation passes through [`RefreshCoordinator::enter_operation`] before it
//! touches the published snapshot, and a refresh passes through
//! [`RefreshCoordinator::begin_refresh`] before it publishes a new one. The two sides exclude each
//! other:
//!
//! - while a refresh is active, new operations park on a condition variable;
//! - a refresh only proceeds once every operation that entered before it has left.
//!
//! The refresh flag and the in-flight counter live behind a single mutex. Observing `Idle` and
//! incrementing the counter happen while that mutex is held, so a refresh can never conclude that
//! nothing is in flight while an operation sits between the check and the increment.
//!
//! A refresh that still has to build its snapshot first takes a [`RefreshClaim`] with
//! [`RefreshCoordinator::try_claim_refresh`]. The claim keeps other refreshes out but leaves the
//! barrier open, so operations keep running against the current snapshot during the load. Only
//! [`RefreshClaim::begin`] closes the barrier.

use std::sync::PoisonError;

use thiserror::Error;
use tracing::{debug, trace};

use super::{Condvar, Mutex, MutexGuard};

/// Whether a refresh currently holds the exclusive side of the barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshState {
    /// Operations may enter freely.
    Idle,
    /// A refresh is draining in-flight operations or publishing; new operations wait.
    Refreshing,
}

/// Errors surfaced by the barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    /// The coordinator was shut down while the caller was waiting (or before it arrived).
    #[error("the filesystem is shutting down")]
    ShuttingDown,
}

#[derive(Debug)]
struct GateState {
    refresh: RefreshState,
    /// Set from the moment a refresh is claimed until its guard is released.
    claimed: bool,
    in_flight: usize,
    shutting_down: bool,
}

/// Gates filesystem operations against wholesale snapshot replacement.
///
/// Construct one per mounted filesystem and share it by reference; there is no process-wide
/// instance.
#[derive(Debug)]
pub struct RefreshCoordinator {
    state: Mutex<GateState>,
    /// Signalled when a refresh ends or the coordinator shuts down. Operations wait here.
    released: Condvar,
    /// Signalled when the in-flight counter drops to zero. A pending refresh waits here.
    drained: Condvar,
}

impl RefreshCoordinator {
    /// Creates an idle coordinator with nothing in flight.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                refresh: RefreshState::Idle,
                claimed: false,
                in_flight: 0,
                shutting_down: false,
            }),
            released: Condvar::new(),
            drained: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a filesystem operation.
    ///
    /// Blocks while a refresh is active. The returned guard keeps the operation counted until it
    /// is dropped (or passed to [`leave_operation`](Self::leave_operation)), so every exit path of
    /// the caller releases it.
    pub fn enter_operation(&self) -> Result<OperationGuard<'_>, CoordinatorError> {
        let mut state = self.lock();
        loop {
            if state.shutting_down {
                return Err(CoordinatorError::ShuttingDown);
            }
            if state.refresh == RefreshState::Idle {
                break;
            }
            trace!("operation waiting for refresh to complete");
            state = self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.in_flight += 1;
        Ok(OperationGuard { coordinator: self })
    }

    /// Ends an operation. Equivalent to dropping the guard.
    pub fn leave_operation(&self, token: OperationGuard<'_>) {
        debug_assert!(
            std::ptr::eq(self, token.coordinator),
            "operation guard released on a different coordinator"
        );
        drop(token);
    }

    fn release_operation(&self) {
        let mut state = self.lock();
        debug_assert!(state.in_flight > 0, "in-flight counter underflow");
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.in_flight == 0 && state.refresh == RefreshState::Refreshing {
            self.drained.notify_all();
        }
    }

    /// Takes the exclusive side of the barrier.
    ///
    /// If another refresh is claimed or active this waits for it to complete first. Once this
    /// call has set the state to `Refreshing`, new operations queue, and the call returns as soon
    /// as the last operation that entered earlier has left.
    pub fn begin_refresh(&self) -> Result<RefreshGuard<'_>, CoordinatorError> {
        let mut state = self.lock();
        loop {
            if state.shutting_down {
                return Err(CoordinatorError::ShuttingDown);
            }
            if !state.claimed {
                break;
            }
            state = self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.claimed = true;
        self.drain(state)
    }

    /// Like [`begin_refresh`](Self::begin_refresh), but coalesces with a refresh that is already
    /// claimed or active: returns `Ok(None)` immediately instead of queueing behind it.
    pub fn try_begin_refresh(&self) -> Result<Option<RefreshGuard<'_>>, CoordinatorError> {
        match self.try_claim_refresh()? {
            Some(claim) => claim.begin().map(Some),
            None => Ok(None),
        }
    }

    /// Reserves the next refresh without closing the barrier.
    ///
    /// Returns `Ok(None)` if another refresh is already claimed or active. Operations keep
    /// entering while the claim is held; call [`RefreshClaim::begin`] to close the barrier.
    pub fn try_claim_refresh(&self) -> Result<Option<RefreshClaim<'_>>, CoordinatorError> {
        let mut state = self.lock();
        if state.shutting_down {
            return Err(CoordinatorError::ShuttingDown);
        }
        if state.claimed {
            debug!("refresh already in progress, coalescing");
            return Ok(None);
        }
        state.claimed = true;
        Ok(Some(RefreshClaim { coordinator: self }))
    }

    fn release_claim(&self) {
        let mut state = self.lock();
        state.claimed = false;
        self.released.notify_all();
    }

    fn drain<'a>(
        &'a self,
        mut state: MutexGuard<'a, GateState>,
    ) -> Result<RefreshGuard<'a>, CoordinatorError> {
        state.refresh = RefreshState::Refreshing;
        debug!(in_flight = state.in_flight, "refresh waiting for in-flight operations");
        while state.in_flight > 0 {
            if state.shutting_down {
                state.refresh = RefreshState::Idle;
                state.claimed = false;
                self.released.notify_all();
                return Err(CoordinatorError::ShuttingDown);
            }
            state = self
                .drained
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.shutting_down {
            state.refresh = RefreshState::Idle;
            state.claimed = false;
            self.released.notify_all();
            return Err(CoordinatorError::ShuttingDown);
        }
        Ok(RefreshGuard { coordinator: self })
    }

    /// Returns the barrier to `Idle` and wakes every queued operation. Equivalent to dropping the
    /// guard.
    pub fn complete_refresh(&self, token: RefreshGuard<'_>) {
        debug_assert!(
            std::ptr::eq(self, token.coordinator),
            "refresh guard completed on a different coordinator"
        );
        drop(token);
    }

    fn release_refresh(&self) {
        let mut state = self.lock();
        state.refresh = RefreshState::Idle;
        state.claimed = false;
        self.released.notify_all();
    }

    /// Permanently closes the barrier.
    ///
    /// Operations and refreshes that are waiting wake up with
    /// [`CoordinatorError::ShuttingDown`], and so does every later caller. Operations already in
    /// flight are unaffected and still release normally.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.shutting_down = true;
        self.released.notify_all();
        self.drained.notify_all();
    }

    /// Number of operations currently between enter and leave.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    /// Current state of the barrier.
    #[must_use]
    pub fn state(&self) -> RefreshState {
        self.lock().refresh
    }

    /// Whether a refresh is claimed, loading or holding the barrier.
    #[must_use]
    pub fn is_refresh_claimed(&self) -> bool {
        self.lock().claimed
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof that one filesystem operation is counted as in flight.
#[must_use = "dropping the guard immediately ends the operation"]
#[derive(Debug)]
pub struct OperationGuard<'a> {
    coordinator: &'a RefreshCoordinator,
}

impl OperationGuard<'_> {
    /// Ends the operation.
    pub fn leave(self) {
        drop(self);
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.release_operation();
    }
}

/// A reserved refresh that has not closed the barrier yet.
///
/// Dropping the claim gives up the refresh without ever blocking an operation.
#[must_use = "dropping the claim immediately gives up the refresh"]
#[derive(Debug)]
pub struct RefreshClaim<'a> {
    coordinator: &'a RefreshCoordinator,
}

impl<'a> RefreshClaim<'a> {
    /// Closes the barrier and waits for in-flight operations to drain.
    pub fn begin(self) -> Result<RefreshGuard<'a>, CoordinatorError> {
        let coordinator = self.coordinator;
        // The guard (or the failed drain) takes over releasing the claim.
        std::mem::forget(self);
        coordinator.drain(coordinator.lock())
    }
}

impl Drop for RefreshClaim<'_> {
    fn drop(&mut self) {
        self.coordinator.release_claim();
    }
}

/// Exclusive refresh token. While it lives no operation is in flight and none can enter.
///
/// Dropping the token without calling [`complete`](Self::complete) abandons the refresh; the
/// barrier is released either way.
#[must_use = "dropping the guard immediately ends the refresh"]
#[derive(Debug)]
pub struct RefreshGuard<'a> {
    coordinator: &'a RefreshCoordinator,
}

impl RefreshGuard<'_> {
    /// Ends the refresh and releases queued operations.
    pub fn complete(self) {
        drop(self);
    }

    pub(crate) fn coordinator(&self) -> &RefreshCoordinator {
        self.coordinator
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.release_refresh();
    }
}
