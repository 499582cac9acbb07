//! One-shot commit permission for chained child records

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// One-shot signal a chained child waits on before it may commit.
///
/// Starts closed; [`CommitGate::allow`] opens it for good and wakes every
/// waiter.
#[derive(Debug, Default)]
pub struct CommitGate {
    allowed: Mutex<bool>,
    cond: Condvar,
}

impl CommitGate {
    /// Closed gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the gate. Returns false if it was already open.
    pub fn allow(&self) -> bool {
        let mut allowed = self.allowed.lock();
        if *allowed {
            return false;
        }
        *allowed = true;
        self.cond.notify_all();
        true
    }

    /// True once the gate is open
    pub fn is_allowed(&self) -> bool {
        *self.allowed.lock()
    }

    /// Block until the gate opens or `timeout` elapses. Returns the state.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut allowed = self.allowed.lock();
        if !*allowed {
            let _ = self
                .cond
                .wait_while_for(&mut allowed, |allowed| !*allowed, timeout);
        }
        *allowed
    }
}
