//! Transaction id allocation

use parking_lot::Mutex;
use zredo_core::TransactionId;

/// Allocates [`TransactionId`]s for one log stream.
///
/// Ids are `(seed second, counter)`. The counter starts at 1 and the
/// generator reseeds from the clock when it reaches `i32::MAX`.
#[derive(Debug)]
pub struct TxnIdGenerator {
    state: Mutex<(i32, i32)>,
}

impl Default for TxnIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TxnIdGenerator {
    /// Seed from the current wall-clock second
    pub fn new() -> Self {
        Self::with_seed(current_second(), 1)
    }

    /// Start from an explicit seed and counter
    pub fn with_seed(time: i32, counter: i32) -> Self {
        TxnIdGenerator {
            state: Mutex::new((time, counter.max(1))),
        }
    }

    /// Allocate the next id
    pub fn next(&self) -> TransactionId {
        let mut state = self.state.lock();
        let id = TransactionId::new(state.0, state.1);
        if state.1 == i32::MAX {
            // Never hand out the same second twice after a wrap.
            state.0 = current_second().max(state.0.saturating_add(1));
            state.1 = 1;
        } else {
            state.1 += 1;
        }
        id
    }

    /// Make every later id sort after `seen` (ids recovered from the log).
    pub fn observe(&self, seen: TransactionId) {
        let mut state = self.state.lock();
        if TransactionId::new(state.0, state.1) > seen {
            return;
        }
        if seen.counter == i32::MAX {
            *state = (seen.time.saturating_add(1), 1);
        } else {
            *state = (seen.time, seen.counter + 1);
        }
    }
}

fn current_second() -> i32 {
    let secs = zredo_core::now_millis() / 1000;
    i32::try_from(secs).unwrap_or(i32::MAX)
}
