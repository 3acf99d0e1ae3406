// deadline.rs — Bounded calls into collaborators.
//
// The call runs on its own thread and the caller waits at most `timeout`.
// A call that overruns keeps running in the background; its result is
// dropped when it finally arrives.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// Why a bounded call produced no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallError {
    /// The deadline passed first.
    Elapsed,
    /// The call panicked.
    Panicked,
}

/// Run `f` with a deadline. A zero timeout means no deadline.
pub fn call_with_deadline<T, F>(timeout: Duration, f: F) -> Result<T, CallError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    if timeout.is_zero() {
        return Ok(f());
    }
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    match rx.recv_timeout(timeout) {
        Ok(value) => Ok(value),
        Err(RecvTimeoutError::Timeout) => Err(CallError::Elapsed),
        Err(RecvTimeoutError::Disconnected) => Err(CallError::Panicked),
    }
}
