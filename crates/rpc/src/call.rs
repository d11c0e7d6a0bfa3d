//! Future handles for outstanding invocations.
//!
//! A [`Call`] is the caller's half of a single-slot promise: it resolves to
//! exactly one terminal state, success or error. The producing half is a
//! [`Completer`], which is consumed on delivery so a call can never complete
//! twice. Delivering never blocks, even when nobody is waiting, which allows
//! fire-and-forget usage where the caller discards the `Call`.

use crate::error::{ConnectionError, Result};
use tokio::sync::oneshot;

/// Handle to one outstanding or completed invocation.
pub struct Call<T> {
    seq: u64,
    service_method: String,
    rx: oneshot::Receiver<Result<T>>,
}

/// Producing half of a [`Call`]; satisfied exactly once.
pub struct Completer<T> {
    tx: oneshot::Sender<Result<T>>,
}

/// Create a linked call/completer pair.
pub fn call_pair<T>(seq: u64, service_method: &str) -> (Call<T>, Completer<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Call {
            seq,
            service_method: service_method.to_string(),
            rx,
        },
        Completer { tx },
    )
}

impl<T> Call<T> {
    /// Sequence number assigned to this call; 0 for local dispatch.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// The "Service.Method" address this call targets.
    pub fn service_method(&self) -> &str {
        &self.service_method
    }

    /// Block until the call resolves.
    ///
    /// There is no timeout: a call waits indefinitely for either a matching
    /// response or a disconnect-triggered failure.
    ///
    /// # Errors
    ///
    /// Returns the call's error, or [`ConnectionError::Disconnected`] if the
    /// producing side vanished without delivering.
    pub async fn wait(self) -> Result<T> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Disconnected.into()),
        }
    }
}

impl<T> Completer<T> {
    /// Deliver the terminal state. Never blocks; a dropped waiter is fine.
    pub fn complete(self, result: Result<T>) {
        let _ = self.tx.send(result);
    }
}
