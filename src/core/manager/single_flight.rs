// src/core/manager/single_flight.rs

//! A guard that lets exactly one operation run at a time while every concurrent
//! caller awaits its shared result.

use crate::core::GateError;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

type Flight<T> = Shared<BoxFuture<'static, Result<T, GateError>>>;

/// Deduplicates concurrent runs of the same operation.
///
/// The first caller (the leader) starts the operation on its own task; callers
/// arriving while it is pending (followers) clone and await the same shared future.
/// The task clears the slot itself when the operation resolves, so the next call
/// starts afresh even if every caller was cancelled in the meantime.
pub struct SingleFlight<T: Clone + Send + Sync + 'static> {
    pending: Arc<Mutex<Option<(u64, Flight<T>)>>>,
    next_id: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    /// Joins the pending operation, or starts one with `start` if none is pending.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn run<F>(&self, start: F) -> Result<T, GateError>
    where
        F: FnOnce() -> BoxFuture<'static, Result<T, GateError>>,
    {
        let flight = {
            let mut pending = self.pending.lock();
            match pending.as_ref() {
                Some((_, flight)) => flight.clone(),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let slot = self.pending.clone();
                    let operation = start();
                    let task = tokio::spawn(async move {
                        let result = operation.await;
                        // Only clear the slot if it still holds this flight.
                        let mut pending = slot.lock();
                        if pending.as_ref().is_some_and(|(current, _)| *current == id) {
                            *pending = None;
                        }
                        result
                    });
                    let flight = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(e) => Err(e.into()),
                        }
                    }
                    .boxed()
                    .shared();
                    *pending = Some((id, flight.clone()));
                    flight
                }
            }
        };

        flight.await
    }

    /// True while an operation is pending.
    pub fn in_flight(&self) -> bool {
        self.pending.lock().is_some()
    }
}
