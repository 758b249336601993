use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use crate::traits::{CapturePredicate, ResponseHook};

/// Append-only buffer of captured payloads, in arrival order.
///
/// Written by the session's response hook, read by the engine at poll
/// checkpoints. Readers only ever need the length and a tail slice.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    payloads: Arc<Mutex<Vec<Value>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, payload: Value) {
        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload);
    }

    pub fn len(&self) -> usize {
        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone every payload from index `start` onwards.
    pub fn tail(&self, start: usize) -> Vec<Value> {
        let payloads = self.payloads.lock().unwrap_or_else(PoisonError::into_inner);
        payloads.get(start..).map(<[Value]>::to_vec).unwrap_or_default()
    }

    /// Build a response hook that buffers every payload accepted by `predicate`.
    ///
    /// A panicking predicate counts as a rejection.
    pub fn hook(&self, predicate: CapturePredicate) -> ResponseHook {
        let buffer = self.clone();
        Arc::new(move |url: &str, body: &Value| {
            let accepted = catch_unwind(AssertUnwindSafe(|| predicate(url, body))).unwrap_or(false);
            if accepted {
                buffer.push(body.clone());
            } else {
                tracing::trace!(%url, "Response ignored");
            }
        })
    }
}
