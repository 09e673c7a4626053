use crate::signal::{signal, Listener, Trigger};
use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use std::sync::Arc;

/// Execution context shared by every thread of a stage
///
/// Carries the stage name used in logs and the ambient cancellation signal.
/// Clones share the same signal; cancelling any of them cancels all.
#[derive(Debug, Clone)]
pub struct StreamContext {
    name: Arc<str>,
    done: Listener,
    canceller: Arc<Mutex<Option<Trigger>>>,
}

impl StreamContext {
    /// Create a fresh, uncancelled context
    pub fn new(name: impl Into<String>) -> Self {
        let (trigger, done) = signal();
        Self {
            name: Arc::from(name.into()),
            done,
            canceller: Arc::new(Mutex::new(Some(trigger))),
        }
    }

    /// A context with a different name sharing this context's cancellation
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            done: self.done.clone(),
            canceller: Arc::clone(&self.canceller),
        }
    }

    /// Name of the stage or rule this context belongs to
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receiver that becomes ready once the context is cancelled
    pub fn done(&self) -> &Receiver<()> {
        self.done.receiver()
    }

    /// Whether the context has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.done.is_fired()
    }

    /// Cancel the context. Idempotent.
    pub fn cancel(&self) {
        if let Some(trigger) = self.canceller.lock().take() {
            tracing::debug!(stage = %self.name, "context cancelled");
            trigger.fire();
        }
    }
}
