use crate::error::{PipelineError, Result};
use crate::signal::{signal, Listener, Trigger};
use crossbeam::channel::{self, select, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Bounded blocking queue feeding a node
///
/// Any number of producers may push. Exactly one consumer, the stage
/// distributor, may claim the read side. Once that reader is dropped the
/// queue is closed and pushes fail with [`PipelineError::QueueClosed`].
#[derive(Debug)]
pub struct InputQueue<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    capacity: usize,
    /// Handed to the first reader; taken at most once
    reader_gone: Arc<Mutex<Option<Trigger>>>,
    closed: Listener,
    block_count: Arc<AtomicU64>,
}

impl<T> Clone for InputQueue<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            capacity: self.capacity,
            reader_gone: Arc::clone(&self.reader_gone),
            closed: self.closed.clone(),
            block_count: Arc::clone(&self.block_count),
        }
    }
}

/// The claimed read side of an [`InputQueue`]. Dropping it closes the queue.
#[derive(Debug)]
pub(crate) struct QueueReader<T> {
    receiver: Receiver<T>,
    _gone: Trigger,
}

impl<T> QueueReader<T> {
    pub(crate) fn receiver(&self) -> &Receiver<T> {
        &self.receiver
    }
}

impl<T> InputQueue<T> {
    /// Create a new queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = channel::bounded(capacity);
        let (gone, closed) = signal();
        Self {
            sender,
            receiver,
            capacity,
            reader_gone: Arc::new(Mutex::new(Some(gone))),
            closed,
            block_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Push an item, blocking while the queue is full.
    ///
    /// Fails with [`PipelineError::QueueClosed`] once the reader is gone,
    /// including while blocked waiting for space.
    pub fn push(&self, item: T) -> Result<()> {
        if self.is_closed() {
            return Err(PipelineError::QueueClosed);
        }
        match self.sender.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(item)) => {
                self.block_count.fetch_add(1, Ordering::Relaxed);
                select! {
                    send(self.sender, item) -> sent => sent.map_err(|_| PipelineError::QueueClosed),
                    recv(self.closed.receiver()) -> _ => Err(PipelineError::QueueClosed),
                }
            }
            Err(TrySendError::Disconnected(_)) => Err(PipelineError::QueueClosed),
        }
    }

    /// A producer handle for wiring an upstream node to this queue
    pub fn sender(&self) -> Sender<T> {
        self.sender.clone()
    }

    /// Whether the reader has been dropped
    pub fn is_closed(&self) -> bool {
        self.closed.is_fired()
    }

    /// Take the read side. Only the first call succeeds.
    pub(crate) fn claim_reader(&self) -> Option<QueueReader<T>> {
        let gone = self.reader_gone.lock().take()?;
        Some(QueueReader {
            receiver: self.receiver.clone(),
            _gone: gone,
        })
    }

    /// Current number of queued items
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Maximum number of queued items
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue fill level as a percentage (0-100)
    pub fn utilization(&self) -> u32 {
        if self.capacity == 0 {
            return 0;
        }
        ((self.len() * 100) / self.capacity).min(100) as u32
    }

    /// Number of pushes that had to wait for space
    pub fn block_count(&self) -> u64 {
        self.block_count.load(Ordering::Relaxed)
    }
}
