use crate::context::StreamContext;
use crate::message::{Ingest, Message};
use crate::metrics::{StageMetrics, StatsRecorder};
use crate::queue::InputQueue;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

/// The pipeline node hosting an ordered stage
///
/// The node owns the input queue and the downstream fan-out; the stage only
/// borrows them through this trait.
pub trait StageNode: Send + Sync + 'static {
    /// Item type read from the input queue
    type In: Send + 'static;
    /// Item type broadcast downstream
    type Out: Send + 'static;

    /// The node's shared input queue
    fn input(&self) -> &InputQueue<Message<Self::In>>;

    /// Statistics sink for this node
    fn stats(&self) -> &dyn StatsRecorder;

    /// Runs on a worker before the item is classified
    fn preprocess(
        &self,
        _ctx: &StreamContext,
        item: Message<Self::In>,
    ) -> Ingest<Message<Self::In>> {
        Ingest::Forward(item)
    }

    /// Runs on the merger for every result item before it is broadcast
    fn ingest(
        &self,
        _ctx: &StreamContext,
        item: Message<Self::Out>,
    ) -> Ingest<Message<Self::Out>> {
        Ingest::Forward(item)
    }

    /// Deliver an item to every downstream consumer
    fn broadcast(&self, item: Message<Self::Out>);

    /// Called once by the merger after it stopped
    fn close(&self) {}
}

/// A ready-made node: a bounded input queue, channel subscribers downstream
/// and [`StageMetrics`].
pub struct BasicNode<I, O> {
    name: String,
    input: InputQueue<Message<I>>,
    outputs: Mutex<Vec<Sender<Message<O>>>>,
    metrics: StageMetrics,
}

impl<I, O> BasicNode<I, O> {
    /// Create a node whose input queue holds `buffer_capacity` items
    pub fn new(name: impl Into<String>, buffer_capacity: usize) -> Self {
        Self {
            name: name.into(),
            input: InputQueue::new(buffer_capacity),
            outputs: Mutex::new(Vec::new()),
            metrics: StageMetrics::new(),
        }
    }

    /// Node name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a new downstream consumer.
    ///
    /// The receiver disconnects once the stage running on this node stops.
    pub fn subscribe(&self) -> Receiver<Message<O>> {
        let (tx, rx) = channel::unbounded();
        self.outputs.lock().push(tx);
        rx
    }

    /// Feed this node's output into a downstream queue, e.g. the
    /// [`InputQueue::sender`] of the next node
    pub fn connect(&self, downstream: Sender<Message<O>>) {
        self.outputs.lock().push(downstream);
    }

    /// Number of live downstream consumers
    pub fn subscriber_count(&self) -> usize {
        self.outputs.lock().len()
    }

    /// Metrics collected for this node
    pub fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }

    /// Producer handle for this node's input queue
    pub fn input_sender(&self) -> Sender<Message<I>> {
        self.input.sender()
    }

    /// Push an item into the node's input queue, blocking while it is full
    pub fn push(&self, item: Message<I>) -> crate::error::Result<()> {
        self.input.push(item)
    }
}

impl<I, O> StageNode for BasicNode<I, O>
where
    I: Send + 'static,
    O: Clone + Send + 'static,
{
    type In = I;
    type Out = O;

    fn input(&self) -> &InputQueue<Message<I>> {
        &self.input
    }

    fn stats(&self) -> &dyn StatsRecorder {
        &self.metrics
    }

    fn broadcast(&self, item: Message<O>) {
        let mut outputs = self.outputs.lock();
        match outputs.len() {
            0 => tracing::trace!(node = %self.name, "no subscribers, item discarded"),
            1 => {
                if outputs[0].send(item).is_err() {
                    tracing::debug!(node = %self.name, "subscriber gone");
                    outputs.clear();
                }
            }
            _ => outputs.retain(|tx| tx.send(item.clone()).is_ok()),
        }
    }

    fn close(&self) {
        self.outputs.lock().clear();
    }
}
