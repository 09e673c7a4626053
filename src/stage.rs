//! The order-preserving parallel stage.
//!
//! ```text
//!                       ┌─> worker 0   ─┐
//! input ─> distributor ─┼─> worker 1   ─┼─> merger ─> broadcast
//!                       └─> worker N-1 ─┘
//! ```
//!
//! The distributor hands items to workers round-robin and the merger reads
//! worker results in the same round-robin order, so the output order equals
//! the input order no matter which worker finishes first. Every handoff is a
//! zero-capacity rendezvous: a worker holds at most one item and one result.
//!
//! Shutdown cascades: cancellation stops the distributor, which fires the
//! worker exit signal. Once every worker has returned, the coordinator fires
//! the merger exit signal. The merger therefore never stops while a worker
//! could still be handing off a result.

use crate::context::StreamContext;
use crate::error::{PipelineError, Result};
use crate::message::{Ingest, Message};
use crate::node::StageNode;
use crate::queue::QueueReader;
use crate::signal::{signal, Listener, Trigger};
use crate::transform::Transform;
use crossbeam::channel::{self, select, Receiver, Sender};
use crossbeam::sync::WaitGroup;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lifecycle of a running stage. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StageState {
    /// Items are being distributed
    Running = 0,
    /// Cancellation observed, workers are finishing their last item
    Draining = 1,
    /// Every worker has exited
    WorkersDone = 2,
    /// The merger returned and the node output is closed
    Stopped = 3,
}

impl StageState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => StageState::Running,
            1 => StageState::Draining,
            2 => StageState::WorkersDone,
            _ => StageState::Stopped,
        }
    }
}

/// Shared view of the stage state. Each transition has a single writer.
#[derive(Debug, Clone)]
struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(StageState::Running as u8)))
    }

    fn get(&self) -> StageState {
        StageState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn advance(&self, to: StageState) {
        self.0.fetch_max(to as u8, Ordering::AcqRel);
    }
}

/// Result batch handed from a worker to the merger
type Batch<O> = Vec<Message<O>>;

/// Start an ordered stage on `node` without output pacing
pub fn run_with_order<N, F>(
    ctx: &StreamContext,
    node: Arc<N>,
    num_workers: usize,
    transform: F,
) -> Result<RunningStage>
where
    N: StageNode,
    F: Transform<N::In, N::Out>,
{
    run(ctx, node, num_workers, transform, None)
}

/// Start an ordered stage on `node`
///
/// Spawns one distributor, `num_workers` workers, one merger and one
/// shutdown coordinator, then returns immediately. The stage runs until `ctx`
/// is cancelled. When `send_interval` is set the merger pauses that long
/// after every broadcast item.
pub fn run<N, F>(
    ctx: &StreamContext,
    node: Arc<N>,
    num_workers: usize,
    transform: F,
    send_interval: Option<Duration>,
) -> Result<RunningStage>
where
    N: StageNode,
    F: Transform<N::In, N::Out>,
{
    if num_workers == 0 {
        return Err(PipelineError::ConfigError(
            "an ordered stage needs at least one worker".into(),
        ));
    }
    let input = node
        .input()
        .claim_reader()
        .ok_or_else(|| PipelineError::AlreadyStarted(ctx.name().to_string()))?;

    let transform = Arc::new(transform);
    let state = StateCell::new();
    let (worker_exit, worker_exit_listener) = signal();
    let (merge_exit, merge_exit_listener) = signal();
    let workers_done = WaitGroup::new();

    let mut handles = Vec::with_capacity(num_workers + 3);
    let mut worker_inputs = Vec::with_capacity(num_workers);
    let mut worker_outputs = Vec::with_capacity(num_workers);

    for index in 0..num_workers {
        let (item_tx, item_rx) = channel::bounded(0);
        let (batch_tx, batch_rx) = channel::bounded(0);
        worker_inputs.push(item_tx);
        worker_outputs.push(batch_rx);

        let worker = Worker {
            index,
            ctx: ctx.clone(),
            node: Arc::clone(&node),
            transform: Arc::clone(&transform),
            input: item_rx,
            output: batch_tx,
            exit: worker_exit_listener.clone(),
            _done: workers_done.clone(),
        };
        handles.push(spawn_role(
            format!("{}-worker-{}", ctx.name(), index),
            move || worker.run(),
        )?);
    }
    drop(worker_exit_listener);

    let merger = Merger {
        ctx: ctx.clone(),
        node: Arc::clone(&node),
        slots: worker_outputs,
        exit: merge_exit_listener,
        send_interval: send_interval.filter(|d| !d.is_zero()),
        state: state.clone(),
    };
    handles.push(spawn_role(format!("{}-merger", ctx.name()), move || {
        merger.run()
    })?);

    let coordinator = ShutdownCoordinator {
        ctx: ctx.clone(),
        workers_done,
        merge_exit,
        state: state.clone(),
    };
    handles.push(spawn_role(format!("{}-coordinator", ctx.name()), move || {
        coordinator.run()
    })?);

    let distributor = Distributor {
        ctx: ctx.clone(),
        node,
        input,
        slots: worker_inputs,
        next: 0,
        exit: worker_exit,
        state: state.clone(),
    };
    handles.push(spawn_role(format!("{}-distributor", ctx.name()), move || {
        distributor.run()
    })?);

    info!(stage = %ctx.name(), workers = num_workers, "ordered stage started");
    Ok(RunningStage {
        ctx: ctx.clone(),
        state,
        handles,
    })
}

fn spawn_role<F>(name: String, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|source| PipelineError::Spawn { name, source })
}

/// Reads the node input and deals items to the workers round-robin
struct Distributor<N: StageNode> {
    ctx: StreamContext,
    node: Arc<N>,
    /// Dropped with the distributor, which closes the node's input queue
    input: QueueReader<Message<N::In>>,
    slots: Vec<Sender<Message<N::In>>>,
    /// Assignment index, owned by this thread only
    next: usize,
    exit: Trigger,
    state: StateCell,
}

impl<N: StageNode> Distributor<N> {
    fn run(mut self) {
        loop {
            self.node
                .stats()
                .set_buffer_length(self.node.input().len());

            // The queue keeps a sender of its own, so only cancellation
            // ends the intake.
            let item = select! {
                recv(self.ctx.done()) -> _ => None,
                recv(self.input.receiver()) -> item => item.ok(),
            };
            let Some(item) = item else {
                info!(stage = %self.ctx.name(), "distribute done");
                break;
            };

            // Control items go out too; workers pass them through
            if self.slots[self.next].send(item).is_err() {
                warn!(
                    stage = %self.ctx.name(),
                    worker = self.next,
                    "worker is gone, stopping distribution"
                );
                break;
            }
            self.next = (self.next + 1) % self.slots.len();
        }
        self.state.advance(StageState::Draining);
        self.exit.fire();
    }
}

/// Applies the transform to the items dealt to one slot
struct Worker<N: StageNode, F> {
    index: usize,
    ctx: StreamContext,
    node: Arc<N>,
    transform: Arc<F>,
    input: Receiver<Message<N::In>>,
    output: Sender<Batch<N::Out>>,
    exit: Listener,
    /// Released when this worker returns, after its final handoff
    _done: WaitGroup,
}

impl<N, F> Worker<N, F>
where
    N: StageNode,
    F: Transform<N::In, N::Out>,
{
    fn run(self) {
        loop {
            let item = select! {
                recv(self.input) -> item => item.ok(),
                recv(self.exit.receiver()) -> _ => None,
            };
            let Some(item) = item else {
                break;
            };

            let batch = self.process(item);
            // No exit escape here: the merger keeps reading until every
            // worker has returned.
            if self.output.send(batch).is_err() {
                warn!(stage = %self.ctx.name(), worker = self.index, "merger is gone");
                break;
            }
        }
        debug!(stage = %self.ctx.name(), worker = self.index, "worker done");
    }

    fn process(&self, item: Message<N::In>) -> Batch<N::Out> {
        let item = match self.node.preprocess(&self.ctx, item) {
            Ingest::Forward(item) => item,
            // Still hand off an empty batch to keep the merger in step
            Ingest::Handled => return Vec::new(),
        };

        match item.try_into_data() {
            Ok(data) => {
                let stats = self.node.stats();
                stats.inc_records_in();
                let start = Instant::now();
                let batch = self.transform.apply(&self.ctx, data);
                stats.record_process_latency(start.elapsed());
                stats.inc_messages_processed(1);
                batch
            }
            Err(passthrough) => vec![passthrough],
        }
    }
}

/// Collects worker results in dealing order and broadcasts them
struct Merger<N: StageNode> {
    ctx: StreamContext,
    node: Arc<N>,
    slots: Vec<Receiver<Batch<N::Out>>>,
    exit: Listener,
    send_interval: Option<Duration>,
    state: StateCell,
}

enum Turn<T> {
    Batch(T),
    SlotClosed,
    Exit,
}

impl<N: StageNode> Merger<N> {
    fn run(self) {
        // A closed slot means its worker returned. Its later turns are
        // skipped so the other workers can still hand off.
        let mut open = vec![true; self.slots.len()];
        let mut open_count = self.slots.len();

        'merge: loop {
            if open_count == 0 {
                self.exit.wait();
                break;
            }
            for (index, slot) in self.slots.iter().enumerate() {
                if !open[index] {
                    continue;
                }
                let turn = select! {
                    recv(slot) -> batch => match batch {
                        Ok(batch) => Turn::Batch(batch),
                        Err(_) => Turn::SlotClosed,
                    },
                    recv(self.exit.receiver()) -> _ => Turn::Exit,
                };
                match turn {
                    Turn::Batch(batch) => self.emit(batch),
                    Turn::SlotClosed => {
                        debug!(stage = %self.ctx.name(), worker = index, "worker slot closed");
                        open[index] = false;
                        open_count -= 1;
                    }
                    Turn::Exit => break 'merge,
                }
            }
        }

        info!(stage = %self.ctx.name(), "merge done");
        self.node.close();
        self.state.advance(StageState::Stopped);
    }

    fn emit(&self, batch: Batch<N::Out>) {
        let stats = self.node.stats();
        for item in batch {
            let item = match self.node.ingest(&self.ctx, item) {
                Ingest::Forward(item) => item,
                Ingest::Handled => continue,
            };
            self.node.broadcast(item);
            stats.inc_records_out();
            if let Some(interval) = self.send_interval {
                thread::sleep(interval);
            }
        }
    }
}

/// Fires the merger exit signal once every worker has returned
struct ShutdownCoordinator {
    ctx: StreamContext,
    workers_done: WaitGroup,
    merge_exit: Trigger,
    state: StateCell,
}

impl ShutdownCoordinator {
    fn run(self) {
        self.workers_done.wait();
        debug!(stage = %self.ctx.name(), "all workers done");
        self.state.advance(StageState::WorkersDone);
        self.merge_exit.fire();
    }
}

/// Handle to a started ordered stage
pub struct RunningStage {
    ctx: StreamContext,
    state: StateCell,
    handles: Vec<JoinHandle<()>>,
}

impl RunningStage {
    /// Name of the stage
    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    /// Current lifecycle state
    pub fn state(&self) -> StageState {
        self.state.get()
    }

    /// Whether the merger has returned
    pub fn is_stopped(&self) -> bool {
        self.state() == StageState::Stopped
    }

    /// Cancel the stage's context. The stage drains and stops on its own.
    pub fn cancel(&self) {
        self.ctx.cancel();
    }

    /// Wait for every stage thread to return.
    ///
    /// Blocks until the context is cancelled and the shutdown cascade has
    /// completed. A panicked thread is reported as an error after all other
    /// threads have been joined.
    pub fn join(self) -> Result<()> {
        let mut first_error = None;
        for handle in self.handles {
            let name = handle.thread().name().unwrap_or("stage").to_string();
            if handle.join().is_err() && first_error.is_none() {
                first_error = Some(PipelineError::ThreadError(format!("{} panicked", name)));
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Cancel the stage and wait for it to stop
    pub fn shutdown(self) -> Result<()> {
        self.cancel();
        self.join()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::metrics::{StageMetrics, StatsRecorder};
    use crate::node::BasicNode;
    use crate::queue::InputQueue;
    use crate::transform::PassthroughTransform;
    use parking_lot::Mutex;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn collect<T>(rx: &Receiver<Message<T>>, count: usize) -> Vec<Message<T>> {
        (0..count)
            .map(|_| rx.recv_timeout(TIMEOUT).expect("stage output timed out"))
            .collect()
    }

    #[test]
    fn test_zero_workers_rejected() {
        let ctx = StreamContext::new("zero");
        let node: Arc<BasicNode<i32, i32>> = Arc::new(BasicNode::new("zero", 4));
        let result = run(&ctx, node, 0, PassthroughTransform, None);
        assert!(matches!(result, Err(PipelineError::ConfigError(_))));
    }

    #[test]
    fn test_second_stage_on_same_node_rejected() {
        let ctx = StreamContext::new("twice");
        let node: Arc<BasicNode<i32, i32>> = Arc::new(BasicNode::new("twice", 4));
        let first = run_with_order(&ctx, Arc::clone(&node), 2, PassthroughTransform).unwrap();
        let second = run_with_order(&ctx, Arc::clone(&node), 2, PassthroughTransform);
        assert!(matches!(second, Err(PipelineError::AlreadyStarted(_))));
        first.shutdown().unwrap();
    }

    #[test]
    fn test_state_machine_reaches_stopped() {
        let ctx = StreamContext::new("lifecycle");
        let node: Arc<BasicNode<i32, i32>> = Arc::new(BasicNode::new("lifecycle", 4));
        let rx = node.subscribe();
        let stage = run_with_order(&ctx, Arc::clone(&node), 3, PassthroughTransform).unwrap();
        assert_eq!(stage.state(), StageState::Running);

        node.push(Message::Data(1)).unwrap();
        assert_eq!(collect(&rx, 1), vec![Message::Data(1)]);
        assert_eq!(stage.state(), StageState::Running);

        stage.cancel();
        let state = stage.state.clone();
        stage.join().unwrap();
        assert_eq!(state.get(), StageState::Stopped);
        // Node output closed by the merger
        assert!(rx.recv_timeout(TIMEOUT).is_err());
    }

    /// Captures the stage state the merger leaves behind when it closes
    struct PhaseNode {
        input: InputQueue<Message<i32>>,
        metrics: StageMetrics,
        out: Mutex<Vec<Message<i32>>>,
        state: Mutex<Option<StateCell>>,
        state_at_close: Mutex<Option<StageState>>,
    }

    impl StageNode for PhaseNode {
        type In = i32;
        type Out = i32;

        fn input(&self) -> &InputQueue<Message<i32>> {
            &self.input
        }

        fn stats(&self) -> &dyn StatsRecorder {
            &self.metrics
        }

        fn broadcast(&self, item: Message<i32>) {
            self.out.lock().push(item);
        }

        fn close(&self) {
            let seen = self.state.lock().as_ref().map(StateCell::get);
            *self.state_at_close.lock() = seen;
        }
    }

    #[test]
    fn test_state_machine_passes_every_phase() {
        let ctx = StreamContext::new("phases");
        let node = Arc::new(PhaseNode {
            input: InputQueue::new(4),
            metrics: StageMetrics::new(),
            out: Mutex::new(Vec::new()),
            state: Mutex::new(None),
            state_at_close: Mutex::new(None),
        });

        let (entered_tx, entered_rx) = channel::unbounded::<()>();
        let (gate_tx, gate_rx) = channel::unbounded::<()>();
        let gated = move |_: &StreamContext, v: i32| -> Vec<Message<i32>> {
            let _ = entered_tx.send(());
            let _ = gate_rx.recv();
            vec![Message::Data(v)]
        };
        let stage = run_with_order(&ctx, Arc::clone(&node), 2, gated).unwrap();
        *node.state.lock() = Some(stage.state.clone());

        node.input.push(Message::Data(7)).unwrap();
        entered_rx.recv_timeout(TIMEOUT).unwrap();
        stage.cancel();

        let deadline = Instant::now() + TIMEOUT;
        while stage.state() == StageState::Running && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        // Worker 0 still holds the accepted item
        assert_eq!(stage.state(), StageState::Draining);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(stage.state(), StageState::Draining);
        assert!(node.out.lock().is_empty());

        drop(gate_tx);
        let state = stage.state.clone();
        stage.join().unwrap();
        assert_eq!(state.get(), StageState::Stopped);
        assert_eq!(*node.state_at_close.lock(), Some(StageState::WorkersDone));
        assert_eq!(*node.out.lock(), vec![Message::Data(7)]);
    }

    #[test]
    fn test_buffer_length_gauge_tracks_queue_depth() {
        let ctx = StreamContext::new("gauge");
        let node: Arc<BasicNode<i32, i32>> = Arc::new(BasicNode::new("gauge", 8));
        let rx = node.subscribe();
        for v in 0..5 {
            node.push(Message::Data(v)).unwrap();
        }

        let (gate_tx, gate_rx) = channel::unbounded::<()>();
        let gated = move |_: &StreamContext, v: i32| -> Vec<Message<i32>> {
            let _ = gate_rx.recv();
            vec![Message::Data(v)]
        };
        let stage = run_with_order(&ctx, Arc::clone(&node), 1, gated).unwrap();

        // Worker holds item 0, distributor is blocked handing over item 1
        // after sampling four queued items
        let deadline = Instant::now() + TIMEOUT;
        while node.metrics().buffer_length() != 4 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(node.metrics().buffer_length(), 4);

        drop(gate_tx);
        assert_eq!(collect(&rx, 5).len(), 5);
        stage.shutdown().unwrap();
        assert_eq!(node.metrics().buffer_length(), 0);
    }

    /// Records which worker thread handled which item
    struct TracingNode {
        input: InputQueue<Message<u32>>,
        metrics: StageMetrics,
        seen: Mutex<Vec<(String, u32)>>,
        out: Mutex<Vec<Message<u32>>>,
    }

    impl StageNode for TracingNode {
        type In = u32;
        type Out = u32;

        fn input(&self) -> &InputQueue<Message<u32>> {
            &self.input
        }

        fn stats(&self) -> &dyn StatsRecorder {
            &self.metrics
        }

        fn preprocess(&self, _ctx: &StreamContext, item: Message<u32>) -> Ingest<Message<u32>> {
            if let Message::Data(v) = &item {
                let worker = thread::current().name().unwrap_or_default().to_string();
                self.seen.lock().push((worker, *v));
            }
            Ingest::Forward(item)
        }

        fn broadcast(&self, item: Message<u32>) {
            self.out.lock().push(item);
        }
    }

    #[test]
    fn test_round_robin_assignment() {
        let ctx = StreamContext::new("rr");
        let node = Arc::new(TracingNode {
            input: InputQueue::new(16),
            metrics: StageMetrics::new(),
            seen: Mutex::new(Vec::new()),
            out: Mutex::new(Vec::new()),
        });
        let stage = run_with_order(&ctx, Arc::clone(&node), 3, PassthroughTransform).unwrap();
        for v in 0..9 {
            node.input.push(Message::Data(v)).unwrap();
        }
        let deadline = Instant::now() + TIMEOUT;
        while node.metrics.records_out() < 9 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        stage.shutdown().unwrap();

        let seen = node.seen.lock();
        assert_eq!(seen.len(), 9);
        for (worker, v) in seen.iter() {
            assert_eq!(worker, &format!("rr-worker-{}", v % 3));
        }
        let out: Vec<u32> = node.out.lock().iter().filter_map(|m| m.data().copied()).collect();
        assert_eq!(out, (0..9).collect::<Vec<_>>());
    }
}
