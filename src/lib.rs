//! An order-preserving parallel processing stage for streaming dataflow pipelines.
//!
//! A pipeline node often needs to run a CPU-bound transform on many threads
//! while its downstream consumers (windows, aggregations, sinks) still rely on
//! strict arrival order. This crate fans items out to a pool of workers and
//! fans the results back in, in exactly the order the items arrived.
//!
//! # Features
//!
//! - Round-robin distribution over zero-capacity rendezvous channels
//! - Order-preserving merge without a reorder buffer
//! - Control and error items pass through untouched, in position
//! - Two-phase shutdown that never loses an accepted item's result
//! - Optional output pacing between emitted items
//! - Per-stage metrics: records in/out, processed count, queue depth, latency
//!
//! # Example
//!
//! ```ignore
//! use ordered_pipeline::{Message, OrderedStage, StreamContext};
//!
//! let stage = OrderedStage::builder("upper").workers(4).build()?;
//! let node = stage.basic_node::<String, String>();
//! let output = node.subscribe();
//!
//! let ctx = StreamContext::new("rule1");
//! let running = stage.start(&ctx, node.clone(), |_: &StreamContext, s: String| {
//!     vec![Message::Data(s.to_uppercase())]
//! })?;
//!
//! node.push(Message::Data("a".into()))?;
//! assert_eq!(output.recv()?, Message::Data("A".into()));
//! running.shutdown()?;
//! ```

pub mod context;
pub mod error;
pub mod message;
pub mod metrics;
pub mod node;
pub mod pipeline;
pub mod queue;
pub mod signal;
pub mod stage;
pub mod transform;

// Re-exports for convenience
pub use context::StreamContext;
pub use error::{PipelineError, Result};
pub use message::{Ingest, ItemKind, Message, StageFault};
pub use metrics::{MetricsSnapshot, PercentileTracker, StageMetrics, StatsRecorder};
pub use node::{BasicNode, StageNode};
pub use pipeline::{OrderedStage, OrderedStageBuilder, StageConfig, DEFAULT_BUFFER_CAPACITY};
pub use queue::InputQueue;
pub use signal::{signal, Listener, Trigger};
pub use stage::{run, run_with_order, RunningStage, StageState};
pub use transform::{FilterTransform, MapTransform, PassthroughTransform, Transform};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
