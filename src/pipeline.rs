use crate::context::StreamContext;
use crate::error::{PipelineError, Result};
use crate::node::{BasicNode, StageNode};
use crate::stage::{self, RunningStage};
use crate::transform::Transform;
use std::sync::Arc;
use std::time::Duration;

/// Default input queue capacity for nodes created from a stage config
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// Settings of an ordered stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageConfig {
    /// Name used for thread names and log fields
    pub name: String,
    /// Number of parallel workers
    pub workers: usize,
    /// Pause after every broadcast item
    pub send_interval: Option<Duration>,
    /// Input queue capacity of nodes built by [`OrderedStage::basic_node`]
    pub buffer_capacity: usize,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            name: "ordered".to_string(),
            workers: 1,
            send_interval: None,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// Builder for ordered stages
#[derive(Debug, Clone)]
pub struct OrderedStageBuilder {
    config: StageConfig,
}

impl OrderedStageBuilder {
    /// Create a new builder with default settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: StageConfig {
                name: name.into(),
                ..StageConfig::default()
            },
        }
    }

    /// Set the number of parallel workers
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Pause for `interval` after every broadcast item. Zero disables pacing.
    pub fn send_interval(mut self, interval: Duration) -> Self {
        self.config.send_interval = if interval.is_zero() {
            None
        } else {
            Some(interval)
        };
        self
    }

    /// Set the input queue capacity used by [`OrderedStage::basic_node`]
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity;
        self
    }

    /// Validate the settings and build the stage
    pub fn build(self) -> Result<OrderedStage> {
        if self.config.name.is_empty() {
            return Err(PipelineError::ConfigError("stage name is empty".into()));
        }
        if self.config.workers == 0 {
            return Err(PipelineError::ConfigError(format!(
                "stage '{}' needs at least one worker",
                self.config.name
            )));
        }
        if self.config.buffer_capacity == 0 {
            return Err(PipelineError::ConfigError(format!(
                "stage '{}' needs a non-zero buffer capacity",
                self.config.name
            )));
        }
        Ok(OrderedStage {
            config: self.config,
        })
    }
}

/// A validated, not yet running ordered stage
#[derive(Debug, Clone)]
pub struct OrderedStage {
    config: StageConfig,
}

impl OrderedStage {
    /// Start building a stage
    pub fn builder(name: impl Into<String>) -> OrderedStageBuilder {
        OrderedStageBuilder::new(name)
    }

    /// The validated settings
    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// A [`BasicNode`] sized by this stage's buffer capacity
    pub fn basic_node<I, O>(&self) -> Arc<BasicNode<I, O>> {
        Arc::new(BasicNode::new(
            self.config.name.clone(),
            self.config.buffer_capacity,
        ))
    }

    /// Run the stage on `node` until `ctx` is cancelled
    pub fn start<N, F>(
        &self,
        ctx: &StreamContext,
        node: Arc<N>,
        transform: F,
    ) -> Result<RunningStage>
    where
        N: StageNode,
        F: Transform<N::In, N::Out>,
    {
        let ctx = ctx.with_name(self.config.name.clone());
        tracing::debug!(
            stage = %self.config.name,
            workers = self.config.workers,
            transform = %transform.name(),
            "starting ordered stage"
        );
        stage::run(
            &ctx,
            node,
            self.config.workers,
            transform,
            self.config.send_interval,
        )
    }
}
