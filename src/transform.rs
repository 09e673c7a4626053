use crate::context::StreamContext;
use crate::message::{Message, StageFault};
use std::fmt::Display;

/// Per-item transformation run by the stage workers
///
/// Called concurrently from several worker threads on distinct items, so it
/// takes `&self`. Any shared state must be synchronized by the implementor.
/// Returning an empty batch drops the item. Failures should be returned as
/// `Message::Error` items so they keep their place in the output order.
pub trait Transform<I, O>: Send + Sync + 'static {
    /// Transform one ordinary item into zero or more output items
    fn apply(&self, ctx: &StreamContext, item: I) -> Vec<Message<O>>;

    /// Get a human-readable name for this transform
    fn name(&self) -> &str {
        "transform"
    }
}

impl<I, O, F> Transform<I, O> for F
where
    F: Fn(&StreamContext, I) -> Vec<Message<O>> + Send + Sync + 'static,
{
    fn apply(&self, ctx: &StreamContext, item: I) -> Vec<Message<O>> {
        self(ctx, item)
    }
}

/// Forwards every item unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTransform;

impl<T> Transform<T, T> for PassthroughTransform {
    fn apply(&self, _ctx: &StreamContext, item: T) -> Vec<Message<T>> {
        vec![Message::Data(item)]
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

/// Keeps the items matching a predicate and drops the rest
pub struct FilterTransform<F> {
    name: String,
    predicate: F,
}

impl<F> FilterTransform<F> {
    /// Create a new filter transform
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<T, F> Transform<T, T> for FilterTransform<F>
where
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    fn apply(&self, _ctx: &StreamContext, item: T) -> Vec<Message<T>> {
        if (self.predicate)(&item) {
            vec![Message::Data(item)]
        } else {
            Vec::new()
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Maps each item through a fallible function
///
/// A mapping failure becomes an error item in the item's position.
pub struct MapTransform<F> {
    name: String,
    mapper: F,
}

impl<F> MapTransform<F> {
    /// Create a new map transform
    pub fn new(name: impl Into<String>, mapper: F) -> Self {
        Self {
            name: name.into(),
            mapper,
        }
    }
}

impl<I, O, E, F> Transform<I, O> for MapTransform<F>
where
    F: Fn(I) -> Result<O, E> + Send + Sync + 'static,
    E: Display,
{
    fn apply(&self, _ctx: &StreamContext, item: I) -> Vec<Message<O>> {
        match (self.mapper)(item) {
            Ok(out) => vec![Message::Data(out)],
            Err(e) => vec![Message::Error(StageFault::new(format!(
                "{}: {}",
                self.name, e
            )))],
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
