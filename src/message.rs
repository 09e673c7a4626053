use std::fmt;
use std::sync::Arc;

/// An error travelling through the stream as an ordinary position in the order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFault {
    message: Arc<str>,
}

impl StageFault {
    /// Create a fault carrying the given description
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Arc::from(message.into()),
        }
    }

    /// Human-readable description of the fault
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for StageFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StageFault {}

/// How the stage treats an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// Ordinary data, handed to the transform
    Data,
    /// Stream control marker, forwarded untouched
    Control,
    /// Error marker, forwarded untouched
    Error,
}

/// A unit flowing through a pipeline node
///
/// Only `Data` carries a payload. Control and error markers are payload-free,
/// which lets a stage re-type them from its input to its output type without
/// touching them.
#[derive(Debug, Clone, PartialEq)]
pub enum Message<T> {
    /// Ordinary data item
    Data(T),
    /// Event-time progress marker
    Watermark(u64),
    /// End of stream marker
    EndOfStream,
    /// An error produced upstream or by a transform
    Error(StageFault),
}

impl<T> Message<T> {
    /// Shorthand for an error item
    pub fn error(message: impl Into<String>) -> Self {
        Message::Error(StageFault::new(message))
    }

    /// Classify this item
    pub fn kind(&self) -> ItemKind {
        match self {
            Message::Data(_) => ItemKind::Data,
            Message::Watermark(_) | Message::EndOfStream => ItemKind::Control,
            Message::Error(_) => ItemKind::Error,
        }
    }

    /// Whether this is an ordinary data item
    pub fn is_data(&self) -> bool {
        matches!(self, Message::Data(_))
    }

    /// The payload of a data item, if any
    pub fn into_data(self) -> Option<T> {
        match self {
            Message::Data(data) => Some(data),
            _ => None,
        }
    }

    /// Borrow the payload of a data item, if any
    pub fn data(&self) -> Option<&T> {
        match self {
            Message::Data(data) => Some(data),
            _ => None,
        }
    }

    /// Extract the data payload, or re-type a control/error item unchanged
    pub fn try_into_data<U>(self) -> Result<T, Message<U>> {
        match self {
            Message::Data(data) => Ok(data),
            Message::Watermark(ts) => Err(Message::Watermark(ts)),
            Message::EndOfStream => Err(Message::EndOfStream),
            Message::Error(fault) => Err(Message::Error(fault)),
        }
    }

    /// Map the data payload, leaving control and error items as they are
    pub fn map<U, F>(self, f: F) -> Message<U>
    where
        F: FnOnce(T) -> U,
    {
        match self.try_into_data() {
            Ok(data) => Message::Data(f(data)),
            Err(passthrough) => passthrough,
        }
    }
}

/// Outcome of a node hook that may consume an item
#[derive(Debug, Clone, PartialEq)]
pub enum Ingest<T> {
    /// Continue with the (possibly rewritten) item
    Forward(T),
    /// The hook fully handled the item; nothing more to do
    Handled,
}
