//! Inbound message handler pipeline.
//!
//! Handlers run synchronously, in registration order, until one claims the
//! message. Handlers are cheap dispatchers; anything that needs to await
//! spawns its own task.

use serde_json::Value;

/// Identifies a registered handler for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub(crate) u64);

/// Whether an inbound message expects a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Notification,
    Request,
}

/// Inbound message presented to handlers.
#[derive(Debug, Clone, Copy)]
pub struct InboundMessage<'a> {
    pub kind: MessageKind,
    pub method: &'a str,
    pub data: &'a Value,
}

impl<'a> InboundMessage<'a> {
    /// String field of the payload.
    #[must_use]
    pub fn str_field(&self, field: &str) -> Option<&'a str> {
        self.data.get(field).and_then(Value::as_str)
    }
}

/// What a handler did with a message.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// Not for this handler; try the next one.
    Pass,
    /// Claimed. A claimed request is answered with an empty object.
    Handled,
    /// Claimed, with an explicit answer for requests.
    Respond(Result<Value, String>),
}

/// Inbound message handler.
pub trait InboundHandler: Send + Sync {
    fn handle(&self, message: &InboundMessage<'_>) -> HandlerOutcome;
}

impl<F> InboundHandler for F
where
    F: Fn(&InboundMessage<'_>) -> HandlerOutcome + Send + Sync,
{
    fn handle(&self, message: &InboundMessage<'_>) -> HandlerOutcome {
        self(message)
    }
}
