use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::actor::cell::Context;
use crate::actor::supervision::SupervisionStrategy;
use crate::message::Envelope;
use crate::plan::MessagePlan;

/// Error value returned by a failing handler.
///
/// A handler error never crosses cells as an exception: the cell
/// transitions to failed and the parent decides what happens next.
#[derive(Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> HandlerError {
        HandlerError {
            message: message.into(),
        }
    }
}

impl std::fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "HandlerError({})", self.message)
    }
}

impl From<&str> for HandlerError {
    fn from(s: &str) -> HandlerError {
        HandlerError::new(s)
    }
}

impl From<String> for HandlerError {
    fn from(s: String) -> HandlerError {
        HandlerError { message: s }
    }
}

/// The message-handling logic and state a cell runs.
///
/// Handlers return a [`MessagePlan`]; they never touch other cells
/// directly. A behavior instance is owned by exactly one cell and all
/// its methods run on that cell's turn, one at a time.
#[async_trait]
pub trait Behavior: Send + 'static {
    /// Invoked when the cell starts and again after every restart, on
    /// the fresh instance. The returned plan is interpreted like any
    /// handler result.
    fn on_start(&mut self, _ctx: &Context) -> Result<MessagePlan, HandlerError> {
        Ok(MessagePlan::Nothing)
    }

    /// Invoked once per dequeued envelope.
    async fn on_message(&mut self, ctx: &Context, msg: Envelope)
        -> Result<MessagePlan, HandlerError>;

    /// The state container's event feed: called for every domain event
    /// the behavior's own plans produce, before the event is broadcast.
    fn apply_event(&mut self, _ctx: &Context, _event: &Envelope) {}

    /// A JSON view of the behavior's private state.
    fn snapshot(&self) -> Value {
        Value::Null
    }

    /// Invoked after the cell has stopped draining.
    fn on_stop(&mut self, _ctx: &Context) {}

    /// Supervision applied to this behavior's failures by its parent.
    fn supervision_strategy(&self) -> SupervisionStrategy {
        SupervisionStrategy::default()
    }
}

pub type BoxBehavior = Box<dyn Behavior>;

#[async_trait]
impl<B: Behavior + ?Sized> Behavior for Box<B> {
    fn on_start(&mut self, ctx: &Context) -> Result<MessagePlan, HandlerError> {
        (**self).on_start(ctx)
    }

    async fn on_message(
        &mut self,
        ctx: &Context,
        msg: Envelope,
    ) -> Result<MessagePlan, HandlerError> {
        (**self).on_message(ctx, msg).await
    }

    fn apply_event(&mut self, ctx: &Context, event: &Envelope) {
        (**self).apply_event(ctx, event)
    }

    fn snapshot(&self) -> Value {
        (**self).snapshot()
    }

    fn on_stop(&mut self, ctx: &Context) {
        (**self).on_stop(ctx)
    }

    fn supervision_strategy(&self) -> SupervisionStrategy {
        (**self).supervision_strategy()
    }
}
