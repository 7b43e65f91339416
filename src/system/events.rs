use async_trait::async_trait;
use serde_json::{json, Value};

use crate::actor::behavior::{Behavior, HandlerError};
use crate::actor::cell::Context;
use crate::message::Envelope;
use crate::plan::MessagePlan;

pub const SYSTEM_EVENTS_ID: &str = "events";

/// The system-event actor at `/system/events`.
///
/// Lifecycle facts (`actorSpawned`, `actorStopped`, `actorRestarted`,
/// `actorFailed`, `deadLetter`) arrive here as plain envelopes and go
/// back out as domain events, so observers use the same per-publisher
/// subscription mechanism as any other actor: subscribe to this actor
/// with `EMIT:deadLetter`, `EMIT:*` and so on.
pub(crate) struct SystemEvents {
    forwarded: u64,
}

impl SystemEvents {
    pub(crate) fn new() -> SystemEvents {
        SystemEvents { forwarded: 0 }
    }
}

#[async_trait]
impl Behavior for SystemEvents {
    async fn on_message(
        &mut self,
        _ctx: &Context,
        msg: Envelope,
    ) -> Result<MessagePlan, HandlerError> {
        self.forwarded += 1;
        Ok(MessagePlan::Event(msg))
    }

    fn snapshot(&self) -> Value {
        json!({ "forwarded": self.forwarded })
    }
}
