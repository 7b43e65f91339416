use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::address::Address;
use crate::ask::AskError;
use crate::message::Envelope;

/// Continuation run when an ask completes with a reply.
pub type ReplyCont = Box<dyn FnOnce(Value) -> MessagePlan + Send + 'static>;

/// Continuation run when an ask fails (timeout, cancellation, unreachable
/// target).
pub type ErrorCont = Box<dyn FnOnce(AskError) -> MessagePlan + Send + 'static>;

/// The declarative result of a handler turn.
///
/// A handler does not touch mailboxes or the bus directly. It returns a
/// `MessagePlan` and the interpreter executes the fan-out: state feed-back,
/// emits, sends and correlated asks.
pub enum MessagePlan {
    /// No side effects. A plan with zero side effects is indistinguishable
    /// from this.
    Nothing,
    /// A domain event: fed back into the behavior state container and
    /// broadcast as `EMIT:<type>` to the publisher's subscribers.
    Event(Envelope),
    /// Fire-and-forget enqueue to another address.
    Send(SendPlan),
    /// Correlated request with continuations and a deadline.
    Ask(AskPlan),
    /// A finite ordered list, executed in order. Nesting sequences is
    /// illegal and fails the handler with `InvalidPlan`.
    Sequence(Vec<MessagePlan>),
}

pub struct SendPlan {
    pub to: Address,
    pub tell: Envelope,
    pub mode: SendMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendMode {
    FireAndForget,
    /// Re-attempt a rejected enqueue up to N times with bounded backoff
    /// before surfacing `SYS:SEND_FAILED`.
    Retry(u32),
}

pub struct AskPlan {
    pub to: Address,
    pub ask: Envelope,
    pub timeout: Duration,
    pub on_ok: ReplyCont,
    pub on_error: Option<ErrorCont>,
}

impl MessagePlan {
    pub fn event(msg_type: impl Into<String>, payload: Value) -> MessagePlan {
        MessagePlan::Event(Envelope::new(msg_type, payload))
    }

    pub fn send(to: Address, tell: Envelope) -> MessagePlan {
        MessagePlan::Send(SendPlan {
            to,
            tell,
            mode: SendMode::FireAndForget,
        })
    }

    pub fn send_with(to: Address, tell: Envelope, mode: SendMode) -> MessagePlan {
        MessagePlan::Send(SendPlan { to, tell, mode })
    }

    pub fn ask<F>(to: Address, ask: Envelope, timeout: Duration, on_ok: F) -> MessagePlan
    where
        F: FnOnce(Value) -> MessagePlan + Send + 'static,
    {
        MessagePlan::Ask(AskPlan {
            to,
            ask,
            timeout,
            on_ok: Box::new(on_ok),
            on_error: None,
        })
    }

    pub fn ask_or_else<F, E>(
        to: Address,
        ask: Envelope,
        timeout: Duration,
        on_ok: F,
        on_error: E,
    ) -> MessagePlan
    where
        F: FnOnce(Value) -> MessagePlan + Send + 'static,
        E: FnOnce(AskError) -> MessagePlan + Send + 'static,
    {
        MessagePlan::Ask(AskPlan {
            to,
            ask,
            timeout,
            on_ok: Box::new(on_ok),
            on_error: Some(Box::new(on_error)),
        })
    }

    pub fn seq(plans: Vec<MessagePlan>) -> MessagePlan {
        MessagePlan::Sequence(plans)
    }

    /// Builds a reply plan for an ask envelope; `Nothing` when the request
    /// was a plain tell.
    pub fn reply(request: &Envelope, payload: Value) -> MessagePlan {
        match Envelope::reply_to(request, payload) {
            Some(env) => MessagePlan::Event(env),
            None => MessagePlan::Nothing,
        }
    }

    /// Normalizes the plan into a flat instruction list.
    ///
    /// `Nothing` flattens to the empty list, a single instruction to a
    /// one-element list, a sequence to its elements in order. A sequence
    /// nested inside a sequence is rejected.
    pub fn flatten(self) -> Result<Vec<MessagePlan>, PlanError> {
        match self {
            MessagePlan::Nothing => Ok(Vec::new()),
            MessagePlan::Sequence(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        MessagePlan::Sequence(_) => return Err(PlanError::NestedSequence),
                        MessagePlan::Nothing => {}
                        other => out.push(other),
                    }
                }
                Ok(out)
            }
            single => Ok(vec![single]),
        }
    }
}

impl std::fmt::Debug for MessagePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            MessagePlan::Nothing => f.write_str("Nothing"),
            MessagePlan::Event(env) => write!(f, "Event({env:?})"),
            MessagePlan::Send(p) => write!(f, "Send(to={}, {:?}, {:?})", p.to, p.tell, p.mode),
            MessagePlan::Ask(p) => write!(
                f,
                "Ask(to={}, {:?}, timeout={:?}, on_error={})",
                p.to,
                p.ask,
                p.timeout,
                p.on_error.is_some()
            ),
            MessagePlan::Sequence(items) => write!(f, "Sequence(len={})", items.len()),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("nested sequences are not a valid message plan")]
    NestedSequence,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nothing_flattens_empty() {
        assert!(MessagePlan::Nothing.flatten().unwrap().is_empty());
    }

    #[test]
    fn single_instruction_flattens_to_one() {
        let flat = MessagePlan::event("TICK", json!(1)).flatten().unwrap();
        assert_eq!(flat.len(), 1);
    }

    #[test]
    fn sequence_preserves_order_and_skips_nothing() {
        let flat = MessagePlan::seq(vec![
            MessagePlan::event("A", json!(null)),
            MessagePlan::Nothing,
            MessagePlan::event("B", json!(null)),
        ])
        .flatten()
        .unwrap();
        let types: Vec<_> = flat
            .iter()
            .map(|p| match p {
                MessagePlan::Event(env) => env.msg_type.clone(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(types, ["A", "B"]);
    }

    #[test]
    fn nested_sequence_is_invalid() {
        let plan = MessagePlan::seq(vec![MessagePlan::seq(vec![])]);
        assert_eq!(plan.flatten().unwrap_err(), PlanError::NestedSequence);
    }
}
