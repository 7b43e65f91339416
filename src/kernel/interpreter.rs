use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::trace;
use uuid::Uuid;

use crate::actor::behavior::BoxBehavior;
use crate::actor::cell::{ActorCell, Context};
use crate::ask::{AskError, PendingAsk, Waiter};
use crate::kernel::kernel_ref::dispatch;
use crate::message::{Envelope, EMIT_PREFIX};
use crate::plan::{AskPlan, MessagePlan, SendMode, SendPlan};
use crate::system::SystemMsg;

/// Backoff between re-attempts of a `retry(N)` send. Bounded so a
/// stuck receiver cannot pin the sender's turn for long.
const RETRY_BASE: Duration = Duration::from_millis(5);
const RETRY_CAP: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, Error)]
pub(crate) enum InterpretError {
    #[error("nested sequences are not a valid message plan")]
    NestedSequence,
    #[error("plan mints reserved message type {0}")]
    ReservedType(String),
}

/// Executes a handler's returned plan: state feed-back, emits, sends
/// and ask registration, in plan order.
///
/// A plan with zero side effects behaves exactly like `Nothing`. Sends
/// and asks never block the rest of the sequence; ask continuations run
/// in later turns when their replies arrive.
pub(crate) async fn run_plan(
    plan: MessagePlan,
    ctx: &Context,
    cell: &ActorCell,
    behavior: &mut BoxBehavior,
) -> Result<(), InterpretError> {
    let items = plan.flatten().map_err(|_| InterpretError::NestedSequence)?;

    for item in items {
        match item {
            MessagePlan::Nothing | MessagePlan::Sequence(_) => {
                // flatten() already removed both
            }
            MessagePlan::Event(env) => {
                if env.is_response() {
                    // a reply without a live correlation id is discarded
                    if env.correlation_id.is_some() {
                        ctx.system.deliver_reply(env).await;
                    }
                    continue;
                }
                if env.has_reserved_type() {
                    return Err(InterpretError::ReservedType(env.msg_type));
                }
                // fan-out: feed the state container, then broadcast
                behavior.apply_event(ctx, &env);
                publish(ctx, cell, env).await;
            }
            MessagePlan::Send(send) => {
                if send.tell.is_response() {
                    if send.tell.correlation_id.is_some() {
                        ctx.system.deliver_reply(send.tell).await;
                    }
                    continue;
                }
                if send.tell.has_reserved_type() {
                    return Err(InterpretError::ReservedType(send.tell.msg_type));
                }
                execute_send(ctx, cell, send).await;
            }
            MessagePlan::Ask(ask) => {
                if ask.ask.has_reserved_type() {
                    return Err(InterpretError::ReservedType(ask.ask.msg_type));
                }
                execute_ask(ctx, cell, ask).await;
            }
        }
    }

    Ok(())
}

/// Delivers one emit to every matching subscriber, in table order.
/// Subscribers see `EMIT:<type>` with the publisher as sender.
async fn publish(ctx: &Context, cell: &ActorCell, event: Envelope) {
    let emit_type = format!("{EMIT_PREFIX}{}", event.msg_type);
    let subscribers = cell.subscribers().matching(&emit_type);
    if subscribers.is_empty() {
        return;
    }

    let mut emit = event;
    emit.msg_type = emit_type;
    emit.sender = Some(cell.address().clone());

    for subscriber in subscribers {
        match ctx.system.resolve_cell(&subscriber) {
            Ok(target) => {
                // rejection follows the subscriber's own overflow policy
                let _ = dispatch(emit.clone(), &target.cell, &ctx.system).await;
            }
            Err(_) => ctx.system.dead_letter(
                subscriber,
                Some(cell.address().clone()),
                &emit.msg_type,
                "subscriber unreachable",
            ),
        }
    }
}

async fn execute_send(ctx: &Context, cell: &ActorCell, send: SendPlan) {
    let SendPlan { to, tell, mode } = send;
    let tell = tell.with_sender(cell.address().clone());

    let attempts = match mode {
        SendMode::FireAndForget => 1,
        SendMode::Retry(n) => n.saturating_add(1),
    };

    let mut last_err = None;
    for attempt in 0..attempts {
        if attempt > 0 {
            let backoff = RETRY_BASE.saturating_mul(attempt).min(RETRY_CAP);
            tokio::time::sleep(backoff).await;
        }

        match ctx.system.resolve_cell(&to) {
            Ok(target) => match dispatch(tell.clone(), &target.cell, &ctx.system).await {
                Ok(()) => return,
                Err(e) => last_err = Some(e.to_string()),
            },
            Err(e) => last_err = Some(e.to_string()),
        }
    }

    trace!(
        "send of {} to {to} failed after {attempts} attempt(s): {}",
        tell.msg_type,
        last_err.unwrap_or_default()
    );
    cell.sys_send(SystemMsg::SendFailed {
        to,
        msg_type: tell.msg_type,
    });
}

/// Registers the pending ask, then enqueues the request with a fresh
/// correlation id and `sender = self` so the target can reply.
async fn execute_ask(ctx: &Context, cell: &ActorCell, ask: AskPlan) {
    let AskPlan {
        to,
        ask: env,
        timeout,
        on_ok,
        on_error,
    } = ask;

    let id = Uuid::new_v4().to_string();
    ctx.system.asks().register(
        id.clone(),
        PendingAsk {
            waiter: Waiter::Cell {
                addr: cell.address().clone(),
                on_ok,
                on_error,
            },
            deadline: Instant::now() + timeout,
            target: to.clone(),
        },
    );

    let env = env
        .with_sender(cell.address().clone())
        .with_correlation_id(id.clone());

    let delivered = match ctx.system.resolve_cell(&to) {
        Ok(target) => dispatch(env, &target.cell, &ctx.system).await.is_ok(),
        Err(_) => false,
    };

    if !delivered {
        // resolve immediately instead of waiting out the deadline
        if let Some(pending) = ctx
            .system
            .asks()
            .fail(&id, AskError::TargetUnreachable(to.clone()))
        {
            if let Waiter::Cell { on_error, .. } = pending.waiter {
                cell.sys_send(SystemMsg::AskFailed {
                    correlation_id: id,
                    target: to,
                    error: AskError::TargetUnreachable(pending.target),
                    on_error,
                });
            }
        }
    }
}
