use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::FutureExt;
use serde_json::json;
use tracing::trace;

use crate::actor::behavior::BoxBehavior;
use crate::actor::cell::{ActorCell, CellStatus, Context};
use crate::actor::supervision::{Directive, FailureReason};
use crate::address::Address;
use crate::ask::Waiter;
use crate::kernel::interpreter::run_plan;
use crate::kernel::queue::{queue, EnqueueError, Enqueued, OverflowPolicy, QueueReader, QueueWriter};
use crate::kernel::Dock;
use crate::message::{Envelope, ASK_TIMEOUT_TYPE, SEND_FAILED_TYPE};
use crate::system::{SystemCmd, SystemEvent, SystemMsg};

/// Writer half of a cell's mailbox: the bounded user lane, the
/// unbounded system lane and the scheduled bit shared with the reader.
#[derive(Clone)]
pub(crate) struct MailboxSender {
    queue: QueueWriter,
    sys: SysQueue,
    scheduled: Arc<AtomicBool>,
}

impl MailboxSender {
    pub(crate) fn try_enqueue(&self, env: Envelope) -> Result<Enqueued, EnqueueError> {
        self.queue.try_enqueue(env)
    }

    pub(crate) async fn enqueue(&self, env: Envelope) -> Result<Enqueued, EnqueueError> {
        self.queue.enqueue(env).await
    }

    pub(crate) fn policy(&self) -> OverflowPolicy {
        self.queue.policy()
    }

    pub(crate) fn sys_enqueue(&self, msg: SystemMsg) {
        self.sys.push(msg);
    }

    pub(crate) fn set_scheduled(&self, b: bool) {
        self.scheduled.store(b, Ordering::Release);
    }

    pub(crate) fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }

    /// Pending user envelopes plus staged system messages.
    pub(crate) fn len(&self) -> usize {
        self.queue.len() + self.sys.len()
    }
}

/// Reader half, owned by the cell's kernel task.
pub(crate) struct Mailbox {
    queue: QueueReader,
    sys: SysQueue,
    suspended: AtomicBool,
    scheduled: Arc<AtomicBool>,
    msg_process_limit: u32,
}

impl Mailbox {
    pub(crate) fn try_dequeue(&self) -> Option<Envelope> {
        self.queue.try_dequeue().ok()
    }

    pub(crate) fn has_msgs(&self) -> bool {
        self.queue.has_msgs()
    }

    pub(crate) fn has_sys_msgs(&self) -> bool {
        !self.sys.is_empty()
    }

    pub(crate) fn drain_sys(&self) -> Vec<SystemMsg> {
        self.sys.drain()
    }

    pub(crate) fn drain_user(&self) -> Vec<Envelope> {
        self.queue.drain()
    }

    pub(crate) fn close_user(&self) -> Vec<Envelope> {
        self.queue.close()
    }

    pub(crate) fn set_suspended(&self, b: bool) {
        self.suspended.store(b, Ordering::Release);
    }

    pub(crate) fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    pub(crate) fn set_scheduled(&self, b: bool) {
        self.scheduled.store(b, Ordering::Release);
    }

    pub(crate) fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }

    fn msg_process_limit(&self) -> u32 {
        self.msg_process_limit
    }
}

/// Unbounded lane for runtime-internal messages. Never subject to the
/// user overflow policy; lifecycle traffic must not be droppable.
#[derive(Clone, Default)]
struct SysQueue {
    buf: Arc<Mutex<VecDeque<SystemMsg>>>,
}

impl SysQueue {
    fn push(&self, msg: SystemMsg) {
        self.buf.lock().unwrap().push_back(msg);
    }

    fn drain(&self) -> Vec<SystemMsg> {
        self.buf.lock().unwrap().drain(..).collect()
    }

    fn is_empty(&self) -> bool {
        self.buf.lock().unwrap().is_empty()
    }

    fn len(&self) -> usize {
        self.buf.lock().unwrap().len()
    }
}

pub(crate) fn mailbox(
    capacity: usize,
    policy: OverflowPolicy,
    msg_process_limit: u32,
) -> (MailboxSender, Mailbox) {
    let (qw, qr) = queue(capacity, policy);
    let sys = SysQueue::default();
    let scheduled = Arc::new(AtomicBool::new(false));

    let sender = MailboxSender {
        queue: qw,
        sys: sys.clone(),
        scheduled: scheduled.clone(),
    };

    let mailbox = Mailbox {
        queue: qr,
        sys,
        suspended: AtomicBool::new(true),
        scheduled,
        msg_process_limit,
    };

    (sender, mailbox)
}

/// One scheduled run of a cell: system lane first, then up to
/// `msg_process_limit` user envelopes, then the system lane again.
/// The limit bounds how long one cell can hold a worker.
pub(crate) async fn run_mailbox(mbox: &Mailbox, ctx: Context, dock: &Dock) {
    let mut behavior = dock.behavior.lock().unwrap().take();
    let cell = &dock.cell;

    process_sys_msgs(mbox, &ctx, cell, &mut behavior).await;

    if behavior.is_some() && !mbox.is_suspended() {
        process_msgs(mbox, &ctx, cell, &mut behavior).await;
    }

    process_sys_msgs(mbox, &ctx, cell, &mut behavior).await;

    if let Some(b) = behavior.as_ref() {
        cell.store_snapshot(b.snapshot());
    }
    if behavior.is_some() {
        *dock.behavior.lock().unwrap() = behavior;
    }

    mbox.set_scheduled(false);

    let has_msgs = (mbox.has_msgs() && !mbox.is_suspended()) || mbox.has_sys_msgs();
    if has_msgs && !mbox.is_scheduled() {
        mbox.set_scheduled(true);
        cell.kernel().schedule();
    }
}

async fn process_msgs(
    mbox: &Mailbox,
    ctx: &Context,
    cell: &ActorCell,
    behavior: &mut Option<BoxBehavior>,
) {
    let mut count = 0;

    while count < mbox.msg_process_limit() {
        if cell.status() != CellStatus::Running {
            break;
        }
        match mbox.try_dequeue() {
            Some(env) => {
                handle_envelope(env, mbox, ctx, cell, behavior).await;
                process_sys_msgs(mbox, ctx, cell, behavior).await;

                if mbox.is_suspended() || behavior.is_none() {
                    break;
                }
                count += 1;
            }
            None => break,
        }
    }
}

async fn handle_envelope(
    env: Envelope,
    mbox: &Mailbox,
    ctx: &Context,
    cell: &ActorCell,
    behavior: &mut Option<BoxBehavior>,
) {
    cell.note_processed();

    // Ask replies run the stored continuation instead of the handler.
    if env.is_response() {
        if let Some(id) = env.correlation_id.clone() {
            match ctx.system.asks().take(&id) {
                Some(ask) => {
                    if let Waiter::Cell { on_ok, .. } = ask.waiter {
                        let plan = on_ok(env.payload);
                        let b = behavior.as_mut().expect("behavior present for live cell");
                        if let Err(e) = run_plan(plan, ctx, cell, b).await {
                            fail(
                                mbox,
                                ctx,
                                cell,
                                FailureReason::InvalidPlan(e.to_string()),
                                None,
                            );
                        }
                    }
                }
                None => trace!("late reply {id} dropped"),
            }
        }
        return;
    }

    let b = behavior.as_mut().expect("behavior present for live cell");
    let offending = env.clone();
    let outcome = AssertUnwindSafe(b.on_message(ctx, env)).catch_unwind().await;

    match outcome {
        Ok(Ok(plan)) => {
            if let Err(e) = run_plan(plan, ctx, cell, b).await {
                fail(
                    mbox,
                    ctx,
                    cell,
                    FailureReason::InvalidPlan(e.to_string()),
                    Some(offending),
                );
            }
        }
        Ok(Err(err)) => fail(
            mbox,
            ctx,
            cell,
            FailureReason::Handler(err.message),
            Some(offending),
        ),
        Err(panic) => fail(
            mbox,
            ctx,
            cell,
            FailureReason::Panic(panic_message(panic)),
            Some(offending),
        ),
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// Transition to `failed`, stop dequeuing and notify the supervisor.
/// The offending envelope is dead-lettered, never redelivered.
fn fail(
    mbox: &Mailbox,
    ctx: &Context,
    cell: &ActorCell,
    reason: FailureReason,
    offending: Option<Envelope>,
) {
    if let Some(env) = offending {
        ctx.system.dead_letter(
            cell.address().clone(),
            env.sender.clone(),
            &env.msg_type,
            "handler failed; envelope not redelivered",
        );
    }

    cell.set_status(CellStatus::Failed);
    mbox.set_suspended(true);

    ctx.system.publish_event(SystemEvent::ActorFailed {
        actor: cell.address().clone(),
        reason: reason.to_string(),
    });

    match cell.parent() {
        Some(parent) => {
            if let Some(parent_ref) = ctx.system.provider().lookup(parent.path()) {
                parent_ref.cell.sys_send(SystemMsg::ChildFailed {
                    child: cell.address().clone(),
                    reason,
                });
            }
        }
        // the guardian itself failed; its failure terminates the system
        None => ctx.system.terminate_guardian(),
    }
}

async fn process_sys_msgs(
    mbox: &Mailbox,
    ctx: &Context,
    cell: &ActorCell,
    behavior: &mut Option<BoxBehavior>,
) {
    // Stage what is queued now so messages produced while handling
    // (e.g. during a restart cascade) wait for the next pass.
    for msg in mbox.drain_sys() {
        match msg {
            SystemMsg::Init => handle_init(mbox, ctx, cell, behavior).await,
            SystemMsg::Command(SystemCmd::Stop) => start_terminating(ctx, cell, mbox),
            SystemMsg::Command(SystemCmd::Restart) => start_restarting(ctx, cell),
            SystemMsg::Command(SystemCmd::Resume) => {
                cell.set_status(CellStatus::Running);
                mbox.set_suspended(false);
            }
            SystemMsg::ChildFailed { child, reason } => {
                handle_failure(mbox, ctx, cell, child, reason)
            }
            SystemMsg::ChildTerminated { child } => death_watch(cell, &child),
            SystemMsg::AskFailed {
                correlation_id,
                target,
                error,
                on_error,
            } => {
                let Some(b) = behavior.as_mut() else { continue };
                let plan = match on_error {
                    Some(f) => f(error),
                    None => {
                        // no continuation: surface to the handler
                        let env = Envelope::new(
                            ASK_TIMEOUT_TYPE,
                            json!({
                                "correlation_id": correlation_id,
                                "target": target.uri(),
                                "error": error.to_string(),
                            }),
                        );
                        match AssertUnwindSafe(b.on_message(ctx, env)).catch_unwind().await {
                            Ok(Ok(plan)) => plan,
                            _ => continue,
                        }
                    }
                };
                if let Err(e) = run_plan(plan, ctx, cell, b).await {
                    fail(
                        mbox,
                        ctx,
                        cell,
                        FailureReason::InvalidPlan(e.to_string()),
                        None,
                    );
                }
            }
            SystemMsg::SendFailed { to, msg_type } => {
                let Some(b) = behavior.as_mut() else { continue };
                let env = Envelope::new(
                    SEND_FAILED_TYPE,
                    json!({ "to": to.uri(), "type": msg_type }),
                );
                if let Ok(Ok(plan)) =
                    AssertUnwindSafe(b.on_message(ctx, env)).catch_unwind().await
                {
                    let _ = run_plan(plan, ctx, cell, b).await;
                }
            }
        }
    }
}

async fn handle_init(
    mbox: &Mailbox,
    ctx: &Context,
    cell: &ActorCell,
    behavior: &mut Option<BoxBehavior>,
) {
    let Some(b) = behavior.as_mut() else { return };

    match std::panic::catch_unwind(AssertUnwindSafe(|| b.on_start(ctx))) {
        Ok(Ok(plan)) => {
            cell.set_status(CellStatus::Running);
            mbox.set_suspended(false);

            if let Err(e) = run_plan(plan, ctx, cell, b).await {
                fail(
                    mbox,
                    ctx,
                    cell,
                    FailureReason::InvalidPlan(e.to_string()),
                    None,
                );
                return;
            }

            if !cell.address().path().starts_with("/system") {
                ctx.system.publish_event(SystemEvent::ActorSpawned {
                    actor: cell.address().clone(),
                });
            }
        }
        Ok(Err(err)) => fail(
            mbox,
            ctx,
            cell,
            FailureReason::StartFailed(err.message),
            None,
        ),
        Err(panic) => fail(
            mbox,
            ctx,
            cell,
            FailureReason::StartFailed(panic_message(panic)),
            None,
        ),
    }
}

/// Stop: children drain first, depth-first; the cell completes its own
/// termination when the last child reports back.
fn start_terminating(ctx: &Context, cell: &ActorCell, mbox: &Mailbox) {
    cell.set_terminating();
    cell.set_status(CellStatus::Stopping);
    mbox.set_suspended(true);

    let children = cell.children();
    if children.is_empty() {
        cell.kernel().terminate();
    } else {
        for child in children {
            if let Some(child_ref) = ctx.system.provider().lookup(child.path()) {
                child_ref.cell.sys_send(SystemMsg::Command(SystemCmd::Stop));
            } else {
                cell.remove_child(&child);
            }
        }
        if !cell.has_children() {
            cell.kernel().terminate();
        }
    }
}

fn start_restarting(ctx: &Context, cell: &ActorCell) {
    let children = cell.children();
    if children.is_empty() {
        cell.kernel().restart();
    } else {
        cell.set_restarting(true);
        for child in children {
            if let Some(child_ref) = ctx.system.provider().lookup(child.path()) {
                child_ref.cell.sys_send(SystemMsg::Command(SystemCmd::Stop));
            } else {
                cell.remove_child(&child);
            }
        }
        if !cell.has_children() {
            cell.set_restarting(false);
            cell.kernel().restart();
        }
    }
}

/// Supervisor side of a child failure: consult the child's strategy,
/// apply the restart budget, then direct the child's kernel.
fn handle_failure(
    mbox: &Mailbox,
    ctx: &Context,
    cell: &ActorCell,
    child: Address,
    reason: FailureReason,
) {
    let Some(child_ref) = ctx.system.provider().lookup(child.path()) else {
        return;
    };

    let strategy = child_ref.cell.strategy().clone();
    let mut directive = strategy.decide(&reason);

    if directive == Directive::Restart && !child_ref.cell.record_restart(Instant::now()) {
        trace!(
            "restart budget of {child} exhausted; upgrading to {:?}",
            strategy.on_budget_exhausted
        );
        directive = strategy.on_budget_exhausted.directive();
    }

    match directive {
        Directive::Resume => child_ref.cell.kernel().resume(),
        Directive::Restart => child_ref.cell.sys_send(SystemMsg::Command(SystemCmd::Restart)),
        Directive::Stop => child_ref.cell.sys_send(SystemMsg::Command(SystemCmd::Stop)),
        Directive::Escalate => {
            // the failure becomes this cell's own
            cell.set_status(CellStatus::Failed);
            mbox.set_suspended(true);
            match cell.parent() {
                Some(parent) => {
                    if let Some(parent_ref) = ctx.system.provider().lookup(parent.path()) {
                        parent_ref.cell.sys_send(SystemMsg::ChildFailed {
                            child: cell.address().clone(),
                            reason: FailureReason::Escalated(child),
                        });
                    }
                }
                None => ctx.system.terminate_guardian(),
            }
        }
    }
}

/// Each stopped child reports here; pending terminate/restart completes
/// once the child set is empty.
fn death_watch(cell: &ActorCell, child: &Address) {
    if cell.is_child(child) {
        cell.remove_child(child);
    }

    if !cell.has_children() {
        if cell.is_terminating() {
            cell.kernel().terminate();
        }
        if cell.is_restarting() {
            cell.set_restarting(false);
            cell.kernel().restart();
        }
    }
}
