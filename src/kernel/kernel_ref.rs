use tokio::sync::mpsc::UnboundedSender;

use crate::actor::cell::ActorCell;
use crate::actor::SendError;
use crate::kernel::queue::{EnqueueError, Enqueued, OverflowPolicy};
use crate::kernel::KernelMsg;
use crate::message::Envelope;
use crate::system::ActorSystem;

/// Channel to a cell's kernel task.
///
/// Sends to a terminated task are silently ignored; the task only goes
/// away once the cell is stopped, and stopped cells accept nothing.
#[derive(Clone)]
pub(crate) struct KernelRef {
    pub(crate) tx: UnboundedSender<KernelMsg>,
}

impl KernelRef {
    pub(crate) fn schedule(&self) {
        self.send(KernelMsg::RunCell);
    }

    pub(crate) fn resume(&self) {
        self.send(KernelMsg::ResumeCell);
    }

    pub(crate) fn restart(&self) {
        self.send(KernelMsg::RestartCell);
    }

    pub(crate) fn terminate(&self) {
        self.send(KernelMsg::TerminateCell);
    }

    fn send(&self, msg: KernelMsg) {
        let _ = self.tx.send(msg);
    }
}

/// Enqueues onto the target's user lane and flips its ready bit.
///
/// This is the scheduler's `submit`: non-blocking for every policy but
/// `block-sender`, no queue growth beyond the mailbox itself. Overflow
/// drops dead-letter here; `fail-sender` surfaces to the caller.
pub(crate) async fn dispatch(
    env: Envelope,
    target: &ActorCell,
    sys: &ActorSystem,
) -> Result<(), SendError> {
    sys.counters().note_message();

    let sender = env.sender.clone();
    let msg_type = env.msg_type.clone();

    match target.mailbox().enqueue(env).await {
        Ok(Enqueued::Accepted) => {
            target.schedule();
            Ok(())
        }
        Ok(Enqueued::Displaced(evicted)) => {
            sys.dead_letter(
                target.address().clone(),
                evicted.sender.clone(),
                &evicted.msg_type,
                "mailbox overflow (drop-oldest)",
            );
            target.schedule();
            Ok(())
        }
        Err(EnqueueError::Full(rejected)) => match target.mailbox().policy() {
            OverflowPolicy::FailSender => Err(SendError::MailboxFull(target.address().clone())),
            _ => {
                sys.dead_letter(
                    target.address().clone(),
                    rejected.sender.clone(),
                    &rejected.msg_type,
                    "mailbox overflow (drop-newest)",
                );
                Ok(())
            }
        },
        Err(EnqueueError::Closed(_)) => {
            sys.dead_letter(
                target.address().clone(),
                sender,
                &msg_type,
                "mailbox closed",
            );
            Err(SendError::MailboxClosed(target.address().clone()))
        }
    }
}
