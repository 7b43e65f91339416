use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::unbounded_channel;
use tracing::{trace, warn};

use crate::actor::behavior::BoxBehavior;
use crate::actor::cell::{ActorCell, CellRef, CellStatus, Context};
use crate::actor::props::Props;
use crate::actor::supervision::FailureReason;
use crate::actor::SpawnError;
use crate::kernel::interpreter::run_plan;
use crate::kernel::kernel_ref::KernelRef;
use crate::kernel::mailbox::{run_mailbox, Mailbox};
use crate::kernel::{Dock, KernelMsg};
use crate::system::{ActorSystem, SystemEvent, SystemMsg};

/// Spawns the cell's kernel task: the single consumer of its mailbox
/// and the only place its behavior instance lives.
pub(crate) fn kernel(
    first: BoxBehavior,
    props: Props,
    cell: ActorCell,
    mailbox: Mailbox,
    sys: &ActorSystem,
) -> KernelRef {
    let (tx, mut rx) = unbounded_channel::<KernelMsg>();
    let kr = KernelRef { tx };
    cell.init(kr.clone());

    let dock = Dock {
        behavior: Arc::new(Mutex::new(Some(first))),
        cell,
    };

    let asys = sys.clone();
    sys.exec().spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                KernelMsg::RunCell => {
                    let ctx = Context {
                        myself: CellRef::new(dock.cell.clone()),
                        system: asys.clone(),
                    };
                    run_mailbox(&mailbox, ctx, &dock).await;
                }
                KernelMsg::ResumeCell => {
                    dock.cell.set_status(CellStatus::Running);
                    mailbox.set_suspended(false);
                    if (mailbox.has_msgs() || mailbox.has_sys_msgs()) && !mailbox.is_scheduled() {
                        mailbox.set_scheduled(true);
                        dock.cell.kernel().schedule();
                    }
                }
                KernelMsg::RestartCell => {
                    restart_cell(&dock, &mailbox, &props, &asys).await;
                }
                KernelMsg::TerminateCell => {
                    terminate_cell(&dock, &mailbox, &asys);
                    break;
                }
            }
        }
    });

    kr
}

pub(crate) fn start_behavior(props: &Props) -> Result<BoxBehavior, SpawnError> {
    catch_unwind(AssertUnwindSafe(|| props.produce()))
        .map_err(|_| SpawnError::StartFailed("behavior initializer panicked".into()))
}

/// Replaces the behavior with a fresh instance at the same address.
///
/// Pending user messages are discarded to dead letters; the system lane
/// and the subscriber table survive, so prior subscribers stay attached
/// to the new incarnation.
async fn restart_cell(dock: &Dock, mailbox: &Mailbox, props: &Props, sys: &ActorSystem) {
    let cell = &dock.cell;

    // held in suspension for the backoff gap between restarts
    cell.set_status(CellStatus::Suspended);
    tokio::time::sleep(cell.strategy().backoff).await;

    for env in mailbox.drain_user() {
        sys.dead_letter(
            cell.address().clone(),
            env.sender.clone(),
            &env.msg_type,
            "discarded on restart",
        );
    }

    match start_behavior(props) {
        Ok(behavior) => {
            *dock.behavior.lock().unwrap() = Some(behavior);
            let incarnation = cell.bump_incarnation();
            cell.set_status(CellStatus::Starting);

            let ctx = Context {
                myself: CellRef::new(cell.clone()),
                system: sys.clone(),
            };

            let start_plan = {
                let mut slot = dock.behavior.lock().unwrap();
                let b = slot.as_mut().expect("behavior just docked");
                catch_unwind(AssertUnwindSafe(|| b.on_start(&ctx)))
            };

            match start_plan {
                Ok(Ok(plan)) => {
                    cell.set_status(CellStatus::Running);
                    mailbox.set_suspended(false);

                    let mut behavior = dock.behavior.lock().unwrap().take();
                    if let Some(b) = behavior.as_mut() {
                        let _ = run_plan(plan, &ctx, cell, b).await;
                        cell.store_snapshot(b.snapshot());
                    }
                    *dock.behavior.lock().unwrap() = behavior;

                    sys.counters().note_restart();
                    sys.publish_event(SystemEvent::ActorRestarted {
                        actor: cell.address().clone(),
                        incarnation,
                    });
                    trace!("{} restarted (incarnation {incarnation})", cell.address());

                    if (mailbox.has_msgs() || mailbox.has_sys_msgs()) && !mailbox.is_scheduled() {
                        mailbox.set_scheduled(true);
                        cell.kernel().schedule();
                    }
                }
                Ok(Err(err)) => notify_start_failure(cell, sys, err.message),
                Err(_) => notify_start_failure(cell, sys, "panic in on_start".into()),
            }
        }
        Err(_) => {
            warn!("{} failed to restart: initializer panicked", cell.address());
            notify_start_failure(cell, sys, "behavior initializer panicked".into());
        }
    }
}

fn notify_start_failure(cell: &ActorCell, sys: &ActorSystem, message: String) {
    cell.set_status(CellStatus::Failed);
    match cell.parent() {
        Some(parent) => {
            if let Some(parent_ref) = sys.provider().lookup(parent.path()) {
                parent_ref.cell.sys_send(SystemMsg::ChildFailed {
                    child: cell.address().clone(),
                    reason: FailureReason::StartFailed(message),
                });
            }
        }
        None => sys.terminate_guardian(),
    }
}

/// Final stop: run `on_stop`, flush what is left to dead letters,
/// detach from the registry and report to the parent.
fn terminate_cell(dock: &Dock, mailbox: &Mailbox, sys: &ActorSystem) {
    let cell = &dock.cell;
    cell.set_status(CellStatus::Stopping);

    if let Some(mut behavior) = dock.behavior.lock().unwrap().take() {
        let ctx = Context {
            myself: CellRef::new(cell.clone()),
            system: sys.clone(),
        };
        let _ = catch_unwind(AssertUnwindSafe(|| behavior.on_stop(&ctx)));
        cell.store_snapshot(behavior.snapshot());
    }

    for env in mailbox.close_user() {
        sys.dead_letter(
            cell.address().clone(),
            env.sender.clone(),
            &env.msg_type,
            "actor stopped",
        );
    }

    cell.set_status(CellStatus::Stopped);

    sys.provider().unregister(cell.address().path());
    sys.provider().forget_subscriber(cell.address());
    sys.directory().note_stopped(cell.address());

    sys.publish_event(SystemEvent::ActorStopped {
        actor: cell.address().clone(),
    });
    trace!("{} stopped", cell.address());

    match cell.parent() {
        Some(parent) => {
            if let Some(parent_ref) = sys.provider().lookup(parent.path()) {
                parent_ref.cell.sys_send(SystemMsg::ChildTerminated {
                    child: cell.address().clone(),
                });
            }
        }
        // the guardian is down: the system is done
        None => sys.complete_shutdown(),
    }
}
