pub(crate) mod interpreter;
pub(crate) mod kernel;
pub(crate) mod kernel_ref;
pub(crate) mod mailbox;
pub(crate) mod provider;
pub mod queue;

use std::sync::{Arc, Mutex};

use crate::actor::behavior::BoxBehavior;
use crate::actor::cell::ActorCell;

/// Signals driving one cell's kernel task.
#[derive(Debug)]
pub(crate) enum KernelMsg {
    /// The cell has work; run one mailbox pass.
    RunCell,
    /// Supervision directive: keep state, mark running again.
    ResumeCell,
    /// Supervision directive: fresh behavior, same address.
    RestartCell,
    /// Final stop; the kernel task exits after this.
    TerminateCell,
}

/// The kernel task's grip on a cell: the behavior slot plus the cell
/// handle. The slot is taken for the duration of a mailbox pass, which
/// is what enforces at-most-one handler in flight.
pub(crate) struct Dock {
    pub behavior: Arc<Mutex<Option<BoxBehavior>>>,
    pub cell: ActorCell,
}

impl Clone for Dock {
    fn clone(&self) -> Dock {
        Dock {
            behavior: self.behavior.clone(),
            cell: self.cell.clone(),
        }
    }
}
