use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use crate::actor::cell::{ActorCell, CellRef};
use crate::actor::props::Props;
use crate::actor::supervision::SupervisionStrategy;
use crate::actor::SpawnError;
use crate::address::Address;
use crate::kernel::kernel::{kernel, start_behavior};
use crate::kernel::mailbox::mailbox;
use crate::kernel::queue::OverflowPolicy;
use crate::system::{ActorSystem, SystemMsg};
use crate::validate::{validate_name, validate_path};

/// Registry of live cells, keyed by path.
///
/// The only place addresses resolve to cells; parents reach children
/// through here, which keeps the hierarchy cycle-free and lets a
/// restart swap the cell behind a stable address.
#[derive(Clone)]
pub(crate) struct Provider {
    inner: Arc<ProviderInner>,
}

struct ProviderInner {
    cells: DashMap<String, CellRef>,
}

pub(crate) struct MailboxSpec {
    pub capacity: usize,
    pub policy: OverflowPolicy,
    pub msg_process_limit: u32,
}

impl Provider {
    pub(crate) fn new() -> Provider {
        Provider {
            inner: Arc::new(ProviderInner {
                cells: DashMap::new(),
            }),
        }
    }

    /// Creates and starts a cell: behavior instance, mailbox, kernel
    /// task, registry entry, parent link, `Init` on the system lane.
    pub(crate) fn create_cell(
        &self,
        sys: &ActorSystem,
        props: Props,
        address: Address,
        parent: Option<Address>,
        supervision: Option<SupervisionStrategy>,
        mbox: MailboxSpec,
    ) -> Result<CellRef, SpawnError> {
        validate_name(address.id())?;
        // catches hostile partition strings too; they end up in the path
        validate_path(address.path())?;

        if self.inner.cells.len() >= sys.config().limits.max_actors {
            return Err(SpawnError::SystemSaturated(sys.config().limits.max_actors));
        }

        trace!("attempting to create actor at: {}", address.path());

        let parent_ref = match &parent {
            Some(parent) => Some(self.lookup(parent.path()).ok_or_else(|| {
                SpawnError::StartFailed(format!("parent {parent} is not registered"))
            })?),
            None => None,
        };

        // the first instance is built eagerly so the cell carries the
        // behavior's supervision strategy from the start
        let first = start_behavior(&props)?;
        let strategy = supervision.unwrap_or_else(|| first.supervision_strategy());

        let (sender, mailbox) = mailbox(mbox.capacity, mbox.policy, mbox.msg_process_limit);
        let cell = ActorCell::new(address.clone(), parent, strategy, sender);

        self.register(address.path(), CellRef::new(cell.clone()))?;

        kernel(first, props, cell.clone(), mailbox, sys);

        if let Some(parent_ref) = parent_ref {
            parent_ref.cell.add_child(address);
        }

        let cell_ref = CellRef::new(cell);
        cell_ref.cell.sys_send(SystemMsg::Init);
        sys.counters().note_spawn();

        Ok(cell_ref)
    }

    fn register(&self, path: &str, cell: CellRef) -> Result<(), SpawnError> {
        use dashmap::mapref::entry::Entry;
        match self.inner.cells.entry(path.to_string()) {
            Entry::Occupied(_) => Err(SpawnError::AlreadyExists(path.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(cell);
                Ok(())
            }
        }
    }

    pub(crate) fn unregister(&self, path: &str) {
        self.inner.cells.remove(path);
    }

    pub(crate) fn lookup(&self, path: &str) -> Option<CellRef> {
        self.inner.cells.get(path).map(|r| r.value().clone())
    }

    /// First live cell whose address id matches.
    pub(crate) fn find_by_id(&self, id: &str) -> Option<CellRef> {
        self.inner
            .cells
            .iter()
            .find(|r| r.value().address().id() == id)
            .map(|r| r.value().clone())
    }

    pub(crate) fn list(&self) -> Vec<Address> {
        self.inner
            .cells
            .iter()
            .map(|r| r.value().address().clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.cells.len()
    }

    /// Detaches a terminated actor from every publisher it subscribed
    /// to; terminating without unsubscribing must not leak table slots.
    pub(crate) fn forget_subscriber(&self, subscriber: &Address) {
        for entry in self.inner.cells.iter() {
            entry.value().cell.subscribers().remove_subscriber(subscriber);
        }
    }
}
