use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::actor::events::{SubToken, SubscriberTable, TopicFilter};
use crate::actor::props::Props;
use crate::actor::supervision::{RestartWindow, SupervisionStrategy};
use crate::actor::SpawnError;
use crate::address::Address;
use crate::kernel::kernel_ref::KernelRef;
use crate::kernel::mailbox::MailboxSender;
use crate::system::{ActorSystem, SpawnOptions, SystemMsg};

/// Lifecycle state of a cell.
///
/// `Stopped` is terminal: a fresh incarnation at the same address is a
/// new cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellStatus {
    Starting,
    Running,
    Suspended,
    Stopping,
    Stopped,
    Failed,
}

impl CellStatus {
    fn from_u8(v: u8) -> CellStatus {
        match v {
            0 => CellStatus::Starting,
            1 => CellStatus::Running,
            2 => CellStatus::Suspended,
            3 => CellStatus::Stopping,
            4 => CellStatus::Stopped,
            _ => CellStatus::Failed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            CellStatus::Starting => 0,
            CellStatus::Running => 1,
            CellStatus::Suspended => 2,
            CellStatus::Stopping => 3,
            CellStatus::Stopped => 4,
            CellStatus::Failed => 5,
        }
    }
}

/// Owns one behavior instance and one mailbox; the unit of concurrency
/// and of mutable state ownership.
#[derive(Clone)]
pub(crate) struct ActorCell {
    inner: Arc<ActorCellInner>,
}

struct ActorCellInner {
    address: Address,
    /// Supervisor link kept as an address, not a reference; the parent
    /// is resolved through the registry so restarts can swap the cell
    /// behind a stable address.
    parent: Option<Address>,
    status: AtomicU8,
    incarnation: AtomicU64,
    children: Children,
    subscribers: SubscriberTable,
    strategy: SupervisionStrategy,
    restarts: Mutex<RestartWindow>,
    mailbox: MailboxSender,
    kernel: OnceLock<KernelRef>,
    is_terminating: AtomicBool,
    is_restarting: AtomicBool,
    processed: AtomicU64,
    snapshot: Mutex<Value>,
}

impl ActorCell {
    pub(crate) fn new(
        address: Address,
        parent: Option<Address>,
        strategy: SupervisionStrategy,
        mailbox: MailboxSender,
    ) -> ActorCell {
        ActorCell {
            inner: Arc::new(ActorCellInner {
                address,
                parent,
                status: AtomicU8::new(CellStatus::Starting.as_u8()),
                incarnation: AtomicU64::new(0),
                children: Children::new(),
                subscribers: SubscriberTable::default(),
                strategy,
                restarts: Mutex::new(RestartWindow::default()),
                mailbox,
                kernel: OnceLock::new(),
                is_terminating: AtomicBool::new(false),
                is_restarting: AtomicBool::new(false),
                processed: AtomicU64::new(0),
                snapshot: Mutex::new(Value::Null),
            }),
        }
    }

    pub(crate) fn init(&self, kernel: KernelRef) {
        let _ = self.inner.kernel.set(kernel);
    }

    pub(crate) fn kernel(&self) -> &KernelRef {
        self.inner.kernel.get().expect("cell is initialized")
    }

    pub(crate) fn address(&self) -> &Address {
        &self.inner.address
    }

    pub(crate) fn parent(&self) -> Option<&Address> {
        self.inner.parent.as_ref()
    }

    pub(crate) fn status(&self) -> CellStatus {
        CellStatus::from_u8(self.inner.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: CellStatus) {
        self.inner.status.store(status.as_u8(), Ordering::Release);
    }

    pub(crate) fn incarnation(&self) -> u64 {
        self.inner.incarnation.load(Ordering::Acquire)
    }

    pub(crate) fn bump_incarnation(&self) -> u64 {
        self.inner.incarnation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn mailbox(&self) -> &MailboxSender {
        &self.inner.mailbox
    }

    pub(crate) fn subscribers(&self) -> &SubscriberTable {
        &self.inner.subscribers
    }

    pub(crate) fn strategy(&self) -> &SupervisionStrategy {
        &self.inner.strategy
    }

    /// Budget check: true while the restart is allowed inside the
    /// rolling window.
    pub(crate) fn record_restart(&self, now: Instant) -> bool {
        let s = &self.inner.strategy;
        self.inner
            .restarts
            .lock()
            .unwrap()
            .record(now, s.max_retries, s.window)
    }

    pub(crate) fn add_child(&self, address: Address) {
        self.inner.children.add(address);
    }

    pub(crate) fn remove_child(&self, address: &Address) {
        self.inner.children.remove(address);
    }

    pub(crate) fn children(&self) -> Vec<Address> {
        self.inner.children.all()
    }

    pub(crate) fn has_children(&self) -> bool {
        self.inner.children.count() > 0
    }

    pub(crate) fn is_child(&self, address: &Address) -> bool {
        self.inner.children.contains(address)
    }

    pub(crate) fn set_terminating(&self) {
        self.inner.is_terminating.store(true, Ordering::Release);
    }

    pub(crate) fn is_terminating(&self) -> bool {
        self.inner.is_terminating.load(Ordering::Acquire)
    }

    pub(crate) fn set_restarting(&self, b: bool) {
        self.inner.is_restarting.store(b, Ordering::Release);
    }

    pub(crate) fn is_restarting(&self) -> bool {
        self.inner.is_restarting.load(Ordering::Acquire)
    }

    pub(crate) fn note_processed(&self) {
        self.inner.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn processed(&self) -> u64 {
        self.inner.processed.load(Ordering::Relaxed)
    }

    pub(crate) fn store_snapshot(&self, snapshot: Value) {
        *self.inner.snapshot.lock().unwrap() = snapshot;
    }

    pub(crate) fn snapshot(&self) -> Value {
        self.inner.snapshot.lock().unwrap().clone()
    }

    /// Enqueue onto the system lane and make sure a turn is scheduled.
    pub(crate) fn sys_send(&self, msg: SystemMsg) {
        self.inner.mailbox.sys_enqueue(msg);
        self.schedule();
    }

    /// Flips the ready bit and signals the kernel task, once. Safe to
    /// call in the narrow window before the kernel is attached; the
    /// `Init` sent right after attachment picks the work up.
    pub(crate) fn schedule(&self) {
        if !self.inner.mailbox.is_scheduled() {
            self.inner.mailbox.set_scheduled(true);
            if let Some(kernel) = self.inner.kernel.get() {
                kernel.schedule();
            }
        }
    }
}

impl fmt::Debug for ActorCell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Cell[{} {:?} inc={}]",
            self.inner.address,
            self.status(),
            self.incarnation()
        )
    }
}

/// A lightweight handle to a live cell.
///
/// Everything user-facing flows through [`ActorSystem`] and plans; the
/// ref exposes read-only cell facts (status, incarnation, stats).
#[derive(Clone)]
pub struct CellRef {
    pub(crate) cell: ActorCell,
}

impl CellRef {
    pub(crate) fn new(cell: ActorCell) -> CellRef {
        CellRef { cell }
    }

    pub fn address(&self) -> &Address {
        self.cell.address()
    }

    pub fn status(&self) -> CellStatus {
        self.cell.status()
    }

    pub fn incarnation(&self) -> u64 {
        self.cell.incarnation()
    }

    pub fn stats(&self) -> CellStats {
        CellStats {
            status: self.cell.status(),
            incarnation: self.cell.incarnation(),
            processed: self.cell.processed(),
            mailbox_len: self.cell.mailbox().len(),
            children: self.cell.children().len(),
            subscribers: self.cell.subscribers().len(),
        }
    }

    /// The behavior state as of the end of its latest turn.
    pub fn current_snapshot(&self) -> Value {
        self.cell.snapshot()
    }
}

impl PartialEq for CellRef {
    fn eq(&self, other: &CellRef) -> bool {
        self.address() == other.address()
    }
}

impl fmt::Debug for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CellRef[{}]", self.address())
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.address())
    }
}

#[derive(Clone, Debug)]
pub struct CellStats {
    pub status: CellStatus,
    pub incarnation: u64,
    pub processed: u64,
    pub mailbox_len: usize,
    pub children: usize,
    pub subscribers: usize,
}

/// Child addresses, keyed by id.
#[derive(Clone)]
struct Children {
    actors: Arc<RwLock<HashMap<String, Address>>>,
}

impl Children {
    fn new() -> Children {
        Children {
            actors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn add(&self, address: Address) {
        self.actors
            .write()
            .unwrap()
            .insert(address.id().to_string(), address);
    }

    fn remove(&self, address: &Address) {
        self.actors.write().unwrap().remove(address.id());
    }

    fn contains(&self, address: &Address) -> bool {
        self.actors
            .read()
            .unwrap()
            .get(address.id())
            .map(|a| a == address)
            .unwrap_or(false)
    }

    fn count(&self) -> usize {
        self.actors.read().unwrap().len()
    }

    fn all(&self) -> Vec<Address> {
        self.actors.read().unwrap().values().cloned().collect()
    }
}

/// Handed to every behavior callback; the actor's view of the runtime.
///
/// Operations are performed from the actor's perspective: children
/// spawned here land under the current actor in the hierarchy.
pub struct Context {
    pub(crate) myself: CellRef,
    pub(crate) system: ActorSystem,
}

impl Context {
    pub fn myself(&self) -> &Address {
        self.myself.address()
    }

    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    pub fn incarnation(&self) -> u64 {
        self.myself.incarnation()
    }

    /// Spawns a child supervised by the current actor.
    pub fn spawn_child(&self, props: Props, opts: SpawnOptions) -> Result<Address, SpawnError> {
        self.system
            .spawn_under(props, opts, Some(self.myself().clone()))
    }

    /// Subscribes the current actor to another publisher's emits.
    pub fn subscribe_to(&self, publisher: &Address, filter: impl Into<TopicFilter>) -> Option<SubToken> {
        self.system
            .subscribe(publisher, self.myself(), filter.into())
            .ok()
    }

    pub fn default_ask_timeout(&self) -> Duration {
        self.system.config().ask.default_timeout
    }
}
