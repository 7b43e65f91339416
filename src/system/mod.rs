pub(crate) mod events;
pub(crate) mod guardian;

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::channel::oneshot;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::runtime::{Builder as RuntimeBuilder, Handle, Runtime};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::actor::cell::CellRef;
use crate::actor::events::{SubToken, TopicFilter};
use crate::actor::props::Props;
use crate::actor::supervision::{FailureReason, SupervisionStrategy};
use crate::actor::{SendError, SpawnError};
use crate::address::{Address, NodeId};
use crate::ask::{AskError, AskHandle, CorrelationTable, PendingAsk, ReplyDisposition, Waiter};
use crate::config::{load_config, RuntimeConfig};
use crate::directory::{DirectoryError, DirectoryStats, VirtualDirectory, VirtualKey};
use crate::kernel::kernel_ref::dispatch;
use crate::kernel::provider::{MailboxSpec, Provider};
use crate::kernel::queue::OverflowPolicy;
use crate::message::{DeadLetter, Envelope};
use crate::plan::ErrorCont;
use crate::validate::validate_name;

pub use self::events::SYSTEM_EVENTS_ID;
pub use self::guardian::GUARDIAN_ID;

/// Runtime-internal traffic on a cell's system lane. Never subject to
/// the user overflow policy and always processed before user messages.
pub(crate) enum SystemMsg {
    Init,
    Command(SystemCmd),
    ChildFailed {
        child: Address,
        reason: FailureReason,
    },
    ChildTerminated {
        child: Address,
    },
    AskFailed {
        correlation_id: String,
        target: Address,
        error: AskError,
        on_error: Option<ErrorCont>,
    },
    SendFailed {
        to: Address,
        msg_type: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SystemCmd {
    Stop,
    Restart,
    Resume,
}

impl std::fmt::Debug for SystemMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SystemMsg::Init => f.write_str("Init"),
            SystemMsg::Command(cmd) => write!(f, "Command({cmd:?})"),
            SystemMsg::ChildFailed { child, reason } => {
                write!(f, "ChildFailed({child}, {reason})")
            }
            SystemMsg::ChildTerminated { child } => write!(f, "ChildTerminated({child})"),
            SystemMsg::AskFailed { correlation_id, .. } => {
                write!(f, "AskFailed({correlation_id})")
            }
            SystemMsg::SendFailed { to, msg_type } => write!(f, "SendFailed({to}, {msg_type})"),
        }
    }
}

/// Lifecycle facts emitted through the system-event actor. Subscribe to
/// its emits (`EMIT:actorStopped`, `EMIT:deadLetter`, ...) to observe
/// them.
#[derive(Clone, Debug)]
pub enum SystemEvent {
    ActorSpawned { actor: Address },
    ActorStopped { actor: Address },
    ActorRestarted { actor: Address, incarnation: u64 },
    ActorFailed { actor: Address, reason: String },
    DeadLetter(DeadLetter),
}

impl SystemEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SystemEvent::ActorSpawned { .. } => "actorSpawned",
            SystemEvent::ActorStopped { .. } => "actorStopped",
            SystemEvent::ActorRestarted { .. } => "actorRestarted",
            SystemEvent::ActorFailed { .. } => "actorFailed",
            SystemEvent::DeadLetter(_) => "deadLetter",
        }
    }

    fn payload(&self) -> Value {
        match self {
            SystemEvent::ActorSpawned { actor } => json!({ "actor": actor.uri() }),
            SystemEvent::ActorStopped { actor } => json!({ "actor": actor.uri() }),
            SystemEvent::ActorRestarted { actor, incarnation } => {
                json!({ "actor": actor.uri(), "incarnation": incarnation })
            }
            SystemEvent::ActorFailed { actor, reason } => {
                json!({ "actor": actor.uri(), "reason": reason })
            }
            SystemEvent::DeadLetter(dl) => dl.payload(),
        }
    }

    fn into_envelope(self) -> Envelope {
        let payload = self.payload();
        Envelope::new(self.event_type(), payload)
    }
}

#[derive(Clone, Debug, Error)]
pub enum SystemError {
    #[error("failed to start actor system: invalid name ({0})")]
    InvalidName(String),
    #[error("failed to start actor system: sub module failed to start ({0})")]
    ModuleFailed(String),
}

/// Completed when the guardian and every descendant have stopped.
pub type Shutdown = oneshot::Receiver<()>;

/// Options for `spawn`: identity, parentage, mailbox sizing and
/// supervision.
#[derive(Clone, Debug, Default)]
pub struct SpawnOptions {
    pub id: Option<String>,
    pub kind: Option<String>,
    /// Supervising parent; the guardian when unset.
    pub parent: Option<Address>,
    pub mailbox_capacity: Option<usize>,
    pub overflow: Option<OverflowPolicy>,
    pub supervision: Option<SupervisionStrategy>,
}

impl SpawnOptions {
    pub fn named(id: impl Into<String>) -> SpawnOptions {
        SpawnOptions {
            id: Some(id.into()),
            ..SpawnOptions::default()
        }
    }

    pub fn kind(mut self, kind: impl Into<String>) -> SpawnOptions {
        self.kind = Some(kind.into());
        self
    }

    pub fn under(mut self, parent: Address) -> SpawnOptions {
        self.parent = Some(parent);
        self
    }

    pub fn mailbox(mut self, capacity: usize, overflow: OverflowPolicy) -> SpawnOptions {
        self.mailbox_capacity = Some(capacity);
        self.overflow = Some(overflow);
        self
    }

    pub fn supervised(mut self, strategy: SupervisionStrategy) -> SpawnOptions {
        self.supervision = Some(strategy);
        self
    }
}

struct ProtoSystem {
    id: Uuid,
    name: String,
    node: NodeId,
    config: RuntimeConfig,
    started_at: DateTime<Utc>,
}

/// Message totals since system start.
#[derive(Default)]
pub struct SystemCounters {
    messages: AtomicU64,
    dead_letters: AtomicU64,
    spawns: AtomicU64,
    restarts: AtomicU64,
}

impl SystemCounters {
    pub(crate) fn note_message(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_dead_letter(&self) {
        self.dead_letters.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_spawn(&self) {
        self.spawns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    pub fn dead_letters(&self) -> u64 {
        self.dead_letters.load(Ordering::Relaxed)
    }

    pub fn spawns(&self) -> u64 {
        self.spawns.load(Ordering::Relaxed)
    }

    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }
}

/// Worker capacity the cells run on.
///
/// Reuses the surrounding tokio runtime when there is one; otherwise
/// owns a multi-thread runtime sized from `dispatcher.pool_size` and
/// releases it without blocking on drop.
#[derive(Clone)]
pub(crate) struct Executor {
    handle: Handle,
    _owned: Option<Arc<OwnedRuntime>>,
}

struct OwnedRuntime {
    rt: Mutex<Option<Runtime>>,
}

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(rt) = self.rt.lock().unwrap().take() {
            rt.shutdown_background();
        }
    }
}

impl Executor {
    fn current_or_new(pool_size: usize) -> Result<Executor, SystemError> {
        if let Ok(handle) = Handle::try_current() {
            return Ok(Executor {
                handle,
                _owned: None,
            });
        }

        let rt = RuntimeBuilder::new_multi_thread()
            .worker_threads(pool_size.max(1))
            .thread_name("polyp-worker")
            .enable_time()
            .build()
            .map_err(|e| SystemError::ModuleFailed(format!("dispatcher: {e}")))?;

        Ok(Executor {
            handle: rt.handle().clone(),
            _owned: Some(Arc::new(OwnedRuntime {
                rt: Mutex::new(Some(rt)),
            })),
        })
    }

    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}

struct SystemState {
    is_running: AtomicBool,
    shutdown_initiated: AtomicBool,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    shutdown_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

#[derive(Default)]
pub struct SystemBuilder {
    name: Option<String>,
    cfg: Option<RuntimeConfig>,
}

impl SystemBuilder {
    pub fn new() -> SystemBuilder {
        SystemBuilder::default()
    }

    pub fn name(mut self, name: &str) -> SystemBuilder {
        self.name = Some(name.to_string());
        self
    }

    pub fn cfg(mut self, cfg: RuntimeConfig) -> SystemBuilder {
        self.cfg = Some(cfg);
        self
    }

    pub fn create(self) -> Result<ActorSystem, SystemError> {
        let name = self.name.unwrap_or_else(|| "polyp".to_string());
        let cfg = self
            .cfg
            .unwrap_or_else(|| RuntimeConfig::from(&load_config()));
        ActorSystem::create(&name, cfg)
    }
}

/// The actor runtime and common services coordinator.
///
/// Starts the guardian, the system-event actor, the ask sweeper and
/// the directory reaper. Create one instance per application.
#[derive(Clone)]
pub struct ActorSystem {
    proto: Arc<ProtoSystem>,
    exec: Executor,
    provider: Provider,
    asks: CorrelationTable,
    directory: VirtualDirectory,
    counters: Arc<SystemCounters>,
    state: Arc<SystemState>,
    guardian: Arc<OnceLock<CellRef>>,
    sys_events: Arc<OnceLock<CellRef>>,
}

impl ActorSystem {
    pub fn new() -> Result<ActorSystem, SystemError> {
        ActorSystem::create("polyp", RuntimeConfig::from(&load_config()))
    }

    pub fn with_config(cfg: RuntimeConfig) -> Result<ActorSystem, SystemError> {
        ActorSystem::create("polyp", cfg)
    }

    fn create(name: &str, config: RuntimeConfig) -> Result<ActorSystem, SystemError> {
        validate_name(name).map_err(|_| SystemError::InvalidName(name.into()))?;
        let node =
            NodeId::new(&config.node_id).map_err(|e| SystemError::InvalidName(e.name))?;

        debug!("starting actor system: System[{name}] on {node}");

        let exec = Executor::current_or_new(config.dispatcher.pool_size)?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let directory = VirtualDirectory::new(&config.directory, node.clone());

        let sys = ActorSystem {
            proto: Arc::new(ProtoSystem {
                id: Uuid::new_v4(),
                name: name.to_string(),
                node: node.clone(),
                config,
                started_at: Utc::now(),
            }),
            exec,
            provider: Provider::new(),
            asks: CorrelationTable::default(),
            directory,
            counters: Arc::new(SystemCounters::default()),
            state: Arc::new(SystemState {
                is_running: AtomicBool::new(true),
                shutdown_initiated: AtomicBool::new(false),
                shutdown_tx: Mutex::new(Some(shutdown_tx)),
                shutdown_rx: Mutex::new(Some(shutdown_rx)),
            }),
            guardian: Arc::new(OnceLock::new()),
            sys_events: Arc::new(OnceLock::new()),
        };

        // the root guardian, then the system-event actor under it
        let guardian_addr = Address::new(node.clone(), "system", GUARDIAN_ID, "/system/guardian");
        let guardian = sys
            .provider
            .create_cell(
                &sys,
                Props::new(guardian::Guardian::new),
                guardian_addr.clone(),
                None,
                Some(SupervisionStrategy::from_config(
                    &sys.proto.config.supervision,
                )),
                sys.default_mailbox_spec(),
            )
            .map_err(|e| SystemError::ModuleFailed(format!("guardian: {e}")))?;
        let _ = sys.guardian.set(guardian);

        let events_addr = Address::new(node, "system", SYSTEM_EVENTS_ID, "/system/events");
        let events = sys
            .provider
            .create_cell(
                &sys,
                Props::new(events::SystemEvents::new),
                events_addr,
                Some(guardian_addr),
                None,
                sys.default_mailbox_spec(),
            )
            .map_err(|e| SystemError::ModuleFailed(format!("system events: {e}")))?;
        let _ = sys.sys_events.set(events);

        sys.spawn_housekeeping();

        debug!("actor system [{}] [{name}] started", sys.id());
        Ok(sys)
    }

    // ---- identity and lifecycle -------------------------------------

    pub fn id(&self) -> Uuid {
        self.proto.id
    }

    pub fn name(&self) -> &str {
        &self.proto.name
    }

    pub fn node(&self) -> &NodeId {
        &self.proto.node
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.proto.config
    }

    pub fn start_date(&self) -> &DateTime<Utc> {
        &self.proto.started_at
    }

    pub fn uptime_ms(&self) -> u64 {
        (Utc::now() - self.proto.started_at).num_milliseconds().max(0) as u64
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running.load(Ordering::Acquire)
    }

    pub fn counters(&self) -> &SystemCounters {
        &self.counters
    }

    pub fn guardian_address(&self) -> Address {
        self.guardian
            .get()
            .expect("guardian started")
            .address()
            .clone()
    }

    /// Address of the system-event actor; subscribe to it to observe
    /// spawn/stop/restart/failure/dead-letter events.
    pub fn system_events_address(&self) -> Address {
        self.sys_events
            .get()
            .expect("system events started")
            .address()
            .clone()
    }

    /// Graceful stop: the guardian drains its children depth-first and
    /// the returned future completes when everything is down.
    pub fn shutdown(&self) -> Shutdown {
        self.initiate_shutdown();
        match self.state.shutdown_rx.lock().unwrap().take() {
            Some(rx) => rx,
            None => {
                // second caller: already shutting down, resolve when done
                let (tx, rx) = oneshot::channel();
                if !self.is_running() {
                    let _ = tx.send(());
                }
                rx
            }
        }
    }

    pub(crate) fn initiate_shutdown(&self) {
        if self.state.shutdown_initiated.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(guardian) = self.guardian.get() {
            guardian.cell.sys_send(SystemMsg::Command(SystemCmd::Stop));
        }
    }

    pub(crate) fn complete_shutdown(&self) {
        self.state.is_running.store(false, Ordering::Release);
        if let Some(tx) = self.state.shutdown_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }

    /// The guardian's own failure terminates the system.
    pub(crate) fn terminate_guardian(&self) {
        warn!("guardian failed; terminating the system");
        if let Some(guardian) = self.guardian.get() {
            guardian.cell.kernel().terminate();
        } else {
            self.complete_shutdown();
        }
    }

    // ---- spawning and lookup ----------------------------------------

    /// Spawns an actor supervised by `opts.parent`, or by the guardian
    /// when no parent is given.
    pub fn spawn(&self, props: Props, opts: SpawnOptions) -> Result<Address, SpawnError> {
        let parent = opts.parent.clone();
        self.spawn_under(props, opts, parent)
    }

    pub(crate) fn spawn_under(
        &self,
        props: Props,
        opts: SpawnOptions,
        parent: Option<Address>,
    ) -> Result<Address, SpawnError> {
        if !self.is_running() {
            return Err(SpawnError::NotRunning);
        }

        let id = opts
            .id
            .unwrap_or_else(|| format!("{}", rand::random::<u64>()));
        let kind = opts.kind.unwrap_or_else(|| "actor".to_string());
        validate_name(&kind)?;

        let parent = parent.unwrap_or_else(|| self.guardian_address());
        let path = if parent.path() == "/system/guardian" {
            format!("/user/{id}")
        } else {
            format!("{}/{id}", parent.path())
        };

        let address = Address::new(self.proto.node.clone(), &kind, &id, &path);
        let mut spec = self.default_mailbox_spec();
        if let Some(capacity) = opts.mailbox_capacity {
            spec.capacity = capacity;
        }
        if let Some(overflow) = opts.overflow {
            spec.policy = overflow;
        }

        let cell = self.provider.create_cell(
            self,
            props,
            address,
            Some(parent),
            opts.supervision,
            spec,
        )?;
        Ok(cell.address().clone())
    }

    /// Activation path used by the virtual directory.
    pub(crate) fn spawn_virtual(
        &self,
        props: Props,
        address: Address,
    ) -> Result<CellRef, SpawnError> {
        if !self.is_running() {
            return Err(SpawnError::NotRunning);
        }
        self.provider.create_cell(
            self,
            props,
            address,
            Some(self.guardian_address()),
            None,
            self.default_mailbox_spec(),
        )
    }

    fn default_mailbox_spec(&self) -> MailboxSpec {
        let m = &self.proto.config.mailbox;
        MailboxSpec {
            capacity: m.capacity,
            policy: m.overflow,
            msg_process_limit: m.msg_process_limit,
        }
    }

    /// Requests a graceful stop of the actor at `address`.
    pub fn stop(&self, address: &Address) -> bool {
        match self.provider.lookup(address.path()) {
            Some(cell) => {
                cell.cell.sys_send(SystemMsg::Command(SystemCmd::Stop));
                true
            }
            None => false,
        }
    }

    /// First live actor with the given id.
    pub fn lookup(&self, id: &str) -> Option<Address> {
        self.provider.find_by_id(id).map(|c| c.address().clone())
    }

    pub fn list_actors(&self) -> Vec<Address> {
        self.provider.list()
    }

    pub fn actor_count(&self) -> usize {
        self.provider.len()
    }

    /// Read-only handle for status, stats and state snapshots.
    pub fn cell_ref(&self, address: &Address) -> Option<CellRef> {
        self.provider.lookup(address.path())
    }

    // ---- messaging ---------------------------------------------------

    /// Fire-and-forget send. Overflow drops resolve per the target's
    /// mailbox policy; `fail-sender` rejections surface here.
    pub async fn tell(&self, to: &Address, env: Envelope) -> Result<(), SendError> {
        if !self.is_running() {
            return Err(SendError::NotRunning);
        }
        if env.has_reserved_type() {
            return Err(SendError::ReservedType(env.msg_type));
        }
        if env.is_response() && env.correlation_id.is_some() {
            self.deliver_reply(env).await;
            return Ok(());
        }

        let target = match self.resolve_cell(to) {
            Ok(target) => target,
            Err(e) => {
                self.dead_letter(
                    to.clone(),
                    env.sender.clone(),
                    &env.msg_type,
                    "no actor at address",
                );
                return Err(e);
            }
        };
        dispatch(env, &target.cell, self).await
    }

    /// Correlated request. The handle resolves on reply, deadline or
    /// cancellation, exactly once.
    pub async fn ask(
        &self,
        to: &Address,
        env: Envelope,
        timeout: Option<Duration>,
    ) -> Result<AskHandle, SendError> {
        if !self.is_running() {
            return Err(SendError::NotRunning);
        }
        if env.has_reserved_type() || env.is_response() {
            return Err(SendError::ReservedType(env.msg_type));
        }

        let timeout = timeout.unwrap_or(self.proto.config.ask.default_timeout);
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        self.asks.register(
            id.clone(),
            PendingAsk {
                waiter: Waiter::External(tx),
                deadline: Instant::now() + timeout,
                target: to.clone(),
            },
        );

        let env = env.with_correlation_id(id.clone());
        let delivered = match self.resolve_cell(to) {
            Ok(target) => dispatch(env, &target.cell, self).await.is_ok(),
            Err(_) => false,
        };
        if !delivered {
            // fires the oneshot immediately
            let _ = self
                .asks
                .fail(&id, AskError::TargetUnreachable(to.clone()));
        }

        Ok(AskHandle::new(id, rx, self.asks.clone()))
    }

    /// Routes a `RESPONSE` envelope through the correlation table. An
    /// unknown correlation id is a late reply and is dropped silently.
    pub(crate) async fn deliver_reply(&self, env: Envelope) {
        let Some(id) = env.correlation_id.clone() else {
            return;
        };
        match self.asks.route_reply(&id, env.payload.clone()) {
            ReplyDisposition::DeliveredExternal => {}
            ReplyDisposition::CellWaiter(waiter) => match self.resolve_cell(&waiter) {
                Ok(target) => {
                    let _ = dispatch(env, &target.cell, self).await;
                }
                Err(_) => trace!("reply {id} to stopped waiter {waiter} dropped"),
            },
            ReplyDisposition::NoEntry => trace!("late reply {id} discarded"),
        }
    }

    /// Removes a pending ask; its continuation is guaranteed not to run.
    pub fn cancel_ask(&self, correlation_id: &str) -> bool {
        self.asks.cancel(correlation_id)
    }

    pub fn pending_asks(&self) -> usize {
        self.asks.len()
    }

    // ---- event bus ---------------------------------------------------

    /// Subscribes `subscriber` to `publisher`'s emits. The subscription
    /// lives on the publisher and survives its restarts.
    pub fn subscribe(
        &self,
        publisher: &Address,
        subscriber: &Address,
        filter: TopicFilter,
    ) -> Result<SubToken, SendError> {
        let publisher = self.resolve_cell(publisher)?;
        Ok(publisher
            .cell
            .subscribers()
            .subscribe(subscriber.clone(), filter))
    }

    pub fn unsubscribe(&self, publisher: &Address, token: SubToken) -> bool {
        match self.provider.lookup(publisher.path()) {
            Some(cell) => cell.cell.subscribers().unsubscribe(token),
            None => false,
        }
    }

    /// Hands a lifecycle event to the system-event actor. Best-effort:
    /// events during bootstrap or shutdown are dropped with a trace.
    pub(crate) fn publish_event(&self, event: SystemEvent) {
        let Some(events) = self.sys_events.get() else {
            trace!("system event before event actor start: {event:?}");
            return;
        };

        let env = event.into_envelope();
        match events.cell.mailbox().try_enqueue(env) {
            Ok(_) => events.cell.schedule(),
            Err(_) => trace!("system event dropped; event actor unavailable"),
        }
    }

    /// Records and surfaces an undeliverable envelope. Dead letters
    /// about dead-letter emits only count, to keep the loop closed.
    pub(crate) fn dead_letter(
        &self,
        recipient: Address,
        sender: Option<Address>,
        msg_type: &str,
        reason: &str,
    ) {
        self.counters.note_dead_letter();

        if msg_type == "deadLetter" || msg_type == "EMIT:deadLetter" {
            trace!("dead letter of a dead-letter event to {recipient} ({reason})");
            return;
        }

        self.publish_event(SystemEvent::DeadLetter(DeadLetter {
            recipient,
            sender,
            msg_type: msg_type.to_string(),
            reason: reason.to_string(),
        }));
    }

    // ---- virtual actors ---------------------------------------------

    /// Registers the behavior factory activated for virtual actors of
    /// `kind`.
    pub fn register_kind(&self, kind: &str, props: Props) -> Result<(), DirectoryError> {
        self.directory.register_kind(kind, props)
    }

    /// Resolves a virtual id, activating it on first access and
    /// re-activating it after eviction.
    pub fn virtual_ref(&self, key: &VirtualKey) -> Result<Address, DirectoryError> {
        self.directory.get_or_activate(self, key)
    }

    /// Deactivates a virtual actor; the next access re-activates it.
    pub fn deactivate(&self, key: &VirtualKey) -> bool {
        self.directory.deactivate(self, key)
    }

    pub fn directory_stats(&self) -> DirectoryStats {
        self.directory.stats()
    }

    pub fn actors_on_node(&self, node: &NodeId) -> Vec<Address> {
        self.directory.actors_on_node(node)
    }

    pub fn actors_of_kind(&self, kind: &str) -> Vec<Address> {
        self.directory.actors_of_kind(kind)
    }

    /// Replaces the node set placement selects from. Single-node
    /// runtimes normally leave this alone.
    pub fn set_node_set(&self, nodes: Vec<NodeId>) {
        self.directory.set_nodes(nodes);
    }

    // ---- internals ---------------------------------------------------

    /// Address resolution: registry first, then virtual activation when
    /// a factory for the address kind exists.
    pub(crate) fn resolve_cell(&self, address: &Address) -> Result<CellRef, SendError> {
        if let Some(cell) = self.provider.lookup(address.path()) {
            return Ok(cell);
        }

        if address.path().starts_with("/virtual/") && self.directory.has_kind(address.kind()) {
            let key = match &address.partition {
                Some(p) => VirtualKey::partitioned(address.kind(), address.id(), p.as_ref()),
                None => VirtualKey::new(address.kind(), address.id()),
            };
            if self.directory.get_or_activate(self, &key).is_ok() {
                if let Some(cell) = self.provider.lookup(address.path()) {
                    return Ok(cell);
                }
            }
        }

        Err(SendError::UnknownActor(address.clone()))
    }

    pub(crate) fn provider(&self) -> &Provider {
        &self.provider
    }

    pub(crate) fn directory(&self) -> &VirtualDirectory {
        &self.directory
    }

    pub(crate) fn asks(&self) -> &CorrelationTable {
        &self.asks
    }

    pub(crate) fn exec(&self) -> &Executor {
        &self.exec
    }

    /// Background maintenance: the ask sweeper resolves expired
    /// deadlines; the directory reaper retires idle virtual actors.
    fn spawn_housekeeping(&self) {
        let sys = self.clone();
        self.exec.spawn(async move {
            let mut tick = tokio::time::interval(sys.config().ask.sweep_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                if !sys.is_running() {
                    break;
                }
                for (id, ask) in sys.asks.sweep(Instant::now()) {
                    match ask.waiter {
                        Waiter::External(tx) => {
                            let _ = tx.send(Err(AskError::Timeout));
                        }
                        Waiter::Cell { addr, on_error, .. } => {
                            if let Some(cell) = sys.provider.lookup(addr.path()) {
                                cell.cell.sys_send(SystemMsg::AskFailed {
                                    correlation_id: id,
                                    target: ask.target,
                                    error: AskError::Timeout,
                                    on_error,
                                });
                            }
                        }
                    }
                }
            }
        });

        let sys = self.clone();
        self.exec.spawn(async move {
            let mut tick = tokio::time::interval(sys.config().directory.reap_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                if !sys.is_running() {
                    break;
                }
                sys.directory.reap(&sys);
            }
        });
    }
}

impl std::fmt::Debug for ActorSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "ActorSystem[Name: {}, Node: {}, Uptime: {} ms, Actors: {}]",
            self.name(),
            self.node(),
            self.uptime_ms(),
            self.actor_count()
        )
    }
}
