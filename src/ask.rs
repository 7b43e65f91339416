use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context as TaskContext, Poll};
use std::time::Instant;

use dashmap::DashMap;
use futures::channel::oneshot;
use serde_json::Value;
use thiserror::Error;
use tracing::{trace, warn};

use crate::address::Address;
use crate::plan::{ErrorCont, ReplyCont};

/// How a pending ask ends when no reply arrives.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AskError {
    #[error("ask timed out")]
    Timeout,
    #[error("ask was cancelled by its initiator")]
    Cancelled,
    #[error("ask target {0} is unreachable")]
    TargetUnreachable(Address),
}

/// Who is waiting for the reply.
pub(crate) enum Waiter {
    /// An actor: the stored continuations run as ordinary turns of the
    /// initiating cell when the ask resolves.
    Cell {
        addr: Address,
        on_ok: ReplyCont,
        on_error: Option<ErrorCont>,
    },
    /// A caller outside the system, parked on a oneshot.
    External(oneshot::Sender<Result<Value, AskError>>),
}

// The boxed `FnOnce` continuations are `Send` but not auto-`Sync`, which
// DashMap requires of its value type to implement `Sync` itself. They are
// never invoked through a shared reference (only moved out via `remove`),
// so sharing `&Waiter` across threads is sound.
unsafe impl Sync for Waiter {}

pub(crate) struct PendingAsk {
    pub waiter: Waiter,
    pub deadline: Instant,
    pub target: Address,
}

/// Where a routed reply went.
pub(crate) enum ReplyDisposition {
    /// No live entry: a late reply to a resolved ask. Dropped silently,
    /// not dead-lettered; this is normal traffic.
    NoEntry,
    /// The waiter was external; the oneshot fired.
    DeliveredExternal,
    /// The waiter is a cell; the entry stays registered until that
    /// cell's turn consumes it.
    CellWaiter(Address),
}

/// Pending-ask registry: correlation id to waiter, with deadlines.
///
/// The map gives O(1) resolution on reply; the deadline heap gives
/// O(log n) sweeps. Entries resolve exactly once: by reply, by
/// timeout or by cancellation, whichever removes the entry first.
#[derive(Clone, Default)]
pub(crate) struct CorrelationTable {
    inner: Arc<TableInner>,
}

#[derive(Default)]
struct TableInner {
    map: DashMap<String, PendingAsk>,
    deadlines: Mutex<BinaryHeap<Reverse<(Instant, String)>>>,
}

impl CorrelationTable {
    pub(crate) fn register(&self, id: String, ask: PendingAsk) {
        self.inner
            .deadlines
            .lock()
            .unwrap()
            .push(Reverse((ask.deadline, id.clone())));
        if self.inner.map.insert(id.clone(), ask).is_some() {
            // uuid collision or a misbehaving caller reusing ids
            warn!("correlation id {id} registered twice; previous ask dropped");
        }
    }

    /// Routes a reply value to the registered waiter.
    pub(crate) fn route_reply(&self, id: &str, value: Value) -> ReplyDisposition {
        let is_external = match self.inner.map.get(id) {
            Some(entry) => matches!(entry.waiter, Waiter::External(_)),
            None => return ReplyDisposition::NoEntry,
        };

        if is_external {
            match self.inner.map.remove(id) {
                Some((_, ask)) => match ask.waiter {
                    Waiter::External(tx) => {
                        let _ = tx.send(Ok(value));
                        ReplyDisposition::DeliveredExternal
                    }
                    Waiter::Cell { .. } => ReplyDisposition::NoEntry,
                },
                None => ReplyDisposition::NoEntry,
            }
        } else {
            match self.inner.map.get(id) {
                Some(entry) => match &entry.waiter {
                    Waiter::Cell { addr, .. } => ReplyDisposition::CellWaiter(addr.clone()),
                    Waiter::External(_) => ReplyDisposition::NoEntry,
                },
                None => ReplyDisposition::NoEntry,
            }
        }
    }

    /// Removes and returns the entry; used by the waiter cell's own turn
    /// to run its continuation.
    pub(crate) fn take(&self, id: &str) -> Option<PendingAsk> {
        self.inner.map.remove(id).map(|(_, ask)| ask)
    }

    /// Resolves the entry with an error. External waiters are completed
    /// here; cell waiters are returned so the caller can hand the error
    /// continuation to the cell.
    pub(crate) fn fail(&self, id: &str, err: AskError) -> Option<PendingAsk> {
        let (_, ask) = self.inner.map.remove(id)?;
        match ask.waiter {
            Waiter::External(tx) => {
                let _ = tx.send(Err(err));
                None
            }
            waiter @ Waiter::Cell { .. } => Some(PendingAsk {
                waiter,
                deadline: ask.deadline,
                target: ask.target,
            }),
        }
    }

    /// Removes the entry, guaranteeing no continuation will run.
    pub(crate) fn cancel(&self, id: &str) -> bool {
        match self.inner.map.remove(id) {
            Some((_, ask)) => {
                if let Waiter::External(tx) = ask.waiter {
                    let _ = tx.send(Err(AskError::Cancelled));
                }
                trace!("ask {id} cancelled");
                true
            }
            None => false,
        }
    }

    /// Pops every deadline at or before `now` and removes the entries
    /// that are still pending. Heap entries for already-resolved asks
    /// are skipped.
    pub(crate) fn sweep(&self, now: Instant) -> Vec<(String, PendingAsk)> {
        let mut expired = Vec::new();
        let mut deadlines = self.inner.deadlines.lock().unwrap();
        while let Some(Reverse((deadline, _))) = deadlines.peek() {
            if *deadline > now {
                break;
            }
            let Reverse((_, id)) = deadlines.pop().unwrap();
            if let Some((id, ask)) = self.inner.map.remove(&id) {
                expired.push((id, ask));
            }
        }
        expired
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.inner.map.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.map.len()
    }
}

/// Future side of an external ask.
///
/// Resolves when the target replies, the deadline passes or `cancel`
/// is called.
pub struct AskHandle {
    correlation_id: String,
    rx: oneshot::Receiver<Result<Value, AskError>>,
    table: CorrelationTable,
}

impl AskHandle {
    pub(crate) fn new(
        correlation_id: String,
        rx: oneshot::Receiver<Result<Value, AskError>>,
        table: CorrelationTable,
    ) -> AskHandle {
        AskHandle {
            correlation_id,
            rx,
            table,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Cancels the ask. The correlation entry is removed immediately; a
    /// reply arriving afterwards is discarded.
    pub fn cancel(self) {
        self.table.cancel(&self.correlation_id);
    }
}

impl Future for AskHandle {
    type Output = Result<Value, AskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(AskError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}
