pub(crate) mod behavior;
pub(crate) mod cell;
pub(crate) mod events;
pub(crate) mod props;
pub(crate) mod supervision;

use thiserror::Error;

use crate::address::Address;
use crate::validate::{InvalidName, InvalidPath};

// Public polyp::actor API (plus the pub data types in this file)
pub use self::{
    behavior::{Behavior, BoxBehavior, HandlerError},
    cell::{CellRef, CellStats, CellStatus, Context},
    events::{SubToken, Subscription, TopicFilter},
    props::Props,
    supervision::{BudgetAction, Decider, Directive, FailureReason, SupervisionStrategy},
};

/// Error type when a cell fails to spawn.
#[derive(Clone, Debug, Error)]
pub enum SpawnError {
    #[error("failed to spawn actor: invalid name ({0})")]
    InvalidName(String),
    #[error("failed to spawn actor: invalid path ({0})")]
    InvalidPath(String),
    #[error("failed to spawn actor: an actor at the same path already exists ({0})")]
    AlreadyExists(String),
    #[error("failed to spawn actor: the system holds the maximum of {0} actors")]
    SystemSaturated(usize),
    #[error("failed to spawn actor: behavior initializer failed ({0})")]
    StartFailed(String),
    #[error("failed to spawn actor: the system is not running")]
    NotRunning,
}

impl From<InvalidName> for SpawnError {
    fn from(e: InvalidName) -> SpawnError {
        SpawnError::InvalidName(e.name)
    }
}

impl From<InvalidPath> for SpawnError {
    fn from(e: InvalidPath) -> SpawnError {
        SpawnError::InvalidPath(e.path)
    }
}

/// Error type when an envelope is rejected at enqueue time.
#[derive(Clone, Debug, Error)]
pub enum SendError {
    #[error("mailbox of {0} is full")]
    MailboxFull(Address),
    #[error("mailbox of {0} is closed")]
    MailboxClosed(Address),
    #[error("no actor is reachable at {0}")]
    UnknownActor(Address),
    #[error("message type {0} is reserved for the runtime")]
    ReservedType(String),
    #[error("the system is not running")]
    NotRunning,
}
