#![crate_name = "polyp"]
#![deny(clippy::all)]
#![allow(clippy::new_ret_no_self)]
#![allow(clippy::large_enum_variant)]

//! An in-process actor runtime: isolated cells communicating only by
//! asynchronous messages, hierarchical supervision with restart
//! budgets, correlated request/response, topic-filtered event
//! subscriptions and virtual actors with pluggable placement.
//!
//! Handlers are declarative: each turn returns a [`plan::MessagePlan`]
//! and the runtime executes the fan-out.

mod validate;

pub mod actor;
pub mod address;
pub mod ask;
pub mod config;
pub mod directory;
pub mod kernel;
pub mod message;
pub mod plan;
pub mod system;

pub use config::load_config;

/// Single-import surface for applications embedding the runtime.
pub mod actors {
    pub use crate::actor::{
        Behavior, BudgetAction, CellRef, CellStats, CellStatus, Context, Directive, FailureReason,
        HandlerError, Props, SendError, SpawnError, SubToken, SupervisionStrategy, TopicFilter,
    };
    pub use crate::address::{Address, NodeId};
    pub use crate::ask::{AskError, AskHandle};
    pub use crate::config::RuntimeConfig;
    pub use crate::directory::{
        placement::PlacementKind, DirectoryError, DirectoryStats, VirtualKey,
    };
    pub use crate::kernel::queue::OverflowPolicy;
    pub use crate::message::{DeadLetter, Envelope};
    pub use crate::plan::{MessagePlan, SendMode};
    pub use crate::system::{
        ActorSystem, Shutdown, SpawnOptions, SystemBuilder, SystemError, SystemEvent,
    };
}
