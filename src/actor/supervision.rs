use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::address::Address;
use crate::config::SupervisionConfig;

/// What a supervisor does with a failed child.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Directive {
    /// Keep the child's state and mark it running again. The offending
    /// envelope is dead-lettered, not redelivered.
    Resume,
    /// Replace the behavior with a fresh instance at the same address.
    Restart,
    /// Stop the child and detach it from the parent.
    Stop,
    /// Treat the failure as the parent's own and propagate upwards.
    Escalate,
}

/// Applied when a child exhausts its restart budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BudgetAction {
    Stop,
    Escalate,
}

impl BudgetAction {
    pub(crate) fn directive(self) -> Directive {
        match self {
            BudgetAction::Stop => Directive::Stop,
            BudgetAction::Escalate => Directive::Escalate,
        }
    }
}

/// Why a cell failed; handed to the supervisor's decider.
#[derive(Clone, Debug)]
pub enum FailureReason {
    /// The handler returned an error value.
    Handler(String),
    /// The handler panicked.
    Panic(String),
    /// The handler returned a malformed message plan.
    InvalidPlan(String),
    /// The behavior initializer failed during start or restart.
    StartFailed(String),
    /// A descendant escalated through the named child.
    Escalated(Address),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FailureReason::Handler(msg) => write!(f, "handler error: {msg}"),
            FailureReason::Panic(msg) => write!(f, "panic: {msg}"),
            FailureReason::InvalidPlan(msg) => write!(f, "invalid plan: {msg}"),
            FailureReason::StartFailed(msg) => write!(f, "start failed: {msg}"),
            FailureReason::Escalated(child) => write!(f, "escalated from {child}"),
        }
    }
}

pub type Decider = Arc<dyn Fn(&FailureReason) -> Directive + Send + Sync>;

/// Per-behavior supervision policy: a decider plus a restart budget.
///
/// The budget is a rolling window; exceeding `max_retries` restarts
/// within `window` upgrades the directive to `on_budget_exhausted`.
/// `backoff` separates consecutive restarts.
#[derive(Clone)]
pub struct SupervisionStrategy {
    pub decider: Decider,
    pub max_retries: u32,
    pub window: Duration,
    pub backoff: Duration,
    pub on_budget_exhausted: BudgetAction,
}

impl SupervisionStrategy {
    pub fn new(decider: Decider) -> SupervisionStrategy {
        SupervisionStrategy {
            decider,
            ..SupervisionStrategy::default()
        }
    }

    /// A strategy that applies the same directive to every failure.
    pub fn always(directive: Directive) -> SupervisionStrategy {
        SupervisionStrategy::new(Arc::new(move |_| directive))
    }

    pub fn with_budget(mut self, max_retries: u32, window: Duration) -> SupervisionStrategy {
        self.max_retries = max_retries;
        self.window = window;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> SupervisionStrategy {
        self.backoff = backoff;
        self
    }

    pub fn on_budget_exhausted(mut self, action: BudgetAction) -> SupervisionStrategy {
        self.on_budget_exhausted = action;
        self
    }

    pub fn decide(&self, reason: &FailureReason) -> Directive {
        (self.decider)(reason)
    }

    pub(crate) fn from_config(cfg: &SupervisionConfig) -> SupervisionStrategy {
        SupervisionStrategy {
            decider: Arc::new(|_| Directive::Restart),
            max_retries: cfg.max_retries,
            window: cfg.window,
            backoff: cfg.backoff,
            on_budget_exhausted: cfg.on_budget_exhausted,
        }
    }
}

impl Default for SupervisionStrategy {
    fn default() -> Self {
        SupervisionStrategy {
            decider: Arc::new(|_| Directive::Restart),
            max_retries: 10,
            window: Duration::from_millis(1000),
            backoff: Duration::from_millis(20),
            on_budget_exhausted: BudgetAction::Stop,
        }
    }
}

impl fmt::Debug for SupervisionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "SupervisionStrategy[max_retries={}, window={:?}, backoff={:?}, exhausted={:?}]",
            self.max_retries, self.window, self.backoff, self.on_budget_exhausted
        )
    }
}

/// Rolling restart counter backing the budget check.
#[derive(Debug, Default)]
pub(crate) struct RestartWindow {
    restarts: VecDeque<Instant>,
}

impl RestartWindow {
    /// Records a restart at `now` and reports whether the budget still
    /// allows it. Entries older than the window are forgotten first.
    pub(crate) fn record(&mut self, now: Instant, max_retries: u32, window: Duration) -> bool {
        while let Some(front) = self.restarts.front() {
            if now.duration_since(*front) > window {
                self.restarts.pop_front();
            } else {
                break;
            }
        }
        if self.restarts.len() as u32 >= max_retries {
            return false;
        }
        self.restarts.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_blocks_after_max_retries() {
        let mut w = RestartWindow::default();
        let t0 = Instant::now();
        let window = Duration::from_millis(500);

        assert!(w.record(t0, 2, window));
        assert!(w.record(t0 + Duration::from_millis(10), 2, window));
        assert!(!w.record(t0 + Duration::from_millis(20), 2, window));
    }

    #[test]
    fn budget_recovers_outside_window() {
        let mut w = RestartWindow::default();
        let t0 = Instant::now();
        let window = Duration::from_millis(100);

        assert!(w.record(t0, 1, window));
        assert!(!w.record(t0 + Duration::from_millis(50), 1, window));
        assert!(w.record(t0 + Duration::from_millis(201), 1, window));
    }

    #[test]
    fn decider_selects_directive() {
        let strategy = SupervisionStrategy::new(Arc::new(|reason| match reason {
            FailureReason::Panic(_) => Directive::Stop,
            _ => Directive::Resume,
        }));
        assert_eq!(
            strategy.decide(&FailureReason::Panic("x".into())),
            Directive::Stop
        );
        assert_eq!(
            strategy.decide(&FailureReason::Handler("x".into())),
            Directive::Resume
        );
    }
}
