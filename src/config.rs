use std::time::Duration;

use config::Config;

use crate::actor::supervision::BudgetAction;
use crate::directory::placement::PlacementKind;
use crate::kernel::queue::OverflowPolicy;

/// Builds the default configuration and merges the optional
/// `config/polyp.toml` (overridable through the `POLYP_CONF` env var).
pub fn load_config() -> Config {
    let path = std::env::var("POLYP_CONF").unwrap_or_else(|_| "config/polyp".into());

    Config::builder()
        .set_default("debug", true)
        .unwrap()
        .set_default("node_id", "local")
        .unwrap()
        .set_default("mailbox.capacity", 1024)
        .unwrap()
        .set_default("mailbox.overflow", "drop-newest")
        .unwrap()
        .set_default("mailbox.msg_process_limit", 1000)
        .unwrap()
        .set_default("dispatcher.pool_size", (num_cpus::get() * 2) as i64)
        .unwrap()
        .set_default("ask.default_timeout_ms", 5000)
        .unwrap()
        .set_default("ask.sweep_interval_ms", 20)
        .unwrap()
        .set_default("system.max_actors", 100_000)
        .unwrap()
        .set_default("supervision.max_retries", 10)
        .unwrap()
        .set_default("supervision.window_ms", 1000)
        .unwrap()
        .set_default("supervision.backoff_ms", 20)
        .unwrap()
        .set_default("supervision.on_budget_exhausted", "stop")
        .unwrap()
        .set_default("directory.cache_size", 1024)
        .unwrap()
        .set_default("directory.max_idle_ms", 600_000)
        .unwrap()
        .set_default("directory.reap_interval_ms", 1000)
        .unwrap()
        .set_default("directory.placement", "round-robin")
        .unwrap()
        .add_source(config::File::with_name(&path).required(false))
        .build()
        .unwrap()
}

/// Typed view over the merged configuration, resolved once at system start.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub debug: bool,
    pub node_id: String,
    pub mailbox: MailboxConfig,
    pub dispatcher: DispatcherConfig,
    pub ask: AskConfig,
    pub limits: SystemLimits,
    pub supervision: SupervisionConfig,
    pub directory: DirectoryConfig,
}

#[derive(Clone, Debug)]
pub struct MailboxConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
    pub msg_process_limit: u32,
}

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    pub pool_size: usize,
}

#[derive(Clone, Debug)]
pub struct AskConfig {
    pub default_timeout: Duration,
    pub sweep_interval: Duration,
}

#[derive(Clone, Debug)]
pub struct SystemLimits {
    pub max_actors: usize,
}

#[derive(Clone, Debug)]
pub struct SupervisionConfig {
    pub max_retries: u32,
    pub window: Duration,
    pub backoff: Duration,
    pub on_budget_exhausted: BudgetAction,
}

#[derive(Clone, Debug)]
pub struct DirectoryConfig {
    pub cache_size: usize,
    pub max_idle: Duration,
    pub reap_interval: Duration,
    pub placement: PlacementKind,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig::from(&load_config())
    }
}

impl<'a> From<&'a Config> for RuntimeConfig {
    fn from(cfg: &Config) -> Self {
        RuntimeConfig {
            debug: cfg.get_bool("debug").unwrap(),
            node_id: cfg.get_string("node_id").unwrap(),
            mailbox: MailboxConfig {
                capacity: cfg.get_int("mailbox.capacity").unwrap() as usize,
                overflow: parse_overflow(&cfg.get_string("mailbox.overflow").unwrap()),
                msg_process_limit: cfg.get_int("mailbox.msg_process_limit").unwrap() as u32,
            },
            dispatcher: DispatcherConfig {
                pool_size: cfg.get_int("dispatcher.pool_size").unwrap() as usize,
            },
            ask: AskConfig {
                default_timeout: Duration::from_millis(
                    cfg.get_int("ask.default_timeout_ms").unwrap() as u64,
                ),
                sweep_interval: Duration::from_millis(
                    cfg.get_int("ask.sweep_interval_ms").unwrap() as u64,
                ),
            },
            limits: SystemLimits {
                max_actors: cfg.get_int("system.max_actors").unwrap() as usize,
            },
            supervision: SupervisionConfig {
                max_retries: cfg.get_int("supervision.max_retries").unwrap() as u32,
                window: Duration::from_millis(cfg.get_int("supervision.window_ms").unwrap() as u64),
                backoff: Duration::from_millis(
                    cfg.get_int("supervision.backoff_ms").unwrap() as u64
                ),
                on_budget_exhausted: parse_budget_action(
                    &cfg.get_string("supervision.on_budget_exhausted").unwrap(),
                ),
            },
            directory: DirectoryConfig {
                cache_size: cfg.get_int("directory.cache_size").unwrap() as usize,
                max_idle: Duration::from_millis(
                    cfg.get_int("directory.max_idle_ms").unwrap() as u64
                ),
                reap_interval: Duration::from_millis(
                    cfg.get_int("directory.reap_interval_ms").unwrap() as u64,
                ),
                placement: parse_placement(&cfg.get_string("directory.placement").unwrap()),
            },
        }
    }
}

fn parse_overflow(s: &str) -> OverflowPolicy {
    match s {
        "drop-oldest" => OverflowPolicy::DropOldest,
        "block-sender" => OverflowPolicy::BlockSender,
        "fail-sender" => OverflowPolicy::FailSender,
        _ => OverflowPolicy::DropNewest,
    }
}

fn parse_budget_action(s: &str) -> BudgetAction {
    match s {
        "escalate" => BudgetAction::Escalate,
        _ => BudgetAction::Stop,
    }
}

fn parse_placement(s: &str) -> PlacementKind {
    match s {
        "consistent-hash" => PlacementKind::ConsistentHash,
        "load-aware" => PlacementKind::LoadAware,
        _ => PlacementKind::RoundRobin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.node_id, "local");
        assert_eq!(cfg.mailbox.capacity, 1024);
        assert_eq!(cfg.mailbox.overflow, OverflowPolicy::DropNewest);
        assert_eq!(cfg.ask.default_timeout, Duration::from_secs(5));
        assert_eq!(cfg.directory.placement, PlacementKind::RoundRobin);
    }
}
