use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::trace;

use crate::actor::behavior::{Behavior, HandlerError};
use crate::actor::cell::Context;
use crate::message::Envelope;
use crate::plan::MessagePlan;
use crate::system::SpawnOptions;

pub const GUARDIAN_ID: &str = "guardian";

/// The root cell.
///
/// Parent of every top-level actor, last stop of the escalation chain
/// and the ask-driven operations surface: spawn, stop, shutdown,
/// system info and health. During shutdown its user lane is suspended,
/// so non-shutdown messages dead-letter while children drain.
pub(crate) struct Guardian;

impl Guardian {
    pub(crate) fn new() -> Guardian {
        Guardian
    }
}

#[async_trait]
impl Behavior for Guardian {
    async fn on_message(
        &mut self,
        ctx: &Context,
        msg: Envelope,
    ) -> Result<MessagePlan, HandlerError> {
        match msg.msg_type.as_str() {
            "SPAWN_ACTOR" => Ok(self.spawn_actor(ctx, &msg)),
            "STOP_ACTOR" => Ok(self.stop_actor(ctx, &msg)),
            "SHUTDOWN" => {
                trace!("guardian received SHUTDOWN");
                let reply = MessagePlan::reply(&msg, json!({ "shutting_down": true }));
                ctx.system().initiate_shutdown();
                Ok(reply)
            }
            "GET_SYSTEM_INFO" => Ok(MessagePlan::reply(&msg, self.system_info(ctx))),
            "SYSTEM_HEALTH_CHECK" => Ok(MessagePlan::reply(&msg, self.health(ctx))),
            other => {
                trace!("guardian ignoring {other}");
                Ok(MessagePlan::reply(
                    &msg,
                    json!({ "error": format!("unknown operation {other}") }),
                ))
            }
        }
    }

    fn snapshot(&self) -> Value {
        json!({ "role": "guardian" })
    }
}

impl Guardian {
    /// `{kind, id?, partition?}`: activates the registered factory for
    /// `kind` as a supervised top-level actor.
    fn spawn_actor(&self, ctx: &Context, msg: &Envelope) -> MessagePlan {
        let sys = ctx.system();
        let Some(kind) = msg.payload.get("kind").and_then(Value::as_str) else {
            return MessagePlan::reply(msg, json!({ "error": "missing kind" }));
        };

        if !sys.directory().has_kind(kind) {
            return MessagePlan::reply(msg, json!({ "error": format!("unknown kind {kind}") }));
        }

        if let Some(partition) = msg.payload.get("partition").and_then(Value::as_str) {
            let id = msg
                .payload
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("default");
            let key = crate::directory::VirtualKey::partitioned(kind, id, partition);
            return match sys.virtual_ref(&key) {
                Ok(address) => MessagePlan::reply(
                    msg,
                    json!({ "address": address.uri(), "path": address.path() }),
                ),
                Err(e) => MessagePlan::reply(msg, json!({ "error": e.to_string() })),
            };
        }

        let mut opts = SpawnOptions::default().kind(kind);
        if let Some(id) = msg.payload.get("id").and_then(Value::as_str) {
            opts.id = Some(id.to_string());
        }

        let props = sys
            .directory()
            .factory(kind)
            .expect("factory checked above");
        match sys.spawn(props, opts) {
            Ok(address) => MessagePlan::reply(
                msg,
                json!({ "address": address.uri(), "path": address.path() }),
            ),
            Err(e) => MessagePlan::reply(msg, json!({ "error": e.to_string() })),
        }
    }

    /// `{path}` or `{id}`: graceful stop of the named actor.
    fn stop_actor(&self, ctx: &Context, msg: &Envelope) -> MessagePlan {
        let sys = ctx.system();
        let address = match msg.payload.get("path").and_then(Value::as_str) {
            Some(path) => sys
                .list_actors()
                .into_iter()
                .find(|a| a.path() == path),
            None => msg
                .payload
                .get("id")
                .and_then(Value::as_str)
                .and_then(|id| sys.lookup(id)),
        };

        match address {
            Some(addr) => {
                let stopped = sys.stop(&addr);
                MessagePlan::reply(msg, json!({ "stopped": stopped, "actor": addr.uri() }))
            }
            None => MessagePlan::reply(msg, json!({ "stopped": false, "error": "not found" })),
        }
    }

    fn system_info(&self, ctx: &Context) -> Value {
        let sys = ctx.system();
        let counters = sys.counters();
        json!({
            "name": sys.name(),
            "node": sys.node().as_str(),
            "started_at": sys.start_date().to_rfc3339(),
            "uptime_ms": sys.uptime_ms(),
            "is_running": sys.is_running(),
            "actor_count": sys.actor_count(),
            "message_count": counters.messages(),
            "dead_letters": counters.dead_letters(),
            "spawns": counters.spawns(),
            "restarts": counters.restarts(),
        })
    }

    fn health(&self, ctx: &Context) -> Value {
        let sys = ctx.system();
        let dir = sys.directory_stats();
        json!({
            "status": if sys.is_running() { "healthy" } else { "stopping" },
            "actor_count": sys.actor_count(),
            "pending_asks": sys.pending_asks(),
            "directory": {
                "hit_count": dir.hit_count,
                "miss_count": dir.miss_count,
                "cache_size": dir.cache_size,
                "actors_per_node": dir.actors_per_node,
            },
        })
    }
}
