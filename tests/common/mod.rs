#![allow(dead_code)]

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};

use polyp::actors::*;

/// Records every envelope it receives; `DUMP` asks return the log.
pub struct Recorder {
    seen: Vec<Value>,
}

impl Recorder {
    pub fn new() -> Self {
        Recorder { seen: Vec::new() }
    }

    pub fn props() -> Props {
        Props::new(Recorder::new)
    }
}

#[async_trait]
impl Behavior for Recorder {
    async fn on_message(
        &mut self,
        _ctx: &Context,
        msg: Envelope,
    ) -> Result<MessagePlan, HandlerError> {
        if msg.msg_type == "DUMP" {
            return Ok(MessagePlan::reply(&msg, json!(self.seen)));
        }
        self.seen.push(json!({
            "type": msg.msg_type,
            "payload": msg.payload,
            "sender": msg.sender.as_ref().map(|a| a.uri()),
        }));
        Ok(MessagePlan::Nothing)
    }

    fn snapshot(&self) -> Value {
        json!({ "seen": self.seen.len() })
    }
}

/// Asks the recorder for everything it observed so far.
pub async fn dump(sys: &ActorSystem, recorder: &Address) -> Vec<Value> {
    let reply = sys
        .ask(recorder, Envelope::new("DUMP", Value::Null), Some(Duration::from_secs(2)))
        .await
        .expect("recorder reachable")
        .await
        .expect("recorder replies");
    reply.as_array().cloned().unwrap_or_default()
}

/// Entries of a given envelope type, in arrival order.
pub fn of_type(seen: &[Value], msg_type: &str) -> Vec<Value> {
    seen.iter()
        .filter(|v| v["type"] == msg_type)
        .cloned()
        .collect()
}

/// Polls until the condition holds or the deadline passes.
pub async fn eventually<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Polls an async probe until it reports true or the deadline passes.
pub async fn eventually_async<F, Fut>(mut probe: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if probe().await {
            return true;
        }
        if Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Config tuned for fast tests: short backoffs and sweep intervals.
pub fn test_config() -> RuntimeConfig {
    let mut cfg = RuntimeConfig::default();
    cfg.ask.sweep_interval = Duration::from_millis(10);
    cfg.supervision.backoff = Duration::from_millis(5);
    cfg.directory.reap_interval = Duration::from_millis(20);
    cfg
}

pub fn system() -> ActorSystem {
    ActorSystem::with_config(test_config()).expect("system starts")
}
