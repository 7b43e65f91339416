mod common;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};

use common::{dump, eventually, of_type, system, Recorder};
use polyp::actors::*;

struct Counter {
    count: i64,
}

impl Counter {
    fn new() -> Self {
        Counter { count: 0 }
    }
}

#[async_trait]
impl Behavior for Counter {
    async fn on_message(
        &mut self,
        _ctx: &Context,
        msg: Envelope,
    ) -> Result<MessagePlan, HandlerError> {
        match msg.msg_type.as_str() {
            "INCREMENT" => {
                self.count += 1;
                Ok(MessagePlan::Nothing)
            }
            "GET" => Ok(MessagePlan::reply(&msg, json!({ "count": self.count }))),
            _ => Ok(MessagePlan::Nothing),
        }
    }
}

/// Never replies to PING; stashes the ask so a reply can be forced
/// long after the deadline.
struct Sluggish {
    stashed: Option<Envelope>,
}

impl Sluggish {
    fn new() -> Self {
        Sluggish { stashed: None }
    }
}

#[async_trait]
impl Behavior for Sluggish {
    async fn on_message(
        &mut self,
        _ctx: &Context,
        msg: Envelope,
    ) -> Result<MessagePlan, HandlerError> {
        match msg.msg_type.as_str() {
            "PING" => {
                self.stashed = Some(msg);
                Ok(MessagePlan::Nothing)
            }
            "FLUSH" => match self.stashed.take() {
                Some(request) => Ok(MessagePlan::reply(&request, json!({ "late": true }))),
                None => Ok(MessagePlan::Nothing),
            },
            _ => Ok(MessagePlan::Nothing),
        }
    }
}

#[tokio::test]
async fn counter_increment_via_ask() {
    let sys = system();
    let counter = sys
        .spawn(Props::new(Counter::new), SpawnOptions::named("counter"))
        .unwrap();

    for _ in 0..3 {
        sys.tell(&counter, Envelope::new("INCREMENT", Value::Null))
            .await
            .unwrap();
    }

    let started = Instant::now();
    let reply = sys
        .ask(
            &counter,
            Envelope::new("GET", Value::Null),
            Some(Duration::from_millis(1000)),
        )
        .await
        .unwrap()
        .await
        .unwrap();

    assert_eq!(reply["count"], 3);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn ask_timeout_then_late_reply_is_discarded() {
    let sys = system();
    let slug = sys
        .spawn(Props::new(Sluggish::new), SpawnOptions::named("sluggish"))
        .unwrap();

    let started = Instant::now();
    let result = sys
        .ask(
            &slug,
            Envelope::new("PING", Value::Null),
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap()
        .await;

    assert_eq!(result.unwrap_err(), AskError::Timeout);
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(started.elapsed() < Duration::from_millis(800));

    // the correlation table no longer holds the id
    assert!(eventually(|| sys.pending_asks() == 0, Duration::from_secs(1)).await);

    // force the stale reply out; it must be dropped without a trace
    tokio::time::sleep(Duration::from_millis(200)).await;
    sys.tell(&slug, Envelope::new("FLUSH", Value::Null))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sys.pending_asks(), 0);
}

#[tokio::test]
async fn ask_cancel_removes_the_entry() {
    let sys = system();
    let slug = sys
        .spawn(Props::new(Sluggish::new), SpawnOptions::named("sluggish"))
        .unwrap();

    let handle = sys
        .ask(
            &slug,
            Envelope::new("PING", Value::Null),
            Some(Duration::from_secs(30)),
        )
        .await
        .unwrap();

    assert_eq!(sys.pending_asks(), 1);
    handle.cancel();
    assert_eq!(sys.pending_asks(), 0);

    // the stashed reply after cancellation goes nowhere
    sys.tell(&slug, Envelope::new("FLUSH", Value::Null))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sys.pending_asks(), 0);
}

#[tokio::test]
async fn ask_unknown_actor_resolves_unreachable() {
    let sys = system();
    let ghost = Address::new(NodeId::local(), "actor", "ghost", "/user/ghost");

    let result = sys
        .ask(&ghost, Envelope::new("GET", Value::Null), None)
        .await
        .unwrap()
        .await;
    assert!(matches!(result, Err(AskError::TargetUnreachable(_))));
}

/// Relay asks the counter on demand and emits what came back; its
/// continuation runs as a later turn of the relay itself.
struct Relay {
    counter: Address,
}

#[async_trait]
impl Behavior for Relay {
    async fn on_message(
        &mut self,
        _ctx: &Context,
        msg: Envelope,
    ) -> Result<MessagePlan, HandlerError> {
        match msg.msg_type.as_str() {
            "KICK" => Ok(MessagePlan::ask_or_else(
                self.counter.clone(),
                Envelope::new("GET", Value::Null),
                Duration::from_millis(500),
                |reply| MessagePlan::event("GOT", reply),
                |err| MessagePlan::event("ASK_FAILED", json!({ "error": err.to_string() })),
            )),
            _ => Ok(MessagePlan::Nothing),
        }
    }
}

#[tokio::test]
async fn actor_ask_continuation_runs_and_emits() {
    let sys = system();
    let counter = sys
        .spawn(Props::new(Counter::new), SpawnOptions::named("counter"))
        .unwrap();
    sys.tell(&counter, Envelope::new("INCREMENT", Value::Null))
        .await
        .unwrap();

    let relay = sys
        .spawn(
            Props::new_args(|counter| Relay { counter }, counter.clone()),
            SpawnOptions::named("relay"),
        )
        .unwrap();

    let recorder = sys
        .spawn(Recorder::props(), SpawnOptions::named("recorder"))
        .unwrap();
    sys.subscribe(&relay, &recorder, TopicFilter::parse("EMIT:GOT"))
        .unwrap();

    sys.tell(&relay, Envelope::new("KICK", Value::Null))
        .await
        .unwrap();

    let sys2 = sys.clone();
    let recorder2 = recorder.clone();
    assert!(
        common::eventually_async(
            move || {
                let sys = sys2.clone();
                let recorder = recorder2.clone();
                async move {
                    let seen = dump(&sys, &recorder).await;
                    !of_type(&seen, "EMIT:GOT").is_empty()
                }
            },
            Duration::from_secs(2)
        )
        .await,
        "continuation should emit the counter reply"
    );

    let seen = dump(&sys, &recorder).await;
    let got = of_type(&seen, "EMIT:GOT");
    assert_eq!(got[0]["payload"]["count"], 1);
    assert_eq!(got[0]["sender"], relay.uri());
}

#[tokio::test]
async fn actor_ask_error_continuation_on_unreachable_target() {
    let sys = system();
    let ghost = Address::new(NodeId::local(), "actor", "ghost", "/user/ghost");

    let relay = sys
        .spawn(
            Props::new_args(|counter| Relay { counter }, ghost),
            SpawnOptions::named("relay"),
        )
        .unwrap();

    let recorder = sys
        .spawn(Recorder::props(), SpawnOptions::named("recorder"))
        .unwrap();
    sys.subscribe(&relay, &recorder, TopicFilter::parse("EMIT:ASK_FAILED"))
        .unwrap();

    sys.tell(&relay, Envelope::new("KICK", Value::Null))
        .await
        .unwrap();

    let sys2 = sys.clone();
    let recorder2 = recorder.clone();
    assert!(
        common::eventually_async(
            move || {
                let sys = sys2.clone();
                let recorder = recorder2.clone();
                async move {
                    let seen = dump(&sys, &recorder).await;
                    !of_type(&seen, "EMIT:ASK_FAILED").is_empty()
                }
            },
            Duration::from_secs(2)
        )
        .await,
        "error continuation should emit"
    );
}

#[tokio::test]
async fn every_ask_resolves_exactly_once() {
    let sys = system();
    let counter = sys
        .spawn(Props::new(Counter::new), SpawnOptions::named("counter"))
        .unwrap();
    let slug = sys
        .spawn(Props::new(Sluggish::new), SpawnOptions::named("sluggish"))
        .unwrap();

    let ok = sys
        .ask(&counter, Envelope::new("GET", Value::Null), None)
        .await
        .unwrap();
    let timed_out = sys
        .ask(
            &slug,
            Envelope::new("PING", Value::Null),
            Some(Duration::from_millis(50)),
        )
        .await
        .unwrap();
    let cancelled = sys
        .ask(
            &slug,
            Envelope::new("PING", Value::Null),
            Some(Duration::from_secs(30)),
        )
        .await
        .unwrap();

    assert!(ok.await.is_ok());
    cancelled.cancel();
    assert_eq!(timed_out.await.unwrap_err(), AskError::Timeout);

    assert!(eventually(|| sys.pending_asks() == 0, Duration::from_secs(1)).await);
}
