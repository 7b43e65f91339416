mod common;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use common::{dump, eventually_async, of_type, system, Recorder};
use polyp::actors::*;

/// Emits whatever it is told to: `EMIT_ONE` produces one event,
/// `EMIT_TWO` a sequence of two. Applied events are counted, which is
/// how the state-container feed-back half of the fan-out shows up.
struct Publisher {
    applied: i64,
}

impl Publisher {
    fn new() -> Self {
        Publisher { applied: 0 }
    }
}

#[async_trait]
impl Behavior for Publisher {
    async fn on_message(
        &mut self,
        _ctx: &Context,
        msg: Envelope,
    ) -> Result<MessagePlan, HandlerError> {
        match msg.msg_type.as_str() {
            "EMIT_ONE" => Ok(MessagePlan::event("X", msg.payload)),
            "EMIT_TWO" => Ok(MessagePlan::seq(vec![
                MessagePlan::event("X", json!({ "order": 1 })),
                MessagePlan::event("Y", json!({ "order": 2 })),
            ])),
            "APPLIED" => Ok(MessagePlan::reply(&msg, json!({ "applied": self.applied }))),
            _ => Ok(MessagePlan::Nothing),
        }
    }

    fn apply_event(&mut self, _ctx: &Context, _event: &Envelope) {
        self.applied += 1;
    }
}

async fn wait_for_seen(sys: &ActorSystem, recorder: &Address, min: usize) -> Vec<Value> {
    let sys2 = sys.clone();
    let recorder2 = recorder.clone();
    eventually_async(
        move || {
            let sys = sys2.clone();
            let recorder = recorder2.clone();
            async move { dump(&sys, &recorder).await.len() >= min }
        },
        Duration::from_secs(2),
    )
    .await;
    dump(sys, recorder).await
}

#[tokio::test]
async fn emit_fans_out_to_literal_and_wildcard_subscribers() {
    let sys = system();
    let publisher = sys
        .spawn(Props::new(Publisher::new), SpawnOptions::named("publisher"))
        .unwrap();
    let a = sys
        .spawn(Recorder::props(), SpawnOptions::named("sub-a"))
        .unwrap();
    let b = sys
        .spawn(Recorder::props(), SpawnOptions::named("sub-b"))
        .unwrap();

    sys.subscribe(&publisher, &a, TopicFilter::parse("EMIT:X"))
        .unwrap();
    sys.subscribe(&publisher, &b, TopicFilter::parse("EMIT:*"))
        .unwrap();

    sys.tell(&publisher, Envelope::new("EMIT_ONE", json!({ "n": 7 })))
        .await
        .unwrap();

    let seen_a = wait_for_seen(&sys, &a, 1).await;
    let seen_b = wait_for_seen(&sys, &b, 1).await;

    for seen in [&seen_a, &seen_b] {
        let hits = of_type(seen, "EMIT:X");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["payload"]["n"], 7);
        assert_eq!(hits[0]["sender"], publisher.uri());
    }
}

#[tokio::test]
async fn single_turn_emits_arrive_in_publisher_order() {
    let sys = system();
    let publisher = sys
        .spawn(Props::new(Publisher::new), SpawnOptions::named("publisher"))
        .unwrap();
    let sub = sys
        .spawn(Recorder::props(), SpawnOptions::named("sub"))
        .unwrap();
    sys.subscribe(&publisher, &sub, TopicFilter::parse("EMIT:*"))
        .unwrap();

    sys.tell(&publisher, Envelope::new("EMIT_TWO", Value::Null))
        .await
        .unwrap();

    let seen = wait_for_seen(&sys, &sub, 2).await;
    let emits: Vec<_> = seen
        .iter()
        .filter(|e| e["type"].as_str().unwrap_or_default().starts_with("EMIT:"))
        .collect();
    assert_eq!(emits.len(), 2);
    assert_eq!(emits[0]["type"], "EMIT:X");
    assert_eq!(emits[0]["payload"]["order"], 1);
    assert_eq!(emits[1]["type"], "EMIT:Y");
    assert_eq!(emits[1]["payload"]["order"], 2);
}

#[tokio::test]
async fn subscriptions_are_per_publisher() {
    let sys = system();
    let p1 = sys
        .spawn(Props::new(Publisher::new), SpawnOptions::named("p1"))
        .unwrap();
    let p2 = sys
        .spawn(Props::new(Publisher::new), SpawnOptions::named("p2"))
        .unwrap();
    let sub = sys
        .spawn(Recorder::props(), SpawnOptions::named("sub"))
        .unwrap();

    sys.subscribe(&p1, &sub, TopicFilter::parse("EMIT:*")).unwrap();

    sys.tell(&p2, Envelope::new("EMIT_ONE", json!({ "from": "p2" })))
        .await
        .unwrap();
    sys.tell(&p1, Envelope::new("EMIT_ONE", json!({ "from": "p1" })))
        .await
        .unwrap();

    let seen = wait_for_seen(&sys, &sub, 1).await;
    let emits = of_type(&seen, "EMIT:X");
    assert_eq!(emits.len(), 1, "only p1's emit should arrive");
    assert_eq!(emits[0]["payload"]["from"], "p1");
    assert_eq!(emits[0]["sender"], p1.uri());
}

#[tokio::test]
async fn unsubscribe_detaches_the_subscriber() {
    let sys = system();
    let publisher = sys
        .spawn(Props::new(Publisher::new), SpawnOptions::named("publisher"))
        .unwrap();
    let sub = sys
        .spawn(Recorder::props(), SpawnOptions::named("sub"))
        .unwrap();

    let token = sys
        .subscribe(&publisher, &sub, TopicFilter::parse("EMIT:*"))
        .unwrap();

    sys.tell(&publisher, Envelope::new("EMIT_ONE", json!({ "n": 1 })))
        .await
        .unwrap();
    wait_for_seen(&sys, &sub, 1).await;

    assert!(sys.unsubscribe(&publisher, token));
    sys.tell(&publisher, Envelope::new("EMIT_ONE", json!({ "n": 2 })))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    let seen = dump(&sys, &sub).await;
    assert_eq!(of_type(&seen, "EMIT:X").len(), 1, "no delivery after unsubscribe");
}

#[tokio::test]
async fn events_feed_back_into_the_state_container() {
    let sys = system();
    let publisher = sys
        .spawn(Props::new(Publisher::new), SpawnOptions::named("publisher"))
        .unwrap();

    // no subscribers at all; the self-feed still happens
    sys.tell(&publisher, Envelope::new("EMIT_TWO", Value::Null))
        .await
        .unwrap();

    let applied = sys
        .ask(&publisher, Envelope::new("APPLIED", Value::Null), None)
        .await
        .unwrap()
        .await
        .unwrap();
    assert_eq!(applied["applied"], 2);
}

#[tokio::test]
async fn dead_letters_surface_as_system_events() {
    let sys = system();
    let observer = sys
        .spawn(Recorder::props(), SpawnOptions::named("observer"))
        .unwrap();
    sys.subscribe(
        &sys.system_events_address(),
        &observer,
        TopicFilter::parse("EMIT:deadLetter"),
    )
    .unwrap();

    let victim = sys
        .spawn(Props::new(Publisher::new), SpawnOptions::named("victim"))
        .unwrap();
    sys.stop(&victim);
    let sys2 = sys.clone();
    let victim2 = victim.clone();
    assert!(
        eventually_async(
            move || {
                let sys = sys2.clone();
                let victim = victim2.clone();
                async move { sys.cell_ref(&victim).is_none() }
            },
            Duration::from_secs(2)
        )
        .await
    );

    let _ = sys
        .tell(&victim, Envelope::new("EMIT_ONE", Value::Null))
        .await;

    let seen = wait_for_seen(&sys, &observer, 1).await;
    let dead = of_type(&seen, "EMIT:deadLetter");
    assert!(!dead.is_empty());
    assert_eq!(dead[0]["sender"], sys.system_events_address().uri());
}

#[tokio::test]
async fn subscriptions_survive_publisher_restart() {
    struct Flaky;

    #[async_trait]
    impl Behavior for Flaky {
        async fn on_message(
            &mut self,
            _ctx: &Context,
            msg: Envelope,
        ) -> Result<MessagePlan, HandlerError> {
            match msg.msg_type.as_str() {
                "TRIGGER_ERROR" => Err(HandlerError::new("boom")),
                "EMIT_ONE" => Ok(MessagePlan::event("X", msg.payload)),
                _ => Ok(MessagePlan::Nothing),
            }
        }
    }

    let sys = system();
    let publisher = sys
        .spawn(Props::new(|| Flaky), SpawnOptions::named("flaky"))
        .unwrap();
    let sub = sys
        .spawn(Recorder::props(), SpawnOptions::named("sub"))
        .unwrap();
    sys.subscribe(&publisher, &sub, TopicFilter::parse("EMIT:X"))
        .unwrap();

    sys.tell(&publisher, Envelope::new("TRIGGER_ERROR", Value::Null))
        .await
        .unwrap();

    // wait for the fresh incarnation, then emit again
    let sys2 = sys.clone();
    let publisher2 = publisher.clone();
    assert!(
        eventually_async(
            move || {
                let sys = sys2.clone();
                let publisher = publisher2.clone();
                async move {
                    sys.cell_ref(&publisher)
                        .map(|c| c.incarnation() == 1 && c.status() == CellStatus::Running)
                        .unwrap_or(false)
                }
            },
            Duration::from_secs(2)
        )
        .await
    );

    sys.tell(&publisher, Envelope::new("EMIT_ONE", json!({ "post": true })))
        .await
        .unwrap();

    let seen = wait_for_seen(&sys, &sub, 1).await;
    let emits = of_type(&seen, "EMIT:X");
    assert_eq!(emits.len(), 1, "subscriber still attached after restart");
    assert_eq!(emits[0]["payload"]["post"], true);
}
