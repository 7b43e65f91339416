mod common;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use common::{dump, eventually, eventually_async, of_type, system, Recorder};
use polyp::actors::*;

/// Counts messages; fails on `TRIGGER_ERROR`. Restart budget is small
/// so storms resolve quickly in tests.
struct Brittle {
    handled: i64,
    directive: Directive,
}

impl Brittle {
    fn restarting() -> Self {
        Brittle {
            handled: 0,
            directive: Directive::Restart,
        }
    }

    fn resuming() -> Self {
        Brittle {
            handled: 0,
            directive: Directive::Resume,
        }
    }

    fn escalating() -> Self {
        Brittle {
            handled: 0,
            directive: Directive::Escalate,
        }
    }
}

#[async_trait]
impl Behavior for Brittle {
    async fn on_message(
        &mut self,
        ctx: &Context,
        msg: Envelope,
    ) -> Result<MessagePlan, HandlerError> {
        match msg.msg_type.as_str() {
            "TRIGGER_ERROR" => Err(HandlerError::new("boom")),
            "TRIGGER_PANIC" => panic!("// TEST PANIC //"),
            "STATUS" => Ok(MessagePlan::reply(
                &msg,
                json!({ "handled": self.handled, "incarnation": ctx.incarnation() }),
            )),
            _ => {
                self.handled += 1;
                Ok(MessagePlan::Nothing)
            }
        }
    }

    fn snapshot(&self) -> Value {
        json!({ "handled": self.handled })
    }

    fn supervision_strategy(&self) -> SupervisionStrategy {
        SupervisionStrategy::always(self.directive)
            .with_budget(2, Duration::from_millis(500))
            .with_backoff(Duration::from_millis(5))
    }
}

async fn watch_system_events(sys: &ActorSystem) -> Address {
    let recorder = sys
        .spawn(Recorder::props(), SpawnOptions::named("events-recorder"))
        .unwrap();
    sys.subscribe(
        &sys.system_events_address(),
        &recorder,
        TopicFilter::parse("EMIT:*"),
    )
    .unwrap();
    recorder
}

#[tokio::test]
async fn restart_keeps_address_and_resets_state() {
    let sys = system();
    let events = watch_system_events(&sys).await;

    let brittle = sys
        .spawn(Props::new(Brittle::restarting), SpawnOptions::named("brittle"))
        .unwrap();

    // warm some state, then fail
    sys.tell(&brittle, Envelope::new("WORK", Value::Null))
        .await
        .unwrap();
    sys.tell(&brittle, Envelope::new("TRIGGER_ERROR", Value::Null))
        .await
        .unwrap();

    let sys2 = sys.clone();
    let events2 = events.clone();
    assert!(
        eventually_async(
            move || {
                let sys = sys2.clone();
                let events = events2.clone();
                async move {
                    let seen = dump(&sys, &events).await;
                    of_type(&seen, "EMIT:actorRestarted").len() == 1
                }
            },
            Duration::from_secs(2)
        )
        .await,
        "exactly one actorRestarted event"
    );

    // same address answers; state is back to initial; incarnation moved
    let status = sys
        .ask(&brittle, Envelope::new("STATUS", Value::Null), None)
        .await
        .unwrap()
        .await
        .unwrap();
    assert_eq!(status["handled"], 0);
    assert_eq!(status["incarnation"], 1);
    assert_eq!(sys.lookup("brittle"), Some(brittle.clone()));

    // the offending envelope went to dead letters, not back to the actor
    let seen = dump(&sys, &events).await;
    let dead = of_type(&seen, "EMIT:deadLetter");
    assert!(dead
        .iter()
        .any(|d| d["payload"]["type"] == "TRIGGER_ERROR"));
}

#[tokio::test]
async fn panic_is_supervised_like_an_error() {
    let sys = system();
    let brittle = sys
        .spawn(Props::new(Brittle::restarting), SpawnOptions::named("brittle"))
        .unwrap();

    sys.tell(&brittle, Envelope::new("TRIGGER_PANIC", Value::Null))
        .await
        .unwrap();

    let sys2 = sys.clone();
    let brittle2 = brittle.clone();
    assert!(
        eventually_async(
            move || {
                let sys = sys2.clone();
                let brittle = brittle2.clone();
                async move {
                    sys.cell_ref(&brittle)
                        .map(|c| c.incarnation() == 1 && c.status() == CellStatus::Running)
                        .unwrap_or(false)
                }
            },
            Duration::from_secs(2)
        )
        .await,
        "panicking actor should restart"
    );
}

#[tokio::test]
async fn restart_storm_upgrades_to_stop() {
    let sys = system();
    let events = watch_system_events(&sys).await;

    let brittle = sys
        .spawn(Props::new(Brittle::restarting), SpawnOptions::named("brittle"))
        .unwrap();

    // three failures inside the 500 ms window with a budget of two
    for i in 0..3u64 {
        sys.tell(&brittle, Envelope::new("TRIGGER_ERROR", Value::Null))
            .await
            .unwrap();
        let sys2 = sys.clone();
        let brittle2 = brittle.clone();
        let expected = i + 1;
        // wait for the restart (or the final stop) before failing again
        eventually_async(
            move || {
                let sys = sys2.clone();
                let brittle = brittle2.clone();
                async move {
                    match sys.cell_ref(&brittle) {
                        Some(c) => {
                            c.incarnation() >= expected && c.status() == CellStatus::Running
                        }
                        None => true,
                    }
                }
            },
            Duration::from_millis(300),
        )
        .await;
    }

    assert!(
        eventually(|| sys.cell_ref(&brittle).is_none(), Duration::from_secs(2)).await,
        "the third failure should stop the actor"
    );

    let seen = dump(&sys, &events).await;
    assert_eq!(of_type(&seen, "EMIT:actorRestarted").len(), 2);
    assert_eq!(
        of_type(&seen, "EMIT:actorStopped")
            .iter()
            .filter(|e| e["payload"]["actor"] == brittle.uri())
            .count(),
        1
    );
}

#[tokio::test]
async fn resume_keeps_state_and_incarnation() {
    let sys = system();
    let brittle = sys
        .spawn(Props::new(Brittle::resuming), SpawnOptions::named("brittle"))
        .unwrap();

    sys.tell(&brittle, Envelope::new("WORK", Value::Null))
        .await
        .unwrap();
    sys.tell(&brittle, Envelope::new("TRIGGER_ERROR", Value::Null))
        .await
        .unwrap();
    sys.tell(&brittle, Envelope::new("WORK", Value::Null))
        .await
        .unwrap();

    let status = sys
        .ask(&brittle, Envelope::new("STATUS", Value::Null), None)
        .await
        .unwrap()
        .await
        .unwrap();

    // state survived; the envelope after the failure was processed
    assert_eq!(status["handled"], 2);
    assert_eq!(status["incarnation"], 0);
}

struct EscalatingParent;

#[async_trait]
impl Behavior for EscalatingParent {
    fn on_start(&mut self, ctx: &Context) -> Result<MessagePlan, HandlerError> {
        ctx.spawn_child(
            Props::new(Brittle::escalating),
            SpawnOptions::named("volatile-child"),
        )
        .map_err(|e| HandlerError::new(e.to_string()))?;
        Ok(MessagePlan::Nothing)
    }

    async fn on_message(
        &mut self,
        ctx: &Context,
        msg: Envelope,
    ) -> Result<MessagePlan, HandlerError> {
        if msg.msg_type == "STATUS" {
            return Ok(MessagePlan::reply(
                &msg,
                json!({ "incarnation": ctx.incarnation() }),
            ));
        }
        Ok(MessagePlan::Nothing)
    }
}

#[tokio::test]
async fn escalation_fails_the_parent() {
    let sys = system();
    let parent = sys
        .spawn(Props::new(|| EscalatingParent), SpawnOptions::named("parent"))
        .unwrap();

    assert!(
        eventually(|| sys.lookup("volatile-child").is_some(), Duration::from_secs(2)).await
    );
    let child = sys.lookup("volatile-child").unwrap();

    // child escalates its failure; the guardian restarts the parent
    sys.tell(&child, Envelope::new("TRIGGER_ERROR", Value::Null))
        .await
        .unwrap();

    let sys2 = sys.clone();
    let parent2 = parent.clone();
    assert!(
        eventually_async(
            move || {
                let sys = sys2.clone();
                let parent = parent2.clone();
                async move {
                    sys.cell_ref(&parent)
                        .map(|c| c.incarnation() == 1 && c.status() == CellStatus::Running)
                        .unwrap_or(false)
                }
            },
            Duration::from_secs(3)
        )
        .await,
        "escalation should restart the parent"
    );

    // the parent's fresh incarnation re-created the child
    assert!(
        eventually(
            || sys
                .cell_ref(&sys.lookup("volatile-child").unwrap_or_else(|| child.clone()))
                .map(|c| c.status() == CellStatus::Running)
                .unwrap_or(false),
            Duration::from_secs(2)
        )
        .await
    );
}
