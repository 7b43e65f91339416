use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use polyp::actors::*;

/// Fails on demand so the restart directive can be watched at work.
struct Brittle {
    handled: u64,
}

impl Brittle {
    fn new() -> Self {
        Brittle { handled: 0 }
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

    fn supervision_strategy(&self) -> SupervisionStrategy {
        SupervisionStrategy::always(Directive::Restart)
            .with_budget(3, Duration::from_secs(1))
            .with_backoff(Duration::from_millis(10))
    }
}

#[tokio::main]
async fn main() {
    let sys = ActorSystem::new().unwrap();

    let brittle = sys
        .spawn(Props::new(Brittle::new), SpawnOptions::named("brittle"))
        .unwrap();

    sys.tell(&brittle, Envelope::new("TRIGGER_ERROR", json!(null)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let status = sys
        .ask(&brittle, Envelope::new("STATUS", json!(null)), None)
        .await
        .unwrap()
        .await
        .unwrap();

    println!("after failure: {status}");
    println!("same address survives the restart: {brittle}");

    let _ = sys.shutdown().await;
}
