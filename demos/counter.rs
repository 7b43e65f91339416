use async_trait::async_trait;
use serde_json::json;

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
                Ok(MessagePlan::event("INCREMENT", json!({ "count": self.count })))
            }
            "GET" => Ok(MessagePlan::reply(&msg, json!({ "count": self.count }))),
            _ => Ok(MessagePlan::Nothing),
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        json!({ "count": self.count })
    }
}

#[tokio::main]
async fn main() {
    let sys = ActorSystem::new().unwrap();

    let counter = sys
        .spawn(Props::new(Counter::new), SpawnOptions::named("counter"))
        .unwrap();

    for _ in 0..3 {
        sys.tell(&counter, Envelope::new("INCREMENT", json!(null)))
            .await
            .unwrap();
    }

    let reply = sys
        .ask(&counter, Envelope::new("GET", json!(null)), None)
        .await
        .unwrap()
        .await
        .unwrap();

    println!("{counter} -> count = {}", reply["count"]);

    let _ = sys.shutdown().await;
}
