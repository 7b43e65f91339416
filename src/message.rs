use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::address::Address;

/// Version stamped into every envelope; bumped on wire-shape changes.
pub const WIRE_VERSION: &str = "1";

/// Prefix reserved for event-bus traffic. User code must not mint it.
pub const EMIT_PREFIX: &str = "EMIT:";

/// Prefix reserved for runtime-internal traffic. User code must not mint it.
pub const SYS_PREFIX: &str = "SYS:";

/// Type reserved for ask replies.
pub const RESPONSE_TYPE: &str = "RESPONSE";

/// Delivered to an ask initiator when the deadline passes and the ask
/// carried no error continuation.
pub const ASK_TIMEOUT_TYPE: &str = "SYS:ASK_TIMEOUT";

/// Delivered to a sender when a `retry(N)` send exhausted its attempts.
pub const SEND_FAILED_TYPE: &str = "SYS:SEND_FAILED";

/// A message as it travels through the system.
///
/// `msg_type` and `payload` belong to the application; the remaining
/// metadata fields are reserved for the runtime. The JSON shape uses
/// `type` for `msg_type`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Milliseconds since the unix epoch, stamped at creation.
    pub timestamp: i64,
    pub version: String,
}

impl Envelope {
    pub fn new(msg_type: impl Into<String>, payload: Value) -> Envelope {
        Envelope {
            msg_type: msg_type.into(),
            payload,
            sender: None,
            correlation_id: None,
            timestamp: Utc::now().timestamp_millis(),
            version: WIRE_VERSION.into(),
        }
    }

    pub(crate) fn with_sender(mut self, sender: Address) -> Envelope {
        self.sender = Some(sender);
        self
    }

    pub(crate) fn with_correlation_id(mut self, id: impl Into<String>) -> Envelope {
        self.correlation_id = Some(id.into());
        self
    }

    /// Builds the reply to an ask envelope, carrying the original
    /// correlation id unchanged. Returns `None` when the request was a
    /// plain tell.
    pub fn reply_to(request: &Envelope, payload: Value) -> Option<Envelope> {
        let id = request.correlation_id.clone()?;
        Some(Envelope::new(RESPONSE_TYPE, payload).with_correlation_id(id))
    }

    pub fn is_response(&self) -> bool {
        self.msg_type == RESPONSE_TYPE
    }

    pub fn is_emit(&self) -> bool {
        self.msg_type.starts_with(EMIT_PREFIX)
    }

    /// True for types user code is not allowed to send itself.
    pub fn has_reserved_type(&self) -> bool {
        self.msg_type.starts_with(EMIT_PREFIX) || self.msg_type.starts_with(SYS_PREFIX)
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Envelope[{}", self.msg_type)?;
        if let Some(cid) = &self.correlation_id {
            write!(f, " corr={cid}")?;
        }
        if let Some(sender) = &self.sender {
            write!(f, " from={sender}")?;
        }
        write!(f, "]")
    }
}

/// An envelope that could not be delivered, surfaced through the
/// system-event actor rather than through logs.
#[derive(Clone, Debug)]
pub struct DeadLetter {
    pub recipient: Address,
    pub sender: Option<Address>,
    pub msg_type: String,
    pub reason: String,
}

impl DeadLetter {
    pub(crate) fn payload(&self) -> Value {
        serde_json::json!({
            "recipient": self.recipient.uri(),
            "sender": self.sender.as_ref().map(|a| a.uri()),
            "type": self.msg_type,
            "reason": self.reason,
        })
    }
}
