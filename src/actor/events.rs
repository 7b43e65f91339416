use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::address::Address;
use crate::message::EMIT_PREFIX;

/// Filters emits by topic: a literal `EMIT:<type>` string or the
/// wildcard `EMIT:*`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TopicFilter {
    Literal(String),
    AllEmits,
}

impl TopicFilter {
    /// Parses a filter string. Bare event types are accepted and
    /// normalized to their `EMIT:` form.
    pub fn parse(s: &str) -> TopicFilter {
        if s == "EMIT:*" || s == "*" {
            TopicFilter::AllEmits
        } else if let Some(stripped) = s.strip_prefix(EMIT_PREFIX) {
            TopicFilter::Literal(format!("{EMIT_PREFIX}{stripped}"))
        } else {
            TopicFilter::Literal(format!("{EMIT_PREFIX}{s}"))
        }
    }

    pub fn matches(&self, emit_type: &str) -> bool {
        match self {
            TopicFilter::AllEmits => emit_type.starts_with(EMIT_PREFIX),
            TopicFilter::Literal(topic) => topic == emit_type,
        }
    }
}

impl From<&str> for TopicFilter {
    fn from(s: &str) -> TopicFilter {
        TopicFilter::parse(s)
    }
}

/// Handle for removing a subscription from its publisher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubToken(u64);

#[derive(Clone, Debug)]
pub struct Subscription {
    pub token: SubToken,
    pub subscriber: Address,
    pub filter: TopicFilter,
}

/// Per-publisher subscription storage.
///
/// Lives on the publisher cell and survives restarts, so prior
/// subscribers stay attached to the fresh incarnation at the same
/// address. Iteration order is registration order, which is what gives
/// subscribers publisher-local delivery order.
#[derive(Clone, Default)]
pub(crate) struct SubscriberTable {
    inner: Arc<SubscriberTableInner>,
}

#[derive(Default)]
struct SubscriberTableInner {
    subs: Mutex<Vec<Subscription>>,
    next_token: AtomicU64,
}

impl SubscriberTable {
    pub(crate) fn subscribe(&self, subscriber: Address, filter: TopicFilter) -> SubToken {
        let token = SubToken(self.inner.next_token.fetch_add(1, Ordering::Relaxed));
        self.inner.subs.lock().unwrap().push(Subscription {
            token,
            subscriber,
            filter,
        });
        token
    }

    pub(crate) fn unsubscribe(&self, token: SubToken) -> bool {
        let mut subs = self.inner.subs.lock().unwrap();
        match subs.iter().position(|s| s.token == token) {
            Some(pos) => {
                subs.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Drops every subscription held by `subscriber`; used when a
    /// subscriber terminates without unsubscribing.
    pub(crate) fn remove_subscriber(&self, subscriber: &Address) {
        self.inner
            .subs
            .lock()
            .unwrap()
            .retain(|s| &s.subscriber != subscriber);
    }

    /// Subscribers whose filter matches `emit_type`, in registration order.
    pub(crate) fn matching(&self, emit_type: &str) -> Vec<Address> {
        self.inner
            .subs
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.filter.matches(emit_type))
            .map(|s| s.subscriber.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.subs.lock().unwrap().len()
    }
}
