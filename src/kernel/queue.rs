use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::message::Envelope;

/// What `enqueue` does when the queue is at capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Reject the incoming envelope; queue unchanged.
    DropNewest,
    /// Evict the head to make room; the evicted envelope dead-letters.
    DropOldest,
    /// Cooperatively suspend the sender until space is available.
    BlockSender,
    /// Reject and surface the error to the sender.
    FailSender,
}

pub fn queue(capacity: usize, policy: OverflowPolicy) -> (QueueWriter, QueueReader) {
    let inner = Arc::new(QueueInner {
        buf: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
        capacity,
        policy,
        closed: AtomicBool::new(false),
        space: Notify::new(),
    });

    (
        QueueWriter {
            inner: inner.clone(),
        },
        QueueReader { inner },
    )
}

struct QueueInner {
    buf: Mutex<VecDeque<Envelope>>,
    capacity: usize,
    policy: OverflowPolicy,
    closed: AtomicBool,
    space: Notify,
}

#[derive(Clone)]
pub struct QueueWriter {
    inner: Arc<QueueInner>,
}

/// Outcome of an accepted enqueue.
pub enum Enqueued {
    Accepted,
    /// `drop-oldest` made room by evicting the head.
    Displaced(Envelope),
}

#[derive(Debug)]
pub enum EnqueueError {
    /// At capacity under `drop-newest` or `fail-sender`.
    Full(Envelope),
    Closed(Envelope),
}

impl QueueWriter {
    pub fn policy(&self) -> OverflowPolicy {
        self.inner.policy
    }

    /// Single non-blocking attempt, applying the overflow policy.
    ///
    /// Under `block-sender` a full queue reports `Full`; use `enqueue`
    /// to wait for space instead.
    pub fn try_enqueue(&self, env: Envelope) -> Result<Enqueued, EnqueueError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(EnqueueError::Closed(env));
        }

        let mut buf = self.inner.buf.lock().unwrap();
        if buf.len() < self.inner.capacity {
            buf.push_back(env);
            return Ok(Enqueued::Accepted);
        }

        match self.inner.policy {
            OverflowPolicy::DropOldest => {
                let evicted = buf.pop_front().expect("capacity > 0");
                buf.push_back(env);
                Ok(Enqueued::Displaced(evicted))
            }
            _ => Err(EnqueueError::Full(env)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.buf.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue that honors `block-sender` by waiting cooperatively for
    /// space. All other policies resolve in a single attempt.
    pub async fn enqueue(&self, env: Envelope) -> Result<Enqueued, EnqueueError> {
        if self.inner.policy != OverflowPolicy::BlockSender {
            return self.try_enqueue(env);
        }

        let mut env = env;
        loop {
            let notified = self.inner.space.notified();
            match self.try_enqueue(env) {
                Err(EnqueueError::Full(e)) => {
                    env = e;
                    notified.await;
                }
                other => return other,
            }
        }
    }
}

pub struct QueueReader {
    inner: Arc<QueueInner>,
}

pub struct QueueEmpty;

impl QueueReader {
    pub fn try_dequeue(&self) -> Result<Envelope, QueueEmpty> {
        let item = self.inner.buf.lock().unwrap().pop_front();
        match item {
            Some(env) => {
                self.inner.space.notify_waiters();
                Ok(env)
            }
            None => Err(QueueEmpty),
        }
    }

    pub fn has_msgs(&self) -> bool {
        !self.inner.buf.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.buf.lock().unwrap().len()
    }

    /// Empties the queue without closing it, in order. Blocked senders
    /// get their space back.
    pub fn drain(&self) -> Vec<Envelope> {
        let drained: Vec<_> = self.inner.buf.lock().unwrap().drain(..).collect();
        if !drained.is_empty() {
            self.inner.space.notify_waiters();
        }
        drained
    }

    /// Closes the queue and returns everything left in it, in order.
    /// Blocked senders wake up and observe `Closed`.
    pub fn close(&self) -> Vec<Envelope> {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.space.notify_waiters();
        self.inner.buf.lock().unwrap().drain(..).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn env(t: &str) -> Envelope {
        Envelope::new(t, Value::Null)
    }

    #[test]
    fn fifo_order() {
        let (w, r) = queue(8, OverflowPolicy::DropNewest);
        w.try_enqueue(env("a")).unwrap();
        w.try_enqueue(env("b")).unwrap();
        assert_eq!(r.try_dequeue().ok().unwrap().msg_type, "a");
        assert_eq!(r.try_dequeue().ok().unwrap().msg_type, "b");
        assert!(r.try_dequeue().is_err());
    }

    #[test]
    fn drop_newest_rejects_incoming() {
        let (w, r) = queue(1, OverflowPolicy::DropNewest);
        w.try_enqueue(env("a")).unwrap();
        assert!(matches!(
            w.try_enqueue(env("b")),
            Err(EnqueueError::Full(e)) if e.msg_type == "b"
        ));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn drop_oldest_displaces_head() {
        let (w, r) = queue(1, OverflowPolicy::DropOldest);
        w.try_enqueue(env("a")).unwrap();
        match w.try_enqueue(env("b")) {
            Ok(Enqueued::Displaced(evicted)) => assert_eq!(evicted.msg_type, "a"),
            _ => panic!("expected displacement"),
        }
        assert_eq!(r.try_dequeue().ok().unwrap().msg_type, "b");
    }

    #[test]
    fn closed_queue_rejects() {
        let (w, r) = queue(4, OverflowPolicy::DropNewest);
        w.try_enqueue(env("a")).unwrap();
        let drained = r.close();
        assert_eq!(drained.len(), 1);
        assert!(matches!(
            w.try_enqueue(env("b")),
            Err(EnqueueError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn block_sender_waits_for_space() {
        let (w, r) = queue(1, OverflowPolicy::BlockSender);
        w.enqueue(env("a")).await.unwrap();

        let w2 = w.clone();
        let blocked = tokio::spawn(async move { w2.enqueue(env("b")).await });

        tokio::task::yield_now().await;
        assert_eq!(r.try_dequeue().ok().unwrap().msg_type, "a");

        blocked.await.unwrap().unwrap();
        assert_eq!(r.try_dequeue().ok().unwrap().msg_type, "b");
    }
}
