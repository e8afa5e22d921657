//! Component B: at-most-once topic publish/subscribe with a per-subject
//! dispatch thread (§4.B). The backend broker (a NATS-like service) is out
//! of scope (§1) -- only the capability contract and adapters over it are.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{QotError, QotResult};

pub type MessageHandler = Box<dyn Fn(&[u8]) + Send + Sync>;

/// The capability contract peer-sync dispatch (component I) and node
/// ingestion (component G) build on.
pub trait PubSub: Send + Sync {
    fn publish(&self, subject: &str, payload: &[u8]) -> QotResult<()>;

    /// Registers `handler` to run, on a dedicated dispatch thread for
    /// `subject`, once for every message published after subscription.
    /// At-most-once: a handler that is not yet subscribed when a message
    /// is published never sees it.
    fn subscribe(&self, subject: &str, handler: MessageHandler) -> QotResult<()>;

    fn unsubscribe(&self, subject: &str) -> QotResult<()>;
}

struct Topic {
    handlers: Vec<Arc<MessageHandler>>,
}

/// In-process stand-in used by tests and by anyone embedding the fabric
/// without a Redis dependency. Each subject gets its own handler list;
/// `publish` fans out synchronously to every currently-subscribed
/// handler on the caller's thread, matching "at-most-once, no
/// replay" semantics without needing a background thread at all.
pub struct InMemoryPubSub {
    topics: Mutex<HashMap<String, Topic>>,
}

impl InMemoryPubSub {
    pub fn new() -> Arc<Self> {
        Arc::new(InMemoryPubSub {
            topics: Mutex::new(HashMap::new()),
        })
    }
}

impl PubSub for InMemoryPubSub {
    fn publish(&self, subject: &str, payload: &[u8]) -> QotResult<()> {
        let topics = self.topics.lock();
        if let Some(topic) = topics.get(subject) {
            for handler in &topic.handlers {
                handler(payload);
            }
        }
        Ok(())
    }

    fn subscribe(&self, subject: &str, handler: MessageHandler) -> QotResult<()> {
        let mut topics = self.topics.lock();
        topics
            .entry(subject.to_string())
            .or_insert_with(|| Topic { handlers: Vec::new() })
            .handlers
            .push(Arc::new(handler));
        Ok(())
    }

    fn unsubscribe(&self, subject: &str) -> QotResult<()> {
        let mut topics = self.topics.lock();
        topics.remove(subject);
        Ok(())
    }
}

/// Production-shaped adapter over Redis pub/sub. Each `subscribe` call
/// spawns a dedicated thread running
/// its own connection's `PubSub::subscribe` + message loop, matching
/// "a per-subject dispatch thread" directly rather than multiplexing
/// subjects onto one connection.
pub struct RedisPubSub {
    client: redis::Client,
    subscriptions: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl RedisPubSub {
    pub fn connect(redis_url: &str) -> QotResult<Arc<Self>> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QotError::ConnectionError(e.to_string()))?;
        let mut conn = client
            .get_connection()
            .map_err(|e| QotError::ConnectionError(e.to_string()))?;
        let _: () = redis::cmd("PING")
            .query(&mut conn)
            .map_err(|e| QotError::ConnectionError(e.to_string()))?;
        Ok(Arc::new(RedisPubSub {
            client,
            subscriptions: Mutex::new(HashMap::new()),
        }))
    }
}

impl PubSub for RedisPubSub {
    fn publish(&self, subject: &str, payload: &[u8]) -> QotResult<()> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| QotError::ConnectionError(e.to_string()))?;
        let _: () = redis::cmd("PUBLISH")
            .arg(subject)
            .arg(payload)
            .query(&mut conn)
            .map_err(|e| QotError::ConnectionError(e.to_string()))?;
        Ok(())
    }

    fn subscribe(&self, subject: &str, handler: MessageHandler) -> QotResult<()> {
        let running = Arc::new(AtomicBool::new(true));
        self.subscriptions
            .lock()
            .insert(subject.to_string(), running.clone());

        let client = self.client.clone();
        let subject = subject.to_string();
        thread::spawn(move || loop {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            let conn = match client.get_connection() {
                Ok(c) => c,
                Err(_) => {
                    thread::sleep(Duration::from_millis(500));
                    continue;
                }
            };
            let mut pubsub = conn.into_pubsub();
            if pubsub.subscribe(&subject).is_err() {
                thread::sleep(Duration::from_millis(500));
                continue;
            }
            loop {
                if !running.load(Ordering::SeqCst) {
                    return;
                }
                match pubsub.get_message() {
                    Ok(msg) => {
                        let payload: Vec<u8> = msg.get_payload_bytes().to_vec();
                        handler(&payload);
                    }
                    Err(_) => break,
                }
            }
        });
        Ok(())
    }

    fn unsubscribe(&self, subject: &str) -> QotResult<()> {
        if let Some(running) = self.subscriptions.lock().remove(subject) {
            running.store(false, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn publish_reaches_subscribed_handler() {
        let bus = InMemoryPubSub::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received2 = received.clone();
        bus.subscribe(
            "timeline.t1.sync",
            Box::new(move |payload: &[u8]| {
                received2.lock().push(payload.to_vec());
            }),
        )
        .unwrap();
        bus.publish("timeline.t1.sync", b"ping").unwrap();
        assert_eq!(received.lock().as_slice(), &[b"ping".to_vec()]);
    }

    #[test]
    fn at_most_once_misses_messages_before_subscribe() {
        let bus = InMemoryPubSub::new();
        bus.publish("timeline.t1.sync", b"missed").unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        bus.subscribe(
            "timeline.t1.sync",
            Box::new(move |_: &[u8]| {
                count2.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = InMemoryPubSub::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        bus.subscribe(
            "timeline.t1.sync",
            Box::new(move |_: &[u8]| {
                count2.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        bus.unsubscribe("timeline.t1.sync").unwrap();
        bus.publish("timeline.t1.sync", b"after").unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
