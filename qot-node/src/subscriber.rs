//! The cross-thread delivery path described in §9: an ingestion worker
//! owns the `PubSub` subscription for one timeline's
//! `qot.timeline.{name}.params` topic and writes every segment it
//! receives into that timeline's `ClockParamCache` under the cache's own
//! mutex. Started on first bind to a timeline, stopped on last unbind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use qot_common::clock::ClockSegment;
use qot_common::error::QotResult;
use qot_common::pubsub::PubSub;

use crate::cache::ClockParamCache;

pub fn params_topic(timeline: &str) -> String {
    format!("qot.timeline.{timeline}.params")
}

/// Handle to a running ingestion worker. Dropping it does not stop the
/// worker -- call `stop()` explicitly, matching "stop on unbind via a
/// running flag" (§9).
pub struct SubscriberHandle {
    running: Arc<AtomicBool>,
}

impl SubscriberHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Subscribes to `timeline`'s parameter topic and starts writing every
/// received segment into `cache`. The bus's own dispatch thread (owned by
/// the `PubSub` implementation, §4.B) drives delivery; this function only
/// registers the handler and a running flag the caller can use to make
/// later deliveries a no-op after `stop()`.
pub fn start(
    bus: &dyn PubSub,
    timeline: &str,
    cache: Arc<ClockParamCache>,
) -> QotResult<SubscriberHandle> {
    let running = Arc::new(AtomicBool::new(true));
    let running_for_handler = running.clone();
    let topic = params_topic(timeline);
    bus.subscribe(
        &topic,
        Box::new(move |payload: &[u8]| {
            if !running_for_handler.load(Ordering::SeqCst) {
                return;
            }
            if let Ok(segment) = serde_json::from_slice::<ClockSegment>(payload) {
                cache.append(segment);
            }
        }),
    )?;
    Ok(SubscriberHandle { running })
}

#[cfg(test)]
mod tests {
    use super::*;
    use qot_common::pubsub::InMemoryPubSub;

    #[test]
    fn ingested_segment_lands_in_cache() {
        let bus = InMemoryPubSub::new();
        let cache = Arc::new(ClockParamCache::new());
        let _handle = start(bus.as_ref(), "lab_clock", cache.clone()).unwrap();

        let segment = ClockSegment::identity(42);
        let payload = serde_json::to_vec(&segment).unwrap();
        bus.publish(&params_topic("lab_clock"), &payload).unwrap();

        assert_eq!(cache.get().last().unwrap().last_core_ns, 42);
    }

    #[test]
    fn stopped_worker_ignores_further_messages() {
        let bus = InMemoryPubSub::new();
        let cache = Arc::new(ClockParamCache::new());
        let handle = start(bus.as_ref(), "lab_clock", cache.clone()).unwrap();
        handle.stop();

        let segment = ClockSegment::identity(99);
        let payload = serde_json::to_vec(&segment).unwrap();
        bus.publish(&params_topic("lab_clock"), &payload).unwrap();

        assert!(cache.is_empty());
    }
}
