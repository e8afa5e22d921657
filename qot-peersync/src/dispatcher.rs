//! Component I: the peer-sync dispatcher (§4.I, §5 concurrency layer 3).
//! One ingestion path writes per-edge estimates under a mutex and signals
//! a condition variable once every edge has reported; one compute path
//! waits on that condition (or the cycle `period`, whichever comes
//! first), runs the graph engine (H), and republishes the result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use qot_common::error::QotResult;
use qot_common::pubsub::PubSub;

use crate::graph::{EdgeEstimate, NodeResult, SyncGraph};

pub const PEER_PARAMS_TOPIC: &str = "qot.peer.params";
pub const PEER_OFFSETS_TOPIC: &str = "qot.peer.offsets";

/// Wire shape of an incoming per-edge estimate on `qot.peer.params`:
/// `edge` indexes into the `--config` edge list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEstimateMessage {
    pub edge: usize,
    pub start_ns: i64,
    pub alpha: f64,
    pub beta: f64,
}

/// Wire shape published on `qot.peer.offsets`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerOffsetsMessage {
    pub nodes: Vec<NodeResultWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResultWire {
    pub name: String,
    pub offset_sec: f64,
    pub final_time_sec: f64,
}

impl From<&NodeResult> for NodeResultWire {
    fn from(r: &NodeResult) -> Self {
        NodeResultWire {
            name: r.name.clone(),
            offset_sec: r.offset_sec,
            final_time_sec: r.final_time_sec,
        }
    }
}

struct Slots {
    estimates: Vec<Option<EdgeEstimate>>,
    received: Vec<bool>,
    last_result: Option<Vec<NodeResult>>,
}

impl Slots {
    fn all_received(&self) -> bool {
        self.received.iter().all(|&b| b)
    }

    fn clear(&mut self) {
        for b in self.received.iter_mut() {
            *b = false;
        }
        for s in self.estimates.iter_mut() {
            *s = None;
        }
    }
}

/// Holds the per-edge received bitmap and the graph engine's last
/// published result, driving compute cycles on a dedicated thread.
pub struct PeerSyncDispatcher {
    graph: SyncGraph,
    master: usize,
    period: Duration,
    slots: Mutex<Slots>,
    ready: Condvar,
    running: AtomicBool,
}

impl PeerSyncDispatcher {
    pub fn new(graph: SyncGraph, master: usize, period: Duration) -> Arc<PeerSyncDispatcher> {
        let e = graph.edge_count();
        Arc::new(PeerSyncDispatcher {
            graph,
            master,
            period,
            slots: Mutex::new(Slots {
                estimates: vec![None; e],
                received: vec![false; e],
                last_result: None,
            }),
            ready: Condvar::new(),
            running: AtomicBool::new(true),
        })
    }

    /// Writes the estimate into `edge`'s slot and sets its bit. The
    /// reverse measurement is synthesized by the graph engine itself at
    /// compute time (§4.H), not stored separately here.
    pub fn ingest(&self, msg: PeerEstimateMessage) {
        let mut slots = self.slots.lock();
        if msg.edge >= slots.estimates.len() {
            warn!(edge = msg.edge, "peer estimate for out-of-range edge index, dropped");
            return;
        }
        slots.estimates[msg.edge] = Some(EdgeEstimate {
            start_ns: msg.start_ns,
            alpha: msg.alpha,
            beta: msg.beta,
        });
        slots.received[msg.edge] = true;
        if slots.all_received() {
            self.ready.notify_one();
        }
    }

    /// §5 cancellation: sets the running flag false and wakes the
    /// compute thread so it observes the flag instead of blocking
    /// indefinitely on the condition.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.ready.notify_all();
    }

    /// The compute thread body. Blocks until either every edge has
    /// reported this cycle or `period` elapses, recomputes on a full
    /// set, and always republishes the last result so late subscribers
    /// see fresh data even when no new input arrived (§4.I).
    pub fn run(self: &Arc<Self>, bus: &dyn PubSub) {
        while self.running.load(Ordering::SeqCst) {
            let mut slots = self.slots.lock();
            if !slots.all_received() {
                self.ready.wait_for(&mut slots, self.period);
            }
            if !self.running.load(Ordering::SeqCst) {
                return;
            }

            if slots.all_received() {
                let estimates: Vec<EdgeEstimate> =
                    slots.estimates.iter().map(|o| o.expect("all_received confirmed every slot is set")).collect();
                match self.graph.compute(&estimates, self.master, self.period.as_nanos() as i64) {
                    Ok(result) => {
                        info!(nodes = result.len(), "peer-sync cycle computed");
                        slots.last_result = Some(result);
                    }
                    Err(e) => warn!(error = %e, "peer-sync cycle failed, keeping last published result"),
                }
                slots.clear();
            }

            let to_publish = slots.last_result.clone();
            drop(slots);
            if let Some(result) = to_publish {
                publish(bus, &result);
            }
        }
    }
}

fn publish(bus: &dyn PubSub, result: &[NodeResult]) {
    let wire = PeerOffsetsMessage {
        nodes: result.iter().map(NodeResultWire::from).collect(),
    };
    match serde_json::to_vec(&wire) {
        Ok(payload) => {
            if let Err(e) = bus.publish(PEER_OFFSETS_TOPIC, &payload) {
                warn!(error = %e, "failed to publish peer-sync offsets");
            }
        }
        Err(e) => warn!(error = %e, "failed to encode peer-sync offsets"),
    }
}

/// Subscribes `dispatcher` to the per-edge estimate topic (§4.B), so
/// every incoming message lands in its slots via `ingest` (§9 "cross-
/// thread parameter delivery").
pub fn subscribe(bus: &dyn PubSub, dispatcher: Arc<PeerSyncDispatcher>) -> QotResult<()> {
    bus.subscribe(
        PEER_PARAMS_TOPIC,
        Box::new(move |payload: &[u8]| match serde_json::from_slice::<PeerEstimateMessage>(payload) {
            Ok(msg) => dispatcher.ingest(msg),
            Err(e) => warn!(error = %e, "malformed peer estimate message, dropped"),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphConfig;
    use qot_common::pubsub::InMemoryPubSub;
    use std::thread;

    fn three_node_chain() -> SyncGraph {
        let config = GraphConfig {
            nodes: vec!["A".into(), "B".into(), "C".into()],
            edges: vec![("A".into(), "B".into()), ("B".into(), "C".into())],
        };
        SyncGraph::build(&config).unwrap()
    }

    #[test]
    fn ingest_all_edges_signals_ready() {
        let graph = three_node_chain();
        let dispatcher = PeerSyncDispatcher::new(graph, 0, Duration::from_millis(50));
        dispatcher.ingest(PeerEstimateMessage { edge: 0, start_ns: 0, alpha: 0.0, beta: 10.0 });
        assert!(!dispatcher.slots.lock().all_received());
        dispatcher.ingest(PeerEstimateMessage { edge: 1, start_ns: 0, alpha: 0.0, beta: 20.0 });
        assert!(dispatcher.slots.lock().all_received());
    }

    #[test]
    fn out_of_range_edge_index_is_dropped() {
        let graph = three_node_chain();
        let dispatcher = PeerSyncDispatcher::new(graph, 0, Duration::from_millis(50));
        dispatcher.ingest(PeerEstimateMessage { edge: 99, start_ns: 0, alpha: 0.0, beta: 10.0 });
        assert!(!dispatcher.slots.lock().received.iter().any(|&b| b));
    }

    #[test]
    fn full_cycle_publishes_result_and_clears_slots() {
        let graph = three_node_chain();
        let dispatcher = PeerSyncDispatcher::new(graph, 0, Duration::from_millis(30));
        let bus = InMemoryPubSub::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received2 = received.clone();
        bus.subscribe(
            PEER_OFFSETS_TOPIC,
            Box::new(move |payload: &[u8]| {
                received2.lock().push(payload.to_vec());
            }),
        )
        .unwrap();

        let dispatcher_for_thread = dispatcher.clone();
        let bus_for_thread = bus.clone();
        let handle = thread::spawn(move || dispatcher_for_thread.run(bus_for_thread.as_ref()));

        dispatcher.ingest(PeerEstimateMessage { edge: 0, start_ns: 0, alpha: 0.0, beta: 10.0 });
        dispatcher.ingest(PeerEstimateMessage { edge: 1, start_ns: 0, alpha: 0.0, beta: 20.0 });

        thread::sleep(Duration::from_millis(100));
        dispatcher.stop();
        handle.join().unwrap();

        assert!(!received.lock().is_empty());
        let last = received.lock().last().unwrap().clone();
        let decoded: PeerOffsetsMessage = serde_json::from_slice(&last).unwrap();
        assert_eq!(decoded.nodes.len(), 3);
        assert!(!dispatcher.slots.lock().received.iter().any(|&b| b));
    }
}
