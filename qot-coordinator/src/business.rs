//! Component D: the coordinator's business logic, enforcing the
//! invariants of §8 over C (state store) and A (coordination store), and
//! emitting membership events over B (pub/sub).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use qot_common::coordination_store::CoordinationStore;
use qot_common::entities::{
    Node, Server, ServerType, Timeline, TimelineServer, DEFAULT_ACCURACY_NS, DEFAULT_RESOLUTION_NS,
};
use qot_common::error::{QotError, QotResult};
use qot_common::pubsub::PubSub;

use crate::state_store::StateStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalMembershipSnapshot {
    pub timeline: String,
    pub num_nodes: u32,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSnapshot {
    pub timeline: String,
    pub servers: Vec<TimelineServer>,
}

/// The control-plane logic: one instance per coordinator replica. `is_leader`
/// gates every mutating operation -- followers serve reads only (§4.D,
/// the coordinator replica state machine).
pub struct Business {
    store: Arc<StateStore>,
    coord: Arc<dyn CoordinationStore>,
    bus: Arc<dyn PubSub>,
    is_leader: AtomicBool,
}

fn mirror_error(context: &str, err: &QotError) {
    warn!(context, error = %err, "coordination-store mirror failed; scheduled for retry, state store left unchanged");
}

impl Business {
    pub fn new(store: Arc<StateStore>, coord: Arc<dyn CoordinationStore>, bus: Arc<dyn PubSub>) -> Self {
        Business {
            store,
            coord,
            bus,
            is_leader: AtomicBool::new(false),
        }
    }

    /// Blocks until leader election under `/coordinators/{group}` is won.
    /// Followers remain read-available but every mutating path below
    /// checks `is_leader` first (§4.D).
    pub fn elect_leader(&self, group: &str, identity: &str) -> QotResult<()> {
        let path = format!("/coordinators/{group}");
        self.coord.ensure_path(&path)?;
        let won = Arc::new(AtomicBool::new(false));
        let won_cb = won.clone();
        self.coord.elect(&path, identity, Box::new(move || {
            won_cb.store(true, Ordering::SeqCst);
        }))?;
        if won.load(Ordering::SeqCst) {
            self.is_leader.store(true, Ordering::SeqCst);
            info!(group, identity, "elected leader");
        }
        Ok(())
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn force_leader_for_test(&self) {
        self.is_leader.store(true, Ordering::SeqCst);
    }

    fn require_leader(&self) -> QotResult<()> {
        if self.is_leader() {
            Ok(())
        } else {
            Err(QotError::ConnectionError(
                "this replica is not the elected leader".into(),
            ))
        }
    }

    /// Re-establishes the coordination-store session and re-registers
    /// every ephemeral entry this replica owns, reconstructed entirely
    /// from C (§7 "SessionLost is recoverable").
    pub fn recover_session(&self) -> QotResult<()> {
        info!("recovering coordination-store session; re-registering ephemeral entries from the state store");
        for timeline in self.store.known_timeline_names() {
            let path = format!("/timelines/{timeline}");
            if let Err(e) = self.coord.ensure_path(&path) {
                mirror_error("recover_session:ensure_path", &e);
            }
            for node in self.store.nodes_for_timeline(&timeline) {
                let node_path = format!("/timelines/{timeline}/nodes/{}", node.name);
                let payload = serde_json::to_vec(&node).unwrap_or_default();
                if let Err(e) = self.coord.create(&node_path, &payload, true) {
                    mirror_error("recover_session:node", &e);
                }
            }
            for ts in self.store.list_timeline_servers(&timeline) {
                let server_path = format!("/timelines/{timeline}/servers/{}", ts.name);
                let payload = serde_json::to_vec(&ts).unwrap_or_default();
                if let Err(e) = self.coord.create(&server_path, &payload, true) {
                    mirror_error("recover_session:timeline_server", &e);
                }
            }
        }
        Ok(())
    }

    /// Idempotent: a second call with the same name is a no-op returning
    /// the existing row (§8 invariant 8).
    pub fn create_timeline(&self, name: &str, id: Option<i64>) -> QotResult<Timeline> {
        self.require_leader()?;
        if let Ok(existing) = self.store.get_timeline(name) {
            return Ok(existing);
        }
        let timeline_id = id.unwrap_or_else(|| self.store.next_timeline_id());
        let timeline = Timeline {
            id: timeline_id,
            name: name.to_string(),
            num_nodes: 0,
            accuracy_ns: DEFAULT_ACCURACY_NS,
            resolution_ns: DEFAULT_RESOLUTION_NS,
            meta: String::new(),
        };
        self.store.insert_timeline(timeline.clone());

        let path = format!("/timelines/{name}");
        if let Err(e) = self.coord.ensure_path(&path) {
            mirror_error("create_timeline", &e);
        }
        Ok(timeline)
    }

    /// Requires the timeline to exist. Idempotent on `(timeline, name)`.
    pub fn create_node(
        &self,
        timeline: &str,
        name: &str,
        accuracy_ns: u64,
        resolution_ns: u64,
        ip: &str,
    ) -> QotResult<Node> {
        self.require_leader()?;
        self.store.get_timeline(timeline)?;

        if self.store.count_nodes(timeline, name) > 0 {
            let existing = self
                .store
                .nodes_for_timeline(timeline)
                .into_iter()
                .find(|n| n.name == name)
                .expect("count_nodes confirmed presence");
            return Ok(existing);
        }

        let node = Node {
            id: self.store.next_node_id(),
            name: name.to_string(),
            ip: ip.to_string(),
            accuracy_ns,
            resolution_ns,
            timeline_name: timeline.to_string(),
        };
        self.store.insert_node(node.clone());
        let t = self.store.get_timeline(timeline)?;
        self.store.set_timeline_num_nodes(timeline, t.num_nodes + 1)?;

        let node_path = format!("/timelines/{timeline}/nodes/{name}");
        let payload = serde_json::to_vec(&node).unwrap_or_default();
        if let Err(e) = self.coord.create(&node_path, &payload, true) {
            mirror_error("create_node", &e);
        }
        self.emit_local_snapshot(timeline)?;
        self.update_timeline_qot(timeline, accuracy_ns, resolution_ns)?;
        Ok(node)
    }

    /// Tightens only: `accuracy_ns := min(current, acc)` when `acc > 0`
    /// (§8 invariant 13: `acc == 0` leaves the field unchanged).
    pub fn update_timeline_qot(&self, timeline: &str, acc: u64, res: u64) -> QotResult<()> {
        self.require_leader()?;
        let current = self.store.get_timeline(timeline)?;
        let new_acc = if acc > 0 { current.accuracy_ns.min(acc) } else { current.accuracy_ns };
        let new_res = if res > 0 { current.resolution_ns.min(res) } else { current.resolution_ns };
        self.store.update_timeline_qot(timeline, new_acc, new_res)?;

        let path = format!("/timelines/{timeline}");
        let payload = serde_json::to_vec(&self.store.get_timeline(timeline)?).unwrap_or_default();
        if let Err(e) = self.coord.set(&path, &payload) {
            mirror_error("update_timeline_qot", &e);
        }
        Ok(())
    }

    pub fn update_node_qot(&self, timeline: &str, node: &str, acc: u64, res: u64) -> QotResult<()> {
        self.require_leader()?;
        self.store.update_node_qot(timeline, node, acc, res)?;
        self.emit_local_snapshot(timeline)?;
        self.update_timeline_qot(timeline, acc, res)
    }

    /// On member loss the timeline's QoT *relaxes* to the minimum over
    /// the remaining nodes -- unlike a join, tightening is not
    /// monotonic here (§8 invariant 11, §4.D).
    pub fn delete_node(&self, timeline: &str, node: &str) -> QotResult<()> {
        self.require_leader()?;
        let removed = self.store.delete_node(timeline, node);
        if removed.is_none() {
            return Ok(());
        }

        let node_path = format!("/timelines/{timeline}/nodes/{node}");
        if let Err(e) = self.coord.delete(&node_path, false) {
            mirror_error("delete_node", &e);
        }

        let mut t = self.store.get_timeline(timeline)?;
        if t.num_nodes == 0 {
            return Ok(());
        }
        t.num_nodes -= 1;
        if t.num_nodes == 0 {
            self.store.delete_timeline(timeline);
            let path = format!("/timelines/{timeline}");
            if let Err(e) = self.coord.delete(&path, true) {
                mirror_error("delete_node:drain_timeline", &e);
            }
            return Ok(());
        }

        let remaining = self.store.nodes_for_timeline(timeline);
        let accuracy_ns = remaining.iter().map(|n| n.accuracy_ns).min().unwrap_or(DEFAULT_ACCURACY_NS);
        let resolution_ns = remaining.iter().map(|n| n.resolution_ns).min().unwrap_or(DEFAULT_RESOLUTION_NS);
        self.store.set_timeline_num_nodes(timeline, t.num_nodes)?;
        self.store.update_timeline_qot(timeline, accuracy_ns, resolution_ns)?;

        let path = format!("/timelines/{timeline}");
        let payload = serde_json::to_vec(&self.store.get_timeline(timeline)?).unwrap_or_default();
        if let Err(e) = self.coord.set(&path, &payload) {
            mirror_error("delete_node:mirror_qot", &e);
        }
        self.emit_local_snapshot(timeline)
    }

    /// Idempotent: registering the same server name twice is a no-op
    /// (§8 invariant 9; duplicate registrations are a `Conflict`,
    /// silently treated as already-satisfied per §7).
    pub fn register_server(&self, name: &str, stratum: i32, server_type: ServerType) -> QotResult<Server> {
        self.require_leader()?;
        if self.store.server_exists(name) {
            return self.store.get_server(name);
        }
        let server = Server {
            name: name.to_string(),
            stratum,
            server_type,
        };
        self.store.insert_server(server.clone());

        if server_type == ServerType::Global {
            let path = format!("/servers/{name}");
            let payload = serde_json::to_vec(&server).unwrap_or_default();
            if let Err(e) = self.coord.create(&path, &payload, true) {
                mirror_error("register_server", &e);
            }
        }
        Ok(server)
    }

    pub fn register_timeline_server(
        &self,
        timeline: &str,
        name: &str,
        stratum: i32,
        server_type: ServerType,
    ) -> QotResult<TimelineServer> {
        self.require_leader()?;
        self.store.get_timeline(timeline)?;
        if self.store.timeline_server_exists(timeline, name) {
            return Ok(self
                .store
                .list_timeline_servers(timeline)
                .into_iter()
                .find(|s| s.name == name)
                .expect("timeline_server_exists confirmed presence"));
        }
        let ts = TimelineServer {
            name: name.to_string(),
            stratum,
            server_type,
            timeline_name: timeline.to_string(),
        };
        self.store.insert_timeline_server(ts.clone());

        let path = format!("/timelines/{timeline}/servers/{name}");
        let payload = serde_json::to_vec(&ts).unwrap_or_default();
        if let Err(e) = self.coord.create(&path, &payload, true) {
            mirror_error("register_timeline_server", &e);
        }
        self.emit_server_snapshot(timeline)?;
        Ok(ts)
    }

    pub fn delete_timeline_server(&self, timeline: &str, name: &str) -> QotResult<()> {
        self.require_leader()?;
        self.store.delete_timeline_server(timeline, name);
        let path = format!("/timelines/{timeline}/servers/{name}");
        if let Err(e) = self.coord.delete(&path, false) {
            mirror_error("delete_timeline_server", &e);
        }
        self.emit_server_snapshot(timeline)
    }

    /// Returns the first server by lexicographic name order, giving a
    /// deterministic pick across replicas.
    pub fn get_remote_timeline_server(&self, timeline: &str) -> QotResult<TimelineServer> {
        self.store
            .list_timeline_servers(timeline)
            .into_iter()
            .next()
            .ok_or_else(|| QotError::NotFound(format!("no servers registered for timeline {timeline}")))
    }

    pub fn set_timeline_meta(&self, name: &str, meta: String) -> QotResult<()> {
        self.require_leader()?;
        self.store.set_timeline_meta(name, meta)?;
        let path = format!("/timelines/{name}");
        let payload = serde_json::to_vec(&self.store.get_timeline(name)?).unwrap_or_default();
        if let Err(e) = self.coord.set(&path, &payload) {
            mirror_error("set_timeline_meta", &e);
        }
        Ok(())
    }

    /// Explicit timeline delete: cascades to its nodes and timeline
    /// servers (§8 "cascade on explicit delete only" -- member loss via
    /// `delete_node` draining to zero is the *other* path to the same
    /// end state and does not call this).
    pub fn delete_timeline(&self, name: &str) -> QotResult<()> {
        self.require_leader()?;
        self.store.get_timeline(name)?;
        self.store.delete_nodes_for_timeline(name);
        self.store.delete_timeline_servers_for_timeline(name);
        self.store.delete_timeline(name);

        let path = format!("/timelines/{name}");
        if let Err(e) = self.coord.delete(&path, true) {
            mirror_error("delete_timeline", &e);
        }
        Ok(())
    }

    pub fn delete_server(&self, name: &str) -> QotResult<()> {
        self.require_leader()?;
        let removed = self.store.delete_server(name);
        if removed.is_some() {
            let path = format!("/servers/{name}");
            if let Err(e) = self.coord.delete(&path, false) {
                mirror_error("delete_server", &e);
            }
        }
        Ok(())
    }

    // -- Read-only accessors for the REST surface (E) -------------------

    pub fn list_timelines(&self) -> Vec<Timeline> {
        self.store.list_timelines()
    }

    pub fn get_timeline(&self, name: &str) -> QotResult<Timeline> {
        self.store.get_timeline(name)
    }

    pub fn list_nodes(&self, timeline: &str) -> QotResult<Vec<Node>> {
        self.store.get_timeline(timeline)?;
        Ok(self.store.nodes_for_timeline(timeline))
    }

    pub fn get_node(&self, timeline: &str, name: &str) -> QotResult<Node> {
        self.store
            .nodes_for_timeline(timeline)
            .into_iter()
            .find(|n| n.name == name)
            .ok_or_else(|| QotError::NotFound(format!("node {timeline}/{name}")))
    }

    pub fn list_servers(&self) -> Vec<Server> {
        self.store.list_servers()
    }

    pub fn get_server(&self, name: &str) -> QotResult<Server> {
        self.store.get_server(name)
    }

    pub fn list_timeline_servers(&self, timeline: &str) -> Vec<TimelineServer> {
        self.store.list_timeline_servers(timeline)
    }

    pub fn get_timeline_server(&self, timeline: &str, name: &str) -> QotResult<TimelineServer> {
        self.store
            .list_timeline_servers(timeline)
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| QotError::NotFound(format!("timeline server {timeline}/{name}")))
    }

    fn emit_local_snapshot(&self, timeline: &str) -> QotResult<()> {
        let t = self.store.get_timeline(timeline)?;
        let nodes = self.store.nodes_for_timeline(timeline);
        let snapshot = LocalMembershipSnapshot {
            timeline: timeline.to_string(),
            num_nodes: t.num_nodes,
            nodes,
        };
        let payload = serde_json::to_vec(&snapshot).unwrap_or_default();
        self.bus.publish(&format!("coordination.timelines.{timeline}.local"), &payload)
    }

    fn emit_server_snapshot(&self, timeline: &str) -> QotResult<()> {
        let servers = self.store.list_timeline_servers(timeline);
        let snapshot = ServerSnapshot {
            timeline: timeline.to_string(),
            servers,
        };
        let payload = serde_json::to_vec(&snapshot).unwrap_or_default();
        self.bus.publish(&format!("coordination.timelines.{timeline}.servers"), &payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qot_common::coordination_store::InMemoryCoordinationStore;
    use qot_common::pubsub::InMemoryPubSub;

    fn new_business() -> Business {
        let store = Arc::new(StateStore::new());
        let coord = InMemoryCoordinationStore::new("test");
        let bus = InMemoryPubSub::new();
        let business = Business::new(store, coord, bus);
        business.is_leader.store(true, Ordering::SeqCst);
        business
    }

    #[test]
    fn create_timeline_is_idempotent() {
        let b = new_business();
        let t1 = b.create_timeline("t1", None).unwrap();
        let t2 = b.create_timeline("t1", None).unwrap();
        assert_eq!(t1.id, t2.id);
    }

    #[test]
    fn s1_single_node_bind() {
        let b = new_business();
        b.create_timeline("t1", None).unwrap();
        b.create_node("t1", "n1", 1000, 100, "10.0.0.1").unwrap();
        let t = b.store.get_timeline("t1").unwrap();
        assert_eq!(t.accuracy_ns, 1000);
        assert_eq!(t.resolution_ns, 100);
        assert_eq!(t.num_nodes, 1);
    }

    #[test]
    fn s2_s3_s4_tighten_relax_drain() {
        let b = new_business();
        b.create_timeline("t1", None).unwrap();
        b.create_node("t1", "n1", 1000, 100, "10.0.0.1").unwrap();
        b.create_node("t1", "n2", 500, 50, "10.0.0.2").unwrap();
        assert_eq!(b.store.get_timeline("t1").unwrap().accuracy_ns, 500);

        b.delete_node("t1", "n2").unwrap();
        assert_eq!(b.store.get_timeline("t1").unwrap().accuracy_ns, 1000);

        b.delete_node("t1", "n1").unwrap();
        assert!(b.store.get_timeline("t1").is_err());
    }

    #[test]
    fn update_timeline_qot_with_zero_accuracy_is_noop() {
        let b = new_business();
        b.create_timeline("t1", None).unwrap();
        b.create_node("t1", "n1", 1000, 100, "10.0.0.1").unwrap();
        b.update_timeline_qot("t1", 0, 0).unwrap();
        assert_eq!(b.store.get_timeline("t1").unwrap().accuracy_ns, 1000);
    }

    #[test]
    fn register_server_is_idempotent() {
        let b = new_business();
        let s1 = b.register_server("ntp1", 1, ServerType::Global).unwrap();
        let s2 = b.register_server("ntp1", 1, ServerType::Global).unwrap();
        assert_eq!(s1.name, s2.name);
    }

    #[test]
    fn get_remote_timeline_server_is_lexicographic() {
        let b = new_business();
        b.create_timeline("t1", None).unwrap();
        b.register_timeline_server("t1", "zeta", 1, ServerType::Local).unwrap();
        b.register_timeline_server("t1", "alpha", 1, ServerType::Local).unwrap();
        let first = b.get_remote_timeline_server("t1").unwrap();
        assert_eq!(first.name, "alpha");
    }

    #[test]
    fn delete_node_on_absent_node_is_noop() {
        let b = new_business();
        b.create_timeline("t1", None).unwrap();
        b.create_node("t1", "n1", 1000, 100, "10.0.0.1").unwrap();
        b.delete_node("t1", "missing").unwrap();
        assert_eq!(b.store.get_timeline("t1").unwrap().num_nodes, 1);
    }
}
