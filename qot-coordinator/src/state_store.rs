//! Component C: transactional CRUD over Timelines, Nodes, Servers and
//! TimelineServers (§4.C). A single `Mutex` guards all four entity maps
//! so one business operation is one lock acquisition is one transaction.
//! The store is explicitly not
//! distributed (§4.C): D is the single writer per replica and the
//! coordination-store adapter (component A) provides the cross-replica
//! view.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;

use qot_common::entities::{Node, Server, Timeline, TimelineServer};
use qot_common::error::{QotError, QotResult};

#[derive(Default)]
struct Tables {
    timelines: HashMap<String, Timeline>,
    nodes: HashMap<(String, String), Node>,
    servers: HashMap<String, Server>,
    timeline_servers: HashMap<(String, String), TimelineServer>,
}

pub struct StateStore {
    tables: Mutex<Tables>,
    next_timeline_id: AtomicI64,
    next_node_id: AtomicI64,
}

impl StateStore {
    pub fn new() -> Self {
        StateStore {
            tables: Mutex::new(Tables::default()),
            next_timeline_id: AtomicI64::new(1),
            next_node_id: AtomicI64::new(1),
        }
    }

    pub fn next_timeline_id(&self) -> i64 {
        self.next_timeline_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_node_id(&self) -> i64 {
        self.next_node_id.fetch_add(1, Ordering::SeqCst)
    }

    // -- Timelines ---------------------------------------------------

    pub fn get_timeline(&self, name: &str) -> QotResult<Timeline> {
        self.tables
            .lock()
            .timelines
            .get(name)
            .cloned()
            .ok_or_else(|| QotError::NotFound(format!("timeline {name}")))
    }

    pub fn timeline_exists(&self, name: &str) -> bool {
        self.tables.lock().timelines.contains_key(name)
    }

    pub fn list_timelines(&self) -> Vec<Timeline> {
        let mut v: Vec<Timeline> = self.tables.lock().timelines.values().cloned().collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        v
    }

    pub fn insert_timeline(&self, timeline: Timeline) {
        self.tables
            .lock()
            .timelines
            .insert(timeline.name.clone(), timeline);
    }

    pub fn update_timeline_qot(&self, name: &str, accuracy_ns: u64, resolution_ns: u64) -> QotResult<()> {
        let mut tables = self.tables.lock();
        let timeline = tables
            .timelines
            .get_mut(name)
            .ok_or_else(|| QotError::NotFound(format!("timeline {name}")))?;
        timeline.accuracy_ns = accuracy_ns;
        timeline.resolution_ns = resolution_ns;
        Ok(())
    }

    pub fn delete_timeline(&self, name: &str) {
        self.tables.lock().timelines.remove(name);
    }

    pub fn set_timeline_meta(&self, name: &str, meta: String) -> QotResult<()> {
        let mut tables = self.tables.lock();
        let timeline = tables
            .timelines
            .get_mut(name)
            .ok_or_else(|| QotError::NotFound(format!("timeline {name}")))?;
        timeline.meta = meta;
        Ok(())
    }

    pub fn set_timeline_num_nodes(&self, name: &str, num_nodes: u32) -> QotResult<()> {
        let mut tables = self.tables.lock();
        let timeline = tables
            .timelines
            .get_mut(name)
            .ok_or_else(|| QotError::NotFound(format!("timeline {name}")))?;
        timeline.num_nodes = num_nodes;
        Ok(())
    }

    /// Every known timeline name, for session-recovery re-registration
    /// after a coordination-store reconnect (§7 SessionLost recovery).
    pub fn known_timeline_names(&self) -> Vec<String> {
        self.tables.lock().timelines.keys().cloned().collect()
    }

    // -- Nodes ---------------------------------------------------------

    /// Returns `1` if `(timeline, node_name)` already exists, else `0`
    /// (§4.C `count_nodes`, used by D for idempotence checks).
    pub fn count_nodes(&self, timeline: &str, node_name: &str) -> usize {
        let key = (timeline.to_string(), node_name.to_string());
        if self.tables.lock().nodes.contains_key(&key) {
            1
        } else {
            0
        }
    }

    pub fn nodes_for_timeline(&self, timeline: &str) -> Vec<Node> {
        self.tables
            .lock()
            .nodes
            .values()
            .filter(|n| n.timeline_name == timeline)
            .cloned()
            .collect()
    }

    pub fn insert_node(&self, node: Node) {
        let key = (node.timeline_name.clone(), node.name.clone());
        self.tables.lock().nodes.insert(key, node);
    }

    pub fn update_node_qot(&self, timeline: &str, node_name: &str, accuracy_ns: u64, resolution_ns: u64) -> QotResult<()> {
        let key = (timeline.to_string(), node_name.to_string());
        let mut tables = self.tables.lock();
        let node = tables
            .nodes
            .get_mut(&key)
            .ok_or_else(|| QotError::NotFound(format!("node {timeline}/{node_name}")))?;
        node.accuracy_ns = accuracy_ns;
        node.resolution_ns = resolution_ns;
        Ok(())
    }

    pub fn delete_node(&self, timeline: &str, node_name: &str) -> Option<Node> {
        let key = (timeline.to_string(), node_name.to_string());
        self.tables.lock().nodes.remove(&key)
    }

    /// Drops every node belonging to `timeline`. Used only by an
    /// *explicit* timeline delete (§8 "cascade on explicit delete
    /// only"): member loss through `delete_node` never reaches here.
    pub fn delete_nodes_for_timeline(&self, timeline: &str) {
        self.tables
            .lock()
            .nodes
            .retain(|k, _| k.0 != timeline);
    }

    // -- Servers ---------------------------------------------------------

    pub fn server_exists(&self, name: &str) -> bool {
        self.tables.lock().servers.contains_key(name)
    }

    pub fn insert_server(&self, server: Server) {
        self.tables.lock().servers.insert(server.name.clone(), server);
    }

    pub fn delete_server(&self, name: &str) -> Option<Server> {
        self.tables.lock().servers.remove(name)
    }

    pub fn get_server(&self, name: &str) -> QotResult<Server> {
        self.tables
            .lock()
            .servers
            .get(name)
            .cloned()
            .ok_or_else(|| QotError::NotFound(format!("server {name}")))
    }

    pub fn list_servers(&self) -> Vec<Server> {
        let mut v: Vec<Server> = self.tables.lock().servers.values().cloned().collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        v
    }

    // -- TimelineServers ---------------------------------------------------------

    pub fn timeline_server_exists(&self, timeline: &str, name: &str) -> bool {
        let key = (timeline.to_string(), name.to_string());
        self.tables.lock().timeline_servers.contains_key(&key)
    }

    pub fn insert_timeline_server(&self, ts: TimelineServer) {
        let key = (ts.timeline_name.clone(), ts.name.clone());
        self.tables.lock().timeline_servers.insert(key, ts);
    }

    pub fn delete_timeline_server(&self, timeline: &str, name: &str) -> Option<TimelineServer> {
        let key = (timeline.to_string(), name.to_string());
        self.tables.lock().timeline_servers.remove(&key)
    }

    pub fn delete_timeline_servers_for_timeline(&self, timeline: &str) {
        self.tables
            .lock()
            .timeline_servers
            .retain(|k, _| k.0 != timeline);
    }

    /// Returns the timeline's servers in lexicographic name order, for
    /// deterministic iteration (§9 Open Questions resolution of
    /// `get_remote_timeline_server`).
    pub fn list_timeline_servers(&self, timeline: &str) -> Vec<TimelineServer> {
        let tables = self.tables.lock();
        let mut servers: Vec<TimelineServer> = tables
            .timeline_servers
            .values()
            .filter(|ts| ts.timeline_name == timeline)
            .cloned()
            .collect();
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        servers
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qot_common::entities::ServerType;

    #[test]
    fn insert_and_get_timeline_round_trip() {
        let store = StateStore::new();
        store.insert_timeline(Timeline::new(1, "t1"));
        let t = store.get_timeline("t1").unwrap();
        assert_eq!(t.name, "t1");
        assert_eq!(t.accuracy_ns, qot_common::entities::DEFAULT_ACCURACY_NS);
    }

    #[test]
    fn count_nodes_reflects_presence() {
        let store = StateStore::new();
        assert_eq!(store.count_nodes("t1", "n1"), 0);
        store.insert_node(Node {
            id: 1,
            name: "n1".into(),
            ip: "10.0.0.1".into(),
            accuracy_ns: 100,
            resolution_ns: 10,
            timeline_name: "t1".into(),
        });
        assert_eq!(store.count_nodes("t1", "n1"), 1);
    }

    #[test]
    fn delete_node_on_absent_key_is_noop() {
        let store = StateStore::new();
        assert!(store.delete_node("t1", "missing").is_none());
    }

    #[test]
    fn list_timeline_servers_is_lexicographically_sorted() {
        let store = StateStore::new();
        for name in ["zeta", "alpha", "mid"] {
            store.insert_timeline_server(TimelineServer {
                name: name.to_string(),
                stratum: 1,
                server_type: ServerType::Local,
                timeline_name: "t1".into(),
            });
        }
        let names: Vec<String> = store
            .list_timeline_servers("t1")
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }
}
