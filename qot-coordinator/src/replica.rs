//! The coordinator replica state machine (§4.D, §7): connect to A, elect a
//! leader under `/coordinators/{group}`, serve while connected, and on
//! `SessionLost` reconnect and re-register every owned ephemeral node
//! from C before resuming.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use qot_common::coordination_store::CoordinationStore;

use crate::business::Business;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaState {
    Connecting,
    ElectingLeader,
    Leader,
    Follower,
    Disconnected,
}

pub struct Replica {
    business: Arc<Business>,
    coord: Arc<dyn CoordinationStore>,
    group: String,
    identity: String,
}

impl Replica {
    pub fn new(business: Arc<Business>, coord: Arc<dyn CoordinationStore>, group: impl Into<String>, identity: impl Into<String>) -> Self {
        Replica {
            business,
            coord,
            group: group.into(),
            identity: identity.into(),
        }
    }

    /// Drives `Init -> Connecting(A) -> ElectingLeader -> Leader`, then
    /// blocks serving. Session loss (detected by `is_connected` going
    /// false) loops back to reconnect and re-register (§7).
    pub fn run(&self) -> ! {
        loop {
            let state = self.connect_and_elect();
            info!(?state, "replica entered steady state");
            loop {
                thread::sleep(Duration::from_secs(1));
                if !self.coord.is_connected() {
                    warn!("coordination-store session lost; reconnecting and re-registering from the state store");
                    break;
                }
            }
            if let Err(e) = self.business.recover_session() {
                error!(error = %e, "session recovery failed, retrying");
            }
        }
    }

    fn connect_and_elect(&self) -> ReplicaState {
        loop {
            if self.coord.is_connected() {
                break;
            }
            thread::sleep(Duration::from_millis(200));
        }
        match self.business.elect_leader(&self.group, &self.identity) {
            Ok(()) if self.business.is_leader() => ReplicaState::Leader,
            Ok(()) => ReplicaState::Follower,
            Err(e) => {
                error!(error = %e, "leader election failed");
                ReplicaState::Disconnected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qot_common::coordination_store::InMemoryCoordinationStore;
    use qot_common::pubsub::InMemoryPubSub;
    use crate::state_store::StateStore;

    #[test]
    fn connect_and_elect_wins_single_candidate_election() {
        let store = Arc::new(StateStore::new());
        let coord = InMemoryCoordinationStore::new("replica-a");
        let bus = InMemoryPubSub::new();
        let business = Arc::new(Business::new(store, coord.clone(), bus));
        let replica = Replica::new(business.clone(), coord, "group-1", "replica-a");
        let state = replica.connect_and_elect();
        assert_eq!(state, ReplicaState::Leader);
        assert!(business.is_leader());
    }
}
