//! The peer-sync compute server: a centralized reducer that ingests
//! pairwise (offset, drift) measurements between nodes on a sync graph
//! and republishes a globally consistent per-node time (§4.H, §4.I).

pub mod dispatcher;
pub mod graph;
pub mod settings;
