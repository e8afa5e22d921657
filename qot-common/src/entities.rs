use serde::{Deserialize, Serialize};

/// Marks a timeline name as UTC-anchored ("global") rather than
/// reference-free ("local").
pub const GLOBAL_TL_PREFIX: &str = "gl_";

/// Default QoT demand applied to a freshly created, memberless timeline.
pub const DEFAULT_ACCURACY_NS: u64 = 1_000_000_000;
pub const DEFAULT_RESOLUTION_NS: u64 = 100;

pub fn is_global(timeline_name: &str) -> bool {
    timeline_name.starts_with(GLOBAL_TL_PREFIX)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    pub id: i64,
    pub name: String,
    pub num_nodes: u32,
    pub accuracy_ns: u64,
    pub resolution_ns: u64,
    pub meta: String,
}

impl Timeline {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Timeline {
            id,
            name: name.into(),
            num_nodes: 0,
            accuracy_ns: DEFAULT_ACCURACY_NS,
            resolution_ns: DEFAULT_RESOLUTION_NS,
            meta: String::new(),
        }
    }

    pub fn is_global(&self) -> bool {
        is_global(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub name: String,
    pub ip: String,
    pub accuracy_ns: u64,
    pub resolution_ns: u64,
    pub timeline_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerType {
    Global,
    Local,
}

impl ServerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerType::Global => "global",
            ServerType::Local => "local",
        }
    }
}

impl std::str::FromStr for ServerType {
    type Err = crate::error::QotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(ServerType::Global),
            "local" => Ok(ServerType::Local),
            other => Err(crate::error::QotError::InvalidArgument(format!(
                "unknown server_type {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub name: String,
    pub stratum: i32,
    pub server_type: ServerType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineServer {
    pub name: String,
    pub stratum: i32,
    pub server_type: ServerType,
    pub timeline_name: String,
}
