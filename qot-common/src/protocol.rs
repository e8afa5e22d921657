use serde::{Deserialize, Serialize};

use crate::error::{QotError, QotResult};

/// `msgtype` values of the local timeline-daemon UDS protocol (§6).
///
/// Carried on the wire as the frame's plain `msgtype: i32` field rather
/// than via a derived serde representation, since the frame itself
/// already round-trips through `to_i32`/`from_i32` at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Create = 0,
    Destroy = 1,
    Update = 2,
    Bind = 3,
    Unbind = 4,
    Quality = 5,
    Info = 6,
    ShmClock = 7,
    ShmClkSync = 8,
}

impl MsgType {
    pub fn to_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(v: i32) -> QotResult<Self> {
        Ok(match v {
            0 => MsgType::Create,
            1 => MsgType::Destroy,
            2 => MsgType::Update,
            3 => MsgType::Bind,
            4 => MsgType::Unbind,
            5 => MsgType::Quality,
            6 => MsgType::Info,
            7 => MsgType::ShmClock,
            8 => MsgType::ShmClkSync,
            other => {
                return Err(QotError::InvalidArgument(format!(
                    "unknown msgtype {other}"
                )))
            }
        })
    }
}

/// 1 second = 10^18 attoseconds (§6).
pub const ASEC_PER_SEC: i64 = 1_000_000_000_000_000_000;

/// `ns -> asec`: multiply by 1e9.
pub fn ns_to_asec(ns: i64) -> i64 {
    ns * 1_000_000_000
}

pub fn asec_to_ns(asec: i64) -> i64 {
    asec / 1_000_000_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeLength {
    pub sec: i64,
    pub asec: i64,
}

impl TimeLength {
    pub fn from_ns(ns: i64) -> Self {
        TimeLength {
            sec: ns / 1_000_000_000,
            asec: ns_to_asec(ns % 1_000_000_000),
        }
    }

    pub fn to_ns(&self) -> i64 {
        self.sec * 1_000_000_000 + asec_to_ns(self.asec)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccuracyDemand {
    pub above: TimeLength,
    pub below: TimeLength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QotDemand {
    pub resolution: TimeLength,
    pub accuracy: AccuracyDemand,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingInfo {
    pub index: i32,
    #[serde(rename = "type")]
    pub binding_type: i32,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingId {
    pub name: String,
    pub id: i64,
}

/// The daemon UDS request/response frame (§6). Requests and responses
/// share this one shape; responses populate `retval`/`info.index`/
/// `binding.id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonFrame {
    pub msgtype: i32,
    pub retval: i32,
    #[serde(default)]
    pub info: BindingInfo,
    #[serde(default)]
    pub binding: BindingId,
    #[serde(default)]
    pub demand: Option<QotDemand>,
}

impl DaemonFrame {
    pub fn request(msgtype: MsgType, name: &str) -> Self {
        DaemonFrame {
            msgtype: msgtype.to_i32(),
            retval: 0,
            info: BindingInfo {
                index: 0,
                binding_type: 0,
                name: name.to_string(),
            },
            binding: BindingId::default(),
            demand: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_length_round_trip() {
        let ns = 1_234_567_890i64;
        let tl = TimeLength::from_ns(ns);
        assert_eq!(tl.to_ns(), ns);
    }

    #[test]
    fn msgtype_round_trips_through_i32() {
        for raw in 0..=8 {
            let mt = MsgType::from_i32(raw).unwrap();
            assert_eq!(mt.to_i32(), raw);
        }
        assert!(MsgType::from_i32(9).is_err());
    }
}
