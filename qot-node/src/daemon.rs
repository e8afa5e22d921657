//! The node daemon: serves the local UDS protocol of §6, owns one
//! `ClockParamCache` + ingestion worker per bound timeline, and hands
//! out shared-memory clock segments to application bindings over
//! `SCM_RIGHTS` (§4.G app mode).

use std::collections::HashMap;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use qot_common::clock::ClockSegment;
use qot_common::error::{QotError, QotResult};
use qot_common::protocol::{BindingId, BindingInfo, DaemonFrame, MsgType};
use qot_common::pubsub::PubSub;
use qot_common::ReturnCode;

use crate::cache::ClockParamCache;
use crate::frame_io;
use crate::shm::ShmClockWriter;
use crate::subscriber::{self, SubscriberHandle};

struct TimelineState {
    cache: Arc<ClockParamCache>,
    subscriber: SubscriberHandle,
    shm: Option<ShmClockWriter>,
    binding_count: usize,
}

struct BindingRecord {
    timeline: String,
    name: String,
    index: i32,
}

/// Owns every timeline the daemon has created and every binding
/// currently attached to one of them.
pub struct TimelineDaemon {
    bus: Arc<dyn PubSub>,
    timelines: Mutex<HashMap<String, TimelineState>>,
    bindings: Mutex<HashMap<i64, BindingRecord>>,
    next_binding_id: AtomicI64,
}

impl TimelineDaemon {
    pub fn new(bus: Arc<dyn PubSub>) -> Arc<Self> {
        Arc::new(TimelineDaemon {
            bus,
            timelines: Mutex::new(HashMap::new()),
            bindings: Mutex::new(HashMap::new()),
            next_binding_id: AtomicI64::new(1),
        })
    }

    pub fn serve(self: Arc<Self>, socket_path: &Path) -> QotResult<()> {
        let _ = std::fs::remove_file(socket_path);
        let listener = UnixListener::bind(socket_path)
            .map_err(|e| QotError::ConnectionError(format!("bind failed: {e}")))?;
        info!(path = %socket_path.display(), "timeline daemon listening");
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let daemon = self.clone();
                    thread::spawn(move || daemon.handle_connection(stream));
                }
                Err(e) => warn!(error = %e, "failed to accept connection"),
            }
        }
        Ok(())
    }

    fn ensure_timeline(&self, name: &str) {
        let mut timelines = self.timelines.lock();
        if !timelines.contains_key(name) {
            let cache = Arc::new(ClockParamCache::new());
            let subscriber = subscriber::start(self.bus.as_ref(), name, cache.clone())
                .expect("subscribe should not fail for an in-process bus");
            timelines.insert(
                name.to_string(),
                TimelineState {
                    cache,
                    subscriber,
                    shm: None,
                    binding_count: 0,
                },
            );
        }
    }

    fn handle_connection(self: Arc<Self>, stream: UnixStream) {
        loop {
            let (frame, _fd) = match frame_io::recv_frame(&stream) {
                Ok(f) => f,
                Err(_) => return,
            };
            let response = self.dispatch(&stream, frame);
            let (response, fd) = response;
            if let Err(e) = frame_io::send_frame(&stream, &response, fd) {
                error!(error = %e, "failed to send daemon response");
                return;
            }
        }
    }

    fn dispatch(
        &self,
        stream: &UnixStream,
        frame: DaemonFrame,
    ) -> (DaemonFrame, Option<std::os::fd::RawFd>) {
        let msgtype = match MsgType::from_i32(frame.msgtype) {
            Ok(m) => m,
            Err(_) => return (error_response(frame, ReturnCode::Err), None),
        };
        match msgtype {
            MsgType::Create => (self.handle_create(frame), None),
            MsgType::Destroy => (self.handle_destroy(frame), None),
            MsgType::Update => (self.handle_update(frame), None),
            MsgType::Bind => (self.handle_bind(frame), None),
            MsgType::Unbind => (self.handle_unbind(frame), None),
            MsgType::Quality => (self.handle_quality(frame), None),
            MsgType::Info => (self.handle_info(frame), None),
            MsgType::ShmClock => self.handle_shm_clock(stream, frame),
            MsgType::ShmClkSync => (self.handle_shm_clksync(frame), None),
        }
    }

    fn handle_create(&self, mut frame: DaemonFrame) -> DaemonFrame {
        self.ensure_timeline(&frame.info.name);
        frame.retval = ReturnCode::Ok.into();
        frame
    }

    fn handle_destroy(&self, mut frame: DaemonFrame) -> DaemonFrame {
        let mut timelines = self.timelines.lock();
        if let Some(state) = timelines.get(&frame.info.name) {
            if state.binding_count == 0 {
                if let Some(state) = timelines.remove(&frame.info.name) {
                    state.subscriber.stop();
                }
            }
        }
        frame.retval = ReturnCode::Ok.into();
        frame
    }

    fn handle_update(&self, mut frame: DaemonFrame) -> DaemonFrame {
        // Demand updates beyond what BIND already captured are forwarded
        // to the coordinator out of band; the daemon itself has nothing
        // further to mutate here.
        frame.retval = ReturnCode::Ok.into();
        frame
    }

    fn handle_bind(&self, mut frame: DaemonFrame) -> DaemonFrame {
        self.ensure_timeline(&frame.info.name);
        {
            let mut timelines = self.timelines.lock();
            if let Some(state) = timelines.get_mut(&frame.info.name) {
                state.binding_count += 1;
            }
        }
        let id = self.next_binding_id.fetch_add(1, Ordering::SeqCst);
        self.bindings.lock().insert(
            id,
            BindingRecord {
                timeline: frame.info.name.clone(),
                name: frame.binding.name.clone(),
                index: frame.info.index,
            },
        );
        frame.binding = BindingId {
            name: frame.binding.name.clone(),
            id,
        };
        frame.retval = ReturnCode::Ok.into();
        frame
    }

    fn handle_unbind(&self, mut frame: DaemonFrame) -> DaemonFrame {
        let record = self.bindings.lock().remove(&frame.binding.id);
        if let Some(record) = record {
            let mut timelines = self.timelines.lock();
            if let Some(state) = timelines.get_mut(&record.timeline) {
                state.binding_count = state.binding_count.saturating_sub(1);
                if state.binding_count == 0 {
                    if let Some(state) = timelines.remove(&record.timeline) {
                        state.subscriber.stop();
                    }
                }
            }
        }
        frame.retval = ReturnCode::Ok.into();
        frame
    }

    fn handle_quality(&self, mut frame: DaemonFrame) -> DaemonFrame {
        frame.retval = ReturnCode::Ok.into();
        frame
    }

    fn handle_info(&self, mut frame: DaemonFrame) -> DaemonFrame {
        let bindings = self.bindings.lock();
        if let Some(record) = bindings.get(&frame.binding.id) {
            frame.info = BindingInfo {
                index: record.index,
                binding_type: if qot_common::entities::is_global(&record.timeline) {
                    1
                } else {
                    0
                },
                name: record.name.clone(),
            };
        }
        frame.retval = ReturnCode::Ok.into();
        frame
    }

    fn handle_shm_clock(
        &self,
        _stream: &UnixStream,
        mut frame: DaemonFrame,
    ) -> (DaemonFrame, Option<std::os::fd::RawFd>) {
        self.ensure_timeline(&frame.info.name);
        let mut timelines = self.timelines.lock();
        let state = match timelines.get_mut(&frame.info.name) {
            Some(s) => s,
            None => return (error_response(frame, ReturnCode::Err), None),
        };
        if state.shm.is_none() {
            match ShmClockWriter::create(&frame.info.name) {
                Ok(writer) => state.shm = Some(writer),
                Err(e) => {
                    error!(error = %e, "failed to create shared-memory segment");
                    return (error_response(frame, ReturnCode::ConnErr), None);
                }
            }
        }
        let segment = state
            .cache
            .find_segment(host_core_time_ns())
            .unwrap_or_else(|| ClockSegment::identity(host_core_time_ns()));
        let fd = {
            let writer = state.shm.as_mut().expect("just created above");
            writer.write(&segment);
            writer.raw_fd()
        };
        frame.retval = ReturnCode::Ok.into();
        (frame, Some(fd))
    }

    fn handle_shm_clksync(&self, mut frame: DaemonFrame) -> DaemonFrame {
        let mut timelines = self.timelines.lock();
        if let Some(state) = timelines.get_mut(&frame.info.name) {
            let segment = state
                .cache
                .find_segment(host_core_time_ns())
                .unwrap_or_else(|| ClockSegment::identity(host_core_time_ns()));
            if let Some(writer) = state.shm.as_mut() {
                writer.write(&segment);
            }
        }
        frame.retval = ReturnCode::Ok.into();
        frame
    }
}

fn error_response(mut frame: DaemonFrame, code: ReturnCode) -> DaemonFrame {
    frame.retval = code.into();
    frame
}

fn host_core_time_ns() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use qot_common::protocol::{AccuracyDemand, QotDemand, TimeLength};
    use qot_common::pubsub::InMemoryPubSub;

    fn demand_frame(msgtype: MsgType, name: &str) -> DaemonFrame {
        let mut f = DaemonFrame::request(msgtype, name);
        f.demand = Some(QotDemand {
            resolution: TimeLength::from_ns(100),
            accuracy: AccuracyDemand {
                above: TimeLength::from_ns(1_000),
                below: TimeLength::from_ns(1_000),
            },
        });
        f
    }

    #[test]
    fn create_then_bind_assigns_binding_id() {
        let daemon = TimelineDaemon::new(InMemoryPubSub::new());
        let create = demand_frame(MsgType::Create, "lab_clock");
        let resp = daemon.handle_create(create);
        assert_eq!(resp.retval, ReturnCode::Ok as i32);

        let bind = demand_frame(MsgType::Bind, "lab_clock");
        let resp = daemon.handle_bind(bind);
        assert_eq!(resp.retval, ReturnCode::Ok as i32);
        assert!(resp.binding.id > 0);
    }

    #[test]
    fn unbind_last_binding_tears_down_timeline() {
        let daemon = TimelineDaemon::new(InMemoryPubSub::new());
        daemon.handle_create(demand_frame(MsgType::Create, "lab_clock"));
        let bound = daemon.handle_bind(demand_frame(MsgType::Bind, "lab_clock"));

        let mut unbind = DaemonFrame::request(MsgType::Unbind, "lab_clock");
        unbind.binding.id = bound.binding.id;
        daemon.handle_unbind(unbind);

        assert!(!daemon.timelines.lock().contains_key("lab_clock"));
    }
}
