//! Component G, app-mode client: the application-facing binding state
//! machine that talks to the node daemon over a UNIX domain socket
//! (§4 "Node binding", §6).

use std::os::unix::net::UnixStream;
use std::path::Path;

use qot_common::error::{QotError, QotResult};
use qot_common::protocol::{BindingInfo, DaemonFrame, MsgType, QotDemand};

use crate::frame_io;
use crate::shm::ShmClockReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Unbound,
    Connecting,
    Creating,
    Binding,
    ShmMapped,
    Active,
    Unbinding,
}

/// One application's binding to a timeline, owning its own socket and
/// (once mapped) its own shared-memory reader. `bind` drives the state
/// machine forward one request/response pair at a time; any failure
/// resets to `Unbound` with the socket closed (§4 state machine).
pub struct TimelineBinding {
    state: BindingState,
    sock: Option<UnixStream>,
    name: String,
    global: bool,
    id: i64,
    shm: Option<ShmClockReader>,
}

impl TimelineBinding {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let global = qot_common::entities::is_global(&name);
        TimelineBinding {
            state: BindingState::Unbound,
            sock: None,
            name,
            global,
            id: 0,
            shm: None,
        }
    }

    pub fn state(&self) -> BindingState {
        self.state
    }

    fn send_recv(&mut self, frame: &DaemonFrame) -> QotResult<DaemonFrame> {
        let (response, _fd) = self.send_recv_with_fd(frame)?;
        Ok(response)
    }

    fn send_recv_with_fd(
        &mut self,
        frame: &DaemonFrame,
    ) -> QotResult<(DaemonFrame, Option<std::os::fd::RawFd>)> {
        let sock = self
            .sock
            .as_ref()
            .ok_or_else(|| QotError::ConnectionError("binding has no open socket".into()))?;
        frame_io::send_frame(sock, frame, None)?;
        frame_io::recv_frame(sock)
    }

    /// Connects to the daemon, issues `CREATE`, `BIND`, and (app mode)
    /// `SHM_CLOCK`, finishing in `Active`. On any step failing, the
    /// binding is reset to `Unbound` and the error is propagated.
    pub fn bind(&mut self, socket_path: &Path, demand: QotDemand) -> QotResult<()> {
        let result = self.bind_inner(socket_path, demand);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn bind_inner(&mut self, socket_path: &Path, demand: QotDemand) -> QotResult<()> {
        self.state = BindingState::Connecting;
        let sock = UnixStream::connect(socket_path)
            .map_err(|e| QotError::ConnectionError(format!("connect failed: {e}")))?;
        self.sock = Some(sock);

        self.state = BindingState::Creating;
        let create_req = DaemonFrame::request(MsgType::Create, &self.name);
        let resp = self.send_recv(&create_req)?;
        check_ok(&resp)?;

        self.state = BindingState::Binding;
        let mut bind_req = DaemonFrame::request(MsgType::Bind, &self.name);
        bind_req.info = BindingInfo {
            index: 0,
            binding_type: if self.global { 1 } else { 0 },
            name: self.name.clone(),
        };
        bind_req.demand = Some(demand);
        let resp = self.send_recv(&bind_req)?;
        check_ok(&resp)?;
        self.id = resp.binding.id;

        self.state = BindingState::ShmMapped;
        let shm_req = DaemonFrame::request(MsgType::ShmClock, &self.name);
        let (resp, fd) = self.send_recv_with_fd(&shm_req)?;
        check_ok(&resp)?;
        let fd = fd.ok_or_else(|| {
            QotError::ConnectionError("daemon did not attach a shared-memory descriptor".into())
        })?;
        self.shm = Some(ShmClockReader::from_raw_fd(fd)?);

        self.state = BindingState::Active;
        Ok(())
    }

    pub fn shm_reader(&self) -> Option<&ShmClockReader> {
        self.shm.as_ref()
    }

    pub fn unbind(&mut self) -> QotResult<()> {
        self.state = BindingState::Unbinding;
        if self.sock.is_some() {
            let req = DaemonFrame::request(MsgType::Unbind, &self.name);
            let _ = self.send_recv(&req);
        }
        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        self.state = BindingState::Unbound;
        self.sock = None;
        self.shm = None;
        self.id = 0;
    }
}

fn check_ok(frame: &DaemonFrame) -> QotResult<()> {
    match qot_common::error::ReturnCode::try_from(frame.retval)? {
        qot_common::error::ReturnCode::Ok => Ok(()),
        qot_common::error::ReturnCode::ConnErr => Err(QotError::ConnectionError(
            "daemon reported connection error".into(),
        )),
        qot_common::error::ReturnCode::Err => {
            Err(QotError::InvalidArgument("daemon rejected request".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_binding_starts_unbound() {
        let binding = TimelineBinding::new("gl_utc");
        assert_eq!(binding.state(), BindingState::Unbound);
        assert!(binding.global);
    }

    #[test]
    fn local_name_is_not_global() {
        let binding = TimelineBinding::new("lab_clock");
        assert!(!binding.global);
    }

    #[test]
    fn bind_to_missing_socket_resets_to_unbound() {
        let mut binding = TimelineBinding::new("lab_clock");
        let demand = QotDemand {
            resolution: qot_common::protocol::TimeLength::from_ns(100),
            accuracy: qot_common::protocol::AccuracyDemand {
                above: qot_common::protocol::TimeLength::from_ns(1_000),
                below: qot_common::protocol::TimeLength::from_ns(1_000),
            },
        };
        let result = binding.bind(Path::new("/nonexistent/qot-daemon.sock"), demand);
        assert!(result.is_err());
        assert_eq!(binding.state(), BindingState::Unbound);
    }
}
