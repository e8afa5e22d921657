//! Wire choreography for the local timeline-daemon UDS protocol (§6):
//! one JSON frame per message, with an optional `SCM_RIGHTS` ancillary
//! file descriptor riding alongside the `SHM_CLOCK` response. Frame and
//! descriptor travel in a single `sendmsg`/`recvmsg` call so a buffered
//! line-reader can never split them across two reads.

use std::io::{IoSlice, IoSliceMut};
use std::os::fd::RawFd;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;

use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};

use qot_common::error::{QotError, QotResult};
use qot_common::protocol::DaemonFrame;

const MAX_FRAME_BYTES: usize = 4096;

pub fn send_frame(sock: &UnixStream, frame: &DaemonFrame, fd: Option<RawFd>) -> QotResult<()> {
    let mut encoded = serde_json::to_vec(frame)
        .map_err(|e| QotError::ConnectionError(format!("encode failed: {e}")))?;
    encoded.push(b'\n');
    let iov = [IoSlice::new(&encoded)];
    let fds = fd.map(|f| [f]);
    let cmsgs: Vec<ControlMessage> = match &fds {
        Some(fds) => vec![ControlMessage::ScmRights(fds)],
        None => vec![],
    };
    sendmsg::<()>(sock.as_raw_fd(), &iov, &cmsgs, MsgFlags::empty(), None)
        .map_err(|e| QotError::ConnectionError(format!("sendmsg failed: {e}")))?;
    Ok(())
}

/// Reads one frame, plus an ancillary descriptor if the daemon attached
/// one (only true of `SHM_CLOCK` responses).
pub fn recv_frame(sock: &UnixStream) -> QotResult<(DaemonFrame, Option<RawFd>)> {
    let mut buf = vec![0u8; MAX_FRAME_BYTES];
    let mut cmsg_buf = nix::cmsg_space!([RawFd; 1]);
    let mut iov = [IoSliceMut::new(&mut buf)];
    let msg = recvmsg::<()>(
        sock.as_raw_fd(),
        &mut iov,
        Some(&mut cmsg_buf),
        MsgFlags::empty(),
    )
    .map_err(|e| QotError::ConnectionError(format!("recvmsg failed: {e}")))?;

    let n = msg.bytes;
    if n == 0 {
        return Err(QotError::ConnectionError("daemon connection closed".into()));
    }
    let fd = msg.cmsgs().find_map(|c| match c {
        ControlMessageOwned::ScmRights(fds) => fds.first().copied(),
        _ => None,
    });

    let text = std::str::from_utf8(&buf[..n])
        .map_err(|e| QotError::ConnectionError(format!("invalid frame encoding: {e}")))?;
    let frame: DaemonFrame = serde_json::from_str(text.trim())
        .map_err(|e| QotError::ConnectionError(format!("invalid frame: {e}")))?;
    Ok((frame, fd))
}
