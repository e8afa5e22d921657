//! Component G, app mode: the shared-memory handoff of clock segments
//! between the node daemon and application processes over a UNIX domain
//! socket with `SCM_RIGHTS` ancillary file-descriptor passing (§4.G, §6).

use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};

use memmap2::{Mmap, MmapMut, MmapOptions};
use nix::sys::memfd::{memfd_create, MemFdCreateFlag};

use qot_common::clock::{ClockSegment, SHM_CLOCK_WORDS};
use qot_common::error::{QotError, QotResult};

use crate::translate::ParamSource;

/// Size in bytes of the packed shared-memory record (§6).
pub const SHM_BYTES: usize = SHM_CLOCK_WORDS * std::mem::size_of::<i64>();

/// Daemon-side owner of the anonymous shared-memory region backing one
/// bound timeline. Created on `SHM_CLOCK`, written on every cache update,
/// its descriptor handed to clients over the daemon socket's ancillary
/// data (`frame_io::send_frame`).
pub struct ShmClockWriter {
    fd: OwnedFd,
    map: MmapMut,
}

impl ShmClockWriter {
    pub fn create(name: &str) -> QotResult<Self> {
        let cname = std::ffi::CString::new(name).map_err(|e| {
            QotError::InvalidArgument(format!("invalid shm name {name}: {e}"))
        })?;
        let fd = memfd_create(&cname, MemFdCreateFlag::empty())
            .map_err(|e| QotError::ConnectionError(format!("memfd_create failed: {e}")))?;
        nix::unistd::ftruncate(fd.as_raw_fd(), SHM_BYTES as i64)
            .map_err(|e| QotError::ConnectionError(format!("ftruncate failed: {e}")))?;
        let map = unsafe {
            MmapOptions::new()
                .len(SHM_BYTES)
                .map_mut(&fd)
                .map_err(|e| QotError::ConnectionError(format!("mmap failed: {e}")))?
        };
        Ok(ShmClockWriter { fd, map })
    }

    pub fn write(&mut self, segment: &ClockSegment) {
        let words = segment.to_words();
        for (i, word) in words.iter().enumerate() {
            let start = i * 8;
            self.map[start..start + 8].copy_from_slice(&word.to_ne_bytes());
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Client-side read-only mapping of a segment handed out by the daemon.
/// Implements `ParamSource` directly: every call re-reads the mapped
/// memory, so a torn read under concurrent writer update is simply
/// resolved by the next call (§5 "accepts torn reads as a recoverable
/// event").
pub struct ShmClockReader {
    map: Mmap,
}

impl ShmClockReader {
    /// Maps `fd` read-only and takes ownership of it (closing it once
    /// mapped is unnecessary: the mapping keeps the underlying page
    /// cache object alive independent of the descriptor). The fd itself
    /// is expected to have arrived via `SCM_RIGHTS` ancillary data on the
    /// daemon socket (§6); receiving it is `frame_io`'s job, not this
    /// module's.
    pub fn from_raw_fd(fd: RawFd) -> QotResult<Self> {
        let borrowed: BorrowedFd = unsafe { BorrowedFd::borrow_raw(fd) };
        let map = unsafe {
            MmapOptions::new()
                .len(SHM_BYTES)
                .map(&borrowed)
                .map_err(|e| QotError::ConnectionError(format!("mmap failed: {e}")))?
        };
        Ok(ShmClockReader { map })
    }

    fn read_segment(&self) -> ClockSegment {
        let mut words = [0i64; SHM_CLOCK_WORDS];
        for (i, word) in words.iter_mut().enumerate() {
            let start = i * 8;
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&self.map[start..start + 8]);
            *word = i64::from_ne_bytes(bytes);
        }
        ClockSegment::from_words(words)
    }
}

impl ParamSource for ShmClockReader {
    fn find_segment(&self, _core_time_ns: i64) -> Option<ClockSegment> {
        Some(self.read_segment())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_round_trips_through_mapped_bytes() {
        let mut writer = ShmClockWriter::create("qot-test-shm").unwrap();
        let segment = ClockSegment {
            last_core_ns: 1,
            mult_ppb: 2,
            tl_nsec: 3,
            u_nsec: 4,
            l_nsec: 5,
            u_mult_ppb: 6,
            l_mult_ppb: 7,
        };
        writer.write(&segment);

        let fd = writer.raw_fd();
        let borrowed: BorrowedFd = unsafe { BorrowedFd::borrow_raw(fd) };
        let map = unsafe { MmapOptions::new().len(SHM_BYTES).map(&borrowed).unwrap() };
        let mut words = [0i64; SHM_CLOCK_WORDS];
        for (i, word) in words.iter_mut().enumerate() {
            let start = i * 8;
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&map[start..start + 8]);
            *word = i64::from_ne_bytes(bytes);
        }
        assert_eq!(ClockSegment::from_words(words), segment);
    }
}
