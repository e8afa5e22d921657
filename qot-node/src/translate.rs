//! Component G: core<->timeline time translation and uncertainty,
//! independent of whether parameters come from the in-process cache
//! (transform mode) or a shared-memory segment (app mode).

use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use qot_common::clock::{ns_to_sec, ClockSegment, UncertainTime};
use qot_common::error::{QotError, QotResult};

/// Anything that can hand back the clock segment governing a given core
/// time. Implemented by `crate::cache::ClockParamCache` (transform mode)
/// and `crate::shm::ShmClockReader` (app mode), so `TranslationEngine`
/// is written once against this trait (§4.G "two modes of parameter
/// provisioning").
pub trait ParamSource {
    fn find_segment(&self, core_time_ns: i64) -> Option<ClockSegment>;
}

pub struct TranslationEngine<'a, S: ParamSource> {
    source: &'a S,
}

impl<'a, S: ParamSource> TranslationEngine<'a, S> {
    pub fn new(source: &'a S) -> Self {
        TranslationEngine { source }
    }

    fn current_segment(&self, core_ns: i64) -> QotResult<ClockSegment> {
        self.source
            .find_segment(core_ns)
            .ok_or_else(|| QotError::TranslationError("no clock segments available".into()))
    }

    pub fn core_to_timeline(&self, core_ns: i64) -> QotResult<i64> {
        let seg = self.current_segment(core_ns)?;
        Ok(seg.core_to_timeline(core_ns))
    }

    pub fn timeline_to_core(&self, tl_ns: i64, reference_core_ns: i64) -> QotResult<i64> {
        let seg = self.current_segment(reference_core_ns)?;
        Ok(seg.timeline_to_core(tl_ns))
    }

    pub fn uncertainty(&self, core_ns: i64) -> QotResult<(i64, i64)> {
        let seg = self.current_segment(core_ns)?;
        Ok((seg.uncertainty_above(core_ns), seg.uncertainty_below(core_ns)))
    }

    /// Reads the host real-time clock as core time, looks up the newest
    /// applicable segment, and returns the timeline estimate with its
    /// uncertainty interval in fractional seconds.
    pub fn gettime(&self) -> QotResult<UncertainTime> {
        let core_ns = host_core_time_ns();
        let seg = self.current_segment(core_ns)?;
        let tl_ns = seg.core_to_timeline(core_ns);
        Ok(UncertainTime {
            estimate: ns_to_sec(tl_ns),
            above: ns_to_sec(seg.uncertainty_above(core_ns)),
            below: ns_to_sec(seg.uncertainty_below(core_ns)),
        })
    }

    /// Converts an absolute timeline deadline to core time and blocks the
    /// calling thread until it arrives.
    pub fn waituntil(&self, abs_tl_ns: i64) -> QotResult<()> {
        let now_core_ns = host_core_time_ns();
        let deadline_core_ns = self.timeline_to_core(abs_tl_ns, now_core_ns)?;
        sleep_until_core_ns(deadline_core_ns);
        Ok(())
    }

    /// Translates a relative timeline duration into a relative core
    /// duration and sleeps for it.
    pub fn sleep(&self, rel_tl_ns: i64) -> QotResult<()> {
        let now_core_ns = host_core_time_ns();
        let seg = self.current_segment(now_core_ns)?;
        let rel_core_ns = ClockSegment::rel_timeline_to_core_delta(rel_tl_ns, seg.mult_ppb);
        if rel_core_ns > 0 {
            thread::sleep(Duration::from_nanos(rel_core_ns as u64));
        }
        Ok(())
    }
}

fn host_core_time_ns() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_nanos() as i64
}

fn sleep_until_core_ns(deadline_core_ns: i64) {
    let now = host_core_time_ns();
    let remaining = deadline_core_ns - now;
    if remaining > 0 {
        thread::sleep(Duration::from_nanos(remaining as u64));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(ClockSegment);

    impl ParamSource for FixedSource {
        fn find_segment(&self, _core_time_ns: i64) -> Option<ClockSegment> {
            Some(self.0)
        }
    }

    struct EmptySource;

    impl ParamSource for EmptySource {
        fn find_segment(&self, _core_time_ns: i64) -> Option<ClockSegment> {
            None
        }
    }

    fn s6_segment() -> ClockSegment {
        ClockSegment {
            last_core_ns: 1_000_000_000,
            mult_ppb: 1000,
            tl_nsec: 2_000_000_000,
            u_nsec: 100,
            l_nsec: 100,
            u_mult_ppb: 10,
            l_mult_ppb: 10,
        }
    }

    #[test]
    fn core_to_timeline_matches_s6() {
        let source = FixedSource(s6_segment());
        let engine = TranslationEngine::new(&source);
        assert_eq!(engine.core_to_timeline(1_000_001_000).unwrap(), 2_000_001_000);
    }

    #[test]
    fn uncertainty_matches_s6() {
        let source = FixedSource(s6_segment());
        let engine = TranslationEngine::new(&source);
        let (above, _below) = engine.uncertainty(1_000_001_000).unwrap();
        assert_eq!(above, 100);
    }

    #[test]
    fn empty_source_yields_translation_error() {
        let source = EmptySource;
        let engine = TranslationEngine::new(&source);
        assert!(matches!(
            engine.core_to_timeline(0),
            Err(QotError::TranslationError(_))
        ));
    }
}
