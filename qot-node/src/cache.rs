//! Component F: the bounded per-timeline history of clock segments that
//! the translation engine (`translate.rs`) reads from in transform mode.

use parking_lot::Mutex;

use qot_common::clock::ClockSegment;

/// Capacity of the per-timeline circular buffer (§4.F).
pub const CAPACITY: usize = 10;

struct Ring {
    buf: [ClockSegment; CAPACITY],
    next: usize,
    filled: bool,
}

/// Bounded, ordered history of a timeline's clock segments. Single writer,
/// multiple readers, one mutex guarding every operation so every exit
/// path releases the lock (§4.F, §5).
pub struct ClockParamCache {
    inner: Mutex<Ring>,
}

impl ClockParamCache {
    pub fn new() -> Self {
        ClockParamCache {
            inner: Mutex::new(Ring {
                buf: [ClockSegment::identity(0); CAPACITY],
                next: 0,
                filled: false,
            }),
        }
    }

    /// Appends `segment`, overwriting the oldest entry once the buffer is
    /// full. Switches `filled` on the write that first reaches capacity,
    /// rather than ever re-typing the buffer.
    pub fn append(&self, segment: ClockSegment) {
        let mut ring = self.inner.lock();
        let idx = ring.next;
        ring.buf[idx] = segment;
        ring.next = (idx + 1) % CAPACITY;
        if ring.next == 0 {
            ring.filled = true;
        }
    }

    /// Returns the segments in insertion order, oldest first.
    pub fn get(&self) -> Vec<ClockSegment> {
        let ring = self.inner.lock();
        if !ring.filled {
            ring.buf[..ring.next].to_vec()
        } else {
            let mut out = Vec::with_capacity(CAPACITY);
            out.extend_from_slice(&ring.buf[ring.next..]);
            out.extend_from_slice(&ring.buf[..ring.next]);
            out
        }
    }

    /// Scans from newest to oldest and returns the first segment whose
    /// `last_core_ns <= core_time_ns`; falls back to the oldest segment
    /// when none qualify. Both sides of the comparison are nanoseconds
    /// (§9 Open Questions).
    pub fn find_segment(&self, core_time_ns: i64) -> Option<ClockSegment> {
        let segments = self.get();
        if segments.is_empty() {
            return None;
        }
        segments
            .iter()
            .rev()
            .find(|s| s.last_core_ns <= core_time_ns)
            .copied()
            .or_else(|| segments.first().copied())
    }

    pub fn is_empty(&self) -> bool {
        let ring = self.inner.lock();
        !ring.filled && ring.next == 0
    }
}

impl Default for ClockParamCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(last_core_ns: i64) -> ClockSegment {
        ClockSegment::identity(last_core_ns)
    }

    #[test]
    fn append_then_get_returns_last() {
        let cache = ClockParamCache::new();
        cache.append(seg(100));
        assert_eq!(cache.get().last().unwrap().last_core_ns, 100);
    }

    #[test]
    fn eviction_drops_oldest_after_k_plus_one_appends() {
        let cache = ClockParamCache::new();
        for i in 0..(CAPACITY as i64 + 1) {
            cache.append(seg(i));
        }
        let segments = cache.get();
        assert_eq!(segments.len(), CAPACITY);
        // the 0th append is evicted; get()[0] is the second-appended value.
        assert_eq!(segments[0].last_core_ns, 1);
    }

    #[test]
    fn find_segment_returns_newest_le() {
        let cache = ClockParamCache::new();
        cache.append(seg(0));
        cache.append(seg(1_000));
        cache.append(seg(2_000));
        let found = cache.find_segment(1_500).unwrap();
        assert_eq!(found.last_core_ns, 1_000);
    }

    #[test]
    fn find_segment_falls_back_to_oldest() {
        let cache = ClockParamCache::new();
        cache.append(seg(5_000));
        cache.append(seg(6_000));
        let found = cache.find_segment(0).unwrap();
        assert_eq!(found.last_core_ns, 5_000);
    }

    #[test]
    fn find_segment_empty_cache_returns_none() {
        let cache = ClockParamCache::new();
        assert!(cache.find_segment(123).is_none());
        assert!(cache.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn eviction_keeps_capacity_many_newest(appends in 1usize..50) {
            let cache = ClockParamCache::new();
            for i in 0..appends {
                cache.append(seg(i as i64));
            }
            let segments = cache.get();
            let expected_len = appends.min(CAPACITY);
            proptest::prop_assert_eq!(segments.len(), expected_len);
            if let Some(last) = segments.last() {
                proptest::prop_assert_eq!(last.last_core_ns, (appends - 1) as i64);
            }
        }
    }
}
