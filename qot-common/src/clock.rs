use serde::{Deserialize, Serialize};

/// One affine segment of the piecewise-linear core->timeline map, valid
/// from `last_core_ns` onward until superseded by a later segment.
///
/// Layout matches the packed shared-memory record of §6: seven
/// native-endian i64s in this exact field order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockSegment {
    pub last_core_ns: i64,
    pub mult_ppb: i64,
    pub tl_nsec: i64,
    pub u_nsec: i64,
    pub l_nsec: i64,
    pub u_mult_ppb: i64,
    pub l_mult_ppb: i64,
}

/// Number of i64 words in the packed shared-memory record (§6).
pub const SHM_CLOCK_WORDS: usize = 7;

impl ClockSegment {
    pub fn identity(last_core_ns: i64) -> Self {
        ClockSegment {
            last_core_ns,
            mult_ppb: 0,
            tl_nsec: last_core_ns,
            u_nsec: 0,
            l_nsec: 0,
            u_mult_ppb: 0,
            l_mult_ppb: 0,
        }
    }

    pub fn to_words(&self) -> [i64; SHM_CLOCK_WORDS] {
        [
            self.last_core_ns,
            self.mult_ppb,
            self.tl_nsec,
            self.u_nsec,
            self.l_nsec,
            self.u_mult_ppb,
            self.l_mult_ppb,
        ]
    }

    pub fn from_words(w: [i64; SHM_CLOCK_WORDS]) -> Self {
        ClockSegment {
            last_core_ns: w[0],
            mult_ppb: w[1],
            tl_nsec: w[2],
            u_nsec: w[3],
            l_nsec: w[4],
            u_mult_ppb: w[5],
            l_mult_ppb: w[6],
        }
    }

    /// `core_to_timeline(core_ns) = tl_nsec + delta + (mult_ppb * delta) / 1e9`
    pub fn core_to_timeline(&self, core_ns: i64) -> i64 {
        let delta = core_ns - self.last_core_ns;
        self.tl_nsec + delta + mul_div_1e9(self.mult_ppb, delta)
    }

    /// Inverts `core_to_timeline`: solves
    /// `tl_ns = tl_nsec + delta + (mult_ppb * delta) / 1e9` for `delta`,
    /// i.e. `delta = (tl_ns - tl_nsec) * 1e9 / (1e9 + mult_ppb)`.
    pub fn timeline_to_core(&self, tl_ns: i64) -> i64 {
        let rel = tl_ns - self.tl_nsec;
        self.last_core_ns + Self::rel_timeline_to_core_delta(rel, self.mult_ppb)
    }

    /// Converts a *relative* timeline duration into a relative core
    /// duration: `delta_core = (rel_ns * 1e9) / (mult_ppb + 1e9)`.
    pub fn rel_timeline_to_core_delta(rel_ns: i64, mult_ppb: i64) -> i64 {
        let num = (rel_ns as i128) * 1_000_000_000i128;
        let den = (mult_ppb as i128) + 1_000_000_000i128;
        (num / den) as i64
    }

    /// `upper = (u_mult_ppb * delta) / 1e9 + u_nsec`
    pub fn uncertainty_above(&self, core_ns: i64) -> i64 {
        let delta = core_ns - self.last_core_ns;
        mul_div_1e9(self.u_mult_ppb, delta) + self.u_nsec
    }

    /// `lower = (l_mult_ppb * delta) / 1e9 + l_nsec`
    pub fn uncertainty_below(&self, core_ns: i64) -> i64 {
        let delta = core_ns - self.last_core_ns;
        mul_div_1e9(self.l_mult_ppb, delta) + self.l_nsec
    }
}

fn mul_div_1e9(rate_ppb: i64, delta: i64) -> i64 {
    ((rate_ppb as i128) * (delta as i128) / 1_000_000_000i128) as i64
}

/// A point in time with an interval of uncertainty, expressed in
/// fractional seconds (§ GLOSSARY, `UTimePoint`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UncertainTime {
    pub estimate: f64,
    pub above: f64,
    pub below: f64,
}

pub fn ns_to_sec(ns: i64) -> f64 {
    ns as f64 / 1_000_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s6_translation_example() {
        let s = ClockSegment {
            last_core_ns: 1_000_000_000,
            mult_ppb: 1000,
            tl_nsec: 2_000_000_000,
            u_nsec: 100,
            l_nsec: 100,
            u_mult_ppb: 10,
            l_mult_ppb: 10,
        };
        assert_eq!(s.core_to_timeline(1_000_001_000), 2_000_001_000);
        assert_eq!(s.uncertainty_above(1_000_001_000), 100 + (10 * 1000) / 1_000_000_000);
    }

    #[test]
    fn round_trip_law() {
        let s = ClockSegment {
            last_core_ns: 1_000_000_000,
            mult_ppb: 1000,
            tl_nsec: 1_000_000_000,
            u_nsec: 10,
            l_nsec: 10,
            u_mult_ppb: 1,
            l_mult_ppb: 1,
        };
        for t in [
            s.last_core_ns,
            s.last_core_ns + 1,
            s.last_core_ns - 500_000,
            s.last_core_ns + 10_000_000_000,
        ] {
            let tl = s.core_to_timeline(t);
            let back = s.timeline_to_core(tl);
            assert!((back - t).abs() <= 1, "t={t} back={back}");
        }
    }

    proptest::proptest! {
        #[test]
        fn round_trip_law_property(
            t in -1_000_000_000_000i64..1_000_000_000_000i64,
            mult_ppb in -1_000_000i64..1_000_000i64,
            last_core_ns in -1_000_000_000_000i64..1_000_000_000_000i64,
        ) {
            let s = ClockSegment {
                last_core_ns,
                mult_ppb,
                tl_nsec: last_core_ns,
                u_nsec: 0,
                l_nsec: 0,
                u_mult_ppb: 0,
                l_mult_ppb: 0,
            };
            let core_ns = last_core_ns.saturating_add(t);
            let tl = s.core_to_timeline(core_ns);
            let back = s.timeline_to_core(tl);
            proptest::prop_assert!((back - core_ns).abs() <= 1);
        }
    }
}
