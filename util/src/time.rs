use std::cmp::Ordering;
use std::ops::{Add, AddAssign, Sub};

use derive_more::From;
use num_rational::Rational64;
use num_traits::identities::Zero;
use serde::{Deserialize, Serialize};

pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// A point on a media timeline, held as an exact rational number of
/// seconds so that timescale conversions never accumulate rounding.
#[derive(From, Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct MediaTime(Rational64);

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime(Rational64::new_raw(0, 1));

    pub fn new(numer: i64, denom: i64) -> Self {
        Rational64::new(numer, denom).into()
    }

    /// Interpret `ticks` against a track timescale (ticks per second).
    pub fn from_ticks(ticks: i64, timescale: i64) -> Self {
        MediaTime::new(ticks, timescale)
    }

    pub fn from_micros(micros: i64) -> Self {
        MediaTime::new(micros, MICROS_PER_SECOND)
    }

    pub fn round_to_base(&self, base: i64) -> i64 {
        (self.0 * base).to_integer()
    }

    pub fn as_micros(&self) -> i64 {
        self.round_to_base(MICROS_PER_SECOND)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == Rational64::zero()
    }
}

/// A span on a media timeline. Same representation as [`MediaTime`],
/// kept separate so points and spans cannot be mixed up.
#[derive(From, Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct MediaDuration(Rational64);

impl MediaDuration {
    pub const ZERO: MediaDuration = MediaDuration(Rational64::new_raw(0, 1));

    pub fn new(numer: i64, denom: i64) -> Self {
        Rational64::new(numer, denom).into()
    }

    pub fn from_ticks(ticks: i64, timescale: i64) -> Self {
        MediaDuration::new(ticks, timescale)
    }

    pub fn from_micros(micros: i64) -> Self {
        MediaDuration::new(micros, MICROS_PER_SECOND)
    }

    pub fn round_to_base(&self, base: i64) -> i64 {
        (self.0 * base).to_integer()
    }

    pub fn as_micros(&self) -> i64 {
        self.round_to_base(MICROS_PER_SECOND)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == Rational64::zero()
    }
}

impl Add<MediaDuration> for MediaTime {
    type Output = MediaTime;

    fn add(self, rhs: MediaDuration) -> MediaTime {
        MediaTime(self.0 + rhs.0)
    }
}

impl AddAssign<MediaDuration> for MediaTime {
    fn add_assign(&mut self, rhs: MediaDuration) {
        self.0 += rhs.0;
    }
}

impl Sub<MediaTime> for MediaTime {
    type Output = MediaDuration;

    fn sub(self, rhs: MediaTime) -> MediaDuration {
        MediaDuration(self.0 - rhs.0)
    }
}

impl Add<MediaDuration> for MediaDuration {
    type Output = MediaDuration;

    fn add(self, rhs: MediaDuration) -> MediaDuration {
        MediaDuration(self.0 + rhs.0)
    }
}

impl AddAssign<MediaDuration> for MediaDuration {
    fn add_assign(&mut self, rhs: MediaDuration) {
        self.0 += rhs.0;
    }
}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for MediaDuration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaDuration {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_to_micros_is_exact() {
        // 3003 ticks @ 30000 Hz = 100.1ms
        let t = MediaTime::from_ticks(3003, 30_000);
        assert_eq!(t.as_micros(), 100_100);
    }

    #[test]
    fn micros_survive_odd_timescales() {
        // 1 tick @ 3 Hz is not representable in micros, but three of
        // them are; rational arithmetic keeps the sum exact.
        let tick = MediaDuration::from_ticks(1, 3);
        let mut t = MediaTime::ZERO;
        t += tick;
        t += tick;
        t += tick;
        assert_eq!(t.as_micros(), 1_000_000);
    }

    #[test]
    fn time_minus_time_is_duration() {
        let a = MediaTime::from_micros(250_000);
        let b = MediaTime::from_micros(100_000);
        assert_eq!((a - b).as_micros(), 150_000);
    }

    #[test]
    fn ordering() {
        assert!(MediaTime::from_micros(1) > MediaTime::ZERO);
        assert!(MediaTime::from_ticks(1, 30) < MediaTime::from_ticks(1, 24));
    }
}
