use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::CoreError;

/// Returns the current wall-clock time as milliseconds since Unix epoch.
pub fn physical_now() -> Result<u64, CoreError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .map_err(|_| CoreError::InvalidData("system clock before epoch".into()))
}

/// A 12-byte version marker: 8 bytes wall_ms (big-endian u64) followed by
/// 4 bytes counter (big-endian u32). Byte order is version order, so the
/// store can compare the encoded column directly.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct Version {
    wall_ms: u64,
    counter: u32,
}

impl Version {
    pub const ENCODED_LEN: usize = 12;

    pub fn new(wall_ms: u64, counter: u32) -> Self {
        Self { wall_ms, counter }
    }

    pub fn wall_ms(&self) -> u64 {
        self.wall_ms
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn to_bytes(&self) -> [u8; 12] {
        let mut buf = [0u8; 12];
        buf[..8].copy_from_slice(&self.wall_ms.to_be_bytes());
        buf[8..].copy_from_slice(&self.counter.to_be_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; 12]) -> Self {
        let mut wall = [0u8; 8];
        let mut counter = [0u8; 4];
        wall.copy_from_slice(&bytes[..8]);
        counter.copy_from_slice(&bytes[8..]);
        Self {
            wall_ms: u64::from_be_bytes(wall),
            counter: u32::from_be_bytes(counter),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        let arr: &[u8; 12] = bytes.try_into().map_err(|_| {
            CoreError::InvalidData(format!("invalid version length {}", bytes.len()))
        })?;
        Ok(Self::from_bytes(arr))
    }

    /// The smallest version strictly greater than `self`. The all-ones
    /// marker has none.
    fn successor(&self) -> Result<Self, CoreError> {
        if let Some(counter) = self.counter.checked_add(1) {
            return Ok(Self::new(self.wall_ms, counter));
        }
        self.wall_ms
            .checked_add(1)
            .map(|wall_ms| Self::new(wall_ms, 0))
            .ok_or_else(|| CoreError::InvalidData(format!("no version follows {self:?}")))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_bytes().cmp(&other.to_bytes())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({}.{})", self.wall_ms, self.counter)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        Version::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Issues version stamps for guarded writes. Stamps never go backwards on
/// one clock, and `stamp_after` makes them exceed whatever another writer
/// (with its own clock) already stored.
pub struct VersionClock {
    last: Version,
}

impl VersionClock {
    pub fn new() -> Self {
        Self {
            last: Version::new(0, 0),
        }
    }

    /// Generate the next monotonically increasing stamp.
    pub fn tick(&mut self) -> Result<Version, CoreError> {
        let now = physical_now()?;
        let next = if now > self.last.wall_ms {
            Version::new(now, 0)
        } else {
            self.last.successor()?
        };
        self.last = next;
        Ok(next)
    }

    /// Generate a stamp strictly greater than both this clock's last stamp
    /// and `observed`. Remote stamps ahead of physical time are accepted;
    /// the clock simply continues from them.
    pub fn stamp_after(&mut self, observed: Option<Version>) -> Result<Version, CoreError> {
        let ticked = self.tick()?;
        let next = match observed {
            Some(seen) if seen >= ticked => seen.successor()?,
            _ => ticked,
        };
        self.last = next;
        Ok(next)
    }
}

impl Default for VersionClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_monotonicity() {
        let mut clock = VersionClock::new();
        let mut prev = clock.tick().unwrap();
        for _ in 0..100 {
            let next = clock.tick().unwrap();
            assert!(next > prev, "expected {next:?} > {prev:?}");
            prev = next;
        }
    }

    #[test]
    fn clock_ahead_of_wall_time_increments_counter() {
        let mut clock = VersionClock::new();
        let future_ms = physical_now().unwrap() + 100_000;
        clock.last = Version::new(future_ms, 0);

        let t1 = clock.tick().unwrap();
        assert_eq!(t1.wall_ms(), future_ms);
        assert_eq!(t1.counter(), 1);

        let t2 = clock.tick().unwrap();
        assert_eq!(t2.counter(), 2);
    }

    #[test]
    fn stamp_after_exceeds_future_observation() {
        let mut clock = VersionClock::new();
        let observed = Version::new(physical_now().unwrap() + 3_600_000, 41);
        let stamp = clock.stamp_after(Some(observed)).unwrap();
        assert_eq!(stamp, Version::new(observed.wall_ms(), 42));
        assert!(clock.tick().unwrap() > stamp);
    }

    #[test]
    fn stamp_after_counter_overflow_rolls_wall_time() {
        let mut clock = VersionClock::new();
        let observed = Version::new(physical_now().unwrap() + 10_000, u32::MAX);
        let stamp = clock.stamp_after(Some(observed)).unwrap();
        assert_eq!(stamp, Version::new(observed.wall_ms() + 1, 0));
    }

    #[test]
    fn stamp_after_maximal_marker_is_refused() {
        let mut clock = VersionClock::new();
        let before = clock.tick().unwrap();
        let maximal = Version::from_bytes(&[0xFF; 12]);
        assert!(matches!(
            clock.stamp_after(Some(maximal)),
            Err(CoreError::InvalidData(_))
        ));
        assert!(clock.tick().unwrap() > before);
    }

    #[test]
    fn stamp_after_past_observation_uses_wall_time() {
        let mut clock = VersionClock::new();
        let observed = Version::new(1, 0);
        let stamp = clock.stamp_after(Some(observed)).unwrap();
        assert!(stamp > observed);
        assert_eq!(stamp.counter(), 0);
    }

    #[test]
    fn ordering_matches_bytes() {
        let pairs = [
            (Version::new(100, 0), Version::new(200, 0)),
            (Version::new(100, 0), Version::new(100, 1)),
            (Version::new(100, 999), Version::new(101, 0)),
        ];
        for (a, b) in &pairs {
            assert_eq!(a.cmp(b), a.to_bytes().cmp(&b.to_bytes()));
            assert!(a < b, "expected {a:?} < {b:?}");
        }
    }

    #[test]
    fn rejects_truncated_encoding() {
        assert!(Version::from_slice(&[0u8; 11]).is_err());
        let v = Version::new(5, 6);
        assert_eq!(Version::from_slice(&v.to_bytes()).unwrap(), v);
    }
}
