use std::{
    fmt,
    ops::{
        Add,
        Sub,
    },
    time::{
        Duration,
        SystemTime,
        UNIX_EPOCH,
    },
};

use anyhow::Context;
use chrono::{
    DateTime,
    SecondsFormat,
    Utc,
};
use serde::{
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
};

/// A UTC instant with microsecond precision, stored as integer microseconds
/// since the Unix epoch.
///
/// Everything that compares or stores log timestamps goes through this type,
/// so range operators behave identically to equality probes: an RFC3339
/// string with nanosecond precision is truncated to the same microsecond
/// value the storage layer holds. Precision below 1µs is deliberately lost.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogTimestamp(i64);

impl LogTimestamp {
    pub const MIN: LogTimestamp = LogTimestamp(0);

    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub fn as_micros(&self) -> i64 {
        self.0
    }

    pub fn from_system_time(st: SystemTime) -> anyhow::Result<Self> {
        let since_epoch = st
            .duration_since(UNIX_EPOCH)
            .context("system time before the Unix epoch")?;
        let micros: i64 = since_epoch
            .as_micros()
            .try_into()
            .context("timestamp out of range")?;
        Ok(Self(micros))
    }

    pub fn as_system_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_micros(self.0 as u64)
    }

    /// Parse an RFC3339 timestamp (any sub-second precision, including
    /// nanoseconds), truncating to microseconds.
    pub fn parse_rfc3339(s: &str) -> anyhow::Result<Self> {
        let parsed = DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("invalid RFC3339 timestamp {s:?}"))?;
        Ok(Self(parsed.timestamp_micros()))
    }

    pub fn to_rfc3339(&self) -> String {
        let dt: DateTime<Utc> =
            DateTime::from_timestamp_micros(self.0).unwrap_or_else(DateTime::<Utc>::default);
        dt.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn saturating_sub(&self, rhs: Duration) -> Self {
        let rhs: i64 = rhs.as_micros().try_into().unwrap_or(i64::MAX);
        Self(self.0.saturating_sub(rhs).max(0))
    }
}

impl fmt::Display for LogTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

impl Add<Duration> for LogTimestamp {
    type Output = LogTimestamp;

    fn add(self, rhs: Duration) -> LogTimestamp {
        LogTimestamp(self.0 + rhs.as_micros() as i64)
    }
}

impl Sub<LogTimestamp> for LogTimestamp {
    type Output = Duration;

    fn sub(self, rhs: LogTimestamp) -> Duration {
        Duration::from_micros(self.0.saturating_sub(rhs.0).max(0) as u64)
    }
}

impl Serialize for LogTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for LogTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        LogTimestamp::parse_rfc3339(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(any(test, feature = "testing"))]
impl proptest::arbitrary::Arbitrary for LogTimestamp {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<LogTimestamp>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        use proptest::prelude::*;
        // Through year ~2200, enough for any retention arithmetic.
        (0i64..7_258_118_400_000_000i64)
            .prop_map(LogTimestamp)
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::LogTimestamp;

    #[test]
    fn test_nanosecond_input_truncates_to_micros() {
        let ts = LogTimestamp::parse_rfc3339("2024-05-14T12:30:45.123456789Z").unwrap();
        assert_eq!(ts.as_micros() % 1_000_000, 123_456);
        assert_eq!(ts.to_rfc3339(), "2024-05-14T12:30:45.123456Z");
    }

    #[test]
    fn test_offset_input_normalizes_to_utc() {
        let ts = LogTimestamp::parse_rfc3339("2024-05-14T14:30:45+02:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-05-14T12:30:45.000000Z");
    }

    proptest! {
        #![proptest_config(ProptestConfig { failure_persistence: None, ..ProptestConfig::default() })]

        #[test]
        fn proptest_rfc3339_roundtrips_at_micros(ts in any::<LogTimestamp>()) {
            let parsed = LogTimestamp::parse_rfc3339(&ts.to_rfc3339()).unwrap();
            prop_assert_eq!(parsed, ts);
        }
    }
}
