// =============================================================================
// Timestamp Normalizer — canonical UTC instants and data-freshness scoring
// =============================================================================
//
// Upstream APIs publish candles with a lag, so "the latest candle we should
// have" is not `now` but `now - delay`, floored to the bucket boundary. The
// lag between that expectation and the newest stored candle drives the
// freshness flag and the linear quality score used by the monitor.
//
//   expected = floor(now - delay, granularity)
//   lag      = expected - data_ts
//   fresh    = lag <= acceptable
//   score    = fresh ? 1.0 : clamp(1 - lag / max_lag, 0, 1)
// =============================================================================

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Timelike, Utc};

use crate::error::CoreError;
use crate::types::Granularity;

/// Text formats tried (in order) before falling back to RFC 3339.
const TEXT_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Offset-carrying forms RFC 3339 rejects: space separator, minute
/// precision, or an offset without a colon.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%dT%H:%M%z",
];

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Format used when sending timestamps to upstream APIs.
const API_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of the current time. Read once per request so every calculation
/// in that request shares the same `now`.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// The timestamp representations storage rows and snapshot files carry.
#[derive(Debug, Clone, PartialEq)]
pub enum TimestampInput {
    Utc(DateTime<Utc>),
    /// No zone information; interpreted as UTC.
    Naive(NaiveDateTime),
    Zoned(DateTime<FixedOffset>),
    EpochMillis(i64),
    Text(String),
}

impl From<DateTime<Utc>> for TimestampInput {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Utc(value)
    }
}

impl From<NaiveDateTime> for TimestampInput {
    fn from(value: NaiveDateTime) -> Self {
        Self::Naive(value)
    }
}

impl From<DateTime<FixedOffset>> for TimestampInput {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Self::Zoned(value)
    }
}

impl From<&str> for TimestampInput {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// Per-granularity policy
// ---------------------------------------------------------------------------

/// Delay / threshold constants for one granularity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreshnessPolicy {
    /// Typical upstream publication delay.
    pub delay: TimeDelta,
    /// Lag at or below which data counts as fresh.
    pub acceptable: TimeDelta,
    /// Lag at which the quality score reaches zero.
    pub max_lag: TimeDelta,
    /// Minimum spacing between two upstream requests.
    pub poll_interval: TimeDelta,
}

impl FreshnessPolicy {
    pub fn for_granularity(granularity: Granularity) -> Self {
        match granularity {
            Granularity::Minute => Self {
                delay: TimeDelta::minutes(2),
                acceptable: TimeDelta::minutes(5),
                max_lag: TimeDelta::minutes(10),
                poll_interval: TimeDelta::minutes(1),
            },
            Granularity::Hour => Self {
                delay: TimeDelta::minutes(5),
                acceptable: TimeDelta::minutes(15),
                max_lag: TimeDelta::minutes(30),
                poll_interval: TimeDelta::minutes(5),
            },
            Granularity::Day => Self {
                delay: TimeDelta::hours(1),
                acceptable: TimeDelta::hours(2),
                max_lag: TimeDelta::hours(4),
                poll_interval: TimeDelta::hours(1),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// TimestampNormalizer
// ---------------------------------------------------------------------------

/// Converts timestamps to UTC and scores data freshness. Explicitly
/// constructed and passed to whoever needs it; it holds no mutable state.
#[derive(Debug, Clone)]
pub struct TimestampNormalizer {
    minute: FreshnessPolicy,
    hour: FreshnessPolicy,
    day: FreshnessPolicy,
}

impl Default for TimestampNormalizer {
    fn default() -> Self {
        Self {
            minute: FreshnessPolicy::for_granularity(Granularity::Minute),
            hour: FreshnessPolicy::for_granularity(Granularity::Hour),
            day: FreshnessPolicy::for_granularity(Granularity::Day),
        }
    }
}

impl TimestampNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn policy(&self, granularity: Granularity) -> &FreshnessPolicy {
        match granularity {
            Granularity::Minute => &self.minute,
            Granularity::Hour => &self.hour,
            Granularity::Day => &self.day,
        }
    }

    /// Convert any supported representation to a UTC instant.
    pub fn normalize(&self, ts: &TimestampInput) -> Result<DateTime<Utc>, CoreError> {
        match ts {
            TimestampInput::Utc(dt) => Ok(*dt),
            TimestampInput::Naive(naive) => Ok(Utc.from_utc_datetime(naive)),
            TimestampInput::Zoned(dt) => Ok(dt.with_timezone(&Utc)),
            TimestampInput::EpochMillis(ms) => {
                DateTime::from_timestamp_millis(*ms).ok_or_else(|| CoreError::Parse {
                    input: ms.to_string(),
                })
            }
            TimestampInput::Text(text) => parse_text(text),
        }
    }

    pub fn to_epoch_millis(&self, ts: DateTime<Utc>) -> i64 {
        ts.timestamp_millis()
    }

    /// `now - delay`, floored to the granularity boundary.
    pub fn expected_latest(&self, granularity: Granularity, now: DateTime<Utc>) -> DateTime<Utc> {
        floor_to(now - self.policy(granularity).delay, granularity)
    }

    /// Returns `(lag, is_fresh)`. Negative lag (data newer than expected)
    /// counts as fresh.
    pub fn freshness(
        &self,
        data_ts: DateTime<Utc>,
        granularity: Granularity,
        now: DateTime<Utc>,
    ) -> (TimeDelta, bool) {
        let lag = self.expected_latest(granularity, now) - data_ts;
        (lag, lag <= self.policy(granularity).acceptable)
    }

    /// Lag expressed in (fractional) minutes.
    pub fn freshness_minutes(
        &self,
        data_ts: DateTime<Utc>,
        granularity: Granularity,
        now: DateTime<Utc>,
    ) -> f64 {
        let (lag, _) = self.freshness(data_ts, granularity, now);
        lag.num_milliseconds() as f64 / 60_000.0
    }

    /// Quality score in [0, 1]: 1.0 while fresh, then a linear decay that
    /// reaches 0.0 at `max_lag`.
    pub fn quality_score(
        &self,
        data_ts: DateTime<Utc>,
        granularity: Granularity,
        now: DateTime<Utc>,
    ) -> f64 {
        let (lag, is_fresh) = self.freshness(data_ts, granularity, now);
        if is_fresh {
            return 1.0;
        }

        let max_lag = self.policy(granularity).max_lag;
        if lag >= max_lag {
            return 0.0;
        }

        let ratio = lag.num_milliseconds() as f64 / max_lag.num_milliseconds() as f64;
        (1.0 - ratio).clamp(0.0, 1.0)
    }

    /// Whether enough time has passed since `last_update` to poll upstream
    /// again.
    pub fn should_request_new_data(
        &self,
        last_update: Option<DateTime<Utc>>,
        granularity: Granularity,
        now: DateTime<Utc>,
    ) -> bool {
        match last_update {
            None => true,
            Some(last) => now - last >= self.policy(granularity).poll_interval,
        }
    }

    pub fn format_for_api(&self, ts: DateTime<Utc>) -> String {
        ts.format(API_FORMAT).to_string()
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn parse_text(text: &str) -> Result<DateTime<Utc>, CoreError> {
    let trimmed = text.trim();

    for fmt in TEXT_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    // General ISO-8601 with an offset; `Z` is accepted by RFC 3339.
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, fmt) {
            return Ok(dt.with_timezone(&Utc));
        }
    }

    // Date only: midnight UTC.
    if let Some(midnight) = NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(Utc.from_utc_datetime(&midnight));
    }

    Err(CoreError::Parse {
        input: text.to_string(),
    })
}

/// Zero out everything below the granularity's unit.
fn floor_to(ts: DateTime<Utc>, granularity: Granularity) -> DateTime<Utc> {
    let naive = ts.naive_utc();
    let date = naive.date();
    let floored = match granularity {
        Granularity::Minute => date.and_hms_opt(naive.hour(), naive.minute(), 0),
        Granularity::Hour => date.and_hms_opt(naive.hour(), 0, 0),
        Granularity::Day => date.and_hms_opt(0, 0, 0),
    };
    // and_hms_opt only fails on out-of-range components, which cannot come
    // from an existing timestamp.
    floored.map_or(ts, |n| Utc.from_utc_datetime(&n))
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    // ---- normalize -------------------------------------------------------

    #[test]
    fn normalize_text_formats() {
        let n = TimestampNormalizer::new();
        let expected = at("2024-03-01T12:30:45Z");

        for text in [
            "2024-03-01T12:30:45Z",
            "2024-03-01 12:30:45",
            "2024-03-01T12:30:45",
            "2024-03-01T12:30:45+00:00",
            "2024-03-01T14:30:45+02:00",
            "2024-03-01T20:30:45+0800",
            "2024-03-01 20:30:45+0800",
            "2024-03-01 14:30:45+02:00",
        ] {
            let got = n.normalize(&TimestampInput::from(text)).unwrap();
            assert_eq!(got, expected, "input {text}");
        }

        let minute = at("2024-03-01T12:30:00Z");
        for text in [
            "2024-03-01T12:30",
            "2024-03-01 12:30",
            "2024-03-01T14:30+02:00",
            "2024-03-01T20:30+0800",
        ] {
            let got = n.normalize(&TimestampInput::from(text)).unwrap();
            assert_eq!(got, minute, "input {text}");
        }

        let got = n.normalize(&TimestampInput::from("2024-03-01")).unwrap();
        assert_eq!(got, at("2024-03-01T00:00:00Z"));
    }

    #[test]
    fn normalize_rejects_out_of_range_fields() {
        let n = TimestampNormalizer::new();
        for text in ["2024-13-01", "2024-02-30", "2024-03-01T25:00"] {
            assert!(n.normalize(&TimestampInput::from(text)).is_err(), "input {text}");
        }
    }

    #[test]
    fn normalize_fractional_seconds() {
        let n = TimestampNormalizer::new();
        let got = n
            .normalize(&TimestampInput::from("2024-03-01T12:30:45.123Z"))
            .unwrap();
        assert_eq!(n.to_epoch_millis(got), at("2024-03-01T12:30:45Z").timestamp_millis() + 123);
    }

    #[test]
    fn normalize_naive_is_utc() {
        let n = TimestampNormalizer::new();
        let naive = NaiveDateTime::parse_from_str("2024-03-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let got = n.normalize(&TimestampInput::Naive(naive)).unwrap();
        assert_eq!(got, at("2024-03-01T00:00:00Z"));
    }

    #[test]
    fn normalize_zoned_converts() {
        let n = TimestampNormalizer::new();
        let zoned = DateTime::parse_from_rfc3339("2024-03-01T08:00:00+08:00").unwrap();
        let got = n.normalize(&TimestampInput::Zoned(zoned)).unwrap();
        assert_eq!(got, at("2024-03-01T00:00:00Z"));
    }

    #[test]
    fn normalize_epoch_millis() {
        let n = TimestampNormalizer::new();
        let got = n.normalize(&TimestampInput::EpochMillis(1_700_000_000_123)).unwrap();
        assert_eq!(n.to_epoch_millis(got), 1_700_000_000_123);
    }

    #[test]
    fn normalize_rejects_garbage() {
        let n = TimestampNormalizer::new();
        let err = n.normalize(&TimestampInput::from("yesterday-ish")).unwrap_err();
        assert!(matches!(err, CoreError::Parse { .. }));
    }

    // ---- expected_latest -------------------------------------------------

    #[test]
    fn expected_latest_floors_per_granularity() {
        let n = TimestampNormalizer::new();
        let now = at("2024-03-01T12:30:45.500Z");

        assert_eq!(n.expected_latest(Granularity::Minute, now), at("2024-03-01T12:28:00Z"));
        assert_eq!(n.expected_latest(Granularity::Hour, now), at("2024-03-01T12:00:00Z"));
        assert_eq!(n.expected_latest(Granularity::Day, now), at("2024-03-01T00:00:00Z"));
    }

    #[test]
    fn expected_latest_crosses_boundary() {
        let n = TimestampNormalizer::new();
        // 00:03 minus 5 minutes lands in the previous day's last hour.
        let now = at("2024-03-01T00:03:00Z");
        assert_eq!(n.expected_latest(Granularity::Hour, now), at("2024-02-29T23:00:00Z"));
    }

    // ---- freshness / quality ---------------------------------------------

    #[test]
    fn hour_data_ten_minutes_old_is_fresh() {
        let n = TimestampNormalizer::new();
        let now = at("2024-03-01T12:00:00Z");
        let data = now - TimeDelta::minutes(10);

        let (lag, fresh) = n.freshness(data, Granularity::Hour, now);
        // expected = floor(11:55) = 11:00, data = 11:50 => lag = -50min.
        assert!(lag <= TimeDelta::minutes(15));
        assert!(fresh);
        assert_eq!(n.quality_score(data, Granularity::Hour, now), 1.0);
    }

    #[test]
    fn hour_data_beyond_max_lag_scores_zero() {
        let n = TimestampNormalizer::new();
        // Pick `now` so expected_latest == now - 5min exactly.
        let now = at("2024-03-01T12:05:00Z");
        let data = at("2024-03-01T11:25:00Z"); // lag = 12:00 - 11:25 = 35min
        let (lag, fresh) = n.freshness(data, Granularity::Hour, now);
        assert_eq!(lag, TimeDelta::minutes(35));
        assert!(!fresh);
        assert_eq!(n.quality_score(data, Granularity::Hour, now), 0.0);
    }

    #[test]
    fn quality_decays_linearly() {
        let n = TimestampNormalizer::new();
        let now = at("2024-03-01T12:05:00Z"); // expected = 12:00
        let data = at("2024-03-01T11:40:00Z"); // lag = 20min, max 30min
        let score = n.quality_score(data, Granularity::Hour, now);
        assert!((score - (1.0 - 20.0 / 30.0)).abs() < 1e-12);
    }

    #[test]
    fn negative_lag_is_fresh() {
        let n = TimestampNormalizer::new();
        let now = at("2024-03-01T12:00:00Z");
        let data = now + TimeDelta::hours(1);
        let (lag, fresh) = n.freshness(data, Granularity::Day, now);
        assert!(lag < TimeDelta::zero());
        assert!(fresh);
        assert_eq!(n.quality_score(data, Granularity::Day, now), 1.0);
    }

    #[test]
    fn quality_is_monotone_in_lag() {
        let n = TimestampNormalizer::new();
        let now = at("2024-03-01T12:05:00Z");
        for g in Granularity::ALL {
            let mut prev = f64::INFINITY;
            for minutes in 0..400 {
                let data = now - TimeDelta::minutes(minutes);
                let score = n.quality_score(data, g, now);
                assert!((0.0..=1.0).contains(&score));
                assert!(score <= prev, "{g}: score rose at {minutes}min");
                prev = score;
            }
        }
    }

    #[test]
    fn freshness_minutes_reports_lag() {
        let n = TimestampNormalizer::new();
        let now = at("2024-03-01T12:05:00Z");
        let data = at("2024-03-01T11:30:00Z");
        assert!((n.freshness_minutes(data, Granularity::Hour, now) - 30.0).abs() < 1e-12);
    }

    // ---- misc ------------------------------------------------------------

    #[test]
    fn should_request_new_data_respects_interval() {
        let n = TimestampNormalizer::new();
        let now = at("2024-03-01T12:00:00Z");
        assert!(n.should_request_new_data(None, Granularity::Hour, now));
        assert!(!n.should_request_new_data(Some(now - TimeDelta::minutes(4)), Granularity::Hour, now));
        assert!(n.should_request_new_data(Some(now - TimeDelta::minutes(5)), Granularity::Hour, now));
    }

    #[test]
    fn api_format_roundtrips_through_normalize() {
        let n = TimestampNormalizer::new();
        let ts = at("2024-03-01T12:30:45Z");
        let text = n.format_for_api(ts);
        assert_eq!(text, "2024-03-01T12:30:45Z");
        assert_eq!(n.normalize(&TimestampInput::Text(text)).unwrap(), ts);
    }

    #[test]
    fn fixed_clock_is_stable() {
        let clock = FixedClock(at("2024-03-01T12:00:00Z"));
        assert_eq!(clock.now(), clock.now());
    }
}
