use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default sleep between attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
/// Default wall-clock deadline for a whole retry loop.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1200);
/// Default jitter fraction applied to the poll interval.
pub const DEFAULT_FUZZ: f64 = 0.5;
/// Longest poll interval or deadline a budget accepts.
pub const MAX_DURATION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Converts a positive number of seconds no longer than [`MAX_DURATION`].
pub fn duration_from_secs(secs: f64) -> Result<Duration, String> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("{} is not a positive number of seconds", secs));
    }
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) if duration <= MAX_DURATION => Ok(duration),
        _ => Err(format!(
            "{} seconds exceeds the limit of {} seconds",
            secs,
            MAX_DURATION.as_secs()
        )),
    }
}

/// Bounds for one retried operation.
///
/// In config files durations are written in (fractional) seconds. A negative
/// `timeout_secs` disables the deadline, leaving `max_retries` as the only bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryBudget {
    #[serde(rename = "poll_interval_secs", with = "secs")]
    pub poll_interval: Duration,
    /// Retries after the first attempt; `None` means bounded by the deadline only
    pub max_retries: Option<u32>,
    #[serde(rename = "timeout_secs", with = "optional_secs")]
    pub timeout: Option<Duration>,
    /// Fraction of the poll interval subject to jitter, in `[0, 1]`
    pub fuzz: f64,
    /// Log every retried failure at warn level
    pub log_errors: bool,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_retries: None,
            timeout: Some(DEFAULT_TIMEOUT),
            fuzz: DEFAULT_FUZZ,
            log_errors: true,
        }
    }
}

impl RetryBudget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Removes the deadline. Only valid together with `with_max_retries`.
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub fn with_fuzz(mut self, fuzz: f64) -> Self {
        self.fuzz = fuzz;
        self
    }

    pub fn with_log_errors(mut self, log_errors: bool) -> Self {
        self.log_errors = log_errors;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.fuzz.is_finite() || !(0.0..=1.0).contains(&self.fuzz) {
            return Err(format!("fuzz must be within [0, 1], got {}", self.fuzz));
        }
        if self.max_retries.is_none() && self.timeout.is_none() {
            return Err("budget needs max_retries, a timeout, or both".to_string());
        }
        if self.poll_interval > MAX_DURATION {
            return Err(format!(
                "poll interval {:?} exceeds the limit of {:?}",
                self.poll_interval, MAX_DURATION
            ));
        }
        if matches!(self.timeout, Some(timeout) if timeout > MAX_DURATION) {
            return Err(format!("timeout exceeds the limit of {:?}", MAX_DURATION));
        }
        Ok(())
    }

    /// `poll_interval * (1 - fuzz + r * fuzz)` with `r` uniform in `[0, 1)`.
    pub fn fuzzed_interval<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let fuzz = self.fuzz.clamp(0.0, 1.0);
        let factor = 1.0 - fuzz + rng.gen::<f64>() * fuzz;
        self.poll_interval.mul_f64(factor)
    }
}

mod secs {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(raw).map_err(|e| D::Error::custom(format!("{raw}: {e}")))
    }
}

mod optional_secs {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_f64(d.as_secs_f64()),
            None => serializer.serialize_f64(-1.0),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let raw = f64::deserialize(deserializer)?;
        if raw < 0.0 {
            return Ok(None);
        }
        Duration::try_from_secs_f64(raw)
            .map(Some)
            .map_err(|e| D::Error::custom(format!("{raw}: {e}")))
    }
}
