//! Pipeline configuration with environment overrides.

use std::str::FromStr;
use std::time::Duration;

use crate::fetcher::DEFAULT_BASE_URL;
use crate::retry::BackoffPolicy;
use crate::throttling::RateLimitConfig;
use crate::ValidationError;

pub const DEFAULT_ANOMALY_THRESHOLD: f64 = 0.05;
pub const DEFAULT_HISTORY_LIMIT: usize = 100;
/// Upper bound accepted for `BackoffPolicy::max_retries`.
pub const MAX_RETRIES_CEILING: u32 = 10;

/// Optional process-wide cap on upstream calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamQuotaConfig {
    pub limit: u32,
    pub window: Duration,
}

impl FromStr for UpstreamQuotaConfig {
    type Err = ValidationError;

    /// Parses `<limit>/<window_secs>`, e.g. `30/60`.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidConfig {
            key: String::from("MARKETPIPE_UPSTREAM_QUOTA"),
            value: input.to_owned(),
        };

        let (limit, window) = input.trim().split_once('/').ok_or_else(invalid)?;
        let limit = limit.trim().parse::<u32>().map_err(|_| invalid())?;
        let window_secs = window.trim().parse::<u64>().map_err(|_| invalid())?;
        if limit == 0 || window_secs == 0 {
            return Err(invalid());
        }

        Ok(Self {
            limit,
            window: Duration::from_secs(window_secs),
        })
    }
}

/// Tunables for the acquisition pipeline and the anomaly detector.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub rate_limit: RateLimitConfig,
    pub backoff: BackoffPolicy,
    pub request_timeout: Duration,
    pub anomaly_threshold: f64,
    pub provider_base_url: String,
    pub upstream_quota: Option<UpstreamQuotaConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            backoff: BackoffPolicy::default(),
            request_timeout: Duration::from_secs(5),
            anomaly_threshold: DEFAULT_ANOMALY_THRESHOLD,
            provider_base_url: String::from(DEFAULT_BASE_URL),
            upstream_quota: None,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `MARKETPIPE_*` environment variables.
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each known key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64, _>(&lookup, "MARKETPIPE_RATE_LIMIT_WINDOW_SECS")? {
            config.rate_limit.window = Duration::from_secs(secs);
        }
        if let Some(capacity) = parse_var::<u32, _>(&lookup, "MARKETPIPE_RATE_LIMIT_CAPACITY")? {
            config.rate_limit.capacity = capacity;
        }
        if let Some(threshold) = parse_var::<f64, _>(&lookup, "MARKETPIPE_ANOMALY_THRESHOLD")? {
            config.anomaly_threshold = threshold;
        }
        if let Some(millis) = parse_var::<u64, _>(&lookup, "MARKETPIPE_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(millis);
        }
        if let Some(retries) = parse_var::<u32, _>(&lookup, "MARKETPIPE_MAX_RETRIES")? {
            config.backoff.max_retries = retries;
        }
        if let Some(url) = non_empty(&lookup, "MARKETPIPE_PROVIDER_BASE_URL") {
            config.provider_base_url = url;
        }
        if let Some(quota) = non_empty(&lookup, "MARKETPIPE_UPSTREAM_QUOTA") {
            config.upstream_quota = Some(quota.parse()?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.rate_limit.window.is_zero() {
            return Err(invalid("rate_limit.window", "0s"));
        }
        if self.rate_limit.capacity == 0 {
            return Err(invalid("rate_limit.capacity", "0"));
        }
        validate_threshold(self.anomaly_threshold)?;
        if self.request_timeout.is_zero() {
            return Err(invalid("request_timeout", "0ms"));
        }
        if self.backoff.max_retries > MAX_RETRIES_CEILING {
            return Err(invalid(
                "backoff.max_retries",
                &format!(
                    "{} exceeds ceiling {MAX_RETRIES_CEILING}",
                    self.backoff.max_retries
                ),
            ));
        }
        if self.backoff.base > self.backoff.cap {
            return Err(invalid(
                "backoff.base",
                &format!("{:?} exceeds cap {:?}", self.backoff.base, self.backoff.cap),
            ));
        }
        if !self.provider_base_url.starts_with("http://")
            && !self.provider_base_url.starts_with("https://")
        {
            return Err(invalid("provider_base_url", &self.provider_base_url));
        }
        Ok(())
    }
}

/// Threshold must be finite and strictly positive.
pub fn validate_threshold(threshold: f64) -> Result<(), ValidationError> {
    if !threshold.is_finite() {
        return Err(ValidationError::NonFiniteValue { field: "threshold" });
    }
    if threshold <= 0.0 {
        return Err(ValidationError::NonPositiveValue { field: "threshold" });
    }
    Ok(())
}

fn invalid(key: &str, value: &str) -> ValidationError {
    ValidationError::InvalidConfig {
        key: key.to_owned(),
        value: value.to_owned(),
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ValidationError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup, key)
        .map(|value| value.parse::<T>().map_err(|_| invalid(key, &value)))
        .transpose()
}
