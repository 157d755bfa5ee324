use std::{env, fs, path::Path, time::Duration};

use crate::{
    errors::Error,
    governance::{
        pacing::{DelayRange, HourRange, PacingConfig},
        rate_window::RateLimits,
        retry::RetryPolicy,
    },
    Result,
};

const DEFAULT_BIND: &str = "127.0.0.1:3000";
const DEFAULT_SIDECAR_URL: &str = "http://127.0.0.1:3100";
const DEFAULT_MAX_BATCH_SIZE: usize = 1000;
const MAX_RETRIES_CEILING: u32 = 20;
const DEFAULT_MAX_TENANTS: usize = 100;

/// Typed configuration for the gateway.
///
/// Every governance knob is externally tunable through `SENDGATE_*`
/// environment variables; defaults match the conservative values the
/// service has always shipped with.
#[derive(Clone, Debug)]
pub struct Config {
    // Server
    pub bind_addr: String,
    pub api_key: Option<String>,

    // Chat-session sidecar
    pub sidecar_url: String,
    pub sidecar_timeout: Duration,
    /// Distinct tenant sessions kept in memory at once.
    pub max_tenants: usize,

    // Governance
    pub rate_limits: RateLimits,
    pub pacing: PacingConfig,
    pub max_batch_size: usize,
    pub retry: RetryPolicy,

    // Chat history
    pub default_label: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND.to_string(),
            api_key: None,
            sidecar_url: DEFAULT_SIDECAR_URL.to_string(),
            sidecar_timeout: Duration::from_secs(60),
            max_tenants: DEFAULT_MAX_TENANTS,
            rate_limits: RateLimits::default(),
            pacing: PacingConfig::default(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            retry: RetryPolicy::default(),
            default_label: None,
        }
    }
}

impl Config {
    /// Load from the process environment, seeding it from `.env` if present.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = get("SENDGATE_BIND").unwrap_or(d.bind_addr);
        let api_key = get("SENDGATE_API_KEY");

        let sidecar_url = get("SENDGATE_SIDECAR_URL")
            .unwrap_or(d.sidecar_url)
            .trim_end_matches('/')
            .to_string();
        let sidecar_timeout = Duration::from_millis(
            parse_opt::<u64>(&get, "SENDGATE_SIDECAR_TIMEOUT_MS")?
                .unwrap_or(d.sidecar_timeout.as_millis() as u64),
        );

        let max_tenants = parse_opt(&get, "SENDGATE_MAX_TENANTS")?.unwrap_or(d.max_tenants);

        // Rate limits
        let rate_limits = RateLimits {
            max_per_hour: parse_opt(&get, "SENDGATE_MAX_PER_HOUR")?
                .unwrap_or(d.rate_limits.max_per_hour),
            max_per_day: parse_opt(&get, "SENDGATE_MAX_PER_DAY")?
                .unwrap_or(d.rate_limits.max_per_day),
            max_per_destination_per_day: parse_opt(&get, "SENDGATE_MAX_PER_NUMBER_PER_DAY")?
                .unwrap_or(d.rate_limits.max_per_destination_per_day),
        };

        // Pacing
        let pacing = PacingConfig {
            bulk: delay_range(&get, "BULK", d.pacing.bulk)?,
            single: delay_range(&get, "SINGLE", d.pacing.single)?,
            late_night: delay_range(&get, "LATE_NIGHT", d.pacing.late_night)?,
            early_morning: delay_range(&get, "EARLY_MORNING", d.pacing.early_morning)?,
            business_hours: hour_range(&get, "SENDGATE_BUSINESS_HOURS", d.pacing.business_hours)?,
            late_night_hours: hour_range(
                &get,
                "SENDGATE_LATE_NIGHT_HOURS",
                d.pacing.late_night_hours,
            )?,
            early_morning_hours: hour_range(
                &get,
                "SENDGATE_EARLY_MORNING_HOURS",
                d.pacing.early_morning_hours,
            )?,
            block_late_night: get("SENDGATE_BLOCK_LATE_NIGHT")
                .map(|v| parse_bool(&v))
                .unwrap_or(d.pacing.block_late_night),
        };

        let max_batch_size =
            parse_opt(&get, "SENDGATE_MAX_BATCH_SIZE")?.unwrap_or(d.max_batch_size);

        // Backoff
        let retry = RetryPolicy {
            initial_delay: parse_opt::<u64>(&get, "SENDGATE_BACKOFF_INITIAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(d.retry.initial_delay),
            max_delay: parse_opt::<u64>(&get, "SENDGATE_BACKOFF_MAX_MS")?
                .map(Duration::from_millis)
                .unwrap_or(d.retry.max_delay),
            max_retries: parse_opt(&get, "SENDGATE_BACKOFF_MAX_RETRIES")?
                .unwrap_or(d.retry.max_retries),
            multiplier: parse_opt(&get, "SENDGATE_BACKOFF_MULTIPLIER")?
                .unwrap_or(d.retry.multiplier),
            transient_markers: get("SENDGATE_TRANSIENT_ERRORS")
                .map(|v| parse_csv_lower(&v))
                .unwrap_or(d.retry.transient_markers),
        };

        let default_label = get("SENDGATE_DEFAULT_LABEL");

        let cfg = Self {
            bind_addr,
            api_key,
            sidecar_url,
            sidecar_timeout,
            max_tenants,
            rate_limits,
            pacing,
            max_batch_size,
            retry,
            default_label,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, range) in [
            ("bulk", self.pacing.bulk),
            ("single", self.pacing.single),
            ("late night", self.pacing.late_night),
            ("early morning", self.pacing.early_morning),
        ] {
            if range.min > range.max {
                return Err(Error::Config(format!(
                    "{name} delay minimum ({}ms) exceeds maximum ({}ms)",
                    range.min.as_millis(),
                    range.max.as_millis()
                )));
            }
        }

        if self.max_batch_size == 0 {
            return Err(Error::Config("SENDGATE_MAX_BATCH_SIZE must be positive".to_string()));
        }
        if !(self.retry.multiplier.is_finite() && self.retry.multiplier >= 1.0) {
            return Err(Error::Config(
                "SENDGATE_BACKOFF_MULTIPLIER must be a finite number >= 1".to_string(),
            ));
        }
        if self.max_tenants == 0 {
            return Err(Error::Config("SENDGATE_MAX_TENANTS must be positive".to_string()));
        }
        if self.retry.max_retries > MAX_RETRIES_CEILING {
            return Err(Error::Config(format!(
                "SENDGATE_BACKOFF_MAX_RETRIES must be at most {MAX_RETRIES_CEILING}"
            )));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(Error::Config(
                "SENDGATE_BACKOFF_INITIAL_MS exceeds SENDGATE_BACKOFF_MAX_MS".to_string(),
            ));
        }
        if self.sidecar_url.is_empty() {
            return Err(Error::Config("SENDGATE_SIDECAR_URL is required".to_string()));
        }

        Ok(())
    }
}

fn parse_opt<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match get(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key} has an invalid value: {raw:?}"))),
    }
}

fn delay_range(
    get: &impl Fn(&str) -> Option<String>,
    band: &str,
    default: DelayRange,
) -> Result<DelayRange> {
    let min = parse_opt::<u64>(get, &format!("SENDGATE_DELAY_{band}_MIN_MS"))?
        .map(Duration::from_millis)
        .unwrap_or(default.min);
    let max = parse_opt::<u64>(get, &format!("SENDGATE_DELAY_{band}_MAX_MS"))?
        .map(Duration::from_millis)
        .unwrap_or(default.max);
    Ok(DelayRange { min, max })
}

/// Parses `start-end` (e.g. `9-20`).
fn hour_range(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: HourRange,
) -> Result<HourRange> {
    let Some(raw) = get(key) else {
        return Ok(default);
    };

    let invalid = || Error::Config(format!("{key} must look like START-END with hours 0-24: {raw:?}"));
    let (start, end) = raw.split_once('-').ok_or_else(invalid)?;
    let start = start.trim().parse::<u32>().map_err(|_| invalid())?;
    let end = end.trim().parse::<u32>().map_err(|_| invalid())?;

    HourRange::new(start, end).ok_or_else(invalid)
}

fn parse_bool(s: &str) -> bool {
    matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_csv_lower(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}
