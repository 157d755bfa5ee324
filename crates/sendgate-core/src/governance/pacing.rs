//! Randomized inter-message delays by time of day.
//!
//! Delays are drawn uniformly from a configured range so the provider never
//! sees a fixed cadence. Late night and early morning have their own ranges
//! and override the single/bulk split used during the rest of the day.

use std::{fmt, sync::Arc, time::Duration};

use chrono::Timelike;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{domain::SendMode, ports::Clock};

/// Half-open `[min, max)` delay range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub const fn from_millis(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        }
    }

    /// Uniform sample in `[min, max)`; an empty range yields `min`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let span = (self.max - self.min).as_millis() as u64;
        self.min + Duration::from_millis(rng.gen_range(0..span))
    }
}

/// Half-open `[start, end)` range of local hours. `start > end` wraps past
/// midnight (e.g. `22-5`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourRange {
    start: u32,
    end: u32,
}

impl HourRange {
    pub const fn new(start: u32, end: u32) -> Option<Self> {
        if start > 23 || end > 24 {
            return None;
        }
        Some(Self { start, end })
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            hour >= self.start && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingConfig {
    pub bulk: DelayRange,
    pub single: DelayRange,
    pub late_night: DelayRange,
    pub early_morning: DelayRange,

    pub business_hours: HourRange,
    pub late_night_hours: HourRange,
    pub early_morning_hours: HourRange,

    /// Refuse every send while the late-night band is active.
    pub block_late_night: bool,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            bulk: DelayRange::from_millis(15_000, 45_000),
            single: DelayRange::from_millis(5_000, 15_000),
            late_night: DelayRange::from_millis(300_000, 600_000),
            early_morning: DelayRange::from_millis(30_000, 60_000),
            business_hours: HourRange { start: 9, end: 20 },
            late_night_hours: HourRange { start: 0, end: 6 },
            early_morning_hours: HourRange { start: 6, end: 9 },
            block_late_night: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PacingBand {
    BusinessHoursSingle,
    BusinessHoursBulk,
    EarlyMorning,
    LateNight,
}

impl fmt::Display for PacingBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PacingBand::BusinessHoursSingle => "business-hours-single",
            PacingBand::BusinessHoursBulk => "business-hours-bulk",
            PacingBand::EarlyMorning => "early-morning",
            PacingBand::LateNight => "late-night",
        })
    }
}

/// Stateless apart from reading the clock.
#[derive(Clone)]
pub struct PacingPolicy {
    cfg: PacingConfig,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for PacingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacingPolicy").field("cfg", &self.cfg).finish()
    }
}

impl PacingPolicy {
    pub fn new(cfg: PacingConfig, clock: Arc<dyn Clock>) -> Self {
        Self { cfg, clock }
    }

    pub fn config(&self) -> &PacingConfig {
        &self.cfg
    }

    fn hour(&self) -> u32 {
        self.clock.now().hour()
    }

    /// Band for a given local hour. Late night wins over early morning;
    /// every other hour falls into the business-hours band for `mode`.
    pub fn band_at(&self, hour: u32, mode: SendMode) -> PacingBand {
        if self.cfg.late_night_hours.contains(hour) {
            PacingBand::LateNight
        } else if self.cfg.early_morning_hours.contains(hour) {
            PacingBand::EarlyMorning
        } else if mode.is_bulk() {
            PacingBand::BusinessHoursBulk
        } else {
            PacingBand::BusinessHoursSingle
        }
    }

    pub fn classify_time_of_day(&self, mode: SendMode) -> PacingBand {
        self.band_at(self.hour(), mode)
    }

    pub fn range_for(&self, band: PacingBand) -> DelayRange {
        match band {
            PacingBand::BusinessHoursSingle => self.cfg.single,
            PacingBand::BusinessHoursBulk => self.cfg.bulk,
            PacingBand::EarlyMorning => self.cfg.early_morning,
            PacingBand::LateNight => self.cfg.late_night,
        }
    }

    /// Delay for `band` drawn from `rng`.
    pub fn delay_for<R: Rng + ?Sized>(&self, band: PacingBand, rng: &mut R) -> Duration {
        self.range_for(band).sample(rng)
    }

    /// Band and randomized delay for a send happening now.
    pub fn compute_delay(&self, mode: SendMode) -> (PacingBand, Duration) {
        let band = self.classify_time_of_day(mode);
        (band, self.delay_for(band, &mut rand::thread_rng()))
    }

    pub fn is_business_hours(&self) -> bool {
        self.cfg.business_hours.contains(self.hour())
    }

    pub fn is_late_night(&self) -> bool {
        self.cfg.late_night_hours.contains(self.hour())
    }

    pub fn is_early_morning(&self) -> bool {
        self.cfg.early_morning_hours.contains(self.hour())
    }

    /// Whether the late-night hard block applies right now.
    pub fn late_night_blocked(&self) -> bool {
        self.cfg.block_late_night && self.is_late_night()
    }
}
