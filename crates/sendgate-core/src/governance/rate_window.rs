//! Fixed-window send counters kept entirely in memory.
//!
//! Three windows are tracked per send: the global calendar day, the global
//! calendar hour and the destination's calendar day. Buckets are aligned to
//! the local calendar, so two sends in the same hour share a bucket no matter
//! how far apart they are. Counters are never decremented; a bucket simply
//! disappears once its `reset_at` has passed and the next admission check
//! sweeps it.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

use crate::{domain::Destination, ports::Clock};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    pub max_per_hour: u32,
    pub max_per_day: u32,
    pub max_per_destination_per_day: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            max_per_hour: 100,
            max_per_day: 1000,
            max_per_destination_per_day: 5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum WindowScope {
    GlobalDaily,
    GlobalHourly,
    DestinationDaily(Destination),
}

/// A scope plus the local start of the bucket it counts.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub scope: WindowScope,
    pub bucket_start: NaiveDateTime,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowEntry {
    pub count: u32,
    /// Fixed when the entry is created; never extended.
    pub reset_at: DateTime<Local>,
}

/// Window data attached to a denial so clients can back off.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowLimits {
    pub current: u32,
    pub max: u32,
    pub reset_at: DateTime<Local>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    DailyLimit,
    HourlyLimit,
    DestinationDailyLimit,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DenialReason::DailyLimit => "Daily message limit exceeded",
            DenialReason::HourlyLimit => "Hourly message limit exceeded",
            DenialReason::DestinationDailyLimit => "Daily message limit exceeded for this number",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied {
        reason: DenialReason,
        limits: WindowLimits,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct WindowUsage {
    pub current: u32,
    pub max: u32,
    pub remaining: u32,
}

impl WindowUsage {
    fn new(current: u32, max: u32) -> Self {
        Self {
            current,
            max,
            remaining: max.saturating_sub(current),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RateLimitStats {
    pub daily: WindowUsage,
    pub hourly: WindowUsage,
}

/// Bucket boundaries for one instant.
#[derive(Clone, Copy, Debug)]
struct Buckets {
    day_start: NaiveDateTime,
    day_reset: DateTime<Local>,
    hour_start: NaiveDateTime,
    hour_reset: DateTime<Local>,
}

impl Buckets {
    fn at(now: DateTime<Local>) -> Self {
        let day_start = now.date_naive().and_time(NaiveTime::MIN);
        let hour_start = day_start + chrono::Duration::hours(i64::from(now.hour()));

        Self {
            day_start,
            day_reset: to_local(
                day_start + chrono::Duration::days(1),
                now + chrono::Duration::days(1),
            ),
            hour_start,
            hour_reset: to_local(
                hour_start + chrono::Duration::hours(1),
                now + chrono::Duration::hours(1),
            ),
        }
    }

    fn key(&self, scope: WindowScope) -> WindowKey {
        let bucket_start = match scope {
            WindowScope::GlobalHourly => self.hour_start,
            WindowScope::GlobalDaily | WindowScope::DestinationDaily(_) => self.day_start,
        };
        WindowKey {
            scope,
            bucket_start,
        }
    }

    fn reset_for(&self, scope: &WindowScope) -> DateTime<Local> {
        match scope {
            WindowScope::GlobalHourly => self.hour_reset,
            WindowScope::GlobalDaily | WindowScope::DestinationDaily(_) => self.day_reset,
        }
    }
}

/// Local wall time to an instant; `fallback` covers times skipped by a DST jump.
fn to_local(naive: NaiveDateTime, fallback: DateTime<Local>) -> DateTime<Local> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .unwrap_or(fallback)
}

/// Process-wide send counters.
///
/// `check_admission` and `record_send` each run under one lock with no
/// suspension point, so a read and its write-back are never interleaved
/// with another request. Not coordinated across processes.
pub struct RateWindowTracker {
    limits: RateLimits,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<WindowKey, WindowEntry>>,
}

impl fmt::Debug for RateWindowTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateWindowTracker")
            .field("limits", &self.limits)
            .field("tracked_windows", &self.tracked_windows())
            .finish()
    }
}

impl RateWindowTracker {
    pub fn new(limits: RateLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            limits,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WindowKey, WindowEntry>> {
        self.windows.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decide whether one more send may go out now.
    ///
    /// Checks global daily, global hourly, then (with a destination) the
    /// destination's daily window, and reports only the first violation.
    /// Expired buckets are swept first; counters are never changed.
    pub fn check_admission(&self, destination: Option<&Destination>) -> Admission {
        let now = self.clock.now();
        let buckets = Buckets::at(now);

        let mut windows = self.lock();
        windows.retain(|_, entry| entry.reset_at > now);

        let mut scopes = vec![
            (WindowScope::GlobalDaily, self.limits.max_per_day, DenialReason::DailyLimit),
            (WindowScope::GlobalHourly, self.limits.max_per_hour, DenialReason::HourlyLimit),
        ];
        if let Some(d) = destination {
            scopes.push((
                WindowScope::DestinationDaily(d.clone()),
                self.limits.max_per_destination_per_day,
                DenialReason::DestinationDailyLimit,
            ));
        }

        for (scope, max, reason) in scopes {
            let reset_at = buckets.reset_for(&scope);
            let current = windows
                .get(&buckets.key(scope))
                .map(|e| e.count)
                .unwrap_or(0);

            if current >= max {
                return Admission::Denied {
                    reason,
                    limits: WindowLimits {
                        current,
                        max,
                        reset_at,
                    },
                };
            }
        }

        Admission::Allowed
    }

    /// Count one successful send in every applicable window.
    pub fn record_send(&self, destination: Option<&Destination>) {
        let now = self.clock.now();
        let buckets = Buckets::at(now);

        let mut scopes = vec![WindowScope::GlobalDaily, WindowScope::GlobalHourly];
        if let Some(d) = destination {
            scopes.push(WindowScope::DestinationDaily(d.clone()));
        }

        let mut windows = self.lock();
        for scope in scopes {
            let reset_at = buckets.reset_for(&scope);
            let entry = windows.entry(buckets.key(scope)).or_insert(WindowEntry {
                count: 0,
                reset_at,
            });
            entry.count = entry.count.saturating_add(1);
        }
    }

    /// Current global usage. Read-only.
    pub fn snapshot(&self) -> RateLimitStats {
        let now = self.clock.now();
        let buckets = Buckets::at(now);
        let windows = self.lock();

        let count = |scope: WindowScope| {
            windows
                .get(&buckets.key(scope))
                .filter(|e| e.reset_at > now)
                .map(|e| e.count)
                .unwrap_or(0)
        };

        RateLimitStats {
            daily: WindowUsage::new(count(WindowScope::GlobalDaily), self.limits.max_per_day),
            hourly: WindowUsage::new(count(WindowScope::GlobalHourly), self.limits.max_per_hour),
        }
    }

    /// Drop every tracked window. For tests and admin use.
    pub fn reset(&self) {
        self.lock().clear();
    }

    pub fn tracked_windows(&self) -> usize {
        self.lock().len()
    }
}
