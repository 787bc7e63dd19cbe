//! Scheduled maintenance windows.
//!
//! Users opt in with a window start ("03:00") and an interval. The daemon
//! polls every five minutes so a narrow window is never missed, but the
//! maintenance command itself runs at most once per interval, and only while
//! the wall clock is inside the one-hour window.

use std::time::Duration;

use time::{OffsetDateTime, Time};

use crate::config::DaemonPatrolConfig;

/// How often the daemon checks whether it is inside the window. Internal,
/// not user-configurable.
pub const MAINTENANCE_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Minimum commit count before maintenance triggers. Lower than the
/// compactor's standalone threshold: this path is user-scheduled, not
/// emergency compaction.
pub const DEFAULT_MAINTENANCE_THRESHOLD: u64 = 1000;

fn maintenance_config(
    config: Option<&DaemonPatrolConfig>,
) -> Option<&crate::config::ScheduledMaintenanceConfig> {
    config
        .and_then(|c| c.patrols.as_ref())
        .and_then(|p| p.scheduled_maintenance.as_ref())
}

pub fn maintenance_threshold(config: Option<&DaemonPatrolConfig>) -> u64 {
    maintenance_config(config)
        .and_then(|c| c.threshold)
        .unwrap_or(DEFAULT_MAINTENANCE_THRESHOLD)
}

pub fn maintenance_window(config: Option<&DaemonPatrolConfig>) -> String {
    maintenance_config(config)
        .and_then(|c| c.window.clone())
        .unwrap_or_default()
}

pub fn maintenance_interval(config: Option<&DaemonPatrolConfig>) -> String {
    maintenance_config(config)
        .and_then(|c| c.interval.clone())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "daily".to_string())
}

/// Parse an `HH:MM` window start into (hour, minute).
pub fn parse_window_time(window: &str) -> Result<(u8, u8), String> {
    let Some((hour_str, minute_str)) = window.split_once(':') else {
        return Err(format!("invalid window format {window:?}: expected HH:MM"));
    };
    let hour: u8 = hour_str
        .parse()
        .map_err(|_| format!("invalid hour in window {window:?}: expected 0-23"))?;
    if hour > 23 {
        return Err(format!("invalid hour in window {window:?}: expected 0-23"));
    }
    let minute: u8 = minute_str
        .parse()
        .map_err(|_| format!("invalid minute in window {window:?}: expected 0-59"))?;
    if minute > 59 {
        return Err(format!("invalid minute in window {window:?}: expected 0-59"));
    }
    Ok((hour, minute))
}

/// Whether `now` falls inside the one-hour window starting at `window`.
/// An unparseable window is never "inside".
pub fn is_in_maintenance_window(now: OffsetDateTime, window: &str) -> bool {
    let Ok((hour, minute)) = parse_window_time(window) else {
        return false;
    };
    let Ok(start_time) = Time::from_hms(hour, minute, 0) else {
        return false;
    };
    let window_start = now.replace_time(start_time);
    let window_end = window_start + Duration::from_secs(3600);
    now >= window_start && now < window_end
}

/// Whether enough time has passed since the last run for the configured
/// interval. Never-run always triggers. Gaps sit slightly under the nominal
/// interval so a run never drifts out of its own window.
pub fn should_run_maintenance(
    now: OffsetDateTime,
    last_run: Option<OffsetDateTime>,
    interval: &str,
) -> bool {
    let Some(last_run) = last_run else {
        return true;
    };

    let min_gap = match interval {
        "daily" => Duration::from_secs(20 * 3600),
        "weekly" => Duration::from_secs(6 * 24 * 3600),
        "monthly" => Duration::from_secs(27 * 24 * 3600),
        other => match humantime::parse_duration(other) {
            Ok(d) if !d.is_zero() => d - d / 10,
            _ => Duration::from_secs(20 * 3600),
        },
    };

    now - last_run >= min_gap
}
