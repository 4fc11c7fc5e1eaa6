//! Tourist status resolution.
//!
//! Pure functions of their inputs: the same tourist, zone matches, panic flag
//! and clock always resolve to the same status.

use chrono::{DateTime, Duration, Utc};

use crate::model::{AlertLevel, Tourist, TouristStatus, ZoneType};
use crate::zones::ZoneMatch;

/// Idle minutes after which a tourist is considered inactive.
pub const DEFAULT_INACTIVITY_MINUTES: i64 = 120;

/// [`DEFAULT_INACTIVITY_MINUTES`] as a duration.
pub fn default_inactivity_threshold() -> Duration {
    Duration::minutes(DEFAULT_INACTIVITY_MINUTES)
}

/// A resolved status together with the inactivity finding behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub status: TouristStatus,

    /// Time since the tourist was last seen moving. Never negative.
    pub idle_for: Duration,

    /// Whether `idle_for` exceeds the inactivity threshold.
    pub inactive: bool,
}

/// Resolve a tourist's status.
///
/// Rules, first match wins:
///
/// 1. panic active -> `Emergency`
/// 2. any zone that is `restricted` or has alert level `high` -> `Emergency`
/// 3. any zone that is `unsafe` or has alert level `medium`, or idle longer
///    than `inactivity_threshold` -> `Warning`
/// 4. otherwise `Safe`
pub fn resolve(
    tourist: &Tourist,
    zone_matches: &[ZoneMatch],
    panic_active: bool,
    now: DateTime<Utc>,
    inactivity_threshold: Duration,
) -> TouristStatus {
    assess(tourist, zone_matches, panic_active, now, inactivity_threshold).status
}

/// Like [`resolve`], but also reports the inactivity finding.
pub fn assess(
    tourist: &Tourist,
    zone_matches: &[ZoneMatch],
    panic_active: bool,
    now: DateTime<Utc>,
    inactivity_threshold: Duration,
) -> Assessment {
    let idle_for = (now - tourist.idle_since()).max(Duration::zero());
    let inactive = idle_for > inactivity_threshold;

    let status = if panic_active || zone_matches.iter().any(is_emergency_zone) {
        TouristStatus::Emergency
    } else if inactive || zone_matches.iter().any(is_warning_zone) {
        TouristStatus::Warning
    } else {
        TouristStatus::Safe
    };

    Assessment {
        status,
        idle_for,
        inactive,
    }
}

fn is_emergency_zone(zone: &ZoneMatch) -> bool {
    zone.zone_type == ZoneType::Restricted || zone.alert_level == AlertLevel::High
}

fn is_warning_zone(zone: &ZoneMatch) -> bool {
    zone.zone_type == ZoneType::Unsafe || zone.alert_level == AlertLevel::Medium
}
