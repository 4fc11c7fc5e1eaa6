//! The alert engine: creation, deduplication, auto-clear, resolution and
//! escalation of alerts.
//!
//! # Lifecycle
//!
//! Per (tourist, alert type) an alert moves `none -> open -> resolved`. An
//! open critical alert may additionally be escalated, which generates an
//! incident report and sets `incident_generated`; an escalated alert stays
//! open until an operator resolves it.
//!
//! At most one open alert exists per (tourist, type). A repeated detection
//! refreshes the open alert instead of creating a duplicate. Alerts are never
//! removed; resolution only flips the `resolved` flag.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::incident::IncidentLedger;
use crate::model::{Alert, AlertType, GeoPoint, IncidentReport, Severity};

/// Whether an open alert may resolve itself when its condition clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearPolicy {
    /// Resolved automatically once the triggering condition has ceased.
    AutoClear,

    /// Only an operator can resolve it.
    ManualOnly,
}

/// The clear policy for each alert type.
///
/// Panic alerts always need a human to resolve them. The other conditions
/// are observable (the tourist leaves the zone, moves again, returns to the
/// route) and clear on their own.
pub fn clear_policy(alert_type: AlertType) -> ClearPolicy {
    match alert_type {
        AlertType::Panic => ClearPolicy::ManualOnly,
        AlertType::Geofence | AlertType::Inactive | AlertType::RouteDeviation => {
            ClearPolicy::AutoClear
        }
    }
}

/// Criteria for listing alerts.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub tourist_id: Option<String>,
    pub open_only: bool,
    pub alert_type: Option<AlertType>,
}

impl AlertFilter {
    fn matches(&self, alert: &Alert) -> bool {
        self.tourist_id
            .as_deref()
            .is_none_or(|id| alert.tourist_id == id)
            && (!self.open_only || alert.is_open())
            && self.alert_type.is_none_or(|t| alert.alert_type == t)
    }
}

/// Saved alerts of one tourist, used to undo a failed operation.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    tourist_id: String,
    alerts: Vec<Alert>,
}

/// The alert registry and its state machine.
#[derive(Debug, Clone, Default)]
pub struct AlertEngine {
    alerts: HashMap<Uuid, Alert>,
    open: HashMap<(String, AlertType), Uuid>,
}

impl AlertEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the registry from persisted alerts.
    ///
    /// Fails with [`Error::Precondition`] if the alerts contain two open
    /// alerts of the same type for one tourist.
    pub fn from_alerts(alerts: Vec<Alert>) -> Result<Self> {
        let mut engine = Self::new();
        for alert in alerts {
            if alert.is_open() {
                let key = (alert.tourist_id.clone(), alert.alert_type);
                if engine.open.insert(key, alert.id).is_some() {
                    return Err(Error::Precondition(format!(
                        "more than one open {} alert for tourist {}",
                        alert.alert_type.as_str(),
                        alert.tourist_id
                    )));
                }
            }
            engine.alerts.insert(alert.id, alert);
        }
        Ok(engine)
    }

    /// Record a detection.
    ///
    /// If an alert of `alert_type` is already open for the tourist it is
    /// refreshed with the new severity, message and location, provided the
    /// new severity is not lower than the current one. A lower severity
    /// leaves the open alert untouched: lowering requires the condition to
    /// clear first. Otherwise a new open alert is created.
    pub fn detect(
        &mut self,
        tourist_id: &str,
        alert_type: AlertType,
        severity: Severity,
        message: impl Into<String>,
        location: Option<GeoPoint>,
        now: DateTime<Utc>,
    ) -> Alert {
        let key = (tourist_id.to_string(), alert_type);

        if let Some(alert) = self
            .open
            .get(&key)
            .and_then(|id| self.alerts.get_mut(id))
        {
            if severity >= alert.severity {
                alert.severity = severity;
                alert.message = message.into();
                alert.location = location;
                alert.last_updated_at = now.max(alert.last_updated_at);
                debug!(
                    alert_id = %alert.id,
                    tourist_id,
                    alert_type = alert_type.as_str(),
                    severity = severity.as_str(),
                    "Alert refreshed"
                );
            }
            return alert.clone();
        }

        let alert = Alert {
            id: Uuid::new_v4(),
            tourist_id: tourist_id.to_string(),
            alert_type,
            severity,
            message: message.into(),
            location,
            created_at: now,
            last_updated_at: now,
            resolved: false,
            resolved_at: None,
            incident_generated: false,
        };

        info!(
            alert_id = %alert.id,
            tourist_id,
            alert_type = alert_type.as_str(),
            severity = severity.as_str(),
            "Alert opened"
        );

        self.open.insert(key, alert.id);
        self.alerts.insert(alert.id, alert.clone());
        alert
    }

    /// Like [`detect`](Self::detect), but returns `None` without touching
    /// anything when the open alert already carries the same severity,
    /// message and location.
    pub fn raise(
        &mut self,
        tourist_id: &str,
        alert_type: AlertType,
        severity: Severity,
        message: String,
        location: Option<GeoPoint>,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let unchanged = self.open_alert(tourist_id, alert_type).is_some_and(|open| {
            open.severity == severity && open.message == message && open.location == location
        });
        (!unchanged).then(|| self.detect(tourist_id, alert_type, severity, message, location, now))
    }

    /// Mark an alert resolved. Resolving a resolved alert is a no-op.
    pub fn resolve(&mut self, alert_id: Uuid, now: DateTime<Utc>) -> Result<Alert> {
        let alert = self
            .alerts
            .get_mut(&alert_id)
            .ok_or_else(|| Error::NotFound(format!("alert {alert_id}")))?;

        if !alert.resolved {
            alert.resolved = true;
            alert.resolved_at = Some(now.max(alert.last_updated_at));
            self.open.remove(&(alert.tourist_id.clone(), alert.alert_type));
            info!(
                alert_id = %alert.id,
                tourist_id = %alert.tourist_id,
                alert_type = alert.alert_type.as_str(),
                "Alert resolved"
            );
        }

        Ok(alert.clone())
    }

    /// Resolve the open alert of `alert_type` because its condition has
    /// ceased.
    ///
    /// Returns the resolved alert, or `None` if nothing was open or the
    /// type's [`ClearPolicy`] is manual-only.
    pub fn auto_clear(
        &mut self,
        tourist_id: &str,
        alert_type: AlertType,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        if clear_policy(alert_type) == ClearPolicy::ManualOnly {
            return None;
        }

        let id = self.open.remove(&(tourist_id.to_string(), alert_type))?;
        let alert = self.alerts.get_mut(&id)?;
        alert.resolved = true;
        alert.resolved_at = Some(now.max(alert.last_updated_at));

        info!(
            alert_id = %alert.id,
            tourist_id,
            alert_type = alert_type.as_str(),
            "Alert auto-cleared"
        );

        Some(alert.clone())
    }

    /// Escalate a critical open alert into an incident report.
    ///
    /// Escalating an alert that already has a report returns that report
    /// unchanged.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for an unknown alert.
    /// - [`Error::InvalidState`] if the alert is resolved or not critical.
    /// - [`Error::Precondition`] if the ledger refuses the report.
    pub fn escalate_to_incident(
        &mut self,
        alert_id: Uuid,
        now: DateTime<Utc>,
        ledger: &mut IncidentLedger,
    ) -> Result<IncidentReport> {
        let alert = self
            .alerts
            .get_mut(&alert_id)
            .ok_or_else(|| Error::NotFound(format!("alert {alert_id}")))?;

        if alert.incident_generated {
            return ledger.report_for_alert(alert_id).cloned().ok_or_else(|| {
                Error::Precondition(format!(
                    "alert {alert_id} is marked escalated but has no incident report"
                ))
            });
        }
        if alert.resolved {
            return Err(Error::InvalidState(format!(
                "alert {alert_id} is resolved and cannot be escalated"
            )));
        }
        if alert.severity != Severity::Critical {
            return Err(Error::InvalidState(format!(
                "alert {alert_id} has severity {}, only critical alerts can be escalated",
                alert.severity.as_str()
            )));
        }

        let report = ledger.generate(alert, now)?;
        alert.incident_generated = true;

        info!(
            alert_id = %alert.id,
            tourist_id = %alert.tourist_id,
            reference = %report.reference,
            "Alert escalated to incident"
        );

        Ok(report)
    }

    pub fn get(&self, alert_id: Uuid) -> Option<&Alert> {
        self.alerts.get(&alert_id)
    }

    /// The open alert of `alert_type` for a tourist, if any.
    pub fn open_alert(&self, tourist_id: &str, alert_type: AlertType) -> Option<&Alert> {
        self.open
            .get(&(tourist_id.to_string(), alert_type))
            .and_then(|id| self.alerts.get(id))
    }

    /// The latest time any alert of the tourist was opened, refreshed or
    /// resolved.
    pub fn latest_activity(&self, tourist_id: &str) -> Option<DateTime<Utc>> {
        self.iter()
            .filter(|alert| alert.tourist_id == tourist_id)
            .map(|alert| {
                alert
                    .resolved_at
                    .map_or(alert.last_updated_at, |at| at.max(alert.last_updated_at))
            })
            .max()
    }

    pub fn has_open(&self, tourist_id: &str, alert_type: AlertType) -> bool {
        self.open_alert(tourist_id, alert_type).is_some()
    }

    /// Alerts matching `filter`, newest first.
    pub fn list(&self, filter: &AlertFilter) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .values()
            .filter(|alert| filter.matches(alert))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        alerts
    }

    pub fn iter(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.values()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// Save the current alerts of a tourist.
    pub fn checkpoint(&self, tourist_id: &str) -> Checkpoint {
        Checkpoint {
            tourist_id: tourist_id.to_string(),
            alerts: self
                .iter()
                .filter(|alert| alert.tourist_id == tourist_id)
                .cloned()
                .collect(),
        }
    }

    /// Alerts of the checkpointed tourist that were created or modified since
    /// the checkpoint was taken.
    pub fn changed_since(&self, checkpoint: &Checkpoint) -> Vec<Alert> {
        self.iter()
            .filter(|alert| alert.tourist_id == checkpoint.tourist_id)
            .filter(|alert| !checkpoint.alerts.contains(alert))
            .cloned()
            .collect()
    }

    /// Put the checkpointed tourist's alerts back as they were.
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        let tourist_id = checkpoint.tourist_id;

        self.alerts.retain(|_, alert| alert.tourist_id != tourist_id);
        self.open.retain(|(id, _), _| *id != tourist_id);

        for alert in checkpoint.alerts {
            if alert.is_open() {
                self.open
                    .insert((alert.tourist_id.clone(), alert.alert_type), alert.id);
            }
            self.alerts.insert(alert.id, alert);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    const TOURIST: &str = "0x1a2b3c4d5e6f7890abcdef1234567890";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 20, 12, 20, 0).unwrap()
    }

    fn here() -> Option<GeoPoint> {
        Some(GeoPoint::new(25.5788, 91.8933))
    }

    fn open_count(engine: &AlertEngine) -> usize {
        engine
            .list(&AlertFilter {
                open_only: true,
                ..AlertFilter::default()
            })
            .len()
    }

    #[test]
    fn test_detect_creates_open_alert() {
        let mut engine = AlertEngine::new();

        let alert = engine.detect(
            TOURIST,
            AlertType::Panic,
            Severity::Critical,
            "Emergency panic button activated by tourist",
            here(),
            now(),
        );

        assert!(alert.is_open());
        assert!(!alert.incident_generated);
        assert_eq!(alert.created_at, now());
        assert_eq!(engine.open_alert(TOURIST, AlertType::Panic), Some(&alert));
    }

    #[test]
    fn test_repeated_detection_refreshes_single_alert() {
        let mut engine = AlertEngine::new();
        let later = now() + Duration::minutes(5);
        let moved = Some(GeoPoint::new(25.58, 91.9));

        let first = engine.detect(TOURIST, AlertType::Geofence, Severity::Medium, "near", here(), now());
        let second = engine.detect(TOURIST, AlertType::Geofence, Severity::High, "inside", moved, later);

        assert_eq!(first.id, second.id);
        assert_eq!(engine.len(), 1);
        assert_eq!(open_count(&engine), 1);
        assert_eq!(second.severity, Severity::High);
        assert_eq!(second.message, "inside");
        assert_eq!(second.location, moved);
        assert_eq!(second.created_at, now());
        assert_eq!(second.last_updated_at, later);
    }

    #[test]
    fn test_lower_severity_does_not_downgrade() {
        let mut engine = AlertEngine::new();
        let later = now() + Duration::minutes(5);

        engine.detect(TOURIST, AlertType::Geofence, Severity::Critical, "restricted", here(), now());
        let refreshed = engine.detect(TOURIST, AlertType::Geofence, Severity::Low, "border", here(), later);

        assert_eq!(refreshed.severity, Severity::Critical);
        assert_eq!(refreshed.message, "restricted");
        assert_eq!(refreshed.last_updated_at, now());
    }

    #[test]
    fn test_raise_skips_unchanged_alert() {
        let mut engine = AlertEngine::new();
        let later = now() + Duration::minutes(5);
        let message = "Tourist entered unsafe zone: Kaziranga".to_string();

        let first = engine
            .raise(TOURIST, AlertType::Geofence, Severity::Medium, message.clone(), here(), now())
            .unwrap();
        let repeated =
            engine.raise(TOURIST, AlertType::Geofence, Severity::Medium, message.clone(), here(), later);
        let moved = Some(GeoPoint::new(25.58, 91.9));
        let refreshed = engine
            .raise(TOURIST, AlertType::Geofence, Severity::Medium, message, moved, later)
            .unwrap();

        assert!(repeated.is_none());
        assert_eq!(refreshed.id, first.id);
        assert_eq!(refreshed.last_updated_at, later);
        assert_eq!(refreshed.location, moved);
    }

    #[test]
    fn test_resolution_never_precedes_last_update() {
        let mut engine = AlertEngine::new();
        let earlier = now() - Duration::minutes(150);

        let panic = engine.detect(TOURIST, AlertType::Panic, Severity::Critical, "panic", here(), now());
        engine.detect(TOURIST, AlertType::Inactive, Severity::Low, "idle", here(), now());

        let resolved = engine.resolve(panic.id, earlier).unwrap();
        let cleared = engine.auto_clear(TOURIST, AlertType::Inactive, earlier).unwrap();

        assert_eq!(resolved.resolved_at, Some(now()));
        assert_eq!(cleared.resolved_at, Some(now()));
        assert_eq!(engine.latest_activity(TOURIST), Some(now()));
        assert_eq!(engine.latest_activity("0xother"), None);
    }

    #[test]
    fn test_different_types_are_independent() {
        let mut engine = AlertEngine::new();

        let panic = engine.detect(TOURIST, AlertType::Panic, Severity::Critical, "panic", here(), now());
        let geofence = engine.detect(TOURIST, AlertType::Geofence, Severity::Medium, "zone", here(), now());
        let other = engine.detect("0xother", AlertType::Panic, Severity::Critical, "panic", here(), now());

        assert_ne!(panic.id, geofence.id);
        assert_ne!(panic.id, other.id);
        assert_eq!(open_count(&engine), 3);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut engine = AlertEngine::new();
        let alert = engine.detect(TOURIST, AlertType::Panic, Severity::Critical, "panic", here(), now());

        let first = engine.resolve(alert.id, now() + Duration::minutes(1)).unwrap();
        let second = engine.resolve(alert.id, now() + Duration::minutes(2)).unwrap();

        assert!(first.resolved);
        assert!(second.resolved);
        assert_eq!(second.resolved_at, Some(now() + Duration::minutes(1)));
        assert!(!engine.has_open(TOURIST, AlertType::Panic));
    }

    #[test]
    fn test_resolve_unknown_alert() {
        let mut engine = AlertEngine::new();

        assert!(matches!(
            engine.resolve(Uuid::new_v4(), now()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_detect_after_resolve_opens_new_alert() {
        let mut engine = AlertEngine::new();
        let first = engine.detect(TOURIST, AlertType::Panic, Severity::Critical, "panic", here(), now());
        engine.resolve(first.id, now()).unwrap();

        let second = engine.detect(TOURIST, AlertType::Panic, Severity::Critical, "panic", here(), now());

        assert_ne!(first.id, second.id);
        assert_eq!(engine.len(), 2);
        assert_eq!(open_count(&engine), 1);
    }

    #[test]
    fn test_auto_clear_follows_policy() {
        let mut engine = AlertEngine::new();
        engine.detect(TOURIST, AlertType::Inactive, Severity::Low, "idle", here(), now());
        engine.detect(TOURIST, AlertType::Panic, Severity::Critical, "panic", here(), now());

        let cleared = engine.auto_clear(TOURIST, AlertType::Inactive, now());
        assert!(cleared.is_some_and(|a| a.resolved));

        assert!(engine.auto_clear(TOURIST, AlertType::Panic, now()).is_none());
        assert!(engine.has_open(TOURIST, AlertType::Panic));

        // Nothing open any more.
        assert!(engine.auto_clear(TOURIST, AlertType::Inactive, now()).is_none());
    }

    #[test]
    fn test_clear_policy_per_type() {
        assert_eq!(clear_policy(AlertType::Panic), ClearPolicy::ManualOnly);
        assert_eq!(clear_policy(AlertType::Geofence), ClearPolicy::AutoClear);
        assert_eq!(clear_policy(AlertType::Inactive), ClearPolicy::AutoClear);
        assert_eq!(clear_policy(AlertType::RouteDeviation), ClearPolicy::AutoClear);
    }

    #[test]
    fn test_escalate_twice_yields_one_report() {
        let mut engine = AlertEngine::new();
        let mut ledger = IncidentLedger::new();
        let alert = engine.detect(TOURIST, AlertType::Panic, Severity::Critical, "panic", here(), now());

        let first = engine.escalate_to_incident(alert.id, now(), &mut ledger).unwrap();
        let second = engine
            .escalate_to_incident(alert.id, now() + Duration::minutes(1), &mut ledger)
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(ledger.len(), 1);
        let escalated = engine.get(alert.id).unwrap();
        assert!(escalated.incident_generated);
        assert!(escalated.is_open());
    }

    #[test]
    fn test_escalate_rejects_non_critical() {
        let mut engine = AlertEngine::new();
        let mut ledger = IncidentLedger::new();
        let alert = engine.detect(TOURIST, AlertType::Geofence, Severity::High, "zone", here(), now());

        assert!(matches!(
            engine.escalate_to_incident(alert.id, now(), &mut ledger),
            Err(Error::InvalidState(_))
        ));
        assert!(ledger.is_empty());
        assert!(!engine.get(alert.id).unwrap().incident_generated);
    }

    #[test]
    fn test_escalate_rejects_resolved() {
        let mut engine = AlertEngine::new();
        let mut ledger = IncidentLedger::new();
        let alert = engine.detect(TOURIST, AlertType::Panic, Severity::Critical, "panic", here(), now());
        engine.resolve(alert.id, now()).unwrap();

        assert!(matches!(
            engine.escalate_to_incident(alert.id, now(), &mut ledger),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_escalated_then_resolved_stays_escalated() {
        let mut engine = AlertEngine::new();
        let mut ledger = IncidentLedger::new();
        let alert = engine.detect(TOURIST, AlertType::Panic, Severity::Critical, "panic", here(), now());
        let report = engine.escalate_to_incident(alert.id, now(), &mut ledger).unwrap();

        let resolved = engine.resolve(alert.id, now()).unwrap();
        assert!(resolved.incident_generated);

        // Still a no-op returning the original report.
        let again = engine.escalate_to_incident(alert.id, now(), &mut ledger).unwrap();
        assert_eq!(again, report);
    }

    #[test]
    fn test_from_alerts_rejects_duplicate_open() {
        let mut engine = AlertEngine::new();
        let alert = engine.detect(TOURIST, AlertType::Panic, Severity::Critical, "panic", here(), now());
        let duplicate = Alert {
            id: Uuid::new_v4(),
            ..alert.clone()
        };

        assert!(matches!(
            AlertEngine::from_alerts(vec![alert, duplicate]),
            Err(Error::Precondition(_))
        ));
    }

    #[test]
    fn test_restore_undoes_changes() {
        let mut engine = AlertEngine::new();
        let panic = engine.detect(TOURIST, AlertType::Panic, Severity::Critical, "panic", here(), now());
        let checkpoint = engine.checkpoint(TOURIST);

        engine.resolve(panic.id, now()).unwrap();
        engine.detect(TOURIST, AlertType::Inactive, Severity::Low, "idle", here(), now());
        assert_eq!(engine.changed_since(&checkpoint).len(), 2);

        engine.restore(checkpoint);

        assert_eq!(engine.len(), 1);
        assert!(engine.has_open(TOURIST, AlertType::Panic));
        assert!(!engine.has_open(TOURIST, AlertType::Inactive));
    }

    #[test]
    fn test_list_filters() {
        let mut engine = AlertEngine::new();
        let resolved = engine.detect(TOURIST, AlertType::Inactive, Severity::Low, "idle", here(), now());
        engine.resolve(resolved.id, now()).unwrap();
        engine.detect(
            TOURIST,
            AlertType::Panic,
            Severity::Critical,
            "panic",
            here(),
            now() + Duration::minutes(1),
        );
        engine.detect("0xother", AlertType::Geofence, Severity::Medium, "zone", here(), now());

        let mine = engine.list(&AlertFilter {
            tourist_id: Some(TOURIST.to_string()),
            ..AlertFilter::default()
        });
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].alert_type, AlertType::Panic);

        let open_mine = engine.list(&AlertFilter {
            tourist_id: Some(TOURIST.to_string()),
            open_only: true,
            ..AlertFilter::default()
        });
        assert_eq!(open_mine.len(), 1);

        let geofence = engine.list(&AlertFilter {
            alert_type: Some(AlertType::Geofence),
            ..AlertFilter::default()
        });
        assert_eq!(geofence.len(), 1);
        assert_eq!(geofence[0].tourist_id, "0xother");
    }
}
