//! The monitoring service.
//!
//! [`Monitor`] owns the roster, the zone catalog, the alert registry and the
//! incident ledger. Every operation runs under one async lock, so updates for
//! a tourist are applied in arrival order and each detection is atomic per
//! (tourist, alert type).
//!
//! # Persistence
//!
//! A mutating operation writes everything it changed through
//! [`Persistence`] before it returns. When the write still fails after
//! retries the operation is undone and [`Error::Persistence`] is returned.
//! The exception is a tourist signal (position, panic, check-in, sweep) that
//! opened or refreshed a critical alert: its in-memory effect is kept and
//! the changes are queued for the next successful write.
//!
//! # Privacy
//!
//! Log lines identify tourists by identity id only.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alerts::{AlertEngine, AlertFilter, Checkpoint};
use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::geometry::{distance_to_nearest, haversine_distance};
use crate::identity::{IssuedIdentity, issue_identity};
use crate::incident::IncidentLedger;
use crate::model::{
    Alert, AlertLevel, AlertType, DashboardStats, GeoPoint, GeofenceZone, IncidentReport,
    RegistrationResponse, Severity, Tourist, TouristProfile, TouristStatus, TouristUpdate,
    ZoneType,
};
use crate::status::{self, Assessment};
use crate::storage::{Changeset, Persistence, Snapshot};
use crate::zones::{ZoneCatalog, ZoneMatch};

const PANIC_MESSAGE: &str = "Emergency panic button activated by tourist";

/// Outcome of one [`Monitor::sweep`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub evaluated: usize,
    pub alerts_changed: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct MonitorState {
    roster: HashMap<String, Tourist>,
    engine: AlertEngine,
    incidents: IncidentLedger,

    /// Changes kept in memory after a failed write.
    unsynced: Changeset,
}

/// What an operation on one tourist needs to be undone.
struct Undo {
    tourist_id: String,
    tourist: Option<Tourist>,
    alerts: Checkpoint,
    incidents: usize,
}

impl MonitorState {
    fn tourist(&self, tourist_id: &str) -> Result<&Tourist> {
        self.roster
            .get(tourist_id)
            .ok_or_else(|| Error::NotFound(format!("tourist {tourist_id}")))
    }

    fn tourist_mut(&mut self, tourist_id: &str) -> Result<&mut Tourist> {
        self.roster
            .get_mut(tourist_id)
            .ok_or_else(|| Error::NotFound(format!("tourist {tourist_id}")))
    }

    fn checkpoint(&self, tourist_id: &str) -> Undo {
        Undo {
            tourist_id: tourist_id.to_string(),
            tourist: self.roster.get(tourist_id).cloned(),
            alerts: self.engine.checkpoint(tourist_id),
            incidents: self.incidents.len(),
        }
    }

    fn changes_since(&self, undo: &Undo) -> Changeset {
        let tourists = self
            .roster
            .get(&undo.tourist_id)
            .filter(|current| undo.tourist.as_ref() != Some(*current))
            .cloned()
            .into_iter()
            .collect();

        let reports = self.incidents.reports();
        let incidents = reports[undo.incidents.min(reports.len())..].to_vec();

        Changeset {
            tourists,
            alerts: self.engine.changed_since(&undo.alerts),
            incidents,
        }
    }

    fn rollback(&mut self, undo: Undo) {
        match undo.tourist {
            Some(tourist) => {
                self.roster.insert(undo.tourist_id, tourist);
            }
            None => {
                self.roster.remove(&undo.tourist_id);
            }
        }
        self.engine.restore(undo.alerts);
        self.incidents.truncate(undo.incidents);
    }
}

/// The tourist safety monitor.
pub struct Monitor {
    state: Mutex<MonitorState>,
    zones: ZoneCatalog,
    config: MonitorConfig,
    store: Arc<dyn Persistence>,
}

impl Monitor {
    /// An empty monitor.
    pub fn new(zones: ZoneCatalog, config: MonitorConfig, store: Arc<dyn Persistence>) -> Self {
        Self {
            state: Mutex::new(MonitorState::default()),
            zones,
            config,
            store,
        }
    }

    /// A monitor resuming from persisted state.
    ///
    /// Fails with [`Error::Precondition`] if the snapshot holds duplicate open
    /// alerts or duplicate incident reports.
    pub fn from_snapshot(
        zones: ZoneCatalog,
        config: MonitorConfig,
        store: Arc<dyn Persistence>,
        snapshot: Snapshot,
    ) -> Result<Self> {
        let roster: HashMap<String, Tourist> = snapshot
            .tourists
            .into_iter()
            .map(|tourist| (tourist.identity_id.clone(), tourist))
            .collect();
        let engine = AlertEngine::from_alerts(snapshot.alerts)?;
        let incidents = IncidentLedger::from_reports(snapshot.incidents)?;

        info!(
            tourists = roster.len(),
            alerts = engine.len(),
            incidents = incidents.len(),
            "Monitor state restored"
        );

        Ok(Self {
            state: Mutex::new(MonitorState {
                roster,
                engine,
                incidents,
                unsynced: Changeset::default(),
            }),
            zones,
            config,
            store,
        })
    }

    /// Issue an identity for `profile` and add the tourist to the roster.
    ///
    /// Registering a profile whose identity is already on the roster returns
    /// the existing tourist.
    pub async fn register_tourist(
        &self,
        profile: TouristProfile,
        now: DateTime<Utc>,
    ) -> Result<RegistrationResponse> {
        let issued = self.issue(&profile, millis(now))?;

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if let Some(existing) = state.roster.get(&issued.identity_id) {
            debug!(tourist_id = %existing.identity_id, "Tourist already registered");
            return Ok(RegistrationResponse {
                tourist: existing.clone(),
                qr_payload: issued.qr_payload,
            });
        }

        let undo = state.checkpoint(&issued.identity_id);
        let issued_at = issued.credential.issued_at;
        let tourist = Tourist {
            identity_id: issued.identity_id.clone(),
            profile,
            credential: issued.credential,
            position: None,
            last_seen_at: issued_at,
            last_moved_at: issued_at,
            registered_at: issued_at,
            status: TouristStatus::Safe,
        };
        state.roster.insert(tourist.identity_id.clone(), tourist.clone());

        self.commit(state, undo, false).await?;

        info!(tourist_id = %tourist.identity_id, "Tourist registered");

        Ok(RegistrationResponse {
            tourist,
            qr_payload: issued.qr_payload,
        })
    }

    fn issue(&self, profile: &TouristProfile, now: DateTime<Utc>) -> Result<IssuedIdentity> {
        let attempts = self.config.retry.max_attempts.max(1);
        let mut issued_at = now;
        let mut attempt = 1;

        loop {
            match issue_identity(profile, issued_at) {
                Ok(issued) => return Ok(issued),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(attempt, error = %e, "Identity issuance failed, retrying");
                    attempt += 1;
                    issued_at += Duration::milliseconds(1);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Apply a location fix and re-evaluate the tourist.
    ///
    /// Fails with [`Error::Validation`] for an invalid point or a timestamp
    /// older than the tourist's last update.
    pub async fn update_position(
        &self,
        tourist_id: &str,
        position: GeoPoint,
        timestamp: DateTime<Utc>,
    ) -> Result<TouristUpdate> {
        position.validate()?;
        let timestamp = millis(timestamp);

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        reject_stale(state.tourist(tourist_id)?, timestamp)?;

        let undo = state.checkpoint(tourist_id);
        self.apply_fix(state.tourist_mut(tourist_id)?, position, timestamp);
        let alerts = self.evaluate(state, tourist_id, timestamp)?;

        self.finish(state, undo, alerts).await
    }

    /// Raise a panic alert for the tourist.
    ///
    /// `location` is applied as a position fix unless it is older than the
    /// tourist's last update. A stale panic is never rejected.
    pub async fn report_panic(
        &self,
        tourist_id: &str,
        location: Option<GeoPoint>,
        timestamp: DateTime<Utc>,
    ) -> Result<TouristUpdate> {
        if let Some(point) = &location {
            point.validate()?;
        }
        let timestamp = millis(timestamp);

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let fresh = timestamp >= state.tourist(tourist_id)?.last_seen_at;
        let undo = state.checkpoint(tourist_id);

        if let Some(point) = location.filter(|_| fresh) {
            self.apply_fix(state.tourist_mut(tourist_id)?, point, timestamp);
        }
        let position = location.or(state.tourist(tourist_id)?.position);

        let panic = state.engine.detect(
            tourist_id,
            AlertType::Panic,
            Severity::Critical,
            PANIC_MESSAGE,
            position,
            timestamp,
        );
        warn!(tourist_id, alert_id = %panic.id, "Panic reported");

        let mut alerts = vec![panic];
        alerts.extend(self.evaluate(state, tourist_id, timestamp)?);

        self.finish(state, undo, alerts).await
    }

    /// Record a manual check-in. Counts as movement, so it ends any
    /// inactivity.
    pub async fn check_in(
        &self,
        tourist_id: &str,
        location: Option<GeoPoint>,
        timestamp: DateTime<Utc>,
    ) -> Result<TouristUpdate> {
        if let Some(point) = &location {
            point.validate()?;
        }
        let timestamp = millis(timestamp);

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        reject_stale(state.tourist(tourist_id)?, timestamp)?;

        let undo = state.checkpoint(tourist_id);
        let tourist = state.tourist_mut(tourist_id)?;
        if let Some(point) = location {
            self.apply_fix(tourist, point, timestamp);
        }
        tourist.last_seen_at = timestamp;
        tourist.last_moved_at = timestamp;
        info!(tourist_id, "Tourist checked in");

        let alerts = self.evaluate(state, tourist_id, timestamp)?;

        self.finish(state, undo, alerts).await
    }

    /// Resolve an alert and re-derive the tourist's status. Resolving a
    /// resolved alert is a no-op.
    pub async fn resolve_alert(&self, alert_id: Uuid, now: DateTime<Utc>) -> Result<Alert> {
        let now = millis(now);
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let tourist_id = owner_of(&state.engine, alert_id)?;
        let undo = state.checkpoint(&tourist_id);

        let alert = state.engine.resolve(alert_id, now)?;
        if state.roster.contains_key(&tourist_id) {
            self.refresh_status(state, &tourist_id, now)?;
        }

        self.commit(state, undo, false).await?;
        Ok(alert)
    }

    /// Generate the incident report for a critical open alert. Escalating
    /// twice returns the same report.
    pub async fn escalate_to_incident(
        &self,
        alert_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<IncidentReport> {
        let now = millis(now);
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let tourist_id = owner_of(&state.engine, alert_id)?;
        let undo = state.checkpoint(&tourist_id);

        let report = state
            .engine
            .escalate_to_incident(alert_id, now, &mut state.incidents)?;

        self.commit(state, undo, false).await?;
        Ok(report)
    }

    /// Re-evaluate every tourist at `now`.
    ///
    /// Picks up inactivity without new position updates. A tourist whose
    /// changes cannot be written is counted in `failed` and skipped.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepSummary {
        let now = millis(now);
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let mut tourist_ids: Vec<String> = state.roster.keys().cloned().collect();
        tourist_ids.sort();

        let mut summary = SweepSummary::default();
        for tourist_id in tourist_ids {
            summary.evaluated += 1;
            let undo = state.checkpoint(&tourist_id);

            if let Err(e) = self.evaluate(state, &tourist_id, now) {
                summary.failed += 1;
                error!(tourist_id = %tourist_id, error = %e, "Sweep evaluation failed");
                continue;
            }

            let changed = state.engine.changed_since(&undo.alerts).len();
            match self.commit(state, undo, true).await {
                Ok(()) => summary.alerts_changed += changed,
                Err(e) => {
                    summary.failed += 1;
                    error!(tourist_id = %tourist_id, error = %e, "Sweep persistence failed");
                }
            }
        }

        debug!(
            evaluated = summary.evaluated,
            alerts_changed = summary.alerts_changed,
            failed = summary.failed,
            "Sweep complete"
        );
        summary
    }

    /// Write changes queued by earlier failed writes.
    pub async fn flush(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        if guard.unsynced.is_empty() {
            return Ok(());
        }

        let batch = guard.unsynced.clone();
        self.write(&batch).await?;
        guard.unsynced = Changeset::default();
        info!("Queued changes written");
        Ok(())
    }

    /// Whether changes are waiting for a successful write.
    pub async fn has_unsynced(&self) -> bool {
        !self.state.lock().await.unsynced.is_empty()
    }

    /// All tourists, oldest registration first.
    pub async fn tourists(&self) -> Vec<Tourist> {
        let state = self.state.lock().await;
        let mut tourists: Vec<Tourist> = state.roster.values().cloned().collect();
        tourists.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.identity_id.cmp(&b.identity_id))
        });
        tourists
    }

    pub async fn tourist(&self, tourist_id: &str) -> Result<Tourist> {
        self.state.lock().await.tourist(tourist_id).cloned()
    }

    pub fn zones(&self) -> &[GeofenceZone] {
        self.zones.zones()
    }

    pub async fn alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        self.state.lock().await.engine.list(filter)
    }

    pub async fn alert(&self, alert_id: Uuid) -> Result<Alert> {
        self.state
            .lock()
            .await
            .engine
            .get(alert_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("alert {alert_id}")))
    }

    /// All incident reports, oldest first.
    pub async fn incidents(&self) -> Vec<IncidentReport> {
        self.state.lock().await.incidents.reports().to_vec()
    }

    pub async fn incident(&self, incident_id: Uuid) -> Result<IncidentReport> {
        self.state
            .lock()
            .await
            .incidents
            .get(incident_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("incident {incident_id}")))
    }

    /// Counters for the authority dashboard.
    pub async fn stats(&self) -> DashboardStats {
        let state = self.state.lock().await;
        let mut stats = DashboardStats {
            active_tourists: state.roster.len(),
            total_alerts: state.engine.len(),
            incidents: state.incidents.len(),
            ..DashboardStats::default()
        };

        for tourist in state.roster.values() {
            match tourist.status {
                TouristStatus::Safe => stats.safe_tourists += 1,
                TouristStatus::Warning => stats.warning_tourists += 1,
                TouristStatus::Emergency => stats.emergency_tourists += 1,
            }
        }
        for alert in state.engine.iter() {
            if alert.is_open() {
                stats.open_alerts += 1;
            } else {
                stats.resolved_alerts += 1;
            }
            if alert.severity == Severity::Critical {
                stats.critical_alerts += 1;
            }
        }

        stats
    }

    fn apply_fix(&self, tourist: &mut Tourist, position: GeoPoint, timestamp: DateTime<Utc>) {
        let moved = tourist.position.is_none_or(|previous| {
            haversine_distance(&previous, &position) > self.config.movement_radius_meters
        });

        tourist.position = Some(position);
        tourist.last_seen_at = timestamp;
        if moved {
            tourist.last_moved_at = timestamp;
        }
    }

    fn assess(&self, engine: &AlertEngine, tourist: &Tourist, now: DateTime<Utc>) -> (Vec<ZoneMatch>, Assessment) {
        let matches = tourist
            .position
            .map(|position| self.zones.evaluate(&position))
            .unwrap_or_default();
        let panic_active = engine.has_open(&tourist.identity_id, AlertType::Panic);
        let assessment = status::assess(
            tourist,
            &matches,
            panic_active,
            now,
            self.config.inactivity_threshold,
        );
        (matches, assessment)
    }

    /// Drive the geofence, inactivity and route alerts of one tourist and
    /// store the resolved status. Returns the alerts that were opened,
    /// refreshed or cleared.
    ///
    /// Conditions are evaluated no earlier than the tourist's latest alert
    /// activity, so a late signal never resolves an alert before it opened.
    fn evaluate(
        &self,
        state: &mut MonitorState,
        tourist_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>> {
        let tourist = state.tourist(tourist_id)?.clone();
        let now = state
            .engine
            .latest_activity(tourist_id)
            .map_or(now, |latest| now.max(latest));
        let (matches, assessment) = self.assess(&state.engine, &tourist, now);
        let engine = &mut state.engine;
        let mut touched = Vec::new();

        match geofence_severity(&matches) {
            Some((severity, zone)) => {
                let message = format!(
                    "Tourist entered {} zone: {}",
                    zone_label(zone.zone_type),
                    zone.zone_name
                );
                // Another zone is another condition: the old alert clears.
                if engine
                    .open_alert(tourist_id, AlertType::Geofence)
                    .is_some_and(|open| open.message != message)
                {
                    touched.extend(engine.auto_clear(tourist_id, AlertType::Geofence, now));
                }
                touched.extend(engine.raise(
                    tourist_id,
                    AlertType::Geofence,
                    severity,
                    message,
                    tourist.position,
                    now,
                ));
            }
            None => touched.extend(engine.auto_clear(tourist_id, AlertType::Geofence, now)),
        }

        if assessment.inactive {
            let severity = if assessment.idle_for > self.config.inactivity_threshold * 2 {
                Severity::Medium
            } else {
                Severity::Low
            };
            touched.extend(engine.raise(
                tourist_id,
                AlertType::Inactive,
                severity,
                format!(
                    "No movement detected for {} minutes",
                    assessment.idle_for.num_minutes()
                ),
                tourist.position,
                now,
            ));
        } else {
            touched.extend(engine.auto_clear(tourist_id, AlertType::Inactive, now));
        }

        match route_distance(&tourist) {
            Some(distance) if distance > self.config.route_corridor_meters => {
                touched.extend(engine.raise(
                    tourist_id,
                    AlertType::RouteDeviation,
                    Severity::Medium,
                    format!(
                        "Tourist is {:.1} km away from the planned route",
                        distance / 1000.0
                    ),
                    tourist.position,
                    now,
                ))
            }
            _ => touched.extend(engine.auto_clear(tourist_id, AlertType::RouteDeviation, now)),
        }

        set_status(state, tourist_id, assessment.status)?;
        Ok(touched)
    }

    fn refresh_status(
        &self,
        state: &mut MonitorState,
        tourist_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let (_, assessment) = self.assess(&state.engine, state.tourist(tourist_id)?, now);
        set_status(state, tourist_id, assessment.status)
    }

    async fn finish(
        &self,
        state: &mut MonitorState,
        undo: Undo,
        alerts: Vec<Alert>,
    ) -> Result<TouristUpdate> {
        let tourist_id = undo.tourist_id.clone();
        self.commit(state, undo, true).await?;

        Ok(TouristUpdate {
            tourist: state.tourist(&tourist_id)?.clone(),
            alerts,
        })
    }

    /// Persist what changed since `undo` was taken, together with any queued
    /// changes. On failure the operation is rolled back, unless
    /// `keep_critical` is set and an open critical alert is among the changes.
    async fn commit(&self, state: &mut MonitorState, undo: Undo, keep_critical: bool) -> Result<()> {
        let changes = state.changes_since(&undo);
        if changes.is_empty() {
            return Ok(());
        }

        let retain = keep_critical
            && changes
                .alerts
                .iter()
                .any(|alert| alert.is_open() && alert.severity == Severity::Critical);

        let mut batch = state.unsynced.clone();
        batch.merge(changes);

        match self.write(&batch).await {
            Ok(()) => {
                state.unsynced = Changeset::default();
                Ok(())
            }
            Err(e) if retain => {
                error!(
                    tourist_id = %undo.tourist_id,
                    error = %e,
                    "Persistence failed, keeping critical alert state in memory"
                );
                state.unsynced = batch;
                Err(e)
            }
            Err(e) => {
                warn!(
                    tourist_id = %undo.tourist_id,
                    error = %e,
                    "Persistence failed, operation rolled back"
                );
                state.rollback(undo);
                Err(e)
            }
        }
    }

    async fn write(&self, batch: &Changeset) -> Result<()> {
        let store = self.store.as_ref();
        self.config
            .retry
            .run("persist", move || store.persist(batch))
            .await
            .map_err(|e| Error::Persistence(format!("{e:#}")))
    }
}

fn reject_stale(tourist: &Tourist, timestamp: DateTime<Utc>) -> Result<()> {
    if timestamp < tourist.last_seen_at {
        warn!(tourist_id = %tourist.identity_id, "Rejected out-of-order update");
        return Err(Error::Validation(format!(
            "timestamp {timestamp} is older than the last update at {}",
            tourist.last_seen_at
        )));
    }
    Ok(())
}

/// Timestamps are kept at millisecond precision, the precision they are
/// stored with.
fn millis(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.trunc_subsecs(3)
}

fn owner_of(engine: &AlertEngine, alert_id: Uuid) -> Result<String> {
    engine
        .get(alert_id)
        .map(|alert| alert.tourist_id.clone())
        .ok_or_else(|| Error::NotFound(format!("alert {alert_id}")))
}

fn set_status(state: &mut MonitorState, tourist_id: &str, status: TouristStatus) -> Result<()> {
    let tourist = state.tourist_mut(tourist_id)?;
    if tourist.status != status {
        info!(
            tourist_id,
            from = ?tourist.status,
            to = ?status,
            "Tourist status changed"
        );
        tourist.status = status;
    }
    Ok(())
}

/// Severity of a geofence alert for one zone. `None` for a safe zone with a
/// low alert level.
fn zone_severity(zone: &ZoneMatch) -> Option<Severity> {
    if zone.zone_type == ZoneType::Restricted {
        Some(Severity::Critical)
    } else if zone.alert_level == AlertLevel::High {
        Some(Severity::High)
    } else if zone.zone_type == ZoneType::Unsafe || zone.alert_level == AlertLevel::Medium {
        Some(Severity::Medium)
    } else if zone.zone_type == ZoneType::Border {
        Some(Severity::Low)
    } else {
        None
    }
}

/// The riskiest zone among `matches` and its severity. The first zone wins
/// ties.
fn geofence_severity(matches: &[ZoneMatch]) -> Option<(Severity, &ZoneMatch)> {
    matches
        .iter()
        .filter_map(|zone| zone_severity(zone).map(|severity| (severity, zone)))
        .fold(None, |best, candidate| match best {
            Some((severity, _)) if severity >= candidate.0 => best,
            _ => Some(candidate),
        })
}

fn zone_label(zone_type: ZoneType) -> &'static str {
    match zone_type {
        ZoneType::Safe => "safe",
        ZoneType::Unsafe => "unsafe",
        ZoneType::Restricted => "restricted",
        ZoneType::Border => "border",
    }
}

/// Distance from the tourist to the nearest planned waypoint.
fn route_distance(tourist: &Tourist) -> Option<f64> {
    let position = tourist.position?;
    distance_to_nearest(&position, &tourist.profile.planned_waypoints)
}
