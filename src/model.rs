//! Data models for Tourguard.
//!
//! Every entity here has a stable JSON shape so that the roster, zone
//! catalog, alert registry and incident store can be exchanged with other
//! systems without a bespoke wire format.
//!
//! # Privacy
//!
//! Profile fields (name, passport, phone) are stored for the authorities'
//! use but are never written to logs. Log lines refer to tourists by their
//! issued identity only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::identity::Credential;

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Reject non-finite or out-of-range coordinates.
    pub fn validate(&self) -> Result<()> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(Error::Validation(format!(
                "latitude {} is outside [-90, 90]",
                self.lat
            )));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(Error::Validation(format!(
                "longitude {} is outside [-180, 180]",
                self.lng
            )));
        }
        Ok(())
    }
}

/// The derived safety status of a tourist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TouristStatus {
    /// No risk zone, recent activity, no panic.
    Safe,

    /// Inside an unsafe or medium-risk zone, or inactive past the threshold.
    Warning,

    /// Panic signalled, or inside a restricted or high-risk zone.
    Emergency,
}

/// Reference data collected at registration.
///
/// Immutable once the identity has been issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TouristProfile {
    pub full_name: String,
    pub nationality: String,
    pub passport_number: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub emergency_contact: String,
    /// Free-text itinerary, e.g. "Guwahati -> Kaziranga -> Shillong".
    #[serde(default)]
    pub planned_route: String,
    /// Optional waypoints of the planned route. When present, positions far
    /// from every waypoint raise a route deviation alert.
    #[serde(default)]
    pub planned_waypoints: Vec<GeoPoint>,
}

/// A registered visitor under monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tourist {
    /// Issued identity, `0x` followed by 32 hex characters.
    pub identity_id: String,

    pub profile: TouristProfile,

    /// The credential embedded in the tourist's scannable code.
    pub credential: Credential,

    /// Last known position. `None` until the first location update.
    pub position: Option<GeoPoint>,

    /// Most recent position update, check-in or registration.
    pub last_seen_at: DateTime<Utc>,

    /// Last time the tourist moved beyond the movement radius, or checked in.
    pub last_moved_at: DateTime<Utc>,

    pub registered_at: DateTime<Utc>,

    /// Derived by the status resolver; never set by clients.
    pub status: TouristStatus,
}

impl Tourist {
    /// Start of the current idle period.
    ///
    /// `last_moved_at` never exceeds `last_seen_at`, so this is the earlier of
    /// the two and covers both "not heard from" and "not moving".
    pub fn idle_since(&self) -> DateTime<Utc> {
        self.last_moved_at.min(self.last_seen_at)
    }
}

/// Risk classification of a geofence zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneType {
    Safe,
    Unsafe,
    Restricted,
    Border,
}

/// Alert level of a zone. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Low,
    Medium,
    High,
}

/// A named polygonal region with a risk classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceZone {
    pub id: String,
    pub name: String,

    /// Vertices of a simple ring. The last vertex implicitly connects to the
    /// first; a repeated closing vertex is accepted too.
    pub polygon: Vec<GeoPoint>,

    #[serde(rename = "type")]
    pub zone_type: ZoneType,

    pub alert_level: AlertLevel,

    #[serde(default)]
    pub description: String,
}

impl GeofenceZone {
    /// Check the zone definition: non-empty id and at least three valid
    /// vertices.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("zone id must not be blank".into()));
        }
        if self.polygon.len() < 3 {
            return Err(Error::Validation(format!(
                "zone {} has {} vertices, at least 3 are required",
                self.id,
                self.polygon.len()
            )));
        }
        for vertex in &self.polygon {
            vertex.validate()?;
        }
        Ok(())
    }
}

/// What kind of condition an alert reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Geofence,
    Panic,
    Inactive,
    RouteDeviation,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Geofence => "geofence",
            AlertType::Panic => "panic",
            AlertType::Inactive => "inactive",
            AlertType::RouteDeviation => "route_deviation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "geofence" => Some(AlertType::Geofence),
            "panic" => Some(AlertType::Panic),
            "inactive" => Some(AlertType::Inactive),
            "route_deviation" => Some(AlertType::RouteDeviation),
            _ => None,
        }
    }
}

/// Alert severity. Ordered `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// A detected safety-relevant event tied to one tourist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub tourist_id: String,

    #[serde(rename = "type")]
    pub alert_type: AlertType,

    pub severity: Severity,
    pub message: String,

    /// Where the tourist was when the alert was raised or last refreshed.
    /// `None` if the tourist had no position fix yet.
    pub location: Option<GeoPoint>,

    pub created_at: DateTime<Utc>,

    /// Last time a detection refreshed this alert.
    pub last_updated_at: DateTime<Utc>,

    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,

    /// Set once an incident report has been generated. Never reverts.
    pub incident_generated: bool,
}

impl Alert {
    pub fn is_open(&self) -> bool {
        !self.resolved
    }
}

/// Immutable record of an escalated alert (E-FIR).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentReport {
    pub id: Uuid,

    /// Human-readable reference, `EFIR-<YYYYMMDD>-<alert id prefix>`.
    pub reference: String,

    pub source_alert_id: Uuid,
    pub tourist_id: String,
    pub generated_at: DateTime<Utc>,

    /// The alert as it was when the report was generated.
    pub alert: Alert,
}

/// Request body for POST /tourists/:id/position.
#[derive(Debug, Clone, Deserialize)]
pub struct PositionRequest {
    pub lat: f64,
    pub lng: f64,

    /// Time of the fix. Defaults to the server clock.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Request body for the panic and check-in endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignalRequest {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    /// Position at the time of the signal, if the device has a fix.
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

/// Response for POST /tourists.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationResponse {
    pub tourist: Tourist,

    /// Compact JSON embedded in the tourist's scannable code.
    pub qr_payload: String,
}

/// Response for the location, panic and check-in endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct TouristUpdate {
    pub tourist: Tourist,

    /// Alerts created, refreshed or auto-cleared by this update.
    pub alerts: Vec<Alert>,
}

/// Query parameters for GET /alerts.
#[derive(Debug, Default, Deserialize)]
pub struct AlertsQuery {
    pub tourist_id: Option<String>,

    /// Only unresolved alerts (default: false).
    #[serde(default)]
    pub open_only: bool,

    #[serde(rename = "type")]
    pub alert_type: Option<AlertType>,
}

/// Response for GET /alerts.
#[derive(Debug, Clone, Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<Alert>,
}

/// Response for GET /tourists.
#[derive(Debug, Clone, Serialize)]
pub struct TouristsResponse {
    pub tourists: Vec<Tourist>,
}

/// Response for GET /zones.
#[derive(Debug, Clone, Serialize)]
pub struct ZonesResponse {
    pub zones: Vec<GeofenceZone>,
}

/// Response for GET /incidents.
#[derive(Debug, Clone, Serialize)]
pub struct IncidentsResponse {
    pub incidents: Vec<IncidentReport>,
}

/// Response for GET /stats, the authority dashboard counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardStats {
    pub active_tourists: usize,
    pub safe_tourists: usize,
    pub warning_tourists: usize,
    pub emergency_tourists: usize,
    pub total_alerts: usize,
    pub open_alerts: usize,
    pub critical_alerts: usize,
    pub resolved_alerts: usize,
    pub incidents: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_validation() {
        assert!(GeoPoint::new(26.1445, 91.7362).validate().is_ok());
        assert!(GeoPoint::new(90.0, -180.0).validate().is_ok());
        assert!(GeoPoint::new(90.5, 0.0).validate().is_err());
        assert!(GeoPoint::new(0.0, 181.0).validate().is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).validate().is_err());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
        assert!(AlertLevel::Low < AlertLevel::High);
    }

    #[test]
    fn test_zone_requires_three_vertices() {
        let mut zone = GeofenceZone {
            id: "GF001".to_string(),
            name: "Border".to_string(),
            polygon: vec![GeoPoint::new(25.1, 89.7), GeoPoint::new(25.2, 89.9)],
            zone_type: ZoneType::Restricted,
            alert_level: AlertLevel::High,
            description: String::new(),
        };
        assert!(matches!(zone.validate(), Err(Error::Validation(_))));

        zone.polygon.push(GeoPoint::new(25.15, 90.0));
        assert!(zone.validate().is_ok());
    }

    #[test]
    fn test_zone_json_shape() {
        let json = r#"{
            "id": "GF002",
            "name": "Dense Forest Area",
            "type": "unsafe",
            "alert_level": "medium",
            "polygon": [
                {"lat": 26.5, "lng": 93.8},
                {"lat": 26.6, "lng": 94.0},
                {"lat": 26.7, "lng": 93.9}
            ]
        }"#;

        let zone: GeofenceZone = serde_json::from_str(json).unwrap();
        assert_eq!(zone.zone_type, ZoneType::Unsafe);
        assert_eq!(zone.alert_level, AlertLevel::Medium);
        assert_eq!(zone.polygon.len(), 3);
        assert!(zone.description.is_empty());
    }

    #[test]
    fn test_alert_type_names() {
        for alert_type in [
            AlertType::Geofence,
            AlertType::Panic,
            AlertType::Inactive,
            AlertType::RouteDeviation,
        ] {
            assert_eq!(AlertType::parse(alert_type.as_str()), Some(alert_type));
            assert_eq!(
                serde_json::to_value(alert_type).unwrap(),
                serde_json::Value::String(alert_type.as_str().to_string())
            );
        }
        assert_eq!(AlertType::parse("flood"), None);
    }
}
