//! Zone evaluation and the geofence catalog.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::geometry::point_in_polygon;
use crate::model::{AlertLevel, GeoPoint, GeofenceZone, ZoneType};

/// A zone that contains the evaluated position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneMatch {
    pub zone_id: String,
    pub zone_name: String,
    pub zone_type: ZoneType,
    pub alert_level: AlertLevel,
}

impl From<&GeofenceZone> for ZoneMatch {
    fn from(zone: &GeofenceZone) -> Self {
        Self {
            zone_id: zone.id.clone(),
            zone_name: zone.name.clone(),
            zone_type: zone.zone_type,
            alert_level: zone.alert_level,
        }
    }
}

/// Every zone containing `position`, highest alert level first.
///
/// Zones with equal alert levels keep their catalog order. An empty result
/// means the position is outside every defined zone, which is not the same
/// as being in a safe zone.
pub fn evaluate(position: &GeoPoint, zones: &[GeofenceZone]) -> Vec<ZoneMatch> {
    let mut matches: Vec<ZoneMatch> = zones
        .iter()
        .filter(|zone| point_in_polygon(position, &zone.polygon))
        .map(ZoneMatch::from)
        .collect();

    // Stable sort keeps catalog order among equal levels.
    matches.sort_by(|a, b| b.alert_level.cmp(&a.alert_level));
    matches
}

/// Validated, immutable set of geofence zones.
#[derive(Debug, Clone, Default)]
pub struct ZoneCatalog {
    zones: Vec<GeofenceZone>,
}

impl ZoneCatalog {
    /// Build a catalog, validating every zone and rejecting duplicate ids.
    pub fn new(zones: Vec<GeofenceZone>) -> Result<Self> {
        let mut seen = HashSet::new();
        for zone in &zones {
            zone.validate()?;
            if !seen.insert(zone.id.as_str()) {
                return Err(Error::Validation(format!("duplicate zone id {}", zone.id)));
            }
        }
        Ok(Self { zones })
    }

    /// Parse a JSON array of zones.
    pub fn from_json(json: &str) -> Result<Self> {
        let zones: Vec<GeofenceZone> = serde_json::from_str(json)
            .map_err(|e| Error::Validation(format!("invalid zone catalog: {e}")))?;
        Self::new(zones)
    }

    /// Load a JSON zone catalog from disk.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading zone catalog {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("parsing zone catalog {}", path.display()))
    }

    pub fn zones(&self) -> &[GeofenceZone] {
        &self.zones
    }

    pub fn evaluate(&self, position: &GeoPoint) -> Vec<ZoneMatch> {
        evaluate(position, &self.zones)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(id: &str, zone_type: ZoneType, alert_level: AlertLevel, offset: f64) -> GeofenceZone {
        GeofenceZone {
            id: id.to_string(),
            name: format!("Zone {id}"),
            polygon: vec![
                GeoPoint::new(offset, offset),
                GeoPoint::new(offset, offset + 10.0),
                GeoPoint::new(offset + 10.0, offset + 10.0),
                GeoPoint::new(offset + 10.0, offset),
            ],
            zone_type,
            alert_level,
            description: String::new(),
        }
    }

    #[test]
    fn test_no_match_is_empty() {
        let zones = vec![zone("A", ZoneType::Unsafe, AlertLevel::Medium, 0.0)];

        assert!(evaluate(&GeoPoint::new(50.0, 50.0), &zones).is_empty());
    }

    #[test]
    fn test_overlapping_zones_ordered_by_alert_level() {
        let zones = vec![
            zone("low", ZoneType::Border, AlertLevel::Low, 0.0),
            zone("medium", ZoneType::Unsafe, AlertLevel::Medium, 2.0),
            zone("high", ZoneType::Restricted, AlertLevel::High, 4.0),
        ];

        let matches = evaluate(&GeoPoint::new(5.0, 5.0), &zones);
        let ids: Vec<&str> = matches.iter().map(|m| m.zone_id.as_str()).collect();

        assert_eq!(ids, vec!["high", "medium", "low"]);
    }

    #[test]
    fn test_equal_levels_keep_catalog_order() {
        let zones = vec![
            zone("first", ZoneType::Unsafe, AlertLevel::Medium, 0.0),
            zone("second", ZoneType::Border, AlertLevel::Medium, 1.0),
        ];

        let matches = evaluate(&GeoPoint::new(5.0, 5.0), &zones);

        assert_eq!(matches[0].zone_id, "first");
        assert_eq!(matches[1].zone_id, "second");
    }

    #[test]
    fn test_catalog_rejects_duplicate_ids() {
        let zones = vec![
            zone("A", ZoneType::Unsafe, AlertLevel::Medium, 0.0),
            zone("A", ZoneType::Border, AlertLevel::Low, 20.0),
        ];

        assert!(matches!(ZoneCatalog::new(zones), Err(Error::Validation(_))));
    }

    #[test]
    fn test_catalog_from_json() {
        let json = r#"[{
            "id": "GF001",
            "name": "International Border - Bangladesh",
            "type": "restricted",
            "alert_level": "high",
            "polygon": [
                {"lat": 25.10, "lng": 89.70},
                {"lat": 25.20, "lng": 89.90},
                {"lat": 25.15, "lng": 90.00},
                {"lat": 25.05, "lng": 89.80}
            ],
            "description": "International border area - restricted access"
        }]"#;

        let catalog = ZoneCatalog::from_json(json).unwrap();
        assert_eq!(catalog.zones().len(), 1);

        let matches = catalog.evaluate(&GeoPoint::new(25.125, 89.85));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].zone_type, ZoneType::Restricted);
    }

    #[test]
    fn test_bundled_catalog_is_valid() {
        let catalog = ZoneCatalog::from_json(include_str!("../data/zones.json")).unwrap();

        let ids: Vec<&str> = catalog.zones().iter().map(|z| z.id.as_str()).collect();
        assert_eq!(ids, vec!["GF001", "GF002"]);
        assert_eq!(catalog.evaluate(&GeoPoint::new(26.61, 93.85))[0].zone_id, "GF002");
    }

    #[test]
    fn test_load_names_missing_catalog() {
        let path = Path::new("data/no-such-zones.json");

        let error = ZoneCatalog::load(path).unwrap_err();

        let message = format!("{error:#}");
        assert!(message.contains("reading zone catalog"), "{message}");
        assert!(message.contains("no-such-zones.json"), "{message}");
    }

    #[test]
    fn test_catalog_rejects_malformed_json() {
        assert!(matches!(
            ZoneCatalog::from_json("{not json"),
            Err(Error::Validation(_))
        ));
    }
}
