//! Planar and great-circle primitives used by zone evaluation and the
//! movement/route checks.
//!
//! Polygons are tested in plain lat/lng space. Zones are small enough that
//! the distortion of treating degrees as planar coordinates is irrelevant
//! for containment.

use crate::model::GeoPoint;

/// Mean Earth radius in meters (IUGG).
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Distance in degrees below which a point counts as lying on an edge.
const EDGE_TOLERANCE_DEGREES: f64 = 1e-9;

/// Ray-casting containment test.
///
/// The polygon is implicitly closed: the last vertex connects back to the
/// first, and an explicit closing vertex is harmless. Points on an edge or
/// vertex are classified as inside so that a tourist walking along a border
/// does not flap between inside and outside. Fewer than three vertices never
/// contain anything.
pub fn point_in_polygon(point: &GeoPoint, polygon: &[GeoPoint]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    let (x, y) = (point.lng, point.lat);

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (polygon[i].lng, polygon[i].lat);
        let (xj, yj) = (polygon[j].lng, polygon[j].lat);

        if on_segment(x, y, xi, yi, xj, yj) {
            return true;
        }

        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }

    inside
}

fn on_segment(px: f64, py: f64, ax: f64, ay: f64, bx: f64, by: f64) -> bool {
    let (dx, dy) = (bx - ax, by - ay);
    let length = dx.hypot(dy);

    if length == 0.0 {
        return (px - ax).hypot(py - ay) <= EDGE_TOLERANCE_DEGREES;
    }

    // Perpendicular distance from the supporting line.
    let cross = dx * (py - ay) - dy * (px - ax);
    if cross.abs() / length > EDGE_TOLERANCE_DEGREES {
        return false;
    }

    px >= ax.min(bx) - EDGE_TOLERANCE_DEGREES
        && px <= ax.max(bx) + EDGE_TOLERANCE_DEGREES
        && py >= ay.min(by) - EDGE_TOLERANCE_DEGREES
        && py <= ay.max(by) + EDGE_TOLERANCE_DEGREES
}

/// Great-circle distance between two points, in meters.
pub fn haversine_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().min(1.0).asin();

    EARTH_RADIUS_METERS * c
}

/// Distance from `point` to the closest of `targets`, or `None` when there
/// are no targets.
pub fn distance_to_nearest(point: &GeoPoint, targets: &[GeoPoint]) -> Option<f64> {
    targets
        .iter()
        .map(|target| haversine_distance(point, target))
        .min_by(|a, b| a.total_cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<GeoPoint> {
        vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 10.0),
            GeoPoint::new(10.0, 10.0),
            GeoPoint::new(10.0, 0.0),
        ]
    }

    /// GF001 from the demo catalog, a skewed quadrilateral.
    fn border_zone() -> Vec<GeoPoint> {
        vec![
            GeoPoint::new(25.1000, 89.7000),
            GeoPoint::new(25.2000, 89.9000),
            GeoPoint::new(25.1500, 90.0000),
            GeoPoint::new(25.0500, 89.8000),
        ]
    }

    #[test]
    fn test_strictly_inside() {
        assert!(point_in_polygon(&GeoPoint::new(5.0, 5.0), &square()));
        assert!(point_in_polygon(&GeoPoint::new(0.001, 9.999), &square()));
        assert!(point_in_polygon(&GeoPoint::new(25.125, 89.85), &border_zone()));
    }

    #[test]
    fn test_strictly_outside() {
        assert!(!point_in_polygon(&GeoPoint::new(15.0, 5.0), &square()));
        assert!(!point_in_polygon(&GeoPoint::new(-0.001, 5.0), &square()));
        assert!(!point_in_polygon(&GeoPoint::new(5.0, 10.001), &square()));
        assert!(!point_in_polygon(&GeoPoint::new(26.1445, 91.7362), &border_zone()));
    }

    #[test]
    fn test_edge_midpoint_counts_as_inside() {
        // Axis-aligned edges.
        assert!(point_in_polygon(&GeoPoint::new(0.0, 5.0), &square()));
        assert!(point_in_polygon(&GeoPoint::new(10.0, 5.0), &square()));
        assert!(point_in_polygon(&GeoPoint::new(5.0, 0.0), &square()));
        assert!(point_in_polygon(&GeoPoint::new(5.0, 10.0), &square()));

        // Diagonal edge between the first two vertices of GF001.
        assert!(point_in_polygon(&GeoPoint::new(25.15, 89.8), &border_zone()));
        // Closing edge between the last and first vertices.
        assert!(point_in_polygon(&GeoPoint::new(25.075, 89.75), &border_zone()));
    }

    #[test]
    fn test_vertices_count_as_inside() {
        for vertex in square() {
            assert!(point_in_polygon(&vertex, &square()));
        }
    }

    #[test]
    fn test_explicitly_closed_ring_matches_open_ring() {
        let open = border_zone();
        let mut closed = open.clone();
        closed.push(open[0]);

        for point in [
            GeoPoint::new(25.125, 89.85),
            GeoPoint::new(25.15, 89.8),
            GeoPoint::new(25.3, 89.8),
            GeoPoint::new(25.0, 89.75),
        ] {
            assert_eq!(
                point_in_polygon(&point, &open),
                point_in_polygon(&point, &closed)
            );
        }
    }

    #[test]
    fn test_degenerate_polygon_contains_nothing() {
        let line = vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0)];
        assert!(!point_in_polygon(&GeoPoint::new(0.5, 0.5), &line));
        assert!(!point_in_polygon(&GeoPoint::new(0.0, 0.0), &[]));
    }

    #[test]
    fn test_haversine_one_degree_of_latitude() {
        let d = haversine_distance(&GeoPoint::new(0.0, 0.0), &GeoPoint::new(1.0, 0.0));
        let expected = EARTH_RADIUS_METERS * std::f64::consts::PI / 180.0;
        assert!((d - expected).abs() < 1e-6);
    }

    #[test]
    fn test_haversine_guwahati_to_shillong() {
        let guwahati = GeoPoint::new(26.1445, 91.7362);
        let shillong = GeoPoint::new(25.5788, 91.8933);

        let d = haversine_distance(&guwahati, &shillong);
        assert!(d > 60_000.0 && d < 70_000.0, "distance was {d}");
        assert!((d - haversine_distance(&shillong, &guwahati)).abs() < 1e-6);
        assert_eq!(haversine_distance(&guwahati, &guwahati), 0.0);
    }

    #[test]
    fn test_distance_to_nearest() {
        let point = GeoPoint::new(0.0, 0.0);
        let targets = [GeoPoint::new(2.0, 0.0), GeoPoint::new(1.0, 0.0)];

        let nearest = distance_to_nearest(&point, &targets).unwrap();
        assert_eq!(nearest, haversine_distance(&point, &targets[1]));
        assert_eq!(distance_to_nearest(&point, &[]), None);
    }
}
