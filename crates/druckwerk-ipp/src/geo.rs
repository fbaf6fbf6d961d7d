// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Approximate distance between `geo:` URIs for the Get-Printers filter.

/// Distance returned for malformed geo: values.
pub const GEO_ERROR_DISTANCE: f64 = 999_999.0;

const METERS_PER_DEGREE: f64 = 111_120.0;

/// Parsed `geo:lat,lon[,alt][;u=uncertainty]` value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl GeoLocation {
    /// Parse a `geo:` URI.  The `;u=` uncertainty parameter is ignored.
    pub fn parse(uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix("geo:")?;
        let rest = rest.split(';').next()?;
        let mut parts = rest.split(',');

        let latitude: f64 = parts.next()?.trim().parse().ok()?;
        let longitude: f64 = parts.next()?.trim().parse().ok()?;
        let altitude: f64 = match parts.next() {
            Some(alt) => alt.trim().parse().ok()?,
            None => 0.0,
        };

        Some(Self {
            latitude,
            longitude,
            altitude,
        })
    }
}

/// Approximate the distance in meters between two `geo:` values.
///
/// Angular distance on a sphere scaled by meters-per-degree; good for
/// local comparisons only, not navigation.  Malformed values yield
/// [`GEO_ERROR_DISTANCE`].
pub fn wgs84_distance(a: &str, b: &str) -> f64 {
    let (Some(a), Some(b)) = (GeoLocation::parse(a), GeoLocation::parse(b)) else {
        return GEO_ERROR_DISTANCE;
    };

    let d_lat = METERS_PER_DEGREE * (a.latitude - b.latitude);
    let d_lon = METERS_PER_DEGREE
        * ((a.latitude + b.latitude) * std::f64::consts::PI / 360.0).cos()
        * (a.longitude - b.longitude);
    let d_alt = a.altitude - b.altitude;

    (d_lat * d_lat + d_lon * d_lon + d_alt * d_alt).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lat_lon_alt_and_uncertainty() {
        let g = GeoLocation::parse("geo:37.33182,-122.03118,10;u=35").unwrap();
        assert_eq!(g.latitude, 37.33182);
        assert_eq!(g.longitude, -122.03118);
        assert_eq!(g.altitude, 10.0);

        let g = GeoLocation::parse("geo:51.5,0.0").unwrap();
        assert_eq!(g.altitude, 0.0);
    }

    #[test]
    fn malformed_values_yield_error_distance() {
        assert_eq!(wgs84_distance("geo:abc", "geo:1,2"), GEO_ERROR_DISTANCE);
        assert_eq!(wgs84_distance("1,2", "geo:1,2"), GEO_ERROR_DISTANCE);
    }

    #[test]
    fn identical_points_are_zero_meters() {
        assert_eq!(wgs84_distance("geo:51.5,-0.1", "geo:51.5,-0.1"), 0.0);
    }

    #[test]
    fn one_degree_of_latitude_is_about_111km() {
        let d = wgs84_distance("geo:51.0,0.0", "geo:52.0,0.0");
        assert!((d - 111_120.0).abs() < 1.0, "got {d}");
    }
}
