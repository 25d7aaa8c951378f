//! Spherical geometry for product start locations

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Earth radius used for distance computations, in meters
pub const EARTH_RADIUS_METERS: f64 = 6_378_100.0;
/// Earth radius in miles for converting a distance to radians
pub const EARTH_RADIUS_MILES: f64 = 3963.2;
/// Earth radius in kilometers for converting a distance to radians
pub const EARTH_RADIUS_KM: f64 = 6378.1;

pub const LATLNG_FORMAT_ERROR: &str =
    "Please provide latitude and longitude in the format lat,lng.";

/// Central angle between `($1, $2)` (lat, lng in degrees) and a product's
/// start location, in radians.
pub const CENTRAL_ANGLE_SQL: &str = r#"
    2 * ASIN(SQRT(LEAST(1.0,
        POWER(SIN(RADIANS(start_lat - $1) / 2), 2)
        + COS(RADIANS($1)) * COS(RADIANS(start_lat))
        * POWER(SIN(RADIANS(start_lng - $2) / 2), 2)
    )))
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceUnit {
    Miles,
    Kilometers,
}

impl DistanceUnit {
    /// `mi` selects miles; anything else is kilometers
    pub fn from_path(unit: &str) -> Self {
        if unit == "mi" {
            DistanceUnit::Miles
        } else {
            DistanceUnit::Kilometers
        }
    }

    pub fn earth_radius(self) -> f64 {
        match self {
            DistanceUnit::Miles => EARTH_RADIUS_MILES,
            DistanceUnit::Kilometers => EARTH_RADIUS_KM,
        }
    }

    /// Factor turning meters into this unit
    pub fn meters_multiplier(self) -> f64 {
        match self {
            DistanceUnit::Miles => 0.000621371,
            DistanceUnit::Kilometers => 0.001,
        }
    }
}

/// Convert a distance in `unit` to an angular radius in radians
pub fn radius_radians(distance: f64, unit: DistanceUnit) -> f64 {
    distance / unit.earth_radius()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Please provide latitude and longitude in the format lat,lng.")]
pub struct LatLngParseError;

impl LatLng {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Central angle to another point (haversine), in radians
    pub fn central_angle(&self, other: &LatLng) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos()
                * other.lat.to_radians().cos()
                * (d_lng / 2.0).sin().powi(2);
        2.0 * a.min(1.0).sqrt().asin()
    }

    pub fn distance_meters(&self, other: &LatLng) -> f64 {
        self.central_angle(other) * EARTH_RADIUS_METERS
    }
}

impl FromStr for LatLng {
    type Err = LatLngParseError;

    /// Parse `lat,lng`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lat, lng) = s.split_once(',').ok_or(LatLngParseError)?;
        let point = LatLng {
            lat: lat.trim().parse().map_err(|_| LatLngParseError)?,
            lng: lng.trim().parse().map_err(|_| LatLngParseError)?,
        };
        if point.is_valid() {
            Ok(point)
        } else {
            Err(LatLngParseError)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_latlng() {
        let p: LatLng = "34.111745,-118.113491".parse().unwrap();
        assert!((p.lat - 34.111745).abs() < 1e-9);
        assert!((p.lng + 118.113491).abs() < 1e-9);

        assert_eq!(" 1.5 , 2.5 ".parse::<LatLng>().unwrap(), LatLng { lat: 1.5, lng: 2.5 });
    }

    #[test]
    fn test_parse_latlng_rejects_malformed() {
        for bad in ["", "34.1", "34.1,", ",-118", "a,b", "91,0", "0,181", "NaN,0"] {
            assert_eq!(bad.parse::<LatLng>(), Err(LatLngParseError), "{bad}");
        }
        assert_eq!(LatLngParseError.to_string(), LATLNG_FORMAT_ERROR);
    }

    #[test]
    fn test_unit_selection() {
        assert_eq!(DistanceUnit::from_path("mi"), DistanceUnit::Miles);
        assert_eq!(DistanceUnit::from_path("km"), DistanceUnit::Kilometers);
        assert_eq!(DistanceUnit::from_path("parsecs"), DistanceUnit::Kilometers);
    }

    #[test]
    fn test_radius_radians() {
        assert!((radius_radians(3963.2, DistanceUnit::Miles) - 1.0).abs() < 1e-12);
        assert!((radius_radians(233.0, DistanceUnit::Kilometers) - 233.0 / 6378.1).abs() < 1e-12);
    }

    #[test]
    fn test_distance_between_known_points() {
        // Los Angeles to San Francisco, roughly 559 km
        let la = LatLng { lat: 34.0522, lng: -118.2437 };
        let sf = LatLng { lat: 37.7749, lng: -122.4194 };
        let km = la.distance_meters(&sf) * DistanceUnit::Kilometers.meters_multiplier();
        assert!((550.0..570.0).contains(&km), "got {km}");

        let miles = la.distance_meters(&sf) * DistanceUnit::Miles.meters_multiplier();
        assert!((340.0..355.0).contains(&miles), "got {miles}");
    }

    #[test]
    fn test_zero_distance() {
        let p = LatLng { lat: 10.0, lng: 20.0 };
        assert_eq!(p.central_angle(&p), 0.0);
    }
}
