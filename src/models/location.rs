// src/models/location.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{PoolmateError, PoolmateResult};
use crate::utils::geo::haversine_km;

/// The one coordinate representation used past the API boundary.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> PoolmateResult<Self> {
        if !longitude.is_finite() || !latitude.is_finite() {
            return Err(PoolmateError::invalid_geometry("coordinates must be finite numbers"));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(PoolmateError::invalid_geometry(format!(
                "longitude {longitude} outside [-180, 180]"
            )));
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(PoolmateError::invalid_geometry(format!(
                "latitude {latitude} outside [-90, 90]"
            )));
        }
        Ok(Self { longitude, latitude })
    }

    pub fn as_pair(&self) -> (f64, f64) {
        (self.longitude, self.latitude)
    }

    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine_km(self.as_pair(), other.as_pair())
    }
}

/// A point plus the human-readable address the rider typed.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Place {
    pub location: GeoPoint,
    pub address: String,
}

/// Last known position of a person, with its freshness.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LocationFix {
    pub point: GeoPoint,
    pub last_updated: DateTime<Utc>,
}

impl LocationFix {
    pub fn now(point: GeoPoint) -> Self {
        Self {
            point,
            last_updated: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LocationSource {
    #[default]
    Gps,
    Network,
    Manual,
}

/// Wire shape for a point. Clients send GeoJSON (`{"type": "Point", "coordinates": [lng, lat]}`)
/// or flat `latitude`/`longitude` (`lat`/`lng`) fields; both normalise to a [`GeoPoint`].
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PointInput {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub coordinates: Option<Vec<f64>>,
    #[serde(default, alias = "lat")]
    pub latitude: Option<f64>,
    #[serde(default, alias = "lng", alias = "lon")]
    pub longitude: Option<f64>,
}

impl PointInput {
    pub fn from_lat_lng(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            ..Default::default()
        }
    }

    pub fn normalize(&self) -> PoolmateResult<GeoPoint> {
        if let Some(kind) = &self.kind {
            if kind != "Point" {
                return Err(PoolmateError::invalid_geometry(format!(
                    "unsupported geometry type '{kind}'"
                )));
            }
        }

        match (&self.coordinates, self.latitude, self.longitude) {
            (Some(coordinates), _, _) => match coordinates.as_slice() {
                [longitude, latitude] => GeoPoint::new(*longitude, *latitude),
                other => Err(PoolmateError::invalid_geometry(format!(
                    "coordinates must be a [longitude, latitude] pair, got {} values",
                    other.len()
                ))),
            },
            (None, Some(latitude), Some(longitude)) => GeoPoint::new(longitude, latitude),
            _ => Err(PoolmateError::invalid_geometry("missing coordinates")),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PlaceInput {
    #[serde(flatten)]
    pub point: PointInput,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl PlaceInput {
    pub fn normalize(&self, field: &str) -> PoolmateResult<Place> {
        let location = self.point.normalize()?;
        let address = self
            .address
            .as_deref()
            .or(self.name.as_deref())
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| PoolmateError::validation_error(field, "address is required"))?;

        Ok(Place {
            location,
            address: address.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geojson_and_flat_shapes_agree() {
        let geojson: PointInput =
            serde_json::from_value(serde_json::json!({"type": "Point", "coordinates": [77.10, 28.70]}))
                .unwrap();
        let flat: PointInput =
            serde_json::from_value(serde_json::json!({"lat": 28.70, "lng": 77.10})).unwrap();

        assert_eq!(geojson.normalize().unwrap(), flat.normalize().unwrap());
        assert_eq!(flat.normalize().unwrap().longitude, 77.10);
    }

    #[test]
    fn test_rejects_malformed_pairs() {
        let three = PointInput {
            coordinates: Some(vec![1.0, 2.0, 3.0]),
            ..Default::default()
        };
        assert!(matches!(three.normalize(), Err(PoolmateError::InvalidGeometry(_))));

        let missing = PointInput::default();
        assert!(matches!(missing.normalize(), Err(PoolmateError::InvalidGeometry(_))));

        let line = PointInput {
            kind: Some("LineString".into()),
            coordinates: Some(vec![1.0, 2.0]),
            ..Default::default()
        };
        assert!(matches!(line.normalize(), Err(PoolmateError::InvalidGeometry(_))));
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(GeoPoint::new(181.0, 0.0).is_err());
        assert!(GeoPoint::new(0.0, -90.5).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
        assert!(GeoPoint::new(-180.0, 90.0).is_ok());
    }

    #[test]
    fn test_place_requires_address() {
        let place: PlaceInput = serde_json::from_value(serde_json::json!({
            "type": "Point",
            "coordinates": [77.10, 28.70],
            "address": "Rohini Sector 3"
        }))
        .unwrap();
        let place = place.normalize("pickup").unwrap();
        assert_eq!(place.address, "Rohini Sector 3");

        let nameless: PlaceInput =
            serde_json::from_value(serde_json::json!({"coordinates": [77.10, 28.70]})).unwrap();
        assert!(matches!(
            nameless.normalize("pickup"),
            Err(PoolmateError::ValidationFailed(_))
        ));
    }
}
