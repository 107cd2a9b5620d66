// src/services/driver_service.rs
use async_trait::async_trait;
use chrono::Utc;
use tracing;

use crate::{
    errors::PoolmateError as AppError,
    models::driver::{
        Availability, Driver, DriverRegistration, DriverResponse, DriverStatusUpdate, NearbyDriver,
        RatingSummary, Vehicle,
    },
    models::location::{GeoPoint, LocationFix},
    services::store_service::{Change, Indexes, Repository, StoreKeys},
    utils::id_generator::{IdGenerator, IdType, WithGeneratedId},
    utils::validation::Validator,
};

#[derive(Debug, Clone, Copy)]
pub struct NearbyConfig {
    pub default_radius_km: f64,
    pub max_limit: usize,
}

impl Default for NearbyConfig {
    fn default() -> Self {
        Self {
            default_radius_km: 10.0,
            max_limit: 50,
        }
    }
}

#[async_trait]
pub trait DriverOperations: Send + Sync {
    async fn register_driver(&self, registration: DriverRegistration) -> Result<DriverResponse, AppError>;
    async fn get_driver(&self, driver_id: &str) -> Result<Option<Driver>, AppError>;
    async fn require_driver(&self, driver_id: &str) -> Result<Driver, AppError>;
    async fn set_availability(&self, driver_id: &str, update: DriverStatusUpdate) -> Result<DriverResponse, AppError>;
    async fn update_location(&self, driver_id: &str, point: GeoPoint) -> Result<Driver, AppError>;
    async fn find_nearby_available(
        &self,
        point: GeoPoint,
        radius_km: Option<f64>,
        limit: Option<usize>,
    ) -> Result<Vec<NearbyDriver>, AppError>;
    async fn record_rating(&self, driver_id: &str, rating: u8) -> Result<RatingSummary, AppError>;
}

pub struct DriverService {
    drivers: Repository<Driver>,
    indexes: Indexes,
    nearby: NearbyConfig,
}

impl DriverService {
    pub fn new(drivers: Repository<Driver>, indexes: Indexes, nearby: NearbyConfig) -> Self {
        Self {
            drivers,
            indexes,
            nearby,
        }
    }

    fn resolve_radius(&self, radius_km: Option<f64>) -> Result<f64, AppError> {
        let radius = radius_km.unwrap_or(self.nearby.default_radius_km);
        if !radius.is_finite() || radius <= 0.0 {
            return Err(AppError::validation_error("radius_km", "must be a positive number"));
        }
        Ok(radius)
    }

    fn resolve_limit(&self, limit: Option<usize>) -> usize {
        limit.unwrap_or(self.nearby.max_limit).clamp(1, self.nearby.max_limit.max(1))
    }
}

#[async_trait]
impl DriverOperations for DriverService {
    async fn register_driver(&self, registration: DriverRegistration) -> Result<DriverResponse, AppError> {
        let mut validator = Validator::new();
        validator
            .require("first_name", &registration.first_name)
            .require("last_name", &registration.last_name)
            .email("email", &registration.email)
            .require("phone_number", &registration.phone_number);
        if let Some(vehicle) = &registration.vehicle {
            validator
                .require("vehicle.make", &vehicle.make)
                .require("vehicle.model", &vehicle.model)
                .require("vehicle.license_plate", &vehicle.license_plate);
        }
        validator.finish()?;

        let now = Utc::now();
        let vehicle = registration.vehicle.map(|details| Vehicle {
            id: IdGenerator::generate(IdType::Vehicle),
            make: details.make.trim().to_string(),
            model: details.model.trim().to_string(),
            color: details.color.trim().to_string(),
            license_plate: details.license_plate.trim().to_uppercase(),
            capacity: details.capacity.unwrap_or(4),
        });

        let mut driver = Driver {
            id: String::new(),
            first_name: registration.first_name.trim().to_string(),
            last_name: registration.last_name.trim().to_string(),
            email: registration.email.trim().to_lowercase(),
            phone_number: registration.phone_number.trim().to_string(),
            city: registration.city,
            availability: Availability {
                max_passengers: vehicle.as_ref().map(|v| v.capacity).unwrap_or(4),
                ..Default::default()
            },
            current_location: None,
            rating: RatingSummary::default(),
            vehicle,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        driver.set_generated_id(IdType::Driver);

        self.drivers.create(&mut driver).await?;
        self.indexes.add(&StoreKeys::drivers(), &driver.id).await?;

        tracing::info!("Driver registered: {} ({})", driver.id, driver.full_name());
        Ok(DriverResponse::from(driver))
    }

    async fn get_driver(&self, driver_id: &str) -> Result<Option<Driver>, AppError> {
        tracing::debug!("Getting driver: {}", driver_id);
        self.drivers.get(driver_id).await
    }

    async fn require_driver(&self, driver_id: &str) -> Result<Driver, AppError> {
        self.drivers.require(driver_id).await
    }

    async fn set_availability(&self, driver_id: &str, update: DriverStatusUpdate) -> Result<DriverResponse, AppError> {
        let location = update.location.as_ref().map(|p| p.normalize()).transpose()?;

        let updated = self
            .drivers
            .update(driver_id, |driver| {
                let now = Utc::now();
                driver.availability.is_available = update.is_available;
                driver.availability.last_updated = now;
                if let Some(point) = location {
                    driver.current_location = Some(LocationFix {
                        point,
                        last_updated: now,
                    });
                }
                driver.updated_at = now;
                Ok(Change::Apply)
            })
            .await?;

        let index = StoreKeys::available_drivers();
        if update.is_available {
            self.indexes.add(&index, driver_id).await?;
        } else {
            self.indexes.remove(&index, driver_id).await?;
        }

        tracing::info!(
            "Driver {} is now {}",
            driver_id,
            if update.is_available { "available" } else { "offline" }
        );
        Ok(DriverResponse::from(updated.doc))
    }

    async fn update_location(&self, driver_id: &str, point: GeoPoint) -> Result<Driver, AppError> {
        let updated = self
            .drivers
            .update(driver_id, |driver| {
                let now = Utc::now();
                driver.current_location = Some(LocationFix {
                    point,
                    last_updated: now,
                });
                driver.updated_at = now;
                Ok(Change::Apply)
            })
            .await?;

        tracing::debug!("Driver {} location stamped", driver_id);
        Ok(updated.doc)
    }

    async fn find_nearby_available(
        &self,
        point: GeoPoint,
        radius_km: Option<f64>,
        limit: Option<usize>,
    ) -> Result<Vec<NearbyDriver>, AppError> {
        let radius_km = self.resolve_radius(radius_km)?;
        let limit = self.resolve_limit(limit);

        let candidates = self.indexes.members(&StoreKeys::available_drivers()).await?;
        let drivers = self.drivers.get_many(&candidates).await?;

        // The index is only a hint; the document decides.
        let mut nearby: Vec<NearbyDriver> = drivers
            .into_iter()
            .filter(|driver| driver.availability.is_available)
            .filter_map(|driver| {
                let distance_km = driver.distance_to(&point)?;
                (distance_km <= radius_km).then(|| NearbyDriver {
                    driver: DriverResponse::from(driver),
                    distance_km,
                })
            })
            .collect();

        nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        nearby.truncate(limit);

        tracing::debug!(
            "Nearby search at ({}, {}) within {} km: {} drivers",
            point.latitude,
            point.longitude,
            radius_km,
            nearby.len()
        );
        Ok(nearby)
    }

    async fn record_rating(&self, driver_id: &str, rating: u8) -> Result<RatingSummary, AppError> {
        let updated = self
            .drivers
            .update(driver_id, |driver| {
                driver.rating.record(rating);
                driver.updated_at = Utc::now();
                Ok(Change::Apply)
            })
            .await?;
        Ok(updated.doc.rating)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::driver::VehicleDetails;
    use crate::models::location::PointInput;
    use crate::services::store_service::Store;
    use std::sync::Arc;

    fn service() -> DriverService {
        let store = Arc::new(Store::memory());
        DriverService::new(
            Repository::new(Arc::clone(&store)),
            Indexes::new(store),
            NearbyConfig {
                default_radius_km: 10.0,
                max_limit: 3,
            },
        )
    }

    fn registration(name: &str) -> DriverRegistration {
        DriverRegistration {
            first_name: name.to_string(),
            last_name: "Singh".to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            phone_number: "+91 98100 00000".to_string(),
            city: Some("Delhi".to_string()),
            vehicle: Some(VehicleDetails {
                make: "Maruti".to_string(),
                model: "Dzire".to_string(),
                color: "White".to_string(),
                license_plate: "dl 01 ab 1234".to_string(),
                capacity: None,
            }),
        }
    }

    async fn online_at(service: &DriverService, name: &str, lat: f64, lng: f64) -> String {
        let driver = service.register_driver(registration(name)).await.unwrap();
        service
            .set_availability(
                &driver.id,
                DriverStatusUpdate {
                    is_available: true,
                    location: Some(PointInput::from_lat_lng(lat, lng)),
                },
            )
            .await
            .unwrap();
        driver.id
    }

    #[tokio::test]
    async fn test_register_driver() {
        let service = service();
        let driver = service.register_driver(registration("Ravi")).await.unwrap();
        assert!(IdGenerator::validate_id(&driver.id, Some(IdType::Driver)));
        assert!(!driver.availability.is_available);
        assert_eq!(driver.vehicle.unwrap().license_plate, "DL 01 AB 1234");
        assert!(service.get_driver(&driver.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_register_rejects_bad_contact() {
        let mut bad = registration("Ravi");
        bad.email = "nope".to_string();
        bad.first_name = String::new();
        let err = service().register_driver(bad).await.unwrap_err();
        assert!(matches!(err, AppError::ValidationFailed(ref errors) if errors.len() == 2));
    }

    #[tokio::test]
    async fn test_nearby_filters_sorts_and_limits() {
        let service = service();
        let near = online_at(&service, "Near", 28.701, 77.101).await;
        let mid = online_at(&service, "Mid", 28.72, 77.12).await;
        let _far = online_at(&service, "Far", 29.50, 77.90).await;
        let offline = online_at(&service, "Offline", 28.700, 77.100).await;
        service
            .set_availability(
                &offline,
                DriverStatusUpdate {
                    is_available: false,
                    location: None,
                },
            )
            .await
            .unwrap();

        let origin = GeoPoint::new(77.10, 28.70).unwrap();
        let found = service.find_nearby_available(origin, Some(10.0), None).await.unwrap();
        let ids: Vec<_> = found.iter().map(|n| n.driver.id.clone()).collect();
        assert_eq!(ids, vec![near.clone(), mid]);
        assert!(found.iter().all(|n| n.distance_km <= 10.0));
        assert!(found.iter().all(|n| n.driver.availability.is_available));

        let one = service.find_nearby_available(origin, Some(10.0), Some(1)).await.unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].driver.id, near);
    }

    #[tokio::test]
    async fn test_nearby_rejects_bad_radius() {
        let origin = GeoPoint::new(77.10, 28.70).unwrap();
        assert!(service().find_nearby_available(origin, Some(0.0), None).await.is_err());
        assert!(service().find_nearby_available(origin, Some(f64::NAN), None).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_driver() {
        let err = service().require_driver("drv-000000-nope0000").await.unwrap_err();
        assert!(matches!(err, AppError::DriverNotFound(_)));
    }
}
