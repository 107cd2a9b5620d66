// src/services/rider_service.rs
use async_trait::async_trait;
use chrono::Utc;
use tracing;

use crate::{
    errors::PoolmateError as AppError,
    models::driver::RatingSummary,
    models::location::{GeoPoint, LocationFix},
    models::rider::{Rider, RiderRegistration, RiderResponse},
    services::store_service::{Change, Repository},
    utils::id_generator::{IdType, WithGeneratedId},
    utils::validation::Validator,
};

#[async_trait]
pub trait RiderOperations: Send + Sync {
    async fn register_rider(&self, registration: RiderRegistration) -> Result<RiderResponse, AppError>;
    async fn get_rider(&self, rider_id: &str) -> Result<Option<Rider>, AppError>;
    async fn require_rider(&self, rider_id: &str) -> Result<Rider, AppError>;
    async fn update_location(&self, rider_id: &str, point: GeoPoint) -> Result<Rider, AppError>;
    async fn record_rating(&self, rider_id: &str, rating: u8) -> Result<RatingSummary, AppError>;
}

pub struct RiderService {
    riders: Repository<Rider>,
}

impl RiderService {
    pub fn new(riders: Repository<Rider>) -> Self {
        Self { riders }
    }
}

#[async_trait]
impl RiderOperations for RiderService {
    async fn register_rider(&self, registration: RiderRegistration) -> Result<RiderResponse, AppError> {
        Validator::new()
            .require("first_name", &registration.first_name)
            .require("last_name", &registration.last_name)
            .email("email", &registration.email)
            .require("phone_number", &registration.phone_number)
            .finish()?;

        let now = Utc::now();
        let mut rider = Rider {
            id: String::new(),
            first_name: registration.first_name.trim().to_string(),
            last_name: registration.last_name.trim().to_string(),
            email: registration.email.trim().to_lowercase(),
            phone_number: registration.phone_number.trim().to_string(),
            city: registration.city,
            current_location: None,
            rating: RatingSummary::default(),
            created_at: now,
            updated_at: now,
            version: 0,
        };
        rider.set_generated_id(IdType::Rider);

        self.riders.create(&mut rider).await?;
        tracing::info!("Rider registered: {} ({})", rider.id, rider.full_name());
        Ok(RiderResponse::from(rider))
    }

    async fn get_rider(&self, rider_id: &str) -> Result<Option<Rider>, AppError> {
        self.riders.get(rider_id).await
    }

    async fn require_rider(&self, rider_id: &str) -> Result<Rider, AppError> {
        self.riders.require(rider_id).await
    }

    async fn update_location(&self, rider_id: &str, point: GeoPoint) -> Result<Rider, AppError> {
        let updated = self
            .riders
            .update(rider_id, |rider| {
                rider.current_location = Some(LocationFix::now(point));
                rider.updated_at = Utc::now();
                Ok(Change::Apply)
            })
            .await?;
        tracing::debug!("Rider {} location updated", rider_id);
        Ok(updated.doc)
    }

    async fn record_rating(&self, rider_id: &str, rating: u8) -> Result<RatingSummary, AppError> {
        let updated = self
            .riders
            .update(rider_id, |rider| {
                rider.rating.record(rating);
                rider.updated_at = Utc::now();
                Ok(Change::Apply)
            })
            .await?;
        Ok(updated.doc.rating)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store_service::Store;
    use std::sync::Arc;

    fn registration() -> RiderRegistration {
        RiderRegistration {
            first_name: "Meera".to_string(),
            last_name: "Iyer".to_string(),
            email: "Meera@Example.com".to_string(),
            phone_number: "+91 98111 11111".to_string(),
            city: None,
        }
    }

    #[tokio::test]
    async fn test_register_and_locate() {
        let service = RiderService::new(Repository::new(Arc::new(Store::memory())));
        let rider = service.register_rider(registration()).await.unwrap();

        let point = GeoPoint::new(77.10, 28.70).unwrap();
        let updated = service.update_location(&rider.id, point).await.unwrap();
        assert_eq!(updated.current_location.unwrap().point, point);
        assert_eq!(updated.email, "meera@example.com");
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn test_ratings_average() {
        let service = RiderService::new(Repository::new(Arc::new(Store::memory())));
        let rider = service.register_rider(registration()).await.unwrap();
        service.record_rating(&rider.id, 5).await.unwrap();
        let summary = service.record_rating(&rider.id, 2).await.unwrap();
        assert_eq!(summary.total_ratings, 2);
        assert!((summary.average - 3.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_unknown_rider() {
        let service = RiderService::new(Repository::new(Arc::new(Store::memory())));
        assert!(matches!(
            service.update_location("rdr-000000-none0000", GeoPoint::new(0.0, 0.0).unwrap()).await,
            Err(AppError::RiderNotFound(_))
        ));
    }
}
