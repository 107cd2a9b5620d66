// src/state.rs
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::PoolmateError as AppError;
use crate::services::{
    broadcast_service::EventHub,
    driver_service::{DriverService, NearbyConfig},
    messaging_service::{HttpMailService, MailConfig, MockNotificationService, NotificationService, Notifier},
    ride_service::{RideConfig, RideService},
    rider_service::RiderService,
    store_service::{Indexes, Repository, Store},
};

pub struct AppState {
    pub ride_service: Arc<RideService>,
    pub driver_service: Arc<DriverService>,
    pub rider_service: Arc<RiderService>,
    pub events: Arc<EventHub>,
    pub notification_service: Arc<dyn NotificationService>,
    pub store: Arc<Store>,
    pub config: AppConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub redis_url: Option<String>,
    pub mail: Option<MailConfig>,
    pub nearby: NearbyConfig,
    pub event_channel_capacity: usize,
    pub average_speed_kmh: f64,
    pub notification_timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            redis_url: None,
            mail: None,
            nearby: NearbyConfig::default(),
            event_channel_capacity: 64,
            average_speed_kmh: 30.0,
            notification_timeout_ms: 5_000,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .map_err(|e| AppError::ConfigurationError(format!("{key}={raw}: {e}"))),
        None => Ok(default),
    }
}

impl AppConfig {
    /// Reads the process environment, after loading `.env` if one exists.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let notification_timeout_ms = parse_or(&lookup, "NOTIFICATION_TIMEOUT_MS", defaults.notification_timeout_ms)?;
        if notification_timeout_ms == 0 {
            return Err(AppError::ConfigurationError(
                "NOTIFICATION_TIMEOUT_MS must be at least 1".to_string(),
            ));
        }
        let mail = text("MAIL_API_URL").map(|api_url| MailConfig {
            api_url,
            api_key: text("MAIL_API_KEY").unwrap_or_default(),
            from: text("MAIL_FROM").unwrap_or_else(|| "PoolMate <noreply@poolmate.app>".to_string()),
            timeout: Duration::from_millis(notification_timeout_ms),
        });

        let config = Self {
            host: text("POOLMATE_HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "POOLMATE_PORT", defaults.port)?,
            redis_url: text("REDIS_URL"),
            mail,
            nearby: NearbyConfig {
                default_radius_km: parse_or(&lookup, "NEARBY_DEFAULT_RADIUS_KM", defaults.nearby.default_radius_km)?,
                max_limit: parse_or(&lookup, "NEARBY_MAX_LIMIT", defaults.nearby.max_limit)?,
            },
            event_channel_capacity: parse_or(&lookup, "EVENT_CHANNEL_CAPACITY", defaults.event_channel_capacity)?,
            average_speed_kmh: parse_or(&lookup, "AVERAGE_SPEED_KMH", defaults.average_speed_kmh)?,
            notification_timeout_ms,
        };

        if !config.nearby.default_radius_km.is_finite() || config.nearby.default_radius_km <= 0.0 {
            return Err(AppError::ConfigurationError(
                "NEARBY_DEFAULT_RADIUS_KM must be positive".to_string(),
            ));
        }
        if config.nearby.max_limit == 0 {
            return Err(AppError::ConfigurationError("NEARBY_MAX_LIMIT must be at least 1".to_string()));
        }
        if !config.average_speed_kmh.is_finite() || config.average_speed_kmh <= 0.0 {
            return Err(AppError::ConfigurationError("AVERAGE_SPEED_KMH must be positive".to_string()));
        }
        Ok(config)
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_millis(self.notification_timeout_ms)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl AppState {
    pub async fn new(config: AppConfig) -> Result<Self, AppError> {
        let store = match &config.redis_url {
            Some(url) => Arc::new(Store::redis(url).await?),
            None => {
                tracing::warn!("REDIS_URL not set, keeping documents in process memory");
                Arc::new(Store::memory())
            }
        };

        let notification_service: Arc<dyn NotificationService> = match &config.mail {
            Some(mail) => Arc::new(HttpMailService::new(mail.clone())?),
            None => {
                tracing::warn!("MAIL_API_URL not set, using mock notification service");
                Arc::new(MockNotificationService::new())
            }
        };

        Ok(Self::from_parts(config, store, notification_service))
    }

    /// Wires the service graph over an already-built store and sink.
    pub fn from_parts(
        config: AppConfig,
        store: Arc<Store>,
        notification_service: Arc<dyn NotificationService>,
    ) -> Self {
        let events = Arc::new(EventHub::new(config.event_channel_capacity));
        let driver_service = Arc::new(DriverService::new(
            Repository::new(store.clone()),
            Indexes::new(store.clone()),
            config.nearby,
        ));
        let rider_service = Arc::new(RiderService::new(Repository::new(store.clone())));

        let ride_service = Arc::new(RideService::new(
            store.clone(),
            driver_service.clone(),
            rider_service.clone(),
            Notifier::new(notification_service.clone()).with_timeout(config.notification_timeout()),
            events.clone(),
            RideConfig {
                average_speed_kmh: config.average_speed_kmh,
            },
        ));

        Self {
            ride_service,
            driver_service,
            rider_service,
            events,
            notification_service,
            store,
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:3000");
        assert!(config.redis_url.is_none());
        assert!(config.mail.is_none());
        assert_eq!(config.nearby.max_limit, 50);
        assert_eq!(config.event_channel_capacity, 64);
        assert_eq!(config.notification_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("POOLMATE_PORT", "8080"),
            ("REDIS_URL", "redis://cache:6379"),
            ("MAIL_API_URL", "https://mail.internal/send"),
            ("NEARBY_DEFAULT_RADIUS_KM", "5.5"),
            ("NOTIFICATION_TIMEOUT_MS", "1500"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        let mail = config.mail.unwrap();
        assert_eq!(mail.from, "PoolMate <noreply@poolmate.app>");
        assert_eq!(mail.timeout, Duration::from_millis(1500));
        assert_eq!(config.nearby.default_radius_km, 5.5);
    }

    #[test]
    fn test_malformed_values_fail() {
        for pairs in [
            [("POOLMATE_PORT", "eighty")],
            [("NEARBY_MAX_LIMIT", "0")],
            [("AVERAGE_SPEED_KMH", "-4")],
            [("NOTIFICATION_TIMEOUT_MS", "0")],
        ] {
            assert!(matches!(
                AppConfig::from_lookup(lookup(&pairs)),
                Err(AppError::ConfigurationError(_))
            ));
        }
    }
}
