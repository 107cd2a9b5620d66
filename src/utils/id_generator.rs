// src/utils/id_generator.rs
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use std::fmt;

use crate::models::{driver::Driver, ride_request::RideRequest, rider::Rider};

const SUFFIX_LEN: usize = 8;
const SUFFIX_CHARS: &[u8] = b"0123456789abcdefghijkmnpqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdType {
    Rider,
    Driver,
    RideRequest,
    ActiveRide,
    Vehicle,
}

impl IdType {
    const ALL: [IdType; 5] = [
        IdType::Rider,
        IdType::Driver,
        IdType::RideRequest,
        IdType::ActiveRide,
        IdType::Vehicle,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            IdType::Rider => "rdr",
            IdType::Driver => "drv",
            IdType::RideRequest => "req",
            IdType::ActiveRide => "act",
            IdType::Vehicle => "veh",
        }
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Ids look like `req-261019-Xk3p9QaZ`: kind, creation day, random suffix.
pub struct IdGenerator;

impl IdGenerator {
    pub fn generate(id_type: IdType) -> String {
        Self::generate_at(id_type, Utc::now())
    }

    pub fn generate_at(id_type: IdType, at: DateTime<Utc>) -> String {
        let mut rng = rand::rng();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| SUFFIX_CHARS[rng.random_range(0..SUFFIX_CHARS.len())] as char)
            .collect();
        format!("{}-{}-{}", id_type.prefix(), at.format("%y%m%d"), suffix)
    }

    pub fn parse(id: &str) -> Option<(IdType, NaiveDate)> {
        let mut parts = id.splitn(3, '-');
        let (prefix, day, suffix) = (parts.next()?, parts.next()?, parts.next()?);

        let id_type = IdType::ALL.into_iter().find(|t| t.prefix() == prefix)?;
        if suffix.len() != SUFFIX_LEN || !suffix.bytes().all(|b| SUFFIX_CHARS.contains(&b)) {
            return None;
        }
        let day = NaiveDate::parse_from_str(day, "%y%m%d").ok()?;
        Some((id_type, day))
    }

    pub fn validate_id(id: &str, expected: Option<IdType>) -> bool {
        match Self::parse(id) {
            Some((id_type, _)) => expected.is_none_or(|e| e == id_type),
            None => false,
        }
    }
}

pub trait WithGeneratedId {
    fn set_generated_id(&mut self, id_type: IdType);
}

macro_rules! generated_id {
    ($($ty:ty),*) => {
        $(impl WithGeneratedId for $ty {
            fn set_generated_id(&mut self, id_type: IdType) {
                self.id = IdGenerator::generate(id_type);
            }
        })*
    };
}

generated_id!(Rider, Driver, RideRequest);

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_prefix_and_shape() {
        let id = IdGenerator::generate(IdType::RideRequest);
        assert!(id.starts_with("req-"));
        assert_eq!(id.len(), "req-".len() + 6 + 1 + SUFFIX_LEN);
    }

    #[test]
    fn test_parse_round_trips_the_day() {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap();
        let id = IdGenerator::generate_at(IdType::ActiveRide, at);

        let (id_type, day) = IdGenerator::parse(&id).unwrap();
        assert_eq!(id_type, IdType::ActiveRide);
        assert_eq!(day, NaiveDate::from_ymd_opt(2026, 3, 14).unwrap());
    }

    #[test]
    fn test_validate() {
        let id = IdGenerator::generate(IdType::Rider);
        assert!(IdGenerator::validate_id(&id, Some(IdType::Rider)));
        assert!(IdGenerator::validate_id(&id, None));
        assert!(!IdGenerator::validate_id(&id, Some(IdType::Driver)));

        assert!(!IdGenerator::validate_id("drv_missing", None));
        assert!(!IdGenerator::validate_id("req-261399-abcdefgh", None));
        assert!(!IdGenerator::validate_id("xyz-261019-abcdefgh", None));
        // 'l' and 'O' are left out of the alphabet.
        assert!(!IdGenerator::validate_id("req-261019-abcdefgl", None));
    }
}
