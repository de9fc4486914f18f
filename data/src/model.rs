//! Domain entities moved by the migration pipeline
//!
//! The same three record types are read from the embedded source store and
//! written to the destination; their field values must survive the transfer
//! unchanged.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static TRACKING_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9]{8,20}$").expect("valid tracking number regex"));

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex")
});

/// Maximum length of a contact message in characters
pub const MAX_MESSAGE_LEN: usize = 1000;

/// Shipment lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Created,
    PickedUp,
    InTransit,
    OutForDelivery,
    Delivered,
    Exception,
}

impl PackageStatus {
    pub const ALL: [PackageStatus; 6] = [
        PackageStatus::Created,
        PackageStatus::PickedUp,
        PackageStatus::InTransit,
        PackageStatus::OutForDelivery,
        PackageStatus::Delivered,
        PackageStatus::Exception,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PackageStatus::Created => "created",
            PackageStatus::PickedUp => "picked_up",
            PackageStatus::InTransit => "in_transit",
            PackageStatus::OutForDelivery => "out_for_delivery",
            PackageStatus::Delivered => "delivered",
            PackageStatus::Exception => "exception",
        }
    }
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PackageStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::Status(s.to_string()))
    }
}

/// Field-level validation failures for domain records
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid tracking number '{0}': expected 8-20 uppercase letters or digits")]
    TrackingNumber(String),
    #[error("unknown package status '{0}'")]
    Status(String),
    #[error("invalid email address '{0}'")]
    Email(String),
    #[error("message must be 1-{MAX_MESSAGE_LEN} characters, got {0}")]
    MessageLength(usize),
    #[error("required field '{0}' is empty")]
    Required(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub id: String,
    pub tracking_number: String,
    pub status: PackageStatus,
    pub current_location: String,
    pub destination: String,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
}

impl Package {
    /// Trim and uppercase a tracking number, rejecting anything outside
    /// `[A-Z0-9]{8,20}`
    pub fn normalize_tracking_number(raw: &str) -> Result<String, ValidationError> {
        let normalized = raw.trim().to_uppercase();
        if TRACKING_NUMBER_RE.is_match(&normalized) {
            Ok(normalized)
        } else {
            Err(ValidationError::TrackingNumber(raw.to_string()))
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::Required("id"));
        }
        if !TRACKING_NUMBER_RE.is_match(&self.tracking_number) {
            return Err(ValidationError::TrackingNumber(self.tracking_number.clone()));
        }
        if self.current_location.trim().is_empty() {
            return Err(ValidationError::Required("current_location"));
        }
        if self.destination.trim().is_empty() {
            return Err(ValidationError::Required("destination"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub id: String,
    pub package_id: String,
    pub status: PackageStatus,
    pub location: String,
    pub timestamp: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactSubmission {
    pub id: String,
    pub name: String,
    pub email: String,
    pub message: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved: bool,
}

impl ContactSubmission {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::Required("name"));
        }
        if !EMAIL_RE.is_match(&self.email) {
            return Err(ValidationError::Email(self.email.clone()));
        }
        let len = self.message.chars().count();
        if len == 0 || len > MAX_MESSAGE_LEN {
            return Err(ValidationError::MessageLength(len));
        }
        Ok(())
    }
}

/// Parse an ISO-8601 timestamp as stored by the source application
///
/// Accepts RFC 3339 (`2024-05-01T10:00:00Z`, `...+02:00`) and SQLite's
/// `CURRENT_TIMESTAMP` form (`2024-05-01 10:00:00`, taken as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Serialize a timestamp as ISO-8601 with an explicit UTC offset
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
