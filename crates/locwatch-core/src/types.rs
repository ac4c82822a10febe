//! Shared value types.
//!
//! These are the payloads that flow between the host and the coordinator.
//! The coordinator forwards them unmodified; it never validates coordinates.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in decimal degrees.
    pub latitude: f64,

    /// Longitude in decimal degrees.
    pub longitude: f64,
}

impl Coordinates {
    /// Create a coordinate pair.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)
    }
}

/// A single fix reported by the host location stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    /// Position of the fix.
    pub coordinates: Coordinates,

    /// Horizontal accuracy radius in meters, if reported.
    pub accuracy_m: Option<f32>,

    /// Altitude above the WGS84 ellipsoid in meters, if reported.
    pub altitude_m: Option<f64>,

    /// Bearing in degrees, if reported.
    pub bearing_deg: Option<f32>,

    /// Ground speed in meters per second, if reported.
    pub speed_mps: Option<f32>,

    /// Name of the provider that produced the fix (e.g. "fused", "gps").
    pub provider: String,

    /// When the fix was taken.
    pub timestamp: DateTime<Utc>,
}

impl LocationSample {
    /// Create a sample with only a position, taken now.
    #[must_use]
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            coordinates: Coordinates::new(latitude, longitude),
            accuracy_m: None,
            altitude_m: None,
            bearing_deg: None,
            speed_mps: None,
            provider: "fused".to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Set the reported accuracy.
    #[must_use]
    pub fn with_accuracy(mut self, accuracy_m: f32) -> Self {
        self.accuracy_m = Some(accuracy_m);
        self
    }
}

impl fmt::Display for LocationSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.coordinates, self.provider)?;
        if let Some(acc) = self.accuracy_m {
            write!(f, " acc={acc}m")?;
        }
        write!(f, " at {}", self.timestamp.to_rfc3339())
    }
}

/// What the host location stream delivers on each callback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationResult {
    /// The most recent fix, or `None` when the host has no usable fix.
    pub last_location: Option<LocationSample>,
}

impl LocationResult {
    /// Wrap a single fix.
    #[must_use]
    pub const fn of(sample: LocationSample) -> Self {
        Self {
            last_location: Some(sample),
        }
    }
}

/// A reverse-geocoded postal address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    /// Formatted address lines, most specific first.
    pub lines: Vec<String>,

    /// City or town.
    pub locality: Option<String>,

    /// State, province or region.
    pub admin_area: Option<String>,

    /// Postal code.
    pub postal_code: Option<String>,

    /// ISO 3166-1 alpha-2 country code.
    pub country_code: Option<String>,

    /// Localized country name.
    pub country_name: Option<String>,

    /// Position the geocoder attached to this address.
    pub coordinates: Option<Coordinates>,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lines.is_empty() {
            write!(f, "{}", self.locality.as_deref().unwrap_or("<unnamed>"))
        } else {
            write!(f, "{}", self.lines.join(", "))
        }
    }
}

/// A source of location fixes recognized by the availability watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Cell/Wi-Fi based positioning.
    Network,
    /// Satellite positioning (GPS, Galileo, ...).
    Satellite,
}

impl Provider {
    /// All recognized providers, in query order.
    pub const ALL: [Self; 2] = [Self::Network, Self::Satellite];
}

/// Accuracy/power trade-off requested from the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Most precise fixes available, highest power use.
    #[default]
    HighAccuracy,
    /// Block-level accuracy.
    BalancedPowerAccuracy,
    /// City-level accuracy.
    LowPower,
    /// Only fixes computed for other clients.
    NoPower,
}

/// Parameters handed to [`crate::host::LocationClient::start_updates`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRequest {
    /// Desired interval between fixes.
    pub interval: Duration,

    /// Fastest interval the client can handle, if bounded.
    pub fastest_interval: Option<Duration>,

    /// Accuracy/power class.
    pub priority: Priority,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_serialization() {
        let sample = LocationSample::at(45.0, 9.0).with_accuracy(12.5);
        let json = serde_json::to_string(&sample).unwrap();
        assert!(json.contains("\"latitude\":45.0"));
        assert!(json.contains("\"accuracy_m\":12.5"));
    }

    #[test]
    fn test_provider_serializes_snake_case() {
        let json = serde_json::to_string(&Provider::Satellite).unwrap();
        assert_eq!(json, "\"satellite\"");
    }

    #[test]
    fn test_address_display_prefers_lines() {
        let address = Address {
            lines: vec!["Via Roma 1".into(), "Milano".into()],
            locality: Some("Milano".into()),
            ..Address::default()
        };
        assert_eq!(address.to_string(), "Via Roma 1, Milano");

        let bare = Address {
            locality: Some("Torino".into()),
            ..Address::default()
        };
        assert_eq!(bare.to_string(), "Torino");
    }

    #[test]
    fn test_empty_result_has_no_fix() {
        assert!(LocationResult::default().last_location.is_none());
    }
}
