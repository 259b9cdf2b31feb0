use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Buzzer output reported by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuzzerState {
    #[serde(rename = "ON")]
    On,
    #[serde(rename = "OFF")]
    Off,
}

/// Text that is neither `ON` nor `OFF`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown buzzer state {0:?}")]
pub struct UnknownBuzzerState(pub String);

impl FromStr for BuzzerState {
    type Err = UnknownBuzzerState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("on") {
            Ok(Self::On)
        } else if s.eq_ignore_ascii_case("off") {
            Ok(Self::Off)
        } else {
            Err(UnknownBuzzerState(s.to_string()))
        }
    }
}

impl fmt::Display for BuzzerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => f.write_str("ON"),
            Self::Off => f.write_str("OFF"),
        }
    }
}

/// One measurement snapshot, as decoded from a serial line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Relative humidity in percent.
    pub humidity: f64,
    pub temp_c: f64,
    pub temp_f: f64,
    pub passengers: u32,
    /// Ultrasonic distance in centimetres.
    pub distance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    pub buzzer: BuzzerState,
}

/// A reading outside the range the sensors can physically report.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{field} = {value} is outside [{min}, {max}]")]
pub struct ValidationError {
    pub field: &'static str,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

fn check(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    // NaN fails the range check as well.
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError {
            field,
            value,
            min,
            max,
        })
    }
}

impl SensorReading {
    /// Checks every numeric field against its physical domain.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check("humidity", self.humidity, 0.0, 100.0)?;
        check("temp_c", self.temp_c, -40.0, 125.0)?;
        check("temp_f", self.temp_f, -40.0, 257.0)?;
        check("distance", self.distance, 0.0, f64::MAX)?;
        if let Some(lat) = self.latitude {
            check("latitude", lat, -90.0, 90.0)?;
        }
        if let Some(lng) = self.longitude {
            check("longitude", lng, -180.0, 180.0)?;
        }
        Ok(())
    }

    /// Attaches a capture timestamp (UNIX seconds).
    pub fn stamped(self, timestamp: f64) -> TelemetryRecord {
        TelemetryRecord {
            reading: self,
            timestamp,
        }
    }

    /// Attaches the current wall-clock time as capture timestamp.
    pub fn stamp_now(self) -> TelemetryRecord {
        self.stamped(unix_timestamp())
    }
}

/// A reading plus the time it was captured.
///
/// Serialized flat: `{"humidity": 51.0, ..., "buzzer": "OFF", "timestamp": 1718000000.5}`.
/// Equality is structural and is what the server debounces on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    #[serde(flatten)]
    pub reading: SensorReading,
    pub timestamp: f64,
}

/// Current wall-clock time as fractional UNIX seconds.
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) fn sample_reading() -> SensorReading {
    SensorReading {
        humidity: 51.0,
        temp_c: 29.4,
        temp_f: 84.92,
        passengers: 96,
        distance: 22.29,
        latitude: Some(6.9271),
        longitude: Some(79.8612),
        buzzer: BuzzerState::Off,
    }
}
