//! Parser for the line format printed by the ESP32 firmware.
//!
//! ```text
//! Humidity: 51.00% | Temp: 29.40C/84.92F | Passengers: 96 | Distance: 22.29 cm | GPS: 6.927100, 79.861200 | Status: Comfortable temperature. Buzzer OFF.
//! ```
//!
//! Segments are separated by `|` and identified by their label, so their
//! order does not matter. `GPS` is optional; everything else is required.

use std::str::FromStr;

use crate::record::{BuzzerState, SensorReading, ValidationError};

/// Why a line could not be turned into a reading.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("missing {0} segment")]
    Missing(&'static str),

    #[error("invalid {field} value {text:?}")]
    Invalid { field: &'static str, text: String },

    #[error(transparent)]
    OutOfRange(#[from] ValidationError),
}

/// Parses one serial line. Returns `None` for anything malformed.
pub fn parse_line(line: &str) -> Option<SensorReading> {
    parse_reading(line).ok()
}

/// Like [`parse_line`] but reports why a line was rejected.
pub fn parse_reading(line: &str) -> Result<SensorReading, ParseError> {
    let mut humidity = None;
    let mut temps = None;
    let mut passengers = None;
    let mut distance = None;
    let mut gps = None;
    let mut buzzer = None;

    for segment in line.split('|') {
        let Some((label, value)) = segment.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match label.trim() {
            "Humidity" => humidity = Some(number("humidity", value.trim_end_matches('%'))?),
            "Temp" => temps = Some(temperatures(value)?),
            "Passengers" => passengers = Some(number("passengers", value)?),
            "Distance" => {
                let figure = value.split_whitespace().next().unwrap_or_default();
                distance = Some(number("distance", figure)?);
            }
            // A GPS segment without a fix is tolerated; the reading simply has no position.
            "GPS" => gps = coordinates(value),
            "Status" => buzzer = buzzer_state(value),
            _ => {}
        }
    }

    let (temp_c, temp_f) = temps.ok_or(ParseError::Missing("temp"))?;
    let reading = SensorReading {
        humidity: humidity.ok_or(ParseError::Missing("humidity"))?,
        temp_c,
        temp_f,
        passengers: passengers.ok_or(ParseError::Missing("passengers"))?,
        distance: distance.ok_or(ParseError::Missing("distance"))?,
        latitude: gps.map(|(lat, _)| lat),
        longitude: gps.map(|(_, lng)| lng),
        buzzer: buzzer.ok_or(ParseError::Missing("buzzer"))?,
    };
    reading.validate()?;
    Ok(reading)
}

fn number<T: FromStr>(field: &'static str, text: &str) -> Result<T, ParseError> {
    text.trim().parse().map_err(|_| ParseError::Invalid {
        field,
        text: text.to_string(),
    })
}

/// `29.40C/84.92F` → `(29.40, 84.92)`.
fn temperatures(value: &str) -> Result<(f64, f64), ParseError> {
    let invalid = || ParseError::Invalid {
        field: "temp",
        text: value.to_string(),
    };
    let (c, f) = value.split_once('/').ok_or_else(invalid)?;
    let c = c.trim().strip_suffix(['C', 'c']).ok_or_else(invalid)?;
    let f = f.trim().strip_suffix(['F', 'f']).ok_or_else(invalid)?;
    Ok((number("temp_c", c)?, number("temp_f", f)?))
}

/// `6.927100, 79.861200` → `(6.9271, 79.8612)`.
fn coordinates(value: &str) -> Option<(f64, f64)> {
    let (lat, lng) = value.split_once(',')?;
    Some((lat.trim().parse().ok()?, lng.trim().parse().ok()?))
}

/// Finds `Buzzer ON` / `Buzzer OFF` inside the free-text status.
fn buzzer_state(status: &str) -> Option<BuzzerState> {
    let mut words = status.split_whitespace();
    while let Some(word) = words.next() {
        if word.eq_ignore_ascii_case("buzzer") {
            let state = words.next()?.trim_end_matches(['.', ',', '!']);
            return state.parse().ok();
        }
    }
    None
}
