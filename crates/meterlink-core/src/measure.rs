//! Measurement types, readings, and the accumulator used across fetch windows.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::timefmt;

/// The three families of metering data synchronised per contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MeasureType {
    /// Monthly power peak, in watts.
    #[serde(rename = "PMAX")]
    Pmax,
    /// Sub-hourly consumption curve, in watt-hours.
    #[serde(rename = "CDC")]
    Cdc,
    /// Daily aggregate consumption, in watt-hours.
    #[serde(rename = "CONSOGLO")]
    Consoglo,
}

impl MeasureType {
    /// Processing order when every type is requested.
    pub const ALL: [MeasureType; 3] = [MeasureType::Pmax, MeasureType::Consoglo, MeasureType::Cdc];

    pub fn as_str(self) -> &'static str {
        match self {
            MeasureType::Pmax => "PMAX",
            MeasureType::Cdc => "CDC",
            MeasureType::Consoglo => "CONSOGLO",
        }
    }

    /// Reading type name on the analytics platform.
    pub fn reading_type(self) -> &'static str {
        match self {
            MeasureType::Pmax => "power",
            MeasureType::Cdc => "electricityConsumption",
            MeasureType::Consoglo => "dailyElectricityConsumption",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            MeasureType::Pmax => "W",
            MeasureType::Cdc | MeasureType::Consoglo => "Wh",
        }
    }

    /// Sub-window length for the fetch loop. `None` fetches the whole range at once.
    pub fn window_step(self) -> Option<Duration> {
        match self {
            MeasureType::Cdc => Some(Duration::days(7)),
            MeasureType::Pmax | MeasureType::Consoglo => None,
        }
    }

    /// Whether the type is gated by the sub-hourly consent window rather than the daily one.
    pub fn is_curve(self) -> bool {
        matches!(self, MeasureType::Cdc)
    }
}

impl fmt::Display for MeasureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeasureType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PMAX" => Ok(MeasureType::Pmax),
            "CDC" => Ok(MeasureType::Cdc),
            "CONSOGLO" => Ok(MeasureType::Consoglo),
            other => Err(format!("unknown measure type: {other}")),
        }
    }
}

/// One metering value at a UTC instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurement {
    pub kind: MeasureType,
    pub timestamp: DateTime<Utc>,
    pub value: i64,
}

impl Measurement {
    pub fn new(kind: MeasureType, timestamp: DateTime<Utc>, value: i64) -> Self {
        Self {
            kind,
            timestamp,
            value,
        }
    }
}

/// Measurements accumulated across fetch windows.
///
/// Concatenation only: overlapping windows may contribute the same instant twice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeasurementBatch {
    measurements: Vec<Measurement>,
}

impl MeasurementBatch {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn append(&mut self, mut measurements: Vec<Measurement>) {
        self.measurements.append(&mut measurements);
    }

    pub fn concat(mut self, other: MeasurementBatch) -> Self {
        self.append(other.measurements);
        self
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    pub fn earliest(&self) -> Option<DateTime<Utc>> {
        self.measurements.iter().map(|m| m.timestamp).min()
    }

    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.measurements.iter().map(|m| m.timestamp).max()
    }

    pub fn as_slice(&self) -> &[Measurement] {
        &self.measurements
    }

    pub fn into_vec(self) -> Vec<Measurement> {
        self.measurements
    }
}

impl From<Vec<Measurement>> for MeasurementBatch {
    fn from(measurements: Vec<Measurement>) -> Self {
        Self { measurements }
    }
}

/// Reading descriptor attached to an upload payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(rename = "type")]
    pub reading_type: String,
    pub period: String,
    pub unit: String,
}

/// A measurement as serialised in an upload payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadMeasurement {
    #[serde(rename = "type")]
    pub reading_type: String,
    #[serde(with = "timefmt::seconds")]
    pub timestamp: DateTime<Utc>,
    pub value: i64,
}

/// One upload request: every measurement of a type for a contract's device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementPayload {
    pub device_id: String,
    pub metering_point_id: String,
    pub readings: Vec<Reading>,
    pub measurements: Vec<PayloadMeasurement>,
}

impl MeasurementPayload {
    /// Build the payload for `kind` from accumulated measurements.
    ///
    /// `device_id` is the anonymised metering point; it doubles as the metering point id.
    pub fn new(kind: MeasureType, device_id: &str, batch: MeasurementBatch) -> Self {
        let measurements = batch
            .into_vec()
            .into_iter()
            .map(|m| PayloadMeasurement {
                reading_type: m.kind.reading_type().to_string(),
                timestamp: m.timestamp,
                value: m.value,
            })
            .collect();
        Self {
            device_id: device_id.to_string(),
            metering_point_id: device_id.to_string(),
            readings: vec![Reading {
                reading_type: kind.reading_type().to_string(),
                period: "INSTANT".to_string(),
                unit: kind.unit().to_string(),
            }],
            measurements,
        }
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn measure_type_parses_case_insensitively() {
        assert_eq!("cdc".parse::<MeasureType>().unwrap(), MeasureType::Cdc);
        assert_eq!("CONSOGLO".parse::<MeasureType>().unwrap(), MeasureType::Consoglo);
        assert!("ALL".parse::<MeasureType>().is_err());
    }

    #[test]
    fn only_curve_data_is_windowed() {
        assert_eq!(MeasureType::Cdc.window_step(), Some(Duration::days(7)));
        assert_eq!(MeasureType::Pmax.window_step(), None);
        assert_eq!(MeasureType::Consoglo.window_step(), None);
    }

    #[test]
    fn batch_concat_keeps_duplicates() {
        let a = MeasurementBatch::from(vec![Measurement::new(MeasureType::Cdc, at(2), 10)]);
        let b = MeasurementBatch::from(vec![
            Measurement::new(MeasureType::Cdc, at(2), 10),
            Measurement::new(MeasureType::Cdc, at(5), 12),
        ]);
        let merged = a.concat(b);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.earliest(), Some(at(2)));
        assert_eq!(merged.latest(), Some(at(5)));
    }

    #[test]
    fn empty_batch_has_no_bounds() {
        let batch = MeasurementBatch::empty();
        assert!(batch.is_empty());
        assert_eq!(batch.earliest(), None);
        assert_eq!(batch.latest(), None);
    }

    #[test]
    fn payload_serialises_platform_shape() {
        let batch = MeasurementBatch::from(vec![Measurement::new(MeasureType::Pmax, at(1), 6200)]);
        let payload = MeasurementPayload::new(MeasureType::Pmax, "ZGV2aWNl", batch);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["deviceId"], "ZGV2aWNl");
        assert_eq!(json["meteringPointId"], "ZGV2aWNl");
        assert_eq!(json["readings"][0]["type"], "power");
        assert_eq!(json["readings"][0]["period"], "INSTANT");
        assert_eq!(json["readings"][0]["unit"], "W");
        assert_eq!(json["measurements"][0]["timestamp"], "2023-06-01T00:00:00Z");
        assert_eq!(json["measurements"][0]["value"], 6200);
    }
}
