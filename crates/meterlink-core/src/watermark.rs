//! Covered intervals of synchronised metering data and their persisted record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::MeasureType;

/// A closed `[from, to]` interval of instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    /// `None` unless `from < to`.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Option<Self> {
        (from < to).then_some(Self { from, to })
    }

    pub fn duration(&self) -> chrono::Duration {
        self.to - self.from
    }
}

/// The `[min, max]` span of data confirmed delivered downstream for one type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    min: DateTime<Utc>,
    max: DateTime<Utc>,
}

impl Watermark {
    /// `None` when `min > max`.
    pub fn new(min: DateTime<Utc>, max: DateTime<Utc>) -> Option<Self> {
        (min <= max).then_some(Self { min, max })
    }

    pub fn min(&self) -> DateTime<Utc> {
        self.min
    }

    pub fn max(&self) -> DateTime<Utc> {
        self.max
    }

    /// Smallest watermark covering both `self` and `[earliest, latest]`.
    ///
    /// Never narrows: the result always contains `self`.
    pub fn widen(&self, earliest: DateTime<Utc>, latest: DateTime<Utc>) -> Self {
        Self {
            min: self.min.min(earliest),
            max: self.max.max(latest),
        }
    }

    pub fn contains(&self, other: &Watermark) -> bool {
        self.min <= other.min && self.max >= other.max
    }
}

/// Persisted per-contract synchronisation state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkState {
    /// Fingerprint of the last successfully published contract document.
    pub fingerprint: Option<String>,
    /// Anonymised metering point, kept for auditing.
    pub metering_point_id: Option<String>,
    pub watermarks: BTreeMap<MeasureType, Watermark>,
    pub last_op: Option<DateTime<Utc>>,
}

impl WatermarkState {
    pub fn watermark(&self, kind: MeasureType) -> Option<Watermark> {
        self.watermarks.get(&kind).copied()
    }

    /// Set or clear the watermark for `kind`.
    pub fn set_watermark(&mut self, kind: MeasureType, watermark: Option<Watermark>) {
        match watermark {
            Some(w) => {
                self.watermarks.insert(kind, w);
            }
            None => {
                self.watermarks.remove(&kind);
            }
        }
    }
}
