//! Contract documents as published to the analytics platform, and their fingerprint.

use chrono::{DateTime, Utc};
use ring::digest;
use serde::{Deserialize, Serialize};

use crate::{Authorization, timefmt};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub postal_code: String,
    pub country_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub address: Address,
    pub customer_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    #[serde(with = "timefmt::seconds")]
    pub date_start: DateTime<Utc>,
    #[serde(with = "timefmt::seconds")]
    pub date_end: DateTime<Utc>,
    pub device_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TariffPeriod {
    #[serde(with = "timefmt::seconds")]
    pub date_start: DateTime<Utc>,
    #[serde(with = "timefmt::seconds")]
    pub date_end: DateTime<Utc>,
    pub tariff_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerPeriod {
    #[serde(with = "timefmt::seconds")]
    pub date_start: DateTime<Utc>,
    #[serde(with = "timefmt::seconds")]
    pub date_end: DateTime<Utc>,
    /// Watts.
    pub power: u32,
}

/// Consent summary published alongside the contract. Missing dates are empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSummary {
    pub auth30: bool,
    #[serde(with = "timefmt::seconds_or_empty")]
    pub date_start30: Option<DateTime<Utc>>,
    #[serde(with = "timefmt::seconds_or_empty")]
    pub date_end30: Option<DateTime<Utc>>,
    pub auth_day: bool,
    #[serde(with = "timefmt::seconds_or_empty")]
    pub date_start_day: Option<DateTime<Utc>>,
    #[serde(with = "timefmt::seconds_or_empty")]
    pub date_end_day: Option<DateTime<Utc>>,
}

impl From<&Authorization> for AuthSummary {
    fn from(auth: &Authorization) -> Self {
        Self {
            auth30: auth.auth_30,
            date_start30: auth.date_start_30,
            date_end30: auth.date_end_30,
            auth_day: auth.auth_day,
            date_start_day: auth.date_start_day,
            date_end_day: auth.date_end_day,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hours: Option<String>,
}

/// The canonical contract document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDocument {
    pub contract_id: String,
    pub customer: Customer,
    #[serde(with = "timefmt::seconds")]
    pub date_start: DateTime<Utc>,
    #[serde(with = "timefmt::seconds")]
    pub date_end: DateTime<Utc>,
    /// Watts.
    pub power: u32,
    pub tariff_cost_id: String,
    pub tariff_id: String,
    pub metering_point_id: String,
    pub activity_code: String,
    pub custom_fields: CustomFields,
    pub devices: Vec<Device>,
    #[serde(rename = "tariff_")]
    pub tariff: TariffPeriod,
    pub tariff_history: Vec<TariffPeriod>,
    #[serde(rename = "power_")]
    pub power_current: PowerPeriod,
    pub power_history: Vec<PowerPeriod>,
}

/// Hex SHA-256 over the document's JSON form with object keys sorted.
///
/// Two documents with the same content hash identically whatever the field order.
pub fn fingerprint<T: Serialize>(document: &T) -> Result<String, serde_json::Error> {
    // `serde_json::Value` objects are BTreeMap-backed, so re-serialising sorts keys.
    let canonical = serde_json::to_string(&serde_json::to_value(document)?)?;
    let hash = digest::digest(&digest::SHA256, canonical.as_bytes());
    Ok(hex::encode(hash.as_ref()))
}
