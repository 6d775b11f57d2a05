//! JSON contract dataset.
//!
//! The file is an array of contract rows. A row that cannot be read becomes a
//! rejected entry for that contract; the rest of the dataset is still used.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use meterlink_core::{
    Anonymizer, Authorization, ChangeKind, Contract, ContractChange, ContractSource,
    DatasetEntry, DiscriminationHours, NewContract, ValidationError,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContractRow {
    contract_id: String,
    date_start: NaiveDate,
    #[serde(default)]
    date_end: Option<NaiveDate>,
    /// kVA.
    power: f64,
    tariff_id: String,
    #[serde(default)]
    postal_code: String,
    #[serde(default)]
    activity_code: String,
    #[serde(default)]
    metering_point_id: String,
    #[serde(default)]
    changes: Vec<ChangeRow>,
    #[serde(default)]
    authorization: Option<AuthorizationRow>,
    #[serde(default)]
    hours: Option<HoursRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeRow {
    date_start: NaiveDate,
    date_end: NaiveDate,
    #[serde(default)]
    tariff_id: Option<String>,
    #[serde(default)]
    power: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizationRow {
    #[serde(default)]
    auth30: bool,
    #[serde(default)]
    date_start30: Option<String>,
    #[serde(default)]
    date_end30: Option<String>,
    #[serde(default)]
    auth_day: bool,
    #[serde(default)]
    date_start_day: Option<String>,
    #[serde(default)]
    date_end_day: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HoursRow {
    #[serde(default)]
    current: Option<String>,
    #[serde(default)]
    modified_at: Option<NaiveDate>,
}

/// Contracts read from a JSON file.
pub struct JsonDataset {
    path: PathBuf,
    anonymizer: Anonymizer,
}

impl JsonDataset {
    pub fn new(path: &Path, anonymizer: Anonymizer) -> Self {
        Self {
            path: path.to_path_buf(),
            anonymizer,
        }
    }
}

impl ContractSource for JsonDataset {
    type Error = anyhow::Error;

    fn contracts(&self) -> anyhow::Result<Vec<DatasetEntry>> {
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading dataset {}", self.path.display()))?;
        parse_dataset(&text, &self.anonymizer)
            .with_context(|| format!("parsing dataset {}", self.path.display()))
    }
}

/// Parse a whole dataset. Only a document that is not a JSON array fails as a whole.
pub fn parse_dataset(
    text: &str,
    anonymizer: &Anonymizer,
) -> Result<Vec<DatasetEntry>, serde_json::Error> {
    let rows: Vec<serde_json::Value> = serde_json::from_str(text)?;
    Ok(rows
        .into_iter()
        .map(|value| {
            let id = value
                .get("contractId")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string();
            let row: ContractRow =
                serde_json::from_value(value).map_err(|e| ValidationError::Malformed {
                    contract: id,
                    detail: e.to_string(),
                })?;
            Contract::new(to_new_contract(row)?, anonymizer)
        })
        .collect())
}

fn to_new_contract(row: ContractRow) -> Result<NewContract, ValidationError> {
    let changes = row
        .changes
        .iter()
        .filter_map(|change| classify_change(change, &row.tariff_id, row.power))
        .collect();
    let authorization = row
        .authorization
        .as_ref()
        .map(|auth| to_authorization(&row.contract_id, auth))
        .transpose()?;

    Ok(NewContract {
        changes,
        authorization,
        hours: row.hours.map(|h| DiscriminationHours {
            current: h.current.filter(|c| !c.trim().is_empty()),
            modified_at: h.modified_at,
        }),
        contract_id: row.contract_id,
        date_start: row.date_start,
        date_end: row.date_end,
        power_kva: row.power,
        tariff_id: row.tariff_id,
        postal_code: row.postal_code,
        activity_code: row.activity_code,
        metering_point: row.metering_point_id,
    })
}

/// A row is a tariff change when its tariff differs from the current one,
/// otherwise a power change when its power differs. Anything else is ignored.
fn classify_change(change: &ChangeRow, tariff_id: &str, power: f64) -> Option<ContractChange> {
    let kind = match (&change.tariff_id, change.power) {
        (Some(tariff), _) if tariff != tariff_id => ChangeKind::Tariff(tariff.clone()),
        (_, Some(kva)) if kva != power => ChangeKind::Power(kva),
        _ => return None,
    };
    Some(ContractChange {
        date_start: change.date_start,
        date_end: change.date_end,
        kind,
    })
}

fn to_authorization(
    contract: &str,
    row: &AuthorizationRow,
) -> Result<Authorization, ValidationError> {
    let date = |value: &Option<String>| -> Result<Option<DateTime<Utc>>, ValidationError> {
        match value.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => parse_instant(s).map(Some).ok_or_else(|| ValidationError::Malformed {
                contract: contract.to_string(),
                detail: format!("authorization date '{s}' is not a valid date"),
            }),
        }
    };
    Ok(Authorization {
        auth_30: row.auth30,
        date_start_30: date(&row.date_start30)?,
        date_end_30: date(&row.date_end30)?,
        auth_day: row.auth_day,
        date_start_day: date(&row.date_start_day)?,
        date_end_day: date(&row.date_end_day)?,
    })
}

/// RFC 3339, or a naive `YYYY-MM-DD HH:MM:SS[.f]` taken as UTC.
fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
