//! Validated customer contracts and their metering consent windows.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::document::{
    Address, AuthSummary, ContractDocument, CustomFields, Customer, Device, PowerPeriod,
    TariffPeriod,
};
use crate::{Anonymizer, ValidationError, timefmt};

/// Contracts without an end date run until this instant.
pub fn open_ended() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Consent windows granted by the customer for fetching metering data.
///
/// `auth_30` gates the sub-hourly curve, `auth_day` the daily and monthly aggregates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Authorization {
    pub auth_30: bool,
    pub date_start_30: Option<DateTime<Utc>>,
    pub date_end_30: Option<DateTime<Utc>>,
    pub auth_day: bool,
    pub date_start_day: Option<DateTime<Utc>>,
    pub date_end_day: Option<DateTime<Utc>>,
}

/// Which attribute a historical amendment changed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
    Tariff(String),
    /// Subscribed power in kVA.
    Power(f64),
}

/// A past amendment of the contract, valid over whole days `[date_start, date_end]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractChange {
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    pub kind: ChangeKind,
}

/// Off-peak schedule ("discrimination hours") of the metering point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscriminationHours {
    pub current: Option<String>,
    pub modified_at: Option<NaiveDate>,
}

/// Raw contract attributes, as handed over by a dataset provider.
#[derive(Debug, Clone, PartialEq)]
pub struct NewContract {
    pub contract_id: String,
    pub date_start: NaiveDate,
    pub date_end: Option<NaiveDate>,
    /// Subscribed power in kVA.
    pub power_kva: f64,
    pub tariff_id: String,
    pub postal_code: String,
    pub activity_code: String,
    /// Clear metering point identifier.
    pub metering_point: String,
    pub changes: Vec<ContractChange>,
    pub authorization: Option<Authorization>,
    pub hours: Option<DiscriminationHours>,
}

/// Reason a contract is held back from synchronisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataIssue {
    MissingAuthorization,
    MissingHours,
}

impl std::fmt::Display for DataIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataIssue::MissingAuthorization => f.write_str("authorization information not available"),
            DataIssue::MissingHours => f.write_str("hours information not available"),
        }
    }
}

/// A validated contract. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Contract {
    id: String,
    date_start: DateTime<Utc>,
    date_end: DateTime<Utc>,
    power: u32,
    tariff_id: String,
    postal_code: String,
    activity_code: String,
    metering_point: String,
    device_id: String,
    changes: Vec<ContractChange>,
    authorization: Option<Authorization>,
    hours: Option<DiscriminationHours>,
}

fn kva_to_watts(kva: f64) -> u32 {
    (kva * 1000.0).round() as u32
}

impl Contract {
    pub fn new(raw: NewContract, anonymizer: &Anonymizer) -> Result<Self, ValidationError> {
        let id = raw.contract_id.trim().to_string();
        if id.is_empty() {
            return Err(ValidationError::MissingId);
        }
        if raw.metering_point.trim().is_empty() {
            return Err(ValidationError::MissingMeteringPoint { contract: id });
        }
        if !raw.power_kva.is_finite() || raw.power_kva < 0.0 {
            return Err(ValidationError::Malformed {
                contract: id,
                detail: format!("power [{}] is not a valid kVA value", raw.power_kva),
            });
        }

        let date_start = timefmt::start_of_day(raw.date_start);
        let date_end = raw.date_end.map(timefmt::end_of_day).unwrap_or_else(open_ended);
        if date_start >= date_end {
            return Err(ValidationError::InvertedValidity {
                contract: id,
                start: timefmt::format(&date_start),
                end: timefmt::format(&date_end),
            });
        }

        for (i, change) in raw.changes.iter().enumerate() {
            if change.date_start > change.date_end {
                return Err(ValidationError::InvertedChange {
                    contract: id,
                    number: i + 1,
                });
            }
            if let ChangeKind::Power(kva) = change.kind {
                if !kva.is_finite() || kva < 0.0 {
                    return Err(ValidationError::Malformed {
                        contract: id,
                        detail: format!("history change #{} has invalid power [{kva}]", i + 1),
                    });
                }
            }
        }

        let metering_point = raw.metering_point.trim().to_string();
        Ok(Self {
            device_id: anonymizer.encode(&metering_point),
            id,
            date_start,
            date_end,
            power: kva_to_watts(raw.power_kva),
            tariff_id: raw.tariff_id,
            postal_code: raw.postal_code,
            activity_code: raw.activity_code,
            metering_point,
            changes: raw.changes,
            authorization: raw.authorization,
            hours: raw.hours,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn date_start(&self) -> DateTime<Utc> {
        self.date_start
    }

    pub fn date_end(&self) -> DateTime<Utc> {
        self.date_end
    }

    /// Clear metering point identifier. Only ever sent to the metering service.
    pub fn metering_point(&self) -> &str {
        &self.metering_point
    }

    /// Anonymised metering point, used as device id downstream.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn authorization(&self) -> Option<&Authorization> {
        self.authorization.as_ref()
    }

    /// Data quality problems that exclude the contract from a run.
    pub fn issues(&self) -> Vec<DataIssue> {
        let mut issues = Vec::new();
        if self.authorization.is_none() {
            issues.push(DataIssue::MissingAuthorization);
        }
        if self.hours.is_none() {
            issues.push(DataIssue::MissingHours);
        }
        issues
    }

    /// Off-peak suffix applied to the current tariff id, if any.
    fn hours_suffix(&self) -> Option<&str> {
        let hours = self.hours.as_ref()?;
        let modified = timefmt::start_of_day(hours.modified_at?);
        let current = hours.current.as_deref().filter(|h| !h.is_empty())?;
        (self.date_end > modified).then_some(current)
    }

    /// Canonical document published to the contracts store.
    pub fn document(&self) -> ContractDocument {
        let mut tariff_history: Vec<TariffPeriod> = Vec::new();
        let mut power_history: Vec<PowerPeriod> = Vec::new();
        for change in &self.changes {
            let date_start = timefmt::start_of_day(change.date_start);
            let date_end = timefmt::end_of_day(change.date_end);
            match &change.kind {
                ChangeKind::Tariff(tariff_id) => tariff_history.push(TariffPeriod {
                    date_start,
                    date_end,
                    tariff_id: tariff_id.clone(),
                }),
                ChangeKind::Power(kva) => power_history.push(PowerPeriod {
                    date_start,
                    date_end,
                    power: kva_to_watts(*kva),
                }),
            }
        }

        let tariff_from = tariff_history.last().map_or(self.date_start, |t| t.date_end);
        tariff_history.push(TariffPeriod {
            date_start: tariff_from,
            date_end: self.date_end,
            tariff_id: self.tariff_id.clone(),
        });
        let power_from = power_history.last().map_or(self.date_start, |p| p.date_end);
        power_history.push(PowerPeriod {
            date_start: power_from,
            date_end: self.date_end,
            power: self.power,
        });

        let mut tariff_id = self.tariff_id.clone();
        if let Some(suffix) = self.hours_suffix() {
            let suffixed = format!("{}~{}", self.tariff_id, suffix);
            for period in tariff_history.iter_mut() {
                if period.tariff_id == self.tariff_id {
                    period.tariff_id = suffixed.clone();
                }
            }
            tariff_id = suffixed;
        }

        let custom_fields = CustomFields {
            auth: self.authorization.as_ref().map(AuthSummary::from),
            hours: self
                .hours
                .as_ref()
                .map(|h| h.current.clone().unwrap_or_default()),
        };

        ContractDocument {
            contract_id: self.id.clone(),
            customer: Customer {
                customer_id: self.id.clone(),
                address: Address {
                    postal_code: self.postal_code.clone(),
                    country_code: "FR".to_string(),
                },
            },
            date_start: self.date_start,
            date_end: self.date_end,
            power: self.power,
            tariff_cost_id: kva_label(self.power),
            tariff_id,
            metering_point_id: self.device_id.clone(),
            activity_code: self.activity_code.clone(),
            custom_fields,
            devices: vec![Device {
                date_start: self.date_start,
                date_end: self.date_end,
                device_id: self.device_id.clone(),
            }],
            tariff: tariff_history.last().cloned().unwrap_or_default(),
            tariff_history,
            power_current: power_history.last().cloned().unwrap_or_default(),
            power_history,
        }
    }
}

/// Power in kVA as a decimal label: `6000` -> `"6.0"`, `6500` -> `"6.5"`.
fn kva_label(watts: u32) -> String {
    let kva = f64::from(watts) / 1000.0;
    if kva.fract() == 0.0 {
        format!("{kva:.1}")
    } else {
        format!("{kva}")
    }
}
