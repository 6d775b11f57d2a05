//! Structured per-run report, consumed for logging and auditing.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MeasureType, Watermark};

/// What the change detector decided to do with the contract record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PublishDecision {
    Create,
    Update,
    Skip,
}

impl fmt::Display for PublishDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PublishDecision::Create => "CREATE",
            PublishDecision::Update => "UPDATE",
            PublishDecision::Skip => "SKIP",
        })
    }
}

/// Walking direction of a fetch loop relative to the prior watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Older data, walked from the newest boundary towards the oldest.
    Backward,
    /// Newer data, walked from the oldest boundary towards the newest.
    Forward,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Backward => "backward",
            Direction::Forward => "forward",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReport {
    pub decision: PublishDecision,
    pub status: Option<u16>,
    pub error: Option<String>,
}

impl PublishReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of one fetch window: a count on success, an error otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowReport {
    pub direction: Direction,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub count: Option<usize>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReport {
    pub measures: usize,
    pub status: Option<u16>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureReport {
    pub kind: MeasureType,
    /// False when consent or dates leave nothing to fetch this run.
    pub eligible: bool,
    pub windows: Vec<WindowReport>,
    pub upload: Option<UploadReport>,
    /// Watermark persisted for this type after the run.
    pub watermark: Option<Watermark>,
}

impl MeasureReport {
    pub fn ineligible(kind: MeasureType, watermark: Option<Watermark>) -> Self {
        Self {
            kind,
            eligible: false,
            windows: Vec::new(),
            upload: None,
            watermark,
        }
    }

    pub fn failed_windows(&self) -> usize {
        self.windows.iter().filter(|w| w.error.is_some()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractReport {
    pub contract_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub publish: Option<PublishReport>,
    pub measures: Vec<MeasureReport>,
    /// Contract-level failure (watermark store unavailable, ...).
    pub failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedContract {
    pub contract_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub num_contracts: usize,
    pub results: BTreeMap<String, ContractReport>,
    pub skipped: Vec<SkippedContract>,
}

impl RunReport {
    pub fn start(started_at: DateTime<Utc>, num_contracts: usize) -> Self {
        Self {
            started_at,
            finished_at: None,
            status: RunStatus::Running,
            num_contracts,
            results: BTreeMap::new(),
            skipped: Vec::new(),
        }
    }

    pub fn add_result(&mut self, report: ContractReport) {
        self.results.insert(report.contract_id.clone(), report);
    }

    pub fn add_skipped(&mut self, contract_id: impl Into<String>, reason: impl Into<String>) {
        self.skipped.push(SkippedContract {
            contract_id: contract_id.into(),
            reason: reason.into(),
        });
    }

    pub fn finish(&mut self, finished_at: DateTime<Utc>) {
        self.status = RunStatus::Finished;
        self.finished_at = Some(finished_at);
    }

    /// Contracts that hit a contract-level failure.
    pub fn failures(&self) -> impl Iterator<Item = &ContractReport> {
        self.results.values().filter(|r| r.failure.is_some())
    }
}
