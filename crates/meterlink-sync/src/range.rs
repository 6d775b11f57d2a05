//! Watermark range resolution: which older and newer data is still missing.

use chrono::{DateTime, Duration, Utc};
use meterlink_core::{Authorization, DateRange, MeasureType, Watermark};

/// Oldest data the metering service serves, counted back from now.
pub const HISTORY_LIMIT_DAYS: i64 = 1095;

/// Sub-ranges to fetch for one type. Either or both may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPlan {
    /// Older than the prior watermark (or the whole eligible range on first sync).
    pub backward: Option<DateRange>,
    /// Newer than the prior watermark.
    pub forward: Option<DateRange>,
}

impl FetchPlan {
    pub fn is_empty(&self) -> bool {
        self.backward.is_none() && self.forward.is_none()
    }
}

/// Interval of data the contract may fetch for `kind` right now.
///
/// `None` when consent is withheld or the interval is empty.
pub fn eligible_range(
    kind: MeasureType,
    contract_start: DateTime<Utc>,
    contract_end: DateTime<Utc>,
    auth: &Authorization,
    margin_days: i64,
    now: DateTime<Utc>,
) -> Option<DateRange> {
    let oldest = now - Duration::days(HISTORY_LIMIT_DAYS);
    let newest = contract_end.min(now - Duration::days(margin_days));

    let (min, max) = if kind.is_curve() {
        if !auth.auth_30 {
            return None;
        }
        let mut min = contract_start.max(oldest);
        if let Some(start) = auth.date_start_30 {
            min = min.max(start);
        }
        let max = auth.date_end_30.map_or(newest, |end| newest.min(end));
        (min, max)
    } else {
        if !auth.auth_day {
            return None;
        }
        let min = contract_start.max(oldest);
        let max = auth.date_end_day.map_or(newest, |end| newest.min(end));
        (min, max)
    };

    DateRange::new(min, max)
}

/// Split the eligible range around the prior watermark.
///
/// Returns `None` when nothing is eligible for `kind`; an empty plan when the
/// prior watermark already covers everything eligible.
pub fn resolve(
    kind: MeasureType,
    contract_start: DateTime<Utc>,
    contract_end: DateTime<Utc>,
    auth: &Authorization,
    prior: Option<Watermark>,
    margin_days: i64,
    now: DateTime<Utc>,
) -> Option<FetchPlan> {
    let eligible = eligible_range(kind, contract_start, contract_end, auth, margin_days, now)?;

    let plan = match prior {
        None => FetchPlan {
            backward: Some(eligible),
            forward: None,
        },
        Some(prior) => FetchPlan {
            backward: (prior.min() > eligible.from)
                .then(|| DateRange::new(eligible.from, prior.min().min(eligible.to)))
                .flatten(),
            forward: (prior.max() < eligible.to)
                .then(|| DateRange::new(prior.max().max(eligible.from), eligible.to))
                .flatten(),
        },
    };
    Some(plan)
}
