//! Persistence updater: one atomic watermark write per contract per run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use meterlink_core::{MeasureType, PersistenceError, Watermark, WatermarkState, WatermarkStore};
use tracing::debug;

/// Build the state to persist from the prior record and this run's results.
///
/// A type's persisted span never shrinks: a new watermark is widened with the
/// prior one, and a missing new value keeps the prior one.
pub fn next_state(
    prior: &WatermarkState,
    fingerprint: Option<String>,
    metering_point_id: &str,
    watermarks: &BTreeMap<MeasureType, Option<Watermark>>,
    now: DateTime<Utc>,
) -> WatermarkState {
    let mut state = WatermarkState {
        fingerprint,
        metering_point_id: Some(metering_point_id.to_string()),
        watermarks: prior.watermarks.clone(),
        last_op: Some(now),
    };
    for (&kind, new) in watermarks {
        let merged = match (prior.watermark(kind), new) {
            (Some(old), Some(new)) => Some(old.widen(new.min(), new.max())),
            (old, None) => old,
            (None, Some(new)) => Some(*new),
        };
        state.set_watermark(kind, merged);
    }
    state
}

/// Write the contract's fingerprint and watermarks in a single upsert.
pub async fn upsert_watermark(
    store: &dyn WatermarkStore,
    contract_id: &str,
    state: &WatermarkState,
) -> Result<(), PersistenceError> {
    store.upsert(contract_id, state).await?;
    debug!(contract = %contract_id, watermarks = ?state.watermarks, "contract state saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ymd(m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, m, d, 0, 0, 0).unwrap()
    }

    fn prior() -> WatermarkState {
        let mut state = WatermarkState {
            fingerprint: Some("old".into()),
            ..Default::default()
        };
        state.set_watermark(MeasureType::Cdc, Watermark::new(ymd(6, 1), ymd(6, 15)));
        state.set_watermark(MeasureType::Pmax, Watermark::new(ymd(1, 1), ymd(5, 1)));
        state
    }

    #[test]
    fn untouched_types_keep_their_watermark() {
        let mut new = BTreeMap::new();
        new.insert(MeasureType::Cdc, Watermark::new(ymd(5, 1), ymd(6, 25)));
        let state = next_state(&prior(), Some("new".into()), "dev", &new, ymd(7, 5));

        assert_eq!(state.fingerprint.as_deref(), Some("new"));
        assert_eq!(state.metering_point_id.as_deref(), Some("dev"));
        assert_eq!(state.last_op, Some(ymd(7, 5)));
        assert_eq!(state.watermark(MeasureType::Cdc), Watermark::new(ymd(5, 1), ymd(6, 25)));
        assert_eq!(state.watermark(MeasureType::Pmax), Watermark::new(ymd(1, 1), ymd(5, 1)));
        assert_eq!(state.watermark(MeasureType::Consoglo), None);
    }

    #[test]
    fn narrower_result_cannot_shrink_watermark() {
        let mut new = BTreeMap::new();
        new.insert(MeasureType::Cdc, Watermark::new(ymd(6, 5), ymd(6, 10)));
        new.insert(MeasureType::Pmax, None);
        let state = next_state(&prior(), None, "dev", &new, ymd(7, 5));
        assert_eq!(state.watermark(MeasureType::Cdc), Watermark::new(ymd(6, 1), ymd(6, 15)));
        assert_eq!(state.watermark(MeasureType::Pmax), Watermark::new(ymd(1, 1), ymd(5, 1)));
    }
}
