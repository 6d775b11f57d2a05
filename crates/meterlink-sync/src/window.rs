//! Windowed fetch loop: walks a date range in bounded steps and stops a
//! direction at its first failing window.

use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use meterlink_core::{
    DateRange, Direction, MeasureType, Measurement, MeasurementBatch, RemoteError, WindowReport,
};
use tracing::{info, warn};

/// Result of one direction's fetch loop.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Measurements of every window that succeeded before the first failure.
    pub batch: MeasurementBatch,
    pub windows: Vec<WindowReport>,
    pub failed: bool,
}

/// Split `range` into windows of at most `step`, in visiting order.
///
/// Forward walks from `range.from` up, backward from `range.to` down, so that
/// fetched data always stays adjacent to the boundary it extends. The last
/// window is clipped at the far boundary. `None` (or a non-positive step) yields
/// the whole range as a single window.
pub fn windows(range: DateRange, direction: Direction, step: Option<Duration>) -> Vec<DateRange> {
    let Some(step) = step.filter(|s| *s > Duration::zero()) else {
        return vec![range];
    };

    let mut out = Vec::new();
    match direction {
        Direction::Forward => {
            let mut cursor = range.from;
            while cursor < range.to {
                let end = (cursor + step).min(range.to);
                out.extend(DateRange::new(cursor, end));
                cursor = end;
            }
        }
        Direction::Backward => {
            let mut cursor = range.to;
            while cursor > range.from {
                let start = (cursor - step).max(range.from);
                out.extend(DateRange::new(start, cursor));
                cursor = start;
            }
        }
    }
    out
}

/// Fetch `range` window by window.
///
/// A failing window is recorded and ends the loop; measurements from earlier
/// windows are kept.
pub async fn fetch_windowed<F, Fut>(
    kind: MeasureType,
    range: DateRange,
    direction: Direction,
    step: Option<Duration>,
    mut fetch: F,
) -> FetchOutcome
where
    F: FnMut(DateTime<Utc>, DateTime<Utc>) -> Fut,
    Fut: Future<Output = Result<Vec<Measurement>, RemoteError>>,
{
    let mut outcome = FetchOutcome::default();

    for window in windows(range, direction, step) {
        info!(
            kind = %kind,
            direction = %direction,
            from = %window.from.format("%d/%m/%Y"),
            to = %window.to.format("%d/%m/%Y"),
            "recovering measures"
        );
        match fetch(window.from, window.to).await {
            Ok(measurements) => {
                outcome.windows.push(WindowReport {
                    direction,
                    from: window.from,
                    to: window.to,
                    count: Some(measurements.len()),
                    error: None,
                });
                outcome.batch.append(measurements);
            }
            Err(e) => {
                warn!(kind = %kind, direction = %direction, error = %e, "window fetch failed, stopping this direction");
                outcome.windows.push(WindowReport {
                    direction,
                    from: window.from,
                    to: window.to,
                    count: None,
                    error: Some(e.to_string()),
                });
                outcome.failed = true;
                break;
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::cell::RefCell;

    fn ymd(m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, m, d, 0, 0, 0).unwrap()
    }

    fn week() -> Option<Duration> {
        Some(Duration::days(7))
    }

    #[test]
    fn twenty_days_forward_is_7_7_6() {
        let range = DateRange::new(ymd(6, 1), ymd(6, 21)).unwrap();
        let ws = windows(range, Direction::Forward, week());
        let lengths: Vec<i64> = ws.iter().map(|w| w.duration().num_days()).collect();
        assert_eq!(lengths, vec![7, 7, 6]);
        assert_eq!(ws[0].from, ymd(6, 1));
        assert_eq!(ws[2].to, ymd(6, 21));
    }

    #[test]
    fn backward_walks_from_the_newest_boundary() {
        let range = DateRange::new(ymd(6, 1), ymd(6, 21)).unwrap();
        let ws = windows(range, Direction::Backward, week());
        assert_eq!(ws.len(), 3);
        assert_eq!(ws[0], DateRange::new(ymd(6, 14), ymd(6, 21)).unwrap());
        assert_eq!(ws[1], DateRange::new(ymd(6, 7), ymd(6, 14)).unwrap());
        assert_eq!(ws[2], DateRange::new(ymd(6, 1), ymd(6, 7)).unwrap());
    }

    #[test]
    fn short_range_is_one_clipped_window() {
        let range = DateRange::new(ymd(6, 1), ymd(6, 2)).unwrap();
        assert_eq!(windows(range, Direction::Backward, week()), vec![range]);
    }

    #[test]
    fn unstepped_types_fetch_whole_range() {
        let range = DateRange::new(ymd(1, 1), ymd(6, 30)).unwrap();
        assert_eq!(windows(range, Direction::Forward, None), vec![range]);
        assert_eq!(
            windows(range, Direction::Forward, Some(Duration::zero())),
            vec![range]
        );
    }

    #[tokio::test]
    async fn accumulates_every_successful_window() {
        let range = DateRange::new(ymd(6, 1), ymd(6, 21)).unwrap();
        let outcome = fetch_windowed(MeasureType::Cdc, range, Direction::Forward, week(), |from, _to| async move {
            Ok::<_, RemoteError>(vec![Measurement::new(MeasureType::Cdc, from, 1)])
        })
        .await;
        assert!(!outcome.failed);
        assert_eq!(outcome.batch.len(), 3);
        assert_eq!(outcome.windows.len(), 3);
        assert!(outcome.windows.iter().all(|w| w.count == Some(1)));
    }

    #[tokio::test]
    async fn failure_aborts_remaining_windows_and_keeps_earlier_ones() {
        let range = DateRange::new(ymd(6, 1), ymd(6, 21)).unwrap();
        let calls = RefCell::new(0usize);
        let outcome = fetch_windowed(MeasureType::Cdc, range, Direction::Backward, week(), |from, to| {
            *calls.borrow_mut() += 1;
            let n = *calls.borrow();
            async move {
                if n == 2 {
                    Err(RemoteError::Transport("timeout".into()))
                } else {
                    Ok(vec![
                        Measurement::new(MeasureType::Cdc, from, 10),
                        Measurement::new(MeasureType::Cdc, to, 20),
                    ])
                }
            }
        })
        .await;

        assert!(outcome.failed);
        assert_eq!(*calls.borrow(), 2, "window 3 must never be attempted");
        assert_eq!(outcome.batch.len(), 2);
        assert_eq!(outcome.batch.earliest(), Some(ymd(6, 14)));
        assert_eq!(outcome.windows.len(), 2);
        assert_eq!(outcome.windows[0].count, Some(2));
        assert_eq!(outcome.windows[1].error.as_deref(), Some("timeout"));
        assert_eq!(outcome.windows[1].count, None);
    }
}
