//! Merges both fetch directions into one upload and picks the watermark to persist.

use meterlink_core::{
    MeasureType, MeasurementBatch, MeasurementPayload, MeasurementUploader, UploadReport, Watermark,
};
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub watermark: Option<Watermark>,
    /// `None` when there was nothing to upload.
    pub upload: Option<UploadReport>,
}

/// Watermark after `batch` is confirmed delivered: the prior span widened to
/// cover every delivered timestamp. An empty batch leaves `prior` unchanged.
pub fn advance(prior: Option<Watermark>, batch: &MeasurementBatch) -> Option<Watermark> {
    let (Some(earliest), Some(latest)) = (batch.earliest(), batch.latest()) else {
        return prior;
    };
    match prior {
        Some(prior) => Some(prior.widen(earliest, latest)),
        None => Watermark::new(earliest, latest),
    }
}

/// Concatenate backward and forward results, upload them as one payload, and
/// return the watermark to persist.
///
/// Duplicated instants are uploaded as-is. On upload failure the prior
/// watermark is kept.
pub async fn merge_and_upload(
    kind: MeasureType,
    device_id: &str,
    prior: Option<Watermark>,
    backward: MeasurementBatch,
    forward: MeasurementBatch,
    uploader: &dyn MeasurementUploader,
) -> MergeOutcome {
    let combined = backward.concat(forward);
    if combined.is_empty() {
        info!(kind = %kind, "no measures to send");
        return MergeOutcome {
            watermark: prior,
            upload: None,
        };
    }

    let candidate = advance(prior, &combined);
    let payload = MeasurementPayload::new(kind, device_id, combined);
    let measures = payload.len();

    match uploader.upload(&payload).await {
        Ok(status) => {
            info!(kind = %kind, measures, "measures sent");
            if let Some(w) = candidate {
                debug!(kind = %kind, min = %w.min(), max = %w.max(), "watermark advanced");
            }
            MergeOutcome {
                watermark: candidate,
                upload: Some(UploadReport {
                    measures,
                    status: Some(status),
                    error: None,
                }),
            }
        }
        Err(e) => {
            error!(kind = %kind, error = %e, "measure upload rejected, keeping previous watermark");
            MergeOutcome {
                watermark: prior,
                upload: Some(UploadReport {
                    measures,
                    status: e.status(),
                    error: Some(e.to_string()),
                }),
            }
        }
    }
}
