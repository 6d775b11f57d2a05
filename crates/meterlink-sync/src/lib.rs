//! Sync layer: change detection, watermark ranges, windowed fetches, upload
//! and persistence, orchestrated per contract by [`SyncEngine`].

pub mod change;
pub mod engine;
pub mod merge;
pub mod metering;
pub mod persist;
pub mod range;
pub mod window;

#[cfg(feature = "http")]
pub mod http;

pub use change::Comparison;
pub use engine::{PlannedMeasure, SyncEngine, SyncOptions, plan_contract};
pub use range::{FetchPlan, HISTORY_LIMIT_DAYS};

#[cfg(feature = "http")]
pub use http::{AnalyticsClient, AnalyticsConfig, SyncError};
#[cfg(feature = "http")]
pub use metering::{MeteringClient, MeteringConfig};
