//! Shared types for meterlink: contracts, measurements, watermarks, reports,
//! and the collaborator interfaces driven by the sync engine.

pub mod anonymize;
pub mod contract;
pub mod document;
pub mod error;
pub mod measure;
pub mod ports;
pub mod report;
pub mod timefmt;
pub mod watermark;

pub use anonymize::Anonymizer;
pub use contract::{
    Authorization, ChangeKind, Contract, ContractChange, DataIssue, DiscriminationHours,
    NewContract,
};
pub use document::{ContractDocument, fingerprint};
pub use error::{PersistenceError, RemoteError, ValidationError};
pub use measure::{MeasureType, Measurement, MeasurementBatch, MeasurementPayload};
pub use ports::{
    ContractSource, ContractsApi, DatasetEntry, MeasurementUploader, MeteringApi, WatermarkStore,
};
pub use report::{
    ContractReport, Direction, MeasureReport, PublishDecision, PublishReport, RunReport,
    RunStatus, UploadReport, WindowReport,
};
pub use watermark::{DateRange, Watermark, WatermarkState};
