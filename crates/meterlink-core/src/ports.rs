//! Interfaces of the remote and local collaborators driven by the sync engine.
//!
//! Implementations are injected into the engine at construction time so that
//! transports can be swapped for test doubles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Contract, ContractDocument, MeasureType, Measurement, MeasurementPayload, PersistenceError,
    RemoteError, ValidationError, WatermarkState,
};

/// One row of a contract dataset: a validated contract, or the reason it was rejected.
pub type DatasetEntry = Result<Contract, ValidationError>;

/// Yields the full contract set for a run.
pub trait ContractSource {
    type Error;

    fn contracts(&self) -> Result<Vec<DatasetEntry>, Self::Error>;
}

/// Contract records held by the analytics platform.
#[async_trait]
pub trait ContractsApi: Send + Sync {
    async fn exists(&self, contract_id: &str) -> Result<bool, RemoteError>;

    /// Returns the success status code.
    async fn create(&self, document: &ContractDocument) -> Result<u16, RemoteError>;

    /// Returns the success status code.
    async fn update(&self, document: &ContractDocument) -> Result<u16, RemoteError>;
}

/// Time-series readings from the metering service.
#[async_trait]
pub trait MeteringApi: Send + Sync {
    /// Measurements of `kind` between `from` and `to` for a clear metering point id.
    async fn fetch(
        &self,
        metering_point: &str,
        kind: MeasureType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Measurement>, RemoteError>;
}

/// Measurement ingestion on the analytics platform.
#[async_trait]
pub trait MeasurementUploader: Send + Sync {
    /// Returns the success status code.
    async fn upload(&self, payload: &MeasurementPayload) -> Result<u16, RemoteError>;
}

/// Local per-contract synchronisation state.
///
/// `upsert` replaces the whole record atomically; concurrent upserts for
/// distinct contracts must not interfere.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn get(&self, contract_id: &str) -> Result<Option<WatermarkState>, PersistenceError>;

    async fn upsert(&self, contract_id: &str, state: &WatermarkState)
    -> Result<(), PersistenceError>;
}
