//! Contract orchestrator: drives change detection, range resolution, windowed
//! fetches, upload and persistence for every contract of a run.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use meterlink_core::{
    Authorization, Contract, ContractDocument, ContractReport, ContractsApi, DatasetEntry,
    Direction, MeasureReport, MeasureType, MeasurementUploader, MeteringApi, PersistenceError,
    PublishDecision, PublishReport, RunReport, Watermark, WatermarkStore,
};
use tracing::{debug, error, info, warn};

use crate::change::{self, Comparison};
use crate::merge;
use crate::persist;
use crate::range::{self, FetchPlan};
use crate::window::{FetchOutcome, fetch_windowed};

/// Tunables for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Days subtracted from now to leave recent, not yet consolidated data alone.
    pub margin_days: i64,
    /// Contracts processed concurrently. 1 is fully sequential.
    pub workers: usize,
    /// Measure types to synchronise, in processing order.
    pub types: Vec<MeasureType>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            margin_days: 10,
            workers: 1,
            types: MeasureType::ALL.to_vec(),
        }
    }
}

/// Resolved fetch plan for one type, as shown by a dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMeasure {
    pub kind: MeasureType,
    pub prior: Option<Watermark>,
    /// `None` when the type is not eligible for this contract.
    pub plan: Option<FetchPlan>,
}

/// The synchronisation engine, wired to its collaborators.
pub struct SyncEngine {
    contracts: Arc<dyn ContractsApi>,
    metering: Arc<dyn MeteringApi>,
    uploader: Arc<dyn MeasurementUploader>,
    store: Arc<dyn WatermarkStore>,
    options: SyncOptions,
}

impl SyncEngine {
    pub fn new(
        contracts: Arc<dyn ContractsApi>,
        metering: Arc<dyn MeteringApi>,
        uploader: Arc<dyn MeasurementUploader>,
        store: Arc<dyn WatermarkStore>,
        mut options: SyncOptions,
    ) -> Self {
        let mut seen = HashSet::new();
        options.types.retain(|kind| seen.insert(*kind));
        Self {
            contracts,
            metering,
            uploader,
            store,
            options,
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub async fn run(&self, entries: Vec<DatasetEntry>) -> RunReport {
        self.run_at(entries, Utc::now()).await
    }

    pub async fn run_at(&self, entries: Vec<DatasetEntry>, now: DateTime<Utc>) -> RunReport {
        let report = RunReport::start(Utc::now(), entries.len());
        self.run_with_report(report, entries, now).await
    }

    /// Process every dataset entry into an already started `report`,
    /// resolving ranges against `now`.
    ///
    /// Rejected rows, repeated contract ids and contracts with data quality
    /// issues are listed as skipped. No single contract failure aborts the run.
    pub async fn run_with_report(
        &self,
        mut report: RunReport,
        entries: Vec<DatasetEntry>,
        now: DateTime<Utc>,
    ) -> RunReport {
        let mut contracts = Vec::with_capacity(entries.len());
        let mut seen = HashSet::new();
        for entry in entries {
            match entry {
                Err(e) => {
                    error!(contract = %e.contract(), error = %e, "contract row rejected");
                    report.add_skipped(e.contract(), e.to_string());
                }
                // Each contract id is handed to exactly one worker; the first row wins.
                Ok(contract) if !seen.insert(contract.id().to_string()) => {
                    warn!(contract = %contract.id(), "duplicate contract id in dataset");
                    report.add_skipped(contract.id(), "duplicate contract id in dataset");
                }
                Ok(contract) => {
                    let issues = contract.issues();
                    if issues.is_empty() {
                        contracts.push(contract);
                    } else {
                        let reason = issues
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join("; ");
                        warn!(contract = %contract.id(), reason = %reason, "contract will not be processed");
                        report.add_skipped(contract.id(), reason);
                    }
                }
            }
        }

        let workers = self.options.workers.max(1);
        info!(contracts = contracts.len(), workers, "processing contracts");

        let results: Vec<ContractReport> = stream::iter(contracts.iter())
            .map(|contract| self.sync_contract(contract, now))
            .buffer_unordered(workers)
            .collect()
            .await;
        for result in results {
            report.add_result(result);
        }

        report.finish(Utc::now());
        info!(
            processed = report.results.len(),
            skipped = report.skipped.len(),
            failed = report.failures().count(),
            "run finished"
        );
        report
    }

    /// Run the full state machine for one contract.
    ///
    /// State is read once up front and written once at the end, after every
    /// fetch and upload for the contract has completed.
    pub async fn sync_contract(&self, contract: &Contract, now: DateTime<Utc>) -> ContractReport {
        let id = contract.id();
        info!(contract = %id, "processing contract");
        let started_at = Utc::now();
        let mut report = ContractReport {
            contract_id: id.to_string(),
            started_at,
            finished_at: started_at,
            publish: None,
            measures: Vec::new(),
            failure: None,
        };

        let prior = match self.store.get(id).await {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                error!(contract = %id, error = %e, "cannot read stored state");
                report.failure = Some(e.to_string());
                report.finished_at = Utc::now();
                return report;
            }
        };

        let document = contract.document();
        let fingerprint = match meterlink_core::fingerprint(&document) {
            Ok(fp) => fp,
            Err(e) => {
                error!(contract = %id, error = %e, "cannot fingerprint contract document");
                report.failure = Some(format!("cannot fingerprint contract document: {e}"));
                report.finished_at = Utc::now();
                return report;
            }
        };

        let publish = self
            .publish(&document, prior.fingerprint.as_deref(), &fingerprint)
            .await;
        // A failed publish keeps the old fingerprint so the next run retries it.
        let stored_fingerprint = if publish.succeeded() {
            Some(fingerprint)
        } else {
            prior.fingerprint.clone()
        };
        report.publish = Some(publish);

        let auth = contract.authorization().cloned().unwrap_or_default();
        let mut watermarks = BTreeMap::new();
        for &kind in &self.options.types {
            let measure = self
                .sync_measure(contract, &auth, kind, prior.watermark(kind), now)
                .await;
            watermarks.insert(kind, measure.watermark);
            report.measures.push(measure);
        }

        let state = persist::next_state(
            &prior,
            stored_fingerprint,
            contract.device_id(),
            &watermarks,
            now,
        );
        match persist::upsert_watermark(self.store.as_ref(), id, &state).await {
            Ok(()) => {
                for measure in report.measures.iter_mut() {
                    measure.watermark = state.watermark(measure.kind);
                }
            }
            Err(e) => {
                error!(contract = %id, error = %e, "cannot save contract state");
                report.failure = Some(e.to_string());
                for measure in report.measures.iter_mut() {
                    measure.watermark = prior.watermark(measure.kind);
                }
            }
        }

        report.finished_at = Utc::now();
        info!(contract = %id, "contract finished");
        report
    }

    async fn publish(
        &self,
        document: &ContractDocument,
        stored: Option<&str>,
        fingerprint: &str,
    ) -> PublishReport {
        let id = document.contract_id.as_str();
        let comparison = change::compare(stored, fingerprint);
        let exists = match comparison {
            Comparison::Unknown => match self.contracts.exists(id).await {
                Ok(exists) => exists,
                Err(e) => {
                    warn!(contract = %id, error = %e, "contract lookup failed, treating as new");
                    false
                }
            },
            Comparison::Changed | Comparison::Unchanged => false,
        };

        let decision = change::decide(comparison, || exists);
        let result = match decision {
            PublishDecision::Skip => {
                info!(contract = %id, "contract has no modifications, nothing to publish");
                return PublishReport {
                    decision,
                    status: None,
                    error: None,
                };
            }
            PublishDecision::Create => self.contracts.create(document).await,
            PublishDecision::Update => self.contracts.update(document).await,
        };

        match result {
            Ok(status) => {
                info!(contract = %id, decision = %decision, status, "contract published");
                PublishReport {
                    decision,
                    status: Some(status),
                    error: None,
                }
            }
            Err(e) => {
                error!(contract = %id, decision = %decision, error = %e, "contract publish rejected");
                PublishReport {
                    decision,
                    status: e.status(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn sync_measure(
        &self,
        contract: &Contract,
        auth: &Authorization,
        kind: MeasureType,
        prior: Option<Watermark>,
        now: DateTime<Utc>,
    ) -> MeasureReport {
        let Some(plan) = range::resolve(
            kind,
            contract.date_start(),
            contract.date_end(),
            auth,
            prior,
            self.options.margin_days,
            now,
        ) else {
            debug!(contract = %contract.id(), kind = %kind, "no authorization for this measure type");
            return MeasureReport::ineligible(kind, prior);
        };
        debug!(contract = %contract.id(), kind = %kind, plan = ?plan, "fetch plan resolved");

        let step = kind.window_step();
        let metering = self.metering.as_ref();
        let point = contract.metering_point();
        let fetch = |from: DateTime<Utc>, to: DateTime<Utc>| metering.fetch(point, kind, from, to);

        let backward = match plan.backward {
            Some(range) => fetch_windowed(kind, range, Direction::Backward, step, fetch).await,
            None => FetchOutcome::default(),
        };
        let forward = match plan.forward {
            Some(range) => fetch_windowed(kind, range, Direction::Forward, step, fetch).await,
            None => FetchOutcome::default(),
        };

        let mut windows = backward.windows;
        windows.extend(forward.windows);

        let merged = merge::merge_and_upload(
            kind,
            contract.device_id(),
            prior,
            backward.batch,
            forward.batch,
            self.uploader.as_ref(),
        )
        .await;

        MeasureReport {
            kind,
            eligible: true,
            windows,
            upload: merged.upload,
            watermark: merged.watermark,
        }
    }
}

/// Fetch plan per type for `contract`, read from `store` without calling any
/// remote collaborator.
pub async fn plan_contract(
    store: &dyn WatermarkStore,
    contract: &Contract,
    options: &SyncOptions,
    now: DateTime<Utc>,
) -> Result<Vec<PlannedMeasure>, PersistenceError> {
    let state = store.get(contract.id()).await?.unwrap_or_default();
    let auth = contract.authorization().cloned().unwrap_or_default();
    Ok(options
        .types
        .iter()
        .map(|&kind| {
            let prior = state.watermark(kind);
            PlannedMeasure {
                kind,
                prior,
                plan: range::resolve(
                    kind,
                    contract.date_start(),
                    contract.date_end(),
                    &auth,
                    prior,
                    options.margin_days,
                    now,
                ),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use meterlink_core::{
        Anonymizer, DiscriminationHours, Measurement, MeasurementPayload, NewContract,
        RemoteError, ValidationError, WatermarkState,
    };
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ymd(m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, m, d, 0, 0, 0).unwrap()
    }

    // With a 10 day margin the newest eligible instant is 2023-06-25.
    fn now() -> DateTime<Utc> {
        ymd(7, 5)
    }

    #[derive(Default)]
    struct FakeContracts {
        existing: Mutex<HashSet<String>>,
        reject: bool,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ContractsApi for FakeContracts {
        async fn exists(&self, contract_id: &str) -> Result<bool, RemoteError> {
            self.calls.lock().unwrap().push(format!("exists {contract_id}"));
            Ok(self.existing.lock().unwrap().contains(contract_id))
        }

        async fn create(&self, document: &ContractDocument) -> Result<u16, RemoteError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("create {}", document.contract_id));
            if self.reject {
                return Err(RemoteError::Rejected {
                    status: 400,
                    body: "bad document".into(),
                });
            }
            self.existing
                .lock()
                .unwrap()
                .insert(document.contract_id.clone());
            Ok(201)
        }

        async fn update(&self, document: &ContractDocument) -> Result<u16, RemoteError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("update {}", document.contract_id));
            Ok(200)
        }
    }

    /// Returns one measurement at each window boundary; optionally fails the n-th call.
    #[derive(Default)]
    struct FakeMetering {
        fail_on_call: Option<usize>,
        calls: AtomicUsize,
        windows: Mutex<Vec<(MeasureType, DateTime<Utc>, DateTime<Utc>)>>,
    }

    #[async_trait]
    impl MeteringApi for FakeMetering {
        async fn fetch(
            &self,
            _metering_point: &str,
            kind: MeasureType,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<Measurement>, RemoteError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.windows.lock().unwrap().push((kind, from, to));
            if self.fail_on_call == Some(n) {
                return Err(RemoteError::Transport("service unavailable".into()));
            }
            Ok(vec![
                Measurement::new(kind, from, 500),
                Measurement::new(kind, to, 700),
            ])
        }
    }

    #[derive(Default)]
    struct FakeUploader {
        fail: bool,
        payloads: Mutex<Vec<MeasurementPayload>>,
    }

    #[async_trait]
    impl MeasurementUploader for FakeUploader {
        async fn upload(&self, payload: &MeasurementPayload) -> Result<u16, RemoteError> {
            self.payloads.lock().unwrap().push(payload.clone());
            if self.fail {
                Err(RemoteError::Rejected {
                    status: 503,
                    body: "maintenance".into(),
                })
            } else {
                Ok(200)
            }
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        states: Mutex<HashMap<String, WatermarkState>>,
        unavailable: bool,
        read_only: bool,
    }

    impl MemoryStore {
        fn state(&self, id: &str) -> Option<WatermarkState> {
            self.states.lock().unwrap().get(id).cloned()
        }
    }

    #[async_trait]
    impl WatermarkStore for MemoryStore {
        async fn get(&self, contract_id: &str) -> Result<Option<WatermarkState>, PersistenceError> {
            if self.unavailable {
                return Err(PersistenceError("connection refused".into()));
            }
            Ok(self.state(contract_id))
        }

        async fn upsert(
            &self,
            contract_id: &str,
            state: &WatermarkState,
        ) -> Result<(), PersistenceError> {
            if self.unavailable {
                return Err(PersistenceError("connection refused".into()));
            }
            if self.read_only {
                return Err(PersistenceError("database is read-only".into()));
            }
            self.states
                .lock()
                .unwrap()
                .insert(contract_id.to_string(), state.clone());
            Ok(())
        }
    }

    struct Harness {
        contracts: Arc<FakeContracts>,
        metering: Arc<FakeMetering>,
        uploader: Arc<FakeUploader>,
        store: Arc<MemoryStore>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                contracts: Arc::new(FakeContracts::default()),
                metering: Arc::new(FakeMetering::default()),
                uploader: Arc::new(FakeUploader::default()),
                store: Arc::new(MemoryStore::default()),
            }
        }

        fn engine(&self, types: &[MeasureType]) -> SyncEngine {
            SyncEngine::new(
                self.contracts.clone(),
                self.metering.clone(),
                self.uploader.clone(),
                self.store.clone(),
                SyncOptions {
                    margin_days: 10,
                    workers: 1,
                    types: types.to_vec(),
                },
            )
        }

        fn metering_windows(&self) -> Vec<(MeasureType, DateTime<Utc>, DateTime<Utc>)> {
            self.metering.windows.lock().unwrap().clone()
        }
    }

    fn new_contract(id: &str, auth_30: bool) -> NewContract {
        NewContract {
            contract_id: id.into(),
            date_start: NaiveDate::from_ymd_opt(2023, 5, 1).unwrap(),
            date_end: None,
            power_kva: 9.0,
            tariff_id: "BASE".into(),
            postal_code: "44000".into(),
            activity_code: "0000Z".into(),
            metering_point: format!("PDL-{id}"),
            changes: vec![],
            authorization: Some(Authorization {
                auth_30,
                auth_day: true,
                ..Default::default()
            }),
            hours: Some(DiscriminationHours::default()),
        }
    }

    fn contract(id: &str) -> Contract {
        Contract::new(new_contract(id, true), &Anonymizer::new("k")).unwrap()
    }

    fn seed_cdc(store: &MemoryStore, id: &str, watermark: Option<Watermark>) {
        let mut state = WatermarkState::default();
        state.set_watermark(MeasureType::Cdc, watermark);
        store.states.lock().unwrap().insert(id.to_string(), state);
    }

    #[tokio::test]
    async fn prior_watermark_is_extended_both_ways() {
        let h = Harness::new();
        seed_cdc(&h.store, "C1", Watermark::new(ymd(6, 1), ymd(6, 15)));
        let engine = h.engine(&[MeasureType::Cdc]);

        let report = engine.sync_contract(&contract("C1"), now()).await;

        assert!(report.failure.is_none());
        let cdc = &report.measures[0];
        let backward = cdc
            .windows
            .iter()
            .filter(|w| w.direction == Direction::Backward)
            .count();
        let forward: Vec<_> = cdc
            .windows
            .iter()
            .filter(|w| w.direction == Direction::Forward)
            .collect();
        // 31 days back in 7 day steps, 10 days forward.
        assert_eq!(backward, 5);
        assert_eq!(forward.len(), 2);
        assert_eq!(forward[0].from, ymd(6, 15));
        assert_eq!(forward[1].to, ymd(6, 25));

        let stored = h.store.state("C1").unwrap();
        assert_eq!(
            stored.watermark(MeasureType::Cdc),
            Watermark::new(ymd(5, 1), ymd(6, 25))
        );
        assert_eq!(h.uploader.payloads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bootstrap_fetches_only_backward() {
        let h = Harness::new();
        let engine = h.engine(&[MeasureType::Pmax]);

        engine.sync_contract(&contract("C1"), now()).await;

        assert_eq!(
            h.metering_windows(),
            vec![(MeasureType::Pmax, ymd(5, 1), ymd(6, 25))]
        );
        let stored = h.store.state("C1").unwrap();
        assert_eq!(
            stored.watermark(MeasureType::Pmax),
            Watermark::new(ymd(5, 1), ymd(6, 25))
        );
    }

    #[tokio::test]
    async fn unchanged_contract_is_not_republished() {
        let h = Harness::new();
        let engine = h.engine(&[MeasureType::Pmax]);

        let first = engine.sync_contract(&contract("C1"), now()).await;
        assert_eq!(first.publish.unwrap().decision, PublishDecision::Create);
        assert_eq!(
            *h.contracts.calls.lock().unwrap(),
            vec!["exists C1".to_string(), "create C1".to_string()]
        );

        let second = engine.sync_contract(&contract("C1"), now()).await;
        assert_eq!(second.publish.unwrap().decision, PublishDecision::Skip);
        assert_eq!(h.contracts.calls.lock().unwrap().len(), 2);
        // Everything eligible is already covered.
        assert_eq!(h.metering_windows().len(), 1);
    }

    #[tokio::test]
    async fn changed_contract_is_updated() {
        let h = Harness::new();
        let engine = h.engine(&[]);
        engine.sync_contract(&contract("C1"), now()).await;

        let mut raw = new_contract("C1", true);
        raw.power_kva = 12.0;
        let changed = Contract::new(raw, &Anonymizer::new("k")).unwrap();
        let report = engine.sync_contract(&changed, now()).await;

        assert_eq!(report.publish.unwrap().decision, PublishDecision::Update);
        assert_eq!(
            h.contracts.calls.lock().unwrap().last().map(String::as_str),
            Some("update C1")
        );
    }

    #[tokio::test]
    async fn contract_known_remotely_is_updated_on_first_run() {
        let h = Harness::new();
        h.contracts
            .existing
            .lock()
            .unwrap()
            .insert("C1".to_string());
        let report = h.engine(&[]).sync_contract(&contract("C1"), now()).await;
        assert_eq!(report.publish.unwrap().decision, PublishDecision::Update);
    }

    #[tokio::test]
    async fn failed_publish_is_retried_next_run() {
        let h = Harness {
            contracts: Arc::new(FakeContracts {
                reject: true,
                ..Default::default()
            }),
            ..Harness::new()
        };
        let engine = h.engine(&[]);

        let report = engine.sync_contract(&contract("C1"), now()).await;
        let publish = report.publish.unwrap();
        assert_eq!(publish.status, Some(400));
        assert!(h.store.state("C1").unwrap().fingerprint.is_none());

        engine.sync_contract(&contract("C1"), now()).await;
        let calls = h.contracts.calls.lock().unwrap();
        assert_eq!(calls.iter().filter(|c| c.starts_with("create")).count(), 2);
    }

    #[tokio::test]
    async fn failed_upload_keeps_watermark() {
        let h = Harness {
            uploader: Arc::new(FakeUploader {
                fail: true,
                ..Default::default()
            }),
            ..Harness::new()
        };
        let prior = Watermark::new(ymd(6, 1), ymd(6, 15));
        seed_cdc(&h.store, "C1", prior);

        let report = h
            .engine(&[MeasureType::Cdc])
            .sync_contract(&contract("C1"), now())
            .await;

        let cdc = &report.measures[0];
        assert_eq!(cdc.upload.as_ref().unwrap().status, Some(503));
        assert_eq!(h.store.state("C1").unwrap().watermark(MeasureType::Cdc), prior);
    }

    #[tokio::test]
    async fn watermarks_only_widen_across_runs() {
        let h = Harness::new();
        seed_cdc(&h.store, "C1", Watermark::new(ymd(6, 10), ymd(6, 12)));
        let engine = h.engine(&[MeasureType::Cdc]);

        let mut previous = h.store.state("C1").unwrap().watermark(MeasureType::Cdc).unwrap();
        for day in [5, 12, 20] {
            let run_at = Utc.with_ymd_and_hms(2023, 7, day, 0, 0, 0).unwrap();
            engine.sync_contract(&contract("C1"), run_at).await;
            let current = h.store.state("C1").unwrap().watermark(MeasureType::Cdc).unwrap();
            assert!(current.min() <= previous.min());
            assert!(current.max() >= previous.max());
            previous = current;
        }
        assert_eq!(previous.max(), ymd(7, 10));
    }

    #[tokio::test]
    async fn fetch_failure_keeps_covered_span_contiguous() {
        let h = Harness {
            metering: Arc::new(FakeMetering {
                fail_on_call: Some(2),
                ..Default::default()
            }),
            ..Harness::new()
        };
        let engine = h.engine(&[MeasureType::Cdc]);

        let report = engine.sync_contract(&contract("C1"), now()).await;
        let cdc = &report.measures[0];
        assert_eq!(cdc.windows.len(), 2);
        assert_eq!(cdc.failed_windows(), 1);
        assert_eq!(
            h.store.state("C1").unwrap().watermark(MeasureType::Cdc),
            Watermark::new(ymd(6, 18), ymd(6, 25))
        );

        // Next run resumes backward from the confirmed minimum.
        let plans = plan_contract(h.store.as_ref(), &contract("C1"), engine.options(), now())
            .await
            .unwrap();
        let plan = plans[0].plan.unwrap();
        assert_eq!(plan.backward.unwrap().to, ymd(6, 18));
        assert!(plan.forward.is_none());
    }

    #[tokio::test]
    async fn withheld_consent_makes_no_fetch() {
        let h = Harness::new();
        let no_curve = Contract::new(new_contract("C1", false), &Anonymizer::new("k")).unwrap();

        let report = h
            .engine(&[MeasureType::Cdc])
            .sync_contract(&no_curve, now())
            .await;

        assert!(!report.measures[0].eligible);
        assert!(h.metering_windows().is_empty());
        assert!(h.uploader.payloads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreadable_store_fails_contract_before_publishing() {
        let h = Harness {
            store: Arc::new(MemoryStore {
                unavailable: true,
                ..Default::default()
            }),
            ..Harness::new()
        };
        let report = h.engine(&MeasureType::ALL).sync_contract(&contract("C1"), now()).await;
        assert!(report.failure.unwrap().contains("connection refused"));
        assert!(report.publish.is_none());
        assert!(h.contracts.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_save_reports_prior_watermarks() {
        let h = Harness {
            store: Arc::new(MemoryStore {
                read_only: true,
                ..Default::default()
            }),
            ..Harness::new()
        };
        let prior = Watermark::new(ymd(6, 1), ymd(6, 15));
        seed_cdc(&h.store, "C1", prior);

        let report = h
            .engine(&[MeasureType::Cdc, MeasureType::Pmax])
            .sync_contract(&contract("C1"), now())
            .await;

        assert!(report.failure.unwrap().contains("read-only"));
        // The upload went through, but the wider coverage was never saved.
        assert_eq!(h.uploader.payloads.lock().unwrap().len(), 2);
        assert_eq!(report.measures[0].watermark, prior);
        assert_eq!(report.measures[1].watermark, None);
        assert_eq!(h.store.state("C1").unwrap().watermark(MeasureType::Cdc), prior);
    }

    #[tokio::test]
    async fn duplicate_contract_ids_run_once() {
        let h = Harness::new();
        let engine = SyncEngine::new(
            h.contracts.clone(),
            h.metering.clone(),
            h.uploader.clone(),
            h.store.clone(),
            SyncOptions {
                workers: 2,
                types: vec![],
                ..Default::default()
            },
        );
        let mut second = new_contract("C1", true);
        second.power_kva = 6.0;
        let entries: Vec<DatasetEntry> = vec![
            Ok(contract("C1")),
            Contract::new(second, &Anonymizer::new("k")),
        ];

        let report = engine.run_at(entries, now()).await;

        assert_eq!(report.num_contracts, 2);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].contract_id, "C1");
        assert_eq!(report.skipped[0].reason, "duplicate contract id in dataset");
        assert_eq!(
            *h.contracts.calls.lock().unwrap(),
            vec!["exists C1".to_string(), "create C1".to_string()]
        );
        // The first row is the one published.
        let stored = h.store.state("C1").unwrap();
        let expected = meterlink_core::fingerprint(&contract("C1").document()).unwrap();
        assert_eq!(stored.fingerprint.as_deref(), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn run_skips_invalid_and_incomplete_contracts() {
        let h = Harness::new();
        let mut incomplete = new_contract("C2", true);
        incomplete.hours = None;
        let entries: Vec<DatasetEntry> = vec![
            Ok(contract("C1")),
            Contract::new(incomplete, &Anonymizer::new("k")),
            Err(ValidationError::InvertedValidity {
                contract: "C3".into(),
                start: "2024-01-01T00:00:00Z".into(),
                end: "2023-01-01T23:59:59Z".into(),
            }),
        ];

        let report = h.engine(&MeasureType::ALL).run_at(entries, now()).await;

        assert_eq!(report.num_contracts, 3);
        assert_eq!(report.results.keys().collect::<Vec<_>>(), vec!["C1"]);
        let skipped: Vec<_> = report.skipped.iter().map(|s| s.contract_id.as_str()).collect();
        assert_eq!(skipped, vec!["C2", "C3"]);
        assert!(report.skipped[0].reason.contains("hours"));
        assert!(h.store.state("C2").is_none());
    }

    #[tokio::test]
    async fn parallel_workers_process_every_contract() {
        let h = Harness::new();
        let engine = SyncEngine::new(
            h.contracts.clone(),
            h.metering.clone(),
            h.uploader.clone(),
            h.store.clone(),
            SyncOptions {
                workers: 4,
                ..Default::default()
            },
        );
        let entries: Vec<DatasetEntry> = (1..=6).map(|i| Ok(contract(&format!("C{i}")))).collect();

        let report = engine.run_at(entries, now()).await;

        assert_eq!(report.results.len(), 6);
        for i in 1..=6 {
            let state = h.store.state(&format!("C{i}")).unwrap();
            assert!(state.fingerprint.is_some());
            assert_eq!(state.watermarks.len(), 3);
        }
    }

    #[test]
    fn duplicate_types_are_dropped() {
        let h = Harness::new();
        let engine = h.engine(&[MeasureType::Cdc, MeasureType::Pmax, MeasureType::Cdc]);
        assert_eq!(
            engine.options().types,
            vec![MeasureType::Cdc, MeasureType::Pmax]
        );
    }
}
