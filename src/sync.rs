//! Upload of unsent samples and probe results to the collector.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::collector::{CollectorClient, CollectorError};
use crate::db::{DbError, Outbox, ProbeResult, SampleRecord, Store};
use crate::session::SessionStore;

/// Timestamp format the collector expects.
const UPLOAD_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("no device id or access token; log in first")]
    NoSession,
    #[error("storage error: {0}")]
    Storage(#[from] DbError),
    #[error("upload failed: {0}")]
    Upload(#[from] CollectorError),
}

/// Rows marked sent by one sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub samples: usize,
    pub probe_results: usize,
}

#[derive(Serialize)]
struct UploadBatch<'a> {
    cell_measurements: Vec<CellMeasurementPayload<'a>>,
    test_results: Vec<TestResultPayload<'a>>,
}

#[derive(Serialize)]
struct CellMeasurementPayload<'a> {
    #[serde(rename = "deviceId")]
    device_id: &'a str,
    latitude: f64,
    longitude: f64,
    time: String,
    signal_level: Option<i32>,
    carrier: Option<&'a str>,
    technology: Option<&'static str>,
    tac: Option<i32>,
    plmn_id: Option<&'a str>,
    arfcn: Option<i32>,
    rsrq: Option<i32>,
    rsrp: Option<i32>,
    rscp: Option<i32>,
    ec_no: Option<i32>,
    rx_lev: Option<i32>,
}

impl<'a> CellMeasurementPayload<'a> {
    fn new(device_id: &'a str, sample: &'a SampleRecord) -> Self {
        Self {
            device_id,
            latitude: sample.latitude,
            longitude: sample.longitude,
            time: sample.captured_at.format(UPLOAD_TIME_FORMAT).to_string(),
            signal_level: sample.signal_level,
            carrier: sample.carrier.as_deref(),
            technology: sample.technology.map(|t| t.as_str()),
            tac: sample.tac,
            plmn_id: sample.plmn_id.as_deref(),
            arfcn: sample.arfcn,
            rsrq: sample.rsrq,
            rsrp: sample.rsrp,
            rscp: sample.rscp,
            ec_no: sample.ec_no,
            rx_lev: sample.rx_lev,
        }
    }
}

#[derive(Serialize)]
struct TestResultPayload<'a> {
    #[serde(rename = "deviceId")]
    device_id: &'a str,
    latitude: Option<f64>,
    longitude: Option<f64>,
    time: String,
    ping: Option<i64>,
    dns: Option<i64>,
    throughput: Option<i64>,
    web: Option<i64>,
    sms: Option<i64>,
}

impl<'a> TestResultPayload<'a> {
    fn new(device_id: &'a str, result: &ProbeResult) -> Self {
        Self {
            device_id,
            latitude: result.latitude,
            longitude: result.longitude,
            time: result.captured_at.format(UPLOAD_TIME_FORMAT).to_string(),
            ping: result.ping_ms,
            dns: result.dns_ms,
            throughput: result.throughput_kbps,
            web: result.web_ms,
            sms: result.sms_ms,
        }
    }
}

/// Moves outbox rows to the collector.
#[derive(Clone)]
pub struct SyncClient {
    collector: CollectorClient,
    store: Arc<Store>,
    sessions: SessionStore,
}

impl SyncClient {
    pub fn new(collector: CollectorClient, store: Arc<Store>, sessions: SessionStore) -> Self {
        Self {
            collector,
            store,
            sessions,
        }
    }

    /// Upload everything unsent in a single batch.
    ///
    /// Rows are marked sent only after the collector accepts the batch, so a
    /// failed upload leaves them for the next attempt. Rows appended while
    /// the upload is in flight are not part of the batch and stay unsent.
    pub async fn sync_once(&self) -> Result<SyncReport, SyncError> {
        let session = self.sessions.current()?;
        let (Some(device_id), Some(token)) = (session.device_id, session.access_token) else {
            return Err(SyncError::NoSession);
        };

        let samples = self.store.unsent_samples()?;
        let results = self.store.unsent_probe_results()?;

        if samples.is_empty() && results.is_empty() {
            tracing::debug!("Nothing to sync");
            return Ok(SyncReport::default());
        }

        let batch = UploadBatch {
            cell_measurements: samples
                .iter()
                .map(|s| CellMeasurementPayload::new(&device_id, &s.record))
                .collect(),
            test_results: results
                .iter()
                .map(|r| TestResultPayload::new(&device_id, &r.record))
                .collect(),
        };

        let status = self.collector.upload(&token, &batch).await?;
        tracing::debug!(
            "Collector accepted {} samples and {} results ({})",
            samples.len(),
            results.len(),
            status
        );

        let sample_ids: Vec<i64> = samples.iter().map(|s| s.id).collect();
        let result_ids: Vec<i64> = results.iter().map(|r| r.id).collect();

        Ok(SyncReport {
            samples: self.store.mark_sent(Outbox::CellMeasurements, &sample_ids)?,
            probe_results: self.store.mark_sent(Outbox::TestResults, &result_ids)?,
        })
    }
}
