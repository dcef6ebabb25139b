//! Batch harvest session.
//!
//! [`HarvestSession`] walks one file batch through
//! `Idle → PreliminaryRead → ParamsReady → Harvesting → TransferComplete`:
//! - a uniform-extension batch is header-parsed on the [`TaskPool`] and
//!   merged into a [`ChannelMenu`]
//! - the caller answers with [`HarvestRequest`]s
//! - extraction jobs fan out over the pool and the results are reshaped
//!   into a [`TransferPayload`]
//!
//! Status and percent updates are pushed to an optional channel at each
//! transition and after each completed job.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, instrument, warn};

use crate::config::HarvestConfig;
use crate::executor::TaskPool;
use crate::harvest::aggregate::ChannelMenu;
use crate::harvest::formats::{FastaStage, HeaderStage, ParsedHeader, TraceStage};
use crate::harvest::reshape::reshape;
use crate::harvest::series::{ExtractStage, ParsedFile};
use crate::model::{
    raw_extension, Ab1Trace, FastaRecord, FileExtension, HarvestRequest, InstrumentFile,
    StatusUpdate, TransferBundle,
};
use crate::traits::HarvestError;

// ============================================================================
// Session Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HarvestState {
    Idle,
    PreliminaryRead,
    ParamsReady,
    Harvesting,
    TransferComplete,
}

impl HarvestState {
    pub fn name(&self) -> &'static str {
        match self {
            HarvestState::Idle => "Idle",
            HarvestState::PreliminaryRead => "PreliminaryRead",
            HarvestState::ParamsReady => "ParamsReady",
            HarvestState::Harvesting => "Harvesting",
            HarvestState::TransferComplete => "TransferComplete",
        }
    }
}

/// Terminal artifact of a batch, by file kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransferPayload {
    Chromatograms(TransferBundle),
    Traces(Vec<Ab1Trace>),
    Sequences(Vec<FastaRecord>),
}

/// Statistics about the last harvest run.
#[derive(Debug, Default, Clone)]
pub struct HarvestStats {
    /// Time spent on the preliminary header read (milliseconds)
    pub preliminary_duration_ms: u64,

    /// Time spent extracting and reshaping (milliseconds)
    pub harvest_duration_ms: u64,

    /// Number of files in the batch
    pub files: usize,

    /// Number of records in the payload
    pub records: usize,
}

/// A batch accepted by the preliminary read.
#[derive(Debug)]
struct LoadedBatch {
    kind: FileExtension,
    files: Vec<Arc<InstrumentFile>>,
    headers: Vec<ParsedHeader>,
    menu: ChannelMenu,
}

// ============================================================================
// Session
// ============================================================================

pub struct HarvestSession {
    state: HarvestState,
    pool: TaskPool,
    status: Option<UnboundedSender<StatusUpdate>>,
    batch: Option<LoadedBatch>,
    stats: HarvestStats,
}

impl HarvestSession {
    pub fn new(config: &HarvestConfig) -> Self {
        Self {
            state: HarvestState::Idle,
            pool: TaskPool::new(config.worker_limit()),
            status: None,
            batch: None,
            stats: HarvestStats::default(),
        }
    }

    /// Routes status messages and per-job percent updates to `sink`.
    pub fn with_status(mut self, sink: UnboundedSender<StatusUpdate>) -> Self {
        self.pool = self.pool.with_progress(sink.clone());
        self.status = Some(sink);
        self
    }

    pub fn state(&self) -> HarvestState {
        self.state
    }

    pub fn stats(&self) -> &HarvestStats {
        &self.stats
    }

    /// Channel menu of the loaded batch, once parameters are ready.
    pub fn menu(&self) -> Option<&ChannelMenu> {
        self.batch.as_ref().map(|b| &b.menu)
    }

    fn emit(&self, update: StatusUpdate) {
        info!(percent = update.percent, status = %update.status, "Status");
        if let Some(sink) = &self.status {
            let _ = sink.send(update);
        }
    }

    /// Plain status message with the percent display reset to zero.
    fn notify(&self, status: impl Into<String>) {
        self.emit(StatusUpdate::new(0, status));
    }

    fn expect_state(&self, expected: HarvestState) -> Result<(), HarvestError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(HarvestError::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            })
        }
    }

    /// Drops any loaded batch and returns to `Idle`.
    pub fn reset(&mut self) {
        self.state = HarvestState::Idle;
        self.batch = None;
        self.stats = HarvestStats::default();
    }

    /// Accepts a new file batch and runs the preliminary read.
    ///
    /// A new batch always restarts the session at `Idle`. Returns the
    /// channel menu once the session reaches `ParamsReady`, or `None` when
    /// the batch kind cannot be harvested (reported as a status message;
    /// the session stays `Idle`).
    ///
    /// # Errors
    ///
    /// - [`HarvestError::MixedExtension`] when extensions differ (session
    ///   stays `Idle`)
    /// - any header parse failure, wrapped by the pool
    #[instrument(skip_all, fields(files = files.len()))]
    pub async fn load_batch(
        &mut self,
        files: Vec<InstrumentFile>,
    ) -> Result<Option<&ChannelMenu>, HarvestError> {
        self.reset();
        let first = files.first().ok_or(HarvestError::NoFiles)?;
        let ext = raw_extension(&first.name);
        if let Some(other) = files.iter().map(|f| raw_extension(&f.name)).find(|e| *e != ext) {
            let err = HarvestError::MixedExtension { first: ext, other };
            self.notify(err.to_string());
            return Err(err);
        }

        let kind = first.extension;
        match kind {
            FileExtension::Unknown => {
                self.notify(format!("Unknown extension: {ext}"));
                return Ok(None);
            }
            FileExtension::Bin => {
                self.notify("Archive files cannot be harvested");
                return Ok(None);
            }
            FileExtension::Arw | FileExtension::Ab1 | FileExtension::Fasta => {}
        }

        self.state = HarvestState::PreliminaryRead;
        self.notify("File upload detected. Preprocessing data...");
        let start = Instant::now();
        let files: Vec<Arc<InstrumentFile>> = files.into_iter().map(Arc::new).collect();

        let headers = if kind == FileExtension::Arw {
            match self.pool.run(Arc::new(HeaderStage), files.clone()).await {
                Ok(headers) => headers,
                Err(e) => {
                    warn!(error = %e, "Preliminary read failed");
                    self.state = HarvestState::Idle;
                    self.notify(e.to_string());
                    return Err(e);
                }
            }
        } else {
            Vec::new()
        };

        let menu = ChannelMenu::aggregate(headers.iter().map(|h| &h.descriptor));
        self.stats.preliminary_duration_ms = start.elapsed().as_millis() as u64;
        self.stats.files = files.len();
        info!(
            kind = ?kind,
            channels = menu.tags.len(),
            duration_ms = self.stats.preliminary_duration_ms,
            "Preliminary read completed"
        );

        self.state = HarvestState::ParamsReady;
        self.emit(StatusUpdate::indeterminate(
            "Parameters extracted!  Please input harvesting info.",
        ));
        let batch = self.batch.insert(LoadedBatch {
            kind,
            files,
            headers,
            menu,
        });
        Ok(Some(&batch.menu))
    }

    /// Harvests the loaded batch.
    ///
    /// Chromatography batches need at least one request; trace and FASTA
    /// batches ignore `requests`. On failure the session returns to
    /// `ParamsReady` so the caller can retry with other requests.
    #[instrument(skip_all, fields(requests = requests.len()))]
    pub async fn harvest(
        &mut self,
        requests: Vec<HarvestRequest>,
    ) -> Result<TransferPayload, HarvestError> {
        self.expect_state(HarvestState::ParamsReady)?;
        let batch = self.batch.as_ref().ok_or(HarvestError::InvalidState {
            expected: HarvestState::ParamsReady.name(),
            actual: HarvestState::Idle.name(),
        })?;
        if batch.kind == FileExtension::Arw {
            for request in &requests {
                batch.menu.validate(request)?;
            }
        }

        self.state = HarvestState::Harvesting;
        self.notify("Harvesting requested data...");
        let start = Instant::now();

        match self.run_harvest(requests).await {
            Ok(payload) => {
                self.stats.harvest_duration_ms = start.elapsed().as_millis() as u64;
                self.stats.records = match &payload {
                    TransferPayload::Chromatograms(bundle) => bundle.len(),
                    TransferPayload::Traces(traces) => traces.len(),
                    TransferPayload::Sequences(records) => records.len(),
                };
                info!(
                    records = self.stats.records,
                    duration_ms = self.stats.harvest_duration_ms,
                    "Harvest completed"
                );
                self.emit(StatusUpdate::indeterminate("Uploading data.  Please wait..."));
                self.state = HarvestState::TransferComplete;
                self.notify("Transfer complete, storing data...");
                Ok(payload)
            }
            Err(e) => {
                warn!(error = %e, "Harvest failed");
                self.state = HarvestState::ParamsReady;
                self.notify(e.to_string());
                Err(e)
            }
        }
    }

    async fn run_harvest(
        &self,
        requests: Vec<HarvestRequest>,
    ) -> Result<TransferPayload, HarvestError> {
        let batch = self.batch.as_ref().ok_or(HarvestError::InvalidState {
            expected: HarvestState::Harvesting.name(),
            actual: HarvestState::Idle.name(),
        })?;

        match batch.kind {
            FileExtension::Arw => {
                let jobs: Vec<ParsedFile> = batch
                    .files
                    .iter()
                    .zip(&batch.headers)
                    .map(|(file, header)| ParsedFile {
                        file: Arc::clone(file),
                        header: header.clone(),
                    })
                    .collect();
                let per_file = self.pool.run(Arc::new(ExtractStage::new(requests)), jobs).await?;
                let bundle = reshape(per_file.into_iter().flatten().collect())?;
                Ok(TransferPayload::Chromatograms(bundle))
            }
            FileExtension::Ab1 => {
                let traces = self.pool.run(Arc::new(TraceStage), batch.files.clone()).await?;
                Ok(TransferPayload::Traces(traces))
            }
            FileExtension::Fasta => {
                let records = self.pool.run(Arc::new(FastaStage), batch.files.clone()).await?;
                Ok(TransferPayload::Sequences(records.into_iter().flatten().collect()))
            }
            FileExtension::Bin | FileExtension::Unknown => Err(HarvestError::InvalidState {
                expected: HarvestState::ParamsReady.name(),
                actual: HarvestState::Idle.name(),
            }),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::formats::ab1::tests::sample_trace;
    use crate::model::INDETERMINATE;
    use tokio::sync::mpsc;

    const SCAN_EXPORT: &str = "\"Channel Description\"\t\"Vial\"\t\"SampleName\"\r\n\
\"1: QDa Positive(+) Scan (150.00-750.00)Da, Centroid, CV=15\"\t\"V1:A,1\"\t\"Foo\"\r\n\
\t150.0\t151.0\t152.0\r\n\
\"Time\"\r\n\
0.0\t10\t20\t30\r\n\
0.1\t11\t21\t31\r\n";

    fn pda_export(well: &str, sample: &str) -> String {
        format!(
            "\"Channel Description\"\t\"Vial\"\t\"SampleName\"\r\n\
\"PDA Ch2 340nm@4.8nm\"\t\"1:{well}\"\t\"{sample}\"\r\n\
0.0\t5.0\r\n\
1.0\t6.0\r\n"
        )
    }

    fn single_worker() -> HarvestConfig {
        HarvestConfig::default().with_max_workers(1)
    }

    #[tokio::test]
    async fn test_chromatogram_flow() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = HarvestSession::new(&single_worker()).with_status(tx);
        assert_eq!(session.state(), HarvestState::Idle);

        let files = vec![
            InstrumentFile::new("scan.arw", SCAN_EXPORT.as_bytes().to_vec()),
            InstrumentFile::new("b1.arw", pda_export("B,1", "Bar").into_bytes()),
        ];
        let menu = session.load_batch(files).await.unwrap().unwrap().clone();
        assert_eq!(session.state(), HarvestState::ParamsReady);
        assert_eq!(menu.tags, vec!["(+)MS Scan", "340nm"]);
        assert_eq!(menu.grid("(+)MS Scan").unwrap(), &[150.0, 151.0, 152.0]);

        let payload = session
            .harvest(vec![
                HarvestRequest::new("product", "(+)MS Scan").with_target(152.0),
                HarvestRequest::new("substrate", "340nm"),
            ])
            .await
            .unwrap();
        assert_eq!(session.state(), HarvestState::TransferComplete);

        let TransferPayload::Chromatograms(bundle) = payload else {
            panic!("expected chromatograms");
        };
        assert_eq!(bundle.text_columns[0], vec!["Foo", "Bar"]);
        assert_eq!(bundle.text_columns[1], vec!["A01", "B01"]);
        assert_eq!(bundle.text_columns[3], vec!["(+)XIC 152 m/z", "340nm"]);
        assert_eq!(bundle.numeric_columns[1][0], vec![30.0, 31.0]);
        assert_eq!(session.stats().records, 2);

        drop(session);
        let mut updates = Vec::new();
        while let Some(update) = rx.recv().await {
            updates.push(update);
        }
        assert_eq!(updates[0].status, "File upload detected. Preprocessing data...");
        assert!(updates.iter().any(|u| u.percent == INDETERMINATE));
        assert!(updates.iter().any(|u| u.percent == 100));
        assert_eq!(
            updates.last().unwrap().status,
            "Transfer complete, storing data..."
        );
    }

    #[tokio::test]
    async fn test_mixed_extensions_stay_idle() {
        let mut session = HarvestSession::new(&HarvestConfig::default());
        let files = vec![
            InstrumentFile::new("a.arw", pda_export("A,1", "x").into_bytes()),
            InstrumentFile::new("b.ab1", sample_trace("s", &[1, 2])),
        ];
        let err = session.load_batch(files).await.unwrap_err();
        assert!(matches!(err, HarvestError::MixedExtension { .. }));
        assert_eq!(session.state(), HarvestState::Idle);
    }

    #[tokio::test]
    async fn test_unknown_extension_reports_status() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = HarvestSession::new(&HarvestConfig::default()).with_status(tx);

        let loaded = session
            .load_batch(vec![InstrumentFile::new("notes.txt", b"hello".to_vec())])
            .await
            .unwrap();
        assert!(loaded.is_none());
        assert_eq!(session.state(), HarvestState::Idle);
        assert_eq!(rx.recv().await.unwrap().status, "Unknown extension: txt");
    }

    #[tokio::test]
    async fn test_bad_header_fails_batch() {
        let mut session = HarvestSession::new(&HarvestConfig::default());
        let files = vec![
            InstrumentFile::new("ok.arw", pda_export("A,1", "x").into_bytes()),
            InstrumentFile::new("bad.arw", b"\"Vial\"\n\"1:A,1\"\n".to_vec()),
        ];
        let err = session.load_batch(files).await.unwrap_err();
        assert!(matches!(err.root_cause(), HarvestError::MissingField { .. }));
        assert_eq!(session.state(), HarvestState::Idle);
        assert!(session.menu().is_none());
    }

    #[tokio::test]
    async fn test_harvest_requires_params() {
        let mut session = HarvestSession::new(&HarvestConfig::default());
        let err = session.harvest(Vec::new()).await.unwrap_err();
        assert!(matches!(err, HarvestError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_unmatched_requests_return_to_params_ready() {
        let mut session = HarvestSession::new(&HarvestConfig::default());
        let files = vec![InstrumentFile::new("a.arw", pda_export("A,1", "x").into_bytes())];
        session.load_batch(files).await.unwrap();

        let err = session.harvest(Vec::new()).await.unwrap_err();
        assert!(matches!(err, HarvestError::EmptyHarvest));
        assert_eq!(session.state(), HarvestState::ParamsReady);

        let err = session
            .harvest(vec![HarvestRequest::new("x", "254nm")])
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::InvalidRequest { .. }));
        assert_eq!(session.state(), HarvestState::ParamsReady);
    }

    #[tokio::test]
    async fn test_trace_batch() {
        let mut session = HarvestSession::new(&single_worker());
        let files = vec![
            InstrumentFile::new("a.ab1", sample_trace("first", &[10, 20, 30])),
            InstrumentFile::new("b.ab1", sample_trace("second", &[5, 9])),
        ];
        let menu = session.load_batch(files).await.unwrap().unwrap();
        assert!(menu.tags.is_empty());

        let payload = session.harvest(Vec::new()).await.unwrap();
        let TransferPayload::Traces(traces) = payload else {
            panic!("expected traces");
        };
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].sample_name, "first");
        assert_eq!(traces[1].peak_reduced[0].len(), 2);
    }

    #[tokio::test]
    async fn test_fasta_batch_and_restart() {
        let mut session = HarvestSession::new(&single_worker());
        let files = vec![
            InstrumentFile::new("a.fasta", b">one\nAC\nGT\n>two\nTT\n".to_vec()),
            InstrumentFile::new("b.fasta", b">three\nGG\n".to_vec()),
        ];
        session.load_batch(files).await.unwrap();
        let payload = session.harvest(Vec::new()).await.unwrap();
        let TransferPayload::Sequences(records) = payload else {
            panic!("expected sequences");
        };
        let headers: Vec<&str> = records.iter().map(|r| r.header.as_str()).collect();
        assert_eq!(headers, vec!["one", "two", "three"]);
        assert_eq!(records[0].sequence, "ACGT");

        // A fresh batch restarts the cycle from the terminal state.
        assert_eq!(session.state(), HarvestState::TransferComplete);
        let files = vec![InstrumentFile::new("c.fasta", b"no records\n".to_vec())];
        session.load_batch(files).await.unwrap();
        let err = session.harvest(Vec::new()).await.unwrap_err();
        assert!(matches!(err.root_cause(), HarvestError::EmptyBatch { .. }));
    }
}
