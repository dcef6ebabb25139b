use crate::model::InstrumentFile;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Files must all be of same type (found {first} and {other})")]
    MixedExtension { first: String, other: String },

    #[error("No files were supplied")]
    NoFiles,

    #[error("{file} is missing required header field '{field}'")]
    MissingField { file: String, field: String },

    #[error("{file} has a malformed header: {detail}")]
    MalformedHeader { file: String, detail: String },

    #[error("{file} has unknown data description: {description}")]
    UnknownChannel { file: String, description: String },

    #[error("{file} has malformed data at line {line}: {detail}")]
    MalformedBody {
        file: String,
        line: usize,
        detail: String,
    },

    #[error("{file} is truncated: {detail}")]
    TruncatedTrace { file: String, detail: String },

    #[error("{file} has no '{tag}' directory entry")]
    MissingTraceEntry { file: String, tag: String },

    #[error("{file} contains no '>' records")]
    EmptyBatch { file: String },

    #[error("No requested channel matched any file")]
    EmptyHarvest,

    #[error("Invalid request for '{compound}': {reason}")]
    InvalidRequest { compound: String, reason: String },

    #[error("Expected session state {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Worker {worker} failed: {source}")]
    WorkerFailure {
        worker: usize,
        #[source]
        source: Box<HarvestError>,
    },

    #[error("Worker task aborted: {0}")]
    WorkerPanic(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Delimited text error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl HarvestError {
    /// Unwraps pool wrapping to reach the parser-level cause.
    pub fn root_cause(&self) -> &HarvestError {
        match self {
            HarvestError::WorkerFailure { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Somewhere the bytes of one instrument file can be loaded from.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// File name including its extension (e.g. `"A01_run.arw"`).
    fn file_name(&self) -> &str;

    /// Loads the raw bytes.
    async fn read_bytes(&self) -> Result<Vec<u8>, HarvestError>;
}

/// A single named file on local disk.
#[derive(Debug, Clone)]
pub struct PathSource {
    path: PathBuf,
    name: String,
}

impl PathSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, name }
    }
}

#[async_trait]
impl FileSource for PathSource {
    fn file_name(&self) -> &str {
        &self.name
    }

    async fn read_bytes(&self) -> Result<Vec<u8>, HarvestError> {
        Ok(tokio::fs::read(&self.path).await?)
    }
}

impl InstrumentFile {
    /// Reads a file from `source`, classifying it by extension.
    pub async fn from_source(source: &dyn FileSource) -> Result<Self, HarvestError> {
        let bytes = source.read_bytes().await?;
        Ok(Self::new(source.file_name(), bytes))
    }
}
