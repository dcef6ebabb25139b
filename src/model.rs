use serde::{Deserialize, Serialize};

/// Percent value meaning "progress unknown" for status consumers.
pub const INDETERMINATE: i32 = -1;

/// File kinds the harvester knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileExtension {
    Arw,
    Ab1,
    Fasta,
    Bin,
    Unknown,
}

impl FileExtension {
    /// Classifies a lower-cased extension string.
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "arw" => Self::Arw,
            "ab1" => Self::Ab1,
            "fasta" | "fa" | "fas" => Self::Fasta,
            "bin" => Self::Bin,
            _ => Self::Unknown,
        }
    }
}

/// Lower-cased text after the last `.` of a file name (empty when there is none).
pub fn raw_extension(name: &str) -> String {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

/// One instrument export as handed over by the intake surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentFile {
    pub name: String,
    pub extension: FileExtension,
    pub bytes: Vec<u8>,
}

impl InstrumentFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let extension = FileExtension::from_extension(&raw_extension(&name));
        Self {
            name,
            extension,
            bytes,
        }
    }

    /// Lossy UTF-8 view of the file body, used by the text formats.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Polarity {
    Positive,
    Negative,
    None,
}

/// Machine-readable description of the data channel one export carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub tag: String,
    pub polarity: Polarity,
    pub is_scan: bool,
    pub content3d: bool,
    /// Wavelength (nm) or m/z axis; empty for single-channel traces.
    pub wavelength_grid: Vec<f64>,
}

/// A caller's request to harvest one analyte from one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestRequest {
    pub compound: String,
    pub channel_tag: String,
    /// Wavelength or m/z to pull from a scan channel.
    pub target: Option<f64>,
}

impl HarvestRequest {
    pub fn new(compound: impl Into<String>, channel_tag: impl Into<String>) -> Self {
        Self {
            compound: compound.into(),
            channel_tag: channel_tag.into(),
            target: None,
        }
    }

    pub fn with_target(mut self, target: f64) -> Self {
        self.target = Some(target);
        self
    }
}

/// One extracted chromatogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestedSeries {
    pub sample_name: String,
    pub well: String,
    pub compound: String,
    pub resolved_tag: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

/// Decoded capillary-sequencer trace.
///
/// Channel order follows the `DATA9`..`DATA12` entries. The peak- and
/// midpoint-reduced channels share one length, ending in a single zero pad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ab1Trace {
    pub sample_name: String,
    pub channels: [Vec<u16>; 4],
    pub peak_locations: Vec<u16>,
    pub peak_reduced: [Vec<u16>; 4],
    pub midpoint_reduced: [Vec<u16>; 4],
}

/// A single `>`-headed record of an alignment file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastaRecord {
    pub header: String,
    pub sequence: String,
}

/// Column-oriented harvest result ready for transfer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferBundle {
    /// Sample names, wells, compounds and resolved tags, in that order.
    pub text_columns: Vec<Vec<String>>,
    /// X series and Y series, in that order.
    pub numeric_columns: Vec<Vec<Vec<f64>>>,
}

/// Completed-over-total counter for one harvest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub completed_units: usize,
    pub total_units: usize,
}

impl BatchProgress {
    pub fn new(total_units: usize) -> Self {
        Self {
            completed_units: 0,
            total_units,
        }
    }

    pub fn record(&mut self) {
        self.completed_units = (self.completed_units + 1).min(self.total_units);
    }

    /// Rounded percent in `[0, 100]`.
    pub fn percent(&self) -> i32 {
        if self.total_units == 0 {
            return 100;
        }
        ((100 * self.completed_units) as f64 / self.total_units as f64).round() as i32
    }

    pub fn is_complete(&self) -> bool {
        self.completed_units == self.total_units
    }
}

/// Message for the progress display collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// `0..=100`, or [`INDETERMINATE`].
    pub percent: i32,
    pub status: String,
}

impl StatusUpdate {
    pub fn new(percent: i32, status: impl Into<String>) -> Self {
        Self {
            percent,
            status: status.into(),
        }
    }

    pub fn indeterminate(status: impl Into<String>) -> Self {
        Self::new(INDETERMINATE, status)
    }
}
