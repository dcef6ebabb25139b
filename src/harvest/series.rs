//! Pulls requested X/Y series out of export bodies.

use std::sync::Arc;

use csv::{ErrorKind, Position};
use tracing::debug;

use crate::harvest::formats::arw::{export_reader, ParsedHeader};
use crate::harvest::resolve::nearest;
use crate::harvest::traits::HarvestStage;
use crate::model::{HarvestRequest, HarvestedSeries, InstrumentFile};
use crate::traits::HarvestError;

/// Header records preceding the numeric body of a scan export.
pub const SCAN_HEADER_LINES: usize = 4;

/// Header records preceding the numeric body of a single-channel export.
pub const TRACE_HEADER_LINES: usize = 2;

/// A header-parsed export waiting for extraction.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub file: Arc<InstrumentFile>,
    pub header: ParsedHeader,
}

/// 1-based line of the record that starts at or after byte `at`.
fn line_of(text: &[u8], at: u64) -> usize {
    let start = usize::try_from(at).unwrap_or(text.len()).min(text.len());
    let start = text[start..]
        .iter()
        .position(|b| !matches!(b, b'\r' | b'\n'))
        .map_or(text.len(), |p| start + p);
    let head = &text[..start];
    let breaks = head
        .iter()
        .enumerate()
        .filter(|&(i, &b)| b == b'\n' || (b == b'\r' && head.get(i + 1) != Some(&b'\n')))
        .count();
    breaks + 1
}

/// Numeric body stored column-wise: column 0 is retention time.
///
/// Every body row must have as many fields as the first one.
fn parse_columns(
    file_name: &str,
    text: &str,
    header_records: usize,
) -> Result<Vec<Vec<f64>>, HarvestError> {
    let bytes = text.as_bytes();
    let mut header = export_reader(b'\t').from_reader(bytes);
    let mut record = csv::ByteRecord::new();
    for _ in 0..header_records {
        if !header.read_byte_record(&mut record)? {
            return Ok(Vec::new());
        }
    }
    let body_start = header.position().byte();
    let body = bytes
        .get(usize::try_from(body_start).unwrap_or(bytes.len())..)
        .unwrap_or_default();
    let line_at =
        |pos: Option<&Position>| line_of(bytes, body_start + pos.map_or(0, Position::byte));

    let mut reader = export_reader(b'\t').flexible(false).from_reader(body);
    let mut columns: Vec<Vec<f64>> = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| {
            if let ErrorKind::UnequalLengths {
                pos,
                expected_len,
                len,
            } = e.kind()
            {
                return HarvestError::MalformedBody {
                    file: file_name.to_string(),
                    line: line_at(pos.as_ref()),
                    detail: format!("expected {expected_len} columns, found {len}"),
                };
            }
            HarvestError::from(e)
        })?;

        if columns.is_empty() {
            columns = vec![Vec::new(); row.len()];
        }
        for (column, field) in columns.iter_mut().zip(row.iter()) {
            let value = field.trim().parse::<f64>().map_err(|e| HarvestError::MalformedBody {
                file: file_name.to_string(),
                line: line_at(row.position()),
                detail: format!("'{field}': {e}"),
            })?;
            column.push(value);
        }
    }
    Ok(columns)
}

fn column(file_name: &str, columns: &[Vec<f64>], index: usize) -> Result<Vec<f64>, HarvestError> {
    columns
        .get(index)
        .cloned()
        .ok_or_else(|| HarvestError::MalformedBody {
            file: file_name.to_string(),
            line: 0,
            detail: format!("body has no column {index}"),
        })
}

/// Descriptive tag for a series pulled out of a scan.
pub fn scan_series_tag(source_tag: &str, target: f64) -> String {
    if source_tag.contains("MS") {
        let prefix: String = source_tag.chars().take(3).collect();
        format!("{prefix}XIC {target} m/z")
    } else {
        format!("XAC {target} nm")
    }
}

/// Emits one series per request whose channel tag matches this export.
///
/// Requests for other channels are skipped; an export matching nothing
/// yields an empty list.
pub fn extract_series(
    file: &InstrumentFile,
    header: &ParsedHeader,
    requests: &[HarvestRequest],
) -> Result<Vec<HarvestedSeries>, HarvestError> {
    let descriptor = &header.descriptor;
    let matching: Vec<&HarvestRequest> = requests
        .iter()
        .filter(|r| r.channel_tag == descriptor.tag)
        .collect();
    if matching.is_empty() {
        return Ok(Vec::new());
    }

    let scan = descriptor.content3d || descriptor.is_scan;
    let skip = if scan { SCAN_HEADER_LINES } else { TRACE_HEADER_LINES };
    let columns = parse_columns(&file.name, &file.text(), skip)?;

    let mut series = Vec::with_capacity(matching.len());
    for request in matching {
        let (resolved_tag, y_index) = if scan {
            let target = request.target.ok_or_else(|| HarvestError::InvalidRequest {
                compound: request.compound.clone(),
                reason: format!("channel '{}' needs a target", descriptor.tag),
            })?;
            let index = nearest(&descriptor.wavelength_grid, target).ok_or_else(|| {
                HarvestError::MalformedHeader {
                    file: file.name.clone(),
                    detail: "scan export has an empty wavelength axis".to_string(),
                }
            })?;
            // Axis entry i describes body column i + 1.
            (scan_series_tag(&descriptor.tag, target), index + 1)
        } else {
            (descriptor.tag.clone(), 1)
        };

        debug!(
            file = %file.name,
            compound = %request.compound,
            tag = %resolved_tag,
            "Extracted series"
        );
        series.push(HarvestedSeries {
            sample_name: header.sample_name.clone(),
            well: header.well.clone(),
            compound: request.compound.clone(),
            resolved_tag,
            x: column(&file.name, &columns, 0)?,
            y: column(&file.name, &columns, y_index)?,
        });
    }
    Ok(series)
}

/// Harvest stage: every requested series out of one export.
#[derive(Debug, Clone)]
pub struct ExtractStage {
    requests: Arc<[HarvestRequest]>,
}

impl ExtractStage {
    pub fn new(requests: impl Into<Arc<[HarvestRequest]>>) -> Self {
        Self {
            requests: requests.into(),
        }
    }
}

impl HarvestStage for ExtractStage {
    type Input = ParsedFile;
    type Output = Vec<HarvestedSeries>;
    type Error = HarvestError;

    fn execute(&self, input: Self::Input) -> Result<Self::Output, Self::Error> {
        extract_series(&input.file, &input.header, &self.requests)
    }

    fn stage_name(&self) -> &'static str {
        "extract"
    }
}
