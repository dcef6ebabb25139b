//! Empower `.arw` export headers.
//!
//! An export starts with a label line and a value line, both tab separated
//! (older exports separate quoted tokens with plain spaces). Scan exports
//! carry the wavelength or m/z axis on the third line.
//!
//! Recognized channel descriptions:
//!
//! ```text
//! 1: QDa Positive(+) Scan (150.00-750.00)Da, Centroid, CV=15   -> (+)MS Scan
//! 2: QDa Negative(-) SIR Ch1 202.00 Da, CV=15                  -> (-)SIR 202.00 m/z
//! PDA Spectrum (210-400)nm                                     -> PDA Scan
//! PDA Ch2 340nm@4.8nm                                          -> 340nm
//! ```

use std::sync::Arc;

use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::harvest::traits::HarvestStage;
use crate::model::{ChannelDescriptor, InstrumentFile, Polarity};
use crate::traits::HarvestError;

pub const CHANNEL_LABEL: &str = "Channel Description";
pub const VIAL_LABEL: &str = "Vial";
pub const SAMPLE_LABEL: &str = "SampleName";

/// Record holding the wavelength / m/z axis of a scan export.
pub const GRID_LINE: usize = 2;

/// Header fields of one export plus the channel it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedHeader {
    pub file_name: String,
    pub sample_name: String,
    pub well: String,
    pub descriptor: ChannelDescriptor,
}

/// Reader settings shared by header and body parsing.
///
/// CR, LF and CRLF all end a record and blank lines are skipped, so record
/// `n` is the `n`th non-empty line of the export.
pub fn export_reader(delimiter: u8) -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    builder.delimiter(delimiter).has_headers(false).flexible(true);
    builder
}

/// Tab separated unless the label line has no tabs, as in older exports
/// that separate quoted tokens with spaces.
fn header_delimiter(text: &str) -> u8 {
    let first_line = text.split(['\r', '\n']).find(|l| !l.is_empty());
    match first_line {
        Some(line) if !line.contains('\t') => b' ',
        _ => b'\t',
    }
}

fn header_fields(record: Option<&StringRecord>, delimiter: u8) -> Vec<&str> {
    record
        .map(|r| {
            r.iter()
                .map(str::trim)
                // Runs of spaces leave empty fields between tokens.
                .filter(|f| delimiter == b'\t' || !f.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn malformed(file: &str, detail: impl Into<String>) -> HarvestError {
    HarvestError::MalformedHeader {
        file: file.to_string(),
        detail: detail.into(),
    }
}

/// Parses the header block of one export.
pub fn parse_header(file_name: &str, text: &str) -> Result<ParsedHeader, HarvestError> {
    let delimiter = header_delimiter(text);
    let records = export_reader(delimiter)
        .from_reader(text.as_bytes())
        .into_records()
        .take(GRID_LINE + 1)
        .collect::<Result<Vec<StringRecord>, _>>()?;
    let labels = header_fields(records.first(), delimiter);
    let values = header_fields(records.get(1), delimiter);

    let field = |label: &str| labels.iter().position(|l| *l == label).and_then(|i| values.get(i));
    let required = |label: &str| {
        field(label).copied().ok_or_else(|| HarvestError::MissingField {
            file: file_name.to_string(),
            field: label.to_string(),
        })
    };

    let description = required(CHANNEL_LABEL)?;
    let vial = required(VIAL_LABEL)?;
    let sample_name = field(SAMPLE_LABEL).copied().unwrap_or_default().to_string();

    let well = parse_well(file_name, vial)?;
    let descriptor = classify_channel(file_name, description, records.get(GRID_LINE))?;
    debug!(file = file_name, tag = %descriptor.tag, well = %well, "Parsed export header");

    Ok(ParsedHeader {
        file_name: file_name.to_string(),
        sample_name,
        well,
        descriptor,
    })
}

/// Turns a vial value such as `1:A,1` into the well `A01`.
///
/// Exports that carry a `prefix:` are split at the colon; older ones without
/// a colon hold the row at a fixed offset of two characters.
pub fn parse_well(file_name: &str, vial: &str) -> Result<String, HarvestError> {
    let position = match vial.split_once(':') {
        Some((_, rest)) => rest,
        None => vial
            .get(2..)
            .ok_or_else(|| malformed(file_name, format!("vial '{vial}' is too short")))?,
    };
    let (row, column) = position
        .split_once(',')
        .ok_or_else(|| malformed(file_name, format!("vial '{vial}' has no row,column pair")))?;
    let (row, column) = (row.trim(), column.trim());
    if row.is_empty() || column.is_empty() {
        return Err(malformed(file_name, format!("vial '{vial}' has an empty row or column")));
    }
    Ok(format!("{}{:0>2}", row.to_uppercase(), column))
}

fn description_words(description: &str) -> Vec<&str> {
    description
        .split([' ', ','])
        .filter(|w| !w.is_empty())
        .collect()
}

fn polarity_of(description: &str) -> Polarity {
    if description.contains("Positive") {
        Polarity::Positive
    } else if description.contains("Negative") {
        Polarity::Negative
    } else {
        Polarity::None
    }
}

/// Reads the scan axis: whitespace split, first token dropped.
fn parse_grid(file_name: &str, grid: Option<&StringRecord>) -> Result<Vec<f64>, HarvestError> {
    let record = grid.ok_or_else(|| malformed(file_name, "scan export has no wavelength line"))?;
    record
        .iter()
        .flat_map(|field| field.split(char::is_whitespace))
        .skip(1)
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse::<f64>()
                .map_err(|_| malformed(file_name, format!("bad wavelength value '{t}'")))
        })
        .collect()
}

fn classify_channel(
    file_name: &str,
    description: &str,
    grid: Option<&StringRecord>,
) -> Result<ChannelDescriptor, HarvestError> {
    let is_qda = description.contains("QDa");
    let is_pda = description.contains("PDA");
    let polarity = polarity_of(description);
    let sign = match polarity {
        Polarity::Positive => "(+)",
        Polarity::Negative => "(-)",
        Polarity::None => "",
    };

    if is_qda && description.contains("Scan") {
        if polarity == Polarity::None {
            return Err(malformed(file_name, "MS scan without polarity"));
        }
        return Ok(ChannelDescriptor {
            tag: format!("{sign}MS Scan"),
            polarity,
            is_scan: true,
            content3d: true,
            wavelength_grid: parse_grid(file_name, grid)?,
        });
    }

    if is_qda && description.contains("SIR") {
        if polarity == Polarity::None {
            return Err(malformed(file_name, "SIR channel without polarity"));
        }
        let words = description_words(description);
        let mz = words
            .iter()
            .position(|w| *w == "Da")
            .filter(|&i| i > 0)
            .map(|i| words[i - 1])
            .ok_or_else(|| malformed(file_name, "SIR channel without a 'Da' mass"))?;
        return Ok(ChannelDescriptor {
            tag: format!("{sign}SIR {mz} m/z"),
            polarity,
            is_scan: false,
            content3d: false,
            wavelength_grid: Vec::new(),
        });
    }

    if is_pda && description.contains("Spectrum") {
        return Ok(ChannelDescriptor {
            tag: "PDA Scan".to_string(),
            polarity: Polarity::None,
            is_scan: true,
            content3d: false,
            wavelength_grid: parse_grid(file_name, grid)?,
        });
    }

    if is_pda && description.contains('@') {
        let wavelength = description_words(description)
            .into_iter()
            .find_map(|w| w.split_once('@').map(|(before, _)| before))
            .unwrap_or_default();
        return Ok(ChannelDescriptor {
            tag: wavelength.to_string(),
            polarity: Polarity::None,
            is_scan: false,
            content3d: false,
            wavelength_grid: Vec::new(),
        });
    }

    Err(HarvestError::UnknownChannel {
        file: file_name.to_string(),
        description: description.to_string(),
    })
}

/// Preliminary-read stage: one header per export.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderStage;

impl HarvestStage for HeaderStage {
    type Input = Arc<InstrumentFile>;
    type Output = ParsedHeader;
    type Error = HarvestError;

    fn execute(&self, input: Self::Input) -> Result<Self::Output, Self::Error> {
        parse_header(&input.name, &input.text())
    }

    fn stage_name(&self) -> &'static str {
        "header"
    }
}
