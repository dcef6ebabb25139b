//! Applied Biosystems `.ab1` capillary trace files.
//!
//! The file is an ABIF container: a big-endian directory of 28-byte entries
//! whose location is stored at byte 26. Each entry is keyed by a four
//! letter name plus a number (`DATA9`, `PLOC1`, ...):
//!
//! ```text
//! +0  name      [u8; 4]
//! +4  number    i32
//! +8  type      u16
//! +10 elem size u16
//! +12 count     u32
//! +16 data size u32
//! +20 offset    u32   (payloads of four bytes or less are stored here inline)
//! +24 handle    u32
//! ```

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, warn};

use crate::harvest::traits::HarvestStage;
use crate::model::{Ab1Trace, InstrumentFile};
use crate::traits::HarvestError;

const MAGIC: &[u8; 4] = b"ABIF";
const DIRECTORY_OFFSET_POS: usize = 26;
const ENTRY_SIZE: usize = 28;
const ELEMENT_SIZE_POS: usize = 10;
const COUNT_POS: usize = 12;
const DATA_OFFSET_POS: usize = 20;

const SAMPLE_TAG: &str = "SMPL1";
const PEAK_TAG: &str = "PLOC1";
const CHANNEL_TAGS: [&str; 4] = ["DATA9", "DATA10", "DATA11", "DATA12"];

fn truncated(file: &str, detail: impl Into<String>) -> HarvestError {
    HarvestError::TruncatedTrace {
        file: file.to_string(),
        detail: detail.into(),
    }
}

/// Directory entry reduced to what the decoder needs.
#[derive(Debug, Clone, Copy)]
struct Entry {
    /// Start of the entry itself, for inline payloads.
    position: usize,
    element_size: usize,
    count: usize,
    offset: usize,
}

impl Entry {
    fn payload<'a>(
        &self,
        file: &str,
        tag: &str,
        bytes: &'a [u8],
        len: usize,
    ) -> Result<&'a [u8], HarvestError> {
        let start = if len <= 4 && self.element_size * self.count <= 4 {
            self.position + DATA_OFFSET_POS
        } else {
            self.offset
        };
        start
            .checked_add(len)
            .and_then(|end| bytes.get(start..end))
            .ok_or_else(|| truncated(file, format!("{tag} needs {len} bytes at offset {start}")))
    }

    fn read_u16s(&self, file: &str, tag: &str, bytes: &[u8]) -> Result<Vec<u16>, HarvestError> {
        let payload = self.payload(file, tag, bytes, self.count * 2)?;
        Ok(payload.chunks_exact(2).map(BigEndian::read_u16).collect())
    }
}

#[derive(Debug, Default)]
struct Directory {
    sample: Option<Entry>,
    peaks: Option<Entry>,
    channels: [Option<Entry>; 4],
}

fn read_directory(file: &str, bytes: &[u8]) -> Result<Directory, HarvestError> {
    if bytes.len() < DIRECTORY_OFFSET_POS + 4 {
        return Err(truncated(file, format!("{} byte header", bytes.len())));
    }
    if &bytes[..4] != MAGIC {
        warn!(file, "Trace does not start with ABIF magic");
    }

    let start = BigEndian::read_u32(&bytes[DIRECTORY_OFFSET_POS..]) as usize;
    if start > bytes.len() {
        return Err(truncated(file, format!("directory offset {start} past end")));
    }

    let mut directory = Directory::default();
    let mut position = start;
    while position + ENTRY_SIZE <= bytes.len() {
        let raw = &bytes[position..position + ENTRY_SIZE];
        let tag = format!(
            "{}{}",
            String::from_utf8_lossy(&raw[..4]),
            BigEndian::read_i32(&raw[4..8])
        );
        let entry = Entry {
            position,
            element_size: BigEndian::read_u16(&raw[ELEMENT_SIZE_POS..]) as usize,
            count: BigEndian::read_u32(&raw[COUNT_POS..]) as usize,
            offset: BigEndian::read_u32(&raw[DATA_OFFSET_POS..]) as usize,
        };

        match tag.as_str() {
            SAMPLE_TAG => directory.sample = Some(entry),
            PEAK_TAG => directory.peaks = Some(entry),
            other => {
                if let Some(i) = CHANNEL_TAGS.iter().position(|t| *t == other) {
                    directory.channels[i] = Some(entry);
                }
            }
        }
        position += ENTRY_SIZE;
    }
    Ok(directory)
}

fn required(file: &str, entry: Option<Entry>, tag: &str) -> Result<Entry, HarvestError> {
    entry.ok_or_else(|| HarvestError::MissingTraceEntry {
        file: file.to_string(),
        tag: tag.to_string(),
    })
}

/// `floor((next - current) / 2) + current` for each neighbouring pair.
pub fn peak_midpoints(peaks: &[u16]) -> Vec<i64> {
    peaks
        .windows(2)
        .map(|pair| {
            let (current, next) = (pair[0] as i64, pair[1] as i64);
            (next - current).div_euclid(2) + current
        })
        .collect()
}

fn sample_at(file: &str, channel: &[u16], index: i64) -> Result<u16, HarvestError> {
    usize::try_from(index)
        .ok()
        .and_then(|i| channel.get(i).copied())
        .ok_or_else(|| {
            truncated(
                file,
                format!("peak index {index} outside channel of {} points", channel.len()),
            )
        })
}

/// Decodes one trace file.
///
/// Each channel is reduced twice, once at the called peaks and once halfway
/// between neighbouring peaks. Both reductions cover the first
/// `peaks - 1` peaks and end in a single zero, so all eight have the same
/// length: the peak count, or 1 when there are no peaks.
pub fn decode_trace(file: &str, bytes: &[u8]) -> Result<Ab1Trace, HarvestError> {
    let directory = read_directory(file, bytes)?;

    let sample_name = match directory.sample {
        Some(entry) => {
            let raw = entry.payload(file, SAMPLE_TAG, bytes, entry.count)?;
            String::from_utf8_lossy(raw.get(1..).unwrap_or_default()).into_owned()
        }
        None => String::new(),
    };

    let peak_locations =
        required(file, directory.peaks, PEAK_TAG)?.read_u16s(file, PEAK_TAG, bytes)?;

    let mut channels: [Vec<u16>; 4] = Default::default();
    for (i, tag) in CHANNEL_TAGS.iter().enumerate() {
        channels[i] = required(file, directory.channels[i], tag)?.read_u16s(file, tag, bytes)?;
    }

    let midpoints = peak_midpoints(&peak_locations);
    let mut peak_reduced: [Vec<u16>; 4] = Default::default();
    let mut midpoint_reduced: [Vec<u16>; 4] = Default::default();
    for (i, channel) in channels.iter().enumerate() {
        let mut at_peaks = Vec::with_capacity(peak_locations.len());
        let mut at_midpoints = Vec::with_capacity(peak_locations.len());
        for (&peak, &midpoint) in peak_locations.iter().zip(&midpoints) {
            at_peaks.push(sample_at(file, channel, peak as i64)?);
            at_midpoints.push(sample_at(file, channel, midpoint)?);
        }
        at_peaks.push(0);
        at_midpoints.push(0);
        peak_reduced[i] = at_peaks;
        midpoint_reduced[i] = at_midpoints;
    }

    debug!(
        file,
        sample = %sample_name,
        peaks = peak_locations.len(),
        points = channels[0].len(),
        "Decoded trace"
    );

    Ok(Ab1Trace {
        sample_name,
        channels,
        peak_locations,
        peak_reduced,
        midpoint_reduced,
    })
}

/// Harvest stage for sequencer trace batches.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceStage;

impl HarvestStage for TraceStage {
    type Input = Arc<InstrumentFile>;
    type Output = Ab1Trace;
    type Error = HarvestError;

    fn execute(&self, input: Self::Input) -> Result<Self::Output, Self::Error> {
        decode_trace(&input.name, &input.bytes)
    }

    fn stage_name(&self) -> &'static str {
        "trace"
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    struct Record {
        name: [u8; 4],
        number: i32,
        element_size: u16,
        payload: Vec<u8>,
    }

    fn shorts(values: &[u16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_be_bytes()).collect()
    }

    fn pstring(text: &str) -> Vec<u8> {
        let mut out = vec![text.len() as u8];
        out.extend_from_slice(text.as_bytes());
        out
    }

    /// Lays out a header, the payloads, then the directory at the end.
    fn build(records: &[Record]) -> Vec<u8> {
        let header_len = 128;
        let mut bytes = vec![0u8; header_len];
        bytes[..4].copy_from_slice(MAGIC);

        let mut offsets = Vec::new();
        for record in records {
            offsets.push(bytes.len() as u32);
            bytes.extend_from_slice(&record.payload);
        }

        let directory = bytes.len() as u32;
        bytes[DIRECTORY_OFFSET_POS..DIRECTORY_OFFSET_POS + 4]
            .copy_from_slice(&directory.to_be_bytes());

        for (record, offset) in records.iter().zip(offsets) {
            let count = record.payload.len() as u32 / record.element_size as u32;
            bytes.extend_from_slice(&record.name);
            bytes.extend_from_slice(&record.number.to_be_bytes());
            bytes.extend_from_slice(&4u16.to_be_bytes());
            bytes.extend_from_slice(&record.element_size.to_be_bytes());
            bytes.extend_from_slice(&count.to_be_bytes());
            bytes.extend_from_slice(&(record.payload.len() as u32).to_be_bytes());
            bytes.extend_from_slice(&offset.to_be_bytes());
            bytes.extend_from_slice(&0u32.to_be_bytes());
        }
        bytes
    }

    pub(crate) fn sample_trace(sample: &str, peaks: &[u16]) -> Vec<u8> {
        let mut records = vec![
            Record {
                name: *b"SMPL",
                number: 1,
                element_size: 1,
                payload: pstring(sample),
            },
            Record {
                name: *b"PLOC",
                number: 1,
                element_size: 2,
                payload: shorts(peaks),
            },
        ];
        for (i, number) in (9..=12).enumerate() {
            let base = (i as u16 + 1) * 1000;
            let channel: Vec<u16> = (0..40).map(|p| base + p).collect();
            records.push(Record {
                name: *b"DATA",
                number,
                element_size: 2,
                payload: shorts(&channel),
            });
        }
        build(&records)
    }

    #[test]
    fn test_midpoints() {
        assert_eq!(peak_midpoints(&[10, 20, 30]), vec![15, 25]);
        assert_eq!(peak_midpoints(&[10, 13]), vec![11]);
        assert!(peak_midpoints(&[7]).is_empty());
    }

    #[test]
    fn test_decode_trace() {
        let bytes = sample_trace("sample-01", &[10, 20, 30]);
        let trace = decode_trace("a.ab1", &bytes).unwrap();

        assert_eq!(trace.sample_name, "sample-01");
        assert_eq!(trace.peak_locations, vec![10, 20, 30]);
        assert_eq!(trace.channels[0].len(), 40);
        assert_eq!(trace.channels[3][0], 4000);

        assert_eq!(trace.peak_reduced[0], vec![1010, 1020, 0]);
        assert_eq!(trace.midpoint_reduced[0], vec![1015, 1025, 0]);
        assert_eq!(trace.midpoint_reduced[2], vec![3015, 3025, 0]);

        for reduced in trace.peak_reduced.iter().chain(&trace.midpoint_reduced) {
            assert_eq!(reduced.len(), trace.peak_locations.len());
            assert_eq!(reduced.last(), Some(&0));
            assert_ne!(reduced[reduced.len() - 2], 0);
        }
    }

    #[test]
    fn test_no_peaks_leaves_only_padding() {
        let trace = decode_trace("a.ab1", &sample_trace("blank", &[])).unwrap();
        assert!(trace.peak_locations.is_empty());
        for reduced in trace.peak_reduced.iter().chain(&trace.midpoint_reduced) {
            assert_eq!(reduced, &vec![0]);
        }
    }

    #[test]
    fn test_peak_past_channel_end() {
        let bytes = sample_trace("s", &[10, 80]);
        assert!(matches!(
            decode_trace("a.ab1", &bytes),
            Err(HarvestError::TruncatedTrace { .. })
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let mut bytes = sample_trace("s", &[1, 2, 3]);
        // Point the first DATA entry far past the end of the buffer.
        let directory = BigEndian::read_u32(&bytes[DIRECTORY_OFFSET_POS..]) as usize;
        let data9 = directory + 2 * ENTRY_SIZE;
        bytes[data9 + DATA_OFFSET_POS..data9 + DATA_OFFSET_POS + 4]
            .copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            decode_trace("a.ab1", &bytes),
            Err(HarvestError::TruncatedTrace { .. })
        ));
    }

    #[test]
    fn test_short_file_and_bad_directory() {
        assert!(matches!(
            decode_trace("a.ab1", b"ABIF"),
            Err(HarvestError::TruncatedTrace { .. })
        ));

        let mut bytes = vec![0u8; 64];
        bytes[DIRECTORY_OFFSET_POS..DIRECTORY_OFFSET_POS + 4]
            .copy_from_slice(&1000u32.to_be_bytes());
        assert!(matches!(
            decode_trace("a.ab1", &bytes),
            Err(HarvestError::TruncatedTrace { .. })
        ));
    }

    #[test]
    fn test_missing_channel_entry() {
        let records = vec![Record {
            name: *b"PLOC",
            number: 1,
            element_size: 2,
            payload: shorts(&[1, 2, 3]),
        }];
        match decode_trace("a.ab1", &build(&records)).unwrap_err() {
            HarvestError::MissingTraceEntry { tag, .. } => assert_eq!(tag, "DATA9"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_inline_payload() {
        let mut bytes = sample_trace("sample", &[1, 2, 3]);
        let directory = BigEndian::read_u32(&bytes[DIRECTORY_OFFSET_POS..]) as usize;
        // Rewrite PLOC1 as a two-element inline array.
        let ploc = directory + ENTRY_SIZE;
        bytes[ploc + COUNT_POS..ploc + COUNT_POS + 4].copy_from_slice(&2u32.to_be_bytes());
        bytes[ploc + DATA_OFFSET_POS..ploc + DATA_OFFSET_POS + 4].copy_from_slice(&[0, 4, 0, 8]);

        let trace = decode_trace("a.ab1", &bytes).unwrap();
        assert_eq!(trace.peak_locations, vec![4, 8]);
        assert_eq!(trace.peak_reduced[1], vec![2004, 0]);
        assert_eq!(trace.midpoint_reduced[1], vec![2006, 0]);
    }
}
