//! FASTA alignment exports.

use std::sync::Arc;

use bio::io::fasta;
use tracing::warn;

use crate::harvest::traits::HarvestStage;
use crate::model::{FastaRecord, InstrumentFile};
use crate::traits::HarvestError;

/// Byte offset of the first line that opens a record.
fn first_record(text: &str) -> Option<usize> {
    text.match_indices('>')
        .map(|(i, _)| i)
        .find(|&i| i == 0 || matches!(text.as_bytes()[i - 1], b'\r' | b'\n'))
}

/// Splits `text` into records. Sequence lines are joined without separators;
/// anything before the first `>` is ignored.
pub fn parse_fasta(file: &str, text: &str) -> Result<Vec<FastaRecord>, HarvestError> {
    let empty = || HarvestError::EmptyBatch {
        file: file.to_string(),
    };
    let start = first_record(text).ok_or_else(empty)?;

    let mut records = Vec::new();
    for record in fasta::Reader::new(text[start..].as_bytes()).records() {
        let record = record.map_err(|e| {
            warn!(file, error = %e, "Unreadable FASTA record");
            empty()
        })?;
        let header = match record.desc() {
            Some(desc) => format!("{} {desc}", record.id()),
            None => record.id().to_string(),
        };
        records.push(FastaRecord {
            header,
            sequence: String::from_utf8_lossy(record.seq()).into_owned(),
        });
    }

    if records.is_empty() {
        return Err(empty());
    }
    Ok(records)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FastaStage;

impl HarvestStage for FastaStage {
    type Input = Arc<InstrumentFile>;
    type Output = Vec<FastaRecord>;
    type Error = HarvestError;

    fn execute(&self, input: Self::Input) -> Result<Self::Output, Self::Error> {
        parse_fasta(&input.name, &input.text())
    }

    fn stage_name(&self) -> &'static str {
        "fasta"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_record() {
        let text = ">A01_For\r\nACGT\r\nTTGA\r\n>A01_Rev\nGG\n\n>empty\n";
        let records = parse_fasta("aln.fasta", text).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].header, "A01_For");
        assert_eq!(records[0].sequence, "ACGTTTGA");
        assert_eq!(records[1].sequence, "GG");
        assert_eq!(records[2].header, "empty");
        assert_eq!(records[2].sequence, "");
    }

    #[test]
    fn test_leading_text_ignored() {
        let records = parse_fasta("aln.fasta", "CLUSTAL\n>x\nAC\n").unwrap();
        assert_eq!(
            records,
            vec![FastaRecord {
                header: "x".to_string(),
                sequence: "AC".to_string(),
            }]
        );
    }

    #[test]
    fn test_header_keeps_description() {
        let records = parse_fasta("aln.fasta", ">B02_For trimmed q20\nAC\n").unwrap();
        assert_eq!(records[0].header, "B02_For trimmed q20");
    }

    #[test]
    fn test_no_records() {
        match parse_fasta("plain.fasta", "ACGT\nACGT\n").unwrap_err() {
            HarvestError::EmptyBatch { file } => assert_eq!(file, "plain.fasta"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
