//! Format-specific parsers.
//!
//! - `arw` - Empower chromatography exports (header and channel detection)
//! - `ab1` - ABIF capillary sequencer traces
//! - `fasta` - plain-text alignment records

pub mod ab1;
pub mod arw;
pub mod fasta;

pub use ab1::{decode_trace, TraceStage};
pub use arw::{parse_header, HeaderStage, ParsedHeader};
pub use fasta::{parse_fasta, FastaStage};
