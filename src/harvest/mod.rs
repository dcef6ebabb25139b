//! Harvest module - instrument export parsing and extraction pipeline.
//!
//! This module provides the pieces of a batch harvest:
//! - **Stages**: [`HarvestStage`] job units for the task pool
//! - **Formats**: header, trace and FASTA parsers in [`formats`]
//! - **Channels**: the [`ChannelMenu`] aggregate and the [`nearest`] resolver
//! - **Output**: series extraction and the column reshaper
//! - **Session**: the batch state machine via [`pipeline::HarvestSession`]

pub mod aggregate;
pub mod formats;
pub mod pipeline;
pub mod reshape;
pub mod resolve;
pub mod series;
pub mod traits;

// Re-export commonly used types
pub use aggregate::ChannelMenu;
pub use formats::ParsedHeader;
pub use pipeline::{HarvestSession, HarvestState, HarvestStats, TransferPayload};
pub use reshape::reshape;
pub use resolve::nearest;
pub use series::{extract_series, ExtractStage, ParsedFile};
pub use traits::HarvestStage;
