//! Job-unit abstraction shared by every parser the task pool runs.
//!
//! A stage declares its input and output types up front; the pool ships
//! inputs to workers over owned values and never needs to know which
//! format it is driving.

use crate::traits::HarvestError;

// ============================================================================
// Stage Trait
// ============================================================================

/// One unit of per-file work: turns an `Input` into an `Output`.
///
/// Every format parser the harvester fans out (header parsing, series
/// extraction, trace decoding, FASTA splitting) is a stage. The
/// [`TaskPool`](crate::executor::TaskPool) calls [`execute`](Self::execute)
/// once per job, sequentially within a worker.
///
/// # Thread Safety
///
/// Stages are shared across worker threads behind an `Arc`, so they must be
/// `Send + Sync`; inputs and outputs cross thread boundaries and must be
/// `Send + 'static`.
///
/// # Examples
///
/// ```ignore
/// struct Uppercase;
///
/// impl HarvestStage for Uppercase {
///     type Input = String;
///     type Output = String;
///     type Error = HarvestError;
///
///     fn execute(&self, input: Self::Input) -> Result<Self::Output, Self::Error> {
///         Ok(input.to_uppercase())
///     }
///
///     fn stage_name(&self) -> &'static str {
///         "uppercase"
///     }
/// }
/// ```
pub trait HarvestStage: Send + Sync {
    /// One job, usually a single file
    type Input: Send + 'static;

    /// Per-job result collected by the pool
    type Output: Send + 'static;

    /// Failure type; the pool folds it into [`HarvestError`]
    type Error: Into<HarvestError> + Send + 'static;

    /// Processes one job.
    ///
    /// Must be deterministic: the same input yields the same output, so a
    /// batch can be repartitioned across any number of workers.
    fn execute(&self, input: Self::Input) -> Result<Self::Output, Self::Error>;

    /// Short name used in span fields and progress messages.
    fn stage_name(&self) -> &'static str;
}
