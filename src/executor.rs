use crate::harvest::traits::HarvestStage;
use crate::model::{BatchProgress, StatusUpdate};
use crate::traits::HarvestError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// Lower bound on the worker limit, whatever the hardware reports.
pub const MIN_WORKERS: usize = 4;

/// Hardware parallelism, floored at `min_workers`.
pub fn hardware_worker_limit(min_workers: usize) -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(min_workers)
}

/// Fixed-size pool that splits a job list into static round-robin
/// partitions, one per worker.
///
/// Workers run their partition in order on blocking threads. Results are
/// concatenated by worker index, so output order matches input order only
/// when a single worker is used. The first failing worker fails the whole
/// batch. The other workers stop at their next job boundary, and no progress
/// is reported once `run` has returned.
#[derive(Debug, Clone)]
pub struct TaskPool {
    max_workers: usize,
    progress: Option<UnboundedSender<StatusUpdate>>,
}

impl TaskPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            progress: None,
        }
    }

    /// Pool sized by available parallelism (at least [`MIN_WORKERS`]).
    pub fn from_hardware() -> Self {
        Self::new(hardware_worker_limit(MIN_WORKERS))
    }

    /// Forwards a percent update to `sink` after each completed job.
    pub fn with_progress(mut self, sink: UnboundedSender<StatusUpdate>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Number of workers spawned for a batch of `jobs`.
    pub fn worker_count(&self, jobs: usize) -> usize {
        jobs.min(self.max_workers)
    }

    #[instrument(skip_all, fields(stage = stage.stage_name(), jobs = jobs.len()))]
    pub async fn run<S>(
        &self,
        stage: Arc<S>,
        jobs: Vec<S::Input>,
    ) -> Result<Vec<S::Output>, HarvestError>
    where
        S: HarvestStage + 'static,
    {
        let total = jobs.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let workers = self.worker_count(total);
        let partitions = partition(jobs, workers);
        info!(workers, total, "Dispatching batch");

        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let tracker = tokio::spawn(track_progress(
            done_rx,
            total,
            stage.stage_name(),
            self.progress.clone(),
        ));

        let abandon = Arc::new(AtomicBool::new(false));
        let mut set = JoinSet::new();
        for (index, partition) in partitions.into_iter().enumerate() {
            let stage = Arc::clone(&stage);
            let done = done_tx.clone();
            let abandon = Arc::clone(&abandon);
            set.spawn_blocking(move || {
                let outcome = run_partition(stage.as_ref(), partition, &done, &abandon);
                (index, outcome)
            });
        }
        drop(done_tx);

        let mut slots: Vec<Option<Vec<S::Output>>> = (0..workers).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            let failure = match joined {
                Ok((index, Ok(results))) => {
                    slots[index] = Some(results);
                    continue;
                }
                Ok((index, Err(source))) => {
                    warn!(worker = index, error = %source, "Worker failed, abandoning batch");
                    HarvestError::WorkerFailure {
                        worker: index,
                        source: Box::new(source),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Worker panicked, abandoning batch");
                    HarvestError::WorkerPanic(e.to_string())
                }
            };

            abandon.store(true, Ordering::Relaxed);
            tracker.abort();
            let _ = tracker.await;
            set.abort_all();
            // Running blocking workers cannot be cancelled; wait out their current job.
            while set.join_next().await.is_some() {}
            return Err(failure);
        }

        let progress = tracker
            .await
            .map_err(|e| HarvestError::WorkerPanic(e.to_string()))?;
        debug!(
            completed = progress.completed_units,
            total = progress.total_units,
            "Batch joined"
        );

        Ok(slots.into_iter().flatten().flatten().collect())
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::from_hardware()
    }
}

/// Worker `k` receives jobs `{i : i mod workers == k}`, in input order.
fn partition<T>(jobs: Vec<T>, workers: usize) -> Vec<Vec<T>> {
    let mut partitions: Vec<Vec<T>> = (0..workers).map(|_| Vec::new()).collect();
    for (i, job) in jobs.into_iter().enumerate() {
        partitions[i % workers].push(job);
    }
    partitions
}

fn run_partition<S: HarvestStage>(
    stage: &S,
    partition: Vec<S::Input>,
    done: &UnboundedSender<()>,
    abandon: &AtomicBool,
) -> Result<Vec<S::Output>, HarvestError> {
    let mut results = Vec::with_capacity(partition.len());
    for job in partition {
        if abandon.load(Ordering::Relaxed) {
            break;
        }
        match stage.execute(job) {
            Ok(output) => results.push(output),
            Err(e) => {
                abandon.store(true, Ordering::Relaxed);
                return Err(e.into());
            }
        }
        // The tracker only disappears once the batch is abandoned.
        let _ = done.send(());
    }
    Ok(results)
}

async fn track_progress(
    mut done: UnboundedReceiver<()>,
    total: usize,
    stage: &'static str,
    sink: Option<UnboundedSender<StatusUpdate>>,
) -> BatchProgress {
    let mut progress = BatchProgress::new(total);
    while done.recv().await.is_some() {
        progress.record();
        debug!(
            stage,
            completed = progress.completed_units,
            total,
            "Job completed"
        );
        if let Some(sink) = &sink {
            let _ = sink.send(StatusUpdate::new(
                progress.percent(),
                format!(
                    "{stage}: {}/{} files processed",
                    progress.completed_units, total
                ),
            ));
        }
    }
    progress
}
