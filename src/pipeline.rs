// 🚚 Pipeline - one aggregation run over a closed input stream
//
//   reader thread ──bounded queue──▶ N extraction workers (private partials)
//                                         │
//                          coordinator merges partials one at a time
//                                         ▼
//                     finalize per year (rayon) ─▶ combiner ─▶ writer
//
// Run state: Init → Ingesting → Finalizing → Written, never backwards.

use crate::aggregator::GroupAggregator;
use crate::combiner::assemble_year;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::extractor::ExtractionStats;
use crate::source::RowSource;
use crate::writer::{ArtifactReceipt, ArtifactWriter, YearOutput};
use chrono::{DateTime, Utc};
use crossbeam_channel::bounded;
use csv::ByteRecord;
use log::{debug, error, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

// ============================================================================
// RUN STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Init,
    Ingesting,
    Finalizing,
    Written,
}

impl RunState {
    pub fn name(&self) -> &'static str {
        match self {
            RunState::Init => "INIT",
            RunState::Ingesting => "INGESTING",
            RunState::Finalizing => "FINALIZING",
            RunState::Written => "WRITTEN",
        }
    }

    /// Ingesting and Finalizing may repeat; nothing goes backwards
    pub fn can_advance_to(&self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Init, RunState::Ingesting)
                | (RunState::Ingesting, RunState::Ingesting)
                | (RunState::Init, RunState::Finalizing)
                | (RunState::Ingesting, RunState::Finalizing)
                | (RunState::Finalizing, RunState::Finalizing)
                | (RunState::Finalizing, RunState::Written)
        )
    }
}

// ============================================================================
// AGGREGATION RUN
// ============================================================================

/// Owns the canonical aggregate for one run and enforces the state machine
pub struct AggregationRun {
    state: RunState,
    canonical: GroupAggregator,
}

impl AggregationRun {
    pub fn new() -> Self {
        AggregationRun {
            state: RunState::Init,
            canonical: GroupAggregator::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn aggregator(&self) -> &GroupAggregator {
        &self.canonical
    }

    fn advance(&mut self, next: RunState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(PipelineError::InvalidState {
                from: self.state.name(),
                to: next.name(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Extract and aggregate a batch of raw rows in place
    pub fn ingest_rows(&mut self, rows: &[ByteRecord]) -> Result<()> {
        self.advance(RunState::Ingesting)?;
        self.canonical.ingest_rows(rows)
    }

    /// Fold a worker's partial aggregate into the canonical one
    pub fn merge_partial(&mut self, partial: GroupAggregator) -> Result<()> {
        self.advance(RunState::Ingesting)?;
        self.canonical.merge(partial)
    }

    /// Finalize every observed year, adding the "All" entries
    pub fn finalize(&mut self) -> Result<BTreeMap<i32, YearOutput>> {
        self.advance(RunState::Finalizing)?;

        self.canonical
            .by_year()
            .into_par_iter()
            .map(|(year, districts)| assemble_year(year, &districts).map(|output| (year, output)))
            .collect()
    }

    /// Publish one artifact per year. A failed year does not stop the
    /// remaining years, but the run is reported as failed.
    pub fn write(
        &mut self,
        outputs: &BTreeMap<i32, YearOutput>,
        writer: &ArtifactWriter,
    ) -> Result<Vec<ArtifactReceipt>> {
        if !self.state.can_advance_to(RunState::Written) {
            return Err(PipelineError::InvalidState {
                from: self.state.name(),
                to: RunState::Written.name(),
            });
        }

        let mut receipts = Vec::new();
        let mut first_failure = None;

        for output in outputs.values() {
            match writer.write(output) {
                Ok(receipt) => receipts.push(receipt),
                Err(e) => {
                    error!("{}", e);
                    if first_failure.is_none() {
                        first_failure = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_failure {
            return Err(e);
        }

        self.advance(RunState::Written)?;
        Ok(receipts)
    }
}

impl Default for AggregationRun {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stats: ExtractionStats,
    pub groups: usize,
    pub years: Vec<i32>,
    pub artifacts: Vec<ArtifactReceipt>,
}

impl RunReport {
    pub fn years_covered(&self) -> Option<(i32, i32)> {
        Some((*self.years.first()?, *self.years.last()?))
    }

    pub fn summary(&self) -> String {
        let span = match self.years_covered() {
            Some((first, last)) => format!("{} - {}", first, last),
            None => "no years".to_string(),
        };

        format!(
            "{}: {} | {} groups, years {}, {} artifacts in {:.1}s",
            self.source,
            self.stats.summary(),
            self.groups,
            span,
            self.artifacts.len(),
            (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
        )
    }
}

// ============================================================================
// PARALLEL INGESTION
// ============================================================================

/// Read → extract → aggregate with a bounded queue and a worker pool
///
/// Each worker owns a private partial aggregate; partials are merged into
/// the run one at a time after the workers finish. Any fatal error flips
/// the cancel flag: workers stop taking batches, and once their receivers
/// are gone the reader's pending send fails and it stops too.
fn ingest_parallel<R: io::Read + Send>(
    run: &mut AggregationRun,
    mut source: RowSource<R>,
    config: &PipelineConfig,
) -> Result<u64> {
    let cancel = AtomicBool::new(false);
    let (tx, rx) = bounded::<Vec<ByteRecord>>(config.queue_capacity);

    let (read_result, partials) = thread::scope(|scope| {
        let cancel = &cancel;

        let reader = scope.spawn(move || -> Result<u64> {
            let mut batches = 0u64;

            while !cancel.load(Ordering::Relaxed) {
                let batch = match source.next_batch(config.batch_size) {
                    Ok(Some(batch)) => batch,
                    Ok(None) => break,
                    Err(e) => {
                        cancel.store(true, Ordering::Relaxed);
                        return Err(e);
                    }
                };

                batches += 1;
                debug!("Queued batch {} ({} rows)", batches, batch.len());

                if tx.send(batch).is_err() {
                    break;
                }
            }

            Ok(source.rows_read())
        });

        let workers: Vec<_> = (0..config.workers)
            .map(|worker_id| {
                let rx = rx.clone();
                scope.spawn(move || -> Result<GroupAggregator> {
                    let mut partial = GroupAggregator::new();

                    for batch in rx.iter() {
                        if cancel.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Err(e) = partial.ingest_rows(&batch) {
                            cancel.store(true, Ordering::Relaxed);
                            return Err(e);
                        }
                    }

                    debug!(
                        "Worker {} finished: {} rows, {} groups",
                        worker_id,
                        partial.stats().total_rows,
                        partial.group_count()
                    );
                    Ok(partial)
                })
            })
            .collect();

        drop(rx);

        let read_result = reader
            .join()
            .map_err(|_| PipelineError::WorkerPanicked)
            .and_then(|r| r);

        let partials: Vec<Result<GroupAggregator>> = workers
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| PipelineError::WorkerPanicked)
                    .and_then(|r| r)
            })
            .collect();

        (read_result, partials)
    });

    let rows_read = read_result?;

    for partial in partials {
        run.merge_partial(partial?)?;
    }

    Ok(rows_read)
}

// ============================================================================
// ENTRY POINTS
// ============================================================================

/// Run the whole pipeline over the configured input file
pub fn run(config: &PipelineConfig) -> Result<RunReport> {
    config.validate()?;
    info!("Reading data from: {}", config.input.display());

    let source = RowSource::open(&config.input)?;
    run_with_source(source, config.input.display().to_string(), config)
}

/// Run the pipeline over any reader yielding Price Paid rows
pub fn run_from_reader<R: io::Read + Send>(
    reader: R,
    label: &str,
    config: &PipelineConfig,
) -> Result<RunReport> {
    config.validate()?;
    run_with_source(RowSource::from_reader(reader), label.to_string(), config)
}

fn run_with_source<R: io::Read + Send>(
    source: RowSource<R>,
    label: String,
    config: &PipelineConfig,
) -> Result<RunReport> {
    let started_at = Utc::now();
    let mut run = AggregationRun::new();

    info!(
        "Processing with {} workers, batches of {} rows, queue capacity {}",
        config.workers, config.batch_size, config.queue_capacity
    );

    let rows_read = ingest_parallel(&mut run, source, config)?;

    let stats = run.aggregator().stats().clone();
    debug_assert_eq!(stats.total_rows, rows_read);

    info!("Processed {} total rows", stats.total_rows);
    info!("Valid rows: {}", stats.valid_rows());
    if stats.rejected_rows() > 0 {
        warn!("Rejected rows: {} ({})", stats.rejected_rows(), stats.summary());
    }

    let groups = run.aggregator().group_count();
    let years: Vec<i32> = run.aggregator().years().into_iter().collect();
    if let (Some(first), Some(last)) = (years.first(), years.last()) {
        info!("Years covered: {} - {}", first, last);
    }

    let outputs = run.finalize()?;

    info!("Writing JSON files to: {}", config.output_dir.display());
    let writer = ArtifactWriter::new(&config.output_dir);
    let artifacts = run.write(&outputs, &writer)?;

    let report = RunReport {
        source: label,
        started_at,
        finished_at: Utc::now(),
        stats,
        groups,
        years,
        artifacts,
    };

    info!("Complete! Generated {} year files.", report.artifacts.len());
    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================
