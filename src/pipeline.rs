use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::blast::SearchClient;
use crate::checkpoint::CheckpointStore;
use crate::db::HitStore;
use crate::domain::ReadRecord;
use crate::entrez::AnnotationClient;
use crate::error::KiraError;
use crate::normalize::{Normalizer, RejectedHit};
use crate::pacing::Pacer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the failed read; the next run resumes there.
    #[default]
    Halt,
    /// Record the read as skipped and keep going.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Search,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Search => "search",
            Stage::Persist => "persist",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Fetched,
    Searched,
    Normalized,
    Persisted,
    Checkpointed,
    Failed(Stage),
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => debug!(
                elapsed_ms = elapsed.as_millis() as u64,
                "{}", event.message
            ),
            None => debug!("{}", event.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRead {
    pub header: String,
    pub stage: Stage,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedHitEntry {
    pub header: String,
    pub accession: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub queued: usize,
    pub processed: usize,
    pub duplicates: usize,
    pub search_calls: usize,
    pub hits_stored: usize,
    pub hits_rejected: usize,
    pub failed: Vec<FailedRead>,
    pub rejected: Vec<RejectedHitEntry>,
    pub halted: Option<FailedRead>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    fn start(queued: usize) -> Self {
        let now = Utc::now();
        Self {
            queued,
            processed: 0,
            duplicates: 0,
            search_calls: 0,
            hits_stored: 0,
            hits_rejected: 0,
            failed: Vec::new(),
            rejected: Vec::new(),
            halted: None,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn halt_error(&self) -> Option<KiraError> {
        self.halted.as_ref().map(|failed| KiraError::RunHalted {
            header: failed.header.clone(),
            stage: failed.stage,
            reason: failed.reason.clone(),
        })
    }
}

enum ReadOutcome {
    Stored { hits: usize, rejected: Vec<RejectedHit> },
    Duplicate,
}

pub struct PipelineContext<S, A, C>
where
    S: SearchClient,
    A: AnnotationClient,
    C: CheckpointStore,
{
    pub store: HitStore,
    pub checkpoint: C,
    pub search: S,
    pub normalizer: Normalizer<A>,
    pub pacer: Box<dyn Pacer>,
    pub policy: FailurePolicy,
}

impl<S, A, C> PipelineContext<S, A, C>
where
    S: SearchClient,
    A: AnnotationClient,
    C: CheckpointStore,
{
    pub fn new(
        store: HitStore,
        checkpoint: C,
        search: S,
        annotations: A,
        pacer: Box<dyn Pacer>,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            store,
            checkpoint,
            search,
            normalizer: Normalizer::new(annotations),
            pacer,
            policy,
        }
    }

    // Per-read failures go into the summary; only checkpoint writes end the run.
    pub fn run(
        &mut self,
        queue: Vec<ReadRecord>,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, KiraError> {
        let mut summary = RunSummary::start(queue.len());
        let total = queue.len();
        info!(queued = total, policy = ?self.policy, "run started");

        for (index, read) in queue.iter().enumerate() {
            let started_at = Instant::now();
            sink.event(ProgressEvent {
                message: format!("read {}/{total}: {}", index + 1, read.header),
                elapsed: None,
            });

            match self.process_read(read, &mut summary) {
                Ok(outcome) => {
                    match outcome {
                        ReadOutcome::Stored { hits, rejected } => {
                            summary.processed += 1;
                            summary.hits_stored += hits;
                            summary.hits_rejected += rejected.len();
                            summary
                                .rejected
                                .extend(rejected.into_iter().map(|hit| RejectedHitEntry {
                                    header: read.header.clone(),
                                    accession: hit.accession,
                                    reason: hit.reason,
                                }));
                        }
                        ReadOutcome::Duplicate => summary.duplicates += 1,
                    }
                    self.checkpoint.save(&read.header).inspect_err(|err| {
                        error!(header = %read.header, error = %err, "checkpoint write failed");
                    })?;
                    debug!(header = %read.header, state = ?ReadState::Checkpointed, "read done");
                    sink.event(ProgressEvent {
                        message: format!("checkpointed {}", read.header),
                        elapsed: Some(started_at.elapsed()),
                    });
                }
                Err(failed) => {
                    summary.failed.push(failed.clone());
                    match self.policy {
                        FailurePolicy::Halt => {
                            error!(
                                header = %failed.header,
                                stage = %failed.stage,
                                reason = %failed.reason,
                                "run halted; checkpoint left at previous read"
                            );
                            summary.halted = Some(failed);
                            break;
                        }
                        FailurePolicy::Skip => {
                            error!(
                                audit = "skipped_read",
                                header = %failed.header,
                                stage = %failed.stage,
                                reason = %failed.reason,
                                "read skipped; recover with --ignore-checkpoint"
                            );
                        }
                    }
                }
            }
        }

        summary.finished_at = Utc::now();
        info!(
            processed = summary.processed,
            duplicates = summary.duplicates,
            failed = summary.failed.len(),
            hits_stored = summary.hits_stored,
            "run finished"
        );
        Ok(summary)
    }

    fn process_read(
        &mut self,
        read: &ReadRecord,
        summary: &mut RunSummary,
    ) -> Result<ReadOutcome, FailedRead> {
        let fail = |stage: Stage, err: KiraError| {
            debug!(header = %read.header, state = ?ReadState::Failed(stage), "read failed");
            FailedRead {
                header: read.header.clone(),
                stage,
                reason: err.to_string(),
            }
        };

        debug!(header = %read.header, state = ?ReadState::Fetched, "read fetched");
        let already_stored = self
            .store
            .contains_read(&read.header)
            .map_err(|err| fail(Stage::Fetch, err))?;
        if already_stored {
            info!(header = %read.header, "read already stored; skipping search");
            return Ok(ReadOutcome::Duplicate);
        }

        self.pacer.before_call();
        summary.search_calls += 1;
        let searched = self.search.search(&read.sequence);
        self.pacer.after_call();
        let raw_hits = searched.map_err(|err| fail(Stage::Search, err))?;
        debug!(header = %read.header, hits = raw_hits.len(), state = ?ReadState::Searched, "search done");

        let batch = self.normalizer.normalize(&raw_hits);
        debug!(
            header = %read.header,
            hits = batch.hits.len(),
            rejected = batch.rejected.len(),
            state = ?ReadState::Normalized,
            "hits normalized"
        );

        match self.store.persist(read, &batch.hits) {
            Ok(persisted) => {
                debug!(header = %read.header, state = ?ReadState::Persisted, "read persisted");
                info!(
                    header = %read.header,
                    hits = persisted.hits_stored,
                    rejected = batch.rejected.len(),
                    paired = persisted.paired_with.is_some(),
                    "read stored"
                );
                Ok(ReadOutcome::Stored {
                    hits: persisted.hits_stored,
                    rejected: batch.rejected,
                })
            }
            Err(KiraError::DuplicateRead(header)) => {
                warn!(header = %header, "read already stored; treating as duplicate");
                Ok(ReadOutcome::Duplicate)
            }
            Err(err) => Err(fail(Stage::Persist, err)),
        }
    }
}
