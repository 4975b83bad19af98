//! Run orchestration.
//!
//! Stages:
//! 1. reconcile orphaned partial copies (skipped on dry runs),
//! 2. turn each share's cache policy into scan jobs,
//! 3. enumerate: one walk per (share, source), bucketed by source,
//! 4. evaluate: allocate or check space, establish paths, validate, bucketed by share,
//! 5. move: bucketed by destination, one thread per destination, sequential inside.
//!
//! Item failures are logged and skipped. Cancellation and configuration errors
//! end the run.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, info, warn};

use crate::allocation::Allocator;
use crate::allocation::ledger::Ledger;
use crate::config::Config;
use crate::errors::TierMoveError;
use crate::fs_ops::{BucketReport, Mover};
use crate::inuse::{InUseChecker, ProcFdScanner};
use crate::moveable::Moveable;
use crate::pathing::Pathing;
use crate::queue::{Decision, Progress, QueueItem, QueueManager, process_concurrent};
use crate::resume;
use crate::shutdown::CancelToken;
use crate::storage::{Inventory, MoveDirection, Share, Storage};
use crate::usage::{DiskUsageProvider, StatvfsUsage};
use crate::validator::validate_moveable;
use crate::walker::Walker;

/// One walk of one share on one source volume.
#[derive(Debug, Clone)]
pub struct ScanJob {
    pub share: Arc<Share>,
    pub source: Arc<Storage>,
    /// Fixed destination; `None` means the array allocator picks per item.
    pub dest: Option<Arc<Storage>>,
}

impl QueueItem for ScanJob {
    type Key = (String, String);

    fn key(&self) -> Self::Key {
        (self.share.name().to_string(), self.source.name().to_string())
    }
}

/// What a run did, stage by stage.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub dry_run: bool,
    pub shares: Vec<String>,
    pub reconciled_partials: usize,
    pub discovered: usize,
    pub planned: usize,
    pub enumerate: Progress,
    pub evaluate: Progress,
    pub io: Progress,
    pub buckets: Vec<BucketReport>,
    pub bytes_moved: u64,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl RunSummary {
    pub fn moved(&self) -> usize {
        self.buckets.iter().map(|b| b.moved).sum()
    }

    /// Items skipped at any stage after discovery.
    pub fn skipped(&self) -> usize {
        self.evaluate.skipped + self.buckets.iter().map(|b| b.skipped).sum::<usize>()
    }
}

/// Items that survived planning.
#[derive(Debug)]
pub struct Plan {
    pub items: Vec<Moveable>,
    pub discovered: usize,
    pub enumerate: Progress,
    pub evaluate: Progress,
}

pub struct Pipeline {
    inventory: Arc<Inventory>,
    usage: Arc<dyn DiskUsageProvider>,
    inuse: Arc<dyn InUseChecker>,
    cancel: CancelToken,
    workers: usize,
    dry_run: bool,
}

impl Pipeline {
    pub fn new(
        inventory: Arc<Inventory>,
        usage: Arc<dyn DiskUsageProvider>,
        inuse: Arc<dyn InUseChecker>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            inventory,
            usage,
            inuse,
            cancel,
            workers: rayon::current_num_threads(),
            dry_run: false,
        }
    }

    /// Pipeline with the live statvfs and `/proc` providers.
    pub fn from_config(cfg: &Config, cancel: CancelToken) -> Self {
        Self::new(
            Arc::new(cfg.inventory.clone()),
            Arc::new(StatvfsUsage::new(cfg.usage_refresh)),
            Arc::new(ProcFdScanner::new(cfg.inuse_refresh)),
            cancel,
        )
        .with_workers(cfg.workers.unwrap_or_else(rayon::current_num_threads))
        .with_dry_run(cfg.dry_run)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Full run over `shares`.
    pub fn run(&self, shares: &[Arc<Share>]) -> Result<RunSummary, TierMoveError> {
        let started_at = Local::now();
        let reconciled_partials = if self.dry_run {
            debug!("dry run: skipping partial-copy reconciliation");
            0
        } else {
            resume::reconcile(&self.inventory, shares, &self.cancel)?
        };

        let plan = self.plan(shares)?;
        let planned = plan.items.len();
        let (io, buckets) = self.execute(plan.items)?;
        let bytes_moved = buckets.iter().map(|b| b.bytes).sum();

        let summary = RunSummary {
            dry_run: self.dry_run,
            shares: shares.iter().map(|s| s.name().to_string()).collect(),
            reconciled_partials,
            discovered: plan.discovered,
            planned,
            enumerate: plan.enumerate,
            evaluate: plan.evaluate,
            io,
            buckets,
            bytes_moved,
            started_at,
            finished_at: Local::now(),
        };
        info!(
            discovered = summary.discovered,
            planned = summary.planned,
            moved = summary.moved(),
            skipped = summary.skipped(),
            bytes = summary.bytes_moved,
            dry_run = self.dry_run,
            "run finished"
        );
        Ok(summary)
    }

    /// Turn share policy into scan jobs. A share whose direction needs storage or an
    /// allocator that does not exist fails the whole call.
    pub fn scan_jobs(&self, shares: &[Arc<Share>]) -> Result<Vec<ScanJob>, TierMoveError> {
        let mut jobs = Vec::new();
        for share in shares {
            let Some(direction) = share.direction() else {
                debug!(share = %share.name(), "share is not moved");
                continue;
            };
            match direction {
                MoveDirection::PoolToArray { pool } => {
                    share.allocator_kind()?;
                    jobs.push(ScanJob {
                        share: share.clone(),
                        source: self.pool(share, &pool)?,
                        dest: None,
                    });
                }
                MoveDirection::ArrayToPool { pool } => {
                    let dest = self.pool(share, &pool)?;
                    for disk in self.inventory.included_disks(share) {
                        jobs.push(ScanJob {
                            share: share.clone(),
                            source: disk,
                            dest: Some(dest.clone()),
                        });
                    }
                }
                MoveDirection::PoolToPool { from, to } => jobs.push(ScanJob {
                    share: share.clone(),
                    source: self.pool(share, &from)?,
                    dest: Some(self.pool(share, &to)?),
                }),
            }
        }
        Ok(jobs)
    }

    fn pool(&self, share: &Share, name: &str) -> Result<Arc<Storage>, TierMoveError> {
        self.inventory
            .pool(name)
            .ok_or_else(|| TierMoveError::Config(format!("share '{}' references unknown pool '{name}'", share.name())))
    }

    /// Stages 2 to 4: everything short of touching the disks.
    pub fn plan(&self, shares: &[Arc<Share>]) -> Result<Plan, TierMoveError> {
        let jobs = self.scan_jobs(shares)?;

        let scans: QueueManager<ScanJob> = QueueManager::new("enumerate", |j: &ScanJob| j.source.name().to_string());
        scans.enqueue_all(jobs);
        let found = Mutex::new(Vec::new());
        let walker = Walker::new(self.inuse.clone(), self.cancel.clone());
        for bucket in scans.buckets() {
            process_concurrent(&bucket, self.workers, &self.cancel, |job| {
                match walker.get_moveables(&job.share, &job.source, job.dest.clone()) {
                    Ok(items) => {
                        debug!(share = %job.share.name(), source = %job.source, count = items.len(), "enumerated");
                        found.lock().unwrap_or_else(|p| p.into_inner()).extend(items);
                        Decision::Success
                    }
                    Err(e) => {
                        warn!(
                            share = %job.share.name(),
                            source = %job.source,
                            code = e.code(),
                            kind = e.kind(),
                            error = %e,
                            "skipping: walk failed"
                        );
                        Decision::Skipped
                    }
                }
            })?;
        }
        let found = found.into_inner().unwrap_or_else(|p| p.into_inner());
        let discovered = found.len();

        let evals: QueueManager<Moveable> = QueueManager::new("evaluate", |m: &Moveable| m.share.name().to_string());
        evals.enqueue_all(found);
        let allocator = Allocator::new(self.inventory.clone(), self.usage.clone());
        let pathing = Pathing::new(self.inventory.clone());
        let pool_ledger = Mutex::new(Ledger::new());
        for bucket in evals.buckets() {
            process_concurrent(&bucket, self.workers, &self.cancel, |m| {
                let placed = match m.dest.clone() {
                    None => allocator.allocate_array_destination(m),
                    Some(dest) => self.reserve_pool_space(&pool_ledger, m, &dest),
                };
                if placed && pathing.establish_path(m) && validate_moveable(m) {
                    Decision::Success
                } else {
                    Decision::Skipped
                }
            })?;
        }

        Ok(Plan {
            enumerate: scans.progress(),
            evaluate: evals.progress(),
            items: evals.take_success(),
            discovered,
        })
    }

    /// Space check for a fixed pool destination, counting what this run already sent there.
    fn reserve_pool_space(&self, ledger: &Mutex<Ledger>, m: &Moveable, dest: &Storage) -> bool {
        let size = m.size();
        let mut ledger = ledger.lock().unwrap_or_else(|p| p.into_inner());
        let committed = ledger.committed(dest.name());
        let floor = m.share.space_floor.saturating_add(committed);
        if !self.usage.has_enough_free_space(dest, floor, size) {
            warn!(
                share = %m.share.name(),
                path = %m.source_path.display(),
                disk = %dest,
                size,
                committed,
                "skipping: not enough free space on pool"
            );
            return false;
        }
        ledger.commit(dest.name(), size);
        true
    }

    /// Stage 5: drain one queue per destination, all destinations in parallel.
    pub fn execute(&self, items: Vec<Moveable>) -> Result<(Progress, Vec<BucketReport>), TierMoveError> {
        let io: QueueManager<Moveable> = QueueManager::new("io", |m: &Moveable| m.dest_name().to_string());
        io.enqueue_all(items);
        let mover = Mover::new(self.inuse.clone(), self.cancel.clone()).with_dry_run(self.dry_run);

        let results: Vec<Result<BucketReport, TierMoveError>> = thread::scope(|s| {
            let handles: Vec<_> = io
                .buckets()
                .into_iter()
                .map(|bucket| {
                    let mover = &mover;
                    s.spawn(move || mover.process_queue(&bucket))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|p| std::panic::resume_unwind(p)))
                .collect()
        });

        let mut reports = Vec::with_capacity(results.len());
        let mut canceled = false;
        for r in results {
            match r {
                Ok(report) => reports.push(report),
                Err(TierMoveError::Canceled) => canceled = true,
                Err(e) => return Err(e),
            }
        }
        if canceled {
            return Err(TierMoveError::Canceled);
        }
        Ok((io.progress(), reports))
    }
}
