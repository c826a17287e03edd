use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::{debug, trace};
use serde::Serialize;

use crate::candidate::{CandidateSet, CandidateTrace, OpenMode, SizeBucket};
use crate::config::ScanConfig;
use crate::error::{ScanError, SkippedFile};
use crate::hasher::HashAlgorithm;

/// Files proven identical over their whole (zero-padded) length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub size: u64,
    pub paths: Vec<PathBuf>,
}

/// Everything learned while resolving one bucket.
#[derive(Debug, Clone, Default)]
pub struct BucketOutcome {
    pub groups: Vec<DuplicateGroup>,
    pub skipped: Vec<SkippedFile>,
    pub traces: Vec<CandidateTrace>,
    pub rounds: u64,
}

impl BucketOutcome {
    pub fn blocks_read(&self) -> u64 {
        self.traces.iter().map(|t| t.blocks_read).sum()
    }

    pub fn bytes_read(&self) -> u64 {
        self.traces.iter().map(|t| t.bytes_read).sum()
    }
}

/// Number of files that buckets may keep open at the same time, shared by
/// every bucket resolved through one engine.
#[derive(Debug)]
pub struct DescriptorBudget {
    available: AtomicUsize,
}

impl DescriptorBudget {
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            available: AtomicUsize::new(limit),
        })
    }

    pub fn available(&self) -> usize {
        self.available.load(Ordering::SeqCst)
    }

    /// Takes `count` descriptors if that many are free. Never blocks.
    pub fn try_acquire(self: &Arc<Self>, count: usize) -> Option<DescriptorPermit> {
        self.available
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |free| free.checked_sub(count))
            .ok()
            .map(|_| DescriptorPermit {
                budget: Arc::clone(self),
                count,
            })
    }
}

/// Descriptors taken from a [`DescriptorBudget`], returned on drop.
#[derive(Debug)]
pub struct DescriptorPermit {
    budget: Arc<DescriptorBudget>,
    count: usize,
}

impl Drop for DescriptorPermit {
    fn drop(&mut self) {
        self.budget.available.fetch_add(self.count, Ordering::SeqCst);
    }
}

pub struct RefinementEngine {
    block_size: usize,
    algorithm: HashAlgorithm,
    budget: Arc<DescriptorBudget>,
    shutdown: Option<Arc<AtomicBool>>,
}

impl RefinementEngine {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            block_size: config.block_size(),
            algorithm: config.hash_algorithm(),
            budget: DescriptorBudget::new(config.max_open_files()),
            shutdown: None,
        }
    }

    #[cfg(test)]
    fn budget(&self) -> &Arc<DescriptorBudget> {
        &self.budget
    }

    /// Stops resolution between rounds once `flag` is raised.
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Resolves one bucket into its duplicate groups.
    ///
    /// Each round, every member of a signature group with two or more files
    /// reads one more block; once all of those reads are in, the bucket is
    /// repartitioned and any file left alone is evicted and closed.
    ///
    /// A bucket that fits in the descriptor budget keeps its files open for
    /// the whole comparison; a larger one reopens each file for every read.
    /// Unreadable files are dropped and reported in
    /// [`BucketOutcome::skipped`]; they never stop the rest of the bucket.
    /// On interruption every open file is closed before returning.
    pub fn resolve(&self, bucket: &SizeBucket) -> Result<BucketOutcome, ScanError> {
        let permit = self.budget.try_acquire(bucket.paths.len());
        let mode = if permit.is_some() {
            OpenMode::Held
        } else {
            debug!(
                "Bucket of {} byte files ({} files) over the descriptor budget ({} free), reopening per read",
                bucket.size,
                bucket.paths.len(),
                self.budget.available()
            );
            OpenMode::Parked
        };
        let (mut set, mut skipped) = CandidateSet::open(bucket, self.block_size, mode);
        if set.mode() != mode {
            debug!(
                "Bucket of {} byte files parked after running out of descriptors",
                bucket.size
            );
        }
        trace!(
            "Resolving bucket of {} byte files: {} candidate(s), {} open",
            bucket.size,
            set.len(),
            set.open_count()
        );

        let mut rounds = 0;
        let mut groups = set.refine();
        loop {
            if self.is_shutdown_requested() {
                debug!("Shutdown requested, abandoning bucket of {} byte files", bucket.size);
                return Err(ScanError::Interrupted);
            }

            let scheduled = set.schedule(&groups);
            if scheduled == 0 {
                break;
            }
            rounds += 1;
            skipped.extend(set.advance_scheduled(self.algorithm));

            groups = set.refine();
            trace!(
                "Round {}: {} read(s), {} group(s), {} alive",
                rounds,
                scheduled,
                groups.len(),
                set.alive_count()
            );
        }

        let (groups, traces) = set.finish(&groups);
        if !groups.is_empty() {
            debug!(
                "Bucket of {} byte files: {} duplicate group(s) after {} round(s)",
                bucket.size,
                groups.len(),
                rounds
            );
        }

        drop(permit);

        Ok(BucketOutcome {
            groups,
            skipped,
            traces,
            rounds,
        })
    }
}
