use std::collections::HashMap;
use std::path::PathBuf;

use log::{debug, warn};
use rayon::prelude::*;

use crate::engine::DuplicateGroup;
use crate::error::{CandidateError, SkippedFile};
use crate::hasher::{BlockDigest, HashAlgorithm, hash_block};
use crate::reader::FileReader;

/// Files sharing one exact size, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeBucket {
    pub size: u64,
    pub paths: Vec<PathBuf>,
}

/// What finally happened to a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateFate {
    /// Matched at least one other file over its whole length.
    Duplicate,
    /// Evicted once no other file shared its signature.
    Unique,
    /// Dropped after an open or read error.
    Failed,
}

/// Per-file account of the I/O spent on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateTrace {
    pub path: PathBuf,
    pub blocks_read: u64,
    pub bytes_read: u64,
    pub fate: CandidateFate,
}

enum CandidateState {
    Alive(FileReader),
    Evicted,
    Failed,
}

struct Candidate {
    path: PathBuf,
    signature: Vec<BlockDigest>,
    state: CandidateState,
    blocks_read: u64,
    bytes_read: u64,
    scheduled: bool,
}

impl Candidate {
    fn is_alive(&self) -> bool {
        matches!(self.state, CandidateState::Alive(_))
    }

    fn has_unread_data(&self) -> bool {
        match &self.state {
            CandidateState::Alive(reader) => !reader.is_exhausted(),
            _ => false,
        }
    }

    /// Moves to a terminal state, closing the reader if one is still held.
    fn release(&mut self, state: CandidateState) {
        if let CandidateState::Alive(reader) = std::mem::replace(&mut self.state, state) {
            reader.close();
        }
    }

    fn holds_descriptor(&self) -> bool {
        matches!(&self.state, CandidateState::Alive(reader) if reader.is_open())
    }

    fn suspend(&mut self) {
        if let CandidateState::Alive(reader) = &mut self.state {
            reader.suspend();
        }
    }

    fn advance(&mut self, algorithm: HashAlgorithm, park: bool) -> Result<(), CandidateError> {
        if !std::mem::take(&mut self.scheduled) {
            return Ok(());
        }
        let CandidateState::Alive(reader) = &mut self.state else {
            return Ok(());
        };

        let read = reader
            .next_block()
            .map(|block| block.map(|block| hash_block(block, algorithm)));
        self.blocks_read = reader.blocks_read();
        self.bytes_read = reader.bytes_read();
        if park {
            reader.suspend();
        }

        match read {
            Ok(Some(digest)) => {
                self.signature.push(digest);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => {
                self.release(CandidateState::Failed);
                Err(err)
            }
        }
    }

    fn fate(&self) -> CandidateFate {
        match self.state {
            CandidateState::Alive(_) => CandidateFate::Duplicate,
            CandidateState::Evicted => CandidateFate::Unique,
            CandidateState::Failed => CandidateFate::Failed,
        }
    }
}

/// Alive candidates sharing an identical signature, as indices in bucket order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureGroup {
    pub members: Vec<usize>,
}

impl SignatureGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// How a [`CandidateSet`] holds its descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Every live candidate keeps its file open until it is evicted.
    Held,
    /// Files are opened only for the duration of one read, so at most one
    /// descriptor per worker thread is in use.
    Parked,
}

pub struct CandidateSet {
    size: u64,
    mode: OpenMode,
    candidates: Vec<Candidate>,
    failures: Vec<PathBuf>,
}

impl CandidateSet {
    /// Opens every file of the bucket. Files that cannot be opened are left
    /// out and returned as skipped.
    ///
    /// Running out of descriptors is not a per-file failure: the set gives
    /// back every descriptor it holds, switches to [`OpenMode::Parked`] and
    /// retries the file.
    pub fn open(
        bucket: &SizeBucket,
        block_size: usize,
        mode: OpenMode,
    ) -> (Self, Vec<SkippedFile>) {
        let mut set = Self {
            size: bucket.size,
            mode,
            candidates: Vec::with_capacity(bucket.paths.len()),
            failures: Vec::new(),
        };
        let mut skipped = Vec::new();

        for path in &bucket.paths {
            let opened = match FileReader::open(path, bucket.size, block_size) {
                Err(err) if err.is_descriptor_exhaustion() && set.mode == OpenMode::Held => {
                    warn!(
                        "Out of file descriptors in bucket of {} byte files, reading with reopen",
                        bucket.size
                    );
                    set.park();
                    FileReader::open(path, bucket.size, block_size)
                }
                other => other,
            };

            match opened {
                Ok(mut reader) => {
                    if set.mode == OpenMode::Parked {
                        reader.suspend();
                    }
                    set.candidates.push(Candidate {
                        path: path.clone(),
                        signature: Vec::new(),
                        state: CandidateState::Alive(reader),
                        blocks_read: 0,
                        bytes_read: 0,
                        scheduled: false,
                    });
                }
                Err(err) => {
                    warn!("Skipping {err}");
                    skipped.push(SkippedFile::from(&err));
                    set.failures.push(path.clone());
                }
            }
        }

        (set, skipped)
    }

    /// Releases the descriptors of every live candidate and reads by reopen
    /// from now on.
    pub fn park(&mut self) {
        self.mode = OpenMode::Parked;
        for candidate in &mut self.candidates {
            candidate.suspend();
        }
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Number of descriptors currently held.
    pub fn open_count(&self) -> usize {
        self.candidates.iter().filter(|c| c.holds_descriptor()).count()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn alive_count(&self) -> usize {
        self.candidates.iter().filter(|c| c.is_alive()).count()
    }

    #[cfg(test)]
    fn signature(&self, index: usize) -> &[BlockDigest] {
        &self.candidates[index].signature
    }

    /// Partitions the alive candidates by full signature equality.
    ///
    /// Groups are ordered by the first appearance of their first member and
    /// members keep bucket order.
    pub fn signature_groups(&self) -> Vec<SignatureGroup> {
        let mut index: HashMap<&[BlockDigest], usize> = HashMap::new();
        let mut groups: Vec<SignatureGroup> = Vec::new();

        for (i, candidate) in self.candidates.iter().enumerate() {
            if !candidate.is_alive() {
                continue;
            }
            let slot = *index
                .entry(candidate.signature.as_slice())
                .or_insert_with(|| {
                    groups.push(SignatureGroup { members: Vec::new() });
                    groups.len() - 1
                });
            groups[slot].members.push(i);
        }
        groups
    }

    /// Repartitions, evicts every candidate that is alone in its group and
    /// returns the groups that still hold two or more members.
    pub fn refine(&mut self) -> Vec<SignatureGroup> {
        let mut groups = self.signature_groups();
        for group in groups.iter().filter(|g| g.len() == 1) {
            let candidate = &mut self.candidates[group.members[0]];
            debug!(
                "Evicting '{}' as unique after {} block(s)",
                candidate.path.display(),
                candidate.blocks_read
            );
            candidate.release(CandidateState::Evicted);
        }
        groups.retain(|g| g.len() >= 2);
        groups
    }

    /// Marks for reading every member of `groups` that still has data.
    /// Returns the number of candidates scheduled.
    pub fn schedule(&mut self, groups: &[SignatureGroup]) -> usize {
        let mut scheduled = 0;
        for group in groups.iter().filter(|g| g.len() >= 2) {
            for &i in &group.members {
                let candidate = &mut self.candidates[i];
                if candidate.has_unread_data() {
                    candidate.scheduled = true;
                    scheduled += 1;
                }
            }
        }
        scheduled
    }

    /// Reads and hashes one block for every scheduled candidate.
    ///
    /// Reads run in parallel; the call returns only once every scheduled
    /// read has finished. Candidates whose read failed are released and
    /// reported as skipped.
    pub fn advance_scheduled(&mut self, algorithm: HashAlgorithm) -> Vec<SkippedFile> {
        let park = self.mode == OpenMode::Parked;
        let errors: Vec<CandidateError> = self
            .candidates
            .par_iter_mut()
            .filter_map(|candidate| candidate.advance(algorithm, park).err())
            .collect();

        errors
            .iter()
            .map(|err| {
                warn!("Dropping {err}");
                self.failures.push(err.path().clone());
                SkippedFile::from(err)
            })
            .collect()
    }

    /// Closes every remaining reader and turns the surviving groups into
    /// duplicate groups, along with a trace of every file's reads.
    pub fn finish(
        mut self,
        groups: &[SignatureGroup],
    ) -> (Vec<DuplicateGroup>, Vec<CandidateTrace>) {
        let duplicates = groups
            .iter()
            .filter(|g| g.len() >= 2)
            .map(|g| DuplicateGroup {
                size: self.size,
                paths: g
                    .members
                    .iter()
                    .map(|&i| self.candidates[i].path.clone())
                    .collect(),
            })
            .collect();

        let mut traces: Vec<CandidateTrace> = self
            .failures
            .iter()
            .filter(|path| !self.candidates.iter().any(|c| &c.path == *path))
            .map(|path| CandidateTrace {
                path: path.clone(),
                blocks_read: 0,
                bytes_read: 0,
                fate: CandidateFate::Failed,
            })
            .collect();

        for candidate in &mut self.candidates {
            traces.push(CandidateTrace {
                path: candidate.path.clone(),
                blocks_read: candidate.blocks_read,
                bytes_read: candidate.bytes_read,
                fate: candidate.fate(),
            });
            if let CandidateState::Alive(reader) =
                std::mem::replace(&mut candidate.state, CandidateState::Evicted)
            {
                reader.close();
            }
        }

        (duplicates, traces)
    }
}
