use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use regex::{RegexSet, RegexSetBuilder};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::hasher::HashAlgorithm;

pub const DEFAULT_BLOCK_SIZE: usize = 4096;
pub const DEFAULT_MIN_SIZE: u64 = 1;
pub const DEFAULT_MAX_OPEN_FILES: usize = 256;

/// Mask accepted as "every file", kept for compatibility with glob habits.
const MATCH_ALL_MASK: &str = "*";

#[derive(Debug, Clone)]
pub struct ScanConfig {
    paths: Vec<PathBuf>,
    exclude: Vec<PathBuf>,
    depth: usize,
    min_size: u64,
    masks: Vec<String>,
    mask_set: Option<RegexSet>,
    block_size: usize,
    hash_algorithm: HashAlgorithm,
    threads: usize,
    max_open_files: usize,
}

impl ScanConfig {
    /// Directories to scan.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Directories skipped together with everything below them.
    pub fn exclude(&self) -> &[PathBuf] {
        &self.exclude
    }

    /// How many directory levels below each root are scanned (0 = the root only).
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn min_size(&self) -> u64 {
        self.min_size
    }

    pub fn masks(&self) -> &[String] {
        &self.masks
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_algorithm
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// How many files all buckets together may hold open between reads.
    pub fn max_open_files(&self) -> usize {
        self.max_open_files
    }

    /// Whether `file_name` passes the name masks (case-insensitive).
    pub fn matches_name(&self, file_name: &str) -> bool {
        self.mask_set
            .as_ref()
            .is_none_or(|set| set.is_match(file_name))
    }
}

#[derive(Debug, Clone)]
pub struct ScanConfigBuilder {
    paths: Vec<PathBuf>,
    exclude: Vec<PathBuf>,
    depth: usize,
    min_size: u64,
    masks: Vec<String>,
    block_size: usize,
    hash_algorithm: HashAlgorithm,
    threads: Option<usize>,
    max_open_files: usize,
}

impl Default for ScanConfigBuilder {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            exclude: Vec::new(),
            depth: 0,
            min_size: DEFAULT_MIN_SIZE,
            masks: Vec::new(),
            block_size: DEFAULT_BLOCK_SIZE,
            hash_algorithm: HashAlgorithm::default(),
            threads: None,
            max_open_files: DEFAULT_MAX_OPEN_FILES,
        }
    }
}

impl ScanConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_exclude(mut self, exclude: Vec<PathBuf>) -> Self {
        self.exclude = exclude;
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_min_size(mut self, min_size: u64) -> Self {
        self.min_size = min_size;
        self
    }

    pub fn with_masks(mut self, masks: Vec<String>) -> Self {
        self.masks = masks;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_hash_algorithm(mut self, hash_algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = hash_algorithm;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn with_max_open_files(mut self, max_open_files: usize) -> Self {
        self.max_open_files = max_open_files;
        self
    }

    pub fn has_paths(&self) -> bool {
        !self.paths.is_empty()
    }

    pub fn build(self) -> Result<ScanConfig, ConfigError> {
        if self.block_size == 0 {
            return Err(ConfigError::InvalidBlockSize(self.block_size));
        }
        if self.paths.is_empty() {
            return Err(ConfigError::NoScanPaths);
        }
        let threads = match self.threads {
            Some(0) => return Err(ConfigError::InvalidThreadCount),
            Some(n) => n,
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        };
        if self.max_open_files == 0 {
            return Err(ConfigError::InvalidOpenFileLimit);
        }

        let match_all = self.masks.iter().any(|mask| mask == MATCH_ALL_MASK);
        let mask_set = if match_all || self.masks.is_empty() {
            None
        } else {
            Some(RegexSetBuilder::new(&self.masks).case_insensitive(true).build()?)
        };

        Ok(ScanConfig {
            paths: self.paths,
            exclude: self.exclude,
            depth: self.depth,
            min_size: self.min_size,
            masks: self.masks,
            mask_set,
            block_size: self.block_size,
            hash_algorithm: self.hash_algorithm,
            threads,
            max_open_files: self.max_open_files,
        })
    }
}

/// Settings read from a TOML file. Every key is optional.
///
/// ```toml
/// paths = ["/home/me/photos"]
/// exclude = ["/home/me/photos/cache"]
/// depth = 3
/// min_size = 1024
/// masks = ['.*\.jpe?g$']
/// block_size = 65536
/// hash = "sha1"
/// threads = 4
/// max_open_files = 512
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub paths: Option<Vec<PathBuf>>,
    pub exclude: Option<Vec<PathBuf>>,
    pub depth: Option<usize>,
    pub min_size: Option<u64>,
    pub masks: Option<Vec<String>>,
    pub block_size: Option<usize>,
    pub hash: Option<String>,
    pub threads: Option<usize>,
    pub max_open_files: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let config: FileConfig = toml::from_str(&text).map_err(|source| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded config file '{}': {:?}", path.display(), config);
        Ok(config)
    }

    /// Layers the values present in the file over `builder`.
    pub fn apply(self, mut builder: ScanConfigBuilder) -> Result<ScanConfigBuilder, ConfigError> {
        if let Some(paths) = self.paths {
            builder = builder.with_paths(paths);
        }
        if let Some(exclude) = self.exclude {
            builder = builder.with_exclude(exclude);
        }
        if let Some(depth) = self.depth {
            builder = builder.with_depth(depth);
        }
        if let Some(min_size) = self.min_size {
            builder = builder.with_min_size(min_size);
        }
        if let Some(masks) = self.masks {
            builder = builder.with_masks(masks);
        }
        if let Some(block_size) = self.block_size {
            builder = builder.with_block_size(block_size);
        }
        if let Some(hash) = self.hash {
            builder = builder.with_hash_algorithm(hash.parse()?);
        }
        if let Some(threads) = self.threads {
            builder = builder.with_threads(threads);
        }
        if let Some(max_open_files) = self.max_open_files {
            builder = builder.with_max_open_files(max_open_files);
        }
        Ok(builder)
    }
}
