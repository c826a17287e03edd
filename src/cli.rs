use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::config::{FileConfig, ScanConfig, ScanConfigBuilder};
use crate::error::ConfigError;
use crate::hasher::HashAlgorithm;

#[derive(Parser, Debug)]
#[command(name = "check-block-dups", version)]
#[command(about = "Find files with identical content, reading as few blocks as possible")]
pub struct Cli {
    /// Directories to scan for duplicates [default: .]
    pub paths: Vec<PathBuf>,

    /// Directory to leave out, with everything below it (repeatable)
    #[arg(short, long, value_name = "DIR")]
    pub exclude: Vec<PathBuf>,

    /// Directory levels to descend below each path (0 = only the path itself) [default: 0]
    #[arg(short, long)]
    pub depth: Option<usize>,

    /// Skip files smaller than this many bytes [default: 1]
    #[arg(short, long, value_name = "BYTES")]
    pub min_size: Option<u64>,

    /// Case-insensitive regex a file name must match (repeatable, any may match)
    #[arg(long, value_name = "REGEX")]
    pub mask: Vec<String>,

    /// Size of the blocks files are compared by, in bytes [default: 4096]
    #[arg(short, long, value_name = "BYTES")]
    pub block_size: Option<usize>,

    /// Hash applied to each block [default: md5]
    #[arg(short = 'H', long, value_enum)]
    pub hash: Option<HashAlgorithm>,

    /// Number of size groups compared in parallel (default: number of CPU cores)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Files kept open at once across all size groups; larger groups reopen
    /// files per block instead [default: 256]
    #[arg(long, value_name = "N")]
    pub max_open_files: Option<usize>,

    /// Read settings from a TOML file; command-line flags take precedence
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the result as JSON instead of plain paths
    #[arg(long)]
    pub json: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors and hide progress bars
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

impl Cli {
    /// Layers the command-line flags over `builder`.
    pub fn apply(&self, mut builder: ScanConfigBuilder) -> ScanConfigBuilder {
        if !self.paths.is_empty() {
            builder = builder.with_paths(self.paths.clone());
        } else if !builder.has_paths() {
            builder = builder.with_paths(vec![PathBuf::from(".")]);
        }
        if !self.exclude.is_empty() {
            builder = builder.with_exclude(self.exclude.clone());
        }
        if let Some(depth) = self.depth {
            builder = builder.with_depth(depth);
        }
        if let Some(min_size) = self.min_size {
            builder = builder.with_min_size(min_size);
        }
        if !self.mask.is_empty() {
            builder = builder.with_masks(self.mask.clone());
        }
        if let Some(block_size) = self.block_size {
            builder = builder.with_block_size(block_size);
        }
        if let Some(hash) = self.hash {
            builder = builder.with_hash_algorithm(hash);
        }
        if let Some(threads) = self.threads {
            builder = builder.with_threads(threads);
        }
        if let Some(max_open_files) = self.max_open_files {
            builder = builder.with_max_open_files(max_open_files);
        }
        builder
    }

    /// Defaults, then the config file if one was given, then the flags.
    pub fn scan_config(&self) -> Result<ScanConfig, ConfigError> {
        let mut builder = ScanConfigBuilder::new();
        if let Some(path) = &self.config {
            builder = FileConfig::load(path)?.apply(builder)?;
        }
        self.apply(builder).build()
    }
}
