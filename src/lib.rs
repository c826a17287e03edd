pub mod candidate;
pub mod cli;
pub mod config;
pub mod duplicates;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod logging;
pub mod reader;
pub mod scanner;
pub mod signal;

pub use candidate::{
    CandidateFate, CandidateSet, CandidateTrace, OpenMode, SignatureGroup, SizeBucket,
};
pub use cli::Cli;
pub use config::{FileConfig, ScanConfig, ScanConfigBuilder};
pub use duplicates::{
    ScanReport, ScanStats, find_duplicates, group_by_size, print_summary, scan_and_find,
    write_json, write_skipped, write_text,
};
pub use engine::{
    BucketOutcome, DescriptorBudget, DescriptorPermit, DuplicateGroup, RefinementEngine,
};
pub use error::{CandidateError, ConfigError, ScanError, SkippedFile};
pub use hasher::{BlockDigest, DIGEST_LEN, HashAlgorithm, hash_block};
pub use reader::FileReader;
pub use scanner::{FileEntry, ScanResult, scan_paths};
