use std::collections::HashSet;
use std::path::{Path, PathBuf};

use indicatif::{HumanBytes, HumanCount, ProgressBar};
use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::ScanConfig;

/// A regular file found during the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub files: Vec<FileEntry>,
    pub dirs: u64,
    pub filtered: u64,
    pub errors: u64,
}

fn absolute(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    })
}

fn is_excluded(path: &Path, exclude: &[PathBuf]) -> bool {
    exclude.iter().any(|excluded| path.starts_with(excluded))
}

/// Walks every configured root and lists the files worth comparing.
///
/// Files are listed in walk order (sorted by name within each directory) and
/// each file is listed once even when roots overlap. Walk errors are logged
/// and counted, never fatal.
pub fn scan_paths(config: &ScanConfig, show_progress: bool) -> ScanResult {
    let mut result = ScanResult::default();
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut total_size = 0u64;
    let exclude: Vec<PathBuf> = config.exclude().iter().map(|p| absolute(p)).collect();

    let pb = if show_progress {
        ProgressBar::new_spinner()
    } else {
        ProgressBar::hidden()
    };
    pb.set_message("Scanning files and directories...");
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    if !config.masks().is_empty() {
        info!("Only file names matching: {}", config.masks().join(", "));
    }

    for root in config.paths() {
        let root = absolute(root);
        if is_excluded(&root, &exclude) {
            info!("Skipping excluded root {}", root.display());
            continue;
        }
        info!("Scanning {}", root.display());

        let walker = WalkDir::new(&root)
            .max_depth(config.depth().saturating_add(1))
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                !(entry.file_type().is_dir() && is_excluded(entry.path(), &exclude))
            });

        for entry in walker {
            pb.tick();
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Failed to read directory entry: {}", e);
                    result.errors += 1;
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                result.dirs += 1;
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    warn!("Failed to read metadata for '{}': {}", entry.path().display(), e);
                    result.errors += 1;
                    continue;
                }
            };

            let wanted = size >= config.min_size()
                && config.matches_name(&entry.file_name().to_string_lossy());
            if !wanted {
                result.filtered += 1;
                continue;
            }

            let path = entry.into_path();
            if !seen.insert(path.clone()) {
                debug!("Already listed: '{}'", path.display());
                continue;
            }
            total_size += size;
            result.files.push(FileEntry { path, size });
        }
    }
    pb.finish_and_clear();

    info!(
        "Found {} candidate files in {} directories ({}), {} filtered out",
        HumanCount(result.files.len() as u64),
        HumanCount(result.dirs),
        HumanBytes(total_size),
        HumanCount(result.filtered)
    );
    result
}
