use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use indicatif::{HumanBytes, HumanCount, ProgressBar, ProgressStyle};
use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::candidate::SizeBucket;
use crate::config::ScanConfig;
use crate::engine::{BucketOutcome, DuplicateGroup, RefinementEngine};
use crate::error::{ScanError, SkippedFile};
use crate::scanner::{FileEntry, scan_paths};

/// Groups files by exact size, keeping only sizes shared by two or more
/// files. Buckets are ordered by their first file's position in `files`.
pub fn group_by_size(files: Vec<FileEntry>) -> Vec<SizeBucket> {
    let mut slots: HashMap<u64, usize> = HashMap::new();
    let mut buckets: Vec<SizeBucket> = Vec::new();

    for file in files {
        let slot = *slots.entry(file.size).or_insert_with(|| {
            buckets.push(SizeBucket {
                size: file.size,
                paths: Vec::new(),
            });
            buckets.len() - 1
        });
        buckets[slot].paths.push(file.path);
    }

    buckets.retain(|bucket| bucket.paths.len() > 1);
    buckets
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub files: u64,
    pub buckets: u64,
    pub candidates: u64,
    pub blocks_read: u64,
    pub bytes_read: u64,
    pub duplicate_groups: u64,
    pub duplicate_files: u64,
    pub reclaimable_bytes: u64,
    pub skipped_files: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub groups: Vec<DuplicateGroup>,
    pub skipped: Vec<SkippedFile>,
    pub stats: ScanStats,
}

impl ScanReport {
    fn absorb(&mut self, bucket: &SizeBucket, outcome: BucketOutcome) {
        self.stats.buckets += 1;
        self.stats.candidates += bucket.paths.len() as u64;
        self.stats.blocks_read += outcome.blocks_read();
        self.stats.bytes_read += outcome.bytes_read();
        for group in &outcome.groups {
            let extra = group.paths.len() as u64 - 1;
            self.stats.duplicate_groups += 1;
            self.stats.duplicate_files += extra;
            self.stats.reclaimable_bytes += group.size * extra;
        }
        self.stats.skipped_files += outcome.skipped.len() as u64;
        self.groups.extend(outcome.groups);
        self.skipped.extend(outcome.skipped);
    }
}

/// Resolves every bucket and collects the duplicate groups in bucket order.
///
/// Buckets are independent and run in parallel on a pool of
/// `config.threads()` workers. Each finished bucket contributes its groups as
/// a whole. Raising `shutdown` stops the scan with [`ScanError::Interrupted`].
pub fn find_duplicates(
    buckets: &[SizeBucket],
    config: &ScanConfig,
    shutdown: Option<Arc<AtomicBool>>,
    show_progress: bool,
) -> Result<ScanReport, ScanError> {
    let mut engine = RefinementEngine::new(config);
    if let Some(flag) = &shutdown {
        engine = engine.with_shutdown_flag(flag.clone());
    }

    let pb = if show_progress {
        let pb = ProgressBar::new(buckets.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} size groups {msg}",
            )
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    } else {
        ProgressBar::hidden()
    };

    info!(
        "Comparing {} size groups with {} byte blocks ({})",
        HumanCount(buckets.len() as u64),
        config.block_size(),
        config.hash_algorithm()
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads())
        .build()?;
    let outcomes: Result<Vec<BucketOutcome>, ScanError> = pool.install(|| {
        buckets
            .par_iter()
            .map(|bucket| {
                if shutdown.as_ref().is_some_and(|f| f.load(Ordering::SeqCst)) {
                    return Err(ScanError::Interrupted);
                }
                let outcome = engine.resolve(bucket);
                pb.inc(1);
                outcome
            })
            .collect()
    });
    pb.finish_and_clear();

    let mut report = ScanReport::default();
    for (bucket, outcome) in buckets.iter().zip(outcomes?) {
        report.absorb(bucket, outcome);
    }

    info!(
        "Read {} blocks ({}) from {} candidates",
        HumanCount(report.stats.blocks_read),
        HumanBytes(report.stats.bytes_read),
        HumanCount(report.stats.candidates)
    );
    Ok(report)
}

/// Lists the files under the configured roots, buckets them by size and
/// resolves the buckets. The report's `files` count covers every listed file.
pub fn scan_and_find(
    config: &ScanConfig,
    shutdown: Option<Arc<AtomicBool>>,
    show_progress: bool,
) -> Result<ScanReport, ScanError> {
    let scan = scan_paths(config, show_progress);
    if scan.errors > 0 {
        warn!("{} directory entries could not be read", scan.errors);
    }
    let files = scan.files.len() as u64;

    let buckets = group_by_size(scan.files);
    let mut report = find_duplicates(&buckets, config, shutdown, show_progress)?;
    report.stats.files = files;
    Ok(report)
}

/// Writes one path per line, with a blank line between groups.
pub fn write_text<W: Write>(report: &ScanReport, out: &mut W) -> io::Result<()> {
    for (i, group) in report.groups.iter().enumerate() {
        if i > 0 {
            writeln!(out)?;
        }
        for path in &group.paths {
            writeln!(out, "{}", path.display())?;
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct JsonReport<'a> {
    generated_at: String,
    block_size: usize,
    hash: &'a str,
    #[serde(flatten)]
    report: &'a ScanReport,
}

pub fn write_json<W: Write>(
    report: &ScanReport,
    config: &ScanConfig,
    out: &mut W,
) -> anyhow::Result<()> {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let json = JsonReport {
        generated_at: now.format(&Rfc3339)?,
        block_size: config.block_size(),
        hash: config.hash_algorithm().name(),
        report,
    };
    serde_json::to_writer_pretty(&mut *out, &json)?;
    writeln!(out)?;
    Ok(())
}

/// Prints totals and skipped files to stderr, away from the group listing.
pub fn print_summary(report: &ScanReport) {
    if report.groups.is_empty() {
        eprintln!("{}", "No duplicate files found!".green());
    } else {
        eprintln!(
            "{} {} duplicate files in {} groups, {} reclaimable",
            "Found".yellow().bold(),
            HumanCount(report.stats.duplicate_files),
            HumanCount(report.stats.duplicate_groups),
            HumanBytes(report.stats.reclaimable_bytes)
        );
    }

    if !report.skipped.is_empty() {
        warn!("{} file(s) could not be compared", report.skipped.len());
    }
    let _ = write_skipped(report, &mut io::stderr());
}

/// Lists the files left out of the comparison. Writes nothing when every
/// file was compared.
pub fn write_skipped<W: Write>(report: &ScanReport, out: &mut W) -> io::Result<()> {
    if report.skipped.is_empty() {
        return Ok(());
    }
    writeln!(out, "{}", "Skipped files:".red().bold())?;
    for skipped in &report.skipped {
        writeln!(out, "  {} ({})", skipped.path.display(), skipped.reason)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfigBuilder;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn entry(path: &str, size: u64) -> FileEntry {
        FileEntry {
            path: PathBuf::from(path),
            size,
        }
    }

    #[test]
    fn buckets_keep_first_seen_order_and_drop_singletons() {
        let buckets = group_by_size(vec![
            entry("/a", 10),
            entry("/b", 20),
            entry("/c", 30),
            entry("/d", 20),
            entry("/e", 10),
            entry("/f", 10),
        ]);

        assert_eq!(
            buckets,
            vec![
                SizeBucket {
                    size: 10,
                    paths: vec!["/a".into(), "/e".into(), "/f".into()],
                },
                SizeBucket {
                    size: 20,
                    paths: vec!["/b".into(), "/d".into()],
                },
            ]
        );
    }

    #[test]
    fn text_output_separates_groups_with_blank_lines() {
        let report = ScanReport {
            groups: vec![
                DuplicateGroup {
                    size: 1,
                    paths: vec!["/x/1".into(), "/y/1".into()],
                },
                DuplicateGroup {
                    size: 2,
                    paths: vec!["/x/2".into(), "/y/2".into(), "/z/2".into()],
                },
            ],
            ..Default::default()
        };

        let mut out = Vec::new();
        write_text(&report, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "/x/1\n/y/1\n\n/x/2\n/y/2\n/z/2\n"
        );
    }

    #[test]
    fn empty_report_prints_nothing() {
        let mut out = Vec::new();
        write_text(&ScanReport::default(), &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn skipped_files_are_listed_with_reasons() {
        colored::control::set_override(false);
        let report = ScanReport {
            skipped: vec![SkippedFile {
                path: "/gone".into(),
                reason: "open failed: not found".into(),
            }],
            ..Default::default()
        };

        let mut out = Vec::new();
        write_skipped(&report, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Skipped files:\n  /gone (open failed: not found)\n"
        );

        let mut out = Vec::new();
        write_skipped(&ScanReport::default(), &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn resolves_buckets_in_order_with_stats() {
        let dir = tempdir().unwrap();
        let write = |name: &str, content: &[u8]| {
            let path = dir.path().join(name);
            fs::write(&path, content).unwrap();
            FileEntry {
                path,
                size: content.len() as u64,
            }
        };
        let files = vec![
            write("long1", b"0123456789"),
            write("short1", b"abc"),
            write("long2", b"0123456789"),
            write("short2", b"abc"),
            write("long3", b"0123456780"),
        ];
        let buckets = group_by_size(files);
        let config = ScanConfigBuilder::new()
            .with_paths(vec![dir.path().to_path_buf()])
            .with_block_size(4)
            .with_threads(2)
            .build()
            .unwrap();

        let report = find_duplicates(&buckets, &config, None, false).unwrap();

        assert_eq!(report.groups.len(), 2);
        assert_eq!(report.groups[0].size, 10);
        assert_eq!(report.groups[1].size, 3);
        assert_eq!(report.stats.buckets, 2);
        assert_eq!(report.stats.candidates, 5);
        assert_eq!(report.stats.duplicate_files, 2);
        assert_eq!(report.stats.reclaimable_bytes, 13);
        // 3 blocks each for the 10 byte files, 1 block each for the 3 byte files.
        assert_eq!(report.stats.blocks_read, 11);
        assert_eq!(report.stats.bytes_read, 36);
    }

    #[test]
    fn raised_flag_interrupts_the_scan() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"same").unwrap();
        fs::write(&b, b"same").unwrap();
        let buckets = vec![SizeBucket {
            size: 4,
            paths: vec![a, b],
        }];
        let config = ScanConfigBuilder::new()
            .with_paths(vec![dir.path().to_path_buf()])
            .build()
            .unwrap();

        let flag = Arc::new(AtomicBool::new(true));
        let result = find_duplicates(&buckets, &config, Some(flag), false);
        assert!(matches!(result, Err(ScanError::Interrupted)));
    }

    #[test]
    fn json_output_lists_groups_and_stats() {
        let report = ScanReport {
            groups: vec![DuplicateGroup {
                size: 3,
                paths: vec!["/a".into(), "/b".into()],
            }],
            ..Default::default()
        };
        let config = ScanConfigBuilder::new()
            .with_paths(vec![PathBuf::from(".")])
            .build()
            .unwrap();

        let mut out = Vec::new();
        write_json(&report, &config, &mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(value["hash"], "md5");
        assert_eq!(value["groups"][0]["paths"][1], "/b");
        assert!(value["stats"]["blocks_read"].is_u64());
        assert!(value["generated_at"].is_string());
    }
}
