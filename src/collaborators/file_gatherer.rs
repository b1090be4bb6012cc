//! File gatherer — walks the configured paths (via `walkdir`) and reads
//! matching file bytes into [`FileContent`], honoring simple glob-style
//! include/exclude filters and an exact-name exclude list.

use async_trait::async_trait;
use walkdir::WalkDir;

use super::{FileGatherer, GatherConfig, GatherStats};
use crate::error::{ErrorKind, RunContext, TaxonomyError};
use crate::tokencounter::FileContent;

pub struct WalkdirFileGatherer;

#[async_trait]
impl FileGatherer for WalkdirFileGatherer {
    async fn gather(&self, ctx: &RunContext, config: &GatherConfig) -> anyhow::Result<(Vec<FileContent>, GatherStats)> {
        let config = config.clone();
        let ctx = ctx.clone();
        tokio::task::spawn_blocking(move || gather_blocking(&ctx, &config))
            .await
            .context_gathering_failed()?
    }

    async fn display_dry_run_info(&self, _ctx: &RunContext, stats: &GatherStats) -> anyhow::Result<()> {
        println!(
            "dry run: scanned {} file(s), {} included, {} excluded, {} bytes total",
            stats.files_scanned, stats.files_included, stats.files_excluded, stats.total_bytes
        );
        Ok(())
    }
}

trait ContextGatheringFailed<T> {
    fn context_gathering_failed(self) -> anyhow::Result<T>;
}

impl<T> ContextGatheringFailed<T> for Result<T, tokio::task::JoinError> {
    fn context_gathering_failed(self) -> anyhow::Result<T> {
        self.map_err(|e| TaxonomyError::new(ErrorKind::ContextGatheringFailed, format!("file gathering task panicked: {e}")).into())
    }
}

fn gather_blocking(ctx: &RunContext, config: &GatherConfig) -> anyhow::Result<(Vec<FileContent>, GatherStats)> {
    let mut files = Vec::new();
    let mut stats = GatherStats::default();

    for root in &config.paths {
        if ctx.is_cancelled() {
            return Err(TaxonomyError::new(ErrorKind::Cancelled, "file gathering: cancelled mid-walk").into());
        }

        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            stats.files_scanned += 1;

            let path = entry.path();
            let file_name = entry.file_name().to_string_lossy();
            let rel = path.to_string_lossy();

            if config.exclude_names.iter().any(|n| n == file_name.as_ref()) {
                stats.files_excluded += 1;
                continue;
            }
            if !config.include.is_empty() && !config.include.iter().any(|p| glob_match(p, &rel)) {
                stats.files_excluded += 1;
                continue;
            }
            if config.exclude.iter().any(|p| glob_match(p, &rel)) {
                stats.files_excluded += 1;
                continue;
            }

            let content = std::fs::read(path)
                .map_err(|e| TaxonomyError::new(ErrorKind::ContextGatheringFailed, format!("reading {}: {e}", path.display())))?;
            stats.total_bytes += content.len() as u64;
            stats.files_included += 1;
            files.push(FileContent { path: rel.to_string(), content });
        }
    }

    Ok((files, stats))
}

/// Minimal glob matching: `*` matches any run of characters (including
/// none), everything else matches literally. No `**`/brace expansion —
/// sufficient for the flat include/exclude patterns this gatherer
/// accepts (`*.rs`, `vendor/*`, `Cargo.lock`).
fn glob_match(pattern: &str, text: &str) -> bool {
    fn recurse(pattern: &[char], text: &[char]) -> bool {
        match pattern.first() {
            None => text.is_empty(),
            Some('*') => {
                for i in 0..=text.len() {
                    if recurse(&pattern[1..], &text[i..]) {
                        return true;
                    }
                }
                false
            }
            Some(c) => text.first() == Some(c) && recurse(&pattern[1..], &text[1..]),
        }
    }
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    recurse(&pattern, &text)
}
