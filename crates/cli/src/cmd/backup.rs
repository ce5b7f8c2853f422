//! Back up every job into a new edition

use super::FilterArgs;
use crate::util;
use anyhow::{Context, Result};
use keepsake_archive::{shared_excludes, BackupContext, BackupSummary, RunningJob};
use keepsake_core::Edition;
use owo_colors::OwoColorize;
use std::fs;
use std::path::Path;

pub fn run(job_file: &Path, filters: &FilterArgs, remove_after: Option<Edition>) -> Result<()> {
    let edition = Edition::now();
    let jobs = super::jobs(job_file, Some(edition))?;

    let ctx = BackupContext {
        filters: filters.build()?,
        shared_excludes: shared_excludes(&jobs).context("Failed to list existing archives")?,
        remove_after,
    };

    println!("{} {}", "Backing up edition".bold(), edition.to_string().cyan());
    if let Some(after) = &remove_after {
        println!("  {}", format!("Dropping editions after {after}").yellow());
    }
    println!();

    let mut failed = 0;
    for job in &jobs {
        match job.backup(&ctx) {
            Ok(summary) => display_summary(job, &summary),
            Err(e) => {
                super::report_failure(job, &e);
                failed += 1;
            }
        }
    }

    super::finish("Backup", failed, jobs.len())
}

fn display_summary(job: &RunningJob, summary: &BackupSummary) {
    let size = fs::metadata(&summary.archive)
        .map(|meta| util::format_size(meta.len()))
        .unwrap_or_else(|_| "?".to_string());

    println!("{} {}", "✓".green(), job.name().bold());
    println!("  Archive:    {} ({})", summary.archive.display().to_string().cyan(), size);
    println!("  Archived:   {}", summary.archived.to_string().green());
    println!("  Unchanged:  {}", summary.unchanged);
    println!(
        "  Dirs/links: {}/{}",
        summary.directories, summary.symlinks
    );
    if summary.removed_archives > 0 {
        println!("  Removed:    {} archive(s)", summary.removed_archives.to_string().yellow());
    }
    if summary.failed > 0 {
        println!(
            "  {}",
            format!("{} entries could not be archived (see log)", summary.failed).red()
        );
    }
}
