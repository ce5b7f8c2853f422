//! Restore or test every job's archives

use super::{FilterArgs, TargetArgs};
use anyhow::Result;
use keepsake_archive::{UnpackContext, UnpackMode};
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(job_file: &Path, filters: &FilterArgs, target: &TargetArgs, mode: UnpackMode) -> Result<()> {
    let jobs = super::jobs(job_file, None)?;
    let ctx = UnpackContext {
        filters: filters.build()?,
        replacements: target.replacements()?,
        prefix: target.prefix.clone(),
        mode,
    };

    let action = match mode {
        UnpackMode::Restore => "Restore",
        UnpackMode::Test => "Test",
    };

    let mut failed = 0;
    for job in &jobs {
        match job.unpack(&ctx) {
            Ok(summary) => {
                if mode == UnpackMode::Test {
                    for path in &summary.listed {
                        println!("{}", path.display());
                    }
                }
                println!(
                    "{} {}: {} entries from {} archive(s)",
                    "✓".green(),
                    job.name().bold(),
                    summary.entries,
                    summary.archives
                );
            }
            Err(e) => {
                super::report_failure(job, &e);
                failed += 1;
            }
        }
    }

    super::finish(action, failed, jobs.len())
}
