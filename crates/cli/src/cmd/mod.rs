//! CLI command implementations

pub mod backup;
pub mod editions;
pub mod unpack;

use anyhow::{Context, Result};
use clap::Args;
use keepsake_archive::{load_jobs, RunningJob};
use keepsake_core::Edition;
use keepsake_filter::{split_list, Filters, Replacements, Scope};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};

/// Path selection shared by every command that walks or reads archives
#[derive(Args, Debug, Default)]
pub struct FilterArgs {
    /// Only paths matching one of these globs (list joined by the path separator)
    #[arg(short, long, value_name = "PATTERNS")]
    pub include: Vec<String>,

    /// Skip paths matching any of these globs (list joined by the path separator)
    #[arg(short = 'x', long, value_name = "PATTERNS")]
    pub exclude: Vec<String>,
}

impl FilterArgs {
    pub fn build(&self) -> Result<Filters> {
        let mut filters = Filters::new();
        for pattern in self.include.iter().flat_map(|list| split_list(list)) {
            filters.add_include(pattern)?;
        }
        for pattern in self.exclude.iter().flat_map(|list| split_list(list)) {
            filters.add_exclude(pattern)?;
        }
        Ok(filters)
    }
}

/// Where restored entries land
#[derive(Args, Debug, Default)]
pub struct TargetArgs {
    /// Restore under this directory instead of at the archived paths
    #[arg(short, long, value_name = "DIR")]
    pub prefix: Option<PathBuf>,

    /// OLD:NEW pairs rewritten when a path starts with OLD
    #[arg(long, value_name = "PAIRS")]
    pub replace_start: Vec<String>,

    /// OLD:NEW pairs rewritten at the first occurrence of OLD
    #[arg(long, value_name = "PAIRS")]
    pub replace: Vec<String>,

    /// OLD:NEW pairs rewritten at every occurrence of OLD
    #[arg(long, value_name = "PAIRS")]
    pub replace_all: Vec<String>,
}

impl TargetArgs {
    pub fn replacements(&self) -> Result<Replacements> {
        let mut chain = Replacements::new();
        let lists = [
            (Scope::Prefix, &self.replace_start),
            (Scope::First, &self.replace),
            (Scope::All, &self.replace_all),
        ];
        for (scope, values) in lists {
            for list in values {
                chain.add_list(scope, list)?;
            }
        }
        Ok(chain)
    }
}

/// Load the job file, refusing one without jobs
pub fn jobs(job_file: &Path, edition: Option<Edition>) -> Result<Vec<RunningJob>> {
    let jobs = load_jobs(job_file, edition)
        .with_context(|| format!("Failed to load jobs from {}", job_file.display()))?;
    if jobs.is_empty() {
        anyhow::bail!("No jobs in {}", job_file.display());
    }
    Ok(jobs)
}

/// Report a job that failed without stopping the others
pub fn report_failure(job: &RunningJob, err: &keepsake_core::Error) {
    tracing::error!(job = %job.name(), "{}", err);
    eprintln!("{} {}: {}", "✗".red(), job.name().bold(), err);
}

/// Turn the per-job tally into the process result
pub fn finish(action: &str, failed: usize, total: usize) -> Result<()> {
    if failed > 0 {
        anyhow::bail!("{} failed for {} of {} jobs", action, failed, total);
    }
    Ok(())
}
