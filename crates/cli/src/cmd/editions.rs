//! List the editions recorded for every job

use crate::util;
use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(job_file: &Path) -> Result<()> {
    let jobs = super::jobs(job_file, None)?;

    let mut failed = 0;
    for job in &jobs {
        match job.list_editions() {
            Ok(editions) => {
                println!("{}", job.name().bold());
                if editions.is_empty() {
                    println!("  {}", "No editions yet".dimmed());
                }
                for edition in editions {
                    println!(
                        "  {}  {}",
                        edition.to_string().yellow(),
                        util::format_relative_time(&edition).dimmed()
                    );
                }
            }
            Err(e) => {
                super::report_failure(job, &e);
                failed += 1;
            }
        }
    }

    super::finish("Listing editions", failed, jobs.len())
}
