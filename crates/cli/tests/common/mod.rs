//! CLI command execution helpers for integration tests
//!
//! Wraps the `keepsake` binary built for this test run and captures its
//! output for assertions.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// CLI command builder with timing
pub struct KeepsakeCommand {
    working_dir: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl KeepsakeCommand {
    /// Create a new command in the given working directory
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn args(&mut self, args: &[&str]) -> &mut Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    #[allow(dead_code)]
    pub fn env(&mut self, key: &str, value: &str) -> &mut Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Execute command and return result with timing
    pub fn execute(&self) -> Result<CommandResult> {
        let start = Instant::now();
        let output = Command::new(env!("CARGO_BIN_EXE_keepsake"))
            .args(&self.args)
            .current_dir(&self.working_dir)
            .envs(&self.env)
            .output()
            .context("Failed to execute keepsake")?;

        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration: start.elapsed(),
        })
    }

    /// Execute and assert success
    pub fn assert_success(&self) -> Result<CommandResult> {
        let result = self.execute()?;
        if !result.success() {
            anyhow::bail!(
                "Command failed (exit code: {}):\nArgs: {:?}\nStdout: {}\nStderr: {}",
                result.exit_code,
                self.args,
                result.stdout,
                result.stderr
            );
        }
        Ok(result)
    }

    /// Execute and expect failure
    pub fn assert_failure(&self) -> Result<CommandResult> {
        let result = self.execute()?;
        if result.success() {
            anyhow::bail!(
                "Command should have failed but succeeded:\nArgs: {:?}\nStdout: {}",
                self.args,
                result.stdout
            );
        }
        Ok(result)
    }
}

/// Command execution result with timing
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    #[allow(dead_code)]
    pub duration: Duration,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn contains_stdout(&self, text: &str) -> bool {
        self.stdout.contains(text)
    }

    pub fn contains_stderr(&self, text: &str) -> bool {
        self.stderr.contains(text)
    }
}

/// A scratch directory holding a small tree and a job file for it
pub struct TestSetup {
    pub dir: TempDir,
}

impl TestSetup {
    pub fn new(passphrase: &str) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("src");
        fs::create_dir_all(root.join("docs"))?;
        fs::create_dir_all(dir.path().join("backups"))?;
        fs::write(root.join("a.txt"), b"first file")?;
        fs::write(root.join("docs/b.md"), b"# second file")?;
        fs::write(root.join("cache.tmp"), b"throwaway")?;

        let setup = Self { dir };
        setup.set_passphrase(passphrase)?;
        Ok(setup)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of a file in the backed-up tree
    pub fn source(&self, rel: &str) -> PathBuf {
        self.path().join("src").join(rel)
    }

    /// (Re)write the job file with the given passphrase
    pub fn set_passphrase(&self, passphrase: &str) -> Result<()> {
        let job = serde_json::json!({
            "BaseName": "backups/home",
            "Path": "src",
            "Excludes": ["*.tmp"],
            "Passphrase": passphrase,
        });
        fs::write(self.path().join("backup.json"), job.to_string())?;
        Ok(())
    }
}

/// Macro for convenient command construction
///
/// ```ignore
/// keepsake!(dir, "backup").assert_success()?;
/// ```
#[macro_export]
macro_rules! keepsake {
    ($dir:expr, $($arg:expr),*) => {{
        let mut cmd = $crate::common::KeepsakeCommand::new($dir);
        cmd.args(&[$($arg),*]);
        cmd
    }};
}
