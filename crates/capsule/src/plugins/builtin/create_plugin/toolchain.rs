//! Host build toolchain used by the authoring pipeline

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::prompt::package_name;

/// Diagnostics beyond this many bytes are cut off
pub const MAX_DIAGNOSTIC_BYTES: usize = 16 * 1024;

/// Result of one build attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Succeeded,
    Failed { diagnostics: String },
}

/// Builds a generated package into a loadable unit
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Build the package at `manifest_dir` and place the unit at `unit_path`
    ///
    /// Compile failures are `Ok(BuildOutcome::Failed)`; `Err` means the
    /// toolchain itself could not run.
    async fn build(&self, manifest_dir: &Path, unit_path: &Path) -> std::io::Result<BuildOutcome>;
}

/// Builds with `cargo build --release`
#[derive(Debug, Clone)]
pub struct CargoToolchain {
    cargo: String,
    target_dir: PathBuf,
    timeout: Duration,
}

impl CargoToolchain {
    pub fn new(cargo: impl Into<String>, target_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            cargo: cargo.into(),
            target_dir: target_dir.into(),
            timeout,
        }
    }

    fn built_binary(&self, manifest_dir: &Path) -> std::io::Result<PathBuf> {
        let id = manifest_dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| std::io::Error::other("manifest directory has no name"))?;

        Ok(self.target_dir.join("release").join(format!(
            "{}{}",
            package_name(id),
            std::env::consts::EXE_SUFFIX
        )))
    }
}

#[async_trait]
impl Toolchain for CargoToolchain {
    async fn build(&self, manifest_dir: &Path, unit_path: &Path) -> std::io::Result<BuildOutcome> {
        let manifest = manifest_dir.join("Cargo.toml");

        let mut cmd = Command::new(&self.cargo);
        cmd.arg("build")
            .arg("--release")
            .arg("--quiet")
            .arg("--manifest-path")
            .arg(&manifest)
            .arg("--target-dir")
            .arg(&self.target_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(manifest = %manifest.display(), "Running cargo build");

        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(timeout = ?self.timeout, "Build timed out");
                return Ok(BuildOutcome::Failed {
                    diagnostics: format!("build timed out after {:?}", self.timeout),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Ok(BuildOutcome::Failed {
                diagnostics: truncate_diagnostics(&stderr, MAX_DIAGNOSTIC_BYTES),
            });
        }

        if let Some(parent) = unit_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(self.built_binary(manifest_dir)?, unit_path).await?;

        Ok(BuildOutcome::Succeeded)
    }
}

/// Keep at most `max` bytes, cut on a char boundary
pub fn truncate_diagnostics(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.len() <= max {
        return text.to_string();
    }

    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[diagnostics truncated at {} bytes]", &text[..end], max)
}
