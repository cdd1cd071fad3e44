//! Boot-time persistence for tunable values.
//!
//! A unit file is a two-line `tmpfiles.d` record that makes systemd write a value back
//! into a kernel interface at boot. One file exists per tunable that is set to a
//! non-default value; reverting a tunable deletes its file.

use crate::models::{KernelSettings, Tunable};
use crate::services::command::{CommandError, CommandRunner};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::sync::Arc;
use thiserror::Error;

/// Header line of every unit file.
pub const UNIT_FILE_HEADER: &str = "# Path Mode UID GID Age Argument";

const STAGING_SUFFIX: &str = ".unit.tmp";

#[derive(Error, Debug)]
pub enum UnitFileError {
    #[error("failed to stage unit file at {path}: {source}")]
    Stage {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to move unit file into {path}: {source}")]
    Move {
        path: Utf8PathBuf,
        #[source]
        source: CommandError,
    },

    #[error("failed to remove unit file {path}: {source}")]
    Remove {
        path: Utf8PathBuf,
        #[source]
        source: CommandError,
    },
}

/// Render the unit file body for `kernel_path` and `value`.
pub fn render_unit_file(kernel_path: &Utf8Path, value: &str) -> String {
    format!("{}\nw {} - - - - {}", UNIT_FILE_HEADER, kernel_path, value)
}

/// Reads and writes unit files in the system unit directory.
///
/// Files are rendered in a user-writable staging directory and moved into
/// place with a privileged `mv`, so the unit directory itself never has to
/// be writable by the invoking user.
pub struct UnitFileStore<R> {
    runner: Arc<R>,
    kernel: KernelSettings,
}

impl<R: CommandRunner> UnitFileStore<R> {
    pub fn new(runner: Arc<R>, kernel: KernelSettings) -> Self {
        Self { runner, kernel }
    }

    /// Location of the unit file for `tunable`.
    pub fn unit_path(&self, tunable: Tunable) -> Utf8PathBuf {
        self.kernel.unit_dir.join(format!("{}.conf", tunable.name()))
    }

    fn staging_path(&self, tunable: Tunable) -> Utf8PathBuf {
        self.kernel
            .staging_dir
            .join(format!("{}{}", tunable.name(), STAGING_SUFFIX))
    }

    /// Write the unit file for `tunable`, replacing any existing one.
    pub async fn write(&self, tunable: Tunable, value: &str) -> Result<(), UnitFileError> {
        let path = self.unit_path(tunable);
        let kernel_path = self.kernel.resolve(tunable.kernel_path());
        tracing::info!(
            "Writing {} to {} to preserve {} setting...",
            value,
            path,
            tunable
        );

        self.sweep_staging();

        let staging = self.staging_path(tunable);
        fs::create_dir_all(&self.kernel.staging_dir).map_err(|source| UnitFileError::Stage {
            path: self.kernel.staging_dir.clone(),
            source,
        })?;
        fs::write(&staging, render_unit_file(&kernel_path, value)).map_err(|source| {
            UnitFileError::Stage {
                path: staging.clone(),
                source,
            }
        })?;

        self.runner
            .run("mv", &[staging.as_str(), path.as_str()])
            .await
            .map_err(|source| UnitFileError::Move {
                path: path.clone(),
                source,
            })?;

        Ok(())
    }

    /// Remove the unit file for `tunable`. A missing file is not an error.
    pub async fn remove(&self, tunable: Tunable) -> Result<(), UnitFileError> {
        let path = self.unit_path(tunable);
        tracing::info!("Removing {} to revert {} setting...", path, tunable);

        self.runner
            .run("rm", &["-f", path.as_str()])
            .await
            .map_err(|source| UnitFileError::Remove { path, source })?;

        Ok(())
    }

    /// Best-effort removal of a file that may or may not exist.
    pub async fn remove_best_effort(&self, path: &Utf8Path) {
        tracing::info!("Removing {}", path);
        if let Err(e) = self.runner.run("rm", &["-f", path.as_str()]).await {
            tracing::warn!("Couldn't delete {}, likely missing: {}", path, e);
        }
    }

    /// Delete staging files left behind by a failed move.
    fn sweep_staging(&self) {
        let Ok(entries) = fs::read_dir(&self.kernel.staging_dir) else {
            return;
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(STAGING_SUFFIX) {
                let path = entry.path();
                match fs::remove_file(&path) {
                    Ok(()) => tracing::debug!("Removed stale staging file {}", path.display()),
                    Err(e) => tracing::warn!(
                        "Could not remove stale staging file {}: {}",
                        path.display(),
                        e
                    ),
                }
            }
        }
    }
}
