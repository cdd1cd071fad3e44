use crate::metrics::Metrics;
use crate::models::{KernelSettings, Tunable};
use crate::services::command::{CommandError, CommandRunner};
use crate::services::unit_file::{UnitFileError, UnitFileStore};
use crate::state::StateManager;
use camino::Utf8PathBuf;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use thiserror::Error;

/// Matches the selected entry of a list-style kernel file, e.g. `[madvise]`
static SELECTED_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]").expect("valid selected value regex"));

/// Errors raised while reading or changing a tunable
#[derive(Error, Debug)]
pub enum TweakError {
    #[error("failed to read {tunable} from {path}: {source}")]
    Read {
        tunable: Tunable,
        path: Utf8PathBuf,
        #[source]
        source: CommandError,
    },

    #[error("failed to write {value} to {path} for {tunable}: {source}")]
    Write {
        tunable: Tunable,
        value: String,
        path: Utf8PathBuf,
        #[source]
        source: CommandError,
    },

    #[error("{tunable} was applied but could not be persisted: {source}")]
    Persist {
        tunable: Tunable,
        #[source]
        source: UnitFileError,
    },

    #[error("{tunable} was reverted but its unit file could not be removed: {source}")]
    Unpersist {
        tunable: Tunable,
        #[source]
        source: UnitFileError,
    },
}

/// Which way a toggle went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TweakAction {
    Enabled,
    Reverted,
}

/// Extract the live value from raw kernel file contents.
///
/// List-style files (`always [madvise] never`) yield the bracketed token;
/// scalar files are trimmed.
pub fn parse_kernel_value(raw: &str) -> String {
    match SELECTED_VALUE.captures(raw) {
        Some(caps) => caps[1].to_string(),
        None => raw.trim().to_string(),
    }
}

/// Reads, applies, reverts and toggles the registry tunables.
///
/// Applying a value writes it to the kernel interface with a privileged
/// `tee` and then persists (or removes) the matching unit file. The live
/// kernel read is the source of truth for status and toggling; unit files
/// are never consulted.
pub struct TweakService<R> {
    runner: Arc<R>,
    units: UnitFileStore<R>,
    kernel: KernelSettings,
    state: Option<StateManager>,
    metrics: Option<Arc<Metrics>>,
}

impl<R: CommandRunner> TweakService<R> {
    pub fn new(runner: Arc<R>, kernel: KernelSettings) -> Self {
        Self {
            units: UnitFileStore::new(Arc::clone(&runner), kernel.clone()),
            runner,
            kernel,
            state: None,
            metrics: None,
        }
    }

    /// Report observed values to `state`.
    pub fn with_state(mut self, state: StateManager) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn units(&self) -> &UnitFileStore<R> {
        &self.units
    }

    /// Resolved kernel interface path of `tunable`.
    pub fn kernel_path(&self, tunable: Tunable) -> Utf8PathBuf {
        self.kernel.resolve(tunable.kernel_path())
    }

    /// Read the live kernel value of `tunable`.
    pub async fn status(&self, tunable: Tunable) -> Result<String, TweakError> {
        let path = self.kernel_path(tunable);
        let output = self
            .runner
            .run("cat", &[path.as_str()])
            .await
            .map_err(|source| TweakError::Read {
                tunable,
                path: path.clone(),
                source,
            })?;

        let value = parse_kernel_value(&String::from_utf8_lossy(&output));
        tracing::debug!("Found {} = {}", tunable, value);

        if let Some(state) = &self.state {
            state.record_tweak(tunable, &value);
        }
        Ok(value)
    }

    /// Read every tunable. A failed read is kept in its slot and does not
    /// stop the remaining reads.
    pub async fn status_all(&self) -> Vec<(Tunable, Result<String, TweakError>)> {
        let mut rows = Vec::with_capacity(Tunable::ALL.len());
        for tunable in Tunable::ALL {
            let value = self.status(tunable).await;
            if let Err(e) = &value {
                tracing::warn!("Couldn't read {}: {}", tunable, e);
            }
            rows.push((tunable, value));
        }
        rows
    }

    /// Whether the live value equals the recommended one. A failed read
    /// counts as "not recommended".
    pub async fn is_at_recommended(&self, tunable: Tunable) -> bool {
        match self.status(tunable).await {
            Ok(value) => value == tunable.recommended(),
            Err(e) => {
                tracing::error!("Unable to get current {} value: {}", tunable, e);
                false
            }
        }
    }

    /// Write `value` to the kernel interface of `tunable` without touching
    /// its unit file.
    pub async fn set_value(&self, tunable: Tunable, value: &str) -> Result<(), TweakError> {
        let path = self.kernel_path(tunable);
        tracing::info!("Writing {} for param {} to memory.", value, tunable);

        let input = format!("{}\n", value);
        self.runner
            .run_with_stdin("tee", &[path.as_str()], input.as_bytes())
            .await
            .map_err(|source| TweakError::Write {
                tunable,
                value: value.to_string(),
                path: path.clone(),
                source,
            })?;

        if let Some(state) = &self.state {
            state.record_tweak(tunable, value);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_tweak_applied();
        }
        Ok(())
    }

    /// Apply the recommended value and persist it for the next boot.
    ///
    /// If the kernel write succeeds but persisting fails, the live value
    /// stays applied and [`TweakError::Persist`] is returned.
    pub async fn enable(&self, tunable: Tunable) -> Result<(), TweakError> {
        tracing::info!("Enabling {}...", tunable);
        self.clear_legacy_artifacts(tunable).await;

        let value = tunable.recommended();
        self.set_value(tunable, value).await?;
        self.units.write(tunable, value).await.map_err(|source| {
            tracing::warn!(
                "{} is live at {} but its unit file could not be written",
                tunable,
                value
            );
            TweakError::Persist { tunable, source }
        })
    }

    /// Restore the stock value and delete the unit file.
    pub async fn revert(&self, tunable: Tunable) -> Result<(), TweakError> {
        tracing::info!("Disabling {}...", tunable);
        self.clear_legacy_artifacts(tunable).await;

        self.set_value(tunable, tunable.default_value()).await?;
        self.units
            .remove(tunable)
            .await
            .map_err(|source| {
                tracing::warn!(
                    "{} is back at {} but will be reapplied at boot",
                    tunable,
                    tunable.default_value()
                );
                TweakError::Unpersist { tunable, source }
            })
    }

    /// Revert when the live value is recommended, enable otherwise.
    ///
    /// A value edited by hand (neither recommended nor stock) is treated as
    /// "not recommended" and moves to recommended.
    pub async fn toggle(&self, tunable: Tunable) -> Result<TweakAction, TweakError> {
        if self.is_at_recommended(tunable).await {
            self.revert(tunable).await?;
            Ok(TweakAction::Reverted)
        } else {
            self.enable(tunable).await?;
            Ok(TweakAction::Enabled)
        }
    }

    // An old hugepages test build left a stray control file behind
    async fn clear_legacy_artifacts(&self, tunable: Tunable) {
        if tunable == Tunable::HugePages {
            self.units
                .remove_best_effort(&self.kernel.legacy_hugepages_file)
                .await;
        }
    }
}
