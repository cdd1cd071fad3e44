//! Swap file lifecycle.
//!
//! A resize is a strictly sequential, destructive sequence:
//!
//! ```text
//! Idle -> Disabling -> Resizing -> Permissioning -> Activating -> Idle
//!                                                              -> Failed
//! ```
//!
//! Free space is checked before the first command runs. Once `swapoff -a`
//! has succeeded, a failure in a later step leaves the system without swap;
//! that degraded state is logged and reported, never hidden.

use crate::metrics::Metrics;
use crate::models::{GIB, KernelSettings, SwapPhase, SwapSettings, Tunable};
use crate::services::command::{CommandError, CommandRunner};
use crate::services::system::SpaceProbe;
use crate::services::tweaks::{TweakError, TweakService};
use crate::state::StateManager;
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use std::fs;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Highest value the kernel accepts for `vm.swappiness`.
pub const MAX_SWAPPINESS: u32 = 200;

#[derive(Error, Debug)]
pub enum SwapError {
    #[error("invalid swap configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("active swap {device} is a block device, only swap files are managed")]
    BlockDevice { device: String },

    #[error("no swap file found in {table} and {default} does not exist")]
    NoSwapFile {
        table: Utf8PathBuf,
        default: Utf8PathBuf,
    },

    #[error("failed to read swap table {path}: {source}")]
    SwapTable {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to inspect swap file {path}: {source}")]
    Stat {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to get free space of {path}: {source}")]
    FreeSpace {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("swap size must be at least 1 GB")]
    InvalidSize,

    #[error("not enough space for the swap file: {needed} bytes needed, {available} available")]
    InsufficientSpace { needed: u64, available: u64 },

    #[error("swappiness must be between 0 and 200, got {0}")]
    InvalidSwappiness(u32),

    #[error("failed to read swappiness: {0}")]
    ReadSwappiness(#[source] CommandError),

    #[error("unexpected swappiness value '{0}'")]
    ParseSwappiness(String),

    #[error("error disabling swap: {0}")]
    Disable(#[source] CommandError),

    #[error("error resizing {path}: {source}")]
    Resize {
        path: Utf8PathBuf,
        #[source]
        source: CommandError,
    },

    #[error("error setting permissions on {path}: {source}")]
    Permission {
        path: Utf8PathBuf,
        #[source]
        source: CommandError,
    },

    #[error("error initializing swap signature on {path}: {source}")]
    Mkswap {
        path: Utf8PathBuf,
        #[source]
        source: CommandError,
    },

    #[error("error enabling swap on {path}: {source}")]
    Activate {
        path: Utf8PathBuf,
        #[source]
        source: CommandError,
    },

    #[error(transparent)]
    Tweak(#[from] TweakError),
}

impl SwapError {
    /// Whether swap is known to be off after this error.
    pub fn left_swap_disabled(&self) -> bool {
        matches!(
            self,
            SwapError::Resize { .. }
                | SwapError::Permission { .. }
                | SwapError::Mkswap { .. }
                | SwapError::Activate { .. }
        )
    }
}

/// Live swap configuration, inspected on demand and never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapState {
    pub file_path: Utf8PathBuf,
    pub current_size_bytes: u64,
    pub current_swappiness: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeKind {
    Default,
    Current,
    Candidate,
}

/// One entry of the resize choices offered to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapSizeOption {
    pub size_gb: u32,
    pub kind: SizeKind,
}

impl fmt::Display for SwapSizeOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SizeKind::Default => write!(f, "{} - Default", self.size_gb),
            SizeKind::Current => write!(f, "{} - Current Size", self.size_gb),
            SizeKind::Candidate => write!(f, "{}", self.size_gb),
        }
    }
}

/// Bytes needed on disk to hold a swap file of `size_gb` plus headroom.
pub fn space_needed(size_gb: u32, overhead_bytes: u64) -> u64 {
    u64::from(size_gb) * GIB + overhead_bytes
}

/// Find the active swap file in kernel swap table `contents`.
///
/// Returns `Ok(None)` when no swap is active.
pub fn parse_swap_table(contents: &str) -> Result<Option<Utf8PathBuf>, SwapError> {
    for line in contents.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || fields[0] == "Filename" {
            continue;
        }
        let location = fields[0];
        if location.starts_with("/dev/") {
            return Err(SwapError::BlockDevice {
                device: location.to_string(),
            });
        }
        return Ok(Some(Utf8PathBuf::from(location)));
    }
    Ok(None)
}

/// Manages the single swap file and `vm.swappiness`.
pub struct SwapManager<R, P> {
    runner: Arc<R>,
    probe: P,
    settings: SwapSettings,
    tweaks: TweakService<R>,
    swap_file: Utf8PathBuf,
    state: Option<StateManager>,
    metrics: Option<Arc<Metrics>>,
}

impl<R: CommandRunner, P: SpaceProbe> SwapManager<R, P> {
    /// Validate `settings` and locate the swap file.
    pub fn new(
        runner: Arc<R>,
        probe: P,
        settings: SwapSettings,
        kernel: KernelSettings,
    ) -> Result<Self, SwapError> {
        if settings.default_size_gb == 0 {
            return Err(SwapError::InvalidConfig("default swap size is required"));
        }
        if settings.available_sizes_gb.is_empty() {
            return Err(SwapError::InvalidConfig("available swap sizes are required"));
        }
        if settings.legacy_swappiness_file.as_str().is_empty() {
            return Err(SwapError::InvalidConfig("legacy swappiness file is required"));
        }
        if settings.default_file.as_str().is_empty() {
            return Err(SwapError::InvalidConfig("default swap location is required"));
        }

        let swap_file = locate_swap_file(&settings)?;
        tracing::info!("Managing swap file {}", swap_file);

        Ok(Self {
            tweaks: TweakService::new(Arc::clone(&runner), kernel),
            runner,
            probe,
            settings,
            swap_file,
            state: None,
            metrics: None,
        })
    }

    pub fn with_state(mut self, state: StateManager) -> Self {
        self.tweaks = self.tweaks.with_state(state.clone());
        self.state = Some(state);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.tweaks = self.tweaks.with_metrics(Arc::clone(&metrics));
        self.metrics = Some(metrics);
        self
    }

    pub fn swap_file(&self) -> &Utf8Path {
        &self.swap_file
    }

    pub fn settings(&self) -> &SwapSettings {
        &self.settings
    }

    /// Current size of the swap file in bytes.
    pub fn current_size_bytes(&self) -> Result<u64, SwapError> {
        let metadata = fs::metadata(&self.swap_file).map_err(|source| SwapError::Stat {
            path: self.swap_file.clone(),
            source,
        })?;
        tracing::debug!("Found a swap file with a size of {}", metadata.len());
        Ok(metadata.len())
    }

    /// Directory whose filesystem the swap file is written to. Falls back to
    /// the configured free space path when the file has no parent.
    pub fn free_space_target(&self) -> &Utf8Path {
        match self.swap_file.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => &self.settings.free_space_path,
        }
    }

    /// Free bytes on the filesystem holding the swap file.
    pub fn free_space(&self) -> Result<u64, SwapError> {
        let target = self.free_space_target();
        self.probe
            .free_space(target)
            .map_err(|source| SwapError::FreeSpace {
                path: target.to_path_buf(),
                source,
            })
    }

    /// Live `vm.swappiness`.
    pub async fn current_swappiness(&self) -> Result<u32, SwapError> {
        let output = self
            .runner
            .run("sysctl", &["-n", "vm.swappiness"])
            .await
            .map_err(SwapError::ReadSwappiness)?;
        let raw = String::from_utf8_lossy(&output).trim().to_string();
        let value = raw
            .parse::<u32>()
            .map_err(|_| SwapError::ParseSwappiness(raw.clone()))?;
        tracing::debug!("Found a swappiness of {}", value);
        Ok(value)
    }

    pub async fn current_state(&self) -> Result<SwapState, SwapError> {
        Ok(SwapState {
            file_path: self.swap_file.clone(),
            current_size_bytes: self.current_size_bytes()?,
            current_swappiness: self.current_swappiness().await?,
        })
    }

    /// Resize choices the operator may pick from.
    ///
    /// The default size is always offered first. A candidate is offered
    /// when it fits in free space plus the space the current file already
    /// occupies; the candidate matching the current size is marked as such.
    pub fn available_sizes(&self) -> Result<Vec<SwapSizeOption>, SwapError> {
        let free = self.free_space()?;
        let current = self.current_size_bytes().unwrap_or_else(|e| {
            tracing::warn!("{}, assuming the default size", e);
            self.settings.default_size_bytes()
        });
        let budget = free.saturating_add(current);

        let mut options = vec![SwapSizeOption {
            size_gb: self.settings.default_size_gb,
            kind: SizeKind::Default,
        }];

        for &size_gb in &self.settings.available_sizes_gb {
            if size_gb == self.settings.default_size_gb
                || space_needed(size_gb, self.settings.overhead_bytes) > budget
            {
                continue;
            }
            let kind = if u64::from(size_gb) * GIB == current {
                SizeKind::Current
            } else {
                SizeKind::Candidate
            };
            options.push(SwapSizeOption { size_gb, kind });
        }

        tracing::info!(
            "Available swap sizes: {}",
            options
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(options)
    }

    /// Rebuild the swap file at `size_gb` gigabytes and re-enable it.
    ///
    /// Nothing runs unless `size_gb` GiB plus the configured overhead fits
    /// in free space.
    pub async fn change_size(&self, size_gb: u32) -> Result<(), SwapError> {
        if size_gb == 0 {
            return Err(SwapError::InvalidSize);
        }

        let needed = space_needed(size_gb, self.settings.overhead_bytes);
        let available = self.free_space()?;
        if needed > available {
            tracing::error!(
                "Not enough space for a {} GB swap file: {} bytes needed, {} available",
                size_gb,
                needed,
                available
            );
            return Err(SwapError::InsufficientSpace { needed, available });
        }

        if let Some(state) = &self.state {
            state.start_swap_resize(size_gb);
        }

        match self.rebuild(size_gb).await {
            Ok(()) => {
                self.set_phase(SwapPhase::Idle);
                if let Some(metrics) = &self.metrics {
                    metrics.record_swap_resize();
                }
                tracing::info!("Swap file {} is now {} GB", self.swap_file, size_gb);
                Ok(())
            }
            Err(e) => {
                self.set_phase(SwapPhase::Failed);
                if let Some(state) = &self.state {
                    state.record_error(e.to_string());
                }
                if e.left_swap_disabled() {
                    tracing::warn!(
                        "Swap is currently disabled: the resize of {} stopped part way",
                        self.swap_file
                    );
                }
                Err(e)
            }
        }
    }

    async fn rebuild(&self, size_gb: u32) -> Result<(), SwapError> {
        let path = self.swap_file.as_str();

        self.set_phase(SwapPhase::Disabling);
        tracing::info!("Disabling swap temporarily...");
        self.runner
            .run("swapoff", &["-a"])
            .await
            .map_err(SwapError::Disable)?;

        self.set_phase(SwapPhase::Resizing);
        tracing::info!("Resizing swap to {} GB...", size_gb);
        let of_arg = format!("of={}", path);
        let count_arg = format!("count={}", size_gb);
        self.runner
            .run(
                "dd",
                &[
                    "if=/dev/zero",
                    of_arg.as_str(),
                    "bs=1G",
                    count_arg.as_str(),
                    "status=progress",
                ],
            )
            .await
            .map_err(|source| SwapError::Resize {
                path: self.swap_file.clone(),
                source,
            })?;

        self.set_phase(SwapPhase::Permissioning);
        tracing::info!("Setting permissions on {} to 0600...", path);
        self.runner
            .run("chmod", &["600", path])
            .await
            .map_err(|source| SwapError::Permission {
                path: self.swap_file.clone(),
                source,
            })?;

        self.set_phase(SwapPhase::Activating);
        tracing::info!("Enabling swap on {}...", path);
        self.runner
            .run("mkswap", &[path])
            .await
            .map_err(|source| SwapError::Mkswap {
                path: self.swap_file.clone(),
                source,
            })?;
        self.runner
            .run("swapon", &[path])
            .await
            .map_err(|source| SwapError::Activate {
                path: self.swap_file.clone(),
                source,
            })?;

        Ok(())
    }

    /// Set `vm.swappiness` and persist it, or drop the unit file when the
    /// value is the kernel default.
    pub async fn change_swappiness(&self, value: u32) -> Result<(), SwapError> {
        if value > MAX_SWAPPINESS {
            return Err(SwapError::InvalidSwappiness(value));
        }

        self.tweaks
            .units()
            .remove_best_effort(&self.settings.legacy_swappiness_file)
            .await;

        let value = value.to_string();
        self.tweaks.set_value(Tunable::Swappiness, &value).await?;

        let tunable = Tunable::Swappiness;
        if value == tunable.default_value() {
            self.tweaks
                .units()
                .remove(tunable)
                .await
                .map_err(|source| TweakError::Unpersist { tunable, source })?;
        } else {
            self.tweaks
                .units()
                .write(tunable, &value)
                .await
                .map_err(|source| TweakError::Persist { tunable, source })?;
        }

        Ok(())
    }

    fn set_phase(&self, phase: SwapPhase) {
        if let Some(state) = &self.state {
            state.set_swap_phase(phase);
        }
    }
}

/// Locate the swap file from the kernel swap table, falling back to the
/// configured default file when no swap is active.
pub fn locate_swap_file(settings: &SwapSettings) -> Result<Utf8PathBuf, SwapError> {
    let contents =
        fs::read_to_string(&settings.swaps_table).map_err(|source| SwapError::SwapTable {
            path: settings.swaps_table.clone(),
            source,
        })?;

    if let Some(path) = parse_swap_table(&contents)? {
        return Ok(path);
    }

    if settings.default_file.exists() {
        tracing::info!(
            "No active swap, using default swap file {}",
            settings.default_file
        );
        return Ok(settings.default_file.clone());
    }

    Err(SwapError::NoSwapFile {
        table: settings.swaps_table.clone(),
        default: settings.default_file.clone(),
    })
}
