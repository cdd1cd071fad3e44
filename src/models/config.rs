use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Bytes in one gigabyte as the kernel and `dd bs=1G` count it.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Top-level configuration loaded from `decktune.yaml`.
///
/// Every section and field has a default, so a missing or partial file is
/// never an error. These values are the injected constants the services
/// are built from; nothing reads them from a global.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TuneConfig {
    pub swap: SwapSettings,
    pub kernel: KernelSettings,
    pub game_data: GameDataSettings,
    pub commands: CommandSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SwapSettings {
    /// Swap file used when the kernel reports no active swap.
    pub default_file: Utf8PathBuf,
    pub default_size_gb: u32,
    pub recommended_size_gb: u32,
    /// Upper bound for sizes picked automatically by the recommended preset.
    pub max_auto_size_gb: u32,
    /// Candidate sizes offered to the operator, in GB.
    pub available_sizes_gb: Vec<u32>,
    /// Headroom kept free on top of the swap file, in bytes.
    pub overhead_bytes: u64,
    /// Free space fallback when the swap file path has no parent directory.
    pub free_space_path: Utf8PathBuf,
    /// Kernel swap table (`/proc/swaps`).
    pub swaps_table: Utf8PathBuf,
    pub legacy_swappiness_file: Utf8PathBuf,
}

impl Default for SwapSettings {
    fn default() -> Self {
        Self {
            default_file: Utf8PathBuf::from("/home/swapfile"),
            default_size_gb: 1,
            recommended_size_gb: 16,
            max_auto_size_gb: 16,
            available_sizes_gb: vec![2, 4, 6, 8, 12, 16, 20, 24, 32],
            overhead_bytes: GIB,
            free_space_path: Utf8PathBuf::from("/home"),
            swaps_table: Utf8PathBuf::from("/proc/swaps"),
            legacy_swappiness_file: Utf8PathBuf::from("/etc/sysctl.d/zzz-custom-swappiness.conf"),
        }
    }
}

impl SwapSettings {
    pub fn default_size_bytes(&self) -> u64 {
        u64::from(self.default_size_gb) * GIB
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KernelSettings {
    /// Prefix joined to every kernel interface path.
    pub sysfs_root: Utf8PathBuf,
    /// Directory holding the boot-time unit files.
    pub unit_dir: Utf8PathBuf,
    /// User-writable directory where unit files are rendered before the
    /// privileged move.
    pub staging_dir: Utf8PathBuf,
    /// Stray control file left by an old hugepages test build.
    pub legacy_hugepages_file: Utf8PathBuf,
}

impl Default for KernelSettings {
    fn default() -> Self {
        Self {
            sysfs_root: Utf8PathBuf::from("/"),
            unit_dir: Utf8PathBuf::from("/etc/tmpfiles.d"),
            staging_dir: home_dir().join(".decktune"),
            legacy_hugepages_file: Utf8PathBuf::from("/etc/tmpfiles.d/nr_hugepages.conf"),
        }
    }
}

impl KernelSettings {
    /// Resolve an absolute kernel path against `sysfs_root`.
    pub fn resolve(&self, kernel_path: &str) -> Utf8PathBuf {
        self.sysfs_root.join(kernel_path.trim_start_matches('/'))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GameDataSettings {
    /// Steam installation holding `steamapps/libraryfolders.vdf`.
    pub steam_root: Utf8PathBuf,
    /// Internal drive root where Steam keeps compatdata and shadercache.
    pub steam_data_root: Utf8PathBuf,
    /// Directory created on external roots to hold relocated data.
    pub external_dir_name: String,
    /// Parent of removable drive mount points.
    pub mount_root: Utf8PathBuf,
    pub mountinfo: Utf8PathBuf,
    pub deletion_timeout_secs: u64,
    pub deletion_poll_millis: u64,
    /// App IDs above this are Proton and runtime tools, never games.
    pub max_app_id: u32,
}

impl Default for GameDataSettings {
    fn default() -> Self {
        let home = home_dir();
        Self {
            steam_root: home.join(".steam/steam"),
            steam_data_root: home.join(".local/share/Steam"),
            external_dir_name: "decktune_steam_data".to_string(),
            mount_root: Utf8PathBuf::from("/run/media"),
            mountinfo: Utf8PathBuf::from("/proc/self/mountinfo"),
            deletion_timeout_secs: 120,
            deletion_poll_millis: 1000,
            max_app_id: 1_000_000_000,
        }
    }
}

impl GameDataSettings {
    pub fn steam_compat_root(&self) -> Utf8PathBuf {
        self.steam_data_root.join("steamapps/compatdata")
    }

    pub fn steam_shader_root(&self) -> Utf8PathBuf {
        self.steam_data_root.join("steamapps/shadercache")
    }

    pub fn deletion_timeout(&self) -> Duration {
        Duration::from_secs(self.deletion_timeout_secs)
    }

    pub fn deletion_poll_interval(&self) -> Duration {
        Duration::from_millis(self.deletion_poll_millis)
    }

    /// Whether `root` is the internal drive Steam reads data from directly.
    pub fn is_steam_root(&self, root: &Utf8Path) -> bool {
        root == self.steam_data_root
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommandSettings {
    /// Prefix privileged commands with `sudo`. Disable when already root.
    pub use_sudo: bool,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self { use_sudo: true }
    }
}

/// The invoking user's home directory, `/home/deck` when `HOME` is unset.
pub fn home_dir() -> Utf8PathBuf {
    env::var("HOME")
        .map(Utf8PathBuf::from)
        .unwrap_or_else(|_| Utf8PathBuf::from("/home/deck"))
}
