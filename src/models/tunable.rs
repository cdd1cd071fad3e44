use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The fixed set of kernel memory-management parameters this tool manages.
///
/// Each variant carries its kernel interface path, the recommended value and
/// the stock (SteamOS) value. Because the set is closed, an unknown tunable
/// can only appear at the parsing boundary ([`FromStr`]), never inside the
/// services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tunable {
    Swappiness,
    PageLockUnfairness,
    CompactionProactiveness,
    #[serde(rename = "hugepages")]
    HugePages,
    ShmemEnabled,
    Defrag,
}

/// Returned when a tunable name does not match any registry entry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown tunable '{0}'")]
pub struct UnknownTunable(pub String);

impl Tunable {
    /// Every registry entry, in the order presets apply them.
    pub const ALL: [Tunable; 6] = [
        Tunable::Swappiness,
        Tunable::HugePages,
        Tunable::CompactionProactiveness,
        Tunable::Defrag,
        Tunable::PageLockUnfairness,
        Tunable::ShmemEnabled,
    ];

    /// The tweaks toggled independently of swap (everything but swappiness).
    pub const TWEAKS: [Tunable; 5] = [
        Tunable::HugePages,
        Tunable::CompactionProactiveness,
        Tunable::Defrag,
        Tunable::PageLockUnfairness,
        Tunable::ShmemEnabled,
    ];

    /// Registry key, also used as the unit file stem (`<name>.conf`).
    pub fn name(self) -> &'static str {
        match self {
            Tunable::Swappiness => "swappiness",
            Tunable::PageLockUnfairness => "page_lock_unfairness",
            Tunable::CompactionProactiveness => "compaction_proactiveness",
            Tunable::HugePages => "hugepages",
            Tunable::ShmemEnabled => "shmem_enabled",
            Tunable::Defrag => "defrag",
        }
    }

    /// Absolute kernel interface path on a live system.
    pub fn kernel_path(self) -> &'static str {
        match self {
            Tunable::Swappiness => "/proc/sys/vm/swappiness",
            Tunable::PageLockUnfairness => "/proc/sys/vm/page_lock_unfairness",
            Tunable::CompactionProactiveness => "/proc/sys/vm/compaction_proactiveness",
            Tunable::HugePages => "/sys/kernel/mm/transparent_hugepage/enabled",
            Tunable::ShmemEnabled => "/sys/kernel/mm/transparent_hugepage/shmem_enabled",
            Tunable::Defrag => "/sys/kernel/mm/transparent_hugepage/khugepaged/defrag",
        }
    }

    pub fn recommended(self) -> &'static str {
        match self {
            Tunable::Swappiness => "1",
            Tunable::PageLockUnfairness => "1",
            Tunable::CompactionProactiveness => "0",
            Tunable::HugePages => "always",
            Tunable::ShmemEnabled => "advise",
            Tunable::Defrag => "0",
        }
    }

    pub fn default_value(self) -> &'static str {
        match self {
            Tunable::Swappiness => "100",
            Tunable::PageLockUnfairness => "5",
            Tunable::CompactionProactiveness => "20",
            Tunable::HugePages => "madvise",
            Tunable::ShmemEnabled => "never",
            Tunable::Defrag => "1",
        }
    }

    /// Human-readable label for status output.
    pub fn label(self) -> &'static str {
        match self {
            Tunable::Swappiness => "Swappiness",
            Tunable::PageLockUnfairness => "Page Lock Unfairness",
            Tunable::CompactionProactiveness => "Compaction Proactiveness",
            Tunable::HugePages => "HugePages",
            Tunable::ShmemEnabled => "Shared Memory in HugePages",
            Tunable::Defrag => "HugePage Defragmentation",
        }
    }
}

impl fmt::Display for Tunable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Tunable {
    type Err = UnknownTunable;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace('-', "_");
        match key.as_str() {
            "swappiness" => Ok(Tunable::Swappiness),
            "page_lock_unfairness" => Ok(Tunable::PageLockUnfairness),
            "compaction_proactiveness" => Ok(Tunable::CompactionProactiveness),
            "hugepages" => Ok(Tunable::HugePages),
            "shmem_enabled" | "shmem" => Ok(Tunable::ShmemEnabled),
            "defrag" => Ok(Tunable::Defrag),
            _ => Err(UnknownTunable(s.to_string())),
        }
    }
}
