//! Game data placement.
//!
//! Steam keeps one Proton prefix (`compatdata/<id>`) and one shader cache
//! (`shadercache/<id>`) per game on the internal drive. This module keeps
//! that data on the same drive as the game itself: data found on the wrong
//! side of a left/right pair of storage roots is copied across, deleted at
//! the source, and symlinked back into Steam's canonical location when it
//! now lives off the internal drive.

use crate::metrics::Metrics;
use crate::models::GameDataSettings;
use crate::services::library::{Library, LibraryError, LibrarySource};
use crate::services::system::{attached_drives, copy_tree, dir_size, list_subdirs};
use crate::state::StateManager;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GameDataError {
    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error("left and right storage are both {0}")]
    SameRoots(Utf8PathBuf),

    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to list files in {path}: {source}")]
    ListDir {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to copy {from} to {to}: {source}")]
    Copy {
        from: Utf8PathBuf,
        to: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove {path}: {source}")]
    Remove {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to link {link} to {target}: {source}")]
    Symlink {
        link: Utf8PathBuf,
        target: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path} still exists {timeout:?} after it was deleted")]
    DeletionTimeout { path: Utf8PathBuf, timeout: Duration },

    #[error("the following directories remain in the incorrect locations: {}", .0.join(", "))]
    Unmoved(Vec<String>),

    #[error("failed to read mounted drives from {path}: {source}")]
    Mounts {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove game data:\n{}", .0.join("\n"))]
    Cleanup(Vec<String>),

    #[error("background file task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Where compat data and shader caches live for one storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLocation {
    pub root: Utf8PathBuf,
    pub compat: Utf8PathBuf,
    pub shader: Utf8PathBuf,
    /// Steam reads this location directly; no symlinks are needed.
    pub canonical: bool,
}

/// Game directories physically present under each side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStatus {
    pub left_compat: IndexSet<String>,
    pub left_shader: IndexSet<String>,
    pub right_compat: IndexSet<String>,
    pub right_shader: IndexSet<String>,
}

impl StorageStatus {
    fn on_left(&self, id: &str) -> bool {
        self.left_compat.contains(id) && self.left_shader.contains(id)
    }

    fn on_right(&self, id: &str) -> bool {
        self.right_compat.contains(id) && self.right_shader.contains(id)
    }
}

/// Games queued to move in each direction, consumed by one move.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveSet {
    /// Data on the right that belongs with a library on the left.
    pub to_left: Vec<u32>,
    /// Data on the left that belongs with a library on the right.
    pub to_right: Vec<u32>,
    /// Bytes that will be written to the left side.
    pub to_left_bytes: u64,
    /// Bytes that will be written to the right side.
    pub to_right_bytes: u64,
}

impl MoveSet {
    pub fn total(&self) -> usize {
        self.to_left.len() + self.to_right.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Queue every game whose library and data sit on opposite sides.
///
/// A game only qualifies when both its compat and shader directories are
/// on the wrong side. Libraries under neither root are skipped, and a
/// library under both (nested roots) counts as left.
pub fn diff(
    libraries: &[Library],
    status: &StorageStatus,
    left: &Utf8Path,
    right: &Utf8Path,
) -> MoveSet {
    let mut to_left: IndexSet<u32> = IndexSet::new();
    let mut to_right: IndexSet<u32> = IndexSet::new();

    for library in libraries {
        if library.is_under(left) {
            tracing::info!("Library location selected as left: {}", library.path);
            for &id in &library.installed_game_ids {
                if status.on_right(&id.to_string()) {
                    to_left.insert(id);
                }
            }
        } else if library.is_under(right) {
            tracing::info!("Library location selected as right: {}", library.path);
            for &id in &library.installed_game_ids {
                if status.on_left(&id.to_string()) {
                    to_right.insert(id);
                }
            }
        } else {
            tracing::debug!("Library location not selected, skipping: {}", library.path);
        }
    }

    MoveSet {
        to_left: to_left.into_iter().collect(),
        to_right: to_right.into_iter().collect(),
        to_left_bytes: 0,
        to_right_bytes: 0,
    }
}

/// Plans, performs and verifies game data moves, and removes stale data.
pub struct GameDataMover<L> {
    libraries: L,
    settings: GameDataSettings,
    state: Option<StateManager>,
    metrics: Option<Arc<Metrics>>,
}

impl<L: LibrarySource> GameDataMover<L> {
    pub fn new(libraries: L, settings: GameDataSettings) -> Self {
        Self {
            libraries,
            settings,
            state: None,
            metrics: None,
        }
    }

    pub fn with_state(mut self, state: StateManager) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> &GameDataSettings {
        &self.settings
    }

    /// Data directories for `root`, creating the tool-owned ones on
    /// external roots.
    pub fn location(&self, root: &Utf8Path) -> Result<DataLocation, GameDataError> {
        if self.settings.is_steam_root(root) {
            return Ok(DataLocation {
                root: root.to_path_buf(),
                compat: self.settings.steam_compat_root(),
                shader: self.settings.steam_shader_root(),
                canonical: true,
            });
        }

        let base = root.join(&self.settings.external_dir_name);
        let compat = base.join("compatdata");
        let shader = base.join("shadercache");
        for dir in [&compat, &shader] {
            fs::create_dir_all(dir).map_err(|source| GameDataError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }

        Ok(DataLocation {
            root: root.to_path_buf(),
            compat,
            shader,
            canonical: false,
        })
    }

    pub fn storage_status(
        &self,
        left: &DataLocation,
        right: &DataLocation,
    ) -> Result<StorageStatus, GameDataError> {
        Ok(StorageStatus {
            left_compat: list(&left.compat)?,
            left_shader: list(&left.shader)?,
            right_compat: list(&right.compat)?,
            right_shader: list(&right.shader)?,
        })
    }

    /// Work out which games need to move between `left` and `right`, and
    /// how many bytes each side will receive.
    pub fn plan(&self, left: &Utf8Path, right: &Utf8Path) -> Result<MoveSet, GameDataError> {
        if left == right {
            return Err(GameDataError::SameRoots(left.to_path_buf()));
        }

        let libraries = self.libraries.libraries()?;
        let left_loc = self.location(left)?;
        let right_loc = self.location(right)?;
        let status = self.storage_status(&left_loc, &right_loc)?;

        let mut moves = diff(&libraries, &status, left, right);
        moves.to_left_bytes = data_size(&right_loc, &moves.to_left);
        moves.to_right_bytes = data_size(&left_loc, &moves.to_right);

        tracing::info!(
            "{} game(s) to move left ({} bytes), {} to move right ({} bytes)",
            moves.to_left.len(),
            moves.to_left_bytes,
            moves.to_right.len(),
            moves.to_right_bytes
        );
        Ok(moves)
    }

    /// Move every queued game, stopping at the first failure.
    pub async fn move_game_data(
        &self,
        moves: &MoveSet,
        left: &Utf8Path,
        right: &Utf8Path,
    ) -> Result<(), GameDataError> {
        let left_loc = self.location(left)?;
        let right_loc = self.location(right)?;

        if let Some(state) = &self.state {
            state.start_move(moves.total());
        }

        let result = self.move_all(moves, &left_loc, &right_loc).await;

        if let Some(state) = &self.state {
            if let Err(e) = &result {
                state.record_error(e.to_string());
            }
            state.finish_move();
        }
        result
    }

    async fn move_all(
        &self,
        moves: &MoveSet,
        left: &DataLocation,
        right: &DataLocation,
    ) -> Result<(), GameDataError> {
        for &id in &moves.to_left {
            tracing::info!("Moving {} left...", id);
            self.move_one(id, right, left).await?;
        }
        for &id in &moves.to_right {
            tracing::info!("Moving {} right...", id);
            self.move_one(id, left, right).await?;
        }
        Ok(())
    }

    async fn move_one(
        &self,
        id: u32,
        from: &DataLocation,
        to: &DataLocation,
    ) -> Result<(), GameDataError> {
        let name = id.to_string();
        if let Some(state) = &self.state {
            state.begin_game(&name);
        }

        let steam_compat = self.settings.steam_compat_root();
        let steam_shader = self.settings.steam_shader_root();

        // The canonical entry is replaced either by real data or a new link
        for canonical in [steam_compat.join(&name), steam_shader.join(&name)] {
            if is_symlink(&canonical) {
                fs::remove_file(&canonical).map_err(|source| GameDataError::Remove {
                    path: canonical.clone(),
                    source,
                })?;
            }
        }

        for (src_root, dest_root) in [(&from.compat, &to.compat), (&from.shader, &to.shader)] {
            let src = src_root.join(&name);
            let dest = dest_root.join(&name);
            copy_blocking(src, dest).await?;
        }

        for src_root in [&from.compat, &from.shader] {
            let src = src_root.join(&name);
            tracing::info!("Removing old {}", src);
            remove_blocking(src).await?;
            self.wait_for_deletion(src_root, &name).await?;
        }

        if !to.canonical {
            tracing::info!("Creating symlink to new path on internal drive...");
            for (target_root, steam_root) in
                [(&to.compat, &steam_compat), (&to.shader, &steam_shader)]
            {
                fs::create_dir_all(steam_root).map_err(|source| GameDataError::CreateDir {
                    path: steam_root.clone(),
                    source,
                })?;
                let target = target_root.join(&name);
                let link = steam_root.join(&name);
                std::os::unix::fs::symlink(&target, &link)
                    .map_err(|source| GameDataError::Symlink { link, target, source })?;
            }
        }

        if let Some(state) = &self.state {
            state.complete_game(&name);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_game_moved();
        }
        Ok(())
    }

    /// Poll `parent` until `name` no longer shows up in a fresh listing.
    async fn wait_for_deletion(&self, parent: &Utf8Path, name: &str) -> Result<(), GameDataError> {
        let timeout = self.settings.deletion_timeout();
        let poll = self.settings.deletion_poll_interval();

        let wait = async {
            while entry_listed(parent, name) {
                tokio::time::sleep(poll).await;
            }
        };

        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            tracing::error!("{}/{} was not deleted within {:?}", parent, name, timeout);
            GameDataError::DeletionTimeout {
                path: parent.join(name),
                timeout,
            }
        })
    }

    /// Re-scan both sides and report every queued game still on its
    /// original side.
    pub fn verify(
        &self,
        moves: &MoveSet,
        left: &Utf8Path,
        right: &Utf8Path,
    ) -> Result<(), GameDataError> {
        let status = self.storage_status(&self.location(left)?, &self.location(right)?)?;

        let mut unmoved = Vec::new();
        for id in &moves.to_left {
            let name = id.to_string();
            if status.right_compat.contains(&name) || status.right_shader.contains(&name) {
                unmoved.push(name);
            }
        }
        for id in &moves.to_right {
            let name = id.to_string();
            if status.left_compat.contains(&name) || status.left_shader.contains(&name) {
                unmoved.push(name);
            }
        }

        if unmoved.is_empty() {
            Ok(())
        } else {
            Err(GameDataError::Unmoved(unmoved))
        }
    }

    /// Plan, move and verify in one go. Returns what was moved.
    pub async fn sync(&self, left: &Utf8Path, right: &Utf8Path) -> Result<MoveSet, GameDataError> {
        let moves = self.plan(left, right)?;
        if moves.is_empty() {
            tracing::info!("Game data is already where it belongs");
            return Ok(moves);
        }

        self.move_game_data(&moves, left, right).await?;
        self.verify(&moves, left, right)?;
        Ok(moves)
    }

    /// Compat and shader directories on the internal drive and every drive
    /// mounted under the configured mount root.
    pub fn data_locations(&self) -> Result<Vec<Utf8PathBuf>, GameDataError> {
        let mut locations = vec![
            self.settings.steam_compat_root(),
            self.settings.steam_shader_root(),
        ];

        let drives = attached_drives(&self.settings.mountinfo, &self.settings.mount_root)
            .map_err(|source| GameDataError::Mounts {
                path: self.settings.mountinfo.clone(),
                source,
            })?;
        for drive in drives {
            let base = drive.join(&self.settings.external_dir_name);
            locations.push(base.join("compatdata"));
            locations.push(base.join("shadercache"));
        }

        Ok(locations)
    }

    /// Game IDs with data under `locations` that no library has installed.
    ///
    /// Only numeric, non-zero names up to the configured maximum count;
    /// larger IDs belong to Proton and runtime tools.
    pub fn uninstalled_game_ids(
        &self,
        locations: &[Utf8PathBuf],
    ) -> Result<Vec<u32>, GameDataError> {
        let installed: BTreeSet<u32> = self
            .libraries
            .libraries()?
            .into_iter()
            .flat_map(|library| library.installed_game_ids)
            .collect();

        let mut uninstalled = BTreeSet::new();
        for location in locations {
            let entries = match fs::read_dir(location) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(source) => {
                    return Err(GameDataError::ListDir {
                        path: location.clone(),
                        source,
                    });
                }
            };
            for entry in entries.flatten() {
                let Ok(id) = entry.file_name().to_string_lossy().parse::<u32>() else {
                    continue;
                };
                if id != 0 && id <= self.settings.max_app_id && !installed.contains(&id) {
                    uninstalled.insert(id);
                }
            }
        }

        Ok(uninstalled.into_iter().collect())
    }

    /// Delete every `<location>/<id>`, continuing past failures. Returns the
    /// number of entries removed.
    pub fn remove_game_data(
        &self,
        ids: &[u32],
        locations: &[Utf8PathBuf],
    ) -> Result<usize, GameDataError> {
        tracing::info!("Removing the following content:");
        let mut removed = 0;
        let mut failures = Vec::new();

        for id in ids {
            for location in locations {
                let path = location.join(id.to_string());
                match remove_entry(&path) {
                    Ok(true) => {
                        tracing::info!("{}", path);
                        removed += 1;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!("Failed to remove {}: {}", path, e);
                        failures.push(format!("{}: {}", path, e));
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(removed)
        } else {
            Err(GameDataError::Cleanup(failures))
        }
    }
}

fn list(path: &Utf8Path) -> Result<IndexSet<String>, GameDataError> {
    list_subdirs(path).map_err(|source| GameDataError::ListDir {
        path: path.to_path_buf(),
        source,
    })
}

fn data_size(location: &DataLocation, ids: &[u32]) -> u64 {
    ids.iter()
        .map(|id| {
            let name = id.to_string();
            dir_size(&location.compat.join(&name)) + dir_size(&location.shader.join(&name))
        })
        .sum()
}

fn is_symlink(path: &Utf8Path) -> bool {
    path.symlink_metadata()
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

fn entry_listed(parent: &Utf8Path, name: &str) -> bool {
    fs::read_dir(parent)
        .map(|entries| entries.flatten().any(|entry| entry.file_name() == name))
        .unwrap_or(false)
}

/// Remove a directory tree, file or symlink. `Ok(false)` if nothing was there.
fn remove_entry(path: &Utf8Path) -> io::Result<bool> {
    match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).map(|()| true),
        Ok(_) => fs::remove_file(path).map(|()| true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

async fn copy_blocking(src: Utf8PathBuf, dest: Utf8PathBuf) -> Result<(), GameDataError> {
    tokio::task::spawn_blocking(move || {
        copy_tree(&src, &dest).map_err(|source| GameDataError::Copy {
            from: src.clone(),
            to: dest.clone(),
            source,
        })
    })
    .await?
}

async fn remove_blocking(path: Utf8PathBuf) -> Result<(), GameDataError> {
    tokio::task::spawn_blocking(move || {
        remove_entry(&path)
            .map(|_| ())
            .map_err(|source| GameDataError::Remove {
                path: path.clone(),
                source,
            })
    })
    .await?
}
