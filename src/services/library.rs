//! Steam library discovery.

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

/// Directory name Steam suggests for libraries added by hand.
const MANUAL_LIBRARY_DIR: &str = "SteamLibrary";

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("failed to read Steam installation at {root}: {source}")]
    Locate {
        root: Utf8PathBuf,
        #[source]
        source: steamlocate::Error,
    },

    #[error("malformed library entry in {root}: {source}")]
    Entry {
        root: Utf8PathBuf,
        #[source]
        source: steamlocate::Error,
    },

    #[error("library path {0:?} is not valid UTF-8")]
    NonUtf8Path(PathBuf),
}

/// A Steam library folder and the games installed in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Library {
    pub path: Utf8PathBuf,
    pub installed_game_ids: BTreeSet<u32>,
}

impl Library {
    /// Build a library, reducing a trailing `SteamLibrary` component to its
    /// parent so a manually added library maps to its drive.
    pub fn new(path: impl Into<Utf8PathBuf>, installed_game_ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            path: normalize_library_path(path.into()),
            installed_game_ids: installed_game_ids.into_iter().collect(),
        }
    }

    /// Whether the library lives on (or below) `root`.
    pub fn is_under(&self, root: &Utf8Path) -> bool {
        self.path.starts_with(root)
    }
}

pub fn normalize_library_path(path: Utf8PathBuf) -> Utf8PathBuf {
    if path.file_name() == Some(MANUAL_LIBRARY_DIR) {
        if let Some(parent) = path.parent() {
            return parent.to_path_buf();
        }
    }
    path
}

/// Source of the Steam library list.
pub trait LibrarySource: Send + Sync {
    fn libraries(&self) -> Result<Vec<Library>, LibraryError>;
}

/// Reads `steamapps/libraryfolders.vdf` of a Steam installation.
#[derive(Debug, Clone)]
pub struct SteamLibraries {
    steam_root: Utf8PathBuf,
}

impl SteamLibraries {
    pub fn new(steam_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            steam_root: steam_root.into(),
        }
    }
}

impl LibrarySource for SteamLibraries {
    fn libraries(&self) -> Result<Vec<Library>, LibraryError> {
        let steam_dir =
            steamlocate::SteamDir::from_dir(self.steam_root.as_std_path()).map_err(|source| {
                LibraryError::Locate {
                    root: self.steam_root.clone(),
                    source,
                }
            })?;
        let entries = steam_dir.libraries().map_err(|source| LibraryError::Locate {
            root: self.steam_root.clone(),
            source,
        })?;

        let mut libraries = Vec::new();
        for entry in entries {
            let library = entry.map_err(|source| LibraryError::Entry {
                root: self.steam_root.clone(),
                source,
            })?;
            let path = Utf8PathBuf::from_path_buf(library.path().to_path_buf())
                .map_err(LibraryError::NonUtf8Path)?;

            let library = Library::new(path, library.app_ids().iter().copied());
            tracing::debug!(
                "Found library {} with {} game(s)",
                library.path,
                library.installed_game_ids.len()
            );
            libraries.push(library);
        }

        Ok(libraries)
    }
}
