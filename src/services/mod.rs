//! Services module - the system-changing logic behind every command.
//!
//! Nothing here knows about the command line. Every service takes its
//! collaborators explicitly, so tests can swap the privileged command runner,
//! the free space probe and the Steam library source for in-process doubles.
//!
//! # Components
//!
//! - [`CommandRunner`] / [`SystemRunner`]: privileged subprocess execution
//!   (`sudo` by default), capturing stdout and failing on non-zero exit.
//! - [`UnitFileStore`]: boot-time `tmpfiles.d` records, one per tunable set
//!   to a non-default value.
//! - [`TweakService`]: status, enable, revert and toggle for the fixed
//!   registry of kernel tunables.
//! - [`SwapManager`]: swap file discovery, resize with a pre-checked space
//!   budget, and swappiness.
//! - [`GameDataMover`]: keeps Proton prefixes and shader caches on the same
//!   drive as their game, and removes data left by uninstalled games.
//! - [`presets`]: the recommended and stock bundles.
//!
//! # Concurrency
//!
//! Operations are async only so subprocesses and file copies do not block
//! the runtime. They are not re-entrant: a caller must not start a second
//! resize or move while one is running (see
//! [`AppState::is_busy`](crate::models::AppState::is_busy)).

pub mod command;
pub mod game_data;
pub mod library;
pub mod presets;
pub mod swap;
pub mod system;
pub mod tweaks;
pub mod unit_file;

pub use command::{CommandError, CommandRunner, SystemRunner};
pub use game_data::{DataLocation, GameDataError, GameDataMover, MoveSet, StorageStatus};
pub use library::{Library, LibraryError, LibrarySource, SteamLibraries};
pub use presets::{PresetError, apply_recommended, apply_stock};
pub use swap::{SizeKind, SwapError, SwapManager, SwapSizeOption, SwapState};
pub use system::{SpaceProbe, StatvfsProbe};
pub use tweaks::{TweakAction, TweakError, TweakService};
pub use unit_file::{UnitFileError, UnitFileStore};
