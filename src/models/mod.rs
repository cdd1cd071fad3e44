//! Data models for decktune.
//!
//! - [`Tunable`]: the closed registry of six kernel parameters, each carrying its kernel
//!   path, recommended value and stock value
//! - [`TuneConfig`]: paths, sizes and thresholds loaded from `decktune.yaml`
//! - [`AppState`]: what the tool is doing right now (swap resize phase, move progress)
//! - [`GIB`]: the unit every swap size is expressed in
//!
//! The value objects produced by the services (swap state, storage listings, move sets)
//! live next to the service that computes them.

pub mod app_state;
pub mod config;
pub mod tunable;

pub use app_state::{AppState, SwapPhase};
pub use config::{
    CommandSettings, GIB, GameDataSettings, KernelSettings, SwapSettings, TuneConfig, home_dir,
};
pub use tunable::{Tunable, UnknownTunable};
