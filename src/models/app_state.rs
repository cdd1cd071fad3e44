use crate::models::Tunable;
use indexmap::IndexMap;
use std::fmt;

/// Step of a swap resize.
///
/// A resize walks `Disabling -> Resizing -> Permissioning -> Activating`
/// strictly in order and ends in `Idle` on success or `Failed` on the first
/// error. Nothing is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwapPhase {
    #[default]
    Idle,
    Disabling,
    Resizing,
    Permissioning,
    Activating,
    Failed,
}

impl SwapPhase {
    /// True while a resize is between its first and last step.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SwapPhase::Disabling | SwapPhase::Resizing | SwapPhase::Permissioning | SwapPhase::Activating
        )
    }
}

impl fmt::Display for SwapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SwapPhase::Idle => "idle",
            SwapPhase::Disabling => "disabling swap",
            SwapPhase::Resizing => "resizing swap file",
            SwapPhase::Permissioning => "setting permissions",
            SwapPhase::Activating => "activating swap",
            SwapPhase::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// Single source of truth for what the tool is doing right now.
///
/// Wrapped in `Arc<RwLock<AppState>>` by [`crate::state::StateManager`];
/// always mutate it through the manager so change events are emitted.
#[derive(Clone, Debug, Default)]
pub struct AppState {
    // Swap resize
    pub swap_phase: SwapPhase,
    pub swap_target_gb: Option<u32>,

    // Game data move
    pub is_moving: bool,
    pub move_completed: usize,
    pub move_total: usize,
    pub current_game: Option<String>,
    pub moved_games: Vec<String>,

    // Last value observed or written per tunable
    pub tweak_values: IndexMap<Tunable, String>,

    pub current_operation: String,
    pub last_error: Option<String>,
}

impl AppState {
    /// Whether a resize or move is in flight.
    ///
    /// Neither operation is re-entrant; callers check this before starting
    /// another one.
    pub fn is_busy(&self) -> bool {
        self.swap_phase.is_active() || self.is_moving
    }

    /// Fraction of queued games moved so far, in `0.0..=1.0`.
    pub fn move_fraction(&self) -> f64 {
        if self.move_total == 0 {
            0.0
        } else {
            self.move_completed as f64 / self.move_total as f64
        }
    }

    /// Reset move progress before a new sync.
    pub fn reset_move_state(&mut self) {
        self.is_moving = false;
        self.move_completed = 0;
        self.move_total = 0;
        self.current_game = None;
        self.moved_games.clear();
    }

    /// Reset everything except the observed tweak values.
    pub fn reset(&mut self) {
        self.reset_move_state();
        self.swap_phase = SwapPhase::Idle;
        self.swap_target_gb = None;
        self.current_operation.clear();
        self.last_error = None;
    }

    /// One-line progress text, e.g. `Moving 620 (1/3)`.
    pub fn move_summary(&self) -> String {
        match &self.current_game {
            Some(game) if self.is_moving => {
                format!("Moving {} ({}/{})", game, self.move_completed + 1, self.move_total)
            }
            _ if self.move_total > 0 => format!("Moved {}/{}", self.move_completed, self.move_total),
            _ => String::new(),
        }
    }
}
