// State management module
//
// This module provides the StateManager which wraps AppState with thread-safe access
// using Arc<RwLock<T>> and emits change events for whoever renders progress.

use crate::models::{AppState, SwapPhase, Tunable};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

/// Change events emitted when state is modified
///
/// These events let a front end follow a long resize or move without
/// polling the state.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// A swap resize moved to a new step
    SwapPhaseChanged { phase: SwapPhase },

    /// A game data move has started
    MoveStarted { total: usize },

    /// One more game finished moving, or the game being moved changed
    MoveProgressUpdated {
        completed: usize,
        total: usize,
        current_game: Option<String>,
    },

    /// The game data move has finished
    MoveFinished { moved: usize },

    /// A tunable was read or written
    TweakChanged { tunable: Tunable, value: String },

    /// Current operation has changed
    OperationChanged { operation: String },

    /// State has been reset
    StateReset,
}

/// Thread-safe state manager with event emission
///
/// - [`read()`](Self::read) for reading state
/// - [`update()`](Self::update) for mutations with automatic event emission
/// - [`subscribe()`](Self::subscribe) for listening to state changes
///
/// Cloning is cheap and every clone shares the same state and channel.
pub struct StateManager {
    state: Arc<RwLock<AppState>>,
    state_tx: broadcast::Sender<StateChange>,
}

impl StateManager {
    /// Create a new StateManager with default state and a 100 event buffer
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(AppState::default())),
            state_tx,
        }
    }

    // A panic while holding the lock cannot leave AppState half-written in a way
    // that matters here, so poisoning is ignored.
    fn read_guard(&self) -> RwLockReadGuard<'_, AppState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, AppState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get a cloned snapshot of the current state
    pub fn snapshot(&self) -> AppState {
        self.read_guard().clone()
    }

    /// Execute a function with read access to the state
    ///
    /// # Example
    /// ```ignore
    /// let busy = state_manager.read(|state| state.is_busy());
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&AppState) -> R,
    {
        f(&self.read_guard())
    }

    /// Update the state and emit change events
    ///
    /// Captures the old state, applies `update_fn`, diffs the two and sends
    /// one event per detected change. Returns the emitted events.
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut AppState),
    {
        let mut state = self.write_guard();
        let old_state = state.clone();

        update_fn(&mut state);

        let changes = Self::detect_changes(&old_state, &state);

        for change in &changes {
            // Ignore send errors - it's OK if no one is listening
            let _ = self.state_tx.send(change.clone());
        }

        changes
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    fn detect_changes(old: &AppState, new: &AppState) -> Vec<StateChange> {
        let mut changes = Vec::new();

        if old.swap_phase != new.swap_phase {
            changes.push(StateChange::SwapPhaseChanged {
                phase: new.swap_phase,
            });
        }

        if old.is_moving != new.is_moving {
            if new.is_moving {
                changes.push(StateChange::MoveStarted {
                    total: new.move_total,
                });
            } else {
                changes.push(StateChange::MoveFinished {
                    moved: new.moved_games.len(),
                });
            }
        }

        if old.move_completed != new.move_completed
            || old.move_total != new.move_total
            || old.current_game != new.current_game
        {
            changes.push(StateChange::MoveProgressUpdated {
                completed: new.move_completed,
                total: new.move_total,
                current_game: new.current_game.clone(),
            });
        }

        for (tunable, value) in &new.tweak_values {
            if old.tweak_values.get(tunable) != Some(value) {
                changes.push(StateChange::TweakChanged {
                    tunable: *tunable,
                    value: value.clone(),
                });
            }
        }

        if old.current_operation != new.current_operation {
            changes.push(StateChange::OperationChanged {
                operation: new.current_operation.clone(),
            });
        }

        changes
    }

    // Convenience methods used by the services

    /// Record the current step of a swap resize
    pub fn set_swap_phase(&self, phase: SwapPhase) -> Vec<StateChange> {
        self.update(|state| {
            state.swap_phase = phase;
            state.current_operation = phase.to_string();
        })
    }

    /// Start a swap resize towards `size_gb`
    pub fn start_swap_resize(&self, size_gb: u32) -> Vec<StateChange> {
        self.update(|state| {
            state.swap_target_gb = Some(size_gb);
            state.last_error = None;
        })
    }

    /// Start a game data move of `total` games
    pub fn start_move(&self, total: usize) -> Vec<StateChange> {
        self.update(|state| {
            state.reset_move_state();
            state.is_moving = true;
            state.move_total = total;
            state.current_operation = "Moving game data...".to_string();
            state.last_error = None;
        })
    }

    /// Mark `game` as the one currently being moved
    pub fn begin_game(&self, game: &str) -> Vec<StateChange> {
        self.update(|state| {
            state.current_game = Some(game.to_string());
        })
    }

    /// Record that `game` finished moving
    pub fn complete_game(&self, game: &str) -> Vec<StateChange> {
        self.update(|state| {
            state.move_completed += 1;
            state.moved_games.push(game.to_string());
            state.current_game = None;
        })
    }

    /// Finish a game data move
    pub fn finish_move(&self) -> Vec<StateChange> {
        self.update(|state| {
            state.is_moving = false;
            state.current_game = None;
            state.current_operation.clear();
        })
    }

    /// Record the latest known value of a tunable
    pub fn record_tweak(&self, tunable: Tunable, value: &str) -> Vec<StateChange> {
        self.update(|state| {
            state.tweak_values.insert(tunable, value.to_string());
        })
    }

    /// Record an error message for display
    pub fn record_error(&self, message: String) -> Vec<StateChange> {
        self.update(|state| {
            state.last_error = Some(message);
        })
    }

    /// Reset all operation state
    pub fn reset(&self) -> Vec<StateChange> {
        let mut changes = self.update(|state| state.reset());

        let reset_event = StateChange::StateReset;
        let _ = self.state_tx.send(reset_event.clone());
        changes.push(reset_event);

        changes
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for StateManager {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: self.state_tx.clone(),
        }
    }
}
