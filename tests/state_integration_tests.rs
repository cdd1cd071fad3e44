//! Integration tests for StateManager with state change events
//!
//! These tests verify that the StateManager correctly:
//! - Emits state change events on mutations
//! - Supports multiple subscribers
//! - Handles concurrent access from multiple threads
//! - Maintains consistency across a full move

use decktune::{StateChange, StateManager, SwapPhase, Tunable};
use std::sync::Arc;
use std::thread;
use tokio::time::{Duration, timeout};

async fn next_event(rx: &mut tokio::sync::broadcast::Receiver<StateChange>) -> StateChange {
    timeout(Duration::from_millis(100), rx.recv())
        .await
        .expect("Timeout waiting for event")
        .expect("Channel closed")
}

#[tokio::test]
async fn test_state_change_events_emitted() {
    let state = StateManager::new();
    let mut rx = state.subscribe();

    state.start_move(2);

    let event = next_event(&mut rx).await;
    assert!(
        matches!(event, StateChange::MoveStarted { total: 2 }),
        "Expected MoveStarted event, got: {:?}",
        event
    );
}

#[tokio::test]
async fn test_multiple_subscribers_receive_events() {
    let state = StateManager::new();
    let mut receivers = vec![state.subscribe(), state.subscribe(), state.subscribe()];

    state.set_swap_phase(SwapPhase::Disabling);

    for rx in &mut receivers {
        assert_eq!(
            next_event(rx).await,
            StateChange::SwapPhaseChanged {
                phase: SwapPhase::Disabling
            }
        );
    }
}

#[tokio::test]
async fn test_full_move_event_sequence() {
    let state = StateManager::new();
    let mut rx = state.subscribe();

    state.start_move(2);
    for game in ["620", "1091500"] {
        state.begin_game(game);
        state.complete_game(game);
    }
    state.finish_move();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    assert_eq!(events.first(), Some(&StateChange::MoveStarted { total: 2 }));
    assert!(events.contains(&StateChange::MoveProgressUpdated {
        completed: 0,
        total: 2,
        current_game: Some("620".to_string()),
    }));
    assert!(events.contains(&StateChange::MoveProgressUpdated {
        completed: 2,
        total: 2,
        current_game: None,
    }));
    assert!(events.contains(&StateChange::MoveFinished { moved: 2 }));

    let snapshot = state.snapshot();
    assert_eq!(snapshot.moved_games, vec!["620", "1091500"]);
    assert!(!snapshot.is_busy());
}

#[tokio::test]
async fn test_reset_event() {
    let state = StateManager::new();
    state.set_swap_phase(SwapPhase::Failed);
    let mut rx = state.subscribe();

    state.reset();

    let mut saw_reset = false;
    while let Ok(event) = timeout(Duration::from_millis(100), rx.recv()).await {
        if matches!(event, Ok(StateChange::StateReset)) {
            saw_reset = true;
            break;
        }
    }
    assert!(saw_reset);
    assert_eq!(state.snapshot().swap_phase, SwapPhase::Idle);
}

#[test]
fn test_concurrent_tweak_updates() {
    let state = Arc::new(StateManager::new());

    let handles: Vec<_> = Tunable::ALL
        .into_iter()
        .map(|tunable| {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                state.record_tweak(tunable, tunable.recommended());
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let values = state.read(|s| s.tweak_values.clone());
    assert_eq!(values.len(), Tunable::ALL.len());
    for tunable in Tunable::ALL {
        assert_eq!(values.get(&tunable).map(String::as_str), Some(tunable.recommended()));
    }
}

#[test]
fn test_concurrent_move_progress() {
    let state = StateManager::new();
    state.start_move(50);

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let state = state.clone();
            thread::spawn(move || {
                state.complete_game(&i.to_string());
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let snapshot = state.snapshot();
    assert_eq!(snapshot.move_completed, 50);
    assert_eq!(snapshot.moved_games.len(), 50);
    assert_eq!(snapshot.move_fraction(), 1.0);
}

#[test]
fn test_no_subscribers_is_fine() {
    let state = StateManager::new();
    let changes = state.set_swap_phase(SwapPhase::Resizing);
    assert!(!changes.is_empty());
}
