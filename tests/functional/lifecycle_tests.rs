//! Full lifecycle tests for successful migrations of various sizes.

use migration_operator::crd::MigrationPhase;

use crate::mock_state::{expected_sequences, MockMigrationState};

#[test]
fn test_happy_path_three_replicas() {
    let mut state = MockMigrationState::new("web", 3);

    let phases = state.run_to_completion(20);

    assert_eq!(phases, expected_sequences::happy_path(3));
    assert_eq!(state.phase, MigrationPhase::Completed);
    assert_eq!(state.current_index, 3);
    assert_eq!(state.migrated, vec![0, 1, 2]);
    assert_eq!(
        state.preserved_volumes,
        vec!["pv-web-0", "pv-web-1", "pv-web-2"]
    );
    assert!(state.last_error.is_none());
}

#[test]
fn test_happy_path_single_replica() {
    let mut state = MockMigrationState::new("solo", 1);

    let phases = state.run_to_completion(10);

    assert_eq!(phases, expected_sequences::happy_path(1));
    assert_eq!(state.migrated, vec![0]);
}

#[test]
fn test_happy_path_five_replicas() {
    let mut state = MockMigrationState::new("wide", 5);

    let phases = state.run_to_completion(20);

    assert_eq!(phases, expected_sequences::happy_path(5));
    assert_eq!(state.current_index, 5);
    assert_eq!(state.migrated, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_zero_replicas_skips_migrate_loop() {
    // A scaled-to-zero StatefulSet has nothing to move: the loop exits on
    // entry and the migration still completes.
    let mut state = MockMigrationState::new("empty", 0);

    state.run_to_completion(10);

    assert_eq!(state.phase, MigrationPhase::Completed);
    assert!(state.migrated.is_empty());
}

#[test]
fn test_migrated_list_is_dense_and_ordered() {
    let mut state = MockMigrationState::new("dense", 7);

    state.run_to_completion(30);

    for (position, index) in state.migrated.iter().enumerate() {
        assert_eq!(*index as usize, position, "migrated[k].index must equal k");
    }
}

#[test]
fn test_current_index_is_monotonic() {
    let mut state = MockMigrationState::new("mono", 4);

    let mut last_index = state.current_index;
    while !state.phase.is_terminal() {
        state.step();
        assert!(
            state.current_index >= last_index,
            "current_index went backwards: {} -> {}",
            last_index,
            state.current_index
        );
        last_index = state.current_index;
    }
}

#[test]
fn test_terminal_stability_after_completion() {
    let mut state = MockMigrationState::new("stable", 2);
    state.run_to_completion(10);
    assert_eq!(state.phase, MigrationPhase::Completed);

    let snapshot = state.clone();
    for _ in 0..5 {
        state.step();
    }
    assert_eq!(state.phase, snapshot.phase);
    assert_eq!(state.current_index, snapshot.current_index);
    assert_eq!(state.migrated, snapshot.migrated);
}

#[test]
fn test_preserved_volumes_recorded_before_first_index() {
    let mut state = MockMigrationState::new("order", 3);

    // Pending -> PreFlight -> Freeze -> Migrate: freeze work has run, no
    // index has migrated yet.
    state.step();
    state.step();
    state.step();

    assert_eq!(state.phase, MigrationPhase::Migrate);
    assert_eq!(state.preserved_volumes.len(), 3);
    assert!(state.migrated.is_empty());
}
