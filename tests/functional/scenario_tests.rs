//! Failure-injection scenarios for the migration state machine.

use migration_operator::crd::MigrationPhase;

use crate::mock_state::MockMigrationState;

#[test]
fn test_failure_in_each_active_phase_is_terminal() {
    let phases = [
        MigrationPhase::Pending,
        MigrationPhase::PreFlight,
        MigrationPhase::Freeze,
        MigrationPhase::Migrate,
        MigrationPhase::Finalize,
    ];

    for fail_phase in phases {
        let mut state = MockMigrationState::new("doomed", 3).with_failure_in(fail_phase);

        let observed = state.run_to_completion(20);

        assert_eq!(
            state.phase,
            MigrationPhase::Failed,
            "failure injected in {:?} must end in Failed",
            fail_phase
        );
        assert_eq!(*observed.last().unwrap(), MigrationPhase::Failed);
        assert!(state.last_error.is_some());
    }
}

#[test]
fn test_preflight_conflict_leaves_source_untouched() {
    // A conflicting StatefulSet in the destination fails pre-flight before
    // any source mutation: no volumes preserved, nothing migrated.
    let mut state = MockMigrationState::new("conflict", 3).with_failure_in(MigrationPhase::PreFlight);

    state.run_to_completion(10);

    assert_eq!(state.phase, MigrationPhase::Failed);
    assert!(state.preserved_volumes.is_empty());
    assert!(state.migrated.is_empty());
    assert_eq!(state.current_index, 0);
}

#[test]
fn test_stuck_detachment_at_index_one() {
    // Index 0 migrates; index 1's volume never detaches. The migration fails
    // with index 0's work intact and currentIndex parked at 1.
    let mut state = MockMigrationState::new("stuck", 3).with_failure_at_index(1);

    state.run_to_completion(20);

    assert_eq!(state.phase, MigrationPhase::Failed);
    assert_eq!(state.migrated, vec![0]);
    assert_eq!(state.current_index, 1);
    // Freeze already ran, so the volumes stay preserved for the operator.
    assert_eq!(state.preserved_volumes.len(), 3);
}

#[test]
fn test_failure_at_first_index() {
    let mut state = MockMigrationState::new("early", 2).with_failure_at_index(0);

    state.run_to_completion(20);

    assert_eq!(state.phase, MigrationPhase::Failed);
    assert!(state.migrated.is_empty());
    assert_eq!(state.current_index, 0);
}

#[test]
fn test_failure_at_last_index() {
    let mut state = MockMigrationState::new("late", 3).with_failure_at_index(2);

    state.run_to_completion(20);

    assert_eq!(state.phase, MigrationPhase::Failed);
    assert_eq!(state.migrated, vec![0, 1]);
    assert_eq!(state.current_index, 2);
}

#[test]
fn test_terminal_stability_after_failure() {
    let mut state = MockMigrationState::new("frozen-failed", 3).with_failure_at_index(1);
    state.run_to_completion(20);
    assert_eq!(state.phase, MigrationPhase::Failed);

    let snapshot = state.clone();
    for _ in 0..5 {
        state.step();
    }
    assert_eq!(state.phase, MigrationPhase::Failed);
    assert_eq!(state.current_index, snapshot.current_index);
    assert_eq!(state.migrated, snapshot.migrated);
}

#[test]
fn test_resumed_migration_continues_from_current_index() {
    // A controller restart re-enters the loop at the persisted index: model
    // that by building state mid-migration and letting it run.
    let mut state = MockMigrationState::new("resumed", 4);
    state.phase = MigrationPhase::Migrate;
    state.total_replicas = 4;
    state.current_index = 2;
    state.migrated = vec![0, 1];
    state.preserved_volumes = (0..4).map(|i| format!("pv-resumed-{}", i)).collect();

    state.run_to_completion(10);

    assert_eq!(state.phase, MigrationPhase::Completed);
    assert_eq!(state.migrated, vec![0, 1, 2, 3]);
    assert_eq!(state.current_index, 4);
}
