//! Mock infrastructure for simulating migration state in functional tests.
//!
//! `MockMigrationState` models the observable status of a
//! StatefulSetMigration (phase, current index, migrated list) and delegates
//! every transition to the production `MigrationStateMachine`. The mock only
//! simulates the external world (whether a phase's work succeeded); it never
//! re-implements transition rules.

use migration_operator::controller::state_machine::{
    MigrationEvent, MigrationStateMachine, TransitionContext, TransitionResult,
};
use migration_operator::crd::MigrationPhase;

/// Mock migration state driven through the real transition table.
#[derive(Debug, Clone)]
pub struct MockMigrationState {
    /// Migration name, used in generated PV names.
    pub name: String,
    /// Total replicas captured at pre-flight.
    pub total_replicas: i32,
    /// Index the migrate loop is positioned at.
    pub current_index: i32,
    /// Current phase.
    pub phase: MigrationPhase,
    /// Indices recorded as migrated, in completion order.
    pub migrated: Vec<i32>,
    /// PV names recorded during Freeze.
    pub preserved_volumes: Vec<String>,
    /// Error recorded when the migration fails.
    pub last_error: Option<String>,
    /// Inject a failure when this phase's work runs.
    pub fail_in_phase: Option<MigrationPhase>,
    /// Inject a failure when migrating this index (e.g. stuck detachment).
    pub fail_at_index: Option<i32>,
}

impl MockMigrationState {
    /// New migration in Pending, as the controller first observes it.
    pub fn new(name: &str, total_replicas: i32) -> Self {
        Self {
            name: name.to_string(),
            total_replicas,
            current_index: 0,
            phase: MigrationPhase::Pending,
            migrated: Vec::new(),
            preserved_volumes: Vec::new(),
            last_error: None,
            fail_in_phase: None,
            fail_at_index: None,
        }
    }

    /// Fail when the given phase's work runs.
    pub fn with_failure_in(mut self, phase: MigrationPhase) -> Self {
        self.fail_in_phase = Some(phase);
        self
    }

    /// Fail while migrating the given index.
    pub fn with_failure_at_index(mut self, index: i32) -> Self {
        self.fail_at_index = Some(index);
        self
    }

    /// Perform one reconcile-equivalent step and return the phase after it.
    ///
    /// Terminal phases are stable: stepping a Completed or Failed migration
    /// changes nothing.
    pub fn step(&mut self) -> MigrationPhase {
        if self.phase.is_terminal() {
            return self.phase;
        }

        if self.fail_in_phase == Some(self.phase) {
            self.fail(format!("injected failure in {}", self.phase));
            return self.phase;
        }

        let event = match self.phase {
            MigrationPhase::Pending => MigrationEvent::MigrationStarted,
            MigrationPhase::PreFlight => MigrationEvent::ChecksPassed,
            MigrationPhase::Freeze => {
                self.preserved_volumes = (0..self.total_replicas)
                    .map(|i| format!("pv-{}-{}", self.name, i))
                    .collect();
                self.current_index = 0;
                MigrationEvent::SourceFrozen
            }
            MigrationPhase::Migrate => {
                if self.current_index < self.total_replicas {
                    if self.fail_at_index == Some(self.current_index) {
                        self.fail(format!(
                            "injected failure migrating index {}",
                            self.current_index
                        ));
                        return self.phase;
                    }
                    MigrationEvent::IndexMigrated
                } else {
                    MigrationEvent::IndicesExhausted
                }
            }
            MigrationPhase::Finalize => MigrationEvent::CleanupFinished,
            MigrationPhase::Completed | MigrationPhase::Failed => unreachable!(),
        };

        self.apply(event);
        self.phase
    }

    /// Step until a terminal phase is reached, returning the phase observed
    /// after each step. Panics after `max_steps` to catch livelock.
    pub fn run_to_completion(&mut self, max_steps: usize) -> Vec<MigrationPhase> {
        let mut observed = Vec::new();
        for _ in 0..max_steps {
            observed.push(self.step());
            if self.phase.is_terminal() {
                return observed;
            }
        }
        panic!(
            "migration did not reach a terminal phase in {} steps (stuck at {})",
            max_steps, self.phase
        );
    }

    fn apply(&mut self, event: MigrationEvent) {
        let sm = MigrationStateMachine::new();
        let ctx = TransitionContext::new(self.current_index, self.total_replicas);
        match sm.transition(&self.phase, event, &ctx) {
            TransitionResult::Success { to, .. } => {
                if event == MigrationEvent::IndexMigrated {
                    self.migrated.push(self.current_index);
                    self.current_index += 1;
                }
                self.phase = to;
            }
            other => panic!(
                "transition from {} on {} rejected: {:?}",
                self.phase, event, other
            ),
        }
    }

    fn fail(&mut self, reason: String) {
        let sm = MigrationStateMachine::new();
        let ctx = TransitionContext::new(self.current_index, self.total_replicas);
        match sm.transition(&self.phase, MigrationEvent::MigrationFailed, &ctx) {
            TransitionResult::Success { to, .. } => {
                self.phase = to;
                self.last_error = Some(reason);
            }
            other => panic!("failure transition from {} rejected: {:?}", self.phase, other),
        }
    }
}

/// Expected phase sequences for common lifecycles.
pub mod expected_sequences {
    use migration_operator::crd::MigrationPhase;

    /// Phases observed per step for a successful migration of `replicas` pods:
    /// PreFlight, Freeze, Migrate (entry), one Migrate per index, Finalize,
    /// Completed.
    pub fn happy_path(replicas: i32) -> Vec<MigrationPhase> {
        let mut seq = vec![
            MigrationPhase::PreFlight,
            MigrationPhase::Freeze,
            MigrationPhase::Migrate,
        ];
        for _ in 0..replicas {
            seq.push(MigrationPhase::Migrate);
        }
        seq.push(MigrationPhase::Finalize);
        seq.push(MigrationPhase::Completed);
        seq
    }
}
