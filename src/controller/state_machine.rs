//! Formal finite state machine for the migration lifecycle.
//!
//! The phase handlers compute their work first and then commit a phase
//! change through this table, so an impossible transition surfaces as an
//! explicit error instead of silently corrupting status.

use std::fmt;

use crate::crd::MigrationPhase;

/// Events that trigger phase transitions in the migration lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationEvent {
    /// The migration has been observed and the start time recorded
    MigrationStarted,
    /// Every pre-flight check passed against both clusters
    ChecksPassed,
    /// Reclaim policies patched and the source StatefulSet orphaned
    SourceFrozen,
    /// One pod index finished migrating; the loop continues
    IndexMigrated,
    /// The per-index loop is exhausted
    IndicesExhausted,
    /// Source-side claims and volume objects have been cleaned up
    CleanupFinished,
    /// An unrecoverable error occurred
    MigrationFailed,
}

impl fmt::Display for MigrationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationEvent::MigrationStarted => write!(f, "MigrationStarted"),
            MigrationEvent::ChecksPassed => write!(f, "ChecksPassed"),
            MigrationEvent::SourceFrozen => write!(f, "SourceFrozen"),
            MigrationEvent::IndexMigrated => write!(f, "IndexMigrated"),
            MigrationEvent::IndicesExhausted => write!(f, "IndicesExhausted"),
            MigrationEvent::CleanupFinished => write!(f, "CleanupFinished"),
            MigrationEvent::MigrationFailed => write!(f, "MigrationFailed"),
        }
    }
}

/// Context information available during phase transitions
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext {
    /// Index the migrate loop is positioned at
    pub current_index: i32,
    /// Total number of replicas captured at pre-flight
    pub total_replicas: i32,
}

impl TransitionContext {
    /// Create a new transition context
    pub fn new(current_index: i32, total_replicas: i32) -> Self {
        Self {
            current_index,
            total_replicas,
        }
    }

    /// Whether indices remain to migrate
    pub fn has_remaining_indices(&self) -> bool {
        self.current_index < self.total_replicas
    }
}

/// A phase transition definition
#[derive(Debug)]
pub struct Transition {
    /// Source phase
    pub from: MigrationPhase,
    /// Target phase
    pub to: MigrationPhase,
    /// Event that triggers this transition
    pub event: MigrationEvent,
    /// Human-readable description of this transition
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: MigrationPhase,
        to: MigrationPhase,
        event: MigrationEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a phase transition
#[derive(Debug)]
pub enum TransitionResult {
    /// Transition was successful
    Success {
        from: MigrationPhase,
        to: MigrationPhase,
        event: MigrationEvent,
        description: &'static str,
    },
    /// Transition was not valid for the current phase
    InvalidTransition {
        current: MigrationPhase,
        event: MigrationEvent,
    },
    /// Guard condition prevented the transition
    GuardFailed {
        from: MigrationPhase,
        to: MigrationPhase,
        event: MigrationEvent,
        reason: String,
    },
}

/// Formal state machine for the migration lifecycle
pub struct MigrationStateMachine {
    transitions: Vec<Transition>,
}

impl Default for MigrationStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationStateMachine {
    /// Create a new state machine with the defined transition table
    pub fn new() -> Self {
        Self {
            transitions: vec![
                Transition::new(
                    MigrationPhase::Pending,
                    MigrationPhase::PreFlight,
                    MigrationEvent::MigrationStarted,
                    "Migration observed, starting pre-flight checks",
                ),
                Transition::new(
                    MigrationPhase::PreFlight,
                    MigrationPhase::Freeze,
                    MigrationEvent::ChecksPassed,
                    "Pre-flight checks passed, freezing source",
                ),
                Transition::new(
                    MigrationPhase::Freeze,
                    MigrationPhase::Migrate,
                    MigrationEvent::SourceFrozen,
                    "Source frozen, starting per-index migration",
                ),
                Transition::new(
                    MigrationPhase::Migrate,
                    MigrationPhase::Migrate,
                    MigrationEvent::IndexMigrated,
                    "Pod index migrated, continuing loop",
                ),
                Transition::new(
                    MigrationPhase::Migrate,
                    MigrationPhase::Finalize,
                    MigrationEvent::IndicesExhausted,
                    "All indices migrated, cleaning up source",
                ),
                Transition::new(
                    MigrationPhase::Finalize,
                    MigrationPhase::Completed,
                    MigrationEvent::CleanupFinished,
                    "Source cleanup finished, migration complete",
                ),
                // Any active phase can fail; Completed and Failed are terminal
                Transition::new(
                    MigrationPhase::Pending,
                    MigrationPhase::Failed,
                    MigrationEvent::MigrationFailed,
                    "Migration failed before starting",
                ),
                Transition::new(
                    MigrationPhase::PreFlight,
                    MigrationPhase::Failed,
                    MigrationEvent::MigrationFailed,
                    "Pre-flight check failed",
                ),
                Transition::new(
                    MigrationPhase::Freeze,
                    MigrationPhase::Failed,
                    MigrationEvent::MigrationFailed,
                    "Failed while freezing source",
                ),
                Transition::new(
                    MigrationPhase::Migrate,
                    MigrationPhase::Failed,
                    MigrationEvent::MigrationFailed,
                    "Failed while migrating a pod index",
                ),
                Transition::new(
                    MigrationPhase::Finalize,
                    MigrationPhase::Failed,
                    MigrationEvent::MigrationFailed,
                    "Failed during source cleanup",
                ),
            ],
        }
    }

    /// Attempt to transition to a new phase based on an event
    pub fn transition(
        &self,
        current: &MigrationPhase,
        event: MigrationEvent,
        ctx: &TransitionContext,
    ) -> TransitionResult {
        let transition = self
            .transitions
            .iter()
            .find(|t| t.from == *current && t.event == event);

        match transition {
            Some(t) => {
                if let Some(reason) = self.check_guard(t, ctx) {
                    TransitionResult::GuardFailed {
                        from: t.from,
                        to: t.to,
                        event,
                        reason,
                    }
                } else {
                    TransitionResult::Success {
                        from: t.from,
                        to: t.to,
                        event,
                        description: t.description,
                    }
                }
            }
            None => TransitionResult::InvalidTransition {
                current: *current,
                event,
            },
        }
    }

    /// Check if a transition is valid (ignoring guards)
    pub fn can_transition(&self, from: &MigrationPhase, event: &MigrationEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == *from && t.event == *event)
    }

    /// Get all valid events for a given phase
    pub fn valid_events(&self, phase: &MigrationPhase) -> Vec<&MigrationEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == *phase)
            .map(|t| &t.event)
            .collect()
    }

    /// Check guard conditions for a transition
    fn check_guard(&self, transition: &Transition, ctx: &TransitionContext) -> Option<String> {
        match transition.event {
            // Guard: the loop may only continue while indices remain
            MigrationEvent::IndexMigrated => {
                if !ctx.has_remaining_indices() {
                    Some(format!(
                        "no indices remain: {}/{} already migrated",
                        ctx.current_index, ctx.total_replicas
                    ))
                } else {
                    None
                }
            }
            // Guard: the loop may only exit once every index is done
            MigrationEvent::IndicesExhausted => {
                if ctx.has_remaining_indices() {
                    Some(format!(
                        "indices remain: {}/{} migrated",
                        ctx.current_index, ctx.total_replicas
                    ))
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_to_preflight() {
        let sm = MigrationStateMachine::new();
        let ctx = TransitionContext::new(0, 3);

        let result = sm.transition(
            &MigrationPhase::Pending,
            MigrationEvent::MigrationStarted,
            &ctx,
        );

        match result {
            TransitionResult::Success { from, to, .. } => {
                assert_eq!(from, MigrationPhase::Pending);
                assert_eq!(to, MigrationPhase::PreFlight);
            }
            _ => panic!("Expected successful transition"),
        }
    }

    #[test]
    fn test_full_happy_path() {
        let sm = MigrationStateMachine::new();
        let mut phase = MigrationPhase::Pending;
        let total = 3;

        let events = [
            MigrationEvent::MigrationStarted,
            MigrationEvent::ChecksPassed,
            MigrationEvent::SourceFrozen,
            MigrationEvent::IndexMigrated,
            MigrationEvent::IndexMigrated,
            MigrationEvent::IndexMigrated,
            MigrationEvent::IndicesExhausted,
            MigrationEvent::CleanupFinished,
        ];

        let mut index = 0;
        for event in events {
            let ctx = TransitionContext::new(index, total);
            match sm.transition(&phase, event, &ctx) {
                TransitionResult::Success { to, .. } => {
                    if event == MigrationEvent::IndexMigrated {
                        index += 1;
                    }
                    phase = to;
                }
                other => panic!("unexpected result for {}: {:?}", event, other),
            }
        }
        assert_eq!(phase, MigrationPhase::Completed);
        assert_eq!(index, total);
    }

    #[test]
    fn test_index_migrated_guard() {
        let sm = MigrationStateMachine::new();

        // All indices already done: the loop must not continue
        let ctx = TransitionContext::new(3, 3);
        let result = sm.transition(&MigrationPhase::Migrate, MigrationEvent::IndexMigrated, &ctx);
        assert!(matches!(result, TransitionResult::GuardFailed { .. }));

        // Indices remain
        let ctx = TransitionContext::new(1, 3);
        let result = sm.transition(&MigrationPhase::Migrate, MigrationEvent::IndexMigrated, &ctx);
        assert!(matches!(result, TransitionResult::Success { .. }));
    }

    #[test]
    fn test_indices_exhausted_guard() {
        let sm = MigrationStateMachine::new();

        let ctx = TransitionContext::new(1, 3);
        let result = sm.transition(
            &MigrationPhase::Migrate,
            MigrationEvent::IndicesExhausted,
            &ctx,
        );
        assert!(matches!(result, TransitionResult::GuardFailed { .. }));

        let ctx = TransitionContext::new(3, 3);
        let result = sm.transition(
            &MigrationPhase::Migrate,
            MigrationEvent::IndicesExhausted,
            &ctx,
        );
        match result {
            TransitionResult::Success { to, .. } => assert_eq!(to, MigrationPhase::Finalize),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_transition() {
        let sm = MigrationStateMachine::new();
        let ctx = TransitionContext::new(0, 3);

        // Cannot skip from Pending straight into the migrate loop
        let result = sm.transition(&MigrationPhase::Pending, MigrationEvent::SourceFrozen, &ctx);
        assert!(matches!(result, TransitionResult::InvalidTransition { .. }));
    }

    #[test]
    fn test_terminal_phases_have_no_events() {
        let sm = MigrationStateMachine::new();
        assert!(sm.valid_events(&MigrationPhase::Completed).is_empty());
        assert!(sm.valid_events(&MigrationPhase::Failed).is_empty());
    }

    #[test]
    fn test_failure_from_any_active_phase() {
        let sm = MigrationStateMachine::new();

        let active = [
            MigrationPhase::Pending,
            MigrationPhase::PreFlight,
            MigrationPhase::Freeze,
            MigrationPhase::Migrate,
            MigrationPhase::Finalize,
        ];
        for phase in active {
            assert!(
                sm.can_transition(&phase, &MigrationEvent::MigrationFailed),
                "should be able to fail from {:?}",
                phase
            );
        }
        assert!(!sm.can_transition(&MigrationPhase::Completed, &MigrationEvent::MigrationFailed));
        assert!(!sm.can_transition(&MigrationPhase::Failed, &MigrationEvent::MigrationFailed));
    }
}
