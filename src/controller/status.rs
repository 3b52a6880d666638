//! Status management utilities.
//!
//! Helpers for maintaining the conditions list and timestamping status
//! transitions.

use crate::crd::Condition;

/// Current time as a status timestamp string.
pub fn now() -> String {
    jiff::Timestamp::now().to_string()
}

/// Add or replace a condition by type.
pub fn upsert_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    if let Some(existing) = conditions
        .iter_mut()
        .find(|c| c.r#type == condition.r#type)
    {
        *existing = condition;
    } else {
        conditions.push(condition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_appends_then_replaces() {
        let mut conditions = Vec::new();
        upsert_condition(
            &mut conditions,
            Condition::new("PreFlight", true, "Passed", "All checks passed"),
        );
        assert_eq!(conditions.len(), 1);

        upsert_condition(
            &mut conditions,
            Condition::new("SourceFrozen", true, "Frozen", "Source prepared"),
        );
        assert_eq!(conditions.len(), 2);

        upsert_condition(
            &mut conditions,
            Condition::new("PreFlight", false, "Retried", "Checks re-run"),
        );
        assert_eq!(conditions.len(), 2);
        let preflight = conditions
            .iter()
            .find(|c| c.r#type == "PreFlight")
            .expect("PreFlight condition present");
        assert_eq!(preflight.status, "False");
        assert_eq!(preflight.reason, "Retried");
    }
}
