//! Model lifecycle transition table

use orchestra_core::{ModelStatus, OrchestraError};

/// Validates a status transition for one model.
///
/// Illegal transitions are reported as errors rather than panics so that a
/// registry bug surfaces as a failed operation instead of a crashed worker.
pub fn validate_transition(id: &str, from: ModelStatus, to: ModelStatus) -> Result<(), OrchestraError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(OrchestraError::IllegalTransition {
            id: id.to_string(),
            from,
            to,
        })
    }
}

pub fn allowed_transitions(from: ModelStatus) -> Vec<ModelStatus> {
    use ModelStatus::{Available, Failed, Loaded, Loading, Unloading};
    match from {
        Available => vec![Loading],
        Loading => vec![Loaded, Failed],
        Loaded => vec![Unloading],
        Unloading => vec![Available, Failed],
        Failed => vec![Loading],
    }
}

fn allowed(from: ModelStatus, to: ModelStatus) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn happy_path_cycle() {
        use ModelStatus::*;
        assert!(validate_transition("m", Available, Loading).is_ok());
        assert!(validate_transition("m", Loading, Loaded).is_ok());
        assert!(validate_transition("m", Loaded, Unloading).is_ok());
        assert!(validate_transition("m", Unloading, Available).is_ok());
    }

    #[test]
    fn failed_only_from_transitions() {
        use ModelStatus::*;
        assert!(validate_transition("m", Loading, Failed).is_ok());
        assert!(validate_transition("m", Unloading, Failed).is_ok());
        assert!(validate_transition("m", Available, Failed).is_err());
        assert!(validate_transition("m", Loaded, Failed).is_err());
        // Retry path
        assert!(validate_transition("m", Failed, Loading).is_ok());
        assert!(validate_transition("m", Failed, Loaded).is_err());
    }

    fn any_status() -> impl Strategy<Value = ModelStatus> {
        prop_oneof![
            Just(ModelStatus::Available),
            Just(ModelStatus::Loading),
            Just(ModelStatus::Loaded),
            Just(ModelStatus::Unloading),
            Just(ModelStatus::Failed),
        ]
    }

    proptest! {
        #[test]
        fn prop_validation_matches_table(from in any_status(), to in any_status()) {
            let res = validate_transition("m", from, to);
            let allowed = allowed_transitions(from);
            prop_assert_eq!(res.is_ok(), allowed.contains(&to));
        }

        #[test]
        fn prop_no_self_transitions(status in any_status()) {
            prop_assert!(validate_transition("m", status, status).is_err());
        }
    }
}
