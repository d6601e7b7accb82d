use std::collections::HashMap;

use crate::error::LifecycleError;
use crate::storage::DatasetStatus;

/// Allowed dataset status transitions.
pub struct TransitionTable {
    valid_transitions: HashMap<DatasetStatus, Vec<DatasetStatus>>,
}

impl TransitionTable {
    /// Standard rules:
    /// - Creating -> Save (uploads finished)
    /// - Save -> Conversion (worker launched)
    /// - Conversion -> Store (worker succeeded)
    /// - Conversion -> Save (worker failed, died or could not start)
    /// - Store -> AtWork, AtWork -> Store (training use)
    pub fn new() -> Self {
        let mut valid_transitions = HashMap::new();

        valid_transitions.insert(DatasetStatus::Creating, vec![DatasetStatus::Save]);
        valid_transitions.insert(DatasetStatus::Save, vec![DatasetStatus::Conversion]);
        valid_transitions.insert(
            DatasetStatus::Conversion,
            vec![DatasetStatus::Store, DatasetStatus::Save],
        );
        valid_transitions.insert(DatasetStatus::Store, vec![DatasetStatus::AtWork]);
        valid_transitions.insert(DatasetStatus::AtWork, vec![DatasetStatus::Store]);

        Self { valid_transitions }
    }

    pub fn can_transition(&self, from: DatasetStatus, to: DatasetStatus) -> bool {
        self.valid_transitions
            .get(&from)
            .map(|targets| targets.contains(&to))
            .unwrap_or(false)
    }

    pub fn check(&self, from: DatasetStatus, to: DatasetStatus) -> Result<(), LifecycleError> {
        if self.can_transition(from, to) {
            Ok(())
        } else {
            Err(LifecycleError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }
}

impl Default for TransitionTable {
    fn default() -> Self {
        Self::new()
    }
}
