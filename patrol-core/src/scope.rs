use crate::model::UnifiedFinding;
use std::collections::BTreeSet;

/// Operator-selected resource scope. Flagging is advisory metadata: a
/// finding outside the scope is marked, never removed.
#[derive(Clone, Debug, Default)]
pub struct ScopeSelection {
    pub resource_ids: BTreeSet<String>,
    pub resource_types: BTreeSet<String>,
}

impl ScopeSelection {
    pub fn is_empty(&self) -> bool {
        self.resource_ids.is_empty() && self.resource_types.is_empty()
    }

    /// Out of scope iff a scope is selected and the finding matches
    /// neither the id set nor the type set.
    pub fn out_of_scope(&self, finding: &UnifiedFinding) -> bool {
        !self.is_empty()
            && !self.resource_ids.contains(&finding.resource_id)
            && !self.resource_types.contains(&finding.resource_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FindingSource, Severity};

    fn finding(resource_id: &str, resource_type: &str) -> UnifiedFinding {
        UnifiedFinding::new(
            format!("f-{resource_id}"),
            FindingSource::AiPatrol,
            Severity::Warning,
            resource_id,
            resource_type,
            resource_id,
            "finding",
            1000,
        )
    }

    #[test]
    fn empty_scope_never_flags() {
        let scope = ScopeSelection::default();
        assert!(!scope.out_of_scope(&finding("vm-1", "vm")));
    }

    #[test]
    fn either_id_or_type_match_keeps_in_scope() {
        let scope = ScopeSelection {
            resource_ids: BTreeSet::from(["vm-1".to_string()]),
            resource_types: BTreeSet::from(["storage".to_string()]),
        };
        assert!(!scope.out_of_scope(&finding("vm-1", "vm")));
        assert!(!scope.out_of_scope(&finding("st-9", "storage")));
        assert!(scope.out_of_scope(&finding("vm-2", "vm")));
    }

    #[test]
    fn flagging_is_additive_only() {
        let scope = ScopeSelection {
            resource_ids: BTreeSet::from(["vm-1".to_string()]),
            resource_types: BTreeSet::new(),
        };
        let findings = vec![finding("vm-1", "vm"), finding("vm-2", "vm")];
        let flags: Vec<bool> = findings.iter().map(|f| scope.out_of_scope(f)).collect();
        assert_eq!(flags.len(), findings.len());
        assert_eq!(flags, vec![false, true]);
    }
}
