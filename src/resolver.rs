//! Effective-action resolution.
//!
//! Precedence, first match wins:
//! 1. blocking error (only an explicit `ignore` override can silence it)
//! 2. conflict group state (unresolved, ignored, or lost to another winner)
//! 3. per-row override
//! 4. base action

use crate::overrides::ImportOverrides;
use crate::schema::{
    BackendAction, ConflictResolution, DecisionSnapshot, EffectiveAction, PreviewRow, RowOverride,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Result of one guard: either a final action or "keep going".
enum Guard {
    Decided(EffectiveAction),
    Continue,
}

fn blocking_error_guard(row: &PreviewRow, overrides: &ImportOverrides) -> Guard {
    if !row.has_blocking_error {
        return Guard::Continue;
    }
    match overrides.row_override(&row.row_id) {
        Some(RowOverride::Ignore) => Guard::Decided(EffectiveAction::Ignore),
        _ => Guard::Decided(EffectiveAction::Error),
    }
}

fn conflict_guard(row: &PreviewRow, overrides: &ImportOverrides) -> Guard {
    let Some(group_id) = &row.conflict_group_id else {
        return Guard::Continue;
    };
    match overrides.resolution(group_id) {
        None => Guard::Decided(EffectiveAction::Conflict),
        Some(ConflictResolution::IgnoreAll) => Guard::Decided(EffectiveAction::Ignore),
        Some(ConflictResolution::Winner { row_id }) if row_id != &row.row_id => {
            Guard::Decided(EffectiveAction::Ignore)
        }
        // the winner continues to the override step with its base action
        Some(ConflictResolution::Winner { .. }) => Guard::Continue,
    }
}

fn override_guard(row: &PreviewRow, overrides: &ImportOverrides) -> Guard {
    match overrides.row_override(&row.row_id) {
        Some(RowOverride::Create) => Guard::Decided(EffectiveAction::Create),
        Some(RowOverride::Update) => Guard::Decided(EffectiveAction::Update),
        Some(RowOverride::Ignore) => Guard::Decided(EffectiveAction::Ignore),
        None => Guard::Continue,
    }
}

const GUARDS: [fn(&PreviewRow, &ImportOverrides) -> Guard; 3] =
    [blocking_error_guard, conflict_guard, override_guard];

pub fn resolve_effective_action(row: &PreviewRow, overrides: &ImportOverrides) -> EffectiveAction {
    for guard in GUARDS {
        if let Guard::Decided(action) = guard(row, overrides) {
            return action;
        }
    }
    row.base_action.into()
}

pub fn build_decision_snapshot(row: &PreviewRow, overrides: &ImportOverrides) -> DecisionSnapshot {
    let effective_action = resolve_effective_action(row, overrides);
    let backend_action = match effective_action {
        EffectiveAction::Create => Some(BackendAction::Create),
        EffectiveAction::Update => Some(BackendAction::Update),
        _ => None,
    };
    let client_id = match backend_action {
        Some(BackendAction::Update) => row.existing_match.as_ref().map(|m| m.client_id.clone()),
        _ => None,
    };

    DecisionSnapshot {
        row_id: row.row_id.clone(),
        row_number: row.row_number,
        account_number: row.account_number.clone(),
        effective_action,
        backend_action,
        client_id,
        payload: backend_action.map(|_| row.payload.clone()),
        issues: row.issues.clone(),
        conflict_group_id: row.conflict_group_id.clone(),
    }
}

pub fn build_decision_snapshots(
    rows: &[PreviewRow],
    overrides: &ImportOverrides,
) -> Vec<DecisionSnapshot> {
    rows.iter()
        .map(|row| build_decision_snapshot(row, overrides))
        .collect()
}

pub fn has_unresolved_conflicts(rows: &[PreviewRow], overrides: &ImportOverrides) -> bool {
    rows.iter()
        .any(|row| resolve_effective_action(row, overrides) == EffectiveAction::Conflict)
}

/// Counts of effective actions across one preview.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DecisionSummary {
    pub create: usize,
    pub update: usize,
    pub ignore: usize,
    pub error: usize,
    pub conflict: usize,
}

impl DecisionSummary {
    pub fn from_snapshots(snapshots: &[DecisionSnapshot]) -> Self {
        let mut summary = Self::default();
        for snapshot in snapshots {
            match snapshot.effective_action {
                EffectiveAction::Create => summary.create += 1,
                EffectiveAction::Update => summary.update += 1,
                EffectiveAction::Ignore => summary.ignore += 1,
                EffectiveAction::Error => summary.error += 1,
                EffectiveAction::Conflict => summary.conflict += 1,
            }
        }
        summary
    }

    /// No blocking errors and no unresolved conflicts remain.
    pub fn is_ready(&self) -> bool {
        self.error == 0 && self.conflict == 0
    }

    pub fn executable(&self) -> usize {
        self.create + self.update
    }
}
