use crate::schema::{BaseAction, ExistingClient, NormalizeResult, PreviewRow};
use crate::utils::normalize_account;
use std::collections::{BTreeSet, HashMap};

pub fn conflict_group_id(account_number: &str) -> String {
    format!("account:{}", account_number)
}

/// Distinct non-empty account numbers, in first-seen order, for the lookup call.
pub fn accounts_to_lookup(drafts: &[NormalizeResult]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    drafts
        .iter()
        .map(|d| d.account_number.as_str())
        .filter(|account| !account.is_empty() && seen.insert(*account))
        .map(str::to_string)
        .collect()
}

/// Indexes lookup results by normalized account. The first match per account wins.
pub fn existing_by_account(matches: Vec<ExistingClient>) -> HashMap<String, ExistingClient> {
    let mut by_account = HashMap::new();
    for existing in matches {
        let account = normalize_account(&existing.account_number);
        if account.is_empty() {
            continue;
        }
        by_account.entry(account).or_insert(existing);
    }
    by_account
}

/// Assigns base actions and intra-batch conflict groups.
///
/// Grouping only looks at the drafts of this run: two rows sharing an account
/// land in the same group whether or not either matches a stored record.
pub fn merge(
    drafts: Vec<NormalizeResult>,
    existing: &HashMap<String, ExistingClient>,
) -> Vec<PreviewRow> {
    let mut frequency: HashMap<String, usize> = HashMap::new();
    for draft in &drafts {
        if !draft.account_number.is_empty() {
            *frequency.entry(draft.account_number.clone()).or_default() += 1;
        }
    }

    drafts
        .into_iter()
        .map(|draft| {
            let has_account = !draft.account_number.is_empty();
            let existing_match = if has_account {
                existing.get(&draft.account_number).cloned()
            } else {
                None
            };
            let base_action = if existing_match.is_some() {
                BaseAction::Update
            } else {
                BaseAction::Create
            };
            let group_id = (has_account
                && frequency.get(&draft.account_number).copied().unwrap_or(0) > 1)
                .then(|| conflict_group_id(&draft.account_number));

            PreviewRow {
                row_id: draft.row_id,
                row_number: draft.row_number,
                raw: draft.raw,
                payload: draft.payload,
                account_number: draft.account_number,
                issues: draft.issues,
                has_blocking_error: draft.has_blocking_error,
                base_action,
                existing_match,
                conflict_group_id: group_id,
            }
        })
        .collect()
}
