use crate::error::{ImportError, Result};
use crate::schema::{ConflictResolution, PreviewRow, RowOverride};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// User decisions layered over an immutable preview.
/// Changing them never touches the `PreviewRow`s; decisions are simply recomputed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportOverrides {
    #[schemars(description = "Per-row action chosen by the user, keyed by row id.")]
    #[serde(default)]
    pub row_overrides: BTreeMap<String, RowOverride>,

    #[schemars(description = "Per-conflict-group resolution, keyed by conflict group id.")]
    #[serde(default)]
    pub conflict_resolutions: BTreeMap<String, ConflictResolution>,
}

/// Rows sharing one account number within the same import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConflictGroup {
    pub group_id: String,
    pub account_number: String,
    pub row_ids: Vec<String>,
}

/// Conflict groups in order of their first row.
pub fn conflict_groups(rows: &[PreviewRow]) -> Vec<ConflictGroup> {
    let mut groups: Vec<ConflictGroup> = Vec::new();
    for row in rows {
        let Some(group_id) = &row.conflict_group_id else {
            continue;
        };
        match groups.iter_mut().find(|g| &g.group_id == group_id) {
            Some(group) => group.row_ids.push(row.row_id.clone()),
            None => groups.push(ConflictGroup {
                group_id: group_id.clone(),
                account_number: row.account_number.clone(),
                row_ids: vec![row.row_id.clone()],
            }),
        }
    }
    groups
}

impl ImportOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_override(&self, row_id: &str) -> Option<RowOverride> {
        self.row_overrides.get(row_id).copied()
    }

    pub fn resolution(&self, group_id: &str) -> Option<&ConflictResolution> {
        self.conflict_resolutions.get(group_id)
    }

    /// Sets or (with `None`) clears the override of one row.
    pub fn set_row_override(
        &mut self,
        rows: &[PreviewRow],
        row_id: &str,
        value: Option<RowOverride>,
    ) -> Result<()> {
        if !rows.iter().any(|r| r.row_id == row_id) {
            return Err(ImportError::UnknownRow(row_id.to_string()));
        }
        match value {
            Some(value) => {
                self.row_overrides.insert(row_id.to_string(), value);
            }
            None => {
                self.row_overrides.remove(row_id);
            }
        }
        Ok(())
    }

    pub fn choose_winner(&mut self, rows: &[PreviewRow], group_id: &str, row_id: &str) -> Result<()> {
        ensure_group_exists(rows, group_id)?;
        let in_group = rows
            .iter()
            .any(|r| r.row_id == row_id && r.conflict_group_id.as_deref() == Some(group_id));
        if !in_group {
            return Err(ImportError::WinnerNotInGroup {
                group: group_id.to_string(),
                row: row_id.to_string(),
            });
        }

        self.conflict_resolutions.insert(
            group_id.to_string(),
            ConflictResolution::Winner {
                row_id: row_id.to_string(),
            },
        );
        Ok(())
    }

    pub fn ignore_group(&mut self, rows: &[PreviewRow], group_id: &str) -> Result<()> {
        ensure_group_exists(rows, group_id)?;
        self.conflict_resolutions
            .insert(group_id.to_string(), ConflictResolution::IgnoreAll);
        Ok(())
    }

    pub fn clear_resolution(&mut self, group_id: &str) -> Option<ConflictResolution> {
        self.conflict_resolutions.remove(group_id)
    }
}

fn ensure_group_exists(rows: &[PreviewRow], group_id: &str) -> Result<()> {
    if rows
        .iter()
        .any(|r| r.conflict_group_id.as_deref() == Some(group_id))
    {
        Ok(())
    } else {
        Err(ImportError::UnknownConflictGroup(group_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merger::merge;
    use crate::normalizer::row_id_for;
    use crate::schema::{NormalizeResult, NormalizedPayload};
    use std::collections::HashMap;

    fn rows(accounts: &[&str]) -> Vec<PreviewRow> {
        let drafts = accounts
            .iter()
            .enumerate()
            .map(|(i, account)| NormalizeResult {
                row_id: row_id_for(i as u32 + 2),
                row_number: i as u32 + 2,
                raw: Default::default(),
                payload: NormalizedPayload::default(),
                account_number: account.to_string(),
                issues: vec![],
                has_blocking_error: false,
            })
            .collect();
        merge(drafts, &HashMap::new())
    }

    #[test]
    fn test_conflict_groups_listing() {
        let rows = rows(&["1", "2", "1", "3", "2", "1"]);
        let groups = conflict_groups(&rows);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].group_id, "account:1");
        assert_eq!(
            groups[0].row_ids,
            vec!["import-row-2", "import-row-4", "import-row-7"]
        );
        assert_eq!(groups[1].account_number, "2");
    }

    #[test]
    fn test_choose_winner_validates_membership() {
        let rows = rows(&["1", "1", "2"]);
        let mut overrides = ImportOverrides::new();

        assert!(overrides.choose_winner(&rows, "account:1", "import-row-3").is_ok());
        assert!(matches!(
            overrides.choose_winner(&rows, "account:1", "import-row-4"),
            Err(ImportError::WinnerNotInGroup { .. })
        ));
        assert!(matches!(
            overrides.choose_winner(&rows, "account:2", "import-row-4"),
            Err(ImportError::UnknownConflictGroup(_))
        ));
        assert_eq!(
            overrides.resolution("account:1"),
            Some(&ConflictResolution::Winner {
                row_id: "import-row-3".to_string()
            })
        );
    }

    #[test]
    fn test_ignore_group_replaces_winner() {
        let rows = rows(&["1", "1"]);
        let mut overrides = ImportOverrides::new();
        overrides.choose_winner(&rows, "account:1", "import-row-2").unwrap();
        overrides.ignore_group(&rows, "account:1").unwrap();

        assert_eq!(overrides.resolution("account:1"), Some(&ConflictResolution::IgnoreAll));
        assert_eq!(overrides.clear_resolution("account:1"), Some(ConflictResolution::IgnoreAll));
        assert!(overrides.resolution("account:1").is_none());
    }

    #[test]
    fn test_row_override_set_and_clear() {
        let rows = rows(&["1"]);
        let mut overrides = ImportOverrides::new();

        overrides
            .set_row_override(&rows, "import-row-2", Some(RowOverride::Ignore))
            .unwrap();
        assert_eq!(overrides.row_override("import-row-2"), Some(RowOverride::Ignore));

        overrides.set_row_override(&rows, "import-row-2", None).unwrap();
        assert_eq!(overrides.row_override("import-row-2"), None);

        assert!(matches!(
            overrides.set_row_override(&rows, "import-row-99", Some(RowOverride::Create)),
            Err(ImportError::UnknownRow(_))
        ));
    }

    #[test]
    fn test_overrides_serialize_for_session_restore() {
        let rows = rows(&["1", "1"]);
        let mut overrides = ImportOverrides::new();
        overrides.choose_winner(&rows, "account:1", "import-row-2").unwrap();
        overrides
            .set_row_override(&rows, "import-row-3", Some(RowOverride::Update))
            .unwrap();

        let json = serde_json::to_string(&overrides).unwrap();
        assert!(json.contains(r#""type":"winner""#));
        let back: ImportOverrides = serde_json::from_str(&json).unwrap();
        assert_eq!(back, overrides);
    }
}
