//! # Client Import Engine
//!
//! Reconciles client rows extracted from a spreadsheet against stored records
//! and executes the outcome as batched, auditable upserts.
//!
//! ## Core Concepts
//!
//! - **Column Mapping**: every source header maps to a client field or is ignored
//! - **Normalization**: Brazilian numbers, dates and yes/no cells become a typed payload plus issues
//! - **Base Action**: `update` when the account number matches a stored client, otherwise `create`
//! - **Conflict Group**: rows of the same file sharing an account number; one winner at most
//! - **Effective Action**: blocking error > conflict state > user override > base action
//! - **Execution**: sequential batches of 200, per-row results, one audit record per run
//!
//! ## Example
//!
//! ```rust,ignore
//! use client_import_engine::*;
//!
//! let headers = vec!["Nome".to_string(), "Conta".to_string(), "Custódia".to_string()];
//! let mapping = auto_map(&headers);
//!
//! let mut session = ImportSession::prepare(
//!     ImportConfig::default(),
//!     "clientes.xlsx",
//!     &raw_rows,
//!     &mapping,
//!     &lookup,
//! )
//! .await?;
//!
//! for group in session.conflict_groups() {
//!     session.choose_winner(&group.group_id, &group.row_ids[0])?;
//! }
//!
//! let execution = session.execute(&upsert, &audit, None, None).await?;
//! let csv = results_csv_string(&execution.results)?;
//! ```

pub mod error;
pub mod executor;
pub mod mapping;
pub mod merger;
pub mod normalizer;
pub mod overrides;
pub mod report;
pub mod resolver;
pub mod schema;
pub mod utils;

pub use error::{ImportError, Result};
pub use executor::{
    top_errors, AuditLog, BatchExecutor, ClientLookup, ClientUpsert, ExecutionEvent,
    ExecutionReport, RunOutcome,
};
pub use mapping::{apply_mapping_model, auto_map, MappingModel, MappingModelStore};
pub use merger::{accounts_to_lookup, conflict_group_id, existing_by_account, merge};
pub use normalizer::{birthday_policy, normalize_row, row_id_for, RowNormalizer};
pub use overrides::{conflict_groups, ConflictGroup, ImportOverrides};
pub use report::{results_csv_string, write_results_csv, ImportReport};
pub use resolver::{
    build_decision_snapshot, build_decision_snapshots, has_unresolved_conflicts,
    resolve_effective_action, DecisionSummary,
};
pub use schema::*;
pub use utils::*;

use chrono::Utc;
use log::{debug, info};
use rand::Rng;
use std::collections::HashMap;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

/// One import run: the immutable preview plus the user's decisions on top of it.
pub struct ImportSession {
    config: ImportConfig,
    import_id: String,
    file_name: String,
    rows: Vec<PreviewRow>,
    overrides: ImportOverrides,
}

impl ImportSession {
    /// Normalizes every row, looks up existing clients once and merges.
    ///
    /// A failing lookup aborts the whole preview.
    pub async fn prepare(
        config: ImportConfig,
        file_name: impl Into<String>,
        raw_rows: &[RawRow],
        mapping: &ColumnMapping,
        lookup: &dyn ClientLookup,
    ) -> Result<Self> {
        validate_import_config(&config)?;
        let file_name = file_name.into();

        let normalizer = RowNormalizer::new(mapping, &config);
        let drafts: Vec<NormalizeResult> = raw_rows
            .iter()
            .enumerate()
            .map(|(i, raw)| normalizer.normalize(raw, config.first_data_row_number + i as u32))
            .collect();

        let accounts = accounts_to_lookup(&drafts);
        let existing = if accounts.is_empty() {
            HashMap::new()
        } else {
            debug!("Looking up {} account(s)", accounts.len());
            existing_by_account(lookup.find_by_accounts(&accounts).await?)
        };

        let rows = merge(drafts, &existing);
        info!(
            "Prepared import of '{}': {} row(s), {} matched existing clients",
            file_name,
            rows.len(),
            rows.iter().filter(|r| r.existing_match.is_some()).count()
        );

        Ok(Self::from_rows(config, file_name, rows))
    }

    /// Rebuilds a session around an already merged preview.
    pub fn from_rows(config: ImportConfig, file_name: impl Into<String>, rows: Vec<PreviewRow>) -> Self {
        Self {
            config,
            import_id: new_import_id(),
            file_name: file_name.into(),
            rows,
            overrides: ImportOverrides::new(),
        }
    }

    pub fn import_id(&self) -> &str {
        &self.import_id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn rows(&self) -> &[PreviewRow] {
        &self.rows
    }

    pub fn overrides(&self) -> &ImportOverrides {
        &self.overrides
    }

    pub fn set_row_override(&mut self, row_id: &str, value: Option<RowOverride>) -> Result<()> {
        self.overrides.set_row_override(&self.rows, row_id, value)
    }

    pub fn choose_winner(&mut self, group_id: &str, row_id: &str) -> Result<()> {
        self.overrides.choose_winner(&self.rows, group_id, row_id)
    }

    pub fn ignore_group(&mut self, group_id: &str) -> Result<()> {
        self.overrides.ignore_group(&self.rows, group_id)
    }

    pub fn clear_resolution(&mut self, group_id: &str) -> Option<ConflictResolution> {
        self.overrides.clear_resolution(group_id)
    }

    pub fn conflict_groups(&self) -> Vec<ConflictGroup> {
        conflict_groups(&self.rows)
    }

    pub fn decisions(&self) -> Vec<DecisionSnapshot> {
        build_decision_snapshots(&self.rows, &self.overrides)
    }

    pub fn summary(&self) -> DecisionSummary {
        DecisionSummary::from_snapshots(&self.decisions())
    }

    pub fn has_unresolved_conflicts(&self) -> bool {
        has_unresolved_conflicts(&self.rows, &self.overrides)
    }

    /// Decisions, provided no blocking error or unresolved conflict remains.
    pub fn ready_decisions(&self) -> Result<Vec<DecisionSnapshot>> {
        let decisions = self.decisions();
        let summary = DecisionSummary::from_snapshots(&decisions);
        if !summary.is_ready() {
            return Err(ImportError::NotReady {
                blocking_errors: summary.error,
                unresolved_conflicts: summary.conflict,
            });
        }
        Ok(decisions)
    }

    pub async fn execute(
        &self,
        upsert: &dyn ClientUpsert,
        audit: &dyn AuditLog,
        cancel: Option<CancellationToken>,
        progress: Option<Sender<ExecutionEvent>>,
    ) -> Result<ExecutionReport> {
        let decisions = self.ready_decisions()?;

        let mut executor = BatchExecutor::new(upsert, audit, self.import_id.clone(), self.file_name.clone())
            .with_batch_size(self.config.batch_size)
            .with_top_errors_limit(self.config.top_errors_limit);
        if let Some(cancel) = cancel {
            executor = executor.with_cancellation(cancel);
        }
        if let Some(progress) = progress {
            executor = executor.with_progress(progress);
        }

        Ok(executor.execute(&decisions).await)
    }

    pub fn report(&self, execution: &ExecutionReport) -> ImportReport {
        ImportReport {
            generated_at: Utc::now(),
            file_name: self.file_name.clone(),
            counters: execution.counters,
            results: execution.results.clone(),
            decisions: execution.decisions.clone(),
        }
    }
}

pub fn validate_import_config(config: &ImportConfig) -> Result<()> {
    if config.batch_size == 0 {
        return Err(ImportError::InvalidConfig(
            "batch_size must be at least 1".to_string(),
        ));
    }
    if config.top_errors_limit == 0 {
        return Err(ImportError::InvalidConfig(
            "top_errors_limit must be at least 1".to_string(),
        ));
    }
    if config.mapping_model_capacity == 0 {
        return Err(ImportError::InvalidConfig(
            "mapping_model_capacity must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Random run identifier threaded through every upsert item.
pub fn new_import_id() -> String {
    format!("{:032x}", rand::thread_rng().gen::<u128>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ForbiddenLookup;

    #[async_trait]
    impl ClientLookup for ForbiddenLookup {
        async fn find_by_accounts(&self, _: &[String]) -> Result<Vec<ExistingClient>> {
            Err(ImportError::LookupForbidden("advisor cannot read clients".to_string()))
        }
    }

    #[derive(Default)]
    struct CountingLookup {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ClientLookup for CountingLookup {
        async fn find_by_accounts(&self, accounts: &[String]) -> Result<Vec<ExistingClient>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(accounts
                .iter()
                .filter(|a| a.as_str() == "100")
                .map(|a| ExistingClient::new(a.clone(), "client-100"))
                .collect())
        }
    }

    fn mapping() -> ColumnMapping {
        auto_map(&["Nome".to_string(), "Conta".to_string()])
    }

    fn raw(name: &str, account: &str) -> RawRow {
        let mut row = RawRow::new();
        row.insert("Nome".to_string(), CellValue::text(name));
        row.insert("Conta".to_string(), CellValue::text(account));
        row
    }

    #[tokio::test]
    async fn test_forbidden_lookup_aborts_preview() {
        let rows = vec![raw("Ana", "100")];
        let result =
            ImportSession::prepare(ImportConfig::default(), "f.csv", &rows, &mapping(), &ForbiddenLookup)
                .await;
        assert!(matches!(result, Err(ImportError::LookupForbidden(_))));
    }

    #[tokio::test]
    async fn test_lookup_skipped_without_accounts() {
        let lookup = CountingLookup::default();
        let rows = vec![raw("Ana", ""), raw("Bia", "-")];
        let session =
            ImportSession::prepare(ImportConfig::default(), "f.csv", &rows, &mapping(), &lookup)
                .await
                .unwrap();

        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
        assert_eq!(session.rows().len(), 2);
        assert_eq!(session.rows()[0].row_number, 2);
        assert_eq!(session.rows()[1].row_id, "import-row-3");
    }

    #[tokio::test]
    async fn test_prepare_matches_and_summarizes() {
        let lookup = CountingLookup::default();
        let rows = vec![raw("Ana", "100"), raw("", "200"), raw("Caio", "300")];
        let mut session =
            ImportSession::prepare(ImportConfig::default(), "f.csv", &rows, &mapping(), &lookup)
                .await
                .unwrap();

        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.rows()[0].base_action, BaseAction::Update);
        assert_eq!(session.rows()[2].base_action, BaseAction::Create);

        let summary = session.summary();
        assert_eq!((summary.update, summary.create, summary.error), (1, 1, 1));
        assert!(matches!(
            session.ready_decisions(),
            Err(ImportError::NotReady {
                blocking_errors: 1,
                unresolved_conflicts: 0
            })
        ));

        session
            .set_row_override("import-row-3", Some(RowOverride::Ignore))
            .unwrap();
        assert!(session.ready_decisions().is_ok());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = ImportConfig {
            batch_size: 0,
            ..Default::default()
        };
        let result = ImportSession::prepare(config, "f.csv", &[], &mapping(), &ForbiddenLookup).await;
        assert!(matches!(result, Err(ImportError::InvalidConfig(_))));
    }

    #[test]
    fn test_import_ids_are_unique() {
        let a = new_import_id();
        let b = new_import_id();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
