use crate::error::Result;
use crate::schema::{
    AuditRecord, BackendAction, DecisionSnapshot, EffectiveAction, ExecutionCounters,
    ExecutionResult, ExecutionStatus, ExistingClient, NormalizedPayload, TopError, UpsertItem,
    UpsertItemResult, UpsertSource, UpsertStatus, DEFAULT_BATCH_SIZE, DEFAULT_TOP_ERRORS_LIMIT,
};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

/// Finds stored clients by normalized account number.
///
/// Permission failures should be reported as [`crate::ImportError::LookupForbidden`].
#[async_trait]
pub trait ClientLookup: Send + Sync {
    async fn find_by_accounts(&self, account_numbers: &[String]) -> Result<Vec<ExistingClient>>;
}

/// Bulk create/update of client records.
#[async_trait]
pub trait ClientUpsert: Send + Sync {
    /// `Ok` carries one positional result per item. `Err` means the call itself
    /// failed and no item can be considered applied.
    async fn upsert_batch(&self, items: &[UpsertItem]) -> Result<Vec<UpsertItemResult>>;
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExecutionEvent {
    #[serde(rename_all = "camelCase")]
    Started {
        total_batches: usize,
        executable: usize,
        ignored: usize,
    },
    BatchStarted { index: usize, size: usize },
    BatchCompleted {
        index: usize,
        counters: ExecutionCounters,
    },
    Cancelled,
    Aborted { reason: String },
    Finished { counters: ExecutionCounters },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RunOutcome {
    Completed,
    /// The cancellation token fired; later batches were not sent.
    Cancelled,
    /// An upsert call failed at the transport level; later batches were not sent.
    Aborted { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub import_id: String,
    pub outcome: RunOutcome,
    pub counters: ExecutionCounters,
    pub results: Vec<ExecutionResult>,
    /// The decisions this run executed.
    pub decisions: Vec<DecisionSnapshot>,
    pub audit: AuditRecord,
    pub audit_written: bool,
}

const CANCELLED_MESSAGE: &str = "Not executed: run cancelled";
const ABORTED_MESSAGE: &str = "Not executed: run aborted";
const MISSING_RESULT_MESSAGE: &str = "No result returned for this row";
const UPSERT_FAILED_MESSAGE: &str = "Upsert failed";

/// Most frequent error messages, ties broken by first occurrence.
pub fn top_errors(results: &[ExecutionResult], limit: usize) -> Vec<TopError> {
    let mut order: Vec<TopError> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for result in results.iter().filter(|r| r.result == ExecutionStatus::Error) {
        let message = result.message.as_deref().unwrap_or(UPSERT_FAILED_MESSAGE);
        match index.get(message) {
            Some(&i) => order[i].count += 1,
            None => {
                index.insert(message, order.len());
                order.push(TopError {
                    message: message.to_string(),
                    count: 1,
                });
            }
        }
    }

    order.sort_by(|a, b| b.count.cmp(&a.count));
    order.truncate(limit);
    order
}

fn not_executable_message(action: EffectiveAction) -> &'static str {
    match action {
        EffectiveAction::Error => "Row has blocking errors",
        EffectiveAction::Conflict => "Duplicate account conflict was not resolved",
        _ => "Decision has no executable payload",
    }
}

struct Executable<'s> {
    snapshot: &'s DecisionSnapshot,
    action: BackendAction,
    payload: &'s NormalizedPayload,
}

/// Sends executable decisions to the upsert collaborator in sequential batches.
///
/// Callers are expected to run only fully resolved decisions (see
/// [`crate::DecisionSummary::is_ready`]); stray `error`/`conflict` rows are
/// recorded as errors and never sent.
pub struct BatchExecutor<'a> {
    upsert: &'a dyn ClientUpsert,
    audit: &'a dyn AuditLog,
    import_id: String,
    file_name: String,
    batch_size: usize,
    top_errors_limit: usize,
    cancel: CancellationToken,
    progress: Option<Sender<ExecutionEvent>>,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(
        upsert: &'a dyn ClientUpsert,
        audit: &'a dyn AuditLog,
        import_id: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            upsert,
            audit,
            import_id: import_id.into(),
            file_name: file_name.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            top_errors_limit: DEFAULT_TOP_ERRORS_LIMIT,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_top_errors_limit(mut self, limit: usize) -> Self {
        self.top_errors_limit = limit;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: Sender<ExecutionEvent>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub async fn execute(&self, snapshots: &[DecisionSnapshot]) -> ExecutionReport {
        let mut results = Vec::with_capacity(snapshots.len());
        let mut counters = ExecutionCounters::default();
        let mut executable = Vec::new();

        for snapshot in snapshots {
            match (snapshot.backend_action, snapshot.payload.as_ref()) {
                (Some(action), Some(payload)) => executable.push(Executable {
                    snapshot,
                    action,
                    payload,
                }),
                _ if snapshot.effective_action == EffectiveAction::Ignore => {
                    counters.ignored += 1;
                    results.push(result_for(snapshot, ExecutionStatus::Ignored, None, None));
                }
                _ => {
                    warn!(
                        "Row {} reached execution as '{}'; recording it as an error",
                        snapshot.row_number,
                        snapshot.effective_action.as_str()
                    );
                    counters.errors += 1;
                    results.push(result_for(
                        snapshot,
                        ExecutionStatus::Error,
                        Some(not_executable_message(snapshot.effective_action).to_string()),
                        None,
                    ));
                }
            }
        }

        let total_batches = executable.len().div_ceil(self.batch_size);
        info!(
            "Import {}: executing {} row(s) in {} batch(es), {} ignored",
            self.import_id,
            executable.len(),
            total_batches,
            counters.ignored
        );
        self.send_event(ExecutionEvent::Started {
            total_batches,
            executable: executable.len(),
            ignored: counters.ignored,
        })
        .await;

        let mut outcome = RunOutcome::Completed;

        for (index, batch) in executable.chunks(self.batch_size).enumerate() {
            if outcome == RunOutcome::Completed && self.cancel.is_cancelled() {
                warn!("Import {} cancelled before batch {}", self.import_id, index);
                outcome = RunOutcome::Cancelled;
                self.send_event(ExecutionEvent::Cancelled).await;
            }

            let skip_message = match &outcome {
                RunOutcome::Completed => None,
                RunOutcome::Cancelled => Some(CANCELLED_MESSAGE),
                RunOutcome::Aborted { .. } => Some(ABORTED_MESSAGE),
            };
            if let Some(message) = skip_message {
                record_batch_failure(batch, message, &mut results, &mut counters);
                continue;
            }

            self.send_event(ExecutionEvent::BatchStarted {
                index,
                size: batch.len(),
            })
            .await;
            debug!(
                "Import {}: batch {}/{} with {} item(s)",
                self.import_id,
                index + 1,
                total_batches,
                batch.len()
            );

            let items: Vec<UpsertItem> = batch.iter().map(|e| self.upsert_item(e)).collect();

            match self.upsert.upsert_batch(&items).await {
                Ok(item_results) => {
                    fold_batch_results(batch, &item_results, &mut results, &mut counters);
                    self.send_event(ExecutionEvent::BatchCompleted { index, counters })
                        .await;
                }
                Err(e) => {
                    let reason = e.to_string();
                    warn!("Import {} aborted at batch {}: {}", self.import_id, index, reason);
                    record_batch_failure(batch, &reason, &mut results, &mut counters);
                    self.send_event(ExecutionEvent::Aborted {
                        reason: reason.clone(),
                    })
                    .await;
                    outcome = RunOutcome::Aborted { reason };
                }
            }
        }

        let audit = AuditRecord {
            import_id: self.import_id.clone(),
            file_name: self.file_name.clone(),
            created_at: Utc::now(),
            created_count: counters.created,
            updated_count: counters.updated,
            ignored_count: counters.ignored,
            error_count: counters.errors,
            top_errors: top_errors(&results, self.top_errors_limit),
        };

        let audit_written = match self.audit.record(&audit).await {
            Ok(()) => true,
            Err(e) => {
                error!("Import {}: audit record not written: {}", self.import_id, e);
                false
            }
        };

        info!(
            "Import {} finished ({:?}): {} created, {} updated, {} ignored, {} error(s)",
            self.import_id,
            outcome,
            counters.created,
            counters.updated,
            counters.ignored,
            counters.errors
        );
        self.send_event(ExecutionEvent::Finished { counters }).await;

        ExecutionReport {
            import_id: self.import_id.clone(),
            outcome,
            counters,
            results,
            decisions: snapshots.to_vec(),
            audit,
            audit_written,
        }
    }

    fn upsert_item(&self, executable: &Executable<'_>) -> UpsertItem {
        if executable.action == BackendAction::Update && executable.snapshot.client_id.is_none() {
            warn!(
                "Row {} is sent as an update without a stored client id",
                executable.snapshot.row_number
            );
        }
        UpsertItem {
            action: executable.action,
            client_id: executable.snapshot.client_id.clone(),
            data: executable.payload.clone(),
            source: UpsertSource {
                import_id: self.import_id.clone(),
                row_number: executable.snapshot.row_number,
            },
        }
    }

    async fn send_event(&self, event: ExecutionEvent) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(event).await;
        }
    }
}

fn result_for(
    snapshot: &DecisionSnapshot,
    result: ExecutionStatus,
    message: Option<String>,
    client_id: Option<String>,
) -> ExecutionResult {
    ExecutionResult {
        row_id: snapshot.row_id.clone(),
        row_number: snapshot.row_number,
        account_number: snapshot.account_number.clone(),
        action: snapshot.effective_action,
        result,
        message,
        client_id,
    }
}

fn fold_batch_results(
    batch: &[Executable<'_>],
    item_results: &[UpsertItemResult],
    results: &mut Vec<ExecutionResult>,
    counters: &mut ExecutionCounters,
) {
    for (position, executable) in batch.iter().enumerate() {
        let snapshot = executable.snapshot;
        let client_id = |r: &UpsertItemResult| r.client_id.clone().or_else(|| snapshot.client_id.clone());

        match item_results.get(position) {
            Some(r) if r.status == UpsertStatus::Created => {
                counters.created += 1;
                results.push(result_for(snapshot, ExecutionStatus::Created, None, client_id(r)));
            }
            Some(r) if r.status == UpsertStatus::Updated => {
                counters.updated += 1;
                results.push(result_for(snapshot, ExecutionStatus::Updated, None, client_id(r)));
            }
            other => {
                let message = other
                    .map(|r| r.error.clone().unwrap_or_else(|| UPSERT_FAILED_MESSAGE.to_string()))
                    .unwrap_or_else(|| MISSING_RESULT_MESSAGE.to_string());
                warn!("Row {} failed: {}", snapshot.row_number, message);
                counters.errors += 1;
                results.push(result_for(
                    snapshot,
                    ExecutionStatus::Error,
                    Some(message),
                    snapshot.client_id.clone(),
                ));
            }
        }
    }
}

fn record_batch_failure(
    batch: &[Executable<'_>],
    message: &str,
    results: &mut Vec<ExecutionResult>,
    counters: &mut ExecutionCounters,
) {
    for executable in batch {
        counters.errors += 1;
        results.push(result_for(
            executable.snapshot,
            ExecutionStatus::Error,
            Some(message.to_string()),
            executable.snapshot.client_id.clone(),
        ));
    }
}
