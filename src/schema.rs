use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single decoded spreadsheet cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum CellValue {
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
    Date(NaiveDateTime),
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

/// Header -> cell value, as produced by the spreadsheet decoder.
pub type RawRow = BTreeMap<String, CellValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum FieldKey {
    Name,
    AccountNumber,
    InvestorProfile,
    Email,
    Phone,
    Document,
    Status,
    Origin,
    Notes,
    Custody,
    #[serde(rename = "totalBRL")]
    TotalBrl,
    #[serde(rename = "onshoreBRL")]
    OnshoreBrl,
    #[serde(rename = "offshoreBRL")]
    OffshoreBrl,
    CdiYearPct,
    HasFixedFee,
    NextMeetingAt,
    Birthday,
}

impl FieldKey {
    pub const ALL: [FieldKey; 17] = [
        FieldKey::Name,
        FieldKey::AccountNumber,
        FieldKey::InvestorProfile,
        FieldKey::Email,
        FieldKey::Phone,
        FieldKey::Document,
        FieldKey::Status,
        FieldKey::Origin,
        FieldKey::Notes,
        FieldKey::Custody,
        FieldKey::TotalBrl,
        FieldKey::OnshoreBrl,
        FieldKey::OffshoreBrl,
        FieldKey::CdiYearPct,
        FieldKey::HasFixedFee,
        FieldKey::NextMeetingAt,
        FieldKey::Birthday,
    ];

    /// Wire name, as used in saved mappings.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKey::Name => "name",
            FieldKey::AccountNumber => "accountNumber",
            FieldKey::InvestorProfile => "investorProfile",
            FieldKey::Email => "email",
            FieldKey::Phone => "phone",
            FieldKey::Document => "document",
            FieldKey::Status => "status",
            FieldKey::Origin => "origin",
            FieldKey::Notes => "notes",
            FieldKey::Custody => "custody",
            FieldKey::TotalBrl => "totalBRL",
            FieldKey::OnshoreBrl => "onshoreBRL",
            FieldKey::OffshoreBrl => "offshoreBRL",
            FieldKey::CdiYearPct => "cdiYearPct",
            FieldKey::HasFixedFee => "hasFixedFee",
            FieldKey::NextMeetingAt => "nextMeetingAt",
            FieldKey::Birthday => "birthday",
        }
    }

    /// Prefix used to build issue codes such as `custody_invalid`.
    pub fn issue_prefix(&self) -> &'static str {
        match self {
            FieldKey::Name => "name",
            FieldKey::AccountNumber => "account",
            FieldKey::InvestorProfile => "investor_profile",
            FieldKey::Email => "email",
            FieldKey::Phone => "phone",
            FieldKey::Document => "document",
            FieldKey::Status => "status",
            FieldKey::Origin => "origin",
            FieldKey::Notes => "notes",
            FieldKey::Custody => "custody",
            FieldKey::TotalBrl => "total_brl",
            FieldKey::OnshoreBrl => "onshore_brl",
            FieldKey::OffshoreBrl => "offshore_brl",
            FieldKey::CdiYearPct => "cdi_year_pct",
            FieldKey::HasFixedFee => "has_fixed_fee",
            FieldKey::NextMeetingAt => "next_meeting_at",
            FieldKey::Birthday => "birthday",
        }
    }

    pub fn from_wire(value: &str) -> Option<FieldKey> {
        FieldKey::ALL.iter().copied().find(|f| f.as_str() == value)
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const IGNORE_TARGET: &str = "IGNORE";

/// Where a source column goes. Serialized as the field's wire name or `"IGNORE"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ColumnTarget {
    Field(FieldKey),
    #[default]
    Ignore,
}

impl From<ColumnTarget> for String {
    fn from(target: ColumnTarget) -> Self {
        match target {
            ColumnTarget::Field(field) => field.as_str().to_string(),
            ColumnTarget::Ignore => IGNORE_TARGET.to_string(),
        }
    }
}

impl TryFrom<String> for ColumnTarget {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        if value == IGNORE_TARGET {
            return Ok(ColumnTarget::Ignore);
        }
        FieldKey::from_wire(&value)
            .map(ColumnTarget::Field)
            .ok_or_else(|| format!("unknown column target '{}'", value))
    }
}

impl JsonSchema for ColumnTarget {
    fn schema_name() -> String {
        "ColumnTarget".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        <String as JsonSchema>::json_schema(gen)
    }
}

/// Header -> target for one sheet. Total over the headers it was built from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ColumnMapping {
    columns: BTreeMap<String, ColumnTarget>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, header: impl Into<String>, target: ColumnTarget) {
        self.columns.insert(header.into(), target);
    }

    pub fn with(mut self, header: impl Into<String>, target: ColumnTarget) -> Self {
        self.set(header, target);
        self
    }

    pub fn contains(&self, header: &str) -> bool {
        self.columns.contains_key(header)
    }

    /// Unknown headers are ignored.
    pub fn target(&self, header: &str) -> ColumnTarget {
        self.columns.get(header).copied().unwrap_or_default()
    }

    /// First header (by name) claiming `field`.
    pub fn header_for(&self, field: FieldKey) -> Option<&str> {
        self.columns
            .iter()
            .find(|(_, target)| **target == ColumnTarget::Field(field))
            .map(|(header, _)| header.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ColumnTarget)> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum InvestorProfile {
    #[serde(rename = "conservador")]
    Conservative,
    #[serde(rename = "moderado")]
    Moderate,
    #[serde(rename = "arrojado")]
    Aggressive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ClientStatus {
    #[serde(rename = "ativo")]
    Active,
    #[serde(rename = "inativo")]
    Inactive,
    #[serde(rename = "onboarding")]
    Onboarding,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClientMetrics {
    #[serde(rename = "totalBRL", skip_serializing_if = "Option::is_none", default)]
    pub total_brl: Option<f64>,
    #[serde(rename = "onshoreBRL", skip_serializing_if = "Option::is_none", default)]
    pub onshore_brl: Option<f64>,
    #[serde(rename = "offshoreBRL", skip_serializing_if = "Option::is_none", default)]
    pub offshore_brl: Option<f64>,
    /// Percentage of CDI (e.g. 105.0 for 105%).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cdi_year_pct: Option<f64>,
}

impl ClientMetrics {
    pub fn is_empty(&self) -> bool {
        self.total_brl.is_none()
            && self.onshore_brl.is_none()
            && self.offshore_brl.is_none()
            && self.cdi_year_pct.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClientFlags {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub has_fixed_fee: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Birthday {
    /// Only day and month are trusted.
    DayMonth { day: u32, month: u32 },
    FullDate { date: NaiveDate },
}

/// Partially filled client record. `None` means "leave the stored value untouched".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedPayload {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub account_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub investor_profile: Option<InvestorProfile>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub document: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<ClientStatus>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub custody_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metrics: Option<ClientMetrics>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub flags: Option<ClientFlags>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub next_meeting_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub birthday: Option<Birthday>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub custom_flags: BTreeMap<String, bool>,
}

impl NormalizedPayload {
    pub fn metrics_mut(&mut self) -> &mut ClientMetrics {
        self.metrics.get_or_insert_with(ClientMetrics::default)
    }

    pub fn flags_mut(&mut self) -> &mut ClientFlags {
        self.flags.get_or_insert_with(ClientFlags::default)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportIssue {
    pub code: String,
    pub severity: IssueSeverity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub field: Option<FieldKey>,
}

impl ImportIssue {
    pub fn warning(code: impl Into<String>, message: impl Into<String>, field: FieldKey) -> Self {
        Self {
            code: code.into(),
            severity: IssueSeverity::Warning,
            message: message.into(),
            field: Some(field),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>, field: FieldKey) -> Self {
        Self {
            code: code.into(),
            severity: IssueSeverity::Error,
            message: message.into(),
            field: Some(field),
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == IssueSeverity::Error
    }
}

/// Output of the row normalizer for one source row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NormalizeResult {
    pub row_id: String,
    pub row_number: u32,
    pub raw: RawRow,
    pub payload: NormalizedPayload,
    pub account_number: String,
    pub issues: Vec<ImportIssue>,
    pub has_blocking_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BaseAction {
    Create,
    Update,
}

/// Summary of a stored client, as returned by the lookup collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExistingClient {
    pub account_number: String,
    pub client_id: String,
    #[serde(rename = "nome", skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(rename = "perfilInvestidor", skip_serializing_if = "Option::is_none", default)]
    pub investor_profile: Option<String>,
    #[serde(rename = "codigoConta", skip_serializing_if = "Option::is_none", default)]
    pub account_code: Option<String>,
    #[serde(rename = "custodiaAtual", skip_serializing_if = "Option::is_none", default)]
    pub current_custody: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metrics: Option<ClientMetrics>,
}

impl ExistingClient {
    pub fn new(account_number: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            account_number: account_number.into(),
            client_id: client_id.into(),
            name: None,
            investor_profile: None,
            account_code: None,
            current_custody: None,
            metrics: None,
        }
    }
}

/// A normalized row merged with lookup results. Never mutated after the merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRow {
    pub row_id: String,
    pub row_number: u32,
    pub raw: RawRow,
    pub payload: NormalizedPayload,
    pub account_number: String,
    pub issues: Vec<ImportIssue>,
    pub has_blocking_error: bool,
    pub base_action: BaseAction,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub existing_match: Option<ExistingClient>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub conflict_group_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RowOverride {
    Create,
    /// Forced on a row without a stored match, the item is sent with no
    /// client id and the upsert collaborator decides the outcome.
    Update,
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConflictResolution {
    #[serde(rename_all = "camelCase")]
    Winner { row_id: String },
    IgnoreAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EffectiveAction {
    Create,
    Update,
    Ignore,
    Error,
    Conflict,
}

impl EffectiveAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectiveAction::Create => "create",
            EffectiveAction::Update => "update",
            EffectiveAction::Ignore => "ignore",
            EffectiveAction::Error => "error",
            EffectiveAction::Conflict => "conflict",
        }
    }
}

impl From<BaseAction> for EffectiveAction {
    fn from(action: BaseAction) -> Self {
        match action {
            BaseAction::Create => EffectiveAction::Create,
            BaseAction::Update => EffectiveAction::Update,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BackendAction {
    Create,
    Update,
}

/// The resolved, executable view of one preview row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DecisionSnapshot {
    pub row_id: String,
    pub row_number: u32,
    pub account_number: String,
    pub effective_action: EffectiveAction,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub backend_action: Option<BackendAction>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payload: Option<NormalizedPayload>,
    pub issues: Vec<ImportIssue>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub conflict_group_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Created,
    Updated,
    Ignored,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Created => "created",
            ExecutionStatus::Updated => "updated",
            ExecutionStatus::Ignored => "ignored",
            ExecutionStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub row_id: String,
    pub row_number: u32,
    pub account_number: String,
    pub action: EffectiveAction,
    pub result: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpsertSource {
    pub import_id: String,
    pub row_number: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpsertItem {
    pub action: BackendAction,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub client_id: Option<String>,
    pub data: NormalizedPayload,
    pub source: UpsertSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum UpsertStatus {
    Created,
    Updated,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpsertItemResult {
    pub status: UpsertStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionCounters {
    pub created: usize,
    pub updated: usize,
    pub ignored: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopError {
    pub message: String,
    pub count: usize,
}

/// One record per completed (or interrupted) run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub import_id: String,
    pub file_name: String,
    pub created_at: DateTime<Utc>,
    pub created_count: usize,
    pub updated_count: usize,
    pub ignored_count: usize,
    pub error_count: usize,
    pub top_errors: Vec<TopError>,
}

pub const DEFAULT_BATCH_SIZE: usize = 200;
pub const DEFAULT_TOP_ERRORS_LIMIT: usize = 5;
pub const DEFAULT_MAPPING_MODEL_CAPACITY: usize = 5;
pub const DEFAULT_REVIEW_PENDING_TAG: &str = "Revisão pendente";
pub const REVIEW_PENDING_FLAG: &str = "reviewPending";
pub const DEFAULT_BIRTHDAY_YEAR_CUTOFF: i32 = 2000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportConfig {
    #[schemars(description = "Number of upsert items sent per collaborator call.")]
    pub batch_size: usize,

    #[schemars(description = "How many of the most frequent error messages the audit record keeps.")]
    pub top_errors_limit: usize,

    #[schemars(description = "How many saved mapping models are kept (most recently used first).")]
    pub mapping_model_capacity: usize,

    #[schemars(description = "Spreadsheet line number of the first data row (the header is line 1).")]
    pub first_data_row_number: u32,

    #[schemars(description = "Tag appended to rows whose account column is empty.")]
    pub review_pending_tag: String,

    #[schemars(description = "Birthdays in or after this year only keep day and month.")]
    pub birthday_year_cutoff: i32,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            top_errors_limit: DEFAULT_TOP_ERRORS_LIMIT,
            mapping_model_capacity: DEFAULT_MAPPING_MODEL_CAPACITY,
            first_data_row_number: 2,
            review_pending_tag: DEFAULT_REVIEW_PENDING_TAG.to_string(),
            birthday_year_cutoff: DEFAULT_BIRTHDAY_YEAR_CUTOFF,
        }
    }
}

impl ImportConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ImportConfig)
    }
}
