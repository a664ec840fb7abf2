use crate::schema::{
    Birthday, CellValue, ClientStatus, ColumnMapping, FieldKey, ImportConfig, ImportIssue,
    InvestorProfile, NormalizeResult, NormalizedPayload, RawRow, REVIEW_PENDING_FLAG,
};
use crate::utils::{
    cell_to_bool, cell_to_datetime, cell_to_number, cell_to_text, fold_text, normalize_account,
    CellParse,
};
use chrono::{Datelike, NaiveDate};

pub const NAME_MISSING: &str = "name_missing";
pub const ACCOUNT_MISSING: &str = "account_missing";

const PROFILE_VOCABULARY: &[(InvestorProfile, &[&str])] = &[
    (InvestorProfile::Conservative, &["conservador", "conservative"]),
    (InvestorProfile::Moderate, &["moderado", "moderate"]),
    (
        InvestorProfile::Aggressive,
        &["arrojado", "agressivo", "sofisticado", "aggressive"],
    ),
];

// "inativo" contains "ativo", so the inactive spellings are tried first.
const STATUS_VOCABULARY: &[(ClientStatus, &[&str])] = &[
    (ClientStatus::Inactive, &["inativo", "inactive"]),
    (ClientStatus::Active, &["ativo", "active"]),
    (ClientStatus::Onboarding, &["onboarding", "implantacao"]),
];

pub fn row_id_for(row_number: u32) -> String {
    format!("import-row-{}", row_number)
}

/// Decides how much of an imported birth date to keep.
///
/// Dates in or after `cutoff_year` are assumed to carry a placeholder year
/// (spreadsheets commonly fill in the current year), so only day and month
/// survive. Earlier dates are kept whole.
pub fn birthday_policy(date: NaiveDate, cutoff_year: i32) -> Birthday {
    if date.year() >= cutoff_year {
        Birthday::DayMonth {
            day: date.day(),
            month: date.month(),
        }
    } else {
        Birthday::FullDate { date }
    }
}

fn match_vocabulary<T: Copy>(value: &str, vocabulary: &[(T, &[&str])]) -> Option<T> {
    let folded = fold_text(value);
    vocabulary
        .iter()
        .find(|(_, spellings)| spellings.iter().any(|s| folded.contains(s)))
        .map(|(item, _)| *item)
}

/// Turns raw rows into typed payloads for one mapping.
pub struct RowNormalizer<'a> {
    mapping: &'a ColumnMapping,
    config: &'a ImportConfig,
}

impl<'a> RowNormalizer<'a> {
    pub fn new(mapping: &'a ColumnMapping, config: &'a ImportConfig) -> Self {
        Self { mapping, config }
    }

    pub fn normalize(&self, raw: &RawRow, row_number: u32) -> NormalizeResult {
        let mut payload = NormalizedPayload::default();
        let mut issues = Vec::new();
        let mut account_number = String::new();

        for field in FieldKey::ALL {
            let Some(header) = self.mapping.header_for(field) else {
                continue;
            };
            let cell = raw.get(header).unwrap_or(&CellValue::Empty);

            match field {
                FieldKey::Name => {
                    let name = cell_to_text(cell);
                    if name.is_empty() {
                        issues.push(name_missing_issue());
                    } else {
                        payload.name = Some(name);
                    }
                }
                FieldKey::AccountNumber => {
                    account_number = normalize_account(&cell_to_text(cell));
                    if account_number.is_empty() {
                        self.mark_review_pending(&mut payload);
                        issues.push(ImportIssue::warning(
                            ACCOUNT_MISSING,
                            format!("Column '{}' has no account number; row flagged for review", header),
                            field,
                        ));
                    } else {
                        payload.account_number = Some(account_number.clone());
                    }
                }
                FieldKey::Email => payload.email = optional_text(cell),
                FieldKey::Phone => payload.phone = optional_text(cell),
                FieldKey::Document => payload.document = optional_text(cell),
                FieldKey::Origin => payload.origin = optional_text(cell),
                FieldKey::Notes => payload.notes = optional_text(cell),
                FieldKey::InvestorProfile => {
                    payload.investor_profile =
                        parse_enumerated(cell, field, PROFILE_VOCABULARY, &mut issues);
                }
                FieldKey::Status => {
                    payload.status = parse_enumerated(cell, field, STATUS_VOCABULARY, &mut issues);
                }
                FieldKey::Custody => {
                    if let Some(value) = parse_numeric(cell, field, &mut issues) {
                        payload.custody_amount = Some(value);
                    }
                }
                FieldKey::TotalBrl => {
                    if let Some(value) = parse_numeric(cell, field, &mut issues) {
                        payload.metrics_mut().total_brl = Some(value);
                    }
                }
                FieldKey::OnshoreBrl => {
                    if let Some(value) = parse_numeric(cell, field, &mut issues) {
                        payload.metrics_mut().onshore_brl = Some(value);
                    }
                }
                FieldKey::OffshoreBrl => {
                    if let Some(value) = parse_numeric(cell, field, &mut issues) {
                        payload.metrics_mut().offshore_brl = Some(value);
                    }
                }
                FieldKey::CdiYearPct => {
                    // the sheet stores a fraction (1.05), the payload a percentage (105)
                    if let Some(value) = parse_numeric(cell, field, &mut issues) {
                        payload.metrics_mut().cdi_year_pct = Some(value * 100.0);
                    }
                }
                FieldKey::HasFixedFee => match cell_to_bool(cell) {
                    CellParse::Parsed(value) => payload.flags_mut().has_fixed_fee = Some(value),
                    CellParse::Blank => {}
                    CellParse::Invalid => issues.push(invalid_issue(field, cell)),
                },
                FieldKey::NextMeetingAt => match cell_to_datetime(cell) {
                    CellParse::Parsed(dt) => payload.next_meeting_at = Some(dt.and_utc()),
                    CellParse::Blank => {}
                    CellParse::Invalid => issues.push(invalid_issue(field, cell)),
                },
                FieldKey::Birthday => match cell_to_datetime(cell) {
                    CellParse::Parsed(dt) => {
                        payload.birthday =
                            Some(birthday_policy(dt.date(), self.config.birthday_year_cutoff));
                    }
                    CellParse::Blank => {}
                    CellParse::Invalid => issues.push(invalid_issue(field, cell)),
                },
            }
        }

        if payload.name.is_none() && !issues.iter().any(|i| i.code == NAME_MISSING) {
            issues.push(name_missing_issue());
        }

        let has_blocking_error = issues.iter().any(ImportIssue::is_blocking);

        NormalizeResult {
            row_id: row_id_for(row_number),
            row_number,
            raw: raw.clone(),
            payload,
            account_number,
            issues,
            has_blocking_error,
        }
    }

    fn mark_review_pending(&self, payload: &mut NormalizedPayload) {
        payload
            .custom_flags
            .insert(REVIEW_PENDING_FLAG.to_string(), true);
        if !payload.tags.contains(&self.config.review_pending_tag) {
            payload.tags.push(self.config.review_pending_tag.clone());
        }
    }
}

/// Normalizes one row with the default configuration.
pub fn normalize_row(raw: &RawRow, row_number: u32, mapping: &ColumnMapping) -> NormalizeResult {
    let config = ImportConfig::default();
    RowNormalizer::new(mapping, &config).normalize(raw, row_number)
}

fn name_missing_issue() -> ImportIssue {
    ImportIssue::error(NAME_MISSING, "Client name is required", FieldKey::Name)
}

fn invalid_issue(field: FieldKey, cell: &CellValue) -> ImportIssue {
    ImportIssue::warning(
        format!("{}_invalid", field.issue_prefix()),
        format!(
            "Could not read '{}' as {}; the field was left out",
            cell_to_text(cell),
            field
        ),
        field,
    )
}

fn optional_text(cell: &CellValue) -> Option<String> {
    Some(cell_to_text(cell)).filter(|s| !s.is_empty())
}

fn parse_enumerated<T: Copy>(
    cell: &CellValue,
    field: FieldKey,
    vocabulary: &[(T, &[&str])],
    issues: &mut Vec<ImportIssue>,
) -> Option<T> {
    let text = cell_to_text(cell);
    if text.is_empty() {
        return None;
    }
    let matched = match_vocabulary(&text, vocabulary);
    if matched.is_none() {
        issues.push(invalid_issue(field, cell));
    }
    matched
}

fn parse_numeric(cell: &CellValue, field: FieldKey, issues: &mut Vec<ImportIssue>) -> Option<f64> {
    match cell_to_number(cell) {
        CellParse::Parsed(value) => Some(value),
        CellParse::Blank => None,
        CellParse::Invalid => {
            issues.push(invalid_issue(field, cell));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnTarget, IssueSeverity};

    fn mapping() -> ColumnMapping {
        ColumnMapping::new()
            .with("Nome", ColumnTarget::Field(FieldKey::Name))
            .with("Conta", ColumnTarget::Field(FieldKey::AccountNumber))
            .with("Perfil", ColumnTarget::Field(FieldKey::InvestorProfile))
            .with("Status", ColumnTarget::Field(FieldKey::Status))
            .with("Custódia", ColumnTarget::Field(FieldKey::Custody))
            .with("Total", ColumnTarget::Field(FieldKey::TotalBrl))
            .with("CDI", ColumnTarget::Field(FieldKey::CdiYearPct))
            .with("Fee", ColumnTarget::Field(FieldKey::HasFixedFee))
            .with("Reunião", ColumnTarget::Field(FieldKey::NextMeetingAt))
            .with("Aniversário", ColumnTarget::Field(FieldKey::Birthday))
            .with("Email", ColumnTarget::Field(FieldKey::Email))
            .with("Lixo", ColumnTarget::Ignore)
    }

    fn row(cells: &[(&str, CellValue)]) -> RawRow {
        cells
            .iter()
            .map(|(h, v)| (h.to_string(), v.clone()))
            .collect()
    }

    fn codes(result: &NormalizeResult) -> Vec<&str> {
        result.issues.iter().map(|i| i.code.as_str()).collect()
    }

    #[test]
    fn test_full_row() {
        let raw = row(&[
            ("Nome", CellValue::text("  Maria Souza ")),
            ("Conta", CellValue::text("12.345-6")),
            ("Perfil", CellValue::text("MODERADO")),
            ("Status", CellValue::text("Ativo")),
            ("Custódia", CellValue::text("1.234,56")),
            ("Total", CellValue::Number(5000.0)),
            ("CDI", CellValue::text("1,05")),
            ("Fee", CellValue::text("Sim")),
            ("Reunião", CellValue::text("15/03/2024 14:30")),
            ("Aniversário", CellValue::text("10/07/1985")),
            ("Email", CellValue::text("  ")),
            ("Lixo", CellValue::text("whatever")),
        ]);

        let result = normalize_row(&raw, 2, &mapping());

        assert_eq!(result.row_id, "import-row-2");
        assert!(result.issues.is_empty(), "unexpected issues: {:?}", result.issues);
        assert!(!result.has_blocking_error);
        assert_eq!(result.account_number, "123456");

        let p = &result.payload;
        assert_eq!(p.name.as_deref(), Some("Maria Souza"));
        assert_eq!(p.account_number.as_deref(), Some("123456"));
        assert_eq!(p.investor_profile, Some(InvestorProfile::Moderate));
        assert_eq!(p.status, Some(ClientStatus::Active));
        assert_eq!(p.custody_amount, Some(1234.56));
        assert!(p.email.is_none());

        let metrics = p.metrics.as_ref().unwrap();
        assert_eq!(metrics.total_brl, Some(5000.0));
        assert!((metrics.cdi_year_pct.unwrap() - 105.0).abs() < 1e-9);
        assert!(metrics.onshore_brl.is_none());

        assert_eq!(p.flags.as_ref().unwrap().has_fixed_fee, Some(true));
        assert_eq!(
            p.next_meeting_at.unwrap().format("%Y-%m-%d %H:%M").to_string(),
            "2024-03-15 14:30"
        );
        assert_eq!(
            p.birthday,
            Some(Birthday::FullDate {
                date: NaiveDate::from_ymd_opt(1985, 7, 10).unwrap()
            })
        );
    }

    #[test]
    fn test_blank_name_is_blocking() {
        let raw = row(&[("Nome", CellValue::text("   ")), ("Conta", CellValue::text("1"))]);
        let result = normalize_row(&raw, 3, &mapping());

        assert_eq!(codes(&result), vec![NAME_MISSING]);
        assert_eq!(result.issues[0].severity, IssueSeverity::Error);
        assert!(result.has_blocking_error);
    }

    #[test]
    fn test_unmapped_name_synthesizes_issue() {
        let mapping = ColumnMapping::new().with("Conta", ColumnTarget::Field(FieldKey::AccountNumber));
        let raw = row(&[("Conta", CellValue::Number(77.0))]);
        let result = normalize_row(&raw, 2, &mapping);

        assert_eq!(codes(&result), vec![NAME_MISSING]);
        assert_eq!(result.account_number, "77");
    }

    #[test]
    fn test_empty_account_flags_review_without_blocking() {
        let raw = row(&[("Nome", CellValue::text("João")), ("Conta", CellValue::text("n/d"))]);
        let result = normalize_row(&raw, 2, &mapping());

        assert_eq!(codes(&result), vec![ACCOUNT_MISSING]);
        assert_eq!(result.issues[0].severity, IssueSeverity::Warning);
        assert!(!result.has_blocking_error);
        assert_eq!(result.account_number, "");
        assert!(result.payload.account_number.is_none());
        assert_eq!(result.payload.custom_flags.get("reviewPending"), Some(&true));
        assert_eq!(result.payload.tags, vec!["Revisão pendente".to_string()]);
    }

    #[test]
    fn test_invalid_optional_fields_are_dropped_with_warnings() {
        let raw = row(&[
            ("Nome", CellValue::text("Ana")),
            ("Conta", CellValue::text("99")),
            ("Perfil", CellValue::text("Ousado")),
            ("Custódia", CellValue::text("abc")),
            ("Fee", CellValue::text("talvez")),
            ("Reunião", CellValue::text("amanhã")),
        ]);
        let result = normalize_row(&raw, 2, &mapping());

        assert_eq!(
            codes(&result),
            vec![
                "investor_profile_invalid",
                "custody_invalid",
                "has_fixed_fee_invalid",
                "next_meeting_at_invalid"
            ]
        );
        assert!(!result.has_blocking_error);
        assert!(result.payload.investor_profile.is_none());
        assert!(result.payload.custody_amount.is_none());
        assert!(result.payload.flags.is_none());
        assert!(result.payload.next_meeting_at.is_none());
    }

    #[test]
    fn test_status_inactive_not_confused_with_active() {
        let raw = row(&[("Nome", CellValue::text("Ana")), ("Status", CellValue::text("Inativo"))]);
        let result = normalize_row(&raw, 2, &mapping());
        assert_eq!(result.payload.status, Some(ClientStatus::Inactive));
    }

    #[test]
    fn test_birthday_policy_drops_placeholder_year() {
        let recent = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(
            birthday_policy(recent, 2000),
            Birthday::DayMonth { day: 29, month: 2 }
        );

        let old = NaiveDate::from_ymd_opt(1999, 12, 31).unwrap();
        assert_eq!(birthday_policy(old, 2000), Birthday::FullDate { date: old });
    }

    #[test]
    fn test_birthday_from_serial_date() {
        let raw = row(&[("Nome", CellValue::text("Ana")), ("Aniversário", CellValue::Number(45292.0))]);
        let result = normalize_row(&raw, 2, &mapping());
        assert_eq!(result.payload.birthday, Some(Birthday::DayMonth { day: 1, month: 1 }));
    }

    #[test]
    fn test_normalization_is_deterministic() {
        let raw = row(&[
            ("Nome", CellValue::text("Ana")),
            ("Conta", CellValue::text("")),
            ("Custódia", CellValue::text("x")),
        ]);
        let first = normalize_row(&raw, 5, &mapping());
        let second = normalize_row(&raw, 5, &mapping());
        assert_eq!(first, second);
    }
}
