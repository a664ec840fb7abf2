use crate::schema::{ColumnMapping, ColumnTarget, FieldKey};
use crate::utils::fold_text;
use chrono::{DateTime, Utc};
use log::debug;
use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

const EXACT_SCORE: u32 = 100;
const HEADER_CONTAINS_HINT_SCORE: u32 = 60;
const HINT_CONTAINS_HEADER_SCORE: u32 = 40;
const MIN_ASSIGN_SCORE: u32 = 60;

/// Folded header spellings each field is recognised by.
pub fn field_hints(field: FieldKey) -> &'static [&'static str] {
    match field {
        FieldKey::Name => &["nome", "nome do cliente", "nome completo", "cliente", "name"],
        FieldKey::AccountNumber => &["conta", "numero da conta", "codigo da conta", "account"],
        FieldKey::InvestorProfile => &["perfil", "perfil investidor", "perfil do investidor", "suitability"],
        FieldKey::Email => &["email", "e mail"],
        FieldKey::Phone => &["telefone", "celular", "whatsapp", "phone"],
        FieldKey::Document => &["cpf", "cnpj", "cpf cnpj", "documento"],
        FieldKey::Status => &["status", "situacao"],
        FieldKey::Origin => &["origem", "canal de origem", "indicacao"],
        FieldKey::Notes => &["observacoes", "observacao", "notas", "obs"],
        FieldKey::Custody => &["custodia", "custodia atual", "patrimonio"],
        FieldKey::TotalBrl => &["total brl", "net total", "pl total"],
        FieldKey::OnshoreBrl => &["onshore", "onshore brl"],
        FieldKey::OffshoreBrl => &["offshore", "offshore brl"],
        FieldKey::CdiYearPct => &["cdi", "cdi ano", "rentabilidade cdi"],
        FieldKey::HasFixedFee => &["fee fixo", "taxa fixa", "fixed fee"],
        FieldKey::NextMeetingAt => &["proxima reuniao", "reuniao"],
        FieldKey::Birthday => &["aniversario", "data de nascimento", "nascimento"],
    }
}

/// Scores a folded header against one field's hints.
pub fn score_header(folded_header: &str, field: FieldKey) -> u32 {
    if folded_header.is_empty() {
        return 0;
    }

    field_hints(field)
        .iter()
        .map(|hint| {
            if folded_header == *hint {
                EXACT_SCORE
            } else if folded_header.contains(hint) {
                HEADER_CONTAINS_HINT_SCORE
            } else if hint.contains(folded_header) {
                HINT_CONTAINS_HEADER_SCORE
            } else {
                0
            }
        })
        .max()
        .unwrap_or(0)
}

/// Proposes a mapping for `headers`, greedily in header order.
///
/// Each header takes its best-scoring field not already claimed, provided the
/// score reaches 60. Ties go to the field listed first in [`FieldKey::ALL`].
pub fn auto_map(headers: &[String]) -> ColumnMapping {
    let mut mapping = ColumnMapping::new();
    let mut claimed: HashSet<FieldKey> = HashSet::new();

    for header in headers {
        // a repeated header keeps the target of its first occurrence
        if mapping.contains(header) {
            continue;
        }
        let folded = fold_text(header);

        let mut best: Option<(FieldKey, u32)> = None;
        for field in FieldKey::ALL {
            if claimed.contains(&field) {
                continue;
            }
            let score = score_header(&folded, field);
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((field, score));
            }
        }

        let target = match best {
            Some((field, score)) if score >= MIN_ASSIGN_SCORE => {
                claimed.insert(field);
                debug!("Mapped column '{}' to {} (score {})", header, field, score);
                ColumnTarget::Field(field)
            }
            _ => ColumnTarget::Ignore,
        };

        mapping.set(header.clone(), target);
    }

    mapping
}

/// A named, reusable column mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MappingModel {
    pub id: String,
    pub name: String,
    pub mapping: ColumnMapping,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

/// Copies the saved targets for headers present in both; the rest are ignored.
pub fn apply_mapping_model(model: &MappingModel, headers: &[String]) -> ColumnMapping {
    let mut mapping = ColumnMapping::new();
    for header in headers {
        mapping.set(header.clone(), model.mapping.target(header));
    }
    mapping
}

/// Saved mapping models, most recently used first, bounded by `capacity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingModelStore {
    capacity: usize,
    models: VecDeque<MappingModel>,
}

impl MappingModelStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            models: VecDeque::new(),
        }
    }

    pub fn list(&self) -> impl Iterator<Item = &MappingModel> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&MappingModel> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Saves under `name`, replacing a model with the same name (case and
    /// accents ignored). Returns the models evicted to stay within capacity.
    pub fn save(
        &mut self,
        name: &str,
        mapping: ColumnMapping,
        now: DateTime<Utc>,
    ) -> (MappingModel, Vec<MappingModel>) {
        let folded = fold_text(name);
        let existing = self
            .models
            .iter()
            .position(|m| fold_text(&m.name) == folded)
            .and_then(|idx| self.models.remove(idx));

        let model = match existing {
            Some(mut model) => {
                model.name = name.trim().to_string();
                model.mapping = mapping;
                model.updated_at = now;
                model.last_used_at = now;
                model
            }
            None => MappingModel {
                id: new_model_id(),
                name: name.trim().to_string(),
                mapping,
                created_at: now,
                updated_at: now,
                last_used_at: now,
            },
        };

        self.models.push_front(model.clone());

        let mut evicted = Vec::new();
        while self.models.len() > self.capacity {
            if let Some(old) = self.models.pop_back() {
                debug!("Evicting mapping model '{}'", old.name);
                evicted.push(old);
            }
        }

        (model, evicted)
    }

    /// Marks a model as used and moves it to the front.
    pub fn use_model(&mut self, id: &str, now: DateTime<Utc>) -> Option<&MappingModel> {
        let idx = self.models.iter().position(|m| m.id == id)?;
        let mut model = self.models.remove(idx)?;
        model.last_used_at = now;
        self.models.push_front(model);
        self.models.front()
    }

    pub fn remove(&mut self, id: &str) -> Option<MappingModel> {
        let idx = self.models.iter().position(|m| m.id == id)?;
        self.models.remove(idx)
    }
}

fn new_model_id() -> String {
    format!("mapping-{:016x}", rand::thread_rng().gen::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_scores() {
        assert_eq!(score_header("nome", FieldKey::Name), 100);
        assert_eq!(score_header("nome cliente xp", FieldKey::Name), 60);
        assert_eq!(score_header("perf", FieldKey::InvestorProfile), 40);
        assert_eq!(score_header("", FieldKey::Name), 0);
    }

    #[test]
    fn test_auto_map_typical_sheet() {
        let mapping = auto_map(&headers(&[
            "Nome",
            "Conta",
            "Perfil Investidor",
            "E-mail",
            "Custódia",
            "% CDI",
            "Fee Fixo?",
            "Próxima Reunião",
            "Aniversário",
            "Coluna Estranha",
        ]));

        assert_eq!(mapping.target("Nome"), ColumnTarget::Field(FieldKey::Name));
        assert_eq!(mapping.target("Conta"), ColumnTarget::Field(FieldKey::AccountNumber));
        assert_eq!(
            mapping.target("Perfil Investidor"),
            ColumnTarget::Field(FieldKey::InvestorProfile)
        );
        assert_eq!(mapping.target("E-mail"), ColumnTarget::Field(FieldKey::Email));
        assert_eq!(mapping.target("Custódia"), ColumnTarget::Field(FieldKey::Custody));
        assert_eq!(mapping.target("% CDI"), ColumnTarget::Field(FieldKey::CdiYearPct));
        assert_eq!(mapping.target("Fee Fixo?"), ColumnTarget::Field(FieldKey::HasFixedFee));
        assert_eq!(
            mapping.target("Próxima Reunião"),
            ColumnTarget::Field(FieldKey::NextMeetingAt)
        );
        assert_eq!(mapping.target("Aniversário"), ColumnTarget::Field(FieldKey::Birthday));
        assert_eq!(mapping.target("Coluna Estranha"), ColumnTarget::Ignore);
        assert_eq!(mapping.len(), 10);
    }

    #[test]
    fn test_auto_map_field_claimed_once() {
        let mapping = auto_map(&headers(&["Nome", "Nome Completo"]));
        assert_eq!(mapping.target("Nome"), ColumnTarget::Field(FieldKey::Name));
        assert_eq!(mapping.target("Nome Completo"), ColumnTarget::Ignore);
    }

    #[test]
    fn test_weak_match_is_not_assigned() {
        // "perf" only scores 40 against the profile hints
        let mapping = auto_map(&headers(&["Perf"]));
        assert_eq!(mapping.target("Perf"), ColumnTarget::Ignore);
    }

    #[test]
    fn test_apply_mapping_model() {
        let mut store = MappingModelStore::new(5);
        let saved = ColumnMapping::new()
            .with("Nome", ColumnTarget::Field(FieldKey::Name))
            .with("Conta XP", ColumnTarget::Field(FieldKey::AccountNumber));
        let (model, _) = store.save("Planilha XP", saved, at(9));

        let mapping = apply_mapping_model(&model, &headers(&["Nome", "Telefone"]));
        assert_eq!(mapping.target("Nome"), ColumnTarget::Field(FieldKey::Name));
        assert_eq!(mapping.target("Telefone"), ColumnTarget::Ignore);
        assert_eq!(mapping.len(), 2);
    }

    #[test]
    fn test_store_is_bounded_most_recent_first() {
        let mut store = MappingModelStore::new(2);
        let (first, _) = store.save("A", ColumnMapping::new(), at(1));
        store.save("B", ColumnMapping::new(), at(2));

        // touching A makes B the least recently used
        assert!(store.use_model(&first.id, at(3)).is_some());
        let (_, evicted) = store.save("C", ColumnMapping::new(), at(4));

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].name, "B");
        let names: Vec<&str> = store.list().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["C", "A"]);
    }

    #[test]
    fn test_store_replaces_same_name() {
        let mut store = MappingModelStore::new(5);
        let (original, _) = store.save("Padrão", ColumnMapping::new(), at(1));
        let updated_mapping = ColumnMapping::new().with("Nome", ColumnTarget::Field(FieldKey::Name));
        let (updated, evicted) = store.save("padrao", updated_mapping.clone(), at(2));

        assert!(evicted.is_empty());
        assert_eq!(store.len(), 1);
        assert_eq!(updated.id, original.id);
        assert_eq!(updated.created_at, at(1));
        assert_eq!(updated.updated_at, at(2));
        assert_eq!(updated.mapping, updated_mapping);
    }

    #[test]
    fn test_use_unknown_model() {
        let mut store = MappingModelStore::new(5);
        assert!(store.use_model("missing", at(1)).is_none());
        assert!(store.remove("missing").is_none());
    }

    #[test]
    fn test_repeated_header_keeps_first_claim() {
        let mapping = auto_map(&headers(&["Nome", "Conta", "Nome"]));
        assert_eq!(mapping.target("Nome"), ColumnTarget::Field(FieldKey::Name));
        assert_eq!(mapping.header_for(FieldKey::Name), Some("Nome"));
        assert_eq!(mapping.len(), 2);
    }
}
