use std::collections::BTreeMap;

use crate::config::CatalogConfig;
use crate::document::{Evidence, Field, FieldName};
use crate::fields::clean::looks_noisy;
use crate::honorarios::HonorariosTable;
use crate::log::RunLog;
use crate::perito::{PeritoCatalog, PeritoInfo};
use crate::utils::{canonical_cpf, format_money, parse_money};

const CPF_CONFIDENCE: f64 = 0.9;
const NAME_CONFIDENCE: f64 = 0.85;
const AMBIGUOUS_CONFIDENCE: f64 = 0.55;

/// Fills expert and fee fields from the catalogs.
pub struct Enricher<'a> {
    config: &'a CatalogConfig,
    peritos: &'a PeritoCatalog,
    honorarios: &'a HonorariosTable,
}

impl<'a> Enricher<'a> {
    pub fn new(config: &'a CatalogConfig, peritos: &'a PeritoCatalog, honorarios: &'a HonorariosTable) -> Self {
        Enricher {
            config,
            peritos,
            honorarios,
        }
    }

    pub fn enrich(&self, fields: &mut BTreeMap<FieldName, Field>, warnings: &mut Vec<String>, log: &mut RunLog) {
        self.enrich_perito(fields, warnings, log);
        self.enrich_fee(fields, log);
    }

    /// Worth a catalog lookup: something about the expert is missing,
    /// uncertain or looks garbled.
    fn needs_perito(&self, fields: &BTreeMap<FieldName, Field>) -> bool {
        let missing = [FieldName::Perito, FieldName::PeritoCpf, FieldName::Especialidade]
            .iter()
            .any(|f| value(fields, *f).is_none());
        let weak = fields
            .get(&FieldName::Perito)
            .filter(|f| !f.is_absent())
            .is_some_and(|f| f.confidence < self.config.low_confidence || looks_noisy(&f.value));
        missing || weak
    }

    fn enrich_perito(&self, fields: &mut BTreeMap<FieldName, Field>, warnings: &mut Vec<String>, log: &mut RunLog) {
        if self.peritos.is_empty() || !self.needs_perito(fields) {
            return;
        }
        let evidence = [FieldName::Perito, FieldName::PeritoCpf]
            .iter()
            .filter_map(|f| fields.get(f))
            .find_map(|f| f.evidence.clone());

        if let Some(info) = value(fields, FieldName::PeritoCpf).and_then(|cpf| self.peritos.by_cpf(cpf)) {
            log.info("catalog", format!("perito {} matched by CPF", info.name));
            apply(fields, info, CPF_CONFIDENCE, "catalog_cpf", evidence);
            return;
        }

        let Some(found) = value(fields, FieldName::Perito).and_then(|name| self.peritos.by_name(name)) else {
            return;
        };
        let confidence = if found.ambiguous {
            log.warn("catalog", format!("perito {} has conflicting catalog entries", found.info.name));
            warnings.push("perito_ambiguous".to_string());
            AMBIGUOUS_CONFIDENCE
        } else {
            log.info("catalog", format!("perito {} matched by name", found.info.name));
            NAME_CONFIDENCE
        };
        apply(fields, found.info, confidence, "catalog", evidence);
    }

    /// Tabulated fee for the authorized amount, looked up by specialty.
    fn enrich_fee(&self, fields: &mut BTreeMap<FieldName, Field>, log: &mut RunLog) {
        if self.honorarios.is_empty() {
            return;
        }
        let Some(specialty) = value(fields, FieldName::Especialidade) else {
            return;
        };
        let source = if value(fields, FieldName::ValorArbitradoDe).is_some() {
            FieldName::ValorArbitradoDe
        } else if self.config.allow_first_page_value && value(fields, FieldName::ValorArbitradoJz).is_some() {
            FieldName::ValorArbitradoJz
        } else {
            return;
        };
        let Some(amount) = fields.get(&source) else {
            return;
        };
        let Some(cents) = parse_money(&amount.value) else {
            return;
        };
        let hint = value(fields, FieldName::EspeciePericia).unwrap_or("");
        let Some(m) = self.honorarios.resolve(
            specialty,
            hint,
            cents,
            &self.config.area_keywords,
            self.config.value_tolerance,
        ) else {
            log.debug("catalog", format!("no fee row for {} at {}", specialty, amount.value));
            return;
        };

        let evidence = amount.evidence.clone();
        let tabelado = Field::found(format_money(m.cents), m.confidence, m.method, evidence.clone());
        let especie = Field::found(m.entry.descricao.clone(), m.confidence, m.method, evidence);
        log.info("catalog", format!("fee row {} ({})", m.entry.id, m.method));

        if weaker(fields, FieldName::ValorTabelado, m.confidence) {
            fields.insert(FieldName::ValorTabelado, tabelado);
        }
        if value(fields, FieldName::EspeciePericia).is_none() {
            fields.insert(FieldName::EspeciePericia, especie);
        }
    }
}

fn value(fields: &BTreeMap<FieldName, Field>, name: FieldName) -> Option<&str> {
    fields.get(&name).filter(|f| !f.is_absent()).map(|f| f.value.as_str())
}

fn weaker(fields: &BTreeMap<FieldName, Field>, name: FieldName, confidence: f64) -> bool {
    fields.get(&name).is_none_or(|f| f.is_absent() || f.confidence < confidence)
}

/// Catalog values replace absent, weaker or garbled ones.
fn apply(
    fields: &mut BTreeMap<FieldName, Field>,
    info: &PeritoInfo,
    confidence: f64,
    method: &str,
    evidence: Option<Evidence>,
) {
    let noisy = value(fields, FieldName::Perito).is_some_and(looks_noisy);
    if noisy || weaker(fields, FieldName::Perito, confidence) {
        fields.insert(
            FieldName::Perito,
            Field::found(info.name.trim(), confidence, method, evidence.clone()),
        );
    }
    if value(fields, FieldName::PeritoCpf).is_none() {
        if let Some(cpf) = info.cpf.as_deref().and_then(canonical_cpf) {
            fields.insert(FieldName::PeritoCpf, Field::found(cpf, confidence, method, evidence.clone()));
        }
    }
    if let Some(specialty) = info.specialty.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        if weaker(fields, FieldName::Especialidade, confidence) {
            fields.insert(FieldName::Especialidade, Field::found(specialty, confidence, method, evidence));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perito::PeritoInfo;
    use crate::types::BoundingBox;

    fn found(value: &str, confidence: f64) -> Field {
        Field::found(value, confidence, "regex", Some(Evidence::new(2, BoundingBox::default(), value)))
    }

    fn fields(entries: &[(FieldName, Field)]) -> BTreeMap<FieldName, Field> {
        let mut out: BTreeMap<FieldName, Field> = FieldName::ALL.iter().map(|f| (*f, Field::not_found())).collect();
        out.extend(entries.iter().cloned());
        out
    }

    fn catalog() -> PeritoCatalog {
        PeritoCatalog::from_entries(vec![
            PeritoInfo {
                name: "Maria Souza".to_string(),
                cpf: Some("123.456.789-09".to_string()),
                specialty: Some("Psicologia".to_string()),
            },
            PeritoInfo {
                name: "Ana Costa".to_string(),
                cpf: None,
                specialty: Some("Engenharia".to_string()),
            },
            PeritoInfo {
                name: "Ana Costa".to_string(),
                cpf: None,
                specialty: Some("Contabilidade".to_string()),
            },
        ])
    }

    #[test]
    fn weak_name_is_completed_from_catalog() {
        let peritos = catalog();
        let table = HonorariosTable::empty();
        let config = CatalogConfig::default();
        let mut f = fields(&[(FieldName::Perito, found("Maria Souza", 0.5))]);
        let mut warnings = Vec::new();
        Enricher::new(&config, &peritos, &table).enrich(&mut f, &mut warnings, &mut RunLog::default());

        assert_eq!(f[&FieldName::Especialidade].value, "Psicologia");
        assert_eq!(f[&FieldName::Especialidade].method, "catalog");
        assert_eq!(f[&FieldName::PeritoCpf].value, "12345678909");
        assert_eq!(f[&FieldName::Perito].confidence, NAME_CONFIDENCE);
        assert_eq!(f[&FieldName::Perito].evidence.as_ref().map(|e| e.page), Some(2));
        assert!(warnings.is_empty());
    }

    #[test]
    fn cpf_lookup_wins_over_name() {
        let peritos = catalog();
        let table = HonorariosTable::empty();
        let config = CatalogConfig::default();
        let mut f = fields(&[
            (FieldName::Perito, found("M Souza", 0.7)),
            (FieldName::PeritoCpf, found("12345678909", 0.85)),
        ]);
        Enricher::new(&config, &peritos, &table).enrich(&mut f, &mut Vec::new(), &mut RunLog::default());
        assert_eq!(f[&FieldName::Perito].value, "Maria Souza");
        assert_eq!(f[&FieldName::Perito].method, "catalog_cpf");
    }

    #[test]
    fn ambiguous_name_is_flagged() {
        let peritos = catalog();
        let table = HonorariosTable::empty();
        let config = CatalogConfig::default();
        let mut f = fields(&[(FieldName::Perito, found("Ana Costa", 0.5))]);
        let mut warnings = Vec::new();
        Enricher::new(&config, &peritos, &table).enrich(&mut f, &mut warnings, &mut RunLog::default());
        assert_eq!(warnings, vec!["perito_ambiguous".to_string()]);
        assert!(f[&FieldName::Especialidade].confidence <= AMBIGUOUS_CONFIDENCE);
    }

    #[test]
    fn fee_row_backfills_tabulated_value() {
        let peritos = PeritoCatalog::empty();
        let table = HonorariosTable::from_json_str(
            r#"[{"id": "7", "area": "PSICOLOGIA", "descricao": "Avaliação psicológica", "valor": 500}]"#,
        )
        .unwrap();
        let config = CatalogConfig::default();
        let mut f = fields(&[
            (FieldName::Especialidade, found("Psicologia", 0.8)),
            (FieldName::ValorArbitradoDe, found("R$ 480,00", 0.85)),
        ]);
        Enricher::new(&config, &peritos, &table).enrich(&mut f, &mut Vec::new(), &mut RunLog::default());
        assert_eq!(f[&FieldName::ValorTabelado].value, "R$ 500,00");
        assert_eq!(f[&FieldName::ValorTabelado].method, "honorarios_area");
        assert_eq!(f[&FieldName::EspeciePericia].value, "Avaliação psicológica");
    }

    #[test]
    fn first_page_value_needs_opt_in() {
        let peritos = PeritoCatalog::empty();
        let table = HonorariosTable::from_json_str(
            r#"[{"id": "7", "area": "PSICOLOGIA", "descricao": "Avaliação psicológica", "valor": 500}]"#,
        )
        .unwrap();
        let mut config = CatalogConfig::default();
        let mut f = fields(&[
            (FieldName::Especialidade, found("Psicologia", 0.8)),
            (FieldName::ValorArbitradoJz, found("R$ 500,00", 0.85)),
        ]);
        Enricher::new(&config, &peritos, &table).enrich(&mut f, &mut Vec::new(), &mut RunLog::default());
        assert!(f[&FieldName::ValorTabelado].is_absent());

        config.allow_first_page_value = true;
        Enricher::new(&config, &peritos, &table).enrich(&mut f, &mut Vec::new(), &mut RunLog::default());
        assert_eq!(f[&FieldName::ValorTabelado].value, "R$ 500,00");
    }
}
