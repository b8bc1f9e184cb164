use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::utils::{canonical_cpf, normalize_text};

/// One court-registered expert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeritoInfo {
    #[serde(alias = "nome")]
    pub name: String,
    #[serde(default)]
    pub cpf: Option<String>,
    #[serde(default, alias = "especialidade")]
    pub specialty: Option<String>,
}

impl PeritoInfo {
    fn specialty(&self) -> Option<&str> {
        self.specialty.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Result of a name lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NameMatch<'a> {
    pub info: &'a PeritoInfo,
    /// The name maps to entries with different specialties.
    pub ambiguous: bool,
}

/// Expert catalog keyed by CPF and by normalized name.
#[derive(Debug, Default)]
pub struct PeritoCatalog {
    entries: Vec<PeritoInfo>,
    by_cpf: HashMap<String, usize>,
    by_name: HashMap<String, Vec<usize>>,
}

impl PeritoCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// JSON array of experts; a missing or malformed file gives an empty catalog.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let parsed = std::fs::read_to_string(path)
            .map_err(crate::error::ExtractError::from)
            .and_then(|text| Self::from_json_str(&text));
        match parsed {
            Ok(catalog) => {
                info!(path = %path.display(), entries = catalog.len(), "loaded perito catalog");
                catalog
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "perito catalog not loaded");
                Self::empty()
            }
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let entries: Vec<PeritoInfo> = serde_json::from_str(text)?;
        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(entries: Vec<PeritoInfo>) -> Self {
        let mut by_cpf = HashMap::new();
        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            if let Some(cpf) = entry.cpf.as_deref().and_then(canonical_cpf) {
                by_cpf.entry(cpf).or_insert(i);
            }
            let key = normalize_text(&entry.name);
            if !key.is_empty() {
                by_name.entry(key).or_default().push(i);
            }
        }
        PeritoCatalog {
            entries,
            by_cpf,
            by_name,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn by_cpf(&self, cpf: &str) -> Option<&PeritoInfo> {
        let cpf = canonical_cpf(cpf)?;
        self.by_cpf.get(&cpf).map(|&i| &self.entries[i])
    }

    /// Entry for a name; entries with a specialty win ties.
    pub fn by_name(&self, name: &str) -> Option<NameMatch<'_>> {
        let hits = self.by_name.get(&normalize_text(name))?;
        let mut specialties: Vec<String> = hits
            .iter()
            .filter_map(|&i| self.entries[i].specialty())
            .map(normalize_text)
            .collect();
        specialties.sort();
        specialties.dedup();

        let info = hits
            .iter()
            .map(|&i| &self.entries[i])
            .find(|e| e.specialty().is_some())
            .or_else(|| hits.first().map(|&i| &self.entries[i]))?;
        Some(NameMatch {
            info,
            ambiguous: specialties.len() > 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"[
        {"nome": "MARIA SOUZA", "cpf": "123.456.789-09", "especialidade": "Psicologia"},
        {"name": "João Pereira", "specialty": ""},
        {"name": "JOAO PEREIRA", "specialty": "Medicina do Trabalho"},
        {"name": "Ana Costa", "specialty": "Engenharia"},
        {"name": "ana costa", "specialty": "Contabilidade"}
    ]"#;

    #[test]
    fn lookups_by_cpf_and_name() {
        let catalog = PeritoCatalog::from_json_str(CATALOG).unwrap();
        assert_eq!(catalog.len(), 5);
        assert_eq!(catalog.by_cpf("12345678909").unwrap().name, "MARIA SOUZA");
        assert!(catalog.by_cpf("000").is_none());

        let m = catalog.by_name("Maria  Souza").unwrap();
        assert_eq!(m.info.specialty.as_deref(), Some("Psicologia"));
        assert!(!m.ambiguous);
    }

    #[test]
    fn specialty_breaks_ties_and_conflicts_are_flagged() {
        let catalog = PeritoCatalog::from_json_str(CATALOG).unwrap();
        let joao = catalog.by_name("joão pereira").unwrap();
        assert_eq!(joao.info.specialty.as_deref(), Some("Medicina do Trabalho"));
        assert!(!joao.ambiguous);
        assert!(catalog.by_name("Ana Costa").unwrap().ambiguous);
    }

    #[test]
    fn unreadable_catalog_is_empty() {
        assert!(PeritoCatalog::load("/nonexistent/peritos.json").is_empty());
        assert!(PeritoCatalog::from_json_str("{}").is_err());
    }
}
