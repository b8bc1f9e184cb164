use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::log::LogEntry;
use crate::signature::SignatureInfo;
use crate::types::{Bookmark, BoundingBox, Paragraph, PdfInfo, Word};
use crate::utils::{ABSENT, snippet};

/// Maximum characters kept in an evidence snippet.
pub const SNIPPET_MAX: usize = 160;

/// Every field the extractor knows how to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldName {
    ProcessoJudicial,
    ProcessoAdministrativo,
    ProcessoAdme,
    Vara,
    Comarca,
    Promovente,
    Promovido,
    Perito,
    PeritoCpf,
    Especialidade,
    EspeciePericia,
    ValorArbitradoJz,
    ValorArbitradoDe,
    ValorArbitradoCm,
    ValorTabelado,
    Adiantamento,
    Percentual,
    Parcela,
    Data,
    Assinante,
    Matricula,
}

/// How arbitration treats a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCategory {
    Money,
    Party,
    Generic,
}

impl FieldName {
    pub const ALL: [FieldName; 21] = [
        FieldName::ProcessoJudicial,
        FieldName::ProcessoAdministrativo,
        FieldName::ProcessoAdme,
        FieldName::Vara,
        FieldName::Comarca,
        FieldName::Promovente,
        FieldName::Promovido,
        FieldName::Perito,
        FieldName::PeritoCpf,
        FieldName::Especialidade,
        FieldName::EspeciePericia,
        FieldName::ValorArbitradoJz,
        FieldName::ValorArbitradoDe,
        FieldName::ValorArbitradoCm,
        FieldName::ValorTabelado,
        FieldName::Adiantamento,
        FieldName::Percentual,
        FieldName::Parcela,
        FieldName::Data,
        FieldName::Assinante,
        FieldName::Matricula,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldName::ProcessoJudicial => "PROCESSO_JUDICIAL",
            FieldName::ProcessoAdministrativo => "PROCESSO_ADMINISTRATIVO",
            FieldName::ProcessoAdme => "PROCESSO_ADME",
            FieldName::Vara => "VARA",
            FieldName::Comarca => "COMARCA",
            FieldName::Promovente => "PROMOVENTE",
            FieldName::Promovido => "PROMOVIDO",
            FieldName::Perito => "PERITO",
            FieldName::PeritoCpf => "PERITO_CPF",
            FieldName::Especialidade => "ESPECIALIDADE",
            FieldName::EspeciePericia => "ESPECIE_PERICIA",
            FieldName::ValorArbitradoJz => "VALOR_ARBITRADO_JZ",
            FieldName::ValorArbitradoDe => "VALOR_ARBITRADO_DE",
            FieldName::ValorArbitradoCm => "VALOR_ARBITRADO_CM",
            FieldName::ValorTabelado => "VALOR_TABELADO",
            FieldName::Adiantamento => "ADIANTAMENTO",
            FieldName::Percentual => "PERCENTUAL",
            FieldName::Parcela => "PARCELA",
            FieldName::Data => "DATA",
            FieldName::Assinante => "ASSINANTE",
            FieldName::Matricula => "MATRICULA",
        }
    }

    pub fn category(&self) -> FieldCategory {
        match self {
            FieldName::ValorArbitradoJz
            | FieldName::ValorArbitradoDe
            | FieldName::ValorArbitradoCm
            | FieldName::ValorTabelado
            | FieldName::Adiantamento
            | FieldName::Parcela => FieldCategory::Money,
            FieldName::Promovente | FieldName::Promovido => FieldCategory::Party,
            _ => FieldCategory::Generic,
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().trim_matches(|c| c == '{' || c == '}').to_ascii_uppercase();
        FieldName::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == wanted)
            .ok_or_else(|| format!("unknown field {:?}", s))
    }
}

/// Provenance of an extracted value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evidence {
    pub page: u32,
    pub bbox: BoundingBox,
    pub snippet: String,
}

impl Evidence {
    pub fn new(page: u32, bbox: BoundingBox, text: &str) -> Self {
        Evidence {
            page,
            bbox,
            snippet: snippet(text, SNIPPET_MAX),
        }
    }
}

/// One extracted datum. `value == "-"` means absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub value: String,
    pub confidence: f64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Evidence>,
}

impl Field {
    pub const NOT_FOUND: &'static str = "not_found";

    pub fn not_found() -> Self {
        Field {
            value: ABSENT.to_string(),
            confidence: 0.1,
            method: Self::NOT_FOUND.to_string(),
            evidence: None,
        }
    }

    pub fn found(
        value: impl Into<String>,
        confidence: f64,
        method: impl Into<String>,
        evidence: Option<Evidence>,
    ) -> Self {
        let value = value.into();
        if value.trim().is_empty() || value == ABSENT {
            return Field::not_found();
        }
        let method = method.into();
        Field {
            value,
            confidence: confidence.clamp(0.0, 1.0),
            method: if method.is_empty() {
                "unknown".to_string()
            } else {
                method
            },
            evidence,
        }
    }

    pub fn is_absent(&self) -> bool {
        self.value == ABSENT
    }
}

impl Default for Field {
    fn default() -> Self {
        Field::not_found()
    }
}

/// Where a candidate window came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSource {
    Bookmark,
    Heuristic,
}

/// A scored guess at the page span of the despacho.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateWindow {
    pub start_page: u32,
    pub end_page: u32,
    /// Edit-distance score against the anchor template.
    pub edit_score: f64,
    /// Character-diff score; skipped when the edit score already clears the
    /// threshold.
    pub diff_score: Option<f64>,
    pub anchors_hit: Vec<String>,
    /// Anchor-phrase hits per page.
    pub density: BTreeMap<u32, usize>,
    pub source: WindowSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl CandidateWindow {
    pub fn best_score(&self) -> f64 {
        self.edit_score.max(self.diff_score.unwrap_or(0.0))
    }

    pub fn page_count(&self) -> u32 {
        self.end_page + 1 - self.start_page
    }

    pub fn contains(&self, page: u32) -> bool {
        (self.start_page..=self.end_page).contains(&page)
    }
}

/// Vertical page partitions, top to bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandName {
    Header,
    Subheader,
    Title,
    Body,
    Footer,
}

impl BandName {
    pub fn as_str(&self) -> &'static str {
        match self {
            BandName::Header => "header",
            BandName::Subheader => "subheader",
            BandName::Title => "title",
            BandName::Body => "body",
            BandName::Footer => "footer",
        }
    }
}

/// Flat, hashable record of one band of one page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Band {
    pub page: u32,
    pub name: BandName,
    pub text: String,
    pub bbox: BoundingBox,
    pub hash: String,
}

/// A named subset of words taken from one page.
#[derive(Debug, Clone, Serialize)]
pub struct Region {
    pub name: String,
    pub page: u32,
    #[serde(skip)]
    pub words: Vec<Word>,
    pub text: String,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Despacho,
    CertidaoCm,
}

/// One extracted document with its audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct DespachoDocument {
    pub doc_type: DocType,
    pub start_page: u32,
    pub end_page: u32,
    pub match_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    pub bands: Vec<Band>,
    pub paragraphs: Vec<Paragraph>,
    pub regions: Vec<Region>,
    pub fields: BTreeMap<FieldName, Field>,
    pub warnings: Vec<String>,
}

impl DespachoDocument {
    pub fn field(&self, name: FieldName) -> Option<&Field> {
        self.fields.get(&name)
    }

    /// Field value, `"-"` when the field is missing or absent.
    pub fn value(&self, name: FieldName) -> &str {
        self.fields.get(&name).map(|f| f.value.as_str()).unwrap_or(ABSENT)
    }

    pub fn region(&self, name: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.name == name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunInfo {
    pub engine_version: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub config_sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookmark_filter: Option<String>,
}

/// Complete output of one extraction run.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub pdf_info: PdfInfo,
    pub run_info: RunInfo,
    pub bookmarks: Vec<Bookmark>,
    pub candidates: Vec<CandidateWindow>,
    pub documents: Vec<DespachoDocument>,
    pub signatures: Vec<SignatureInfo>,
    pub errors: Vec<String>,
    pub logs: Vec<LogEntry>,
}

impl ExtractionResult {
    pub fn document(&self, doc_type: DocType) -> Option<&DespachoDocument> {
        self.documents.iter().find(|d| d.doc_type == doc_type)
    }

    pub fn despacho(&self) -> Option<&DespachoDocument> {
        self.document(DocType::Despacho)
    }

    pub fn certidao(&self) -> Option<&DespachoDocument> {
        self.document(DocType::CertidaoCm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_sentinel() {
        let f = Field::not_found();
        assert_eq!(f.value, "-");
        assert_eq!(f.confidence, 0.1);
        assert_eq!(f.method, "not_found");
        assert!(f.is_absent());
        assert_eq!(Field::found("  ", 0.9, "regex", None), Field::not_found());
    }

    #[test]
    fn field_names_round_trip_through_placeholders() {
        for name in FieldName::ALL {
            assert_eq!(name.as_str().parse::<FieldName>(), Ok(name));
        }
        assert_eq!("{{PERITO_CPF}}".parse::<FieldName>(), Ok(FieldName::PeritoCpf));
        assert!("NOPE".parse::<FieldName>().is_err());
    }

    #[test]
    fn field_map_serializes_with_upper_keys() {
        let mut fields = BTreeMap::new();
        fields.insert(FieldName::ValorArbitradoJz, Field::found("R$ 1,00", 0.8, "regex", None));
        let json = serde_json::to_string(&fields).unwrap();
        assert!(json.contains("\"VALOR_ARBITRADO_JZ\""));
    }

    #[test]
    fn evidence_snippet_is_bounded() {
        let long = "x ".repeat(400);
        let ev = Evidence::new(1, BoundingBox::default(), &long);
        assert!(ev.snippet.chars().count() <= SNIPPET_MAX);
    }
}
