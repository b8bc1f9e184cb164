//! Run configuration.
//!
//! Every tuned threshold lives here rather than in code. All sections carry
//! `#[serde(default)]`, so a file only needs to name what it overrides.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::document::FieldName;
use crate::error::{ExtractError, Result};
use crate::types::DEFAULT_BLANK_PAGES;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bands: BandConfig,
    pub layout: LayoutConfig,
    pub window: WindowConfig,
    pub anchors: AnchorConfig,
    pub certidao: CertidaoConfig,
    pub fields: FieldConfig,
    pub patterns: PatternConfig,
    pub regions: RegionConfig,
    pub catalogs: CatalogConfig,
    pub strategy: StrategyConfig,
}

impl Config {
    /// Load from `.toml` or `.json`; relative catalog paths resolve against
    /// the file's directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&text)?,
            Some("json") => Self::from_json_str(&text)?,
            _ => return Err(ExtractError::UnsupportedFormat(path.to_path_buf())),
        };
        if let Some(dir) = path.parent() {
            config.resolve_paths(dir);
        }
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Config> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_json_str(text: &str) -> Result<Config> {
        Ok(serde_json::from_str(text)?)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut Option<PathBuf>| {
            if let Some(path) = p {
                if path.is_relative() {
                    *path = base.join(&*path);
                }
            }
        };
        resolve(&mut self.catalogs.perito_path);
        resolve(&mut self.catalogs.honorarios_path);
        resolve(&mut self.strategy.rules_path);
    }
}

/// Band cut-points as fractions of page height measured from the top.
///
/// header: above `subheader_top` (anything above `header_top` is folded into
/// the header too); subheader: `subheader_top..body_start`; body:
/// `body_start..footer_bottom`; footer: below `footer_bottom`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BandConfig {
    pub header_top: f64,
    pub subheader_top: f64,
    pub body_start: f64,
    pub footer_bottom: f64,
}

impl Default for BandConfig {
    fn default() -> Self {
        BandConfig {
            header_top: 0.0,
            subheader_top: 0.12,
            body_start: 0.24,
            footer_bottom: 0.85,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Max distance between a word centre and the running line centre.
    pub line_tolerance: f64,
    /// Vertical gap that opens a new paragraph.
    pub paragraph_gap: f64,
    /// Gap, in average glyph widths, above which a space is inserted.
    pub word_gap_ratio: f64,
    pub dynamic_gap_factor: f64,
    pub max_word_gap_ratio: f64,
    /// Gap rendered as a double space (column break).
    pub wide_gap_ratio: f64,
    /// Decimal places used when deduplicating word boxes.
    pub dedupe_precision: u32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        LayoutConfig {
            line_tolerance: 0.005,
            paragraph_gap: 0.018,
            word_gap_ratio: 0.3,
            dynamic_gap_factor: 0.5,
            max_word_gap_ratio: 0.9,
            wide_gap_ratio: 4.0,
            dedupe_precision: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub min_pages: u32,
    pub max_pages: u32,
    pub match_threshold: f64,
    pub heuristic_sizes: Vec<u32>,
    /// Characters of window text scored when no anchor line is found.
    pub fallback_chars: usize,
    /// Pages a dump may declare beyond those it supplies.
    pub blank_pages: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            min_pages: 2,
            max_pages: 4,
            match_threshold: 0.6,
            heuristic_sizes: vec![2, 3, 4],
            fallback_chars: 2000,
            blank_pages: DEFAULT_BLANK_PAGES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    pub header: Vec<String>,
    pub subheader: Vec<String>,
    pub title: Vec<String>,
    pub footer: Vec<String>,
    pub signer_hints: Vec<String>,
    pub despacho_bookmark_hints: Vec<String>,
}

impl AnchorConfig {
    /// Anchor categories with their phrases, in template order.
    pub fn categories(&self) -> [(&'static str, &[String]); 4] {
        [
            ("header", &self.header),
            ("subheader", &self.subheader),
            ("title", &self.title),
            ("footer", &self.footer),
        ]
    }
}

impl Default for AnchorConfig {
    fn default() -> Self {
        AnchorConfig {
            header: strings(&["poder judiciario", "tribunal de justica"]),
            subheader: strings(&["diretoria especial"]),
            title: strings(&["despacho"]),
            footer: strings(&["documento assinado eletronicamente", "codigo verificador"]),
            signer_hints: strings(&["diretor", "diretora", "juiz", "juiza", "presidente"]),
            despacho_bookmark_hints: strings(&["despacho", "diesp", "diretoria especial"]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CertidaoConfig {
    pub bookmark_hint: String,
    pub header_hints: Vec<String>,
    pub title_hints: Vec<String>,
    pub body_hints: Vec<String>,
    pub date_hints: Vec<String>,
    /// Names allowed to sign a certificate. Empty accepts any signer.
    pub signers: Vec<String>,
}

impl Default for CertidaoConfig {
    fn default() -> Self {
        CertidaoConfig {
            bookmark_hint: "certidao".to_string(),
            header_hints: strings(&["poder judiciario", "tribunal de justica", "conselho da magistratura"]),
            title_hints: strings(&["certidao"]),
            body_hints: strings(&["certifico", "conselho da magistratura", "sessao"]),
            date_hints: strings(&["sessao", "realizada em", "joao pessoa"]),
            signers: Vec::new(),
        }
    }
}

/// A `{{FIELD}}` template applied to one text source.
///
/// `source` is a region name or `paragraphs` for the early paragraphs of the
/// window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldTemplate {
    pub source: String,
    pub template: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtypeHint {
    pub name: String,
    pub hints: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    pub labels: BTreeMap<FieldName, Vec<String>>,
    pub templates: Vec<FieldTemplate>,
    pub subtypes: Vec<SubtypeHint>,
    /// Words that make a party value look like an institution.
    pub institutional_markers: Vec<String>,
    /// Words that end a signer name.
    pub job_titles: Vec<String>,
    /// Words that end a party name.
    pub party_stops: Vec<String>,
    /// Paragraphs from the top of the window searched by the direct pass.
    pub early_paragraphs: usize,
    pub max_value_chars: usize,
    /// Minimum similarity for a template anchor to resolve.
    pub anchor_min_score: f64,
}

impl Default for FieldConfig {
    fn default() -> Self {
        use FieldName::*;
        let labels: BTreeMap<FieldName, Vec<String>> = [
            (ProcessoJudicial, &["processo judicial", "processo n", "autos", "acao"][..]),
            (ProcessoAdministrativo, &["processo sei", "sei n", "processo administrativo"][..]),
            (ProcessoAdme, &["adme"][..]),
            (Vara, &["vara", "juizo", "juizado"][..]),
            (Comarca, &["comarca"][..]),
            (Promovente, &["promovente", "requerente", "autor", "exequente", "reclamante"][..]),
            (Promovido, &["promovido", "requerido", "reu", "executado", "reclamado"][..]),
            (Perito, &["perito", "perita", "interessado", "interessada"][..]),
            (PeritoCpf, &["cpf"][..]),
            (Especialidade, &["especialidade", "area de atuacao", "profissao"][..]),
            (EspeciePericia, &["especie", "natureza da pericia", "tipo de pericia"][..]),
            (ValorArbitradoJz, &["honorarios", "arbitrad", "fixad"][..]),
            (ValorArbitradoDe, &["autorizo", "reserva", "pagamento", "diretoria especial"][..]),
            (ValorArbitradoCm, &["conselho da magistratura", "aprovad", "homologad"][..]),
            (ValorTabelado, &["tabela", "tabelad", "resolucao"][..]),
            (Adiantamento, &["adiantamento", "antecipacao"][..]),
            (Percentual, &["percentual", "por cento", "%"][..]),
            (Parcela, &["parcela"][..]),
            (Data, &["joao pessoa", "data"][..]),
            (Assinante, &["assinado eletronicamente por"][..]),
            (Matricula, &["matricula", "mat."][..]),
        ]
        .into_iter()
        .map(|(k, v)| (k, strings(v)))
        .collect();

        FieldConfig {
            labels,
            templates: vec![
                template("paragraphs", "Processo nº {{PROCESSO_JUDICIAL}} Promovente: {{PROMOVENTE}}"),
                template("paragraphs", "Promovente: {{PROMOVENTE}} Promovido: {{PROMOVIDO}}"),
                template("paragraphs", "Perito: {{PERITO}} CPF: {{PERITO_CPF}}"),
                template("paragraphs", "Juízo da {{VARA}} da Comarca de {{COMARCA}}"),
                template("first_top", "Especialidade: {{ESPECIALIDADE}}"),
            ],
            subtypes: vec![
                SubtypeHint {
                    name: "GEORC".to_string(),
                    hints: strings(&["georc", "reserva orcamentaria"]),
                },
                SubtypeHint {
                    name: "CM".to_string(),
                    hints: strings(&["conselho da magistratura"]),
                },
                SubtypeHint {
                    name: "AUTORIZACAO".to_string(),
                    hints: strings(&["autorizo o pagamento", "autorizo a despesa"]),
                },
            ],
            institutional_markers: strings(&[
                "juizo",
                "vara",
                "comarca",
                "tribunal",
                "diretoria",
                "juizado",
                "poder judiciario",
                "secretaria",
                "gerencia",
            ]),
            job_titles: strings(&[
                "diretor",
                "diretora",
                "juiz",
                "juiza",
                "presidente",
                "secretario",
                "secretaria",
                "assessor",
                "assessora",
                "analista",
                "tecnico",
                "tecnica",
                "desembargador",
                "desembargadora",
                "coordenador",
                "coordenadora",
                "chefe",
                "gerente",
            ]),
            party_stops: strings(&[
                "cpf",
                "cnpj",
                "perante",
                "rg",
                "inscrit",
                "residente",
                "portador",
                "representad",
                "advogad",
                "em face",
            ]),
            early_paragraphs: 14,
            max_value_chars: 120,
            anchor_min_score: 0.8,
        }
    }
}

/// Regex sources; compiled once into [`Patterns`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub processo_judicial: String,
    pub processo_sei: String,
    pub processo_adme: String,
    pub cpf: String,
    pub money: String,
    pub date_numeric: String,
    pub date_long: String,
}

impl Default for PatternConfig {
    fn default() -> Self {
        PatternConfig {
            processo_judicial: r"\b\d{7}\s*-\s*\d{2}\s*\.\s*\d{4}\s*\.\s*\d\s*\.\s*\d{2}\s*\.\s*\d{4}\b"
                .to_string(),
            processo_sei: r"\b\d{6}\s*-\s*\d{2}\s*\.\s*\d{4}\s*\.\s*\d\s*\.\s*\d{2}\b".to_string(),
            processo_adme: r"(?i)\badme\s*(?:n[º°o.]*\s*)?(\d{1,6}\s*/\s*\d{4})".to_string(),
            cpf: r"\b\d{3}\s*\.?\s*\d{3}\s*\.?\s*\d{3}\s*-?\s*\d{2}\b".to_string(),
            money: r"R\$\s*\d{1,3}(?:\.\d{3})+(?:,\d{1,2})?|R\$\s*\d+(?:,\d{1,2})?".to_string(),
            date_numeric: r"\b\d{1,2}[/.]\d{1,2}[/.]\d{2,4}\b".to_string(),
            date_long: r"(?i)\b\d{1,2}[º°o]?\s+de\s+\p{L}+\s+de\s+\d{4}\b".to_string(),
        }
    }
}

/// The compiled regex set shared by every extraction pass.
#[derive(Debug, Clone)]
pub struct Patterns {
    pub processo_judicial: Regex,
    pub processo_sei: Regex,
    pub processo_adme: Regex,
    pub cpf: Regex,
    pub money: Regex,
    pub date_numeric: Regex,
    pub date_long: Regex,
    /// Anchored CNJ check applied after whitespace removal.
    pub cnj_exact: Regex,
    pub percent: Regex,
}

impl Patterns {
    pub fn compile(cfg: &PatternConfig) -> Result<Patterns> {
        let build = |name: &str, src: &str| {
            Regex::new(src).map_err(|source| ExtractError::Pattern {
                name: name.to_string(),
                source,
            })
        };
        Ok(Patterns {
            processo_judicial: build("processo_judicial", &cfg.processo_judicial)?,
            processo_sei: build("processo_sei", &cfg.processo_sei)?,
            processo_adme: build("processo_adme", &cfg.processo_adme)?,
            cpf: build("cpf", &cfg.cpf)?,
            money: build("money", &cfg.money)?,
            date_numeric: build("date_numeric", &cfg.date_numeric)?,
            date_long: build("date_long", &cfg.date_long)?,
            cnj_exact: build("cnj_exact", r"^\d{7}-\d{2}\.\d{4}\.\d\.\d{2}\.\d{4}$")?,
            percent: build("percent", r"(\d{1,3}(?:,\d{1,2})?)\s*%")?,
        })
    }

    /// First date of either form, as `(byte range, matched text)`.
    pub fn find_date<'t>(&self, text: &'t str) -> Option<(usize, usize, &'t str)> {
        let numeric = self.date_numeric.find(text);
        let long = self.date_long.find(text);
        let m = match (numeric, long) {
            (Some(a), Some(b)) => {
                if a.start() <= b.start() {
                    a
                } else {
                    b
                }
            }
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => return None,
        };
        Some((m.start(), m.end(), m.as_str()))
    }
}

/// Which page of the window a region reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageRole {
    First,
    Second,
    Last,
}

/// A named region: a vertical slice of one window page, optionally starting
/// at the first line that contains `starts_after`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSpec {
    pub name: String,
    pub page: PageRole,
    pub y_from: f64,
    pub y_to: f64,
    #[serde(default)]
    pub starts_after: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    pub specs: Vec<RegionSpec>,
}

impl Default for RegionConfig {
    fn default() -> Self {
        let spec = |name: &str, page, y_from, y_to, starts_after: Option<&str>| RegionSpec {
            name: name.to_string(),
            page,
            y_from,
            y_to,
            starts_after: starts_after.map(str::to_string),
        };
        RegionConfig {
            specs: vec![
                spec("first_top", PageRole::First, 0.0, 0.5, None),
                spec("first_full", PageRole::First, 0.0, 1.0, None),
                spec("second_full", PageRole::Second, 0.0, 1.0, None),
                spec("last_bottom", PageRole::Last, 0.5, 1.0, None),
                spec(
                    "signature_block",
                    PageRole::Last,
                    0.0,
                    1.0,
                    Some("documento assinado eletronicamente"),
                ),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub perito_path: Option<PathBuf>,
    pub honorarios_path: Option<PathBuf>,
    /// Fee-table area -> keywords found in a specialty.
    pub area_keywords: BTreeMap<String, Vec<String>>,
    /// Relative distance allowed between a document value and a table value.
    pub value_tolerance: f64,
    /// Also match the fee table against the first-page value.
    pub allow_first_page_value: bool,
    /// Below this the expert fields are re-resolved from the catalog.
    pub low_confidence: f64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        let area_keywords = [
            ("MEDICINA", &["medic", "psiquiatr", "ortoped", "neurolog", "clinic"][..]),
            ("PSICOLOGIA", &["psicolog"][..]),
            ("ENGENHARIA", &["engenh", "arquitet"][..]),
            ("CONTABILIDADE", &["contab", "contador", "economi"][..]),
            ("SERVICO SOCIAL", &["assistente social", "servico social"][..]),
            ("GRAFOTECNIA", &["grafotec", "documentoscop"][..]),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), strings(v)))
        .collect();

        CatalogConfig {
            perito_path: None,
            honorarios_path: None,
            area_keywords,
            value_tolerance: 0.15,
            allow_first_page_value: false,
            low_confidence: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub rules_path: Option<PathBuf>,
    /// Weight per document position: `first_page`, `middle`, `last_page`.
    pub bucket_weights: BTreeMap<String, f64>,
    /// Weight per band name.
    pub segment_weights: BTreeMap<String, f64>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        let weights = |pairs: &[(&str, f64)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>()
        };
        StrategyConfig {
            rules_path: None,
            bucket_weights: weights(&[("first_page", 1.0), ("middle", 0.9), ("last_page", 0.95)]),
            segment_weights: weights(&[
                ("header", 0.85),
                ("subheader", 1.0),
                ("title", 1.0),
                ("body", 1.0),
                ("footer", 0.9),
            ]),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn template(source: &str, template: &str) -> FieldTemplate {
    FieldTemplate {
        source: source.to_string(),
        template: template.to_string(),
    }
}
