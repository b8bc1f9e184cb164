//! Field rules authored outside the code, loaded from JSON.
//!
//! ```json
//! {
//!   "fields": {
//!     "PROCESSO_ADME": {
//!       "rules": [
//!         { "id": "adme", "kind": "regex", "pattern": "adme\\s*(\\d+)\\s*/\\s*(\\d{4})",
//!           "format": "$1/$2", "weight": 0.9, "bucket": "first_page" }
//!       ]
//!     },
//!     "VALOR_TABELADO": {
//!       "rules": [
//!         { "id": "tabela", "kind": "keyword", "keywords": ["valor da tabela"],
//!           "pattern": "R\\$\\s*[\\d.,]+", "normalize": "money", "validate": "money" }
//!       ]
//!     }
//!   }
//! }
//! ```
//!
//! Regex rules run against the folded (lowercase, accent-free) text and map
//! the match back onto the original. A rule's confidence is the saturating
//! product of its weight, priority, file-name weight and the position
//! weights, rescaled into `[0.45, 0.92]`.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{Patterns, StrategyConfig};
use crate::document::{BandName, Evidence, Field, FieldName};
use crate::error::Result;
use crate::fields::clean::letters_only;
use crate::types::BoundingBox;
use crate::utils::{
    FoldedText, canonical_cpf, canonical_date, canonical_money, collapse_whitespace, digits_only, normalize_text,
};

const CONFIDENCE_FLOOR: f64 = 0.45;
const CONFIDENCE_SPAN: f64 = 0.47;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Regex,
    Keyword,
}

/// Where in the window a text unit sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    FirstPage,
    Middle,
    LastPage,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::FirstPage => "first_page",
            Bucket::Middle => "middle",
            Bucket::LastPage => "last_page",
        }
    }

    pub fn of(page: u32, start: u32, end: u32) -> Bucket {
        if page <= start {
            Bucket::FirstPage
        } else if page >= end {
            Bucket::LastPage
        } else {
            Bucket::Middle
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalize {
    #[default]
    None,
    Collapse,
    NoSpace,
    Upper,
    Digits,
    Name,
    Money,
    Date,
    Cpf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validate {
    #[default]
    NonEmpty,
    Cnj,
    Sei,
    Cpf,
    Money,
    Date,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcePattern {
    pub pattern: String,
    pub weight: f64,
}

fn one() -> f64 {
    1.0
}

fn default_window() -> usize {
    120
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleDef {
    #[serde(default)]
    pub id: String,
    pub kind: RuleKind,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Capture group holding the value; 1 when the pattern has groups.
    #[serde(default)]
    pub group: Option<usize>,
    /// `$1`-style template combining capture groups.
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default = "one")]
    pub weight: f64,
    #[serde(default = "one")]
    pub priority: f64,
    /// Substrings of the file name and the weight they give; first match wins.
    #[serde(default)]
    pub source_patterns: Vec<SourcePattern>,
    #[serde(default)]
    pub bucket: Option<Bucket>,
    #[serde(default)]
    pub segments: Vec<BandName>,
    #[serde(default)]
    pub normalize: Normalize,
    #[serde(default)]
    pub validate: Validate,
    /// Characters after a keyword searched for the value.
    #[serde(default = "default_window")]
    pub window: usize,
}

/// Builds a field out of other, already extracted fields.
#[derive(Debug, Clone, Deserialize)]
pub struct ComposeDef {
    pub from: Vec<FieldName>,
    /// `{FIELD_NAME}` placeholders.
    pub format: String,
    #[serde(default = "one")]
    pub weight: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldStrategy {
    #[serde(default)]
    pub rules: Vec<RuleDef>,
    #[serde(default)]
    pub compose: Option<ComposeDef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StrategyFile {
    #[serde(default)]
    pub fields: BTreeMap<FieldName, FieldStrategy>,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    def: RuleDef,
    regex: Option<Regex>,
    keywords: Vec<String>,
}

/// One piece of window text a rule can read.
#[derive(Debug, Clone, Copy)]
pub struct TextUnit<'t> {
    pub page: u32,
    pub bucket: Bucket,
    pub segment: BandName,
    pub text: &'t str,
    pub bbox: BoundingBox,
}

/// Per-run inputs that shape rule confidence.
pub struct StrategyContext<'a> {
    pub file_name: &'a str,
    pub weights: &'a StrategyConfig,
    pub patterns: &'a Patterns,
}

#[derive(Debug, Default)]
pub struct FieldStrategyEngine {
    rules: BTreeMap<FieldName, Vec<CompiledRule>>,
    compose: BTreeMap<FieldName, ComposeDef>,
}

impl FieldStrategyEngine {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Rules from a JSON file; unreadable or malformed files give no rules.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let parsed = std::fs::read_to_string(path)
            .map_err(crate::error::ExtractError::from)
            .and_then(|text| Self::from_json_str(&text));
        match parsed {
            Ok(engine) => engine,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "strategy rules not loaded");
                Self::empty()
            }
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let file: StrategyFile = serde_json::from_str(text)?;
        Ok(Self::from_file(file))
    }

    /// Rules whose pattern does not compile are dropped one by one.
    pub fn from_file(file: StrategyFile) -> Self {
        let mut engine = Self::empty();
        for (field, strategy) in file.fields {
            let compiled: Vec<CompiledRule> = strategy
                .rules
                .into_iter()
                .filter_map(|def| compile_rule(field, def))
                .collect();
            if !compiled.is_empty() {
                engine.rules.insert(field, compiled);
            }
            if let Some(compose) = strategy.compose {
                engine.compose.insert(field, compose);
            }
        }
        engine
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.compose.is_empty()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    /// Best hit per field across all units.
    pub fn extract(&self, units: &[TextUnit<'_>], ctx: &StrategyContext<'_>) -> BTreeMap<FieldName, Field> {
        let file = normalize_text(ctx.file_name);
        let mut out: BTreeMap<FieldName, Field> = BTreeMap::new();

        for (field, rules) in &self.rules {
            for rule in rules {
                let source_weight = rule
                    .def
                    .source_patterns
                    .iter()
                    .find(|sp| sp.pattern == "*" || file.contains(&normalize_text(&sp.pattern)))
                    .map_or(1.0, |sp| sp.weight);

                for unit in units {
                    if rule.def.bucket.is_some_and(|b| b != unit.bucket) {
                        continue;
                    }
                    if !rule.def.segments.is_empty() && !rule.def.segments.contains(&unit.segment) {
                        continue;
                    }
                    let Some(raw) = rule.find(unit.text) else {
                        continue;
                    };
                    let Some(value) = finish(&raw, rule.def.normalize, rule.def.validate, ctx.patterns) else {
                        continue;
                    };

                    let bucket_w = ctx.weights.bucket_weights.get(unit.bucket.as_str()).copied().unwrap_or(1.0);
                    let segment_w = ctx.weights.segment_weights.get(unit.segment.as_str()).copied().unwrap_or(1.0);
                    let product = rule.def.weight * rule.def.priority * source_weight * bucket_w * segment_w;
                    let confidence = rescale(product);

                    if out.get(field).is_none_or(|f| confidence > f.confidence) {
                        let method = if rule.def.id.is_empty() {
                            "strategy".to_string()
                        } else {
                            format!("strategy:{}", rule.def.id)
                        };
                        out.insert(
                            *field,
                            Field::found(value, confidence, method, Some(Evidence::new(unit.page, unit.bbox, &raw))),
                        );
                    }
                }
            }
        }
        debug!(fields = out.len(), "strategy pass");
        out
    }

    /// Composed values for absent fields whose sources are all present.
    pub fn compose(&self, fields: &BTreeMap<FieldName, Field>) -> Vec<(FieldName, Field)> {
        let mut out = Vec::new();
        for (target, def) in &self.compose {
            if fields.get(target).is_some_and(|f| !f.is_absent()) {
                continue;
            }
            let sources: Option<Vec<&Field>> = def
                .from
                .iter()
                .map(|f| fields.get(f).filter(|field| !field.is_absent()))
                .collect();
            let Some(sources) = sources.filter(|s| !s.is_empty()) else {
                continue;
            };
            let mut value = def.format.clone();
            for (name, field) in def.from.iter().zip(&sources) {
                value = value.replace(&format!("{{{}}}", name.as_str()), &field.value);
            }
            let min_conf = sources.iter().map(|f| f.confidence).fold(1.0, f64::min);
            let evidence = sources.iter().find_map(|f| f.evidence.clone());
            out.push((*target, Field::found(value, min_conf * def.weight, "strategy_compose", evidence)));
        }
        out
    }
}

fn compile_rule(field: FieldName, def: RuleDef) -> Option<CompiledRule> {
    let regex = match &def.pattern {
        Some(src) => match Regex::new(&format!("(?i){}", src)) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(%field, rule = %def.id, error = %e, "dropping strategy rule");
                return None;
            }
        },
        None => None,
    };
    if def.kind == RuleKind::Regex && regex.is_none() {
        warn!(%field, rule = %def.id, "regex rule without pattern");
        return None;
    }
    if def.kind == RuleKind::Keyword && def.keywords.is_empty() {
        warn!(%field, rule = %def.id, "keyword rule without keywords");
        return None;
    }
    let keywords = def.keywords.iter().map(|k| normalize_text(k)).filter(|k| !k.is_empty()).collect();
    Some(CompiledRule { def, regex, keywords })
}

impl CompiledRule {
    /// Raw value as it appears in the original text.
    fn find(&self, text: &str) -> Option<String> {
        let folded = FoldedText::new(text);
        let hay = folded.folded.as_str();
        match self.def.kind {
            RuleKind::Regex => self.capture(&folded, hay, 0),
            RuleKind::Keyword => self.keywords.iter().find_map(|kw| {
                let at = hay.find(kw.as_str())? + kw.len();
                match &self.regex {
                    Some(_) => self.capture(&folded, hay, at),
                    None => {
                        let end = hay[at..]
                            .char_indices()
                            .nth(self.def.window)
                            .map_or(hay.len(), |(i, _)| at + i);
                        let (s, e) = folded.original_range(at, end)?;
                        let tail = text[s..e].trim_start_matches(|c: char| c.is_whitespace() || ":-–".contains(c));
                        let line = tail.lines().next()?.trim();
                        (!line.is_empty()).then(|| line.to_string())
                    }
                }
            }),
        }
    }

    fn capture(&self, folded: &FoldedText<'_>, hay: &str, from: usize) -> Option<String> {
        let re = self.regex.as_ref()?;
        let end = match self.def.kind {
            RuleKind::Keyword => hay[from..]
                .char_indices()
                .nth(self.def.window)
                .map_or(hay.len(), |(i, _)| from + i),
            RuleKind::Regex => hay.len(),
        };
        let caps = re.captures(&hay[from..end])?;
        let original = |m: regex::Match<'_>| folded.original_slice(from + m.start(), from + m.end());

        if let Some(format) = &self.def.format {
            // expand against original spans so accents and case survive
            let mut out = String::new();
            let mut rest = format.as_str();
            while let Some(pos) = rest.find('$') {
                out.push_str(&rest[..pos]);
                let digits: String = rest[pos + 1..].chars().take_while(char::is_ascii_digit).collect();
                if digits.is_empty() {
                    out.push('$');
                    rest = &rest[pos + 1..];
                    continue;
                }
                let idx: usize = digits.parse().ok()?;
                out.push_str(caps.get(idx).and_then(original).unwrap_or(""));
                rest = &rest[pos + 1 + digits.len()..];
            }
            out.push_str(rest);
            return Some(out);
        }

        let group = self.def.group.unwrap_or(if caps.len() > 1 { 1 } else { 0 });
        caps.get(group).and_then(original).map(str::to_string)
    }
}

fn finish(raw: &str, normalize: Normalize, validate: Validate, patterns: &Patterns) -> Option<String> {
    let value = match normalize {
        Normalize::None => raw.trim().to_string(),
        Normalize::Collapse => collapse_whitespace(raw),
        Normalize::NoSpace => raw.chars().filter(|c| !c.is_whitespace()).collect(),
        Normalize::Upper => collapse_whitespace(raw).to_uppercase(),
        Normalize::Digits => digits_only(raw),
        Normalize::Name => letters_only(raw),
        Normalize::Money => canonical_money(raw)?,
        Normalize::Date => canonical_date(raw)?,
        Normalize::Cpf => canonical_cpf(raw)?,
    };
    let ok = match validate {
        Validate::NonEmpty => !value.trim().is_empty(),
        Validate::Cnj => {
            let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
            patterns.cnj_exact.is_match(&compact)
        }
        Validate::Sei => patterns.processo_sei.is_match(&value),
        Validate::Cpf => canonical_cpf(&value).is_some_and(|c| c == digits_only(&value)),
        Validate::Money => canonical_money(&value).is_some(),
        Validate::Date => canonical_date(&value).is_some(),
    };
    ok.then_some(value)
}

/// Saturating product rescaled into `[0.45, 0.92]`.
pub fn rescale(product: f64) -> f64 {
    CONFIDENCE_FLOOR + CONFIDENCE_SPAN * product.clamp(0.0, 1.0)
}
