//! `{{FIELD}}` templates aligned against paragraph and region text.
//!
//! The literal text between placeholders is located with fuzzy matching,
//! always moving forward through the haystack. When an anchor cannot be
//! placed, a generated regex that tolerates stray whitespace is tried.

use regex::Regex;
use tracing::{debug, warn};

use crate::config::FieldTemplate;
use crate::document::FieldName;
use crate::similarity::{Similarity, find_anchor};
use crate::utils::{FoldedText, collapse_whitespace, normalize_text};

const REGEX_CONFIDENCE: f64 = 0.65;

#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Literal(String),
    Field(FieldName),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateMatch {
    pub field: FieldName,
    pub value: String,
    pub confidence: f64,
    pub method: &'static str,
    /// Byte range of the value in the searched text.
    pub span: (usize, usize),
}

#[derive(Debug, Clone)]
struct CompiledTemplate {
    source: String,
    pieces: Vec<Piece>,
    fallback: Regex,
}

impl CompiledTemplate {
    fn parse(template: &FieldTemplate) -> Option<CompiledTemplate> {
        let mut pieces = Vec::new();
        let mut rest = template.template.as_str();
        while let Some(open) = rest.find("{{") {
            let close = open + rest[open..].find("}}")?;
            push_literal(&mut pieces, &rest[..open]);
            let name: FieldName = rest[open..close + 2].parse().ok()?;
            if matches!(pieces.last(), Some(Piece::Field(_))) {
                // two adjacent placeholders cannot be told apart
                return None;
            }
            pieces.push(Piece::Field(name));
            rest = &rest[close + 2..];
        }
        push_literal(&mut pieces, rest);
        if !pieces.iter().any(|p| matches!(p, Piece::Field(_))) {
            return None;
        }
        let fallback = Regex::new(&fallback_pattern(&pieces)).ok()?;
        Some(CompiledTemplate {
            source: template.source.clone(),
            pieces,
            fallback,
        })
    }

    fn fields(&self) -> impl Iterator<Item = FieldName> + '_ {
        self.pieces.iter().filter_map(|p| match p {
            Piece::Field(f) => Some(*f),
            Piece::Literal(_) => None,
        })
    }
}

fn push_literal(pieces: &mut Vec<Piece>, raw: &str) {
    let lit = normalize_text(raw);
    if !lit.is_empty() {
        pieces.push(Piece::Literal(lit));
    }
}

fn fallback_pattern(pieces: &[Piece]) -> String {
    let last_field = pieces.iter().rposition(|p| matches!(p, Piece::Field(_)));
    let mut pattern = String::new();
    for (i, piece) in pieces.iter().enumerate() {
        match piece {
            Piece::Literal(lit) => {
                let chars: Vec<String> = lit
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .map(|c| regex::escape(&c.to_string()))
                    .collect();
                pattern.push_str(r"\s*");
                pattern.push_str(&chars.join(r"\s*"));
                pattern.push_str(r"\s*");
            }
            Piece::Field(_) if Some(i) == last_field && i + 1 == pieces.len() => pattern.push_str("(.+)"),
            Piece::Field(_) => pattern.push_str("(.+?)"),
        }
    }
    pattern
}

/// Value bounds inside `text` for a placeholder spanning `[start, end)` of
/// the original, trimmed to one line at the open ends of the template.
fn bounded(text: &str, start: usize, end: usize, leading: bool, trailing: bool) -> Option<(usize, usize)> {
    let mut s = start;
    let mut e = end;
    if leading {
        if let Some(nl) = text[s..e].rfind('\n') {
            s += nl + 1;
        }
    }
    if trailing {
        if let Some(nl) = text[s..e].find('\n') {
            e = s + nl;
        }
    }
    let slice = &text[s..e];
    let trimmed_start = s + (slice.len() - slice.trim_start().len());
    let trimmed_end = e - (slice.len() - slice.trim_end().len());
    (trimmed_start < trimmed_end).then_some((trimmed_start, trimmed_end))
}

pub struct TemplateFieldExtractor<'a> {
    templates: Vec<CompiledTemplate>,
    similarity: &'a dyn Similarity,
    min_score: f64,
    max_chars: usize,
}

impl<'a> TemplateFieldExtractor<'a> {
    pub fn new(templates: &[FieldTemplate], similarity: &'a dyn Similarity, min_score: f64, max_chars: usize) -> Self {
        let templates = templates
            .iter()
            .filter_map(|t| {
                let compiled = CompiledTemplate::parse(t);
                if compiled.is_none() {
                    warn!(template = %t.template, "ignoring unusable template");
                }
                compiled
            })
            .collect();
        TemplateFieldExtractor {
            templates,
            similarity,
            min_score,
            max_chars,
        }
    }

    /// Distinct text sources the templates read from.
    pub fn sources(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for t in &self.templates {
            if !out.contains(&t.source.as_str()) {
                out.push(&t.source);
            }
        }
        out
    }

    /// Every template bound to `source`, applied to `text`.
    pub fn extract(&self, source: &str, text: &str) -> Vec<TemplateMatch> {
        self.templates
            .iter()
            .filter(|t| t.source == source)
            .flat_map(|t| self.apply(t, text))
            .filter(|m| m.value.chars().count() <= self.max_chars)
            .collect()
    }

    fn apply(&self, template: &CompiledTemplate, text: &str) -> Vec<TemplateMatch> {
        match self.align(template, text) {
            Some(found) => found,
            None => {
                let found = self.regex_fallback(template, text);
                if !found.is_empty() {
                    debug!(fields = ?template.fields().collect::<Vec<_>>(), "template matched by regex");
                }
                found
            }
        }
    }

    fn align(&self, template: &CompiledTemplate, text: &str) -> Option<Vec<TemplateMatch>> {
        let folded = FoldedText::new(text);
        let hay = folded.folded.as_str();
        let mut cursor = 0;
        let mut pending: Option<(FieldName, usize, bool)> = None;
        let mut raw_spans: Vec<(FieldName, usize, usize, bool, bool)> = Vec::new();
        let mut scores = Vec::new();

        for (i, piece) in template.pieces.iter().enumerate() {
            match piece {
                Piece::Field(f) => pending = Some((*f, cursor, i == 0)),
                Piece::Literal(lit) => {
                    let hit = find_anchor(self.similarity, hay, lit, cursor, self.min_score)?;
                    if let Some((f, from, leading)) = pending.take() {
                        if hit.start <= from {
                            return None;
                        }
                        raw_spans.push((f, from, hit.start, leading, false));
                    }
                    scores.push(hit.score);
                    cursor = hit.end;
                }
            }
        }
        if let Some((f, from, leading)) = pending {
            if from >= hay.len() {
                return None;
            }
            raw_spans.push((f, from, hay.len(), leading, true));
        }

        let avg = scores.iter().sum::<f64>() / scores.len().max(1) as f64;
        let confidence = (0.6 + 0.3 * avg).min(0.9);
        let mut out = Vec::new();
        for (field, s, e, leading, trailing) in raw_spans {
            let (os, oe) = folded.original_range(s, e)?;
            let (vs, ve) = bounded(text, os, oe, leading, trailing)?;
            out.push(TemplateMatch {
                field,
                value: collapse_whitespace(&text[vs..ve]),
                confidence,
                method: "template",
                span: (vs, ve),
            });
        }
        Some(out)
    }

    fn regex_fallback(&self, template: &CompiledTemplate, text: &str) -> Vec<TemplateMatch> {
        let folded = FoldedText::new(text);
        let Some(caps) = template.fallback.captures(&folded.folded) else {
            return Vec::new();
        };
        let fields: Vec<FieldName> = template.fields().collect();
        let leading_field = matches!(template.pieces.first(), Some(Piece::Field(_)));
        let trailing_field = matches!(template.pieces.last(), Some(Piece::Field(_)));

        let mut out = Vec::new();
        for (k, field) in fields.iter().enumerate() {
            let Some(m) = caps.get(k + 1) else {
                continue;
            };
            let Some((os, oe)) = folded.original_range(m.start(), m.end()) else {
                continue;
            };
            let leading = leading_field && k == 0;
            let trailing = trailing_field && k + 1 == fields.len();
            if let Some((vs, ve)) = bounded(text, os, oe, leading, trailing) {
                out.push(TemplateMatch {
                    field: *field,
                    value: collapse_whitespace(&text[vs..ve]),
                    confidence: REGEX_CONFIDENCE,
                    method: "template_regex",
                    span: (vs, ve),
                });
            }
        }
        out
    }
}
