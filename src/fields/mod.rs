//! Field extraction for one despacho window.
//!
//! Passes run in a fixed order: direct heuristics, templates, strategy
//! rules, fallbacks and composition. Every later value goes through
//! [`arbitration`] before it may replace an earlier one. The surviving set
//! is validated once more and then enriched from the catalogs.

pub mod arbitration;
pub mod clean;
mod direct;
mod enrich;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::bands::SegmentedPages;
use crate::config::{Config, PageRole, Patterns};
use crate::document::{BandName, CandidateWindow, Evidence, Field, FieldName, Region};
use crate::honorarios::HonorariosTable;
use crate::log::RunLog;
use crate::perito::PeritoCatalog;
use crate::regions::page_for;
use crate::signature::{SignatureInfo, SignatureSource};
use crate::similarity::Similarity;
use crate::strategy::{Bucket, FieldStrategyEngine, StrategyContext, TextUnit};
use crate::template::TemplateFieldExtractor;
use crate::types::{BoundingBox, Paragraph};
use crate::utils::{canonical_cpf, digits_only};

use self::arbitration::{ArbitrationContext, Decision, Proposal, arbitrate};
use self::clean::clean_perito_name;
use self::direct::DirectExtractor;

pub use self::direct::refine;
pub use self::enrich::Enricher;

/// Source name templates use for the window's leading paragraphs.
pub const PARAGRAPHS_SOURCE: &str = "paragraphs";

static BARE_CNJ: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{20}\b").expect("static regex"));

/// Inputs for one window.
#[derive(Clone, Copy)]
pub struct FieldContext<'a> {
    pub window: &'a CandidateWindow,
    pub pages: &'a SegmentedPages,
    pub regions: &'a [Region],
    pub signatures: &'a [SignatureInfo],
    pub file_name: &'a str,
}

/// Paragraphs of the window, page by page.
pub(crate) struct WindowText<'a> {
    pages: Vec<Cow<'a, [Paragraph]>>,
}

impl<'a> WindowText<'a> {
    pub fn new(ctx: &FieldContext<'a>) -> Self {
        let pages = ctx
            .pages
            .range(ctx.window.start_page, ctx.window.end_page)
            .map(|p| p.paragraphs_or_raw())
            .collect();
        WindowText { pages }
    }

    pub fn all(&self) -> Vec<&Paragraph> {
        self.pages.iter().flat_map(|p| p.iter()).collect()
    }

    pub fn early(&self, n: usize) -> Vec<&Paragraph> {
        self.all().into_iter().take(n).collect()
    }

    pub fn on_page(&self, page: u32) -> Vec<&Paragraph> {
        self.all().into_iter().filter(|p| p.page == page).collect()
    }
}

/// Final fields of a window plus the warnings raised on the way.
#[derive(Debug, Clone, Default)]
pub struct FieldOutcome {
    pub fields: BTreeMap<FieldName, Field>,
    pub warnings: Vec<String>,
}

pub struct FieldExtractor<'a> {
    config: &'a Config,
    patterns: &'a Patterns,
    templates: TemplateFieldExtractor<'a>,
    strategies: &'a FieldStrategyEngine,
    peritos: &'a PeritoCatalog,
    honorarios: &'a HonorariosTable,
}

impl<'a> FieldExtractor<'a> {
    pub fn new(
        config: &'a Config,
        patterns: &'a Patterns,
        similarity: &'a dyn Similarity,
        strategies: &'a FieldStrategyEngine,
        peritos: &'a PeritoCatalog,
        honorarios: &'a HonorariosTable,
    ) -> Self {
        let fc = &config.fields;
        FieldExtractor {
            config,
            patterns,
            templates: TemplateFieldExtractor::new(&fc.templates, similarity, fc.anchor_min_score, fc.max_value_chars),
            strategies,
            peritos,
            honorarios,
        }
    }

    pub fn extract(&self, ctx: &FieldContext<'_>, log: &mut RunLog) -> FieldOutcome {
        let text = WindowText::new(ctx);
        let mut fields = DirectExtractor::new(self.config, self.patterns).extract(ctx, &text);
        log.debug("fields", format!("direct pass found {} fields", present(&fields)));

        let actx = ArbitrationContext {
            first_page: ctx.window.start_page,
            second_page: page_for(PageRole::Second, ctx.window),
            institutional_markers: &self.config.fields.institutional_markers,
        };

        for (field, candidate) in self.template_pass(ctx, &text) {
            offer(&mut fields, field, candidate, &actx, log);
        }

        if !self.strategies.is_empty() {
            let owned = band_texts(ctx);
            let units: Vec<TextUnit<'_>> = owned
                .iter()
                .map(|(page, bucket, segment, text, bbox)| TextUnit {
                    page: *page,
                    bucket: *bucket,
                    segment: *segment,
                    text,
                    bbox: *bbox,
                })
                .collect();
            let sctx = StrategyContext {
                file_name: ctx.file_name,
                weights: &self.config.strategy,
                patterns: self.patterns,
            };
            for (field, candidate) in self.strategies.extract(&units, &sctx) {
                offer(&mut fields, field, candidate, &actx, log);
            }
        }

        self.fallbacks(ctx, &mut fields, log);
        for (field, candidate) in self.strategies.compose(&fields) {
            offer(&mut fields, field, candidate, &actx, log);
        }
        self.post_validate(&mut fields, log);

        let mut warnings = Vec::new();
        Enricher::new(&self.config.catalogs, self.peritos, self.honorarios).enrich(&mut fields, &mut warnings, log);

        let numbers = [
            FieldName::ProcessoJudicial,
            FieldName::ProcessoAdministrativo,
            FieldName::ProcessoAdme,
        ];
        if numbers.iter().all(|f| fields.get(f).is_none_or(Field::is_absent)) {
            log.warn("fields", "no process number resolved");
            warnings.push("process_numbers_unresolved".to_string());
        }
        log.info("fields", format!("{} of {} fields resolved", present(&fields), FieldName::ALL.len()));
        FieldOutcome { fields, warnings }
    }

    /// Best template hit per field over every template source.
    fn template_pass(&self, ctx: &FieldContext<'_>, text: &WindowText<'_>) -> BTreeMap<FieldName, Field> {
        let mut out: BTreeMap<FieldName, Field> = BTreeMap::new();
        for source in self.templates.sources() {
            let (joined, spans) = if source == PARAGRAPHS_SOURCE {
                join_paragraphs(&text.early(self.config.fields.early_paragraphs))
            } else {
                match ctx.regions.iter().find(|r| r.name == source) {
                    Some(r) => (r.text.clone(), vec![(0, r.page, r.bbox)]),
                    None => continue,
                }
            };
            for m in self.templates.extract(source, &joined) {
                let Some(value) = refine(m.field, &m.value, self.config, self.patterns) else {
                    continue;
                };
                let (page, bbox) = spans
                    .iter()
                    .rev()
                    .find(|(offset, _, _)| *offset <= m.span.0)
                    .map_or((ctx.window.start_page, BoundingBox::default()), |(_, page, bbox)| (*page, *bbox));
                let evidence = Evidence::new(page, bbox, &m.value);
                let field = Field::found(value, m.confidence, m.method, Some(evidence));
                if out.get(&m.field).is_none_or(|f| field.confidence > f.confidence) {
                    out.insert(m.field, field);
                }
            }
        }
        out
    }

    /// Values from the file name and from cryptographic signatures, used
    /// only for fields nothing else resolved.
    fn fallbacks(&self, ctx: &FieldContext<'_>, fields: &mut BTreeMap<FieldName, Field>, log: &mut RunLog) {
        let name = ctx.file_name;
        // page 0: the value came from the file name, not from a page
        let from_name = |value: String| Field::found(value, 0.3, "filename", Some(Evidence::new(0, BoundingBox::default(), name)));

        if is_absent(fields, FieldName::ProcessoJudicial) {
            let cnj = self
                .patterns
                .processo_judicial
                .find(name)
                .map(|m| compact(m.as_str()))
                .or_else(|| BARE_CNJ.find(name).map(|m| format_cnj(m.as_str())));
            if let Some(cnj) = cnj {
                log.debug("fields", format!("process number {} taken from file name", cnj));
                fields.insert(FieldName::ProcessoJudicial, from_name(cnj));
            }
        }
        if is_absent(fields, FieldName::ProcessoAdministrativo) {
            if let Some(m) = self.patterns.processo_sei.find(name) {
                fields.insert(FieldName::ProcessoAdministrativo, from_name(compact(m.as_str())));
            }
        }
        if is_absent(fields, FieldName::Assinante) {
            let window = ctx.window;
            let digital = ctx
                .signatures
                .iter()
                .filter(|s| s.source == SignatureSource::Cryptographic)
                .max_by_key(|s| s.page.is_some_and(|p| window.contains(p)));
            if let Some(sig) = digital {
                let ev = Evidence::new(sig.page.unwrap_or(0), sig.bbox.unwrap_or_default(), &sig.evidence);
                fields.insert(
                    FieldName::Assinante,
                    Field::found(sig.signer.clone(), 0.6, "signature_digital", Some(ev)),
                );
            }
        }
    }

    /// Last look at values from every pass: malformed numbers and names
    /// are dropped rather than reported.
    fn post_validate(&self, fields: &mut BTreeMap<FieldName, Field>, log: &mut RunLog) {
        let mut reject = |fields: &mut BTreeMap<FieldName, Field>, name: FieldName, why: &str| {
            log.debug("fields", format!("dropping {}: {}", name, why));
            fields.insert(name, Field::not_found());
        };

        if let Some(f) = fields.get_mut(&FieldName::ProcessoJudicial).filter(|f| !f.is_absent()) {
            let compacted = compact(&f.value);
            if self.patterns.cnj_exact.is_match(&compacted) {
                f.value = compacted;
            } else {
                reject(fields, FieldName::ProcessoJudicial, "not a CNJ number");
            }
        }
        if let Some(f) = fields.get_mut(&FieldName::PeritoCpf).filter(|f| !f.is_absent()) {
            match canonical_cpf(&f.value) {
                Some(cpf) => f.value = cpf,
                None => reject(fields, FieldName::PeritoCpf, "not an 11-digit CPF"),
            }
        }
        if let Some(f) = fields.get_mut(&FieldName::Perito).filter(|f| !f.is_absent()) {
            match clean_perito_name(&f.value) {
                Some(name) => f.value = name,
                None => reject(fields, FieldName::Perito, "not a plausible name"),
            }
        }
    }
}

/// Arbitrate `candidate` against the current value of `field`.
fn offer(
    fields: &mut BTreeMap<FieldName, Field>,
    field: FieldName,
    candidate: Field,
    actx: &ArbitrationContext<'_>,
    log: &mut RunLog,
) {
    let current = fields.get(&field).cloned().unwrap_or_default();
    let (decision, rule) = arbitrate(&Proposal {
        field,
        current: &current,
        candidate: &candidate,
        ctx: actx,
    });
    match decision {
        Decision::Replace => {
            if !current.is_absent() && current.value != candidate.value {
                log.debug(
                    "arbitration",
                    format!("{}: {:?} replaces {:?} ({})", field, candidate.value, current.value, rule),
                );
            }
            fields.insert(field, candidate);
        }
        Decision::Keep if rule != "candidate_absent" => {
            log.debug("arbitration", format!("{}: kept {:?} over {:?} ({})", field, current.value, candidate.value, rule));
        }
        Decision::Keep => {}
    }
}

fn present(fields: &BTreeMap<FieldName, Field>) -> usize {
    fields.values().filter(|f| !f.is_absent()).count()
}

fn is_absent(fields: &BTreeMap<FieldName, Field>, name: FieldName) -> bool {
    fields.get(&name).is_none_or(Field::is_absent)
}

fn compact(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// `NNNNNNNDDAAAAJTROOOO` as `NNNNNNN-DD.AAAA.J.TR.OOOO`.
fn format_cnj(digits: &str) -> String {
    let d = digits_only(digits);
    if d.len() != 20 {
        return d;
    }
    format!("{}-{}.{}.{}.{}.{}", &d[..7], &d[7..9], &d[9..13], &d[13..14], &d[14..16], &d[16..])
}

/// Paragraphs joined by newlines, with the byte offset each one starts at.
fn join_paragraphs(paragraphs: &[&Paragraph]) -> (String, Vec<(usize, u32, BoundingBox)>) {
    let mut joined = String::new();
    let mut spans = Vec::with_capacity(paragraphs.len());
    for p in paragraphs {
        if !joined.is_empty() {
            joined.push('\n');
        }
        spans.push((joined.len(), p.page, p.bbox));
        joined.push_str(&p.text);
    }
    (joined, spans)
}

/// Band texts of the window as strategy units; pages without words give
/// one body unit of raw text.
fn band_texts(ctx: &FieldContext<'_>) -> Vec<(u32, Bucket, BandName, String, BoundingBox)> {
    let (start, end) = (ctx.window.start_page, ctx.window.end_page);
    let mut out = Vec::new();
    for page in ctx.pages.range(start, end) {
        let bucket = Bucket::of(page.page, start, end);
        if page.bands.is_empty() {
            if !page.raw_text.trim().is_empty() {
                out.push((page.page, bucket, BandName::Body, page.raw_text.clone(), BoundingBox::default()));
            }
            continue;
        }
        for band in &page.bands {
            out.push((page.page, bucket, band.name, band.text(), band.bbox()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bands::BandSegmenter;
    use crate::document::WindowSource;
    use crate::layout::row;
    use crate::similarity::EditDistance;

    fn window(start: u32, end: u32) -> CandidateWindow {
        CandidateWindow {
            start_page: start,
            end_page: end,
            edit_score: 0.9,
            diff_score: None,
            anchors_hit: Vec::new(),
            density: BTreeMap::new(),
            source: WindowSource::Bookmark,
            title: None,
        }
    }

    fn pages(config: &Config, texts: &[&[(f64, &str)]]) -> SegmentedPages {
        let seg = BandSegmenter::new(&config.bands, &config.layout, &config.anchors.title);
        SegmentedPages::new(
            texts
                .iter()
                .enumerate()
                .map(|(i, rows)| {
                    let page = i as u32 + 1;
                    let words: Vec<_> = rows
                        .iter()
                        .flat_map(|(y, t)| row(page, *y, 0.08, &t.split(' ').collect::<Vec<_>>()))
                        .collect();
                    seg.segment_page(page, &words, "")
                })
                .collect(),
        )
    }

    fn run(config: &Config, pages: &SegmentedPages, window: &CandidateWindow, file_name: &str) -> FieldOutcome {
        run_with(config, pages, window, file_name, &FieldStrategyEngine::empty())
    }

    fn run_with(
        config: &Config,
        pages: &SegmentedPages,
        window: &CandidateWindow,
        file_name: &str,
        strategies: &FieldStrategyEngine,
    ) -> FieldOutcome {
        let patterns = Patterns::compile(&config.patterns).unwrap();
        let peritos = PeritoCatalog::empty();
        let honorarios = HonorariosTable::empty();
        let extractor = FieldExtractor::new(config, &patterns, &EditDistance, strategies, &peritos, &honorarios);
        let ctx = FieldContext {
            window,
            pages,
            regions: &[],
            signatures: &[],
            file_name,
        };
        extractor.extract(&ctx, &mut RunLog::default())
    }

    #[test]
    fn cnj_digits_are_formatted() {
        assert_eq!(format_cnj("08012345620238150001"), "0801234-56.2023.8.15.0001");
    }

    #[test]
    fn every_field_is_reported() {
        let config = Config::default();
        let p = pages(&config, &[&[(0.5, "Nada de relevante aqui")]]);
        let out = run(&config, &p, &window(1, 1), "arquivo.pdf");
        assert_eq!(out.fields.len(), FieldName::ALL.len());
        assert!(out.fields.values().all(Field::is_absent));
        assert_eq!(out.warnings, vec!["process_numbers_unresolved".to_string()]);
    }

    #[test]
    fn file_name_fills_missing_process_number() {
        let config = Config::default();
        let p = pages(&config, &[&[(0.5, "Sem numeração no corpo")]]);
        let out = run(&config, &p, &window(1, 1), "08012345620238150001.pdf");
        let f = &out.fields[&FieldName::ProcessoJudicial];
        assert_eq!(f.value, "0801234-56.2023.8.15.0001");
        assert_eq!(f.method, "filename");
        assert!(f.confidence <= 0.3);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn body_values_beat_file_name() {
        let config = Config::default();
        let p = pages(
            &config,
            &[&[
                (0.3, "Processo nº 0800001-11.2024.8.15.2001"),
                (0.34, "Perito: Dr. Carlos Alberto Mendes, CPF 529.982.247-25"),
            ]],
        );
        let out = run(&config, &p, &window(1, 1), "08012345620238150001.pdf");
        assert_eq!(out.fields[&FieldName::ProcessoJudicial].value, "0800001-11.2024.8.15.2001");
        assert_eq!(out.fields[&FieldName::Perito].value, "Carlos Alberto Mendes");
        assert_eq!(out.fields[&FieldName::PeritoCpf].value, "52998224725");
    }

    #[test]
    fn malformed_numbers_revert_to_not_found() {
        let config = Config::default();
        let rules = FieldStrategyEngine::from_json_str(
            r#"{
                "fields": {
                    "PROCESSO_JUDICIAL": {"rules": [{"id": "autos", "kind": "regex", "pattern": "autos\\s+(\\d+)"}]},
                    "PERITO_CPF": {"rules": [{"id": "inscricao", "kind": "regex", "pattern": "inscricao\\s+(\\d+)"}]}
                }
            }"#,
        )
        .unwrap();
        let p = pages(&config, &[&[(0.5, "Autos 123"), (0.4, "Inscrição 12345")]]);
        let out = run_with(&config, &p, &window(1, 1), "arquivo.pdf", &rules);

        for name in [FieldName::ProcessoJudicial, FieldName::PeritoCpf] {
            let f = &out.fields[&name];
            assert!(f.is_absent(), "{} kept {:?}", name, f.value);
            assert_eq!(f.confidence, 0.1);
            assert_eq!(f.method, Field::NOT_FOUND);
        }
    }

    #[test]
    fn well_formed_strategy_numbers_are_compacted() {
        let config = Config::default();
        let rules = FieldStrategyEngine::from_json_str(
            r#"{
                "fields": {
                    "PERITO_CPF": {"rules": [{"id": "inscricao", "kind": "regex", "pattern": "inscricao\\s+([\\d. -]+)"}]}
                }
            }"#,
        )
        .unwrap();
        let p = pages(&config, &[&[(0.5, "Inscrição 111.111.111-11")]]);
        let out = run_with(&config, &p, &window(1, 1), "arquivo.pdf", &rules);
        assert_eq!(out.fields[&FieldName::PeritoCpf].value, "11111111111");
    }
}
