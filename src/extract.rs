use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info};

use crate::bands::{BandSegmenter, SegmentedPages};
use crate::candidates::CandidateScorer;
use crate::certidao::CertidaoLocator;
use crate::config::{Config, Patterns};
use crate::document::{
    CandidateWindow, DespachoDocument, DocType, ExtractionResult, Field, FieldName, RunInfo,
};
use crate::error::Result;
use crate::fields::{FieldContext, FieldExtractor};
use crate::honorarios::HonorariosTable;
use crate::log::{LogCallback, LogEntry, RunLog};
use crate::perito::PeritoCatalog;
use crate::regions::RegionExtractor;
use crate::signature::{SignatureExtractor, SignatureInfo};
use crate::similarity::{EditDistance, Similarity};
use crate::strategy::FieldStrategyEngine;
use crate::types::PdfAnalysis;
use crate::utils::{contains_any, sha256_hex};

/// Builder for configuring a [`DespachoExtractor`].
///
/// Catalogs and strategy rules not set explicitly are loaded from the paths
/// named in the configuration; a missing or unreadable file leaves that
/// source empty.
///
/// # Examples
///
/// ```no_run
/// use despacho_extract::{Config, DespachoExtractor};
///
/// let extractor = DespachoExtractor::builder()
///     .config(Config::load("despacho.toml")?)
///     .bookmark_filter("Despacho DIESP")
///     .build()?;
/// let result = extractor.extract_path("analysis.json")?;
/// println!("{}", result.errors.len());
/// # Ok::<(), despacho_extract::ExtractError>(())
/// ```
#[derive(Default)]
pub struct DespachoExtractorBuilder {
    config: Option<Config>,
    peritos: Option<PeritoCatalog>,
    honorarios: Option<HonorariosTable>,
    strategies: Option<FieldStrategyEngine>,
    similarity: Option<Arc<dyn Similarity>>,
    on_log: Option<LogCallback>,
    bookmark_filter: Option<String>,
}

impl DespachoExtractorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn peritos(mut self, catalog: PeritoCatalog) -> Self {
        self.peritos = Some(catalog);
        self
    }

    pub fn honorarios(mut self, table: HonorariosTable) -> Self {
        self.honorarios = Some(table);
        self
    }

    pub fn strategies(mut self, engine: FieldStrategyEngine) -> Self {
        self.strategies = Some(engine);
        self
    }

    /// Similarity used to align template anchors.
    pub fn similarity(mut self, similarity: Arc<dyn Similarity>) -> Self {
        self.similarity = Some(similarity);
        self
    }

    /// Observer called synchronously for every log entry of every run.
    pub fn on_log<F>(mut self, callback: F) -> Self
    where
        F: Fn(&LogEntry) + Send + Sync + 'static,
    {
        self.on_log = Some(Arc::new(callback));
        self
    }

    /// Only bookmarks whose title contains this text become candidates.
    pub fn bookmark_filter(mut self, filter: impl Into<String>) -> Self {
        self.bookmark_filter = Some(filter.into()).filter(|f| !f.trim().is_empty());
        self
    }

    /// Compile the patterns and load whatever was not supplied.
    pub fn build(self) -> Result<DespachoExtractor> {
        let config = self.config.unwrap_or_default();
        let patterns = Patterns::compile(&config.patterns)?;
        let catalogs = &config.catalogs;
        let peritos = self
            .peritos
            .unwrap_or_else(|| catalogs.perito_path.as_ref().map_or_else(PeritoCatalog::empty, PeritoCatalog::load));
        let honorarios = self.honorarios.unwrap_or_else(|| {
            catalogs
                .honorarios_path
                .as_ref()
                .map_or_else(HonorariosTable::empty, HonorariosTable::load)
        });
        let strategies = self.strategies.unwrap_or_else(|| {
            config
                .strategy
                .rules_path
                .as_ref()
                .map_or_else(FieldStrategyEngine::empty, FieldStrategyEngine::load)
        });
        let config_sha256 = serde_json::to_vec(&config).map(|b| sha256_hex(&b)).unwrap_or_default();
        info!(
            peritos = peritos.len(),
            fee_rows = honorarios.len(),
            rules = strategies.rule_count(),
            "extractor ready"
        );

        Ok(DespachoExtractor {
            config: Arc::new(config),
            patterns: Arc::new(patterns),
            peritos: Arc::new(peritos),
            honorarios: Arc::new(honorarios),
            strategies: Arc::new(strategies),
            similarity: self.similarity.unwrap_or_else(|| Arc::new(EditDistance) as Arc<dyn Similarity>),
            on_log: self.on_log,
            bookmark_filter: self.bookmark_filter,
            config_sha256,
        })
    }
}

/// Despacho and certidão extractor.
///
/// Holds the configuration and reference tables read-only; clones share them,
/// so one extractor can serve many threads, one document per call.
#[derive(Clone)]
pub struct DespachoExtractor {
    config: Arc<Config>,
    patterns: Arc<Patterns>,
    peritos: Arc<PeritoCatalog>,
    honorarios: Arc<HonorariosTable>,
    strategies: Arc<FieldStrategyEngine>,
    similarity: Arc<dyn Similarity>,
    on_log: Option<LogCallback>,
    bookmark_filter: Option<String>,
    config_sha256: String,
}

impl DespachoExtractor {
    pub fn builder() -> DespachoExtractorBuilder {
        DespachoExtractorBuilder::new()
    }

    /// Extractor with the built-in configuration and no catalogs.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run on a JSON analysis dump written by the PDF collaborator.
    pub fn extract_path<P: AsRef<Path>>(&self, path: P) -> Result<ExtractionResult> {
        let analysis = load_analysis(path)?;
        Ok(self.extract(&analysis))
    }

    /// One result per document. Never fails: structural problems end up in
    /// `errors`, soft ones in the document warnings.
    pub fn extract(&self, analysis: &PdfAnalysis) -> ExtractionResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut log = RunLog::new(self.on_log.clone());
        let config = &*self.config;

        let bookmarks = analysis.bookmarks();
        let pages = self.segment(analysis);
        log.info(
            "segment",
            format!("{} pages, {} bookmarks, {} signatures", pages.count(), bookmarks.len(), analysis.signatures.len()),
        );

        let signer = SignatureExtractor::new(config, &self.patterns);
        let mut signatures = signer.from_digital(&analysis.signatures);

        let scorer = CandidateScorer::new(config);
        let candidates = scorer.propose(&pages, &bookmarks, self.bookmark_filter.as_deref());
        for c in &candidates {
            log.debug(
                "candidates",
                format!(
                    "pages {}-{} edit={:.3} diff={} anchors={:?}",
                    c.start_page,
                    c.end_page,
                    c.edit_score,
                    c.diff_score.map_or("-".to_string(), |d| format!("{:.3}", d)),
                    c.anchors_hit
                ),
            );
        }

        let mut errors = Vec::new();
        let mut documents = Vec::new();
        let window = match scorer.best(&candidates) {
            None => {
                log.warn("candidates", "no candidate window");
                errors.push("no_candidates_found".to_string());
                None
            }
            Some(best) => match scorer.finalize(best, &pages) {
                Ok(window) => Some(window),
                Err(e) => {
                    log.warn(
                        "candidates",
                        format!("window {}-{} below {} pages", best.start_page, best.end_page, config.window.min_pages),
                    );
                    errors.push(e.code().to_string());
                    None
                }
            },
        };

        if let Some(window) = window {
            for s in signer.from_text(&pages, window.start_page, window.end_page) {
                push_signature(&mut signatures, s);
            }
            let mut despacho = self.despacho(analysis, &window, &pages, &signatures, &mut log);

            let locator = CertidaoLocator::new(config, &self.patterns);
            match locator.locate(&bookmarks, &pages, &signatures) {
                Some(page) => {
                    for s in signer.from_text(&pages, page, page) {
                        push_signature(&mut signatures, s);
                    }
                    if let Some(certidao) = locator.build(page, &pages, &signatures) {
                        log.info("certidao", format!("certidão on page {}", page));
                        propagate_certidao(&mut despacho, &certidao, &mut log);
                        documents.push(despacho);
                        documents.push(certidao);
                    } else {
                        documents.push(despacho);
                    }
                }
                None => {
                    log.info("certidao", "no certidão page validated");
                    despacho.warnings.push("certidao_not_found".to_string());
                    documents.push(despacho);
                }
            }
        }

        let elapsed_ms = clock.elapsed().as_millis() as u64;
        log.info("run", format!("done in {} ms with {} errors", elapsed_ms, errors.len()));

        let mut pdf_info = analysis.info.clone();
        pdf_info.page_count = analysis.page_count_within(config.window.blank_pages);
        ExtractionResult {
            pdf_info,
            run_info: RunInfo {
                engine_version: env!("CARGO_PKG_VERSION").to_string(),
                started_at,
                elapsed_ms,
                config_sha256: self.config_sha256.clone(),
                bookmark_filter: self.bookmark_filter.clone(),
            },
            bookmarks,
            candidates,
            documents,
            signatures,
            errors,
            logs: log.into_entries(),
        }
    }

    fn segment(&self, analysis: &PdfAnalysis) -> SegmentedPages {
        let config = &*self.config;
        let segmenter = BandSegmenter::new(&config.bands, &config.layout, &config.anchors.title);
        let pages = (1..=analysis.page_count_within(config.window.blank_pages))
            .map(|n| {
                let words = analysis.words(n, config.layout.dedupe_precision);
                let raw = analysis.page(n).map_or("", |p| p.text.as_str());
                segmenter.segment_page(n, &words, raw)
            })
            .collect();
        SegmentedPages::new(pages)
    }

    fn despacho(
        &self,
        analysis: &PdfAnalysis,
        window: &CandidateWindow,
        pages: &SegmentedPages,
        signatures: &[SignatureInfo],
        log: &mut RunLog,
    ) -> DespachoDocument {
        let config = &*self.config;
        let mut warnings = Vec::new();
        let score = window.best_score();
        if score < config.window.match_threshold {
            log.warn(
                "candidates",
                format!("best score {:.3} below {:.3}", score, config.window.match_threshold),
            );
            warnings.push("low_match_score".to_string());
        }

        let regions = RegionExtractor::new(&config.regions.specs).build(window, pages);
        debug!(regions = regions.len(), "regions built");
        let ctx = FieldContext {
            window,
            pages,
            regions: &regions,
            signatures,
            file_name: &analysis.info.name,
        };
        let outcome = FieldExtractor::new(
            config,
            &self.patterns,
            &*self.similarity,
            &self.strategies,
            &self.peritos,
            &self.honorarios,
        )
        .extract(&ctx, log);
        warnings.extend(outcome.warnings);

        let in_window = || pages.range(window.start_page, window.end_page);
        DespachoDocument {
            doc_type: DocType::Despacho,
            start_page: window.start_page,
            end_page: window.end_page,
            match_score: score,
            subtype: self.subtype(window, pages),
            bands: in_window().flat_map(|p| p.flat_bands()).collect(),
            paragraphs: in_window().flat_map(|p| p.paragraphs_or_raw().into_owned()).collect(),
            regions,
            fields: outcome.fields,
            warnings,
        }
    }

    /// First configured subtype whose hint occurs in the window.
    fn subtype(&self, window: &CandidateWindow, pages: &SegmentedPages) -> Option<String> {
        let text = (window.start_page..=window.end_page)
            .map(|n| pages.normalized_text(n))
            .collect::<Vec<_>>()
            .join(" ");
        self.config
            .fields
            .subtypes
            .iter()
            .find(|s| contains_any(&text, &s.hints))
            .map(|s| s.name.clone())
    }
}

/// Read a collaborator dump.
pub fn load_analysis<P: AsRef<Path>>(path: P) -> Result<PdfAnalysis> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Extract with the built-in configuration.
///
/// Equivalent to `DespachoExtractor::new()?.extract(analysis)`.
pub fn extract(analysis: &PdfAnalysis) -> Result<ExtractionResult> {
    Ok(DespachoExtractor::new()?.extract(analysis))
}

fn push_signature(signatures: &mut Vec<SignatureInfo>, s: SignatureInfo) {
    let dup = signatures
        .iter()
        .any(|o| o.source == s.source && o.page == s.page && o.signer == s.signer);
    if !dup {
        signatures.push(s);
    }
}

/// The certificate value stands in for a despacho that does not state it.
fn propagate_certidao(despacho: &mut DespachoDocument, certidao: &DespachoDocument, log: &mut RunLog) {
    let name = FieldName::ValorArbitradoCm;
    let Some(value) = certidao.field(name).filter(|f| !f.is_absent()) else {
        return;
    };
    if despacho.field(name).is_some_and(|f| !f.is_absent()) {
        return;
    }
    log.info("certidao", format!("{} taken from certidão: {}", name, value.value));
    despacho.fields.insert(
        name,
        Field::found(value.value.clone(), value.confidence, "certidao", value.evidence.clone()),
    );
}
