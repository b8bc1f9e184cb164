//! Despacho and certidão extraction library
//!
//! This library turns the positioned words, outline and signatures of a
//! court dossier PDF into structured fields with page-level evidence:
//! process numbers, parties, expert identity, monetary values, signer and
//! dates. Reading the PDF itself is left to an upstream collaborator whose
//! output is described by [`PdfAnalysis`].

mod bands;
mod candidates;
mod certidao;
mod config;
mod document;
mod error;
mod extract;
mod fields;
mod honorarios;
mod layout;
mod log;
mod perito;
mod regions;
mod signature;
mod similarity;
mod strategy;
mod template;
mod types;
mod utils;

// Re-export error type
pub use error::{ExtractError, Result};

// Re-export extraction API
pub use extract::{DespachoExtractor, DespachoExtractorBuilder, extract, load_analysis};

// Re-export configuration
pub use config::{
    AnchorConfig, BandConfig, CatalogConfig, CertidaoConfig, Config, FieldConfig, FieldTemplate, LayoutConfig,
    PageRole, PatternConfig, Patterns, RegionConfig, RegionSpec, StrategyConfig, SubtypeHint, WindowConfig,
};

// Re-export pipeline stages
pub use bands::{BandSegment, BandSegmenter, PageSegment, SegmentedPages};
pub use candidates::{CandidateScorer, RangeError};
pub use certidao::{CertidaoCheck, CertidaoLocator};
pub use fields::arbitration::{ArbitrationContext, Decision, Proposal, Rule, arbitrate, rules_for};
pub use fields::{Enricher, FieldContext, FieldExtractor, FieldOutcome, refine};
pub use honorarios::{Amount, FeeMatch, HonorariosEntry, HonorariosTable};
pub use layout::{LineBuilder, ParagraphBuilder};
pub use log::{LogCallback, LogEntry, LogLevel, RunLog};
pub use perito::{NameMatch, PeritoCatalog, PeritoInfo};
pub use regions::{RegionExtractor, page_for};
pub use signature::{SignatureExtractor, SignatureInfo, SignatureSource};
pub use similarity::{AnchorHit, CharDiff, EditDistance, Similarity, find_anchor};
pub use strategy::{Bucket, FieldStrategyEngine, StrategyContext, StrategyFile, TextUnit};
pub use template::{TemplateFieldExtractor, TemplateMatch};

// Re-export public types
pub use document::{
    Band, BandName, CandidateWindow, DespachoDocument, DocType, Evidence, ExtractionResult, Field, FieldCategory,
    FieldName, Region, RunInfo, WindowSource,
};
pub use types::{
    Bookmark, BoundingBox, DigitalSignature, Line, OutlineNode, PageInput, Paragraph, PdfAnalysis, PdfInfo, RawWord,
    SignatureWidget, Word,
};
pub use utils::{canonical_cpf, canonical_date, canonical_money, normalize_text, parse_money};
