//! Finds the council certificate that accompanies a despacho.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::bands::{PageSegment, SegmentedPages};
use crate::config::{Config, Patterns};
use crate::document::{BandName, DespachoDocument, DocType, Evidence, Field, FieldName, Region};
use crate::regions::region_from_paragraphs;
use crate::signature::{SignatureInfo, SignatureSource};
use crate::types::{Bookmark, BoundingBox, Paragraph};
use crate::utils::{canonical_date, canonical_money, contains_any, normalize_text};

pub const REGION_FULL: &str = "certidao_full";
pub const REGION_VALUE_DATE: &str = "certidao_value_date";

static CERTIFY_COUNCIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"certifico.*conselho.*magistratura").expect("static regex"));
static RULED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"proferiram.*decisao").expect("static regex"));

const PAYMENT_WORDS: &[&str] = &["honorarios", "pagamento", "autorizado"];

/// The first validation step a page failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertidaoCheck {
    MissingHeader,
    MissingTitle,
    MissingBody,
    UnknownSigner,
}

impl fmt::Display for CertidaoCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CertidaoCheck::MissingHeader => "no header hint",
            CertidaoCheck::MissingTitle => "no title hint",
            CertidaoCheck::MissingBody => "no body hint or amount",
            CertidaoCheck::UnknownSigner => "no known signer",
        };
        f.write_str(s)
    }
}

pub struct CertidaoLocator<'a> {
    config: &'a Config,
    patterns: &'a Patterns,
}

impl<'a> CertidaoLocator<'a> {
    pub fn new(config: &'a Config, patterns: &'a Patterns) -> Self {
        CertidaoLocator { config, patterns }
    }

    /// Bookmarked pages whose title names a certificate, in outline order.
    pub fn candidate_pages(&self, bookmarks: &[Bookmark]) -> Vec<u32> {
        let hint = normalize_text(&self.config.certidao.bookmark_hint);
        let mut out: Vec<u32> = Vec::new();
        for mark in bookmarks {
            if mark.page > 0 && normalize_text(&mark.title).contains(&hint) && !out.contains(&mark.page) {
                out.push(mark.page);
            }
        }
        out
    }

    /// Run the four checks in order.
    pub fn validate(&self, page: &PageSegment, signatures: &[SignatureInfo]) -> Result<(), CertidaoCheck> {
        let cfg = &self.config.certidao;
        let full = page.normalized_text();
        let top = page.normalized_bands(&[BandName::Header, BandName::Subheader, BandName::Title]);

        if !contains_any(&top, &cfg.header_hints) && !contains_any(&full, &cfg.header_hints) {
            return Err(CertidaoCheck::MissingHeader);
        }
        if !contains_any(&full, &cfg.title_hints) {
            return Err(CertidaoCheck::MissingTitle);
        }
        if !contains_any(&full, &cfg.body_hints) && !self.patterns.money.is_match(&page.text()) {
            return Err(CertidaoCheck::MissingBody);
        }

        let footer = if page.lines.is_empty() {
            full.clone()
        } else {
            page.normalized_bands(&[BandName::Footer])
        };
        let digital: Vec<String> = signatures
            .iter()
            .filter(|s| s.source == SignatureSource::Cryptographic && s.page == Some(page.page))
            .map(|s| normalize_text(&s.signer))
            .collect();

        let signed = if cfg.signers.is_empty() {
            !digital.is_empty() || footer.contains("assinado eletronicamente")
        } else {
            cfg.signers.iter().map(|s| normalize_text(s)).any(|known| {
                !known.is_empty() && (footer.contains(&known) || digital.iter().any(|d| *d == known))
            })
        };
        if !signed {
            return Err(CertidaoCheck::UnknownSigner);
        }
        Ok(())
    }

    /// First bookmarked page passing every check.
    pub fn locate(&self, bookmarks: &[Bookmark], pages: &SegmentedPages, signatures: &[SignatureInfo]) -> Option<u32> {
        self.candidate_pages(bookmarks).into_iter().find(|&n| {
            let Some(page) = pages.get(n) else {
                return false;
            };
            match self.validate(page, signatures) {
                Ok(()) => true,
                Err(check) => {
                    debug!(page = n, %check, "certidao candidate rejected");
                    false
                }
            }
        })
    }

    /// `certidao_full` and `certidao_value_date`.
    pub fn regions(&self, page: &PageSegment) -> Vec<Region> {
        let paragraphs = page.paragraphs_or_raw();
        let mut out = Vec::new();

        if !paragraphs.is_empty() {
            let start = self.body_start(&paragraphs);
            let tail: Vec<&Paragraph> = paragraphs[start..].iter().collect();
            out.extend(region_from_paragraphs(REGION_FULL, &tail));
        }

        let mut picked: Vec<&Paragraph> = Vec::new();
        if let Some(money) = self.money_paragraph(&paragraphs) {
            picked.push(money);
        }
        if let Some(date) = self.date_paragraph(&paragraphs) {
            if !picked.iter().any(|p| p.index == date.index) {
                picked.push(date);
            }
        }
        picked.sort_by_key(|p| p.index);
        out.extend(region_from_paragraphs(REGION_VALUE_DATE, &picked));
        out
    }

    fn body_start(&self, paragraphs: &[Paragraph]) -> usize {
        let norm: Vec<String> = paragraphs.iter().map(|p| normalize_text(&p.text)).collect();
        norm.iter()
            .position(|t| CERTIFY_COUNCIL.is_match(t))
            .or_else(|| norm.iter().position(|t| t.contains("certifico")))
            .or_else(|| norm.iter().position(|t| RULED.is_match(t)))
            .unwrap_or(0)
    }

    fn money_paragraph<'p>(&self, paragraphs: &'p [Paragraph]) -> Option<&'p Paragraph> {
        best_by(paragraphs, |p| {
            self.patterns
                .money
                .is_match(&p.text)
                .then(|| contains_any(&normalize_text(&p.text), PAYMENT_WORDS) as u8)
        })
    }

    fn date_paragraph<'p>(&self, paragraphs: &'p [Paragraph]) -> Option<&'p Paragraph> {
        let hints = &self.config.certidao.date_hints;
        best_by(paragraphs, |p| {
            self.patterns
                .find_date(&p.text)
                .map(|_| contains_any(&normalize_text(&p.text), hints) as u8)
        })
    }

    /// Certificate document for a validated page.
    pub fn build(&self, page_no: u32, pages: &SegmentedPages, signatures: &[SignatureInfo]) -> Option<DespachoDocument> {
        let page = pages.get(page_no)?;
        let regions = self.regions(page);
        let paragraphs = page.paragraphs_or_raw();
        let mut fields: BTreeMap<FieldName, Field> = FieldName::ALL.iter().map(|f| (*f, Field::not_found())).collect();

        if let Some(p) = self.money_paragraph(&paragraphs) {
            let value = self.patterns.money.find(&p.text).and_then(|m| canonical_money(m.as_str()));
            if let Some(value) = value {
                fields.insert(
                    FieldName::ValorArbitradoCm,
                    Field::found(value, 0.85, "certidao_regex", Some(Evidence::new(page_no, p.bbox, &p.text))),
                );
            }
        }
        if let Some(p) = self.date_paragraph(&paragraphs) {
            let value = self.patterns.find_date(&p.text).and_then(|(_, _, m)| canonical_date(m));
            if let Some(value) = value {
                fields.insert(
                    FieldName::Data,
                    Field::found(value, 0.8, "certidao_regex", Some(Evidence::new(page_no, p.bbox, &p.text))),
                );
            }
        }

        let text = page.text();
        if let Some(m) = self.patterns.processo_sei.find(&text) {
            let value: String = m.as_str().chars().filter(|c| !c.is_whitespace()).collect();
            let bbox = line_bbox(page, m.as_str());
            fields.insert(
                FieldName::ProcessoAdministrativo,
                Field::found(value, 0.8, "certidao_regex", Some(Evidence::new(page_no, bbox, m.as_str()))),
            );
        }

        let signer = signatures
            .iter()
            .filter(|s| s.page == Some(page_no))
            .min_by_key(|s| s.source == SignatureSource::Cryptographic);
        if let Some(s) = signer {
            let (confidence, method) = match s.source {
                SignatureSource::Textual => (0.8, "signature_text"),
                SignatureSource::Cryptographic => (0.7, "signature_digital"),
            };
            let evidence = Evidence::new(page_no, s.bbox.unwrap_or_default(), &s.evidence);
            fields.insert(FieldName::Assinante, Field::found(s.signer.clone(), confidence, method, Some(evidence)));
        }

        Some(DespachoDocument {
            doc_type: DocType::CertidaoCm,
            start_page: page_no,
            end_page: page_no,
            match_score: 1.0,
            subtype: None,
            bands: page.flat_bands(),
            paragraphs: paragraphs.into_owned(),
            regions,
            fields,
            warnings: Vec::new(),
        })
    }
}

/// Highest-ranked paragraph; the earliest wins ties.
fn best_by<F>(paragraphs: &[Paragraph], rank: F) -> Option<&Paragraph>
where
    F: Fn(&Paragraph) -> Option<u8>,
{
    let mut best: Option<(&Paragraph, u8)> = None;
    for p in paragraphs {
        if let Some(r) = rank(p) {
            if best.is_none_or(|(_, b)| r > b) {
                best = Some((p, r));
            }
        }
    }
    best.map(|(p, _)| p)
}

fn line_bbox(page: &PageSegment, needle: &str) -> BoundingBox {
    let needle = normalize_text(needle);
    page.lines
        .iter()
        .find(|l| normalize_text(&l.text).contains(&needle))
        .map(|l| l.bbox)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bands::BandSegmenter;
    use crate::layout::row;
    use crate::types::Word;

    fn setup() -> (Config, Patterns) {
        let config = Config::default();
        let patterns = Patterns::compile(&config.patterns).unwrap();
        (config, patterns)
    }

    fn words(page: u32, rows: &[(f64, &str)]) -> Vec<Word> {
        rows.iter()
            .flat_map(|(y, t)| row(page, *y, 0.05, &t.split(' ').collect::<Vec<_>>()))
            .collect()
    }

    fn certidao_page(config: &Config) -> SegmentedPages {
        let seg = BandSegmenter::new(&config.bands, &config.layout, &config.anchors.title);
        let w = words(
            7,
            &[
                (0.95, "PODER JUDICIÁRIO"),
                (0.82, "CERTIDÃO"),
                (0.70, "Preâmbulo sem conteúdo"),
                (0.60, "CERTIFICO que o Conselho da Magistratura aprovou"),
                (0.58, "honorários de R$ 2.500,00 ao perito"),
                (0.45, "Sessão realizada em 12/03/2024"),
                (0.05, "Documento assinado eletronicamente por Ana Lima"),
            ],
        );
        SegmentedPages::new(vec![seg.segment_page(7, &w, "")])
    }

    fn bm(title: &str, page: u32) -> Bookmark {
        Bookmark {
            title: title.to_string(),
            level: 0,
            page,
        }
    }

    #[test]
    fn locates_and_builds_certificate() {
        let (config, patterns) = setup();
        let pages = certidao_page(&config);
        let loc = CertidaoLocator::new(&config, &patterns);
        let marks = [bm("Despacho", 3), bm("Certidão CM", 7)];
        assert_eq!(loc.locate(&marks, &pages, &[]), Some(7));

        let doc = loc.build(7, &pages, &[]).unwrap();
        assert_eq!(doc.doc_type, DocType::CertidaoCm);
        assert_eq!(doc.value(FieldName::ValorArbitradoCm), "R$ 2.500,00");
        assert_eq!(doc.value(FieldName::Data), "12/03/2024");
        let full = doc.region(REGION_FULL).unwrap();
        assert!(full.text.starts_with("CERTIFICO"));
        let vd = doc.region(REGION_VALUE_DATE).unwrap();
        assert!(vd.text.contains("R$ 2.500,00") && vd.text.contains("12/03/2024"));
    }

    #[test]
    fn known_signers_are_enforced() {
        let (mut config, patterns) = setup();
        config.certidao.signers = vec!["Carlos Souza".to_string()];
        let pages = certidao_page(&config);
        let loc = CertidaoLocator::new(&config, &patterns);
        let page = pages.get(7).unwrap();
        assert_eq!(loc.validate(page, &[]), Err(CertidaoCheck::UnknownSigner));

        let digital = SignatureInfo {
            signer: "CARLOS SOUZA".to_string(),
            source: SignatureSource::Cryptographic,
            page: Some(7),
            bbox: None,
            date: None,
            reason: None,
            location: None,
            evidence: String::new(),
        };
        assert_eq!(loc.validate(page, &[digital]), Ok(()));
    }

    #[test]
    fn pages_without_title_are_rejected() {
        let (config, patterns) = setup();
        let page = PageSegment {
            page: 2,
            raw_text: "PODER JUDICIÁRIO\nOfício qualquer".to_string(),
            ..Default::default()
        };
        let loc = CertidaoLocator::new(&config, &patterns);
        assert_eq!(loc.validate(&page, &[]), Err(CertidaoCheck::MissingTitle));
        assert!(loc.locate(&[bm("Outro", 2)], &SegmentedPages::new(vec![page]), &[]).is_none());
    }
}
