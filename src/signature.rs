use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::bands::SegmentedPages;
use crate::config::{Config, Patterns};
use crate::document::BandName;
use crate::fields::clean::{clean_signer, letters_only};
use crate::types::{BoundingBox, DigitalSignature};
use crate::utils::{format_date, normalize_text, parse_date};

static SIGNED_BY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)documento\s+assinado\s+eletronicamente\s+por\s*:?\s*([^,;\n]+)")
        .expect("static regex")
});

static SUBJECT_CN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|[,/])\s*CN\s*=\s*([^,/]+)").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureSource {
    Cryptographic,
    Textual,
}

/// A signer found either in a signature field or in footer text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignatureInfo {
    pub signer: String,
    pub source: SignatureSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Text the signer was read from.
    pub evidence: String,
}

pub struct SignatureExtractor<'a> {
    config: &'a Config,
    patterns: &'a Patterns,
    title_cut: Regex,
}

impl<'a> SignatureExtractor<'a> {
    pub fn new(config: &'a Config, patterns: &'a Patterns) -> Self {
        let hints: Vec<String> = config
            .anchors
            .signer_hints
            .iter()
            .map(|h| regex::escape(h))
            .collect();
        let src = if hints.is_empty() {
            r"(?im)^[\t ]*(\p{Lu}[\p{L} .']{3,80}?)\s*[–—-]\s*diretor".to_string()
        } else {
            format!(
                r"(?im)^[\t ]*(\p{{Lu}}[\p{{L}} .']{{3,80}}?)\s*[–—-]\s*(?:{})",
                hints.join("|")
            )
        };
        let title_cut = Regex::new(&src).unwrap_or_else(|_| Regex::new(r"$^").expect("static regex"));
        SignatureExtractor {
            config,
            patterns,
            title_cut,
        }
    }

    /// One entry per widget of every cryptographic signature.
    pub fn from_digital(&self, signatures: &[DigitalSignature]) -> Vec<SignatureInfo> {
        let mut out = Vec::new();
        for sig in signatures {
            let raw = if sig.signer_name.trim().is_empty() {
                subject_common_name(&sig.certificate_subject).unwrap_or_default()
            } else {
                sig.signer_name.clone()
            };
            let signer = letters_only(&raw);
            if signer.is_empty() {
                debug!(subject = %sig.certificate_subject, "signature without signer");
                continue;
            }
            let base = SignatureInfo {
                signer,
                source: SignatureSource::Cryptographic,
                page: None,
                bbox: None,
                date: sig.sign_date.as_deref().and_then(parse_sign_date).map(format_date),
                reason: non_empty(&sig.reason),
                location: non_empty(&sig.location),
                evidence: raw,
            };
            if sig.widgets.is_empty() {
                out.push(base);
            } else {
                out.extend(sig.widgets.iter().map(|w| SignatureInfo {
                    page: Some(w.page),
                    bbox: Some(w.bbox),
                    ..base.clone()
                }));
            }
        }
        out
    }

    /// `(signer, matched text)` for every signature phrase in `text`.
    pub fn scan_text(&self, text: &str) -> Vec<(String, String)> {
        let job_titles = &self.config.fields.job_titles;
        let mut found: Vec<(String, String)> = SIGNED_BY
            .captures_iter(text)
            .filter_map(|c| {
                let name = clean_signer(c.get(1)?.as_str(), job_titles)?;
                Some((name, c.get(0)?.as_str().to_string()))
            })
            .collect();
        found.extend(self.title_cut.captures_iter(text).filter_map(|c| {
            let name = clean_signer(c.get(1)?.as_str(), job_titles)?;
            Some((name, c.get(0)?.as_str().to_string()))
        }));
        found
    }

    /// Signers named in the footer band of pages `start..=end`.
    pub fn from_text(&self, pages: &SegmentedPages, start: u32, end: u32) -> Vec<SignatureInfo> {
        let mut out = Vec::new();

        for page in pages.range(start, end) {
            let footer = page.band(BandName::Footer);
            let text = match footer {
                Some(band) => band.text(),
                None if page.lines.is_empty() => page.raw_text.clone(),
                None => continue,
            };

            let found = self.scan_text(&text);
            let date = self
                .patterns
                .find_date(&text)
                .and_then(|(_, _, m)| parse_date(m))
                .map(format_date);

            for (signer, evidence) in found {
                if out.iter().any(|s: &SignatureInfo| s.signer == signer && s.page == Some(page.page)) {
                    continue;
                }
                let needle = normalize_text(&signer);
                let bbox = footer
                    .and_then(|band| {
                        band.lines
                            .iter()
                            .find(|l| normalize_text(&l.text).contains(&needle))
                            .map(|l| l.bbox)
                    })
                    .or_else(|| footer.map(|b| b.bbox()));
                out.push(SignatureInfo {
                    signer,
                    source: SignatureSource::Textual,
                    page: Some(page.page),
                    bbox,
                    date: date.clone(),
                    reason: None,
                    location: None,
                    evidence,
                });
            }
        }
        out
    }
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

/// `CN=` value of an X.509 subject, without a trailing `:CPF` suffix.
pub fn subject_common_name(subject: &str) -> Option<String> {
    let cn = SUBJECT_CN.captures(subject)?.get(1)?.as_str();
    let cn = cn.split(':').next().unwrap_or(cn).trim();
    (!cn.is_empty()).then(|| cn.to_string())
}

/// PDF (`D:20240312...`), ISO or Brazilian signing dates.
pub fn parse_sign_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let digits: String = raw
        .trim_start_matches("D:")
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.len() >= 8 {
        let year = digits[0..4].parse().ok()?;
        let month = digits[4..6].parse().ok()?;
        let day = digits[6..8].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    if let Some(date) = raw.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()) {
        return Some(date);
    }
    parse_date(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bands::BandSegmenter;
    use crate::layout::row;
    use crate::types::SignatureWidget;

    fn setup() -> (Config, Patterns) {
        let config = Config::default();
        let patterns = Patterns::compile(&config.patterns).unwrap();
        (config, patterns)
    }

    #[test]
    fn digital_signer_falls_back_to_subject() {
        let (config, patterns) = setup();
        let ex = SignatureExtractor::new(&config, &patterns);
        let sigs = vec![DigitalSignature {
            signer_name: "  ".into(),
            certificate_subject: "C=BR, O=ICP-Brasil, CN=MARIA DE SOUZA:12345678909".into(),
            sign_date: Some("D:20240312101500-03'00'".into()),
            widgets: vec![SignatureWidget {
                page: 3,
                bbox: BoundingBox::new(0.1, 0.05, 0.5, 0.1),
            }],
            ..Default::default()
        }];
        let out = ex.from_digital(&sigs);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].signer, "MARIA DE SOUZA");
        assert_eq!(out[0].page, Some(3));
        assert_eq!(out[0].date.as_deref(), Some("12/03/2024"));
    }

    #[test]
    fn footer_text_yields_signer_and_date() {
        let (config, patterns) = setup();
        let seg = BandSegmenter::new(&config.bands, &config.layout, &config.anchors.title);
        let mut words = row(1, 0.5, 0.1, &["corpo"]);
        words.extend(row(
            1,
            0.08,
            0.05,
            &["Documento", "assinado", "eletronicamente", "por", "João", "Silva,", "Diretor", "Especial,", "em", "12/03/2024"],
        ));
        let pages = SegmentedPages::new(vec![seg.segment_page(1, &words, "")]);
        let out = SignatureExtractor::new(&config, &patterns).from_text(&pages, 1, 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].signer, "João Silva");
        assert_eq!(out[0].source, SignatureSource::Textual);
        assert_eq!(out[0].date.as_deref(), Some("12/03/2024"));
        assert!(out[0].bbox.is_some());
    }

    #[test]
    fn name_dash_title_pattern() {
        let (config, patterns) = setup();
        let pages = SegmentedPages::new(vec![crate::bands::PageSegment {
            page: 2,
            raw_text: "texto\nCarlos Alberto Lima – Diretor Especial\n1º de abril de 2024".into(),
            ..Default::default()
        }]);
        let out = SignatureExtractor::new(&config, &patterns).from_text(&pages, 1, 3);
        assert_eq!(out[0].signer, "Carlos Alberto Lima");
        assert_eq!(out[0].date.as_deref(), Some("01/04/2024"));
    }

    #[test]
    fn sign_dates_in_several_forms() {
        assert_eq!(parse_sign_date("2024-03-12T10:00:00Z"), NaiveDate::from_ymd_opt(2024, 3, 12));
        assert_eq!(parse_sign_date("12/03/2024"), NaiveDate::from_ymd_opt(2024, 3, 12));
        assert_eq!(parse_sign_date("garbage"), None);
    }
}
