use std::borrow::Cow;

use tracing::debug;

use crate::config::{BandConfig, LayoutConfig};
use crate::document::{Band, BandName};
use crate::layout::{LineBuilder, ParagraphBuilder};
use crate::types::{BoundingBox, Line, Paragraph, Word};
use crate::utils::{contains_any, normalize_text, sha256_hex};

/// Lines of one band of one page.
#[derive(Debug, Clone)]
pub struct BandSegment {
    pub name: BandName,
    pub lines: Vec<Line>,
}

impl BandSegment {
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn words(&self) -> impl Iterator<Item = &Word> {
        self.lines.iter().flat_map(|l| l.words.iter())
    }

    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::union_all(self.lines.iter().map(|l| &l.bbox)).unwrap_or_default()
    }

    pub fn to_band(&self, page: u32) -> Band {
        let text = self.text();
        Band {
            page,
            name: self.name,
            hash: sha256_hex(normalize_text(&text).as_bytes()),
            bbox: self.bbox(),
            text,
        }
    }
}

/// Everything derived from one page: lines, paragraphs and bands.
#[derive(Debug, Clone, Default)]
pub struct PageSegment {
    pub page: u32,
    pub lines: Vec<Line>,
    pub paragraphs: Vec<Paragraph>,
    pub bands: Vec<BandSegment>,
    /// Text reported by the collaborator, used when no words are available.
    pub raw_text: String,
}

impl PageSegment {
    pub fn band(&self, name: BandName) -> Option<&BandSegment> {
        self.bands.iter().find(|b| b.name == name)
    }

    pub fn band_text(&self, name: BandName) -> String {
        self.band(name).map(|b| b.text()).unwrap_or_default()
    }

    /// Page text, line by line; falls back to the collaborator's raw text.
    pub fn text(&self) -> String {
        if self.lines.is_empty() {
            return self.raw_text.clone();
        }
        self.lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn normalized_text(&self) -> String {
        normalize_text(&self.text())
    }

    /// Normalized text of the given bands, in order.
    pub fn normalized_bands(&self, names: &[BandName]) -> String {
        names
            .iter()
            .map(|n| self.band_text(*n))
            .filter(|t| !t.is_empty())
            .map(|t| normalize_text(&t))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Paragraphs, or the raw text split on blank lines when the page came
    /// without words.
    pub fn paragraphs_or_raw(&self) -> Cow<'_, [Paragraph]> {
        if !self.paragraphs.is_empty() || self.raw_text.trim().is_empty() {
            return Cow::Borrowed(&self.paragraphs);
        }
        Cow::Owned(
            self.raw_text
                .split("\n\n")
                .filter(|t| !t.trim().is_empty())
                .enumerate()
                .map(|(index, text)| Paragraph {
                    page: self.page,
                    index,
                    words: Vec::new(),
                    text: text.trim().to_string(),
                    bbox: BoundingBox::default(),
                })
                .collect(),
        )
    }

    pub fn flat_bands(&self) -> Vec<Band> {
        self.bands.iter().map(|b| b.to_band(self.page)).collect()
    }
}

/// Partitions a page's lines into bands by normalized vertical position.
#[derive(Debug, Clone, Copy)]
pub struct BandSegmenter<'a> {
    bands: &'a BandConfig,
    layout: &'a LayoutConfig,
    title_anchors: &'a [String],
}

impl<'a> BandSegmenter<'a> {
    pub fn new(bands: &'a BandConfig, layout: &'a LayoutConfig, title_anchors: &'a [String]) -> Self {
        BandSegmenter {
            bands,
            layout,
            title_anchors,
        }
    }

    fn zone(&self, line: &Line) -> BandName {
        let tf = line.bbox.top_fraction().max(self.bands.header_top);
        if tf < self.bands.subheader_top {
            BandName::Header
        } else if tf < self.bands.body_start {
            BandName::Subheader
        } else if tf < self.bands.footer_bottom {
            BandName::Body
        } else {
            BandName::Footer
        }
    }

    /// Band per line, for lines given top to bottom.
    ///
    /// A subheader line naming the document title turns into `title`, and so
    /// does every subheader line below it, which keeps the assignment
    /// monotonic down the page.
    pub fn assign(&self, lines: &[Line]) -> Vec<BandName> {
        let mut seen_title = false;
        lines
            .iter()
            .map(|line| match self.zone(line) {
                BandName::Subheader => {
                    if !seen_title && contains_any(&normalize_text(&line.text), self.title_anchors) {
                        seen_title = true;
                    }
                    if seen_title {
                        BandName::Title
                    } else {
                        BandName::Subheader
                    }
                }
                other => other,
            })
            .collect()
    }

    pub fn segment_page(&self, page: u32, words: &[Word], raw_text: &str) -> PageSegment {
        let lines = LineBuilder::new(self.layout).build(words);
        let paragraphs = ParagraphBuilder::new(self.layout).build(&lines);
        let names = self.assign(&lines);

        let mut bands: Vec<BandSegment> = Vec::new();
        for (line, name) in lines.iter().zip(names) {
            match bands.iter_mut().find(|b| b.name == name) {
                Some(band) => band.lines.push(line.clone()),
                None => bands.push(BandSegment {
                    name,
                    lines: vec![line.clone()],
                }),
            }
        }
        bands.sort_by_key(|b| b.name);
        debug!(page, lines = lines.len(), paragraphs = paragraphs.len(), "segmented page");

        PageSegment {
            page,
            lines,
            paragraphs,
            bands,
            raw_text: raw_text.to_string(),
        }
    }
}

/// Segments for every page of a document, addressed by 1-based page number.
#[derive(Debug, Clone, Default)]
pub struct SegmentedPages {
    pages: Vec<PageSegment>,
}

impl SegmentedPages {
    pub fn new(mut pages: Vec<PageSegment>) -> Self {
        pages.sort_by_key(|p| p.page);
        SegmentedPages { pages }
    }

    /// Number of the last page, which is also the page count.
    pub fn count(&self) -> u32 {
        self.pages.last().map(|p| p.page).unwrap_or(0)
    }

    pub fn get(&self, page: u32) -> Option<&PageSegment> {
        self.pages
            .binary_search_by_key(&page, |p| p.page)
            .ok()
            .map(|i| &self.pages[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageSegment> {
        self.pages.iter()
    }

    /// Pages `start..=end` that exist.
    pub fn range(&self, start: u32, end: u32) -> impl Iterator<Item = &PageSegment> {
        self.pages
            .iter()
            .filter(move |p| p.page >= start && p.page <= end)
    }

    pub fn normalized_text(&self, page: u32) -> String {
        self.get(page).map(|p| p.normalized_text()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::row;

    fn segmenter_parts() -> (BandConfig, LayoutConfig, Vec<String>) {
        (BandConfig::default(), LayoutConfig::default(), vec!["despacho".to_string()])
    }

    #[test]
    fn empty_page_yields_empty_segment() {
        let (b, l, t) = segmenter_parts();
        let seg = BandSegmenter::new(&b, &l, &t).segment_page(1, &[], "");
        assert!(seg.lines.is_empty());
        assert!(seg.bands.is_empty());
        assert!(seg.flat_bands().is_empty());
    }

    #[test]
    fn lines_fall_into_bands_by_height() {
        let (b, l, t) = segmenter_parts();
        let mut words = row(1, 0.95, 0.1, &["PODER", "JUDICIÁRIO"]);
        words.extend(row(1, 0.82, 0.1, &["DIRETORIA", "ESPECIAL"]));
        words.extend(row(1, 0.79, 0.1, &["DESPACHO"]));
        words.extend(row(1, 0.50, 0.1, &["corpo", "do", "texto"]));
        words.extend(row(1, 0.05, 0.1, &["Documento", "assinado"]));
        let seg = BandSegmenter::new(&b, &l, &t).segment_page(1, &words, "");

        assert_eq!(seg.band_text(BandName::Header), "PODER JUDICIÁRIO");
        assert_eq!(seg.band_text(BandName::Subheader), "DIRETORIA ESPECIAL");
        assert_eq!(seg.band_text(BandName::Title), "DESPACHO");
        assert_eq!(seg.band_text(BandName::Body), "corpo do texto");
        assert_eq!(seg.band_text(BandName::Footer), "Documento assinado");

        let flat = seg.flat_bands();
        assert_eq!(flat.len(), 5);
        assert_eq!(flat[0].hash.len(), 64);
    }

    #[test]
    fn raw_text_stands_in_for_paragraphs() {
        let seg = PageSegment {
            page: 4,
            raw_text: "primeiro\nbloco\n\nsegundo".to_string(),
            ..Default::default()
        };
        let paras = seg.paragraphs_or_raw();
        assert_eq!(paras.len(), 2);
        assert_eq!(paras[1].text, "segundo");
        assert_eq!(paras[1].page, 4);
    }

    #[test]
    fn assignment_is_monotonic_down_the_page() {
        let (b, l, t) = segmenter_parts();
        let mut words = Vec::new();
        let mut y = 0.99;
        let mut i = 0;
        while y > 0.01 {
            let token = if i == 10 { "despacho" } else { "linha" };
            words.extend(row(1, y, 0.1, &[token, "texto"]));
            y -= 0.013;
            i += 1;
        }
        let seg = BandSegmenter::new(&b, &l, &t).segment_page(1, &words, "");
        let names = BandSegmenter::new(&b, &l, &t).assign(&seg.lines);
        for pair in seg.lines.windows(2).zip(names.windows(2)) {
            let (lines, bands) = pair;
            assert!(lines[0].bbox.center_y() > lines[1].bbox.center_y());
            assert!(bands[0] <= bands[1], "{:?} above {:?}", bands[0], bands[1]);
        }
    }
}
