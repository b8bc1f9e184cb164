use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::sha256_hex;

/// Axis-aligned box in normalized page space.
///
/// Coordinates are fractions of the page size in `[0, 1]`, with `y` growing
/// upwards as in PDF user space: `y1` is the top edge, `y0` the bottom edge.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BoundingBox {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        BoundingBox {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    /// Build a box from the four corners reported by the PDF collaborator,
    /// clamped to the unit square.
    pub fn from_quad(quad: &[[f64; 2]; 4]) -> Self {
        let clamp = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        let xs = quad.iter().map(|p| clamp(p[0]));
        let ys = quad.iter().map(|p| clamp(p[1]));
        let (x0, x1) = xs.fold((1.0f64, 0.0f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
        let (y0, y1) = ys.fold((1.0f64, 0.0f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
        BoundingBox { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn center_y(&self) -> f64 {
        (self.y0 + self.y1) / 2.0
    }

    /// Distance of the box centre from the top edge of the page.
    pub fn top_fraction(&self) -> f64 {
        1.0 - self.center_y()
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    /// Union of every box yielded, `None` when the iterator is empty.
    pub fn union_all<'a, I>(boxes: I) -> Option<BoundingBox>
    where
        I: IntoIterator<Item = &'a BoundingBox>,
    {
        boxes
            .into_iter()
            .fold(None, |acc: Option<BoundingBox>, b| match acc {
                Some(a) => Some(a.union(b)),
                None => Some(*b),
            })
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(x0: {:.3}, y0: {:.3}, x1: {:.3}, y1: {:.3})",
            self.x0, self.y0, self.x1, self.y1
        )
    }
}

/// One text token with its normalized position on a page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Word {
    pub text: String,
    pub bbox: BoundingBox,
    pub page: u32,
}

impl Word {
    pub fn new(page: u32, text: impl Into<String>, bbox: BoundingBox) -> Self {
        Word {
            text: text.into(),
            bbox,
            page,
        }
    }

    /// Dedupe key: text plus the box rounded to `precision` decimals.
    pub(crate) fn dedupe_key(&self, precision: u32) -> (String, [i64; 4]) {
        let scale = 10f64.powi(precision as i32);
        let r = |v: f64| (v * scale).round() as i64;
        (
            self.text.clone(),
            [r(self.bbox.x0), r(self.bbox.y0), r(self.bbox.x1), r(self.bbox.y1)],
        )
    }
}

/// Words sharing roughly the same baseline, ordered left to right.
#[derive(Debug, Clone, Serialize)]
pub struct Line {
    pub page: u32,
    #[serde(skip)]
    pub words: Vec<Word>,
    pub text: String,
    pub bbox: BoundingBox,
}

/// Contiguous lines separated from their neighbours by a vertical gap.
#[derive(Debug, Clone, Serialize)]
pub struct Paragraph {
    pub page: u32,
    pub index: usize,
    #[serde(skip)]
    pub words: Vec<Word>,
    pub text: String,
    pub bbox: BoundingBox,
}

/// Identity of the analysed file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PdfInfo {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub sha256: String,
    #[serde(default)]
    pub page_count: u32,
}

impl PdfInfo {
    /// Identity for a file whose bytes are at hand.
    pub fn from_bytes<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Self {
        let path = path.as_ref();
        PdfInfo {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: path.to_string_lossy().into_owned(),
            sha256: sha256_hex(bytes),
            page_count: 0,
        }
    }
}

/// A word as delivered by the PDF collaborator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawWord {
    pub text: String,
    /// Four corners, each `[x, y]`, normalized to the page.
    pub quad: [[f64; 2]; 4],
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PageInput {
    pub number: u32,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub rotation: i32,
    #[serde(default)]
    pub words: Vec<RawWord>,
}

/// Node of the document outline; `page` is 0 when the destination is unresolved.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutlineNode {
    pub title: String,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub children: Vec<OutlineNode>,
}

/// Flattened outline entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bookmark {
    pub title: String,
    pub level: usize,
    pub page: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignatureWidget {
    pub page: u32,
    pub bbox: BoundingBox,
}

/// A cryptographic signature field read from the PDF.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DigitalSignature {
    #[serde(default)]
    pub signer_name: String,
    #[serde(default)]
    pub certificate_subject: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub sign_date: Option<String>,
    #[serde(default)]
    pub widgets: Vec<SignatureWidget>,
}

/// Everything the PDF collaborator hands over for one document.
///
/// Every collection defaults to empty, so partial dumps deserialize cleanly.
/// Pages a dump may declare without supplying them.
pub const DEFAULT_BLANK_PAGES: u32 = 64;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PdfAnalysis {
    #[serde(default)]
    pub info: PdfInfo,
    #[serde(default)]
    pub pages: Vec<PageInput>,
    #[serde(default)]
    pub outline: Vec<OutlineNode>,
    #[serde(default)]
    pub signatures: Vec<DigitalSignature>,
}

impl PdfAnalysis {
    pub fn page_count(&self) -> u32 {
        self.page_count_within(DEFAULT_BLANK_PAGES)
    }

    /// Declared or highest supplied page number, but never more than
    /// `blank_pages` beyond the pages actually supplied.
    pub fn page_count_within(&self, blank_pages: u32) -> u32 {
        let declared = self
            .pages
            .iter()
            .map(|p| p.number)
            .max()
            .unwrap_or(0)
            .max(self.info.page_count);
        let supplied = u32::try_from(self.pages.len()).unwrap_or(u32::MAX);
        declared.min(supplied.saturating_add(blank_pages))
    }

    pub fn page(&self, number: u32) -> Option<&PageInput> {
        self.pages.iter().find(|p| p.number == number)
    }

    /// Depth-first flattening of the outline tree.
    pub fn bookmarks(&self) -> Vec<Bookmark> {
        fn walk(nodes: &[OutlineNode], level: usize, out: &mut Vec<Bookmark>) {
            for node in nodes {
                out.push(Bookmark {
                    title: node.title.trim().to_string(),
                    level,
                    page: node.page,
                });
                walk(&node.children, level + 1, out);
            }
        }

        let mut out = Vec::new();
        walk(&self.outline, 0, &mut out);
        out
    }

    /// Words of one page, deduplicated on text plus rounded position.
    pub fn words(&self, number: u32, precision: u32) -> Vec<Word> {
        let Some(page) = self.page(number) else {
            return Vec::new();
        };
        let mut seen = std::collections::HashSet::new();
        page.words
            .iter()
            .filter(|w| !w.text.trim().is_empty())
            .map(|w| Word::new(number, w.text.trim(), BoundingBox::from_quad(&w.quad)))
            .filter(|w| seen.insert(w.dedupe_key(precision)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(text: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> RawWord {
        RawWord {
            text: text.to_string(),
            quad: [[x0, y0], [x1, y0], [x1, y1], [x0, y1]],
        }
    }

    #[test]
    fn quad_is_clamped_to_unit_square() {
        let b = BoundingBox::from_quad(&[[-0.2, 0.5], [1.4, 0.5], [1.4, 0.6], [-0.2, 0.6]]);
        assert_eq!(b.x0, 0.0);
        assert_eq!(b.x1, 1.0);
        assert!((b.height() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn union_covers_both_boxes() {
        let a = BoundingBox::new(0.1, 0.1, 0.2, 0.2);
        let b = BoundingBox::new(0.5, 0.05, 0.6, 0.15);
        let u = a.union(&b);
        assert_eq!(u, BoundingBox::new(0.1, 0.05, 0.6, 0.2));
        assert!(BoundingBox::union_all(std::iter::empty()).is_none());
    }

    #[test]
    fn declared_page_count_is_bounded_by_supplied_pages() {
        let mut analysis = PdfAnalysis {
            pages: (1..=3)
                .map(|number| PageInput {
                    number,
                    ..PageInput::default()
                })
                .collect(),
            ..PdfAnalysis::default()
        };
        analysis.info.page_count = 5;
        assert_eq!(analysis.page_count(), 5);

        analysis.info.page_count = u32::MAX;
        assert_eq!(analysis.page_count_within(10), 13);
        assert_eq!(analysis.page_count(), 3 + DEFAULT_BLANK_PAGES);

        analysis.info.page_count = 0;
        analysis.pages[2].number = u32::MAX;
        assert_eq!(analysis.page_count_within(0), 3);
    }

    #[test]
    fn duplicate_words_are_dropped() {
        let analysis = PdfAnalysis {
            pages: vec![PageInput {
                number: 1,
                words: vec![
                    raw("Processo", 0.1, 0.8, 0.2, 0.82),
                    raw("Processo", 0.10001, 0.8, 0.2, 0.82),
                    raw("SEI", 0.21, 0.8, 0.25, 0.82),
                    raw("  ", 0.3, 0.8, 0.31, 0.82),
                ],
                ..Default::default()
            }],
            ..Default::default()
        };
        let words = analysis.words(1, 3);
        assert_eq!(words.len(), 2);
        assert!(analysis.words(7, 3).is_empty());
    }

    #[test]
    fn outline_flattens_depth_first() {
        let analysis = PdfAnalysis {
            outline: vec![
                OutlineNode {
                    title: "Petição".into(),
                    page: 1,
                    children: vec![OutlineNode {
                        title: "Despacho".into(),
                        page: 4,
                        children: vec![],
                    }],
                },
                OutlineNode {
                    title: "Certidão".into(),
                    page: 7,
                    children: vec![],
                },
            ],
            ..Default::default()
        };
        let marks = analysis.bookmarks();
        assert_eq!(marks.len(), 3);
        assert_eq!(marks[1].title, "Despacho");
        assert_eq!(marks[1].level, 1);
        assert_eq!(marks[2].page, 7);
    }
}
