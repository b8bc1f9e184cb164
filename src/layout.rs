use std::cmp::Ordering;

use tracing::trace;

use crate::config::LayoutConfig;
use crate::types::{BoundingBox, Line, Paragraph, Word};
use crate::utils::{collapse_letter_spacing, percentile};

/// Groups the words of one page into lines.
#[derive(Debug, Clone, Copy)]
pub struct LineBuilder<'a> {
    config: &'a LayoutConfig,
}

impl<'a> LineBuilder<'a> {
    pub fn new(config: &'a LayoutConfig) -> Self {
        LineBuilder { config }
    }

    /// Cluster words by vertical centre, top of the page first.
    ///
    /// Every input word ends up in exactly one line.
    pub fn build(&self, words: &[Word]) -> Vec<Line> {
        if words.is_empty() {
            return Vec::new();
        }

        let mut sorted = words.to_vec();
        sorted.sort_by(|a, b| {
            b.bbox
                .center_y()
                .partial_cmp(&a.bbox.center_y())
                .unwrap_or(Ordering::Equal)
                .then(a.bbox.x0.partial_cmp(&b.bbox.x0).unwrap_or(Ordering::Equal))
        });

        let mut lines = Vec::new();
        let mut current: Vec<Word> = Vec::new();
        let mut running_center = 0.0;

        for word in sorted {
            let cy = word.bbox.center_y();
            if !current.is_empty() && (cy - running_center).abs() > self.config.line_tolerance {
                lines.push(self.finish_line(std::mem::take(&mut current)));
            }
            current.push(word);
            running_center =
                current.iter().map(|w| w.bbox.center_y()).sum::<f64>() / current.len() as f64;
        }
        if !current.is_empty() {
            lines.push(self.finish_line(current));
        }

        lines
    }

    fn finish_line(&self, mut words: Vec<Word>) -> Line {
        words.sort_by(|a, b| a.bbox.x0.partial_cmp(&b.bbox.x0).unwrap_or(Ordering::Equal));
        let bbox = BoundingBox::union_all(words.iter().map(|w| &w.bbox)).unwrap_or_default();
        let text = self.assemble_text(&words);
        Line {
            page: words.first().map(|w| w.page).unwrap_or(0),
            words,
            text,
            bbox,
        }
    }

    /// Join words, spacing them by the horizontal gap measured in average
    /// glyph widths. Lines of four or more words derive the gap threshold
    /// from the 90th-percentile gap so letter-spaced headings close up.
    fn assemble_text(&self, words: &[Word]) -> String {
        let chars: usize = words.iter().map(|w| w.text.chars().count()).sum();
        let width: f64 = words.iter().map(|w| w.bbox.width()).sum();
        let glyph = if chars > 0 && width > 0.0 {
            width / chars as f64
        } else {
            0.01
        };

        let ratios: Vec<f64> = words
            .windows(2)
            .map(|pair| (pair[1].bbox.x0 - pair[0].bbox.x1) / glyph)
            .collect();

        let threshold = if words.len() >= 4 {
            let dynamic = percentile(&ratios, 0.9).unwrap_or(0.0) * self.config.dynamic_gap_factor;
            dynamic
                .min(self.config.max_word_gap_ratio)
                .max(self.config.word_gap_ratio)
        } else {
            self.config.word_gap_ratio
        };
        trace!(glyph, threshold, "line gap threshold");

        let mut text = String::new();
        for (i, word) in words.iter().enumerate() {
            if i > 0 {
                let ratio = ratios[i - 1];
                if ratio > self.config.wide_gap_ratio {
                    text.push_str("  ");
                } else if ratio > threshold {
                    text.push(' ');
                }
            }
            text.push_str(&word.text);
        }
        collapse_letter_spacing(&text)
    }
}

/// Groups consecutive lines of one page into paragraphs.
#[derive(Debug, Clone, Copy)]
pub struct ParagraphBuilder<'a> {
    config: &'a LayoutConfig,
}

impl<'a> ParagraphBuilder<'a> {
    pub fn new(config: &'a LayoutConfig) -> Self {
        ParagraphBuilder { config }
    }

    pub fn build(&self, lines: &[Line]) -> Vec<Paragraph> {
        let mut ordered: Vec<&Line> = lines.iter().collect();
        ordered.sort_by(|a, b| b.bbox.y1.partial_cmp(&a.bbox.y1).unwrap_or(Ordering::Equal));

        let mut paragraphs = Vec::new();
        let mut group: Vec<&Line> = Vec::new();
        let mut bottom = f64::MAX;

        for line in ordered {
            if !group.is_empty() && bottom - line.bbox.y1 > self.config.paragraph_gap {
                paragraphs.push(Self::finish(paragraphs.len(), &group));
                group.clear();
            }
            bottom = if group.is_empty() {
                line.bbox.y0
            } else {
                bottom.min(line.bbox.y0)
            };
            group.push(line);
        }
        if !group.is_empty() {
            paragraphs.push(Self::finish(paragraphs.len(), &group));
        }
        paragraphs
    }

    fn finish(index: usize, lines: &[&Line]) -> Paragraph {
        let words: Vec<Word> = lines.iter().flat_map(|l| l.words.iter().cloned()).collect();
        let text = lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Paragraph {
            page: lines.first().map(|l| l.page).unwrap_or(0),
            index,
            words,
            text,
            bbox: BoundingBox::union_all(lines.iter().map(|l| &l.bbox)).unwrap_or_default(),
        }
    }
}

/// Words spread over one row, `width` per character, one glyph apart.
#[cfg(test)]
pub(crate) fn row(page: u32, y: f64, x: f64, tokens: &[&str]) -> Vec<Word> {
    let glyph = 0.01;
    let mut x = x;
    tokens
        .iter()
        .map(|t| {
            let w = glyph * t.chars().count() as f64;
            let word = Word::new(page, *t, BoundingBox::new(x, y - 0.006, x + w, y + 0.006));
            x += w + glyph;
            word
        })
        .collect()
}
