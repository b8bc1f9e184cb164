//! Proposes and scores page windows that may hold the despacho.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::debug;

use crate::bands::{PageSegment, SegmentedPages};
use crate::config::Config;
use crate::document::{BandName, CandidateWindow, WindowSource};
use crate::similarity::{CharDiff, EditDistance, Similarity};
use crate::types::Bookmark;
use crate::utils::{contains_any, normalize_text};

/// Why a window could not be turned into a document range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    BelowMinPages,
}

impl RangeError {
    pub fn code(&self) -> &'static str {
        match self {
            RangeError::BelowMinPages => "range_below_min_pages",
        }
    }
}

pub struct CandidateScorer<'a> {
    config: &'a Config,
    primary: &'a dyn Similarity,
    secondary: &'a dyn Similarity,
}

impl<'a> CandidateScorer<'a> {
    pub fn new(config: &'a Config) -> Self {
        CandidateScorer {
            config,
            primary: &EditDistance,
            secondary: &CharDiff,
        }
    }

    /// Swap the similarity measures used for the two scores.
    pub fn with_similarity(mut self, primary: &'a dyn Similarity, secondary: &'a dyn Similarity) -> Self {
        self.primary = primary;
        self.secondary = secondary;
        self
    }

    /// Bookmark ranges first; heuristic windows only when none qualify.
    pub fn propose(
        &self,
        pages: &SegmentedPages,
        bookmarks: &[Bookmark],
        filter: Option<&str>,
    ) -> Vec<CandidateWindow> {
        let mut spans = self.bookmark_spans(bookmarks, pages.count(), filter);
        let source = if spans.is_empty() {
            spans = self.heuristic_spans(pages, bookmarks);
            WindowSource::Heuristic
        } else {
            WindowSource::Bookmark
        };
        debug!(count = spans.len(), ?source, "candidate spans");

        spans
            .into_iter()
            .map(|(start, end, title)| self.score(pages, start, end, source, title))
            .collect()
    }

    /// Outline entries flattened to `[page, next_page - 1]`, kept when the
    /// title names a despacho.
    pub fn bookmark_spans(
        &self,
        bookmarks: &[Bookmark],
        page_count: u32,
        filter: Option<&str>,
    ) -> Vec<(u32, u32, Option<String>)> {
        let mut resolved: Vec<&Bookmark> = bookmarks.iter().filter(|b| b.page > 0).collect();
        resolved.sort_by_key(|b| b.page);
        let anchors = &self.config.anchors;
        let filter = filter.map(normalize_text).filter(|f| !f.is_empty());

        let mut spans = Vec::new();
        for (i, mark) in resolved.iter().enumerate() {
            let next = resolved[i + 1..]
                .iter()
                .map(|b| b.page)
                .find(|p| *p > mark.page);
            let end = next.map(|p| p - 1).unwrap_or(page_count).max(mark.page);
            let title = normalize_text(&mark.title);
            let is_despacho = contains_any(&title, &anchors.title)
                || contains_any(&title, &anchors.despacho_bookmark_hints);
            let passes_filter = filter.as_ref().is_none_or(|f| title.contains(f.as_str()));
            if is_despacho && passes_filter && !spans.iter().any(|(s, e, _)| *s == mark.page && *e == end) {
                spans.push((mark.page, end, Some(mark.title.clone())));
            }
        }
        spans
    }

    /// Sliding windows anchored at pages that look like a despacho start.
    pub fn heuristic_spans(&self, pages: &SegmentedPages, bookmarks: &[Bookmark]) -> Vec<(u32, u32, Option<String>)> {
        let anchors = &self.config.anchors;
        let page_count = pages.count();

        let mut starts: Vec<u32> = bookmarks
            .iter()
            .filter(|b| b.page > 0 && b.page <= page_count)
            .filter(|b| contains_any(&normalize_text(&b.title), &anchors.despacho_bookmark_hints))
            .map(|b| b.page)
            .collect();
        if starts.is_empty() {
            starts = pages
                .iter()
                .filter(|p| self.looks_like_start(p))
                .map(|p| p.page)
                .collect();
        }
        starts.sort_unstable();
        starts.dedup();

        let mut spans: Vec<(u32, u32, Option<String>)> = Vec::new();
        for start in starts {
            for size in &self.config.window.heuristic_sizes {
                let end = (start + size.saturating_sub(1)).min(page_count);
                if !spans.iter().any(|(s, e, _)| *s == start && *e == end) {
                    spans.push((start, end, None));
                }
            }
        }
        spans
    }

    fn looks_like_start(&self, page: &PageSegment) -> bool {
        let anchors = &self.config.anchors;
        let top = page.normalized_bands(&[BandName::Header, BandName::Subheader, BandName::Title]);
        let top = if top.is_empty() && page.lines.is_empty() {
            page.normalized_text()
        } else {
            top
        };
        contains_any(&top, &anchors.header) || contains_any(&top, &anchors.title)
    }

    /// Build the synthetic template from all configured anchors.
    pub fn template(&self) -> String {
        self.config
            .anchors
            .categories()
            .iter()
            .flat_map(|(_, phrases)| phrases.iter())
            .map(|p| normalize_text(p))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn score(
        &self,
        pages: &SegmentedPages,
        start: u32,
        end: u32,
        source: WindowSource,
        title: Option<String>,
    ) -> CandidateWindow {
        let categories = self.config.anchors.categories();
        let phrases: Vec<&String> = categories.iter().flat_map(|(_, p)| p.iter()).collect();

        let mut anchor_lines = Vec::new();
        let mut density = BTreeMap::new();
        let mut window_text = String::new();
        for page in pages.range(start, end) {
            let mut hits = 0;
            if page.lines.is_empty() {
                let text = page.normalized_text();
                for raw_line in page.raw_text.lines() {
                    let norm = normalize_text(raw_line);
                    if contains_any(&norm, &phrases) {
                        anchor_lines.push(norm);
                        hits += 1;
                    }
                }
                window_text.push_str(&text);
            } else {
                for line in &page.lines {
                    let norm = normalize_text(&line.text);
                    if contains_any(&norm, &phrases) {
                        anchor_lines.push(norm.clone());
                        hits += 1;
                    }
                    window_text.push_str(&norm);
                    window_text.push(' ');
                }
            }
            window_text.push(' ');
            density.insert(page.page, hits);
        }

        let anchor_text = if anchor_lines.is_empty() {
            window_text.trim().chars().take(self.config.window.fallback_chars).collect()
        } else {
            anchor_lines.join(" ")
        };

        let template = self.template();
        let edit_score = self.primary.similarity(&template, &anchor_text);
        let diff_score = (edit_score < self.config.window.match_threshold)
            .then(|| self.secondary.similarity(&template, &anchor_text));

        let anchors_hit = categories
            .iter()
            .filter(|entry| contains_any(&window_text, entry.1))
            .map(|entry| entry.0.to_string())
            .collect();

        CandidateWindow {
            start_page: start,
            end_page: end,
            edit_score,
            diff_score,
            anchors_hit,
            density,
            source,
            title,
        }
    }

    /// Highest score wins; ties go to more anchor categories, then the
    /// earlier window.
    pub fn best<'c>(&self, candidates: &'c [CandidateWindow]) -> Option<&'c CandidateWindow> {
        candidates.iter().max_by(|a, b| {
            a.best_score()
                .partial_cmp(&b.best_score())
                .unwrap_or(Ordering::Equal)
                .then(a.anchors_hit.len().cmp(&b.anchors_hit.len()))
                .then(b.start_page.cmp(&a.start_page))
                .then(b.end_page.cmp(&a.end_page))
        })
    }

    /// Adjust a heuristic window: pull in the previous page when it carries
    /// the header anchor, then grow forward until the minimum size is met
    /// and a footer anchor is inside, never past the maximum size.
    pub fn finalize(&self, window: &CandidateWindow, pages: &SegmentedPages) -> Result<CandidateWindow, RangeError> {
        let mut out = window.clone();
        let cfg = &self.config.window;

        if window.source != WindowSource::Bookmark {
            let anchors = &self.config.anchors;
            if out.start_page > 1
                && contains_any(&pages.normalized_text(out.start_page - 1), &anchors.header)
                && out.page_count() < cfg.max_pages
            {
                out.start_page -= 1;
            }

            let has_footer = |start: u32, end: u32| {
                pages
                    .range(start, end)
                    .any(|p| contains_any(&p.normalized_text(), &anchors.footer))
            };
            while (out.page_count() < cfg.min_pages || !has_footer(out.start_page, out.end_page))
                && out.page_count() < cfg.max_pages
                && out.end_page < pages.count()
            {
                out.end_page += 1;
            }
        }

        if out.page_count() < cfg.min_pages {
            return Err(RangeError::BelowMinPages);
        }
        Ok(out)
    }
}
