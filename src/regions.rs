use tracing::debug;

use crate::bands::SegmentedPages;
use crate::config::{PageRole, RegionSpec};
use crate::document::{CandidateWindow, Region};
use crate::types::{BoundingBox, Line, Paragraph};
use crate::utils::normalize_text;

/// Page of the window a role points at.
pub fn page_for(role: PageRole, window: &CandidateWindow) -> u32 {
    match role {
        PageRole::First => window.start_page,
        PageRole::Second => (window.start_page + 1).min(window.end_page),
        PageRole::Last => window.end_page,
    }
}

/// Region assembled from whole lines; `None` when there are none.
pub fn region_from_lines<'l, I>(name: &str, page: u32, lines: I) -> Option<Region>
where
    I: IntoIterator<Item = &'l Line>,
{
    let lines: Vec<&Line> = lines.into_iter().collect();
    if lines.is_empty() {
        return None;
    }
    Some(Region {
        name: name.to_string(),
        page,
        words: lines.iter().flat_map(|l| l.words.iter().cloned()).collect(),
        text: lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        bbox: BoundingBox::union_all(lines.iter().map(|l| &l.bbox)).unwrap_or_default(),
    })
}

/// Region made of one or more paragraphs of the same page.
pub fn region_from_paragraphs(name: &str, paragraphs: &[&Paragraph]) -> Option<Region> {
    let first = paragraphs.first()?;
    Some(Region {
        name: name.to_string(),
        page: first.page,
        words: paragraphs.iter().flat_map(|p| p.words.iter().cloned()).collect(),
        text: paragraphs
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        bbox: BoundingBox::union_all(paragraphs.iter().map(|p| &p.bbox)).unwrap_or_default(),
    })
}

/// Cuts the configured named regions out of the chosen window.
#[derive(Debug, Clone, Copy)]
pub struct RegionExtractor<'a> {
    specs: &'a [RegionSpec],
}

impl<'a> RegionExtractor<'a> {
    pub fn new(specs: &'a [RegionSpec]) -> Self {
        RegionExtractor { specs }
    }

    pub fn build(&self, window: &CandidateWindow, pages: &SegmentedPages) -> Vec<Region> {
        self.specs
            .iter()
            .filter_map(|spec| self.extract(spec, window, pages))
            .collect()
    }

    fn extract(&self, spec: &RegionSpec, window: &CandidateWindow, pages: &SegmentedPages) -> Option<Region> {
        let page_no = page_for(spec.page, window);
        let page = pages.get(page_no)?;
        let marker = spec.starts_after.as_deref().map(normalize_text);

        let mut started = marker.is_none();
        let lines = page.lines.iter().filter(|line| {
            let tf = line.bbox.top_fraction();
            if tf < spec.y_from || tf > spec.y_to {
                return false;
            }
            if !started {
                if let Some(m) = &marker {
                    started = normalize_text(&line.text).contains(m.as_str());
                }
            }
            started
        });
        let region = region_from_lines(&spec.name, page_no, lines);
        debug!(name = %spec.name, page = page_no, found = region.is_some(), "region");
        region
    }
}
