//! String similarity in `[0, 1]` behind one trait, plus the tolerant anchor
//! search used by template extraction.

/// A similarity measure between two strings, `1.0` meaning identical.
pub trait Similarity: Send + Sync {
    fn similarity(&self, a: &str, b: &str) -> f64;
}

/// `1 - levenshtein(a, b) / max(len)` over characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct EditDistance;

/// Ratcliff/Obershelp ratio: `2 * matched / (len(a) + len(b))`, where the
/// matched characters come from recursively taking the longest common block.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharDiff;

impl Similarity for EditDistance {
    fn similarity(&self, a: &str, b: &str) -> f64 {
        let a: Vec<char> = a.chars().collect();
        let b: Vec<char> = b.chars().collect();
        let longest = a.len().max(b.len());
        if longest == 0 {
            return 1.0;
        }
        1.0 - levenshtein(&a, &b) as f64 / longest as f64
    }
}

impl Similarity for CharDiff {
    fn similarity(&self, a: &str, b: &str) -> f64 {
        let a: Vec<char> = a.chars().collect();
        let b: Vec<char> = b.chars().collect();
        let total = a.len() + b.len();
        if total == 0 {
            return 1.0;
        }
        2.0 * matched_chars(&a, &b) as f64 / total as f64
    }
}

pub fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Longest common block `(start_a, start_b, len)`; earliest in `a` on ties.
fn longest_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for i in 0..a.len() {
        for j in 0..b.len() {
            cur[j + 1] = if a[i] == b[j] { prev[j] + 1 } else { 0 };
            if cur[j + 1] > best.2 {
                best = (i + 1 - cur[j + 1], j + 1 - cur[j + 1], cur[j + 1]);
            }
        }
        std::mem::swap(&mut prev, &mut cur);
        cur.iter_mut().for_each(|v| *v = 0);
    }
    best
}

fn matched_chars(a: &[char], b: &[char]) -> usize {
    let mut total = 0;
    let mut stack = vec![(0, a.len(), 0, b.len())];
    while let Some((a0, a1, b0, b1)) = stack.pop() {
        if a0 >= a1 || b0 >= b1 {
            continue;
        }
        let (i, j, len) = longest_block(&a[a0..a1], &b[b0..b1]);
        if len == 0 {
            continue;
        }
        total += len;
        stack.push((a0, a0 + i, b0, b0 + j));
        stack.push((a0 + i + len, a1, b0 + j + len, b1));
    }
    total
}

/// Where an anchor was found inside a haystack (byte offsets).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorHit {
    pub start: usize,
    pub end: usize,
    pub score: f64,
}

/// Locate `anchor` in `haystack` at or after byte offset `from`.
///
/// Exact substring matches win outright. Otherwise every window that starts
/// on a token boundary and spans about the anchor's character length is
/// scored with `sim`; the best window at or above `min_score` is returned.
pub fn find_anchor(
    sim: &dyn Similarity,
    haystack: &str,
    anchor: &str,
    from: usize,
    min_score: f64,
) -> Option<AnchorHit> {
    let anchor = anchor.trim();
    if anchor.is_empty() || from > haystack.len() || !haystack.is_char_boundary(from) {
        return None;
    }
    let tail = &haystack[from..];
    if let Some(pos) = tail.find(anchor) {
        return Some(AnchorHit {
            start: from + pos,
            end: from + pos + anchor.len(),
            score: 1.0,
        });
    }

    let anchor_chars = anchor.chars().count();
    let chars: Vec<(usize, char)> = tail.char_indices().collect();
    if chars.len() < anchor_chars.saturating_sub(anchor_chars / 4).max(1) {
        return None;
    }

    let mut best: Option<AnchorHit> = None;
    for (k, &(offset, c)) in chars.iter().enumerate() {
        let at_boundary = k == 0 || chars[k - 1].1.is_whitespace() || !chars[k - 1].1.is_alphanumeric();
        if c.is_whitespace() || !at_boundary {
            continue;
        }
        for len in window_lengths(anchor_chars) {
            let stop = (k + len).min(chars.len());
            let end = chars.get(stop).map(|(o, _)| *o).unwrap_or(tail.len());
            let window = tail[offset..end].trim_end();
            let score = sim.similarity(window, anchor);
            if score >= min_score && best.is_none_or(|b| score > b.score) {
                best = Some(AnchorHit {
                    start: from + offset,
                    end: from + offset + window.len(),
                    score,
                });
            }
        }
    }
    best
}

/// Anchor length first, then shorter and longer windows to absorb a
/// dropped or doubled character or two.
fn window_lengths(n: usize) -> impl Iterator<Item = usize> {
    let slack = (n / 8).max(1);
    std::iter::once(n)
        .chain((1..=slack).flat_map(move |d| [n.saturating_sub(d), n + d]))
        .filter(|l| *l > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_distance_bounds() {
        assert_eq!(EditDistance.similarity("", ""), 1.0);
        assert_eq!(EditDistance.similarity("abc", "abc"), 1.0);
        assert_eq!(EditDistance.similarity("abc", "xyz"), 0.0);
        let s = EditDistance.similarity("despacho", "despaxho");
        assert!((s - 0.875).abs() < 1e-9);
    }

    #[test]
    fn char_diff_matches_ratcliff_obershelp() {
        assert_eq!(CharDiff.similarity("abcd", "abcd"), 1.0);
        assert_eq!(CharDiff.similarity("abcd", ""), 0.0);
        // "abcd" vs "bcde": block "bcd" => 2 * 3 / 8
        assert!((CharDiff.similarity("abcd", "bcde") - 0.75).abs() < 1e-9);
    }

    #[test]
    fn anchor_search_tolerates_typos_and_respects_cursor() {
        let text = "processo n. 123 promovente: fulano promovido: beltrano";
        let hit = find_anchor(&EditDistance, text, "promovente:", 0, 0.8).unwrap();
        assert_eq!(&text[hit.start..hit.end], "promovente:");

        let fuzzy = find_anchor(&EditDistance, text, "promovido;", 0, 0.8).unwrap();
        assert!(text[fuzzy.start..].starts_with("promovido"));

        assert!(find_anchor(&EditDistance, text, "processo", 5, 0.9).is_none());
    }
}
