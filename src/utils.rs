use chrono::{Datelike, NaiveDate};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Placeholder rendered for absent values.
pub const ABSENT: &str = "-";

/// Lowercase, strip diacritics and compatibility forms (`º` -> `o`),
/// collapse whitespace and trim.
pub fn normalize_text(s: &str) -> String {
    FoldedText::new(s).folded
}

/// Collapse runs of whitespace (including newlines) to single spaces.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Join letter-spaced capitals (`D E S P A C H O`) into one token.
///
/// Runs of at least three single uppercase letters separated by single spaces
/// are merged. A double space ends a run, which is how line assembly marks a
/// wide gap between spaced-out words.
pub fn collapse_letter_spacing(s: &str) -> String {
    fn flush(run: &mut Vec<&str>, out: &mut Vec<String>) {
        if run.len() >= 3 {
            out.push(run.concat());
        } else {
            out.extend(run.iter().map(|t| t.to_string()));
        }
        run.clear();
    }

    let mut out: Vec<String> = Vec::new();
    let mut run: Vec<&str> = Vec::new();
    for tok in s.split(' ') {
        let mut chars = tok.chars();
        let single_cap = matches!((chars.next(), chars.next()), (Some(c), None) if c.is_uppercase());
        if single_cap {
            run.push(tok);
        } else {
            flush(&mut run, &mut out);
            if !tok.is_empty() {
                out.push(tok.to_string());
            }
        }
    }
    flush(&mut run, &mut out);
    out.join(" ")
}

/// True when the normalized haystack contains any of the needles.
/// Needles are normalized on the fly.
pub fn contains_any<S: AsRef<str>>(normalized_haystack: &str, needles: &[S]) -> bool {
    first_match(normalized_haystack, needles).is_some()
}

/// First needle (in list order) found in the normalized haystack.
pub fn first_match<'a, S: AsRef<str>>(normalized_haystack: &str, needles: &'a [S]) -> Option<&'a str> {
    needles
        .iter()
        .map(AsRef::as_ref)
        .find(|n| {
            let n = normalize_text(n);
            !n.is_empty() && normalized_haystack.contains(&n)
        })
}

/// Text folded for matching, remembering where each folded character came
/// from so matches can be mapped back onto the original text.
#[derive(Debug, Clone)]
pub struct FoldedText<'a> {
    pub original: &'a str,
    pub folded: String,
    // (folded byte offset, original byte start, original byte end)
    map: Vec<(usize, usize, usize)>,
}

impl<'a> FoldedText<'a> {
    pub fn new(original: &'a str) -> Self {
        let mut folded = String::with_capacity(original.len());
        let mut map = Vec::with_capacity(original.len());

        for (start, c) in original.char_indices() {
            let end = start + c.len_utf8();
            if c.is_whitespace() {
                if !folded.is_empty() && !folded.ends_with(' ') {
                    map.push((folded.len(), start, end));
                    folded.push(' ');
                }
                continue;
            }
            for d in c.nfkd().filter(|d| !is_combining_mark(*d)) {
                for l in d.to_lowercase() {
                    let mapped = if l.is_whitespace() { ' ' } else { l };
                    if mapped == ' ' && (folded.is_empty() || folded.ends_with(' ')) {
                        continue;
                    }
                    map.push((folded.len(), start, end));
                    folded.push(mapped);
                }
            }
        }
        if folded.ends_with(' ') {
            folded.pop();
            map.pop();
        }

        FoldedText {
            original,
            folded,
            map,
        }
    }

    fn entry_at(&self, folded_byte: usize) -> Option<usize> {
        match self.map.binary_search_by_key(&folded_byte, |e| e.0) {
            Ok(i) => Some(i),
            Err(i) => i.checked_sub(1),
        }
    }

    /// Original byte range covering the folded byte range `[start, end)`.
    pub fn original_range(&self, start: usize, end: usize) -> Option<(usize, usize)> {
        if start >= end || self.map.is_empty() {
            return None;
        }
        let first = self.entry_at(start)?;
        let last = self.entry_at(end.saturating_sub(1))?;
        Some((self.map[first].1, self.map[last].2))
    }

    /// Original text for a folded byte range, trimmed.
    pub fn original_slice(&self, start: usize, end: usize) -> Option<&'a str> {
        let (s, e) = self.original_range(start, end)?;
        let slice = self.original.get(s..e)?.trim();
        (!slice.is_empty()).then_some(slice)
    }
}

/// Parse a Brazilian-formatted amount (`R$ 1.234,56`) into cents.
pub fn parse_money(s: &str) -> Option<i64> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == ',');
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let (int_part, frac_part) = if let Some(pos) = cleaned.rfind(',') {
        (&cleaned[..pos], &cleaned[pos + 1..])
    } else {
        match cleaned.rfind('.') {
            Some(pos) if cleaned.matches('.').count() == 1 && cleaned.len() - pos - 1 == 2 => {
                (&cleaned[..pos], &cleaned[pos + 1..])
            }
            _ => (cleaned, ""),
        }
    };

    let int_digits: String = int_part.chars().filter(char::is_ascii_digit).collect();
    let frac_digits: String = frac_part.chars().filter(char::is_ascii_digit).take(2).collect();
    if int_digits.len() > 15 || (int_digits.is_empty() && frac_digits.is_empty()) {
        return None;
    }

    let units: i64 = if int_digits.is_empty() {
        0
    } else {
        int_digits.parse().ok()?
    };
    let cents: i64 = match frac_digits.len() {
        0 => 0,
        1 => frac_digits.parse::<i64>().ok()? * 10,
        _ => frac_digits.parse().ok()?,
    };
    Some(units * 100 + cents)
}

/// Render cents as `R$ 1.234,56`.
pub fn format_money(cents: i64) -> String {
    let units = (cents / 100).to_string();
    let mut grouped = String::with_capacity(units.len() + units.len() / 3);
    for (i, c) in units.chars().enumerate() {
        if i > 0 && (units.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    format!("R$ {},{:02}", grouped, cents % 100)
}

pub fn canonical_money(s: &str) -> Option<String> {
    parse_money(s).filter(|c| *c > 0).map(format_money)
}

const MONTHS: [&str; 12] = [
    "janeiro",
    "fevereiro",
    "marco",
    "abril",
    "maio",
    "junho",
    "julho",
    "agosto",
    "setembro",
    "outubro",
    "novembro",
    "dezembro",
];

pub fn month_from_name(name: &str) -> Option<u32> {
    let name = normalize_text(name);
    MONTHS
        .iter()
        .position(|m| *m == name || (name.len() >= 3 && m.starts_with(&name)))
        .map(|i| i as u32 + 1)
}

/// Parse `12/03/2024`, `12.03.24` or `12 de março de 2024`.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let folded = normalize_text(s);
    let parts: Vec<&str> = folded
        .split(|c: char| c == '/' || c == '.' || c == '-')
        .map(str::trim)
        .collect();
    if parts.len() == 3 && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit())) {
        let day: u32 = parts[0].parse().ok()?;
        let month: u32 = parts[1].parse().ok()?;
        let year = expand_year(parts[2].parse().ok()?);
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    let tokens: Vec<&str> = folded
        .split_whitespace()
        .filter(|t| *t != "de" && *t != "del")
        .collect();
    if tokens.len() >= 3 {
        let day: u32 = tokens[0]
            .trim_end_matches(|c: char| !c.is_ascii_digit())
            .parse()
            .ok()?;
        let month = month_from_name(tokens[1].trim_end_matches(','))?;
        let year = expand_year(tokens[2].trim_end_matches(|c: char| !c.is_ascii_digit()).parse().ok()?);
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    None
}

fn expand_year(year: i32) -> i32 {
    if year < 100 { 2000 + year } else { year }
}

pub fn format_date(date: NaiveDate) -> String {
    format!("{:02}/{:02}/{:04}", date.day(), date.month(), date.year())
}

pub fn canonical_date(s: &str) -> Option<String> {
    parse_date(s).map(format_date)
}

pub fn digits_only(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

/// CPF reduced to its digits when there are exactly 11 of them.
pub fn canonical_cpf(s: &str) -> Option<String> {
    let digits = digits_only(s);
    (digits.len() == 11).then_some(digits)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Whitespace-collapsed prefix of at most `max` characters.
pub fn snippet(text: &str, max: usize) -> String {
    let collapsed = collapse_whitespace(text);
    if collapsed.chars().count() <= max {
        return collapsed;
    }
    collapsed.chars().take(max).collect()
}

/// Linear-interpolated percentile of an unsorted sample.
pub(crate) fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = pct.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_accents_and_ordinals() {
        assert_eq!(normalize_text("  Certidão  do\nConselho nº 12 "), "certidao do conselho no 12");
        assert_eq!(normalize_text("JOÃO"), "joao");
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn folded_ranges_map_back_to_original() {
        let text = "Perito:  José  Antônio";
        let folded = FoldedText::new(text);
        assert_eq!(folded.folded, "perito: jose antonio");
        let start = folded.folded.find("jose").unwrap();
        let end = folded.folded.len();
        assert_eq!(folded.original_slice(start, end), Some("José  Antônio"));
    }

    #[test]
    fn letter_spaced_runs_collapse() {
        assert_eq!(collapse_letter_spacing("D E S P A C H O"), "DESPACHO");
        assert_eq!(
            collapse_letter_spacing("D I R E T O R I A  E S P E C I A L"),
            "DIRETORIA ESPECIAL"
        );
        assert_eq!(collapse_letter_spacing("Vara A de B"), "Vara A de B");
    }

    #[test]
    fn money_parses_brazilian_format() {
        assert_eq!(parse_money("R$ 1.234,56"), Some(123456));
        assert_eq!(parse_money("R$1234,5"), Some(123450));
        assert_eq!(parse_money("2.000"), Some(200000));
        assert_eq!(parse_money("370.00"), Some(37000));
        assert_eq!(parse_money("R$"), None);
    }

    #[test]
    fn money_canonical_form_is_idempotent() {
        for raw in ["R$ 1.234,56", "1234,56", "R$ 12.345.678,9", "R$ 0,50", "500"] {
            let once = canonical_money(raw).unwrap();
            assert_eq!(canonical_money(&once).as_deref(), Some(once.as_str()));
            assert!(once.starts_with("R$ "));
            let (_, cents) = once.rsplit_once(',').unwrap();
            assert_eq!(cents.len(), 2);
        }
        assert_eq!(format_money(123456789), "R$ 1.234.567,89");
    }

    #[test]
    fn dates_parse_in_both_forms() {
        assert_eq!(canonical_date("12/03/2024").as_deref(), Some("12/03/2024"));
        assert_eq!(canonical_date("1º de março de 2024").as_deref(), Some("01/03/2024"));
        assert_eq!(canonical_date("5.6.24").as_deref(), Some("05/06/2024"));
        assert_eq!(canonical_date("31/02/2024"), None);
        assert_eq!(canonical_date("hoje"), None);
    }

    #[test]
    fn cpf_is_idempotent_and_exact() {
        let cpf = canonical_cpf("123.456.789-09").unwrap();
        assert_eq!(cpf, "12345678909");
        assert_eq!(canonical_cpf(&cpf), Some(cpf.clone()));
        assert_eq!(canonical_cpf("123.456.789"), None);
        assert_eq!(canonical_cpf("111.111.111-11").as_deref(), Some("11111111111"));
        assert_eq!(canonical_cpf("123.456.789-091"), None);
    }

    #[test]
    fn percentile_interpolates() {
        assert_eq!(percentile(&[], 0.9), None);
        let p = percentile(&[1.0, 2.0, 3.0, 4.0, 5.0], 0.9).unwrap();
        assert!((p - 4.6).abs() < 1e-9);
    }
}
