//! Cleanup of person and party names pulled out of running text.

use crate::utils::{FoldedText, collapse_whitespace, normalize_text};

const NAME_MIN_CHARS: usize = 3;
const NAME_MAX_CHARS: usize = 80;

const PERITO_STOPS: &[&str] = &[
    "cpf",
    "crm",
    "crp",
    "crea",
    "cress",
    "crc",
    "oab",
    "rg",
    "inscrit",
    "portador",
    "especialidade",
    "especialista",
    "matricula",
    "nomead",
    "para atuar",
    "residente",
];

const HONORIFICS: &[&str] = &["dr.", "dra.", "dr", "dra", "sr.", "sra.", "sr", "sra", "prof.", "profa."];

/// Letters and single spaces only.
pub fn letters_only(s: &str) -> String {
    let mapped: String = s
        .chars()
        .map(|c| if c.is_alphabetic() { c } else { ' ' })
        .collect();
    collapse_whitespace(&mapped)
}

/// Byte offset of the earliest marker that starts a word in `text`.
pub fn marker_offset<S: AsRef<str>>(text: &str, markers: &[S]) -> Option<usize> {
    let folded = FoldedText::new(text);
    let hay = folded.folded.as_str();
    let mut best: Option<usize> = None;

    for marker in markers {
        let m = normalize_text(marker.as_ref());
        if m.is_empty() {
            continue;
        }
        let mut from = 0;
        while let Some(pos) = hay[from..].find(&m) {
            let at = from + pos;
            let boundary = hay[..at]
                .chars()
                .next_back()
                .is_none_or(|c| !c.is_alphanumeric());
            if boundary {
                if best.is_none_or(|b| at < b) {
                    best = Some(at);
                }
                break;
            }
            from = at + m.len();
        }
    }
    best.and_then(|at| folded.original_range(at, at + 1)).map(|(start, _)| start)
}

/// `text` up to the first marker.
pub fn truncate_at<'t, S: AsRef<str>>(text: &'t str, markers: &[S]) -> &'t str {
    match marker_offset(text, markers) {
        Some(at) => &text[..at],
        None => text,
    }
}

fn trim_punct(s: &str) -> &str {
    s.trim_matches(|c: char| {
        c.is_whitespace() || matches!(c, ',' | ';' | ':' | '-' | '–' | '—' | '.' | '(' | ')' | '/' | '"' | '“' | '”')
    })
}

/// Cut before " em <digit>", as in "Fulano em 12/03/2024".
fn cut_at_em_date(s: &str) -> &str {
    let mut from = 0;
    while let Some(pos) = s[from..].find(" em ") {
        let at = from + pos;
        if s[at + 4..].trim_start().starts_with(|c: char| c.is_ascii_digit()) {
            return &s[..at];
        }
        from = at + 4;
    }
    s
}

fn cut_at_dash(s: &str) -> &str {
    [" - ", " – ", " — "]
        .iter()
        .filter_map(|d| s.find(d))
        .min()
        .map_or(s, |at| &s[..at])
}

fn first_clause(s: &str) -> &str {
    s.split(['\n', ',', ';', '(']).next().unwrap_or(s)
}

fn plausible_name(s: &str) -> bool {
    let chars = s.chars().count();
    (NAME_MIN_CHARS..=NAME_MAX_CHARS).contains(&chars)
        && s.chars().filter(|c| c.is_alphabetic()).count() >= NAME_MIN_CHARS
        && !s.chars().any(|c| c.is_ascii_digit())
}

/// Signer name: stops at punctuation, dates and job titles.
pub fn clean_signer<S: AsRef<str>>(raw: &str, job_titles: &[S]) -> Option<String> {
    let s = first_clause(raw);
    let s = cut_at_em_date(s);
    let s = cut_at_dash(s);
    let s = truncate_at(s, job_titles);
    let s = collapse_whitespace(trim_punct(s));
    plausible_name(&s).then_some(s)
}

/// Party name: stops at identity documents, "perante" and the like.
pub fn clean_party<S: AsRef<str>>(raw: &str, stops: &[S], max_chars: usize) -> Option<String> {
    let s = raw.lines().next().unwrap_or(raw);
    let s = truncate_at(s, stops);
    let s = s.split([',', ';']).next().unwrap_or(s);
    let s = collapse_whitespace(trim_punct(s));
    let letters = s.chars().filter(|c| c.is_alphabetic()).count();
    (letters >= NAME_MIN_CHARS && s.chars().count() <= max_chars).then_some(s)
}

/// Expert name with honorifics, registrations and trailing clauses removed.
pub fn clean_perito_name(raw: &str) -> Option<String> {
    let mut s = first_clause(raw).trim();
    loop {
        let lower = s.to_lowercase();
        let Some(h) = HONORIFICS
            .iter()
            .find(|h| lower.starts_with(*h) && lower[h.len()..].starts_with(' '))
        else {
            break;
        };
        s = s[h.len()..].trim_start();
    }
    let s = truncate_at(s, PERITO_STOPS);
    let s = cut_at_dash(s);
    let s = match s.find(|c: char| c.is_ascii_digit()) {
        Some(at) => &s[..at],
        None => s,
    };
    let s = letters_only(s);
    plausible_name(&s).then_some(s)
}

/// True when the value names an institution rather than a person.
pub fn is_institutional<S: AsRef<str>>(value: &str, markers: &[S]) -> bool {
    marker_offset(value, markers).is_some()
}

/// A name that probably carries layout noise and is worth re-resolving.
pub fn looks_noisy(name: &str) -> bool {
    let tokens: Vec<&str> = name.split_whitespace().collect();
    let singles = tokens.iter().filter(|t| t.chars().count() == 1).count();
    tokens.len() < 2
        || tokens.len() > 8
        || singles * 2 > tokens.len()
        || name.chars().any(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TITLES: &[&str] = &["diretor", "diretora", "juiz"];

    #[test]
    fn signer_stops_at_title_and_date() {
        assert_eq!(clean_signer("João Silva, Diretor Especial", TITLES).as_deref(), Some("João Silva"));
        assert_eq!(clean_signer("Ana Lima Diretora Especial", TITLES).as_deref(), Some("Ana Lima"));
        assert_eq!(clean_signer("Ana Lima em 12/03/2024", TITLES).as_deref(), Some("Ana Lima"));
        assert_eq!(clean_signer("12/03/2024", TITLES), None);
    }

    #[test]
    fn party_stops_at_document_numbers() {
        let stops = ["cpf", "perante"];
        assert_eq!(
            clean_party("JOSÉ DA SILVA CPF 123.456.789-09", &stops, 120).as_deref(),
            Some("JOSÉ DA SILVA")
        );
        assert_eq!(
            clean_party("Banco Tal S/A perante o juízo", &stops, 120).as_deref(),
            Some("Banco Tal S/A")
        );
        assert_eq!(clean_party("  , ", &stops, 120), None);
    }

    #[test]
    fn perito_name_drops_honorifics_and_registrations() {
        assert_eq!(clean_perito_name("Dra. Maria Souza, CRP 13/1234").as_deref(), Some("Maria Souza"));
        assert_eq!(clean_perito_name("Dr. Pedro Alves CRM 4567").as_deref(), Some("Pedro Alves"));
        assert_eq!(clean_perito_name("Carla Dias - psicóloga").as_deref(), Some("Carla Dias"));
    }

    #[test]
    fn markers_match_at_word_start_only() {
        assert_eq!(marker_offset("Maria Juizado", &["juiz"]), Some(6));
        assert_eq!(marker_offset("Conjuiz", &["juiz"]), None);
        assert!(is_institutional("Juízo da 2ª Vara", &["juizo"]));
        assert!(!is_institutional("Maria da Silva", &["juizo", "vara"]));
    }

    #[test]
    fn noisy_names() {
        assert!(looks_noisy("M A R I A souza"));
        assert!(looks_noisy("Maria"));
        assert!(!looks_noisy("Maria Souza"));
    }
}
