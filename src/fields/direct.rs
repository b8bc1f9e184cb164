//! Regex and label heuristics read straight off the window's paragraphs.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::{Config, PageRole, Patterns};
use crate::document::{Evidence, Field, FieldName};
use crate::fields::clean::{clean_party, clean_perito_name, clean_signer, marker_offset, truncate_at};
use crate::fields::{FieldContext, WindowText};
use crate::regions::page_for;
use crate::signature::SignatureExtractor;
use crate::types::Paragraph;
use crate::utils::{FoldedText, canonical_cpf, canonical_date, canonical_money, collapse_whitespace, normalize_text};

fn folded_regex(src: &str) -> Regex {
    Regex::new(src).expect("static regex")
}

static VARA: LazyLock<Regex> = LazyLock::new(|| {
    folded_regex(r"\b(\d{1,2}\s*[ao]?\s*vara\b[^,;]*|vara\s+unica[^,;]*|juizado\s+especial[^,;]*)")
});
static COMARCA: LazyLock<Regex> =
    LazyLock::new(|| folded_regex(r"\bcomarca\s+(?:d[aeo]s?\s+)?([a-z][a-z' -]*[a-z])"));
static PARTIES: LazyLock<Regex> = LazyLock::new(|| {
    folded_regex(
        r"\b(?:movid[ao]|ajuizad[ao]|propost[ao])\s+por\s+(.+?)\s+(?:em\s+face\s+d[eao]s?|contra)\s+(.+?)(?:[,;.]|$)",
    )
});
static NOMINATION: LazyLock<Regex> = LazyLock::new(|| {
    folded_regex(
        r"\b(?:nomeio|nomead[oa]|designo)\s+(?:(?:como|o|a)\s+)*(?:perit[oa]\s+)?(?:(?:o|a)\s+)?(?:(?:sr|sra|dr|dra)\.?\s+)?([a-z][a-z' ]+[a-z])",
    )
});
static CPF_LABELLED: LazyLock<Regex> = LazyLock::new(|| {
    folded_regex(r"\bcpf\s*(?:n[o°]?\.?\s*)?[:\-]?\s*(\d{3}\s*\.?\s*\d{3}\s*\.?\s*\d{3}\s*-?\s*\d{2})")
});
static PERICIA_KIND: LazyLock<Regex> = LazyLock::new(|| {
    folded_regex(
        r"\bpericias?\s+(?:medica|psicologica|psiquiatrica|contabil|grafotecnica|social|odontologica|ambiental|documentoscopica|de\s+engenharia)\b",
    )
});
static MATRICULA: LazyLock<Regex> = LazyLock::new(|| {
    folded_regex(r"\bmat(?:ricula)?\.?\s*(?:n[o°]?\.?\s*)?[:\-]?\s*(\d[\d.\-/]{2,15}\d)")
});

const VARA_STOPS: &[&str] = &["da comarca", "de comarca", "comarca", "do juizo", "nos autos", "processo"];
const COMARCA_STOPS: &[&str] = &["processo", "autos", "juizo", "vara", "estado"];
const COMARCA_MAX_WORDS: usize = 5;

/// First capture over the folded lines of `text`, as original text.
fn folded_capture<'t>(re: &Regex, text: &'t str, group: usize) -> Option<&'t str> {
    text.lines().find_map(|line| {
        let folded = FoldedText::new(line);
        let caps = re.captures(&folded.folded)?;
        let m = caps.get(group)?;
        folded.original_slice(m.start(), m.end())
    })
}

/// Text after `label:` (or `label -`) up to the end of its line.
pub(crate) fn labelled_value<S: AsRef<str>>(text: &str, labels: &[S]) -> Option<String> {
    let folded = FoldedText::new(text);
    let hay = folded.folded.as_str();
    for label in labels {
        let label = normalize_text(label.as_ref());
        if label.is_empty() {
            continue;
        }
        let mut from = 0;
        while let Some(pos) = hay[from..].find(&label) {
            let at = from + pos;
            from = at + label.len();
            let word_start = hay[..at].chars().next_back().is_none_or(|c| !c.is_alphanumeric());
            if !word_start {
                continue;
            }
            // allow inflections such as "perita" or "promovente(s)"
            let rest = &hay[from..];
            let after = rest.trim_start_matches(|c: char| c.is_alphabetic() || c == '(' || c == ')');
            let after_ws = after.trim_start();
            let Some(sep) = after_ws.chars().next().filter(|c| matches!(c, ':' | '-' | '–')) else {
                continue;
            };
            let value_at = hay.len() - after_ws.len() + sep.len_utf8();
            if value_at >= hay.len() {
                continue;
            }
            let Some((start, _)) = folded.original_range(value_at, hay.len()) else {
                continue;
            };
            let line = text[start..].trim_start().lines().next().unwrap_or("").trim();
            if !line.is_empty() {
                return Some(line.to_string());
            }
        }
    }
    None
}

fn trim_value(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':' | '.' | '-' | '–'))
}

fn compact(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Cleanup shared by every pass: canonical forms for numbers, money, dates
/// and CPF, name cleaning for people.
pub fn refine(field: FieldName, raw: &str, config: &Config, patterns: &Patterns) -> Option<String> {
    let fc = &config.fields;
    let value = match field {
        FieldName::ProcessoJudicial => compact(patterns.processo_judicial.find(raw)?.as_str()),
        FieldName::ProcessoAdministrativo => compact(patterns.processo_sei.find(raw)?.as_str()),
        FieldName::ProcessoAdme => match patterns.processo_adme.captures(raw).and_then(|c| c.get(1)) {
            Some(m) => compact(m.as_str()),
            None => {
                let c = compact(trim_value(raw));
                let (num, year) = c.split_once('/')?;
                let ok = !num.is_empty()
                    && num.chars().all(|ch| ch.is_ascii_digit())
                    && year.len() == 4
                    && year.chars().all(|ch| ch.is_ascii_digit());
                if !ok {
                    return None;
                }
                c
            }
        },
        FieldName::Promovente | FieldName::Promovido => {
            let other = if field == FieldName::Promovente {
                FieldName::Promovido
            } else {
                FieldName::Promovente
            };
            let mut stops: Vec<&str> = fc.party_stops.iter().map(String::as_str).collect();
            stops.extend(fc.labels.get(&other).into_iter().flatten().map(String::as_str));
            clean_party(raw, &stops, fc.max_value_chars)?
        }
        FieldName::Perito => clean_perito_name(raw)?,
        FieldName::PeritoCpf => {
            let m = patterns.cpf.find(raw).map_or(raw, |m| m.as_str());
            canonical_cpf(m)?
        }
        FieldName::ValorArbitradoJz
        | FieldName::ValorArbitradoDe
        | FieldName::ValorArbitradoCm
        | FieldName::ValorTabelado
        | FieldName::Adiantamento
        | FieldName::Parcela => {
            let m = patterns.money.find(raw).map_or(raw, |m| m.as_str());
            canonical_money(m)?
        }
        FieldName::Percentual => {
            let caps = patterns.percent.captures(raw)?;
            format!("{}%", caps.get(1)?.as_str())
        }
        FieldName::Data => {
            let m = patterns.find_date(raw).map_or(raw, |(_, _, m)| m);
            canonical_date(m)?
        }
        FieldName::Assinante => clean_signer(raw, &fc.job_titles)?,
        FieldName::Matricula => {
            let v = trim_value(raw);
            if !v.chars().any(|c| c.is_ascii_digit()) {
                return None;
            }
            v.to_string()
        }
        FieldName::Vara => {
            let v = truncate_at(raw.split([',', ';', '\n']).next().unwrap_or(raw), VARA_STOPS);
            collapse_whitespace(trim_value(v))
        }
        FieldName::Comarca => {
            let v = raw.split([',', ';', '.', '/', '(', '\n']).next().unwrap_or(raw);
            let v = [" - ", " – "].iter().filter_map(|d| v.find(d)).min().map_or(v, |at| &v[..at]);
            let v = truncate_at(v, COMARCA_STOPS);
            let words: Vec<&str> = trim_value(v).split_whitespace().take(COMARCA_MAX_WORDS).collect();
            words.join(" ")
        }
        FieldName::Especialidade | FieldName::EspeciePericia => {
            let v = raw.split([',', ';', '(', '\n']).next().unwrap_or(raw);
            collapse_whitespace(trim_value(v))
        }
    };
    let len = value.chars().count();
    (len > 0 && len <= fc.max_value_chars).then_some(value)
}

fn evidence(p: &Paragraph) -> Option<Evidence> {
    Some(Evidence::new(p.page, p.bbox, &p.text))
}

/// One pass over the window with per-field heuristics.
pub(crate) struct DirectExtractor<'a> {
    config: &'a Config,
    patterns: &'a Patterns,
}

impl<'a> DirectExtractor<'a> {
    pub fn new(config: &'a Config, patterns: &'a Patterns) -> Self {
        DirectExtractor { config, patterns }
    }

    fn labels(&self, field: FieldName) -> &[String] {
        self.config.fields.labels.get(&field).map_or(&[], Vec::as_slice)
    }

    fn labelled(&self, p: &Paragraph, field: FieldName) -> bool {
        marker_offset(&p.text, self.labels(field)).is_some()
    }

    fn found(&self, field: FieldName, raw: &str, confidence: f64, method: &str, p: &Paragraph) -> Option<Field> {
        let value = refine(field, raw, self.config, self.patterns)?;
        Some(Field::found(value, confidence, method, evidence(p)))
    }

    /// Every field, absent ones as the not-found sentinel.
    pub fn extract(&self, ctx: &FieldContext<'_>, text: &WindowText<'_>) -> BTreeMap<FieldName, Field> {
        let all = text.all();
        let early = text.early(self.config.fields.early_paragraphs);
        let mut out: BTreeMap<FieldName, Field> = FieldName::ALL.iter().map(|f| (*f, Field::not_found())).collect();
        let mut put = |field: FieldName, value: Option<Field>| {
            if let Some(v) = value {
                out.insert(field, v);
            }
        };

        put(FieldName::ProcessoJudicial, self.numbered(&all, FieldName::ProcessoJudicial, &self.patterns.processo_judicial));
        put(
            FieldName::ProcessoAdministrativo,
            self.numbered(&all, FieldName::ProcessoAdministrativo, &self.patterns.processo_sei),
        );
        put(FieldName::ProcessoAdme, self.adme(&all));
        put(FieldName::Vara, self.regex_field(&early, FieldName::Vara, &VARA, 1, 0.75));
        put(FieldName::Comarca, self.regex_field(&early, FieldName::Comarca, &COMARCA, 1, 0.75));

        let (promovente, promovido) = self.parties(&early);
        put(FieldName::Promovente, promovente);
        put(FieldName::Promovido, promovido);

        let perito = self.perito(&early);
        let perito_name = perito.as_ref().map(|f| f.value.clone());
        put(FieldName::Perito, perito);
        put(FieldName::PeritoCpf, self.perito_cpf(&early, perito_name.as_deref()));
        put(FieldName::Especialidade, self.label_field(&early, FieldName::Especialidade, 0.8));
        put(
            FieldName::EspeciePericia,
            self.label_field(&early, FieldName::EspeciePericia, 0.75)
                .or_else(|| self.regex_field(&all, FieldName::EspeciePericia, &PERICIA_KIND, 0, 0.65)),
        );

        let first = text.on_page(ctx.window.start_page);
        let second = text.on_page(page_for(PageRole::Second, ctx.window));
        put(FieldName::ValorArbitradoJz, self.money(&first, FieldName::ValorArbitradoJz, 0.85));
        put(FieldName::ValorArbitradoDe, self.money(&second, FieldName::ValorArbitradoDe, 0.85));
        put(FieldName::ValorArbitradoCm, self.money(&all, FieldName::ValorArbitradoCm, 0.8));
        put(FieldName::ValorTabelado, self.money(&all, FieldName::ValorTabelado, 0.75));
        put(FieldName::Adiantamento, self.money(&all, FieldName::Adiantamento, 0.75));
        put(FieldName::Parcela, self.money(&all, FieldName::Parcela, 0.75));
        put(FieldName::Percentual, self.percent(&all));
        put(FieldName::Data, self.date(&all));
        put(FieldName::Assinante, self.signer(ctx));
        put(FieldName::Matricula, self.regex_field(&all, FieldName::Matricula, &MATRICULA, 1, 0.75));
        out
    }

    /// Process numbers: labelled paragraphs first, any paragraph otherwise.
    fn numbered(&self, paras: &[&Paragraph], field: FieldName, re: &Regex) -> Option<Field> {
        let hit = |labelled: bool| {
            paras
                .iter()
                .filter(|p| self.labelled(p, field) == labelled)
                .find_map(|p| re.find(&p.text).map(|m| (*p, m.as_str())))
        };
        if let Some((p, m)) = hit(true) {
            return self.found(field, m, 0.85, "regex", p);
        }
        let (p, m) = hit(false)?;
        self.found(field, m, 0.75, "regex", p)
    }

    fn adme(&self, paras: &[&Paragraph]) -> Option<Field> {
        paras.iter().find_map(|p| {
            let m = self.patterns.processo_adme.find(&p.text)?;
            self.found(FieldName::ProcessoAdme, m.as_str(), 0.8, "regex", p)
        })
    }

    /// Regex over folded lines, gated by the field's labels.
    fn regex_field(&self, paras: &[&Paragraph], field: FieldName, re: &Regex, group: usize, confidence: f64) -> Option<Field> {
        paras.iter().find_map(|p| {
            if !self.labels(field).is_empty() && !self.labelled(p, field) && group != 0 {
                return None;
            }
            let raw = folded_capture(re, &p.text, group)?;
            self.found(field, raw, confidence, "regex", p)
        })
    }

    fn label_field(&self, paras: &[&Paragraph], field: FieldName, confidence: f64) -> Option<Field> {
        paras.iter().find_map(|p| {
            let raw = labelled_value(&p.text, self.labels(field))?;
            self.found(field, &raw, confidence, "label", p)
        })
    }

    fn parties(&self, paras: &[&Paragraph]) -> (Option<Field>, Option<Field>) {
        let mut promovente = self.label_field(paras, FieldName::Promovente, 0.8);
        let mut promovido = self.label_field(paras, FieldName::Promovido, 0.8);
        if promovente.is_some() && promovido.is_some() {
            return (promovente, promovido);
        }
        for p in paras {
            let from_sentence = p.text.lines().find_map(|line| {
                let folded = FoldedText::new(line);
                let caps = PARTIES.captures(&folded.folded)?;
                let a = caps.get(1)?;
                let b = caps.get(2)?;
                Some((
                    folded.original_slice(a.start(), a.end())?.to_string(),
                    folded.original_slice(b.start(), b.end())?.to_string(),
                ))
            });
            if let Some((a, b)) = from_sentence {
                if promovente.is_none() {
                    promovente = self.found(FieldName::Promovente, &a, 0.7, "regex", p);
                }
                if promovido.is_none() {
                    promovido = self.found(FieldName::Promovido, &b, 0.7, "regex", p);
                }
                break;
            }
        }
        (promovente, promovido)
    }

    fn perito(&self, paras: &[&Paragraph]) -> Option<Field> {
        self.label_field(paras, FieldName::Perito, 0.8).or_else(|| {
            paras.iter().find_map(|p| {
                let raw = folded_capture(&NOMINATION, &p.text, 1)?;
                self.found(FieldName::Perito, raw, 0.7, "regex", p)
            })
        })
    }

    /// CPF in a paragraph that is about the expert.
    fn perito_cpf(&self, paras: &[&Paragraph], name: Option<&str>) -> Option<Field> {
        let name = name.map(normalize_text).filter(|n| !n.is_empty());
        let about_expert = |p: &Paragraph| {
            self.labelled(p, FieldName::Perito)
                || name.as_ref().is_some_and(|n| normalize_text(&p.text).contains(n.as_str()))
        };
        let relevant: Vec<&&Paragraph> = paras.iter().filter(|p| about_expert(p)).collect();

        relevant
            .iter()
            .find_map(|p| {
                let raw = folded_capture(&CPF_LABELLED, &p.text, 1)?;
                self.found(FieldName::PeritoCpf, raw, 0.85, "regex", p)
            })
            .or_else(|| {
                relevant.iter().find_map(|p| {
                    let m = self.patterns.cpf.find(&p.text)?;
                    self.found(FieldName::PeritoCpf, m.as_str(), 0.7, "regex", p)
                })
            })
    }

    /// Labelled amount: the money match closest to the label, preferring
    /// one that follows it.
    fn money(&self, paras: &[&Paragraph], field: FieldName, confidence: f64) -> Option<Field> {
        let labels = self.labels(field);
        paras.iter().find_map(|p| {
            let at = marker_offset(&p.text, labels)?;
            let m = self.patterns.money.find_iter(&p.text).min_by_key(|m| {
                if m.start() >= at {
                    (m.start() - at) * 2
                } else {
                    (at - m.start()) * 2 + 1
                }
            })?;
            self.found(field, m.as_str(), confidence, "regex", p)
        })
    }

    fn percent(&self, paras: &[&Paragraph]) -> Option<Field> {
        paras.iter().find_map(|p| {
            let m = self.patterns.percent.find(&p.text)?;
            self.found(FieldName::Percentual, m.as_str(), 0.75, "regex", p)
        })
    }

    /// Labelled dates beat bare ones; among equals the latest in the window
    /// wins, which is where the despacho is dated.
    fn date(&self, paras: &[&Paragraph]) -> Option<Field> {
        let mut best: Option<(&Paragraph, &str, bool)> = None;
        for &p in paras {
            let Some((_, _, m)) = self.patterns.find_date(&p.text) else {
                continue;
            };
            let labelled = self.labelled(p, FieldName::Data);
            if best.is_none_or(|(_, _, l)| labelled || !l) {
                best = Some((p, m, labelled));
            }
        }
        let (p, m, labelled) = best?;
        self.found(FieldName::Data, m, if labelled { 0.8 } else { 0.6 }, "regex", p)
    }

    /// Footer signature phrases, last page first; then the signature regions.
    fn signer(&self, ctx: &FieldContext<'_>) -> Option<Field> {
        let extractor = SignatureExtractor::new(self.config, self.patterns);
        let window = ctx.window;
        let textual = extractor.from_text(ctx.pages, window.start_page, window.end_page);
        if let Some(s) = textual.iter().max_by_key(|s| s.page) {
            let page = s.page.unwrap_or(window.end_page);
            let ev = Evidence::new(page, s.bbox.unwrap_or_default(), &s.evidence);
            return Some(Field::found(s.signer.clone(), 0.85, "signature_text", Some(ev)));
        }
        ["signature_block", "last_bottom"].iter().find_map(|name| {
            let region = ctx.regions.iter().find(|r| r.name == *name)?;
            let (signer, matched) = extractor.scan_text(&region.text).into_iter().next()?;
            let ev = Evidence::new(region.page, region.bbox, &matched);
            Some(Field::found(signer, 0.75, "signature_text", Some(ev)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Config, Patterns) {
        let config = Config::default();
        let patterns = Patterns::compile(&config.patterns).unwrap();
        (config, patterns)
    }

    #[test]
    fn label_values_run_to_end_of_line() {
        assert_eq!(
            labelled_value("Promovente: JOSÉ DA SILVA\nPromovido: ESTADO", &["promovente"]).as_deref(),
            Some("JOSÉ DA SILVA")
        );
        assert_eq!(
            labelled_value("Perita - Dra. Ana Lima, CRP 13/1", &["perito", "perita"]).as_deref(),
            Some("Dra. Ana Lima, CRP 13/1")
        );
        assert_eq!(labelled_value("Autorizo o pagamento", &["autor"]), None);
    }

    #[test]
    fn refine_canonicalizes_by_field() {
        let (config, patterns) = setup();
        let r = |f, s| refine(f, s, &config, &patterns);
        assert_eq!(r(FieldName::ProcessoJudicial, "nº 0801234- 56.2023.8.15.0001").as_deref(), Some("0801234-56.2023.8.15.0001"));
        assert_eq!(r(FieldName::ProcessoJudicial, "sem número"), None);
        assert_eq!(r(FieldName::PeritoCpf, "123.456.789-09").as_deref(), Some("12345678909"));
        assert_eq!(r(FieldName::ValorArbitradoJz, "de R$ 1.234,56 (mil)").as_deref(), Some("R$ 1.234,56"));
        assert_eq!(r(FieldName::Data, "João Pessoa, 5 de maio de 2024").as_deref(), Some("05/05/2024"));
        assert_eq!(r(FieldName::Percentual, "adiantamento de 50 %").as_deref(), Some("50%"));
        assert_eq!(r(FieldName::ProcessoAdme, "ADME nº 12/2024").as_deref(), Some("12/2024"));
        assert_eq!(
            r(FieldName::Promovente, "JOSÉ DA SILVA Promovido: ESTADO DA PARAÍBA").as_deref(),
            Some("JOSÉ DA SILVA")
        );
        assert_eq!(r(FieldName::Comarca, "Campina Grande - PB, processo").as_deref(), Some("Campina Grande"));
        assert_eq!(r(FieldName::Vara, "2ª Vara Cível da Comarca de Patos").as_deref(), Some("2ª Vara Cível"));
    }

    #[test]
    fn folded_regexes_map_back_to_original_text() {
        let text = "Juízo da 2ª Vara Cível da Comarca de Campina Grande";
        assert_eq!(folded_capture(&VARA, text, 1), Some("2ª Vara Cível da Comarca de Campina Grande"));
        assert_eq!(folded_capture(&COMARCA, text, 1), Some("Campina Grande"));
        let nomination = "Nomeio como perita a Dra. Ana Lima, CPF 123.456.789-09";
        assert_eq!(folded_capture(&NOMINATION, nomination, 1), Some("Ana Lima"));
        assert_eq!(folded_capture(&CPF_LABELLED, nomination, 1), Some("123.456.789-09"));
        assert_eq!(folded_capture(&MATRICULA, "Matrícula nº 123.456-7", 1), Some("123.456-7"));
    }
}
