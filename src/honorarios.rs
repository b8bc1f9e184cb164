use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::utils::{contains_any, normalize_text, parse_money};

pub const ALIAS_CONFIDENCE: f64 = 0.9;
pub const AREA_CONFIDENCE: f64 = 0.75;

/// Amounts arrive either as numbers in reais or as formatted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Reais(f64),
    Text(String),
}

impl Amount {
    pub fn cents(&self) -> Option<i64> {
        match self {
            Amount::Reais(v) if v.is_finite() && *v > 0.0 => Some((v * 100.0).round() as i64),
            Amount::Reais(_) => None,
            Amount::Text(s) => parse_money(s).filter(|c| *c > 0),
        }
    }
}

/// One row of the fee schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HonorariosEntry {
    #[serde(default)]
    pub id: String,
    pub area: String,
    #[serde(alias = "description")]
    pub descricao: String,
    #[serde(alias = "value")]
    pub valor: Amount,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeMatch<'a> {
    pub entry: &'a HonorariosEntry,
    pub cents: i64,
    pub confidence: f64,
    pub method: &'static str,
}

/// Fee schedule used to backfill the tabulated value.
#[derive(Debug, Default)]
pub struct HonorariosTable {
    entries: Vec<HonorariosEntry>,
}

impl HonorariosTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// JSON array of rows; a missing or malformed file gives an empty table.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let parsed = std::fs::read_to_string(path)
            .map_err(crate::error::ExtractError::from)
            .and_then(|text| Self::from_json_str(&text));
        match parsed {
            Ok(table) => {
                info!(path = %path.display(), rows = table.len(), "loaded fee table");
                table
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "fee table not loaded");
                Self::empty()
            }
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let entries: Vec<HonorariosEntry> = serde_json::from_str(text)?;
        Ok(Self::from_entries(entries))
    }

    /// Rows without a usable amount are dropped.
    pub fn from_entries(entries: Vec<HonorariosEntry>) -> Self {
        let entries = entries.into_iter().filter(|e| e.valor.cents().is_some()).collect();
        HonorariosTable { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Row for a specialty and a document amount.
    ///
    /// An alias occurring in the specialty or hint text wins (closest amount
    /// among several). Otherwise the specialty is mapped to an area through
    /// `area_keywords` and the area row nearest to the amount is taken, as
    /// long as it lies within `tolerance` (relative to the row amount).
    pub fn resolve(
        &self,
        specialty: &str,
        hint: &str,
        cents: i64,
        area_keywords: &BTreeMap<String, Vec<String>>,
        tolerance: f64,
    ) -> Option<FeeMatch<'_>> {
        let text = normalize_text(&format!("{} {}", specialty, hint));
        let distance = |e: &HonorariosEntry| e.valor.cents().map_or(i64::MAX, |c| (c - cents).abs());

        let by_alias = self
            .entries
            .iter()
            .filter(|e| contains_any(&text, &e.aliases))
            .min_by_key(|e| distance(e));
        if let Some(entry) = by_alias {
            debug!(id = %entry.id, "fee row by alias");
            return Some(FeeMatch {
                entry,
                cents: entry.valor.cents()?,
                confidence: ALIAS_CONFIDENCE,
                method: "honorarios_alias",
            });
        }

        let spec = normalize_text(specialty);
        let area = area_keywords
            .iter()
            .find(|(_, keywords)| contains_any(&spec, keywords))
            .map(|(area, _)| normalize_text(area))?;
        let entry = self
            .entries
            .iter()
            .filter(|e| normalize_text(&e.area) == area)
            .min_by_key(|e| distance(e))?;
        let row = entry.valor.cents()?;
        let relative = (row - cents).abs() as f64 / row as f64;
        if relative > tolerance {
            debug!(id = %entry.id, relative, "nearest fee row outside tolerance");
            return None;
        }
        Some(FeeMatch {
            entry,
            cents: row,
            confidence: AREA_CONFIDENCE,
            method: "honorarios_area",
        })
    }
}
