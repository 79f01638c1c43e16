//! Typed search parameters and the per-field validators that guard them.
//!
//! Every value that reaches [`SearchParameters`] has passed through one of the
//! `normalize_*` functions below. Values that fail are dropped individually,
//! the remaining elements of the same field are kept.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::policy::Slot;

static IPC_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]\d{2}[A-Z]?\d+/\d+$").expect("Invalid IPC regex"));

// Codes as they appear in prose, e.g. "C02F 1/44" or "G06N3/08".
static IPC_CODE_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Z]\d{2}[A-Z]?\s*\d{1,4}/\d{1,6}").expect("Invalid IPC scan regex")
});

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("Invalid date regex"));

/// Target of slot filling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParameters {
    pub ipc_codes: Vec<String>,
    pub countries: Vec<String>,
    pub assignees: Vec<String>,
    pub publication_from: Option<NaiveDate>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl SearchParameters {
    /// Field-level merge: supplied non-empty values overwrite, omitted fields
    /// keep their previous value. Nothing already filled is ever cleared.
    pub fn merge(&mut self, update: ParsedParams) {
        if let Some(codes) = update.ipc_codes.filter(|v| !v.is_empty()) {
            self.ipc_codes = codes;
        }
        if let Some(countries) = update.countries.filter(|v| !v.is_empty()) {
            self.countries = countries;
        }
        if let Some(assignees) = update.assignees.filter(|v| !v.is_empty()) {
            self.assignees = assignees;
        }
        if let Some(date) = update.publication_from {
            self.publication_from = Some(date);
        }
        if let Some(keywords) = update.keywords.filter(|v| !v.is_empty()) {
            self.keywords = keywords;
        }
    }

    pub fn filled_slots(&self) -> Vec<Slot> {
        Slot::ALL
            .into_iter()
            .filter(|slot| slot.is_filled(self))
            .collect()
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

/// Validated output of a single extraction. `None` means "not supplied".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedParams {
    pub ipc_codes: Option<Vec<String>>,
    pub countries: Option<Vec<String>>,
    pub assignees: Option<Vec<String>>,
    pub publication_from: Option<NaiveDate>,
    pub keywords: Option<Vec<String>>,
    /// One-line description per inferred IPC code; not a slot
    #[serde(default)]
    pub ipc_notes: BTreeMap<String, String>,
}

impl ParsedParams {
    pub fn supplied_slots(&self) -> Vec<Slot> {
        let mut slots = Vec::new();
        if self.ipc_codes.as_ref().is_some_and(|v| !v.is_empty()) {
            slots.push(Slot::IpcCodes);
        }
        if self.countries.as_ref().is_some_and(|v| !v.is_empty()) {
            slots.push(Slot::Countries);
        }
        if self.assignees.as_ref().is_some_and(|v| !v.is_empty()) {
            slots.push(Slot::Assignees);
        }
        if self.publication_from.is_some() {
            slots.push(Slot::PublicationFrom);
        }
        if self.keywords.as_ref().is_some_and(|v| !v.is_empty()) {
            slots.push(Slot::Keywords);
        }
        slots
    }

    pub fn is_empty(&self) -> bool {
        self.supplied_slots().is_empty()
    }
}

/// Normalizes an IPC code (`C02F 1/00` -> `C02F1/00`), rejecting anything that
/// does not match `LETTER DIGIT DIGIT [LETTER] DIGIT+/DIGIT+`.
pub fn normalize_ipc_code(raw: &str) -> Option<String> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    IPC_CODE.is_match(&compact).then_some(compact)
}

/// Accepts two-letter alphabetic codes only. `jp` becomes `JP`, `Japan` is rejected.
pub fn normalize_country_code(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(trimmed.to_ascii_uppercase())
    } else {
        None
    }
}

/// Free-text names (assignees, keywords): trimmed, inner whitespace collapsed, non-empty.
pub fn normalize_free_text(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

/// Strict `YYYY-MM-DD` calendar date.
pub fn parse_publication_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if !ISO_DATE.is_match(trimmed) {
        return None;
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok()
}

/// Finds IPC codes written literally in free text, normalized and de-duplicated.
pub fn scan_ipc_codes(text: &str) -> Vec<String> {
    let mut codes = Vec::new();
    for found in IPC_CODE_IN_TEXT.find_iter(text) {
        if let Some(code) = normalize_ipc_code(found.as_str()) {
            push_unique(&mut codes, code);
        }
    }
    codes
}

/// Appends `value` unless already present, keeping first-seen order.
pub(crate) fn push_unique(values: &mut Vec<String>, value: String) {
    if !values.contains(&value) {
        values.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_ipc_code_validation() {
        assert_eq!(normalize_ipc_code("C02F1/00"), Some("C02F1/00".to_string()));
        assert_eq!(normalize_ipc_code("c02f 1/44"), Some("C02F1/44".to_string()));
        assert_eq!(normalize_ipc_code("G01N33/569"), Some("G01N33/569".to_string()));
        // subclass letter is optional
        assert_eq!(normalize_ipc_code("H04 9/00"), Some("H049/00".to_string()));
        assert_eq!(normalize_ipc_code("C02F"), None);
        assert_eq!(normalize_ipc_code("water treatment"), None);
        assert_eq!(normalize_ipc_code("CC2F1/00"), None);
    }

    #[test]
    fn test_country_code_validation() {
        assert_eq!(normalize_country_code("JP"), Some("JP".to_string()));
        assert_eq!(normalize_country_code(" us "), Some("US".to_string()));
        assert_eq!(normalize_country_code("Japan"), None);
        assert_eq!(normalize_country_code("日本"), None);
        assert_eq!(normalize_country_code("J1"), None);
    }

    #[test]
    fn test_publication_date_validation() {
        assert_eq!(parse_publication_date("2021-01-01"), Some(date("2021-01-01")));
        assert_eq!(parse_publication_date("2021-02-30"), None);
        assert_eq!(parse_publication_date("2021/01/01"), None);
        assert_eq!(parse_publication_date("2021-1-1"), None);
        assert_eq!(parse_publication_date("2021年以降"), None);
    }

    #[test]
    fn test_free_text_normalization() {
        assert_eq!(
            normalize_free_text("  Sony   Group "),
            Some("Sony Group".to_string())
        );
        assert_eq!(normalize_free_text("   "), None);
    }

    #[test]
    fn test_scan_ipc_codes_from_prose() {
        let text = "- C02F 1/44: reverse osmosis\n- G06N 3/08: learning\n- C02F1/44 again";
        assert_eq!(scan_ipc_codes(text), vec!["C02F1/44", "G06N3/08"]);
        assert_eq!(scan_ipc_codes("コードはB01D61/02です"), vec!["B01D61/02"]);
        assert!(scan_ipc_codes("逆浸透膜の機械学習").is_empty());
    }

    #[test]
    fn test_merge_overwrites_supplied_and_keeps_omitted() {
        let mut params = SearchParameters {
            ipc_codes: vec!["C02F1/44".to_string()],
            countries: vec!["JP".to_string()],
            ..Default::default()
        };

        params.merge(ParsedParams {
            countries: Some(vec!["US".to_string()]),
            assignees: Some(vec![]),
            publication_from: Some(date("2020-01-01")),
            ..Default::default()
        });

        assert_eq!(params.ipc_codes, vec!["C02F1/44"]);
        assert_eq!(params.countries, vec!["US"]);
        assert!(params.assignees.is_empty());
        assert_eq!(params.publication_from, Some(date("2020-01-01")));
    }

    #[test]
    fn test_merge_never_clears_a_filled_slot() {
        let mut params = SearchParameters {
            ipc_codes: vec!["B01D61/02".to_string()],
            countries: vec!["JP".to_string()],
            assignees: vec!["Sony".to_string()],
            publication_from: Some(date("2021-01-01")),
            keywords: vec!["membrane".to_string()],
        };
        let before = params.clone();

        params.merge(ParsedParams {
            ipc_codes: Some(vec![]),
            countries: None,
            assignees: Some(vec![]),
            publication_from: None,
            keywords: Some(vec![]),
            ..Default::default()
        });

        assert_eq!(params, before);
    }

    #[test]
    fn test_parameters_serialize_dates_as_iso() {
        let params = SearchParameters {
            ipc_codes: vec!["C02F1/00".to_string()],
            publication_from: Some(date("2021-01-01")),
            ..Default::default()
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["publication_from"], "2021-01-01");
    }
}
