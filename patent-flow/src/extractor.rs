//! Parameter extraction: one conversation in, one [`ParsedParams`] out.
//!
//! The generator is asked for a bare JSON object over a closed key set. The
//! reply is decoded into a generic map first and only then projected, key by
//! key, through the validators in [`crate::params`]. A bad field costs that
//! field, not the whole reply.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::{
    conversation::ConversationState,
    error::{FlowError, Result},
    llm::TextGenerator,
    params::{
        ParsedParams, SearchParameters, normalize_country_code, normalize_free_text,
        normalize_ipc_code, parse_publication_date, push_unique, scan_ipc_codes,
    },
    policy::Slot,
};

const EXTRACTION_PROMPT: &str = r#"You are a patent search assistant that turns a conversation into structured search parameters.

ANALYZE THE WHOLE CONVERSATION AND EXTRACT ONLY WHAT THE USER HAS SAID:
- ipc_codes: International Patent Classification codes, written without spaces (e.g. "C02F1/44", "G06N3/08")
- countries: two-letter country codes. Convert country names: Japan/日本 -> "JP", United States/アメリカ -> "US", China/中国 -> "CN", Europe -> "EP"
- assignees: applicant or company names, exactly as written by the user (e.g. "Sony")
- publication_from: earliest publication date as "YYYY-MM-DD". Convert relative wording: "2021年以降" or "since 2021" -> "2021-01-01"
- keywords: short technical terms that describe the technology of interest
- ipc_notes: a JSON object mapping each IPC code you return to a one-line description of what it covers

RULES:
1. Respond with ONLY one JSON object. No explanation, no Markdown, no text before or after it.
2. Use only these keys: "ipc_codes", "countries", "assignees", "publication_from", "keywords", "ipc_notes".
3. ipc_codes, countries, assignees and keywords are JSON arrays of strings. When the user lists several values separated by commas, each value is one array element.
4. Omit every key the user has not mentioned. Never invent countries, assignees or dates.
5. If the user describes a technology but gives no explicit IPC codes, infer 3 to 5 plausible IPC codes from the keywords and return them in ipc_codes. Never leave ipc_codes empty when keywords are present.
6. Values already collected are listed below. Repeat them only if the user changes them.

EXAMPLE:
User: "逆浸透膜の機械学習"
{"keywords": ["reverse osmosis membrane", "machine learning"], "ipc_codes": ["B01D61/02", "C02F1/44", "G06N20/00"], "ipc_notes": {"B01D61/02": "Reverse osmosis and hyperfiltration", "C02F1/44": "Water treatment by dialysis, osmosis or reverse osmosis", "G06N20/00": "Machine learning"}}

User: "JP, Sony, 2021-01-01"
{"countries": ["JP"], "assignees": ["Sony"], "publication_from": "2021-01-01"}
"#;

const IPC_NOTES_KEY: &str = "ipc_notes";

fn build_instruction(prior: &SearchParameters) -> String {
    format!(
        "{EXTRACTION_PROMPT}\nALREADY COLLECTED:\n{}",
        prior.to_pretty_json()
    )
}

/// Turns conversation turns into validated search parameters.
pub struct ParameterExtractor {
    generator: Arc<dyn TextGenerator>,
}

impl ParameterExtractor {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Calls the generator once and validates its reply.
    ///
    /// Transport failures come back as [`FlowError::GenerationFailure`]; a reply
    /// that is not a usable JSON object comes back as
    /// [`FlowError::ExtractionParseFailure`] with the raw text attached.
    pub async fn extract(&self, state: &ConversationState) -> Result<ParsedParams> {
        let prior = &state.params;
        let instruction = build_instruction(prior);
        let raw = self.generator.complete(&instruction, state.turns()).await?;
        debug!(raw = %raw, "Extraction response received");

        let mut parsed = parse_extraction(&raw)?;

        // Codes the user typed literally win over whatever the model returned.
        let explicit = state
            .last_user_text()
            .map(scan_ipc_codes)
            .unwrap_or_default();
        if !explicit.is_empty() {
            let mut codes = explicit;
            for code in parsed.ipc_codes.take().unwrap_or_default() {
                push_unique(&mut codes, code);
            }
            parsed.ipc_codes = Some(codes);
        }

        let has_keywords = parsed.keywords.as_ref().is_some_and(|k| !k.is_empty());
        let has_codes = parsed.ipc_codes.as_ref().is_some_and(|c| !c.is_empty());
        if has_keywords && !has_codes && prior.ipc_codes.is_empty() {
            warn!("Extraction returned keywords without inferring IPC codes");
        }

        info!(
            supplied = ?parsed.supplied_slots(),
            "Parameters extracted"
        );
        Ok(parsed)
    }
}

/// Removes a surrounding Markdown code fence, if any.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest
        .strip_prefix("json")
        .or_else(|| rest.strip_prefix("JSON"))
        .unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Decodes a generator reply and validates each known key independently.
pub fn parse_extraction(raw: &str) -> Result<ParsedParams> {
    let body = strip_code_fence(raw);
    let value: Value =
        serde_json::from_str(body).map_err(|e| FlowError::ExtractionParseFailure {
            reason: format!("response is not valid JSON: {e}"),
            raw: raw.to_string(),
        })?;
    let Value::Object(map) = value else {
        return Err(FlowError::ExtractionParseFailure {
            reason: "response is JSON but not an object".to_string(),
            raw: raw.to_string(),
        });
    };

    let parsed = project(&map);
    let carried = carried_slots(&map);
    if !carried.is_empty() && parsed.is_empty() {
        return Err(FlowError::ExtractionParseFailure {
            reason: format!(
                "no field passed validation ({})",
                carried
                    .iter()
                    .map(|slot| slot.key())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            raw: raw.to_string(),
        });
    }
    Ok(parsed)
}

fn project(map: &Map<String, Value>) -> ParsedParams {
    let mut parsed = ParsedParams::default();
    for (key, value) in map {
        if key == IPC_NOTES_KEY {
            parsed.ipc_notes = validated_notes(value);
            continue;
        }
        let Some(slot) = Slot::from_key(key) else {
            debug!(key = %key, "Ignoring unknown extraction key");
            continue;
        };
        match slot {
            Slot::IpcCodes => parsed.ipc_codes = validated_list(value, normalize_ipc_code),
            Slot::Countries => parsed.countries = validated_list(value, normalize_country_code),
            Slot::Assignees => parsed.assignees = validated_list(value, normalize_free_text),
            Slot::Keywords => parsed.keywords = validated_list(value, normalize_free_text),
            Slot::PublicationFrom => {
                parsed.publication_from = value.as_str().and_then(parse_publication_date)
            }
        }
    }
    parsed
}

/// Notes are kept only under a valid code and with non-empty text.
fn validated_notes(value: &Value) -> BTreeMap<String, String> {
    let Value::Object(entries) = value else {
        return BTreeMap::new();
    };
    entries
        .iter()
        .filter_map(|(code, note)| {
            let code = normalize_ipc_code(code)?;
            let note = normalize_free_text(note.as_str()?)?;
            Some((code, note))
        })
        .collect()
}

/// Known keys whose value is something other than null / empty.
fn carried_slots(map: &Map<String, Value>) -> Vec<Slot> {
    map.iter()
        .filter_map(|(key, value)| {
            let slot = Slot::from_key(key)?;
            let carried = match value {
                Value::Null => false,
                Value::String(s) => !s.trim().is_empty(),
                Value::Array(items) => !items.is_empty(),
                _ => true,
            };
            carried.then_some(slot)
        })
        .collect()
}

/// Arrays are taken element by element; a bare string is split on list separators.
fn list_candidates(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        Value::String(s) => s
            .split([',', '、', ';'])
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn validated_list(value: &Value, validate: fn(&str) -> Option<String>) -> Option<Vec<String>> {
    let mut valid = Vec::new();
    for candidate in list_candidates(value) {
        match validate(&candidate) {
            Some(normalized) => push_unique(&mut valid, normalized),
            None => debug!(value = %candidate, "Dropping invalid value"),
        }
    }
    (!valid.is_empty()).then_some(valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Turn;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    struct FixedGenerator(String);

    #[async_trait]
    impl TextGenerator for FixedGenerator {
        async fn complete(&self, _instruction: &str, _turns: &[Turn]) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_parses_complete_object() {
        let parsed = parse_extraction(
            r#"{"ipc_codes": ["C02F 1/44", "B01D61/02"], "countries": ["jp"], "assignees": ["Sony"], "publication_from": "2021-01-01"}"#,
        )
        .unwrap();

        assert_eq!(parsed.ipc_codes.unwrap(), vec!["C02F1/44", "B01D61/02"]);
        assert_eq!(parsed.countries.unwrap(), vec!["JP"]);
        assert_eq!(parsed.assignees.unwrap(), vec!["Sony"]);
        assert_eq!(
            parsed.publication_from,
            NaiveDate::from_ymd_opt(2021, 1, 1)
        );
        assert!(parsed.keywords.is_none());
    }

    #[test]
    fn test_strips_code_fence() {
        let parsed = parse_extraction("```json\n{\"countries\": [\"US\"]}\n```").unwrap();
        assert_eq!(parsed.countries.unwrap(), vec!["US"]);
    }

    #[test]
    fn test_malformed_output_is_parse_failure() {
        let raw = "Sure! Countries: Japan, assignee: Sony";
        match parse_extraction(raw) {
            Err(FlowError::ExtractionParseFailure { raw: kept, .. }) => assert_eq!(kept, raw),
            other => panic!("expected parse failure, got {other:?}"),
        }
        assert!(matches!(
            parse_extraction("[\"JP\"]"),
            Err(FlowError::ExtractionParseFailure { .. })
        ));
    }

    #[test]
    fn test_invalid_fields_are_dropped_not_fatal() {
        let parsed = parse_extraction(
            r#"{"countries": ["Japan", "US"], "publication_from": "2021年以降", "assignees": ["Sony"]}"#,
        )
        .unwrap();

        assert_eq!(parsed.countries.unwrap(), vec!["US"]);
        assert!(parsed.publication_from.is_none());
        assert_eq!(parsed.assignees.unwrap(), vec!["Sony"]);
    }

    #[test]
    fn test_every_field_invalid_is_parse_failure() {
        let result = parse_extraction(r#"{"countries": ["Japan"], "publication_from": "soon"}"#);
        assert!(matches!(
            result,
            Err(FlowError::ExtractionParseFailure { .. })
        ));
    }

    #[test]
    fn test_empty_object_supplies_nothing() {
        let parsed = parse_extraction("{}").unwrap();
        assert!(parsed.is_empty());

        let parsed = parse_extraction(r#"{"countries": [], "publication_from": null}"#).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_string_lists_are_split_and_deduplicated() {
        let parsed = parse_extraction(
            r#"{"countries": "JP, US, jp", "keywords": "membrane、 machine learning", "summary": "ignored"}"#,
        )
        .unwrap();

        assert_eq!(parsed.countries.unwrap(), vec!["JP", "US"]);
        assert_eq!(
            parsed.keywords.unwrap(),
            vec!["membrane", "machine learning"]
        );
    }

    #[test]
    fn test_ipc_notes_are_keyed_by_valid_codes() {
        let parsed = parse_extraction(
            r#"{"ipc_codes": ["C02F1/44"], "ipc_notes": {"c02f 1/44": "  Reverse osmosis  ", "not-a-code": "dropped", "G06N20/00": ""}}"#,
        )
        .unwrap();

        assert_eq!(parsed.ipc_notes.len(), 1);
        assert_eq!(parsed.ipc_notes["C02F1/44"], "Reverse osmosis");
        assert_eq!(parsed.supplied_slots(), vec![Slot::IpcCodes]);
    }

    #[tokio::test]
    async fn test_explicit_codes_are_kept_ahead_of_model_codes() {
        let extractor = ParameterExtractor::new(Arc::new(FixedGenerator(
            r#"{"ipc_codes": ["B01D61/02"], "keywords": ["membrane"]}"#.to_string(),
        )));
        let mut state = ConversationState::new();
        state.push_user("membrane fouling, especially C02F 1/44");

        let parsed = extractor.extract(&state).await.unwrap();

        assert_eq!(parsed.ipc_codes.unwrap(), vec!["C02F1/44", "B01D61/02"]);
    }

    #[tokio::test]
    async fn test_instruction_carries_prior_parameters() {
        let prior = SearchParameters {
            countries: vec!["JP".to_string()],
            ..Default::default()
        };
        let instruction = build_instruction(&prior);
        assert!(instruction.contains("ALREADY COLLECTED"));
        assert!(instruction.contains("\"JP\""));
    }
}
