//! Prompt templates and response parsing for the three model-backed oracles.
//!
//! Models are asked for bare JSON but often wrap it in markdown fences or
//! return numbers as strings; everything here tolerates both.

pub mod clustering;
pub mod extraction;
pub mod ranking;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

pub use clustering::{ClusteringOracle, ClusteringResult, TopicCluster};
pub use extraction::{ExtractedExam, ExtractedQuestion, ExtractionError, ExtractionOracle};
pub use ranking::{RankedCluster, RankingOracle, RankingResult, SurvivalItem};

/// Drop ```json / ``` fences and surrounding whitespace.
pub fn strip_json_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "").trim().to_string()
}

pub fn parse_json_envelope<T: DeserializeOwned>(raw: &str) -> serde_json::Result<T> {
    serde_json::from_str(&strip_json_fences(raw))
}

fn leading_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    let end = trimmed
        .char_indices()
        .find(|(idx, ch)| !(ch.is_ascii_digit() || *ch == '.' || (*idx == 0 && *ch == '-')))
        .map(|(idx, _)| idx)
        .unwrap_or(trimmed.len());
    trimmed[..end].parse().ok()
}

fn number_from_value(value: Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => leading_number(&s),
        _ => None,
    }
}

pub(crate) fn lenient_opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(number_from_value(Value::deserialize(d)?).filter(|n| n.is_finite()))
}

pub(crate) fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(lenient_opt_f64(d)?.unwrap_or(0.0))
}

pub(crate) fn lenient_opt_i32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i32>, D::Error> {
    Ok(lenient_opt_f64(d)?.map(|n| n.round() as i32))
}

pub(crate) fn lenient_u32<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    Ok(lenient_opt_f64(d)?.map(|n| n.max(0.0).round() as u32).unwrap_or(0))
}

pub(crate) fn lenient_opt_string<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

pub(crate) fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(lenient_opt_string(d)?.unwrap_or_default())
}

pub(crate) fn lenient_string_list<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_are_removed() {
        let raw = "```json\n{\"clusters\": []}\n```\n";
        assert_eq!(strip_json_fences(raw), "{\"clusters\": []}");
    }

    #[test]
    fn leading_number_reads_prefix() {
        assert_eq!(leading_number("10 marks"), Some(10.0));
        assert_eq!(leading_number(" 2.5"), Some(2.5));
        assert_eq!(leading_number("-3"), Some(-3.0));
        assert_eq!(leading_number("marks: 4"), None);
    }

    #[derive(Deserialize)]
    struct Probe {
        #[serde(default, deserialize_with = "lenient_opt_i32")]
        year: Option<i32>,
        #[serde(default, deserialize_with = "lenient_f64")]
        marks: f64,
        #[serde(default, deserialize_with = "lenient_string_list")]
        ids: Vec<String>,
    }

    #[test]
    fn lenient_fields_accept_strings_nulls_and_absence() {
        let probe: Probe =
            parse_json_envelope(r#"{"year": "2023", "marks": null, "ids": ["a", 7, null]}"#)
                .unwrap();
        assert_eq!(probe.year, Some(2023));
        assert_eq!(probe.marks, 0.0);
        assert_eq!(probe.ids, ["a", "7"]);

        let empty: Probe = parse_json_envelope("{}").unwrap();
        assert_eq!(empty.year, None);
        assert!(empty.ids.is_empty());
    }
}
