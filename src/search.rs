//! Keyword search over produced JSON
//!
//! Accepts a JSON array of records, an object holding `MFT`, `UsnJrnl` and
//! `LogFile` arrays, or JSON Lines. Matching is case-insensitive and looks at
//! every scalar value of a record, however deeply nested.

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use crate::error::Result;

pub enum Matcher {
    /// Lower-cased substring
    Keyword(String),
    Pattern(Regex),
}

impl Matcher {
    pub fn keyword(keyword: &str) -> Self {
        Matcher::Keyword(keyword.to_lowercase())
    }

    pub fn regex(pattern: &str) -> Result<Self> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Matcher::Pattern(regex))
    }

    pub fn is_match(&self, text: &str) -> bool {
        match self {
            Matcher::Keyword(k) => text.to_lowercase().contains(k.as_str()),
            Matcher::Pattern(r) => r.is_match(text),
        }
    }

    fn matches_value(&self, value: &Value) -> bool {
        match value {
            Value::Null => false,
            Value::String(s) => self.is_match(s),
            Value::Bool(b) => self.is_match(&b.to_string()),
            Value::Number(n) => self.is_match(&n.to_string()),
            Value::Array(items) => items.iter().any(|v| self.matches_value(v)),
            Value::Object(map) => map.values().any(|v| self.matches_value(v)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// Top-level key the record came from, if any
    pub section: Option<String>,
    pub index: usize,
    pub record: Value,
}

/// Records of `document` that contain a match
pub fn search_document(document: &Value, matcher: &Matcher) -> Vec<SearchHit> {
    let mut hits = Vec::new();
    match document {
        Value::Array(records) => collect(&mut hits, None, records, matcher),
        Value::Object(map) if map.values().any(Value::is_array) => {
            for (key, value) in map {
                if let Value::Array(records) = value {
                    collect(&mut hits, Some(key.as_str()), records, matcher);
                }
            }
        }
        other => {
            if matcher.matches_value(other) {
                hits.push(SearchHit {
                    section: None,
                    index: 0,
                    record: other.clone(),
                });
            }
        }
    }
    hits
}

fn collect(hits: &mut Vec<SearchHit>, section: Option<&str>, records: &[Value], matcher: &Matcher) {
    for (index, record) in records.iter().enumerate() {
        if matcher.matches_value(record) {
            hits.push(SearchHit {
                section: section.map(str::to_string),
                index,
                record: record.clone(),
            });
        }
    }
}

/// Parse a JSON or JSON Lines file and search it
pub fn search_file(path: impl AsRef<Path>, matcher: &Matcher) -> Result<Vec<SearchHit>> {
    let bytes = std::fs::read(path.as_ref())?;
    let document = match serde_json::from_slice::<Value>(&bytes) {
        Ok(doc) => doc,
        Err(e) => {
            debug!("Not a single JSON document ({}), trying JSON Lines", e);
            let text = String::from_utf8_lossy(&bytes);
            let records = text
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(serde_json::from_str::<Value>)
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Value::Array(records)
        }
    };
    Ok(search_document(&document, matcher))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sections_and_nested_values() {
        let doc = json!({
            "MFT": [
                {"entry": 40, "path": "\\Users\\Bob\\Report.DOCX"},
                {"entry": 41, "file_names": [{"name": "other.txt"}]}
            ],
            "UsnJrnl": [{"file_name": "report.docx", "reasons": ["FILE_CREATE"]}],
            "LogFile": []
        });

        let hits = search_document(&doc, &Matcher::keyword("REPORT"));
        let found: Vec<(Option<&str>, usize)> =
            hits.iter().map(|h| (h.section.as_deref(), h.index)).collect();
        assert_eq!(found, vec![(Some("MFT"), 0), (Some("UsnJrnl"), 0)]);

        let nested = search_document(&doc, &Matcher::keyword("other"));
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].record["entry"], 41);
    }

    #[test]
    fn test_regex_and_numbers() {
        let doc = json!([{"usn": 1234, "name": "a.tmp"}, {"usn": 99, "name": "b.TMP"}]);
        assert_eq!(search_document(&doc, &Matcher::regex(r"\.tmp$").unwrap()).len(), 2);
        assert_eq!(search_document(&doc, &Matcher::keyword("123")).len(), 1);
        assert!(Matcher::regex("(unclosed").is_err());
    }

    #[test]
    fn test_jsonl_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usn.jsonl");
        std::fs::write(&path, "{\"file_name\":\"x.log\"}\n{\"file_name\":\"y.txt\"}\n").unwrap();
        let hits = search_file(&path, &Matcher::keyword(".log")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].index, 0);
    }
}
