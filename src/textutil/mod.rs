//! Text utilities shared by extraction and indexing
//!
//! Cleanup of extracted prose (ligatures, zero-width characters, stray
//! whitespace), numeric cell parsing, and deterministic row sentences.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\d.,+-]+)\s*([A-Za-z%]*)$").unwrap());

static MULTI_BLANK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Normalize extracted prose before chunking and embedding.
///
/// Folds common PDF ligatures, strips zero-width characters, converts
/// full-width ASCII to half-width, and collapses runs of blank lines.
pub fn clean_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());

    for ch in input.chars() {
        match ch {
            'ﬁ' => out.push_str("fi"),
            'ﬂ' => out.push_str("fl"),
            'ﬀ' => out.push_str("ff"),
            'ﬃ' => out.push_str("ffi"),
            'ﬄ' => out.push_str("ffl"),
            '\u{2018}' | '\u{2019}' => out.push('\''),
            '\u{201C}' | '\u{201D}' => out.push('"'),
            '\u{00A0}' => out.push(' '),
            // Zero-width space/joiner/non-joiner and BOM
            '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}' => {}
            '\r' => {}
            // Full-width ASCII block
            '\u{FF01}'..='\u{FF5E}' => {
                let half = (ch as u32 - 0xFF01 + 0x21) as u8 as char;
                out.push(half);
            }
            '\u{3000}' => out.push(' '),
            other => out.push(other),
        }
    }

    let mut cleaned: String = out
        .lines()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n");
    cleaned = MULTI_BLANK_RE.replace_all(&cleaned, "\n\n").into_owned();
    cleaned.trim().to_string()
}

/// A parsed table cell: numeric value and unit when recognized, raw always.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedCell {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub raw: String,
}

/// Parse one cell into `{value?, unit?, raw}`.
pub fn normalize_cell(raw: &str) -> NormalizedCell {
    let trimmed = raw.trim();
    if let Some(caps) = CELL_RE.captures(trimmed) {
        let number = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let unit = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let value = number.replace(',', "").parse::<f64>().ok();
        return NormalizedCell {
            value,
            unit: if unit.is_empty() {
                None
            } else {
                Some(unit.to_string())
            },
            raw: trimmed.to_string(),
        };
    }
    NormalizedCell {
        value: None,
        unit: None,
        raw: trimmed.to_string(),
    }
}

/// Render a table row as the deterministic sentence that gets embedded.
///
/// Shape: `Table: {caption} | H1={v1}; H2={v2}; …` — byte-identical output
/// for identical input so re-ingestion produces identical fragments.
pub fn row_sentence(caption: &str, headers: &[String], values: &[String]) -> String {
    let caption = caption.trim();
    let mut out = String::from("Table: ");
    out.push_str(if caption.is_empty() { "-" } else { caption });
    out.push_str(" | ");

    let pairs: Vec<String> = headers
        .iter()
        .zip(values.iter())
        .map(|(h, v)| format!("{}={}", h.trim(), v.trim()))
        .collect();
    out.push_str(&pairs.join("; "));
    out
}

/// Normalize the cells of one row into sidecar records.
pub fn normalize_row(values: &[String]) -> Vec<NormalizedCell> {
    values.iter().map(|v| normalize_cell(v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_ligatures_and_quotes() {
        assert_eq!(clean_text("ﬁle ﬂow"), "file flow");
        assert_eq!(clean_text("\u{201C}ok\u{201D}"), "\"ok\"");
    }

    #[test]
    fn test_clean_text_fullwidth_and_blanks() {
        assert_eq!(clean_text("ＡＢＣ１２３"), "ABC123");
        assert_eq!(clean_text("a\n\n\n\nb"), "a\n\nb");
        assert_eq!(clean_text("a\u{200B}b\u{00A0}c"), "ab c");
    }

    #[test]
    fn test_clean_text_keeps_korean() {
        assert_eq!(clean_text("  검색 증강 생성  "), "검색 증강 생성");
    }

    #[test]
    fn test_normalize_cell_value_and_unit() {
        let cell = normalize_cell("1,234.5 kg");
        assert_eq!(cell.value, Some(1234.5));
        assert_eq!(cell.unit.as_deref(), Some("kg"));
        assert_eq!(cell.raw, "1,234.5 kg");

        let pct = normalize_cell("85%");
        assert_eq!(pct.value, Some(85.0));
        assert_eq!(pct.unit.as_deref(), Some("%"));
    }

    #[test]
    fn test_normalize_cell_non_numeric() {
        let cell = normalize_cell("서울특별시");
        assert_eq!(cell.value, None);
        assert_eq!(cell.unit, None);
        assert_eq!(cell.raw, "서울특별시");
    }

    #[test]
    fn test_row_sentence_deterministic() {
        let headers = vec!["지역".to_string(), "매출".to_string()];
        let values = vec!["서울".to_string(), "1,200".to_string()];
        let a = row_sentence("분기 실적", &headers, &values);
        let b = row_sentence("분기 실적", &headers, &values);
        assert_eq!(a, b);
        assert_eq!(a, "Table: 분기 실적 | 지역=서울; 매출=1,200");
    }

    #[test]
    fn test_row_sentence_empty_caption() {
        let headers = vec!["col_1".to_string()];
        let values = vec!["x".to_string()];
        assert_eq!(row_sentence("", &headers, &values), "Table: - | col_1=x");
    }
}
