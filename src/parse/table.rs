//! Table shape normalization (extractors disagree; the index does not)
//!
//! Every extractor reports tables differently: rendered HTML, header+rows,
//! or a preview. Normalization prefers HTML, then explicit rows, then the
//! preview, synthesizing whatever is missing, and derives the TSV and
//! Markdown renderings stored with the table body.

use crate::parse::RawTable;
use scraper::{Html, Selector};

/// Markdown rendering keeps at most this many data rows.
const MD_MAX_ROWS: usize = 30;

/// A table reduced to one canonical shape
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub tsv: String,
    pub md: String,
    pub html: String,
    pub n_rows: i64,
    pub n_cols: i64,
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn synthesize_html(header: &[String], rows: &[Vec<String>]) -> String {
    let mut html = String::from("<table><tr>");
    for h in header {
        html.push_str(&format!("<th>{}</th>", escape_html(h)));
    }
    html.push_str("</tr>");
    for row in rows {
        html.push_str("<tr>");
        for cell in row {
            html.push_str(&format!("<td>{}</td>", escape_html(cell)));
        }
        html.push_str("</tr>");
    }
    html.push_str("</table>");
    html
}

fn synthesize_header(n_cols: usize) -> Vec<String> {
    (1..=n_cols).map(|i| format!("col_{}", i)).collect()
}

/// Parse rendered table HTML: first `<tr>` is the header, the rest rows.
fn cells_from_html(html: &str) -> Option<(Vec<String>, Vec<Vec<String>>)> {
    let fragment = Html::parse_fragment(html);
    let tr = Selector::parse("tr").ok()?;
    let cell = Selector::parse("th, td").ok()?;

    let mut all_rows: Vec<Vec<String>> = Vec::new();
    for row in fragment.select(&tr) {
        let cells: Vec<String> = row
            .select(&cell)
            .map(|c| c.text().collect::<String>().trim().to_string())
            .collect();
        if !cells.is_empty() {
            all_rows.push(cells);
        }
    }

    if all_rows.is_empty() {
        return None;
    }
    let header = all_rows.remove(0);
    Some((header, all_rows))
}

fn derive_tsv(header: &[String], rows: &[Vec<String>]) -> String {
    let mut lines = vec![header.join("\t")];
    lines.extend(rows.iter().map(|r| r.join("\t")));
    lines.join("\n")
}

fn derive_md(header: &[String], rows: &[Vec<String>]) -> String {
    let mut md = format!("| {} |\n", header.join(" | "));
    md.push_str(&format!(
        "|{}\n",
        " --- |".repeat(header.len().max(1))
    ));
    for row in rows.iter().take(MD_MAX_ROWS) {
        md.push_str(&format!("| {} |\n", row.join(" | ")));
    }
    if rows.len() > MD_MAX_ROWS {
        md.push_str(&format!("| … {} more rows |\n", rows.len() - MD_MAX_ROWS));
    }
    md
}

/// Normalize one raw table into the canonical shape (algorithm T).
pub fn normalize_table(raw: &RawTable) -> NormalizedTable {
    let html_source = raw
        .html
        .clone()
        .or_else(|| raw.metadata.as_ref().and_then(|m| m.text_as_html.clone()));

    let (header, rows, html) = if let Some((header, rows)) =
        html_source.as_deref().and_then(cells_from_html)
    {
        let html = html_source.unwrap_or_default();
        (header, rows, html)
    } else if let Some(rows) = raw.rows.clone().filter(|r| !r.is_empty()) {
        let header = raw
            .header
            .clone()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| synthesize_header(rows[0].len()));
        let html = synthesize_html(&header, &rows);
        (header, rows, html)
    } else if let Some(preview) = raw.preview_rows.clone().filter(|r| !r.is_empty()) {
        let mut preview = preview;
        let header = preview.remove(0);
        let html = synthesize_html(&header, &preview);
        (header, preview, html)
    } else {
        // Nothing usable: keep the stub so the asset still gets recorded.
        (Vec::new(), Vec::new(), String::new())
    };

    let n_rows = raw.n_rows.unwrap_or(rows.len() as i64);
    let n_cols = raw.n_cols.unwrap_or(header.len() as i64);
    let tsv = derive_tsv(&header, &rows);
    let md = derive_md(&header, &rows);

    NormalizedTable {
        header,
        rows,
        tsv,
        md,
        html,
        n_rows,
        n_cols,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::RawTableMeta;

    #[test]
    fn test_html_first() {
        let raw = RawTable {
            html: Some(
                "<table><tr><th>지역</th><th>매출</th></tr><tr><td>서울</td><td>1,200</td></tr></table>"
                    .to_string(),
            ),
            ..Default::default()
        };
        let table = normalize_table(&raw);
        assert_eq!(table.header, vec!["지역", "매출"]);
        assert_eq!(table.rows, vec![vec!["서울".to_string(), "1,200".to_string()]]);
        assert_eq!(table.tsv, "지역\t매출\n서울\t1,200");
        assert_eq!(table.n_rows, 1);
        assert_eq!(table.n_cols, 2);
    }

    #[test]
    fn test_text_as_html_metadata_fallback() {
        let raw = RawTable {
            metadata: Some(RawTableMeta {
                text_as_html: Some("<table><tr><td>h</td></tr><tr><td>v</td></tr></table>".to_string()),
            }),
            ..Default::default()
        };
        let table = normalize_table(&raw);
        assert_eq!(table.header, vec!["h"]);
        assert_eq!(table.rows, vec![vec!["v".to_string()]]);
    }

    #[test]
    fn test_rows_with_synthesized_header() {
        let raw = RawTable {
            rows: Some(vec![
                vec!["a".to_string(), "b".to_string()],
                vec!["c".to_string(), "d".to_string()],
            ]),
            ..Default::default()
        };
        let table = normalize_table(&raw);
        assert_eq!(table.header, vec!["col_1", "col_2"]);
        assert_eq!(table.rows.len(), 2);
        assert!(table.html.starts_with("<table><tr><th>col_1</th>"));
    }

    #[test]
    fn test_preview_rows_first_row_is_header() {
        let raw = RawTable {
            preview_rows: Some(vec![
                vec!["h1".to_string()],
                vec!["v1".to_string()],
                vec!["v2".to_string()],
            ]),
            ..Default::default()
        };
        let table = normalize_table(&raw);
        assert_eq!(table.header, vec!["h1"]);
        assert_eq!(table.rows.len(), 2);
    }

    #[test]
    fn test_markdown_truncated_at_30_rows() {
        let rows: Vec<Vec<String>> = (0..40).map(|i| vec![format!("r{}", i)]).collect();
        let raw = RawTable {
            header: Some(vec!["h".to_string()]),
            rows: Some(rows),
            ..Default::default()
        };
        let table = normalize_table(&raw);
        let data_lines = table
            .md
            .lines()
            .filter(|l| l.starts_with("| r"))
            .count();
        assert_eq!(data_lines, 30);
        assert!(table.md.contains("10 more rows"));
        // TSV keeps everything
        assert_eq!(table.tsv.lines().count(), 41);
    }

    #[test]
    fn test_hint_counts_win() {
        let raw = RawTable {
            n_rows: Some(120),
            n_cols: Some(7),
            ..Default::default()
        };
        let table = normalize_table(&raw);
        assert_eq!(table.n_rows, 120);
        assert_eq!(table.n_cols, 7);
        assert!(table.header.is_empty());
    }
}
