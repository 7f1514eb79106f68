//! HWPX extraction
//!
//! HWPX is a ZIP container with one XML file per section under
//! `Contents/`. Text lives in `<hp:t>` runs; paragraphs close with
//! `</hp:p>`; tables are `<hp:tbl>` elements. The corpus reads small XML
//! documents by scanning, not with an XML parser, and these sections are
//! flat enough for that to hold.

use crate::error::{Error, Result};
use crate::parse::{ParsedSource, RawTable};
use std::io::{Cursor, Read};

fn unescape_xml(input: &str) -> String {
    input
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Pull text runs and table counts out of one section document.
fn scan_section(xml: &str, out: &mut String, table_count: &mut usize) {
    for chunk in xml.split('<').skip(1) {
        let Some(gt) = chunk.find('>') else { continue };
        let tag = &chunk[..gt];
        let after = &chunk[gt + 1..];
        let self_closing = tag.ends_with('/');
        let name = tag
            .trim_end_matches('/')
            .split_whitespace()
            .next()
            .unwrap_or("");

        match name {
            "hp:t" if !self_closing => out.push_str(&unescape_xml(after)),
            "/hp:p" => out.push('\n'),
            "hp:tbl" => *table_count += 1,
            _ => {}
        }
    }
}

/// Open an HWPX container and aggregate its section text plus one minimal
/// table stub per detected table element.
pub fn extract_hwpx(bytes: &[u8]) -> Result<ParsedSource> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| Error::Parse(format!("unreadable HWPX container: {}", e)))?;

    let mut section_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("Contents/section") && n.ends_with(".xml"))
        .map(|n| n.to_string())
        .collect();
    section_names.sort();

    if section_names.is_empty() {
        return Err(Error::Parse(
            "HWPX container has no Contents/section*.xml".to_string(),
        ));
    }

    let mut text = String::new();
    let mut table_count = 0usize;

    for name in &section_names {
        let mut file = archive
            .by_name(name)
            .map_err(|e| Error::Parse(format!("cannot open {}: {}", name, e)))?;
        let mut xml = String::new();
        file.read_to_string(&mut xml)
            .map_err(|e| Error::Parse(format!("cannot read {}: {}", name, e)))?;
        scan_section(&xml, &mut text, &mut table_count);
    }

    let tables = (0..table_count)
        .map(|_| RawTable {
            source: Some("hwpx".to_string()),
            ..Default::default()
        })
        .collect();

    Ok(ParsedSource {
        text,
        tables,
        pictures: Vec::new(),
        engine: "hwpx-zip".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_hwpx(sections: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options = SimpleFileOptions::default();
            for (name, body) in sections {
                writer.start_file(name.to_string(), options).unwrap();
                writer.write_all(body.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn test_extracts_text_and_paragraphs() {
        let xml = r#"<hs:sec xmlns:hp="x"><hp:p><hp:run><hp:t>첫 문단</hp:t></hp:run></hp:p><hp:p><hp:run><hp:t>둘째 &amp; 셋째</hp:t></hp:run></hp:p></hs:sec>"#;
        let bytes = build_hwpx(&[("Contents/section0.xml", xml)]);

        let parsed = extract_hwpx(&bytes).unwrap();
        assert_eq!(parsed.text, "첫 문단\n둘째 & 셋째\n");
        assert!(parsed.tables.is_empty());
        assert_eq!(parsed.engine, "hwpx-zip");
    }

    #[test]
    fn test_counts_tables() {
        let xml = r#"<hs:sec><hp:tbl rows="2"><hp:tr/></hp:tbl><hp:tbl></hp:tbl></hs:sec>"#;
        let bytes = build_hwpx(&[("Contents/section0.xml", xml)]);

        let parsed = extract_hwpx(&bytes).unwrap();
        assert_eq!(parsed.tables.len(), 2);
        assert_eq!(parsed.tables[0].source.as_deref(), Some("hwpx"));
    }

    #[test]
    fn test_sections_concatenate_in_order() {
        let bytes = build_hwpx(&[
            ("Contents/section1.xml", "<hp:p><hp:t>second</hp:t></hp:p>"),
            ("Contents/section0.xml", "<hp:p><hp:t>first</hp:t></hp:p>"),
            ("Contents/header.xml", "<hp:t>ignored</hp:t>"),
        ]);

        let parsed = extract_hwpx(&bytes).unwrap();
        assert_eq!(parsed.text, "first\nsecond\n");
    }

    #[test]
    fn test_unreadable_zip_is_parse_error() {
        assert!(matches!(
            extract_hwpx(b"not a zip"),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_zip_without_sections_is_parse_error() {
        let bytes = build_hwpx(&[("mimetype", "application/hwp+zip")]);
        assert!(matches!(extract_hwpx(&bytes), Err(Error::Parse(_))));
    }

    #[test]
    fn test_self_closing_runs_ignored() {
        let xml = r#"<hp:p><hp:t/><hp:t>실제 내용</hp:t></hp:p>"#;
        let bytes = build_hwpx(&[("Contents/section0.xml", xml)]);
        let parsed = extract_hwpx(&bytes).unwrap();
        assert_eq!(parsed.text, "실제 내용\n");
    }
}
