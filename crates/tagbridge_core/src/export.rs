use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use log::{debug, info};
use quick_xml::{Error as XmlError, Reader};
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};

/// One saved article from the Pocket export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceRecord {
    pub url: String,
    pub tags: Vec<String>,
    /// Final URL after following redirects; empty until the redirect pass has run
    /// for this record, and empty again if resolution failed.
    pub resolved_url: String,
    pub matched_target_id: Option<i64>,
}

impl SourceRecord {
    pub fn new(url: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            url: url.into(),
            tags,
            ..Self::default()
        }
    }

    pub fn is_matched(&self) -> bool {
        self.matched_target_id.is_some()
    }
}

pub fn load_pocket_export(path: &Path) -> Result<Vec<SourceRecord>> {
    info!("reading {}", path.display());
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read Pocket export {}", path.display()))?;
    let records = parse_pocket_export(&content)
        .with_context(|| format!("failed to parse Pocket export {}", path.display()))?;
    info!("read {} pocket items from file", records.len());
    Ok(records)
}

/// Scan an export document for `<a>` start tags. Each anchor becomes one record,
/// in document order; only `href` and `tags` are read.
///
/// Text that is fine in HTML but not in XML (a bare `&` in a title) is skipped
/// over. Only an error that leaves the reader where it was is fatal.
pub fn parse_pocket_export(content: &str) -> Result<Vec<SourceRecord>> {
    let mut reader = Reader::from_str(content);
    let config = reader.config_mut();
    config.check_end_names = false;
    config.allow_unmatched_ends = true;

    let mut records = Vec::new();
    loop {
        let before = reader.buffer_position();
        match reader.read_event() {
            Ok(Event::Start(elem)) | Ok(Event::Empty(elem)) => {
                if elem.name().as_ref().eq_ignore_ascii_case(b"a") {
                    let record = anchor_record(&elem);
                    debug!("anchor {} tags={}", record.url, record.tags.join(","));
                    records.push(record);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(
                error @ (XmlError::IllFormed(_) | XmlError::Escape(_) | XmlError::Encoding(_)),
            ) if reader.buffer_position() > before => {
                debug!(
                    "skipping malformed markup at position {}: {error}",
                    reader.error_position()
                );
            }
            Err(error) => bail!(
                "markup error at position {}: {error}",
                reader.error_position()
            ),
        }
    }
    Ok(records)
}

fn anchor_record(elem: &BytesStart<'_>) -> SourceRecord {
    let mut record = SourceRecord::default();
    let mut attributes = elem.html_attributes();
    attributes.with_checks(false);
    for attribute in attributes.flatten() {
        let key = attribute.key.as_ref();
        if key.eq_ignore_ascii_case(b"href") {
            record.url = decode_attribute(&attribute.value);
        } else if key.eq_ignore_ascii_case(b"tags") {
            record.tags = split_tags(&decode_attribute(&attribute.value));
        }
    }
    record
}

fn decode_attribute(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    match unescape(&text) {
        Ok(value) => value.into_owned(),
        // Unknown HTML entities (e.g. `&nbsp;`) are left as written.
        Err(_) => text.into_owned(),
    }
}

pub fn split_tags(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter(|tag| !tag.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{load_pocket_export, parse_pocket_export, split_tags};

    const EXPORT: &str = r#"<!DOCTYPE html>
<html>
	<!--So long and thanks for all the fish-->
	<head>
		<meta http-equiv="Content-Type" content="text/html; charset=UTF-8">
		<title>Pocket Export</title>
	</head>
	<body>
		<h1>Unread</h1>
		<ul>
			<li><a href="https://www.example.com/a/?utm_source=x" time_added="1510000000" tags="rust,systems">Article A</a></li>
			<li><a href="http://example.org/b" time_added="1510000001" tags="">Article B</a></li>
			<li><a href="https://example.net/c?x=1&amp;y=2" time_added="1510000002" tags="reading">Article C &amp; more</a></li>
		</ul>

		<h1>Read Archive</h1>
		<ul>
			<li><a href="https://example.com/d" time_added="1510000003">Article D</a></li>
		</ul>
	</body>
</html>
"#;

    #[test]
    fn parses_anchors_in_document_order() {
        let records = parse_pocket_export(EXPORT).expect("parse");
        let urls: Vec<&str> = records.iter().map(|record| record.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://www.example.com/a/?utm_source=x",
                "http://example.org/b",
                "https://example.net/c?x=1&y=2",
                "https://example.com/d",
            ]
        );
        assert_eq!(records[0].tags, vec!["rust", "systems"]);
        assert!(records[1].tags.is_empty());
        assert_eq!(records[2].tags, vec!["reading"]);
        assert!(records[3].tags.is_empty());
        assert!(records.iter().all(|record| record.resolved_url.is_empty()));
        assert!(records.iter().all(|record| !record.is_matched()));
    }

    #[test]
    fn anchor_without_href_still_yields_record() {
        let records =
            parse_pocket_export("<ul><li><a name=\"top\" tags=\"x\">no link</a></li></ul>")
                .expect("parse");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].url, "");
        assert_eq!(records[0].tags, vec!["x"]);
    }

    #[test]
    fn attribute_names_are_case_insensitive() {
        let records =
            parse_pocket_export("<A HREF=\"https://example.com\" TAGS=\"one,two\">x</A>")
                .expect("parse");
        assert_eq!(records[0].url, "https://example.com");
        assert_eq!(records[0].tags, vec!["one", "two"]);
    }

    #[test]
    fn bare_ampersand_in_title_does_not_stop_the_scan() {
        let records = parse_pocket_export(
            "<ul>\n<li><a href=\"https://a.example/q\" tags=\"x\">Q & A</a></li>\n<li><a href=\"https://a.example/att\">AT&T: Q&A with Rust</a></li>\n<li><a href=\"https://a.example/after\" tags=\"y,z\">after</a></li>\n</ul>",
        )
        .expect("parse");
        let urls: Vec<&str> = records.iter().map(|record| record.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://a.example/q",
                "https://a.example/att",
                "https://a.example/after",
            ]
        );
        assert_eq!(records[0].tags, vec!["x"]);
        assert_eq!(records[2].tags, vec!["y", "z"]);
    }

    #[test]
    fn split_tags_keeps_order_and_drops_empty_items() {
        assert_eq!(split_tags("b,a,,c"), vec!["b", "a", "c"]);
        assert!(split_tags("").is_empty());
    }

    #[test]
    fn load_reports_missing_file_path() {
        let temp = tempdir().expect("tempdir");
        let missing = temp.path().join("ril_export.html");
        let error = load_pocket_export(&missing).expect_err("must fail");
        assert!(error.to_string().contains("failed to read Pocket export"));

        fs::write(&missing, EXPORT).expect("write export");
        let records = load_pocket_export(&missing).expect("load");
        assert_eq!(records.len(), 4);
    }
}
