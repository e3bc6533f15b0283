//! Reconstruction of file text from Gitiles' line-numbered HTML view.
//!
//! Gitiles does not serve raw bytes for a path, only a page with a
//! `<table class="FileContents">` holding one row per source line. Each
//! line's markup sits in a `<td id="N">` cell. Joining the text of those
//! cells with newlines recovers the file. Binary files cannot be recovered
//! this way.

use crate::Result;
use ohno::bail;
use quick_xml::Reader;
use quick_xml::events::Event;
use std::borrow::Cow;

const TABLE_MARKER: &str = "FileContents";
const TABLE_END: &str = "</table>";

/// Cut the `FileContents` table out of the full page.
///
/// The rest of the page is HTML5 rather than XML (scripts, void elements),
/// so only the table itself is handed to the XML reader.
fn file_table(html: &str) -> Option<&str> {
    let mut search_from = 0;
    while let Some(offset) = html.get(search_from..)?.find("<table") {
        let start = search_from + offset;
        let tag_end = start + html.get(start..)?.find('>')?;
        if html.get(start..tag_end)?.contains(TABLE_MARKER) {
            let end = tag_end + html.get(tag_end..)?.find(TABLE_END)? + TABLE_END.len();
            return html.get(start..end);
        }
        search_from = tag_end;
    }
    None
}

fn has_id_attribute(element: &quick_xml::events::BytesStart<'_>) -> bool {
    element
        .html_attributes()
        .with_checks(false)
        .filter_map(core::result::Result::ok)
        .any(|attribute| attribute.key.as_ref() == b"id")
}

/// Recover the original text of a file from its rendered Gitiles page.
pub fn extract_file_text(html: &str) -> Result<String> {
    let Some(table) = file_table(html) else {
        bail!("page does not contain a file contents table");
    };

    let mut reader = Reader::from_str(table);
    let config = reader.config_mut();
    config.check_end_names = false;
    config.allow_unmatched_ends = true;

    let mut lines = Vec::new();
    let mut current: Option<String> = None;
    let mut depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => {
                if current.is_some() {
                    depth += 1;
                } else if element.local_name().as_ref() == b"td" && has_id_attribute(&element) {
                    current = Some(String::new());
                    depth = 0;
                }
            }
            Ok(Event::Text(text)) => {
                if let Some(line) = current.as_mut() {
                    let decoded = text.unescape().unwrap_or_else(|_| Cow::Owned(String::from_utf8_lossy(&text).into_owned()));
                    line.push_str(&decoded);
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(line) = current.as_mut() {
                    line.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Ok(Event::End(_)) => {
                if current.is_some() {
                    if depth == 0 {
                        lines.extend(current.take());
                    } else {
                        depth -= 1;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => bail!("malformed file contents table at byte {}: {e}", reader.buffer_position()),
        }
    }

    Ok(lines.join("\n"))
}
