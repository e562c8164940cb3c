//! # Block Content Parsing
//!
//! Turns decompressed block bytes into structured data:
//! 1.  **Key blocks**: split into `KeyEntry` records (offset + NUL-terminated text).
//! 2.  **Record text**: decoded from the document encoding with NUL padding removed.
//! 3.  **Stylesheet substitution**: expands `` `N` `` markers with header-declared
//!     prefix/suffix pairs.

use std::sync::OnceLock;

use encoding_rs::Encoding;
use log::{trace, warn};
use regex::Regex;

use crate::mdict::types::error::{MdictError, Result};
use crate::mdict::types::models::{KeyEntry, StyleSheet};
use crate::mdict::utils;

static STYLE_MARKER: OnceLock<Regex> = OnceLock::new();

/// Matches backtick-delimited style ids like `` `1` `` or `` `42` ``.
fn style_marker() -> &'static Regex {
    STYLE_MARKER.get_or_init(|| Regex::new(r"`(\d+)`").expect("style marker pattern is valid"))
}

/// Splits a decompressed key block into its entries.
///
/// Each entry is a `number_width` record offset followed by key text ending in
/// one NUL unit (two bytes, aligned to the text start, for UTF-16).
pub fn split_key_block(
    data: &[u8],
    number_width: usize,
    encoding: &'static Encoding,
) -> Result<Vec<KeyEntry>> {
    let unit = utils::unit_width(encoding);
    let mut entries = Vec::new();
    let mut reader = data;

    while !reader.is_empty() {
        let offset = utils::read_number(&mut reader, number_width)?;
        let end = reader
            .chunks(unit)
            .position(|chunk| chunk.len() == unit && chunk.iter().all(|&b| b == 0))
            .map(|units| units * unit)
            .ok_or_else(|| {
                MdictError::InvalidFormat(format!("Key text at record offset {offset} has no terminator"))
            })?;
        let text = utils::decode_text(&reader[..end], encoding);
        entries.push(KeyEntry {
            offset,
            text: text.trim_matches('\0').to_string(),
        });
        reader = &reader[end + unit..];
    }

    trace!("Split key block into {} entries", entries.len());
    Ok(entries)
}

/// Decodes a dictionary record slice into UTF-8 text without NUL padding.
pub fn decode_record_text(bytes: &[u8], encoding: &'static Encoding) -> String {
    let text = utils::decode_text(bytes, encoding);
    text.trim_matches('\0').to_string()
}

/// Expands style markers using the header's stylesheet.
///
/// The text is split at each marker; the segment following a marker is wrapped
/// in that style's prefix and suffix. A segment ending in a newline has its
/// trailing whitespace moved outside the suffix and replaced with `\r\n`.
/// Unknown style ids wrap with empty strings.
pub fn substitute_stylesheet(text: &str, stylesheet: &StyleSheet) -> String {
    let re = style_marker();
    let mut result = String::with_capacity(text.len());
    let mut pending: Option<&str> = None;
    let mut last = 0;

    for caps in re.captures_iter(text) {
        let Some(marker) = caps.get(0) else { continue };
        push_segment(&mut result, &text[last..marker.start()], pending, stylesheet);
        pending = caps.get(1).map(|id| id.as_str());
        last = marker.end();
    }
    push_segment(&mut result, &text[last..], pending, stylesheet);
    result
}

fn push_segment(out: &mut String, segment: &str, style_id: Option<&str>, stylesheet: &StyleSheet) {
    let Some(id) = style_id else {
        out.push_str(segment);
        return;
    };
    let (prefix, suffix) = match stylesheet.get(id) {
        Some((prefix, suffix)) => (prefix.as_str(), suffix.as_str()),
        None => {
            warn!("Record references unknown style id `{id}`");
            ("", "")
        }
    };
    out.push_str(prefix);
    if segment.ends_with('\n') {
        out.push_str(segment.trim_end());
        out.push_str(suffix);
        out.push_str("\r\n");
    } else {
        out.push_str(segment);
        out.push_str(suffix);
    }
}
