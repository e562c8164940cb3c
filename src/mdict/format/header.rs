//! MDict file header parsing.
//!
//! This module handles:
//! - Reading the length-prefixed UTF-16LE header and validating its checksum
//! - Extracting the `name="value"` attribute table
//! - Deriving the document-wide settings (generation, encoding, encryption, stylesheet)

use std::collections::HashMap;
use std::io::Read;
use std::sync::OnceLock;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use encoding_rs::{Encoding, UTF_16LE, UTF_8};
use log::{debug, info, trace, warn};
use regex::Regex;

use crate::mdict::types::error::{MdictError, Result};
use crate::mdict::types::models::{EncryptionFlags, EngineGeneration, MdictHeader, RegisterBy, StyleSheet};
use crate::mdict::utils;

static ATTRIBUTE_PATTERN: OnceLock<Regex> = OnceLock::new();

fn attribute_regex() -> &'static Regex {
    ATTRIBUTE_PATTERN.get_or_init(|| Regex::new(r#"(?s)(\w+)="(.*?)""#).expect("attribute pattern is valid"))
}

/// Parses the header at the start of a container.
///
/// # Header Structure
/// ```text
/// [4 bytes] Header length (big-endian u32)
/// [N bytes] Attribute markup, UTF-16LE, ending in \x00\x00
/// [4 bytes] Adler32 checksum of the raw N bytes (little-endian u32)
/// ```
///
/// `encoding_override` replaces the `Encoding` attribute when set.
///
/// Returns the header and the file offset of the key section.
pub fn parse<R: Read>(file: &mut R, encoding_override: Option<&'static Encoding>) -> Result<(MdictHeader, u64)> {
    let header_len = file.read_u32::<BigEndian>()?;
    trace!("Header length: {} bytes", header_len);

    let header_bytes = utils::read_bytes(file, u64::from(header_len))?;

    let expected = file.read_u32::<LittleEndian>()?;
    let actual = utils::adler_checksum(&header_bytes);
    trace!("Header checksum: expected={expected:#010x}, actual={actual:#010x}");
    if actual != expected {
        return Err(MdictError::HeaderCorrupt { expected, actual });
    }

    let header = parse_header_bytes(&header_bytes, encoding_override)?;
    info!(
        "Header parsed: engine={}, title={:?}, encoding={}, encrypted={:#04x}",
        header.engine_version,
        header.title().unwrap_or_default(),
        header.encoding.name(),
        header.encryption.bits()
    );
    Ok((header, 4 + u64::from(header_len) + 4))
}

/// Builds a header from its raw (checksum-verified) bytes.
pub fn parse_header_bytes(header_bytes: &[u8], encoding_override: Option<&'static Encoding>) -> Result<MdictHeader> {
    let text_bytes = header_bytes.strip_suffix(&[0, 0]).unwrap_or(header_bytes);
    let text = utils::decode_text(text_bytes, UTF_16LE);
    let attributes = parse_attributes(&text);
    debug!("Header declares {} attributes", attributes.len());

    let version_str = attributes
        .get("GeneratedByEngineVersion")
        .map(|s| s.trim())
        .unwrap_or("1.0");
    let engine_version: f32 = version_str.parse().map_err(|e| {
        MdictError::InvalidFormat(format!("Could not parse 'GeneratedByEngineVersion' {version_str:?}: {e}"))
    })?;
    let generation = EngineGeneration::try_from(engine_version)?;
    debug!("Engine version {engine_version} ({generation:?})");

    let encoding = match encoding_override {
        Some(encoding) => {
            debug!("Text encoding overridden to {}", encoding.name());
            encoding
        }
        None => attributes
            .get("Encoding")
            .map(|label| utils::parse_encoding(label))
            .unwrap_or(UTF_8),
    };

    let encryption = EncryptionFlags::parse(attributes.get("Encrypted").map(String::as_str))?;
    let register_by = RegisterBy::from_attribute(attributes.get("RegisterBy").map(String::as_str));
    let stylesheet = attributes
        .get("StyleSheet")
        .map(|raw| parse_stylesheet(raw))
        .unwrap_or_default();

    Ok(MdictHeader {
        attributes,
        engine_version,
        generation,
        encoding,
        encryption,
        register_by,
        stylesheet,
    })
}

/// Extracts every `name="value"` pair; values are entity-unescaped.
fn parse_attributes(text: &str) -> HashMap<String, String> {
    attribute_regex()
        .captures_iter(text)
        .map(|caps| (caps[1].to_string(), unescape_entities(&caps[2])))
        .collect()
}

fn unescape_entities(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

/// Reads the stylesheet as consecutive (id, prefix, suffix) line triples.
fn parse_stylesheet(raw: &str) -> StyleSheet {
    let lines: Vec<&str> = raw.lines().collect();
    let mut stylesheet = StyleSheet::new();
    for triple in lines.chunks(3) {
        match triple {
            [id, prefix, suffix] => {
                stylesheet.insert(id.to_string(), (prefix.to_string(), suffix.to_string()));
            }
            partial => warn!("Ignoring incomplete stylesheet entry {partial:?}"),
        }
    }
    debug!("Stylesheet has {} styles", stylesheet.len());
    stylesheet
}
