//! Specialization logic for MDict file types (.mdx vs .mdd).

use std::fmt;
use std::path::PathBuf;

use encoding_rs::{Encoding, UTF_16LE};

use super::error::Result;
use super::models::MdictHeader;
use crate::mdict::format::content;

/// A trait that defines the behavior of a specific MDict file type (MDX or MDD).
pub trait FileType {
    /// A short name used for debugging and logging.
    const DEBUG_NAME: &'static str;

    /// The key type yielded alongside each record.
    type Key;

    /// The type of record data contained in this file.
    /// - `String` for MDX files.
    /// - `Vec<u8>` for MDD files.
    type Record;

    /// The mandatory encoding for this file type, if any.
    ///
    /// - `None`: Use the caller's override or the encoding in the header. (MDX behavior)
    /// - `Some(encoding)`: Always use this encoding. (MDD behavior)
    const ENCODING_OVERRIDE: Option<&'static Encoding>;

    fn process_key(text: &str) -> Self::Key;

    /// Processes one record's raw payload slice into the final record type.
    fn process_record(bytes: &[u8], header: &MdictHeader, substitute_styles: bool) -> Result<Self::Record>;
}

/// Zero-cost marker struct for MDX files.
#[derive(Debug)]
pub struct Mdx;

impl FileType for Mdx {
    const DEBUG_NAME: &'static str = "MDX";
    type Key = String;
    type Record = String;
    const ENCODING_OVERRIDE: Option<&'static Encoding> = None;

    fn process_key(text: &str) -> Self::Key {
        text.to_string()
    }

    fn process_record(bytes: &[u8], header: &MdictHeader, substitute_styles: bool) -> Result<Self::Record> {
        let text = content::decode_record_text(bytes, header.encoding);
        if substitute_styles && !header.stylesheet.is_empty() {
            return Ok(content::substitute_stylesheet(&text, &header.stylesheet));
        }
        Ok(text)
    }
}

/// Zero-cost marker struct for MDD files.
#[derive(Debug)]
pub struct Mdd;

impl FileType for Mdd {
    const DEBUG_NAME: &'static str = "MDD";
    type Key = ResourceName;
    type Record = Vec<u8>;
    const ENCODING_OVERRIDE: Option<&'static Encoding> = Some(UTF_16LE);

    fn process_key(text: &str) -> Self::Key {
        ResourceName(text.to_string())
    }

    fn process_record(bytes: &[u8], _header: &MdictHeader, _substitute_styles: bool) -> Result<Self::Record> {
        Ok(bytes.to_vec())
    }
}

/// The key of a resource entry, a path-like name such as `\images\a.png`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceName(pub String);

impl ResourceName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Converts the name into a relative path, splitting on both separators.
    ///
    /// Empty, `.` and `..` components are dropped so the result never leaves
    /// the directory it is joined onto.
    pub fn to_relative_path(&self) -> PathBuf {
        self.0
            .split(['\\', '/'])
            .filter(|part| !part.is_empty() && *part != "." && *part != "..")
            .collect()
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
