//! Core data structures for MDict container components.
//!
//! This module defines the fundamental types used throughout the library:
//! - The parsed header and its derived settings
//! - Block and key entry information
//! - Generation, compression and encryption enumerations

use std::collections::HashMap;
use std::fmt;

use encoding_rs::Encoding;

use super::error::{MdictError, Result};

/// Style id → (prefix, suffix) table declared in the header.
pub type StyleSheet = HashMap<String, (String, String)>;

/// The two engine-version generations of the container layout.
///
/// Engine versions below 2.0 use 4-byte integers and an uncompressed key
/// index; 2.x uses 8-byte integers, a compressed key index and an extra
/// checksum after the key section header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineGeneration {
    V1,
    V2,
}

impl EngineGeneration {
    /// Width in bytes of counts, sizes and offsets.
    pub fn number_width(&self) -> usize {
        match self {
            EngineGeneration::V1 => 4,
            EngineGeneration::V2 => 8,
        }
    }

    /// Width in bytes of the text length prefixes in the key index.
    pub fn small_number_width(&self) -> usize {
        match self {
            EngineGeneration::V1 => 1,
            EngineGeneration::V2 => 2,
        }
    }

    /// Number of terminator units following each head/tail text in the key index.
    pub fn text_terminator_units(&self) -> usize {
        match self {
            EngineGeneration::V1 => 0,
            EngineGeneration::V2 => 1,
        }
    }

    /// Size of the numeric block opening the key section (without checksum).
    pub fn key_section_header_len(&self) -> usize {
        match self {
            EngineGeneration::V1 => 4 * self.number_width(),
            EngineGeneration::V2 => 5 * self.number_width(),
        }
    }

    /// Whether the numeric block opening the key section is followed by a checksum.
    pub fn has_key_section_checksum(&self) -> bool {
        *self == EngineGeneration::V2
    }
}

impl TryFrom<f32> for EngineGeneration {
    type Error = MdictError;
    fn try_from(v: f32) -> Result<Self> {
        if v < 2.0 {
            Ok(Self::V1)
        } else if v < 3.0 {
            Ok(Self::V2)
        } else {
            Err(MdictError::UnsupportedVersion(v))
        }
    }
}

/// Encryption bitmask from the header `Encrypted` attribute.
///
/// - Bit 0x01: the key section's numeric header is encrypted with a passcode key
/// - Bit 0x02: the key index block is encrypted with a checksum-derived key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncryptionFlags(u8);

impl EncryptionFlags {
    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn key_section_header(&self) -> bool {
        self.0 & 0x01 != 0
    }

    pub fn key_index(&self) -> bool {
        self.0 & 0x02 != 0
    }

    /// Parses the attribute: absent or `No` is 0, `Yes` is 1, anything else an integer.
    pub fn parse(value: Option<&str>) -> Result<Self> {
        match value.map(str::trim) {
            None | Some("No") => Ok(Self(0)),
            Some("Yes") => Ok(Self(1)),
            Some(other) => other
                .parse::<u8>()
                .map(Self)
                .map_err(|_| MdictError::InvalidFormat(format!("Invalid 'Encrypted' attribute: {other:?}"))),
        }
    }
}

/// Which identifier the registration code was issued against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterBy {
    /// Email address; hashed as UTF-16LE.
    Email,
    /// Device id; hashed as its raw bytes.
    DeviceId,
}

impl RegisterBy {
    pub fn from_attribute(value: Option<&str>) -> Self {
        match value {
            Some("EMail") => RegisterBy::Email,
            _ => RegisterBy::DeviceId,
        }
    }
}

/// Registration credentials used to unlock files with encryption bit 0 set.
#[derive(Clone, PartialEq, Eq)]
pub struct Passcode {
    pub reg_code: Vec<u8>,
    pub user_id: String,
}

impl Passcode {
    pub fn new(reg_code: impl Into<Vec<u8>>, user_id: impl Into<String>) -> Self {
        Self {
            reg_code: reg_code.into(),
            user_id: user_id.into(),
        }
    }

    /// Builds a passcode from a hex registration code, as printed on registration slips.
    pub fn from_hex(reg_code_hex: &str, user_id: impl Into<String>) -> Result<Self> {
        let reg_code = hex::decode(reg_code_hex.trim())
            .map_err(|e| MdictError::DecryptionError(format!("Invalid regcode hex: {e}")))?;
        Ok(Self::new(reg_code, user_id))
    }
}

impl fmt::Debug for Passcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Passcode")
            .field("reg_code", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Complete parsed header of a container.
///
/// Derived settings are computed once at open time and never change
/// afterwards; `encoding` already reflects any override.
#[derive(Debug, Clone)]
pub struct MdictHeader {
    pub attributes: HashMap<String, String>,
    pub engine_version: f32,
    pub generation: EngineGeneration,
    pub encoding: &'static Encoding,
    pub encryption: EncryptionFlags,
    pub register_by: RegisterBy,
    pub stylesheet: StyleSheet,
}

impl MdictHeader {
    pub fn title(&self) -> Option<&str> {
        self.attributes.get("Title").map(String::as_str)
    }

    pub fn description(&self) -> Option<&str> {
        self.attributes.get("Description").map(String::as_str)
    }

    pub fn engine_version(&self) -> f32 {
        self.engine_version
    }

    pub fn register_by(&self) -> RegisterBy {
        self.register_by
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// A dictionary key with the offset of its payload in the decompressed
/// record stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub offset: u64,
    pub text: String,
}

/// Sizes of one physical block in the key or record section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub compressed_size: u64,
    pub decompressed_size: u64,
}

/// Values from the numeric block opening the key section.
#[derive(Debug, Clone, Copy)]
pub struct KeySectionInfo {
    pub num_blocks: u64,
    pub num_entries: u64,
    /// Only present in v2.x.
    pub index_decompressed_len: Option<u64>,
    pub index_compressed_len: u64,
    pub key_blocks_len: u64,
}

/// Values from the numeric block opening the record section.
#[derive(Debug, Clone, Copy)]
pub struct RecordSectionInfo {
    pub num_blocks: u64,
    pub num_entries: u64,
    pub index_len: u64,
    pub blocks_len: u64,
}

/// Compression scheme of a tagged block.
///
/// Tags are compared as fixed byte patterns, never as integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Lzo,
    Zlib,
}

impl CompressionType {
    pub const NONE_TAG: [u8; 4] = [0x00, 0x00, 0x00, 0x00];
    pub const LZO_TAG: [u8; 4] = [0x01, 0x00, 0x00, 0x00];
    pub const ZLIB_TAG: [u8; 4] = [0x02, 0x00, 0x00, 0x00];

    pub fn from_tag(tag: &[u8]) -> Result<Self> {
        match tag {
            t if t == Self::NONE_TAG => Ok(Self::None),
            t if t == Self::LZO_TAG => Ok(Self::Lzo),
            t if t == Self::ZLIB_TAG => Ok(Self::Zlib),
            other => Err(MdictError::InvalidFormat(format!(
                "Unknown compression tag: {}",
                hex::encode(other)
            ))),
        }
    }

    pub fn tag(&self) -> [u8; 4] {
        match self {
            CompressionType::None => Self::NONE_TAG,
            CompressionType::Lzo => Self::LZO_TAG,
            CompressionType::Zlib => Self::ZLIB_TAG,
        }
    }
}

/// Region of the file a block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    /// The numeric block opening the key section.
    KeySectionHeader,
    /// The key block info (key index) metadata block.
    KeyIndex,
    KeyBlock,
    RecordBlock,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Section::KeySectionHeader => write!(f, "key section header"),
            Section::KeyIndex => write!(f, "key index"),
            Section::KeyBlock => write!(f, "key block"),
            Section::RecordBlock => write!(f, "record block"),
        }
    }
}

/// Identifies a block for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPosition {
    pub section: Section,
    pub index: usize,
}

impl BlockPosition {
    pub fn new(section: Section, index: usize) -> Self {
        Self { section, index }
    }
}

impl fmt::Display for BlockPosition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} #{}", self.section, self.index)
    }
}
