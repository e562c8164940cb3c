use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Mutex;

use log::info;

use super::codec::compression::BlockCodec;
use super::format::{header, keys, records};
use super::iter::EntryIterator;
use super::types::error::{MdictError, Result};
use super::types::filetypes::FileType;
use super::types::models::{KeyEntry, MdictHeader, Passcode};
use super::utils;

/// Options applied when opening a container.
#[derive(Debug, Clone, Default)]
pub struct ReaderOptions {
    /// Charset label replacing the header's `Encoding` (ignored for MDD).
    pub encoding: Option<String>,
    /// Credentials for files whose key section header is encrypted.
    pub passcode: Option<Passcode>,
    /// Expand stylesheet markers in MDX records.
    pub substitute_styles: bool,
    /// Decompressors available to the block codec.
    pub codec: BlockCodec,
}

impl ReaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encoding(mut self, label: impl Into<String>) -> Self {
        self.encoding = Some(label.into());
        self
    }

    pub fn with_passcode(mut self, passcode: Passcode) -> Self {
        self.passcode = Some(passcode);
        self
    }

    pub fn with_stylesheet_substitution(mut self, enabled: bool) -> Self {
        self.substitute_styles = enabled;
        self
    }

    pub fn with_codec(mut self, codec: BlockCodec) -> Self {
        self.codec = codec;
        self
    }
}

/// The main reader for MDict containers.
///
/// Parses both .mdx (dictionary) and .mdd (resource) files of engine
/// generations 1.x and 2.x. The header and the full key list are decoded at
/// open time; record blocks are only read while iterating.
#[derive(Debug)]
pub struct MdictReader<T: FileType> {
    file: Mutex<File>,
    header: MdictHeader,
    keys: Vec<KeyEntry>,
    /// Entry count the record section is checked against.
    key_section_entries: u64,
    record_section_offset: u64,
    codec: BlockCodec,
    substitute_styles: bool,
    recovered: bool,
    _file_type: PhantomData<T>,
}

impl<T: FileType> MdictReader<T> {
    /// Opens a container from the given path.
    ///
    /// Priority for determining text encoding (highest → lowest):
    /// 1. `FileType::ENCODING_OVERRIDE` (MDD forces UTF-16LE)
    /// 2. `options.encoding`
    /// 3. Encoding declared in the header, UTF-8 if absent
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be opened or is truncated
    /// - The header checksum fails or the engine version is 3.0 or newer
    /// - The key section is encrypted and no passcode was supplied
    /// - The key section is corrupt and cannot be recovered by scanning
    pub fn new(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening {} file: {}", T::DEBUG_NAME, path.display());
        let mut file = File::open(path)?;

        let encoding_override = T::ENCODING_OVERRIDE.or_else(|| options.encoding.as_deref().map(utils::parse_encoding));
        let (header, key_section_offset) = header::parse(&mut file, encoding_override)?;

        let key_section = keys::read(
            &mut file,
            &header,
            key_section_offset,
            options.passcode.as_ref(),
            &options.codec,
        )?;

        info!(
            "{} file opened: {} entries{}",
            T::DEBUG_NAME,
            key_section.entries.len(),
            if key_section.recovered { " (recovered by scan)" } else { "" }
        );

        Ok(Self {
            file: Mutex::new(file),
            header,
            keys: key_section.entries,
            key_section_entries: key_section.num_entries,
            record_section_offset: key_section.record_section_offset,
            codec: options.codec,
            substitute_styles: options.substitute_styles,
            recovered: key_section.recovered,
            _file_type: PhantomData,
        })
    }

    /// Opens a container with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(path, ReaderOptions::default())
    }

    /// Returns the number of entries, which is the length of the key list.
    pub fn entry_count(&self) -> u64 {
        self.keys.len() as u64
    }

    pub fn header(&self) -> &MdictHeader {
        &self.header
    }

    /// The decoded key list in file order.
    pub fn keys(&self) -> &[KeyEntry] {
        &self.keys
    }

    /// Whether the key list was produced by the resynchronizing scan.
    pub fn recovered_by_scan(&self) -> bool {
        self.recovered
    }

    /// Returns a lazy, single-pass iterator over all `(key, record)` pairs.
    ///
    /// Each call starts a fresh pass over the record section. The iterator
    /// yields `Result<(T::Key, T::Record)>` and stops after the first error.
    pub fn iter_entries(&self) -> EntryIterator<'_, T> {
        EntryIterator::new(self)
    }

    pub(crate) fn read_record_index(&self) -> Result<records::RecordIndex> {
        let mut file = self.file.lock().map_err(|_| MdictError::LockPoisoned)?;
        records::read_index(
            &mut *file,
            self.header.generation,
            self.record_section_offset,
            self.key_section_entries,
        )
    }

    /// Reads `len` raw bytes at `offset`; seek and read happen under one lock.
    pub(crate) fn read_raw(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let mut file = self.file.lock().map_err(|_| MdictError::LockPoisoned)?;
        file.seek(SeekFrom::Start(offset))?;
        utils::read_bytes(&mut *file, len)
    }

    pub(crate) fn codec(&self) -> &BlockCodec {
        &self.codec
    }

    pub(crate) fn substitute_styles(&self) -> bool {
        self.substitute_styles
    }
}
