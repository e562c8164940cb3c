//! Lazy iteration over `(key, record)` pairs.
//!
//! Record blocks are read and decompressed one at a time, in file order. Each
//! decoded block is cut into payloads using the key offsets (see
//! [`slice_block`](crate::mdict::format::records::slice_block)), so at most one
//! decompressed block is held in memory.
//!
//! # Example
//! ```no_run
//! # use mdict_container::{MdictReader, Mdx};
//! # let reader = MdictReader::<Mdx>::open("dict.mdx").unwrap();
//! for result in reader.iter_entries() {
//!     let (key, definition) = result.unwrap();
//!     println!("{}: {}", key, definition);
//! }
//! ```

use std::collections::VecDeque;
use std::ops::Range;

use log::{debug, warn};

use super::format::records::{self, RecordIndex};
use super::reader::MdictReader;
use super::types::error::{MdictError, Result};
use super::types::filetypes::FileType;
use super::types::models::{BlockPosition, Section};

/// Iterator over `(key, record)` pairs.
///
/// Created by [`MdictReader::iter_entries()`](crate::MdictReader::iter_entries).
/// Fused: after yielding an error or reaching the end it only yields `None`.
pub struct EntryIterator<'a, T: FileType> {
    reader: &'a MdictReader<T>,
    index: Option<RecordIndex>,
    next_block: usize,
    /// File offset of `next_block`.
    file_offset: u64,
    /// Position of `next_block` in the decompressed record stream.
    decoded_offset: u64,
    consumed: u64,
    next_key: usize,
    block: Vec<u8>,
    pending: VecDeque<(usize, Range<usize>)>,
    done: bool,
}

impl<'a, T: FileType> EntryIterator<'a, T> {
    pub(super) fn new(reader: &'a MdictReader<T>) -> Self {
        Self {
            reader,
            index: None,
            next_block: 0,
            file_offset: 0,
            decoded_offset: 0,
            consumed: 0,
            next_key: 0,
            block: Vec::new(),
            pending: VecDeque::new(),
            done: false,
        }
    }

    /// Decodes the next record block and queues the payloads it contains.
    ///
    /// Returns `Ok(false)` once the section is exhausted or cut short by a
    /// block the codec set cannot decompress.
    fn load_next_block(&mut self) -> Result<bool> {
        if self.index.is_none() {
            let index = self.reader.read_record_index()?;
            self.file_offset = index.blocks_offset;
            self.index = Some(index);
        }
        let Some(index) = &self.index else {
            return Ok(false);
        };

        let Some(info) = index.blocks.get(self.next_block).copied() else {
            return self.finish(index.info.blocks_len).map(|_| false);
        };
        let position = BlockPosition::new(Section::RecordBlock, self.next_block);

        let raw = self.reader.read_raw(self.file_offset, info.compressed_size)?;
        let block = match self
            .reader
            .codec()
            .decode(&raw, Some(info.decompressed_size), position)
        {
            Err(MdictError::UnsupportedCompression { .. }) => {
                warn!(
                    "Record section truncated at {position}; {} of {} entries yielded",
                    self.next_key,
                    self.reader.keys().len()
                );
                return Ok(false);
            }
            result => result?,
        };

        let slices = records::slice_block(block.len(), self.decoded_offset, self.reader.keys(), &mut self.next_key);
        debug!("{position}: {} bytes, {} entries", block.len(), slices.len());
        self.pending.extend(slices);
        self.block = block;

        self.next_block += 1;
        self.file_offset += info.compressed_size;
        self.consumed += info.compressed_size;
        self.decoded_offset = self.decoded_offset.saturating_add(info.decompressed_size);
        Ok(true)
    }

    /// End-of-section checks once every block was decoded.
    fn finish(&self, declared_len: u64) -> Result<()> {
        if self.consumed != declared_len {
            return Err(MdictError::SectionSizeMismatch {
                section: "record blocks",
                declared: declared_len,
                found: self.consumed,
            });
        }
        let keys = self.reader.keys().len();
        if self.next_key != keys {
            return Err(MdictError::CountMismatch {
                item_type: "entries resolved in record blocks",
                expected: keys as u64,
                found: self.next_key as u64,
            });
        }
        Ok(())
    }
}

impl<'a, T: FileType> Iterator for EntryIterator<'a, T> {
    type Item = Result<(T::Key, T::Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            if let Some((key_index, range)) = self.pending.pop_front() {
                let key = &self.reader.keys()[key_index];
                let record = T::process_record(
                    &self.block[range],
                    self.reader.header(),
                    self.reader.substitute_styles(),
                );
                if record.is_err() {
                    self.done = true;
                }
                return Some(record.map(|record| (T::process_key(&key.text), record)));
            }

            match self.load_next_block() {
                Ok(true) => {}
                Ok(false) => self.done = true,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

impl<'a, T: FileType> std::iter::FusedIterator for EntryIterator<'a, T> {}
