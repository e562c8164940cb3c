//! Record section metadata and payload slicing.
//!
//! ```text
//! [4 numbers]   blocks, entries, index length, record blocks length
//! [index]       (compressed, decompressed) size per block
//! [blocks]      tagged record blocks
//! ```
//!
//! Payloads are located by the key entries' offsets into the concatenated
//! decompressed record stream; see [`slice_block`].

use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;

use log::{debug, info};

use crate::mdict::types::error::{MdictError, Result};
use crate::mdict::types::models::{BlockInfo, EngineGeneration, KeyEntry, RecordSectionInfo};
use crate::mdict::utils;

/// Decoded record metadata plus where the blocks start in the file.
#[derive(Debug, Clone)]
pub struct RecordIndex {
    pub info: RecordSectionInfo,
    pub blocks: Vec<BlockInfo>,
    pub blocks_offset: u64,
}

/// Reads the record section metadata.
///
/// `key_entries` is the entry count established by the key section; the
/// record section must declare the same number.
pub fn read_index<R: Read + Seek>(
    file: &mut R,
    generation: EngineGeneration,
    record_section_offset: u64,
    key_entries: u64,
) -> Result<RecordIndex> {
    let width = generation.number_width();
    file.seek(SeekFrom::Start(record_section_offset))?;

    let info = RecordSectionInfo {
        num_blocks: utils::read_number(file, width)?,
        num_entries: utils::read_number(file, width)?,
        index_len: utils::read_number(file, width)?,
        blocks_len: utils::read_number(file, width)?,
    };
    info!(
        "Record section: blocks={}, entries={}, record blocks={} bytes",
        info.num_blocks, info.num_entries, info.blocks_len
    );

    if info.num_entries != key_entries {
        return Err(MdictError::EntryCountMismatch {
            key_section: key_entries,
            record_section: info.num_entries,
        });
    }
    let expected_index_len = info.num_blocks.saturating_mul(2 * width as u64);
    if info.index_len != expected_index_len {
        return Err(MdictError::SectionSizeMismatch {
            section: "record index",
            declared: info.index_len,
            found: expected_index_len,
        });
    }

    let index = utils::read_bytes(file, info.index_len)?;
    let mut reader = index.as_slice();
    let mut blocks = Vec::with_capacity(index.len() / (2 * width));
    while !reader.is_empty() {
        blocks.push(BlockInfo {
            compressed_size: utils::read_number(&mut reader, width)?,
            decompressed_size: utils::read_number(&mut reader, width)?,
        });
    }
    debug!("Record index lists {} blocks", blocks.len());

    Ok(RecordIndex {
        info,
        blocks,
        blocks_offset: file.stream_position()?,
    })
}

/// Assigns payload ranges of one decompressed record block to key entries.
///
/// Starting at `*next_key`, every entry whose offset falls inside the block
/// (`block_start` is the block's position in the decompressed stream) gets
/// the range up to the next entry's offset, clamped to the block end. The
/// cursor advances past every entry handled.
pub fn slice_block(
    block_len: usize,
    block_start: u64,
    keys: &[KeyEntry],
    next_key: &mut usize,
) -> Vec<(usize, Range<usize>)> {
    let len = block_len as u64;
    let mut slices = Vec::new();

    while let Some(key) = keys.get(*next_key) {
        let start = key.offset.saturating_sub(block_start);
        if start >= len {
            break;
        }
        let end = match keys.get(*next_key + 1) {
            Some(next) => next.offset.saturating_sub(block_start).clamp(start, len),
            None => len,
        };
        slices.push((*next_key, start as usize..end as usize));
        *next_key += 1;
    }

    slices
}
