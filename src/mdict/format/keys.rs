//! Key section decoding.
//!
//! The key section is laid out as:
//! ```text
//! [numeric block]  4 (v1) or 5 (v2) numbers, optionally Salsa20/8 encrypted
//! [checksum]       v2 only, Adler-32 of the decrypted numeric block
//! [key index]      per-block entry counts and sizes; zlib in v2, raw in v1
//! [key blocks]     tagged blocks of (record offset, key text) entries
//! ```
//!
//! When the structured decode fails on damaged or unexpectedly encrypted
//! metadata, [`read`] retries once with a resynchronizing scan that ignores
//! the numeric block and locates the first key block by its tag.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, ReadBytesExt};
use log::{debug, info, warn};

use crate::mdict::codec::compression::BlockCodec;
use crate::mdict::codec::crypto;
use crate::mdict::format::content;
use crate::mdict::types::error::{MdictError, Result};
use crate::mdict::types::models::{
    BlockInfo, BlockPosition, CompressionType, EngineGeneration, KeyEntry, KeySectionInfo, MdictHeader, Passcode,
    Section,
};
use crate::mdict::utils;

/// Chunk size of the resynchronizing scan.
const SCAN_CHUNK_LEN: u64 = 1024;

/// One key index entry: a key block's size and how many keys it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBlockInfo {
    pub num_entries: u64,
    pub block: BlockInfo,
}

/// The decoded key section.
#[derive(Debug)]
pub struct KeySection {
    /// All key entries in file order.
    pub entries: Vec<KeyEntry>,
    /// Entry count the record section must agree with.
    pub num_entries: u64,
    /// File offset of the record section.
    pub record_section_offset: u64,
    /// Whether the entries came from the resynchronizing scan.
    pub recovered: bool,
}

/// Decodes the key section starting at `key_section_offset`.
///
/// Structural and integrity failures of the primary decode fall back to the
/// scan. If the scan fails too, the primary error is returned.
pub fn read<R: Read + Seek>(
    file: &mut R,
    header: &MdictHeader,
    key_section_offset: u64,
    passcode: Option<&Passcode>,
    codec: &BlockCodec,
) -> Result<KeySection> {
    file.seek(SeekFrom::Start(key_section_offset))?;
    let primary_error = match read_structured(file, header, passcode, codec) {
        Ok(section) => return Ok(section),
        Err(err) if err.is_recoverable_by_scan() => err,
        Err(err) => return Err(err),
    };

    warn!("Key section could not be decoded ({primary_error}); scanning for key blocks");
    match read_by_scan(file, header, key_section_offset, codec) {
        Ok(section) => {
            info!("Recovered {} keys by scanning", section.entries.len());
            Ok(section)
        }
        Err(scan_error) => {
            debug!("Scan recovery failed too: {scan_error}");
            Err(primary_error)
        }
    }
}

fn read_structured<R: Read + Seek>(
    file: &mut R,
    header: &MdictHeader,
    passcode: Option<&Passcode>,
    codec: &BlockCodec,
) -> Result<KeySection> {
    let info = read_section_info(file, header, passcode)?;
    info!(
        "Key section: blocks={}, entries={}, index={} bytes, key blocks={} bytes",
        info.num_blocks, info.num_entries, info.index_compressed_len, info.key_blocks_len
    );

    let mut index = utils::read_bytes(file, info.index_compressed_len)?;
    // Only v2 key indexes are enciphered; v1 indexes are stored as-is.
    if header.encryption.key_index() && header.generation == EngineGeneration::V2 {
        crypto::decrypt_key_index(&mut index)?;
    }
    let index = match header.generation {
        EngineGeneration::V2 => codec.decode(
            &index,
            info.index_decompressed_len,
            BlockPosition::new(Section::KeyIndex, 0),
        )?,
        EngineGeneration::V1 => index,
    };
    let block_infos = parse_key_index(&index, header)?;

    if block_infos.len() as u64 != info.num_blocks {
        return Err(MdictError::CountMismatch {
            item_type: "key blocks in index",
            expected: info.num_blocks,
            found: block_infos.len() as u64,
        });
    }
    let indexed_entries = utils::checked_total(block_infos.iter().map(|b| b.num_entries), "key entries")?;
    if indexed_entries != info.num_entries {
        return Err(MdictError::CountMismatch {
            item_type: "key entries in index",
            expected: info.num_entries,
            found: indexed_entries,
        });
    }
    let indexed_len = utils::checked_total(block_infos.iter().map(|b| b.block.compressed_size), "key block sizes")?;
    if indexed_len != info.key_blocks_len {
        return Err(MdictError::SectionSizeMismatch {
            section: "key blocks",
            declared: info.key_blocks_len,
            found: indexed_len,
        });
    }

    let key_blocks = utils::read_bytes(file, info.key_blocks_len)?;
    let entries = decode_key_blocks(&key_blocks, &block_infos, header, codec, true)?;

    Ok(KeySection {
        entries,
        num_entries: info.num_entries,
        record_section_offset: file.stream_position()?,
        recovered: false,
    })
}

/// Reads and, when required, decrypts the numeric block opening the section.
fn read_section_info<R: Read>(
    file: &mut R,
    header: &MdictHeader,
    passcode: Option<&Passcode>,
) -> Result<KeySectionInfo> {
    let generation = header.generation;
    let mut numbers = vec![0u8; generation.key_section_header_len()];
    file.read_exact(&mut numbers)?;

    if header.encryption.key_section_header() {
        let passcode = passcode.ok_or(MdictError::AuthenticationRequired)?;
        let key = crypto::derive_passcode_key(passcode, header.register_by)?;
        debug!("Decrypting key section numeric block");
        crypto::salsa20_8(&mut numbers, &key);
    }

    if generation.has_key_section_checksum() {
        let expected = file.read_u32::<BigEndian>()?;
        utils::verify_checksum(&numbers, expected, BlockPosition::new(Section::KeySectionHeader, 0))?;
    }

    let width = generation.number_width();
    let mut reader = numbers.as_slice();
    let num_blocks = utils::read_number(&mut reader, width)?;
    let num_entries = utils::read_number(&mut reader, width)?;
    let index_decompressed_len = match generation {
        EngineGeneration::V2 => Some(utils::read_number(&mut reader, width)?),
        EngineGeneration::V1 => None,
    };
    let index_compressed_len = utils::read_number(&mut reader, width)?;
    let key_blocks_len = utils::read_number(&mut reader, width)?;

    Ok(KeySectionInfo {
        num_blocks,
        num_entries,
        index_decompressed_len,
        index_compressed_len,
        key_blocks_len,
    })
}

/// Parses the decompressed key index into per-block entry counts and sizes.
///
/// Head and tail key texts are skipped; their lengths are counted in text
/// units and followed by a terminator unit in v2.
pub fn parse_key_index(index: &[u8], header: &MdictHeader) -> Result<Vec<KeyBlockInfo>> {
    let generation = header.generation;
    let width = generation.number_width();
    let mut reader = index;
    let mut infos = Vec::new();

    while !reader.is_empty() {
        let num_entries = utils::read_number(&mut reader, width)?;
        skip_text(&mut reader, header)?;
        skip_text(&mut reader, header)?;
        let compressed_size = utils::read_number(&mut reader, width)?;
        let decompressed_size = utils::read_number(&mut reader, width)?;
        infos.push(KeyBlockInfo {
            num_entries,
            block: BlockInfo {
                compressed_size,
                decompressed_size,
            },
        });
    }

    debug!("Key index lists {} key blocks", infos.len());
    Ok(infos)
}

fn skip_text(reader: &mut &[u8], header: &MdictHeader) -> Result<()> {
    let generation = header.generation;
    let units = utils::read_small_number(reader, generation.small_number_width())? as usize;
    let len = (units + generation.text_terminator_units()) * utils::unit_width(header.encoding);
    if reader.len() < len {
        return Err(MdictError::TruncatedInput);
    }
    *reader = &reader[len..];
    Ok(())
}

/// Decodes every key block and concatenates their entries in order.
///
/// With `strict_counts`, each block must hold as many entries as the index
/// declares for it. A block the codec set cannot decompress ends the list
/// early.
pub fn decode_key_blocks(
    data: &[u8],
    infos: &[KeyBlockInfo],
    header: &MdictHeader,
    codec: &BlockCodec,
    strict_counts: bool,
) -> Result<Vec<KeyEntry>> {
    let width = header.generation.number_width();
    let mut entries = Vec::new();
    let mut start = 0usize;

    for (index, info) in infos.iter().enumerate() {
        let raw = usize::try_from(info.block.compressed_size)
            .ok()
            .and_then(|len| start.checked_add(len))
            .and_then(|end| data.get(start..end))
            .ok_or(MdictError::SectionSizeMismatch {
                section: "key blocks",
                declared: info.block.compressed_size,
                found: data.len().saturating_sub(start) as u64,
            })?;
        let position = BlockPosition::new(Section::KeyBlock, index);
        let block = match codec.decode(raw, Some(info.block.decompressed_size), position) {
            Err(MdictError::UnsupportedCompression { .. }) => {
                warn!(
                    "Stopping key decode at {position}; {} of {} blocks decoded",
                    index,
                    infos.len()
                );
                break;
            }
            result => result?,
        };
        let block_entries = content::split_key_block(&block, width, header.encoding)?;
        if strict_counts && block_entries.len() as u64 != info.num_entries {
            return Err(MdictError::CountMismatch {
                item_type: "key entries in block",
                expected: info.num_entries,
                found: block_entries.len() as u64,
            });
        }
        entries.extend(block_entries);
        start += raw.len();
    }

    info!("Decoded {} keys from {} key blocks", entries.len(), infos.len());
    Ok(entries)
}

/// Recovers the key list without trusting the numeric block.
///
/// The key index is taken to run from just after the numeric block up to the
/// first occurrence of the key block tag (zlib for v2, LZO for v1), searched
/// chunk by chunk. The index is decoded without decryption and its checksum
/// is not enforced.
fn read_by_scan<R: Read + Seek>(
    file: &mut R,
    header: &MdictHeader,
    key_section_offset: u64,
    codec: &BlockCodec,
) -> Result<KeySection> {
    let generation = header.generation;
    let (skip, block_tag) = match generation {
        EngineGeneration::V2 => (generation.key_section_header_len() + 4, CompressionType::ZLIB_TAG),
        EngineGeneration::V1 => (generation.key_section_header_len(), CompressionType::LZO_TAG),
    };
    file.seek(SeekFrom::Start(key_section_offset + skip as u64))?;

    let mut index = vec![0u8; 8];
    file.read_exact(&mut index)?;
    if generation == EngineGeneration::V2 && index[..4] != CompressionType::ZLIB_TAG {
        return Err(MdictError::InvalidFormat(format!(
            "Scan expected a zlib key index, found tag {}",
            hex::encode(&index[..4])
        )));
    }

    loop {
        let chunk_start = file.stream_position()?;
        let mut chunk = Vec::with_capacity(SCAN_CHUNK_LEN as usize);
        (&mut *file).take(SCAN_CHUNK_LEN).read_to_end(&mut chunk)?;
        if chunk.is_empty() {
            return Err(MdictError::TruncatedInput);
        }
        if let Some(found) = chunk.windows(block_tag.len()).position(|w| w == block_tag) {
            index.extend_from_slice(&chunk[..found]);
            file.seek(SeekFrom::Start(chunk_start + found as u64))?;
            break;
        }
        index.extend_from_slice(&chunk);
    }
    debug!("Scan found {} bytes of key index", index.len());

    let index = match generation {
        EngineGeneration::V2 => codec.decode_unverified(&index, None, BlockPosition::new(Section::KeyIndex, 0))?,
        EngineGeneration::V1 => index,
    };
    let block_infos = parse_key_index(&index, header)?;

    let key_blocks_len = utils::checked_total(block_infos.iter().map(|b| b.block.compressed_size), "key block sizes")?;
    let key_blocks = utils::read_bytes(file, key_blocks_len)?;
    let entries = decode_key_blocks(&key_blocks, &block_infos, header, codec, false)?;

    Ok(KeySection {
        num_entries: entries.len() as u64,
        entries,
        record_section_offset: file.stream_position()?,
        recovered: true,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use encoding_rs::{UTF_16LE, UTF_8};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::mdict::format::header::parse_header_bytes;

    fn header(version: &str, encoding: &str) -> MdictHeader {
        let markup = format!(r#"<Dictionary GeneratedByEngineVersion="{version}" Encoding="{encoding}"/>"#);
        let mut bytes: Vec<u8> = markup.encode_utf16().flat_map(u16::to_le_bytes).collect();
        bytes.extend_from_slice(&[0, 0]);
        parse_header_bytes(&bytes, None).unwrap()
    }

    #[test]
    fn parses_v2_index_entry() {
        let header = header("2.0", "UTF-8");
        let mut index = Vec::new();
        index.extend_from_slice(&3u64.to_be_bytes());
        index.extend_from_slice(&1u16.to_be_bytes());
        index.extend_from_slice(b"a\0");
        index.extend_from_slice(&2u16.to_be_bytes());
        index.extend_from_slice(b"zz\0");
        index.extend_from_slice(&40u64.to_be_bytes());
        index.extend_from_slice(&64u64.to_be_bytes());

        let infos = parse_key_index(&index, &header).unwrap();
        assert_eq!(
            infos,
            vec![KeyBlockInfo {
                num_entries: 3,
                block: BlockInfo {
                    compressed_size: 40,
                    decompressed_size: 64
                },
            }]
        );
    }

    #[test]
    fn v1_utf16_index_has_no_terminators() {
        let header = header("1.2", "UTF-16");
        assert_eq!(header.encoding, UTF_16LE);
        let mut index = Vec::new();
        index.extend_from_slice(&1u32.to_be_bytes());
        index.push(1);
        index.extend_from_slice(&[b'a', 0]);
        index.push(1);
        index.extend_from_slice(&[b'a', 0]);
        index.extend_from_slice(&20u32.to_be_bytes());
        index.extend_from_slice(&12u32.to_be_bytes());

        let infos = parse_key_index(&index, &header).unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].block.compressed_size, 20);
    }

    #[test]
    fn short_index_text_is_truncated() {
        let header = header("2.0", "UTF-8");
        let mut index = 1u64.to_be_bytes().to_vec();
        index.extend_from_slice(&9u16.to_be_bytes());
        index.extend_from_slice(b"ab");
        assert!(matches!(
            parse_key_index(&index, &header),
            Err(MdictError::TruncatedInput)
        ));
    }

    fn stored_block(plain: &[u8]) -> Vec<u8> {
        let mut block = CompressionType::NONE_TAG.to_vec();
        block.extend_from_slice(&utils::adler_checksum(plain).to_be_bytes());
        block.extend_from_slice(plain);
        block
    }

    /// A v2 key section holding one key, with every checksum valid. The index
    /// and numeric block agree on `declared_entries` and, when given, on
    /// `declared_block_len`.
    fn v2_key_section(declared_entries: u64, declared_block_len: Option<u64>) -> Vec<u8> {
        let mut keys = 0u64.to_be_bytes().to_vec();
        keys.extend_from_slice(b"a\0");
        let key_block = stored_block(&keys);
        let block_len = declared_block_len.unwrap_or(key_block.len() as u64);

        let mut index = declared_entries.to_be_bytes().to_vec();
        for _ in 0..2 {
            index.extend_from_slice(&1u16.to_be_bytes());
            index.extend_from_slice(b"a\0");
        }
        index.extend_from_slice(&block_len.to_be_bytes());
        index.extend_from_slice(&(keys.len() as u64).to_be_bytes());
        let index_block = stored_block(&index);

        let mut section = Vec::new();
        for n in [1, declared_entries, index.len() as u64, index_block.len() as u64, block_len] {
            section.extend_from_slice(&n.to_be_bytes());
        }
        let checksum = utils::adler_checksum(&section);
        section.extend_from_slice(&checksum.to_be_bytes());
        section.extend_from_slice(&index_block);
        section.extend_from_slice(&key_block);
        section
    }

    #[test]
    fn reads_consistent_key_section() {
        let header = header("2.0", "UTF-8");
        let data = v2_key_section(1, None);
        let section = read(&mut Cursor::new(&data), &header, 0, None, &BlockCodec::without_lzo()).unwrap();
        assert_eq!(section.entries, vec![KeyEntry { offset: 0, text: "a".into() }]);
        assert_eq!(section.record_section_offset, data.len() as u64);
        assert!(!section.recovered);
    }

    #[test]
    fn inflated_entry_count_is_an_error() {
        let header = header("2.0", "UTF-8");
        let data = v2_key_section(1 << 62, None);
        assert!(matches!(
            read(&mut Cursor::new(data), &header, 0, None, &BlockCodec::without_lzo()),
            Err(MdictError::CountMismatch {
                expected: 0x4000_0000_0000_0000,
                found: 1,
                ..
            })
        ));
    }

    #[test]
    fn oversized_key_block_length_is_truncated() {
        let header = header("2.0", "UTF-8");
        let data = v2_key_section(1, Some(1 << 62));
        assert!(matches!(
            read(&mut Cursor::new(data), &header, 0, None, &BlockCodec::without_lzo()),
            Err(MdictError::TruncatedInput)
        ));
    }

    #[test]
    fn key_blocks_stop_at_unsupported_codec() {
        let header = header("2.0", "UTF-8");
        assert_eq!(header.encoding, UTF_8);

        let mut first = Vec::new();
        first.extend_from_slice(&0u64.to_be_bytes());
        first.extend_from_slice(b"a\0");
        let mut data = CompressionType::NONE_TAG.to_vec();
        data.extend_from_slice(&utils::adler_checksum(&first).to_be_bytes());
        data.extend_from_slice(&first);
        let first_len = data.len() as u64;
        data.extend_from_slice(&CompressionType::LZO_TAG);
        data.extend_from_slice(&[0; 6]);

        let infos = [
            KeyBlockInfo {
                num_entries: 1,
                block: BlockInfo {
                    compressed_size: first_len,
                    decompressed_size: first.len() as u64,
                },
            },
            KeyBlockInfo {
                num_entries: 1,
                block: BlockInfo {
                    compressed_size: 10,
                    decompressed_size: 10,
                },
            },
        ];
        let entries = decode_key_blocks(&data, &infos, &header, &BlockCodec::without_lzo(), true).unwrap();
        assert_eq!(entries, vec![KeyEntry { offset: 0, text: "a".into() }]);
    }
}
