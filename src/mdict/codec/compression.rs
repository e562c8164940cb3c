//! The block codec shared by the key and record sections.
//!
//! Every compressed block starts with a 4-byte compression tag and a 4-byte
//! big-endian Adler-32 of the *decompressed* bytes:
//! - `00 00 00 00`: stored verbatim
//! - `01 00 00 00`: LZO, only when an LZO codec is linked
//! - `02 00 00 00`: zlib/deflate via flate2

use std::fmt;
use std::io::Read;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use flate2::read::ZlibDecoder;
use log::{trace, warn};

use crate::mdict::types::error::{MdictError, Result};
use crate::mdict::types::models::{BlockPosition, CompressionType};
use crate::mdict::utils::{capacity_hint, verify_checksum};

/// Length of the tag + checksum prefix of every block.
pub const BLOCK_PREFIX_LEN: usize = 8;

/// Most output bytes one byte of LZO1X input can produce.
const LZO_MAX_EXPANSION: u64 = 256;

/// A pluggable LZO decompressor.
pub trait LzoCodec: Send + Sync {
    /// Decompresses `input`, which must expand to exactly `expected_size` bytes.
    fn decompress(&self, input: &[u8], expected_size: usize) -> Result<Vec<u8>>;
}

/// LZO1X decompression backed by `lzokay`.
#[cfg(feature = "lzo")]
#[derive(Debug, Default, Clone, Copy)]
pub struct Lzokay;

#[cfg(feature = "lzo")]
impl LzoCodec for Lzokay {
    fn decompress(&self, input: &[u8], expected_size: usize) -> Result<Vec<u8>> {
        let mut output = vec![0u8; expected_size];
        let written = lzokay::decompress::decompress(input, &mut output)
            .map_err(|e| MdictError::DecompressionError(format!("LZO decompression failed: {e:?}")))?;
        if written != expected_size {
            return Err(MdictError::SizeMismatch {
                context: "LZO decompressed block",
                expected: expected_size as u64,
                found: written as u64,
            });
        }
        Ok(output)
    }
}

/// Decodes tagged blocks with the set of codecs available at construction.
#[derive(Clone)]
pub struct BlockCodec {
    lzo: Option<Arc<dyn LzoCodec>>,
}

impl BlockCodec {
    pub fn new(lzo: Option<Arc<dyn LzoCodec>>) -> Self {
        Self { lzo }
    }

    /// A codec set without LZO support; LZO blocks fail with `UnsupportedCompression`.
    pub fn without_lzo() -> Self {
        Self { lzo: None }
    }

    pub fn has_lzo(&self) -> bool {
        self.lzo.is_some()
    }

    /// Decodes one tagged block and verifies its checksum.
    ///
    /// `expected_size` comes from the block's `BlockInfo` and may be unknown
    /// when the metadata itself is being recovered. The checksum is not
    /// verified for LZO blocks.
    pub fn decode(&self, raw: &[u8], expected_size: Option<u64>, position: BlockPosition) -> Result<Vec<u8>> {
        self.decode_block(raw, expected_size, position, true)
    }

    /// Like [`decode`](Self::decode), but a checksum mismatch is only logged.
    ///
    /// Used when recovering metadata whose framing is already untrusted.
    pub fn decode_unverified(&self, raw: &[u8], expected_size: Option<u64>, position: BlockPosition) -> Result<Vec<u8>> {
        self.decode_block(raw, expected_size, position, false)
    }

    fn decode_block(
        &self,
        raw: &[u8],
        expected_size: Option<u64>,
        position: BlockPosition,
        verify: bool,
    ) -> Result<Vec<u8>> {
        if raw.len() < BLOCK_PREFIX_LEN {
            return Err(MdictError::TruncatedInput);
        }
        let compression = CompressionType::from_tag(&raw[..4])?;
        let checksum = BigEndian::read_u32(&raw[4..8]);
        let payload = &raw[BLOCK_PREFIX_LEN..];
        trace!(
            "Decoding {position}: {compression:?}, {} bytes -> {expected_size:?} bytes",
            payload.len()
        );

        let output = match compression {
            CompressionType::None => {
                if let Some(expected) = expected_size {
                    check_size("stored block", expected, payload.len())?;
                }
                payload.to_vec()
            }
            CompressionType::Lzo => {
                let Some(lzo) = &self.lzo else {
                    warn!("{position} is LZO-compressed but no LZO codec is available");
                    return Err(MdictError::UnsupportedCompression { position });
                };
                let expected = expected_size.ok_or_else(|| {
                    MdictError::DecompressionError(format!("{position}: LZO needs a known decompressed size"))
                })?;
                let limit = (payload.len() as u64).saturating_add(1).saturating_mul(LZO_MAX_EXPANSION);
                if expected > limit {
                    return Err(MdictError::DecompressionError(format!(
                        "{position}: declared size {expected} exceeds what {} LZO bytes can expand to",
                        payload.len()
                    )));
                }
                // Checksums of LZO blocks are not reliable across writers.
                return lzo.decompress(payload, expected as usize);
            }
            CompressionType::Zlib => {
                let mut output = Vec::with_capacity(capacity_hint(expected_size.unwrap_or(0)));
                ZlibDecoder::new(payload)
                    .read_to_end(&mut output)
                    .map_err(|e| MdictError::DecompressionError(format!("Zlib decompression of {position} failed: {e}")))?;
                if let Some(expected) = expected_size {
                    check_size("zlib block", expected, output.len())?;
                }
                output
            }
        };

        match verify_checksum(&output, checksum, position) {
            Err(err) if !verify => warn!("Ignoring failed check during recovery: {err}"),
            result => result?,
        }
        Ok(output)
    }
}

fn check_size(context: &'static str, expected: u64, found: usize) -> Result<()> {
    if found as u64 != expected {
        return Err(MdictError::SizeMismatch {
            context,
            expected,
            found: found as u64,
        });
    }
    Ok(())
}

impl Default for BlockCodec {
    /// Links every codec compiled into the crate.
    fn default() -> Self {
        #[cfg(feature = "lzo")]
        {
            Self::new(Some(Arc::new(Lzokay)))
        }
        #[cfg(not(feature = "lzo"))]
        {
            Self::without_lzo()
        }
    }
}

impl fmt::Debug for BlockCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCodec").field("lzo", &self.has_lzo()).finish()
    }
}
