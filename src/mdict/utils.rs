//! Low-level byte reading, checksum and text-encoding utilities.

use std::io::Read;

use adler2::adler32_slice;
use byteorder::{BigEndian, ReadBytesExt};
use encoding_rs::{Encoding, GB18030, UTF_16BE, UTF_16LE, UTF_8};
use log::{trace, warn};

use crate::mdict::types::error::{MdictError, Result};
use crate::mdict::types::models::BlockPosition;

/// Reads a 4 or 8 byte big-endian number.
///
/// Width depends on the engine generation (v1.x uses 4 bytes, v2.x uses 8).
pub fn read_number<R: Read + ?Sized>(reader: &mut R, number_width: usize) -> Result<u64> {
    match number_width {
        8 => Ok(reader.read_u64::<BigEndian>()?),
        4 => Ok(u64::from(reader.read_u32::<BigEndian>()?)),
        _ => Err(MdictError::InvalidFormat(format!("Invalid number width: {number_width}"))),
    }
}

/// Reads a 1 or 2 byte big-endian number (text length prefixes).
pub fn read_small_number<R: Read + ?Sized>(reader: &mut R, number_width: usize) -> Result<u64> {
    match number_width {
        2 => Ok(u64::from(reader.read_u16::<BigEndian>()?)),
        1 => Ok(u64::from(reader.read_u8()?)),
        _ => Err(MdictError::InvalidFormat(format!("Invalid small number width: {number_width}"))),
    }
}

/// Upper bound on capacity reserved up front for a length read from the file.
const MAX_CAPACITY_HINT: u64 = 1 << 20;

/// Capacity to reserve for a buffer whose final length is only declared.
pub fn capacity_hint(declared_len: u64) -> usize {
    declared_len.min(MAX_CAPACITY_HINT) as usize
}

/// Reads exactly `len` bytes.
///
/// The buffer grows with the data actually read, so a declared length larger
/// than the input fails with `TruncatedInput` instead of allocating it.
pub fn read_bytes<R: Read + ?Sized>(reader: &mut R, len: u64) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(capacity_hint(len));
    reader.take(len).read_to_end(&mut buf)?;
    if (buf.len() as u64) < len {
        return Err(MdictError::TruncatedInput);
    }
    Ok(buf)
}

/// Sums declared counts or sizes, rejecting totals that overflow.
pub fn checked_total<I: IntoIterator<Item = u64>>(values: I, what: &str) -> Result<u64> {
    values
        .into_iter()
        .try_fold(0u64, u64::checked_add)
        .ok_or_else(|| MdictError::InvalidFormat(format!("Total of {what} overflows")))
}

pub fn adler_checksum(data: &[u8]) -> u32 {
    adler32_slice(data)
}

/// Compares the checksum of `data` with the transmitted value.
pub fn verify_checksum(data: &[u8], expected: u32, position: BlockPosition) -> Result<()> {
    let actual = adler_checksum(data);
    trace!("{position} checksum: expected={expected:#010x}, actual={actual:#010x}");
    if actual != expected {
        return Err(MdictError::ChecksumMismatch {
            position,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Bytes per text unit: 2 for UTF-16 encodings, 1 otherwise.
pub fn unit_width(encoding: &'static Encoding) -> usize {
    if encoding == UTF_16LE || encoding == UTF_16BE {
        2
    } else {
        1
    }
}

/// Resolves a charset label, widening GBK and GB2312 to GB18030.
///
/// Unknown labels fall back to UTF-8.
pub fn parse_encoding(label: &str) -> &'static Encoding {
    let label = label.trim();
    if label.eq_ignore_ascii_case("GBK") || label.eq_ignore_ascii_case("GB2312") {
        return GB18030;
    }
    if label.is_empty() {
        return UTF_8;
    }
    Encoding::for_label(label.as_bytes()).unwrap_or_else(|| {
        warn!("Unknown text encoding '{label}', falling back to UTF-8");
        UTF_8
    })
}

/// Decodes text without BOM sniffing; malformed sequences become U+FFFD.
pub fn decode_text(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (text, _) = encoding.decode_without_bom_handling(bytes);
    text.into_owned()
}
