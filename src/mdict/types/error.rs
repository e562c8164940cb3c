//! Custom error types for the mdict-container crate.

use std::io;

use thiserror::Error;

use super::models::BlockPosition;

/// The primary error type for all operations in this crate.
#[derive(Debug, Error)]
pub enum MdictError {
    /// An error originating from I/O operations.
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// The input ended before a structurally required field.
    #[error("Truncated input: the file ends before a required field")]
    TruncatedInput,

    /// The header checksum does not match the raw header bytes.
    #[error("Header corrupt: checksum expected {expected:#010x}, got {actual:#010x}")]
    HeaderCorrupt { expected: u32, actual: u32 },

    /// The engine version belongs to a generation this decoder does not read.
    #[error("Unsupported MDict engine version: {0}. Only v1.x and v2.x are supported.")]
    UnsupportedVersion(f32),

    /// A block's content checksum failed.
    #[error("Checksum mismatch in {position}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        position: BlockPosition,
        expected: u32,
        actual: u32,
    },

    /// The section is encrypted with a passcode, but none was supplied.
    #[error("Encrypted file requires a passcode (registration code and user id), but none was provided")]
    AuthenticationRequired,

    /// The supplied passcode could not be turned into a key.
    #[error("Decryption failed: {0}")]
    DecryptionError(String),

    /// An LZO block was met while no LZO codec is linked.
    #[error("Unsupported compression in {position}: no LZO codec is available")]
    UnsupportedCompression { position: BlockPosition },

    /// A codec rejected its input.
    #[error("Decompression failed: {0}")]
    DecompressionError(String),

    /// Declared and consumed byte totals of a section disagree.
    #[error("Section size mismatch for {section}: declared {declared} bytes, found {found} bytes")]
    SectionSizeMismatch {
        section: &'static str,
        declared: u64,
        found: u64,
    },

    /// The key section and the record section disagree on the number of entries.
    #[error("Entry count mismatch: key section has {key_section} entries, record section declares {record_section}")]
    EntryCountMismatch { key_section: u64, record_section: u64 },

    /// A declared count of items does not match the actual number of items found.
    #[error("Count mismatch for {item_type}: expected {expected}, but found {found}")]
    CountMismatch {
        item_type: &'static str,
        expected: u64,
        found: u64,
    },

    /// A buffer or data block has an unexpected size after an operation.
    #[error("Size mismatch for {context}: expected {expected} bytes, but found {found} bytes")]
    SizeMismatch {
        context: &'static str,
        expected: u64,
        found: u64,
    },

    /// The file is structurally invalid.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// The file mutex was poisoned by a panic in another thread.
    #[error("A mutex lock was poisoned, indicating a panic in another thread holding the lock")]
    LockPoisoned,
}

impl MdictError {
    /// Whether a failure of the structured key-section decode may be retried
    /// with the resynchronizing scan.
    ///
    /// Missing or wrong credentials and plain I/O failures are never retried.
    pub fn is_recoverable_by_scan(&self) -> bool {
        matches!(
            self,
            MdictError::TruncatedInput
                | MdictError::ChecksumMismatch { .. }
                | MdictError::DecompressionError(_)
                | MdictError::SectionSizeMismatch { .. }
                | MdictError::CountMismatch { .. }
                | MdictError::SizeMismatch { .. }
                | MdictError::InvalidFormat(_)
        )
    }
}

impl From<io::Error> for MdictError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            MdictError::TruncatedInput
        } else {
            MdictError::Io(err)
        }
    }
}

/// A convenience `Result` type alias using the crate's `MdictError` type.
pub type Result<T> = std::result::Result<T, MdictError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mdict::types::models::Section;

    #[test]
    fn eof_maps_to_truncated_input() {
        let err: MdictError = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert!(matches!(err, MdictError::TruncatedInput));

        let err: MdictError = io::Error::from(io::ErrorKind::PermissionDenied).into();
        assert!(matches!(err, MdictError::Io(_)));
    }

    #[test]
    fn credentials_never_trigger_scan() {
        assert!(!MdictError::AuthenticationRequired.is_recoverable_by_scan());
        assert!(!MdictError::DecryptionError("bad".into()).is_recoverable_by_scan());
        assert!(MdictError::ChecksumMismatch {
            position: BlockPosition::new(Section::KeyIndex, 0),
            expected: 1,
            actual: 2,
        }
        .is_recoverable_by_scan());
    }
}
