//! Codec layer for encryption and compression operations.
//!
//! # Submodules
//!
//! - [`crypto`][]: RIPEMD-128, the key index cipher, Salsa20/8 and passcode key derivation
//! - [`compression`][]: The tagged block codec (stored, LZO, zlib)

pub mod compression;
pub mod crypto;
