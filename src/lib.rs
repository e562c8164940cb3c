//! # mdict-container
//!
//! A decoder for MDict dictionary (`.mdx`) and resource (`.mdd`) containers.
//! Reads engine generations 1.x and 2.x, including passcode-protected key
//! sections, encrypted key indexes, and stored, zlib and LZO blocks.
//!
//! ```no_run
//! use mdict_container::{MdictReader, Mdx, ReaderOptions};
//!
//! let reader = MdictReader::<Mdx>::new("dict.mdx", ReaderOptions::new())?;
//! println!("{} entries", reader.entry_count());
//! for entry in reader.iter_entries().take(3) {
//!     let (key, definition) = entry?;
//!     println!("{key}: {definition}");
//! }
//! # Ok::<(), mdict_container::MdictError>(())
//! ```
pub mod mdict;

// Re-export the main types for convenience
pub use mdict::codec::compression::{BlockCodec, LzoCodec};
pub use mdict::types::models::{EngineGeneration, EncryptionFlags, KeyEntry, MdictHeader, Passcode, RegisterBy};
pub use mdict::{EntryIterator, FileType, MdictError, MdictReader, Mdd, Mdx, ReaderOptions, ResourceName, Result};
