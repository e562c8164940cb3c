//! File format parsing layer for MDict containers.
//!
//! This module provides the mid-level parsing layer that bridges between
//! raw file I/O and the high-level [`MdictReader`](crate::mdict::reader::MdictReader).
//!
//! # Module Organization
//!
//! - [`header`]: Parses the attribute header and derives document settings
//! - [`keys`]: Decodes the key section, with scan recovery
//! - [`records`]: Reads record metadata and slices payloads
//! - [`content`]: Splits key blocks and post-processes record text
//!
//! # Architecture
//!
//! ```text
//! File Structure:
//! ┌─────────────────┐
//! │  Header         │ ← header::parse()
//! ├─────────────────┤
//! │  Key Section    │ ← keys::read()
//! │  (numbers,      │
//! │   index, blocks)│
//! ├─────────────────┤
//! │  Record Section │ ← records::read_index(), records::slice_block()
//! │  (index,        │
//! │   blocks)       │
//! └─────────────────┘
//! ```

pub mod content;
pub mod header;
pub mod keys;
pub mod records;
