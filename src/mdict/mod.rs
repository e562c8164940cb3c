//! Core MDict container decoding.

pub mod codec;
pub mod format;
pub mod iter;
pub mod reader;
pub mod types;
pub mod utils;

pub use iter::EntryIterator;
pub use reader::{MdictReader, ReaderOptions};
pub use types::error::{MdictError, Result};
pub use types::filetypes::{FileType, Mdd, Mdx, ResourceName};
