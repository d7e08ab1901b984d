//! The legacy single-file PAK container format (versions 1–11).
//!
//! A PAK is trailer-indexed: a footer at the end of the file locates
//! an index blob (optionally AES-encrypted) describing every entry.
//! Entry data lives earlier in the file, each preceded by a duplicate
//! of its index record.

pub mod entry;
pub mod footer;
pub mod index;
pub mod version;

pub use entry::{BlockSpan, PakEntry};
pub use footer::{Footer, PAK_MAGIC};
pub use index::PakIndex;
pub use version::PakVersion;
