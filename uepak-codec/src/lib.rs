//! Named decompressor registry for archive containers.
//!
//! Containers record compression methods by name; index 0 in every
//! method table is reserved for `none`. This crate maps those names to
//! decompressor functions. `zlib` and `gzip` ship built in; anything
//! else (notably proprietary codecs) is registered by the caller as a
//! plug-in.

mod error;
mod registry;

pub use error::CodecError;
pub use registry::{CodecFn, CodecRegistry};

/// Reserved method name for uncompressed data.
pub const METHOD_NONE: &str = "none";

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;
