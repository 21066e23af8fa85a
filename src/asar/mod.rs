//! asar archive reading, extraction and building.
//!
//! ## Format Overview
//!
//! An archive is a single file laid out as:
//!
//! ```text
//! offset 0   u32 data_size            (little-endian)
//! offset 4   u32 header_size
//! offset 8   u32 header_object_size
//! offset 12  u32 header_string_size
//! offset 16  JSON index, NUL-padded to a 4-byte boundary
//! base_offset = align_up(16 + header_string_size, 4)
//!            concatenated file contents (the blob)
//! ```
//!
//! The JSON index describes a tree of directories, files and symlinks. Files
//! either point into the blob with a decimal-string `offset`, or are stored
//! next to the archive in `<archive>.unpacked/`, mirrored by relative path.
//!
//! ## Architecture
//!
//! - [`structures`]: the fixed prefix and the [`Entry`] tree
//! - [`parser`]: header encode/decode ([`HeaderCodec`])
//! - [`archive`]: opening an archive and random-access reads ([`Archive`])
//! - [`extractor`]: writing the tree to disk ([`Extractor`])
//! - [`builder`]: packing a directory into a new image ([`PackedArchive`])
//!
//! ## Limitations
//!
//! - `data_size`, `header_size` and `header_object_size` are written with a
//!   simplified linear formula, not the nested size rollup some consumers
//!   may check
//! - No integrity hashes
//! - Packing cannot mark files as unpacked

mod archive;
mod builder;
mod extractor;
mod parser;
mod structures;

pub use archive::{Archive, UNPACKED_SUFFIX, unpacked_dir_for};
pub use builder::{PackedArchive, pack};
pub use extractor::{ExtractSummary, Extractor};
pub use parser::{Header, HeaderCodec};
pub use structures::{Entry, HEADER_ALIGNMENT, HeaderPrefix, align_up};
