//! # rasar
//!
//! Read, extract and build asar archives.
//!
//! An asar archive stores a directory tree as a JSON index followed by the
//! concatenated contents of every file. Files can also be kept outside the
//! archive in a sibling `<archive>.unpacked/` directory.
//!
//! ## Features
//!
//! - Open an archive from disk or memory and read any file by logical path
//! - Extract the whole tree, including symlinks and unpacked files
//! - Pack a directory into a new archive image, deterministically
//!
//! ## Example
//!
//! ```no_run
//! use rasar::{Archive, pack};
//!
//! fn main() -> rasar::Result<()> {
//!     // Unpack an existing archive
//!     let archive = Archive::open("resources/app.asar")?;
//!     for (path, _) in archive.files() {
//!         println!("{path}");
//!     }
//!     archive.extract("resources/app")?;
//!
//!     // Repack it after editing
//!     let image = pack("resources/app")?.persist()?;
//!     std::fs::write("resources/app.asar", image)?;
//!     Ok(())
//! }
//! ```

pub mod asar;
pub mod error;
pub mod io;

pub use asar::{Archive, Entry, ExtractSummary, HeaderCodec, PackedArchive, pack};
pub use error::{AsarError, Result};
pub use io::{LocalFileReader, MemoryReader, ReadAt};
