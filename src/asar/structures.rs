use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::collections::BTreeMap;
use std::io::Cursor;

use crate::error::{AsarError, Result};

/// Alignment of the header region, in bytes.
pub const HEADER_ALIGNMENT: u64 = 4;

/// Round `i` up to the next multiple of `m`. `m` must be a power of two.
pub fn align_up(i: u64, m: u64) -> u64 {
    debug_assert!(m.is_power_of_two());
    (i + m - 1) & !(m - 1)
}

/// Fixed 16-byte prefix at the start of every archive.
///
/// Only `header_string_size` is needed to locate the JSON index and the blob.
/// The other three fields are carried through as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderPrefix {
    pub data_size: u32,
    pub header_size: u32,
    pub header_object_size: u32,
    pub header_string_size: u32,
}

impl HeaderPrefix {
    pub const SIZE: usize = 16;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(AsarError::corrupt(format!(
                "prefix needs {} bytes, got {}",
                Self::SIZE,
                data.len()
            )));
        }

        let mut cursor = Cursor::new(&data[..Self::SIZE]);

        Ok(Self {
            data_size: cursor.read_u32::<LittleEndian>()?,
            header_size: cursor.read_u32::<LittleEndian>()?,
            header_object_size: cursor.read_u32::<LittleEndian>()?,
            header_string_size: cursor.read_u32::<LittleEndian>()?,
        })
    }

    /// Build the prefix for a JSON index of `string_len` bytes.
    ///
    /// The size fields follow a simplified linear scheme against the padded
    /// length, not the nested size rollup of the reference format.
    pub fn for_string_len(string_len: u32) -> Self {
        let data_size = 4u32;
        let aligned = align_up(string_len as u64, HEADER_ALIGNMENT) as u32;
        Self {
            data_size,
            header_size: aligned.wrapping_add(8),
            header_object_size: aligned.wrapping_add(data_size),
            header_string_size: string_len,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.data_size);
        LittleEndian::write_u32(&mut buf[4..8], self.header_size);
        LittleEndian::write_u32(&mut buf[8..12], self.header_object_size);
        LittleEndian::write_u32(&mut buf[12..16], self.header_string_size);
        buf
    }

    /// Where the blob region starts: end of the JSON index, 4-byte aligned.
    pub fn base_offset(&self) -> u64 {
        align_up(Self::SIZE as u64 + self.header_string_size as u64, HEADER_ALIGNMENT)
    }
}

/// One node of the archive's logical tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// Children keyed by name; the map keeps them sorted.
    Directory(BTreeMap<String, Entry>),
    /// File whose bytes live in the blob at `base_offset + offset`.
    File {
        size: u64,
        offset: u64,
        executable: bool,
    },
    /// File stored outside the blob, under `<archive>.unpacked/<relative path>`.
    UnpackedFile { size: u64, executable: bool },
    /// Symbolic link; `link` is resolved against the extraction root.
    Symlink { link: String },
}

impl Entry {
    pub fn empty_dir() -> Self {
        Entry::Directory(BTreeMap::new())
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Entry::Directory(_))
    }

    /// Byte size for file entries, `None` for directories and links.
    pub fn size(&self) -> Option<u64> {
        match self {
            Entry::File { size, .. } | Entry::UnpackedFile { size, .. } => Some(*size),
            Entry::Directory(_) | Entry::Symlink { .. } => None,
        }
    }

    pub fn children(&self) -> Option<&BTreeMap<String, Entry>> {
        match self {
            Entry::Directory(children) => Some(children),
            _ => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut BTreeMap<String, Entry>> {
        match self {
            Entry::Directory(children) => Some(children),
            _ => None,
        }
    }

    /// Look up a `/`-separated path below this entry. Empty segments and `.` are ignored.
    pub fn find(&self, path: &str) -> Option<&Entry> {
        path.split('/')
            .filter(|seg| !seg.is_empty() && *seg != ".")
            .try_fold(self, |entry, seg| entry.children()?.get(seg))
    }
}
