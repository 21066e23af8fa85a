use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{AsarError, Result};
use crate::io::{LocalFileReader, MemoryReader, ReadAt};

use super::extractor::{ExtractSummary, Extractor};
use super::parser::{Header, HeaderCodec};
use super::structures::{Entry, HeaderPrefix};

/// Suffix of the sidecar directory holding files stored outside the blob.
pub const UNPACKED_SUFFIX: &str = ".unpacked";

/// `<archive>.unpacked` for the given archive path.
pub fn unpacked_dir_for(path: &Path) -> PathBuf {
    let mut dir = OsString::from(path.as_os_str());
    dir.push(UNPACKED_SUFFIX);
    PathBuf::from(dir)
}

/// An opened archive.
///
/// Holds the decoded entry tree and the byte source the blob is read from.
/// For [`LocalFileReader`] the file handle is released when the archive is
/// dropped, on every exit path.
pub struct Archive<R: ReadAt = LocalFileReader> {
    path: PathBuf,
    unpacked_dir: PathBuf,
    reader: R,
    header: Header,
}

impl Archive<LocalFileReader> {
    /// Open the archive at `path` and decode its header.
    ///
    /// # Errors
    ///
    /// [`AsarError::NotFound`] if nothing exists at `path`,
    /// [`AsarError::CorruptHeader`] if the header cannot be decoded.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = LocalFileReader::new(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => AsarError::NotFound {
                path: path.to_path_buf(),
            },
            _ => AsarError::Io(e),
        })?;
        Self::from_reader(path, reader)
    }
}

impl Archive<MemoryReader> {
    /// Open an in-memory archive image.
    ///
    /// `path` is where the image logically lives; it only determines the
    /// unpacked sidecar location.
    pub fn open_bytes(path: impl AsRef<Path>, bytes: Vec<u8>) -> Result<Self> {
        Self::from_reader(path.as_ref(), MemoryReader::new(bytes))
    }
}

impl<R: ReadAt> Archive<R> {
    pub fn from_reader(path: &Path, reader: R) -> Result<Self> {
        let header = HeaderCodec::read(&reader)?;
        debug!(
            path = %path.display(),
            base_offset = header.base_offset(),
            size = reader.size(),
            "opened archive"
        );
        Ok(Self {
            path: path.to_path_buf(),
            unpacked_dir: unpacked_dir_for(path),
            reader,
            header,
        })
    }

    /// Use `dir` instead of `<archive>.unpacked` for unpacked files.
    pub fn with_unpacked_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.unpacked_dir = dir.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn unpacked_dir(&self) -> &Path {
        &self.unpacked_dir
    }

    pub fn root(&self) -> &Entry {
        &self.header.root
    }

    pub fn prefix(&self) -> &HeaderPrefix {
        &self.header.prefix
    }

    pub fn base_offset(&self) -> u64 {
        self.header.base_offset()
    }

    /// Length of the blob region following the header.
    pub fn blob_len(&self) -> u64 {
        self.reader.size().saturating_sub(self.base_offset())
    }

    /// Read `size` bytes at `offset` within the blob region.
    ///
    /// # Errors
    ///
    /// [`AsarError::OutOfBounds`] if the range does not fit inside the blob.
    pub fn read_file_bytes(&self, offset: u64, size: u64) -> Result<Vec<u8>> {
        let blob_len = self.blob_len();
        let out_of_bounds = AsarError::OutOfBounds {
            offset,
            size,
            blob_len,
        };
        match offset.checked_add(size) {
            Some(end) if end <= blob_len => {}
            _ => return Err(out_of_bounds),
        }
        let len = usize::try_from(size).map_err(|_| out_of_bounds)?;

        let mut buf = vec![0u8; len];
        self.reader
            .read_exact_at(self.base_offset() + offset, &mut buf)?;
        Ok(buf)
    }

    /// Look up an entry by its `/`-separated logical path.
    pub fn find(&self, path: &str) -> Option<&Entry> {
        self.root().find(path)
    }

    /// Read the contents of the file at `path`, from the blob or from the
    /// unpacked sidecar.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        match self.find(path) {
            Some(Entry::File { size, offset, .. }) => self.read_file_bytes(*offset, *size),
            Some(Entry::UnpackedFile { .. }) => {
                let src = self.unpacked_path(path);
                std::fs::read(&src).map_err(|e| match e.kind() {
                    io::ErrorKind::NotFound => AsarError::MissingUnpackedFile { path: src },
                    _ => AsarError::Io(e),
                })
            }
            Some(Entry::Directory(_)) | Some(Entry::Symlink { .. }) => Err(AsarError::Io(
                io::Error::new(io::ErrorKind::InvalidInput, format!("{path} is not a file")),
            )),
            None => Err(AsarError::EntryNotFound(path.to_string())),
        }
    }

    /// Where an unpacked entry at logical `path` lives on disk.
    pub fn unpacked_path(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|seg| !seg.is_empty() && *seg != ".")
            .fold(self.unpacked_dir.clone(), |acc, seg| acc.join(seg))
    }

    /// Every entry below the root with its logical path, parents before
    /// children, siblings in name order.
    pub fn files(&self) -> Vec<(String, &Entry)> {
        fn walk<'a>(prefix: &str, entry: &'a Entry, out: &mut Vec<(String, &'a Entry)>) {
            let Some(children) = entry.children() else {
                return;
            };
            for (name, child) in children {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                out.push((path.clone(), child));
                walk(&path, child, out);
            }
        }

        let mut out = Vec::new();
        walk("", self.root(), &mut out);
        out
    }

    /// Extract the whole tree into `destination`, which must not exist yet.
    pub fn extract(&self, destination: impl AsRef<Path>) -> Result<ExtractSummary> {
        Extractor::new(self).extract(destination.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asar::test_support::image;
    use tempfile::TempDir;

    #[test]
    fn test_open_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.asar");
        assert!(matches!(
            Archive::open(&path),
            Err(AsarError::NotFound { path: p }) if p == path
        ));
    }

    #[test]
    fn test_open_truncated_prefix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.asar");
        std::fs::write(&path, [0u8; 10]).unwrap();
        assert!(matches!(
            Archive::open(&path),
            Err(AsarError::CorruptHeader(_))
        ));
    }

    #[test]
    fn test_open_and_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.asar");
        std::fs::write(
            &path,
            image(
                r#"{"files":{"a.txt":{"size":5,"offset":"0"},"b.txt":{"size":3,"offset":"5"}}}"#,
                b"helloabc",
            ),
        )
        .unwrap();

        let archive = Archive::open(&path).unwrap();
        assert_eq!(archive.path(), path.as_path());
        assert_eq!(archive.unpacked_dir(), dir.path().join("app.asar.unpacked"));
        assert_eq!(archive.blob_len(), 8);
        assert_eq!(archive.read_file("a.txt").unwrap(), b"hello");
        assert_eq!(archive.read_file("b.txt").unwrap(), b"abc");
        assert_eq!(archive.read_file_bytes(1, 4).unwrap(), b"ello");
    }

    #[test]
    fn test_read_out_of_bounds() {
        let archive = Archive::open_bytes(
            "app.asar",
            image(r#"{"files":{"a.txt":{"size":9,"offset":"0"}}}"#, b"hello"),
        )
        .unwrap();

        assert!(matches!(
            archive.read_file("a.txt"),
            Err(AsarError::OutOfBounds { offset: 0, size: 9, blob_len: 5 })
        ));
        assert!(matches!(
            archive.read_file_bytes(u64::MAX, 2),
            Err(AsarError::OutOfBounds { .. })
        ));
        assert_eq!(archive.read_file_bytes(5, 0).unwrap(), b"");
    }

    #[test]
    fn test_read_unpacked() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.asar");
        let sidecar = dir.path().join("app.asar.unpacked").join("res");
        std::fs::create_dir_all(&sidecar).unwrap();
        std::fs::write(sidecar.join("img.png"), b"0123456789").unwrap();

        let archive = Archive::open_bytes(
            &path,
            image(
                r#"{"files":{"res":{"files":{"img.png":{"size":10},"gone.png":{"size":1}}}}}"#,
                b"",
            ),
        )
        .unwrap();

        assert_eq!(archive.read_file("res/img.png").unwrap(), b"0123456789");
        assert!(matches!(
            archive.read_file("res/gone.png"),
            Err(AsarError::MissingUnpackedFile { .. })
        ));
        assert!(matches!(
            archive.read_file("res/none.png"),
            Err(AsarError::EntryNotFound(p)) if p == "res/none.png"
        ));
        assert!(matches!(archive.read_file("res"), Err(AsarError::Io(_))));
    }

    #[test]
    fn test_files_listing_order() {
        let archive = Archive::open_bytes(
            "x.asar",
            image(
                r#"{"files":{"b":{"files":{"z":{"size":0,"offset":"0"}}},"a":{"link":"b/z"}}}"#,
                b"",
            ),
        )
        .unwrap();
        let names: Vec<_> = archive.files().into_iter().map(|(p, _)| p).collect();
        assert_eq!(names, ["a", "b", "b/z"]);
    }

    #[test]
    fn test_with_unpacked_dir() {
        let archive = Archive::open_bytes("x.asar", image(r#"{"files":{}}"#, b""))
            .unwrap()
            .with_unpacked_dir("/elsewhere");
        assert_eq!(archive.unpacked_dir(), Path::new("/elsewhere"));
        assert_eq!(
            archive.unpacked_path("a/b.png"),
            Path::new("/elsewhere").join("a").join("b.png")
        );
    }
}
