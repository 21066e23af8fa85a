use super::ReadAt;
use std::io;
use std::path::Path;

/// Local file reader with random access support.
///
/// The handle is closed when the reader is dropped.
pub struct LocalFileReader {
    file: std::fs::File,
    size: u64,
}

impl LocalFileReader {
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }
}

impl ReadAt for LocalFileReader {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_at(buf, offset)
        }

        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;
            // seek_read moves the cursor, but every read here is positional
            self.file.seek_read(buf, offset)
        }

        #[cfg(not(any(unix, windows)))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = &self.file;
            file.seek(SeekFrom::Start(offset))?;
            file.read(buf)
        }
    }

    fn size(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_reader_positional() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let reader = LocalFileReader::new(&path).unwrap();
        assert_eq!(reader.size(), 10);

        let mut buf = [0u8; 3];
        reader.read_exact_at(7, &mut buf).unwrap();
        assert_eq!(&buf, b"789");
        reader.read_exact_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"012");
    }

    #[test]
    fn test_local_reader_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = LocalFileReader::new(&dir.path().join("nope")).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
