use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{AsarError, Result};

use super::parser::HeaderCodec;
use super::structures::Entry;

/// An archive built in memory by [`pack`].
///
/// Nothing touches disk until the caller persists it.
#[derive(Debug, Clone)]
pub struct PackedArchive {
    source: PathBuf,
    root: Entry,
    blob: Vec<u8>,
}

impl PackedArchive {
    /// Directory the archive was packed from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn root(&self) -> &Entry {
        &self.root
    }

    /// Concatenated contents of every packed file.
    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    /// Full archive image: encoded header followed by the blob.
    pub fn persist(&self) -> Result<Vec<u8>> {
        let mut out = HeaderCodec::encode(&self.root)?;
        out.reserve(self.blob.len());
        out.extend_from_slice(&self.blob);
        Ok(out)
    }

    /// Persist and write the image to `path`, replacing any existing file.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let image = self.persist()?;
        fs::write(path.as_ref(), &image)?;
        debug!(
            path = %path.as_ref().display(),
            bytes = image.len(),
            "wrote archive"
        );
        Ok(())
    }
}

/// Pack `source_dir` into an in-memory archive.
///
/// Siblings are visited in file name order, so identical trees produce
/// identical images. Regular files are appended to the blob, symlinks are
/// recorded with their resolved absolute target, and anything else (fifos,
/// sockets, devices) is skipped.
///
/// # Errors
///
/// [`AsarError::Io`] if `source_dir` is missing or not a directory. Names that
/// are not valid UTF-8 and any other I/O failure abort the pack as well.
pub fn pack(source_dir: impl AsRef<Path>) -> Result<PackedArchive> {
    let source = source_dir.as_ref();
    let meta = fs::metadata(source)?;
    if !meta.is_dir() {
        return Err(AsarError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a directory", source.display()),
        )));
    }

    let mut root = Entry::empty_dir();
    let mut blob = Vec::new();

    for entry in WalkDir::new(source)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(|_| invalid_data(entry.path(), "escapes the source directory"))?;
        let name = entry
            .file_name()
            .to_str()
            .ok_or_else(|| invalid_data(entry.path(), "name is not valid UTF-8"))?
            .to_string();
        let file_type = entry.file_type();

        let node = if file_type.is_dir() {
            Entry::empty_dir()
        } else if file_type.is_symlink() {
            Entry::Symlink {
                link: resolve_link(entry.path())?,
            }
        } else if file_type.is_file() {
            let data = fs::read(entry.path())?;
            let size = data.len() as u64;
            let offset = blob.len() as u64;
            blob.extend_from_slice(&data);
            Entry::File {
                size,
                offset,
                executable: is_executable(&entry.metadata().map_err(io::Error::from)?),
            }
        } else {
            warn!(path = %entry.path().display(), "skipping unsupported file type");
            continue;
        };

        parent_dir(&mut root, rel)?.insert(name, node);
    }

    debug!(
        source = %source.display(),
        blob_len = blob.len(),
        "packed directory"
    );
    Ok(PackedArchive {
        source: source.to_path_buf(),
        root,
        blob,
    })
}

fn invalid_data(path: &Path, msg: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("{}: {msg}", path.display()),
    )
}

/// Children map of the directory that will hold `rel`.
fn parent_dir<'a>(root: &'a mut Entry, rel: &Path) -> Result<&'a mut BTreeMap<String, Entry>> {
    let mut node = root;
    if let Some(parent) = rel.parent() {
        for comp in parent.components() {
            let name = comp
                .as_os_str()
                .to_str()
                .ok_or_else(|| invalid_data(rel, "name is not valid UTF-8"))?;
            node = node
                .children_mut()
                .and_then(|children| children.get_mut(name))
                .ok_or_else(|| invalid_data(rel, "parent directory was not packed"))?;
        }
    }
    node.children_mut()
        .ok_or_else(|| invalid_data(rel, "parent is not a directory").into())
}

/// Absolute real path a symlink points at. Dangling links keep their literal target.
fn resolve_link(path: &Path) -> Result<String> {
    let target = match fs::canonicalize(path) {
        Ok(resolved) => resolved,
        Err(e) => {
            let literal = fs::read_link(path)?;
            warn!(
                path = %path.display(),
                target = %literal.display(),
                error = %e,
                "symlink does not resolve, keeping literal target"
            );
            literal
        }
    };
    target
        .into_os_string()
        .into_string()
        .map_err(|_| invalid_data(path, "link target is not valid UTF-8").into())
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    false
}
