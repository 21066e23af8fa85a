use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{AsarError, Result};
use crate::io::ReadAt;

use super::archive::Archive;
use super::structures::Entry;

/// What an extraction produced.
#[derive(Debug, Default)]
pub struct ExtractSummary {
    pub directories: usize,
    pub files: usize,
    /// Files copied from the unpacked sidecar.
    pub unpacked: usize,
    pub links: usize,
    /// Entries that were skipped, as [`AsarError::MissingUnpackedFile`].
    pub skipped: Vec<AsarError>,
}

/// Materializes an archive's entry tree on disk.
///
/// The walk is depth-first with parents before children and siblings in
/// name order. It never overwrites an existing destination.
pub struct Extractor<'a, R: ReadAt> {
    archive: &'a Archive<R>,
}

impl<'a, R: ReadAt> Extractor<'a, R> {
    pub fn new(archive: &'a Archive<R>) -> Self {
        Self { archive }
    }

    /// Extract into `destination`.
    ///
    /// # Errors
    ///
    /// [`AsarError::DestinationExists`] if anything (even a dangling link)
    /// is already at `destination`. Missing unpacked files are not errors;
    /// they are logged and reported in [`ExtractSummary::skipped`]. Any other
    /// failure aborts the walk and leaves already written entries in place.
    pub fn extract(&self, destination: &Path) -> Result<ExtractSummary> {
        if fs::symlink_metadata(destination).is_ok() {
            return Err(AsarError::DestinationExists {
                path: destination.to_path_buf(),
            });
        }

        let mut summary = ExtractSummary::default();
        if let Some(children) = self.archive.root().children() {
            self.extract_dir(&[], children, destination, &mut summary)?;
        }

        debug!(
            archive = %self.archive.path().display(),
            destination = %destination.display(),
            files = summary.files,
            unpacked = summary.unpacked,
            links = summary.links,
            skipped = summary.skipped.len(),
            "extracted archive"
        );
        Ok(summary)
    }

    fn extract_dir(
        &self,
        logical_dir: &[&str],
        children: &BTreeMap<String, Entry>,
        dir: &Path,
        summary: &mut ExtractSummary,
    ) -> Result<()> {
        fs::create_dir_all(dir)?;
        summary.directories += 1;

        for (name, child) in children {
            let target = dir.join(name);
            let mut logical: Vec<&str> = logical_dir.to_vec();
            logical.push(name);

            match child {
                Entry::Directory(grandchildren) => {
                    self.extract_dir(&logical, grandchildren, &target, summary)?;
                }
                Entry::File {
                    size,
                    offset,
                    executable,
                } => {
                    let data = self.archive.read_file_bytes(*offset, *size)?;
                    fs::write(&target, &data)?;
                    if *executable {
                        set_executable(&target)?;
                    }
                    summary.files += 1;
                }
                Entry::UnpackedFile { executable, .. } => {
                    let logical = logical.join("/");
                    if self.copy_unpacked(&logical, &target)? {
                        if *executable {
                            set_executable(&target)?;
                        }
                        summary.unpacked += 1;
                    } else {
                        summary.skipped.push(AsarError::MissingUnpackedFile {
                            path: self.archive.unpacked_path(&logical),
                        });
                    }
                }
                Entry::Symlink { link } => {
                    self.extract_link(logical_dir, link, &target)?;
                    summary.links += 1;
                }
            }
        }

        Ok(())
    }

    /// Copy a file from the unpacked sidecar. Returns `false` if it is missing.
    fn copy_unpacked(&self, logical: &str, target: &Path) -> Result<bool> {
        let unpacked_dir = self.archive.unpacked_dir();
        if !unpacked_dir.is_dir() {
            warn!(
                file = logical,
                unpacked_dir = %unpacked_dir.display(),
                "skipping unpacked file, sidecar directory missing"
            );
            return Ok(false);
        }

        let src = self.archive.unpacked_path(logical);
        if !src.exists() {
            warn!(
                file = logical,
                src = %src.display(),
                "skipping unpacked file, not present in sidecar"
            );
            return Ok(false);
        }

        fs::copy(&src, target)?;
        debug!(file = logical, "copied unpacked file");
        Ok(true)
    }

    fn extract_link(&self, logical_dir: &[&str], link: &str, target: &Path) -> Result<()> {
        let link_path = if Path::new(link).is_absolute() {
            PathBuf::from(link)
        } else {
            relative_link(logical_dir, link)
        };
        let link_is_dir = self
            .archive
            .find(link)
            .is_some_and(Entry::is_dir);

        match make_symlink(&link_path, target, link_is_dir) {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let meta = fs::symlink_metadata(target)?;
                if meta.is_dir() {
                    fs::remove_dir_all(target)?;
                } else {
                    fs::remove_file(target)?;
                }
                make_symlink(&link_path, target, link_is_dir)?;
            }
            other => other?,
        }

        debug!(
            link = %target.display(),
            to = %link_path.display(),
            "created symlink"
        );
        Ok(())
    }
}

/// Path from the directory `logical_dir` to the archive-root-relative `link`.
///
/// `.` and `..` in `link` are resolved lexically; `..` never climbs above the root.
fn relative_link(logical_dir: &[&str], link: &str) -> PathBuf {
    let mut to: Vec<&str> = Vec::new();
    for seg in link.split(['/', '\\']) {
        match seg {
            "" | "." => {}
            ".." => {
                to.pop();
            }
            seg => to.push(seg),
        }
    }

    let common = logical_dir
        .iter()
        .zip(&to)
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..logical_dir.len() {
        out.push("..");
    }
    for seg in &to[common..] {
        out.push(seg);
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

#[cfg(unix)]
fn make_symlink(original: &Path, link: &Path, _is_dir: bool) -> io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
fn make_symlink(original: &Path, link: &Path, is_dir: bool) -> io::Result<()> {
    if is_dir {
        std::os::windows::fs::symlink_dir(original, link)
    } else {
        std::os::windows::fs::symlink_file(original, link)
    }
}

#[cfg(not(any(unix, windows)))]
fn make_symlink(_original: &Path, _link: &Path, _is_dir: bool) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}

#[cfg(unix)]
fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o111);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asar::test_support::image;
    use tempfile::TempDir;

    #[test]
    fn test_relative_link() {
        assert_eq!(relative_link(&[], "a.txt"), PathBuf::from("a.txt"));
        assert_eq!(relative_link(&["sub"], "a.txt"), PathBuf::from("../a.txt"));
        assert_eq!(relative_link(&["sub"], "sub/b.txt"), PathBuf::from("b.txt"));
        assert_eq!(
            relative_link(&["x", "y"], "x/z/c"),
            PathBuf::from("../z/c")
        );
        assert_eq!(relative_link(&[], "./d/../a.txt"), PathBuf::from("a.txt"));
        assert_eq!(relative_link(&["sub"], "sub"), PathBuf::from("."));
        assert_eq!(relative_link(&[], "../../a"), PathBuf::from("a"));
    }

    #[test]
    fn test_extract_packed_file() {
        let dir = TempDir::new().unwrap();
        let archive = Archive::open_bytes(
            dir.path().join("app.asar"),
            image(
                r#"{"files":{"a.txt":{"size":5,"offset":"0"},"d":{"files":{"e":{"files":{}}}}}}"#,
                b"hello",
            ),
        )
        .unwrap();

        let out = dir.path().join("out");
        let summary = archive.extract(&out).unwrap();

        assert_eq!(fs::read(out.join("a.txt")).unwrap(), b"hello");
        assert!(out.join("d").join("e").is_dir());
        assert_eq!(summary.files, 1);
        assert_eq!(summary.directories, 3);
        assert!(summary.skipped.is_empty());
    }

    #[test]
    fn test_extract_refuses_existing_destination() {
        let dir = TempDir::new().unwrap();
        let archive =
            Archive::open_bytes(dir.path().join("app.asar"), image(r#"{"files":{}}"#, b""))
                .unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();

        for _ in 0..2 {
            assert!(matches!(
                archive.extract(&out),
                Err(AsarError::DestinationExists { .. })
            ));
        }
    }

    #[test]
    fn test_extract_out_of_bounds_aborts() {
        let dir = TempDir::new().unwrap();
        let archive = Archive::open_bytes(
            dir.path().join("app.asar"),
            image(r#"{"files":{"a.txt":{"size":50,"offset":"0"}}}"#, b"hello"),
        )
        .unwrap();

        assert!(matches!(
            archive.extract(dir.path().join("out")),
            Err(AsarError::OutOfBounds { .. })
        ));
        assert!(!dir.path().join("out").join("a.txt").exists());
    }

    #[test]
    fn test_extract_unpacked_present_and_missing() {
        let dir = TempDir::new().unwrap();
        let sidecar = dir.path().join("app.asar.unpacked");
        fs::create_dir_all(&sidecar).unwrap();
        fs::write(sidecar.join("img.png"), b"0123456789").unwrap();

        let archive = Archive::open_bytes(
            dir.path().join("app.asar"),
            image(
                r#"{"files":{"img.png":{"size":10},"lost.png":{"size":3},"z.txt":{"size":2,"offset":"0"}}}"#,
                b"ok",
            ),
        )
        .unwrap();

        let out = dir.path().join("out");
        let summary = archive.extract(&out).unwrap();

        assert_eq!(fs::read(out.join("img.png")).unwrap(), b"0123456789");
        assert!(!out.join("lost.png").exists());
        assert_eq!(fs::read(out.join("z.txt")).unwrap(), b"ok");
        assert_eq!(summary.unpacked, 1);
        assert_eq!(summary.skipped.len(), 1);
        assert!(matches!(
            &summary.skipped[0],
            AsarError::MissingUnpackedFile { path } if path.ends_with("lost.png")
        ));
    }

    #[test]
    fn test_extract_unpacked_without_sidecar() {
        let dir = TempDir::new().unwrap();
        let archive = Archive::open_bytes(
            dir.path().join("app.asar"),
            image(r#"{"files":{"img.png":{"size":10}}}"#, b""),
        )
        .unwrap();

        let out = dir.path().join("out");
        let summary = archive.extract(&out).unwrap();
        assert!(out.is_dir());
        assert!(!out.join("img.png").exists());
        assert_eq!(summary.skipped.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_symlinks() {
        let dir = TempDir::new().unwrap();
        let archive = Archive::open_bytes(
            dir.path().join("app.asar"),
            image(
                r#"{"files":{"a.txt":{"size":5,"offset":"0"},"link.txt":{"link":"a.txt"},"sub":{"files":{"up":{"link":"a.txt"}}}}}"#,
                b"hello",
            ),
        )
        .unwrap();

        let out = dir.path().join("out");
        let summary = archive.extract(&out).unwrap();

        assert_eq!(summary.links, 2);
        assert_eq!(fs::read_link(out.join("link.txt")).unwrap(), PathBuf::from("a.txt"));
        assert_eq!(fs::read(out.join("link.txt")).unwrap(), b"hello");
        assert_eq!(
            fs::read_link(out.join("sub").join("up")).unwrap(),
            PathBuf::from("../a.txt")
        );
        assert_eq!(fs::read(out.join("sub").join("up")).unwrap(), b"hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_link_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let archive = Archive::open_bytes(
            dir.path().join("app.asar"),
            image(r#"{"files":{"a.txt":{"size":5,"offset":"0"}}}"#, b"hello"),
        )
        .unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        fs::write(out.join("link.txt"), b"stale").unwrap();

        Extractor::new(&archive)
            .extract_link(&[], "a.txt", &out.join("link.txt"))
            .unwrap();
        assert_eq!(fs::read_link(out.join("link.txt")).unwrap(), PathBuf::from("a.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_executable_bit() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let archive = Archive::open_bytes(
            dir.path().join("app.asar"),
            image(
                r#"{"files":{"run.sh":{"size":2,"offset":"0","executable":true}}}"#,
                b"#!",
            ),
        )
        .unwrap();
        let out = dir.path().join("out");
        archive.extract(&out).unwrap();

        let mode = fs::metadata(out.join("run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
