//! Filesystem port.
//!
//! Every filesystem touch made by the engine and its actions goes through
//! this trait rather than reaching for `std::fs` directly, so tests can
//! swap in an in-memory backing (see `ttpforge_testing::MemoryFilesystem`).

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use log::trace;
use walkdir::WalkDir;

/// Minimal file metadata needed by actions and checks.
#[derive(Debug, Clone, Copy)]
pub struct Metadata {
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// Whether the entry is a regular file.
    pub is_file: bool,
    /// Size in bytes, for regular files.
    pub len: u64,
    /// Unix permission bits, when known.
    pub mode: Option<u32>,
}

/// Abstract filesystem operations so the engine and its actions can run
/// against either the real OS or an in-memory backing in tests.
///
/// `walk` must visit entries in lexical order, matching
/// `WalkDir::sort_by_file_name` on the real backing.
pub trait Filesystem: Send + Sync {
    /// Returns whether `path` exists.
    fn exists(&self, path: &Path) -> bool;

    /// Returns metadata for `path`.
    fn metadata(&self, path: &Path) -> io::Result<Metadata>;

    /// Reads the full contents of a file.
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Writes `contents` to `path`, creating or truncating it, with the given
    /// unix permission bits (ignored on non-unix backings).
    fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> io::Result<()>;

    /// Creates `path` and all missing parent directories.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Removes a single file.
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Removes a file or directory tree rooted at `path`.
    fn remove_tree(&self, path: &Path) -> io::Result<()>;

    /// Renames/moves `from` to `to`.
    ///
    /// Atomic on the real OS backing only when `from` and `to` share a mount
    /// point; callers must not rely on atomicity across filesystems.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Lists all files and directories under `path`, in lexical order,
    /// depth-first, including `path` itself only if it is a leaf.
    fn walk(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
}

/// Filesystem backed directly by `std::fs` / `walkdir`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFilesystem;

impl Filesystem for OsFilesystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn metadata(&self, path: &Path) -> io::Result<Metadata> {
        let meta = fs::metadata(path)?;
        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            Some(meta.permissions().mode() & 0o7777)
        };
        #[cfg(not(unix))]
        let mode = None;
        Ok(Metadata {
            is_dir: meta.is_dir(),
            is_file: meta.is_file(),
            len: meta.len(),
            mode,
        })
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        trace!("reading {path:?}");
        fs::read(path)
    }

    fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
        trace!("writing {path:?}");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        }
        #[cfg(not(unix))]
        let _ = mode;
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_tree(&self, path: &Path) -> io::Result<()> {
        let meta = fs::symlink_metadata(path)?;
        if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(from, to)
    }

    fn walk(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = entry.map_err(|e| io::Error::other(e.to_string()))?;
            out.push(entry.into_path());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_filesystem_round_trips_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsFilesystem;
        let file = dir.path().join("a").join("b.txt");
        fs.write_file(&file, b"hello", 0o644).unwrap();
        assert!(fs.exists(&file));
        assert_eq!(fs.read_file(&file).unwrap(), b"hello");
        let meta = fs.metadata(&file).unwrap();
        assert!(meta.is_file);
        assert_eq!(meta.len, 5);
    }

    #[test]
    fn walk_visits_entries_lexically() {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsFilesystem;
        fs.write_file(&dir.path().join("b.txt"), b"", 0o644).unwrap();
        fs.write_file(&dir.path().join("a.txt"), b"", 0o644).unwrap();
        let entries: Vec<_> = fs
            .walk(dir.path())
            .unwrap()
            .into_iter()
            .filter(|p| p.extension().is_some())
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["a.txt", "b.txt"]);
    }
}
