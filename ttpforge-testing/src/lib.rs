//! In-memory [`Filesystem`] backing for tests that exercise the engine
//! without touching the real disk.

use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    sync::Mutex,
};

use ttpforge_core::{Filesystem, Metadata};

#[derive(Debug, Clone)]
enum Entry {
    File { contents: Vec<u8>, mode: u32 },
    Dir,
}

/// A [`Filesystem`] backed by a `BTreeMap` instead of the real disk.
///
/// Paths are stored as given; callers should use absolute paths the way the
/// engine does (it always resolves against `invocation_cwd`/`cwd_stack`).
#[derive(Debug, Default)]
pub struct MemoryFilesystem {
    entries: Mutex<BTreeMap<PathBuf, Entry>>,
}

impl MemoryFilesystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file directly, bypassing `write_file`'s parent-creation.
    pub fn seed_file(&self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        let path = path.into();
        self.ensure_parents(&path);
        self.entries.lock().unwrap().insert(
            path,
            Entry::File {
                contents: contents.into(),
                mode: 0o644,
            },
        );
    }

    fn ensure_parents(&self, path: &Path) {
        let mut entries = self.entries.lock().unwrap();
        let mut ancestor = path;
        while let Some(parent) = ancestor.parent() {
            if parent.as_os_str().is_empty() {
                break;
            }
            entries.entry(parent.to_path_buf()).or_insert(Entry::Dir);
            ancestor = parent;
        }
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{}: no such file or directory", path.display()),
    )
}

impl Filesystem for MemoryFilesystem {
    fn exists(&self, path: &Path) -> bool {
        self.entries.lock().unwrap().contains_key(path)
    }

    fn metadata(&self, path: &Path) -> io::Result<Metadata> {
        match self.entries.lock().unwrap().get(path) {
            Some(Entry::File { contents, mode }) => Ok(Metadata {
                is_dir: false,
                is_file: true,
                len: contents.len() as u64,
                mode: Some(*mode),
            }),
            Some(Entry::Dir) => Ok(Metadata {
                is_dir: true,
                is_file: false,
                len: 0,
                mode: Some(0o755),
            }),
            None => Err(not_found(path)),
        }
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        match self.entries.lock().unwrap().get(path) {
            Some(Entry::File { contents, .. }) => Ok(contents.clone()),
            Some(Entry::Dir) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{}: is a directory", path.display()),
            )),
            None => Err(not_found(path)),
        }
    }

    fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
        self.ensure_parents(path);
        self.entries.lock().unwrap().insert(
            path.to_path_buf(),
            Entry::File {
                contents: contents.to_vec(),
                mode,
            },
        );
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.ensure_parents(path);
        self.entries
            .lock()
            .unwrap()
            .entry(path.to_path_buf())
            .or_insert(Entry::Dir);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        match self.entries.lock().unwrap().remove(path) {
            Some(Entry::File { .. }) => Ok(()),
            Some(other) => {
                self.entries.lock().unwrap().insert(path.to_path_buf(), other);
                Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("{}: is a directory", path.display()),
                ))
            }
            None => Err(not_found(path)),
        }
    }

    fn remove_tree(&self, path: &Path) -> io::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        if !entries.contains_key(path) {
            return Err(not_found(path));
        }
        let doomed: Vec<PathBuf> = entries
            .keys()
            .filter(|p| *p == path || p.starts_with(path))
            .cloned()
            .collect();
        for p in doomed {
            entries.remove(&p);
        }
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.ensure_parents(to);
        let mut entries = self.entries.lock().unwrap();
        let moved: Vec<(PathBuf, Entry)> = entries
            .iter()
            .filter(|(p, _)| *p == from || p.starts_with(from))
            .map(|(p, e)| (p.clone(), e.clone()))
            .collect();
        if moved.is_empty() {
            return Err(not_found(from));
        }
        for (p, entry) in moved {
            let rest = p.strip_prefix(from).unwrap_or(&p);
            let new_path = if rest.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(rest)
            };
            entries.remove(&p);
            entries.insert(new_path, entry);
        }
        Ok(())
    }

    fn walk(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let entries = self.entries.lock().unwrap();
        match entries.get(path) {
            Some(Entry::File { .. }) => return Ok(vec![path.to_path_buf()]),
            Some(Entry::Dir) => {}
            None => return Err(not_found(path)),
        }
        let mut out: Vec<PathBuf> = entries
            .keys()
            .filter(|p| p.starts_with(path) && *p != path)
            .cloned()
            .collect();
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_file_and_creates_parents() {
        let fs = MemoryFilesystem::new();
        fs.write_file(Path::new("/a/b/c.txt"), b"hi", 0o600).unwrap();
        assert!(fs.exists(Path::new("/a/b/c.txt")));
        assert!(fs.exists(Path::new("/a/b")));
        assert_eq!(fs.read_file(Path::new("/a/b/c.txt")).unwrap(), b"hi");
        let meta = fs.metadata(Path::new("/a/b/c.txt")).unwrap();
        assert!(meta.is_file);
        assert_eq!(meta.len, 2);
    }

    #[test]
    fn walk_lists_descendants_in_lexical_order() {
        let fs = MemoryFilesystem::new();
        fs.write_file(Path::new("/root/b.txt"), b"", 0o644).unwrap();
        fs.write_file(Path::new("/root/a.txt"), b"", 0o644).unwrap();
        let entries: Vec<_> = fs
            .walk(Path::new("/root"))
            .unwrap()
            .into_iter()
            .filter(|p| p.extension().is_some())
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn remove_tree_drops_all_descendants() {
        let fs = MemoryFilesystem::new();
        fs.write_file(Path::new("/root/a/b.txt"), b"", 0o644).unwrap();
        fs.remove_tree(Path::new("/root/a")).unwrap();
        assert!(!fs.exists(Path::new("/root/a/b.txt")));
        assert!(!fs.exists(Path::new("/root/a")));
    }

    #[test]
    fn rename_moves_a_subtree() {
        let fs = MemoryFilesystem::new();
        fs.write_file(Path::new("/root/a/b.txt"), b"hi", 0o644).unwrap();
        fs.rename(Path::new("/root/a"), Path::new("/root/z")).unwrap();
        assert!(!fs.exists(Path::new("/root/a/b.txt")));
        assert_eq!(fs.read_file(Path::new("/root/z/b.txt")).unwrap(), b"hi");
    }
}
