//! File Manager: byte-level access to the working tree.
//!
//! The engine never touches the filesystem directly for working-tree files;
//! it reads and lists through [`FileManager`] and only writes or removes
//! during rollback and restore. Paths are always relative to the root and
//! `/`-separated.

use crate::error::{Error, Result};
use globset::GlobBuilder;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use walkdir::WalkDir;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

pub trait FileManager: Send + Sync {
    /// Relative paths of regular files matching `pattern`, sorted.
    fn list_files(&self, pattern: &str) -> Result<Vec<String>>;

    fn read(&self, path: &str) -> Result<Vec<u8>>;

    fn write(&self, path: &str, data: &[u8]) -> Result<()>;

    fn remove(&self, path: &str) -> Result<()>;

    /// Fail with [`Error::PathSecurity`] if `path` may not be written.
    fn check_path(&self, path: &str) -> Result<()>;
}

/// [`FileManager`] over a directory on the local disk.
pub struct FsFileManager {
    root: PathBuf,
    metadata_dir: String,
}

impl FsFileManager {
    pub fn new(root: impl Into<PathBuf>, metadata_dir: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            metadata_dir: metadata_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a relative path onto the root, refusing anything that could
    /// leave it or reach the metadata directory.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let rel = Path::new(path);
        if path.is_empty() || path.contains('\\') {
            return Err(Error::PathSecurity(format!("invalid path {:?}", path)));
        }

        let mut clean = PathBuf::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => clean.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(Error::PathSecurity(format!(
                        "path escapes the root: {:?}",
                        path
                    )))
                }
            }
        }

        let first = clean.components().next().map(|c| c.as_os_str().to_owned());
        match first {
            None => return Err(Error::PathSecurity(format!("invalid path {:?}", path))),
            Some(first) if first == self.metadata_dir.as_str() => {
                return Err(Error::PathSecurity(format!(
                    "path points into the metadata directory: {:?}",
                    path
                )))
            }
            Some(_) => {}
        }

        let full = self.root.join(&clean);
        self.check_symlink_escape(&full, path)?;
        Ok(full)
    }

    fn check_symlink_escape(&self, full: &Path, original: &str) -> Result<()> {
        let root = match self.root.canonicalize() {
            Ok(root) => root,
            Err(_) => return Ok(()),
        };
        let existing = full.ancestors().find(|p| p.exists());
        if let Some(existing) = existing {
            let resolved = existing.canonicalize()?;
            if !resolved.starts_with(&root) {
                return Err(Error::PathSecurity(format!(
                    "path resolves outside the root: {:?}",
                    original
                )));
            }
        }
        Ok(())
    }

    fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

impl FileManager for FsFileManager {
    fn list_files(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()?
            .compile_matcher();
        let metadata_dir = self.metadata_dir.as_str();

        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                let name = entry.file_name();
                !(name == ".git" || (entry.depth() == 1 && name == metadata_dir))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(&self.root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
            let Some(parts) = parts else {
                tracing::warn!("Skipping non UTF-8 path {}", rel.display());
                continue;
            };
            let rel = parts.join("/");
            if matcher.is_match(rel.as_str()) {
                files.push(rel);
            }
        }

        files.sort();
        Ok(files)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        fs::read(&full).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound(format!("file {}", path)),
            _ => Error::Io(e),
        })
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        atomic_write(&full, data)
    }

    fn remove(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full) {
            Ok(()) => {
                self.prune_empty_parents(&full);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn check_path(&self, path: &str) -> Result<()> {
        self.resolve(path).map(|_| ())
    }
}

/// Write `content` to `path` through a synced temp file and a rename, so
/// readers see either the old file or the complete new one.
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        Error::Repository(format!("Path has no parent directory: {}", path.display()))
    })?;
    fs::create_dir_all(parent)?;

    let temp_path = parent.join(format!(
        ".tmp-{}-{}",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let write_result = (|| -> io::Result<()> {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()
    })();

    if let Err(e) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::Io(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FsFileManager) {
        let dir = TempDir::new().unwrap();
        let fm = FsFileManager::new(dir.path(), ".confvault");
        (dir, fm)
    }

    #[test]
    fn test_list_files_skips_metadata_and_git() {
        let (dir, fm) = setup();
        fs::create_dir_all(dir.path().join(".confvault/objects")).unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::create_dir_all(dir.path().join("packages")).unwrap();
        fs::write(dir.path().join(".confvault/HEAD"), "x").unwrap();
        fs::write(dir.path().join(".git/config"), "x").unwrap();
        fs::write(dir.path().join("configuration.yaml"), "a: 1").unwrap();
        fs::write(dir.path().join("packages/lights.yaml"), "b: 2").unwrap();

        let files = fm.list_files("**").unwrap();
        assert_eq!(files, vec!["configuration.yaml", "packages/lights.yaml"]);

        let top = fm.list_files("*.yaml").unwrap();
        assert_eq!(top, vec!["configuration.yaml"]);
    }

    #[test]
    fn test_write_read_remove() {
        let (dir, fm) = setup();
        fm.write("nested/deep/file.yaml", b"content").unwrap();
        assert_eq!(fm.read("nested/deep/file.yaml").unwrap(), b"content");

        fm.remove("nested/deep/file.yaml").unwrap();
        assert!(!dir.path().join("nested").exists());
        assert!(matches!(
            fm.read("nested/deep/file.yaml"),
            Err(Error::NotFound(_))
        ));
        fm.remove("nested/deep/file.yaml").unwrap();
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let (_dir, fm) = setup();
        assert!(matches!(
            fm.resolve("../outside.yaml"),
            Err(Error::PathSecurity(_))
        ));
        assert!(matches!(
            fm.resolve("/etc/passwd"),
            Err(Error::PathSecurity(_))
        ));
        assert!(matches!(
            fm.resolve(".confvault/HEAD"),
            Err(Error::PathSecurity(_))
        ));
        assert!(matches!(fm.resolve(""), Err(Error::PathSecurity(_))));
        assert!(fm.resolve("./ok/file.yaml").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let (dir, fm) = setup();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        assert!(matches!(
            fm.write("link/evil.yaml", b"x"),
            Err(Error::PathSecurity(_))
        ));
        assert!(!outside.path().join("evil.yaml").exists());
    }

    #[test]
    fn test_atomic_write_replaces() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested").join("file.txt");

        atomic_write(&target, b"first").unwrap();
        atomic_write(&target, b"second").unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"second");
        let leftovers = fs::read_dir(target.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
