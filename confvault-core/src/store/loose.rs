use super::{validate_ref_name, ObjectStore};
use crate::error::{Error, Result};
use crate::files::atomic_write;
use crate::models::{ObjectId, ObjectKind, RawObject};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use walkdir::WalkDir;

const OBJECTS_DIR: &str = "objects";

/// Git-style loose objects: `objects/<2 hex>/<62 hex>`, each file holding
/// `<kind>\0<payload>`. Refs are small text files under the same root.
pub struct LooseObjectStore {
    root: PathBuf,
    refs_lock: Mutex<()>,
}

impl LooseObjectStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(root.join(OBJECTS_DIR)).map_err(|e| {
            Error::Repository(format!(
                "Failed to create objects directory under {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self {
            root,
            refs_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.as_str();
        self.root.join(OBJECTS_DIR).join(&hex[..2]).join(&hex[2..])
    }

    fn ref_path(&self, name: &str) -> Result<PathBuf> {
        validate_ref_name(name)?;
        if name == OBJECTS_DIR || name.starts_with("objects/") {
            return Err(Error::PathSecurity(format!("invalid ref name: {:?}", name)));
        }
        Ok(self.root.join(name))
    }
}

impl ObjectStore for LooseObjectStore {
    fn put(&self, kind: ObjectKind, data: &[u8]) -> Result<ObjectId> {
        let id = ObjectId::compute(kind, data);
        let path = self.object_path(&id);
        if path.exists() {
            return Ok(id);
        }

        let mut encoded = Vec::with_capacity(kind.as_str().len() + 1 + data.len());
        encoded.extend_from_slice(kind.as_str().as_bytes());
        encoded.push(0);
        encoded.extend_from_slice(data);
        atomic_write(&path, &encoded)?;

        Ok(id)
    }

    fn get(&self, id: &ObjectId) -> Result<Option<RawObject>> {
        let bytes = match fs::read(self.object_path(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let split = bytes
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| Error::CorruptObject(format!("{}: missing header", id)))?;
        let kind = std::str::from_utf8(&bytes[..split])
            .ok()
            .and_then(ObjectKind::parse)
            .ok_or_else(|| Error::CorruptObject(format!("{}: bad kind", id)))?;

        Ok(Some(RawObject {
            kind,
            data: bytes[split + 1..].to_vec(),
        }))
    }

    fn contains(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.object_path(id).is_file())
    }

    fn remove(&self, id: &ObjectId) -> Result<bool> {
        match fs::remove_file(self.object_path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn object_ids(&self) -> Result<Vec<ObjectId>> {
        let objects_dir = self.root.join(OBJECTS_DIR);
        let mut ids = Vec::new();

        for entry in WalkDir::new(&objects_dir).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let prefix = entry
                .path()
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let name = entry.file_name().to_string_lossy();
            // Temp files left by an interrupted write never parse as ids.
            if let Ok(id) = ObjectId::parse(&format!("{}{}", prefix, name)) {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }

    fn read_ref(&self, name: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.ref_path(name)?) {
            Ok(value) => Ok(Some(value.trim_end().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn update_ref(&self, name: &str, expected: Option<&str>, new: &str) -> Result<()> {
        let path = self.ref_path(name)?;
        let _guard = self
            .refs_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let current = self.read_ref(name)?;
        if current.as_deref() != expected {
            return Err(Error::RefConflict(name.to_string()));
        }

        atomic_write(&path, format!("{}\n", new).as_bytes())
    }

    fn delete_ref(&self, name: &str) -> Result<bool> {
        let path = self.ref_path(name)?;
        let _guard = self
            .refs_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let mut refs = Vec::new();

        for candidate in [self.root.join("HEAD"), self.root.join("refs")] {
            if !candidate.exists() {
                continue;
            }
            for entry in WalkDir::new(&candidate) {
                let entry = entry.map_err(|e| Error::Io(e.into()))?;
                if !entry.file_type().is_file() || is_temp_file(entry.path()) {
                    continue;
                }
                let name = match entry.path().strip_prefix(&self.root) {
                    Ok(rel) => rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/"),
                    Err(_) => continue,
                };
                if !name.starts_with(prefix) {
                    continue;
                }
                if let Some(value) = self.read_ref(&name)? {
                    refs.push((name, value));
                }
            }
        }

        refs.sort();
        Ok(refs)
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with(".tmp-"))
        .unwrap_or(false)
}
