//! Lock store used for leader election
//!
//! A hierarchical path store whose `create` is an atomic create-if-absent.
//! Two backends share the [`LockStore`] contract:
//! - [`MemoryLockStore`]: one mutex over a flat map of normalized paths
//! - [`DiskLockStore`]: a directory tree, using `create_new` for atomicity

use crate::common::{Error, Result};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Folder,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Overwrite,
    Append,
}

/// Contract consumed by the coordinator's election
pub trait LockStore: Send + Sync {
    /// Create `path`. Fails with [`Error::PathExists`] if anything is already there.
    fn create(&self, path: &str, kind: EntryKind, create_dirs: bool) -> Result<()>;

    fn exists(&self, path: &str) -> bool;

    fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Write a file, creating it if absent.
    fn write(&self, path: &str, data: &[u8], mode: WriteMode, create_dirs: bool) -> Result<()>;

    /// Remove a file, or a folder with everything below it.
    fn remove(&self, path: &str) -> Result<()>;

    fn read_string(&self, path: &str) -> Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|_| Error::LockStore(format!("{} is not UTF-8", path)))
    }
}

/// Normalize `/a//b/` to `a/b`. Rejects empty and relative components.
fn normalize(path: &str) -> Result<String> {
    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" => continue,
            "." | ".." => {
                return Err(Error::LockStore(format!("relative component in {}", path)));
            }
            p => parts.push(p),
        }
    }
    if parts.is_empty() {
        return Err(Error::LockStore("empty path".into()));
    }
    Ok(parts.join("/"))
}

fn parent_of(path: &str) -> Option<&str> {
    path.rfind('/').map(|idx| &path[..idx])
}

#[derive(Debug, Clone)]
enum Entry {
    Folder,
    File(Vec<u8>),
}

/// In-memory lock store
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure the parent folder of `path` exists.
    fn ensure_parent(
        entries: &mut BTreeMap<String, Entry>,
        path: &str,
        create_dirs: bool,
    ) -> Result<()> {
        let Some(parent) = parent_of(path) else {
            return Ok(()); // top level
        };

        match entries.get(parent) {
            Some(Entry::Folder) => Ok(()),
            Some(Entry::File(_)) => Err(Error::LockStore(format!("{} is a file", parent))),
            None if !create_dirs => Err(Error::PathNotFound(parent.to_string())),
            None => {
                let mut prefix = String::new();
                for part in parent.split('/') {
                    if !prefix.is_empty() {
                        prefix.push('/');
                    }
                    prefix.push_str(part);
                    match entries.get(&prefix) {
                        Some(Entry::Folder) => {}
                        Some(Entry::File(_)) => {
                            return Err(Error::LockStore(format!("{} is a file", prefix)));
                        }
                        None => {
                            entries.insert(prefix.clone(), Entry::Folder);
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Render the tree, one path per line. Used by the admin API.
    pub fn dump(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .map(|(path, entry)| match entry {
                Entry::Folder => format!("> {}", path),
                Entry::File(data) => format!("# {} = {}", path, String::from_utf8_lossy(data)),
            })
            .collect()
    }
}

impl LockStore for MemoryLockStore {
    fn create(&self, path: &str, kind: EntryKind, create_dirs: bool) -> Result<()> {
        let path = normalize(path)?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if entries.contains_key(&path) {
            return Err(Error::PathExists(path));
        }
        Self::ensure_parent(&mut entries, &path, create_dirs)?;

        let entry = match kind {
            EntryKind::Folder => Entry::Folder,
            EntryKind::File => Entry::File(Vec::new()),
        };
        entries.insert(path, entry);
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        let Ok(path) = normalize(path) else {
            return false;
        };
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(&path)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize(path)?;
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(&path) {
            Some(Entry::File(data)) => Ok(data.clone()),
            Some(Entry::Folder) => Err(Error::LockStore(format!("{} is a folder", path))),
            None => Err(Error::PathNotFound(path)),
        }
    }

    fn write(&self, path: &str, data: &[u8], mode: WriteMode, create_dirs: bool) -> Result<()> {
        let path = normalize(path)?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        match entries.get_mut(&path) {
            Some(Entry::File(existing)) => {
                match mode {
                    WriteMode::Overwrite => *existing = data.to_vec(),
                    WriteMode::Append => existing.extend_from_slice(data),
                }
                Ok(())
            }
            Some(Entry::Folder) => Err(Error::LockStore(format!("{} is a folder", path))),
            None => {
                Self::ensure_parent(&mut entries, &path, create_dirs)?;
                entries.insert(path, Entry::File(data.to_vec()));
                Ok(())
            }
        }
    }

    fn remove(&self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if entries.remove(&path).is_none() {
            return Err(Error::PathNotFound(path));
        }

        let prefix = format!("{}/", path);
        let children: Vec<String> = entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for child in children {
            entries.remove(&child);
        }
        Ok(())
    }
}

/// Lock store rooted at a local directory
#[derive(Debug, Clone)]
pub struct DiskLockStore {
    root: PathBuf,
}

impl DiskLockStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn full_path(&self, path: &str) -> Result<PathBuf> {
        Ok(self.root.join(normalize(path)?))
    }

    fn prepare_parent(full: &Path, create_dirs: bool, path: &str) -> Result<()> {
        if let Some(parent) = full.parent() {
            if create_dirs {
                std::fs::create_dir_all(parent)?;
            } else if !parent.is_dir() {
                return Err(Error::PathNotFound(path.to_string()));
            }
        }
        Ok(())
    }
}

impl LockStore for DiskLockStore {
    fn create(&self, path: &str, kind: EntryKind, create_dirs: bool) -> Result<()> {
        let full = self.full_path(path)?;
        Self::prepare_parent(&full, create_dirs, path)?;

        let res = match kind {
            EntryKind::Folder => std::fs::create_dir(&full),
            EntryKind::File => OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&full)
                .map(|_| ()),
        };
        match res {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::PathExists(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.full_path(path).map(|p| p.exists()).unwrap_or(false)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.full_path(path)?;
        match std::fs::read(&full) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::PathNotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, path: &str, data: &[u8], mode: WriteMode, create_dirs: bool) -> Result<()> {
        let full = self.full_path(path)?;
        Self::prepare_parent(&full, create_dirs, path)?;

        let mut opts = OpenOptions::new();
        opts.create(true);
        match mode {
            WriteMode::Overwrite => opts.write(true).truncate(true),
            WriteMode::Append => opts.append(true),
        };
        let mut file = opts.open(&full)?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<()> {
        let full = self.full_path(path)?;
        let res = if full.is_dir() {
            std::fs::remove_dir_all(&full)
        } else {
            std::fs::remove_file(&full)
        };
        match res {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::PathNotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
