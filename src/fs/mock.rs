// src/fs/mock.rs

use super::FileSystem;
use anyhow::{anyhow, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub enum MockEntry {
    File { readable: bool },
    Dir(Vec<String>), // List of child names
}

#[derive(Debug, Default)]
struct MockState {
    entries: HashMap<PathBuf, MockEntry>,
    denied_dirs: HashSet<PathBuf>,
}

/// In-memory filesystem for tests. Relative paths are resolved against a
/// fixed current directory (`/work` unless overridden).
#[derive(Debug, Clone)]
pub struct MockFileSystem {
    state: Arc<Mutex<MockState>>,
    cwd: PathBuf,
}

impl Default for MockFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::with_cwd("/work")
    }

    pub fn with_cwd(cwd: impl Into<PathBuf>) -> Self {
        let fs = Self {
            state: Arc::new(Mutex::new(MockState::default())),
            cwd: cwd.into(),
        };
        {
            let mut state = fs.state.lock().unwrap();
            let cwd = fs.cwd.clone();
            Self::ensure_dir_entry(&mut state.entries, &cwd);
        }
        fs
    }

    pub fn add_file(&self, path: impl AsRef<Path>) {
        self.insert_file(path.as_ref(), true);
    }

    /// A file that exists but cannot be opened for reading.
    pub fn add_unreadable_file(&self, path: impl AsRef<Path>) {
        self.insert_file(path.as_ref(), false);
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = self.resolve(path.as_ref());
        let mut state = self.state.lock().unwrap();
        Self::ensure_dir_entry(&mut state.entries, &path);
    }

    /// Make `create_dir_all` fail for this path.
    pub fn deny_dir(&self, path: impl AsRef<Path>) {
        let path = self.resolve(path.as_ref());
        self.state.lock().unwrap().denied_dirs.insert(path);
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }

    fn insert_file(&self, path: &Path, readable: bool) {
        let path = self.resolve(path);
        let mut state = self.state.lock().unwrap();
        state
            .entries
            .insert(path.clone(), MockEntry::File { readable });

        if let Some(parent) = path.parent() {
            Self::ensure_dir_entry(&mut state.entries, parent);
            Self::add_child(&mut state.entries, parent, &path);
        }
    }

    fn ensure_dir_entry(entries: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
        if entries.contains_key(path) {
            return;
        }
        entries.insert(path.to_path_buf(), MockEntry::Dir(Vec::new()));
        if let Some(parent) = path.parent() {
            Self::ensure_dir_entry(entries, parent);
            Self::add_child(entries, parent, path);
        }
    }

    fn add_child(entries: &mut HashMap<PathBuf, MockEntry>, parent: &Path, child: &Path) {
        if let Some(MockEntry::Dir(children)) = entries.get_mut(parent) {
            if let Some(name) = child.file_name().and_then(|n| n.to_str()) {
                if !children.iter().any(|c| c == name) {
                    children.push(name.to_string());
                }
            }
        }
    }
}

impl FileSystem for MockFileSystem {
    fn exists(&self, path: &Path) -> bool {
        let path = self.resolve(path);
        self.state.lock().unwrap().entries.contains_key(&path)
    }

    fn is_file(&self, path: &Path) -> bool {
        let path = self.resolve(path);
        matches!(
            self.state.lock().unwrap().entries.get(&path),
            Some(MockEntry::File { .. })
        )
    }

    fn is_dir(&self, path: &Path) -> bool {
        let path = self.resolve(path);
        matches!(
            self.state.lock().unwrap().entries.get(&path),
            Some(MockEntry::Dir(_))
        )
    }

    fn is_readable_file(&self, path: &Path) -> bool {
        let path = self.resolve(path);
        matches!(
            self.state.lock().unwrap().entries.get(&path),
            Some(MockEntry::File { readable: true })
        )
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let path = self.resolve(path);
        let mut state = self.state.lock().unwrap();
        if state.denied_dirs.contains(&path) {
            return Err(anyhow!("Permission denied: {:?}", path));
        }
        if let Some(MockEntry::File { .. }) = state.entries.get(&path) {
            return Err(anyhow!("Not a directory: {:?}", path));
        }
        Self::ensure_dir_entry(&mut state.entries, &path);
        Ok(())
    }

    fn absolute(&self, path: &Path) -> Result<PathBuf> {
        Ok(self.resolve(path))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let path = self.resolve(path);
        let state = self.state.lock().unwrap();
        match state.entries.get(&path) {
            Some(MockEntry::Dir(children)) => {
                Ok(children.iter().map(|name| path.join(name)).collect())
            }
            _ => Err(anyhow!("Not a directory or not found: {:?}", path)),
        }
    }
}
