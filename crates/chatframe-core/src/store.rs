//! Storage seams for accounts and relayed files.
//!
//! The engines never touch the filesystem directly; they go through these
//! traits. In-memory doubles back the tests, and the file-backed
//! implementations back both production binaries (the server stores uploads
//! and accounts, the client stores downloads).

use std::{
    collections::HashMap,
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use bytes::Bytes;
use thiserror::Error;

/// Storage failures surfaced to the engines.
///
/// Engines translate these into `ERROR` replies on the offending connection;
/// they never crash the process.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The requested file does not exist.
    #[error("file {0:?} not found")]
    NotFound(String),

    /// The name would escape the store's namespace.
    #[error("invalid name {0:?}")]
    InvalidName(String),

    /// Underlying I/O failure.
    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Append-only account database.
pub trait UserStore {
    /// Record a new `user`/`pass` pair.
    fn append(&mut self, user: &str, pass: &str) -> Result<(), StoreError>;

    /// Password for `user`, or `None` if unregistered.
    fn lookup(&self, user: &str) -> Result<Option<String>, StoreError>;
}

/// Whole-file blob storage for relayed transfers.
///
/// Writes replace any existing blob under the same name, matching the
/// last-upload-wins semantics of the relay.
pub trait BlobStore {
    /// Read the full contents of `name`.
    fn read(&self, name: &str) -> Result<Bytes, StoreError>;

    /// Create or replace `name` with `data`.
    fn write(&mut self, name: &str, data: &[u8]) -> Result<(), StoreError>;
}

/// In-memory [`UserStore`] for tests and the simulation harness.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    accounts: Vec<(String, String)>,
}

impl MemoryUserStore {
    /// An empty account database.
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserStore for MemoryUserStore {
    fn append(&mut self, user: &str, pass: &str) -> Result<(), StoreError> {
        self.accounts.push((user.to_string(), pass.to_string()));
        Ok(())
    }

    fn lookup(&self, user: &str) -> Result<Option<String>, StoreError> {
        Ok(self.accounts.iter().find(|(u, _)| u == user).map(|(_, p)| p.clone()))
    }
}

/// In-memory [`BlobStore`] for tests and the simulation harness.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: HashMap<String, Bytes>,
}

impl MemoryBlobStore {
    /// An empty blob store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct access to a stored blob, for assertions.
    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.blobs.get(name)
    }
}

impl BlobStore for MemoryBlobStore {
    fn read(&self, name: &str) -> Result<Bytes, StoreError> {
        self.blobs.get(name).cloned().ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn write(&mut self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        self.blobs.insert(name.to_string(), Bytes::copy_from_slice(data));
        Ok(())
    }
}

/// Account database backed by one append-only text file.
///
/// One `username password` record per line. Lookup is a linear scan that
/// returns the first match, so a record can never be shadowed later.
#[derive(Debug)]
pub struct FileUserStore {
    path: PathBuf,
}

impl FileUserStore {
    /// Store backed by the file at `path`, created lazily on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Delete the backing file, dropping every account.
    ///
    /// Succeeds when the file is already absent.
    pub fn reset(path: &Path) -> Result<(), StoreError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

impl UserStore for FileUserStore {
    fn append(&mut self, user: &str, pass: &str) -> Result<(), StoreError> {
        let mut file =
            fs::OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{user} {pass}")?;
        Ok(())
    }

    fn lookup(&self, user: &str) -> Result<Option<String>, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e)),
        };
        for line in contents.lines() {
            if let Some((u, p)) = line.split_once(' ') {
                if u == user {
                    return Ok(Some(p.to_string()));
                }
            }
        }
        Ok(None)
    }
}

/// Blob storage backed by flat files under one directory.
///
/// Names must be bare filenames; anything that could traverse out of the
/// directory is rejected.
#[derive(Debug)]
pub struct DirBlobStore {
    dir: PathBuf,
}

impl DirBlobStore {
    /// Store rooted at `dir`, creating it if missing.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, StoreError> {
        let bare = !name.is_empty()
            && name != ".."
            && name != "."
            && !name.contains(['/', '\\'])
            && !name.contains('\0');
        if !bare {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(name))
    }
}

impl BlobStore for DirBlobStore {
    fn read(&self, name: &str) -> Result<Bytes, StoreError> {
        let path = self.resolve(name)?;
        match fs::read(&path) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_string()))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn write(&mut self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.resolve(name)?;
        fs::write(path, data)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_account_wins() {
        let mut store = MemoryUserStore::new();
        store.append("alice", "pass1").unwrap();
        store.append("alice", "pass2").unwrap();
        assert_eq!(store.lookup("alice").unwrap().as_deref(), Some("pass1"));
        assert_eq!(store.lookup("bob").unwrap(), None);
    }

    #[test]
    fn blob_writes_replace() {
        let mut store = MemoryBlobStore::new();
        store.write("f.txt", b"old").unwrap();
        store.write("f.txt", b"new").unwrap();
        assert_eq!(store.read("f.txt").unwrap(), Bytes::from_static(b"new"));
        assert!(matches!(store.read("missing"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn file_store_appends_and_scans() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.txt");
        let mut store = FileUserStore::new(&path);

        assert_eq!(store.lookup("alice").unwrap(), None);
        store.append("alice", "pass1").unwrap();
        store.append("bobby", "pass2").unwrap();
        assert_eq!(store.lookup("alice").unwrap().as_deref(), Some("pass1"));
        assert_eq!(store.lookup("bobby").unwrap().as_deref(), Some("pass2"));
        assert_eq!(store.lookup("carol").unwrap(), None);

        FileUserStore::reset(&path).unwrap();
        assert_eq!(store.lookup("alice").unwrap(), None);
        // Resetting an absent file is not an error.
        FileUserStore::reset(&path).unwrap();
    }

    #[test]
    fn dir_store_round_trips_and_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirBlobStore::new(dir.path().join("files")).unwrap();

        store.write("a.bin", &[1, 2, 3]).unwrap();
        assert_eq!(store.read("a.bin").unwrap(), Bytes::from_static(&[1, 2, 3]));
        assert!(matches!(store.read("missing.bin"), Err(StoreError::NotFound(_))));

        for bad in ["../escape", "a/b", "", "..", "a\\b"] {
            assert!(matches!(store.write(bad, b"x"), Err(StoreError::InvalidName(_))));
        }
    }
}
