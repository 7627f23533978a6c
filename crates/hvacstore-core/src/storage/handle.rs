//! Handle-based directory capability
//!
//! A [`DirectoryHandle`] grants access to one directory tree and nothing
//! outside it. Entries are addressed by name relative to a handle, never by
//! path. Permission is owned by whoever granted the handle; holders can
//! observe it but not request it.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Prompt,
    Denied,
}

impl PermissionState {
    fn to_u8(self) -> u8 {
        match self {
            Self::Granted => 0,
            Self::Prompt => 1,
            Self::Denied => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Granted,
            1 => Self::Prompt,
            _ => Self::Denied,
        }
    }
}

/// Caller-owned read/write permission shared by a handle tree
#[derive(Debug)]
pub struct PermissionGrant {
    state: AtomicU8,
}

impl PermissionGrant {
    pub fn new(state: PermissionState) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(state.to_u8()),
        })
    }

    pub fn granted() -> Arc<Self> {
        Self::new(PermissionState::Granted)
    }

    pub fn state(&self) -> PermissionState {
        PermissionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: PermissionState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }

    pub fn revoke(&self) {
        self.set(PermissionState::Denied);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
}

/// A directory reachable only through names relative to itself
#[async_trait]
pub trait DirectoryHandle: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Current permission for this handle tree
    fn permission(&self) -> PermissionState;

    /// Child directory handle; `Ok(None)` when absent and `create` is false
    async fn directory(
        &self,
        name: &str,
        create: bool,
    ) -> io::Result<Option<Arc<dyn DirectoryHandle>>>;

    async fn entries(&self) -> io::Result<Vec<HandleEntry>>;

    /// File contents; `Ok(None)` when absent
    async fn read_file(&self, name: &str) -> io::Result<Option<Vec<u8>>>;

    /// Create or truncate a file and write `contents`
    ///
    /// Not atomic: a failure part way can leave a truncated file.
    async fn write_file(&self, name: &str, contents: &[u8]) -> io::Result<()>;

    /// Remove a file or directory; `NotFound` when absent
    async fn remove_entry(&self, name: &str, recursive: bool) -> io::Result<()>;
}

/// [`DirectoryHandle`] confined to a local directory via `tokio::fs`
pub struct ScopedDirectory {
    path: PathBuf,
    name: String,
    grant: Arc<PermissionGrant>,
}

impl fmt::Debug for ScopedDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedDirectory")
            .field("path", &self.path)
            .field("permission", &self.grant.state())
            .finish()
    }
}

impl ScopedDirectory {
    /// Open an existing directory as a handle root
    pub async fn open(path: impl Into<PathBuf>, grant: Arc<PermissionGrant>) -> io::Result<Self> {
        let path = path.into();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", path.display()),
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self { path, name, grant })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_permission(&self) -> io::Result<()> {
        match self.grant.state() {
            PermissionState::Granted => Ok(()),
            state => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("permission {:?} for directory handle '{}'", state, self.name),
            )),
        }
    }

    /// Resolve a single child name, rejecting anything that could escape
    fn child(&self, name: &str) -> io::Result<PathBuf> {
        self.check_permission()?;
        let invalid = name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\\')
            || name.contains('\0');
        if invalid {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid entry name '{}'", name),
            ));
        }
        Ok(self.path.join(name))
    }
}

async fn metadata_if_exists(path: &Path) -> io::Result<Option<std::fs::Metadata>> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(Some(metadata)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl DirectoryHandle for ScopedDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    fn permission(&self) -> PermissionState {
        self.grant.state()
    }

    async fn directory(
        &self,
        name: &str,
        create: bool,
    ) -> io::Result<Option<Arc<dyn DirectoryHandle>>> {
        let path = self.child(name)?;
        match metadata_if_exists(&path).await? {
            Some(metadata) if metadata.is_dir() => {}
            Some(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("'{}' exists and is not a directory", name),
                ));
            }
            None if create => tokio::fs::create_dir(&path).await?,
            None => return Ok(None),
        }
        Ok(Some(Arc::new(ScopedDirectory {
            path,
            name: name.to_string(),
            grant: Arc::clone(&self.grant),
        })))
    }

    async fn entries(&self) -> io::Result<Vec<HandleEntry>> {
        self.check_permission()?;
        let mut reader = tokio::fs::read_dir(&self.path).await?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let metadata = entry.metadata().await?;
            entries.push(HandleEntry {
                name,
                kind: if metadata.is_dir() {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
                size: if metadata.is_dir() { 0 } else { metadata.len() },
            });
        }
        Ok(entries)
    }

    async fn read_file(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        let path = self.child(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write_file(&self, name: &str, contents: &[u8]) -> io::Result<()> {
        let path = self.child(name)?;
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(contents).await?;
        file.flush().await
    }

    async fn remove_entry(&self, name: &str, recursive: bool) -> io::Result<()> {
        let path = self.child(name)?;
        let metadata = tokio::fs::metadata(&path).await?;
        if metadata.is_dir() {
            if recursive {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_dir(&path).await
            }
        } else {
            tokio::fs::remove_file(&path).await
        }
    }
}
