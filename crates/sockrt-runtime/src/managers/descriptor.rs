//! Open file and directory descriptors
//!
//! The web view only ever speaks in caller-chosen ids. The `DescriptorManager`
//! maps those ids to native handles and owns the GC policy: a descriptor that
//! is stale and not retained is closed by the next sweep, a retained one never
//! is.

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use sockrt_core::{DescriptorConfig, ResourceId};
use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::sync::Arc;
use tokio::fs::{File, ReadDir};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

// ----------------------------------------------------------------------------
// Descriptor Types
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    File,
    Directory,
}

impl DescriptorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DescriptorKind::File => "file",
            DescriptorKind::Directory => "directory",
        }
    }
}

/// Errors raised by descriptor operations
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("descriptor is not open")]
    NotOpen,
    #[error("descriptor is not a {}", .0.as_str())]
    WrongKind(DescriptorKind),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Directory entry types, numbered like libuv's `uv_dirent_type_t`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DirentType {
    Unknown = 0,
    File = 1,
    Dir = 2,
    Link = 3,
    Fifo = 4,
    Socket = 5,
    Char = 6,
    Block = 7,
}

impl From<std::fs::FileType> for DirentType {
    fn from(file_type: std::fs::FileType) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            if file_type.is_fifo() {
                return DirentType::Fifo;
            }
            if file_type.is_socket() {
                return DirentType::Socket;
            }
            if file_type.is_char_device() {
                return DirentType::Char;
            }
            if file_type.is_block_device() {
                return DirentType::Block;
            }
        }

        if file_type.is_symlink() {
            DirentType::Link
        } else if file_type.is_dir() {
            DirentType::Dir
        } else if file_type.is_file() {
            DirentType::File
        } else {
            DirentType::Unknown
        }
    }
}

/// One entry produced by `readdir`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub kind: DirentType,
}

/// Whether the GC sweep may close a descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Liveness {
    /// Owned by the current page
    #[default]
    Active,
    /// Owning page context is gone; the next sweep closes it
    Stale,
    /// Explicitly pinned open by the page; never collected
    Retained,
}

/// Snapshot of a descriptor's kind, fd and liveness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DescriptorStatus {
    pub kind: Option<DescriptorKind>,
    pub fd: Option<i64>,
    pub liveness: Liveness,
}

impl DescriptorStatus {
    pub fn is_collectable(&self) -> bool {
        self.liveness == Liveness::Stale
    }
}

enum Handle {
    File(File),
    Directory(ReadDir),
}

// ----------------------------------------------------------------------------
// Descriptor
// ----------------------------------------------------------------------------

/// A logical open file or directory handle
pub struct Descriptor {
    pub id: ResourceId,
    status: Mutex<DescriptorStatus>,
    handle: tokio::sync::Mutex<Option<Handle>>,
}

impl Descriptor {
    fn new(id: ResourceId) -> Self {
        Self {
            id,
            status: Mutex::new(DescriptorStatus::default()),
            handle: tokio::sync::Mutex::new(None),
        }
    }

    pub fn status(&self) -> DescriptorStatus {
        *self.status.lock()
    }

    pub fn kind(&self) -> Option<DescriptorKind> {
        self.status.lock().kind
    }

    pub fn fd(&self) -> Option<i64> {
        self.status.lock().fd
    }

    pub fn is_file(&self) -> bool {
        self.kind() == Some(DescriptorKind::File)
    }

    pub fn is_directory(&self) -> bool {
        self.kind() == Some(DescriptorKind::Directory)
    }

    /// Pin the descriptor open, rescuing it if already stale
    pub fn retain(&self) {
        self.status.lock().liveness = Liveness::Retained;
    }

    /// Make an active descriptor a GC candidate; retained ones are unaffected
    pub fn mark_stale(&self) {
        let mut status = self.status.lock();
        if status.liveness == Liveness::Active {
            status.liveness = Liveness::Stale;
        }
    }

    pub fn liveness(&self) -> Liveness {
        self.status.lock().liveness
    }

    pub fn is_retained(&self) -> bool {
        self.liveness() == Liveness::Retained
    }

    pub fn is_stale(&self) -> bool {
        self.liveness() == Liveness::Stale
    }

    /// Install an opened file
    pub async fn attach_file(&self, file: File) {
        let fd = raw_fd(&file);
        *self.handle.lock().await = Some(Handle::File(file));
        let mut status = self.status.lock();
        status.kind = Some(DescriptorKind::File);
        status.fd = fd;
    }

    /// Install an opened directory stream
    pub async fn attach_directory(&self, dir: ReadDir) {
        *self.handle.lock().await = Some(Handle::Directory(dir));
        self.status.lock().kind = Some(DescriptorKind::Directory);
    }

    /// Read up to `size` bytes starting at `offset`
    pub async fn read(&self, offset: u64, size: usize) -> Result<Vec<u8>, DescriptorError> {
        let mut guard = self.handle.lock().await;
        let file = match guard.as_mut() {
            Some(Handle::File(file)) => file,
            Some(Handle::Directory(_)) => return Err(DescriptorError::WrongKind(DescriptorKind::File)),
            None => return Err(DescriptorError::NotOpen),
        };

        // allocate for what the file can actually yield, not what was asked for
        let remaining = file.metadata().await?.len().saturating_sub(offset);
        let capacity = usize::try_from(remaining).map_or(size, |remaining| remaining.min(size));

        file.seek(SeekFrom::Start(offset)).await?;
        let mut buffer = Vec::with_capacity(capacity);
        file.take(size as u64).read_to_end(&mut buffer).await?;
        Ok(buffer)
    }

    /// Write `bytes` at `offset`; returns the number of bytes written
    pub async fn write(&self, offset: u64, bytes: &[u8]) -> Result<usize, DescriptorError> {
        let mut guard = self.handle.lock().await;
        let file = match guard.as_mut() {
            Some(Handle::File(file)) => file,
            Some(Handle::Directory(_)) => return Err(DescriptorError::WrongKind(DescriptorKind::File)),
            None => return Err(DescriptorError::NotOpen),
        };

        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(bytes.len())
    }

    /// Metadata of the open file
    pub async fn metadata(&self) -> Result<std::fs::Metadata, DescriptorError> {
        let guard = self.handle.lock().await;
        match guard.as_ref() {
            Some(Handle::File(file)) => Ok(file.metadata().await?),
            Some(Handle::Directory(_)) => Err(DescriptorError::WrongKind(DescriptorKind::File)),
            None => Err(DescriptorError::NotOpen),
        }
    }

    /// Read up to `max` entries from the directory stream
    pub async fn read_dir(&self, max: usize) -> Result<Vec<DirectoryEntry>, DescriptorError> {
        let mut guard = self.handle.lock().await;
        let dir = match guard.as_mut() {
            Some(Handle::Directory(dir)) => dir,
            Some(Handle::File(_)) => return Err(DescriptorError::WrongKind(DescriptorKind::Directory)),
            None => return Err(DescriptorError::NotOpen),
        };

        let mut entries = Vec::new();
        while entries.len() < max {
            let Some(entry) = dir.next_entry().await? else {
                break;
            };
            let kind = match entry.file_type().await {
                Ok(file_type) => DirentType::from(file_type),
                Err(_) => DirentType::Unknown,
            };
            entries.push(DirectoryEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            });
        }
        Ok(entries)
    }

    /// Release the native handle; the kind must match `expected` when given
    pub async fn close(&self, expected: Option<DescriptorKind>) -> Result<(), DescriptorError> {
        let mut guard = self.handle.lock().await;
        match (guard.as_ref(), expected) {
            (None, _) => return Err(DescriptorError::NotOpen),
            (Some(Handle::File(_)), Some(DescriptorKind::Directory)) => {
                return Err(DescriptorError::WrongKind(DescriptorKind::Directory))
            }
            (Some(Handle::Directory(_)), Some(DescriptorKind::File)) => {
                return Err(DescriptorError::WrongKind(DescriptorKind::File))
            }
            _ => {}
        }

        if let Some(Handle::File(mut file)) = guard.take() {
            file.flush().await?;
        }
        Ok(())
    }

    pub async fn is_open(&self) -> bool {
        self.handle.lock().await.is_some()
    }
}

#[cfg(unix)]
fn raw_fd(file: &File) -> Option<i64> {
    use std::os::unix::io::AsRawFd;
    Some(file.as_raw_fd() as i64)
}

#[cfg(not(unix))]
fn raw_fd(_file: &File) -> Option<i64> {
    None
}

// ----------------------------------------------------------------------------
// Descriptor Manager
// ----------------------------------------------------------------------------

/// Summary of an open descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSummary {
    pub id: ResourceId,
    pub fd: Option<i64>,
    pub kind: DescriptorKind,
}

/// Registry of open descriptors keyed by caller-chosen ids
pub struct DescriptorManager {
    descriptors: Mutex<HashMap<ResourceId, Arc<Descriptor>>>,
    stats: Mutex<DescriptorStats>,
    config: DescriptorConfig,
}

impl DescriptorManager {
    pub fn new(config: DescriptorConfig) -> Self {
        Self {
            descriptors: Mutex::new(HashMap::new()),
            stats: Mutex::new(DescriptorStats::default()),
            config,
        }
    }

    pub fn config(&self) -> &DescriptorConfig {
        &self.config
    }

    /// Descriptor for `id`, creating an empty one if absent
    pub fn create(&self, id: ResourceId) -> Arc<Descriptor> {
        let mut descriptors = self.descriptors.lock();
        Arc::clone(descriptors.entry(id).or_insert_with(|| {
            self.stats.lock().created += 1;
            Arc::new(Descriptor::new(id))
        }))
    }

    pub fn get(&self, id: ResourceId) -> Option<Arc<Descriptor>> {
        self.descriptors.lock().get(&id).cloned()
    }

    pub fn has(&self, id: ResourceId) -> bool {
        self.descriptors.lock().contains_key(&id)
    }

    pub fn remove(&self, id: ResourceId) -> Option<Arc<Descriptor>> {
        self.descriptors.lock().remove(&id)
    }

    pub fn count(&self) -> usize {
        self.descriptors.lock().len()
    }

    /// Flag every descriptor as belonging to a departed page context
    pub fn mark_all_stale(&self) {
        for descriptor in self.descriptors.lock().values() {
            descriptor.mark_stale();
        }
    }

    /// Descriptors visible to the page; stale unretained ones are hidden
    pub fn open_descriptors(&self) -> Vec<DescriptorSummary> {
        self.descriptors
            .lock()
            .values()
            .filter_map(|descriptor| {
                let status = descriptor.status();
                if status.is_collectable() {
                    return None;
                }
                Some(DescriptorSummary {
                    id: descriptor.id,
                    fd: status.fd,
                    kind: status.kind?,
                })
            })
            .collect()
    }

    /// Close the descriptor for `id` and drop it from the registry
    pub async fn close(
        &self,
        id: ResourceId,
        expected: Option<DescriptorKind>,
    ) -> Result<Arc<Descriptor>, DescriptorError> {
        let descriptor = self.get(id).ok_or(DescriptorError::NotOpen)?;
        descriptor.close(expected).await?;
        self.forget(&descriptor);
        self.stats.lock().closed += 1;
        Ok(descriptor)
    }

    /// Close every descriptor, skipping retained ones when `preserve_retained`
    ///
    /// Resolves once every qualifying close has completed; returns the ids
    /// that were closed.
    pub async fn close_all(&self, preserve_retained: bool) -> Vec<ResourceId> {
        let candidates: Vec<Arc<Descriptor>> = self
            .descriptors
            .lock()
            .values()
            .filter(|descriptor| !preserve_retained || !descriptor.is_retained())
            .cloned()
            .collect();

        let closes = candidates.into_iter().map(|descriptor| async move {
            let kind = descriptor.kind();
            match self.close(descriptor.id, kind).await {
                Ok(_) => Some(descriptor.id),
                Err(DescriptorError::NotOpen) => {
                    // never opened or raced with another close
                    self.forget(&descriptor);
                    None
                }
                Err(e) => {
                    warn!("Failed to close descriptor {}: {}", descriptor.id, e);
                    None
                }
            }
        });

        join_all(closes).await.into_iter().flatten().collect()
    }

    /// Close every stale, unretained descriptor; returns how many were closed
    pub async fn sweep(&self) -> usize {
        let collectable: Vec<Arc<Descriptor>> = self
            .descriptors
            .lock()
            .values()
            .filter(|descriptor| descriptor.status().is_collectable())
            .cloned()
            .collect();

        if collectable.is_empty() {
            return 0;
        }

        let mut closed = 0;
        for descriptor in collectable {
            let kind = descriptor.kind();
            match self.close(descriptor.id, kind).await {
                Ok(_) => {
                    debug!(
                        "Collected stale {} descriptor {}",
                        kind.map_or("unopened", |k| k.as_str()),
                        descriptor.id
                    );
                    closed += 1;
                }
                Err(DescriptorError::NotOpen) => self.forget(&descriptor),
                Err(e) => warn!("Failed to collect descriptor {}: {}", descriptor.id, e),
            }
        }

        self.stats.lock().collected += closed as u64;
        info!("Descriptor sweep closed {} stale descriptors", closed);
        closed
    }

    /// Get descriptor statistics
    pub fn get_statistics(&self) -> DescriptorStats {
        self.stats.lock().clone()
    }

    // only drop the registry entry if it still refers to this descriptor
    fn forget(&self, descriptor: &Arc<Descriptor>) {
        let mut descriptors = self.descriptors.lock();
        if descriptors
            .get(&descriptor.id)
            .is_some_and(|current| Arc::ptr_eq(current, descriptor))
        {
            descriptors.remove(&descriptor.id);
        }
    }
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Statistics for descriptor management
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DescriptorStats {
    /// Number of descriptors created
    pub created: u64,
    /// Number of descriptors closed, including by the sweep
    pub closed: u64,
    /// Number of descriptors closed by the sweep
    pub collected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "sockrt-descriptor-{}-{}-{}",
            std::process::id(),
            ResourceId::random(),
            name
        ))
    }

    async fn open_test_file(manager: &DescriptorManager, id: u64) -> Arc<Descriptor> {
        let path = temp_path("file");
        tokio::fs::write(&path, b"hello world").await.unwrap();
        let descriptor = manager.create(ResourceId::new(id));
        descriptor
            .attach_file(File::open(&path).await.unwrap())
            .await;
        descriptor
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let manager = DescriptorManager::new(DescriptorConfig::default());
        let a = manager.create(ResourceId::new(1));
        let b = manager.create(ResourceId::new(1));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.count(), 1);
        assert_eq!(manager.get_statistics().created, 1);
    }

    #[tokio::test]
    async fn test_sweep_respects_retention() {
        let manager = DescriptorManager::new(DescriptorConfig::default());
        let retained = open_test_file(&manager, 1).await;
        let released = open_test_file(&manager, 2).await;
        let fresh = open_test_file(&manager, 3).await;

        retained.retain();
        retained.mark_stale();
        released.mark_stale();

        assert_eq!(manager.sweep().await, 1);
        assert!(manager.has(retained.id));
        assert!(!manager.has(released.id));
        assert!(manager.has(fresh.id));
        assert!(retained.is_open().await);
        assert!(!released.is_open().await);
        assert_eq!(manager.get_statistics().collected, 1);
    }

    #[tokio::test]
    async fn test_read_past_file_length_is_bounded_by_file() {
        let manager = DescriptorManager::new(DescriptorConfig::default());
        let descriptor = open_test_file(&manager, 6).await;

        let bytes = descriptor.read(6, 1 << 44).await.unwrap();
        assert_eq!(bytes, b"world".to_vec());
        assert!(bytes.capacity() < 1024);

        let empty = descriptor.read(100, 1 << 44).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_liveness_transitions() {
        let manager = DescriptorManager::new(DescriptorConfig::default());
        let descriptor = manager.create(ResourceId::new(5));
        assert_eq!(descriptor.liveness(), Liveness::Active);

        descriptor.mark_stale();
        assert!(descriptor.is_stale());
        assert!(descriptor.status().is_collectable());

        descriptor.retain();
        assert!(descriptor.is_retained());
        descriptor.mark_stale();
        assert_eq!(descriptor.liveness(), Liveness::Retained);
        assert!(!descriptor.status().is_collectable());
    }

    #[tokio::test]
    async fn test_close_unknown_id_is_not_open() {
        let manager = DescriptorManager::new(DescriptorConfig::default());
        let result = manager.close(ResourceId::new(42), None).await;
        assert!(matches!(result, Err(DescriptorError::NotOpen)));
        assert_eq!(manager.get_statistics().closed, 0);
    }

    #[tokio::test]
    async fn test_close_checks_kind() {
        let manager = DescriptorManager::new(DescriptorConfig::default());
        let descriptor = open_test_file(&manager, 9).await;
        let result = manager
            .close(descriptor.id, Some(DescriptorKind::Directory))
            .await;
        assert!(matches!(result, Err(DescriptorError::WrongKind(_))));
        assert!(descriptor.is_open().await);
    }

    #[tokio::test]
    async fn test_read_and_write_at_offset() {
        let manager = DescriptorManager::new(DescriptorConfig::default());
        let path = temp_path("rw");
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await
            .unwrap();
        let descriptor = manager.create(ResourceId::new(5));
        descriptor.attach_file(file).await;

        assert_eq!(descriptor.write(0, b"abcdef").await.unwrap(), 6);
        assert_eq!(descriptor.write(2, b"XY").await.unwrap(), 2);
        assert_eq!(descriptor.read(1, 4).await.unwrap(), b"bXYe");
        assert_eq!(descriptor.read(4, 100).await.unwrap(), b"ef");
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_all_preserves_retained() {
        let manager = DescriptorManager::new(DescriptorConfig::default());
        let keep = open_test_file(&manager, 1).await;
        open_test_file(&manager, 2).await;
        open_test_file(&manager, 3).await;
        keep.retain();

        let mut closed = manager.close_all(true).await;
        closed.sort();
        assert_eq!(closed, vec![ResourceId::new(2), ResourceId::new(3)]);
        assert_eq!(manager.count(), 1);

        let closed = manager.close_all(false).await;
        assert_eq!(closed, vec![ResourceId::new(1)]);
        assert_eq!(manager.count(), 0);
    }

    #[tokio::test]
    async fn test_close_all_with_nothing_open_resolves_immediately() {
        let manager = DescriptorManager::new(DescriptorConfig::default());
        assert!(manager.close_all(true).await.is_empty());
    }

    #[tokio::test]
    async fn test_open_descriptors_hides_collectable() {
        let manager = DescriptorManager::new(DescriptorConfig::default());
        let a = open_test_file(&manager, 1).await;
        let b = open_test_file(&manager, 2).await;
        a.mark_stale();
        b.mark_stale();
        b.retain();

        let open = manager.open_descriptors();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, ResourceId::new(2));
        assert_eq!(open[0].kind, DescriptorKind::File);
    }

    #[tokio::test]
    async fn test_read_dir_lists_entries() {
        let manager = DescriptorManager::new(DescriptorConfig::default());
        let dir = temp_path("dir");
        tokio::fs::create_dir(&dir).await.unwrap();
        tokio::fs::write(dir.join("a.txt"), b"a").await.unwrap();
        tokio::fs::create_dir(dir.join("sub")).await.unwrap();

        let descriptor = manager.create(ResourceId::new(8));
        descriptor
            .attach_directory(tokio::fs::read_dir(&dir).await.unwrap())
            .await;

        let mut entries = descriptor.read_dir(256).await.unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[0].kind, DirentType::File);
        assert_eq!(entries[1].kind, DirentType::Dir);
        assert!(descriptor.read_dir(256).await.unwrap().is_empty());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
