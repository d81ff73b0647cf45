//! Filesystem handlers
//!
//! Descriptor-targeting calls look the descriptor up, and check its kind,
//! before any native I/O. A descriptor closed concurrently surfaces as the
//! same `NotFoundError` the lookup would have produced.

use super::{flag, io_error, parse, parse_or, require, resource_id, ModuleContext};
use crate::managers::{Descriptor, DescriptorError, DescriptorKind};
use crate::router::HandlerFuture;
use futures::FutureExt;
use serde_json::{json, Map, Value};
use sockrt_core::{Data, IpcError, IpcResult, Message, ResourceId};
use std::io;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::fs::OpenOptions;
use tracing::debug;

/// Fail with `EEXIST` when the destination exists
pub const COPYFILE_EXCL: u32 = 1;
pub const COPYFILE_FICLONE: u32 = 2;
pub const COPYFILE_FICLONE_FORCE: u32 = 4;

// ----------------------------------------------------------------------------
// Descriptor Lookup
// ----------------------------------------------------------------------------

fn descriptor_not_found(id: ResourceId, expected: Option<DescriptorKind>) -> IpcError {
    let message = match expected {
        Some(DescriptorKind::File) => "No file descriptor found with that id",
        Some(DescriptorKind::Directory) => "No directory descriptor found with that id",
        None => "No descriptor found with that id",
    };
    IpcError::not_found(message)
        .with_id(id)
        .with_code("ENOTOPEN")
}

fn descriptor_error(id: ResourceId, expected: Option<DescriptorKind>, err: DescriptorError) -> IpcError {
    match err {
        DescriptorError::NotOpen | DescriptorError::WrongKind(_) => descriptor_not_found(id, expected),
        DescriptorError::Io(e) => io_error(&e).with_id(id),
    }
}

fn lookup(
    ctx: &ModuleContext,
    id: ResourceId,
    expected: Option<DescriptorKind>,
) -> Result<Arc<Descriptor>, IpcError> {
    let descriptor = ctx
        .descriptors
        .get(id)
        .ok_or_else(|| descriptor_not_found(id, expected))?;

    match (expected, descriptor.kind()) {
        (None, Some(_)) => Ok(descriptor),
        (Some(expected), Some(kind)) if expected == kind => Ok(descriptor),
        _ => Err(descriptor_not_found(id, expected)),
    }
}

fn fail(message: &Message, err: IpcError) -> IpcResult {
    IpcResult::error(message, &err)
}

fn ok_result(message: &Message) -> IpcResult {
    IpcResult::data(message, json!({ "result": 0 }))
}

// ----------------------------------------------------------------------------
// Open / Close
// ----------------------------------------------------------------------------

/// `fs.open`: open `path` into descriptor `id`
pub fn open(ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    let id = resource_id(message)?;
    let path = require(message, "path")?;
    let flags: i32 = parse_or(message, "flags", 0)?;
    let mode: u32 = parse_or(message, "mode", 0o666)?;

    let ctx = Arc::clone(ctx);
    let message = message.clone();
    Ok(async move {
        let descriptor = ctx.descriptors.create(id);
        match open_options(flags, mode).open(&path).await {
            Ok(file) => {
                descriptor.attach_file(file).await;
                let fd = descriptor.fd().unwrap_or(id.get() as i64);
                debug!("Opened {} as descriptor {}", path, id);
                IpcResult::data(&message, json!({ "id": id.to_string(), "fd": fd }))
            }
            Err(e) => {
                if !descriptor.is_open().await {
                    ctx.descriptors.remove(id);
                }
                fail(&message, io_error(&e).with_id(id))
            }
        }
    }
    .boxed())
}

/// `fs.opendir`: open a directory stream into descriptor `id`
pub fn opendir(ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    let id = resource_id(message)?;
    let path = require(message, "path")?;

    let ctx = Arc::clone(ctx);
    let message = message.clone();
    Ok(async move {
        let descriptor = ctx.descriptors.create(id);
        match tokio::fs::read_dir(&path).await {
            Ok(dir) => {
                descriptor.attach_directory(dir).await;
                IpcResult::data(&message, json!({ "id": id.to_string() }))
            }
            Err(e) => {
                if !descriptor.is_open().await {
                    ctx.descriptors.remove(id);
                }
                fail(&message, io_error(&e).with_id(id))
            }
        }
    }
    .boxed())
}

/// `fs.close`: close file descriptor `id`
pub fn close(ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    close_kind(ctx, message, Some(DescriptorKind::File))
}

/// `fs.closedir`: close directory descriptor `id`
pub fn closedir(ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    close_kind(ctx, message, Some(DescriptorKind::Directory))
}

/// `fs.closeOpenDescriptor`: close descriptor `id` whatever its kind
pub fn close_open_descriptor(
    ctx: &Arc<ModuleContext>,
    message: &Message,
) -> Result<HandlerFuture, IpcError> {
    close_kind(ctx, message, None)
}

fn close_kind(
    ctx: &Arc<ModuleContext>,
    message: &Message,
    expected: Option<DescriptorKind>,
) -> Result<HandlerFuture, IpcError> {
    let id = resource_id(message)?;
    let descriptor = lookup(ctx, id, expected)?;

    let ctx = Arc::clone(ctx);
    let message = message.clone();
    Ok(async move {
        let fd = descriptor.fd();
        match ctx.descriptors.close(id, expected).await {
            Ok(_) => match (expected, fd) {
                (Some(DescriptorKind::File), Some(fd)) => {
                    IpcResult::data(&message, json!({ "id": id.to_string(), "fd": fd }))
                }
                _ => IpcResult::data(&message, json!({ "id": id.to_string() })),
            },
            Err(e) => fail(&message, descriptor_error(id, expected, e)),
        }
    }
    .boxed())
}

/// `fs.closeOpenDescriptors`: close everything, keeping retained
/// descriptors unless `preserveRetained=false`
pub fn close_open_descriptors(
    ctx: &Arc<ModuleContext>,
    message: &Message,
) -> Result<HandlerFuture, IpcError> {
    let preserve_retained = flag(message, "preserveRetained", true);

    let ctx = Arc::clone(ctx);
    let message = message.clone();
    Ok(async move {
        let ids: Vec<String> = ctx
            .descriptors
            .close_all(preserve_retained)
            .await
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        IpcResult::data(&message, json!({ "ids": ids }))
    }
    .boxed())
}

/// `fs.retainOpenDescriptor`: pin descriptor `id` against the GC sweep
pub fn retain_open_descriptor(ctx: &Arc<ModuleContext>, message: &Message) -> IpcResult {
    let id = match resource_id(message) {
        Ok(id) => id,
        Err(e) => return fail(message, e),
    };

    match lookup(ctx, id, None) {
        Ok(descriptor) => {
            descriptor.retain();
            IpcResult::data(message, json!({ "id": id.to_string() }))
        }
        Err(e) => fail(message, e),
    }
}

/// `fs.getOpenDescriptors`: descriptors still owned by the page
pub fn get_open_descriptors(ctx: &Arc<ModuleContext>, message: &Message) -> IpcResult {
    let entries: Vec<Value> = ctx
        .descriptors
        .open_descriptors()
        .into_iter()
        .map(|summary| {
            json!({
                "id": summary.id.to_string(),
                "fd": summary.fd.unwrap_or(summary.id.get() as i64),
                "type": summary.kind.as_str(),
            })
        })
        .collect();
    IpcResult::data(message, Value::Array(entries))
}

// ----------------------------------------------------------------------------
// Descriptor I/O
// ----------------------------------------------------------------------------

/// `fs.read`: read `size` bytes at `offset`, replying with a binary payload
pub fn read(ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    let id = resource_id(message)?;
    let size: usize = parse(message, "size")?;
    let offset: u64 = parse_or(message, "offset", 0)?;
    let max = ctx.descriptors.config().max_read_size;
    if size > max {
        return Err(IpcError::message(format!(
            "The value of 'size' is out of range. It must be <= {}. Received {}",
            max, size
        ))
        .with_code("ERR_OUT_OF_RANGE")
        .with_id(id));
    }
    let descriptor = lookup(ctx, id, Some(DescriptorKind::File))?;

    let message = message.clone();
    Ok(async move {
        match descriptor.read(offset, size).await {
            Ok(bytes) => IpcResult::data(&message, Value::Null).with_post(Data::octet_stream(bytes)),
            Err(e) => fail(&message, descriptor_error(id, Some(DescriptorKind::File), e)),
        }
    }
    .boxed())
}

/// `fs.write`: write the request body at `offset`
pub fn write(ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    let id = resource_id(message)?;
    let offset: u64 = parse_or(message, "offset", 0)?;
    let buffer = message
        .buffer
        .clone()
        .ok_or_else(|| IpcError::message("Missing buffer in message"))?;
    let descriptor = lookup(ctx, id, Some(DescriptorKind::File))?;

    let message = message.clone();
    Ok(async move {
        match descriptor.write(offset, &buffer).await {
            Ok(written) => IpcResult::data(
                &message,
                json!({ "id": id.to_string(), "result": written }),
            ),
            Err(e) => fail(&message, descriptor_error(id, Some(DescriptorKind::File), e)),
        }
    }
    .boxed())
}

/// `fs.fstat`: stat the open file `id`
pub fn fstat(ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    let id = resource_id(message)?;
    let descriptor = lookup(ctx, id, Some(DescriptorKind::File))?;

    let message = message.clone();
    Ok(async move {
        match descriptor.metadata().await {
            Ok(metadata) => {
                let mut stats = stat_json(&metadata);
                if let Value::Object(map) = &mut stats {
                    map.insert("id".to_string(), json!(id.to_string()));
                }
                IpcResult::data(&message, stats)
            }
            Err(e) => fail(&message, descriptor_error(id, Some(DescriptorKind::File), e)),
        }
    }
    .boxed())
}

/// `fs.readdir`: next batch of entries from directory `id`
pub fn readdir(ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    let id = resource_id(message)?;
    let limit = ctx.descriptors.config().max_readdir_entries;
    let entries: usize = parse_or(message, "entries", limit)?;
    let descriptor = lookup(ctx, id, Some(DescriptorKind::Directory))?;

    let message = message.clone();
    Ok(async move {
        match descriptor.read_dir(entries.min(limit)).await {
            Ok(entries) => {
                let entries: Vec<Value> = entries
                    .into_iter()
                    .map(|entry| json!({ "type": entry.kind as u8, "name": entry.name }))
                    .collect();
                IpcResult::data(&message, Value::Array(entries))
            }
            Err(e) => fail(&message, descriptor_error(id, Some(DescriptorKind::Directory), e)),
        }
    }
    .boxed())
}

// ----------------------------------------------------------------------------
// Path Operations
// ----------------------------------------------------------------------------

/// `fs.stat`: stat `path`, following symlinks
pub fn stat(_ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    let path = require(message, "path")?;
    let message = message.clone();
    Ok(async move {
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => IpcResult::data(&message, stat_json(&metadata)),
            Err(e) => fail(&message, io_error(&e)),
        }
    }
    .boxed())
}

/// `fs.lstat`: stat `path` without following symlinks
pub fn lstat(_ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    let path = require(message, "path")?;
    let message = message.clone();
    Ok(async move {
        match tokio::fs::symlink_metadata(&path).await {
            Ok(metadata) => IpcResult::data(&message, stat_json(&metadata)),
            Err(e) => fail(&message, io_error(&e)),
        }
    }
    .boxed())
}

/// `fs.access`: check `path` against the access `mode` bits
pub fn access(_ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    let path = require(message, "path")?;
    let mode: i32 = parse_or(message, "mode", 0)?;
    let message = message.clone();
    Ok(async move {
        let checked = tokio::task::spawn_blocking(move || check_access(&path, mode))
            .await
            .unwrap_or_else(|e| Err(io::Error::new(io::ErrorKind::Other, e)));
        match checked {
            Ok(()) => IpcResult::data(&message, json!({ "mode": mode })),
            Err(e) => fail(&message, io_error(&e)),
        }
    }
    .boxed())
}

/// `fs.chmod`: set the permission bits of `path`
pub fn chmod(_ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    let path = require(message, "path")?;
    let mode: u32 = parse(message, "mode")?;
    let message = message.clone();
    Ok(async move {
        match set_mode(&path, mode).await {
            Ok(()) => IpcResult::data(&message, json!({ "mode": mode })),
            Err(e) => fail(&message, io_error(&e)),
        }
    }
    .boxed())
}

/// `fs.mkdir`: create a directory, with parents when `recursive=true`
pub fn mkdir(_ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    let path = require(message, "path")?;
    let mode: u32 = parse_or(message, "mode", 0o777)?;
    let recursive = flag(message, "recursive", false);
    let message = message.clone();
    Ok(async move {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(recursive);
        #[cfg(unix)]
        builder.mode(mode);
        #[cfg(not(unix))]
        let _ = mode;

        match builder.create(&path).await {
            Ok(()) => ok_result(&message),
            Err(e) => fail(&message, io_error(&e)),
        }
    }
    .boxed())
}

/// `fs.rename`: move `src` to `dest`
pub fn rename(_ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    let src = require(message, "src")?;
    let dest = require(message, "dest")?;
    let message = message.clone();
    Ok(async move {
        match tokio::fs::rename(&src, &dest).await {
            Ok(()) => ok_result(&message),
            Err(e) => fail(&message, io_error(&e)),
        }
    }
    .boxed())
}

/// `fs.copyFile`: copy `src` to `dest`, honoring `COPYFILE_EXCL`
pub fn copy_file(_ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    let src = require(message, "src")?;
    let dest = require(message, "dest")?;
    let flags: u32 = parse_or(message, "flags", 0)?;
    let message = message.clone();
    Ok(async move {
        if flags & COPYFILE_EXCL != 0 && tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            return fail(&message, io_error(&already_exists()));
        }
        match tokio::fs::copy(&src, &dest).await {
            Ok(_) => ok_result(&message),
            Err(e) => fail(&message, io_error(&e)),
        }
    }
    .boxed())
}

/// `fs.rmdir`: remove an empty directory
pub fn rmdir(_ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    let path = require(message, "path")?;
    let message = message.clone();
    Ok(async move {
        match tokio::fs::remove_dir(&path).await {
            Ok(()) => ok_result(&message),
            Err(e) => fail(&message, io_error(&e)),
        }
    }
    .boxed())
}

/// `fs.unlink`: remove a file
pub fn unlink(_ctx: &Arc<ModuleContext>, message: &Message) -> Result<HandlerFuture, IpcError> {
    let path = require(message, "path")?;
    let message = message.clone();
    Ok(async move {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => ok_result(&message),
            Err(e) => fail(&message, io_error(&e)),
        }
    }
    .boxed())
}

/// `fs.constants`: open flags, file types, access modes and copy flags
pub fn constants(_ctx: &Arc<ModuleContext>, message: &Message) -> IpcResult {
    IpcResult::data(message, constants_json())
}

// ----------------------------------------------------------------------------
// Platform Glue
// ----------------------------------------------------------------------------

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        fn open_options(flags: i32, mode: u32) -> OpenOptions {
            let access = flags & libc::O_ACCMODE;
            let mut options = OpenOptions::new();
            options
                .read(access == libc::O_RDONLY || access == libc::O_RDWR)
                .write(access == libc::O_WRONLY || access == libc::O_RDWR)
                .append(flags & libc::O_APPEND != 0)
                .truncate(flags & libc::O_TRUNC != 0);

            if flags & libc::O_CREAT != 0 {
                if flags & libc::O_EXCL != 0 {
                    options.create_new(true);
                } else {
                    options.create(true);
                }
            }

            let handled = libc::O_ACCMODE | libc::O_APPEND | libc::O_TRUNC | libc::O_CREAT | libc::O_EXCL;
            options.mode(mode).custom_flags(flags & !handled);
            options
        }

        fn check_access(path: &str, mode: i32) -> io::Result<()> {
            let flags = nix::unistd::AccessFlags::from_bits_truncate(mode);
            nix::unistd::access(path, flags).map_err(io::Error::from)
        }

        async fn set_mode(path: &str, mode: u32) -> io::Result<()> {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
        }

        fn already_exists() -> io::Error {
            io::Error::from_raw_os_error(libc::EEXIST)
        }

        fn stat_json(metadata: &std::fs::Metadata) -> Value {
            use std::os::unix::fs::MetadataExt;
            json!({
                "st_dev": metadata.dev().to_string(),
                "st_ino": metadata.ino().to_string(),
                "st_mode": metadata.mode().to_string(),
                "st_nlink": metadata.nlink().to_string(),
                "st_uid": metadata.uid().to_string(),
                "st_gid": metadata.gid().to_string(),
                "st_rdev": metadata.rdev().to_string(),
                "st_size": metadata.size().to_string(),
                "st_blksize": metadata.blksize().to_string(),
                "st_blocks": metadata.blocks().to_string(),
                "st_flags": "0",
                "st_gen": "0",
                "st_atim": timespec(metadata.atime(), metadata.atime_nsec()),
                "st_mtim": timespec(metadata.mtime(), metadata.mtime_nsec()),
                "st_ctim": timespec(metadata.ctime(), metadata.ctime_nsec()),
                "st_birthtim": birthtime(metadata),
            })
        }

        fn constants_json() -> Value {
            let mut map = Map::new();
            let mut put = |name: &str, value: i64| {
                map.insert(name.to_string(), json!(value));
            };

            put("O_RDONLY", libc::O_RDONLY as i64);
            put("O_WRONLY", libc::O_WRONLY as i64);
            put("O_RDWR", libc::O_RDWR as i64);
            put("O_APPEND", libc::O_APPEND as i64);
            put("O_CREAT", libc::O_CREAT as i64);
            put("O_EXCL", libc::O_EXCL as i64);
            put("O_TRUNC", libc::O_TRUNC as i64);
            put("O_NOCTTY", libc::O_NOCTTY as i64);
            put("O_NONBLOCK", libc::O_NONBLOCK as i64);
            put("O_SYNC", libc::O_SYNC as i64);
            put("O_DIRECTORY", libc::O_DIRECTORY as i64);
            put("O_NOFOLLOW", libc::O_NOFOLLOW as i64);

            put("S_IFMT", libc::S_IFMT as i64);
            put("S_IFREG", libc::S_IFREG as i64);
            put("S_IFDIR", libc::S_IFDIR as i64);
            put("S_IFCHR", libc::S_IFCHR as i64);
            put("S_IFBLK", libc::S_IFBLK as i64);
            put("S_IFIFO", libc::S_IFIFO as i64);
            put("S_IFLNK", libc::S_IFLNK as i64);
            put("S_IFSOCK", libc::S_IFSOCK as i64);
            put("S_IRWXU", libc::S_IRWXU as i64);
            put("S_IRUSR", libc::S_IRUSR as i64);
            put("S_IWUSR", libc::S_IWUSR as i64);
            put("S_IXUSR", libc::S_IXUSR as i64);
            put("S_IRWXG", libc::S_IRWXG as i64);
            put("S_IRGRP", libc::S_IRGRP as i64);
            put("S_IWGRP", libc::S_IWGRP as i64);
            put("S_IXGRP", libc::S_IXGRP as i64);
            put("S_IRWXO", libc::S_IRWXO as i64);
            put("S_IROTH", libc::S_IROTH as i64);
            put("S_IWOTH", libc::S_IWOTH as i64);
            put("S_IXOTH", libc::S_IXOTH as i64);

            put("F_OK", libc::F_OK as i64);
            put("R_OK", libc::R_OK as i64);
            put("W_OK", libc::W_OK as i64);
            put("X_OK", libc::X_OK as i64);

            add_portable_constants(&mut map);
            Value::Object(map)
        }
    } else {
        fn open_options(flags: i32, _mode: u32) -> OpenOptions {
            let mut options = OpenOptions::new();
            options.read(true).write(flags & 0b11 != 0).create(flags & 0x100 != 0);
            options
        }

        fn check_access(path: &str, _mode: i32) -> io::Result<()> {
            std::fs::metadata(path).map(|_| ())
        }

        async fn set_mode(path: &str, mode: u32) -> io::Result<()> {
            let mut permissions = tokio::fs::metadata(path).await?.permissions();
            permissions.set_readonly(mode & 0o222 == 0);
            tokio::fs::set_permissions(path, permissions).await
        }

        fn already_exists() -> io::Error {
            io::Error::from(io::ErrorKind::AlreadyExists)
        }

        fn stat_json(metadata: &std::fs::Metadata) -> Value {
            json!({
                "st_size": metadata.len().to_string(),
                "st_mtim": system_timespec(metadata.modified().ok()),
                "st_atim": system_timespec(metadata.accessed().ok()),
                "st_birthtim": birthtime(metadata),
            })
        }

        fn constants_json() -> Value {
            let mut map = Map::new();
            add_portable_constants(&mut map);
            Value::Object(map)
        }
    }
}

fn add_portable_constants(map: &mut Map<String, Value>) {
    for (name, value) in [
        ("UV_DIRENT_UNKNOWN", 0),
        ("UV_DIRENT_FILE", 1),
        ("UV_DIRENT_DIR", 2),
        ("UV_DIRENT_LINK", 3),
        ("UV_DIRENT_FIFO", 4),
        ("UV_DIRENT_SOCKET", 5),
        ("UV_DIRENT_CHAR", 6),
        ("UV_DIRENT_BLOCK", 7),
        ("COPYFILE_EXCL", COPYFILE_EXCL),
        ("COPYFILE_FICLONE", COPYFILE_FICLONE),
        ("COPYFILE_FICLONE_FORCE", COPYFILE_FICLONE_FORCE),
    ] {
        map.insert(name.to_string(), json!(value));
    }
}

#[cfg(unix)]
fn timespec(sec: i64, nsec: i64) -> Value {
    json!({ "tv_sec": sec.to_string(), "tv_nsec": nsec.to_string() })
}

fn system_timespec(time: Option<std::time::SystemTime>) -> Value {
    let elapsed = time
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .unwrap_or_default();
    json!({
        "tv_sec": elapsed.as_secs().to_string(),
        "tv_nsec": elapsed.subsec_nanos().to_string(),
    })
}

fn birthtime(metadata: &std::fs::Metadata) -> Value {
    system_timespec(metadata.created().ok())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::modules::create_test_context;
    use sockrt_core::ErrorType;

    fn temp_path(name: &str) -> String {
        std::env::temp_dir()
            .join(format!(
                "sockrt-fs-{}-{}-{}",
                std::process::id(),
                ResourceId::random(),
                name
            ))
            .to_string_lossy()
            .into_owned()
    }

    fn request(uri: &str) -> Message {
        Message::parse(uri)
    }

    fn encoded(path: &str) -> String {
        sockrt_core::encode_uri_component(path)
    }

    #[tokio::test]
    async fn test_open_read_close_round_trip() {
        let (ctx, _scripts) = create_test_context();
        let path = temp_path("read");
        tokio::fs::write(&path, b"0123456789").await.unwrap();

        let opened = open(
            &ctx,
            &request(&format!("ipc://fs.open?seq=1&id=11&path={}&flags=0", encoded(&path))),
        )
        .unwrap()
        .await;
        assert!(!opened.is_err(), "{}", opened.str());
        assert_eq!(opened.data["id"], "11");
        assert!(opened.data["fd"].is_i64());

        let read_result = read(&ctx, &request("ipc://fs.read?seq=2&id=11&size=4&offset=3"))
            .unwrap()
            .await;
        let post = read_result.post.unwrap();
        assert_eq!(post.body.as_deref(), Some(&b"3456"[..]));
        assert_eq!(post.headers.get("content-type"), Some("application/octet-stream"));

        let closed = close(&ctx, &request("ipc://fs.close?seq=3&id=11"))
            .unwrap()
            .await;
        assert_eq!(closed.data["id"], "11");
        assert!(!ctx.descriptors.has(ResourceId::new(11)));

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_open_missing_file_removes_descriptor() {
        let (ctx, _scripts) = create_test_context();
        let path = temp_path("missing");
        let result = open(
            &ctx,
            &request(&format!("ipc://fs.open?seq=1&id=4&path={}&flags=0", encoded(&path))),
        )
        .unwrap()
        .await;

        assert!(result.is_err());
        assert_eq!(result.err["code"], "ENOENT");
        assert_eq!(result.err["id"], "4");
        assert!(!ctx.descriptors.has(ResourceId::new(4)));
    }

    #[test]
    fn test_missing_parameters_fail_before_io() {
        let (ctx, _scripts) = create_test_context();
        let err = open(&ctx, &request("ipc://fs.open?seq=1&id=1")).err().unwrap();
        assert_eq!(err.message, "Expecting 'path' in parameters");

        let err = read(&ctx, &request("ipc://fs.read?seq=1&id=1&size=x"))
            .err()
            .unwrap();
        assert_eq!(err.message, "Invalid 'size' given in parameters");
    }

    #[tokio::test]
    async fn test_read_size_is_bounded() {
        let (ctx, _scripts) = create_test_context();
        let path = temp_path("bounded");
        tokio::fs::write(&path, b"abc").await.unwrap();
        open(
            &ctx,
            &request(&format!("ipc://fs.open?seq=1&id=21&path={}&flags=0", encoded(&path))),
        )
        .unwrap()
        .await;

        let err = read(&ctx, &request("ipc://fs.read?seq=2&id=21&size=17592186044416"))
            .err()
            .unwrap();
        assert_eq!(err.code.as_deref(), Some("ERR_OUT_OF_RANGE"));
        assert_eq!(err.id.as_deref(), Some("21"));

        let max = ctx.descriptors.config().max_read_size;
        let result = read(&ctx, &request(&format!("ipc://fs.read?seq=3&id=21&size={}", max)))
            .unwrap()
            .await;
        assert_eq!(result.post.unwrap().body.as_deref(), Some(&b"abc"[..]));

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[test]
    fn test_unknown_descriptor_is_not_found() {
        let (ctx, _scripts) = create_test_context();
        let err = close(&ctx, &request("ipc://fs.close?seq=1&id=999"))
            .err()
            .unwrap();
        assert_eq!(err.kind, Some(ErrorType::NotFoundError));
        assert_eq!(err.code.as_deref(), Some("ENOTOPEN"));
        assert_eq!(err.message, "No file descriptor found with that id");

        let err = readdir(&ctx, &request("ipc://fs.readdir?seq=1&id=999"))
            .err()
            .unwrap();
        assert_eq!(err.message, "No directory descriptor found with that id");
    }

    #[tokio::test]
    async fn test_write_requires_buffer() {
        let (ctx, _scripts) = create_test_context();
        let path = temp_path("write");
        open(
            &ctx,
            &request(&format!(
                "ipc://fs.open?seq=1&id=2&path={}&flags={}&mode=420",
                encoded(&path),
                libc::O_RDWR | libc::O_CREAT
            )),
        )
        .unwrap()
        .await;

        let err = write(&ctx, &request("ipc://fs.write?seq=2&id=2"))
            .err()
            .unwrap();
        assert_eq!(err.message, "Missing buffer in message");

        let written = write(
            &ctx,
            &Message::with_buffer("ipc://fs.write?seq=3&id=2&offset=0", b"abc".to_vec()),
        )
        .unwrap()
        .await;
        assert_eq!(written.data["result"], 3);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"abc");

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_stat_reports_string_fields() {
        let (ctx, _scripts) = create_test_context();
        let path = temp_path("stat");
        tokio::fs::write(&path, b"12345").await.unwrap();

        let result = stat(&ctx, &request(&format!("ipc://fs.stat?seq=1&path={}", encoded(&path))))
            .unwrap()
            .await;
        assert_eq!(result.data["st_size"], "5");
        assert!(result.data["st_mtim"]["tv_sec"].is_string());

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_directory_lifecycle() {
        let (ctx, _scripts) = create_test_context();
        let dir = temp_path("dir");

        let made = mkdir(&ctx, &request(&format!("ipc://fs.mkdir?seq=1&path={}", encoded(&dir))))
            .unwrap()
            .await;
        assert_eq!(made.data["result"], 0);
        tokio::fs::write(format!("{}/file.txt", dir), b"x").await.unwrap();

        opendir(&ctx, &request(&format!("ipc://fs.opendir?seq=2&id=3&path={}", encoded(&dir))))
            .unwrap()
            .await;
        let listed = readdir(&ctx, &request("ipc://fs.readdir?seq=3&id=3&entries=10"))
            .unwrap()
            .await;
        assert_eq!(listed.data, json!([{ "type": 1, "name": "file.txt" }]));

        let open_list = get_open_descriptors(&ctx, &request("ipc://fs.getOpenDescriptors?seq=4"));
        assert_eq!(open_list.data[0]["type"], "directory");

        closedir(&ctx, &request("ipc://fs.closedir?seq=5&id=3"))
            .unwrap()
            .await;
        tokio::fs::remove_file(format!("{}/file.txt", dir)).await.unwrap();
        let removed = rmdir(&ctx, &request(&format!("ipc://fs.rmdir?seq=6&path={}", encoded(&dir))))
            .unwrap()
            .await;
        assert!(!removed.is_err(), "{}", removed.str());
    }

    #[tokio::test]
    async fn test_copy_file_exclusive() {
        let (ctx, _scripts) = create_test_context();
        let src = temp_path("src");
        let dest = temp_path("dest");
        tokio::fs::write(&src, b"data").await.unwrap();
        tokio::fs::write(&dest, b"old").await.unwrap();

        let uri = format!(
            "ipc://fs.copyFile?seq=1&src={}&dest={}&flags={}",
            encoded(&src),
            encoded(&dest),
            COPYFILE_EXCL
        );
        let result = copy_file(&ctx, &request(&uri)).unwrap().await;
        assert_eq!(result.err["code"], "EEXIST");
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"old");

        tokio::fs::remove_file(&src).await.unwrap();
        tokio::fs::remove_file(&dest).await.unwrap();
    }

    #[test]
    fn test_constants_include_open_flags() {
        let (ctx, _scripts) = create_test_context();
        let result = constants(&ctx, &request("ipc://fs.constants?seq=1"));
        assert_eq!(result.data["O_RDONLY"], libc::O_RDONLY as i64);
        assert_eq!(result.data["UV_DIRENT_DIR"], 2);
        assert_eq!(result.data["COPYFILE_EXCL"], 1);
    }
}
