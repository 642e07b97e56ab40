//! The [`FileSystem`] abstraction shared by the local filesystem and the
//! on-device filesystem reachable over `sync:`, plus the [`SyncFile`] type
//! both sides describe their entries with. Grounded in the teacher's
//! `fs.rs`, with `AndroidFs` rebuilt over [`FilesyncConnection`] instead of
//! shelling out to `adb push`/`adb pull`.

use chainerror::Context;
use std::{
    fmt::Debug,
    fs::File,
    hash::Hash,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use typed_path::UnixPath;

#[cfg(target_os = "linux")]
use std::os::unix::fs::MetadataExt;
#[cfg(target_os = "windows")]
use std::os::windows::fs::MetadataExt;

use crate::filesync::FilesyncConnection;
use crate::protocol::AdbConnection;
use crate::transport::Transport;
use crate::Result;

pub trait AsStr {
    fn as_str(&self) -> &str;
}

impl AsStr for UnixPath {
    fn as_str(&self) -> &str {
        self.to_str().expect("path to str")
    }
}

pub trait FileSystem {
    fn mkdir(&mut self, path: &UnixPath) -> Result<()>;
    fn list_dir(&mut self, path: &UnixPath) -> Result<Vec<SyncFile>>;
    fn rm(&mut self, path: &UnixPath) -> Result<()>;
    fn rm_dir(&mut self, path: &UnixPath) -> Result<()>;
    fn set_mtime(&mut self, path: &UnixPath, timestamp: u32) -> Result<()>;
    fn get_all_files(&mut self, path: &UnixPath) -> Result<(Vec<SyncFile>, Vec<SyncFile>)> {
        let mut fs = self.list_dir(path).annotate()?;
        let mut ffs = Vec::with_capacity(fs.len());
        let mut dirs = Vec::new();
        while let Some(f) = fs.pop() {
            match f.mode {
                FileMode::File => ffs.push(f),
                FileMode::Dir => {
                    let mut l = self.list_dir(&f.path).annotate()?;
                    if !l.is_empty() {
                        fs.append(&mut l);
                    } else {
                        dirs.push(f);
                    }
                }
                FileMode::Symlink => continue,
            }
        }
        Ok((ffs, dirs))
    }
}

#[derive(Debug, Eq, Hash, PartialEq, Clone, Copy)]
pub enum FileMode {
    File,
    Dir,
    Symlink,
}

impl FileMode {
    pub fn from_u32(mode: u32) -> Self {
        match mode >> 13 {
            0b100 => Self::File,
            0b010 => Self::Dir,
            0b101 => Self::Symlink,
            _ => Self::File,
        }
    }
}

#[derive(Eq, Clone)]
pub struct SyncFile {
    pub mode: FileMode,
    pub size: u32,
    pub timestamp: u32,
    pub name: Box<str>,
    pub path: Box<UnixPath>,
}

impl PartialEq for SyncFile {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
impl Hash for SyncFile {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl Debug for SyncFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncFile")
            .field("mode", &self.mode)
            .field("size", &self.size)
            .field("timestamp", &self.timestamp)
            .field("name", &self.name)
            .field("path", &self.path.as_str())
            .finish()
    }
}

pub trait FSCopyFrom<SRC: FileSystem> {
    fn copy(&mut self, from: &UnixPath, to: &UnixPath, timestamp: Option<u32>) -> Result<()>;
}

/// The on-device filesystem, driven over one ADB connection's `sync:`
/// service. `mkdir`/`rm`/`rm_dir` are no-ops or unsupported: `SEND` creates
/// parent directories implicitly, and the original `adb sync` tooling never
/// deletes on-device files either (it's a push/pull mirror, not `rsync
/// --delete` on the device side).
pub struct AndroidFs<'a, T: Transport> {
    pub conn: &'a mut AdbConnection<T>,
}

impl<'a, T: Transport> AndroidFs<'a, T> {
    pub fn new(conn: &'a mut AdbConnection<T>) -> Self {
        Self { conn }
    }
}

impl<'a, T: Transport> FileSystem for AndroidFs<'a, T> {
    fn mkdir(&mut self, _path: &UnixPath) -> Result<()> {
        Ok(())
    }

    fn list_dir(&mut self, path: &UnixPath) -> Result<Vec<SyncFile>> {
        let mut stream = self.conn.open("sync:").annotate()?;
        let mut fs = FilesyncConnection::new(&mut stream);
        let entries = fs.list(path.as_str()).annotate()?;
        let mut files = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.filename == "." || entry.filename == ".." {
                continue;
            }
            let entry_path = path.join(&entry.filename);
            files.push(SyncFile {
                mode: FileMode::from_u32(entry.mode),
                size: entry.size,
                timestamp: entry.mtime,
                name: entry.filename.into_boxed_str(),
                path: entry_path.into(),
            });
        }
        Ok(files)
    }

    fn rm(&mut self, _path: &UnixPath) -> Result<()> {
        Err("deleting on-device files is not supported".into())
    }

    fn rm_dir(&mut self, _path: &UnixPath) -> Result<()> {
        Err("deleting on-device directories is not supported".into())
    }

    fn set_mtime(&mut self, _path: &UnixPath, _timestamp: u32) -> Result<()> {
        // SEND already carries the mtime in its DONE packet.
        Ok(())
    }
}

impl<'a, T: Transport> FSCopyFrom<LocalFS> for AndroidFs<'a, T> {
    fn copy(&mut self, from: &UnixPath, to: &UnixPath, timestamp: Option<u32>) -> Result<()> {
        let mut source = File::open(from.as_str()).annotate()?;
        let mode = source.metadata().annotate()?.permissions();
        let _ = mode;
        let mtime = timestamp.unwrap_or(0);

        let mut stream = self.conn.open("sync:").annotate()?;
        let mut fs = FilesyncConnection::new(&mut stream);
        fs.send_file(
            to.as_str(),
            crate::filesync::DEFAULT_PUSH_MODE,
            mtime,
            |buf| std::io::Read::read(&mut source, buf),
        )
        .annotate()?;
        Ok(())
    }
}

impl<'a, T: Transport> FSCopyFrom<AndroidFs<'a, T>> for LocalFS {
    fn copy(&mut self, _from: &UnixPath, _to: &UnixPath, _timestamp: Option<u32>) -> Result<()> {
        // Pulls are driven by `pull_push` directly (it needs a live
        // `AndroidFs` borrow to open the `sync:` stream), so this generic
        // impl is unreachable in practice; kept so `FSCopyFrom` stays
        // symmetric for both transfer directions.
        Err("use AndroidFs::pull_into instead of LocalFS::copy".into())
    }
}

impl<'a, T: Transport> AndroidFs<'a, T> {
    /// Pulls `from` into the local path `to`, optionally setting `to`'s
    /// mtime from the device's reported value afterwards.
    pub fn pull_into(&mut self, from: &UnixPath, to: &UnixPath, set_mtime: bool) -> Result<()> {
        let mtime = if set_mtime {
            let mut stat_stream = self.conn.open("sync:").annotate()?;
            let mut stat_fs = FilesyncConnection::new(&mut stat_stream);
            Some(stat_fs.stat(from.as_str()).annotate()?.2)
        } else {
            None
        };

        let mut dest = File::create(to.as_str()).annotate()?;
        let mut stream = self.conn.open("sync:").annotate()?;
        let mut fs = FilesyncConnection::new(&mut stream);
        fs.recv(from.as_str(), |chunk| {
            let _ = std::io::Write::write_all(&mut dest, chunk);
        })
        .annotate()?;

        if let Some(mtime) = mtime {
            dest.set_modified(UNIX_EPOCH + Duration::from_secs(mtime as u64))
                .annotate()?;
        }
        Ok(())
    }
}

impl FSCopyFrom<LocalFS> for LocalFS {
    fn copy(&mut self, from: &UnixPath, to: &UnixPath, _timestamp: Option<u32>) -> Result<()> {
        std::fs::copy(from.as_str(), to.as_str()).annotate()?;
        Ok(())
    }
}

pub struct LocalFS;
impl FileSystem for LocalFS {
    fn mkdir(&mut self, path: &UnixPath) -> Result<()> {
        Ok(std::fs::create_dir_all(path.as_str()).annotate()?)
    }

    fn list_dir(&mut self, path: &UnixPath) -> Result<Vec<SyncFile>> {
        let mut fs = Vec::new();
        for dir in std::fs::read_dir(path.as_str()).annotate()? {
            let dir = dir.annotate()?;
            let md = dir.metadata().annotate()?;
            let mode = if md.is_dir() {
                FileMode::Dir
            } else if md.is_file() {
                FileMode::File
            } else if md.is_symlink() {
                FileMode::Symlink
            } else {
                FileMode::File
            };
            let name = dir.file_name().into_string().unwrap();
            let path = path.join(&name);
            #[cfg(target_os = "windows")]
            let size = md.file_size() as u32;
            #[cfg(target_os = "linux")]
            let size = md.size() as u32;
            #[cfg(not(any(target_os = "windows", target_os = "linux")))]
            let size = md.len() as u32;

            fs.push(SyncFile {
                mode,
                size,
                timestamp: md
                    .modified()
                    .annotate()?
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .expect("system time shouldnt error")
                    .as_secs() as u32,
                name: name.into_boxed_str(),
                path: path.into(),
            });
        }
        Ok(fs)
    }

    fn rm(&mut self, path: &UnixPath) -> Result<()> {
        Ok(std::fs::remove_file(path.as_str()).annotate()?)
    }

    fn rm_dir(&mut self, path: &UnixPath) -> Result<()> {
        Ok(std::fs::remove_dir_all(path.as_str()).annotate()?)
    }

    fn set_mtime(&mut self, path: &UnixPath, timestamp: u32) -> Result<()> {
        let dest = File::options().write(true).open(path.as_str()).annotate()?;
        dest.set_modified(UNIX_EPOCH + Duration::from_secs(timestamp as u64))
            .annotate()?;
        Ok(())
    }
}
