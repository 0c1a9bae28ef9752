//! 宿主文件系统介质

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{has_wildcard, split_path, wildcard_match, Medium, MediumFile, OpenMode};
use crate::error::MediumError;

#[cfg(unix)]
const DISK_FULL_CODES: &[i32] = &[28]; // ENOSPC
#[cfg(windows)]
const DISK_FULL_CODES: &[i32] = &[39, 112]; // ERROR_HANDLE_DISK_FULL, ERROR_DISK_FULL
#[cfg(not(any(unix, windows)))]
const DISK_FULL_CODES: &[i32] = &[];

fn map_io(e: io::Error) -> MediumError {
    match e.raw_os_error() {
        Some(code) if DISK_FULL_CODES.contains(&code) => MediumError::MediumFull,
        _ => MediumError::Io(e),
    }
}

/// 配额：根目录下所有文件的总大小上限
#[derive(Debug, Clone)]
struct Quota {
    limit: u64,
    used: Arc<AtomicU64>,
}

impl Quota {
    fn available(&self) -> u64 {
        self.limit.saturating_sub(self.used.load(Ordering::Relaxed))
    }

    fn release(&self, bytes: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                Some(used.saturating_sub(bytes))
            });
    }
}

/// 以某个目录为根的文件系统介质
///
/// 设置配额后可以在普通磁盘上模拟存储卡写满。
#[derive(Debug, Clone)]
pub struct FsMedium {
    root: PathBuf,
    quota: Option<Quota>,
}

impl FsMedium {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            quota: None,
        }
    }

    /// 限制根目录下的总字节数，已有文件计入用量
    pub fn with_quota<P: AsRef<Path>>(root: P, limit: u64) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let used = if root.is_dir() { dir_size(&root)? } else { 0 };
        Ok(Self {
            root,
            quota: Some(Quota {
                limit,
                used: Arc::new(AtomicU64::new(used)),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 剩余配额，未设置配额时为 None
    pub fn available(&self) -> Option<u64> {
        self.quota.as_ref().map(Quota::available)
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn release(&self, path: &Path) {
        if let Some(quota) = &self.quota {
            if let Ok(meta) = fs::metadata(path) {
                quota.release(meta.len());
            }
        }
    }
}

fn dir_size(dir: &Path) -> io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}

impl Medium for FsMedium {
    type File = FsFile;

    fn is_ready(&self) -> bool {
        self.root.is_dir()
    }

    fn open(&mut self, path: &str, mode: OpenMode) -> Result<FsFile, MediumError> {
        let full = self.full_path(path);

        let file = match mode {
            OpenMode::Read => File::open(&full).map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    MediumError::NotFound(path.to_string())
                } else {
                    MediumError::Io(e)
                }
            })?,
            OpenMode::Truncate | OpenMode::Append => {
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent).map_err(map_io)?;
                }
                if mode == OpenMode::Truncate {
                    self.release(&full);
                }
                OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(mode == OpenMode::Truncate)
                    .append(mode == OpenMode::Append)
                    .open(&full)
                    .map_err(map_io)?
            }
        };

        Ok(FsFile {
            file,
            quota: self.quota.clone(),
        })
    }

    fn exists(&self, pattern: &str) -> bool {
        if !has_wildcard(pattern) {
            return self.full_path(pattern).exists();
        }

        let (dir, name) = split_path(pattern);
        let Ok(entries) = fs::read_dir(self.full_path(dir)) else {
            return false;
        };
        entries
            .filter_map(|entry| entry.ok())
            .any(|entry| wildcard_match(name, &entry.file_name().to_string_lossy()))
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), MediumError> {
        let target = self.full_path(to);
        if target.exists() {
            return Err(MediumError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", to),
            )));
        }
        fs::rename(self.full_path(from), target).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                MediumError::NotFound(from.to_string())
            } else {
                map_io(e)
            }
        })
    }

    fn delete(&mut self, path: &str) -> Result<(), MediumError> {
        let full = self.full_path(path);
        let size = fs::metadata(&full).map(|m| m.len()).ok();
        fs::remove_file(&full).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                MediumError::NotFound(path.to_string())
            } else {
                MediumError::Io(e)
            }
        })?;
        if let (Some(quota), Some(size)) = (&self.quota, size) {
            quota.release(size);
        }
        Ok(())
    }
}

/// [`FsMedium`] 打开的文件
#[derive(Debug)]
pub struct FsFile {
    file: File,
    quota: Option<Quota>,
}

impl MediumFile for FsFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, MediumError> {
        self.file.read(buf).map_err(MediumError::Io)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, MediumError> {
        if data.is_empty() {
            return Ok(0);
        }

        let len = match &self.quota {
            Some(quota) => {
                let available = quota.available();
                if available == 0 {
                    return Err(MediumError::MediumFull);
                }
                data.len().min(available.min(usize::MAX as u64) as usize)
            }
            None => data.len(),
        };

        self.file.write_all(&data[..len]).map_err(map_io)?;
        if let Some(quota) = &self.quota {
            quota.used.fetch_add(len as u64, Ordering::Relaxed);
        }
        Ok(len)
    }

    fn size(&self) -> Result<u64, MediumError> {
        Ok(self.file.metadata().map_err(MediumError::Io)?.len())
    }

    fn close(mut self) -> Result<(), MediumError> {
        self.file.flush().map_err(map_io)?;
        self.file.sync_all().map_err(map_io)
    }
}
