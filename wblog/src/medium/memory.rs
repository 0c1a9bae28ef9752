//! 内存介质
//!
//! 所有克隆共享同一份状态，测试可以一边交给引擎使用，一边检查文件内容、
//! 模拟拔卡或写满。

use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{has_wildcard, split_path, wildcard_match, Medium, MediumFile, OpenMode};
use crate::error::MediumError;

#[derive(Debug, Default)]
struct MemState {
    files: BTreeMap<String, Vec<u8>>,
    capacity: Option<u64>,
    unready: bool,
    fail_writes: bool,
    fail_rename: bool,
    fail_open: bool,
}

impl MemState {
    fn used(&self) -> u64 {
        self.files.values().map(|data| data.len() as u64).sum()
    }
}

fn injected(what: &str) -> MediumError {
    MediumError::Io(io::Error::new(
        io::ErrorKind::Other,
        format!("injected {} failure", what),
    ))
}

#[derive(Debug, Clone, Default)]
pub struct MemMedium {
    state: Arc<Mutex<MemState>>,
}

impl MemMedium {
    pub fn new() -> Self {
        Self::default()
    }

    /// 总容量限制（字节），所有文件共享
    pub fn with_capacity(capacity: u64) -> Self {
        let medium = Self::new();
        medium.set_capacity(Some(capacity));
        medium
    }

    fn state(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_capacity(&self, capacity: Option<u64>) {
        self.state().capacity = capacity;
    }

    /// 模拟介质插拔
    pub fn set_ready(&self, ready: bool) {
        self.state().unready = !ready;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    pub fn fail_rename(&self, fail: bool) {
        self.state().fail_rename = fail;
    }

    pub fn fail_open(&self, fail: bool) {
        self.state().fail_open = fail;
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.state().files.get(path).cloned()
    }

    pub fn insert(&self, path: &str, data: Vec<u8>) {
        self.state().files.insert(path.to_string(), data);
    }

    /// 所有文件路径，按字典序
    pub fn paths(&self) -> Vec<String> {
        self.state().files.keys().cloned().collect()
    }

    pub fn used(&self) -> u64 {
        self.state().used()
    }
}

impl Medium for MemMedium {
    type File = MemFile;

    fn is_ready(&self) -> bool {
        !self.state().unready
    }

    fn open(&mut self, path: &str, mode: OpenMode) -> Result<MemFile, MediumError> {
        let mut state = self.state();
        if state.fail_open {
            return Err(injected("open"));
        }
        match mode {
            OpenMode::Read => {
                if !state.files.contains_key(path) {
                    return Err(MediumError::NotFound(path.to_string()));
                }
            }
            OpenMode::Truncate => {
                state.files.insert(path.to_string(), Vec::new());
            }
            OpenMode::Append => {
                state.files.entry(path.to_string()).or_default();
            }
        }
        Ok(MemFile {
            state: Arc::clone(&self.state),
            path: path.to_string(),
            read_pos: 0,
        })
    }

    fn exists(&self, pattern: &str) -> bool {
        let state = self.state();
        if !has_wildcard(pattern) {
            return state.files.contains_key(pattern);
        }
        let (dir, name) = split_path(pattern);
        state.files.keys().any(|path| {
            let (file_dir, file_name) = split_path(path);
            file_dir == dir && wildcard_match(name, file_name)
        })
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), MediumError> {
        let mut state = self.state();
        if state.fail_rename {
            return Err(injected("rename"));
        }
        if state.files.contains_key(to) {
            return Err(MediumError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", to),
            )));
        }
        let data = state
            .files
            .remove(from)
            .ok_or_else(|| MediumError::NotFound(from.to_string()))?;
        state.files.insert(to.to_string(), data);
        Ok(())
    }

    fn delete(&mut self, path: &str) -> Result<(), MediumError> {
        self.state()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| MediumError::NotFound(path.to_string()))
    }
}

/// [`MemMedium`] 打开的文件
#[derive(Debug)]
pub struct MemFile {
    state: Arc<Mutex<MemState>>,
    path: String,
    read_pos: usize,
}

impl MemFile {
    fn state(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MediumFile for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, MediumError> {
        let n = {
            let state = self.state();
            let data = state
                .files
                .get(&self.path)
                .ok_or_else(|| MediumError::NotFound(self.path.clone()))?;
            let remaining = data.get(self.read_pos..).unwrap_or(&[]);
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            n
        };
        self.read_pos += n;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, MediumError> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(injected("write"));
        }
        if data.is_empty() {
            return Ok(0);
        }

        let len = match state.capacity {
            Some(capacity) => {
                let available = capacity.saturating_sub(state.used());
                if available == 0 {
                    return Err(MediumError::MediumFull);
                }
                data.len().min(available.min(usize::MAX as u64) as usize)
            }
            None => data.len(),
        };

        state
            .files
            .get_mut(&self.path)
            .ok_or_else(|| MediumError::NotFound(self.path.clone()))?
            .extend_from_slice(&data[..len]);
        Ok(len)
    }

    fn size(&self) -> Result<u64, MediumError> {
        self.state()
            .files
            .get(&self.path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| MediumError::NotFound(self.path.clone()))
    }

    fn close(self) -> Result<(), MediumError> {
        Ok(())
    }
}
