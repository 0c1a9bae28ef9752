//! 写入器模块
//!
//! LogWriter 持有存储介质和当前打开的文件，记录打开以来的字节数和打开时刻。
//! 轮转策略由引擎决定，这里只提供打开、写入、关闭、重命名等原语。

use tracing::debug;

use crate::error::{LogError, MediumError};
use crate::medium::{Medium, MediumFile, OpenMode};

pub struct LogWriter<M: Medium> {
    medium: M,
    file: Option<M::File>,
    path: String,
    size: u64,
    opened_at: u64,
}

impl<M: Medium> LogWriter<M> {
    pub fn new(medium: M) -> Self {
        Self {
            medium,
            file: None,
            path: String::new(),
            size: 0,
            opened_at: 0,
        }
    }

    pub fn medium(&self) -> &M {
        &self.medium
    }

    pub fn medium_mut(&mut self) -> &mut M {
        &mut self.medium
    }

    pub fn is_ready(&self) -> bool {
        self.medium.is_ready()
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// 当前文件路径，未打开时为空
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 打开文件，`truncate` 为 false 时追加到已有内容之后
    ///
    /// 已有打开的文件会先关闭。`now` 为打开时刻的 tick。
    pub fn open(&mut self, path: &str, truncate: bool, now: u64) -> Result<(), LogError> {
        self.close()?;

        let mode = if truncate {
            OpenMode::Truncate
        } else {
            OpenMode::Append
        };
        let file = self.medium.open(path, mode)?;
        self.size = file.size()?;
        self.file = Some(file);
        self.path = path.to_string();
        self.opened_at = now;
        debug!("wblog: Opened {} ({} bytes)", path, self.size);
        Ok(())
    }

    /// 写入文件头，必须完整写入
    pub fn write_preamble(&mut self, preamble: &[u8]) -> Result<(), LogError> {
        let mut written = 0;
        while written < preamble.len() {
            match self.write(&preamble[written..])? {
                0 => return Err(LogError::MediumFull),
                n => written += n,
            }
        }
        Ok(())
    }

    /// 写入数据，返回实际写入的字节数
    ///
    /// 返回值小于 `data.len()` 表示介质已满（短写）。
    pub fn write(&mut self, data: &[u8]) -> Result<usize, LogError> {
        let file = self.file.as_mut().ok_or_else(not_open)?;
        let n = file.write(data)?;
        self.size += n as u64;
        Ok(n)
    }

    /// 打开以来的文件大小（含打开时已有的内容）
    pub fn current_size(&self) -> u64 {
        self.size
    }

    /// 打开时刻的 tick
    pub fn opened_at(&self) -> u64 {
        self.opened_at
    }

    /// 打开以来经过的 tick
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.opened_at)
    }

    /// 重新读取介质报告的文件大小
    pub fn refresh_size(&mut self) -> Result<u64, LogError> {
        let file = self.file.as_ref().ok_or_else(not_open)?;
        self.size = file.size()?;
        Ok(self.size)
    }

    /// 关闭当前文件，未打开时什么都不做
    pub fn close(&mut self) -> Result<(), LogError> {
        match self.file.take() {
            Some(file) => {
                debug!("wblog: Closing {} ({} bytes)", self.path, self.size);
                file.close()?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn rename(&mut self, from: &str, to: &str) -> Result<(), LogError> {
        self.medium.rename(from, to)?;
        Ok(())
    }

    pub fn exists(&self, pattern: &str) -> bool {
        self.medium.exists(pattern)
    }

    pub fn delete(&mut self, path: &str) -> Result<(), LogError> {
        self.medium.delete(path)?;
        Ok(())
    }

    /// 不打开文件，读取某个文件的大小；不存在时返回 None
    pub fn file_size(&mut self, path: &str) -> Result<Option<u64>, LogError> {
        match self.medium.open(path, OpenMode::Read) {
            Ok(file) => {
                let size = file.size()?;
                file.close()?;
                Ok(Some(size))
            }
            Err(MediumError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn not_open() -> LogError {
    LogError::Io(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "no file is open",
    ))
}

impl<M: Medium> Drop for LogWriter<M> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
