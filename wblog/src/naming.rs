//! 文件名分配
//!
//! 三种命名方式：
//! - 计数器：`前缀 + 4 位计数器 + 扩展名`，计数器在 0..9999 之间循环
//! - 时间戳：`前缀 + 打开时间 + _持续秒数 + [_消歧计数器] + 扩展名`
//! - 无后缀：`前缀 + [_消歧计数器] + 扩展名`
//!
//! 分配器本身不保存计数器，计数器由设置持有并在每次分配后持久化，
//! 这样异常重启后第一次分配也不会与上次已关闭的文件重名。

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use crate::constants::{COUNTER_MODULUS, COUNTER_WIDTH, MAX_DISAMBIGUATION};
use crate::error::MediumError;
use crate::medium::{Medium, MediumFile, OpenMode};
use crate::settings::{LogSettings, NameSuffix};

/// 计数器命名的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterName {
    pub name: String,
    /// 需要持久化的下一个计数器值
    pub next_counter: u32,
}

/// 文件名分配器
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAllocator {
    prefix: String,
    extension: String,
}

impl NameAllocator {
    /// `prefix` 和 `extension` 按原样拼接，不做规范化
    pub fn new(prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            extension: extension.into(),
        }
    }

    /// 使用规范化后的设置
    pub fn from_settings(settings: &LogSettings) -> Self {
        let settings = settings.normalized();
        Self::new(settings.name_prefix, settings.extension)
    }

    pub fn counter_name(&self, counter: u32) -> String {
        format!(
            "{}{:0width$}{}",
            self.prefix,
            counter % COUNTER_MODULUS,
            self.extension,
            width = COUNTER_WIDTH
        )
    }

    /// 从 `counter` 开始找第一个不存在的计数器文件名
    ///
    /// 绕一整圈都被占用时返回 None。
    pub fn next_counter_name(
        &self,
        counter: u32,
        mut exists: impl FnMut(&str) -> bool,
    ) -> Option<CounterName> {
        let initial = counter % COUNTER_MODULUS;
        let mut counter = initial;
        loop {
            let name = self.counter_name(counter);
            counter = (counter + 1) % COUNTER_MODULUS;
            if !exists(&name) {
                return Some(CounterName {
                    name,
                    next_counter: counter,
                });
            }
            if counter == initial {
                return None;
            }
        }
    }

    /// 时间戳文件名，重名时追加 `_0001`..`_9999`
    pub fn next_timestamp_name(
        &self,
        base_time: NaiveDateTime,
        elapsed_secs: u64,
        exists: impl FnMut(&str) -> bool,
    ) -> Option<String> {
        let stem = format!(
            "{}{}_{}",
            self.prefix,
            base_time.format("%Y-%m-%d_%H-%M-%S"),
            elapsed_secs
        );
        self.disambiguate(&stem, exists)
    }

    /// 无后缀文件名，重名时追加 `_0001`..`_9999`
    pub fn next_plain_name(&self, exists: impl FnMut(&str) -> bool) -> Option<String> {
        let stem = self.prefix.trim_end_matches('_');
        let stem = if stem.is_empty() { "Log" } else { stem };
        self.disambiguate(stem, exists)
    }

    fn disambiguate(&self, stem: &str, mut exists: impl FnMut(&str) -> bool) -> Option<String> {
        let mut counter = 0u32;
        loop {
            let name = if counter == 0 {
                format!("{}{}", stem, self.extension)
            } else {
                format!(
                    "{}_{:0width$}{}",
                    stem,
                    counter,
                    self.extension,
                    width = COUNTER_WIDTH
                )
            };
            if !exists(&name) {
                return Some(name);
            }
            counter += 1;
            if counter > MAX_DISAMBIGUATION {
                return None;
            }
        }
    }

    /// 按设置的后缀方式分配名称，返回名称和（计数器方式下）新的计数器值
    pub fn allocate(
        &self,
        suffix: NameSuffix,
        counter: u32,
        base_time: NaiveDateTime,
        elapsed_secs: u64,
        exists: impl FnMut(&str) -> bool,
    ) -> Option<(String, Option<u32>)> {
        match suffix {
            NameSuffix::Counter => self
                .next_counter_name(counter, exists)
                .map(|c| (c.name, Some(c.next_counter))),
            NameSuffix::Timestamp => self
                .next_timestamp_name(base_time, elapsed_secs, exists)
                .map(|name| (name, None)),
            NameSuffix::None => self.next_plain_name(exists).map(|name| (name, None)),
        }
    }
}

/// 计数器持久化文件，内容为 4 位十进制文本，例如 `0042`
pub struct CounterFile {
    path: String,
}

impl CounterFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// 读取计数器，文件不存在或内容无效时返回 None
    pub fn load<M: Medium>(&self, medium: &mut M) -> Result<Option<u32>, MediumError> {
        let mut file = match medium.open(&self.path, OpenMode::Read) {
            Ok(file) => file,
            Err(MediumError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut buf = [0u8; 16];
        let mut len = 0;
        while len < buf.len() {
            let n = file.read(&mut buf[len..])?;
            if n == 0 {
                break;
            }
            len += n;
        }
        file.close()?;

        let text = String::from_utf8_lossy(&buf[..len]);
        match text.trim().parse::<u32>() {
            Ok(value) => {
                debug!("Loaded file name counter {} from {}", value, self.path);
                Ok(Some(value % COUNTER_MODULUS))
            }
            Err(_) => {
                warn!(
                    "Ignoring invalid counter file {}: {:?}",
                    self.path,
                    text.trim()
                );
                Ok(None)
            }
        }
    }

    pub fn store<M: Medium>(&self, medium: &mut M, value: u32) -> Result<(), MediumError> {
        let text = format!("{:0width$}", value % COUNTER_MODULUS, width = COUNTER_WIDTH);
        let mut file = medium.open(&self.path, OpenMode::Truncate)?;
        let written = file.write(text.as_bytes())?;
        file.close()?;
        if written != text.len() {
            return Err(MediumError::MediumFull);
        }
        Ok(())
    }
}
