//! 存储介质抽象
//!
//! 引擎只通过 [`Medium`] 访问文件，路径统一使用 `/` 分隔的相对路径。
//! - [`FsMedium`]：宿主文件系统，以某个目录为根
//! - [`MemMedium`]：内存介质，可设置容量并注入故障，用于测试

mod fs;
mod memory;

pub use fs::{FsFile, FsMedium};
pub use memory::{MemFile, MemMedium};

use crate::error::MediumError;

/// 打开方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// 只读，文件不存在时返回 NotFound
    Read,
    /// 写入，存在则清空
    Truncate,
    /// 写入，追加到已有内容之后
    Append,
}

impl OpenMode {
    pub fn is_write(self) -> bool {
        !matches!(self, OpenMode::Read)
    }
}

/// 已打开的文件
pub trait MediumFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, MediumError>;

    /// 写入数据，返回实际写入的字节数
    ///
    /// 介质剩余空间不足时可以只写入一部分（短写），
    /// 一个字节都写不进去时返回 `MediumError::MediumFull`。
    fn write(&mut self, data: &[u8]) -> Result<usize, MediumError>;

    /// 当前文件大小
    fn size(&self) -> Result<u64, MediumError>;

    /// 关闭文件，已写入的数据落盘
    fn close(self) -> Result<(), MediumError>
    where
        Self: Sized;
}

/// 存储介质
pub trait Medium {
    type File: MediumFile;

    /// 介质是否已挂载可用
    fn is_ready(&self) -> bool;

    fn open(&mut self, path: &str, mode: OpenMode) -> Result<Self::File, MediumError>;

    /// 是否存在匹配的文件，文件名部分支持 `*` 和 `?` 通配符
    fn exists(&self, pattern: &str) -> bool;

    /// 重命名，目标已存在时返回错误
    fn rename(&mut self, from: &str, to: &str) -> Result<(), MediumError>;

    fn delete(&mut self, path: &str) -> Result<(), MediumError>;
}

/// 通配符匹配：`*` 匹配任意个字符，`?` 匹配一个字符
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();

    let (mut p, mut n) = (0, 0);
    // 最近一个 `*` 的位置，以及它当时对应的 name 位置
    let mut star: Option<(usize, usize)> = None;

    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, n));
            p += 1;
        } else if let Some((sp, sn)) = star {
            p = sp + 1;
            n = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

pub fn has_wildcard(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

/// 拆分为 (目录, 文件名)，没有目录时目录为空串
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(pos) => (&path[..pos], &path[pos + 1..]),
        None => ("", path),
    }
}
