//! 错误定义

use std::io;
use thiserror::Error;

/// 存储介质错误
#[derive(Error, Debug)]
pub enum MediumError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("medium full")]
    MediumFull,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl MediumError {
    /// 错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            MediumError::MediumFull => ErrorKind::MediumFull,
            MediumError::NotFound(_) | MediumError::Io(_) => ErrorKind::Io,
        }
    }
}

/// 日志引擎错误
#[derive(Error, Debug)]
pub enum LogError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("no file name available")]
    NameExhausted,
    #[error("medium full")]
    MediumFull,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("buffer overrun: {requested} bytes requested, {available} available")]
    BufferOverrun { requested: usize, available: usize },
    #[error("producer handle has been detached from the engine")]
    ProducerDetached,
}

impl LogError {
    /// 回调使用的错误分类；配置类错误不会在运行期间出现
    pub fn kind(&self) -> ErrorKind {
        match self {
            LogError::NameExhausted => ErrorKind::NameExhausted,
            LogError::MediumFull => ErrorKind::MediumFull,
            _ => ErrorKind::Io,
        }
    }
}

impl From<MediumError> for LogError {
    fn from(e: MediumError) -> Self {
        match e {
            MediumError::NotFound(path) => LogError::NotFound(path),
            MediumError::MediumFull => LogError::MediumFull,
            MediumError::Io(e) => LogError::Io(e),
        }
    }
}

/// 上报给 `on_error` 回调的错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NameExhausted,
    MediumFull,
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NameExhausted => write!(f, "No file names available"),
            ErrorKind::MediumFull => write!(f, "Medium full"),
            ErrorKind::Io => write!(f, "File system error"),
        }
    }
}
