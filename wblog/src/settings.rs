//! 日志设置
//!
//! 每次打开文件期间不变，两次打开之间可以修改。可以从 JSON 文件加载：
//!
//! ```json
//! {
//!     "directory": "Data Logger",
//!     "name_prefix": "Log",
//!     "name_suffix": "counter",
//!     "extension": "csv",
//!     "max_file_size": 16777216,
//!     "max_file_age": 3600,
//!     "counter_file": "Counter.txt"
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::constants::{
    DEFAULT_ACTIVE_FILE_NAME, DEFAULT_DIRECTORY, DEFAULT_EXTENSION, MIN_STOP_DRAIN_PASSES,
};
use crate::error::LogError;

/// 文件名后缀方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameSuffix {
    /// 只用前缀和扩展名，重名时追加消歧计数器
    None,
    /// 4 位递增计数器
    #[default]
    Counter,
    /// 文件打开时间 + 持续秒数
    Timestamp,
}

/// 日志设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// 日志目录（相对于存储介质根目录）
    pub directory: String,
    /// 文件打开期间使用的固定名称
    pub active_file_name: String,
    pub name_prefix: String,
    pub name_suffix: NameSuffix,
    /// 计数器初值，启用 counter_file 时由文件内容覆盖
    pub counter: u32,
    /// 持久化计数器的文件名（位于日志目录下）
    pub counter_file: Option<String>,
    pub extension: String,
    /// 最大文件大小，字节 (0 = 不限制)
    pub max_file_size: u64,
    /// 最大文件时长 (0 = 不限制)
    #[serde(with = "duration_secs")]
    pub max_file_age: Duration,
    /// 停止时的排空次数，至少 2 次
    pub stop_drain_passes: u32,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            directory: DEFAULT_DIRECTORY.to_string(),
            active_file_name: DEFAULT_ACTIVE_FILE_NAME.to_string(),
            name_prefix: String::new(),
            name_suffix: NameSuffix::Counter,
            counter: 0,
            counter_file: None,
            extension: DEFAULT_EXTENSION.to_string(),
            max_file_size: 0,
            max_file_age: Duration::ZERO,
            stop_drain_passes: MIN_STOP_DRAIN_PASSES,
        }
    }
}

impl LogSettings {
    /// 从 JSON 文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LogError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            LogError::Configuration(format!("invalid settings file {}: {}", path.display(), e))
        })
    }

    /// 规范化前缀和扩展名：
    /// - 非空前缀末尾追加 `_`
    /// - 去掉扩展名开头的 `.`，非空时统一加一个 `.`
    pub fn normalized(&self) -> Self {
        let mut settings = self.clone();
        if !settings.name_prefix.is_empty() && !settings.name_prefix.ends_with('_') {
            settings.name_prefix.push('_');
        }
        let extension = self.extension.trim_start_matches('.');
        settings.extension = if extension.is_empty() {
            String::new()
        } else {
            format!(".{}", extension)
        };
        settings.stop_drain_passes = settings.stop_drain_passes.max(MIN_STOP_DRAIN_PASSES);
        settings
    }

    /// 把最大文件时长换算为 tick，溢出时返回配置错误
    pub fn max_file_age_ticks(&self, ticks_per_second: u64) -> Result<u64, LogError> {
        let secs_ticks = self
            .max_file_age
            .as_secs()
            .checked_mul(ticks_per_second)
            .ok_or_else(|| {
                LogError::Configuration(format!(
                    "max_file_age of {}s overflows at {} ticks/s",
                    self.max_file_age.as_secs(),
                    ticks_per_second
                ))
            })?;
        let nanos_ticks =
            (self.max_file_age.subsec_nanos() as u128 * ticks_per_second as u128) / 1_000_000_000;
        secs_ticks.checked_add(nanos_ticks as u64).ok_or_else(|| {
            LogError::Configuration("max_file_age overflows the tick counter".to_string())
        })
    }

    /// 检查设置是否可用
    pub fn validate(&self, ticks_per_second: u64) -> Result<(), LogError> {
        if self.active_file_name.trim().is_empty() {
            return Err(LogError::Configuration(
                "active_file_name must not be empty".to_string(),
            ));
        }
        if self.active_file_name.contains('/') {
            return Err(LogError::Configuration(format!(
                "active_file_name '{}' must be a plain file name",
                self.active_file_name
            )));
        }
        if ticks_per_second == 0 {
            return Err(LogError::Configuration(
                "clock reports zero ticks per second".to_string(),
            ));
        }
        self.max_file_age_ticks(ticks_per_second)?;
        Ok(())
    }

    /// 目录下某个文件的完整路径
    pub fn path_of(&self, name: &str) -> String {
        let directory = self.directory.trim_end_matches('/');
        if directory.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", directory, name)
        }
    }

    pub fn active_path(&self) -> String {
        self.path_of(&self.active_file_name)
    }
}

/// JSON 中以秒数表示 Duration
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefix_and_extension() {
        let settings = LogSettings {
            name_prefix: "Log".to_string(),
            extension: "..csv".to_string(),
            stop_drain_passes: 0,
            ..Default::default()
        }
        .normalized();
        assert_eq!(settings.name_prefix, "Log_");
        assert_eq!(settings.extension, ".csv");
        assert_eq!(settings.stop_drain_passes, 2);

        let empty = LogSettings {
            name_prefix: String::new(),
            extension: String::new(),
            ..Default::default()
        }
        .normalized();
        assert_eq!(empty.name_prefix, "");
        assert_eq!(empty.extension, "");
    }

    #[test]
    fn test_age_overflow_is_configuration_error() {
        let settings = LogSettings {
            max_file_age: Duration::from_secs(u64::MAX / 10),
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(1_000_000),
            Err(LogError::Configuration(_))
        ));
        assert_eq!(
            LogSettings {
                max_file_age: Duration::from_millis(1500),
                ..Default::default()
            }
            .max_file_age_ticks(1000)
            .unwrap(),
            1500
        );
    }

    #[test]
    fn test_empty_active_name_rejected() {
        let settings = LogSettings {
            active_file_name: " ".to_string(),
            ..Default::default()
        };
        assert!(settings.validate(1000).is_err());
    }

    #[test]
    fn test_paths() {
        let settings = LogSettings {
            directory: "logs/".to_string(),
            ..Default::default()
        };
        assert_eq!(settings.active_path(), "logs/File");
        assert_eq!(settings.path_of("a.bin"), "logs/a.bin");

        let root = LogSettings {
            directory: String::new(),
            ..Default::default()
        };
        assert_eq!(root.path_of("a.bin"), "a.bin");
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "directory": "Data",
            "name_prefix": "Sensor",
            "name_suffix": "timestamp",
            "max_file_size": 1048576,
            "max_file_age": 60
        }"#;
        let settings: LogSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.directory, "Data");
        assert_eq!(settings.name_suffix, NameSuffix::Timestamp);
        assert_eq!(settings.max_file_size, 1_048_576);
        assert_eq!(settings.max_file_age, Duration::from_secs(60));
        assert_eq!(settings.active_file_name, "File", "缺省字段应使用默认值");
        assert_eq!(settings.extension, "bin");
    }
}
