//! 常量定义
//!
//! 写后缓冲日志的各种默认值和上限

/// 计数器命名的模数：文件名中的计数器为 4 位十进制 (0000-9999)
pub const COUNTER_MODULUS: u32 = 10_000;
/// 计数器宽度（字符数）
pub const COUNTER_WIDTH: usize = 4;
/// 时间戳/无后缀命名时的消歧计数器上限
pub const MAX_DISAMBIGUATION: u32 = 9_999;

/// 打开期间文件使用的固定名称，关闭时再重命名为分配到的名称
pub const DEFAULT_ACTIVE_FILE_NAME: &str = "File";
/// 默认日志目录
pub const DEFAULT_DIRECTORY: &str = "Data Logger";
/// 默认扩展名
pub const DEFAULT_EXTENSION: &str = "bin";

/// 默认环形缓冲区大小 (约 371KB)
pub const DEFAULT_BUFFER_CAPACITY: usize = 380_000;

/// 停止时至少排空两次，处理写指针恰好回绕的情况
pub const MIN_STOP_DRAIN_PASSES: u32 = 2;

/// 统计输出周期（秒）
pub const STATISTICS_PERIOD_SECS: u64 = 1;

/// SystemClock 的 tick 频率 (微秒)
pub const SYSTEM_TICKS_PER_SECOND: u64 = 1_000_000;
