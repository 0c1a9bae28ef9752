//! wblog - 写后缓冲的轮转文件日志
//!
//! 特性：
//! - 无锁单生产者/单消费者环形缓冲区，生产者可以在中断或其他线程中写入
//! - 服务循环驱动的状态机，按大小、时长、介质写满自动轮转
//! - 计数器/时间戳文件名，重启后不会与已关闭的文件重名
//! - 打开期间使用固定文件名，异常退出遗留的文件下次启动时恢复
//! - 存储介质可替换：宿主文件系统或内存

pub mod clock;
pub mod constants;
pub mod engine;
pub mod error;
pub mod medium;
pub mod naming;
pub mod ring;
pub mod settings;
pub mod stats;
pub mod writer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{EngineHooks, EngineState, LogStatus, LoggerStatus, LoggingEngine};
pub use error::{ErrorKind, LogError, MediumError};
pub use medium::{FsMedium, MemMedium, Medium, MediumFile, OpenMode};
pub use naming::{CounterFile, CounterName, NameAllocator};
pub use ring::{Consumer, Producer, RingBuffer, WriteMode};
pub use settings::{LogSettings, NameSuffix};
pub use stats::{BufferUsage, EngineStats, WindowReport};
pub use writer::LogWriter;

#[cfg(test)]
mod tests;
