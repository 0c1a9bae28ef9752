//! 日志引擎
//!
//! 状态机：
//! ```text
//!            start()              介质就绪且打开成功
//! Disabled ─────────▶ Opening ─────────────────────▶ Writing
//!    ▲                   │ 打开失败                     │ tick(): 时长/大小/写满 → 轮转
//!    └───────────────────┴──────────────────────────────┘ stop() 或 IO 错误
//! ```
//!
//! 生产者只往环形缓冲区写；所有文件操作和回调都在调用 `tick()` 的服务循环里完成。
//! 打开期间文件使用固定名称，关闭时重命名为分配到的名称。

use chrono::NaiveDateTime;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::constants::{COUNTER_MODULUS, STATISTICS_PERIOD_SECS};
use crate::error::{ErrorKind, LogError};
use crate::medium::Medium;
use crate::naming::{CounterFile, NameAllocator};
use crate::ring::{Consumer, Producer, RingBuffer};
use crate::settings::LogSettings;
use crate::stats::{EngineStats, ThroughputWindow, WindowSnapshot};
use crate::writer::LogWriter;

/// 引擎内部状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Disabled,
    Opening,
    Writing,
}

/// 对外报告的运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggerStatus {
    Disabled,
    Enabled,
    /// 因错误停止，`start()` 后清除
    Error,
}

/// 通过 `on_status` 上报的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStatus {
    Start,
    Stop,
    Open,
    MaxFileSizeExceeded,
    MaxFileAgeExceeded,
    MediumFull,
    Close,
    /// 上次异常退出遗留的文件已重命名保存
    Recovered,
}

type StatusHook = Box<dyn FnMut(LogStatus) + Send>;
type ErrorHook = Box<dyn FnMut(ErrorKind) + Send>;
type CounterHook = Box<dyn FnMut(u32) + Send>;
type PreambleHook = Box<dyn FnMut(&mut Vec<u8>) + Send>;

/// 回调
#[derive(Default)]
pub struct EngineHooks {
    on_status: Option<StatusHook>,
    on_error: Option<ErrorHook>,
    on_counter_changed: Option<CounterHook>,
    write_preamble: Option<PreambleHook>,
}

impl EngineHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_status(mut self, f: impl FnMut(LogStatus) + Send + 'static) -> Self {
        self.on_status = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(ErrorKind) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// 计数器命名方式下每次分配后收到新的计数器值
    pub fn on_counter_changed(mut self, f: impl FnMut(u32) + Send + 'static) -> Self {
        self.on_counter_changed = Some(Box::new(f));
        self
    }

    /// 每次打开文件后、写入缓冲数据前调用，往 Vec 里追加文件头
    pub fn write_preamble(mut self, f: impl FnMut(&mut Vec<u8>) + Send + 'static) -> Self {
        self.write_preamble = Some(Box::new(f));
        self
    }
}

/// 写后缓冲日志引擎
pub struct LoggingEngine<M: Medium, C: Clock> {
    settings: LogSettings,
    allocator: NameAllocator,
    writer: LogWriter<M>,
    clock: C,
    hooks: EngineHooks,
    consumer: Consumer,
    producer: Option<Producer>,
    state: EngineState,
    last_error: Option<ErrorKind>,
    max_age_ticks: u64,
    counter: u32,
    counter_file: Option<CounterFile>,
    counter_loaded: bool,
    recover_pending: bool,
    /// 当前文件打开时的墙上时间，用于时间戳命名
    file_opened_wall: Option<NaiveDateTime>,
    /// 打开以来写入的数据字节数（不含文件头）
    payload_since_open: u64,
    files_finalized: u64,
    bytes_written: u64,
    last_file: Option<String>,
    window: ThroughputWindow,
    preamble: Vec<u8>,
}

impl<M: Medium, C: Clock> LoggingEngine<M, C> {
    /// 创建引擎，设置会先规范化再校验
    pub fn new(
        settings: LogSettings,
        buffer: RingBuffer,
        medium: M,
        clock: C,
    ) -> Result<Self, LogError> {
        let settings = settings.normalized();
        let tps = clock.ticks_per_second();
        settings.validate(tps)?;
        let max_age_ticks = settings.max_file_age_ticks(tps)?;

        let (producer, consumer) = buffer.split();
        let allocator = NameAllocator::from_settings(&settings);
        let counter_file = settings
            .counter_file
            .as_deref()
            .map(|name| CounterFile::new(settings.path_of(name)));
        let window = ThroughputWindow::new(clock.ticks(), 0);

        Ok(Self {
            counter: settings.counter % COUNTER_MODULUS,
            settings,
            allocator,
            writer: LogWriter::new(medium),
            clock,
            hooks: EngineHooks::default(),
            consumer,
            producer: Some(producer),
            state: EngineState::Disabled,
            last_error: None,
            max_age_ticks,
            counter_file,
            counter_loaded: false,
            recover_pending: false,
            file_opened_wall: None,
            payload_since_open: 0,
            files_finalized: 0,
            bytes_written: 0,
            last_file: None,
            window,
            preamble: Vec::new(),
        })
    }

    /// 使用内部分配的缓冲区
    pub fn with_capacity(
        settings: LogSettings,
        capacity: usize,
        medium: M,
        clock: C,
    ) -> Result<Self, LogError> {
        Self::new(settings, RingBuffer::with_capacity(capacity)?, medium, clock)
    }

    pub fn with_hooks(mut self, hooks: EngineHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn set_hooks(&mut self, hooks: EngineHooks) {
        self.hooks = hooks;
    }

    /// 取出生产者句柄交给另一个上下文，之后 [`LoggingEngine::write`] 返回 ProducerDetached
    pub fn take_producer(&mut self) -> Option<Producer> {
        self.producer.take()
    }

    /// 写入一条完整记录；空间不足时整条丢弃并返回 BufferOverrun
    pub fn write(&mut self, data: &[u8]) -> Result<usize, LogError> {
        let producer = self.producer.as_mut().ok_or(LogError::ProducerDetached)?;
        let result = producer.try_write(data);
        if let Err(e) = &result {
            warn!("wblog: {}", e);
        }
        result
    }

    pub fn write_available(&self) -> usize {
        self.consumer.write_available()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn status(&self) -> LoggerStatus {
        match (self.state, self.last_error) {
            (EngineState::Disabled, Some(_)) => LoggerStatus::Error,
            (EngineState::Disabled, None) => LoggerStatus::Disabled,
            _ => LoggerStatus::Enabled,
        }
    }

    /// 最近一次导致停止的错误，`start()` 时清除
    pub fn last_error(&self) -> Option<ErrorKind> {
        self.last_error
    }

    pub fn settings(&self) -> &LogSettings {
        &self.settings
    }

    /// 修改设置，只能在停止状态下进行
    pub fn update_settings(&mut self, settings: LogSettings) -> Result<(), LogError> {
        if self.state != EngineState::Disabled {
            return Err(LogError::Configuration(
                "settings can only change while the logger is stopped".to_string(),
            ));
        }
        let settings = settings.normalized();
        let tps = self.clock.ticks_per_second();
        settings.validate(tps)?;
        self.max_age_ticks = settings.max_file_age_ticks(tps)?;
        self.allocator = NameAllocator::from_settings(&settings);
        self.counter = settings.counter % COUNTER_MODULUS;
        self.counter_file = settings
            .counter_file
            .as_deref()
            .map(|name| CounterFile::new(settings.path_of(name)));
        self.counter_loaded = false;
        self.settings = settings;
        Ok(())
    }

    /// 下一次分配使用的计数器值
    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn medium(&self) -> &M {
        self.writer.medium()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn stats(&self) -> EngineStats {
        let open = self.state == EngineState::Writing && self.writer.is_open();
        let tps = self.clock.ticks_per_second().max(1);
        EngineStats {
            state: self.state,
            current_file: open.then(|| self.writer.path().to_string()),
            current_file_size: if open { self.writer.current_size() } else { 0 },
            current_file_age_secs: if open {
                self.writer.age(self.clock.ticks()) as f64 / tps as f64
            } else {
                0.0
            },
            buffered: self.consumer.read_available(),
            buffer_capacity: self.consumer.capacity(),
            peak_buffered: self.consumer.peak_used(),
            overruns: self.consumer.overruns(),
            files_finalized: self.files_finalized,
            bytes_written: self.bytes_written,
            last_file: self.last_file.clone(),
        }
    }

    /// 开始记录，已经启动时什么都不做
    ///
    /// 丢弃启动前缓冲的数据，下一次 `tick()` 打开文件。
    pub fn start(&mut self) {
        if self.state != EngineState::Disabled {
            return;
        }
        self.consumer.clear();
        self.consumer.reset_peak();
        self.last_error = None;
        self.recover_pending = true;
        self.state = EngineState::Opening;
        info!("wblog: Logging started");
        self.emit(LogStatus::Start);
    }

    /// 服务循环，需要以有界的间隔反复调用
    pub fn tick(&mut self) {
        match self.state {
            EngineState::Disabled => {}
            EngineState::Opening => {
                if !self.writer.is_ready() {
                    return;
                }
                match self.open_file() {
                    Ok(()) => self.state = EngineState::Writing,
                    Err(e) => self.fail(e),
                }
            }
            EngineState::Writing => {
                if let Err(e) = self.service() {
                    self.fail(e);
                }
            }
        }
    }

    /// 停止记录：排空缓冲区，关闭并重命名当前文件
    ///
    /// 排空或关闭失败时仍然进入 Disabled，错误同时通过 `on_error` 上报。
    pub fn stop(&mut self) -> Result<(), LogError> {
        match self.state {
            EngineState::Disabled => return Ok(()),
            EngineState::Opening => {
                self.state = EngineState::Disabled;
                info!("wblog: Logging stopped before a file was opened");
                self.emit(LogStatus::Stop);
                return Ok(());
            }
            EngineState::Writing => {}
        }

        let result = self.drain_for_stop().and_then(|()| self.close_file());
        self.state = EngineState::Disabled;

        match result {
            Ok(()) => {
                info!(
                    "wblog: Logging stopped, {} files, {} bytes",
                    self.files_finalized, self.bytes_written
                );
                self.emit(LogStatus::Stop);
                Ok(())
            }
            Err(e) => {
                let kind = e.kind();
                error!("wblog: Stop failed: {}", e);
                let _ = self.writer.close();
                self.last_error = Some(kind);
                self.emit(LogStatus::Stop);
                if let Some(f) = self.hooks.on_error.as_mut() {
                    f(kind);
                }
                Err(e)
            }
        }
    }

    /// 至少排空 `stop_drain_passes` 次；之后只要还有数据且有进展就继续，
    /// 但不会超过 stop 时已缓冲的字节数，避免生产者持续写入时停不下来
    fn drain_for_stop(&mut self) -> Result<(), LogError> {
        let target = self.consumer.read_available();
        let min_passes = self.settings.stop_drain_passes;
        let mut drained = 0usize;
        let mut passes = 0u32;

        loop {
            let finalized = self.files_finalized;
            let n = self.drain_chunk()?;
            drained += n;
            passes += 1;

            let progressed = n > 0 || self.files_finalized != finalized;
            let remaining = self.consumer.read_available();
            if passes >= min_passes && (remaining == 0 || !progressed || drained >= target) {
                break;
            }
        }

        let left = self.consumer.read_available();
        if left > 0 {
            warn!("wblog: {} bytes still buffered after stop", left);
        }
        Ok(())
    }

    fn service(&mut self) -> Result<(), LogError> {
        let now = self.clock.ticks();
        if self.max_age_ticks > 0 && self.writer.age(now) >= self.max_age_ticks {
            return self.rotate(LogStatus::MaxFileAgeExceeded);
        }

        self.drain_chunk()?;
        self.poll_statistics();
        Ok(())
    }

    /// 写出一段连续数据，返回从缓冲区消费的字节数
    ///
    /// 大小超限时先轮转并返回 0，数据留到下一次写入新文件。
    fn drain_chunk(&mut self) -> Result<usize, LogError> {
        let pending = self.consumer.contiguous().len();
        if pending == 0 {
            return Ok(0);
        }

        let mut len = pending;
        let max = self.settings.max_file_size;
        let size = self.writer.current_size();
        if max > 0 && size + len as u64 >= max {
            if self.payload_since_open > 0 {
                self.rotate(LogStatus::MaxFileSizeExceeded)?;
                return Ok(0);
            }
            // 新文件装不下整段数据，截断到上限以下
            let room = max.saturating_sub(size).saturating_sub(1).max(1);
            len = len.min(room.min(usize::MAX as u64) as usize);
        }

        let started = self.clock.ticks();
        let result = {
            let chunk = &self.consumer.contiguous()[..len];
            self.writer.write(chunk)
        };
        let elapsed = self.clock.ticks().saturating_sub(started);

        match result {
            Ok(n) => {
                self.consumer.consume(n);
                self.payload_since_open += n as u64;
                self.bytes_written += n as u64;
                self.window.record_write(n, elapsed);
                if n < len {
                    self.medium_full()?;
                }
                Ok(n)
            }
            Err(LogError::MediumFull) => {
                self.medium_full()?;
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn medium_full(&mut self) -> Result<(), LogError> {
        if self.payload_since_open == 0 {
            warn!(
                "wblog: Medium full with no room for a new file ({} bytes buffered)",
                self.consumer.read_available()
            );
            return Err(LogError::MediumFull);
        }
        warn!(
            "wblog: Medium full after {} bytes, rotating",
            self.writer.current_size()
        );
        self.rotate(LogStatus::MediumFull)
    }

    fn rotate(&mut self, reason: LogStatus) -> Result<(), LogError> {
        info!("wblog: Rotating {} ({:?})", self.writer.path(), reason);
        self.emit(reason);
        self.close_file()?;
        self.open_file()
    }

    fn open_file(&mut self) -> Result<(), LogError> {
        if !self.counter_loaded {
            self.load_counter()?;
            self.counter_loaded = true;
        }
        if self.recover_pending {
            self.recover_pending = false;
            self.recover_orphan()?;
        }

        let path = self.settings.active_path();
        let now = self.clock.ticks();
        self.writer.open(&path, true, now)?;
        self.file_opened_wall = Some(self.clock.wall_time());

        if let Some(hook) = self.hooks.write_preamble.as_mut() {
            self.preamble.clear();
            hook(&mut self.preamble);
            if !self.preamble.is_empty() {
                self.writer.write_preamble(&self.preamble)?;
            }
        }
        let size = self.writer.refresh_size()?;

        self.payload_since_open = 0;
        self.window = ThroughputWindow::new(now, self.consumer.overruns());
        self.consumer.reset_peak();

        info!("wblog: Opened {} ({} bytes preamble)", path, size);
        self.emit(LogStatus::Open);
        Ok(())
    }

    /// 关闭当前文件并重命名为新分配的名称
    fn close_file(&mut self) -> Result<(), LogError> {
        if !self.writer.is_open() {
            return Ok(());
        }

        let tps = self.clock.ticks_per_second().max(1);
        let elapsed_secs = self.writer.age(self.clock.ticks()) / tps;
        let opened = self
            .file_opened_wall
            .take()
            .unwrap_or_else(|| self.clock.wall_time());
        let size = self.writer.current_size();
        let from = self.writer.path().to_string();

        self.writer.close()?;
        let (to, next_counter) = self.allocate_name(opened, elapsed_secs)?;
        self.writer.rename(&from, &to)?;
        self.commit_counter(next_counter)?;

        self.files_finalized += 1;
        info!("wblog: Closed {} ({} bytes)", to, size);
        self.last_file = Some(to);
        self.emit(LogStatus::Close);
        Ok(())
    }

    /// 上次异常退出遗留的打开文件：非空则重命名保存，空文件直接删除
    fn recover_orphan(&mut self) -> Result<(), LogError> {
        let path = self.settings.active_path();
        match self.writer.file_size(&path)? {
            None => Ok(()),
            Some(0) => {
                debug!("wblog: Removing empty leftover {}", path);
                self.writer.delete(&path)
            }
            Some(size) => {
                let (to, next_counter) = self.allocate_name(self.clock.wall_time(), 0)?;
                self.writer.rename(&path, &to)?;
                self.commit_counter(next_counter)?;
                self.files_finalized += 1;
                warn!("wblog: Recovered {} bytes from {} as {}", size, path, to);
                self.last_file = Some(to);
                self.emit(LogStatus::Recovered);
                Ok(())
            }
        }
    }

    /// 分配一个不存在的文件名，返回目录下的完整路径和待提交的计数器值
    fn allocate_name(
        &self,
        opened: NaiveDateTime,
        elapsed_secs: u64,
    ) -> Result<(String, Option<u32>), LogError> {
        let settings = &self.settings;
        let writer = &self.writer;
        let (name, next_counter) = self
            .allocator
            .allocate(
                settings.name_suffix,
                self.counter,
                opened,
                elapsed_secs,
                |name| writer.exists(&settings.path_of(name)),
            )
            .ok_or(LogError::NameExhausted)?;
        Ok((settings.path_of(&name), next_counter))
    }

    /// 重命名成功后才推进计数器
    fn commit_counter(&mut self, next_counter: Option<u32>) -> Result<(), LogError> {
        let Some(next) = next_counter else {
            return Ok(());
        };
        self.counter = next;
        if let Some(file) = &self.counter_file {
            file.store(self.writer.medium_mut(), next)?;
        }
        if let Some(f) = self.hooks.on_counter_changed.as_mut() {
            f(next);
        }
        Ok(())
    }

    fn load_counter(&mut self) -> Result<(), LogError> {
        let Some(file) = &self.counter_file else {
            return Ok(());
        };
        if let Some(value) = file.load(self.writer.medium_mut())? {
            info!("wblog: Resuming file counter at {:04}", value);
            self.counter = value;
        }
        Ok(())
    }

    fn poll_statistics(&mut self) {
        let now = self.clock.ticks();
        let snapshot = WindowSnapshot {
            now,
            ticks_per_second: self.clock.ticks_per_second(),
            file_age_ticks: self.writer.age(now),
            file_size: self.writer.current_size(),
            peak_buffered: self.consumer.peak_used(),
            buffer_capacity: self.consumer.capacity(),
            overruns: self.consumer.overruns(),
        };
        if let Some(report) = self.window.poll(STATISTICS_PERIOD_SECS, &snapshot) {
            debug!("wblog: {}", report);
            self.consumer.reset_peak();
        }
    }

    /// 会话结束：关闭文件（不重命名，下次启动时恢复），进入 Disabled
    fn fail(&mut self, e: LogError) {
        let kind = e.kind();
        error!("wblog: Logging stopped on error: {}", e);
        let _ = self.writer.close();
        self.state = EngineState::Disabled;
        self.last_error = Some(kind);
        if let Some(f) = self.hooks.on_error.as_mut() {
            f(kind);
        }
    }

    fn emit(&mut self, status: LogStatus) {
        debug!("wblog: Status {:?}", status);
        if let Some(f) = self.hooks.on_status.as_mut() {
            f(status);
        }
    }
}
