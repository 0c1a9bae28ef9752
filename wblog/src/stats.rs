//! 统计信息

use std::fmt;

use crate::engine::EngineState;

/// 引擎统计
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub state: EngineState,
    /// 当前打开文件的路径（打开期间的固定名称）
    pub current_file: Option<String>,
    pub current_file_size: u64,
    /// 当前文件已打开的秒数
    pub current_file_age_secs: f64,
    pub buffered: usize,
    pub buffer_capacity: usize,
    pub peak_buffered: usize,
    pub overruns: u64,
    /// 已关闭并重命名的文件数
    pub files_finalized: u64,
    /// 本次运行写入介质的数据字节数（不含文件头）
    pub bytes_written: u64,
    pub last_file: Option<String>,
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Logging Engine Statistics:")?;
        writeln!(f, "  State: {:?}", self.state)?;
        match &self.current_file {
            Some(path) => writeln!(
                f,
                "  Current file: {} ({:.1} KB, open {:.1}s)",
                path,
                self.current_file_size as f64 / 1024.0,
                self.current_file_age_secs
            )?,
            None => writeln!(f, "  Current file: none")?,
        }
        let usable = self.buffer_capacity.saturating_sub(1).max(1) as f64;
        writeln!(
            f,
            "  Buffer: {} / {} bytes (peak {:.1}%)",
            self.buffered,
            self.buffer_capacity,
            self.peak_buffered as f64 / usable * 100.0
        )?;
        writeln!(f, "  Overruns: {}", self.overruns)?;
        writeln!(f, "  Files finalized: {}", self.files_finalized)?;
        if let Some(last) = &self.last_file {
            writeln!(f, "  Last file: {}", last)?;
        }
        writeln!(
            f,
            "  Written: {} bytes ({:.1} KB)",
            self.bytes_written,
            self.bytes_written as f64 / 1024.0
        )?;
        Ok(())
    }
}

/// 缓冲区占用
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BufferUsage {
    Percent(f64),
    Overrun,
}

/// 一个统计周期的汇总
#[derive(Debug, Clone, PartialEq)]
pub struct WindowReport {
    pub secs_open: f64,
    pub kb_per_sec: f64,
    pub file_kb: f64,
    pub max_write_ms: f64,
    pub buffer: BufferUsage,
}

impl fmt::Display for WindowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.0} s, {:.1} KB/s, {:.1} KB, max write {:.2} ms, ",
            self.secs_open, self.kb_per_sec, self.file_kb, self.max_write_ms
        )?;
        match self.buffer {
            BufferUsage::Percent(p) => write!(f, "buffer {:.1}%", p),
            BufferUsage::Overrun => write!(f, "Buffer Overrun"),
        }
    }
}

/// 吞吐统计窗口，按 tick 计时
#[derive(Debug, Clone)]
pub(crate) struct ThroughputWindow {
    started_at: u64,
    bytes: u64,
    max_write_ticks: u64,
    overruns_at_start: u64,
}

/// 周期结束时需要的引擎快照
pub(crate) struct WindowSnapshot {
    pub now: u64,
    pub ticks_per_second: u64,
    pub file_age_ticks: u64,
    pub file_size: u64,
    pub peak_buffered: usize,
    pub buffer_capacity: usize,
    pub overruns: u64,
}

impl ThroughputWindow {
    pub fn new(now: u64, overruns: u64) -> Self {
        Self {
            started_at: now,
            bytes: 0,
            max_write_ticks: 0,
            overruns_at_start: overruns,
        }
    }

    pub fn record_write(&mut self, bytes: usize, elapsed_ticks: u64) {
        self.bytes += bytes as u64;
        self.max_write_ticks = self.max_write_ticks.max(elapsed_ticks);
    }

    /// 周期到了返回汇总并开始新周期
    pub fn poll(&mut self, period_secs: u64, snap: &WindowSnapshot) -> Option<WindowReport> {
        let tps = snap.ticks_per_second.max(1);
        let elapsed = snap.now.saturating_sub(self.started_at);
        if elapsed < period_secs.saturating_mul(tps) {
            return None;
        }

        let elapsed_secs = elapsed as f64 / tps as f64;
        let buffer = if snap.overruns > self.overruns_at_start {
            BufferUsage::Overrun
        } else {
            let usable = snap.buffer_capacity.saturating_sub(1).max(1) as f64;
            BufferUsage::Percent(snap.peak_buffered as f64 / usable * 100.0)
        };
        let report = WindowReport {
            secs_open: snap.file_age_ticks as f64 / tps as f64,
            kb_per_sec: self.bytes as f64 / 1024.0 / elapsed_secs,
            file_kb: snap.file_size as f64 / 1024.0,
            max_write_ms: self.max_write_ticks as f64 * 1000.0 / tps as f64,
            buffer,
        };

        *self = Self::new(snap.now, snap.overruns);
        Some(report)
    }
}
