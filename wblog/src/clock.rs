//! 时钟
//!
//! 引擎用单调 tick 判断文件时长，用墙上时间生成时间戳文件名。

use chrono::{Local, NaiveDateTime};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::constants::SYSTEM_TICKS_PER_SECOND;

pub trait Clock {
    /// 单调递增的 tick 计数
    fn ticks(&self) -> u64;

    fn ticks_per_second(&self) -> u64;

    /// 当前本地时间
    fn wall_time(&self) -> NaiveDateTime;
}

/// 系统时钟，tick 为微秒
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn ticks(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn ticks_per_second(&self) -> u64 {
        SYSTEM_TICKS_PER_SECOND
    }

    fn wall_time(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// 手动推进的时钟，克隆之间共享时间
#[derive(Debug, Clone)]
pub struct ManualClock {
    ticks: Arc<AtomicU64>,
    ticks_per_second: u64,
    base_time: Arc<Mutex<NaiveDateTime>>,
}

impl ManualClock {
    pub fn new(ticks_per_second: u64, base_time: NaiveDateTime) -> Self {
        Self {
            ticks: Arc::new(AtomicU64::new(0)),
            ticks_per_second,
            base_time: Arc::new(Mutex::new(base_time)),
        }
    }

    pub fn advance(&self, ticks: u64) {
        self.ticks.fetch_add(ticks, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance(secs.saturating_mul(self.ticks_per_second));
    }

    pub fn set_ticks(&self, ticks: u64) {
        self.ticks.store(ticks, Ordering::SeqCst);
    }

    /// 设置 tick 为 0 时对应的墙上时间
    pub fn set_base_time(&self, time: NaiveDateTime) {
        *self.base_time.lock().unwrap_or_else(|e| e.into_inner()) = time;
    }
}

impl Clock for ManualClock {
    fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn ticks_per_second(&self) -> u64 {
        self.ticks_per_second
    }

    /// 墙上时间随 tick 推进，精确到秒
    fn wall_time(&self) -> NaiveDateTime {
        let base = *self.base_time.lock().unwrap_or_else(|e| e.into_inner());
        let secs = self.ticks() / self.ticks_per_second.max(1);
        base.checked_add_signed(chrono::Duration::seconds(secs.min(u32::MAX as u64) as i64))
            .unwrap_or(base)
    }
}
