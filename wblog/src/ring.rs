//! 单生产者/单消费者环形缓冲区
//!
//! 设计要点：
//! 1. 固定容量 - 存储区由调用方提供，之后不再重新分配
//! 2. 无锁 - 写指针只由生产者推进，读指针只由消费者推进
//! 3. 先拷贝后发布 - 数据完整写入存储区之后才更新写指针
//! 4. 牺牲一个字节 - 最多容纳 `capacity - 1` 字节，用两个指针即可区分空和满
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ .... │ 可读数据 ............ │ 空闲 ......... │
//! └───────────────────────────────────────────────┘
//!        ↑                      ↑
//!     read_index            write_index
//! ```
//!
//! 生产者可以运行在与消费者不同的上下文（例如硬件回调线程），
//! 通过 [`RingBuffer::split`] 得到的两个句柄分别独占一侧指针。

use std::cell::UnsafeCell;
use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::LogError;

/// 写入模式
///
/// 空间不足时的行为由调用方显式选择，而不是由调用点隐式决定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// 空间不足时一个字节也不写，返回 0 并计入溢出次数
    Strict,
    /// 写入能放下的部分，返回实际写入的字节数
    BestEffort,
}

/// 指针运算，所有下标都在 `0..capacity` 范围内
mod cursor {
    /// 从 `from` 前进到 `to` 需要的字节数
    #[inline]
    pub(super) fn distance(from: usize, to: usize, capacity: usize) -> usize {
        if to >= from {
            to - from
        } else {
            capacity - from + to
        }
    }

    /// `index` 前进 `n` 字节（`n <= capacity`）
    #[inline]
    pub(super) fn advance(index: usize, n: usize, capacity: usize) -> usize {
        let next = index + n;
        if next >= capacity {
            next - capacity
        } else {
            next
        }
    }
}

struct Ring {
    storage: Box<[UnsafeCell<u8>]>,
    write_index: AtomicUsize,
    read_index: AtomicUsize,
    overruns: AtomicU64,
    peak_used: AtomicUsize,
}

// SAFETY: 存储区按区域划分所有权：
// - 生产者只写 [write_index, read_index - 1) 的空闲区域
// - 消费者只读 [read_index, write_index) 的可读区域
// - 区域边界通过 Release/Acquire 发布，两侧不会同时访问同一字节
// 单写单读由 Producer/Consumer 句柄不可复制来保证
unsafe impl Sync for Ring {}

impl Ring {
    fn new(storage: Box<[u8]>) -> Self {
        let raw = Box::into_raw(storage) as *mut [UnsafeCell<u8>];
        // SAFETY: UnsafeCell<u8> 是 #[repr(transparent)]，内存布局与 u8 相同
        let storage = unsafe { Box::from_raw(raw) };
        Self {
            storage,
            write_index: AtomicUsize::new(0),
            read_index: AtomicUsize::new(0),
            overruns: AtomicU64::new(0),
            peak_used: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.storage.len()
    }

    #[inline]
    fn base(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.storage.as_ptr())
    }

    /// 可读字节数。先对写指针取快照，结果只会偏小不会偏大
    fn read_available(&self) -> usize {
        let write = self.write_index.load(Ordering::Acquire);
        let read = self.read_index.load(Ordering::Acquire);
        cursor::distance(read, write, self.capacity())
    }

    /// 可写字节数。先对读指针取快照，结果只会偏小不会偏大
    fn write_available(&self) -> usize {
        let read = self.read_index.load(Ordering::Acquire);
        let write = self.write_index.load(Ordering::Acquire);
        self.capacity() - 1 - cursor::distance(read, write, self.capacity())
    }

    /// 生产者侧写入
    fn push(&self, data: &[u8], mode: WriteMode) -> usize {
        let free = self.write_available();
        let n = match mode {
            WriteMode::Strict => {
                if data.len() > free {
                    self.overruns.fetch_add(1, Ordering::Relaxed);
                    return 0;
                }
                data.len()
            }
            WriteMode::BestEffort => data.len().min(free),
        };
        if n == 0 {
            return 0;
        }

        let capacity = self.capacity();
        let write = self.write_index.load(Ordering::Relaxed);
        let before_wrap = n.min(capacity - write);

        // SAFETY: [write, write + n) 处于空闲区域，消费者不会访问
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.base().add(write), before_wrap);
            ptr::copy_nonoverlapping(data.as_ptr().add(before_wrap), self.base(), n - before_wrap);
        }

        // 拷贝完成后再发布新的写指针
        self.write_index
            .store(cursor::advance(write, n, capacity), Ordering::Release);

        let used = capacity - 1 - (free - n);
        self.peak_used.fetch_max(used, Ordering::Relaxed);
        n
    }

    /// 消费者侧读取，回绕时分两段拷贝
    fn pop(&self, destination: &mut [u8]) -> usize {
        let n = destination.len().min(self.read_available());
        if n == 0 {
            return 0;
        }

        let capacity = self.capacity();
        let read = self.read_index.load(Ordering::Relaxed);
        let before_wrap = n.min(capacity - read);

        // SAFETY: [read, read + n) 处于可读区域，生产者不会访问
        unsafe {
            ptr::copy_nonoverlapping(self.base().add(read), destination.as_mut_ptr(), before_wrap);
            ptr::copy_nonoverlapping(
                self.base(),
                destination.as_mut_ptr().add(before_wrap),
                n - before_wrap,
            );
        }

        self.read_index
            .store(cursor::advance(read, n, capacity), Ordering::Release);
        n
    }

    /// 从读指针开始、到回绕点或写指针为止的连续可读区域
    fn contiguous(&self) -> &[u8] {
        let write = self.write_index.load(Ordering::Acquire);
        let read = self.read_index.load(Ordering::Relaxed);
        let len = if write >= read {
            write - read
        } else {
            self.capacity() - read
        };
        // SAFETY: 该区域可读且在返回的引用存活期间不会被生产者改写，
        // 只有消费者能推进读指针，而 consume 需要 &mut
        unsafe { slice::from_raw_parts(self.base().add(read), len) }
    }

    fn consume(&self, n: usize) {
        debug_assert!(n <= self.read_available());
        let read = self.read_index.load(Ordering::Relaxed);
        self.read_index
            .store(cursor::advance(read, n, self.capacity()), Ordering::Release);
    }

    /// 丢弃未读数据，不清零存储区
    fn clear(&self) {
        let write = self.write_index.load(Ordering::Acquire);
        self.read_index.store(write, Ordering::Release);
    }
}

/// 单上下文使用的环形缓冲区
///
/// 需要跨上下文时用 [`RingBuffer::split`] 拆成生产者和消费者。
pub struct RingBuffer {
    ring: Arc<Ring>,
}

impl RingBuffer {
    /// 使用调用方提供的存储区创建缓冲区，容量为 0 时返回配置错误
    pub fn new(storage: impl Into<Box<[u8]>>) -> Result<Self, LogError> {
        let storage = storage.into();
        if storage.is_empty() {
            return Err(LogError::Configuration(
                "ring buffer capacity must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            ring: Arc::new(Ring::new(storage)),
        })
    }

    pub fn with_capacity(capacity: usize) -> Result<Self, LogError> {
        Self::new(vec![0u8; capacity])
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn read_available(&self) -> usize {
        self.ring.read_available()
    }

    pub fn write_available(&self) -> usize {
        self.ring.write_available()
    }

    pub fn write(&mut self, data: &[u8], mode: WriteMode) -> usize {
        self.ring.push(data, mode)
    }

    /// 严格写入：要么全部写入，要么一个字节也不写
    pub fn write_all(&mut self, data: &[u8]) -> usize {
        self.ring.push(data, WriteMode::Strict)
    }

    /// 尽力写入：写入能放下的部分
    pub fn write_partial(&mut self, data: &[u8]) -> usize {
        self.ring.push(data, WriteMode::BestEffort)
    }

    pub fn read(&mut self, destination: &mut [u8]) -> usize {
        self.ring.pop(destination)
    }

    pub fn clear(&mut self) {
        self.ring.clear()
    }

    /// 严格写入因空间不足被拒绝的次数
    pub fn overruns(&self) -> u64 {
        self.ring.overruns.load(Ordering::Relaxed)
    }

    /// 拆分为生产者和消费者句柄
    pub fn split(self) -> (Producer, Consumer) {
        (
            Producer {
                ring: Arc::clone(&self.ring),
            },
            Consumer { ring: self.ring },
        )
    }
}

/// 生产者句柄，可以移动到其他线程
pub struct Producer {
    ring: Arc<Ring>,
}

impl Producer {
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn write_available(&self) -> usize {
        self.ring.write_available()
    }

    pub fn write(&mut self, data: &[u8], mode: WriteMode) -> usize {
        self.ring.push(data, mode)
    }

    pub fn write_all(&mut self, data: &[u8]) -> usize {
        self.ring.push(data, WriteMode::Strict)
    }

    pub fn write_partial(&mut self, data: &[u8]) -> usize {
        self.ring.push(data, WriteMode::BestEffort)
    }

    /// 严格写入一条完整记录，空间不足时返回 BufferOverrun
    pub fn try_write(&mut self, record: &[u8]) -> Result<usize, LogError> {
        let available = self.ring.write_available();
        match self.ring.push(record, WriteMode::Strict) {
            0 if !record.is_empty() => Err(LogError::BufferOverrun {
                requested: record.len(),
                available,
            }),
            n => Ok(n),
        }
    }

    pub fn overruns(&self) -> u64 {
        self.ring.overruns.load(Ordering::Relaxed)
    }
}

/// 消费者句柄
pub struct Consumer {
    ring: Arc<Ring>,
}

impl Consumer {
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn read_available(&self) -> usize {
        self.ring.read_available()
    }

    pub fn write_available(&self) -> usize {
        self.ring.write_available()
    }

    pub fn read(&mut self, destination: &mut [u8]) -> usize {
        self.ring.pop(destination)
    }

    /// 当前可以一次写出的连续数据（最多到一次回绕为止）
    pub fn contiguous(&self) -> &[u8] {
        self.ring.contiguous()
    }

    /// 标记 `n` 字节已处理，`n` 不能超过 [`Consumer::contiguous`] 的长度
    pub fn consume(&mut self, n: usize) {
        self.ring.consume(n)
    }

    pub fn clear(&mut self) {
        self.ring.clear()
    }

    pub fn overruns(&self) -> u64 {
        self.ring.overruns.load(Ordering::Relaxed)
    }

    /// 自上次重置以来的最高占用字节数
    pub fn peak_used(&self) -> usize {
        self.ring.peak_used.load(Ordering::Relaxed)
    }

    pub fn reset_peak(&self) {
        self.ring
            .peak_used
            .store(self.ring.read_available(), Ordering::Relaxed);
    }
}
