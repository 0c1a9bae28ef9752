//! 单元测试模块
//!
//! 日志引擎的场景测试，使用内存介质和手动时钟

use crate::clock::ManualClock;
use crate::engine::{EngineHooks, EngineState, LogStatus, LoggerStatus, LoggingEngine};
use crate::error::{ErrorKind, LogError};
use crate::medium::MemMedium;
use crate::ring::Producer;
use crate::settings::{LogSettings, NameSuffix};
use chrono::{NaiveDate, NaiveDateTime};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const TPS: u64 = 1000;

fn base_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 9)
        .unwrap()
        .and_hms_opt(7, 5, 2)
        .unwrap()
}

fn settings() -> LogSettings {
    LogSettings {
        directory: "logs".to_string(),
        name_prefix: "Log".to_string(),
        extension: "bin".to_string(),
        ..Default::default()
    }
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

struct Harness {
    engine: LoggingEngine<MemMedium, ManualClock>,
    medium: MemMedium,
    clock: ManualClock,
    events: Arc<Mutex<Vec<LogStatus>>>,
    errors: Arc<Mutex<Vec<ErrorKind>>>,
}

impl Harness {
    fn new(settings: LogSettings, capacity: usize) -> Self {
        Self::with(settings, capacity, MemMedium::new(), |hooks| hooks)
    }

    fn with(
        settings: LogSettings,
        capacity: usize,
        medium: MemMedium,
        extra: impl FnOnce(EngineHooks) -> EngineHooks,
    ) -> Self {
        let clock = ManualClock::new(TPS, base_time());
        let events = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let ev = events.clone();
        let er = errors.clone();
        let hooks = extra(
            EngineHooks::new()
                .on_status(move |s| ev.lock().unwrap().push(s))
                .on_error(move |e| er.lock().unwrap().push(e)),
        );

        let engine = LoggingEngine::with_capacity(settings, capacity, medium.clone(), clock.clone())
            .unwrap()
            .with_hooks(hooks);

        Self {
            engine,
            medium,
            clock,
            events,
            errors,
        }
    }

    fn events(&self) -> Vec<LogStatus> {
        self.events.lock().unwrap().clone()
    }

    fn errors(&self) -> Vec<ErrorKind> {
        self.errors.lock().unwrap().clone()
    }

    fn count(&self, status: LogStatus) -> usize {
        self.events().iter().filter(|s| **s == status).count()
    }

    fn file(&self, name: &str) -> Vec<u8> {
        self.medium
            .contents(&format!("logs/{}", name))
            .unwrap_or_else(|| panic!("文件 {} 不存在", name))
    }

    fn start_and_open(&mut self) {
        self.engine.start();
        self.engine.tick();
        assert_eq!(self.engine.state(), EngineState::Writing);
    }
}

/// 生产者放在回调能访问的位置
struct SharedProducer {
    producer: Arc<Mutex<Option<Producer>>>,
    /// 置位后，打开新文件时追加一条记录
    armed: Arc<AtomicBool>,
}

impl SharedProducer {
    fn write(&self, data: &[u8]) {
        self.producer
            .lock()
            .unwrap()
            .as_mut()
            .unwrap()
            .try_write(data)
            .unwrap();
    }

    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

/// stop() 排空过程中发生轮转时，Open 回调往缓冲区追加 `late`
///
/// `repeat` 为 false 时只追加一次。回调替换了事件记录，`events()` 为空。
fn with_late_writer(
    settings: LogSettings,
    capacity: usize,
    late: Vec<u8>,
    repeat: bool,
) -> (Harness, SharedProducer) {
    let producer: Arc<Mutex<Option<Producer>>> = Arc::new(Mutex::new(None));
    let armed = Arc::new(AtomicBool::new(false));
    let (p, a) = (producer.clone(), armed.clone());

    let mut h = Harness::with(settings, capacity, MemMedium::new(), move |hooks| {
        hooks.on_status(move |status| {
            if status != LogStatus::Open || !a.load(Ordering::SeqCst) {
                return;
            }
            if !repeat {
                a.store(false, Ordering::SeqCst);
            }
            if let Some(producer) = p.lock().unwrap().as_mut() {
                let _ = producer.try_write(&late);
            }
        })
    });
    *producer.lock().unwrap() = h.engine.take_producer();
    (h, SharedProducer { producer, armed })
}

#[test]
fn test_engine_idempotent_start() {
    let mut h = Harness::new(settings(), 256);

    h.engine.write(b"stale data").unwrap();
    h.engine.start();
    h.engine.write(b"fresh").unwrap();
    h.engine.start();

    assert_eq!(h.engine.state(), EngineState::Opening);
    assert_eq!(h.count(LogStatus::Start), 1, "重复 start 只应生效一次");
    assert_eq!(
        h.engine.stats().buffered,
        5,
        "第二次 start 不应再清空缓冲区"
    );

    h.engine.tick();
    h.engine.start();
    assert_eq!(h.engine.state(), EngineState::Writing);
    assert_eq!(h.count(LogStatus::Open), 1);
    assert_eq!(h.engine.status(), LoggerStatus::Enabled);

    h.engine.tick();
    assert_eq!(h.file("File"), b"fresh", "启动前的数据应被丢弃");
}

#[test]
fn test_engine_waits_for_medium() {
    let mut h = Harness::new(settings(), 64);
    h.medium.set_ready(false);

    h.engine.start();
    for _ in 0..3 {
        h.engine.tick();
    }
    assert_eq!(h.engine.state(), EngineState::Opening);
    assert!(h.medium.paths().is_empty());

    h.medium.set_ready(true);
    h.engine.tick();
    assert_eq!(h.engine.state(), EngineState::Writing);
    assert!(h.medium.contents("logs/File").is_some());
}

#[test]
fn test_engine_size_rotation_boundary() {
    let mut h = Harness::new(
        LogSettings {
            max_file_size: 100,
            ..settings()
        },
        256,
    );
    h.start_and_open();

    let first = pattern(60, 0);
    let second = pattern(50, 100);

    h.engine.write(&first).unwrap();
    h.engine.tick();
    assert_eq!(h.engine.stats().current_file_size, 60);

    h.engine.write(&second).unwrap();
    h.engine.tick();
    assert_eq!(h.count(LogStatus::MaxFileSizeExceeded), 1);
    assert_eq!(h.file("Log_0000.bin"), first);
    assert_eq!(h.file("File").len(), 0, "轮转后新文件应从 0 开始");
    assert_eq!(h.engine.stats().buffered, 50, "轮转的那次 tick 不写数据");

    h.engine.tick();
    assert_eq!(h.file("File"), second);

    h.engine.stop().unwrap();
    assert_eq!(h.file("Log_0001.bin"), second);
    assert_eq!(
        h.events(),
        vec![
            LogStatus::Start,
            LogStatus::Open,
            LogStatus::MaxFileSizeExceeded,
            LogStatus::Close,
            LogStatus::Open,
            LogStatus::Close,
            LogStatus::Stop,
        ]
    );
    assert_eq!(h.engine.status(), LoggerStatus::Disabled);
}

#[test]
fn test_engine_oversized_chunk_is_clamped() {
    let mut h = Harness::new(
        LogSettings {
            max_file_size: 100,
            ..settings()
        },
        256,
    );
    h.start_and_open();

    let data = pattern(150, 7);
    h.engine.write(&data).unwrap();
    for _ in 0..4 {
        h.engine.tick();
    }
    h.engine.stop().unwrap();

    let a = h.file("Log_0000.bin");
    let b = h.file("Log_0001.bin");
    assert_eq!(a.len(), 99, "单个文件不应达到上限");
    assert_eq!([a, b].concat(), data);
}

#[test]
fn test_engine_age_rotation() {
    let mut h = Harness::new(
        LogSettings {
            max_file_age: Duration::from_secs(10),
            ..settings()
        },
        256,
    );
    h.start_and_open();

    h.engine.write(b"abc").unwrap();
    h.engine.tick();

    h.clock.advance_secs(10);
    h.engine.write(b"def").unwrap();
    h.engine.tick();

    assert_eq!(h.count(LogStatus::MaxFileAgeExceeded), 1);
    assert_eq!(h.file("Log_0000.bin"), b"abc", "时长轮转优先于写入");
    assert_eq!(h.file("File"), b"");

    h.engine.tick();
    assert_eq!(h.file("File"), b"def");

    h.clock.advance_secs(9);
    h.engine.tick();
    assert_eq!(h.count(LogStatus::MaxFileAgeExceeded), 1, "未到时长不应轮转");
}

#[test]
fn test_engine_timestamp_names() {
    let mut h = Harness::new(
        LogSettings {
            name_suffix: NameSuffix::Timestamp,
            ..settings()
        },
        64,
    );
    h.medium
        .insert("logs/Log_2024-03-09_07-05-02_5.bin", b"older".to_vec());
    h.start_and_open();

    h.engine.write(b"abc").unwrap();
    h.engine.tick();
    h.clock.advance_secs(5);
    h.engine.stop().unwrap();

    assert_eq!(h.file("Log_2024-03-09_07-05-02_5_0001.bin"), b"abc");
    assert_eq!(h.file("Log_2024-03-09_07-05-02_5.bin"), b"older");
}

#[test]
fn test_engine_medium_full_rotates() {
    let medium = MemMedium::with_capacity(100);
    let mut h = Harness::with(settings(), 256, medium, |hooks| hooks);
    h.start_and_open();

    let first = pattern(80, 0);
    let second = pattern(50, 80);

    h.engine.write(&first).unwrap();
    h.engine.tick();
    h.engine.write(&second).unwrap();
    h.engine.tick();

    assert_eq!(h.count(LogStatus::MediumFull), 1);
    assert_eq!(h.file("Log_0000.bin").len(), 100);
    assert_eq!(h.engine.stats().buffered, 30, "写不下的数据留在缓冲区");
    assert_eq!(h.engine.state(), EngineState::Writing);

    // 腾出空间后剩余数据写入新文件
    h.medium.set_capacity(None);
    h.engine.tick();
    assert_eq!(h.file("File"), &second[20..]);
    assert!(h.errors().is_empty());
}

#[test]
fn test_engine_medium_full_on_empty_file_is_fatal() {
    let medium = MemMedium::with_capacity(100);
    let mut h = Harness::with(settings(), 256, medium, |hooks| hooks);
    h.start_and_open();

    h.engine.write(&pattern(80, 0)).unwrap();
    h.engine.tick();
    h.engine.write(&pattern(50, 0)).unwrap();
    h.engine.tick();
    assert_eq!(h.engine.state(), EngineState::Writing);

    h.engine.tick();
    assert_eq!(h.engine.state(), EngineState::Disabled);
    assert_eq!(h.engine.status(), LoggerStatus::Error);
    assert_eq!(h.engine.last_error(), Some(ErrorKind::MediumFull));
    assert_eq!(h.errors(), vec![ErrorKind::MediumFull]);
}

#[test]
fn test_engine_io_error_disables() {
    let mut h = Harness::new(settings(), 64);
    h.start_and_open();

    h.medium.fail_writes(true);
    h.engine.write(b"data").unwrap();
    h.engine.tick();

    assert_eq!(h.engine.state(), EngineState::Disabled);
    assert_eq!(h.engine.last_error(), Some(ErrorKind::Io));
    assert_eq!(h.errors(), vec![ErrorKind::Io]);
    assert_eq!(h.count(LogStatus::Close), 0, "IO 错误不应触发轮转");

    // 重新启动后恢复，空的遗留文件被删除
    h.medium.fail_writes(false);
    h.start_and_open();
    assert_eq!(h.engine.status(), LoggerStatus::Enabled);
    assert_eq!(h.engine.last_error(), None);
    assert_eq!(h.count(LogStatus::Recovered), 0);
    assert_eq!(h.medium.paths(), vec!["logs/File".to_string()]);
}

#[test]
fn test_engine_open_failure_disables() {
    let mut h = Harness::new(settings(), 64);
    h.medium.fail_open(true);

    h.engine.start();
    h.engine.tick();
    assert_eq!(h.engine.state(), EngineState::Disabled);
    assert_eq!(h.engine.status(), LoggerStatus::Error);
    assert_eq!(h.errors(), vec![ErrorKind::Io]);
}

#[test]
fn test_engine_name_exhausted() {
    let medium = MemMedium::new();
    for i in 0..10_000 {
        medium.insert(&format!("logs/Log_{:04}.bin", i), Vec::new());
    }
    let mut h = Harness::with(settings(), 64, medium, |hooks| hooks);
    h.start_and_open();

    h.engine.write(b"x").unwrap();
    h.engine.tick();
    let result = h.engine.stop();

    assert!(matches!(result, Err(LogError::NameExhausted)));
    assert_eq!(h.engine.state(), EngineState::Disabled);
    assert_eq!(h.engine.status(), LoggerStatus::Error);
    assert_eq!(h.errors(), vec![ErrorKind::NameExhausted]);
    assert_eq!(h.file("File"), b"x", "无法命名时数据仍留在打开文件中");
}

#[test]
fn test_engine_stop_drains_wrapped_buffer() {
    let mut h = Harness::new(settings(), 256);
    h.start_and_open();

    println!("\n=== 停止时排空回绕数据 ===");

    let a = pattern(100, 0);
    h.engine.write(&a).unwrap();
    h.engine.tick();

    // 写指针恰好回绕到 0，然后把缓冲区填满
    let b = pattern(156, 1);
    let c = pattern(99, 2);
    h.engine.write(&b).unwrap();
    h.engine.write(&c).unwrap();
    assert_eq!(h.engine.write_available(), 0);
    assert_eq!(h.engine.stats().buffered, 255);

    h.engine.stop().unwrap();
    let content = h.file("Log_0000.bin");
    println!("关闭后文件 {} 字节", content.len());
    assert_eq!(content, [a, b, c].concat(), "所有数据应按顺序恰好出现一次");
}

#[test]
fn test_engine_recovers_orphan() {
    let medium = MemMedium::new();
    medium.insert("logs/File", b"leftover".to_vec());
    let mut h = Harness::with(settings(), 64, medium, |hooks| hooks);

    h.start_and_open();
    assert_eq!(
        h.events(),
        vec![LogStatus::Start, LogStatus::Recovered, LogStatus::Open]
    );
    assert_eq!(h.file("Log_0000.bin"), b"leftover");
    assert_eq!(h.file("File"), b"");

    h.engine.write(b"new").unwrap();
    h.engine.tick();
    h.engine.stop().unwrap();
    assert_eq!(h.file("Log_0001.bin"), b"new");
    assert_eq!(h.engine.stats().files_finalized, 2);
}

#[test]
fn test_engine_persists_counter() {
    let medium = MemMedium::new();
    medium.insert("logs/Counter.txt", b"0042".to_vec());
    let changes = Arc::new(Mutex::new(Vec::new()));
    let seen = changes.clone();

    let mut h = Harness::with(
        LogSettings {
            counter_file: Some("Counter.txt".to_string()),
            ..settings()
        },
        64,
        medium,
        move |hooks| hooks.on_counter_changed(move |c| seen.lock().unwrap().push(c)),
    );
    h.start_and_open();
    assert_eq!(h.engine.counter(), 42);

    h.engine.write(b"abc").unwrap();
    h.engine.tick();
    h.engine.stop().unwrap();

    assert_eq!(h.file("Log_0042.bin"), b"abc");
    assert_eq!(h.file("Counter.txt"), b"0043");
    assert_eq!(*changes.lock().unwrap(), vec![43]);
}

#[test]
fn test_engine_preamble_per_file() {
    let mut h = Harness::with(
        LogSettings {
            max_file_size: 20,
            ..settings()
        },
        64,
        MemMedium::new(),
        |hooks| hooks.write_preamble(|buf| buf.extend_from_slice(b"HEADER\n")),
    );
    h.start_and_open();
    assert_eq!(h.engine.stats().current_file_size, 7);

    h.engine.write(b"0123456789").unwrap();
    h.engine.tick();
    h.engine.write(b"abcde").unwrap();
    h.engine.tick();
    assert_eq!(h.file("File"), b"HEADER\n", "新文件应先写文件头");

    h.engine.tick();
    h.engine.stop().unwrap();

    assert_eq!(h.file("Log_0000.bin"), b"HEADER\n0123456789");
    assert_eq!(h.file("Log_0001.bin"), b"HEADER\nabcde");
    assert_eq!(h.engine.stats().bytes_written, 15, "统计不含文件头");
}

#[test]
fn test_engine_overrun_drops_whole_record() {
    let mut h = Harness::new(settings(), 16);

    h.engine.write(b"0123456789").unwrap();
    let err = h.engine.write(b"too long for the rest").unwrap_err();
    assert!(matches!(
        err,
        LogError::BufferOverrun {
            requested: 21,
            available: 5
        }
    ));

    let stats = h.engine.stats();
    assert_eq!(stats.overruns, 1);
    assert_eq!(stats.buffered, 10, "已缓冲的数据不受影响");
}

#[test]
fn test_engine_producer_in_other_thread() {
    let mut h = Harness::new(settings(), 64);
    let mut producer = h.engine.take_producer().unwrap();
    assert!(matches!(
        h.engine.write(b"x"),
        Err(LogError::ProducerDetached)
    ));
    h.start_and_open();

    let expected: Vec<u8> = (0..200)
        .flat_map(|i| format!("line {}\n", i).into_bytes())
        .collect();

    let handle = thread::spawn(move || {
        for i in 0..200 {
            let line = format!("line {}\n", i);
            while producer.try_write(line.as_bytes()).is_err() {
                thread::yield_now();
            }
        }
    });

    while !handle.is_finished() {
        h.engine.tick();
        thread::yield_now();
    }
    handle.join().unwrap();
    h.engine.stop().unwrap();

    assert_eq!(h.file("Log_0000.bin"), expected);
}

#[test]
fn test_engine_configuration_errors() {
    let result = LoggingEngine::with_capacity(
        settings(),
        0,
        MemMedium::new(),
        ManualClock::new(TPS, base_time()),
    );
    assert!(matches!(result, Err(LogError::Configuration(_))));

    let result = LoggingEngine::with_capacity(
        LogSettings {
            max_file_age: Duration::from_secs(u64::MAX / 10),
            ..settings()
        },
        64,
        MemMedium::new(),
        ManualClock::new(TPS, base_time()),
    );
    assert!(matches!(result, Err(LogError::Configuration(_))));
}

#[test]
fn test_engine_settings_locked_while_running() {
    let mut h = Harness::new(settings(), 64);
    h.start_and_open();
    assert!(h.engine.update_settings(settings()).is_err());

    h.engine.stop().unwrap();
    h.engine
        .update_settings(LogSettings {
            name_prefix: "Other".to_string(),
            ..settings()
        })
        .unwrap();

    h.start_and_open();
    h.engine.write(b"z").unwrap();
    h.engine.tick();
    h.engine.stop().unwrap();
    assert_eq!(h.file("Other_0000.bin"), b"z");
}

#[test]
fn test_engine_stats_report() {
    let mut h = Harness::new(settings(), 128);
    h.start_and_open();
    h.engine.write(&pattern(40, 0)).unwrap();
    h.engine.tick();
    h.clock.advance_secs(2);

    let stats = h.engine.stats();
    println!("{}", stats);
    assert_eq!(stats.current_file.as_deref(), Some("logs/File"));
    assert_eq!(stats.current_file_size, 40);
    assert_eq!(stats.current_file_age_secs, 2.0);
    assert_eq!(stats.bytes_written, 40);
    assert!(stats.to_string().contains("Files finalized: 0"));
}

#[test]
fn test_engine_rename_failure_on_stop() {
    let mut h = Harness::new(settings(), 64);
    h.start_and_open();
    h.engine.write(b"abc").unwrap();
    h.engine.tick();

    h.medium.fail_rename(true);
    let result = h.engine.stop();

    assert!(matches!(result, Err(LogError::Io(_))));
    assert_eq!(h.engine.state(), EngineState::Disabled);
    assert_eq!(h.engine.status(), LoggerStatus::Error);
    assert_eq!(h.engine.last_error(), Some(ErrorKind::Io));
    assert_eq!(h.errors(), vec![ErrorKind::Io]);
    assert_eq!(h.count(LogStatus::Close), 0);
    assert_eq!(h.file("File"), b"abc", "重命名失败时数据留在固定文件名下");
    assert_eq!(h.engine.counter(), 0, "重命名失败不应消耗计数器");

    // 下次启动时恢复为第一个计数器文件名
    h.medium.fail_rename(false);
    h.start_and_open();
    assert_eq!(h.count(LogStatus::Recovered), 1);
    assert_eq!(h.file("Log_0000.bin"), b"abc");
    assert_eq!(h.file("File"), b"");
    assert_eq!(h.engine.counter(), 1);
}

#[test]
fn test_engine_rename_failure_on_rotation() {
    let mut h = Harness::new(
        LogSettings {
            max_file_size: 100,
            ..settings()
        },
        256,
    );
    h.start_and_open();

    let first = pattern(60, 0);
    h.engine.write(&first).unwrap();
    h.engine.tick();

    h.medium.fail_rename(true);
    h.engine.write(&pattern(50, 100)).unwrap();
    h.engine.tick();

    assert_eq!(h.count(LogStatus::MaxFileSizeExceeded), 1);
    assert_eq!(h.count(LogStatus::Close), 0);
    assert_eq!(h.engine.state(), EngineState::Disabled);
    assert_eq!(h.engine.last_error(), Some(ErrorKind::Io));
    assert_eq!(h.errors(), vec![ErrorKind::Io]);
    assert_eq!(h.file("File"), first);
    assert_eq!(h.medium.paths(), vec!["logs/File".to_string()]);
}

/// 文件里已有 60 字节、缓冲 50 字节时停止，轮转后的 Open 回调追加 40 字节，
/// 容量 128 的缓冲区因此回绕
fn stop_with_late_record(passes: u32) -> Harness {
    let (mut h, shared) = with_late_writer(
        LogSettings {
            max_file_size: 100,
            stop_drain_passes: passes,
            ..settings()
        },
        128,
        pattern(40, 200),
        false,
    );
    h.start_and_open();

    shared.write(&pattern(60, 0));
    h.engine.tick();
    shared.write(&pattern(50, 100));
    shared.arm();

    h.engine.stop().unwrap();
    assert_eq!(h.engine.state(), EngineState::Disabled);
    assert_eq!(h.file("Log_0000.bin"), pattern(60, 0));
    h
}

#[test]
fn test_engine_stop_third_pass_writes_late_record() {
    let h = stop_with_late_record(3);
    assert_eq!(
        h.file("Log_0001.bin"),
        [pattern(50, 100), pattern(40, 200)].concat(),
        "第三次排空应写出回绕后的部分"
    );
    assert_eq!(h.engine.stats().buffered, 0);

    let h = stop_with_late_record(2);
    assert_eq!(
        h.file("Log_0001.bin"),
        [pattern(50, 100), pattern(40, 200)[..18].to_vec()].concat()
    );
    assert_eq!(h.engine.stats().buffered, 22, "两次排空只写到回绕点");
}

#[test]
fn test_engine_stop_drain_bounded_while_producer_writes() {
    let late = pattern(120, 200);
    let (mut h, shared) = with_late_writer(
        LogSettings {
            max_file_size: 100,
            ..settings()
        },
        512,
        late.clone(),
        true,
    );
    h.start_and_open();

    shared.write(&pattern(60, 0));
    h.engine.tick();
    shared.write(&pattern(50, 100));
    // 之后每次打开新文件都会追加 120 字节
    shared.arm();

    h.engine.stop().unwrap();

    assert_eq!(h.engine.state(), EngineState::Disabled);
    assert_eq!(h.file("Log_0000.bin"), pattern(60, 0));
    assert_eq!(
        h.file("Log_0001.bin"),
        [pattern(50, 100), late[..49].to_vec()].concat()
    );
    assert!(
        h.medium.contents("logs/Log_0002.bin").is_none(),
        "写完停止时已缓冲的数据后不应继续轮转"
    );
    assert_eq!(h.engine.stats().buffered, 71);
}
