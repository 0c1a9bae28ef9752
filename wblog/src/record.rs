//! 记录模式：读取线程写入环形缓冲区，主循环驱动引擎

use anyhow::{Context, Result};
use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use wblog::constants::DEFAULT_BUFFER_CAPACITY;
use wblog::{
    Clock, EngineHooks, FsMedium, LogSettings, LoggingEngine, Medium, Producer, SystemClock,
};

use crate::RecordArgs;

/// 运行记录模式
pub async fn run_record(args: &RecordArgs, settings: LogSettings) -> Result<()> {
    let root = &args.settings.root;
    std::fs::create_dir_all(root).with_context(|| format!("failed to create {}", root))?;
    let medium = match args.quota {
        Some(limit) => FsMedium::with_quota(root, limit)?,
        None => FsMedium::new(root),
    };

    let capacity = args
        .buffer
        .map(|b| b as usize)
        .unwrap_or(DEFAULT_BUFFER_CAPACITY);
    let mut hooks = EngineHooks::new().on_error(|kind| warn!("wblog: Logging error: {}", kind));
    if let Some(header) = args.header.clone() {
        hooks = hooks.write_preamble(move |buf| {
            buf.extend_from_slice(header.as_bytes());
            buf.push(b'\n');
        });
    }
    let mut engine = LoggingEngine::with_capacity(settings, capacity, medium, SystemClock::new())
        .context("invalid logger settings")?
        .with_hooks(hooks);

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("wblog: Received Ctrl+C, stopping...");
            running_clone.store(false, Ordering::SeqCst);
        }
    });

    // 数据源：命令输出或标准输入
    let mut child: Option<Child> = None;
    let source: Box<dyn Read + Send> = match &args.cmd {
        Some(cmd) => {
            info!("wblog: Recording output of '{}'", cmd);
            let mut spawned = Command::new("sh")
                .arg("-c")
                .arg(cmd)
                .stdout(Stdio::piped())
                .spawn()
                .with_context(|| format!("failed to run '{}'", cmd))?;
            let stdout = spawned.stdout.take().context("child has no stdout")?;
            child = Some(spawned);
            Box::new(stdout)
        }
        None => {
            info!("wblog: Recording standard input");
            Box::new(io::stdin())
        }
    };

    let result = record(
        &mut engine,
        source,
        running,
        Duration::from_millis(args.tick_ms.max(1)),
    )
    .await;

    if let Some(mut child) = child {
        if let Err(e) = child.kill() {
            warn!("wblog: Failed to kill child process: {}", e);
        }
        let _ = child.wait();
    }

    info!("wblog: Done.\n{}", engine.stats());
    result
}

/// 驱动引擎直到输入结束、收到停止信号或出错，然后停止引擎
async fn record<M: Medium, C: Clock>(
    engine: &mut LoggingEngine<M, C>,
    source: Box<dyn Read + Send>,
    running: Arc<AtomicBool>,
    period: Duration,
) -> Result<()> {
    let producer = engine
        .take_producer()
        .context("producer already taken")?;

    // start() 会清空缓冲区，必须在读取线程写入之前调用
    engine.start();
    info!("wblog: Press Ctrl+C to stop");

    let finished = Arc::new(AtomicBool::new(false));
    let reader_thread = spawn_reader(source, producer, running.clone(), finished.clone());

    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        engine.tick();

        if !running.load(Ordering::SeqCst) {
            break;
        }
        if finished.load(Ordering::SeqCst) && engine.stats().buffered == 0 {
            break;
        }
        if engine.last_error().is_some() {
            running.store(false, Ordering::SeqCst);
            break;
        }
    }

    let stop_result = engine.stop();

    // 读取线程可能阻塞在标准输入上，不等待它结束
    if finished.load(Ordering::SeqCst) {
        let _ = reader_thread.join();
    }

    if let Some(kind) = engine.last_error() {
        anyhow::bail!("logging stopped: {}", kind);
    }
    stop_result.context("failed to stop logger")?;
    Ok(())
}

/// 读取线程：每行作为一条完整记录写入缓冲区，缓冲区满时等待
fn spawn_reader(
    source: Box<dyn Read + Send>,
    mut producer: Producer,
    running: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let (lines, dropped) = read_lines(source, &mut producer, &running);
        info!("wblog: Input finished, {} lines, {} dropped", lines, dropped);
        finished.store(true, Ordering::SeqCst);
    })
}

/// 逐行读取直到输入结束或停止，返回 (行数, 丢弃行数)
///
/// 只在放得下整行时才写入，溢出计数只包含真正丢弃的行。
fn read_lines(source: impl Read, producer: &mut Producer, running: &AtomicBool) -> (u64, u64) {
    let mut input = BufReader::new(source);
    let mut line = Vec::new();
    let mut lines = 0u64;
    let mut dropped = 0u64;

    while running.load(Ordering::SeqCst) {
        line.clear();
        match input.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("wblog: Read error: {}", e);
                break;
            }
        }
        lines += 1;

        while line.len() < producer.capacity()
            && producer.write_available() < line.len()
            && running.load(Ordering::SeqCst)
        {
            thread::sleep(Duration::from_millis(1));
        }
        if let Err(e) = producer.try_write(&line) {
            dropped += 1;
            warn!("wblog: Dropped line {}: {}", lines, e);
        }
    }

    (lines, dropped)
}
