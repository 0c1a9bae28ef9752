//! wblog 命令行工具
//!
//! 用法：
//!   wblog record                                  # 从标准输入记录到 "Data Logger/" 下的轮转文件
//!   wblog record --cmd "dmesg -w" --max-size 1M   # 记录命令输出
//!   wblog next-name --dir logs --prefix Log       # 查看下一个将要分配的文件名

mod record;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use wblog::{
    Clock, CounterFile, FsMedium, LogSettings, Medium, NameAllocator, NameSuffix, SystemClock,
};

#[derive(Parser)]
#[command(name = "wblog")]
#[command(about = "Write-behind buffered logger with rotating files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 详细输出（包括每秒统计）
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// 记录标准输入或命令输出
    Record(RecordArgs),

    /// 显示下一个将要分配的文件名（不创建文件）
    NextName {
        #[command(flatten)]
        settings: SettingsArgs,
    },
}

/// 日志设置参数，覆盖 --config 中的值
#[derive(Args, Clone)]
pub struct SettingsArgs {
    /// JSON 设置文件
    #[arg(short, long)]
    config: Option<String>,

    /// 存储根目录
    #[arg(long, default_value = ".")]
    root: String,

    /// 日志目录（相对于根目录）
    #[arg(short, long)]
    dir: Option<String>,

    /// 文件名前缀
    #[arg(short, long)]
    prefix: Option<String>,

    /// 扩展名
    #[arg(short, long)]
    ext: Option<String>,

    /// 文件名后缀方式
    #[arg(short, long, value_parser = ["none", "counter", "timestamp"])]
    naming: Option<String>,

    /// 计数器持久化文件（位于日志目录下）
    #[arg(long)]
    counter_file: Option<String>,
}

#[derive(Args)]
pub struct RecordArgs {
    #[command(flatten)]
    settings: SettingsArgs,

    /// 记录该 shell 命令的输出，而不是标准输入
    #[arg(long)]
    cmd: Option<String>,

    /// 最大文件大小，支持 K/M/G 后缀
    #[arg(short, long, value_parser = parse_size)]
    max_size: Option<u64>,

    /// 最大文件时长（秒）
    #[arg(short = 'a', long)]
    max_age: Option<u64>,

    /// 环形缓冲区大小，支持 K/M/G 后缀
    #[arg(short, long, value_parser = parse_size)]
    buffer: Option<u64>,

    /// 模拟存储容量上限，支持 K/M/G 后缀
    #[arg(short, long, value_parser = parse_size)]
    quota: Option<u64>,

    /// 每个文件开头写入的一行文件头
    #[arg(long)]
    header: Option<String>,

    /// 服务循环间隔（毫秒）
    #[arg(long, default_value_t = 10)]
    tick_ms: u64,
}

fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (digits, multiplier) = match s.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&s[..s.len() - 1], 1024),
        Some('M') => (&s[..s.len() - 1], 1024 * 1024),
        Some('G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    digits
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| format!("invalid size '{}'", s))
}

impl SettingsArgs {
    /// 先读取 --config，再用命令行参数覆盖
    fn build(&self) -> Result<LogSettings> {
        let mut settings = match &self.config {
            Some(path) => LogSettings::from_file(path)
                .with_context(|| format!("failed to load settings from {}", path))?,
            None => LogSettings::default(),
        };
        if let Some(dir) = &self.dir {
            settings.directory = dir.clone();
        }
        if let Some(prefix) = &self.prefix {
            settings.name_prefix = prefix.clone();
        }
        if let Some(ext) = &self.ext {
            settings.extension = ext.clone();
        }
        if let Some(naming) = self.naming.as_deref() {
            settings.name_suffix = match naming {
                "none" => NameSuffix::None,
                "timestamp" => NameSuffix::Timestamp,
                _ => NameSuffix::Counter,
            };
        }
        if let Some(counter_file) = &self.counter_file {
            settings.counter_file = Some(counter_file.clone());
        }
        Ok(settings.normalized())
    }
}

impl RecordArgs {
    fn build(&self) -> Result<LogSettings> {
        let mut settings = self.settings.build()?;
        if let Some(max_size) = self.max_size {
            settings.max_file_size = max_size;
        }
        if let Some(max_age) = self.max_age {
            settings.max_file_age = Duration::from_secs(max_age);
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 设置日志
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Record(args) => {
            let settings = args.build()?;
            info!(
                "wblog: Recording to {}/{} (max size {}, max age {}s)",
                args.settings.root,
                settings.directory,
                settings.max_file_size,
                settings.max_file_age.as_secs()
            );
            record::run_record(&args, settings).await?;
        }
        Commands::NextName { settings } => cmd_next_name(&settings)?,
    }

    Ok(())
}

/// 按当前设置和目录内容预演一次文件名分配
fn cmd_next_name(args: &SettingsArgs) -> Result<()> {
    let settings = args.build()?;
    let mut medium = FsMedium::new(&args.root);

    let mut counter = settings.counter;
    if let Some(name) = &settings.counter_file {
        let file = CounterFile::new(settings.path_of(name));
        if let Some(value) = file
            .load(&mut medium)
            .with_context(|| format!("failed to read counter file {}", file.path()))?
        {
            counter = value;
        }
    }

    let allocator = NameAllocator::from_settings(&settings);
    let clock = SystemClock::new();
    let (name, next) = allocator
        .allocate(
            settings.name_suffix,
            counter,
            clock.wall_time(),
            0,
            |name| medium.exists(&settings.path_of(name)),
        )
        .context("no file name available")?;

    println!("{}", settings.path_of(&name));
    if let Some(next) = next {
        println!("next counter: {:04}", next);
    }
    Ok(())
}
