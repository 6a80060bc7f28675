//! 终端日志：按级别着色输出到 stderr

use log::{Level, LevelFilter, Log, Metadata, Record};

/// Logger 实现
struct Logger;

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            Level::Error => 31,
            Level::Warn => 93,
            Level::Info => 34,
            Level::Debug => 32,
            Level::Trace => 90,
        };
        eprintln!(
            "\x1b[{}m[{:>5}] {}\x1b[0m",
            color,
            record.level(),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// 注册 logger，重复调用时忽略
pub fn init() {
    let _ = log::set_logger(&Logger);
}

/// 设置全局最大日志级别
///
/// # 参数
/// * `env` - 日志级别字符串（如 "trace", "debug", "info", "warn", "error", "off"），
///   不区分大小写；为 `None` 时取 `Warn`，无法解析时取 `Trace`
pub fn set_log_level(env: Option<&str>) {
    let level = match env.map(str::to_ascii_lowercase).as_deref() {
        None => LevelFilter::Warn,
        Some("off") => LevelFilter::Off,
        Some("error") => LevelFilter::Error,
        Some("warn") => LevelFilter::Warn,
        Some("info") => LevelFilter::Info,
        Some("debug") => LevelFilter::Debug,
        Some(_) => LevelFilter::Trace,
    };
    log::set_max_level(level);
}
