//! 日志模块 - 每个向导会话一个独立日志文件
//!
//! 会话日志按启动时间戳命名（如 `2026-08-26_1430.log`），追加写入。
//! 写入失败绝不打断被记录的操作（尽力而为）。

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用日志记录
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 会话日志写入器 - 一个会话一个文件
pub struct SessionWriter {
    file_path: PathBuf,
    writer: Arc<Mutex<Option<BufWriter<File>>>>,
}

impl SessionWriter {
    /// 在日志目录下创建以时间戳命名的会话日志文件
    pub fn new(log_dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let stamp = chrono::Local::now().format("%Y-%m-%d_%H%M%S");
        let file_path = log_dir.join(format!("{}.log", stamp));

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;

        Ok(Self {
            file_path,
            writer: Arc::new(Mutex::new(Some(BufWriter::new(file)))),
        })
    }

    /// 本会话日志文件的路径
    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

impl Clone for SessionWriter {
    fn clone(&self) -> Self {
        Self {
            file_path: self.file_path.clone(),
            writer: self.writer.clone(),
        }
    }
}

/// 日志写入器包装（尽力而为：失败时吞掉错误，不打断调用方）
pub struct LogWriter {
    inner: Arc<Mutex<Option<BufWriter<File>>>>,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(_) => return Ok(buf.len()),
        };

        if let Some(ref mut writer) = *guard {
            if writer.write_all(buf).is_ok() {
                let _ = writer.flush();
            }
        }

        // 日志写入失败不向上传播
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Ok(mut guard) = self.inner.lock() {
            if let Some(ref mut writer) = *guard {
                let _ = writer.flush();
            }
        }
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SessionWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            inner: self.writer.clone(),
        }
    }
}

/// 初始化日志系统，返回会话日志路径（文件层创建失败时为 None，仅控制台）
pub fn init_logging(log_dir: &Path, config: &LogConfig) -> Option<PathBuf> {
    if !config.enabled {
        let subscriber = tracing_subscriber::registry();
        let _ = tracing::subscriber::set_global_default(subscriber);
        return None;
    }

    let level = config.tracing_level();
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("reqwest=warn".parse().unwrap());

    match SessionWriter::new(log_dir) {
        Ok(file_writer) => {
            // 控制台只显示警告及以上，交互提示不被日志刷屏
            let console_layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_filter(tracing_subscriber::filter::LevelFilter::WARN);
            let path = file_writer.path().to_path_buf();
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false);

            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(console_layer);

            let _ = tracing::subscriber::set_global_default(subscriber);
            Some(path)
        }
        Err(_) => {
            // 文件日志创建失败，回退到控制台
            // 控制台只显示警告及以上，交互提示不被日志刷屏
            let console_layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_filter(tracing_subscriber::filter::LevelFilter::WARN);
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer);
            let _ = tracing::subscriber::set_global_default(subscriber);
            None
        }
    }
}
