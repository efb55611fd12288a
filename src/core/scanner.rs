//! run 目录扫描器
//!
//! 在搜索根下有界深度地递归，寻找形如 `epoch<N>/` 且内含模型文件的子目录；
//! 这些子目录的公共父目录即一个 run。扫描结果是某一时刻的不可变快照，
//! 传输过程中不再重新查询文件系统。

use anyhow::Result;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 默认的终端模型文件名（不带编号，排在所有 epoch 之后）
pub const FINAL_ARTIFACT_STEM: &str = "final";

/// 扫描器配置
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// 最大递归深度
    pub max_depth: usize,
    /// 识别的模型文件扩展名（不带点）
    pub artifact_extension: String,
    /// 跳过的目录名
    pub exclude_dirs: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_depth: 6,
            artifact_extension: "safetensors".to_string(),
            exclude_dirs: vec![
                ".git".to_string(),
                ".svn".to_string(),
                "node_modules".to_string(),
                "venv".to_string(),
                ".venv".to_string(),
                "__pycache__".to_string(),
            ],
        }
    }
}

/// 一次训练会话的输出目录快照
#[derive(Debug, Clone)]
pub struct Run {
    /// run 根目录（epoch 子目录的公共父目录）
    pub root: PathBuf,
    /// epoch 编号 -> 模型文件路径（有序）
    pub epochs: BTreeMap<u32, PathBuf>,
    /// 不带编号的终端模型文件（如 final.safetensors）
    pub final_artifact: Option<PathBuf>,
    /// epoch 编号映射有歧义（同一编号出现在两个不同目录名下）
    pub inconsistent: bool,
    /// 扫描期间针对此 run 的警告
    pub warnings: Vec<String>,
    /// 根目录最后修改时间（unix 秒），用于列表展示
    pub modified_time: Option<i64>,
}

impl Run {
    /// 已知 epoch 数量
    pub fn epoch_count(&self) -> usize {
        self.epochs.len()
    }

    /// 最小 epoch 编号
    pub fn min_epoch(&self) -> Option<u32> {
        self.epochs.keys().next().copied()
    }

    /// 最大 epoch 编号
    pub fn max_epoch(&self) -> Option<u32> {
        self.epochs.keys().next_back().copied()
    }

    /// 没有任何模型文件的 run 无效，不会被扫描器返回
    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty() && self.final_artifact.is_none()
    }
}

/// 构建 run 时的中间状态
#[derive(Default)]
struct RunBuilder {
    epochs: BTreeMap<u32, PathBuf>,
    /// epoch 编号 -> 第一个映射到它的目录名
    epoch_dir_names: HashMap<u32, String>,
    final_artifact: Option<PathBuf>,
    inconsistent: bool,
    warnings: Vec<String>,
}

/// run 扫描器
pub struct RunScanner {
    config: ScanConfig,
    epoch_re: Regex,
}

impl RunScanner {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            // 目录名开头的整数编号，如 epoch3 / epoch003 / epoch12_backup
            epoch_re: Regex::new(r"^epoch0*(\d+)").expect("epoch pattern is valid"),
        }
    }

    /// 从目录名提取 epoch 编号；不匹配的目录直接忽略
    fn parse_epoch_number(&self, dir_name: &str) -> Option<u32> {
        self.epoch_re
            .captures(dir_name)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
    }

    fn is_excluded_dir(&self, name: &str) -> bool {
        (name.starts_with('.') && name != ".")
            || self.config.exclude_dirs.iter().any(|d| d == name)
    }

    fn is_artifact_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(&self.config.artifact_extension))
            .unwrap_or(false)
    }

    /// 在 epoch 子目录里挑一个模型文件：优先 adapter_model.<ext>，否则取首个
    fn pick_epoch_artifact(&self, epoch_dir: &Path) -> Option<PathBuf> {
        let entries = match std::fs::read_dir(epoch_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("无法读取 epoch 目录 {}: {}", epoch_dir.display(), e);
                return None;
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && self.is_artifact_file(p))
            .collect();
        files.sort();

        let preferred = format!("adapter_model.{}", self.config.artifact_extension);
        files
            .iter()
            .find(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.eq_ignore_ascii_case(&preferred))
                    .unwrap_or(false)
            })
            .cloned()
            .or_else(|| files.into_iter().next())
    }

    /// 扫描所有搜索根，返回发现的 run 快照（按发现顺序，去重）
    pub fn scan(&self, roots: &[PathBuf]) -> Result<Vec<Run>> {
        let mut order: Vec<PathBuf> = Vec::new();
        let mut builders: HashMap<PathBuf, RunBuilder> = HashMap::new();
        let mut unreadable = 0u32;

        for root in roots {
            if !root.is_dir() {
                debug!("搜索根不存在，跳过: {}", root.display());
                continue;
            }
            info!("扫描搜索根: {}", root.display());

            let walker = WalkDir::new(root)
                .max_depth(self.config.max_depth)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| {
                    e.depth() == 0
                        || e.file_name()
                            .to_str()
                            .map(|n| !self.is_excluded_dir(n))
                            .unwrap_or(true)
                });

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        // 无权限等读取错误不致命，记录后继续
                        warn!("目录不可读，已跳过: {}", e);
                        unreadable += 1;
                        continue;
                    }
                };

                if entry.file_type().is_dir() {
                    let name = match entry.file_name().to_str() {
                        Some(n) => n,
                        None => continue,
                    };
                    let Some(number) = self.parse_epoch_number(name) else {
                        continue;
                    };
                    let Some(artifact) = self.pick_epoch_artifact(entry.path()) else {
                        continue;
                    };
                    let Some(parent) = entry.path().parent() else {
                        continue;
                    };

                    let builder = builders.entry(parent.to_path_buf()).or_insert_with(|| {
                        order.push(parent.to_path_buf());
                        RunBuilder::default()
                    });

                    match builder.epoch_dir_names.get(&number) {
                        Some(first) if first != name => {
                            // 同一编号对应两个目录名：保留先发现的映射，标记 run 不一致
                            let msg = format!(
                                "epoch {} 同时由 '{}' 和 '{}' 提供，保留先发现的 '{}'",
                                number, first, name, first
                            );
                            warn!("run {} 编号有歧义: {}", parent.display(), msg);
                            builder.inconsistent = true;
                            builder.warnings.push(msg);
                        }
                        Some(_) => {}
                        None => {
                            builder.epoch_dir_names.insert(number, name.to_string());
                            builder.epochs.insert(number, artifact);
                        }
                    }
                } else if entry.file_type().is_file() {
                    // 不带编号的终端模型文件，单独也能构成一个 run
                    let is_final = entry
                        .path()
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .map(|s| s.eq_ignore_ascii_case(FINAL_ARTIFACT_STEM))
                        .unwrap_or(false);
                    if is_final && self.is_artifact_file(entry.path()) {
                        if let Some(parent) = entry.path().parent() {
                            let builder =
                                builders.entry(parent.to_path_buf()).or_insert_with(|| {
                                    order.push(parent.to_path_buf());
                                    RunBuilder::default()
                                });
                            builder.final_artifact = Some(entry.path().to_path_buf());
                        }
                    }
                }
            }
        }

        let mut runs = Vec::new();
        for root in order {
            let builder = builders.remove(&root).expect("builder exists for root");
            let modified_time = std::fs::metadata(&root)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64);

            let run = Run {
                root,
                epochs: builder.epochs,
                final_artifact: builder.final_artifact,
                inconsistent: builder.inconsistent,
                warnings: builder.warnings,
                modified_time,
            };
            if run.is_empty() {
                continue;
            }
            runs.push(run);
        }

        info!(
            "扫描完成: {} 个 run, {} 个目录不可读",
            runs.len(),
            unreadable
        );
        Ok(runs)
    }
}

impl Default for RunScanner {
    fn default() -> Self {
        Self::new(ScanConfig::default())
    }
}
