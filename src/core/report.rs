//! 训练配置聚合
//!
//! 从 run 目录附近的 .toml 配置文件里收集已知的训练参数，
//! 按固定的语义分组生成一份人类可读的 training_info 摘要。
//! 缺失的文件跳过，损坏的文件记录解析错误后继续。

use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// 向上搜索配置文件的父级层数
const PARENT_SEARCH_LEVELS: usize = 3;

/// 固定的语义分组表：分组名 -> 归入该组的键名
/// 不在表里的键一律丢弃，保证摘要格式稳定
const SECTION_TABLE: &[(&str, &[&str])] = &[
    (
        "Network Settings",
        &[
            "network_dim",
            "network_alpha",
            "rank",
            "alpha",
            "network_module",
            "network_type",
        ],
    ),
    (
        "Training Settings",
        &[
            "learning_rate",
            "lr",
            "unet_lr",
            "text_encoder_lr",
            "max_train_epochs",
            "max_train_steps",
            "epochs",
            "train_batch_size",
            "batch_size",
            "seed",
        ],
    ),
    ("Resolution", &["resolution", "width", "height"]),
    (
        "Optimizer & Scheduler",
        &["optimizer_type", "optimizer", "lr_scheduler", "scheduler"],
    ),
    (
        "Model",
        &[
            "pretrained_model_name_or_path",
            "model_path",
            "base_model",
            "output_dir",
            "output_name",
        ],
    ),
    (
        "Dataset",
        &["train_data_dir", "dataset_config", "caption_extension"],
    ),
    (
        "Other",
        &[
            "mixed_precision",
            "gradient_checkpointing",
            "save_every_n_epochs",
            "save_model_as",
        ],
    ),
];

/// 摘要里的一个键值对，带来源文件列表
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub key: String,
    pub value: String,
    /// 定义过该键的文件；首个是生效值的来源
    pub sources: Vec<String>,
}

/// 一个被解析过的来源文件
#[derive(Debug, Clone, Serialize)]
pub struct SourceNote {
    pub file: String,
    /// 解析失败时的错误说明
    pub parse_error: Option<String>,
}

/// 聚合后的训练信息摘要
#[derive(Debug, Serialize)]
pub struct TrainingInfoReport {
    /// (分组名, 组内有序键值对)，空分组不出现
    pub sections: Vec<(String, Vec<ReportEntry>)>,
    pub sources: Vec<SourceNote>,
    pub generated_at: String,
}

impl TrainingInfoReport {
    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|(_, entries)| entries.is_empty())
    }

    /// 渲染成纯文本摘要
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&"=".repeat(50));
        out.push_str("\n  LoRA Training Information\n");
        out.push_str(&"=".repeat(50));
        out.push_str("\n\n");

        for (section, entries) in &self.sections {
            if entries.is_empty() {
                continue;
            }
            out.push_str(&format!("[{}]\n", section));
            for entry in entries {
                out.push_str(&format!("  {} = {}\n", entry.key, entry.value));
                if entry.sources.len() > 1 {
                    out.push_str(&format!(
                        "    # also defined in: {}\n",
                        entry.sources[1..].join(", ")
                    ));
                }
            }
            out.push('\n');
        }

        out.push_str("[Source]\n");
        for source in &self.sources {
            match &source.parse_error {
                Some(err) => out.push_str(&format!("  {} (parse error: {})\n", source.file, err)),
                None => out.push_str(&format!("  {}\n", source.file)),
            }
        }
        out.push_str(&format!("  Date: {}\n", self.generated_at));
        out
    }

    /// 把摘要写成静态文本文件
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.render())
    }
}

/// 配置聚合器
pub struct ConfigAggregator;

impl ConfigAggregator {
    /// 在 run 目录及其上若干级父目录里找候选 .toml 文件（不递归）
    pub fn discover_candidates(run_dir: &Path) -> Vec<PathBuf> {
        let mut search_dirs = vec![run_dir.to_path_buf()];
        let mut current = run_dir;
        for _ in 0..PARENT_SEARCH_LEVELS {
            match current.parent() {
                Some(parent) => {
                    search_dirs.push(parent.to_path_buf());
                    current = parent;
                }
                None => break,
            }
        }

        let mut candidates = Vec::new();
        for dir in search_dirs {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            let mut files: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.is_file() && p.extension().map(|e| e == "toml").unwrap_or(false)
                })
                .collect();
            files.sort();
            for file in files {
                if !candidates.contains(&file) {
                    candidates.push(file);
                }
            }
        }
        candidates
    }

    /// 按顺序解析候选文件并合并成摘要。
    /// 先出现的值生效；后来的重复定义只追加来源，不覆盖。
    pub fn aggregate(paths: &[PathBuf]) -> TrainingInfoReport {
        let mut sections: Vec<(String, Vec<ReportEntry>)> = SECTION_TABLE
            .iter()
            .map(|(name, _)| (name.to_string(), Vec::new()))
            .collect();
        let mut sources = Vec::new();

        for path in paths {
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("<unnamed>")
                .to_string();

            let content = match std::fs::read_to_string(path) {
                Ok(content) => content,
                Err(e) => {
                    // 文件消失或不可读：跳过，不算来源
                    debug!("配置文件不可读，跳过: {} ({})", path.display(), e);
                    continue;
                }
            };

            match content.parse::<toml::Value>() {
                Ok(value) => {
                    let mut flat = Vec::new();
                    flatten_value(&value, &mut flat);
                    for (key, raw) in flat {
                        Self::merge_key(&mut sections, &key, &raw, &file_name);
                    }
                    sources.push(SourceNote {
                        file: file_name,
                        parse_error: None,
                    });
                }
                Err(e) => {
                    // 损坏的文件不致命：记下错误继续
                    warn!("配置文件解析失败: {} ({})", path.display(), e);
                    sources.push(SourceNote {
                        file: file_name,
                        parse_error: Some(e.to_string()),
                    });
                }
            }
        }

        TrainingInfoReport {
            sections,
            sources,
            generated_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    fn merge_key(
        sections: &mut [(String, Vec<ReportEntry>)],
        key: &str,
        value: &str,
        source: &str,
    ) {
        let Some(section_idx) = SECTION_TABLE
            .iter()
            .position(|(_, keys)| keys.contains(&key))
        else {
            // 未知键直接丢弃，保持摘要稳定
            return;
        };

        let entries = &mut sections[section_idx].1;
        match entries.iter_mut().find(|e| e.key == key) {
            Some(existing) => {
                // 先到先得；重复定义只记录来源
                if !existing.sources.iter().any(|s| s == source) {
                    existing.sources.push(source.to_string());
                }
            }
            None => entries.push(ReportEntry {
                key: key.to_string(),
                value: value.to_string(),
                sources: vec![source.to_string()],
            }),
        }
    }
}

/// 把 toml 值平铺成 (裸键名, 字符串值)；嵌套表取最后一段作为键名
fn flatten_value(value: &toml::Value, out: &mut Vec<(String, String)>) {
    if let toml::Value::Table(table) = value {
        for (key, val) in table {
            match val {
                toml::Value::Table(_) => flatten_value(val, out),
                toml::Value::String(s) => out.push((key.clone(), s.clone())),
                other => out.push((key.clone(), other.to_string())),
            }
        }
    }
}
