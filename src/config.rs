//! 向导配置模块

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 向导配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardConfig {
    /// run 目录的搜索根
    #[serde(default = "default_search_roots")]
    pub search_roots: Vec<PathBuf>,
    /// 工作区根目录（下载目标目录在此之下解析）
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// 会话日志目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 识别的模型文件扩展名
    #[serde(default = "default_artifact_extension")]
    pub artifact_extension: String,
    /// 扫描最大递归深度
    #[serde(default = "default_max_scan_depth")]
    pub max_scan_depth: usize,
    /// 下载目标目录覆盖（来自环境变量）
    #[serde(default)]
    pub target_dir_override: Option<PathBuf>,
}

fn default_search_roots() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/workspace/output_folder"),
        PathBuf::from("/workspace/diffusion_pipe_working_folder/output_folder"),
        PathBuf::from("/workspace"),
    ]
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("/workspace")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./lorawizard_logs")
}

fn default_artifact_extension() -> String {
    "safetensors".to_string()
}

fn default_max_scan_depth() -> usize {
    6
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            search_roots: default_search_roots(),
            workspace_root: default_workspace_root(),
            log_dir: default_log_dir(),
            artifact_extension: default_artifact_extension(),
            max_scan_depth: default_max_scan_depth(),
            target_dir_override: None,
        }
    }
}

impl WizardConfig {
    /// 从配置文件加载，再叠加环境变量覆盖
    pub fn load(config_dir: &Path) -> Self {
        let mut config = Self::load_file(config_dir);
        config.apply_env();
        config
    }

    fn load_file(config_dir: &Path) -> Self {
        let config_file = config_dir.join("config.json");
        if config_file.exists() {
            if let Ok(content) = fs::read_to_string(&config_file) {
                if let Ok(config) = serde_json::from_str::<Self>(&content) {
                    return config;
                }
            }
        }
        Self::default()
    }

    /// 环境变量覆盖：SEARCH_ROOTS（空白分隔）、LORA_TARGET_DIR / LORAS_DIR
    fn apply_env(&mut self) {
        if let Ok(roots) = std::env::var("SEARCH_ROOTS") {
            let parsed: Vec<PathBuf> = roots
                .split_whitespace()
                .filter(|r| !r.is_empty())
                .map(PathBuf::from)
                .collect();
            if !parsed.is_empty() {
                self.search_roots = parsed;
            }
        }

        self.target_dir_override = std::env::var("LORA_TARGET_DIR")
            .or_else(|_| std::env::var("LORAS_DIR"))
            .ok()
            .map(PathBuf::from);
    }

    /// 保存配置
    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        fs::create_dir_all(config_dir)?;
        let config_file = config_dir.join("config.json");
        let content = serde_json::to_string_pretty(self).unwrap();
        fs::write(&config_file, content)
    }

    /// 扫描根：配置的搜索根中存在的目录；一个都不存在时回退到当前目录
    pub fn usable_search_roots(&self) -> Vec<PathBuf> {
        let existing: Vec<PathBuf> = self
            .search_roots
            .iter()
            .filter(|r| r.is_dir())
            .cloned()
            .collect();

        if existing.is_empty() {
            vec![PathBuf::from(".")]
        } else {
            existing
        }
    }
}
