use std::path::PathBuf;

pub mod config;
pub mod console;
pub mod core;
pub mod hub;
pub mod logging;
pub mod wizard;

pub use config::WizardConfig;
pub use crate::core::{RunScanner, ScanConfig, TransferEngine, TransferOutcome, TransferPlan};
pub use hub::{HfHubClient, HubClient, HubToken, RepoId, RepoVisibility};

/// 应用配置目录（系统配置目录下的 lorawizard/，失败时回退到隐藏目录）
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("lorawizard"))
        .unwrap_or_else(|| PathBuf::from(".lorawizard"))
}
