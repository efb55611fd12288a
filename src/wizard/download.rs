//! 下载流程
//!
//! 选仓库 → 列出远端模型文件 → 按范围或单个文件选择 →
//! 解析目标目录 → 顺序下载。已存在的非空文件跳过，
//! 重跑同一个下载是幂等的。

use super::{print_outcome, prompt_range, WizardSession};
use crate::console::Console;
use crate::core::{
    resolve_download_dir, Direction, PlanEntry, RangeItem, Run, TargetDirStatus, TransferEngine,
    TransferPlan, FINAL_ARTIFACT_STEM,
};
use crate::hub::RepoId;
use anyhow::{bail, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub async fn run(session: &WizardSession<'_>) -> Result<()> {
    let console = session.console;

    // 1. 选仓库
    let repos = session.client.list_repos(&session.user).await?;
    if repos.is_empty() {
        bail!("账号 {} 名下没有任何仓库", session.user);
    }
    let names: Vec<String> = repos.iter().map(|r| r.to_string()).collect();
    let repo = &repos[console.choose("从哪个仓库下载?", &names, 0)?];

    // 2. 远端文件清单，只认模型文件
    let all_files = session.client.list_files(repo).await?;
    let suffix = format!(".{}", session.config.artifact_extension);
    let mut artifacts: Vec<String> = all_files
        .into_iter()
        .filter(|f| f.ends_with(&suffix))
        .collect();
    if artifacts.is_empty() {
        bail!("仓库 {} 里没有 {} 文件", repo, suffix);
    }
    sort_artifacts(&mut artifacts);

    // 3. 选择要下载的文件
    let remote_run = run_from_remote_files(&artifacts);
    let selected: Vec<RangeItem> = if remote_run.epochs.is_empty() {
        // 远端没有可解析的 epoch 编号，只能按文件选
        pick_single(console, &artifacts)?
    } else {
        let modes = vec!["按 epoch 范围".to_string(), "单个文件".to_string()];
        match console.choose("怎么选择?", &modes, 0)? {
            0 => prompt_range(console, &remote_run)?.items,
            _ => pick_single(console, &artifacts)?,
        }
    };

    // 4. 目标目录：仓库名做子目录
    let (base_dir, status) = resolve_download_dir(session.config)?;
    if status == TargetDirStatus::CreatedFallback {
        console.say(&format!(
            "⚠ 工作区根不可用，文件将保存到 {}",
            base_dir.display()
        ));
    }
    let target = base_dir.join(repo.name());

    let plan = download_plan(repo.clone(), &selected, &target);
    console.say(&format!(
        "\n将下载 {} 个文件到 {}",
        plan.entries.len(),
        target.display()
    ));
    if !console.confirm("开始下载?", true)? {
        console.say("已取消。");
        return Ok(());
    }
    if session.cancel.load(std::sync::atomic::Ordering::SeqCst) {
        console.say("已取消。");
        return Ok(());
    }

    let mut engine = TransferEngine::new(session.client.clone());
    engine.set_cancel_flag(session.cancel.clone());
    let outcome = engine.execute(&plan, None).await?;

    print_outcome(console, &outcome);
    if outcome.is_total_failure() {
        bail!("所有文件都下载失败，请检查网络后重试");
    }
    Ok(())
}

/// 把远端文件名清单还原成一个合成 Run，
/// 这样范围选择的规则（含报错、交换、final 处理）和本地上传完全一致。
fn run_from_remote_files(artifacts: &[String]) -> Run {
    let epoch_re = Regex::new(r"^epoch0*(\d+)$").expect("epoch pattern is valid");
    let mut epochs = BTreeMap::new();
    let mut final_artifact = None;

    for remote in artifacts {
        let stem = Path::new(remote)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        if stem.eq_ignore_ascii_case(FINAL_ARTIFACT_STEM) {
            final_artifact = Some(PathBuf::from(remote));
        } else if let Some(number) = epoch_re
            .captures(stem)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
        {
            // 重复编号取先出现的（清单已排序）
            epochs.entry(number).or_insert_with(|| PathBuf::from(remote));
        }
    }

    Run {
        root: PathBuf::new(),
        epochs,
        final_artifact,
        inconsistent: false,
        warnings: vec![],
        modified_time: None,
    }
}

/// 单个文件选择
fn pick_single(console: &dyn Console, artifacts: &[String]) -> Result<Vec<RangeItem>> {
    let choice = console.choose("下载哪个文件?", artifacts, 0)?;
    Ok(vec![RangeItem {
        epoch: None,
        path: PathBuf::from(&artifacts[choice]),
    }])
}

/// final 在最前，编号 epoch 按数值升序，其余按名字排在最后
fn sort_artifacts(artifacts: &mut [String]) {
    let epoch_re = Regex::new(r"^epoch0*(\d+)$").expect("epoch pattern is valid");
    let sort_key = |name: &String| {
        let stem = Path::new(name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_string();
        if stem.eq_ignore_ascii_case(FINAL_ARTIFACT_STEM) {
            (0u8, 0u32, stem)
        } else if let Some(n) = epoch_re
            .captures(&stem)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
        {
            (1, n, stem)
        } else {
            (2, 0, stem)
        }
    };
    artifacts.sort_by_key(sort_key);
}

/// 已选项转成下载计划；合成 Run 里的路径就是远端文件名
fn download_plan(repo: RepoId, selected: &[RangeItem], target: &Path) -> TransferPlan {
    let entries = selected
        .iter()
        .map(|item| {
            let remote = item.path.display().to_string();
            PlanEntry {
                epoch: item.epoch,
                local: target.join(&remote),
                remote,
            }
        })
        .collect();
    TransferPlan::new(Direction::Download, repo, entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WizardConfig;
    use crate::console::testing::ScriptedConsole;
    use crate::hub::{HubClient, RepoVisibility};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_remote_files_become_synthetic_run() {
        let artifacts = strings(&[
            "final.safetensors",
            "epoch1.safetensors",
            "epoch10.safetensors",
            "epoch2.safetensors",
        ]);
        let run = run_from_remote_files(&artifacts);

        assert_eq!(run.epoch_count(), 3);
        assert_eq!(run.min_epoch(), Some(1));
        assert_eq!(run.max_epoch(), Some(10));
        assert!(run.final_artifact.is_some());
    }

    #[test]
    fn test_unparseable_names_are_ignored() {
        let artifacts = strings(&["model.safetensors", "checkpoint.safetensors"]);
        let run = run_from_remote_files(&artifacts);
        assert_eq!(run.epoch_count(), 0);
        assert!(run.final_artifact.is_none());
    }

    #[test]
    fn test_sort_final_first_then_numeric_epochs() {
        let mut artifacts = strings(&[
            "epoch10.safetensors",
            "zz.safetensors",
            "epoch2.safetensors",
            "final.safetensors",
        ]);
        sort_artifacts(&mut artifacts);
        assert_eq!(
            artifacts,
            strings(&[
                "final.safetensors",
                "epoch2.safetensors",
                "epoch10.safetensors",
                "zz.safetensors",
            ])
        );
    }

    /// 远端固定三个文件的假 hub
    struct StaticHub;

    #[async_trait]
    impl HubClient for StaticHub {
        async fn whoami(&self) -> Result<String> {
            Ok("alice".to_string())
        }

        async fn create_repo(&self, _repo: &RepoId, _v: RepoVisibility) -> Result<()> {
            Err(anyhow!("not used"))
        }

        async fn list_repos(&self, _author: &str) -> Result<Vec<RepoId>> {
            Ok(vec![RepoId::parse("alice/my-lora").unwrap()])
        }

        async fn list_files(&self, _repo: &RepoId) -> Result<Vec<String>> {
            Ok(strings(&[
                "README.md",
                "epoch1.safetensors",
                "epoch2.safetensors",
                "final.safetensors",
            ]))
        }

        async fn upload_file(&self, _repo: &RepoId, _local: &Path, _remote: &str) -> Result<()> {
            Err(anyhow!("not used"))
        }

        async fn download_file(&self, _repo: &RepoId, remote: &str, dest: &Path) -> Result<()> {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(dest, remote.as_bytes())?;
            Ok(())
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    #[tokio::test]
    async fn test_full_download_flow_with_range() {
        let tmp = tempfile::tempdir().unwrap();
        let config = WizardConfig {
            target_dir_override: Some(tmp.path().to_path_buf()),
            ..Default::default()
        };
        // 仓库 1、按范围、范围模式、FROM 空=全部、包含 final、确认
        let console = ScriptedConsole::new(vec!["1", "1", "1", "", "y", ""]);
        let session = WizardSession {
            config: &config,
            console: &console,
            client: Arc::new(StaticHub),
            user: "alice".to_string(),
            cancel: Arc::new(AtomicBool::new(false)),
        };

        run(&session).await.unwrap();

        let repo_dir = tmp.path().join("my-lora");
        assert!(repo_dir.join("epoch1.safetensors").is_file());
        assert!(repo_dir.join("epoch2.safetensors").is_file());
        assert!(repo_dir.join("final.safetensors").is_file());
        // 非模型文件不下载
        assert!(!repo_dir.join("README.md").exists());
    }

    #[tokio::test]
    async fn test_single_file_download() {
        let tmp = tempfile::tempdir().unwrap();
        let config = WizardConfig {
            target_dir_override: Some(tmp.path().to_path_buf()),
            ..Default::default()
        };
        // 仓库 1、单个文件模式、清单首个是 final、确认
        let console = ScriptedConsole::new(vec!["1", "2", "1", ""]);
        let session = WizardSession {
            config: &config,
            console: &console,
            client: Arc::new(StaticHub),
            user: "alice".to_string(),
            cancel: Arc::new(AtomicBool::new(false)),
        };

        run(&session).await.unwrap();

        let repo_dir = tmp.path().join("my-lora");
        assert!(repo_dir.join("final.safetensors").is_file());
        assert!(!repo_dir.join("epoch1.safetensors").exists());
    }
}
