//! 上传流程
//!
//! 选仓库（新建或已有）→ 扫描并选 run → 选 epoch 范围 →
//! 聚合训练配置 → 顺序上传。新仓库在碰任何文件之前创建，
//! 创建失败整个操作不开始。

use super::{describe_run, print_outcome, prompt_range, WizardSession};
use crate::console::Console;
use crate::core::{
    ConfigAggregator, PlanEntry, Run, RunScanner, ScanConfig, TransferEngine, TransferPlan,
};
use crate::hub::{RepoId, RepoVisibility};
use anyhow::{bail, Result};
use tracing::{info, warn};

/// 上传时训练信息摘要的远端文件名
const TRAINING_INFO_NAME: &str = "training_info.txt";

pub async fn run(session: &WizardSession<'_>) -> Result<()> {
    let console = session.console;

    // 1. 仓库：已有列表 + 新建选项
    let existing = session.client.list_repos(&session.user).await?;
    let (repo, create) = prompt_repo(console, &session.user, &existing)?;

    // 2. 扫描 run
    let scanner = RunScanner::new(ScanConfig {
        max_depth: session.config.max_scan_depth,
        artifact_extension: session.config.artifact_extension.clone(),
        ..Default::default()
    });
    let runs = scanner.scan(&session.config.usable_search_roots())?;
    if runs.is_empty() {
        bail!(
            "在搜索根下没有找到任何训练输出（已检查: {:?}）",
            session.config.usable_search_roots()
        );
    }

    // 3. 选 run
    let descriptions: Vec<String> = runs.iter().map(describe_run).collect();
    let run = &runs[console.choose("发现以下训练输出:", &descriptions, 0)?];
    for warning in &run.warnings {
        console.say(&format!("⚠ {}", warning));
    }

    // 4. 范围
    let range = prompt_range(console, run)?;

    // 5. 计划 + 训练信息摘要
    let mut plan = TransferPlan::for_upload(repo, &range, &session.config.artifact_extension);
    attach_training_info(&mut plan, run);

    // 6. 确认后执行
    console.say(&format!(
        "\n将上传 {} 个文件到 {}",
        plan.entries.len(),
        plan.repo
    ));
    if !console.confirm("开始上传?", true)? {
        console.say("已取消。");
        return Ok(());
    }
    if session.cancel.load(std::sync::atomic::Ordering::SeqCst) {
        console.say("已取消。");
        return Ok(());
    }

    let mut engine = TransferEngine::new(session.client.clone());
    engine.set_cancel_flag(session.cancel.clone());
    let outcome = engine.execute(&plan, create).await?;

    print_outcome(console, &outcome);
    if outcome.is_total_failure() {
        bail!("所有文件都上传失败，请检查网络和令牌权限后重试");
    }
    Ok(())
}

/// 让用户选一个已有仓库或新建一个。
/// 返回仓库 ID；新建时附带可见性，表示执行前需要先创建。
fn prompt_repo(
    console: &dyn Console,
    user: &str,
    existing: &[RepoId],
) -> Result<(RepoId, Option<RepoVisibility>)> {
    let mut options = vec!["创建新仓库".to_string()];
    options.extend(existing.iter().map(|r| r.to_string()));

    let choice = console.choose("上传到哪个仓库?", &options, 0)?;
    if choice > 0 {
        return Ok((existing[choice - 1].clone(), None));
    }

    // 新仓库：名字校验不过就重试
    let repo = loop {
        let input = console.read_line("新仓库名 (可写 namespace/name): ")?;
        match RepoId::with_namespace(user, &input) {
            Ok(repo) => break repo,
            Err(e) => console.say(&format!("❌ {}，请重新输入。", e)),
        }
    };

    let visibility_options = vec!["私有".to_string(), "公开".to_string()];
    let visibility = match console.choose("仓库可见性?", &visibility_options, 0)? {
        0 => RepoVisibility::Private,
        _ => RepoVisibility::Public,
    };
    Ok((repo, Some(visibility)))
}

/// 聚合 run 附近的训练配置并把摘要加进上传计划。
/// 摘要生成失败只警告，不影响模型文件上传。
fn attach_training_info(plan: &mut TransferPlan, run: &Run) {
    let candidates = ConfigAggregator::discover_candidates(&run.root);
    let report = ConfigAggregator::aggregate(&candidates);
    if report.is_empty() {
        info!("run {} 附近没有可识别的训练配置", run.root.display());
        return;
    }

    let local = run.root.join(TRAINING_INFO_NAME);
    match report.write_to(&local) {
        Ok(()) => {
            plan.entries.push(PlanEntry {
                epoch: None,
                local,
                remote: TRAINING_INFO_NAME.to_string(),
            });
        }
        Err(e) => warn!("训练信息摘要写入失败，跳过: {}", e),
    }
}
