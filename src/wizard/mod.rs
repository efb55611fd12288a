//! 交互式向导
//!
//! 上传和下载两条流程共用的会话状态与提问逻辑。
//! 向导层只负责把用户输入翻译成核心层的请求，自身不做传输。

pub mod download;
pub mod upload;

use crate::config::WizardConfig;
use crate::console::Console;
use crate::core::{EpochRange, RangeRequest, RangeSelector, Run, TransferOutcome};
use crate::hub::HubClient;
use anyhow::Result;
use chrono::{Local, TimeZone};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// 一次向导会话的共享状态
pub struct WizardSession<'a> {
    pub config: &'a WizardConfig,
    pub console: &'a dyn Console,
    pub client: Arc<dyn HubClient>,
    /// 令牌对应的账号名
    pub user: String,
    /// Ctrl-C 处理器共享的取消标志
    pub cancel: Arc<AtomicBool>,
}

/// 列表展示用的 run 描述行
pub(crate) fn describe_run(run: &Run) -> String {
    let mut parts = vec![run.root.display().to_string()];

    match (run.min_epoch(), run.max_epoch()) {
        (Some(min), Some(max)) => {
            parts.push(format!("{} epochs ({}-{})", run.epoch_count(), min, max))
        }
        _ => parts.push("无编号 epoch".to_string()),
    }
    if run.final_artifact.is_some() {
        parts.push("含 final".to_string());
    }
    if run.inconsistent {
        parts.push("⚠ 编号有歧义".to_string());
    }
    if let Some(ts) = run.modified_time {
        if let Some(time) = Local.timestamp_opt(ts, 0).single() {
            parts.push(time.format("%Y-%m-%d %H:%M").to_string());
        }
    }
    parts.join("  |  ")
}

/// 向用户询问 epoch 范围并解析；非法范围提示后重试。
/// 空的 FROM 输入表示全部 epoch。
pub(crate) fn prompt_range<'a>(console: &dyn Console, run: &'a Run) -> Result<EpochRange<'a>> {
    // 只有终端文件的 run 没有范围可选
    if run.epochs.is_empty() {
        console.say("该 run 只有 final 文件。");
        return Ok(RangeSelector::resolve(run, RangeRequest::Final, false)?);
    }

    if run.final_artifact.is_some() {
        let options = vec![
            "按 epoch 范围选择".to_string(),
            "仅 final 文件".to_string(),
        ];
        if console.choose("要传输什么?", &options, 0)? == 1 {
            return Ok(RangeSelector::resolve(run, RangeRequest::Final, false)?);
        }
    }

    let min = run.min_epoch().unwrap_or(0);
    let max = run.max_epoch().unwrap_or(0);
    console.say(&format!(
        "可用 epoch: {}-{}（共 {} 个）",
        min,
        max,
        run.epoch_count()
    ));

    loop {
        let request = match console.read_int(&format!("FROM epoch [{}-{}] (Enter=全部): ", min, max))? {
            None => RangeRequest::All,
            Some(from) => match console.read_int("TO epoch (Enter=仅这一个): ")? {
                None => RangeRequest::Single(from),
                Some(to) => RangeRequest::Span { from, to },
            },
        };

        let include_final = run.final_artifact.is_some()
            && console.confirm("同时包含 final 文件?", false)?;

        match RangeSelector::resolve(run, request, include_final) {
            Ok(range) => {
                tracing::info!(
                    "范围已确定: {:?}, final={}, 共 {} 个文件",
                    range.bounds,
                    range.includes_final,
                    range.len()
                );
                return Ok(range);
            }
            Err(e) => console.say(&format!("❌ {}，请重新输入。", e)),
        }
    }
}

/// 打印一次传输的逐文件结果和统计
pub(crate) fn print_outcome(console: &dyn Console, outcome: &TransferOutcome) {
    console.say("");
    for file in &outcome.files {
        use crate::core::FileStatus::*;
        let line = match &file.status {
            Succeeded => format!("  ✅ {}", file.remote),
            SkippedExisting => format!("  ⏭️ {} (已存在)", file.remote),
            Failed(reason) => format!("  ❌ {} - {}", file.remote, reason),
            NotAttempted => format!("  ⏸️ {} (未尝试)", file.remote),
        };
        console.say(&line);
    }
    console.say(&format!(
        "\n成功 {}  跳过 {}  失败 {}  未尝试 {}",
        outcome.succeeded(),
        outcome.skipped(),
        outcome.failed(),
        outcome.not_attempted()
    ));
}
