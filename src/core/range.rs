//! epoch 范围解析
//!
//! 把用户输入的范围请求（区间、单个 epoch、全部、终端文件）
//! 解析成针对一个 Run 的不可变选择。越界的 epoch 直接报错，从不悄悄收缩。

use crate::core::scanner::Run;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

/// 范围解析错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    /// 请求的 epoch 在该 run 中不存在
    #[error("epoch {0} not found in this run")]
    EpochNotFound(u32),
    /// run 没有任何编号 epoch
    #[error("run has no numbered epochs")]
    NoEpochs,
    /// run 没有终端模型文件
    #[error("run has no final artifact")]
    NoFinalArtifact,
}

/// 用户的范围请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// 全部已知 epoch
    All,
    /// 单个 epoch
    Single(u32),
    /// 闭区间 [from, to]
    Span { from: u32, to: u32 },
    /// 只要终端模型文件
    Final,
}

/// 范围里的一项
#[derive(Debug, Clone)]
pub struct RangeItem {
    /// epoch 编号；终端文件为 None
    pub epoch: Option<u32>,
    pub path: PathBuf,
}

/// 针对一个 Run 的已验证选择，构造后不可变
#[derive(Debug)]
pub struct EpochRange<'a> {
    pub run: &'a Run,
    /// 实际生效的闭区间（仅终端文件时为 None）
    pub bounds: Option<(u32, u32)>,
    /// 终端文件是否包含在内
    pub includes_final: bool,
    /// 按 epoch 升序排列的模型文件，终端文件排在最后
    pub items: Vec<RangeItem>,
}

impl<'a> EpochRange<'a> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// 范围选择器
pub struct RangeSelector;

impl RangeSelector {
    /// 解析请求。`include_final` 只对编号范围生效：
    /// 终端文件从不被隐式混入，必须显式要求。
    pub fn resolve<'a>(
        run: &'a Run,
        request: RangeRequest,
        include_final: bool,
    ) -> Result<EpochRange<'a>, RangeError> {
        if let RangeRequest::Final = request {
            let path = run
                .final_artifact
                .clone()
                .ok_or(RangeError::NoFinalArtifact)?;
            return Ok(EpochRange {
                run,
                bounds: None,
                includes_final: true,
                items: vec![RangeItem { epoch: None, path }],
            });
        }

        let (from, to) = match request {
            RangeRequest::All => {
                let from = run.min_epoch().ok_or(RangeError::NoEpochs)?;
                let to = run.max_epoch().ok_or(RangeError::NoEpochs)?;
                (from, to)
            }
            RangeRequest::Single(n) => (n, n),
            RangeRequest::Span { mut from, mut to } => {
                if from > to {
                    // 上下界写反了：交换而不是报错
                    warn!("范围上下界写反 ({}..{})，已交换", from, to);
                    std::mem::swap(&mut from, &mut to);
                }
                (from, to)
            }
            RangeRequest::Final => unreachable!(),
        };

        // 两端都必须是已知 epoch；不存在就报错，绝不收缩
        if !run.epochs.contains_key(&from) {
            return Err(RangeError::EpochNotFound(from));
        }
        if !run.epochs.contains_key(&to) {
            return Err(RangeError::EpochNotFound(to));
        }

        let mut items: Vec<RangeItem> = run
            .epochs
            .range(from..=to)
            .map(|(epoch, path)| RangeItem {
                epoch: Some(*epoch),
                path: path.clone(),
            })
            .collect();

        if include_final {
            let path = run
                .final_artifact
                .clone()
                .ok_or(RangeError::NoFinalArtifact)?;
            items.push(RangeItem { epoch: None, path });
        }

        Ok(EpochRange {
            run,
            bounds: Some((from, to)),
            includes_final: include_final,
            items,
        })
    }
}
