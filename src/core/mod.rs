//! 核心逻辑：扫描、范围解析、配置聚合、传输引擎

pub mod engine;
pub mod range;
pub mod report;
pub mod scanner;

pub use engine::{
    resolve_download_dir, Direction, EngineConfig, FileOutcome, FileStatus, PlanEntry,
    TargetDirStatus, TransferEngine, TransferOutcome, TransferPlan,
};
pub use range::{EpochRange, RangeError, RangeItem, RangeRequest, RangeSelector};
pub use report::{ConfigAggregator, ReportEntry, SourceNote, TrainingInfoReport};
pub use scanner::{Run, RunScanner, ScanConfig, FINAL_ARTIFACT_STEM};
