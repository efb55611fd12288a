//! 传输引擎
//!
//! 消费一个不可变的 TransferPlan，逐个文件顺序执行（不并发），
//! 返回逐文件的 TransferOutcome。单个文件失败不会中止整个操作；
//! 只有整组零成功、或新仓库创建失败才算操作失败。

use crate::config::WizardConfig;
use crate::core::range::EpochRange;
use crate::hub::{HubClient, RepoId, RepoVisibility};
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 下载目标目录的约定名字
pub const TARGET_DIR_NAME: &str = "loras";

/// 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// 计划里的一个文件
#[derive(Debug, Clone)]
pub struct PlanEntry {
    /// epoch 编号；终端文件为 None
    pub epoch: Option<u32>,
    pub local: PathBuf,
    pub remote: String,
}

/// 一次操作的完整工作单元。构建一次，执行一次，执行中不可变。
#[derive(Debug)]
pub struct TransferPlan {
    pub id: String,
    pub direction: Direction,
    pub repo: RepoId,
    pub entries: Vec<PlanEntry>,
}

impl TransferPlan {
    pub fn new(direction: Direction, repo: RepoId, entries: Vec<PlanEntry>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            direction,
            repo,
            entries,
        }
    }

    /// 从已解析的范围构建上传计划。远端名统一为
    /// `epoch<N>.<ext>` / `final.<ext>`，不管本地文件叫什么。
    pub fn for_upload(repo: RepoId, range: &EpochRange<'_>, extension: &str) -> Self {
        let entries = range
            .items
            .iter()
            .map(|item| {
                let remote = match item.epoch {
                    Some(n) => format!("epoch{}.{}", n, extension),
                    None => format!("final.{}", extension),
                };
                PlanEntry {
                    epoch: item.epoch,
                    local: item.path.clone(),
                    remote,
                }
            })
            .collect();
        Self::new(Direction::Upload, repo, entries)
    }
}

/// 单个文件的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    /// 传输成功
    Succeeded,
    /// 目标已存在且非空，跳过（下载幂等重跑）
    SkippedExisting,
    /// 失败及原因
    Failed(String),
    /// 取消后未再尝试
    NotAttempted,
}

/// 逐文件结果记录
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub remote: String,
    pub local: PathBuf,
    pub status: FileStatus,
}

/// 整个操作的结果
#[derive(Debug)]
pub struct TransferOutcome {
    pub plan_id: String,
    pub direction: Direction,
    pub files: Vec<FileOutcome>,
}

impl TransferOutcome {
    pub fn succeeded(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Succeeded))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::SkippedExisting))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Failed(_)))
    }

    pub fn not_attempted(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::NotAttempted))
    }

    fn count(&self, pred: impl Fn(&FileStatus) -> bool) -> usize {
        self.files.iter().filter(|f| pred(&f.status)).count()
    }

    /// 整组计划一个文件都没落地：操作级失败
    pub fn is_total_failure(&self) -> bool {
        !self.files.is_empty() && self.succeeded() == 0 && self.skipped() == 0 && self.failed() > 0
    }
}

/// 下载目标目录的解析结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetDirStatus {
    /// 环境变量覆盖
    Override,
    /// 工作区根下已有同名目录
    FoundExisting,
    /// 在工作区根下新建
    Created,
    /// 工作区根不可用，回退到当前目录
    CreatedFallback,
}

/// 引擎配置
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 单文件最大重试次数
    pub max_retries: u32,
    /// 重试基础延迟（毫秒），指数退避
    pub retry_base_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay_ms: 2000,
        }
    }
}

/// 传输引擎
pub struct TransferEngine {
    client: Arc<dyn HubClient>,
    config: EngineConfig,
    cancelled: Arc<AtomicBool>,
}

impl TransferEngine {
    pub fn new(client: Arc<dyn HubClient>) -> Self {
        Self::with_config(client, EngineConfig::default())
    }

    pub fn with_config(client: Arc<dyn HubClient>, config: EngineConfig) -> Self {
        Self {
            client,
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 协作式取消标志：置位后完成当前文件即停
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// 复用外部持有的取消标志（如信号处理器）
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancelled = flag;
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 执行计划。`create_repo` 给出可见性时先创建新仓库，
    /// 创建失败则在碰任何文件之前整体中止。
    pub async fn execute(
        &self,
        plan: &TransferPlan,
        create_repo: Option<RepoVisibility>,
    ) -> Result<TransferOutcome> {
        info!(
            "开始传输: plan={} {:?} repo={} files={}",
            plan.id,
            plan.direction,
            plan.repo,
            plan.entries.len()
        );

        if let Some(visibility) = create_repo {
            if let Err(e) = self.client.create_repo(&plan.repo, visibility).await {
                error!("创建仓库失败，操作中止: {}", e);
                bail!("cannot create repository '{}': {}", plan.repo, e);
            }
            info!("仓库已创建: {} ({:?})", plan.repo, visibility);
        }

        let mut files = Vec::with_capacity(plan.entries.len());
        let mut stopped = false;

        // 严格顺序执行，一次一个文件
        for entry in &plan.entries {
            if stopped || self.is_cancelled() {
                // 当前文件之前已完成；之后的全部记为未尝试
                if !stopped {
                    warn!("收到取消请求，剩余文件不再尝试");
                    stopped = true;
                }
                files.push(FileOutcome {
                    remote: entry.remote.clone(),
                    local: entry.local.clone(),
                    status: FileStatus::NotAttempted,
                });
                continue;
            }

            let status = match plan.direction {
                Direction::Upload => self.upload_one(&plan.repo, entry).await,
                Direction::Download => self.download_one(&plan.repo, entry).await,
            };

            match &status {
                FileStatus::Succeeded => info!("完成: {}", entry.remote),
                FileStatus::SkippedExisting => {
                    info!("已存在，跳过: {}", entry.local.display())
                }
                FileStatus::Failed(reason) => {
                    warn!("失败（继续下一个）: {} - {}", entry.remote, reason)
                }
                FileStatus::NotAttempted => {}
            }

            files.push(FileOutcome {
                remote: entry.remote.clone(),
                local: entry.local.clone(),
                status,
            });
        }

        let outcome = TransferOutcome {
            plan_id: plan.id.clone(),
            direction: plan.direction,
            files,
        };
        info!(
            "传输结束: 成功 {}, 跳过 {}, 失败 {}, 未尝试 {}",
            outcome.succeeded(),
            outcome.skipped(),
            outcome.failed(),
            outcome.not_attempted()
        );
        Ok(outcome)
    }

    /// 上传单个文件。远端已存在也照传：用户是刻意选的这个范围。
    async fn upload_one(&self, repo: &RepoId, entry: &PlanEntry) -> FileStatus {
        if !entry.local.is_file() {
            return FileStatus::Failed(format!("local file not found: {}", entry.local.display()));
        }

        match self
            .with_retry(entry, || {
                self.client.upload_file(repo, &entry.local, &entry.remote)
            })
            .await
        {
            Ok(()) => FileStatus::Succeeded,
            Err(e) => FileStatus::Failed(e.to_string()),
        }
    }

    /// 下载单个文件：目标非空则跳过；否则写临时文件再原子改名，
    /// 中途崩溃不会留下截断的目标文件。
    async fn download_one(&self, repo: &RepoId, entry: &PlanEntry) -> FileStatus {
        if let Ok(meta) = std::fs::metadata(&entry.local) {
            if meta.is_file() && meta.len() > 0 {
                return FileStatus::SkippedExisting;
            }
        }

        let file_name = entry
            .local
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("download");
        let tmp_path = entry.local.with_file_name(format!("{}.tmp", file_name));

        // 离开作用域时清掉残留的临时文件；成功改名后解除
        let guard = scopeguard::guard(tmp_path.clone(), |p| {
            let _ = std::fs::remove_file(p);
        });

        let result = self
            .with_retry(entry, || {
                self.client.download_file(repo, &entry.remote, &tmp_path)
            })
            .await;

        match result {
            Ok(()) => match std::fs::rename(&tmp_path, &entry.local) {
                Ok(()) => {
                    let _ = scopeguard::ScopeGuard::into_inner(guard);
                    FileStatus::Succeeded
                }
                Err(e) => FileStatus::Failed(format!("rename into place failed: {}", e)),
            },
            Err(e) => FileStatus::Failed(e.to_string()),
        }
    }

    /// 指数退避重试；取消标志置位后不再重试
    async fn with_retry<F, Fut>(&self, entry: &PlanEntry, op: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let mut last_err = None;
        for attempt in 0..=self.config.max_retries {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if attempt < self.config.max_retries && !self.is_cancelled() {
                        let delay = self.config.retry_base_delay_ms * (1 << attempt);
                        warn!(
                            "{} 失败，{}ms 后重试 ({}/{}): {}",
                            entry.remote,
                            delay,
                            attempt + 1,
                            self.config.max_retries,
                            e
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.expect("at least one attempt was made"))
    }
}

/// 解析下载目标目录。
/// 优先级：环境覆盖 > 工作区根下已有的 `loras` > 在工作区根新建 >
/// 回退到当前目录下的 `loras`。回退是确定性的，并且只记录一次日志。
pub fn resolve_download_dir(config: &WizardConfig) -> Result<(PathBuf, TargetDirStatus)> {
    if let Some(ref dir) = config.target_dir_override {
        std::fs::create_dir_all(dir)?;
        info!("下载目录（环境覆盖）: {}", dir.display());
        return Ok((dir.clone(), TargetDirStatus::Override));
    }

    let conventional = config.workspace_root.join(TARGET_DIR_NAME);
    if conventional.is_dir() {
        info!("下载目录（已存在）: {}", conventional.display());
        return Ok((conventional, TargetDirStatus::FoundExisting));
    }

    if config.workspace_root.is_dir() {
        match std::fs::create_dir_all(&conventional) {
            Ok(()) => {
                info!("下载目录（已创建）: {}", conventional.display());
                return Ok((conventional, TargetDirStatus::Created));
            }
            Err(e) => {
                debug!(
                    "在工作区根创建 {} 失败: {}",
                    conventional.display(),
                    e
                );
            }
        }
    }

    // 工作区根不可用：确定性回退到当前目录
    let fallback = PathBuf::from(".").join(TARGET_DIR_NAME);
    std::fs::create_dir_all(&fallback)
        .map_err(|e| anyhow::anyhow!("cannot create fallback directory {}: {}", fallback.display(), e))?;
    warn!(
        "工作区根 {} 不可用，回退到 {}",
        config.workspace_root.display(),
        fallback.display()
    );
    Ok((fallback, TargetDirStatus::CreatedFallback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubClient;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    /// 内存中的假 hub：按远端路径存内容，可指定必败的文件
    struct FakeHub {
        files: Mutex<HashMap<String, Vec<u8>>>,
        fail_remotes: Vec<String>,
        upload_calls: Mutex<Vec<String>>,
        download_calls: Mutex<Vec<String>>,
        fail_create_repo: bool,
    }

    impl FakeHub {
        fn new() -> Self {
            Self {
                files: Mutex::new(HashMap::new()),
                fail_remotes: vec![],
                upload_calls: Mutex::new(vec![]),
                download_calls: Mutex::new(vec![]),
                fail_create_repo: false,
            }
        }

        fn with_files(remotes: &[(&str, &[u8])]) -> Self {
            let hub = Self::new();
            {
                let mut files = hub.files.lock().unwrap();
                for (remote, data) in remotes {
                    files.insert(remote.to_string(), data.to_vec());
                }
            }
            hub
        }
    }

    #[async_trait]
    impl HubClient for FakeHub {
        async fn whoami(&self) -> Result<String> {
            Ok("tester".to_string())
        }

        async fn create_repo(&self, _repo: &RepoId, _v: RepoVisibility) -> Result<()> {
            if self.fail_create_repo {
                return Err(anyhow!("name already taken"));
            }
            Ok(())
        }

        async fn list_repos(&self, _author: &str) -> Result<Vec<RepoId>> {
            Ok(vec![])
        }

        async fn list_files(&self, _repo: &RepoId) -> Result<Vec<String>> {
            Ok(self.files.lock().unwrap().keys().cloned().collect())
        }

        async fn upload_file(&self, _repo: &RepoId, local: &Path, remote: &str) -> Result<()> {
            self.upload_calls.lock().unwrap().push(remote.to_string());
            if self.fail_remotes.iter().any(|r| r == remote) {
                return Err(anyhow!("simulated network failure"));
            }
            let data = std::fs::read(local)?;
            self.files.lock().unwrap().insert(remote.to_string(), data);
            Ok(())
        }

        async fn download_file(&self, _repo: &RepoId, remote: &str, dest: &Path) -> Result<()> {
            self.download_calls.lock().unwrap().push(remote.to_string());
            if self.fail_remotes.iter().any(|r| r == remote) {
                return Err(anyhow!("simulated network failure"));
            }
            let files = self.files.lock().unwrap();
            let data = files
                .get(remote)
                .ok_or_else(|| anyhow!("remote file not found: {}", remote))?;
            std::fs::write(dest, data)?;
            Ok(())
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            max_retries: 0,
            retry_base_delay_ms: 1,
        }
    }

    fn repo() -> RepoId {
        RepoId::parse("tester/my-lora").unwrap()
    }

    fn upload_plan(dir: &Path, count: u32) -> TransferPlan {
        let entries = (1..=count)
            .map(|n| {
                let local = dir.join(format!("epoch{}.safetensors", n));
                std::fs::write(&local, format!("weights-{}", n)).unwrap();
                PlanEntry {
                    epoch: Some(n),
                    local,
                    remote: format!("epoch{}.safetensors", n),
                }
            })
            .collect();
        TransferPlan::new(Direction::Upload, repo(), entries)
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_remaining_uploads() {
        let tmp = tempfile::tempdir().unwrap();
        let mut hub = FakeHub::new();
        hub.fail_remotes = vec!["epoch2.safetensors".to_string()];
        let engine = TransferEngine::with_config(Arc::new(hub), fast_config());

        let plan = upload_plan(tmp.path(), 4);
        let outcome = engine.execute(&plan, None).await.unwrap();

        assert_eq!(outcome.succeeded(), 3);
        assert_eq!(outcome.failed(), 1);
        assert!(!outcome.is_total_failure());
    }

    #[tokio::test]
    async fn test_zero_successes_is_total_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let mut hub = FakeHub::new();
        hub.fail_remotes = (1..=3).map(|n| format!("epoch{}.safetensors", n)).collect();
        let engine = TransferEngine::with_config(Arc::new(hub), fast_config());

        let plan = upload_plan(tmp.path(), 3);
        let outcome = engine.execute(&plan, None).await.unwrap();

        assert_eq!(outcome.succeeded(), 0);
        assert!(outcome.is_total_failure());
    }

    #[tokio::test]
    async fn test_repo_creation_failure_aborts_before_any_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut hub = FakeHub::new();
        hub.fail_create_repo = true;
        let hub = Arc::new(hub);
        let engine = TransferEngine::with_config(hub.clone(), fast_config());

        let plan = upload_plan(tmp.path(), 2);
        let result = engine.execute(&plan, Some(RepoVisibility::Private)).await;

        assert!(result.is_err());
        assert!(hub.upload_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_existing_remote_is_reuploaded() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = Arc::new(FakeHub::with_files(&[("epoch1.safetensors", b"old")]));
        let engine = TransferEngine::with_config(hub.clone(), fast_config());

        let plan = upload_plan(tmp.path(), 1);
        let outcome = engine.execute(&plan, None).await.unwrap();

        assert_eq!(outcome.succeeded(), 1);
        assert_eq!(outcome.skipped(), 0);
        assert_eq!(
            hub.files.lock().unwrap().get("epoch1.safetensors").unwrap(),
            b"weights-1"
        );
    }

    #[tokio::test]
    async fn test_download_is_atomic_and_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = Arc::new(FakeHub::with_files(&[
            ("epoch1.safetensors", b"w1" as &[u8]),
            ("epoch2.safetensors", b"w2"),
        ]));
        let engine = TransferEngine::with_config(hub.clone(), fast_config());

        let entries: Vec<PlanEntry> = (1..=2)
            .map(|n| PlanEntry {
                epoch: Some(n),
                local: tmp.path().join(format!("epoch{}.safetensors", n)),
                remote: format!("epoch{}.safetensors", n),
            })
            .collect();
        let plan = TransferPlan::new(Direction::Download, repo(), entries.clone());

        let outcome = engine.execute(&plan, None).await.unwrap();
        assert_eq!(outcome.succeeded(), 2);
        assert_eq!(
            std::fs::read(tmp.path().join("epoch1.safetensors")).unwrap(),
            b"w1"
        );
        // 没有遗留的临时文件
        assert!(!tmp.path().join("epoch1.safetensors.tmp").exists());

        // 重跑：全部 skipped-already-present，不再请求远端
        let before = hub.download_calls.lock().unwrap().len();
        let plan = TransferPlan::new(Direction::Download, repo(), entries);
        let outcome = engine.execute(&plan, None).await.unwrap();
        assert_eq!(outcome.skipped(), 2);
        assert_eq!(outcome.succeeded(), 0);
        assert_eq!(hub.download_calls.lock().unwrap().len(), before);
    }

    #[tokio::test]
    async fn test_failed_download_leaves_no_partial_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let mut hub = FakeHub::with_files(&[("epoch1.safetensors", b"w1" as &[u8])]);
        hub.fail_remotes = vec!["epoch1.safetensors".to_string()];
        let engine = TransferEngine::with_config(Arc::new(hub), fast_config());

        let plan = TransferPlan::new(
            Direction::Download,
            repo(),
            vec![PlanEntry {
                epoch: Some(1),
                local: tmp.path().join("epoch1.safetensors"),
                remote: "epoch1.safetensors".to_string(),
            }],
        );
        let outcome = engine.execute(&plan, None).await.unwrap();

        assert_eq!(outcome.failed(), 1);
        assert!(!tmp.path().join("epoch1.safetensors").exists());
        assert!(!tmp.path().join("epoch1.safetensors.tmp").exists());
    }

    #[tokio::test]
    async fn test_cancel_marks_remaining_not_attempted() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = Arc::new(FakeHub::new());
        let engine = TransferEngine::with_config(hub, fast_config());
        // 开始前就置位：所有文件都不应被尝试
        engine.cancel_flag().store(true, Ordering::SeqCst);

        let plan = upload_plan(tmp.path(), 3);
        let outcome = engine.execute(&plan, None).await.unwrap();

        assert_eq!(outcome.not_attempted(), 3);
        assert_eq!(outcome.succeeded(), 0);
        assert!(!outcome.is_total_failure());
    }

    #[test]
    fn test_resolve_download_dir_prefers_existing_then_falls_back() {
        let tmp = tempfile::tempdir().unwrap();
        let workspace = tmp.path().join("workspace");
        std::fs::create_dir_all(workspace.join(TARGET_DIR_NAME)).unwrap();

        let config = WizardConfig {
            workspace_root: workspace.clone(),
            ..Default::default()
        };
        let (dir, status) = resolve_download_dir(&config).unwrap();
        assert_eq!(status, TargetDirStatus::FoundExisting);
        assert_eq!(dir, workspace.join(TARGET_DIR_NAME));

        // 工作区根不存在：回退到当前目录
        let config = WizardConfig {
            workspace_root: tmp.path().join("missing-root"),
            ..Default::default()
        };
        let (dir, status) = resolve_download_dir(&config).unwrap();
        assert_eq!(status, TargetDirStatus::CreatedFallback);
        assert!(dir.ends_with(TARGET_DIR_NAME));
        let _ = std::fs::remove_dir(dir);
    }

    #[test]
    fn test_resolve_download_dir_env_override() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("custom-target");
        let config = WizardConfig {
            target_dir_override: Some(target.clone()),
            ..Default::default()
        };
        let (dir, status) = resolve_download_dir(&config).unwrap();
        assert_eq!(status, TargetDirStatus::Override);
        assert_eq!(dir, target);
        assert!(target.is_dir());
    }
}
