pub mod api;
pub mod token;

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

pub use api::HfHubClient;
pub use token::{mask_sensitive, HubToken};

/// 仓库 ID 的长度上限
const MAX_REPO_ID_LEN: usize = 96;

/// 仓库 ID 校验错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepoIdError {
    #[error("repo id must be 1..{MAX_REPO_ID_LEN} characters")]
    BadLength,
    #[error("format must be 'name' or 'namespace/name'")]
    BadShape,
    #[error("segment '{0}' contains invalid characters or '--'/'..'")]
    BadSegment(String),
}

/// 远端仓库标识（`name` 或 `namespace/name`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoId(String);

impl RepoId {
    /// 校验并构造。规则：长度 1..=96，至多一个 `/`，
    /// 每段只含字母数字 `.`/`-`/`_`，首尾不得是 `-` 或 `.`，
    /// 不允许 `--` 和 `..`。
    pub fn parse(raw: &str) -> Result<Self, RepoIdError> {
        if raw.is_empty() || raw.len() > MAX_REPO_ID_LEN {
            return Err(RepoIdError::BadLength);
        }
        let segments: Vec<&str> = raw.split('/').collect();
        if segments.len() > 2 {
            return Err(RepoIdError::BadShape);
        }
        for segment in &segments {
            if !Self::segment_ok(segment) {
                return Err(RepoIdError::BadSegment(segment.to_string()));
            }
        }
        Ok(Self(raw.to_string()))
    }

    fn segment_ok(segment: &str) -> bool {
        if segment.is_empty() || segment.contains("--") || segment.contains("..") {
            return false;
        }
        let bytes = segment.as_bytes();
        let edge_ok = |b: u8| b.is_ascii_alphanumeric();
        if !edge_ok(bytes[0]) || !edge_ok(bytes[bytes.len() - 1]) {
            return false;
        }
        segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b'_')
    }

    /// 没写命名空间时补上用户名
    pub fn with_namespace(user: &str, raw: &str) -> Result<Self, RepoIdError> {
        if raw.contains('/') {
            Self::parse(raw)
        } else {
            Self::parse(&format!("{}/{}", user, raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 不带命名空间的仓库名
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for RepoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 仓库可见性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoVisibility {
    Private,
    Public,
}

/// 远端仓库协作者接口
///
/// 所有操作都是阻塞式的单文件操作，成功/失败二元结果，
/// 失败时附带人类可读的原因。核心不感知任何网络细节。
#[async_trait]
pub trait HubClient: Send + Sync {
    /// 当前令牌对应的账号名
    async fn whoami(&self) -> Result<String>;

    /// 以指定可见性创建仓库；名字冲突或权限不足返回错误
    async fn create_repo(&self, repo: &RepoId, visibility: RepoVisibility) -> Result<()>;

    /// 列出某账号拥有的仓库（有序）
    async fn list_repos(&self, author: &str) -> Result<Vec<RepoId>>;

    /// 列出仓库内的远端文件路径
    async fn list_files(&self, repo: &RepoId) -> Result<Vec<String>>;

    /// 上传单个本地文件到远端路径
    async fn upload_file(&self, repo: &RepoId, local: &Path, remote: &str) -> Result<()>;

    /// 下载远端文件写入 dest（调用方负责原子落盘）
    async fn download_file(&self, repo: &RepoId, remote: &str, dest: &Path) -> Result<()>;

    /// 用于日志的名字
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_repo_ids() {
        assert!(RepoId::parse("MyLoRA_v1").is_ok());
        assert!(RepoId::parse("user/MyLoRA_v1").is_ok());
        assert!(RepoId::parse("user/my.lora-v2").is_ok());
    }

    #[test]
    fn test_invalid_repo_ids() {
        assert_eq!(RepoId::parse("").unwrap_err(), RepoIdError::BadLength);
        assert_eq!(
            RepoId::parse("a/b/c").unwrap_err(),
            RepoIdError::BadShape
        );
        assert!(matches!(
            RepoId::parse("user/-leading").unwrap_err(),
            RepoIdError::BadSegment(_)
        ));
        assert!(matches!(
            RepoId::parse("user/a--b").unwrap_err(),
            RepoIdError::BadSegment(_)
        ));
        assert!(matches!(
            RepoId::parse("user/a..b").unwrap_err(),
            RepoIdError::BadSegment(_)
        ));
        assert_eq!(
            RepoId::parse(&"x".repeat(97)).unwrap_err(),
            RepoIdError::BadLength
        );
    }

    #[test]
    fn test_with_namespace() {
        let id = RepoId::with_namespace("alice", "MyLoRA").unwrap();
        assert_eq!(id.as_str(), "alice/MyLoRA");
        assert_eq!(id.name(), "MyLoRA");

        let id = RepoId::with_namespace("alice", "bob/Theirs").unwrap();
        assert_eq!(id.as_str(), "bob/Theirs");
    }
}
