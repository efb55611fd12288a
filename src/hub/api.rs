//! HuggingFace Hub REST 客户端
//!
//! 使用的端点：
//! - GET  /api/whoami-v2                  账号信息
//! - POST /api/repos/create               创建仓库
//! - GET  /api/models?author=<user>       列出账号的模型仓库
//! - GET  /api/models/<repo>              仓库元数据（siblings 即文件列表）
//! - POST /api/models/<repo>/commit/main  NDJSON 提交（上传）
//! - GET  /<repo>/resolve/main/<file>     下载文件内容

use super::{mask_sensitive, HubClient, HubToken, RepoId, RepoVisibility};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use futures::StreamExt;
use serde::Deserialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

pub struct HfHubClient {
    http: reqwest::Client,
    endpoint: String,
    token: HubToken,
    name: String,
}

#[derive(Deserialize)]
struct WhoamiResponse {
    name: String,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Deserialize)]
struct Sibling {
    rfilename: String,
}

#[derive(Deserialize)]
struct ModelInfo {
    #[serde(default)]
    siblings: Vec<Sibling>,
}

impl HfHubClient {
    pub fn new(token: HubToken) -> Result<Self> {
        Self::with_endpoint(token, DEFAULT_ENDPOINT)
    }

    pub fn with_endpoint(token: HubToken, endpoint: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("lorawizard/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let name = format!("hf:{}", endpoint);
        Ok(Self {
            http,
            endpoint,
            token,
            name,
        })
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.bearer_auth(self.token.expose())
    }

    /// 把响应转成错误前先掩码令牌，保证它不进日志
    async fn error_from(&self, what: &str, resp: reqwest::Response) -> anyhow::Error {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let body = mask_sensitive(&body, &self.token);
        anyhow!("{} failed: HTTP {} {}", what, status, body.trim())
    }

    /// 远端路径逐段编码，保留分隔符
    fn encode_remote_path(remote: &str) -> String {
        remote
            .split('/')
            .map(|seg| urlencoding::encode(seg).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[async_trait]
impl HubClient for HfHubClient {
    async fn whoami(&self) -> Result<String> {
        let url = format!("{}/api/whoami-v2", self.endpoint);
        let resp = self.auth(self.http.get(&url)).send().await?;
        if !resp.status().is_success() {
            return Err(self.error_from("whoami", resp).await);
        }
        let info: WhoamiResponse = resp.json().await?;
        Ok(info.name)
    }

    async fn create_repo(&self, repo: &RepoId, visibility: RepoVisibility) -> Result<()> {
        let url = format!("{}/api/repos/create", self.endpoint);
        let (organization, name) = match repo.as_str().split_once('/') {
            Some((ns, name)) => (Some(ns), name),
            None => (None, repo.as_str()),
        };
        let body = serde_json::json!({
            "type": "model",
            "name": name,
            "organization": organization,
            "private": matches!(visibility, RepoVisibility::Private),
        });

        let resp = self.auth(self.http.post(&url)).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(self.error_from("create_repo", resp).await);
        }
        debug!("仓库已创建: {}", repo);
        Ok(())
    }

    async fn list_repos(&self, author: &str) -> Result<Vec<RepoId>> {
        let url = format!(
            "{}/api/models?author={}",
            self.endpoint,
            urlencoding::encode(author)
        );
        let resp = self.auth(self.http.get(&url)).send().await?;
        if !resp.status().is_success() {
            return Err(self.error_from("list_repos", resp).await);
        }
        let models: Vec<ModelEntry> = resp.json().await?;
        let mut repos = Vec::new();
        for model in models {
            if let Ok(id) = RepoId::parse(&model.id) {
                repos.push(id);
            }
        }
        Ok(repos)
    }

    async fn list_files(&self, repo: &RepoId) -> Result<Vec<String>> {
        let url = format!("{}/api/models/{}", self.endpoint, repo.as_str());
        let resp = self.auth(self.http.get(&url)).send().await?;
        if !resp.status().is_success() {
            return Err(self.error_from("list_files", resp).await);
        }
        let info: ModelInfo = resp.json().await?;
        Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
    }

    async fn upload_file(&self, repo: &RepoId, local: &Path, remote: &str) -> Result<()> {
        let data = tokio::fs::read(local)
            .await
            .with_context(|| format!("cannot read {}", local.display()))?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&data);

        // NDJSON 提交：一行 header，随后每个文件一行
        let header = serde_json::json!({
            "key": "header",
            "value": { "summary": format!("Add {}", remote), "description": "" },
        });
        let file = serde_json::json!({
            "key": "file",
            "value": { "path": remote, "content": encoded, "encoding": "base64" },
        });
        let payload = format!("{}\n{}\n", header, file);

        let url = format!("{}/api/models/{}/commit/main", self.endpoint, repo.as_str());
        let resp = self
            .auth(self.http.post(&url))
            .header("Content-Type", "application/x-ndjson")
            .body(payload)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(self.error_from("upload_file", resp).await);
        }
        debug!("已上传: {} -> {}/{}", local.display(), repo, remote);
        Ok(())
    }

    async fn download_file(&self, repo: &RepoId, remote: &str, dest: &Path) -> Result<()> {
        let url = format!(
            "{}/{}/resolve/main/{}",
            self.endpoint,
            repo.as_str(),
            Self::encode_remote_path(remote)
        );
        let resp = self.auth(self.http.get(&url)).send().await?;
        if !resp.status().is_success() {
            return Err(self.error_from("download_file", resp).await);
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // 流式写入，避免把大模型文件整个读进内存
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        debug!("已下载: {}/{} -> {}", repo, remote, dest.display());
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
