//! 访问令牌来源
//!
//! 令牌按顺序从环境变量和 HF 缓存文件中解析。核心从不记录、
//! 持久化或检查令牌内容；错误文本输出前先经过掩码。

use std::path::PathBuf;

/// 不透明的访问令牌。Debug 输出不暴露内容。
#[derive(Clone)]
pub struct HubToken(String);

impl HubToken {
    pub fn new(raw: String) -> Self {
        Self(raw)
    }

    /// 仅供 HTTP 客户端构造 Authorization 头使用
    pub(crate) fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for HubToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HubToken(***)")
    }
}

/// 按约定顺序查找令牌：
/// 1. HF_TOKEN / HUGGING_FACE_HUB_TOKEN 环境变量
/// 2. ~/.cache/huggingface/token
/// 3. ~/.huggingface/token
pub fn resolve_token() -> Option<HubToken> {
    for var in ["HF_TOKEN", "HUGGING_FACE_HUB_TOKEN"] {
        if let Ok(value) = std::env::var(var) {
            let value = value.trim().to_string();
            if !value.is_empty() {
                return Some(HubToken::new(value));
            }
        }
    }

    for path in token_cache_paths() {
        if let Ok(content) = std::fs::read_to_string(&path) {
            let content = content.trim().to_string();
            if !content.is_empty() {
                return Some(HubToken::new(content));
            }
        }
    }

    None
}

fn token_cache_paths() -> Vec<PathBuf> {
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };
    vec![
        home.join(".cache").join("huggingface").join("token"),
        home.join(".huggingface").join("token"),
    ]
}

/// 把文本里出现的令牌替换成掩码（保留前后各 4 个字符）。
/// 令牌太短时不做部分展示，直接返回原文本。
pub fn mask_sensitive(text: &str, token: &HubToken) -> String {
    if token.0.len() < 8 {
        return text.to_string();
    }
    let masked = format!("{}...{}", &token.0[..4], &token.0[token.0.len() - 4..]);
    text.replace(&token.0, &masked)
}
