use anyhow::{bail, Context, Result};
use lorawizard_lib::config::WizardConfig;
use lorawizard_lib::console::{Console, StdinConsole};
use lorawizard_lib::hub::token::resolve_token;
use lorawizard_lib::hub::{HfHubClient, HubClient, HubToken};
use lorawizard_lib::logging::{init_logging, LogConfig};
use lorawizard_lib::wizard::{download, upload, WizardSession};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        tracing::error!("向导异常结束: {:#}", e);
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = WizardConfig::load(&lorawizard_lib::config_dir());
    let session_log = init_logging(&config.log_dir, &LogConfig::default());

    let console = StdinConsole;
    console.say("==================================");
    console.say("  LoRA Checkpoint Wizard");
    console.say("==================================");
    if let Some(path) = &session_log {
        console.say(&format!("会话日志: {}", path.display()));
    }
    console.say("");

    // 令牌：环境变量和缓存文件里找不到就现场输入
    let token = match resolve_token() {
        Some(token) => token,
        None => {
            let raw = console.read_line("HuggingFace 访问令牌: ")?;
            if raw.is_empty() {
                bail!("没有可用的访问令牌");
            }
            HubToken::new(raw)
        }
    };

    let client: Arc<dyn HubClient> =
        Arc::new(HfHubClient::new(token).context("初始化 HuggingFace 客户端失败")?);
    let user = client.whoami().await.context("令牌验证失败")?;
    console.say(&format!("✅ 已登录: {}", user));
    console.say("");

    // Ctrl-C 置位取消标志，当前文件完成后停止
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("收到 Ctrl-C，完成当前文件后停止");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let session = WizardSession {
        config: &config,
        console: &console,
        client,
        user,
        cancel,
    };

    let modes = vec![
        "上传训练输出到 HuggingFace".to_string(),
        "从 HuggingFace 下载模型文件".to_string(),
    ];
    match console.choose("要做什么?", &modes, 0)? {
        0 => upload::run(&session).await,
        _ => download::run(&session).await,
    }
}
