//! formsync - 对话式 SBA 表单采集
//!
//! 入口：初始化日志、组装编排器，在终端里跑一条对话会话。输入 `/fields` 查看当前字段，`/quit` 退出。

use std::sync::Arc;

use anyhow::Context;
use formsync::config::load_config;
use formsync::core::{FormStateFlush, OrchestratorBuilder, ShutdownCoordinator, ShutdownManager};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    formsync::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("config load failed, using defaults: {}", e);
        Default::default()
    });

    let orchestrator = Arc::new(
        OrchestratorBuilder::new(cfg)
            .with_system_prompt_from_file()
            .build()
            .await
            .context("Failed to build orchestrator")?,
    );
    let session = orchestrator
        .create_session(Some("terminal".to_string()))
        .await
        .context("Failed to create session")?;

    let manager = Arc::new(ShutdownManager::new());
    manager.install_signal_handlers();
    let mut coordinator = ShutdownCoordinator::new().with_timeout(10);
    coordinator.register(FormStateFlush::new(orchestrator.clone()));

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(b"formsync ready. Try: look up application APP-1234, or tell me your business name.\n> ")
        .await?;
    stdout.flush().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = manager.wait_for_shutdown() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let input = line.trim();
        match input {
            "" => {}
            "/quit" | "/exit" => break,
            "/fields" => {
                let snapshot = orchestrator.snapshot(&session.session_id).await?;
                let text = match snapshot {
                    Some(s) => serde_json::to_string_pretty(&s)?,
                    None => "no application linked yet".to_string(),
                };
                stdout.write_all(format!("{}\n", text).as_bytes()).await?;
            }
            _ => match orchestrator.process_message(&session.session_id, input).await {
                Ok(outcome) => {
                    let mut text = format!("{}\n", outcome.reply);
                    if let Some(p) = outcome.progress {
                        text.push_str(&format!("  [1919 {}% | 413 {}%]\n", p.sba_1919, p.sba_413));
                    }
                    stdout.write_all(text.as_bytes()).await?;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "turn failed");
                    stdout.write_all(format!("(turn failed: {})\n", e).as_bytes()).await?;
                }
            },
        }
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
    }

    let failed = coordinator.run_cleanup().await;
    if failed > 0 {
        tracing::warn!(failed, "shutdown finished with failed cleanup steps");
    }
    Ok(())
}
