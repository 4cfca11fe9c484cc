//! 文档渲染协作方
//!
//! 仅由不活跃定时器或显式 finalize 调用，不在对话轮次的关键路径上。

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 渲染产物引用（如对象存储 key 或 URL）
pub type ArtifactRef = String;

#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// 为申请重新生成预览文档，返回产物引用
    async fn regenerate(&self, application_id: &str) -> Result<Vec<ArtifactRef>, String>;
}

#[derive(Debug, Serialize)]
struct RenderRequest<'a> {
    application_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    #[serde(default)]
    artifacts: Vec<ArtifactRef>,
}

/// 通过 HTTP 调用外部渲染服务：POST {endpoint} `{"application_id": ...}`
pub struct HttpRenderer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRenderer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl DocumentRenderer for HttpRenderer {
    async fn regenerate(&self, application_id: &str) -> Result<Vec<ArtifactRef>, String> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&RenderRequest { application_id })
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("render service returned {status}: {text}"));
        }

        let body: RenderResponse = resp.json().await.map_err(|e| e.to_string())?;
        Ok(body.artifacts)
    }
}

/// 未配置渲染服务时使用：只记日志，并记录调用过的申请号
#[derive(Debug, Default)]
pub struct LoggingRenderer {
    rendered: Mutex<Vec<String>>,
}

impl LoggingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已请求渲染的申请号（按调用顺序）
    pub fn rendered(&self) -> Vec<String> {
        self.rendered.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DocumentRenderer for LoggingRenderer {
    async fn regenerate(&self, application_id: &str) -> Result<Vec<ArtifactRef>, String> {
        tracing::info!(application_id, "render requested (no render endpoint configured)");
        if let Ok(mut r) = self.rendered.lock() {
            r.push(application_id.to_string());
        }
        Ok(vec![
            format!("preview/{application_id}/sba_1919.pdf"),
            format!("preview/{application_id}/sba_413.pdf"),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_logging_renderer_records_calls() {
        let renderer = LoggingRenderer::new();
        let artifacts = renderer.regenerate("A1").await.unwrap();
        assert_eq!(artifacts.len(), 2);
        assert!(artifacts[0].contains("A1"));
        assert_eq!(renderer.rendered(), vec!["A1".to_string()]);
    }
}
