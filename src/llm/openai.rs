//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! 工具调用走文本协议：LLM 按 system prompt 中的 JSON Schema 回复
//! `{"reply": "...", "tool_calls": [{"tool": "...", "args": {...}}]}`，由 parse_model_output 解析。

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use serde::Deserialize;

use crate::llm::{ModelClient, ModelReply, RawToolCall};
use crate::memory::{Message, Role};

/// LLM 回复信封（与 tools::schema 中注入 prompt 的 Schema 一致）
#[derive(Debug, Deserialize)]
struct ReplyEnvelope {
    #[serde(default)]
    reply: String,
    #[serde(default)]
    tool_calls: Vec<RawToolCall>,
}

/// 解析 LLM 输出：含合法信封 JSON 则取 reply + tool_calls，否则整段作为纯文本回复
pub fn parse_model_output(output: &str) -> ModelReply {
    let trimmed = output.trim();

    // 尝试提取 JSON 块（```json ... ``` 或纯 JSON）
    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            &trimmed[start..=end]
        } else {
            return ModelReply::text(trimmed);
        }
    } else {
        return ModelReply::text(trimmed);
    };

    match serde_json::from_str::<ReplyEnvelope>(json_str) {
        Ok(envelope) => ModelReply::with_tools(envelope.reply.trim(), envelope.tool_calls),
        Err(e) => {
            tracing::warn!(error = %e, "model output is not a reply envelope, treating as text");
            ModelReply::text(trimmed)
        }
    }
}

/// OpenAI 兼容客户端：持有 Client、model 名与基础 system prompt
pub struct OpenAiModelClient {
    client: Client<OpenAIConfig>,
    model: String,
    system_prompt: String,
}

impl OpenAiModelClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>, system_prompt: impl Into<String>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            system_prompt: system_prompt.into(),
        }
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
        context: &str,
    ) -> Result<Vec<ChatCompletionRequestMessage>, String> {
        let system = format!("{}\n\n## Current state\n{}", self.system_prompt, context);
        let mut out = vec![ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()
                .map_err(|e| e.to_string())?,
        )];

        for m in messages {
            let msg = match m.role {
                Role::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(|e| e.to_string())?,
                ),
                Role::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(|e| e.to_string())?,
                ),
                Role::Tool => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(format!("[tool results]\n{}", m.content))
                        .build()
                        .map_err(|e| e.to_string())?,
                ),
                Role::Assistant => {
                    // 带工具调用的助手消息还原成信封，保持 LLM 看到的格式一致
                    let content = match &m.tool_calls {
                        Some(calls) if !calls.is_empty() => serde_json::json!({
                            "reply": m.content,
                            "tool_calls": calls
                                .iter()
                                .map(|c| serde_json::json!({"tool": c.name, "args": c.args}))
                                .collect::<Vec<_>>(),
                        })
                        .to_string(),
                        _ => m.content.clone(),
                    };
                    ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(content)
                            .build()
                            .map_err(|e| e.to_string())?,
                    )
                }
            };
            out.push(msg);
        }
        Ok(out)
    }
}

#[async_trait]
impl ModelClient for OpenAiModelClient {
    async fn complete(&self, messages: &[Message], context: &str) -> Result<ModelReply, String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages, context)?)
            .build()
            .map_err(|e| e.to_string())?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;

        if let Some(usage) = &response.usage {
            tracing::debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "model usage"
            );
        }

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(parse_model_output(&content))
    }
}
