//! LLM 层：协作方抽象与实现（OpenAI 兼容 / DeepSeek / Scripted）

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod traits;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT};
pub use mock::{RecordedCall, ScriptedModelClient};
pub use openai::{parse_model_output, OpenAiModelClient};
pub use traits::{ModelClient, ModelReply, RawToolCall};
