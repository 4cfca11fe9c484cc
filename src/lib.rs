//! formsync - 对话式表单采集引擎
//!
//! 一条对话同时填写 SBA Form 1919 与 SBA Form 413。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、编排器构建、会话互斥、不活跃定时器、优雅关闭
//! - **forms**: 字段 Schema 注册表、跨文档映射、会话状态缓存与持久化
//! - **gateway**: 对话会话存储、回合编排（两段式 LLM / 工具协议）、事件广播
//! - **integrations**: 外部服务（贷款申请、文档渲染）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / 脚本化 Mock）
//! - **memory**: 对话消息
//! - **tools**: 封闭的工具调用集合、回复协议 Schema 与执行器

pub mod config;
pub mod core;
pub mod forms;
pub mod gateway;
pub mod integrations;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;
