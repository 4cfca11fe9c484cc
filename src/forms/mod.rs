//! 表单层：字段 Schema、跨文档映射、会话状态缓存与持久化

pub mod cache;
pub mod definitions;
pub mod mapper;
pub mod schema;
pub mod state;
pub mod store;

pub use cache::FormStateCache;
pub use mapper::{EntityOption, FieldMapper, MappedUpdate, UnifiedFieldMapping, UnifiedPrompt};
pub use schema::{DocumentType, FieldDefinition, FieldKind, SchemaRegistry};
pub use state::{
    CompleteSnapshot, DocumentSnapshot, DocumentStateEntry, FieldValue, Progress, SessionFormState,
    SkipOutcome, UpdateOutcome,
};
#[cfg(feature = "async-sqlite")]
pub use store::SqliteFieldStore;
pub use store::{FieldStore, MemoryFieldStore};
