//! 外部协作方：申请服务、文档渲染

pub mod applications;
pub mod render;

pub use applications::{
    ApplicationDraft, ApplicationQuery, ApplicationService, ApplicationSummary, EligibilityInput,
    EligibilityScore, InMemoryApplicationService,
};
pub use render::{ArtifactRef, DocumentRenderer, HttpRenderer, LoggingRenderer};
