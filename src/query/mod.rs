//! 弹性结构化查询协议：schema 校验、有界重试、人工升级与 handoff 回放

pub mod feedback;
pub mod protocol;
pub mod schema;

pub use feedback::{FeedbackSignal, OperatorConsole, ScriptedConsole, StdioConsole};
pub use protocol::{QueryOutcome, QueryProtocol, QuerySnapshot};
pub use schema::{
    branch, response_schema, BranchSpec, Decision, FieldKind, FieldSpec, InteractMode,
    ResponseSchema, SchemaMode,
};
