//! 推理服务层：客户端抽象与实现（OpenAI 兼容 / Scripted Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::ScriptedService;
pub use openai::OpenAiService;
pub use traits::{ReasoningService, ServiceReply, Turn, TurnRole};
