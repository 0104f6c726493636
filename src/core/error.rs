//! 引擎错误类型
//!
//! 传播策略：只有 FormatError 在查询协议内部被吞掉并转为重试，
//! 其余全部上抛到 Orchestrator 并以非零结果终止本次运行。

use thiserror::Error;

use crate::roles::{Event, Role};

/// 引擎运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum EngineError {
    /// 全局请求次数达到上限（对整次运行致命，不重试）
    #[error("{role} has exhausted the query budget: {times}/{max} requests")]
    QueryBudgetExceeded { role: Role, times: u32, max: u32 },

    /// 单次调用的本地重试次数达到上限（对当前步骤致命）
    #[error("{role} response stayed malformed after {retries} retries")]
    MaxRetriesExceeded { role: Role, retries: u32 },

    /// 推理服务拒绝回答（不重试，直接上抛）
    #[error("reasoning service refused the request: {0}")]
    ServiceRefusal(String),

    /// 推理服务调用失败（网络、协议等）
    #[error("reasoning service error: {0}")]
    Service(String),

    /// 未知角色 / 未知事件 / 未注册处理器，属于程序或配置缺陷
    #[error("routing error: {0}")]
    Routing(String),

    /// 校验通过的响应携带了处理器不认识的 branch，schema 与处理器不一致
    #[error("unreachable branch `{branch}` in {role}")]
    UnreachableBranch { role: Role, branch: String },

    /// 信封属性式访问缺少字段（不返回静默默认值）
    #[error("missing field `{0}` in envelope")]
    MissingField(String),

    /// 切换到一个从未运行过的角色
    #[error("role `{0}` has no saved context; switch only after the role has run")]
    NoSavedContext(Role),

    /// 读取尚未创建的私有上下文空间（调用方错误，与「已创建但为空」区分）
    #[error("private context scope for `{0}` has not been created")]
    ScopeNotCreated(Role),

    /// 操作请求未通过注册表校验或执行失败
    #[error("action error: {0}")]
    Action(String),

    /// 操作员控制台读写失败
    #[error("console error: {0}")]
    Console(String),

    #[error("config error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn routing(msg: impl Into<String>) -> Self {
        EngineError::Routing(msg.into())
    }

    pub fn unknown_receiver(value: &str) -> Self {
        EngineError::Routing(format!("receiver `{value}` is not a known role"))
    }

    pub fn unknown_event(value: &str) -> Self {
        EngineError::Routing(format!("event `{value}` is not a known event"))
    }

    pub fn unhandled(role: Role, event: Event) -> Self {
        EngineError::Routing(format!("event `{event}` is not handled in `{role}`"))
    }
}

/// 格式错误：可恢复，仅在查询协议内部流转，携带用于纠错的提示文本。
/// 提示会作为 tip 消息附加到下一次重试的上下文末尾。
#[derive(Debug, Clone)]
pub struct FormatError {
    /// 面向模型的纠错提示（回显期望 schema 与具体校验意见）
    pub hint: String,
}

impl FormatError {
    pub fn new(hint: impl Into<String>) -> Self {
        Self { hint: hint.into() }
    }
}

impl std::fmt::Display for FormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.hint)
    }
}

impl std::error::Error for FormatError {}
