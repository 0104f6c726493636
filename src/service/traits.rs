//! 推理服务抽象
//!
//! 所有后端（OpenAI 兼容 / Scripted Mock）实现 ReasoningService：
//! 一串对话轮次（可选响应 schema）进，原始文本 / 结构化值 / 拒答 出。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::EngineError;
use crate::query::ResponseSchema;

/// 对话轮次角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

/// 单个对话轮次
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

/// 服务的一次回复。拒答是独立出口，调用方必须区别于正常输出处理。
#[derive(Clone, Debug)]
pub enum ServiceReply {
    /// 自由文本（需要调用方自行抽取结构化负载）
    Text(String),
    /// 原生结构化输出（服务端已保证形状）
    Structured(Value),
    /// 服务拒绝回答，携带拒绝理由
    Refusal(String),
}

/// 推理服务客户端 trait
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// 发起一次查询。schema 为 Some 且后端支持原生结构化输出时，
    /// 返回 Structured；否则返回 Text，由查询协议抽取并校验。
    async fn query(
        &self,
        turns: &[Turn],
        schema: Option<&ResponseSchema>,
    ) -> Result<ServiceReply, EngineError>;

    /// 后端是否支持服务端 schema 校验输出
    fn supports_native_schema(&self) -> bool {
        false
    }
}
