//! Scripted Mock 服务（用于测试，无需 API）
//!
//! 按脚本顺序弹出预置回复；脚本耗尽后重复 fallback 回复。
//! 记录调用次数，供预算 / 重试边界断言使用。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::EngineError;
use crate::query::ResponseSchema;
use crate::service::{ReasoningService, ServiceReply, Turn};

/// 脚本化客户端：replies 先进先出，耗尽后返回 fallback（未设置则报服务错误）
#[derive(Default)]
pub struct ScriptedService {
    replies: Mutex<VecDeque<ServiceReply>>,
    fallback: Option<ServiceReply>,
    calls: AtomicU32,
    /// 每次调用收到的轮次数，供断言 tip 累积
    turn_counts: Mutex<Vec<usize>>,
    native: bool,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    /// 所有调用都返回同一条文本（如恒定的坏输出，用于重试边界测试）
    pub fn repeating_text(text: impl Into<String>) -> Self {
        Self {
            fallback: Some(ServiceReply::Text(text.into())),
            ..Self::default()
        }
    }

    /// 声明后端支持原生 schema 输出
    pub fn with_native_schema(mut self) -> Self {
        self.native = true;
        self
    }

    pub fn push_text(self, text: impl Into<String>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(ServiceReply::Text(text.into()));
        self
    }

    /// 压入一条 ```json 包裹的结构化文本回复
    pub fn push_json(self, value: Value) -> Self {
        let body = serde_json::to_string_pretty(&value).unwrap_or_default();
        self.push_text(format!("```json\n{body}\n```"))
    }

    pub fn push_structured(self, value: Value) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(ServiceReply::Structured(value));
        self
    }

    pub fn push_refusal(self, reason: impl Into<String>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(ServiceReply::Refusal(reason.into()));
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn turn_counts(&self) -> Vec<usize> {
        self.turn_counts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningService for ScriptedService {
    async fn query(
        &self,
        turns: &[Turn],
        _schema: Option<&ResponseSchema>,
    ) -> Result<ServiceReply, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.turn_counts.lock().unwrap().push(turns.len());
        if let Some(reply) = self.replies.lock().unwrap().pop_front() {
            return Ok(reply);
        }
        match &self.fallback {
            Some(reply) => Ok(reply.clone()),
            None => Err(EngineError::Service("script exhausted".to_string())),
        }
    }

    fn supports_native_schema(&self) -> bool {
        self.native
    }
}
