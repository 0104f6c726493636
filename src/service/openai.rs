//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）。
//! 提供 schema 时走服务端 JSON Schema 结构化输出；模型拒答通过 refusal 字段
//! 单独上抛为 ServiceRefusal，不与正常输出混淆。

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::Value;

use crate::core::EngineError;
use crate::query::ResponseSchema;
use crate::service::{ReasoningService, ServiceReply, Turn, TurnRole};

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiService {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiService {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
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
        }
    }

    fn to_api_messages(turns: &[Turn]) -> Result<Vec<ChatCompletionRequestMessage>, EngineError> {
        let mut messages = Vec::with_capacity(turns.len());
        for turn in turns {
            let msg: ChatCompletionRequestMessage = match turn.role {
                TurnRole::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(turn.content.clone())
                    .build()
                    .map_err(|e| EngineError::Service(e.to_string()))?
                    .into(),
                TurnRole::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(turn.content.clone())
                    .build()
                    .map_err(|e| EngineError::Service(e.to_string()))?
                    .into(),
                TurnRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(turn.content.clone())
                    .build()
                    .map_err(|e| EngineError::Service(e.to_string()))?
                    .into(),
            };
            messages.push(msg);
        }
        Ok(messages)
    }
}

#[async_trait]
impl ReasoningService for OpenAiService {
    async fn query(
        &self,
        turns: &[Turn],
        schema: Option<&ResponseSchema>,
    ) -> Result<ServiceReply, EngineError> {
        let messages = Self::to_api_messages(turns)?;

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(self.model.clone()).messages(messages);

        if let Some(schema) = schema {
            builder.response_format(ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    name: "decision".to_string(),
                    description: None,
                    schema: Some(schema.to_json_schema()),
                    strict: Some(true),
                },
            });
        }

        let request = builder
            .build()
            .map_err(|e| EngineError::Service(e.to_string()))?;

        let completion = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| EngineError::Service(e.to_string()))?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Service("empty completion".to_string()))?;

        if let Some(refusal) = choice.message.refusal {
            if !refusal.is_empty() {
                return Ok(ServiceReply::Refusal(refusal));
            }
        }

        let content = choice.message.content.unwrap_or_default();
        if schema.is_some() {
            let value: Value = serde_json::from_str(&content)
                .map_err(|e| EngineError::Service(format!("structured reply is not JSON: {e}")))?;
            Ok(ServiceReply::Structured(value))
        } else {
            Ok(ServiceReply::Text(content))
        }
    }

    fn supports_native_schema(&self) -> bool {
        true
    }
}
