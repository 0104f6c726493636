//! 弹性查询协议
//!
//! 把（角色身份、累积上下文、响应 schema）变成一个通过校验的决策，
//! 对系统其余部分屏蔽瞬时格式失败。上下文装配顺序固定并具有语义：
//! episodic（系统指令 + 长期记忆示例）→ linked(短期近因记录) →
//! query（本次请求）→ tip（仅重试期间存在的纠错提示）。
//!
//! 全局请求计数在联系服务之前检查；本地重试有界；tip 在成功后立即清空，
//! 绝不泄漏到下一次无关调用。成功后保存本次调用的精确参数快照供 handoff 回放。

use std::sync::Arc;

use serde_json::Value;

use crate::context::ContextStore;
use crate::core::{EngineError, FormatError};
use crate::query::feedback::{classify, FeedbackSignal, OperatorConsole};
use crate::query::schema::{branch, Decision, InteractMode, ResponseSchema};
use crate::roles::Role;
use crate::service::{ReasoningService, ServiceReply, Turn, TurnRole};

/// 一次成功调用的参数快照，handoff 时以完全相同的 schema 与校验策略回放
#[derive(Clone)]
pub struct QuerySnapshot {
    pub episodic: Vec<Turn>,
    pub linked: Vec<Turn>,
    pub query: Vec<Turn>,
    pub schema: ResponseSchema,
}

/// 协议出口：正常决策 / 操作员跳过 / 操作员要求移交
#[derive(Debug)]
pub enum QueryOutcome {
    Decision(Decision),
    Skipped,
    Switch(Role),
}

/// 每个角色持有一个协议实例；计数器只在整个引擎重建时归零
pub struct QueryProtocol {
    role: Role,
    interact_mode: InteractMode,
    service: Arc<dyn ReasoningService>,
    console: Arc<dyn OperatorConsole>,

    episodic: Vec<Turn>,
    linked: Vec<Turn>,
    query: Vec<Turn>,
    tips: Vec<Turn>,

    request_times: u32,
    max_query_times: u32,
    max_retry_times: u32,

    /// 本角色的会话对白（供长期记忆回写与诊断；反馈纠偏的交换不计入）
    transcript: Vec<Turn>,
}

/// 从自由文本中抽取 JSON 负载：优先 ```json 围栏，其次首尾花括号范围
fn extract_json_block(text: &str, schema: &ResponseSchema) -> Result<Value, FormatError> {
    let trimmed = text.trim();
    let candidate = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        match rest.find("```") {
            Some(end) => rest[..end].trim(),
            None => rest.trim(),
        }
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            &trimmed[start..=end]
        } else {
            trimmed
        }
    } else {
        return Err(schema.format_error("no JSON block found in the reply"));
    };

    serde_json::from_str(candidate).map_err(|e| schema.format_error(&e.to_string()))
}

impl QueryProtocol {
    pub fn new(
        role: Role,
        interact_mode: InteractMode,
        service: Arc<dyn ReasoningService>,
        console: Arc<dyn OperatorConsole>,
        max_retry_times: u32,
        max_query_times: u32,
    ) -> Self {
        Self {
            role,
            interact_mode,
            service,
            console,
            episodic: Vec::new(),
            linked: Vec::new(),
            query: Vec::new(),
            tips: Vec::new(),
            request_times: 0,
            max_query_times,
            max_retry_times,
            transcript: Vec::new(),
        }
    }

    pub fn set_episodic(&mut self, turns: Vec<Turn>) {
        self.episodic = turns;
    }

    pub fn set_linked(&mut self, turns: Vec<Turn>) {
        self.linked = turns;
    }

    pub fn set_query(&mut self, turns: Vec<Turn>) {
        self.query = turns;
    }

    pub fn request_times(&self) -> u32 {
        self.request_times
    }

    pub fn transcript(&self) -> &[Turn] {
        &self.transcript
    }

    fn assemble(&self) -> Vec<Turn> {
        self.episodic
            .iter()
            .chain(self.linked.iter())
            .chain(self.query.iter())
            .chain(self.tips.iter())
            .cloned()
            .collect()
    }

    fn snapshot(&self, schema: &ResponseSchema) -> QuerySnapshot {
        QuerySnapshot {
            episodic: self.episodic.clone(),
            linked: self.linked.clone(),
            query: self.query.clone(),
            schema: schema.clone(),
        }
    }

    /// 成功收尾：清空 tip，把回复追加到 query 轮次，按需计入会话对白
    fn finish_success(&mut self, raw: String, feedback_tagged: bool) {
        self.tips.clear();
        self.query.push(Turn::assistant(raw));
        if !feedback_tagged {
            self.transcript.extend(self.query.iter().cloned());
        }
    }

    /// 发起一次受预算约束的查询：预算在联系服务之前检查；
    /// 成功后保存参数快照；按 branch / 交互模式决定是否转入人工反馈。
    pub async fn run(
        &mut self,
        store: &mut ContextStore,
        schema: &ResponseSchema,
    ) -> Result<QueryOutcome, EngineError> {
        self.request_times += 1;
        if self.request_times > self.max_query_times {
            return Err(EngineError::QueryBudgetExceeded {
                role: self.role,
                times: self.request_times,
                max: self.max_query_times,
            });
        }

        let decision = self.issue(schema, false).await?;
        store.save_query_snapshot(self.role, self.snapshot(schema));

        if self.needs_review(&decision) {
            return self.feedback_cycle(store, schema, Some(decision), false).await;
        }
        Ok(QueryOutcome::Decision(decision))
    }

    /// handoff 回放：载入保存的快照，直接进入人工反馈子协议，不重新装配上下文
    pub async fn resume(&mut self, store: &mut ContextStore) -> Result<QueryOutcome, EngineError> {
        let snap = store
            .query_snapshot(self.role)
            .cloned()
            .ok_or(EngineError::NoSavedContext(self.role))?;
        self.episodic = snap.episodic;
        self.linked = snap.linked;
        self.query = snap.query;
        let schema = snap.schema;
        self.feedback_cycle(store, &schema, None, true).await
    }

    fn needs_review(&self, decision: &Decision) -> bool {
        decision.branch == branch::NEED_HUMAN_HELP || self.interact_mode == InteractMode::Proactive
    }

    /// 单次逻辑查询：原生 schema 路径免重试，自由文本路径有界重试
    async fn issue(
        &mut self,
        schema: &ResponseSchema,
        feedback_tagged: bool,
    ) -> Result<Decision, EngineError> {
        if self.service.supports_native_schema() {
            self.native_query(schema, feedback_tagged).await
        } else {
            self.retry_query(schema, feedback_tagged).await
        }
    }

    /// 原生结构化路径：服务端保证形状，不做本地重试；拒答原样上抛
    async fn native_query(
        &mut self,
        schema: &ResponseSchema,
        feedback_tagged: bool,
    ) -> Result<Decision, EngineError> {
        let turns = self.assemble();
        let reply = self.service.query(&turns, Some(schema)).await?;
        let value = match reply {
            ServiceReply::Refusal(reason) => return Err(EngineError::ServiceRefusal(reason)),
            ServiceReply::Structured(v) => v,
            ServiceReply::Text(text) => extract_json_block(&text, schema)
                .map_err(|e| EngineError::Service(format!("schema-checked reply was not structured: {e}")))?,
        };
        let decision = schema
            .validate(&value)
            .map_err(|e| EngineError::Service(format!("schema-checked reply failed validation: {e}")))?;
        let raw = format!(
            "```json\n{}\n```",
            serde_json::to_string_pretty(&value).unwrap_or_default()
        );
        self.finish_success(raw, feedback_tagged);
        Ok(decision)
    }

    /// 自由文本路径：抽取 JSON → 字段校验；两类失败都生成纠错 tip 并重试，
    /// 直到重试上限。tip 顺序为（坏回复，纠错提示）对。
    async fn retry_query(
        &mut self,
        schema: &ResponseSchema,
        feedback_tagged: bool,
    ) -> Result<Decision, EngineError> {
        let mut retries: u32 = 0;
        loop {
            let turns = self.assemble();
            let reply = self.service.query(&turns, None).await?;
            let text = match reply {
                ServiceReply::Refusal(reason) => return Err(EngineError::ServiceRefusal(reason)),
                ServiceReply::Text(t) => t,
                ServiceReply::Structured(v) => serde_json::to_string(&v).unwrap_or_default(),
            };

            match extract_json_block(&text, schema).and_then(|v| schema.validate(&v)) {
                Ok(decision) => {
                    self.finish_success(text, feedback_tagged);
                    return Ok(decision);
                }
                Err(format_error) => {
                    tracing::debug!(role = %self.role, retry = retries + 1, "malformed reply, retrying");
                    self.tips.push(Turn::assistant(text));
                    self.tips.push(Turn::user(format_error.hint));
                    retries += 1;
                    if retries > self.max_retry_times {
                        self.tips.clear();
                        return Err(EngineError::MaxRetriesExceeded {
                            role: self.role,
                            retries: self.max_retry_times,
                        });
                    }
                }
            }
        }
    }

    /// 人工反馈子协议：呈现最近一次交换并征求自由文本。
    /// skip 中止步骤；switch 请求移交；空输入按原样接受（NeedHumanHelp 升级态除外）；
    /// 其余文本作为指导意见追加后以相同参数重发，产生的交换不计入会话对白。
    async fn feedback_cycle(
        &mut self,
        store: &mut ContextStore,
        schema: &ResponseSchema,
        mut decision: Option<Decision>,
        handoff: bool,
    ) -> Result<QueryOutcome, EngineError> {
        loop {
            let last = self
                .query
                .iter()
                .rev()
                .find(|t| t.role == TurnRole::Assistant)
                .map(|t| t.content.clone())
                .unwrap_or_default();

            let prompt = if handoff {
                format!(
                    "Switch to `{}`. Last response follows:\n{last}\nPlease give guidance ('skip' aborts, 'switch to <role>' transfers, empty input replays as-is):",
                    self.role
                )
            } else if self.interact_mode == InteractMode::Proactive {
                format!(
                    "{} has answered, please review:\n{last}\nGuidance ('skip' aborts, 'switch to <role>' transfers, empty input accepts):",
                    self.role
                )
            } else {
                format!(
                    "{} has encountered some problems, please give advice:\n{last}\nGuidance ('skip' aborts, 'switch to <role>' transfers):",
                    self.role
                )
            };

            let input = self.console.prompt(&prompt)?;
            match classify(&input)? {
                FeedbackSignal::Skip => return Ok(QueryOutcome::Skipped),
                FeedbackSignal::Switch(target) => return Ok(QueryOutcome::Switch(target)),
                FeedbackSignal::Accept => match decision.take() {
                    Some(d) if d.branch != branch::NEED_HUMAN_HELP => {
                        return Ok(QueryOutcome::Decision(d));
                    }
                    // 升级态下按原样接受会把 NeedHumanHelp 泄漏给处理器，继续征求
                    Some(d) => decision = Some(d),
                    // handoff 无现成决策：按快照原样重放
                    None => {
                        let d = self.issue(schema, true).await?;
                        store.save_query_snapshot(self.role, self.snapshot(schema));
                        if !self.needs_review(&d) {
                            return Ok(QueryOutcome::Decision(d));
                        }
                        decision = Some(d);
                    }
                },
                FeedbackSignal::Guidance(text) => {
                    self.query.push(Turn::user(format!(
                        "This is the guidance given by a human:\n{text}\nPlease follow these recommendations to carry out the task."
                    )));
                    let d = self.issue(schema, true).await?;
                    store.save_query_snapshot(self.role, self.snapshot(schema));
                    if !self.needs_review(&d) {
                        return Ok(QueryOutcome::Decision(d));
                    }
                    decision = Some(d);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::schema::{response_schema, SchemaMode};
    use crate::query::ScriptedConsole;
    use crate::service::ScriptedService;
    use serde_json::json;

    fn base_schema() -> ResponseSchema {
        response_schema(SchemaMode::Base, vec![], vec![], InteractMode::Passive)
    }

    fn good_reply() -> Value {
        json!({
            "branch": "Continue",
            "problem": "",
            "message": "",
            "summary": "ok",
        })
    }

    fn protocol(service: Arc<ScriptedService>, max_retry: u32, max_query: u32) -> QueryProtocol {
        QueryProtocol::new(
            Role::Planner,
            InteractMode::Passive,
            service,
            Arc::new(ScriptedConsole::new()),
            max_retry,
            max_query,
        )
    }

    #[tokio::test]
    async fn test_retry_bound_is_n_plus_one_attempts() {
        let service = Arc::new(ScriptedService::repeating_text("definitely not json"));
        let mut p = protocol(service.clone(), 3, 100);
        p.set_query(vec![Turn::user("do the thing")]);

        let mut store = ContextStore::new();
        let err = p.run(&mut store, &base_schema()).await.unwrap_err();
        assert!(matches!(err, EngineError::MaxRetriesExceeded { retries: 3, .. }));
        // maxRetryTimes=N 时恰好 N+1 次尝试
        assert_eq!(service.calls(), 4);
    }

    #[tokio::test]
    async fn test_tips_accumulate_then_clear_on_success() {
        let service = Arc::new(
            ScriptedService::new()
                .push_text("garbage")
                .push_json(good_reply()),
        );
        let mut p = protocol(service, 3, 100);
        p.set_query(vec![Turn::user("request")]);

        let mut store = ContextStore::new();
        let outcome = p.run(&mut store, &base_schema()).await.unwrap();
        assert!(matches!(outcome, QueryOutcome::Decision(_)));
        // 成功后 tip 清空，不会泄漏到下一次调用
        assert!(p.tips.is_empty());
        // 交换计入会话对白（请求 + 回复）
        assert_eq!(p.transcript().len(), 2);
    }

    #[tokio::test]
    async fn test_query_budget_checked_before_service_call() {
        let service = Arc::new(ScriptedService::new().push_json(good_reply()).push_json(good_reply()));
        let mut p = protocol(service.clone(), 3, 2);
        let mut store = ContextStore::new();
        let schema = base_schema();

        p.set_query(vec![Turn::user("one")]);
        assert!(p.run(&mut store, &schema).await.is_ok());
        p.set_query(vec![Turn::user("two")]);
        assert!(p.run(&mut store, &schema).await.is_ok());
        assert_eq!(p.request_times(), 2);

        p.set_query(vec![Turn::user("three")]);
        let err = p.run(&mut store, &schema).await.unwrap_err();
        assert!(matches!(err, EngineError::QueryBudgetExceeded { .. }));
        // 第 M+1 次在联系服务之前失败
        assert_eq!(service.calls(), 2);
    }

    #[tokio::test]
    async fn test_native_refusal_is_not_retried() {
        let service = Arc::new(
            ScriptedService::new()
                .push_refusal("cannot comply")
                .with_native_schema(),
        );
        let mut p = protocol(service.clone(), 3, 100);
        p.set_query(vec![Turn::user("request")]);

        let mut store = ContextStore::new();
        let err = p.run(&mut store, &base_schema()).await.unwrap_err();
        assert!(matches!(err, EngineError::ServiceRefusal(r) if r == "cannot comply"));
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_saved_after_success() {
        let service = Arc::new(ScriptedService::new().push_json(good_reply()));
        let mut p = protocol(service, 3, 100);
        p.set_query(vec![Turn::user("request")]);

        let mut store = ContextStore::new();
        p.run(&mut store, &base_schema()).await.unwrap();
        let snap = store.query_snapshot(Role::Planner).unwrap();
        // 快照含请求与回复两轮
        assert_eq!(snap.query.len(), 2);
    }

    #[tokio::test]
    async fn test_escalation_skip_aborts_step() {
        let needs_help = json!({
            "branch": "NeedHumanHelp",
            "problem": "stuck",
            "message": "",
            "summary": "",
        });
        let service = Arc::new(ScriptedService::new().push_json(needs_help));
        let console = Arc::new(ScriptedConsole::new().push("skip"));
        let mut p = QueryProtocol::new(
            Role::Planner,
            InteractMode::Passive,
            service,
            console,
            3,
            100,
        );
        p.set_query(vec![Turn::user("request")]);

        let mut store = ContextStore::new();
        let outcome = p.run(&mut store, &base_schema()).await.unwrap();
        assert!(matches!(outcome, QueryOutcome::Skipped));
    }

    #[tokio::test]
    async fn test_escalation_guidance_reissues_without_transcript() {
        let needs_help = json!({
            "branch": "NeedHumanHelp",
            "problem": "stuck",
            "message": "",
            "summary": "",
        });
        let service = Arc::new(
            ScriptedService::new()
                .push_json(needs_help)
                .push_json(good_reply()),
        );
        let console = Arc::new(ScriptedConsole::new().push("try harder"));
        let mut p = QueryProtocol::new(
            Role::Planner,
            InteractMode::Passive,
            service.clone(),
            console,
            3,
            100,
        );
        p.set_query(vec![Turn::user("request")]);

        let mut store = ContextStore::new();
        let outcome = p.run(&mut store, &base_schema()).await.unwrap();
        match outcome {
            QueryOutcome::Decision(d) => assert_eq!(d.branch, "Continue"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(service.calls(), 2);
        // 纠偏交换不计入会话对白：仅首次成功前的交换被记录
        assert!(p
            .transcript()
            .iter()
            .all(|t| !t.content.contains("guidance given by a human")));
    }

    #[tokio::test]
    async fn test_switch_sentinel_requests_handoff() {
        let needs_help = json!({
            "branch": "NeedHumanHelp",
            "problem": "",
            "message": "",
            "summary": "",
        });
        let service = Arc::new(ScriptedService::new().push_json(needs_help));
        let console = Arc::new(ScriptedConsole::new().push("switch to Reviewer"));
        let mut p = QueryProtocol::new(
            Role::Planner,
            InteractMode::Passive,
            service,
            console,
            3,
            100,
        );
        p.set_query(vec![Turn::user("request")]);

        let mut store = ContextStore::new();
        let outcome = p.run(&mut store, &base_schema()).await.unwrap();
        assert!(matches!(outcome, QueryOutcome::Switch(Role::Reviewer)));
    }

    #[tokio::test]
    async fn test_resume_without_snapshot_is_fatal() {
        let service = Arc::new(ScriptedService::new());
        let mut p = protocol(service, 3, 100);
        let mut store = ContextStore::new();
        let err = p.resume(&mut store).await.unwrap_err();
        assert!(matches!(err, EngineError::NoSavedContext(Role::Planner)));
    }
}
