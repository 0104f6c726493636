//! 角色基座
//!
//! RoleAgent trait 是编排器看到的最小契约：角色名、事件注册表、step。
//! RoleCore 打包每个具体角色都要用的机器：查询协议实例、长短期记忆检索与写回、
//! 会话步骤日志、上下文合并。step 的返回是显式三分支结果，编排器按标签分派，
//! 不从空值推断意图。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::{ContextStore, Envelope};
use crate::core::EngineError;
use crate::memory::{LongTermStore, NoopLongTerm, QueueStore, ShortTermStore, StoreMode};
use crate::query::{
    Decision, InteractMode, OperatorConsole, QueryOutcome, QueryProtocol, ResponseSchema,
};
use crate::roles::{keys, Event, Role};
use crate::service::{ReasoningService, Turn};

/// 一次 step 的显式结果
#[derive(Debug)]
pub enum StepOutcome {
    /// 产生了下一条出站信封
    Completed(Envelope),
    /// 操作员要求把控制权移交给指定角色
    HandoffRequested(Role),
    /// 操作员跳过了当前步骤
    Skipped,
}

/// 工作流中的一个角色：事件处理器集合 + 记忆与查询机器
#[async_trait]
pub trait RoleAgent: Send + Sync {
    fn role(&self) -> Role;

    fn capability(&self) -> &str {
        ""
    }

    /// (role, event) 是否注册了处理器。编排器在派发前检查，未注册即路由错误。
    fn handles(&self, event: Event) -> bool;

    /// 运行开始时的初始化钩子（如创建私有上下文空间）
    fn init(&self, _store: &mut ContextStore) {}

    /// 处理一个事件。非 handoff 调用先做分层合并并记录本次上下文；
    /// handoff 调用跳过合并，以保存的快照经反馈子协议回放。
    async fn step(
        &mut self,
        event: Event,
        envelope: Envelope,
        handoff: bool,
        store: &mut ContextStore,
    ) -> Result<StepOutcome, EngineError>;

    /// 把本角色的会话步骤写回长期记忆（运行收尾时调用）
    fn write_back(&self, _store: &ContextStore, _session_id: Option<&str>) {}
}

/// 构造角色所需的共享依赖，每次运行装配一份
#[derive(Clone)]
pub struct RoleDeps {
    pub service: Arc<dyn ReasoningService>,
    pub console: Arc<dyn OperatorConsole>,
    pub interact_mode: InteractMode,
    pub max_retry_times: u32,
    pub max_query_times: u32,
    pub long_term: Arc<dyn LongTermStore>,
    pub short_term: Arc<dyn ShortTermStore>,
    pub n_episodic_history: usize,
    pub n_linked_history: usize,
}

impl RoleDeps {
    pub fn new(
        service: Arc<dyn ReasoningService>,
        console: Arc<dyn OperatorConsole>,
        interact_mode: InteractMode,
    ) -> Self {
        Self {
            service,
            console,
            interact_mode,
            max_retry_times: 3,
            max_query_times: 20,
            long_term: Arc::new(NoopLongTerm),
            short_term: Arc::new(QueueStore::new()),
            n_episodic_history: 2,
            n_linked_history: 5,
        }
    }

    pub fn with_limits(mut self, max_retry_times: u32, max_query_times: u32) -> Self {
        self.max_retry_times = max_retry_times;
        self.max_query_times = max_query_times;
        self
    }

    pub fn with_long_term(mut self, store: Arc<dyn LongTermStore>) -> Self {
        self.long_term = store;
        self
    }

    pub fn with_short_term(mut self, store: Arc<dyn ShortTermStore>) -> Self {
        self.short_term = store;
        self
    }
}

/// 会话步骤日志：决策快照 + 经验，仅追加，供长期记忆回写
#[derive(Default)]
pub struct SessionStepLog {
    pub steps: Vec<Value>,
    pub experience: Vec<String>,
}

/// 每个具体角色内嵌一份 RoleCore
pub struct RoleCore {
    pub role: Role,
    protocol: QueryProtocol,
    long_term: Arc<dyn LongTermStore>,
    short_term: Arc<dyn ShortTermStore>,
    n_episodic_history: usize,
    n_linked_history: usize,
    session_step: SessionStepLog,
}

impl RoleCore {
    pub fn new(role: Role, deps: &RoleDeps) -> Self {
        Self {
            role,
            protocol: QueryProtocol::new(
                role,
                deps.interact_mode,
                deps.service.clone(),
                deps.console.clone(),
                deps.max_retry_times,
                deps.max_query_times,
            ),
            long_term: deps.long_term.clone(),
            short_term: deps.short_term.clone(),
            n_episodic_history: deps.n_episodic_history,
            n_linked_history: deps.n_linked_history,
            session_step: SessionStepLog::default(),
        }
    }

    /// step 入口的公共部分：非 handoff 时做分层合并并保存为本角色的最近上下文
    pub fn begin_step(
        &self,
        envelope: Envelope,
        handoff: bool,
        store: &mut ContextStore,
    ) -> Envelope {
        if handoff {
            return envelope;
        }
        let merged = store.prepare(self.role, &envelope);
        store.save_context(self.role, merged.clone());
        merged
    }

    /// 「我正在做什么」的一句话描述，作为长期记忆检索键
    pub fn generate_summary(&self, store: &ContextStore) -> String {
        let task = store.session_str(keys::TASK).unwrap_or_default();
        if let Some(role_tasks) = store.summary(self.role, keys::ROLE_TASKS) {
            if !role_tasks.as_array().map(Vec::is_empty).unwrap_or(true) {
                return format!(
                    "Role Task: {}\nTotal Task: {task}",
                    serde_json::to_string(role_tasks).unwrap_or_default()
                );
            }
        }
        if let Some(sub_tasks) = store.summary(self.role, keys::SUB_TASKS) {
            if !sub_tasks.as_array().map(Vec::is_empty).unwrap_or(true) {
                return format!(
                    "Sub Task: {}\nTotal Task: {task}",
                    serde_json::to_string(sub_tasks).unwrap_or_default()
                );
            }
        }
        task.to_string()
    }

    /// 装配 episodic 段：系统指令 + 按 summary 相似度检索到的历史任务示例。
    /// 检索结果反转，使相似度最高的示例最贴近活动查询。
    pub fn prepare_episodic(&mut self, system_prompt: Turn, summary: &str) {
        let mut turns = vec![system_prompt];

        let mut history = self
            .long_term
            .similarity_search(summary, self.n_episodic_history);
        history.reverse();
        if !history.is_empty() {
            let mut content = Vec::new();
            for (i, episode) in history.iter().enumerate() {
                content.push(format!("[Example {}]\n{}", i + 1, render_episode(episode)));
            }
            turns.push(Turn::system(content.join("\n")));
        }
        self.protocol.set_episodic(turns);
    }

    /// 装配 linked 段：短期记忆近因窗口，渲染为紧凑记录
    pub fn prepare_linked(&mut self) {
        let recent = self.short_term.recent(self.n_linked_history);
        if recent.is_empty() {
            self.protocol.set_linked(Vec::new());
            return;
        }
        let mut records = Vec::new();
        for (i, entry) in recent.iter().enumerate() {
            records.push(format!("[Record {}]\n{}", i + 1, render_record(entry)));
        }
        let content = format!(
            "The following is a record of the most recent steps performed. Consider how these records relate to the current task and draw on them to complete it.\n{}",
            records.join("\n")
        );
        self.protocol.set_linked(vec![Turn::system(content)]);
    }

    pub fn prepare_query(&mut self, turns: Vec<Turn>) {
        self.protocol.set_query(turns);
    }

    /// 发起一次受协议保护的查询
    pub async fn query(
        &mut self,
        store: &mut ContextStore,
        schema: &ResponseSchema,
    ) -> Result<QueryOutcome, EngineError> {
        self.protocol.run(store, schema).await
    }

    /// handoff 模式：以保存的快照回放，不重新装配上下文
    pub async fn handoff_query(
        &mut self,
        store: &mut ContextStore,
    ) -> Result<QueryOutcome, EngineError> {
        self.protocol.resume(store).await
    }

    pub fn record_step(&mut self, step: Value) {
        self.session_step.steps.push(step);
    }

    pub fn record_experience(&mut self, exp: impl Into<String>) {
        self.session_step.experience.push(exp.into());
    }

    pub fn store_short_term(&self, entry: Value) {
        self.short_term.add(entry);
    }

    pub fn transcript(&self) -> &[Turn] {
        self.protocol.transcript()
    }

    pub fn request_times(&self) -> u32 {
        self.protocol.request_times()
    }

    /// 把会话步骤作为一条任务记录写回长期记忆
    pub fn write_back_memory(&self, store: &ContextStore, session_id: Option<&str>) {
        if self.session_step.steps.is_empty() || !self.long_term.enabled() {
            return;
        }
        let summary = self.generate_summary(store);
        let mut entries = vec![serde_json::json!({ "Task": summary })];
        entries.extend(self.session_step.steps.iter().cloned());
        self.long_term
            .add(session_id, &summary, &entries, StoreMode::CreateWrite);
    }
}

/// 把一条历史任务记录渲染为提示文本
fn render_episode(episode: &[Value]) -> String {
    let task = episode
        .first()
        .and_then(|v| v.get("Task"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let mut steps = Vec::new();
    for (i, step) in episode.iter().skip(1).enumerate() {
        steps.push(format!(
            "(step {})\n```json\n{}\n```",
            i + 1,
            serde_json::to_string_pretty(step).unwrap_or_default()
        ));
    }
    format!("Task: {task}\nExecution Steps:\n{}", steps.join("\n"))
}

/// 把一条短期记忆渲染为 `key: value` 行
fn render_record(entry: &Value) -> String {
    match entry.as_object() {
        Some(map) => map
            .iter()
            .map(|(k, v)| {
                let rendered = match v {
                    Value::String(s) => s.clone(),
                    other => serde_json::to_string(other).unwrap_or_default(),
                };
                format!("{k}: {rendered}")
            })
            .collect::<Vec<_>>()
            .join("\n"),
        None => entry.to_string(),
    }
}

/// Interrupt 分支的统一归宿：向 Interactor 报告任务失败
pub fn interrupt_to_failure(role: Role, decision: &Decision) -> Envelope {
    Envelope::route(role, Role::Interactor, Event::TaskFailure)
        .with(keys::PROBLEM, decision.str_field(keys::PROBLEM))
        .with(keys::MESSAGE, decision.str_field(keys::MESSAGE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::JsonStore;
    use crate::query::ScriptedConsole;
    use crate::service::ScriptedService;
    use serde_json::json;

    fn deps() -> RoleDeps {
        RoleDeps::new(
            Arc::new(ScriptedService::new()),
            Arc::new(ScriptedConsole::new()),
            InteractMode::Passive,
        )
    }

    #[test]
    fn test_begin_step_merges_and_saves_context() {
        let core = RoleCore::new(Role::Searcher, &deps());
        let mut store = ContextStore::new();
        store.set_session(keys::TASK, "total");
        store.set_public(keys::ROLE_TASKS, vec!["sub"]);

        let env = Envelope::route(Role::TaskScheduler, Role::Searcher, Event::RoleStep);
        let merged = core.begin_step(env, false, &mut store);
        assert_eq!(merged.get_str(keys::TASK).unwrap(), "total");
        assert!(merged.has(keys::ROLE_TASKS));
        // 最近上下文已保存，可作为 handoff 目标
        assert!(store.saved_context(Role::Searcher).is_some());
    }

    #[test]
    fn test_handoff_step_skips_merge() {
        let core = RoleCore::new(Role::Searcher, &deps());
        let mut store = ContextStore::new();
        store.set_session(keys::TASK, "total");
        let env = Envelope::route(Role::TaskScheduler, Role::Searcher, Event::RoleStep);
        let same = core.begin_step(env.clone(), true, &mut store);
        assert_eq!(same, env);
        assert!(store.saved_context(Role::Searcher).is_none());
    }

    #[test]
    fn test_summary_prefers_role_tasks() {
        let core = RoleCore::new(Role::Searcher, &deps());
        let mut store = ContextStore::new();
        store.set_session(keys::TASK, "total task");
        assert_eq!(core.generate_summary(&store), "total task");

        store.set_summary(Role::Searcher, keys::ROLE_TASKS, vec!["find weather"]);
        let summary = core.generate_summary(&store);
        assert!(summary.starts_with("Role Task:"));
        assert!(summary.contains("total task"));
    }

    #[test]
    fn test_write_back_stores_episode() {
        let lt = Arc::new(JsonStore::new(10));
        let deps = deps().with_long_term(lt.clone());
        let mut core = RoleCore::new(Role::Planner, &deps);
        let mut store = ContextStore::new();
        store.set_session(keys::TASK, "check the weather in tokyo");

        core.record_step(json!({ "branch": "Continue" }));
        core.write_back_memory(&store, Some("s1"));

        let hits = lt.similarity_search("weather tokyo", 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].len(), 2);
    }
}
