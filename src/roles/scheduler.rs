//! TaskScheduler：子任务分发
//!
//! 根据子任务列表与下游角色能力生成分发方案，保存在自己的私有上下文空间
//! （distribution 列表 + 游标），逐条派发给工作角色；
//! 方案不合适时走 RemakeSubtasks 分支退回 Planner；
//! 游标越过末尾时向 Planner 发出 TaskAccomplished 并附上累计的 role_infos。

use async_trait::async_trait;
use serde_json::Value;

use crate::context::{ContextStore, Envelope};
use crate::core::EngineError;
use crate::query::{
    branch, response_schema, BranchSpec, Decision, FieldKind, FieldSpec, QueryOutcome,
    ResponseSchema, SchemaMode,
};
use crate::roles::agent::{interrupt_to_failure, RoleAgent, RoleCore, RoleDeps, StepOutcome};
use crate::roles::prompts::{query_prompt, system_prompt};
use crate::roles::{keys, Event, Role};

const CAPABILITY: &str =
    "Schedules the execution of tasks based on the list of subtasks and downstream role capability descriptions.";

/// TaskScheduler 专属 branch
pub const REMAKE_SUBTASKS: &str = "RemakeSubtasks";

/// 私有空间键
const DISTRIBUTION: &str = "distribution";
const CURSOR: &str = "distribution_id";

pub struct TaskScheduler {
    core: RoleCore,
    schema: ResponseSchema,
    capabilities: String,
}

impl TaskScheduler {
    pub fn new(deps: &RoleDeps, capabilities: String) -> Self {
        let schema = response_schema(
            SchemaMode::Base,
            vec![FieldSpec::new(
                DISTRIBUTION,
                FieldKind::ObjectList,
                "A list of {\"role\": ..., \"role_tasks\": [...]} entries assigning subtasks to roles. Roles without subtasks are not listed.",
            )],
            vec![BranchSpec {
                tag: REMAKE_SUBTASKS.to_string(),
                description: "Set to `RemakeSubtasks` when the list of subtasks does not suit the downstream roles.".to_string(),
            }],
            deps.interact_mode,
        );
        Self {
            core: RoleCore::new(Role::TaskScheduler, deps),
            schema,
            capabilities,
        }
    }

    fn distribution(&self, store: &ContextStore) -> Result<Vec<Value>, EngineError> {
        Ok(store
            .private(Role::TaskScheduler, DISTRIBUTION)?
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    fn cursor(&self, store: &ContextStore) -> Result<usize, EngineError> {
        Ok(store
            .private(Role::TaskScheduler, CURSOR)?
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize)
    }

    /// 派发游标所指的分发记录
    fn dispatch_current(&mut self, store: &mut ContextStore) -> Result<Envelope, EngineError> {
        let distribution = self.distribution(store)?;
        let cursor = self.cursor(store)?;
        let entry = distribution.get(cursor).ok_or_else(|| {
            EngineError::routing(format!(
                "distribution cursor {cursor} is out of range ({} entries)",
                distribution.len()
            ))
        })?;

        let role_name = entry.get("role").and_then(Value::as_str).unwrap_or("");
        let target = Role::parse(role_name)
            .ok_or_else(|| EngineError::routing(format!("distribution names unknown role `{role_name}`")))?;
        let role_tasks = entry.get(keys::ROLE_TASKS).cloned().unwrap_or(Value::Array(vec![]));

        self.core.store_short_term(serde_json::json!({
            "Performed action": "distribute a subtask",
            "Distribute information": entry,
        }));
        store.set_public(keys::ROLE_TASKS, &role_tasks);

        Ok(Envelope::route(Role::TaskScheduler, target, Event::RoleStep)
            .with(keys::ROLE_TASKS, role_tasks))
    }

    fn resolve(&mut self, decision: &Decision, store: &mut ContextStore) -> Result<Envelope, EngineError> {
        match decision.branch.as_str() {
            branch::CONTINUE => self.dispatch_current(store),
            REMAKE_SUBTASKS => Ok(Envelope::route(
                Role::TaskScheduler,
                Role::Planner,
                Event::MakeSubTasks,
            )
            .with(keys::PROBLEM, decision.str_field(keys::PROBLEM))
            .with(keys::MESSAGE, decision.str_field(keys::MESSAGE))),
            branch::INTERRUPT => Ok(interrupt_to_failure(Role::TaskScheduler, decision)),
            other => Err(EngineError::UnreachableBranch {
                role: Role::TaskScheduler,
                branch: other.to_string(),
            }),
        }
    }

    async fn handle_distribute_subtasks(
        &mut self,
        data: Envelope,
        handoff: bool,
        store: &mut ContextStore,
    ) -> Result<StepOutcome, EngineError> {
        let decision = if handoff {
            match self.core.handoff_query(store).await? {
                QueryOutcome::Decision(d) => d,
                QueryOutcome::Skipped => return Ok(StepOutcome::Skipped),
                QueryOutcome::Switch(target) => return Ok(StepOutcome::HandoffRequested(target)),
            }
        } else {
            if data.is_filled(keys::SUB_TASKS) {
                store.set_summary(
                    Role::TaskScheduler,
                    keys::SUB_TASKS,
                    data.get(keys::SUB_TASKS)?.clone(),
                );
            }
            let summary = self.core.generate_summary(store);
            let sys = system_prompt(
                Role::TaskScheduler,
                CAPABILITY,
                &self.schema,
                Some(&format!("Downstream role capabilities:\n{}", self.capabilities)),
            );
            self.core.prepare_episodic(sys, &summary);
            self.core.prepare_linked();
            self.core.prepare_query(vec![query_prompt(
                "Distribute the subtasks below to the most capable roles.",
                &data,
                &[keys::SUB_TASKS, keys::ROLE_TASKS, keys::PROBLEM, keys::MESSAGE],
            )]);
            match self.core.query(store, &self.schema).await? {
                QueryOutcome::Decision(d) => d,
                QueryOutcome::Skipped => return Ok(StepOutcome::Skipped),
                QueryOutcome::Switch(target) => return Ok(StepOutcome::HandoffRequested(target)),
            }
        };

        let distribution = decision
            .get(DISTRIBUTION)
            .cloned()
            .unwrap_or(Value::Array(vec![]));
        self.core.record_step(serde_json::json!({
            "distribution": distribution,
            "branch": decision.branch,
        }));
        store.set_private(Role::TaskScheduler, DISTRIBUTION, &distribution)?;
        store.set_private(Role::TaskScheduler, CURSOR, 0u64)?;
        self.core.store_short_term(serde_json::json!({
            "Generated distribution": distribution,
            "Summary": decision.str_field("summary"),
        }));

        Ok(StepOutcome::Completed(self.resolve(&decision, store)?))
    }

    /// 推进游标；收集上一条子任务产出的 information；越界即宣告任务完成
    fn handle_distribute_next(
        &mut self,
        data: &Envelope,
        store: &mut ContextStore,
    ) -> Result<Envelope, EngineError> {
        if data.is_filled(keys::INFORMATION) {
            store.push_public(keys::ROLE_INFOS, data.get(keys::INFORMATION)?.clone());
        }

        let next = self.cursor(store)? + 1;
        store.set_private(Role::TaskScheduler, CURSOR, next as u64)?;

        if next >= self.distribution(store)?.len() {
            let role_infos = store
                .public(keys::ROLE_INFOS)
                .cloned()
                .unwrap_or(Value::Array(vec![]));
            return Ok(Envelope::route(
                Role::TaskScheduler,
                Role::Planner,
                Event::TaskAccomplished,
            )
            .with(keys::ROLE_INFOS, role_infos));
        }
        self.dispatch_current(store)
    }
}

#[async_trait]
impl RoleAgent for TaskScheduler {
    fn role(&self) -> Role {
        Role::TaskScheduler
    }

    fn capability(&self) -> &str {
        CAPABILITY
    }

    fn handles(&self, event: Event) -> bool {
        matches!(
            event,
            Event::DistributeSubtasks | Event::DistributeNextSubtask
        )
    }

    fn init(&self, store: &mut ContextStore) {
        store.create_private_scope(Role::TaskScheduler);
        let _ = store.set_private(Role::TaskScheduler, DISTRIBUTION, Vec::<Value>::new());
        let _ = store.set_private(Role::TaskScheduler, CURSOR, 0u64);
    }

    async fn step(
        &mut self,
        event: Event,
        envelope: Envelope,
        handoff: bool,
        store: &mut ContextStore,
    ) -> Result<StepOutcome, EngineError> {
        let data = self.core.begin_step(envelope, handoff, store);
        match event {
            Event::DistributeSubtasks => self.handle_distribute_subtasks(data, handoff, store).await,
            Event::DistributeNextSubtask => Ok(StepOutcome::Completed(
                self.handle_distribute_next(&data, store)?,
            )),
            other => Err(EngineError::unhandled(self.role(), other)),
        }
    }

    fn write_back(&self, store: &ContextStore, session_id: Option<&str>) {
        self.core.write_back_memory(store, session_id);
    }
}
