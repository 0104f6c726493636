//! Planner：任务分解与最终答案合成
//!
//! MakeSubTasks：把原始任务（或下游报告的问题）分解为子任务列表，交给 TaskScheduler。
//! TaskAccomplished：分发全部完成后，从各角色上报的 role_infos 合成最终答案。

use async_trait::async_trait;

use crate::context::{ContextStore, Envelope};
use crate::core::EngineError;
use crate::query::{
    branch, response_schema, Decision, FieldKind, FieldSpec, QueryOutcome, ResponseSchema,
    SchemaMode,
};
use crate::roles::agent::{interrupt_to_failure, RoleAgent, RoleCore, RoleDeps, StepOutcome};
use crate::roles::prompts::{query_prompt, system_prompt};
use crate::roles::{keys, Event, Role};

const CAPABILITY: &str =
    "Decomposes the total task into an ordered list of subtasks based on downstream role capabilities, and composes the final answer when all subtasks are done.";

pub struct Planner {
    core: RoleCore,
    /// 子任务分解用 schema（base + sub_tasks）
    plan_schema: ResponseSchema,
    /// 答案合成用 schema（base + answer）
    answer_schema: ResponseSchema,
    /// 下游角色能力描述，拼入系统提示
    capabilities: String,
}

impl Planner {
    pub fn new(deps: &RoleDeps, capabilities: String) -> Self {
        let plan_schema = response_schema(
            SchemaMode::Base,
            vec![FieldSpec::new(
                keys::SUB_TASKS,
                FieldKind::StrList,
                "An ordered list of subtasks that together accomplish the total task. Keep each subtask self-contained and assignable to a single role.",
            )],
            vec![],
            deps.interact_mode,
        );
        let answer_schema = response_schema(
            SchemaMode::Base,
            vec![FieldSpec::new(
                keys::ANSWER,
                FieldKind::Str,
                "The final answer to the total task, composed from the collected role reports.",
            )],
            vec![],
            deps.interact_mode,
        );
        Self {
            core: RoleCore::new(Role::Planner, deps),
            plan_schema,
            answer_schema,
            capabilities,
        }
    }

    fn resolve_plan(&self, decision: &Decision) -> Result<Envelope, EngineError> {
        match decision.branch.as_str() {
            branch::CONTINUE => Ok(Envelope::route(
                Role::Planner,
                Role::TaskScheduler,
                Event::DistributeSubtasks,
            )
            .with(keys::SUB_TASKS, decision.list_field(keys::SUB_TASKS))
            .with(keys::MESSAGE, decision.str_field(keys::MESSAGE))),
            branch::INTERRUPT => Ok(interrupt_to_failure(Role::Planner, decision)),
            other => Err(EngineError::UnreachableBranch {
                role: Role::Planner,
                branch: other.to_string(),
            }),
        }
    }

    fn resolve_answer(&self, decision: &Decision) -> Result<Envelope, EngineError> {
        match decision.branch.as_str() {
            branch::CONTINUE => Ok(Envelope::route(
                Role::Planner,
                Role::Interactor,
                Event::TaskAccomplished,
            )
            .with(keys::ANSWER, decision.str_field(keys::ANSWER))),
            branch::INTERRUPT => Ok(interrupt_to_failure(Role::Planner, decision)),
            other => Err(EngineError::UnreachableBranch {
                role: Role::Planner,
                branch: other.to_string(),
            }),
        }
    }

    async fn handle_make_sub_tasks(
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
            let summary = self.core.generate_summary(store);
            let sys = system_prompt(
                Role::Planner,
                CAPABILITY,
                &self.plan_schema,
                Some(&format!("Downstream role capabilities:\n{}", self.capabilities)),
            );
            self.core.prepare_episodic(sys, &summary);
            self.core.prepare_linked();
            self.core.prepare_query(vec![query_prompt(
                "Decompose the task below into subtasks. If a problem was reported, rework the previous plan accordingly.",
                &data,
                &[keys::TASK, keys::PROBLEM, keys::ROLE_TASKS, keys::MESSAGE],
            )]);
            match self.core.query(store, &self.plan_schema).await? {
                QueryOutcome::Decision(d) => d,
                QueryOutcome::Skipped => return Ok(StepOutcome::Skipped),
                QueryOutcome::Switch(target) => return Ok(StepOutcome::HandoffRequested(target)),
            }
        };

        let sub_tasks = decision.list_field(keys::SUB_TASKS);
        store.set_summary(Role::Planner, keys::SUB_TASKS, &sub_tasks);
        self.core.record_step(serde_json::json!({
            "sub_tasks": sub_tasks,
            "branch": decision.branch,
        }));
        self.core.store_short_term(serde_json::json!({
            "Generated subtasks": sub_tasks,
            "Summary": decision.str_field("summary"),
        }));

        Ok(StepOutcome::Completed(self.resolve_plan(&decision)?))
    }

    async fn handle_task_accomplished(
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
            let summary = self.core.generate_summary(store);
            let sys = system_prompt(Role::Planner, CAPABILITY, &self.answer_schema, None);
            self.core.prepare_episodic(sys, &summary);
            self.core.prepare_linked();
            self.core.prepare_query(vec![query_prompt(
                "All subtasks are complete. Compose the final answer to the total task from the collected role reports.",
                &data,
                &[keys::TASK, keys::ROLE_INFOS, keys::MESSAGE],
            )]);
            match self.core.query(store, &self.answer_schema).await? {
                QueryOutcome::Decision(d) => d,
                QueryOutcome::Skipped => return Ok(StepOutcome::Skipped),
                QueryOutcome::Switch(target) => return Ok(StepOutcome::HandoffRequested(target)),
            }
        };

        self.core.record_step(serde_json::json!({
            "answer": decision.str_field(keys::ANSWER),
            "branch": decision.branch,
        }));

        Ok(StepOutcome::Completed(self.resolve_answer(&decision)?))
    }
}

#[async_trait]
impl RoleAgent for Planner {
    fn role(&self) -> Role {
        Role::Planner
    }

    fn capability(&self) -> &str {
        CAPABILITY
    }

    fn handles(&self, event: Event) -> bool {
        matches!(event, Event::MakeSubTasks | Event::TaskAccomplished)
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
            Event::MakeSubTasks => self.handle_make_sub_tasks(data, handoff, store).await,
            Event::TaskAccomplished => self.handle_task_accomplished(data, handoff, store).await,
            other => Err(EngineError::unhandled(self.role(), other)),
        }
    }

    fn write_back(&self, store: &ContextStore, session_id: Option<&str>) {
        self.core.write_back_memory(store, session_id);
    }
}
