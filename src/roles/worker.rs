//! 工作角色
//!
//! Searcher / FileManager / Programmer / AppManager 的公共实现：
//! 接收 RoleStep，带着分配到的 role_tasks 与上一步反馈查询推理服务，
//! 按 branch 分流：Continue 把选定的操作交给 Executor；
//! RoleTaskFinish 把提炼的 information 交回 TaskScheduler 并推进分发；
//! TaskMismatch 连同问题描述退回 TaskScheduler 重新分发。

use std::sync::Arc;

use async_trait::async_trait;

use crate::actions::ActionRegistry;
use crate::context::{ContextStore, Envelope};
use crate::core::EngineError;
use crate::query::{
    branch, response_schema, Decision, FieldKind, FieldSpec, QueryOutcome, ResponseSchema,
    SchemaMode,
};
use crate::roles::agent::{interrupt_to_failure, RoleAgent, RoleCore, RoleDeps, StepOutcome};
use crate::roles::prompts::{query_prompt, system_prompt};
use crate::roles::{keys, Event, Role};

pub struct WorkerRole {
    core: RoleCore,
    role: Role,
    capability: String,
    schema: ResponseSchema,
    registry: Arc<ActionRegistry>,
}

impl WorkerRole {
    pub fn new(
        role: Role,
        capability: impl Into<String>,
        deps: &RoleDeps,
        registry: Arc<ActionRegistry>,
    ) -> Self {
        debug_assert!(role.is_worker());
        let schema = response_schema(
            SchemaMode::Role,
            vec![
                FieldSpec::new(
                    "observation",
                    FieldKind::Str,
                    "A detailed description of the current scene based on the latest state and the task at hand.",
                ),
                FieldSpec::new(
                    keys::INFORMATION,
                    FieldKind::Str,
                    "Useful information extracted from the current scene that helps answer the task. Set to an empty string if nothing applies.",
                ),
            ],
            vec![],
            deps.interact_mode,
        );
        Self {
            core: RoleCore::new(role, deps),
            role,
            capability: capability.into(),
            schema,
            registry,
        }
    }

    fn resolve(&self, decision: &Decision, data: &Envelope) -> Result<Envelope, EngineError> {
        match decision.branch.as_str() {
            branch::CONTINUE => {
                let operation = decision
                    .get(keys::OPERATION)
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                Ok(
                    Envelope::route(self.role, Role::Executor, Event::ExecuteOperation)
                        .with(keys::OPERATION, operation)
                        .with(keys::INTENTION, decision.str_field(keys::INTENTION))
                        .with(keys::MESSAGE, decision.str_field(keys::MESSAGE))
                        .with(keys::HANDLE_EVENT, Event::RoleStep.name()),
                )
            }
            branch::ROLE_TASK_FINISH => Ok(Envelope::route(
                self.role,
                Role::TaskScheduler,
                Event::DistributeNextSubtask,
            )
            .with(keys::INFORMATION, decision.str_field(keys::INFORMATION))
            .with(keys::MESSAGE, decision.str_field(keys::MESSAGE))),
            branch::TASK_MISMATCH => {
                let mut env = Envelope::route(
                    self.role,
                    Role::TaskScheduler,
                    Event::DistributeSubtasks,
                )
                .with(keys::PROBLEM, decision.str_field(keys::PROBLEM))
                .with(keys::MESSAGE, decision.str_field(keys::MESSAGE));
                if data.is_filled(keys::ROLE_TASKS) {
                    env.insert(keys::ROLE_TASKS, data.get(keys::ROLE_TASKS)?.clone());
                }
                Ok(env)
            }
            branch::INTERRUPT => Ok(interrupt_to_failure(self.role, decision)),
            other => Err(EngineError::UnreachableBranch {
                role: self.role,
                branch: other.to_string(),
            }),
        }
    }

    async fn handle_role_step(
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
            if data.is_filled(keys::ROLE_TASKS) {
                store.set_summary(self.role, keys::ROLE_TASKS, data.get(keys::ROLE_TASKS)?.clone());
            }
            let summary = self.core.generate_summary(store);
            let ops = self.registry.describe_ops(self.role);
            let extra = if ops.is_empty() {
                None
            } else {
                Some(format!(
                    "Available operations:\n{ops}\nOperation request format (JSON Schema):\n{}",
                    crate::actions::op_request_schema_json()
                ))
            };
            let sys = system_prompt(self.role, &self.capability, &self.schema, extra.as_deref());
            self.core.prepare_episodic(sys, &summary);
            self.core.prepare_linked();
            self.core.prepare_query(vec![query_prompt(
                "Work on your assigned subtasks. Choose at most one operation for this step.",
                &data,
                &[
                    keys::ROLE_TASKS,
                    keys::FEEDBACK,
                    keys::RESULT,
                    keys::MESSAGE,
                    keys::PROBLEM,
                ],
            )]);
            match self.core.query(store, &self.schema).await? {
                QueryOutcome::Decision(d) => d,
                QueryOutcome::Skipped => return Ok(StepOutcome::Skipped),
                QueryOutcome::Switch(target) => return Ok(StepOutcome::HandoffRequested(target)),
            }
        };

        self.core.record_step(serde_json::json!({
            "observation": decision.str_field("observation"),
            "intention": decision.str_field(keys::INTENTION),
            "operation": decision.get(keys::OPERATION),
            "branch": decision.branch,
        }));
        self.core.store_short_term(serde_json::json!({
            "Intention": decision.str_field(keys::INTENTION),
            "Operation": decision.get(keys::OPERATION),
            "Summary": decision.str_field("summary"),
        }));

        Ok(StepOutcome::Completed(self.resolve(&decision, &data)?))
    }
}

#[async_trait]
impl RoleAgent for WorkerRole {
    fn role(&self) -> Role {
        self.role
    }

    fn capability(&self) -> &str {
        &self.capability
    }

    fn handles(&self, event: Event) -> bool {
        matches!(event, Event::RoleStep)
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
            Event::RoleStep => self.handle_role_step(data, handoff, store).await,
            other => Err(EngineError::unhandled(self.role, other)),
        }
    }

    fn write_back(&self, store: &ContextStore, session_id: Option<&str>) {
        self.core.write_back_memory(store, session_id);
    }
}
