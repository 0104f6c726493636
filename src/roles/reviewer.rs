//! Reviewer：状态跟踪与判定
//!
//! 比对操作前后的状态描述，判断操作是否达成了发起角色声明的意图，
//! 把判定作为 feedback 发回委托角色（mandator）的 handle_event。

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
    "Tracks changes in the working state and judges whether the performed operation meets the declared intention.";

pub struct Reviewer {
    core: RoleCore,
    schema: ResponseSchema,
    /// 最近一次跟踪的操作与意图，用于生成记忆检索描述
    track_op: Option<String>,
    track_intention: Option<String>,
}

impl Reviewer {
    pub fn new(deps: &RoleDeps) -> Self {
        let schema = response_schema(
            SchemaMode::Base,
            vec![
                FieldSpec::new(
                    "analyze",
                    FieldKind::Str,
                    "Your process for analyzing the before/after states.",
                ),
                FieldSpec::new(
                    "judgement",
                    FieldKind::Str,
                    "Your judgement as to whether the operation accomplished the intention.",
                ),
            ],
            vec![],
            deps.interact_mode,
        );
        Self {
            core: RoleCore::new(Role::Reviewer, deps),
            schema,
            track_op: None,
            track_intention: None,
        }
    }

    /// 检索键优先用「操作: 意图」，两者皆无时退回会话任务
    fn track_summary(&self, store: &ContextStore) -> String {
        match (&self.track_op, &self.track_intention) {
            (Some(op), Some(intention)) => format!("{op}: {intention}"),
            (None, Some(intention)) => intention.clone(),
            _ => store.session_str(keys::TASK).unwrap_or_default().to_string(),
        }
    }

    fn resolve(&self, decision: &Decision, data: &Envelope) -> Result<Envelope, EngineError> {
        match decision.branch.as_str() {
            branch::CONTINUE => {
                let mandator_name = data.get_str(keys::MANDATOR)?;
                let mandator = Role::parse(mandator_name)
                    .ok_or_else(|| EngineError::unknown_receiver(mandator_name))?;
                let handle_event_name = data.get_str(keys::HANDLE_EVENT)?;
                let handle_event = Event::parse(handle_event_name)
                    .ok_or_else(|| EngineError::unknown_event(handle_event_name))?;
                Ok(Envelope::route(Role::Reviewer, mandator, handle_event)
                    .with(keys::FEEDBACK, decision.str_field("judgement"))
                    .with(keys::MESSAGE, decision.str_field(keys::MESSAGE)))
            }
            branch::INTERRUPT => Ok(interrupt_to_failure(Role::Reviewer, decision)),
            other => Err(EngineError::UnreachableBranch {
                role: Role::Reviewer,
                branch: other.to_string(),
            }),
        }
    }

    async fn handle_track_state(
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
            self.track_op = data.get_str(keys::EXECUTED_OP).ok().map(str::to_string);
            self.track_intention = data.get_str(keys::INTENTION).ok().map(str::to_string);

            let summary = self.track_summary(store);
            let sys = system_prompt(Role::Reviewer, CAPABILITY, &self.schema, None);
            self.core.prepare_episodic(sys, &summary);
            self.core.prepare_linked();
            self.core.prepare_query(vec![query_prompt(
                "Judge whether the operation below accomplished its intention, based on the before/after states and the result.",
                &data,
                &[
                    keys::EXECUTED_OP,
                    keys::INTENTION,
                    keys::RESULT,
                    keys::BEFORE_STATE,
                    keys::AFTER_STATE,
                    keys::MESSAGE,
                ],
            )]);
            match self.core.query(store, &self.schema).await? {
                QueryOutcome::Decision(d) => d,
                QueryOutcome::Skipped => return Ok(StepOutcome::Skipped),
                QueryOutcome::Switch(target) => return Ok(StepOutcome::HandoffRequested(target)),
            }
        };

        self.core.record_step(serde_json::json!({
            "judgement": decision.str_field("judgement"),
            "branch": decision.branch,
        }));
        if let Some(op) = &self.track_op {
            self.core
                .record_experience(format!("{op}: {}", decision.str_field("judgement")));
        }
        self.core.store_short_term(serde_json::json!({
            "Tracked operation": self.track_op,
            "Judgement": decision.str_field("judgement"),
        }));

        Ok(StepOutcome::Completed(self.resolve(&decision, &data)?))
    }
}

#[async_trait]
impl RoleAgent for Reviewer {
    fn role(&self) -> Role {
        Role::Reviewer
    }

    fn capability(&self) -> &str {
        CAPABILITY
    }

    fn handles(&self, event: Event) -> bool {
        matches!(event, Event::TrackState)
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
            Event::TrackState => self.handle_track_state(data, handoff, store).await,
            other => Err(EngineError::unhandled(self.role(), other)),
        }
    }

    fn write_back(&self, store: &ContextStore, session_id: Option<&str>) {
        self.core.write_back_memory(store, session_id);
    }
}
