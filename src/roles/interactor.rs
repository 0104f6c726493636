//! Interactor：人与智能体团队之间的桥梁
//!
//! 接收原始任务并启动会话；在任务完成 / 失败时把终态信封转发给 Human。
//! 不查询推理服务。

use async_trait::async_trait;

use crate::context::{ContextStore, Envelope};
use crate::core::EngineError;
use crate::roles::agent::{RoleAgent, RoleCore, RoleDeps, StepOutcome};
use crate::roles::{keys, Event, Role};

pub struct Interactor {
    core: RoleCore,
}

impl Interactor {
    pub fn new(deps: &RoleDeps) -> Self {
        Self {
            core: RoleCore::new(Role::Interactor, deps),
        }
    }

    fn handle_start_task(
        &self,
        data: &Envelope,
        store: &mut ContextStore,
    ) -> Result<Envelope, EngineError> {
        let task = data.get_str(keys::TASK)?;
        store.set_session(keys::TASK, task);
        Ok(
            Envelope::route(Role::Interactor, Role::Planner, Event::MakeSubTasks)
                .with(keys::TASK, task),
        )
    }

    fn handle_task_accomplished(&self, data: &Envelope) -> Result<Envelope, EngineError> {
        let answer = data.get_str(keys::ANSWER)?;
        Ok(
            Envelope::route(Role::Interactor, Role::Human, Event::Accomplished)
                .with(keys::ANSWER, answer),
        )
    }

    fn handle_task_failure(&self, data: &Envelope) -> Envelope {
        let mut env = Envelope::route(Role::Interactor, Role::Human, Event::Failed);
        if data.is_filled(keys::PROBLEM) {
            env.insert(keys::PROBLEM, data.get(keys::PROBLEM).cloned().unwrap_or_default());
        }
        env
    }
}

#[async_trait]
impl RoleAgent for Interactor {
    fn role(&self) -> Role {
        Role::Interactor
    }

    fn capability(&self) -> &str {
        "A bridge for interaction between human and agents"
    }

    fn handles(&self, event: Event) -> bool {
        matches!(
            event,
            Event::StartTask | Event::TaskAccomplished | Event::TaskFailure
        )
    }

    async fn step(
        &mut self,
        event: Event,
        envelope: Envelope,
        handoff: bool,
        store: &mut ContextStore,
    ) -> Result<StepOutcome, EngineError> {
        let data = self.core.begin_step(envelope, handoff, store);
        let out = match event {
            Event::StartTask => self.handle_start_task(&data, store)?,
            Event::TaskAccomplished => self.handle_task_accomplished(&data)?,
            Event::TaskFailure => self.handle_task_failure(&data),
            other => return Err(EngineError::unhandled(self.role(), other)),
        };
        Ok(StepOutcome::Completed(out))
    }
}
