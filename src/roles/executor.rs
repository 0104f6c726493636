//! Executor：操作校验与执行
//!
//! 工作角色只负责选择操作；Executor 在转发给驱动之前按注册表校验：
//! 操作必须属于发起角色的允许集合、参数必须满足声明的 schema。
//! 校验或执行失败都以 feedback 信封退回发起角色重试，不终止运行。
//! 执行前后各采一次状态描述，交给 Reviewer 比对。不查询推理服务。

use std::sync::Arc;

use async_trait::async_trait;

use crate::actions::{ActionDriver, ActionRegistry, OpRequest};
use crate::context::{ContextStore, Envelope};
use crate::core::EngineError;
use crate::roles::agent::{RoleAgent, RoleCore, RoleDeps, StepOutcome};
use crate::roles::{keys, Event, Role};

pub struct Executor {
    core: RoleCore,
    registry: Arc<ActionRegistry>,
    driver: Arc<dyn ActionDriver>,
}

impl Executor {
    pub fn new(deps: &RoleDeps, registry: Arc<ActionRegistry>, driver: Arc<dyn ActionDriver>) -> Self {
        Self {
            core: RoleCore::new(Role::Executor, deps),
            registry,
            driver,
        }
    }

    fn feedback(mandator: Role, handle_event: Event, text: String) -> Envelope {
        Envelope::route(Role::Executor, mandator, handle_event).with(keys::FEEDBACK, text)
    }

    async fn handle_execute_op(
        &mut self,
        data: &Envelope,
        store: &mut ContextStore,
    ) -> Result<Envelope, EngineError> {
        let mandator = data.sender()?;
        let handle_event_name = data.get_str(keys::HANDLE_EVENT)?;
        let handle_event = Event::parse(handle_event_name)
            .ok_or_else(|| EngineError::unknown_event(handle_event_name))?;

        if !data.is_filled(keys::OPERATION) {
            return Ok(Self::feedback(
                mandator,
                handle_event,
                "The operation is not specified, please check the operation.".to_string(),
            ));
        }

        let request = match OpRequest::from_value(data.get(keys::OPERATION)?) {
            Ok(req) => req,
            Err(e) => return Ok(Self::feedback(mandator, handle_event, e.to_string())),
        };
        if let Err(e) = self.registry.validate_request(mandator, &request) {
            return Ok(Self::feedback(
                mandator,
                handle_event,
                format!("The operation failed validation, please check it. {e}"),
            ));
        }

        let track = !data.is_filled(keys::NO_TRACK);
        let before_state = if track {
            self.driver.capture_state().await
        } else {
            None
        };

        let result = match self.driver.perform(mandator, &request).await {
            Ok(r) => r,
            Err(e) => {
                return Ok(Self::feedback(
                    mandator,
                    handle_event,
                    format!(
                        "Executor: the operation failed to execute, please check the operation. This is the error:\n{e}"
                    ),
                ));
            }
        };

        let after_state = if track {
            self.driver.capture_state().await
        } else {
            None
        };

        store.set_public(keys::RESULT, &result);
        store.set_public(keys::LAST_OP, &request.name);

        let intention = data
            .get(keys::INTENTION)
            .cloned()
            .unwrap_or(serde_json::Value::String(String::new()));
        Ok(
            Envelope::route(Role::Executor, Role::Reviewer, Event::TrackState)
                .with(keys::BEFORE_STATE, before_state)
                .with(keys::AFTER_STATE, after_state)
                .with(keys::EXECUTED_OP, &request.name)
                .with(keys::MANDATOR, mandator.name())
                .with(keys::RESULT, result)
                .with(keys::HANDLE_EVENT, handle_event.name())
                .with(keys::INTENTION, intention),
        )
    }
}

#[async_trait]
impl RoleAgent for Executor {
    fn role(&self) -> Role {
        Role::Executor
    }

    fn capability(&self) -> &str {
        "Validates operation requests against the action registry and performs them through the action driver."
    }

    fn handles(&self, event: Event) -> bool {
        matches!(event, Event::ExecuteOperation)
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
            Event::ExecuteOperation => Ok(StepOutcome::Completed(
                self.handle_execute_op(&data, store).await?,
            )),
            other => Err(EngineError::unhandled(self.role(), other)),
        }
    }
}
