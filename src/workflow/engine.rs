//! 工作流编排器
//!
//! 消息流上的状态机：取当前信封，解析 receiver + event（缺失或未知即失败），
//! 检查处理器注册表后派发 step；HandoffRequested 载入目标角色保存的上下文并以
//! handoff 模式重入；Skipped 在无移交目标时按失败终止；
//! 终态事件 Accomplished / Failed 结束循环。严格顺序执行，任一时刻只有一个角色在运行。

use std::collections::HashMap;

use crate::context::{ContextStore, Envelope};
use crate::core::EngineError;
use crate::roles::{keys, Event, Role, RoleAgent, StepOutcome};

/// 一次运行的终态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// 任务完成，携带最终答案
    Accomplished(String),
    /// 任务失败
    Failed,
}

impl RunOutcome {
    /// 入口约定：失败时输出空字符串
    pub fn answer(self) -> String {
        match self {
            RunOutcome::Accomplished(answer) => answer,
            RunOutcome::Failed => String::new(),
        }
    }
}

/// 编排器：持有全部角色实例与上下文存储，每次运行构造一份
pub struct Orchestrator {
    agents: HashMap<Role, Box<dyn RoleAgent>>,
    store: ContextStore,
}

impl Orchestrator {
    pub fn new(agents: Vec<Box<dyn RoleAgent>>, mut store: ContextStore) -> Self {
        let mut map: HashMap<Role, Box<dyn RoleAgent>> = HashMap::new();
        for agent in agents {
            agent.init(&mut store);
            map.insert(agent.role(), agent);
        }
        Self { agents: map, store }
    }

    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    /// 运行入口：单个任务字符串进，终态出
    pub async fn run(&mut self, task: &str) -> Result<RunOutcome, EngineError> {
        let envelope = Envelope::route(Role::Human, Role::Interactor, Event::StartTask)
            .with(keys::TASK, task);
        self.run_from(envelope).await
    }

    /// 从任意起始信封驱动循环
    pub async fn run_from(&mut self, mut envelope: Envelope) -> Result<RunOutcome, EngineError> {
        let mut handoff = false;
        loop {
            let receiver = envelope.receiver()?;
            let event = envelope.event()?;
            tracing::debug!(%receiver, %event, handoff, "dispatching");

            let agent = self
                .agents
                .get_mut(&receiver)
                .ok_or_else(|| EngineError::unknown_receiver(receiver.name()))?;
            if !agent.handles(event) {
                return Err(EngineError::unhandled(receiver, event));
            }

            let outcome = agent.step(event, envelope, handoff, &mut self.store).await?;
            handoff = false;

            match outcome {
                StepOutcome::Completed(next) => {
                    match next.event()? {
                        Event::Accomplished => {
                            let answer = next.get_str(keys::ANSWER)?.to_string();
                            tracing::info!("task accomplished");
                            return Ok(RunOutcome::Accomplished(answer));
                        }
                        Event::Failed => {
                            tracing::warn!("task failed");
                            return Ok(RunOutcome::Failed);
                        }
                        _ => envelope = next,
                    }
                }
                StepOutcome::HandoffRequested(target) => {
                    let saved = self
                        .store
                        .saved_context(target)
                        .cloned()
                        .ok_or(EngineError::NoSavedContext(target))?;
                    tracing::info!(%target, "handoff re-entry");
                    envelope = saved;
                    handoff = true;
                }
                StepOutcome::Skipped => {
                    tracing::warn!("step skipped by operator, terminating run as failure");
                    return Ok(RunOutcome::Failed);
                }
            }
        }
    }

    /// 收尾：把各角色的会话步骤写回长期记忆
    pub fn write_back_memories(&self, session_id: Option<&str>) {
        for agent in self.agents.values() {
            agent.write_back(&self.store, session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// 极简角色：把收到的信封按脚本转发
    struct RelayRole {
        role: Role,
        event: Event,
        next: Option<Envelope>,
    }

    #[async_trait]
    impl RoleAgent for RelayRole {
        fn role(&self) -> Role {
            self.role
        }

        fn handles(&self, event: Event) -> bool {
            event == self.event
        }

        async fn step(
            &mut self,
            _event: Event,
            _envelope: Envelope,
            _handoff: bool,
            _store: &mut ContextStore,
        ) -> Result<StepOutcome, EngineError> {
            Ok(StepOutcome::Completed(self.next.clone().expect("scripted")))
        }
    }

    #[tokio::test]
    async fn test_unknown_receiver_fails_fast() {
        let mut orch = Orchestrator::new(vec![], ContextStore::new());
        let err = orch.run("anything").await.unwrap_err();
        assert!(matches!(err, EngineError::Routing(_)));
    }

    #[tokio::test]
    async fn test_unregistered_event_fails_fast() {
        let agent = RelayRole {
            role: Role::Interactor,
            event: Event::TaskFailure,
            next: None,
        };
        let mut orch = Orchestrator::new(vec![Box::new(agent)], ContextStore::new());
        // Interactor 在场但未注册 StartTask
        let err = orch.run("anything").await.unwrap_err();
        assert!(matches!(err, EngineError::Routing(_)));
    }

    #[tokio::test]
    async fn test_terminal_accomplished_returns_answer() {
        let agent = RelayRole {
            role: Role::Interactor,
            event: Event::StartTask,
            next: Some(
                Envelope::route(Role::Interactor, Role::Human, Event::Accomplished)
                    .with(keys::ANSWER, "42"),
            ),
        };
        let mut orch = Orchestrator::new(vec![Box::new(agent)], ContextStore::new());
        let outcome = orch.run("meaning of life").await.unwrap();
        assert_eq!(outcome, RunOutcome::Accomplished("42".to_string()));
        assert_eq!(outcome.answer(), "42");
    }

    #[tokio::test]
    async fn test_terminal_failed_yields_empty_answer() {
        let agent = RelayRole {
            role: Role::Interactor,
            event: Event::StartTask,
            next: Some(Envelope::route(Role::Interactor, Role::Human, Event::Failed)),
        };
        let mut orch = Orchestrator::new(vec![Box::new(agent)], ContextStore::new());
        let outcome = orch.run("doomed").await.unwrap();
        assert_eq!(outcome, RunOutcome::Failed);
        assert_eq!(outcome.answer(), "");
    }

    #[tokio::test]
    async fn test_handoff_to_never_run_role_is_fatal() {
        struct SwitchingRole;

        #[async_trait]
        impl RoleAgent for SwitchingRole {
            fn role(&self) -> Role {
                Role::Interactor
            }

            fn handles(&self, event: Event) -> bool {
                event == Event::StartTask
            }

            async fn step(
                &mut self,
                _event: Event,
                _envelope: Envelope,
                _handoff: bool,
                _store: &mut ContextStore,
            ) -> Result<StepOutcome, EngineError> {
                Ok(StepOutcome::HandoffRequested(Role::Planner))
            }
        }

        let mut orch = Orchestrator::new(vec![Box::new(SwitchingRole)], ContextStore::new());
        let err = orch.run("anything").await.unwrap_err();
        assert!(matches!(err, EngineError::NoSavedContext(Role::Planner)));
    }

    #[tokio::test]
    async fn test_skip_terminates_run_as_failure() {
        struct SkippingRole;

        #[async_trait]
        impl RoleAgent for SkippingRole {
            fn role(&self) -> Role {
                Role::Interactor
            }

            fn handles(&self, event: Event) -> bool {
                event == Event::StartTask
            }

            async fn step(
                &mut self,
                _event: Event,
                _envelope: Envelope,
                _handoff: bool,
                _store: &mut ContextStore,
            ) -> Result<StepOutcome, EngineError> {
                Ok(StepOutcome::Skipped)
            }
        }

        let mut orch = Orchestrator::new(vec![Box::new(SkippingRole)], ContextStore::new());
        let outcome = orch.run("anything").await.unwrap();
        assert_eq!(outcome, RunOutcome::Failed);
    }
}
