//! 角色与事件枚举
//!
//! Role / Event 为封闭枚举：路由时 receiver 必须是已知 Role、event 必须是已知 Event，
//! 否则视为配置错误（RoutingError），不做静默忽略。

use serde::{Deserialize, Serialize};

/// 工作流中的角色。基础角色负责编排（Planner / TaskScheduler / Executor / Reviewer / Interactor），
/// 工作角色（Searcher / FileManager / Programmer / AppManager）执行具体子任务。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Human,
    Interactor,
    Planner,
    TaskScheduler,
    Executor,
    Reviewer,
    Searcher,
    FileManager,
    Programmer,
    AppManager,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Human => "Human",
            Role::Interactor => "Interactor",
            Role::Planner => "Planner",
            Role::TaskScheduler => "TaskScheduler",
            Role::Executor => "Executor",
            Role::Reviewer => "Reviewer",
            Role::Searcher => "Searcher",
            Role::FileManager => "FileManager",
            Role::Programmer => "Programmer",
            Role::AppManager => "AppManager",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        Role::all().iter().copied().find(|r| r.name() == s)
    }

    pub fn all() -> &'static [Role] {
        &[
            Role::Human,
            Role::Interactor,
            Role::Planner,
            Role::TaskScheduler,
            Role::Executor,
            Role::Reviewer,
            Role::Searcher,
            Role::FileManager,
            Role::Programmer,
            Role::AppManager,
        ]
    }

    /// 基础角色使用私有上下文空间，工作角色共享 role-public 空间
    pub fn is_base_role(&self) -> bool {
        matches!(
            self,
            Role::Interactor
                | Role::Planner
                | Role::TaskScheduler
                | Role::Executor
                | Role::Reviewer
        )
    }

    pub fn is_worker(&self) -> bool {
        matches!(
            self,
            Role::Searcher | Role::FileManager | Role::Programmer | Role::AppManager
        )
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 工作流事件：选择被寻址角色上的哪个处理器执行。
/// 每个 (Role, Event) 至多注册一个处理器，派发到未注册的事件是致命错误。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Event {
    /// Interactor：接收原始任务，启动会话
    StartTask,
    /// Planner：生成或重排子任务列表
    MakeSubTasks,
    /// TaskScheduler：根据子任务列表生成分发方案
    DistributeSubtasks,
    /// TaskScheduler：推进到下一条分发记录
    DistributeNextSubtask,
    /// 工作角色：执行当前子任务的一步
    RoleStep,
    /// Executor：校验并执行一个操作请求
    ExecuteOperation,
    /// Reviewer：比对操作前后状态并给出判定
    TrackState,
    /// Interactor / Planner：任务完成（内部信号，携带 role_infos 或 answer）
    TaskAccomplished,
    /// Interactor：任务失败（内部信号）
    TaskFailure,
    /// 终态：向 Human 返回最终答案
    Accomplished,
    /// 终态：向 Human 报告失败
    Failed,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::StartTask => "StartTask",
            Event::MakeSubTasks => "MakeSubTasks",
            Event::DistributeSubtasks => "DistributeSubtasks",
            Event::DistributeNextSubtask => "DistributeNextSubtask",
            Event::RoleStep => "RoleStep",
            Event::ExecuteOperation => "ExecuteOperation",
            Event::TrackState => "TrackState",
            Event::TaskAccomplished => "TaskAccomplished",
            Event::TaskFailure => "TaskFailure",
            Event::Accomplished => "Accomplished",
            Event::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Event> {
        Event::all().iter().copied().find(|e| e.name() == s)
    }

    pub fn all() -> &'static [Event] {
        &[
            Event::StartTask,
            Event::MakeSubTasks,
            Event::DistributeSubtasks,
            Event::DistributeNextSubtask,
            Event::RoleStep,
            Event::ExecuteOperation,
            Event::TrackState,
            Event::TaskAccomplished,
            Event::TaskFailure,
            Event::Accomplished,
            Event::Failed,
        ]
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 信封与 role-public 空间使用的固定键名
pub mod keys {
    pub const SENDER: &str = "sender";
    pub const RECEIVER: &str = "receiver";
    pub const EVENT: &str = "event";

    pub const TASK: &str = "task";
    pub const ANSWER: &str = "answer";
    pub const SUB_TASKS: &str = "sub_tasks";
    pub const ROLE_TASKS: &str = "role_tasks";
    pub const PROBLEM: &str = "problem";
    pub const MESSAGE: &str = "message";
    pub const FEEDBACK: &str = "feedback";
    pub const RESULT: &str = "result";
    pub const INFORMATION: &str = "information";
    pub const OPERATION: &str = "operation";
    pub const INTENTION: &str = "intention";
    pub const HANDLE_EVENT: &str = "handle_event";
    pub const MANDATOR: &str = "mandator";
    pub const ROLE_INFOS: &str = "role_infos";
    pub const LAST_OP: &str = "last_op";
    pub const EXECUTED_OP: &str = "executed_op";
    pub const BEFORE_STATE: &str = "before_state";
    pub const AFTER_STATE: &str = "after_state";
    pub const NO_TRACK: &str = "no_track";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_roundtrip() {
        for role in Role::all() {
            assert_eq!(Role::parse(role.name()), Some(*role));
        }
        assert_eq!(Role::parse("Unknown"), None);
    }

    #[test]
    fn test_event_roundtrip() {
        for event in Event::all() {
            assert_eq!(Event::parse(event.name()), Some(*event));
        }
        assert_eq!(Event::parse("NotAnEvent"), None);
    }

    #[test]
    fn test_role_partition() {
        assert!(Role::Planner.is_base_role());
        assert!(Role::Searcher.is_worker());
        assert!(!Role::Searcher.is_base_role());
        assert!(!Role::Human.is_base_role());
        assert!(!Role::Human.is_worker());
    }
}
