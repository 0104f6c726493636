//! 角色层：角色/事件枚举、RoleAgent 契约与具体角色实现

pub mod agent;
pub mod executor;
pub mod interactor;
pub mod planner;
pub mod prompts;
pub mod reviewer;
pub mod scheduler;
pub mod types;
pub mod worker;

pub use agent::{RoleAgent, RoleCore, RoleDeps, StepOutcome};
pub use executor::Executor;
pub use interactor::Interactor;
pub use planner::Planner;
pub use reviewer::Reviewer;
pub use scheduler::TaskScheduler;
pub use types::{keys, Event, Role};
pub use worker::WorkerRole;
