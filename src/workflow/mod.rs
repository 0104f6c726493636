//! 工作流层：编排器状态机与运行装配

pub mod builder;
pub mod engine;

pub use builder::{default_registry, EngineBuilder};
pub use engine::{Orchestrator, RunOutcome};
