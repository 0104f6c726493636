//! Colony - Rust 多角色协同智能体引擎
//!
//! 模块划分：
//! - **actions**: 操作注册表（角色 -> 允许操作 -> 参数 schema）与执行驱动接口
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **context**: 消息信封与分层上下文存储
//! - **core**: 错误类型与传播策略
//! - **memory**: 长期 / 短期记忆存储接口与实现
//! - **query**: 弹性结构化查询协议（schema 校验、有界重试、人工反馈与 handoff）
//! - **roles**: 角色 / 事件枚举、RoleAgent 契约与具体角色
//! - **service**: 推理服务客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **workflow**: 编排器状态机与运行装配

pub mod actions;
pub mod config;
pub mod context;
pub mod core;
pub mod memory;
pub mod observability;
pub mod query;
pub mod roles;
pub mod service;
pub mod workflow;

pub use workflow::{EngineBuilder, Orchestrator, RunOutcome};
