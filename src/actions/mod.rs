//! 操作层接口：按角色划分的操作注册表与执行驱动
//!
//! 引擎不实现 UI 自动化本身，只约束契约：请求的操作名必须属于发起角色的
//! 允许集合，参数必须满足该操作声明的 schema，之后才会被转发给执行驱动。

pub mod driver;
pub mod registry;

pub use driver::{ActionDriver, EchoDriver};
pub use registry::{op_request_schema_json, ActionRegistry, ActionSpec, OpRequest};
