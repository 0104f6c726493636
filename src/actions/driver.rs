//! 操作执行驱动
//!
//! 外部 UI 自动化层的接口。引擎只在校验通过后调用 perform，
//! 并可在前后各取一次可读的桌面状态描述供 Reviewer 比对。

use async_trait::async_trait;

use crate::actions::OpRequest;
use crate::roles::Role;

/// 执行驱动 trait：实际的控件枚举、点击、截图等由实现方负责
#[async_trait]
pub trait ActionDriver: Send + Sync {
    /// 执行一个已通过注册表校验的操作，返回人类可读的执行结果
    async fn perform(&self, role: Role, request: &OpRequest) -> Result<String, String>;

    /// 可读的当前状态描述（如窗口快照的文本化），不可用时返回 None
    async fn capture_state(&self) -> Option<String> {
        None
    }
}

/// 回显驱动：不触碰任何真实界面，把操作请求回显为结果文本。
/// 作为无驱动环境下的默认实现，也便于演示与测试。
#[derive(Default)]
pub struct EchoDriver;

#[async_trait]
impl ActionDriver for EchoDriver {
    async fn perform(&self, role: Role, request: &OpRequest) -> Result<String, String> {
        Ok(format!(
            "{role} performed `{}` with params {}",
            request.name,
            serde_json::to_string(&request.params).unwrap_or_default()
        ))
    }
}
