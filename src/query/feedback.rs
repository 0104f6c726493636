//! 操作员控制台与反馈信号
//!
//! 人工反馈子协议的输入端：按行读取自由文本，在完整 trim 后的输入上
//! 大小写敏感地识别两个哨兵：`skip` 中止当前步骤，`switch to <role>` 请求
//! 把控制权移交给指定角色。空输入表示按原样接受当前决策（proactive 模式的放行口），
//! 其余文本作为指导意见追加后重发查询。

use std::collections::VecDeque;
use std::io::Write;
use std::sync::Mutex;

use crate::core::EngineError;
use crate::roles::Role;

/// 行式操作员控制台
pub trait OperatorConsole: Send + Sync {
    /// 输出提示并阻塞读取一行输入
    fn prompt(&self, message: &str) -> Result<String, EngineError>;
}

/// 标准输入输出控制台
#[derive(Default)]
pub struct StdioConsole;

impl OperatorConsole for StdioConsole {
    fn prompt(&self, message: &str) -> Result<String, EngineError> {
        println!("{message}");
        print!("> ");
        std::io::stdout()
            .flush()
            .map_err(|e| EngineError::Console(e.to_string()))?;
        let mut line = String::new();
        std::io::stdin()
            .read_line(&mut line)
            .map_err(|e| EngineError::Console(e.to_string()))?;
        Ok(line)
    }
}

/// 脚本化控制台（测试用）：按序弹出预置输入，耗尽后返回空行
#[derive(Default)]
pub struct ScriptedConsole {
    inputs: Mutex<VecDeque<String>>,
}

impl ScriptedConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(self, input: impl Into<String>) -> Self {
        self.inputs.lock().unwrap().push_back(input.into());
        self
    }
}

impl OperatorConsole for ScriptedConsole {
    fn prompt(&self, _message: &str) -> Result<String, EngineError> {
        Ok(self.inputs.lock().unwrap().pop_front().unwrap_or_default())
    }
}

/// 分类后的反馈信号
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackSignal {
    /// 空输入：按原样接受当前决策
    Accept,
    /// 中止当前步骤
    Skip,
    /// 移交控制权给指定角色
    Switch(Role),
    /// 追加指导意见并重发查询
    Guidance(String),
}

/// 在完整 trim 后的输入上识别哨兵。`switch to` 后跟未知角色名是路由错误。
pub fn classify(input: &str) -> Result<FeedbackSignal, EngineError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(FeedbackSignal::Accept);
    }
    if trimmed == "skip" {
        return Ok(FeedbackSignal::Skip);
    }
    if let Some(rest) = trimmed.strip_prefix("switch to ") {
        let name = rest.split_whitespace().last().unwrap_or("");
        let role = Role::parse(name)
            .ok_or_else(|| EngineError::routing(format!("switch target `{name}` is not a known role")))?;
        return Ok(FeedbackSignal::Switch(role));
    }
    Ok(FeedbackSignal::Guidance(trimmed.to_string()))
}
