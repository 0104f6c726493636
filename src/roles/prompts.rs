//! 角色提示构建
//!
//! 每个角色的系统提示 = 身份与能力描述 + 期望的响应 JSON 模板；
//! 查询提示 = 一句话指令 + 合并上下文中与本次决策相关的字段渲染。
//! 具体角色的提示模板属于外部协作者，这里只提供引擎自用的最小装配。

use crate::context::Envelope;
use crate::query::ResponseSchema;
use crate::roles::Role;
use crate::service::Turn;

/// 角色系统提示：身份、能力、可选补充段、响应格式模板
pub fn system_prompt(
    role: Role,
    capability: &str,
    schema: &ResponseSchema,
    extra: Option<&str>,
) -> Turn {
    let mut content = format!(
        "You are {role}, a member of a cooperative multi-agent team working on a shared task.\nCapability: {capability}\n"
    );
    if let Some(extra) = extra {
        content.push_str(extra);
        content.push('\n');
    }
    content.push_str(
        "Reply with exactly one JSON object. The expected json parameter format is\n```json\n",
    );
    content.push_str(&schema.render_template());
    content.push_str("\n```");
    Turn::system(content)
}

/// 查询提示：指令 + 选定上下文字段的逐行渲染
pub fn query_prompt(instruction: &str, data: &Envelope, fields: &[&str]) -> Turn {
    let mut content = String::from(instruction);
    content.push('\n');
    for key in fields {
        if data.is_filled(key) {
            if let Ok(value) = data.get(key) {
                let rendered = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => serde_json::to_string(other).unwrap_or_default(),
                };
                content.push_str(&format!("{key}: {rendered}\n"));
            }
        }
    }
    Turn::user(content)
}
