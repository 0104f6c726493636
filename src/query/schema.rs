//! 响应 schema 描述符
//!
//! 每个角色在构造时生成一个不可变的 schema：基础字段集 + 角色模式扩展字段 +
//! 角色自定义 branch + 按交互模式二选一附加的 NeedHumanHelp / Interrupt。
//! 运行期用它做字段级校验（缺字段、类型不符、多余键），并渲染为提示文本
//! 供系统提示与纠错 tip 回显。

use serde_json::{json, Map, Value};

use crate::core::FormatError;
use crate::roles::keys;

/// 交互模式：proactive 每步都请人审阅；passive 在 NeedHumanHelp 分支时升级；
/// non-interactive 以 Interrupt 分支替代求助。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractMode {
    Proactive,
    Passive,
    NonInteractive,
}

impl InteractMode {
    pub fn parse(s: &str) -> Option<InteractMode> {
        match s {
            "proactive" => Some(InteractMode::Proactive),
            "passive" => Some(InteractMode::Passive),
            "non-interactive" => Some(InteractMode::NonInteractive),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InteractMode::Proactive => "proactive",
            InteractMode::Passive => "passive",
            InteractMode::NonInteractive => "non-interactive",
        }
    }
}

/// 常用 branch 取值
pub mod branch {
    pub const CONTINUE: &str = "Continue";
    pub const ROLE_TASK_FINISH: &str = "RoleTaskFinish";
    pub const TASK_MISMATCH: &str = "TaskMismatch";
    pub const NEED_HUMAN_HELP: &str = "NeedHumanHelp";
    pub const INTERRUPT: &str = "Interrupt";
}

/// schema 构造模式：base 用于编排类角色，role 用于执行动作的工作角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaMode {
    Base,
    Role,
}

/// 字段类型。校验是结构性的：字符串、字符串列表、对象列表、可空对象/字符串。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Str,
    StrList,
    ObjectList,
    /// 可为 null 的对象（如 operation：无操作时置空）
    NullableObject,
    NullableStr,
}

/// 单个响应字段的描述
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub description: String,
}

impl FieldSpec {
    pub fn new(name: &str, kind: FieldKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
        }
    }
}

/// 一个 branch 取值及其说明
#[derive(Debug, Clone)]
pub struct BranchSpec {
    pub tag: String,
    pub description: String,
}

/// 不可变的响应 schema。构造一次，整个运行期复用。
#[derive(Debug, Clone)]
pub struct ResponseSchema {
    pub fields: Vec<FieldSpec>,
    pub branches: Vec<BranchSpec>,
}

fn base_branch_specs() -> Vec<BranchSpec> {
    vec![BranchSpec {
        tag: branch::CONTINUE.to_string(),
        description: "Set to `Continue` when normal response processing of the task is underway, so that the next action can be performed.".to_string(),
    }]
}

fn role_branch_specs() -> Vec<BranchSpec> {
    let mut specs = base_branch_specs();
    specs.push(BranchSpec {
        tag: branch::ROLE_TASK_FINISH.to_string(),
        description: "Set to `RoleTaskFinish` when all the assigned subtasks are complete, so that the other subtasks can be executed.".to_string(),
    });
    specs.push(BranchSpec {
        tag: branch::TASK_MISMATCH.to_string(),
        description: "Set to `TaskMismatch` when you have been assigned a subtask that exceeds your capacity, so that the subtask can be reassigned.".to_string(),
    });
    specs
}

fn base_field_specs() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new(
            keys::PROBLEM,
            FieldKind::Str,
            "The problems you encountered. When the task is executed normally, set this to an empty string ''.",
        ),
        FieldSpec::new(
            keys::MESSAGE,
            FieldKind::Str,
            "The information you want to tell the next agent. If there is nothing to pass on, set it to an empty string ''.",
        ),
        FieldSpec::new(
            "summary",
            FieldKind::Str,
            "Summarize the conversation: did the previous answer meet the task requirements, what have you done now, and why.",
        ),
    ]
}

fn role_field_specs() -> Vec<FieldSpec> {
    let mut fields = vec![
        FieldSpec::new(
            "thought_process",
            FieldKind::StrList,
            "Give your thought process on the question, step by step.",
        ),
        FieldSpec::new(
            "local_plan",
            FieldKind::StrList,
            "Give more detailed execution steps based on your experience and the current scenario and subtasks.",
        ),
        FieldSpec::new(
            keys::INTENTION,
            FieldKind::Str,
            "The purpose of this step, that is, why you chose this operation.",
        ),
        FieldSpec::new(
            keys::OPERATION,
            FieldKind::NullableObject,
            "The operation to perform and its parameters, as {\"name\": ..., \"params\": {...}}. Set to null when no operation is needed.",
        ),
    ];
    fields.extend(base_field_specs());
    fields
}

/// 构造响应 schema：基础/角色模式字段集 + 额外字段 + 角色自定义 branch +
/// 交互模式条件分支。NeedHumanHelp 与 Interrupt 互斥，proactive 模式二者皆无。
pub fn response_schema(
    mode: SchemaMode,
    extra_fields: Vec<FieldSpec>,
    extra_branches: Vec<BranchSpec>,
    interact_mode: InteractMode,
) -> ResponseSchema {
    let mut branches = match mode {
        SchemaMode::Base => base_branch_specs(),
        SchemaMode::Role => role_branch_specs(),
    };
    branches.extend(extra_branches);
    match interact_mode {
        InteractMode::Passive => branches.push(BranchSpec {
            tag: branch::NEED_HUMAN_HELP.to_string(),
            description: "Set to `NeedHumanHelp` when you are in trouble. Avoid asking humans for help unless necessary.".to_string(),
        }),
        InteractMode::NonInteractive => branches.push(BranchSpec {
            tag: branch::INTERRUPT.to_string(),
            description: "Set to `Interrupt` when you really do not know how to proceed. This is a dangerous operation; use it only with a good reason.".to_string(),
        }),
        InteractMode::Proactive => {}
    }

    let mut fields = match mode {
        SchemaMode::Base => base_field_specs(),
        SchemaMode::Role => role_field_specs(),
    };
    fields.extend(extra_fields);

    ResponseSchema { fields, branches }
}

/// 一次通过校验的决策：branch 驱动状态转移，其余字段供处理器取用
#[derive(Debug, Clone)]
pub struct Decision {
    pub branch: String,
    pub fields: Map<String, Value>,
}

impl Decision {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn str_field(&self, key: &str) -> &str {
        self.fields.get(key).and_then(Value::as_str).unwrap_or("")
    }

    pub fn list_field(&self, key: &str) -> Vec<String> {
        self.fields
            .get(key)
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }
}

impl ResponseSchema {
    pub fn branch_tags(&self) -> Vec<&str> {
        self.branches.iter().map(|b| b.tag.as_str()).collect()
    }

    pub fn has_branch(&self, tag: &str) -> bool {
        self.branches.iter().any(|b| b.tag == tag)
    }

    fn kind_matches(kind: FieldKind, value: &Value) -> bool {
        match kind {
            FieldKind::Str => value.is_string(),
            FieldKind::StrList => value
                .as_array()
                .map(|a| a.iter().all(Value::is_string))
                .unwrap_or(false),
            FieldKind::ObjectList => value
                .as_array()
                .map(|a| a.iter().all(Value::is_object))
                .unwrap_or(false),
            FieldKind::NullableObject => value.is_null() || value.is_object(),
            FieldKind::NullableStr => value.is_null() || value.is_string(),
        }
    }

    fn kind_name(kind: FieldKind) -> &'static str {
        match kind {
            FieldKind::Str => "string",
            FieldKind::StrList => "list of strings",
            FieldKind::ObjectList => "list of objects",
            FieldKind::NullableObject => "object or null",
            FieldKind::NullableStr => "string or null",
        }
    }

    /// 字段级校验：branch 必须取自本 schema 的 branch 集；每个声明字段必须存在且类型相符；
    /// 未声明的键被拒绝。失败返回携带具体意见的 FormatError。
    pub fn validate(&self, value: &Value) -> Result<Decision, FormatError> {
        let obj = match value.as_object() {
            Some(o) => o,
            None => {
                return Err(self.format_error("the reply is not a JSON object"));
            }
        };

        let mut complaints: Vec<String> = Vec::new();

        let branch = match obj.get("branch") {
            None => {
                complaints.push("branch: field required".to_string());
                String::new()
            }
            Some(Value::String(tag)) if self.has_branch(tag) => tag.clone(),
            Some(Value::String(tag)) => {
                complaints.push(format!(
                    "branch: `{tag}` is not one of [{}]",
                    self.branch_tags().join(", ")
                ));
                String::new()
            }
            Some(_) => {
                complaints.push("branch: must be a string".to_string());
                String::new()
            }
        };

        for spec in &self.fields {
            match obj.get(&spec.name) {
                None => complaints.push(format!("{}: field required", spec.name)),
                Some(v) if !Self::kind_matches(spec.kind, v) => complaints.push(format!(
                    "{}: expected {}",
                    spec.name,
                    Self::kind_name(spec.kind)
                )),
                Some(_) => {}
            }
        }

        for key in obj.keys() {
            if key != "branch" && !self.fields.iter().any(|f| f.name == *key) {
                complaints.push(format!("{key}: unexpected key"));
            }
        }

        if !complaints.is_empty() {
            return Err(self.format_error(&complaints.join("\n")));
        }

        Ok(Decision {
            branch,
            fields: obj.clone(),
        })
    }

    pub(crate) fn format_error(&self, details: &str) -> FormatError {
        let mut hint = String::from("The expected json parameter format is\n```json\n");
        hint.push_str(&self.render_template());
        hint.push_str("\n```\n");
        hint.push_str("The output is incorrectly formatted, please make corrections based on the feedback below to regenerate the correct answer.\n");
        hint.push_str(&format!("Error details:\n{details}\n"));
        hint.push_str("Please regenerate the correct reply based on this feedback and the historical messages. Take a deep thought and give your reply:");
        FormatError::new(hint)
    }

    /// 渲染为 键 -> 说明 的 JSON 模板文本，拼入系统提示与纠错提示
    pub fn render_template(&self) -> String {
        let mut obj = Map::new();
        let mut branch_desc = String::from(
            "The following are the values that can be set for this parameter and their explanations:",
        );
        for b in &self.branches {
            branch_desc.push(' ');
            branch_desc.push_str(&b.description);
        }
        obj.insert("branch".to_string(), Value::String(branch_desc));
        for f in &self.fields {
            obj.insert(
                f.name.clone(),
                Value::String(format!("({}) {}", Self::kind_name(f.kind), f.description)),
            );
        }
        serde_json::to_string_pretty(&Value::Object(obj)).unwrap_or_default()
    }

    /// 生成 JSON Schema（供支持原生结构化输出的服务直接使用）
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        properties.insert(
            "branch".to_string(),
            json!({
                "type": "string",
                "enum": self.branch_tags(),
            }),
        );
        for f in &self.fields {
            let prop = match f.kind {
                FieldKind::Str => json!({"type": "string", "description": f.description}),
                FieldKind::StrList => {
                    json!({"type": "array", "items": {"type": "string"}, "description": f.description})
                }
                FieldKind::ObjectList => {
                    json!({"type": "array", "items": {"type": "object"}, "description": f.description})
                }
                FieldKind::NullableObject => {
                    json!({"type": ["object", "null"], "description": f.description})
                }
                FieldKind::NullableStr => {
                    json!({"type": ["string", "null"], "description": f.description})
                }
            };
            properties.insert(f.name.clone(), prop);
        }
        let required: Vec<String> = std::iter::once("branch".to_string())
            .chain(self.fields.iter().map(|f| f.name.clone()))
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passive_base() -> ResponseSchema {
        response_schema(SchemaMode::Base, vec![], vec![], InteractMode::Passive)
    }

    #[test]
    fn test_mode_conditional_branches_are_exclusive() {
        let passive = passive_base();
        assert!(passive.has_branch(branch::NEED_HUMAN_HELP));
        assert!(!passive.has_branch(branch::INTERRUPT));

        let non_interactive =
            response_schema(SchemaMode::Base, vec![], vec![], InteractMode::NonInteractive);
        assert!(non_interactive.has_branch(branch::INTERRUPT));
        assert!(!non_interactive.has_branch(branch::NEED_HUMAN_HELP));

        let proactive = response_schema(SchemaMode::Base, vec![], vec![], InteractMode::Proactive);
        assert!(!proactive.has_branch(branch::INTERRUPT));
        assert!(!proactive.has_branch(branch::NEED_HUMAN_HELP));
    }

    #[test]
    fn test_role_mode_adds_finish_and_mismatch() {
        let s = response_schema(SchemaMode::Role, vec![], vec![], InteractMode::Passive);
        assert!(s.has_branch(branch::ROLE_TASK_FINISH));
        assert!(s.has_branch(branch::TASK_MISMATCH));
        assert!(s.fields.iter().any(|f| f.name == "operation"));
    }

    #[test]
    fn test_validate_accepts_well_formed_reply() {
        let s = passive_base();
        let v = serde_json::json!({
            "branch": "Continue",
            "problem": "",
            "message": "next",
            "summary": "did a thing",
        });
        let d = s.validate(&v).unwrap();
        assert_eq!(d.branch, "Continue");
        assert_eq!(d.str_field("message"), "next");
    }

    #[test]
    fn test_validate_rejects_missing_field_and_unknown_key() {
        let s = passive_base();
        let v = serde_json::json!({
            "branch": "Continue",
            "problem": "",
            "summary": "",
            "bogus": 1,
        });
        let err = s.validate(&v).unwrap_err();
        assert!(err.hint.contains("message: field required"));
        assert!(err.hint.contains("bogus: unexpected key"));
        assert!(err.hint.contains("expected json parameter format"));
    }

    #[test]
    fn test_validate_rejects_wrong_type_and_unknown_branch() {
        let s = response_schema(
            SchemaMode::Base,
            vec![FieldSpec::new("sub_tasks", FieldKind::StrList, "subtasks")],
            vec![],
            InteractMode::Passive,
        );
        let v = serde_json::json!({
            "branch": "Sideways",
            "problem": "",
            "message": "",
            "summary": "",
            "sub_tasks": "not a list",
        });
        let err = s.validate(&v).unwrap_err();
        assert!(err.hint.contains("`Sideways` is not one of"));
        assert!(err.hint.contains("sub_tasks: expected list of strings"));
    }

    #[test]
    fn test_json_schema_lists_required_fields() {
        let s = passive_base();
        let js = s.to_json_schema();
        let required: Vec<&str> = js["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert!(required.contains(&"branch"));
        assert!(required.contains(&"summary"));
    }
}
