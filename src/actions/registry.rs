//! 操作注册表
//!
//! 角色 -> 操作名 -> 参数 schema 的映射。校验分三步：操作必须在发起角色的
//! 允许集合内；必填参数不得缺失；参数类型必须匹配且不得携带未声明的参数。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::EngineError;
use crate::roles::Role;

/// 角色发出的操作请求：`{"name": ..., "params": {...}}`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OpRequest {
    /// 操作名
    pub name: String,
    /// 操作参数，依操作不同而不同
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl OpRequest {
    pub fn from_value(value: &Value) -> Result<OpRequest, EngineError> {
        serde_json::from_value(value.clone())
            .map_err(|e| EngineError::Action(format!("malformed operation request: {e}")))
    }
}

/// 返回操作请求的 JSON Schema 文本，可拼入系统提示减少格式错误
pub fn op_request_schema_json() -> String {
    let schema = schema_for!(OpRequest);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 单个操作的声明：参数名 -> (JSON 类型名, 是否必填)
#[derive(Debug, Clone)]
pub struct ActionSpec {
    pub name: String,
    pub description: String,
    params: Vec<ParamSpec>,
}

#[derive(Debug, Clone)]
struct ParamSpec {
    name: String,
    /// "string" | "number" | "boolean" | "array" | "object"
    ty: String,
    required: bool,
}

impl ActionSpec {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            params: Vec::new(),
        }
    }

    pub fn required(mut self, param: &str, ty: &str) -> Self {
        self.params.push(ParamSpec {
            name: param.to_string(),
            ty: ty.to_string(),
            required: true,
        });
        self
    }

    pub fn optional(mut self, param: &str, ty: &str) -> Self {
        self.params.push(ParamSpec {
            name: param.to_string(),
            ty: ty.to_string(),
            required: false,
        });
        self
    }

    fn type_matches(ty: &str, value: &Value) -> bool {
        match ty {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        }
    }

    fn validate_params(&self, params: &Map<String, Value>) -> Result<(), EngineError> {
        for spec in &self.params {
            match params.get(&spec.name) {
                None if spec.required => {
                    return Err(EngineError::Action(format!(
                        "missing required parameter `{}` in operation `{}`",
                        spec.name, self.name
                    )));
                }
                Some(v) if !Self::type_matches(&spec.ty, v) => {
                    return Err(EngineError::Action(format!(
                        "parameter `{}` of operation `{}` should be a {}",
                        spec.name, self.name, spec.ty
                    )));
                }
                _ => {}
            }
        }
        for key in params.keys() {
            if !self.params.iter().any(|p| p.name == *key) {
                return Err(EngineError::Action(format!(
                    "unsupported parameter `{key}` in operation `{}`",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// 角色 -> 允许操作集合
#[derive(Default)]
pub struct ActionRegistry {
    ops: HashMap<Role, HashMap<String, ActionSpec>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, role: Role, spec: ActionSpec) {
        self.ops
            .entry(role)
            .or_default()
            .insert(spec.name.clone(), spec);
    }

    pub fn allowed_ops(&self, role: Role) -> Vec<&str> {
        self.ops
            .get(&role)
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// 渲染角色的操作清单（名称 + 说明），拼入工作角色的系统提示
    pub fn describe_ops(&self, role: Role) -> String {
        let Some(ops) = self.ops.get(&role) else {
            return String::new();
        };
        let mut lines: Vec<String> = ops
            .values()
            .map(|s| format!("- {} : {}", s.name, s.description))
            .collect();
        lines.sort();
        lines.join("\n")
    }

    /// 校验操作请求：归属 + 必填参数 + 参数类型 + 未声明参数
    pub fn validate_request(&self, role: Role, request: &OpRequest) -> Result<(), EngineError> {
        let ops = self
            .ops
            .get(&role)
            .ok_or_else(|| EngineError::Action(format!("role `{role}` has no registered operations")))?;
        let spec = ops.get(&request.name).ok_or_else(|| {
            let mut allowed: Vec<&str> = ops.keys().map(String::as_str).collect();
            allowed.sort();
            EngineError::Action(format!(
                "unsupported operation `{}` for `{role}`; select from [{}]",
                request.name,
                allowed.join(", ")
            ))
        })?;
        spec.validate_params(&request.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> ActionRegistry {
        let mut reg = ActionRegistry::new();
        reg.register(
            Role::Searcher,
            ActionSpec::new("open_url", "open a web page")
                .required("url", "string")
                .optional("new_tab", "boolean"),
        );
        reg
    }

    fn request(value: Value) -> OpRequest {
        OpRequest::from_value(&value).unwrap()
    }

    #[test]
    fn test_unknown_operation_rejected_with_allowed_list() {
        let reg = registry();
        let err = reg
            .validate_request(Role::Searcher, &request(json!({"name": "fly", "params": {}})))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unsupported operation `fly`"));
        assert!(msg.contains("open_url"));
    }

    #[test]
    fn test_operation_not_allowed_for_other_role() {
        let reg = registry();
        assert!(reg
            .validate_request(Role::Programmer, &request(json!({"name": "open_url", "params": {}})))
            .is_err());
    }

    #[test]
    fn test_param_validation() {
        let reg = registry();
        // 缺必填参数
        assert!(reg
            .validate_request(Role::Searcher, &request(json!({"name": "open_url", "params": {}})))
            .is_err());
        // 类型不符
        assert!(reg
            .validate_request(
                Role::Searcher,
                &request(json!({"name": "open_url", "params": {"url": 3}}))
            )
            .is_err());
        // 未声明参数
        assert!(reg
            .validate_request(
                Role::Searcher,
                &request(json!({"name": "open_url", "params": {"url": "https://a", "depth": 1}}))
            )
            .is_err());
        // 合法请求
        assert!(reg
            .validate_request(
                Role::Searcher,
                &request(json!({"name": "open_url", "params": {"url": "https://a", "new_tab": true}}))
            )
            .is_ok());
    }
}
