//! 消息信封
//!
//! 角色间通信的基本单元：有序的 键 -> JSON 值 映射，携带 sender / receiver / event
//! 与任意载荷字段。字段缺失通过显式 MissingField 错误暴露，绝不返回静默默认值；
//! 消费方常用「存在且非空」判断，由 is_filled 提供。

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::core::EngineError;
use crate::roles::{keys, Event, Role};

/// 可变、顺序无关的信封。构造是自由形式的，唯一硬约束是路由时
/// receiver / event 必须存在且可解析为已知枚举值。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    fields: BTreeMap<String, Value>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// 构造一个已寻址的信封
    pub fn route(sender: Role, receiver: Role, event: Event) -> Self {
        let mut env = Self::new();
        env.insert(keys::SENDER, sender.name());
        env.insert(keys::RECEIVER, receiver.name());
        env.insert(keys::EVENT, event.name());
        env
    }

    /// 链式附加一个载荷字段。值序列化失败时置为 Null（载荷均为简单 JSON 类型）。
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Serialize) {
        let v = serde_json::to_value(value).unwrap_or(Value::Null);
        self.fields.insert(key.to_string(), v);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// 存在且非空：Null、空字符串、空数组、空对象均视为未填充
    pub fn is_filled(&self, key: &str) -> bool {
        match self.fields.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
            Some(_) => true,
        }
    }

    pub fn get(&self, key: &str) -> Result<&Value, EngineError> {
        self.fields
            .get(key)
            .ok_or_else(|| EngineError::MissingField(key.to_string()))
    }

    pub fn get_str(&self, key: &str) -> Result<&str, EngineError> {
        self.get(key)?
            .as_str()
            .ok_or_else(|| EngineError::MissingField(key.to_string()))
    }

    /// 读取字符串列表字段；列表里的非字符串项被忽略
    pub fn get_str_list(&self, key: &str) -> Result<Vec<String>, EngineError> {
        let v = self.get(key)?;
        let arr = v
            .as_array()
            .ok_or_else(|| EngineError::MissingField(key.to_string()))?;
        Ok(arr
            .iter()
            .filter_map(|x| x.as_str().map(str::to_string))
            .collect())
    }

    pub fn sender(&self) -> Result<Role, EngineError> {
        let s = self
            .fields
            .get(keys::SENDER)
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::routing("sender is not in envelope"))?;
        Role::parse(s).ok_or_else(|| EngineError::routing(format!("sender `{s}` is not a known role")))
    }

    pub fn receiver(&self) -> Result<Role, EngineError> {
        let s = self
            .fields
            .get(keys::RECEIVER)
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::routing("receiver is not in envelope"))?;
        Role::parse(s).ok_or_else(|| EngineError::unknown_receiver(s))
    }

    pub fn event(&self) -> Result<Event, EngineError> {
        let s = self
            .fields
            .get(keys::EVENT)
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::routing("event is not in envelope"))?;
        Event::parse(s).ok_or_else(|| EngineError::unknown_event(s))
    }

    /// 将另一组字段覆盖进来（用于分层合并，后写入者胜出）
    pub fn extend_from(&mut self, other: &BTreeMap<String, Value>) {
        for (k, v) in other {
            self.fields.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_is_an_error() {
        let env = Envelope::route(Role::Human, Role::Interactor, Event::StartTask);
        assert!(matches!(
            env.get("task"),
            Err(EngineError::MissingField(k)) if k == "task"
        ));
    }

    #[test]
    fn test_is_filled_distinguishes_empty_values() {
        let env = Envelope::new()
            .with("a", "")
            .with("b", "text")
            .with("c", Vec::<String>::new())
            .with("d", Value::Null);
        assert!(!env.is_filled("a"));
        assert!(env.is_filled("b"));
        assert!(!env.is_filled("c"));
        assert!(!env.is_filled("d"));
        assert!(!env.is_filled("missing"));
        assert!(env.has("a"));
        assert!(!env.has("missing"));
    }

    #[test]
    fn test_routing_accessors() {
        let env = Envelope::route(Role::Human, Role::Interactor, Event::StartTask);
        assert_eq!(env.receiver().unwrap(), Role::Interactor);
        assert_eq!(env.event().unwrap(), Event::StartTask);

        let mut bad = env.clone();
        bad.insert(keys::RECEIVER, "Nobody");
        assert!(matches!(bad.receiver(), Err(EngineError::Routing(_))));

        let mut absent = Envelope::new();
        absent.insert("task", "x");
        assert!(matches!(absent.event(), Err(EngineError::Routing(_))));
    }

    #[test]
    fn test_str_list() {
        let env = Envelope::new().with("subs", vec!["a", "b"]);
        assert_eq!(env.get_str_list("subs").unwrap(), vec!["a", "b"]);
    }
}
