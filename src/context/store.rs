//! 分层上下文存储
//!
//! 四层作用域，按「最具体者胜出」合并：会话层（整次运行有效的全局字段，如原始任务）、
//! role-public 层（固定键集，工作角色共享）、基础角色私有层（按需创建的自由空间）、
//! 摘要层（每角色的小型缓存，仅用于构建记忆检索描述）。
//! 合并只产生临时视图，绝不改写底层作用域对象。
//! 同时保存每个角色最近一次的输入上下文与查询快照，供 handoff 回放。

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::Value;

use crate::context::Envelope;
use crate::core::EngineError;
use crate::query::QuerySnapshot;
use crate::roles::Role;

/// 单个作用域：键 -> JSON 值
pub type Scope = BTreeMap<String, Value>;

/// 每次运行构造一个 ContextStore，经由 Orchestrator 显式传入各角色，
/// 不存在跨运行的全局可变状态。
#[derive(Default)]
pub struct ContextStore {
    session: Scope,
    role_public: Scope,
    base_private: HashMap<Role, Scope>,
    summary: HashMap<Role, Scope>,
    saved_context: HashMap<Role, Envelope>,
    saved_query: HashMap<Role, QuerySnapshot>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- 会话层 ----

    pub fn set_session(&mut self, key: &str, value: impl Serialize) {
        self.session
            .insert(key.to_string(), serde_json::to_value(value).unwrap_or(Value::Null));
    }

    pub fn session(&self, key: &str) -> Option<&Value> {
        self.session.get(key)
    }

    pub fn session_str(&self, key: &str) -> Option<&str> {
        self.session.get(key).and_then(Value::as_str)
    }

    // ---- role-public 层 ----

    pub fn set_public(&mut self, key: &str, value: impl Serialize) {
        self.role_public
            .insert(key.to_string(), serde_json::to_value(value).unwrap_or(Value::Null));
    }

    pub fn public(&self, key: &str) -> Option<&Value> {
        self.role_public.get(key)
    }

    /// 向 role-public 层的列表字段追加一项（不存在时先建空列表）
    pub fn push_public(&mut self, key: &str, value: impl Serialize) {
        let v = serde_json::to_value(value).unwrap_or(Value::Null);
        match self.role_public.get_mut(key) {
            Some(Value::Array(arr)) => arr.push(v),
            _ => {
                self.role_public.insert(key.to_string(), Value::Array(vec![v]));
            }
        }
    }

    // ---- 基础角色私有层 ----

    /// 创建私有空间。读取未创建的空间是调用方错误，
    /// 以便区分「从未配置」与「配置了但为空」。
    pub fn create_private_scope(&mut self, role: Role) {
        self.base_private.entry(role).or_default();
    }

    pub fn has_private_scope(&self, role: Role) -> bool {
        self.base_private.contains_key(&role)
    }

    pub fn private_scope(&self, role: Role) -> Result<&Scope, EngineError> {
        self.base_private
            .get(&role)
            .ok_or(EngineError::ScopeNotCreated(role))
    }

    pub fn private_scope_mut(&mut self, role: Role) -> Result<&mut Scope, EngineError> {
        self.base_private
            .get_mut(&role)
            .ok_or(EngineError::ScopeNotCreated(role))
    }

    pub fn set_private(&mut self, role: Role, key: &str, value: impl Serialize) -> Result<(), EngineError> {
        let v = serde_json::to_value(value).unwrap_or(Value::Null);
        self.private_scope_mut(role)?.insert(key.to_string(), v);
        Ok(())
    }

    pub fn private(&self, role: Role, key: &str) -> Result<Option<&Value>, EngineError> {
        Ok(self.private_scope(role)?.get(key))
    }

    // ---- 摘要层 ----

    pub fn set_summary(&mut self, role: Role, key: &str, value: impl Serialize) {
        let v = serde_json::to_value(value).unwrap_or(Value::Null);
        self.summary.entry(role).or_default().insert(key.to_string(), v);
    }

    pub fn summary(&self, role: Role, key: &str) -> Option<&Value> {
        self.summary.get(&role).and_then(|s| s.get(key))
    }

    // ---- 分层合并 ----

    /// 为角色准备工作上下文：会话层 ⊕ 适用作用域 ⊕ 信封显式字段（信封胜出）。
    /// 基础角色叠加其私有空间（若已创建），工作角色叠加 role-public 空间。
    /// 返回全新的合并视图，底层作用域不被改动。
    pub fn prepare(&self, role: Role, envelope: &Envelope) -> Envelope {
        let mut merged = Envelope::new();
        merged.extend_from(&self.session);
        if role.is_base_role() {
            if let Some(scope) = self.base_private.get(&role) {
                merged.extend_from(scope);
            }
        } else {
            merged.extend_from(&self.role_public);
        }
        for (k, v) in envelope.iter() {
            merged.insert(k, v.clone());
        }
        merged
    }

    // ---- handoff 支撑 ----

    pub fn save_context(&mut self, role: Role, envelope: Envelope) {
        self.saved_context.insert(role, envelope);
    }

    pub fn saved_context(&self, role: Role) -> Option<&Envelope> {
        self.saved_context.get(&role)
    }

    pub fn save_query_snapshot(&mut self, role: Role, snapshot: QuerySnapshot) {
        self.saved_query.insert(role, snapshot);
    }

    pub fn query_snapshot(&self, role: Role) -> Option<&QuerySnapshot> {
        self.saved_query.get(&role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::{keys, Event};

    #[test]
    fn test_merge_precedence_envelope_wins() {
        let mut store = ContextStore::new();
        store.set_session("x", "a");
        store.set_public("x", "b");

        let env = Envelope::route(Role::TaskScheduler, Role::Searcher, Event::RoleStep).with("x", "c");
        let merged = store.prepare(Role::Searcher, &env);
        assert_eq!(merged.get_str("x").unwrap(), "c");

        // 作用域未被合并改写
        assert_eq!(*store.public("x").unwrap(), "b");
        assert_eq!(*store.session("x").unwrap(), "a");
    }

    #[test]
    fn test_scope_selection_by_role_class() {
        let mut store = ContextStore::new();
        store.set_session(keys::TASK, "total task");
        store.set_public(keys::ROLE_TASKS, vec!["sub"]);
        store.create_private_scope(Role::TaskScheduler);
        store
            .set_private(Role::TaskScheduler, "cursor", 3)
            .unwrap();

        let env = Envelope::new();
        let worker_view = store.prepare(Role::Searcher, &env);
        assert!(worker_view.has(keys::ROLE_TASKS));
        assert!(!worker_view.has("cursor"));

        let base_view = store.prepare(Role::TaskScheduler, &env);
        assert!(base_view.has("cursor"));
        assert!(!base_view.has(keys::ROLE_TASKS));
        assert_eq!(base_view.get_str(keys::TASK).unwrap(), "total task");
    }

    #[test]
    fn test_uncreated_private_scope_is_an_error() {
        let store = ContextStore::new();
        assert!(matches!(
            store.private_scope(Role::Planner),
            Err(EngineError::ScopeNotCreated(Role::Planner))
        ));

        let mut store = ContextStore::new();
        store.create_private_scope(Role::Planner);
        // 已创建但为空：合法，返回空结果而非错误
        assert!(store.private(Role::Planner, "anything").unwrap().is_none());
    }

    #[test]
    fn test_push_public_accumulates() {
        let mut store = ContextStore::new();
        store.push_public(keys::ROLE_INFOS, "first");
        store.push_public(keys::ROLE_INFOS, "second");
        let v = store.public(keys::ROLE_INFOS).unwrap().as_array().unwrap();
        assert_eq!(v.len(), 2);
    }
}
