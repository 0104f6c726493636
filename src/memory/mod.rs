//! 记忆层：长期（按相似度检索的历史任务）与短期（纯近因窗口）存储接口

pub mod json_store;
pub mod queue;
pub mod tokenizer;

pub use json_store::JsonStore;
pub use queue::QueueStore;

use serde_json::Value;

/// 一次历史任务记录：首条为 {"Task": summary}，其后为各步骤的决策快照
pub type Episode = Vec<Value>;

/// 长期记忆写入模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// 新建记录；同 session_id 的已有记录被覆盖
    CreateWrite,
    /// 向同 session_id 的已有记录追加步骤
    Append,
}

/// 长期记忆 trait：写入任务记录，按文本相似度检索
pub trait LongTermStore: Send + Sync {
    fn add(&self, session_id: Option<&str>, summary: &str, entries: &[Value], mode: StoreMode);

    /// 返回与 text 最相似的 k 条记录，相似度从高到低
    fn similarity_search(&self, text: &str, k: usize) -> Vec<Episode>;

    /// 是否启用（Noop 实现返回 false）
    fn enabled(&self) -> bool {
        true
    }
}

/// 短期记忆 trait：追加与近因窗口读取，无相似度排序
pub trait ShortTermStore: Send + Sync {
    fn add(&self, entry: Value);

    fn add_many(&self, entries: Vec<Value>) {
        for e in entries {
            self.add(e);
        }
    }

    /// 最近 k 条，时间序（最旧在前）
    fn recent(&self, k: usize) -> Vec<Value>;
}

/// 空实现：未配置长期记忆时使用
#[derive(Clone, Default)]
pub struct NoopLongTerm;

impl LongTermStore for NoopLongTerm {
    fn add(&self, _session_id: Option<&str>, _summary: &str, _entries: &[Value], _mode: StoreMode) {}

    fn similarity_search(&self, _text: &str, _k: usize) -> Vec<Episode> {
        Vec::new()
    }

    fn enabled(&self) -> bool {
        false
    }
}
