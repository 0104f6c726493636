//! 短期记忆：队列存储
//!
//! 纯近因窗口：追加到尾部，读取最近 k 条，无相似度排序。

use std::sync::Mutex;

use serde_json::Value;

use crate::memory::ShortTermStore;

#[derive(Default)]
pub struct QueueStore {
    entries: Mutex<Vec<Value>>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

impl ShortTermStore for QueueStore {
    fn add(&self, entry: Value) {
        self.entries.lock().unwrap().push(entry);
    }

    fn recent(&self, k: usize) -> Vec<Value> {
        let entries = self.entries.lock().unwrap();
        let start = entries.len().saturating_sub(k);
        entries[start..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_recent_returns_tail_in_order() {
        let store = QueueStore::new();
        for i in 0..5 {
            store.add(json!({ "n": i }));
        }
        let recent = store.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0]["n"], 3);
        assert_eq!(recent[1]["n"], 4);

        // k 大于总量时返回全部
        assert_eq!(store.recent(100).len(), 5);
    }
}
