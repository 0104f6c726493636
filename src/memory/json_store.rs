//! 长期记忆：JSON 文件存储
//!
//! 记录 (summary, 步骤列表)，按 summary 的分词重叠数做相似度检索。
//! 可整体保存 / 加载为单个 JSON 文件，跨会话复用。

use std::collections::HashSet;
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::tokenizer::tokenize;
use crate::memory::{Episode, LongTermStore, StoreMode};

#[derive(Clone, Serialize, Deserialize)]
struct StoredEpisode {
    session_id: String,
    summary: String,
    entries: Vec<Value>,
}

/// 文件可持久化的长期记忆。max_entries 限制记录总数，超出时丢弃最旧的。
pub struct JsonStore {
    episodes: RwLock<Vec<StoredEpisode>>,
    max_entries: usize,
}

impl JsonStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            episodes: RwLock::new(Vec::new()),
            max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.episodes.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.read().unwrap().is_empty()
    }

    /// 从 JSON 文件加载；文件不存在时保持为空
    pub fn load(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(());
        }
        let data = std::fs::read_to_string(path)?;
        let episodes: Vec<StoredEpisode> = serde_json::from_str(&data)?;
        *self.episodes.write().unwrap() = episodes;
        Ok(())
    }

    /// 写入 JSON 文件；父目录不存在时自动创建
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let episodes = self.episodes.read().unwrap();
        std::fs::write(path, serde_json::to_string_pretty(&*episodes)?)?;
        Ok(())
    }

    fn overlap(query: &HashSet<String>, doc: &HashSet<String>) -> usize {
        query.intersection(doc).count()
    }
}

impl LongTermStore for JsonStore {
    fn add(&self, session_id: Option<&str>, summary: &str, entries: &[Value], mode: StoreMode) {
        if summary.trim().is_empty() || entries.is_empty() {
            return;
        }
        let session_id = session_id
            .map(String::from)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut episodes = self.episodes.write().unwrap();
        let existing = episodes.iter_mut().find(|e| e.session_id == session_id);
        match (mode, existing) {
            (StoreMode::Append, Some(ep)) => {
                ep.entries.extend(entries.iter().cloned());
            }
            (StoreMode::CreateWrite, Some(ep)) => {
                ep.summary = summary.to_string();
                ep.entries = entries.to_vec();
            }
            (_, None) => {
                episodes.push(StoredEpisode {
                    session_id,
                    summary: summary.to_string(),
                    entries: entries.to_vec(),
                });
            }
        }
        let n = episodes.len();
        if n > self.max_entries {
            episodes.drain(0..n - self.max_entries);
        }
    }

    fn similarity_search(&self, text: &str, k: usize) -> Vec<Episode> {
        let query_tokens = tokenize(text);
        if query_tokens.is_empty() {
            return Vec::new();
        }
        let episodes = self.episodes.read().unwrap();
        let mut scored: Vec<(usize, Episode)> = episodes
            .iter()
            .map(|e| (Self::overlap(&query_tokens, &tokenize(&e.summary)), e.entries.clone()))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().take(k).map(|(_, e)| e).collect()
    }
}

impl Default for JsonStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn episode(task: &str) -> Vec<Value> {
        vec![json!({ "Task": task }), json!({ "branch": "Continue" })]
    }

    #[test]
    fn test_similarity_prefers_overlapping_summary() {
        let store = JsonStore::new(100);
        store.add(Some("a"), "search weather in tokyo", &episode("weather"), StoreMode::CreateWrite);
        store.add(Some("b"), "write a rust program", &episode("rust"), StoreMode::CreateWrite);

        let hits = store.similarity_search("check weather tokyo today", 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0][0]["Task"], "weather");
    }

    #[test]
    fn test_append_extends_same_session() {
        let store = JsonStore::new(100);
        store.add(Some("s1"), "task", &episode("one"), StoreMode::CreateWrite);
        store.add(Some("s1"), "task", &[json!({ "step": 2 })], StoreMode::Append);
        let hits = store.similarity_search("task", 1);
        assert_eq!(hits[0].len(), 3);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory").join("long_term.json");

        let store = JsonStore::new(100);
        store.add(Some("a"), "open the browser", &episode("browser"), StoreMode::CreateWrite);
        store.save(&path).unwrap();

        let restored = JsonStore::new(100);
        restored.load(&path).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.similarity_search("browser", 1).len(), 1);
    }
}
