//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `COLONY__*` 覆盖
//! （双下划线表示嵌套，如 `COLONY__ENGINE__MAX_QUERY_TIMES=50`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub memory: MemorySection,
}

/// [app] 段：应用名、会话 ID、任务文件
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 会话 ID；未设置时按启动时间生成
    pub session_id: Option<String>,
    /// 命令行未给任务时读取的任务文件
    #[serde(default = "default_task_file")]
    pub task_file: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            session_id: None,
            task_file: default_task_file(),
        }
    }
}

fn default_task_file() -> PathBuf {
    PathBuf::from("task.txt")
}

/// [engine] 段：交互模式与查询协议上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// proactive / passive / non-interactive
    pub interact_mode: String,
    /// 单次调用的本地重试上限
    pub max_retry_times: u32,
    /// 每角色的全局请求上限
    pub max_query_times: u32,
    /// episodic 段检索的历史任务条数
    pub n_episodic_history: usize,
    /// linked 段读取的近因记录条数
    pub n_linked_history: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            interact_mode: "non-interactive".to_string(),
            max_retry_times: 3,
            max_query_times: 20,
            n_episodic_history: 2,
            n_linked_history: 5,
        }
    }
}

/// [llm] 段：OpenAI 兼容端点配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    pub base_url: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: None,
        }
    }
}

/// [memory] 段：长期记忆缓存
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// 长期记忆 JSON 文件路径；未设置时仅驻留内存
    pub cache_path: Option<PathBuf>,
    /// 启动时是否加载缓存
    pub load_cache: bool,
    /// 收尾时是否回写缓存
    pub save_cache: bool,
    pub max_entries: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            cache_path: None,
            load_cache: false,
            save_cache: false,
            max_entries: 1000,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            engine: EngineSection::default(),
            llm: LlmSection::default(),
            memory: MemorySection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 COLONY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 COLONY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("COLONY")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engine.interact_mode, "non-interactive");
        assert_eq!(cfg.engine.max_retry_times, 3);
        assert_eq!(cfg.engine.max_query_times, 20);
        assert_eq!(cfg.app.task_file, PathBuf::from("task.txt"));
    }
}
