//! Colony - Rust 多角色协同智能体引擎
//!
//! 入口：初始化日志、加载配置、装配引擎、运行单个任务并输出最终答案。
//! 任务来自第一个命令行参数，未提供时读取配置指定的任务文件。

use anyhow::Context;
use colony::config::load_config;
use colony::workflow::{EngineBuilder, RunOutcome};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer())
        .init();

    let config = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({e}), using defaults");
        colony::config::AppConfig::default()
    });

    let task = match std::env::args().nth(1) {
        Some(task) => task,
        None => std::fs::read_to_string(&config.app.task_file)
            .with_context(|| format!("no task argument and {} is unreadable", config.app.task_file.display()))?
            .trim()
            .to_string(),
    };

    let session_id = config
        .app
        .session_id
        .clone()
        .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d-%H-%M-%S").to_string());
    let save_cache = config.memory.save_cache;
    let cache_path = config.memory.cache_path.clone();
    let max_entries = config.memory.max_entries;
    let load_cache = config.memory.load_cache;

    // 长期记忆由入口持有，便于运行结束后回写磁盘
    let long_term = std::sync::Arc::new(colony::memory::JsonStore::new(max_entries));
    if let (Some(path), true) = (&cache_path, load_cache) {
        if let Err(e) = long_term.load(path) {
            tracing::warn!("long-term memory load failed: {e}");
        }
    }

    let mut engine = EngineBuilder::new(config)
        .long_term(long_term.clone())
        .build()
        .context("engine assembly failed")?;

    let outcome = engine.run(&task).await.context("run terminated with an error")?;

    engine.write_back_memories(Some(&session_id));
    if let (Some(path), true) = (&cache_path, save_cache) {
        if let Err(e) = long_term.save(path) {
            tracing::warn!("long-term memory save failed: {e}");
        }
    }

    match outcome {
        RunOutcome::Accomplished(answer) => {
            println!("{answer}");
            Ok(())
        }
        RunOutcome::Failed => {
            println!();
            std::process::exit(1);
        }
    }
}
