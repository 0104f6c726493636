//! 引擎集成测试
//!
//! 用脚本化的推理服务 / 控制台 / 回显驱动跑完整工作流：
//! 端到端任务场景、人工反馈 handoff、skip 终止与重试累积。

use std::sync::Arc;

use serde_json::{json, Value};

use colony::config::AppConfig;
use colony::query::ScriptedConsole;
use colony::service::ScriptedService;
use colony::workflow::{EngineBuilder, RunOutcome};

/// base 模式回复（Planner / TaskScheduler / Reviewer 系）
fn base_reply(branch: &str, extra: &[(&str, Value)]) -> Value {
    let mut obj = json!({
        "branch": branch,
        "problem": "",
        "message": "",
        "summary": "step done",
    });
    for (k, v) in extra {
        obj[*k] = v.clone();
    }
    obj
}

/// role 模式回复（工作角色）
fn worker_reply(branch: &str, operation: Value, information: &str) -> Value {
    json!({
        "branch": branch,
        "thought_process": ["inspect the assignment"],
        "local_plan": ["carry out the assigned subtask"],
        "intention": "make progress on the subtask",
        "operation": operation,
        "problem": "",
        "message": "",
        "summary": "worker step",
        "observation": "the scene matches the subtask",
        "information": information,
    })
}

fn config(interact_mode: &str) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.engine.interact_mode = interact_mode.to_string();
    cfg
}

#[tokio::test]
async fn test_end_to_end_three_subtasks() {
    // 任务 X -> Planner 三个子任务 -> 逐条分发 -> 其中第一条经
    // Executor + Reviewer 走一轮操作 -> 全部完成后合成最终答案
    let service = Arc::new(
        ScriptedService::new()
            // Planner 分解
            .push_json(base_reply(
                "Continue",
                &[("sub_tasks", json!(["look up the weather", "extract the forecast", "compose the report"]))],
            ))
            // TaskScheduler 分发方案
            .push_json(base_reply(
                "Continue",
                &[(
                    "distribution",
                    json!([
                        {"role": "Searcher", "role_tasks": ["look up the weather"]},
                        {"role": "Searcher", "role_tasks": ["extract the forecast"]},
                        {"role": "Searcher", "role_tasks": ["compose the report"]},
                    ]),
                )],
            ))
            // Searcher 子任务 1：选一个操作
            .push_json(worker_reply(
                "Continue",
                json!({"name": "open_url", "params": {"url": "https://weather.example"}}),
                "",
            ))
            // Reviewer 判定
            .push_json(base_reply(
                "Continue",
                &[
                    ("analyze", json!("the page opened")),
                    ("judgement", json!("the operation matches the intention")),
                ],
            ))
            // Searcher 子任务 1 收尾
            .push_json(worker_reply("RoleTaskFinish", Value::Null, "sunny, 25C"))
            // Searcher 子任务 2 / 3
            .push_json(worker_reply("RoleTaskFinish", Value::Null, "no rain expected"))
            .push_json(worker_reply("RoleTaskFinish", Value::Null, "report drafted"))
            // Planner 合成最终答案
            .push_json(base_reply(
                "Continue",
                &[("answer", json!("Tomorrow will be sunny, 25C, no rain."))],
            )),
    );

    let mut engine = EngineBuilder::new(config("non-interactive"))
        .service(service.clone())
        .console(Arc::new(ScriptedConsole::new()))
        .build()
        .unwrap();

    let outcome = engine.run("What will the weather be tomorrow?").await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Accomplished("Tomorrow will be sunny, 25C, no rain.".to_string())
    );
    assert_eq!(service.calls(), 8);
}

#[tokio::test]
async fn test_handoff_transfers_to_previously_run_role() {
    // Planner 求助 -> 操作员 switch to Planner -> 以保存的上下文回放，
    // 指导后重发得到正常计划 -> 工作流继续走到完成
    let service = Arc::new(
        ScriptedService::new()
            .push_json(base_reply("NeedHumanHelp", &[("sub_tasks", json!([]))]))
            // handoff 指导后的重发
            .push_json(base_reply(
                "Continue",
                &[("sub_tasks", json!(["single subtask"]))],
            ))
            .push_json(base_reply(
                "Continue",
                &[("distribution", json!([{"role": "Programmer", "role_tasks": ["single subtask"]}]))],
            ))
            .push_json(worker_reply("RoleTaskFinish", Value::Null, "computed result"))
            .push_json(base_reply("Continue", &[("answer", json!("done"))])),
    );
    let console = Arc::new(
        ScriptedConsole::new()
            .push("switch to Planner")
            .push("narrow the plan down to one subtask"),
    );

    let mut engine = EngineBuilder::new(config("passive"))
        .service(service.clone())
        .console(console)
        .build()
        .unwrap();

    let outcome = engine.run("do the thing").await.unwrap();
    assert_eq!(outcome, RunOutcome::Accomplished("done".to_string()));
    assert_eq!(service.calls(), 5);
}

#[tokio::test]
async fn test_skip_terminates_run_as_failure() {
    let service = Arc::new(
        ScriptedService::new().push_json(base_reply("NeedHumanHelp", &[("sub_tasks", json!([]))])),
    );
    let console = Arc::new(ScriptedConsole::new().push("skip"));

    let mut engine = EngineBuilder::new(config("passive"))
        .service(service)
        .console(console)
        .build()
        .unwrap();

    let outcome = engine.run("doomed task").await.unwrap();
    assert_eq!(outcome, RunOutcome::Failed);
    assert_eq!(outcome.answer(), "");
}

#[tokio::test]
async fn test_malformed_planner_replies_exhaust_retries() {
    let service = Arc::new(ScriptedService::repeating_text("I refuse to emit JSON"));

    let mut engine = EngineBuilder::new(config("non-interactive"))
        .service(service.clone())
        .console(Arc::new(ScriptedConsole::new()))
        .build()
        .unwrap();

    let err = engine.run("any task").await.unwrap_err();
    assert!(err.to_string().contains("malformed"));
    // maxRetryTimes 默认 3：恰好 4 次尝试
    assert_eq!(service.calls(), 4);
    // 第一次之后每次调用都带着累积的纠错 tip（每轮 +2：坏回复 + 提示）
    let counts = service.turn_counts();
    assert_eq!(counts.len(), 4);
    for pair in counts.windows(2) {
        assert_eq!(pair[1], pair[0] + 2);
    }
}

#[tokio::test]
async fn test_invalid_operation_feeds_back_to_worker() {
    // Searcher 请求未注册的操作 -> Executor 校验失败退回 feedback ->
    // Searcher 改走 RoleTaskFinish -> 正常完成
    let service = Arc::new(
        ScriptedService::new()
            .push_json(base_reply("Continue", &[("sub_tasks", json!(["browse"]))]))
            .push_json(base_reply(
                "Continue",
                &[("distribution", json!([{"role": "Searcher", "role_tasks": ["browse"]}]))],
            ))
            .push_json(worker_reply(
                "Continue",
                json!({"name": "teleport", "params": {}}),
                "",
            ))
            // 校验失败的 feedback 直接回到 Searcher，不经过 Reviewer
            .push_json(worker_reply("RoleTaskFinish", Value::Null, "gave up browsing"))
            .push_json(base_reply("Continue", &[("answer", json!("partial answer"))])),
    );

    let mut engine = EngineBuilder::new(config("non-interactive"))
        .service(service.clone())
        .console(Arc::new(ScriptedConsole::new()))
        .build()
        .unwrap();

    let outcome = engine.run("browse the web").await.unwrap();
    assert_eq!(outcome, RunOutcome::Accomplished("partial answer".to_string()));
    assert_eq!(service.calls(), 5);
}
