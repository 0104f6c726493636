//! 运行装配
//!
//! 每次运行构造一整套组件：推理服务、操作员控制台、操作注册表与驱动、
//! 记忆存储、九个角色实例与一个 ContextStore，经显式依赖注入交给 Orchestrator。
//! 不存在单例或全局可变状态；重建 Engine 即完成计数器与移交指针的复位。

use std::sync::Arc;

use crate::actions::{ActionDriver, ActionRegistry, ActionSpec, EchoDriver};
use crate::config::AppConfig;
use crate::context::ContextStore;
use crate::memory::{JsonStore, LongTermStore, QueueStore};
use crate::query::{InteractMode, OperatorConsole, StdioConsole};
use crate::roles::{
    Executor, Interactor, Planner, Reviewer, Role, RoleAgent, RoleDeps, TaskScheduler, WorkerRole,
};
use crate::service::{OpenAiService, ReasoningService, ScriptedService};
use crate::workflow::Orchestrator;

/// 工作角色的能力描述，拼入 Planner / TaskScheduler 的系统提示
fn worker_capabilities() -> Vec<(Role, &'static str)> {
    vec![
        (
            Role::Searcher,
            "Can use an opened browser to search for information, open web pages, and work with page content. Cannot do anything beyond web pages, including opening a browser.",
        ),
        (
            Role::FileManager,
            "Can create, move, rename and inspect files and folders in the workspace.",
        ),
        (
            Role::Programmer,
            "Can write and run small programs to transform data or compute results.",
        ),
        (
            Role::AppManager,
            "Can open and close desktop applications and bring their windows to the front.",
        ),
    ]
}

/// 演示用的默认操作注册表。真实部署由外部操作层提供自己的注册表。
pub fn default_registry() -> ActionRegistry {
    let mut reg = ActionRegistry::new();
    reg.register(
        Role::Searcher,
        ActionSpec::new("open_url", "open a web page in the current browser tab")
            .required("url", "string"),
    );
    reg.register(
        Role::Searcher,
        ActionSpec::new("type_text", "type text into the focused control")
            .required("text", "string"),
    );
    reg.register(
        Role::Searcher,
        ActionSpec::new("click", "click the selected control").optional("double", "boolean"),
    );
    reg.register(
        Role::FileManager,
        ActionSpec::new("create_file", "create a file with the given content")
            .required("path", "string")
            .optional("content", "string"),
    );
    reg.register(
        Role::FileManager,
        ActionSpec::new("move_file", "move or rename a file")
            .required("src", "string")
            .required("dst", "string"),
    );
    reg.register(
        Role::Programmer,
        ActionSpec::new("run_code", "run a short program and capture its output")
            .required("language", "string")
            .required("code", "string"),
    );
    reg.register(
        Role::AppManager,
        ActionSpec::new("open_application", "open a desktop application by name")
            .required("name", "string"),
    );
    reg
}

/// 引擎装配器：默认 Mock 服务 + 标准控制台 + 回显驱动，均可替换
pub struct EngineBuilder {
    config: AppConfig,
    service: Option<Arc<dyn ReasoningService>>,
    console: Option<Arc<dyn OperatorConsole>>,
    driver: Option<Arc<dyn ActionDriver>>,
    registry: Option<ActionRegistry>,
    long_term: Option<Arc<dyn LongTermStore>>,
}

impl EngineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            service: None,
            console: None,
            driver: None,
            registry: None,
            long_term: None,
        }
    }

    pub fn service(mut self, service: Arc<dyn ReasoningService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn console(mut self, console: Arc<dyn OperatorConsole>) -> Self {
        self.console = Some(console);
        self
    }

    pub fn driver(mut self, driver: Arc<dyn ActionDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn registry(mut self, registry: ActionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn long_term(mut self, store: Arc<dyn LongTermStore>) -> Self {
        self.long_term = Some(store);
        self
    }

    /// 根据配置选择推理服务后端：有 API Key 走 OpenAI 兼容端点，否则 Mock
    fn service_from_config(config: &AppConfig) -> Arc<dyn ReasoningService> {
        if std::env::var("OPENAI_API_KEY").is_ok() {
            tracing::info!(model = %config.llm.model, "using OpenAI-compatible reasoning service");
            Arc::new(OpenAiService::new(
                config.llm.base_url.as_deref(),
                &config.llm.model,
                None,
            ))
        } else {
            tracing::warn!("no API key set, using scripted mock service");
            Arc::new(ScriptedService::new())
        }
    }

    fn long_term_from_config(config: &AppConfig) -> Arc<dyn LongTermStore> {
        let store = JsonStore::new(config.memory.max_entries);
        if let Some(path) = &config.memory.cache_path {
            if config.memory.load_cache {
                if let Err(e) = store.load(path) {
                    tracing::warn!("long-term memory load failed: {e}");
                }
            }
        }
        Arc::new(store)
    }

    pub fn build(self) -> Result<Orchestrator, crate::core::EngineError> {
        let interact_mode = InteractMode::parse(&self.config.engine.interact_mode)
            .ok_or_else(|| {
                crate::core::EngineError::Config(format!(
                    "unsupported interact_mode `{}`, expected proactive | passive | non-interactive",
                    self.config.engine.interact_mode
                ))
            })?;

        let service = self
            .service
            .unwrap_or_else(|| Self::service_from_config(&self.config));
        let console: Arc<dyn OperatorConsole> =
            self.console.unwrap_or_else(|| Arc::new(StdioConsole));
        let driver: Arc<dyn ActionDriver> = self.driver.unwrap_or_else(|| Arc::new(EchoDriver));
        let registry = Arc::new(self.registry.unwrap_or_else(default_registry));
        let long_term = self
            .long_term
            .unwrap_or_else(|| Self::long_term_from_config(&self.config));

        let capabilities = worker_capabilities()
            .iter()
            .map(|(role, cap)| format!("- {role}: {cap}"))
            .collect::<Vec<_>>()
            .join("\n");

        let mut deps = RoleDeps::new(service, console, interact_mode).with_limits(
            self.config.engine.max_retry_times,
            self.config.engine.max_query_times,
        );
        deps.long_term = long_term;
        deps.n_episodic_history = self.config.engine.n_episodic_history;
        deps.n_linked_history = self.config.engine.n_linked_history;

        // 每个角色持有独立的短期记忆窗口
        let fresh = |deps: &RoleDeps| deps.clone().with_short_term(Arc::new(QueueStore::new()));

        let mut agents: Vec<Box<dyn RoleAgent>> = vec![
            Box::new(Interactor::new(&fresh(&deps))),
            Box::new(Planner::new(&fresh(&deps), capabilities.clone())),
            Box::new(TaskScheduler::new(&fresh(&deps), capabilities)),
            Box::new(Executor::new(&fresh(&deps), registry.clone(), driver)),
            Box::new(Reviewer::new(&fresh(&deps))),
        ];
        for (role, capability) in worker_capabilities() {
            agents.push(Box::new(WorkerRole::new(
                role,
                capability,
                &fresh(&deps),
                registry.clone(),
            )));
        }

        Ok(Orchestrator::new(agents, ContextStore::new()))
    }
}
