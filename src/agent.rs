//! Headless Agent 运行时
//!
//! 供 CLI 与 HTTP 服务调用的无界面逻辑：
//! create_agent_components 根据配置构建 LLM 客户端、工具注册表与执行器；
//! extract_product_snapshot 跑带 fetch_page_text 工具的循环（模型自行决定抓取哪些页面）；
//! extract_product_snapshot_single_pass 先抓取页面文本，再用一次无工具的模型调用生成结果。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::{AppConfig, FetchSection};
use crate::core::AgentError;
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::react::{AgentLoop, LoopEvent, LoopOutcome};
use crate::schema::ProductSnapshot;
use crate::scraper::{build_client, extract_visible_text, fetch_page, is_http_url};
use crate::tools::{FetchPageTool, ToolExecutor, ToolRegistry};

const DEFAULT_AGENTIC_PROMPT: &str = "You are an agentic product intelligence assistant. Your task is to extract structured \
product data and generate insights from web pages to populate a ProductSnapshot schema.\n\n\
You have access to a fetch_page_text tool that allows you to retrieve and extract text \
from any URL. Use this tool strategically to gather information needed to complete the \
product snapshot.\n\n\
Guidelines:\n\
- Always populate the ProductSnapshot schema exactly using evidence from retrieved content\n\
- Write in a neutral, professional tone\n\
- Keep numeric values as numbers\n\
- Ensure every URL is an https link\n\
- If information is unavailable, return nulls or empty lists as appropriate\n\
- Do not fabricate information - only use verified details from the pages you fetch\n\
- Be strategic about which URLs to fetch; prioritize pages that will give you the most relevant information\n\
- You may call the fetch_page_text tool multiple times if needed to gather comprehensive information";

const DEFAULT_SINGLE_PASS_PROMPT: &str = "You are a product intelligence assistant generating data for a catalog. \
Always populate the ProductSnapshot schema exactly, using only evidence from the page \
content provided. Write in a neutral, professional tone, keep numeric values as numbers, \
and ensure every URL is an https link. If information is unavailable, return nulls \
or empty lists as appropriate.";

/// 系统提示词（可由 prompts 目录下的文件覆盖）
#[derive(Debug, Clone)]
pub struct Prompts {
    pub agentic: String,
    pub single_pass: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            agentic: DEFAULT_AGENTIC_PROMPT.to_string(),
            single_pass: DEFAULT_SINGLE_PASS_PROMPT.to_string(),
        }
    }
}

impl Prompts {
    /// 读取 agentic.txt / single_pass.txt，缺失或为空时使用内置提示词
    pub fn load(dir: &Path) -> Self {
        let read = |name: &str, fallback: &str| {
            std::fs::read_to_string(dir.join(name))
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| fallback.to_string())
        };
        Self {
            agentic: read("agentic.txt", DEFAULT_AGENTIC_PROMPT),
            single_pass: read("single_pass.txt", DEFAULT_SINGLE_PASS_PROMPT),
        }
    }
}

/// 抽取方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractionMode {
    /// 模型通过工具自行抓取页面
    #[default]
    Agentic,
    /// 预先抓取页面，单次模型调用
    SinglePass,
}

/// 预构建的 Agent 组件，可多次请求共享
pub struct AgentComponents {
    pub llm: Arc<dyn LlmClient>,
    pub executor: Arc<ToolExecutor>,
    /// single-pass 使用的空工具执行器
    pub bare_executor: Arc<ToolExecutor>,
    pub prompts: Prompts,
    pub max_turns: usize,
    pub strict_schema: bool,
    pub fetch: FetchSection,
    fetch_client: reqwest::Client,
}

fn require_env(name: &str) -> Result<String, AgentError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            AgentError::ConfigError(format!("Missing required environment variable: {}", name))
        })
}

/// 根据 llm.provider 创建客户端：azure / openai / mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Result<Arc<dyn LlmClient>, AgentError> {
    match cfg.llm.provider.to_lowercase().as_str() {
        "azure" => {
            let endpoint = require_env("AZURE_OPENAI_ENDPOINT")?;
            let api_key = require_env("AZURE_OPENAI_API_KEY")?;
            let deployment = require_env("AZURE_OPENAI_DEPLOYMENT")?;
            let api_version = std::env::var("AZURE_OPENAI_API_VERSION")
                .unwrap_or_else(|_| cfg.llm.api_version.clone());
            tracing::info!(deployment = %deployment, api_version = %api_version, "Using Azure OpenAI");
            Ok(Arc::new(OpenAiClient::azure(
                &endpoint,
                &api_key,
                &deployment,
                &api_version,
            )))
        }
        "openai" => {
            let api_key = require_env("OPENAI_API_KEY")?;
            tracing::info!(model = %cfg.llm.model, "Using OpenAI");
            Ok(Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                Some(&api_key),
            )))
        }
        "mock" => {
            tracing::warn!("Using Mock LLM");
            Ok(Arc::new(MockLlmClient))
        }
        other => Err(AgentError::ConfigError(format!(
            "Unknown llm provider: {}",
            other
        ))),
    }
}

/// 创建 Agent 组件：从配置加载 LLM、fetch_page_text 工具、并发与超时
pub fn create_agent_components(cfg: &AppConfig) -> Result<AgentComponents, AgentError> {
    let llm = create_llm_from_config(cfg)?;
    create_agent_components_with_llm(cfg, llm)
}

/// 使用给定的 LLM 客户端构建组件（测试与自定义后端）
pub fn create_agent_components_with_llm(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
) -> Result<AgentComponents, AgentError> {
    let timeout = match cfg.agent.tool_timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    let mut tools = ToolRegistry::new();
    tools.register(FetchPageTool::from_config(&cfg.tools.fetch))?;

    let executor = ToolExecutor::new(tools)
        .with_max_concurrency(cfg.agent.max_concurrent_tools)
        .with_timeout(timeout);

    Ok(AgentComponents {
        llm,
        executor: Arc::new(executor),
        bare_executor: Arc::new(ToolExecutor::new(ToolRegistry::new())),
        prompts: Prompts::load(&cfg.prompts_dir()),
        max_turns: cfg.agent.max_turns,
        strict_schema: cfg.llm.strict_schema,
        fetch: cfg.tools.fetch.clone(),
        fetch_client: build_client(cfg.tools.fetch.timeout_secs, &cfg.tools.fetch.user_agent),
    })
}

fn validate_url(url: &str) -> Result<&str, AgentError> {
    let url = url.trim();
    if is_http_url(url) {
        Ok(url)
    } else {
        Err(AgentError::InvalidInput(format!("Invalid URL: {}", url)))
    }
}

fn agentic_task(url: &str) -> String {
    format!(
        "Extract product information and create a ProductSnapshot from this URL: {url}\n\n\
         Use the fetch_page_text tool to retrieve content from the URL and any related pages you need. \
         Then provide your analysis in the ProductSnapshot format as a valid JSON object.\n\n\
         Only return valid JSON for the ProductSnapshot, no other text. \
         Make sure to use the fetch_page_text tool to get the actual page content before analyzing."
    )
}

fn single_pass_task(url: &str, page_text: &str) -> String {
    format!(
        "Use the webpage content to complete the ProductSnapshot schema. \
         Stay faithful to verified details, prefer official data, and do not fabricate. \
         If a field is unknown, return null.\n\nURL: {url}\n\nWebpage content:\n{page_text}"
    )
}

/// 带工具的抽取
pub async fn extract_product_snapshot(
    components: &AgentComponents,
    url: &str,
) -> Result<LoopOutcome<ProductSnapshot>, AgentError> {
    run_agentic(components, url, None).await
}

/// 带工具的抽取，通过 event_tx 推送轮次 / 工具调用 / 结果事件
pub async fn extract_product_snapshot_stream(
    components: &AgentComponents,
    url: &str,
    event_tx: mpsc::UnboundedSender<LoopEvent>,
) -> Result<LoopOutcome<ProductSnapshot>, AgentError> {
    run_agentic(components, url, Some(event_tx)).await
}

async fn run_agentic(
    components: &AgentComponents,
    url: &str,
    event_tx: Option<mpsc::UnboundedSender<LoopEvent>>,
) -> Result<LoopOutcome<ProductSnapshot>, AgentError> {
    let url = validate_url(url)?;
    let mut agent = AgentLoop::new(components.llm.clone(), components.executor.clone())
        .with_system_prompt(components.prompts.agentic.clone())
        .with_output_schema(ProductSnapshot::output_schema(components.strict_schema))
        .with_max_turns(components.max_turns)
        .with_span(tracing::info_span!("extract", mode = "agentic", url = %url));
    if let Some(tx) = event_tx {
        agent = agent.with_events(tx);
    }
    agent.run(agentic_task(url)).await
}

/// 单次调用抽取：页面抓取失败直接返回错误
pub async fn extract_product_snapshot_single_pass(
    components: &AgentComponents,
    url: &str,
) -> Result<LoopOutcome<ProductSnapshot>, AgentError> {
    let url = validate_url(url)?;
    let html = fetch_page(&components.fetch_client, url).await?;
    let mut text = extract_visible_text(&html);
    let limit = components.fetch.max_text_chars;
    if limit > 0 && text.chars().count() > limit {
        text = text.chars().take(limit).collect();
    }
    tracing::info!(url = %url, chars = text.chars().count(), "page text extracted");

    AgentLoop::new(components.llm.clone(), components.bare_executor.clone())
        .with_system_prompt(components.prompts.single_pass.clone())
        .with_output_schema(ProductSnapshot::output_schema(components.strict_schema))
        .with_max_turns(1)
        .with_span(tracing::info_span!("extract", mode = "single_pass", url = %url))
        .run(single_pass_task(url, &text))
        .await
}

/// 按模式抽取，只返回结果
pub async fn analyze(
    components: &AgentComponents,
    url: &str,
    mode: ExtractionMode,
) -> Result<ProductSnapshot, AgentError> {
    let outcome = match mode {
        ExtractionMode::Agentic => extract_product_snapshot(components, url).await?,
        ExtractionMode::SinglePass => extract_product_snapshot_single_pass(components, url).await?,
    };
    tracing::info!(
        turns = outcome.turns,
        tool_dispatches = outcome.tool_dispatches,
        total_tokens = outcome.usage.total_tokens,
        "extraction finished"
    );
    Ok(outcome.payload)
}
